//! Reconfiguration ingress for environment controllers.
mod error;
pub use error::ApiError;

mod dto;
pub use dto::{EnvironmentView, UpdateEnvironmentResponse};

mod handler;
pub use handler::ApiHandler;

mod adapter;
pub use adapter::ControllersAdapter;

#[cfg(feature = "http")]
mod http;

#[cfg(feature = "http")]
pub use http::HttpApi;

#[cfg(feature = "http")]
pub use axum;
