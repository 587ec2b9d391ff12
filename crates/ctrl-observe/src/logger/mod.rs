mod config;
mod error;
mod format;
mod log;

pub use config::LoggerConfig;
pub use error::LoggerError;
pub use format::LoggerFormat;

/// Install the global subscriber described by `cfg`. Succeeds at most once per process.
pub fn logger_init(cfg: &LoggerConfig) -> Result<(), LoggerError> {
    log::Logger::install(cfg)
}
