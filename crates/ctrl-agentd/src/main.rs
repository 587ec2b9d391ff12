mod config;

use std::sync::Arc;

use anyhow::Context;
use ctrl_api::{ControllersAdapter, HttpApi};
use ctrl_core::{ActivityRegistry, ControllerConfig, ControllerDeps, EnvironmentControllers};
use ctrl_exec::{ProcConfig, ProcSubstrate};
use ctrl_observe::logger_init;
use ctrl_relay::{CompletionRelay, RELAY_TASK};
use taskvisor::{Supervisor, SupervisorConfig};
use tokio::net::TcpListener;
use tracing::{info, warn};

use crate::config::AgentConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 1) Config + logger
    let cfg = AgentConfig::from_env()?;
    logger_init(&cfg.logger)?;
    info!(addr = %cfg.http_addr, namespace = %cfg.relay.namespace, "logger initialized");

    // 2) Substrate + completion relay
    let substrate = Arc::new(ProcSubstrate::new(ProcConfig::default()));
    let registry = ActivityRegistry::new();
    let relay = CompletionRelay::new(substrate.clone(), Arc::new(registry.clone()), cfg.relay)?;
    let sup = Supervisor::new(SupervisorConfig::default(), Vec::new());
    let sup_task = {
        let sup = Arc::clone(&sup);
        let spec = Arc::new(relay).task_spec();
        tokio::spawn(async move { sup.run(vec![spec]).await })
    };

    // 3) Environment controllers
    let controllers = EnvironmentControllers::new(
        ControllerConfig::default(),
        ControllerDeps {
            substrate,
            completions: registry,
            runner: cfg.runner,
        },
    );

    // 4) HTTP ingress
    let router = HttpApi::new(Arc::new(ControllersAdapter::new(controllers))).router();
    let listener = TcpListener::bind(cfg.http_addr)
        .await
        .with_context(|| format!("bind {}", cfg.http_addr))?;
    info!("listening on {}, press Ctrl+C to stop", cfg.http_addr);

    ctrl_api::axum::serve(listener, router)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("shutting down...");
        })
        .await?;

    if let Err(e) = sup.remove_task(RELAY_TASK) {
        warn!(error = %e, "relay task already gone");
    }
    sup_task.await?.context("supervisor")?;
    Ok(())
}
