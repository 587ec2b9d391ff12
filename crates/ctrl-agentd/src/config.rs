use std::{net::SocketAddr, time::Duration};

use anyhow::{Context, Result};
use ctrl_core::RunnerConfig;
use ctrl_model::JobTemplate;
use ctrl_observe::{LoggerConfig, LoggerFormat};
use ctrl_relay::RelayConfig;

/// Daemon settings, read from `CTRL_*` environment variables.
#[derive(Debug, Clone)]
pub struct AgentConfig {
    pub logger: LoggerConfig,
    pub http_addr: SocketAddr,
    pub runner: RunnerConfig,
    pub relay: RelayConfig,
}

impl AgentConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(get: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut logger = LoggerConfig::default();
        if let Some(level) = get("CTRL_LOG_LEVEL") {
            logger = logger.with_level(level);
        }
        if let Some(format) = get("CTRL_LOG_FORMAT") {
            logger = logger.with_format(format.parse::<LoggerFormat>()?);
        }
        logger.validate()?;

        let http_addr = get("CTRL_HTTP_ADDR")
            .unwrap_or_else(|| "127.0.0.1:8080".to_string())
            .parse()
            .context("CTRL_HTTP_ADDR")?;

        let mut job = JobTemplate::default();
        if let Some(ns) = get("CTRL_NAMESPACE") {
            job.namespace = ns;
        }
        if let Some(image) = get("CTRL_JOB_IMAGE") {
            job.image = image;
        }

        let mut runner = RunnerConfig {
            job,
            ..Default::default()
        };
        if let Some(secs) = get("CTRL_START_TO_CLOSE_SECS") {
            runner.start_to_close =
                Duration::from_secs(secs.parse().context("CTRL_START_TO_CLOSE_SECS")?);
        }
        if let Some(secs) = get("CTRL_HEARTBEAT_TIMEOUT_SECS") {
            runner.heartbeat_timeout = Some(Duration::from_secs(
                secs.parse().context("CTRL_HEARTBEAT_TIMEOUT_SECS")?,
            ));
        }
        runner.validate()?;

        let mut relay = RelayConfig {
            namespace: runner.job.namespace.clone(),
            ..Default::default()
        };
        if let Some(ms) = get("CTRL_RELAY_RESTART_MS") {
            relay.restart_delay =
                Duration::from_millis(ms.parse().context("CTRL_RELAY_RESTART_MS")?);
        }
        relay.validate()?;

        Ok(Self {
            logger,
            http_addr,
            runner,
            relay,
        })
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn cfg(pairs: &[(&str, &str)]) -> Result<AgentConfig> {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        AgentConfig::from_lookup(|k| vars.get(k).cloned())
    }

    #[test]
    fn defaults_without_variables() {
        let c = cfg(&[]).unwrap();
        assert_eq!(c.http_addr.port(), 8080);
        assert_eq!(c.relay.namespace, "ctrlplane");
        assert_eq!(c.runner.job.namespace, "ctrlplane");
        assert!(c.runner.heartbeat_timeout.is_none());
    }

    #[test]
    fn namespace_is_shared_by_runner_and_relay() {
        let c = cfg(&[
            ("CTRL_NAMESPACE", "ci"),
            ("CTRL_RELAY_RESTART_MS", "250"),
            ("CTRL_HEARTBEAT_TIMEOUT_SECS", "90"),
        ])
        .unwrap();
        assert_eq!(c.relay.namespace, "ci");
        assert_eq!(c.runner.job.namespace, "ci");
        assert_eq!(c.relay.restart_delay, Duration::from_millis(250));
        assert_eq!(c.runner.heartbeat_timeout, Some(Duration::from_secs(90)));
    }

    #[test]
    fn rejects_malformed_values() {
        assert!(cfg(&[("CTRL_HTTP_ADDR", "nowhere")]).is_err());
        assert!(cfg(&[("CTRL_LOG_FORMAT", "xml")]).is_err());
        assert!(cfg(&[("CTRL_START_TO_CLOSE_SECS", "soon")]).is_err());
    }
}
