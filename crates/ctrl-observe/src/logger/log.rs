use time::{UtcOffset, format_description::well_known::Rfc3339};
use tracing_subscriber::{
    EnvFilter, Layer, Registry,
    fmt::{self, format::FmtSpan, time::OffsetTime},
    layer::SubscriberExt,
    util::SubscriberInitExt,
};

use crate::logger::{config::LoggerConfig, error::LoggerError, format::LoggerFormat};

type BoxedLayer = Box<dyn Layer<Registry> + Send + Sync + 'static>;

/// Builds the output layer for a format and installs it with the level filter.
pub struct Logger;

impl Logger {
    pub fn install(cfg: &LoggerConfig) -> Result<(), LoggerError> {
        let filter = mk_filter(&cfg.level)?;
        let output = match cfg.format {
            LoggerFormat::Text => text_layer(cfg),
            LoggerFormat::Json => json_layer(cfg),
            LoggerFormat::Journald => journald_layer()?,
        };

        // Fails only when a global dispatcher or `log` logger is already set.
        Registry::default()
            .with(output)
            .with(filter)
            .try_init()
            .map_err(|_| LoggerError::AlreadyInitialized)
    }
}

pub(crate) fn mk_filter(level: &str) -> Result<EnvFilter, LoggerError> {
    EnvFilter::try_new(level).map_err(|_| LoggerError::InvalidLogLevel(level.to_string()))
}

fn text_layer(cfg: &LoggerConfig) -> BoxedLayer {
    fmt::layer()
        .with_ansi(cfg.use_color)
        .with_target(cfg.with_targets)
        .with_span_events(span_events(cfg))
        .with_timer(local_rfc3339())
        .boxed()
}

fn json_layer(cfg: &LoggerConfig) -> BoxedLayer {
    fmt::layer()
        .json()
        .with_ansi(false)
        .with_target(cfg.with_targets)
        .with_current_span(true)
        .with_span_list(false)
        .with_span_events(span_events(cfg))
        .with_timer(local_rfc3339())
        .boxed()
}

fn span_events(cfg: &LoggerConfig) -> FmtSpan {
    if cfg.with_span_timing {
        FmtSpan::CLOSE
    } else {
        FmtSpan::NONE
    }
}

fn local_rfc3339() -> OffsetTime<Rfc3339> {
    let offset = UtcOffset::current_local_offset().unwrap_or(UtcOffset::UTC);
    OffsetTime::new(offset, Rfc3339)
}

#[cfg(all(target_os = "linux", feature = "journald"))]
fn journald_layer() -> Result<BoxedLayer, LoggerError> {
    tracing_journald::layer()
        .map(|layer| layer.boxed())
        .map_err(|e| LoggerError::InitializationFailed(format!("journald: {e}")))
}

#[cfg(not(all(target_os = "linux", feature = "journald")))]
fn journald_layer() -> Result<BoxedLayer, LoggerError> {
    Err(LoggerError::JournaldNotSupported)
}
