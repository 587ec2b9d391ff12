use crate::logger::{error::LoggerError, format::LoggerFormat, log::mk_filter};

#[derive(Debug, Clone)]
pub struct LoggerConfig {
    pub format: LoggerFormat,
    /// `EnvFilter` directive, e.g. `info` or `info,ctrl_core=debug`.
    pub level: String,
    pub with_targets: bool,
    pub use_color: bool,
    /// Also log span close events with their busy/idle time.
    pub with_span_timing: bool,
}

impl Default for LoggerConfig {
    fn default() -> Self {
        let use_color = cfg!(test) || atty::is(atty::Stream::Stdout);
        Self {
            format: LoggerFormat::Text,
            level: "info".to_string(),
            with_targets: true,
            use_color,
            with_span_timing: false,
        }
    }
}

impl LoggerConfig {
    pub fn with_format(mut self, format: LoggerFormat) -> Self {
        self.format = format;
        self
    }

    pub fn with_level(mut self, level: impl Into<String>) -> Self {
        self.level = level.into();
        self
    }

    /// Check the level directive without installing anything.
    pub fn validate(&self) -> Result<(), LoggerError> {
        mk_filter(&self.level).map(|_| ())
    }
}
