//! Tracing configuration for the command-line host
//!
//! The library only emits events and spans. Installing a subscriber is left to
//! the application; this module is what the bundled CLI uses to do it.

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Registry};

/// Configuration for tracing output format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TracingFormat {
    /// Human-readable console output with colors (default)
    #[default]
    Console,
    /// Compact uncolored output for CI logs
    Compact,
    /// JSON structured logging
    #[cfg(feature = "tracing-json")]
    Json,
}

/// Configuration for tracing output destination
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum TracingOutput {
    /// Output to stderr (default)
    #[default]
    Console,
    /// Output to a file
    #[cfg(feature = "tracing-files")]
    File(std::path::PathBuf),
}

/// Keeps buffered log writers alive; drop it only at process exit
#[must_use = "dropping the guard stops file logging"]
#[derive(Debug, Default)]
pub struct TracingGuard {
    #[cfg(feature = "tracing-files")]
    _file: Option<tracing_appender::non_blocking::WorkerGuard>,
}

/// Tracing configuration builder
#[derive(Debug, Default)]
pub struct TracingConfig {
    /// Verbosity level (maps to filter directives)
    pub verbosity: u8,
    pub format: TracingFormat,
    pub output: TracingOutput,
    /// Environment filter string (overrides verbosity if set)
    pub env_filter: Option<String>,
    /// Session ID logged once at startup for correlation
    pub session_id: Option<String>,
}

impl TracingConfig {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set verbosity level (0-2+)
    #[must_use]
    pub fn with_verbosity(mut self, verbosity: u8) -> Self {
        self.verbosity = verbosity;
        self
    }

    #[must_use]
    pub fn with_format(mut self, format: TracingFormat) -> Self {
        self.format = format;
        self
    }

    #[must_use]
    pub fn with_output(mut self, output: TracingOutput) -> Self {
        self.output = output;
        self
    }

    /// Set custom environment filter
    #[must_use]
    pub fn with_env_filter<S: Into<String>>(mut self, filter: S) -> Self {
        self.env_filter = Some(filter.into());
        self
    }

    #[must_use]
    pub fn with_session_id<S: Into<String>>(mut self, session_id: S) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    /// Filter directives for the configured verbosity
    ///
    /// Dependencies stay at `warn` until `-vv`.
    #[must_use]
    pub fn verbosity_to_filter(&self) -> &'static str {
        match self.verbosity {
            0 => "warn,imgly_dewatermark=info",
            1 => "warn,imgly_dewatermark=debug",
            _ => "trace",
        }
    }

    fn filter(&self) -> anyhow::Result<EnvFilter> {
        let directives = self.env_filter.as_deref().unwrap_or_else(|| self.verbosity_to_filter());
        Ok(EnvFilter::try_new(directives)?)
    }

    /// Install the global subscriber
    ///
    /// # Errors
    /// - Invalid filter directives
    /// - A global subscriber is already installed
    pub fn init(self) -> anyhow::Result<TracingGuard> {
        let registry = Registry::default().with(self.filter()?);
        #[allow(unused_mut)]
        let mut guard = TracingGuard::default();

        match (&self.format, &self.output) {
            (TracingFormat::Console, TracingOutput::Console) => {
                let layer = fmt::layer()
                    .with_writer(std::io::stderr)
                    .with_ansi(true)
                    .with_target(false)
                    .with_level(true)
                    .compact();
                registry.with(layer).try_init()?;
            },

            (TracingFormat::Compact, TracingOutput::Console) => {
                let layer = fmt::layer()
                    .with_writer(std::io::stderr)
                    .with_ansi(false)
                    .with_target(false)
                    .compact();
                registry.with(layer).try_init()?;
            },

            #[cfg(feature = "tracing-json")]
            (TracingFormat::Json, TracingOutput::Console) => {
                let layer = fmt::layer()
                    .with_writer(std::io::stderr)
                    .json()
                    .with_current_span(true)
                    .with_span_list(true);
                registry.with(layer).try_init()?;
            },

            #[cfg(feature = "tracing-files")]
            (format, TracingOutput::File(path)) => {
                use tracing_appender::{non_blocking, rolling};

                let appender = rolling::never(
                    path.parent().unwrap_or_else(|| std::path::Path::new(".")),
                    path.file_name()
                        .unwrap_or_else(|| std::ffi::OsStr::new("dewatermark.log")),
                );
                let (writer, file_guard) = non_blocking(appender);
                guard._file = Some(file_guard);

                match format {
                    TracingFormat::Console | TracingFormat::Compact => {
                        let layer = fmt::layer().with_ansi(false).with_writer(writer).compact();
                        registry.with(layer).try_init()?;
                    },
                    #[cfg(feature = "tracing-json")]
                    TracingFormat::Json => {
                        let layer = fmt::layer()
                            .json()
                            .with_writer(writer)
                            .with_current_span(true)
                            .with_span_list(true);
                        registry.with(layer).try_init()?;
                    },
                }
            },
        }

        if let Some(session_id) = &self.session_id {
            tracing::info!(session_id = %session_id, "Dewatermark session started");
        }

        Ok(guard)
    }
}

/// Install console tracing with CLI defaults and a fresh session id
///
/// # Errors
/// - See [`TracingConfig::init`]
pub fn init_cli_tracing(verbosity: u8) -> anyhow::Result<TracingGuard> {
    TracingConfig::new()
        .with_verbosity(verbosity)
        .with_session_id(uuid::Uuid::new_v4().to_string())
        .init()
}

/// Span helpers for the host's long-running operations
pub mod spans {
    use tracing::{Level, Span};

    /// Span covering a whole batch run
    pub fn batch_run(file_count: usize, engine: &str) -> Span {
        tracing::span!(Level::INFO, "batch_run", file_count, engine = %engine)
    }

    /// Span covering the export of finished jobs
    pub fn export(output_count: usize) -> Span {
        tracing::span!(Level::DEBUG, "export", output_count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_verbosity_mapping() {
        assert_eq!(
            TracingConfig::new().with_verbosity(0).verbosity_to_filter(),
            "warn,imgly_dewatermark=info"
        );
        assert_eq!(
            TracingConfig::new().with_verbosity(1).verbosity_to_filter(),
            "warn,imgly_dewatermark=debug"
        );
        assert_eq!(TracingConfig::new().with_verbosity(2).verbosity_to_filter(), "trace");
        assert_eq!(TracingConfig::new().with_verbosity(9).verbosity_to_filter(), "trace");
    }

    #[test]
    fn test_env_filter_overrides_verbosity() {
        let config = TracingConfig::new().with_verbosity(2).with_env_filter("error");
        assert!(config.filter().is_ok());
        assert_eq!(config.env_filter.as_deref(), Some("error"));

        let bad = TracingConfig::new().with_env_filter("imgly_dewatermark=notalevel");
        assert!(bad.filter().is_err());
    }

    #[test]
    fn test_default_config() {
        let config = TracingConfig::default();
        assert_eq!(config.verbosity, 0);
        assert_eq!(config.format, TracingFormat::Console);
        assert_eq!(config.output, TracingOutput::Console);
        assert!(config.session_id.is_none());
    }
}
