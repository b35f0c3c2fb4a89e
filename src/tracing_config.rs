//! Subscriber setup for the CLI
//!
//! The library only emits `tracing` spans/events and `log` records; picking
//! a subscriber is left to the binary.

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Registry};

/// How events are rendered
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TracingFormat {
    /// Colored, human-readable output (CLI default)
    Console,
    /// Plain output without ANSI colors, for CI logs
    Compact,
    /// One JSON object per event
    #[cfg(feature = "tracing-json")]
    Json,
}

#[derive(Debug)]
pub struct TracingConfig {
    /// 0 = info, 1 = debug, 2+ = trace
    pub verbosity: u8,
    pub format: TracingFormat,
    /// Explicit filter directive, takes precedence over `verbosity`
    pub env_filter: Option<String>,
    /// Logged once at startup so runs can be correlated
    pub session_id: Option<String>,
}

impl Default for TracingConfig {
    fn default() -> Self {
        Self {
            verbosity: 0,
            format: TracingFormat::Console,
            env_filter: None,
            session_id: None,
        }
    }
}

impl TracingConfig {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

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
    pub fn with_env_filter<S: Into<String>>(mut self, filter: S) -> Self {
        self.env_filter = Some(filter.into());
        self
    }

    #[must_use]
    pub fn with_session_id<S: Into<String>>(mut self, session_id: S) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    /// Filter directive for the configured verbosity
    #[must_use]
    pub fn verbosity_to_filter(&self) -> &'static str {
        match self.verbosity {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    }

    /// Build the `EnvFilter`, preferring the explicit directive
    pub fn build_filter(&self) -> anyhow::Result<EnvFilter> {
        let directive = self
            .env_filter
            .as_deref()
            .unwrap_or_else(|| self.verbosity_to_filter());
        Ok(EnvFilter::try_new(directive)?)
    }

    /// Install the global subscriber, writing to stderr
    ///
    /// Stdout stays free for image data and command output. Fails if a
    /// global subscriber is already set.
    pub fn init(self) -> anyhow::Result<()> {
        let registry = Registry::default().with(self.build_filter()?);

        match self.format {
            TracingFormat::Console => registry
                .with(
                    fmt::layer()
                        .with_writer(std::io::stderr)
                        .with_ansi(true)
                        .with_target(false)
                        .with_level(true)
                        .compact(),
                )
                .try_init()?,
            TracingFormat::Compact => registry
                .with(
                    fmt::layer()
                        .with_writer(std::io::stderr)
                        .with_ansi(false)
                        .with_target(false)
                        .compact(),
                )
                .try_init()?,
            #[cfg(feature = "tracing-json")]
            TracingFormat::Json => registry
                .with(
                    fmt::layer()
                        .json()
                        .with_writer(std::io::stderr)
                        .with_current_span(true)
                        .with_span_list(true),
                )
                .try_init()?,
        }

        if let Some(session_id) = &self.session_id {
            tracing::info!(session_id = %session_id, "pixkit session started");
        }

        Ok(())
    }
}

/// Initialize tracing with CLI defaults and a fresh session id
pub fn init_cli_tracing(verbosity: u8) -> anyhow::Result<()> {
    TracingConfig::new()
        .with_verbosity(verbosity)
        .with_format(TracingFormat::Console)
        .with_session_id(uuid::Uuid::new_v4().to_string())
        .init()
}

/// Span helpers shared by the CLI commands
pub mod spans {
    use tracing::{Level, Span};

    pub fn batch_processing(tool: &str, file_count: usize) -> Span {
        tracing::span!(
            Level::INFO,
            "batch_processing",
            tool = %tool,
            file_count = %file_count
        )
    }

    pub fn file_processing(file_path: &std::path::Path, tool: &str) -> Span {
        tracing::span!(
            Level::INFO,
            "file_processing",
            file_path = %file_path.display(),
            tool = %tool
        )
    }
}
