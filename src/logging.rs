use tracing_subscriber::{fmt, EnvFilter};

/// Filter used when `RUST_LOG` is unset: session transitions at `info`,
/// everything else (tungstenite, rustls) only when it warns.
pub const DEFAULT_FILTER: &str = "warn,beesign=info";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Pretty,
    Json,
}

impl LogFormat {
    /// `BEESIGN_LOG_JSON=1` (or `true`) selects JSON lines.
    pub fn from_env() -> Self { Self::parse(std::env::var("BEESIGN_LOG_JSON").ok().as_deref()) }

    fn parse(value: Option<&str>) -> Self {
        match value.map(str::trim) {
            Some("1") => LogFormat::Json,
            Some(v) if v.eq_ignore_ascii_case("true") => LogFormat::Json,
            _ => LogFormat::Pretty,
        }
    }
}

/// Stderr subscriber in the format picked by [`LogFormat::from_env`].
pub fn init_logging() { init_logging_with(LogFormat::from_env()) }

pub fn init_logging_with(format: LogFormat) {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));
    let builder = fmt::Subscriber::builder().with_env_filter(env_filter).with_writer(std::io::stderr);

    // Already installed (tests, embedding host) is fine
    let _ = match format {
        LogFormat::Json => builder.json().try_init(),
        LogFormat::Pretty => builder.pretty().try_init(),
    };
}
