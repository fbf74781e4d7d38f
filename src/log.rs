use serde::Deserialize;
use tracing_subscriber::filter::EnvFilter;

use crate::error::Result;

/// The `logging` section of the gateway configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// One of "trace", "debug", "info", "warn", "error".
    pub level: String,
    /// Extra per-target directives, e.g. `["path=debug", "hook=trace"]`.
    pub filters: Vec<String>,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".into(),
            filters: vec![],
        }
    }
}

/// Install the process-wide subscriber.
///
/// Must run before registries are populated so that registration itself is
/// visible at debug level. Calling it twice is a no-op (the second install
/// fails silently), which keeps tests independent of ordering.
pub fn init(config: &LogConfig) -> Result<()> {
    let mut filter = EnvFilter::new(&config.level);
    for directive in &config.filters {
        if let Ok(d) = directive.parse() {
            filter = filter.add_directive(d);
        }
    }

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .try_init();

    Ok(())
}

/// Subscriber with defaults, for binaries and tests that skip configuration.
pub fn init_default() {
    let _ = init(&LogConfig::default());
}
