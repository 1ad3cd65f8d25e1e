//! Tracing subscriber setup.

use tracing_subscriber::EnvFilter;

use crate::config::LoggingConfig;
use crate::error::{StoreError, StoreResult};

/// Install the global tracing subscriber described by `config`.
///
/// `RUST_LOG`, when set, takes precedence over `config.level`.
pub fn init_tracing(config: &LoggingConfig) -> StoreResult<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.level))
        .map_err(|e| StoreError::Config(format!("invalid log level '{}': {}", config.level, e)))?;

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(config.target)
        .with_thread_ids(true);

    let result = match config.format.as_str() {
        "json" => builder.json().try_init(),
        "pretty" | "text" => builder.try_init(),
        other => {
            return Err(StoreError::Config(format!("unknown log format '{}'", other)));
        }
    };

    result.map_err(|e| StoreError::Config(format!("failed to install subscriber: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejects_unknown_format() {
        let config = LoggingConfig {
            format: "xml".to_string(),
            ..LoggingConfig::default()
        };
        assert!(init_tracing(&config).is_err());
    }
}
