use log::LevelFilter;
use tracing::Level;
use tracing_subscriber::EnvFilter;

use crate::error::{DriftError, DriftResult};

/// Installs the global subscriber. `RUST_LOG` wins over `level` when set.
pub fn setup_tracing(level: Option<LevelFilter>) -> DriftResult<()> {
    let default_level = level.and_then(to_tracing_level).unwrap_or(Level::INFO);
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_level.as_str().to_lowercase()));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init()
        .map_err(|e| DriftError::Runtime(anyhow::anyhow!("failed to install subscriber: {e}")))
}

pub fn to_tracing_level(level: LevelFilter) -> Option<Level> {
    match level {
        LevelFilter::Off => None,
        LevelFilter::Error => Some(Level::ERROR),
        LevelFilter::Warn => Some(Level::WARN),
        LevelFilter::Info => Some(Level::INFO),
        LevelFilter::Debug => Some(Level::DEBUG),
        LevelFilter::Trace => Some(Level::TRACE),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn maps_log_levels() {
        assert_eq!(to_tracing_level(LevelFilter::Debug), Some(Level::DEBUG));
        assert_eq!(to_tracing_level(LevelFilter::Off), None);
    }
}
