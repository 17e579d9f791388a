use crate::config::ConfigError;
use std::time::Duration;
use tokio_tungstenite::tungstenite;

#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tungstenite::Error),

    #[error("Invalid configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("Write did not complete within {0:?}")]
    WriteTimeout(Duration),

    #[error("Hub control loop is no longer running")]
    HubClosed,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RelayConfig;

    fn check(config: &RelayConfig) -> Result<(), RelayError> {
        config.validate()?;
        Ok(())
    }

    #[test]
    fn test_invalid_config_surfaces_as_relay_error() {
        let config = RelayConfig {
            write_wait: Duration::ZERO,
            ..RelayConfig::default()
        };

        let err = check(&config).unwrap_err();

        assert!(matches!(err, RelayError::Config(ConfigError::Zero("write wait"))));
        assert!(err.to_string().starts_with("Invalid configuration"));
    }
}
