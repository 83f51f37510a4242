use thiserror::Error;

use crate::config::LoadError;

#[derive(Debug, Error)]
pub enum InfraError {
    #[error("telemetry initialization failed: {0}")]
    Telemetry(String),
    #[error("configuration error: {message}")]
    Configuration { message: String },
}

impl InfraError {
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    pub fn telemetry(message: impl Into<String>) -> Self {
        Self::Telemetry(message.into())
    }
}

impl From<LoadError> for InfraError {
    fn from(err: LoadError) -> Self {
        Self::configuration(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn load_errors_become_configuration_errors() {
        let err: InfraError = LoadError::Invalid {
            key: "cache.ttl_seconds",
            reason: "must be greater than zero".to_string(),
        }
        .into();

        assert!(matches!(err, InfraError::Configuration { .. }));
        assert!(err.to_string().contains("cache.ttl_seconds"));
    }
}
