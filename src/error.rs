//! Error types for fleet operations
//!
//! Each concern has its own enum next to the code that raises it
//! ([`ConfigError`], [`ResolveError`], [`TransportError`]). [`FleetError`]
//! aggregates them for callers of the manager facade.

use crate::config::ConfigError;
use crate::fleet::resolver::ResolveError;
use crate::transport::TransportError;
use thiserror::Error;

/// Main error type for fleet manager operations
#[derive(Debug, Error)]
pub enum FleetError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Cannot resolve connection method: {0}")]
    Resolve(#[from] ResolveError),

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Fleet manager is stopped")]
    Stopped,
}

impl FleetError {
    /// Whether the error concerns one device's configuration rather than the manager
    pub fn is_device_config(&self) -> bool {
        matches!(self, FleetError::Config(_) | FleetError::Resolve(_))
    }
}

/// Result type for fleet operations
pub type FleetResult<T> = Result<T, FleetError>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConnectionMethod;

    #[test]
    fn test_from_resolve_error() {
        let error: FleetError = ResolveError::MissingAccessToken {
            method: ConnectionMethod::Thingsboard,
        }
        .into();

        assert!(error.is_device_config());
        assert_eq!(
            error.to_string(),
            "Cannot resolve connection method: THINGSBOARD requires an access token"
        );
    }

    #[test]
    fn test_stopped_is_not_device_config() {
        assert!(!FleetError::Stopped.is_device_config());
        assert!(!FleetError::from(TransportError::Refused { code: 5 }).is_device_config());
    }
}
