//! Domain error model shared by every service.

use thiserror::Error;

use crate::zone::ZoneStatus;

/// Result type used across the service layer.
pub type FarmResult<T> = Result<T, FarmError>;

/// Deterministic, business-level failures. Process plumbing (config files,
/// sockets, MQTT) uses `anyhow` instead.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum FarmError {
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    #[error("{entity} already exists: {id}")]
    Duplicate { entity: &'static str, id: String },

    #[error("zone {zone_id} is already being irrigated")]
    AlreadyIrrigating { zone_id: String },

    #[error("zone {zone_id} is not active (status: {status})")]
    ZoneNotActive { zone_id: String, status: ZoneStatus },

    #[error("validation failed: {0}")]
    Validation(String),

    #[error("invalid state: {0}")]
    InvalidState(String),
}

impl FarmError {
    pub fn not_found(entity: &'static str, id: impl Into<String>) -> Self {
        Self::NotFound {
            entity,
            id: id.into(),
        }
    }

    pub fn duplicate(entity: &'static str, id: impl Into<String>) -> Self {
        Self::Duplicate {
            entity,
            id: id.into(),
        }
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn invalid_state(msg: impl Into<String>) -> Self {
        Self::InvalidState(msg.into())
    }
}
