//! Errores del núcleo de orquestación.
//!
//! Taxonomía:
//! - `StorageUnavailable` se propaga siempre (la corrección depende del
//!   backend, nunca se traga).
//! - `LockAcquisition` indica que la saga ya se está ejecutando en otro
//!   lugar; el llamador no debe reintentar de inmediato.
//! - `HandlerNotFound` es un fallo permanente de paso: dispara compensación,
//!   no reintento.
//! - Cualquier otro error de un handler es transitorio y se reintenta con
//!   backoff hasta `max_retries`.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use ops_domain::DomainError;

#[derive(Debug, Error, PartialEq, Eq, Clone, Serialize, Deserialize)]
pub enum CoreError {
    #[error("storage unavailable: {0}")] StorageUnavailable(String),
    #[error("saga lock already held: {0}")] LockAcquisition(String),
    #[error("no handler registered for operation '{0}'")] HandlerNotFound(String),
    #[error("saga not found: {0}")] SagaNotFound(String),
    #[error("operation failed: {0}")] OperationFailed(String),
    #[error("validation: {0}")] Validation(String),
    #[error("serialization: {0}")] Serialization(String),
    #[error("internal: {0}")] Internal(String),
}

impl From<DomainError> for CoreError {
    fn from(err: DomainError) -> Self {
        match err {
            DomainError::ValidationError(msg) => CoreError::Validation(msg),
            DomainError::SerializationError(msg) => CoreError::Serialization(msg),
        }
    }
}
