//! Registro de idempotencia: identifica una operación deduplicada.
//!
//! Invariantes:
//! - Existe exactamente un registro por valor de `key` en todo momento.
//! - Pasado `expires_at` el registro está lógicamente ausente (la siguiente
//!   petición con la misma clave se trata como nueva).
//! - El estado terminal (Completed / Failed) se fija una sola vez y el
//!   registro nunca se resucita después de expirar.
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::DomainError;

/// Estado del ciclo de vida de una clave de idempotencia.
///
/// Transiciones válidas:
/// - `Pending` -> `InProgress`
/// - `Pending` | `InProgress` -> `Completed`
/// - `Pending` | `InProgress` -> `Failed`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum IdempotencyStatus {
    /// Registrada, la ejecución todavía no comenzó.
    Pending,
    /// La capa de frontera está dirigiendo la ejecución.
    InProgress,
    /// Terminó con éxito; `result` contiene la respuesta cacheada.
    Completed,
    /// Terminó con error; `error` contiene el mensaje cacheado.
    Failed,
}

impl IdempotencyStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, IdempotencyStatus::Completed | IdempotencyStatus::Failed)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdempotencyKey {
    /// Valor de la clave (provista por el llamador o derivada por hash).
    pub key: String,
    pub tenant_id: String,
    pub user_id: Option<String>,
    pub operation_type: String,
    pub status: IdempotencyStatus,
    pub created_at: DateTime<Utc>,
    /// Fecha límite fijada en la creación; nunca se extiende.
    pub expires_at: DateTime<Utc>,
    /// Presente sólo si `status == Completed`.
    pub result: Option<Value>,
    /// Presente sólo si `status == Failed`.
    pub error: Option<String>,
}

impl IdempotencyKey {
    pub fn new(key: impl Into<String>,
               tenant_id: impl Into<String>,
               user_id: Option<String>,
               operation_type: impl Into<String>,
               ttl_seconds: u64)
               -> Result<Self, DomainError> {
        let key = key.into();
        let tenant_id = tenant_id.into();
        if key.is_empty() {
            return Err(DomainError::ValidationError("idempotency key must not be empty".to_string()));
        }
        if tenant_id.is_empty() {
            return Err(DomainError::ValidationError("tenant_id must not be empty".to_string()));
        }
        let now = Utc::now();
        Ok(IdempotencyKey { key,
                            tenant_id,
                            user_id,
                            operation_type: operation_type.into(),
                            status: IdempotencyStatus::Pending,
                            created_at: now,
                            expires_at: now + Duration::seconds(ttl_seconds as i64),
                            result: None,
                            error: None })
    }

    /// Una clave expirada está lógicamente ausente.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }

    /// Segundos restantes hasta `expires_at` (0 si ya expiró). Se usa para
    /// reescribir el registro sin alargar su vida original.
    pub fn remaining_ttl(&self, now: DateTime<Utc>) -> u64 {
        (self.expires_at - now).num_seconds().max(0) as u64
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}
