//! Registro fino de seguimiento de una operación en segundo plano.
//!
//! Correlaciona un id de operación externo con una saga y/o una clave de
//! idempotencia; su `status` refleja el del trabajo subyacente. Se crea al
//! recibir la petición, se refresca al consultarlo y nunca se borra de forma
//! explícita (misma política de TTL/limpieza que las claves de idempotencia).
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::saga_workflow::SagaStatus;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BackgroundOperationStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

impl From<SagaStatus> for BackgroundOperationStatus {
    fn from(status: SagaStatus) -> Self {
        match status {
            SagaStatus::Pending => BackgroundOperationStatus::Pending,
            SagaStatus::Running | SagaStatus::Compensating => BackgroundOperationStatus::Running,
            SagaStatus::Completed => BackgroundOperationStatus::Completed,
            // Una saga compensada terminó sin producir su efecto: para el
            // llamador la operación falló.
            SagaStatus::Failed | SagaStatus::Compensated => BackgroundOperationStatus::Failed,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackgroundOperation {
    pub operation_id: Uuid,
    pub operation_type: String,
    pub tenant_id: String,
    pub saga_id: Option<Uuid>,
    pub idempotency_key: Option<String>,
    pub status: BackgroundOperationStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl BackgroundOperation {
    pub fn new(operation_type: impl Into<String>,
               tenant_id: impl Into<String>,
               saga_id: Option<Uuid>,
               idempotency_key: Option<String>)
               -> Self {
        let now = Utc::now();
        BackgroundOperation { operation_id: Uuid::new_v4(),
                              operation_type: operation_type.into(),
                              tenant_id: tenant_id.into(),
                              saga_id,
                              idempotency_key,
                              status: BackgroundOperationStatus::Pending,
                              created_at: now,
                              updated_at: now }
    }

    /// Refresca el estado espejado desde el trabajo subyacente.
    pub fn refresh(&mut self, status: BackgroundOperationStatus) {
        self.status = status;
        self.updated_at = Utc::now();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn saga_status_mapping() {
        assert_eq!(BackgroundOperationStatus::from(SagaStatus::Pending), BackgroundOperationStatus::Pending);
        assert_eq!(BackgroundOperationStatus::from(SagaStatus::Running), BackgroundOperationStatus::Running);
        assert_eq!(BackgroundOperationStatus::from(SagaStatus::Compensating), BackgroundOperationStatus::Running);
        assert_eq!(BackgroundOperationStatus::from(SagaStatus::Completed), BackgroundOperationStatus::Completed);
        assert_eq!(BackgroundOperationStatus::from(SagaStatus::Compensated), BackgroundOperationStatus::Failed);
        assert_eq!(BackgroundOperationStatus::from(SagaStatus::Failed), BackgroundOperationStatus::Failed);
    }

    #[test]
    fn refresh_updates_status_and_timestamp() {
        let mut op = BackgroundOperation::new("provision", "t1", None, Some("k1".to_string()));
        let before = op.updated_at;
        op.refresh(BackgroundOperationStatus::Running);
        assert_eq!(op.status, BackgroundOperationStatus::Running);
        assert!(op.updated_at >= before);
    }
}
