//! Instancia de saga: secuencia ordenada de pasos con estado propio.
//!
//! Invariantes:
//! - `status` sólo transiciona Pending -> Running -> {Completed |
//!   Compensating -> Compensated} o directamente a Failed por timeout.
//! - Una saga nunca vuelve a Running después de abandonarlo.
//! - Los pasos nunca se reordenan ni se eliminan después de la creación.
//! - `current_step` es monótonamente no decreciente durante la ejecución
//!   hacia adelante.
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::saga_step::{SagaStep, SagaStepSpec};
use crate::DomainError;

/// Estado de la saga a nivel de workflow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SagaStatus {
    /// Creada y persistida, sin ejecutar todavía.
    Pending,
    /// Ejecución hacia adelante en curso.
    Running,
    /// Un paso falló de forma permanente; se deshacen los pasos completados.
    Compensating,
    /// Todos los pasos completaron.
    Completed,
    /// Timeout vencido sin alcanzar estado terminal (sin compensación).
    Failed,
    /// La pasada de compensación terminó (aunque alguna compensación falle).
    Compensated,
}

impl SagaStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, SagaStatus::Completed | SagaStatus::Failed | SagaStatus::Compensated)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SagaWorkflow {
    pub saga_id: Uuid,
    pub tenant_id: String,
    pub workflow_type: String,
    /// Orden fijado en la creación == orden de ejecución.
    pub steps: Vec<SagaStep>,
    /// Índice del próximo paso a ejecutar; nunca retrocede.
    pub current_step: usize,
    pub status: SagaStatus,
    /// Enlace opcional a la clave de idempotencia que originó la saga.
    pub idempotency_key: Option<String>,
    pub timeout_seconds: u64,
    pub created_at: DateTime<Utc>,
}

impl SagaWorkflow {
    pub fn new(tenant_id: impl Into<String>,
               workflow_type: impl Into<String>,
               specs: Vec<SagaStepSpec>,
               timeout_seconds: u64,
               default_max_retries: u32,
               idempotency_key: Option<String>)
               -> Result<Self, DomainError> {
        let tenant_id = tenant_id.into();
        if tenant_id.is_empty() {
            return Err(DomainError::ValidationError("tenant_id must not be empty".to_string()));
        }
        if specs.is_empty() {
            return Err(DomainError::ValidationError("a saga requires at least one step".to_string()));
        }
        let steps = specs.into_iter()
                         .map(|s| SagaStep::from_spec(s, default_max_retries))
                         .collect();
        Ok(SagaWorkflow { saga_id: Uuid::new_v4(),
                          tenant_id,
                          workflow_type: workflow_type.into(),
                          steps,
                          current_step: 0,
                          status: SagaStatus::Pending,
                          idempotency_key,
                          timeout_seconds,
                          created_at: Utc::now() })
    }

    /// Fecha límite absoluta derivada de la creación.
    pub fn deadline(&self) -> DateTime<Utc> {
        self.created_at + Duration::seconds(self.timeout_seconds as i64)
    }

    /// Una saga vencida pasa directamente a Failed sin compensación.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.deadline()
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}
