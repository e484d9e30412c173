//! Rastro de auditoría append-only de una saga.
//!
//! Se emite una entrada por cada transición de estado de un paso (hacia
//! adelante o compensando). Nunca se muta ni se borra; sirve para
//! observabilidad y post-mortem, no para el flujo de control.
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::saga_step::{SagaStep, SagaStepStatus};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SagaHistoryEntry {
    pub timestamp: DateTime<Utc>,
    pub step_id: Uuid,
    pub step_name: String,
    /// Estado del paso en el momento de la transición.
    pub status: SagaStepStatus,
    pub error: Option<String>,
    pub retry_count: u32,
}

impl SagaHistoryEntry {
    /// Captura el estado actual de un paso como entrada de historial.
    pub fn from_step(step: &SagaStep) -> Self {
        SagaHistoryEntry { timestamp: Utc::now(),
                           step_id: step.step_id,
                           step_name: step.name.clone(),
                           status: step.status,
                           error: step.error.clone(),
                           retry_count: step.retry_count }
    }
}
