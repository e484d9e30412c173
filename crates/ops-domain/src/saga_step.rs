//! Un paso de saga: la acción hacia adelante y su acción de deshacer.
//!
//! Invariantes:
//! - Un paso llega a `Completed` como máximo una vez.
//! - `retry_count` nunca supera `max_retries`.
//! - La compensación sólo se intenta sobre pasos que llegaron a `Completed`
//!   y que declaran `compensation_operation`.
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Estado de un paso en tiempo de ejecución.
///
/// Transiciones válidas (hacia adelante):
/// - `Pending` -> `Executing` -> `Completed` | `Failed`
///
/// Transiciones de compensación (sólo desde `Completed`):
/// - `Completed` -> `Compensating` -> `Compensated` | `Failed`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SagaStepStatus {
    /// El paso está pendiente de ejecución.
    Pending,
    /// El paso está en ejecución (incluye reintentos).
    Executing,
    /// El paso finalizó correctamente.
    Completed,
    /// El paso agotó sus reintentos o su compensación falló.
    Failed,
    /// Se está ejecutando la operación de compensación.
    Compensating,
    /// La compensación finalizó correctamente.
    Compensated,
}

/// Entrada de la capa de frontera para declarar un paso al crear la saga.
/// La secuencia de specs fija el orden de ejecución en la creación.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SagaStepSpec {
    pub name: String,
    /// Clave del handler en el registro de operaciones.
    pub operation: String,
    pub parameters: Value,
    /// Clave del handler de compensación (None si no hay nada que deshacer).
    pub compensation_operation: Option<String>,
    pub compensation_parameters: Option<Value>,
    pub max_retries: Option<u32>,
}

impl SagaStepSpec {
    pub fn new(name: impl Into<String>, operation: impl Into<String>, parameters: Value) -> Self {
        SagaStepSpec { name: name.into(),
                       operation: operation.into(),
                       parameters,
                       compensation_operation: None,
                       compensation_parameters: None,
                       max_retries: None }
    }

    pub fn with_compensation(mut self, operation: impl Into<String>, parameters: Value) -> Self {
        self.compensation_operation = Some(operation.into());
        self.compensation_parameters = Some(parameters);
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = Some(max_retries);
        self
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SagaStep {
    pub step_id: Uuid,
    pub name: String,
    pub operation: String,
    pub parameters: Value,
    pub compensation_operation: Option<String>,
    pub compensation_parameters: Value,
    pub max_retries: u32,
    pub retry_count: u32,
    pub status: SagaStepStatus,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub result: Option<Value>,
    pub error: Option<String>,
}

impl SagaStep {
    /// Materializa un spec de la frontera en el registro persistible.
    pub fn from_spec(spec: SagaStepSpec, default_max_retries: u32) -> Self {
        SagaStep { step_id: Uuid::new_v4(),
                   name: spec.name,
                   operation: spec.operation,
                   parameters: spec.parameters,
                   compensation_operation: spec.compensation_operation,
                   compensation_parameters: spec.compensation_parameters.unwrap_or(Value::Null),
                   max_retries: spec.max_retries.unwrap_or(default_max_retries),
                   retry_count: 0,
                   status: SagaStepStatus::Pending,
                   started_at: None,
                   completed_at: None,
                   result: None,
                   error: None }
    }

    /// Un paso sólo es compensable si completó y declaró cómo deshacerse.
    pub fn is_compensable(&self) -> bool {
        self.status == SagaStepStatus::Completed && self.compensation_operation.is_some()
    }
}
