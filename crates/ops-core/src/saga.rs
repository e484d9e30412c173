//! Motor de sagas: ejecución hacia adelante con reintentos y compensación
//! en orden inverso.
//!
//! Rol en el flujo:
//! - `create_workflow` persiste la saga con sus pasos en orden fijo.
//! - `execute` toma el lock por saga del `StoragePort`, recarga el estado
//!   persistido y avanza la máquina de estados; el lock se libera en todos
//!   los caminos de salida.
//! - Cada transición de paso emite una entrada al historial append-only y
//!   persiste la saga completa, así cualquier proceso puede retomar una
//!   ejecución interrumpida desde `current_step`.
//!
//! Invariantes del motor:
//! - Una saga terminal devuelve su desenlace cacheado sin re-ejecutar nada.
//! - `current_step` nunca retrocede; un paso no regresa desde Completed.
//! - Una saga vencida pasa directo a Failed sin compensación (sus efectos
//!   laterales quedan para conciliación fuera de banda).
//! - La compensación es best-effort y exhaustiva: un fallo de compensación
//!   se registra pero no corta el barrido de pasos anteriores.
use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::Utc;
use log::{debug, error, warn};
use uuid::Uuid;

use ops_domain::{SagaHistoryEntry, SagaStatus, SagaStepSpec, SagaStepStatus, SagaWorkflow};

use crate::constants::{DEFAULT_MAX_RETRIES, DEFAULT_SAGA_TIMEOUT_SECS, LOCK_TTL_MARGIN_SECS, MAX_BACKOFF_UNITS};
use crate::errors::CoreError;
use crate::registry::OperationRegistry;
use crate::storage::StoragePort;

/// Índice del paso que falló de forma permanente durante la fase forward.
type ForwardOutcome = Option<usize>;

pub struct SagaEngine<S>
    where S: StoragePort
{
    storage: Arc<S>,
    registry: Arc<OperationRegistry>,
    default_max_retries: u32,
    default_timeout_seconds: u64,
    /// Unidad del backoff exponencial (`min(2^intento, 60)` unidades). Por
    /// defecto un segundo; los tests la reducen a milisegundos.
    backoff_unit: StdDuration,
}

impl<S> SagaEngine<S> where S: StoragePort
{
    pub fn new(storage: Arc<S>, registry: Arc<OperationRegistry>) -> Self {
        SagaEngine { storage,
                     registry,
                     default_max_retries: DEFAULT_MAX_RETRIES,
                     default_timeout_seconds: DEFAULT_SAGA_TIMEOUT_SECS,
                     backoff_unit: StdDuration::from_secs(1) }
    }

    pub fn with_defaults(mut self, max_retries: u32, timeout_seconds: u64) -> Self {
        self.default_max_retries = max_retries;
        self.default_timeout_seconds = timeout_seconds;
        self
    }

    pub fn with_backoff_unit(mut self, unit: StdDuration) -> Self {
        self.backoff_unit = unit;
        self
    }

    /// Crea y persiste una saga Pending. El orden de `specs` fija el orden
    /// de ejecución para siempre.
    pub async fn create_workflow(&self,
                                 tenant_id: &str,
                                 workflow_type: &str,
                                 specs: Vec<SagaStepSpec>,
                                 timeout_seconds: Option<u64>,
                                 idempotency_key: Option<String>)
                                 -> Result<SagaWorkflow, CoreError> {
        let workflow = SagaWorkflow::new(tenant_id,
                                         workflow_type,
                                         specs,
                                         timeout_seconds.unwrap_or(self.default_timeout_seconds),
                                         self.default_max_retries,
                                         idempotency_key)?;
        self.storage.set_saga(&workflow).await?;
        debug!("saga {} ({}) created with {} steps", workflow.saga_id, workflow.workflow_type, workflow.steps.len());
        Ok(workflow)
    }

    /// Ejecuta la saga hasta un estado terminal y lo devuelve.
    ///
    /// Falla con `LockAcquisition` si otra ejecución está en vuelo. El lock
    /// se libera en éxito, fallo y fallo inesperado por igual: una saga
    /// nunca queda `Running` después de que `execute` retorne.
    pub async fn execute(&self, saga_id: Uuid) -> Result<SagaWorkflow, CoreError> {
        // Lectura previa para conocer el timeout (acota el TTL del lock) y
        // devolver desenlaces terminales sin tomar el lock.
        let peek = self.storage
                       .get_saga(saga_id)
                       .await?
                       .ok_or_else(|| CoreError::SagaNotFound(saga_id.to_string()))?;
        if peek.is_terminal() {
            return Ok(peek);
        }

        let lock_key = saga_lock_key(saga_id);
        let lock_ttl = peek.timeout_seconds + LOCK_TTL_MARGIN_SECS;
        if !self.storage.acquire_lock(&lock_key, lock_ttl).await? {
            return Err(CoreError::LockAcquisition(format!("saga {saga_id} is already executing")));
        }

        let result = self.execute_locked(saga_id).await;

        if let Err(e) = self.storage.release_lock(&lock_key).await {
            warn!("failed to release lock {lock_key}: {e}");
        }
        result
    }

    async fn execute_locked(&self, saga_id: Uuid) -> Result<SagaWorkflow, CoreError> {
        // Relectura autoritativa bajo el lock.
        let mut workflow = self.storage
                               .get_saga(saga_id)
                               .await?
                               .ok_or_else(|| CoreError::SagaNotFound(saga_id.to_string()))?;
        if workflow.is_terminal() {
            return Ok(workflow);
        }

        if workflow.is_expired(Utc::now()) {
            return self.fail_expired(workflow).await;
        }

        workflow.status = SagaStatus::Running;
        self.storage.set_saga(&workflow).await?;

        match self.run_forward(&mut workflow).await {
            Ok(None) => {
                workflow.status = SagaStatus::Completed;
                self.storage.set_saga(&workflow).await?;
                debug!("saga {} completed", workflow.saga_id);
                Ok(workflow)
            }
            Ok(Some(failed_idx)) => {
                warn!("saga {} step {} failed permanently, compensating", workflow.saga_id, failed_idx);
                workflow.status = SagaStatus::Compensating;
                self.storage.set_saga(&workflow).await?;
                self.run_compensation(&mut workflow).await;
                workflow.status = SagaStatus::Compensated;
                self.storage.set_saga(&workflow).await?;
                Ok(workflow)
            }
            Err(fault) => {
                // Fallo inesperado (p. ej. storage caído a mitad de camino):
                // intento best-effort de compensar y re-lanzar. La saga no
                // puede quedar Running.
                error!("saga {} aborted by unexpected fault: {fault}", workflow.saga_id);
                workflow.status = SagaStatus::Compensating;
                let _ = self.storage.set_saga(&workflow).await;
                self.run_compensation(&mut workflow).await;
                workflow.status = SagaStatus::Compensated;
                let _ = self.storage.set_saga(&workflow).await;
                Err(fault)
            }
        }
    }

    /// Timeout vencido: Failed directo, sin ejecutar pasos ni compensar.
    async fn fail_expired(&self, mut workflow: SagaWorkflow) -> Result<SagaWorkflow, CoreError> {
        warn!("saga {} exceeded its {}s deadline", workflow.saga_id, workflow.timeout_seconds);
        workflow.status = SagaStatus::Failed;
        let idx = workflow.current_step.min(workflow.steps.len() - 1);
        let mut entry = SagaHistoryEntry::from_step(&workflow.steps[idx]);
        entry.error = Some(format!("saga deadline exceeded after {}s", workflow.timeout_seconds));
        self.storage.append_saga_history(workflow.saga_id, entry).await?;
        self.storage.set_saga(&workflow).await?;
        Ok(workflow)
    }

    /// Fase forward: pasos en orden fijo desde `current_step`. Devuelve el
    /// índice del paso que falló de forma permanente, o `None` si todos
    /// completaron.
    async fn run_forward(&self, workflow: &mut SagaWorkflow) -> Result<ForwardOutcome, CoreError> {
        while workflow.current_step < workflow.steps.len() {
            let idx = workflow.current_step;

            // En reanudación los pasos ya completados se saltan.
            if workflow.steps[idx].status == SagaStepStatus::Completed {
                workflow.current_step = idx + 1;
                continue;
            }

            let operation = workflow.steps[idx].operation.clone();
            let Some(handler) = self.registry.operation(&operation) else {
                // Sin handler no hay nada que reintentar: fallo permanente.
                let message = CoreError::HandlerNotFound(operation).to_string();
                self.mark_step_failed(workflow, idx, message).await?;
                return Ok(Some(idx));
            };

            {
                let step = &mut workflow.steps[idx];
                step.status = SagaStepStatus::Executing;
                step.started_at = Some(Utc::now());
            }
            self.record_transition(workflow, idx).await?;
            self.storage.set_saga(workflow).await?;

            let parameters = workflow.steps[idx].parameters.clone();
            loop {
                match handler.execute(&parameters).await {
                    Ok(result) => {
                        {
                            let step = &mut workflow.steps[idx];
                            step.status = SagaStepStatus::Completed;
                            step.result = Some(result);
                            step.error = None;
                            step.completed_at = Some(Utc::now());
                        }
                        self.record_transition(workflow, idx).await?;
                        workflow.current_step = idx + 1;
                        self.storage.set_saga(workflow).await?;
                        break;
                    }
                    Err(failure) => {
                        if workflow.steps[idx].retry_count >= workflow.steps[idx].max_retries {
                            self.mark_step_failed(workflow, idx, failure.message).await?;
                            return Ok(Some(idx));
                        }
                        {
                            let step = &mut workflow.steps[idx];
                            step.retry_count += 1;
                            step.error = Some(failure.message);
                        }
                        self.record_transition(workflow, idx).await?;
                        self.storage.set_saga(workflow).await?;
                        let units = 2u64.pow(workflow.steps[idx].retry_count).min(MAX_BACKOFF_UNITS);
                        tokio::time::sleep(self.backoff_unit * units as u32).await;
                    }
                }
            }
        }
        Ok(None)
    }

    /// Compensación: pasos Completed en orden inverso de ejecución. Nunca
    /// corta por un fallo individual; cada desenlace queda en el historial.
    async fn run_compensation(&self, workflow: &mut SagaWorkflow) {
        for idx in (0..workflow.steps.len()).rev() {
            if !workflow.steps[idx].is_compensable() {
                continue;
            }
            // is_compensable garantiza que la operación está declarada
            let operation = workflow.steps[idx].compensation_operation.clone().unwrap_or_default();
            let parameters = workflow.steps[idx].compensation_parameters.clone();

            {
                let step = &mut workflow.steps[idx];
                step.status = SagaStepStatus::Compensating;
            }
            self.record_transition_best_effort(workflow, idx).await;

            let outcome = match self.registry.compensation(&operation) {
                None => Err(CoreError::HandlerNotFound(operation.clone()).to_string()),
                Some(handler) => handler.compensate(&parameters).await.map_err(|e| e.message),
            };

            {
                let step = &mut workflow.steps[idx];
                match outcome {
                    Ok(()) => {
                        step.status = SagaStepStatus::Compensated;
                    }
                    Err(message) => {
                        warn!("compensation '{}' for step {} failed: {message}", operation, step.name);
                        step.status = SagaStepStatus::Failed;
                        step.error = Some(message);
                    }
                }
            }
            self.record_transition_best_effort(workflow, idx).await;
            if let Err(e) = self.storage.set_saga(workflow).await {
                warn!("failed to persist saga {} during compensation: {e}", workflow.saga_id);
            }
        }
    }

    async fn mark_step_failed(&self, workflow: &mut SagaWorkflow, idx: usize, message: String) -> Result<(), CoreError> {
        {
            let step = &mut workflow.steps[idx];
            step.status = SagaStepStatus::Failed;
            step.error = Some(message);
            step.completed_at = Some(Utc::now());
        }
        self.record_transition(workflow, idx).await?;
        self.storage.set_saga(workflow).await
    }

    async fn record_transition(&self, workflow: &SagaWorkflow, idx: usize) -> Result<(), CoreError> {
        let entry = SagaHistoryEntry::from_step(&workflow.steps[idx]);
        self.storage.append_saga_history(workflow.saga_id, entry).await
    }

    /// Variante para la fase de compensación: un historial inalcanzable no
    /// debe impedir que el barrido continúe.
    async fn record_transition_best_effort(&self, workflow: &SagaWorkflow, idx: usize) {
        if let Err(e) = self.record_transition(workflow, idx).await {
            warn!("failed to append history for saga {}: {e}", workflow.saga_id);
        }
    }
}

fn saga_lock_key(saga_id: Uuid) -> String {
    format!("saga:{saga_id}")
}
