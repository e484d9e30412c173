//! Fachada de operaciones en segundo plano.
//!
//! Compone el gestor de idempotencia, el motor de sagas y el registro de
//! operaciones sobre un mismo `StoragePort`, y es dueña de la tarea
//! periódica de limpieza:
//! - `start` lanza el bucle de limpieza en una tarea tokio.
//! - `stop` señala el apagado y espera a que la tarea termine antes de
//!   retornar, así ninguna pasada de limpieza toca storage después de
//!   iniciado el shutdown.
use std::sync::Arc;

use log::{debug, warn};
use serde_json::Value;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use uuid::Uuid;

use ops_domain::{BackgroundOperation, BackgroundOperationStatus, IdempotencyKey, IdempotencyStatus,
                 SagaHistoryEntry, SagaStepSpec, SagaWorkflow};

use crate::config::ManagerConfig;
use crate::errors::CoreError;
use crate::idempotency::{CheckOutcome, IdempotencyManager};
use crate::registry::OperationRegistry;
use crate::saga::SagaEngine;
use crate::storage::{InMemoryStorage, StoragePort};

/// Estado agregado reportado por `health_check`.
#[derive(Debug, Clone)]
pub struct HealthStatus {
    pub storage_healthy: bool,
    pub operations_registered: usize,
    pub compensations_registered: usize,
    pub cleanup_running: bool,
}

struct CleanupTask {
    shutdown: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

pub struct OperationsManager<S>
    where S: StoragePort
{
    storage: Arc<S>,
    registry: Arc<OperationRegistry>,
    idempotency: IdempotencyManager<S>,
    saga: SagaEngine<S>,
    config: ManagerConfig,
    cleanup: Mutex<Option<CleanupTask>>,
}

impl OperationsManager<InMemoryStorage> {
    /// Gestor con el backend de referencia en memoria.
    pub fn in_memory(registry: OperationRegistry, config: ManagerConfig) -> Self {
        Self::new(Arc::new(InMemoryStorage::new()), registry, config)
    }
}

impl<S> OperationsManager<S> where S: StoragePort
{
    /// El registro llega ya construido y pasa a ser inmutable: toda la
    /// composición comparte el mismo `Arc`.
    pub fn new(storage: Arc<S>, registry: OperationRegistry, config: ManagerConfig) -> Self {
        let registry = Arc::new(registry);
        let idempotency = IdempotencyManager::with_default_ttl(Arc::clone(&storage), config.idempotency_ttl_seconds);
        let saga = SagaEngine::new(Arc::clone(&storage), Arc::clone(&registry))
            .with_defaults(config.max_retries, config.saga_timeout_seconds);
        OperationsManager { storage,
                            registry,
                            idempotency,
                            saga,
                            config,
                            cleanup: Mutex::new(None) }
    }

    /// Reemplaza la unidad de backoff del motor (los tests la reducen a
    /// milisegundos para no dormir segundos reales).
    pub fn with_backoff_unit(mut self, unit: std::time::Duration) -> Self {
        self.saga = SagaEngine::new(Arc::clone(&self.storage), Arc::clone(&self.registry))
            .with_defaults(self.config.max_retries, self.config.saga_timeout_seconds)
            .with_backoff_unit(unit);
        self
    }

    pub fn saga_engine(&self) -> &SagaEngine<S> {
        &self.saga
    }

    pub fn idempotency_manager(&self) -> &IdempotencyManager<S> {
        &self.idempotency
    }

    // --- idempotencia -----------------------------------------------------

    pub async fn create_idempotency_key(&self,
                                        tenant_id: &str,
                                        user_id: Option<String>,
                                        operation_type: &str,
                                        key: Option<String>,
                                        ttl_seconds: Option<u64>,
                                        parameters: Option<&Value>)
                                        -> Result<IdempotencyKey, CoreError> {
        self.idempotency.create(tenant_id, user_id, operation_type, key, ttl_seconds, parameters).await
    }

    pub async fn check_idempotency(&self, key: &str) -> Result<CheckOutcome, CoreError> {
        self.idempotency.check_outcome(key).await
    }

    pub async fn mark_idempotency_in_progress(&self, key: &str) -> Result<bool, CoreError> {
        self.idempotency.mark_in_progress(key).await
    }

    pub async fn complete_idempotent_operation(&self,
                                               key: &str,
                                               result: Option<Value>,
                                               error: Option<String>)
                                               -> Result<bool, CoreError> {
        self.idempotency.complete(key, result, error).await
    }

    // --- sagas ------------------------------------------------------------

    pub async fn create_saga_workflow(&self,
                                      tenant_id: &str,
                                      workflow_type: &str,
                                      steps: Vec<SagaStepSpec>,
                                      timeout_seconds: Option<u64>,
                                      idempotency_key: Option<String>)
                                      -> Result<SagaWorkflow, CoreError> {
        self.saga.create_workflow(tenant_id, workflow_type, steps, timeout_seconds, idempotency_key).await
    }

    pub async fn execute_saga_workflow(&self, saga_id: Uuid) -> Result<SagaWorkflow, CoreError> {
        self.saga.execute(saga_id).await
    }

    pub async fn get_saga_workflow(&self, saga_id: Uuid) -> Result<Option<SagaWorkflow>, CoreError> {
        self.storage.get_saga(saga_id).await
    }

    pub async fn get_saga_history(&self, saga_id: Uuid) -> Result<Vec<SagaHistoryEntry>, CoreError> {
        self.storage.list_saga_history(saga_id).await
    }

    // --- seguimiento de operaciones ---------------------------------------

    /// Crea el registro de correlación de una operación entrante.
    pub async fn create_operation(&self,
                                  operation_type: &str,
                                  tenant_id: &str,
                                  saga_id: Option<Uuid>,
                                  idempotency_key: Option<String>)
                                  -> Result<BackgroundOperation, CoreError> {
        let record = BackgroundOperation::new(operation_type, tenant_id, saga_id, idempotency_key);
        self.storage.set_operation(&record, self.config.idempotency_ttl_seconds).await?;
        Ok(record)
    }

    /// Devuelve el registro con su estado refrescado desde el trabajo
    /// subyacente (saga o clave de idempotencia).
    pub async fn get_operation_status(&self, operation_id: Uuid) -> Result<Option<BackgroundOperation>, CoreError> {
        let Some(mut record) = self.storage.get_operation(operation_id).await? else {
            return Ok(None);
        };

        let refreshed = if let Some(saga_id) = record.saga_id {
            self.storage.get_saga(saga_id).await?.map(|wf| BackgroundOperationStatus::from(wf.status))
        } else if let Some(key) = record.idempotency_key.as_deref() {
            self.idempotency.check(key).await?.map(|k| match k.status {
                IdempotencyStatus::Pending => BackgroundOperationStatus::Pending,
                IdempotencyStatus::InProgress => BackgroundOperationStatus::Running,
                IdempotencyStatus::Completed => BackgroundOperationStatus::Completed,
                IdempotencyStatus::Failed => BackgroundOperationStatus::Failed,
            })
        } else {
            None
        };

        if let Some(status) = refreshed {
            if status != record.status {
                record.refresh(status);
                let ttl = self.config.idempotency_ttl_seconds;
                self.storage.set_operation(&record, ttl).await?;
            }
        }
        Ok(Some(record))
    }

    // --- ciclo de vida ----------------------------------------------------

    /// Lanza el bucle de limpieza. Idempotente: si ya corre, no hace nada.
    pub async fn start(&self) {
        let mut guard = self.cleanup.lock().await;
        if guard.is_some() {
            return;
        }
        let (shutdown, mut rx) = watch::channel(false);
        let storage = Arc::clone(&self.storage);
        let interval = std::time::Duration::from_secs(self.config.cleanup_interval_seconds.max(1));
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        match storage.cleanup_expired().await {
                            Ok(0) => {}
                            Ok(n) => debug!("cleanup pass removed {n} expired entries"),
                            Err(e) => warn!("cleanup pass failed: {e}"),
                        }
                    }
                    _ = rx.changed() => break,
                }
            }
        });
        *guard = Some(CleanupTask { shutdown, handle });
        debug!("cleanup loop started (interval {}s)", self.config.cleanup_interval_seconds);
    }

    /// Apaga el bucle de limpieza y espera su fin antes de retornar.
    pub async fn stop(&self) {
        let task = self.cleanup.lock().await.take();
        if let Some(CleanupTask { shutdown, handle }) = task {
            let _ = shutdown.send(true);
            if let Err(e) = handle.await {
                warn!("cleanup task ended abnormally: {e}");
            }
            debug!("cleanup loop stopped");
        }
    }

    pub async fn health_check(&self) -> HealthStatus {
        let storage_healthy = self.storage.health_check().await.unwrap_or(false);
        HealthStatus { storage_healthy,
                       operations_registered: self.registry.operation_count(),
                       compensations_registered: self.registry.compensation_count(),
                       cleanup_running: self.cleanup.lock().await.is_some() }
    }
}
