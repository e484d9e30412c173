//! Contrato de persistencia y locking del núcleo (`StoragePort`).
//!
//! Rol en el sistema:
//! - Única fuente de durabilidad: claves de idempotencia (kv con TTL),
//!   estado de sagas, historial append-only por saga, registros de
//!   seguimiento y lock de exclusión mutua.
//! - Cualquier backend que cumpla el contrato es sustituible sin tocar el
//!   núcleo (mapa en proceso, cache/almacén en red).
//!
//! Atomicidad requerida: `put_idempotency_if_absent` y `acquire_lock` deben
//! ser atómicos en el backend. Un backend de lectura-luego-escritura puede
//! producir carreras de primera escritura bajo llamadas concurrentes; en
//! despliegues multi-nodo se necesita un backend con escritura condicional
//! genuinamente distribuida.
pub mod memory;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use ops_domain::{BackgroundOperation, IdempotencyKey, SagaHistoryEntry, SagaWorkflow};

use crate::errors::CoreError;

pub use memory::InMemoryStorage;

/// Contrato abstracto de almacenamiento del núcleo.
///
/// Toda operación puede fallar con `CoreError::StorageUnavailable` si el
/// backend no es alcanzable; el núcleo propaga ese error, nunca lo absorbe.
#[async_trait]
pub trait StoragePort: Send + Sync + 'static {
    /// Lee una clave de idempotencia. Una clave expirada se lee como ausente
    /// (la expiración se evalúa perezosamente en la consulta).
    async fn get_idempotency(&self, key: &str) -> Result<Option<IdempotencyKey>, CoreError>;

    /// Escribe una clave de idempotencia con el TTL restante indicado.
    async fn set_idempotency(&self, key: &str, record: &IdempotencyKey, ttl_seconds: u64) -> Result<(), CoreError>;

    /// Escritura condicional: inserta sólo si la clave está ausente (o
    /// expirada). Devuelve `true` si insertó. DEBE ser atómica en el backend;
    /// es lo que hace que la creación de claves sea first-writer-wins.
    async fn put_idempotency_if_absent(&self, key: &str, record: &IdempotencyKey, ttl_seconds: u64) -> Result<bool, CoreError>;

    /// Registra la clave en el índice de expiración usado por los barridos
    /// de limpieza.
    async fn index_idempotency(&self, key: &str, expires_at: DateTime<Utc>) -> Result<(), CoreError>;

    /// Lee un registro de seguimiento de operación.
    async fn get_operation(&self, id: Uuid) -> Result<Option<BackgroundOperation>, CoreError>;

    /// Escribe un registro de seguimiento (misma política de TTL que las
    /// claves de idempotencia).
    async fn set_operation(&self, record: &BackgroundOperation, ttl_seconds: u64) -> Result<(), CoreError>;

    /// Lee el estado persistido de una saga.
    async fn get_saga(&self, id: Uuid) -> Result<Option<SagaWorkflow>, CoreError>;

    /// Persiste el estado completo de una saga (las sagas no expiran).
    async fn set_saga(&self, workflow: &SagaWorkflow) -> Result<(), CoreError>;

    /// Agrega una entrada al historial append-only de la saga.
    async fn append_saga_history(&self, id: Uuid, entry: SagaHistoryEntry) -> Result<(), CoreError>;

    /// Lista el historial de una saga en orden de inserción.
    async fn list_saga_history(&self, id: Uuid) -> Result<Vec<SagaHistoryEntry>, CoreError>;

    /// Intenta adquirir el lock de exclusión mutua `key` con el TTL dado.
    /// Devuelve `false` si otro poseedor lo retiene y no expiró. Un lock de
    /// un proceso caído se recupera por su propio TTL, no por mensajes.
    async fn acquire_lock(&self, key: &str, ttl_seconds: u64) -> Result<bool, CoreError>;

    /// Libera el lock `key` (no-op si no está retenido).
    async fn release_lock(&self, key: &str) -> Result<(), CoreError>;

    /// Elimina datos expirados (claves, registros de seguimiento, locks) y
    /// devuelve cuántas entradas se retiraron.
    async fn cleanup_expired(&self) -> Result<u64, CoreError>;

    /// `true` si el backend está operativo.
    async fn health_check(&self) -> Result<bool, CoreError>;
}
