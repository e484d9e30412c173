//! Backend de referencia en memoria del `StoragePort`.
//!
//! Implementación sobre `DashMap`: la exclusión del lock y la escritura
//! condicional son atómicas vía la entry API del mapa, pero sólo dentro de
//! este proceso. Es una restricción de despliegue explícita: coordinar
//! múltiples nodos requiere un backend cuyo `acquire_lock` sea genuinamente
//! distribuido.
use chrono::{DateTime, Duration, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use log::debug;
use uuid::Uuid;

use async_trait::async_trait;

use ops_domain::{BackgroundOperation, IdempotencyKey, SagaHistoryEntry, SagaWorkflow};

use crate::errors::CoreError;
use crate::storage::StoragePort;

/// Valor almacenado con su fecha de expiración absoluta.
#[derive(Debug, Clone)]
struct Expiring<T> {
    value: T,
    expires_at: DateTime<Utc>,
}

impl<T> Expiring<T> {
    fn new(value: T, ttl_seconds: u64) -> Self {
        Expiring { value,
                   expires_at: Utc::now() + Duration::seconds(ttl_seconds as i64) }
    }

    fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}

#[derive(Debug, Default)]
pub struct InMemoryStorage {
    idempotency: DashMap<String, Expiring<IdempotencyKey>>,
    /// Índice clave -> expiración para los barridos de limpieza.
    idempotency_index: DashMap<String, DateTime<Utc>>,
    operations: DashMap<Uuid, Expiring<BackgroundOperation>>,
    sagas: DashMap<Uuid, SagaWorkflow>,
    history: DashMap<Uuid, Vec<SagaHistoryEntry>>,
    /// Lock -> expiración absoluta del poseedor actual.
    locks: DashMap<String, DateTime<Utc>>,
}

impl InMemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl StoragePort for InMemoryStorage {
    async fn get_idempotency(&self, key: &str) -> Result<Option<IdempotencyKey>, CoreError> {
        let now = Utc::now();
        Ok(self.idempotency
               .get(key)
               .filter(|stored| !stored.is_expired(now))
               .map(|stored| stored.value.clone()))
    }

    async fn set_idempotency(&self, key: &str, record: &IdempotencyKey, ttl_seconds: u64) -> Result<(), CoreError> {
        self.idempotency.insert(key.to_string(), Expiring::new(record.clone(), ttl_seconds));
        Ok(())
    }

    async fn put_idempotency_if_absent(&self, key: &str, record: &IdempotencyKey, ttl_seconds: u64) -> Result<bool, CoreError> {
        let now = Utc::now();
        match self.idempotency.entry(key.to_string()) {
            Entry::Occupied(mut occupied) => {
                if occupied.get().is_expired(now) {
                    // un ocupante expirado cuenta como ausente
                    occupied.insert(Expiring::new(record.clone(), ttl_seconds));
                    Ok(true)
                } else {
                    Ok(false)
                }
            }
            Entry::Vacant(vacant) => {
                vacant.insert(Expiring::new(record.clone(), ttl_seconds));
                Ok(true)
            }
        }
    }

    async fn index_idempotency(&self, key: &str, expires_at: DateTime<Utc>) -> Result<(), CoreError> {
        self.idempotency_index.insert(key.to_string(), expires_at);
        Ok(())
    }

    async fn get_operation(&self, id: Uuid) -> Result<Option<BackgroundOperation>, CoreError> {
        let now = Utc::now();
        Ok(self.operations
               .get(&id)
               .filter(|stored| !stored.is_expired(now))
               .map(|stored| stored.value.clone()))
    }

    async fn set_operation(&self, record: &BackgroundOperation, ttl_seconds: u64) -> Result<(), CoreError> {
        self.operations.insert(record.operation_id, Expiring::new(record.clone(), ttl_seconds));
        Ok(())
    }

    async fn get_saga(&self, id: Uuid) -> Result<Option<SagaWorkflow>, CoreError> {
        Ok(self.sagas.get(&id).map(|wf| wf.clone()))
    }

    async fn set_saga(&self, workflow: &SagaWorkflow) -> Result<(), CoreError> {
        self.sagas.insert(workflow.saga_id, workflow.clone());
        Ok(())
    }

    async fn append_saga_history(&self, id: Uuid, entry: SagaHistoryEntry) -> Result<(), CoreError> {
        self.history.entry(id).or_default().push(entry);
        Ok(())
    }

    async fn list_saga_history(&self, id: Uuid) -> Result<Vec<SagaHistoryEntry>, CoreError> {
        Ok(self.history.get(&id).map(|entries| entries.clone()).unwrap_or_default())
    }

    async fn acquire_lock(&self, key: &str, ttl_seconds: u64) -> Result<bool, CoreError> {
        let now = Utc::now();
        let expiry = now + Duration::seconds(ttl_seconds as i64);
        match self.locks.entry(key.to_string()) {
            Entry::Occupied(mut occupied) => {
                if *occupied.get() <= now {
                    // el poseedor anterior murió: el TTL recupera el lock
                    occupied.insert(expiry);
                    Ok(true)
                } else {
                    Ok(false)
                }
            }
            Entry::Vacant(vacant) => {
                vacant.insert(expiry);
                Ok(true)
            }
        }
    }

    async fn release_lock(&self, key: &str) -> Result<(), CoreError> {
        self.locks.remove(key);
        Ok(())
    }

    async fn cleanup_expired(&self) -> Result<u64, CoreError> {
        let now = Utc::now();
        let mut removed: u64 = 0;

        // El índice dirige el barrido de claves de idempotencia.
        let expired_keys: Vec<String> = self.idempotency_index
                                            .iter()
                                            .filter(|entry| *entry.value() <= now)
                                            .map(|entry| entry.key().clone())
                                            .collect();
        for key in expired_keys {
            self.idempotency_index.remove(&key);
            if self.idempotency.remove(&key).is_some() {
                removed += 1;
            }
        }

        let ops_before = self.operations.len();
        self.operations.retain(|_, stored| !stored.is_expired(now));
        removed += ops_before.saturating_sub(self.operations.len()) as u64;

        let locks_before = self.locks.len();
        self.locks.retain(|_, expiry| *expiry > now);
        removed += locks_before.saturating_sub(self.locks.len()) as u64;

        if removed > 0 {
            debug!("in-memory cleanup removed {removed} expired entries");
        }
        Ok(removed)
    }

    async fn health_check(&self) -> Result<bool, CoreError> {
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ops_domain::IdempotencyStatus;

    fn key(name: &str, ttl: u64) -> IdempotencyKey {
        IdempotencyKey::new(name, "t1", None, "charge", ttl).expect("valid key")
    }

    #[tokio::test]
    async fn put_if_absent_is_first_writer_wins() {
        let storage = InMemoryStorage::new();
        let first = key("k1", 60);
        let mut second = key("k1", 60);
        second.status = IdempotencyStatus::Completed;

        assert!(storage.put_idempotency_if_absent("k1", &first, 60).await.unwrap());
        assert!(!storage.put_idempotency_if_absent("k1", &second, 60).await.unwrap());

        let stored = storage.get_idempotency("k1").await.unwrap().expect("stored");
        assert_eq!(stored.status, IdempotencyStatus::Pending);
    }

    #[tokio::test]
    async fn expired_record_reads_as_absent_and_is_replaceable() {
        let storage = InMemoryStorage::new();
        let dead = key("k1", 0);
        storage.set_idempotency("k1", &dead, 0).await.unwrap();

        assert!(storage.get_idempotency("k1").await.unwrap().is_none());
        // un ocupante expirado no bloquea la escritura condicional
        assert!(storage.put_idempotency_if_absent("k1", &key("k1", 60), 60).await.unwrap());
        assert!(storage.get_idempotency("k1").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn lock_is_exclusive_until_released() {
        let storage = InMemoryStorage::new();
        assert!(storage.acquire_lock("saga:1", 60).await.unwrap());
        assert!(!storage.acquire_lock("saga:1", 60).await.unwrap());
        storage.release_lock("saga:1").await.unwrap();
        assert!(storage.acquire_lock("saga:1", 60).await.unwrap());
    }

    #[tokio::test]
    async fn expired_lock_is_reclaimed_by_ttl() {
        let storage = InMemoryStorage::new();
        assert!(storage.acquire_lock("saga:1", 0).await.unwrap());
        // el poseedor nunca liberó, pero su TTL ya venció
        assert!(storage.acquire_lock("saga:1", 60).await.unwrap());
    }

    #[tokio::test]
    async fn cleanup_sweeps_expired_entries_and_counts_them() {
        let storage = InMemoryStorage::new();
        let dead = key("dead", 0);
        storage.set_idempotency("dead", &dead, 0).await.unwrap();
        storage.index_idempotency("dead", dead.expires_at).await.unwrap();
        let live = key("live", 300);
        storage.set_idempotency("live", &live, 300).await.unwrap();
        storage.index_idempotency("live", live.expires_at).await.unwrap();
        storage.acquire_lock("stale", 0).await.unwrap();

        let removed = storage.cleanup_expired().await.unwrap();
        assert_eq!(removed, 2); // clave muerta + lock vencido
        assert!(storage.get_idempotency("live").await.unwrap().is_some());
        assert!(storage.get_idempotency("dead").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn history_preserves_append_order() {
        use ops_domain::{SagaStep, SagaStepSpec};
        let storage = InMemoryStorage::new();
        let saga_id = Uuid::new_v4();
        for name in ["a", "b", "c"] {
            let step = SagaStep::from_spec(SagaStepSpec::new(name, "op", serde_json::Value::Null), 3);
            storage.append_saga_history(saga_id, SagaHistoryEntry::from_step(&step)).await.unwrap();
        }
        let entries = storage.list_saga_history(saga_id).await.unwrap();
        let names: Vec<&str> = entries.iter().map(|e| e.step_name.as_str()).collect();
        assert_eq!(names, vec!["a", "b", "c"]);
    }
}
