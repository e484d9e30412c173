//! Gestión del ciclo de vida de claves de idempotencia.
//!
//! Garantiza ejecución única por clave bajo entrega at-least-once:
//! - La creación es first-writer-wins sobre la escritura condicional del
//!   `StoragePort`.
//! - La expiración se evalúa perezosamente en cada consulta; completar una
//!   clave ya expirada es un no-op silencioso (la ventana del llamador para
//!   reclamar el resultado pasó).
//! - Toda reescritura usa el TTL restante calculado desde `expires_at`:
//!   nunca se alarga la vida original de la clave.
use std::sync::Arc;

use chrono::Utc;
use log::debug;
use serde_json::{json, Value};

use ops_domain::{IdempotencyKey, IdempotencyStatus};

use crate::constants::{CORE_VERSION, DEFAULT_IDEMPOTENCY_TTL_SECS};
use crate::errors::CoreError;
use crate::hashing::hash_value;
use crate::storage::StoragePort;

/// Estados visibles para el llamador al consultar una clave.
///
/// `InFlight` cubre Pending e InProgress: el duplicado recibe un acuse de
/// "ya hay trabajo en curso", nunca una segunda ejecución.
#[derive(Debug, Clone)]
pub enum CheckOutcome {
    /// Sin registro (o expirado): la petición se trata como nueva.
    Miss,
    /// La ejecución original sigue en vuelo.
    InFlight(IdempotencyKey),
    /// Resultado cacheado listo para reproducir tal cual.
    Completed(IdempotencyKey),
    /// Error cacheado listo para reproducir tal cual.
    Failed(IdempotencyKey),
}

pub struct IdempotencyManager<S>
    where S: StoragePort
{
    storage: Arc<S>,
    default_ttl_seconds: u64,
}

impl<S> IdempotencyManager<S> where S: StoragePort
{
    pub fn new(storage: Arc<S>) -> Self {
        Self::with_default_ttl(storage, DEFAULT_IDEMPOTENCY_TTL_SECS)
    }

    pub fn with_default_ttl(storage: Arc<S>, default_ttl_seconds: u64) -> Self {
        IdempotencyManager { storage, default_ttl_seconds }
    }

    /// Deriva una clave estable a partir del tuple (tenant, usuario, tipo de
    /// operación, parámetros). Función pura: mismas entradas producen siempre
    /// la misma clave, independiente del orden de campos en `parameters`.
    pub fn derive_key(tenant_id: &str, user_id: Option<&str>, operation_type: &str, parameters: &Value) -> String {
        let input = json!({
            "core_version": CORE_VERSION,
            "tenant": tenant_id,
            "user": user_id,
            "operation": operation_type,
            "parameters": parameters,
        });
        hash_value(&input)
    }

    /// Consulta de sólo lectura. Un fallo de storage se propaga: este núcleo
    /// falla cerrado y deja al llamador decidir si re-ejecuta.
    pub async fn check(&self, key: &str) -> Result<Option<IdempotencyKey>, CoreError> {
        self.storage.get_idempotency(key).await
    }

    /// Consulta mapeada a los tres estados visibles de la frontera.
    pub async fn check_outcome(&self, key: &str) -> Result<CheckOutcome, CoreError> {
        let outcome = match self.check(key).await? {
            None => CheckOutcome::Miss,
            Some(record) => match record.status {
                IdempotencyStatus::Completed => CheckOutcome::Completed(record),
                IdempotencyStatus::Failed => CheckOutcome::Failed(record),
                IdempotencyStatus::Pending | IdempotencyStatus::InProgress => CheckOutcome::InFlight(record),
            },
        };
        Ok(outcome)
    }

    /// Crea un registro Pending si la clave está ausente. Si una clave
    /// explícita ya existe devuelve el registro existente sin sobrescribirlo
    /// (first-writer-wins).
    pub async fn create(&self,
                        tenant_id: &str,
                        user_id: Option<String>,
                        operation_type: &str,
                        key: Option<String>,
                        ttl_seconds: Option<u64>,
                        parameters: Option<&Value>)
                        -> Result<IdempotencyKey, CoreError> {
        let key = key.unwrap_or_else(|| {
                          Self::derive_key(tenant_id,
                                           user_id.as_deref(),
                                           operation_type,
                                           parameters.unwrap_or(&Value::Null))
                      });
        let ttl = ttl_seconds.unwrap_or(self.default_ttl_seconds);

        // Dos intentos: si perdemos la carrera contra un registro que expira
        // entre la escritura condicional y la relectura, reintentamos una vez.
        for _ in 0..2 {
            let record = IdempotencyKey::new(key.clone(), tenant_id, user_id.clone(), operation_type, ttl)?;
            if self.storage.put_idempotency_if_absent(&key, &record, ttl).await? {
                self.storage.index_idempotency(&key, record.expires_at).await?;
                debug!("idempotency key {key} created for tenant {tenant_id}");
                return Ok(record);
            }
            if let Some(existing) = self.storage.get_idempotency(&key).await? {
                return Ok(existing);
            }
        }
        Err(CoreError::Internal(format!("idempotency key {key} raced expiry twice during create")))
    }

    /// Marca Pending -> InProgress mientras la frontera dirige la ejecución.
    /// Devuelve `false` si la clave no existe, expiró o ya es terminal.
    pub async fn mark_in_progress(&self, key: &str) -> Result<bool, CoreError> {
        let Some(mut record) = self.storage.get_idempotency(key).await? else {
            return Ok(false);
        };
        if record.is_terminal() {
            return Ok(false);
        }
        record.status = IdempotencyStatus::InProgress;
        let ttl = record.remaining_ttl(Utc::now());
        if ttl == 0 {
            return Ok(false);
        }
        self.storage.set_idempotency(key, &record, ttl).await?;
        Ok(true)
    }

    /// Transición terminal exactamente-una-vez. Con `error` presente el
    /// registro queda Failed; si no, Completed con `result` cacheado.
    /// Sobre una clave desconocida, expirada o ya terminal devuelve `false`
    /// sin tocar el resultado almacenado.
    pub async fn complete(&self, key: &str, result: Option<Value>, error: Option<String>) -> Result<bool, CoreError> {
        let Some(mut record) = self.storage.get_idempotency(key).await? else {
            debug!("complete on unknown or expired idempotency key {key}: no-op");
            return Ok(false);
        };
        if record.is_terminal() {
            return Ok(false);
        }
        let ttl = record.remaining_ttl(Utc::now());
        if ttl == 0 {
            return Ok(false);
        }
        match error {
            Some(message) => {
                record.status = IdempotencyStatus::Failed;
                record.error = Some(message);
                record.result = None;
            }
            None => {
                record.status = IdempotencyStatus::Completed;
                record.result = result;
                record.error = None;
            }
        }
        self.storage.set_idempotency(key, &record, ttl).await?;
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::InMemoryStorage;
    use serde_json::json;

    fn manager() -> IdempotencyManager<InMemoryStorage> {
        IdempotencyManager::new(Arc::new(InMemoryStorage::new()))
    }

    #[test]
    fn derive_key_ignores_parameter_field_order() {
        let a = IdempotencyManager::<InMemoryStorage>::derive_key("t1", Some("u1"), "charge",
                                                                  &json!({"amount": 10, "currency": "EUR"}));
        let b = IdempotencyManager::<InMemoryStorage>::derive_key("t1", Some("u1"), "charge",
                                                                  &json!({"currency": "EUR", "amount": 10}));
        assert_eq!(a, b);
    }

    #[test]
    fn derive_key_separates_tenants_and_operations() {
        let base = IdempotencyManager::<InMemoryStorage>::derive_key("t1", None, "charge", &json!({}));
        assert_ne!(base, IdempotencyManager::<InMemoryStorage>::derive_key("t2", None, "charge", &json!({})));
        assert_ne!(base, IdempotencyManager::<InMemoryStorage>::derive_key("t1", None, "refund", &json!({})));
        assert_ne!(base, IdempotencyManager::<InMemoryStorage>::derive_key("t1", Some("u1"), "charge", &json!({})));
    }

    #[tokio::test]
    async fn duplicate_create_returns_original_pending_record() {
        let mgr = manager();
        let first = mgr.create("t1", None, "charge", Some("k1".to_string()), Some(60), None).await.unwrap();
        let second = mgr.create("t1", None, "charge", Some("k1".to_string()), Some(60), None).await.unwrap();
        assert_eq!(first.key, second.key);
        assert_eq!(first.created_at, second.created_at);
        assert_eq!(second.status, IdempotencyStatus::Pending);
    }

    #[tokio::test]
    async fn complete_transitions_exactly_once() {
        let mgr = manager();
        mgr.create("t1", None, "charge", Some("k1".to_string()), Some(60), None).await.unwrap();

        assert!(mgr.complete("k1", Some(json!({"receipt": 1})), None).await.unwrap());
        // la segunda finalización no altera el resultado almacenado
        assert!(!mgr.complete("k1", Some(json!({"receipt": 2})), None).await.unwrap());

        let record = mgr.check("k1").await.unwrap().expect("record");
        assert_eq!(record.status, IdempotencyStatus::Completed);
        assert_eq!(record.result, Some(json!({"receipt": 1})));
    }

    #[tokio::test]
    async fn complete_with_error_marks_failed() {
        let mgr = manager();
        mgr.create("t1", None, "charge", Some("k1".to_string()), Some(60), None).await.unwrap();
        assert!(mgr.complete("k1", None, Some("card declined".to_string())).await.unwrap());
        match mgr.check_outcome("k1").await.unwrap() {
            CheckOutcome::Failed(record) => assert_eq!(record.error.as_deref(), Some("card declined")),
            other => panic!("expected Failed, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn complete_on_expired_key_is_silent_noop() {
        let mgr = manager();
        mgr.create("t1", None, "charge", Some("k1".to_string()), Some(0), None).await.unwrap();
        assert!(!mgr.complete("k1", Some(json!(1)), None).await.unwrap());
        assert!(mgr.check("k1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn mark_in_progress_only_from_pending() {
        let mgr = manager();
        mgr.create("t1", None, "charge", Some("k1".to_string()), Some(60), None).await.unwrap();
        assert!(mgr.mark_in_progress("k1").await.unwrap());
        mgr.complete("k1", None, None).await.unwrap();
        assert!(!mgr.mark_in_progress("k1").await.unwrap());
        assert!(!mgr.mark_in_progress("unknown").await.unwrap());
    }

    #[tokio::test]
    async fn check_outcome_maps_inflight_states() {
        let mgr = manager();
        assert!(matches!(mgr.check_outcome("k1").await.unwrap(), CheckOutcome::Miss));
        mgr.create("t1", None, "charge", Some("k1".to_string()), Some(60), None).await.unwrap();
        assert!(matches!(mgr.check_outcome("k1").await.unwrap(), CheckOutcome::InFlight(_)));
        mgr.mark_in_progress("k1").await.unwrap();
        assert!(matches!(mgr.check_outcome("k1").await.unwrap(), CheckOutcome::InFlight(_)));
    }
}
