use std::sync::Arc;

use serde_json::json;

use ops_adapters::ChargeInvoiceHandler;
use ops_core::{CheckOutcome, ManagerConfig, OperationRegistry, OperationsManager};

// Helper simple para construir un gestor en memoria con el handler de cobro.
fn build_manager() -> OperationsManager<ops_core::InMemoryStorage> {
    let mut registry = OperationRegistry::new();
    registry.register_operation("billing.charge_invoice", Arc::new(ChargeInvoiceHandler));
    OperationsManager::in_memory(registry, ManagerConfig::default())
}

#[tokio::test]
async fn duplicate_request_is_suppressed_and_replays_cached_result() {
    let manager = build_manager();
    let params = json!({"invoice_id": "inv-1", "amount": 10});

    // 1. Primera petición: clave derivada, registro Pending
    let key = manager.create_idempotency_key("t1", Some("u1".to_string()), "billing.charge_invoice",
                                             None, Some(300), Some(&params))
                     .await
                     .expect("create");
    assert!(matches!(manager.check_idempotency(&key.key).await.unwrap(), CheckOutcome::InFlight(_)));

    // 2. Un duplicado mientras la original está en vuelo no dispara una
    //    segunda ejecución: recibe el mismo registro
    assert!(manager.mark_idempotency_in_progress(&key.key).await.unwrap());
    let dup = manager.create_idempotency_key("t1", Some("u1".to_string()), "billing.charge_invoice",
                                             None, Some(300), Some(&params))
                     .await
                     .expect("duplicate create");
    assert_eq!(dup.key, key.key);
    assert_eq!(dup.created_at, key.created_at);
    assert!(matches!(manager.check_idempotency(&key.key).await.unwrap(), CheckOutcome::InFlight(_)));

    // 3. La frontera completa y el duplicado recibe el resultado tal cual
    let result = json!({"receipt": "rcpt-abc", "invoice_id": "inv-1"});
    assert!(manager.complete_idempotent_operation(&key.key, Some(result.clone()), None).await.unwrap());
    match manager.check_idempotency(&key.key).await.unwrap() {
        CheckOutcome::Completed(record) => assert_eq!(record.result, Some(result)),
        other => panic!("expected Completed, got {other:?}"),
    }
}

#[tokio::test]
async fn derived_key_is_stable_for_equal_requests() {
    let manager = build_manager();
    // mismos inputs con distinto orden de campos -> misma clave derivada
    let a = manager.create_idempotency_key("t1", None, "billing.charge_invoice", None, Some(300),
                                           Some(&json!({"invoice_id": "inv-2", "amount": 5})))
                   .await
                   .unwrap();
    let b = manager.create_idempotency_key("t1", None, "billing.charge_invoice", None, Some(300),
                                           Some(&json!({"amount": 5, "invoice_id": "inv-2"})))
                   .await
                   .unwrap();
    assert_eq!(a.key, b.key);
    assert_eq!(a.created_at, b.created_at);
}

#[tokio::test]
async fn explicit_key_is_surfaced_back_for_retries() {
    let manager = build_manager();
    // la clave explícita viaja de vuelta al llamador para que la re-envíe
    let record = manager.create_idempotency_key("t1", None, "billing.charge_invoice",
                                                Some("client-supplied-key".to_string()), Some(300), None)
                        .await
                        .unwrap();
    assert_eq!(record.key, "client-supplied-key");
}

#[tokio::test]
async fn failed_operation_replays_cached_error() {
    let manager = build_manager();
    let key = manager.create_idempotency_key("t1", None, "billing.charge_invoice",
                                             Some("k-fail".to_string()), Some(300), None)
                     .await
                     .unwrap();
    assert!(manager.complete_idempotent_operation(&key.key, None, Some("card declined".to_string()))
                   .await
                   .unwrap());
    match manager.check_idempotency(&key.key).await.unwrap() {
        CheckOutcome::Failed(record) => assert_eq!(record.error.as_deref(), Some("card declined")),
        other => panic!("expected Failed, got {other:?}"),
    }
}

#[tokio::test]
async fn completion_after_expiry_is_a_silent_noop() {
    let manager = build_manager();
    let key = manager.create_idempotency_key("t1", None, "billing.charge_invoice",
                                             Some("k-ttl".to_string()), Some(0), None)
                     .await
                     .unwrap();
    // la ventana del llamador pasó: completar no es un error, es false
    assert!(!manager.complete_idempotent_operation(&key.key, Some(json!(1)), None).await.unwrap());
    assert!(matches!(manager.check_idempotency(&key.key).await.unwrap(), CheckOutcome::Miss));

    // una nueva petición con la misma clave se trata como nueva
    let fresh = manager.create_idempotency_key("t1", None, "billing.charge_invoice",
                                               Some("k-ttl".to_string()), Some(300), None)
                       .await
                       .unwrap();
    assert!(fresh.created_at >= key.created_at);
    assert!(matches!(manager.check_idempotency("k-ttl").await.unwrap(), CheckOutcome::InFlight(_)));
}
