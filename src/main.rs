use std::sync::Arc;
use std::time::Duration;

use serde_json::json;

use ops_adapters::{new_credit_ledger, new_license_pool, ChargeInvoiceHandler, CreditLedger,
                   ProvisionLicenseHandler, RefundInvoiceHandler, ReleaseCreditHandler, ReserveCreditHandler,
                   RevokeLicenseHandler};
use ops_core::{CheckOutcome, OperationRegistry, OperationsManager};
use ops_domain::SagaStepSpec;
use opsflow_rust::config::CONFIG;

/// Construye el registro de operaciones con los handlers de facturación y
/// licenciamiento compartiendo ledger y pool.
fn build_registry(ledger: &CreditLedger, pool: &ops_adapters::LicensePool) -> OperationRegistry {
    let mut registry = OperationRegistry::new();
    registry.register_operation("billing.reserve_credit", Arc::new(ReserveCreditHandler::new(Arc::clone(ledger))));
    registry.register_compensation("billing.release_credit",
                                   Arc::new(ReleaseCreditHandler::new(Arc::clone(ledger))));
    registry.register_operation("billing.charge_invoice", Arc::new(ChargeInvoiceHandler));
    registry.register_compensation("billing.refund_invoice", Arc::new(RefundInvoiceHandler));
    registry.register_operation("licensing.provision", Arc::new(ProvisionLicenseHandler::new(Arc::clone(pool))));
    registry.register_compensation("licensing.revoke", Arc::new(RevokeLicenseHandler::new(Arc::clone(pool))));
    registry
}

/// Validación de idempotencia: creación, duplicado y replay del resultado.
async fn run_idempotency_validation(manager: &OperationsManager<ops_core::InMemoryStorage>) {
    println!("== Idempotencia ==");
    let params = json!({"invoice_id": "inv-42", "amount": 10});
    let key = manager.create_idempotency_key("tenant-1", Some("user-7".to_string()), "billing.charge_invoice",
                                             None, None, Some(&params))
                     .await
                     .expect("crear clave");
    println!("clave derivada: {}", key.key);

    // un duplicado sin completar devuelve el mismo registro Pending
    let dup = manager.create_idempotency_key("tenant-1", Some("user-7".to_string()), "billing.charge_invoice",
                                             None, None, Some(&params))
                     .await
                     .expect("duplicado");
    println!("duplicado devuelve el registro original: {}", dup.created_at == key.created_at);

    manager.mark_idempotency_in_progress(&key.key).await.expect("in-progress");
    manager.complete_idempotent_operation(&key.key, Some(json!({"receipt": "rcpt-1"})), None)
           .await
           .expect("completar");

    match manager.check_idempotency(&key.key).await.expect("check") {
        CheckOutcome::Completed(record) => {
            println!("resultado cacheado replay: {}", record.result.unwrap_or_default())
        }
        other => println!("estado inesperado: {other:?}"),
    }
}

/// Validación de saga exitosa: reservar crédito, cobrar y aprovisionar.
async fn run_saga_validation(manager: &OperationsManager<ops_core::InMemoryStorage>, ledger: &CreditLedger) {
    println!("== Saga exitosa ==");
    let steps = vec![SagaStepSpec::new("reserve", "billing.reserve_credit", json!({"tenant_id": "tenant-1", "amount": 10}))
                         .with_compensation("billing.release_credit", json!({"tenant_id": "tenant-1", "amount": 10})),
                     SagaStepSpec::new("charge", "billing.charge_invoice", json!({"invoice_id": "inv-42", "amount": 10}))
                         .with_compensation("billing.refund_invoice", json!({"invoice_id": "inv-42"})),
                     SagaStepSpec::new("provision", "licensing.provision",
                                       json!({"customer_id": "cust-9", "product": "suite"}))
                         .with_compensation("licensing.revoke", json!({"customer_id": "cust-9", "product": "suite"}))];
    let wf = manager.create_saga_workflow("tenant-1", "order_fulfillment", steps, Some(300), None)
                    .await
                    .expect("crear saga");
    let done = manager.execute_saga_workflow(wf.saga_id).await.expect("ejecutar saga");
    println!("saga {} -> {:?}", done.saga_id, done.status);
    println!("crédito reservado tras la saga: {:?}", ledger.lock().unwrap().get("tenant-1"));
    let history = manager.get_saga_history(wf.saga_id).await.expect("historial");
    println!("entradas de historial: {}", history.len());
}

/// Validación de compensación: el cobro falla de forma permanente y la
/// reserva de crédito se deshace en orden inverso.
async fn run_compensation_validation(manager: &OperationsManager<ops_core::InMemoryStorage>, ledger: &CreditLedger) {
    println!("== Saga con compensación ==");
    let steps = vec![SagaStepSpec::new("reserve", "billing.reserve_credit", json!({"tenant_id": "tenant-2", "amount": 50}))
                         .with_compensation("billing.release_credit", json!({"tenant_id": "tenant-2", "amount": 50})),
                     // monto inválido: el handler rechaza y agota los reintentos
                     SagaStepSpec::new("charge", "billing.charge_invoice", json!({"invoice_id": "inv-90", "amount": -1}))
                         .with_max_retries(0)];
    let wf = manager.create_saga_workflow("tenant-2", "order_fulfillment", steps, Some(300), None)
                    .await
                    .expect("crear saga");
    let done = manager.execute_saga_workflow(wf.saga_id).await.expect("ejecutar saga");
    println!("saga {} -> {:?}", done.saga_id, done.status);
    println!("paso fallido: {:?} ({})", done.steps[1].status,
             done.steps[1].error.clone().unwrap_or_default());
    println!("crédito del tenant-2 tras compensar: {:?}", ledger.lock().unwrap().get("tenant-2"));
}

#[tokio::main]
async fn main() {
    // Cargar variables de entorno desde .env si existe (antes de leer OPS_*)
    let _ = dotenvy::dotenv();

    let ledger = new_credit_ledger();
    let pool = new_license_pool();
    let registry = build_registry(&ledger, &pool);
    let manager = OperationsManager::in_memory(registry, CONFIG.ops.clone())
        .with_backoff_unit(Duration::from_millis(10));

    manager.start().await;
    let health = manager.health_check().await;
    println!("health: storage={} operaciones={} compensaciones={} limpieza={}",
             health.storage_healthy, health.operations_registered, health.compensations_registered,
             health.cleanup_running);

    run_idempotency_validation(&manager).await;
    run_saga_validation(&manager, &ledger).await;
    run_compensation_validation(&manager, &ledger).await;

    manager.stop().await;
    println!("apagado limpio: el bucle de limpieza terminó antes de soltar el storage");
}
