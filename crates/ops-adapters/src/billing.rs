//! Handlers de facturación: reserva de crédito y cobro de facturas.
//!
//! La reserva muta un ledger en memoria compartido para que los tests y la
//! demo puedan observar el efecto lateral y su reversa. El cobro produce un
//! recibo determinista (digest de los parámetros canónicos) sin tocar
//! estado.
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::{json, Value};
use sha2::{Digest, Sha256};

use ops_core::hashing::to_canonical_json;
use ops_core::{CompensationHandler, OperationError, OperationHandler};

/// Ledger tenant -> crédito reservado, compartido entre reserva y
/// liberación.
pub type CreditLedger = Arc<Mutex<HashMap<String, i64>>>;

pub fn new_credit_ledger() -> CreditLedger {
    Arc::new(Mutex::new(HashMap::new()))
}

fn require_str(parameters: &Value, field: &str) -> Result<String, OperationError> {
    parameters.get(field)
              .and_then(Value::as_str)
              .map(str::to_string)
              .ok_or_else(|| OperationError::new(format!("missing string parameter '{field}'")))
}

fn require_amount(parameters: &Value) -> Result<i64, OperationError> {
    let amount = parameters.get("amount")
                           .and_then(Value::as_i64)
                           .ok_or_else(|| OperationError::new("missing numeric parameter 'amount'"))?;
    if amount <= 0 {
        return Err(OperationError::new(format!("amount must be positive, got {amount}")));
    }
    Ok(amount)
}

/// Reserva crédito del tenant antes de cobrar.
pub struct ReserveCreditHandler {
    ledger: CreditLedger,
}

impl ReserveCreditHandler {
    pub fn new(ledger: CreditLedger) -> Self {
        ReserveCreditHandler { ledger }
    }
}

#[async_trait]
impl OperationHandler for ReserveCreditHandler {
    async fn execute(&self, parameters: &Value) -> Result<Value, OperationError> {
        let tenant = require_str(parameters, "tenant_id")?;
        let amount = require_amount(parameters)?;
        let mut ledger = self.ledger.lock().expect("credit ledger poisoned");
        let reserved = ledger.entry(tenant.clone()).or_insert(0);
        *reserved += amount;
        Ok(json!({ "tenant_id": tenant, "reserved": *reserved }))
    }
}

/// Reversa de la reserva: devuelve el crédito al tenant.
pub struct ReleaseCreditHandler {
    ledger: CreditLedger,
}

impl ReleaseCreditHandler {
    pub fn new(ledger: CreditLedger) -> Self {
        ReleaseCreditHandler { ledger }
    }
}

#[async_trait]
impl CompensationHandler for ReleaseCreditHandler {
    async fn compensate(&self, parameters: &Value) -> Result<(), OperationError> {
        let tenant = require_str(parameters, "tenant_id")?;
        let amount = require_amount(parameters)?;
        let mut ledger = self.ledger.lock().expect("credit ledger poisoned");
        match ledger.get_mut(&tenant) {
            Some(reserved) => {
                *reserved -= amount;
                Ok(())
            }
            None => Err(OperationError::new(format!("no reservation found for tenant '{tenant}'"))),
        }
    }
}

/// Cobra una factura y devuelve un recibo determinista.
#[derive(Default)]
pub struct ChargeInvoiceHandler;

#[async_trait]
impl OperationHandler for ChargeInvoiceHandler {
    async fn execute(&self, parameters: &Value) -> Result<Value, OperationError> {
        let invoice_id = require_str(parameters, "invoice_id")?;
        let amount = require_amount(parameters)?;
        // recibo estable: mismos parámetros -> mismo recibo
        let digest = Sha256::digest(to_canonical_json(parameters).as_bytes());
        let receipt = format!("rcpt-{:x}", digest);
        Ok(json!({ "invoice_id": invoice_id, "amount": amount, "receipt": receipt }))
    }
}

/// Reversa del cobro: emite el reembolso de la factura.
#[derive(Default)]
pub struct RefundInvoiceHandler;

#[async_trait]
impl CompensationHandler for RefundInvoiceHandler {
    async fn compensate(&self, parameters: &Value) -> Result<(), OperationError> {
        let _invoice_id = require_str(parameters, "invoice_id")?;
        Ok(())
    }
}
