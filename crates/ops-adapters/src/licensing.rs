//! Handlers de licenciamiento: aprovisionar y revocar licencias.
//!
//! El conjunto de licencias activas es compartido entre el handler de
//! aprovisionamiento y su compensación, así una saga compensada deja el pool
//! exactamente como estaba.
use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::{json, Value};
use sha2::{Digest, Sha256};

use ops_core::hashing::to_canonical_json;
use ops_core::{CompensationHandler, OperationError, OperationHandler};

/// Pool de claves de licencia activas.
pub type LicensePool = Arc<Mutex<HashSet<String>>>;

pub fn new_license_pool() -> LicensePool {
    Arc::new(Mutex::new(HashSet::new()))
}

/// Clave determinista: mismos (customer, product) -> misma licencia.
fn license_key(parameters: &Value) -> String {
    let digest = Sha256::digest(to_canonical_json(parameters).as_bytes());
    let hex = format!("{:x}", digest);
    format!("lic-{}", &hex[..16])
}

pub struct ProvisionLicenseHandler {
    pool: LicensePool,
}

impl ProvisionLicenseHandler {
    pub fn new(pool: LicensePool) -> Self {
        ProvisionLicenseHandler { pool }
    }
}

#[async_trait]
impl OperationHandler for ProvisionLicenseHandler {
    async fn execute(&self, parameters: &Value) -> Result<Value, OperationError> {
        let customer = parameters.get("customer_id")
                                 .and_then(Value::as_str)
                                 .ok_or_else(|| OperationError::new("missing string parameter 'customer_id'"))?;
        let key = license_key(parameters);
        self.pool.lock().expect("license pool poisoned").insert(key.clone());
        Ok(json!({ "customer_id": customer, "license_key": key }))
    }
}

pub struct RevokeLicenseHandler {
    pool: LicensePool,
}

impl RevokeLicenseHandler {
    pub fn new(pool: LicensePool) -> Self {
        RevokeLicenseHandler { pool }
    }
}

#[async_trait]
impl CompensationHandler for RevokeLicenseHandler {
    async fn compensate(&self, parameters: &Value) -> Result<(), OperationError> {
        let key = license_key(parameters);
        let removed = self.pool.lock().expect("license pool poisoned").remove(&key);
        if removed {
            Ok(())
        } else {
            Err(OperationError::new(format!("license '{key}' was not active")))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn provision_then_revoke_leaves_pool_empty() {
        let pool = new_license_pool();
        let provision = ProvisionLicenseHandler::new(Arc::clone(&pool));
        let revoke = RevokeLicenseHandler::new(Arc::clone(&pool));
        let params = json!({"customer_id": "c1", "product": "suite"});

        let out = provision.execute(&params).await.expect("provision");
        let key = out["license_key"].as_str().unwrap().to_string();
        assert!(pool.lock().unwrap().contains(&key));

        revoke.compensate(&params).await.expect("revoke");
        assert!(pool.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn same_parameters_yield_same_license_key() {
        let pool = new_license_pool();
        let provision = ProvisionLicenseHandler::new(pool);
        let a = provision.execute(&json!({"customer_id": "c1", "product": "suite"})).await.unwrap();
        let b = provision.execute(&json!({"product": "suite", "customer_id": "c1"})).await.unwrap();
        assert_eq!(a["license_key"], b["license_key"]);
    }

    #[tokio::test]
    async fn revoking_unknown_license_fails() {
        let revoke = RevokeLicenseHandler::new(new_license_pool());
        assert!(revoke.compensate(&json!({"customer_id": "ghost"})).await.is_err());
    }
}
