//! Dobles de prueba para los tests de integración del motor.
//!
//! - `FlakyHandler`: falla un número fijo de veces y luego responde, para
//!   ejercitar el backoff de reintentos.
//! - `AlwaysFailsHandler`: agota los reintentos de cualquier paso.
//! - `RecordingHandler`: registra cada invocación (ejecución y
//!   compensación) en un log compartido para afirmar orden y completitud.
//! - `FailingCompensation`: compensación que falla, para verificar que el
//!   barrido no se corta.
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::{json, Value};

use ops_core::{CompensationHandler, OperationError, OperationHandler};

/// Log compartido de invocaciones, en orden.
pub type InvocationLog = Arc<Mutex<Vec<String>>>;

pub fn new_invocation_log() -> InvocationLog {
    Arc::new(Mutex::new(Vec::new()))
}

/// Falla las primeras `failures` invocaciones y luego responde con éxito.
pub struct FlakyHandler {
    failures: u32,
    calls: AtomicU32,
}

impl FlakyHandler {
    pub fn new(failures: u32) -> Self {
        FlakyHandler { failures, calls: AtomicU32::new(0) }
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl OperationHandler for FlakyHandler {
    async fn execute(&self, _parameters: &Value) -> Result<Value, OperationError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        if call < self.failures {
            Err(OperationError::new(format!("transient failure on attempt {call}")))
        } else {
            Ok(json!({ "succeeded_on_attempt": call }))
        }
    }
}

/// Nunca responde con éxito.
pub struct AlwaysFailsHandler {
    message: String,
}

impl AlwaysFailsHandler {
    pub fn new(message: impl Into<String>) -> Self {
        AlwaysFailsHandler { message: message.into() }
    }
}

#[async_trait]
impl OperationHandler for AlwaysFailsHandler {
    async fn execute(&self, _parameters: &Value) -> Result<Value, OperationError> {
        Err(OperationError::new(self.message.clone()))
    }
}

/// Graba cada invocación como "exec:{name}" o "comp:{name}".
pub struct RecordingHandler {
    name: String,
    log: InvocationLog,
}

impl RecordingHandler {
    pub fn new(name: impl Into<String>, log: InvocationLog) -> Self {
        RecordingHandler { name: name.into(), log }
    }
}

#[async_trait]
impl OperationHandler for RecordingHandler {
    async fn execute(&self, parameters: &Value) -> Result<Value, OperationError> {
        self.log.lock().expect("invocation log poisoned").push(format!("exec:{}", self.name));
        Ok(parameters.clone())
    }
}

#[async_trait]
impl CompensationHandler for RecordingHandler {
    async fn compensate(&self, _parameters: &Value) -> Result<(), OperationError> {
        self.log.lock().expect("invocation log poisoned").push(format!("comp:{}", self.name));
        Ok(())
    }
}

/// Compensación que siempre falla (y deja rastro en el log).
pub struct FailingCompensation {
    name: String,
    log: InvocationLog,
}

impl FailingCompensation {
    pub fn new(name: impl Into<String>, log: InvocationLog) -> Self {
        FailingCompensation { name: name.into(), log }
    }
}

#[async_trait]
impl CompensationHandler for FailingCompensation {
    async fn compensate(&self, _parameters: &Value) -> Result<(), OperationError> {
        self.log.lock().expect("invocation log poisoned").push(format!("comp-failed:{}", self.name));
        Err(OperationError::new(format!("compensation '{}' refused to run", self.name)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn flaky_handler_recovers_after_failures() {
        let handler = FlakyHandler::new(2);
        assert!(handler.execute(&Value::Null).await.is_err());
        assert!(handler.execute(&Value::Null).await.is_err());
        let out = handler.execute(&Value::Null).await.expect("third attempt succeeds");
        assert_eq!(out["succeeded_on_attempt"], 2);
        assert_eq!(handler.calls(), 3);
    }

    #[tokio::test]
    async fn recording_handler_tracks_both_directions() {
        let log = new_invocation_log();
        let handler = RecordingHandler::new("step", Arc::clone(&log));
        handler.execute(&Value::Null).await.unwrap();
        handler.compensate(&Value::Null).await.unwrap();
        assert_eq!(*log.lock().unwrap(), vec!["exec:step", "comp:step"]);
    }
}
