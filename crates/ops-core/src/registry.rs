//! Registro de operaciones: tabla nombre -> handler tipado.
//!
//! El registro se construye una vez durante el arranque y se inyecta como
//! `Arc` inmutable en el motor; después sólo se lee. No hay estado global
//! mutable: registrar concurrentemente con el despacho no está soportado.
use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

use crate::errors::CoreError;

/// Fallo reportado por un handler. Para el motor todo `OperationError` es
/// transitorio (se reintenta con backoff hasta agotar `max_retries`); el
/// único fallo permanente de despacho es la ausencia de handler.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("{message}")]
pub struct OperationError {
    pub message: String,
}

impl OperationError {
    pub fn new(message: impl Into<String>) -> Self {
        OperationError { message: message.into() }
    }
}

/// Acción hacia adelante de un paso. Recibe el payload de parámetros y
/// devuelve un payload de resultado.
#[async_trait]
pub trait OperationHandler: Send + Sync {
    async fn execute(&self, parameters: &Value) -> Result<Value, OperationError>;
}

/// Acción de deshacer de un paso. Sólo reporta éxito o fallo: las
/// compensaciones no producen datos que consuman pasos posteriores.
#[async_trait]
pub trait CompensationHandler: Send + Sync {
    async fn compensate(&self, parameters: &Value) -> Result<(), OperationError>;
}

#[derive(Default)]
pub struct OperationRegistry {
    operations: HashMap<String, Arc<dyn OperationHandler>>,
    compensations: HashMap<String, Arc<dyn CompensationHandler>>,
}

impl OperationRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_operation(&mut self, name: impl Into<String>, handler: Arc<dyn OperationHandler>) {
        self.operations.insert(name.into(), handler);
    }

    pub fn register_compensation(&mut self, name: impl Into<String>, handler: Arc<dyn CompensationHandler>) {
        self.compensations.insert(name.into(), handler);
    }

    pub fn operation(&self, name: &str) -> Option<Arc<dyn OperationHandler>> {
        self.operations.get(name).cloned()
    }

    pub fn compensation(&self, name: &str) -> Option<Arc<dyn CompensationHandler>> {
        self.compensations.get(name).cloned()
    }

    pub fn has_operation(&self, name: &str) -> bool {
        self.operations.contains_key(name)
    }

    pub fn operation_count(&self) -> usize {
        self.operations.len()
    }

    pub fn compensation_count(&self) -> usize {
        self.compensations.len()
    }

    /// Despacho directo de una operación por nombre.
    pub async fn dispatch(&self, name: &str, parameters: &Value) -> Result<Value, CoreError> {
        let handler = self.operation(name)
                          .ok_or_else(|| CoreError::HandlerNotFound(name.to_string()))?;
        handler.execute(parameters)
               .await
               .map_err(|e| CoreError::OperationFailed(e.message))
    }

    /// Despacho directo de una compensación por nombre.
    pub async fn dispatch_compensation(&self, name: &str, parameters: &Value) -> Result<(), CoreError> {
        let handler = self.compensation(name)
                          .ok_or_else(|| CoreError::HandlerNotFound(name.to_string()))?;
        handler.compensate(parameters)
               .await
               .map_err(|e| CoreError::OperationFailed(e.message))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct EchoHandler;

    #[async_trait]
    impl OperationHandler for EchoHandler {
        async fn execute(&self, parameters: &Value) -> Result<Value, OperationError> {
            Ok(parameters.clone())
        }
    }

    struct NoopCompensation;

    #[async_trait]
    impl CompensationHandler for NoopCompensation {
        async fn compensate(&self, _parameters: &Value) -> Result<(), OperationError> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn dispatch_routes_to_registered_handler() {
        let mut registry = OperationRegistry::new();
        registry.register_operation("echo", Arc::new(EchoHandler));
        let out = registry.dispatch("echo", &json!({"x": 1})).await.expect("dispatch");
        assert_eq!(out, json!({"x": 1}));
        assert!(registry.has_operation("echo"));
        assert_eq!(registry.operation_count(), 1);
    }

    #[tokio::test]
    async fn unknown_operation_is_handler_not_found() {
        let registry = OperationRegistry::new();
        let err = registry.dispatch("missing", &Value::Null).await.unwrap_err();
        assert_eq!(err, CoreError::HandlerNotFound("missing".to_string()));
    }

    #[tokio::test]
    async fn compensation_dispatch_reports_success_only() {
        let mut registry = OperationRegistry::new();
        registry.register_compensation("undo", Arc::new(NoopCompensation));
        registry.dispatch_compensation("undo", &Value::Null).await.expect("compensation");
        assert!(registry.dispatch_compensation("missing", &Value::Null).await.is_err());
    }
}
