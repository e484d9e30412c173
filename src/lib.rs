//! OpsFlow Rust Library
//!
//! Este crate actúa como el punto de entrada del workspace:
//! - Expone `config` con la configuración global de la aplicación.
//! - Re-exporta las piezas del núcleo que consume la capa de frontera.
//!
//! Puede usarse desde `main.rs` o por otros crates/clientes.

pub mod config;

pub use ops_core::{CheckOutcome, CoreError, HealthStatus, ManagerConfig, OperationRegistry, OperationsManager};

#[cfg(test)]
mod tests {
	use super::config::CONFIG;

	#[test]
	fn config_is_loaded_lazily_with_defaults() {
		// sin variables OPS_* en el entorno aplican los defaults
		assert!(CONFIG.ops.idempotency_ttl_seconds > 0);
		assert!(CONFIG.ops.cleanup_interval_seconds > 0);
	}
}
