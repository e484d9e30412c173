//! Carga de configuración del gestor desde variables de entorno.
//! Usa convención `OPS_*` con valores por defecto de `constants`.

use std::env;

use dotenvy::dotenv;
use once_cell::sync::Lazy;

use crate::constants::{DEFAULT_CLEANUP_INTERVAL_SECS, DEFAULT_IDEMPOTENCY_TTL_SECS, DEFAULT_MAX_RETRIES,
                       DEFAULT_SAGA_TIMEOUT_SECS};

// Carga perezosa del archivo .env una sola vez.
static DOTENV_LOADED: Lazy<()> = Lazy::new(|| {
    let _ = dotenv(); // ignora error si no existe .env
});

#[derive(Debug, Clone)]
pub struct ManagerConfig {
    /// TTL por defecto de claves de idempotencia y registros de seguimiento.
    pub idempotency_ttl_seconds: u64,
    /// Timeout por defecto de una saga cuando la frontera no lo declara.
    pub saga_timeout_seconds: u64,
    /// Reintentos por defecto de un paso.
    pub max_retries: u32,
    /// Intervalo de la pasada de limpieza de datos expirados.
    pub cleanup_interval_seconds: u64,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        ManagerConfig { idempotency_ttl_seconds: DEFAULT_IDEMPOTENCY_TTL_SECS,
                        saga_timeout_seconds: DEFAULT_SAGA_TIMEOUT_SECS,
                        max_retries: DEFAULT_MAX_RETRIES,
                        cleanup_interval_seconds: DEFAULT_CLEANUP_INTERVAL_SECS }
    }
}

impl ManagerConfig {
    pub fn from_env() -> Self {
        // asegura que .env se haya cargado
        Lazy::force(&DOTENV_LOADED);
        let defaults = ManagerConfig::default();
        ManagerConfig { idempotency_ttl_seconds: env_u64("OPS_IDEMPOTENCY_TTL_SECONDS",
                                                         defaults.idempotency_ttl_seconds),
                        saga_timeout_seconds: env_u64("OPS_SAGA_TIMEOUT_SECONDS", defaults.saga_timeout_seconds),
                        max_retries: env_u64("OPS_MAX_RETRIES", defaults.max_retries as u64) as u32,
                        cleanup_interval_seconds: env_u64("OPS_CLEANUP_INTERVAL_SECONDS",
                                                          defaults.cleanup_interval_seconds) }
    }
}

fn env_u64(name: &str, default: u64) -> u64 {
    env::var(name).ok().and_then(|v| v.parse().ok()).unwrap_or(default)
}
