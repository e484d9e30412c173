//! Constantes del núcleo de orquestación.
//!
//! Agrupa valores estáticos que participan en la derivación determinista de
//! claves y en los valores por defecto de ejecución. `CORE_VERSION` forma
//! parte del input de hashing: un cambio de versión del núcleo invalida las
//! claves derivadas aunque los datos no cambien.

/// Versión lógica del núcleo, incluida en la derivación de claves de
/// idempotencia. Mantener estable mientras no haya cambios incompatibles.
pub const CORE_VERSION: &str = "1.0";

/// TTL por defecto de una clave de idempotencia (24 horas).
pub const DEFAULT_IDEMPOTENCY_TTL_SECS: u64 = 86_400;

/// Timeout por defecto de una saga (1 hora).
pub const DEFAULT_SAGA_TIMEOUT_SECS: u64 = 3_600;

/// Reintentos por defecto de un paso cuando el spec no los declara.
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Intervalo por defecto de la pasada de limpieza (5 minutos).
pub const DEFAULT_CLEANUP_INTERVAL_SECS: u64 = 300;

/// Tope del backoff exponencial: `delay = min(2^attempt, 60)` unidades.
pub const MAX_BACKOFF_UNITS: u64 = 60;

/// Margen que el TTL del lock añade sobre el timeout de la saga, para que un
/// proceso caído libere el lock por expiración poco después del deadline.
pub const LOCK_TTL_MARGIN_SECS: u64 = 5;
