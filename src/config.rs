//! Configuración central de la aplicación.
//! Carga variables de entorno (.env) y expone una estructura inmutable
//! (`CONFIG`) con la configuración del gestor de operaciones en segundo
//! plano.
use once_cell::sync::Lazy;

use ops_core::ManagerConfig;

/// Configuración global de la aplicación (extensible para más secciones:
/// logging, etc.).
pub struct AppConfig {
    /// Configuración del gestor de operaciones en segundo plano.
    pub ops: ManagerConfig,
}

/// Instancia global perezosa de configuración, evaluada una sola vez.
pub static CONFIG: Lazy<AppConfig> = Lazy::new(|| AppConfig { ops: ManagerConfig::from_env() });
