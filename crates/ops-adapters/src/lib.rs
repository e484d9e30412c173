//! ops-adapters: handlers concretos sobre los contratos de ops-core.
//!
//! Este crate provee:
//! - Handlers de facturación (`billing`): reservar/liberar crédito y
//!   cobrar/reembolsar facturas, con un ledger en memoria observable.
//! - Handlers de licenciamiento (`licensing`): aprovisionar y revocar
//!   licencias sobre un conjunto compartido de claves activas.
//! - Dobles de prueba (`test_support`): handlers intermitentes, fallidos y
//!   grabadores de invocaciones para los tests de integración.
//!
//! El core sólo conoce `OperationHandler` / `CompensationHandler` y payloads
//! `serde_json::Value`; aquí viven las semánticas concretas.

pub mod billing;
pub mod licensing;
pub mod test_support;

pub use billing::{new_credit_ledger, ChargeInvoiceHandler, CreditLedger, RefundInvoiceHandler,
                  ReleaseCreditHandler, ReserveCreditHandler};
pub use licensing::{new_license_pool, LicensePool, ProvisionLicenseHandler, RevokeLicenseHandler};
pub use test_support::{new_invocation_log, AlwaysFailsHandler, FailingCompensation, FlakyHandler,
                       InvocationLog, RecordingHandler};
