// ops-domain library entry point
pub mod background_operation;
pub mod errors;
pub mod idempotency_key;
pub mod saga_history;
pub mod saga_step;
pub mod saga_workflow;

pub use background_operation::{BackgroundOperation, BackgroundOperationStatus};
pub use errors::DomainError;
pub use idempotency_key::{IdempotencyKey, IdempotencyStatus};
pub use saga_history::SagaHistoryEntry;
pub use saga_step::{SagaStep, SagaStepSpec, SagaStepStatus};
pub use saga_workflow::{SagaStatus, SagaWorkflow};
