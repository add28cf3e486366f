pub mod bulk;
pub mod engine;
pub mod memory;
pub mod ports;
pub mod states;

pub use bulk::{BulkApproval, BulkApprovalOutcome, BulkItemFailure};
pub use engine::{QuizOutcome, SubmitRequest, WorkflowEngine, WorkflowPorts, WorkflowSettings};
pub use ports::NotificationKind;
