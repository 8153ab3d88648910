//! Human-in-the-loop approval gate for high-tier tool calls.

pub mod command;
pub mod format;
pub mod manager;
pub mod types;

pub use command::{parse_approval_command, ApprovalCommand};
pub use format::format_approval_message;
pub use manager::{requires_approval, ApprovalManager, DEFAULT_APPROVAL_TIMEOUT};
pub use types::{ApprovalEvent, ApprovalOutcome, ApprovalRequest, ApprovalResult};
