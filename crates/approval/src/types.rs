use chrono::{DateTime, Utc};
use nachos_core::{SecurityTier, ToolCall};
use serde::{Deserialize, Serialize};

/// An outstanding request for a human decision.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApprovalRequest {
    pub id: String,
    pub tool_call: ToolCall,
    pub security_tier: SecurityTier,
    pub session_id: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApprovalResult {
    pub approved: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
}

impl ApprovalResult {
    pub fn approved(user_id: Option<String>) -> Self {
        Self {
            approved: true,
            reason: None,
            user_id,
        }
    }

    pub fn denied(reason: impl Into<String>, user_id: Option<String>) -> Self {
        Self {
            approved: false,
            reason: Some(reason.into()),
            user_id,
        }
    }
}

/// Terminal state of a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalOutcome {
    Approved,
    Denied,
    TimedOut,
    Cancelled,
}

impl ApprovalOutcome {
    pub fn as_str(self) -> &'static str {
        match self {
            ApprovalOutcome::Approved => "approved",
            ApprovalOutcome::Denied => "denied",
            ApprovalOutcome::TimedOut => "timed_out",
            ApprovalOutcome::Cancelled => "cancelled",
        }
    }
}

/// Notifications for whoever surfaces approvals to humans.
#[derive(Debug, Clone, PartialEq)]
pub enum ApprovalEvent {
    Requested(ApprovalRequest),
    Resolved {
        request_id: String,
        session_id: String,
        outcome: ApprovalOutcome,
        result: ApprovalResult,
    },
}
