/// A chat reply that resolves a pending approval.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApprovalCommand {
    Approve {
        request_id: String,
    },
    Deny {
        request_id: String,
        reason: Option<String>,
    },
}

/// Parse `/approve <id>` or `/deny <id> [reason...]`.
pub fn parse_approval_command(text: &str) -> Option<ApprovalCommand> {
    let mut parts = text.trim().splitn(3, char::is_whitespace);
    let verb = parts.next()?;
    let request_id = parts.next().map(str::trim).filter(|id| !id.is_empty())?;

    match verb.to_ascii_lowercase().as_str() {
        "/approve" => Some(ApprovalCommand::Approve {
            request_id: request_id.to_string(),
        }),
        "/deny" => Some(ApprovalCommand::Deny {
            request_id: request_id.to_string(),
            reason: parts
                .next()
                .map(str::trim)
                .filter(|r| !r.is_empty())
                .map(str::to_string),
        }),
        _ => None,
    }
}
