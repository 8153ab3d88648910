use crate::types::ApprovalRequest;
use std::time::Duration;

/// Render the prompt shown to a human. Channel adapters match on this text,
/// so its lines and their order are fixed.
pub fn format_approval_message(request: &ApprovalRequest, timeout: Duration) -> String {
    let call = &request.tool_call;
    let parameters =
        serde_json::to_string_pretty(&call.parameters).unwrap_or_else(|_| "{}".to_string());

    format!(
        "🔐 **Approval Required**\n\
         \n\
         **Tool:** {tool}\n\
         **Security Tier:** {level} ({name})\n\
         \n\
         **Parameters:**\n\
         ```json\n\
         {parameters}\n\
         ```\n\
         \n\
         **Request ID:** `{id}`\n\
         \n\
         To approve, reply: `/approve {id}`\n\
         To deny, reply: `/deny {id}`\n\
         \n\
         This request will expire in {seconds} seconds.",
        tool = call.tool,
        level = request.security_tier.as_u8(),
        name = request.security_tier.name(),
        parameters = parameters,
        id = request.id,
        seconds = timeout.as_secs(),
    )
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use super::*;
    use chrono::Utc;
    use nachos_core::{SecurityTier, ToolCall};
    use serde_json::json;

    #[test]
    fn test_exact_prompt_text() {
        let request = ApprovalRequest {
            id: "req-42".into(),
            tool_call: ToolCall::new("s1", "code_runner", json!({"language": "python"})),
            security_tier: SecurityTier::Restricted,
            session_id: "s1".into(),
            created_at: Utc::now(),
        };

        let text = format_approval_message(&request, Duration::from_millis(120_000));
        let expected = "🔐 **Approval Required**\n\
\n\
**Tool:** code_runner\n\
**Security Tier:** 3 (RESTRICTED)\n\
\n\
**Parameters:**\n\
```json\n\
{\n  \"language\": \"python\"\n}\n\
```\n\
\n\
**Request ID:** `req-42`\n\
\n\
To approve, reply: `/approve req-42`\n\
To deny, reply: `/deny req-42`\n\
\n\
This request will expire in 120 seconds.";
        assert_eq!(text, expected);
    }

    #[test]
    fn test_prompt_order() {
        let request = ApprovalRequest {
            id: "xyz".into(),
            tool_call: ToolCall::new("s1", "shell", json!({})),
            security_tier: SecurityTier::Dangerous,
            session_id: "s1".into(),
            created_at: Utc::now(),
        };
        let text = format_approval_message(&request, Duration::from_secs(30));

        let positions: Vec<usize> = [
            "Approval Required",
            "shell",
            "4 (DANGEROUS)",
            "```json",
            "Request ID",
            "/approve xyz",
            "/deny xyz",
            "30 seconds",
        ]
        .iter()
        .map(|needle| text.find(needle).unwrap())
        .collect();

        assert!(positions.windows(2).all(|w| w[0] < w[1]), "{}", text);
    }
}
