use serde::de::{self, Deserializer};
use serde::{Deserialize, Serialize, Serializer};
use serde_json::{Map, Value};
use std::fmt;
use std::str::FromStr;

/// Risk classification of a tool call. Higher tiers impose strictly more gating.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum SecurityTier {
    Safe = 0,
    Standard = 1,
    Elevated = 2,
    Restricted = 3,
    Dangerous = 4,
}

impl SecurityTier {
    pub const ALL: [SecurityTier; 5] = [
        SecurityTier::Safe,
        SecurityTier::Standard,
        SecurityTier::Elevated,
        SecurityTier::Restricted,
        SecurityTier::Dangerous,
    ];

    pub fn as_u8(self) -> u8 {
        self as u8
    }

    pub fn from_u8(level: u8) -> Option<Self> {
        Self::ALL.get(level as usize).copied()
    }

    /// Upper-case name, as shown to humans in approval prompts.
    pub fn name(self) -> &'static str {
        match self {
            SecurityTier::Safe => "SAFE",
            SecurityTier::Standard => "STANDARD",
            SecurityTier::Elevated => "ELEVATED",
            SecurityTier::Restricted => "RESTRICTED",
            SecurityTier::Dangerous => "DANGEROUS",
        }
    }
}

impl fmt::Display for SecurityTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for SecurityTier {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|tier| tier.name().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| format!("unknown security tier: {}", s))
    }
}

// Tiers travel as their numeric level so policy conditions can compare them.
impl Serialize for SecurityTier {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u8(self.as_u8())
    }
}

impl<'de> Deserialize<'de> for SecurityTier {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Repr {
            Level(u8),
            Name(String),
        }

        match Repr::deserialize(deserializer)? {
            Repr::Level(level) => SecurityTier::from_u8(level)
                .ok_or_else(|| de::Error::custom(format!("unknown security tier: {}", level))),
            Repr::Name(name) => name.parse().map_err(de::Error::custom),
        }
    }
}

/// Operating posture of the assistant runtime.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SecurityMode {
    Strict,
    #[default]
    Standard,
    Permissive,
}

impl SecurityMode {
    pub fn as_str(self) -> &'static str {
        match self {
            SecurityMode::Strict => "strict",
            SecurityMode::Standard => "standard",
            SecurityMode::Permissive => "permissive",
        }
    }
}

impl fmt::Display for SecurityMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SecurityMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "strict" => Ok(SecurityMode::Strict),
            "standard" => Ok(SecurityMode::Standard),
            "permissive" => Ok(SecurityMode::Permissive),
            other => Err(format!("unknown security mode: {}", other)),
        }
    }
}

/// A single tool invocation requested by the assistant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolCall {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    pub tool: String,
    #[serde(default)]
    pub parameters: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub security_tier: Option<SecurityTier>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub security_mode: Option<SecurityMode>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sandbox: Option<bool>,
    /// Dispatch timeout in milliseconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout: Option<u64>,
    /// Cache lifetime in seconds.
    #[serde(rename = "cacheTTL", default, skip_serializing_if = "Option::is_none")]
    pub cache_ttl: Option<u64>,
}

impl ToolCall {
    pub fn new(session_id: impl Into<String>, tool: impl Into<String>, parameters: Value) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            session_id: Some(session_id.into()),
            user_id: None,
            tool: tool.into(),
            parameters,
            security_tier: None,
            security_mode: None,
            sandbox: None,
            timeout: None,
            cache_ttl: None,
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    pub fn with_user(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    pub fn with_tier(mut self, tier: SecurityTier) -> Self {
        self.security_tier = Some(tier);
        self
    }

    pub fn with_mode(mut self, mode: SecurityMode) -> Self {
        self.security_mode = Some(mode);
        self
    }

    pub fn with_sandbox(mut self, sandbox: bool) -> Self {
        self.sandbox = Some(sandbox);
        self
    }

    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout = Some(timeout_ms);
        self
    }

    pub fn with_cache_ttl_secs(mut self, ttl_secs: u64) -> Self {
        self.cache_ttl = Some(ttl_secs);
        self
    }

    /// Session id, treating an empty string as absent.
    pub fn session(&self) -> Option<&str> {
        self.session_id.as_deref().filter(|s| !s.trim().is_empty())
    }

    /// String value of a top-level parameter.
    pub fn parameter_str(&self, key: &str) -> Option<&str> {
        self.parameters.get(key).and_then(Value::as_str)
    }
}

/// Error codes surfaced on `ToolResult.error.code` by the pipeline itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    MissingSession,
    PolicyDenied,
    ApprovalDenied,
    InvalidToolResponse,
    Timeout,
    ToolNotAvailable,
    ExecutionError,
    UnknownError,
}

impl ErrorCode {
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorCode::MissingSession => "MISSING_SESSION",
            ErrorCode::PolicyDenied => "POLICY_DENIED",
            ErrorCode::ApprovalDenied => "APPROVAL_DENIED",
            ErrorCode::InvalidToolResponse => "INVALID_TOOL_RESPONSE",
            ErrorCode::Timeout => "TIMEOUT",
            ErrorCode::ToolNotAvailable => "TOOL_NOT_AVAILABLE",
            ErrorCode::ExecutionError => "EXECUTION_ERROR",
            ErrorCode::UnknownError => "UNKNOWN_ERROR",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error carried by a failed result. Tools may report codes of their own,
/// so the code is kept as a string rather than an `ErrorCode`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolErrorInfo {
    pub code: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
}

impl ToolErrorInfo {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code: code.as_str().to_string(),
            message: message.into(),
            details: None,
        }
    }

    pub fn is(&self, code: ErrorCode) -> bool {
        self.code == code.as_str()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentBlock {
    Text {
        text: String,
    },
    Image {
        data: String,
        #[serde(rename = "mimeType")]
        mime_type: String,
    },
    Resource {
        uri: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        text: Option<String>,
    },
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResultMetadata {
    /// Wall time in milliseconds.
    #[serde(default)]
    pub duration: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cached: Option<bool>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Outcome of one tool call, successful or not.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolResult {
    pub success: bool,
    #[serde(default)]
    pub content: Vec<ContentBlock>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ToolErrorInfo>,
    #[serde(default)]
    pub metadata: ResultMetadata,
}

impl ToolResult {
    pub fn success(content: Vec<ContentBlock>) -> Self {
        Self {
            success: true,
            content,
            error: None,
            metadata: ResultMetadata::default(),
        }
    }

    pub fn text(text: impl Into<String>) -> Self {
        Self::success(vec![ContentBlock::Text { text: text.into() }])
    }

    pub fn failure(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            success: false,
            content: Vec::new(),
            error: Some(ToolErrorInfo::new(code, message)),
            metadata: ResultMetadata::default(),
        }
    }

    pub fn with_details(mut self, details: Value) -> Self {
        if let Some(error) = self.error.as_mut() {
            error.details = Some(details);
        }
        self
    }

    pub fn error_code(&self) -> Option<&str> {
        self.error.as_ref().map(|e| e.code.as_str())
    }

    pub fn is_error(&self, code: ErrorCode) -> bool {
        self.error.as_ref().is_some_and(|e| e.is(code))
    }
}
