use nachos_core::SecurityMode;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Effect {
    Allow,
    Deny,
}

impl Effect {
    pub fn as_str(self) -> &'static str {
        match self {
            Effect::Allow => "allow",
            Effect::Deny => "deny",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResourceType {
    Tool,
    File,
    Network,
    Channel,
    Dm,
    Skill,
    Memory,
    Config,
}

impl ResourceType {
    pub const NAMES: &'static [&'static str] = &[
        "tool", "file", "network", "channel", "dm", "skill", "memory", "config",
    ];
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Action {
    Read,
    Write,
    Execute,
    Delete,
    Send,
    Receive,
    Access,
}

impl Action {
    pub const NAMES: &'static [&'static str] = &[
        "read", "write", "execute", "delete", "send", "receive", "access",
    ];
}

/// A scalar or a list of scalars; matches when the candidate equals any element.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum OneOrMany<T> {
    One(T),
    Many(Vec<T>),
}

impl<T: PartialEq> OneOrMany<T> {
    pub fn contains(&self, candidate: &T) -> bool {
        match self {
            OneOrMany::One(value) => value == candidate,
            OneOrMany::Many(values) => values.contains(candidate),
        }
    }
}

impl OneOrMany<String> {
    pub fn contains_str(&self, candidate: &str) -> bool {
        match self {
            OneOrMany::One(value) => value == candidate,
            OneOrMany::Many(values) => values.iter().any(|v| v == candidate),
        }
    }
}

/// Match criteria. An absent criterion matches everything.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RuleMatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource: Option<OneOrMany<ResourceType>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action: Option<OneOrMany<Action>>,
    #[serde(rename = "resourceId", default, skip_serializing_if = "Option::is_none")]
    pub resource_id: Option<OneOrMany<String>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConditionOperator {
    Equals,
    NotEquals,
    In,
    NotIn,
    Contains,
    Matches,
    StartsWith,
    EndsWith,
}

impl ConditionOperator {
    pub const NAMES: &'static [&'static str] = &[
        "equals",
        "not_equals",
        "in",
        "not_in",
        "contains",
        "matches",
        "starts_with",
        "ends_with",
    ];
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PolicyCondition {
    /// Dot path into the request, e.g. `security_mode` or `metadata.path`.
    pub field: String,
    pub operator: ConditionOperator,
    pub value: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PolicyRule {
    pub id: String,
    pub priority: f64,
    #[serde(rename = "match")]
    pub matcher: RuleMatch,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<PolicyCondition>,
    pub effect: Effect,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PolicyDocument {
    pub version: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub rules: Vec<PolicyRule>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceRef {
    #[serde(rename = "type")]
    pub resource_type: ResourceType,
    pub id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SecurityRequest {
    pub resource: ResourceRef,
    pub action: Action,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    pub session_id: String,
    pub security_mode: SecurityMode,
    #[serde(default)]
    pub metadata: Map<String, Value>,
}

impl SecurityRequest {
    /// Request to execute the named tool.
    pub fn tool_execution(
        tool: impl Into<String>,
        session_id: impl Into<String>,
        security_mode: SecurityMode,
    ) -> Self {
        Self {
            resource: ResourceRef {
                resource_type: ResourceType::Tool,
                id: tool.into(),
            },
            action: Action::Execute,
            user_id: None,
            session_id: session_id.into(),
            security_mode,
            metadata: Map::new(),
        }
    }

    pub fn with_user(mut self, user_id: Option<String>) -> Self {
        self.user_id = user_id;
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SecurityResult {
    pub allowed: bool,
    pub effect: Effect,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rule_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    pub evaluation_time_ms: f64,
}
