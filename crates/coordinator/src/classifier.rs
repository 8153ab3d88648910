//! Tool-name classification: security tier inference and read/write access
//! detection used by batch planning.

use crate::config::ClassifierSettings;
use nachos_core::{SecurityTier, ToolCall};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

/// Named substring rule mapping tool names to a tier.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TierRule {
    pub name: String,
    pub patterns: Vec<String>,
    pub tier: SecurityTier,
}

impl TierRule {
    pub fn new(name: &str, patterns: &[&str], tier: SecurityTier) -> Self {
        Self {
            name: name.to_string(),
            patterns: patterns.iter().map(|p| p.to_ascii_lowercase()).collect(),
            tier,
        }
    }

    pub fn matches(&self, tool: &str) -> bool {
        let tool = tool.to_ascii_lowercase();
        self.patterns
            .iter()
            .any(|pattern| tool.contains(&pattern.to_ascii_lowercase()))
    }
}

/// Built-in rules, most restrictive first.
pub fn default_tier_rules() -> Vec<TierRule> {
    vec![
        TierRule::new(
            "code_execution",
            &["code_runner", "code-runner", "coderunner", "run_code", "execute_code"],
            SecurityTier::Restricted,
        ),
        TierRule::new("mutation", &["write", "edit", "patch"], SecurityTier::Elevated),
        TierRule::new("browser", &["browser"], SecurityTier::Standard),
        TierRule::new("read_only", &["read", "list", "get"], SecurityTier::Safe),
    ]
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessKind {
    Read,
    Write,
}

/// How a tier was decided, for logging.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TierSource {
    Override,
    Rule(String),
}

#[derive(Debug, Clone)]
pub struct ToolClassifier {
    overrides: HashMap<String, SecurityTier>,
    rules: Vec<TierRule>,
    write_markers: Vec<String>,
    read_markers: Vec<String>,
    resource_keys: Vec<String>,
}

impl Default for ToolClassifier {
    fn default() -> Self {
        Self::from_settings(&ClassifierSettings::default())
    }
}

impl ToolClassifier {
    pub fn from_settings(settings: &ClassifierSettings) -> Self {
        let mut rules = settings.rules.clone();
        rules.extend(default_tier_rules());
        Self {
            overrides: settings.tier_overrides.clone(),
            rules,
            write_markers: vec!["write".into(), "edit".into(), "patch".into()],
            read_markers: vec!["read".into(), "get".into(), "list".into()],
            resource_keys: settings.resource_keys.clone(),
        }
    }

    pub fn with_override(mut self, tool: impl Into<String>, tier: SecurityTier) -> Self {
        self.overrides.insert(tool.into(), tier);
        self
    }

    /// Rule tried before everything already registered.
    pub fn with_rule(mut self, rule: TierRule) -> Self {
        self.rules.insert(0, rule);
        self
    }

    pub fn rules(&self) -> &[TierRule] {
        &self.rules
    }

    pub fn classify(&self, tool: &str) -> Option<SecurityTier> {
        self.classify_with_source(tool).map(|(tier, _)| tier)
    }

    /// Tier for `tool` and what decided it. `None` when nothing matches.
    pub fn classify_with_source(&self, tool: &str) -> Option<(SecurityTier, TierSource)> {
        if let Some(tier) = self.overrides.get(tool) {
            return Some((*tier, TierSource::Override));
        }
        self.rules
            .iter()
            .find(|rule| rule.matches(tool))
            .map(|rule| (rule.tier, TierSource::Rule(rule.name.clone())))
    }

    /// Explicit tier on the call, else the inferred one.
    pub fn resolve_tier(&self, call: &ToolCall) -> Option<SecurityTier> {
        call.security_tier.or_else(|| self.classify(&call.tool))
    }

    /// Write markers are checked first, so `edit_list` counts as a write.
    pub fn access_kind(&self, tool: &str) -> Option<AccessKind> {
        let tool = tool.to_ascii_lowercase();
        if self.write_markers.iter().any(|m| tool.contains(m.as_str())) {
            Some(AccessKind::Write)
        } else if self.read_markers.iter().any(|m| tool.contains(m.as_str())) {
            Some(AccessKind::Read)
        } else {
            None
        }
    }

    /// `(key, value)` pairs naming the resources `call` touches.
    pub fn resource_ids<'a>(&'a self, call: &'a ToolCall) -> Vec<(&'a str, &'a Value)> {
        self.resource_keys
            .iter()
            .filter_map(|key| {
                call.parameters
                    .get(key)
                    .filter(|value| !value.is_null())
                    .map(|value| (key.as_str(), value))
            })
            .collect()
    }

    /// Whether two calls name the same resource under the same key.
    pub fn same_resource(&self, a: &ToolCall, b: &ToolCall) -> bool {
        let theirs = self.resource_ids(b);
        self.resource_ids(a)
            .iter()
            .any(|(key, value)| theirs.iter().any(|(k, v)| k == key && v == value))
    }
}
