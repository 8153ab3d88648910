use crate::types::{
    ConditionOperator, Effect, PolicyCondition, PolicyDocument, PolicyRule, SecurityRequest,
    SecurityResult,
};
use parking_lot::Mutex;
use regex::Regex;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::time::Instant;
use tracing::debug;

/// Running evaluation counters.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct EvaluationStats {
    pub evaluations: u64,
    pub average_time_ms: f64,
}

#[derive(Default)]
struct StatsState {
    evaluations: u64,
    total_time_ms: f64,
}

/// First-match rule evaluator over priority-sorted rules.
///
/// Input documents are trusted to be validated already; see
/// [`crate::validator`].
pub struct PolicyEvaluator {
    rules: Vec<PolicyRule>,
    default_effect: Effect,
    stats: Mutex<StatsState>,
    patterns: Mutex<HashMap<String, Option<Regex>>>,
}

impl PolicyEvaluator {
    pub fn new() -> Self {
        Self::with_default_effect(Effect::Deny)
    }

    pub fn with_default_effect(default_effect: Effect) -> Self {
        Self {
            rules: Vec::new(),
            default_effect,
            stats: Mutex::new(StatsState::default()),
            patterns: Mutex::new(HashMap::new()),
        }
    }

    /// Replace the rule set with every rule of `documents`, highest priority first.
    /// Equal priorities keep load order.
    pub fn load_policies(&mut self, documents: &[PolicyDocument]) {
        let mut rules: Vec<PolicyRule> = documents
            .iter()
            .flat_map(|doc| doc.rules.iter().cloned())
            .collect();
        // sort_by is stable
        rules.sort_by(|a, b| b.priority.total_cmp(&a.priority));
        self.rules = rules;
        self.patterns.lock().clear();
        debug!(rules = self.rules.len(), "policies loaded");
    }

    pub fn rules(&self) -> &[PolicyRule] {
        &self.rules
    }

    pub fn rule_count(&self) -> usize {
        self.rules.len()
    }

    pub fn default_effect(&self) -> Effect {
        self.default_effect
    }

    pub fn evaluate(&self, request: &SecurityRequest) -> SecurityResult {
        let start = Instant::now();

        let matched = self.rules.iter().find(|rule| self.rule_matches(rule, request));

        let mut result = match matched {
            Some(rule) => SecurityResult {
                allowed: rule.effect == Effect::Allow,
                effect: rule.effect,
                rule_id: Some(rule.id.clone()),
                reason: match rule.effect {
                    Effect::Deny => rule.reason.clone(),
                    Effect::Allow => None,
                },
                evaluation_time_ms: 0.0,
            },
            None => SecurityResult {
                allowed: self.default_effect == Effect::Allow,
                effect: self.default_effect,
                rule_id: None,
                reason: match self.default_effect {
                    Effect::Deny => Some("No matching policy rule; default deny".to_string()),
                    Effect::Allow => None,
                },
                evaluation_time_ms: 0.0,
            },
        };

        let elapsed_ms = start.elapsed().as_secs_f64() * 1000.0;
        result.evaluation_time_ms = elapsed_ms;
        self.record(elapsed_ms);
        metrics::counter!("nachos_policy_evaluations_total", 1, "effect" => result.effect.as_str());

        debug!(
            resource = %request.resource.id,
            effect = result.effect.as_str(),
            rule_id = result.rule_id.as_deref().unwrap_or("<default>"),
            "policy evaluated"
        );
        result
    }

    pub fn stats(&self) -> EvaluationStats {
        let stats = self.stats.lock();
        EvaluationStats {
            evaluations: stats.evaluations,
            average_time_ms: if stats.evaluations == 0 {
                0.0
            } else {
                stats.total_time_ms / stats.evaluations as f64
            },
        }
    }

    pub fn reset_stats(&self) {
        *self.stats.lock() = StatsState::default();
    }

    fn record(&self, elapsed_ms: f64) {
        let mut stats = self.stats.lock();
        stats.evaluations += 1;
        stats.total_time_ms += elapsed_ms;
    }

    fn rule_matches(&self, rule: &PolicyRule, request: &SecurityRequest) -> bool {
        let criteria = &rule.matcher;

        if let Some(resource) = &criteria.resource {
            if !resource.contains(&request.resource.resource_type) {
                return false;
            }
        }
        if let Some(action) = &criteria.action {
            if !action.contains(&request.action) {
                return false;
            }
        }
        if let Some(resource_id) = &criteria.resource_id {
            if !resource_id.contains_str(&request.resource.id) {
                return false;
            }
        }

        rule.conditions
            .iter()
            .all(|condition| self.condition_holds(condition, request))
    }

    fn condition_holds(&self, condition: &PolicyCondition, request: &SecurityRequest) -> bool {
        let actual = resolve_field(request, &condition.field);
        let actual = actual.as_ref();
        let expected = &condition.value;

        match condition.operator {
            ConditionOperator::Equals => actual.is_some_and(|a| loose_eq(a, expected)),
            ConditionOperator::NotEquals => !actual.is_some_and(|a| loose_eq(a, expected)),
            ConditionOperator::In => match expected.as_array() {
                Some(options) => actual.is_some_and(|a| options.iter().any(|o| loose_eq(a, o))),
                None => false,
            },
            ConditionOperator::NotIn => match expected.as_array() {
                Some(options) => !actual.is_some_and(|a| options.iter().any(|o| loose_eq(a, o))),
                None => false,
            },
            ConditionOperator::Contains => match actual {
                Some(Value::String(haystack)) => {
                    expected.as_str().is_some_and(|needle| haystack.contains(needle))
                }
                Some(Value::Array(items)) => items.iter().any(|item| loose_eq(item, expected)),
                _ => false,
            },
            ConditionOperator::Matches => match (actual.and_then(Value::as_str), expected.as_str()) {
                (Some(text), Some(pattern)) => self.is_match(pattern, text),
                _ => false,
            },
            ConditionOperator::StartsWith => {
                match (actual.and_then(Value::as_str), expected.as_str()) {
                    (Some(text), Some(prefix)) => text.starts_with(prefix),
                    _ => false,
                }
            }
            ConditionOperator::EndsWith => {
                match (actual.and_then(Value::as_str), expected.as_str()) {
                    (Some(text), Some(suffix)) => text.ends_with(suffix),
                    _ => false,
                }
            }
        }
    }

    // Invalid patterns are remembered as `None` and never match.
    fn is_match(&self, pattern: &str, text: &str) -> bool {
        let mut patterns = self.patterns.lock();
        let compiled = patterns
            .entry(pattern.to_string())
            .or_insert_with(|| Regex::new(pattern).ok());
        compiled.as_ref().is_some_and(|re| re.is_match(text))
    }
}

impl Default for PolicyEvaluator {
    fn default() -> Self {
        Self::new()
    }
}

/// Resolve a condition field path against the request. Unknown paths are `None`.
fn resolve_field(request: &SecurityRequest, path: &str) -> Option<Value> {
    match path {
        "security_mode" | "securityMode" => {
            Some(Value::String(request.security_mode.as_str().to_string()))
        }
        "user_id" | "userId" => request.user_id.clone().map(Value::String),
        "session_id" | "sessionId" => Some(Value::String(request.session_id.clone())),
        "resource_type" | "resource.type" => serde_json::to_value(request.resource.resource_type).ok(),
        "resource_id" | "resource.id" => Some(Value::String(request.resource.id.clone())),
        "action" => serde_json::to_value(request.action).ok(),
        _ => path
            .strip_prefix("metadata.")
            .and_then(|rest| lookup(&request.metadata, rest))
            .cloned(),
    }
}

fn lookup<'a>(root: &'a Map<String, Value>, path: &str) -> Option<&'a Value> {
    let mut segments = path.split('.');
    let mut current = root.get(segments.next()?)?;
    for segment in segments {
        current = match current {
            Value::Object(map) => map.get(segment)?,
            Value::Array(items) => items.get(segment.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }
    Some(current)
}

/// JSON equality that compares numbers by value, so `1 == 1.0`.
fn loose_eq(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64() == y.as_f64(),
        _ => a == b,
    }
}
