//! Structural validation of policy documents before they reach the evaluator.
//!
//! Validation runs over the raw JSON tree rather than the typed model so that
//! every problem in a document is reported at once, with a path pointing at it.

use crate::types::{Action, ConditionOperator, PolicyDocument, ResourceType};
use regex::Regex;
use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::HashSet;
use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ValidationIssue {
    pub path: String,
    pub message: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ValidationReport {
    pub issues: Vec<ValidationIssue>,
}

impl ValidationReport {
    pub fn is_valid(&self) -> bool {
        self.issues.is_empty()
    }

    fn push(&mut self, path: impl Into<String>, message: impl Into<String>) {
        self.issues.push(ValidationIssue {
            path: path.into(),
            message: message.into(),
        });
    }

    pub fn merge(&mut self, other: ValidationReport) {
        self.issues.extend(other.issues);
    }
}

impl fmt::Display for ValidationReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self
            .issues
            .iter()
            .map(|issue| format!("{}: {}", issue.path, issue.message))
            .collect();
        f.write_str(&parts.join("; "))
    }
}

pub fn validate_document(document: &Value) -> ValidationReport {
    let mut report = ValidationReport::default();

    let Some(root) = document.as_object() else {
        report.push("", "policy document must be an object");
        return report;
    };

    match root.get("version") {
        None => report.push("version", "is required"),
        Some(Value::String(v)) if !v.trim().is_empty() => {}
        Some(_) => report.push("version", "must be a non-empty string"),
    }

    let rules = match root.get("rules") {
        None => {
            report.push("rules", "is required");
            return report;
        }
        Some(Value::Array(rules)) => rules,
        Some(_) => {
            report.push("rules", "must be an array");
            return report;
        }
    };

    let mut seen = HashSet::new();
    for (index, rule) in rules.iter().enumerate() {
        let path = format!("rules[{}]", index);
        let Some(rule) = rule.as_object() else {
            report.push(path, "rule must be an object");
            continue;
        };
        validate_rule(rule, &path, &mut report);

        if let Some(id) = rule.get("id").and_then(Value::as_str) {
            if !seen.insert(id.to_string()) {
                report.push(format!("{}.id", path), format!("duplicate rule id '{}'", id));
            }
        }
    }

    report
}

/// Flag rule ids that occur more than once across a set of documents.
pub fn validate_rule_set(documents: &[PolicyDocument]) -> ValidationReport {
    let mut report = ValidationReport::default();
    let mut seen = HashSet::new();

    for (doc_index, document) in documents.iter().enumerate() {
        for (rule_index, rule) in document.rules.iter().enumerate() {
            if !seen.insert(rule.id.as_str()) {
                report.push(
                    format!("documents[{}].rules[{}].id", doc_index, rule_index),
                    format!("duplicate rule id '{}'", rule.id),
                );
            }
        }
    }

    report
}

fn validate_rule(rule: &Map<String, Value>, path: &str, report: &mut ValidationReport) {
    match rule.get("id") {
        Some(Value::String(id)) if !id.trim().is_empty() => {}
        Some(_) => report.push(format!("{}.id", path), "must be a non-empty string"),
        None => report.push(format!("{}.id", path), "is required"),
    }

    match rule.get("priority") {
        Some(Value::Number(_)) => {}
        Some(_) => report.push(format!("{}.priority", path), "must be a number"),
        None => report.push(format!("{}.priority", path), "is required"),
    }

    match rule.get("match") {
        Some(Value::Object(criteria)) => validate_match(criteria, path, report),
        Some(_) => report.push(format!("{}.match", path), "must be an object"),
        None => report.push(format!("{}.match", path), "is required"),
    }

    match rule.get("effect").and_then(Value::as_str) {
        Some("allow") | Some("deny") => {}
        Some(other) => report.push(
            format!("{}.effect", path),
            format!("must be 'allow' or 'deny', got '{}'", other),
        ),
        None => report.push(format!("{}.effect", path), "is required and must be 'allow' or 'deny'"),
    }

    if let Some(reason) = rule.get("reason") {
        if !reason.is_string() {
            report.push(format!("{}.reason", path), "must be a string");
        }
    }

    match rule.get("conditions") {
        None => {}
        Some(Value::Array(conditions)) => {
            for (index, condition) in conditions.iter().enumerate() {
                validate_condition(condition, &format!("{}.conditions[{}]", path, index), report);
            }
        }
        Some(_) => report.push(format!("{}.conditions", path), "must be an array"),
    }
}

fn validate_match(criteria: &Map<String, Value>, path: &str, report: &mut ValidationReport) {
    if let Some(value) = criteria.get("resource") {
        check_enumerated(value, ResourceType::NAMES, &format!("{}.match.resource", path), report);
    }
    if let Some(value) = criteria.get("action") {
        check_enumerated(value, Action::NAMES, &format!("{}.match.action", path), report);
    }
    if let Some(value) = criteria.get("resourceId") {
        let field = format!("{}.match.resourceId", path);
        match value {
            Value::String(_) => {}
            Value::Array(items) if items.iter().all(Value::is_string) => {}
            _ => report.push(field, "must be a string or an array of strings"),
        }
    }
}

fn check_enumerated(value: &Value, allowed: &[&str], path: &str, report: &mut ValidationReport) {
    let values: Vec<&Value> = match value {
        Value::Array(items) => items.iter().collect(),
        other => vec![other],
    };

    for value in values {
        match value.as_str() {
            Some(name) if allowed.contains(&name) => {}
            Some(name) => report.push(
                path,
                format!("unknown value '{}', expected one of: {}", name, allowed.join(", ")),
            ),
            None => report.push(path, "must be a string or an array of strings"),
        }
    }
}

fn validate_condition(condition: &Value, path: &str, report: &mut ValidationReport) {
    let Some(condition) = condition.as_object() else {
        report.push(path, "condition must be an object");
        return;
    };

    match condition.get("field") {
        Some(Value::String(field)) if !field.is_empty() => {}
        _ => report.push(format!("{}.field", path), "is required and must be a string"),
    }

    let operator = condition.get("operator").and_then(Value::as_str);
    match operator {
        Some(op) if ConditionOperator::NAMES.contains(&op) => {}
        Some(op) => report.push(
            format!("{}.operator", path),
            format!("unknown operator '{}'", op),
        ),
        None => report.push(format!("{}.operator", path), "is required"),
    }

    let Some(value) = condition.get("value") else {
        report.push(format!("{}.value", path), "is required");
        return;
    };

    match operator {
        Some("in") | Some("not_in") if !value.is_array() => {
            report.push(format!("{}.value", path), "must be an array for set operators");
        }
        Some("matches") => match value.as_str() {
            Some(pattern) => {
                if let Err(e) = Regex::new(pattern) {
                    report.push(format!("{}.value", path), format!("invalid pattern: {}", e));
                }
            }
            None => report.push(format!("{}.value", path), "must be a string pattern"),
        },
        _ => {}
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use super::*;
    use serde_json::json;

    fn valid_doc() -> Value {
        json!({
            "version": "1.0",
            "rules": [{
                "id": "deny-shell",
                "priority": 100,
                "match": {"resource": "tool", "resourceId": "shell"},
                "effect": "deny",
                "reason": "Shell access is not allowed"
            }, {
                "id": "allow-reads",
                "priority": 10,
                "match": {"resource": ["tool", "file"], "action": "execute"},
                "conditions": [
                    {"field": "metadata.securityTier", "operator": "in", "value": [0, 1]}
                ],
                "effect": "allow"
            }]
        })
    }

    fn paths(report: &ValidationReport) -> Vec<&str> {
        report.issues.iter().map(|i| i.path.as_str()).collect()
    }

    #[test]
    fn test_valid_document() {
        let report = validate_document(&valid_doc());
        assert!(report.is_valid(), "{}", report);
    }

    #[test]
    fn test_missing_top_level_fields() {
        let report = validate_document(&json!({}));
        assert_eq!(paths(&report), vec!["version", "rules"]);

        let report = validate_document(&json!("nope"));
        assert!(!report.is_valid());
    }

    #[test]
    fn test_rule_field_errors_are_all_reported() {
        let report = validate_document(&json!({
            "version": "1",
            "rules": [{"priority": "high", "match": [], "effect": "maybe"}]
        }));
        assert_eq!(
            paths(&report),
            vec!["rules[0].id", "rules[0].priority", "rules[0].match", "rules[0].effect"]
        );
    }

    #[test]
    fn test_closed_enumerations() {
        let mut doc = valid_doc();
        doc["rules"][0]["match"]["resource"] = json!("satellite");
        doc["rules"][1]["match"]["action"] = json!(["execute", "launch"]);

        let report = validate_document(&doc);
        assert_eq!(
            paths(&report),
            vec!["rules[0].match.resource", "rules[1].match.action"]
        );
        assert!(report.issues[1].message.contains("launch"));
    }

    #[test]
    fn test_duplicate_ids_within_document() {
        let mut doc = valid_doc();
        doc["rules"][1]["id"] = json!("deny-shell");
        let report = validate_document(&doc);
        assert_eq!(paths(&report), vec!["rules[1].id"]);
        assert!(report.issues[0].message.contains("duplicate"));
    }

    #[test]
    fn test_condition_validation() {
        let mut doc = valid_doc();
        doc["rules"][1]["conditions"] = json!([
            {"field": "metadata.path", "operator": "in", "value": "/etc"},
            {"field": "metadata.path", "operator": "matches", "value": "("},
            {"operator": "sounds_like", "value": 1},
            {"field": "x", "operator": "equals"}
        ]);

        let report = validate_document(&doc);
        assert_eq!(
            paths(&report),
            vec![
                "rules[1].conditions[0].value",
                "rules[1].conditions[1].value",
                "rules[1].conditions[2].field",
                "rules[1].conditions[2].operator",
                "rules[1].conditions[3].value",
            ]
        );
    }

    #[test]
    fn test_duplicate_ids_across_documents() {
        let a: PolicyDocument = serde_json::from_value(valid_doc()).unwrap();
        let b = a.clone();
        let report = validate_rule_set(&[a, b]);
        assert_eq!(report.issues.len(), 2);
        assert_eq!(report.issues[0].path, "documents[1].rules[0].id");
    }
}
