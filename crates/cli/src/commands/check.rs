use super::validate::load_policies;
use anyhow::{anyhow, bail, Context, Result};
use nachos_approval::requires_approval;
use nachos_core::{SecurityMode, ToolCall};
use nachos_coordinator::{security_request, CoordinatorConfig, ToolClassifier};
use nachos_policy::PolicyEvaluator;
use serde_json::{json, Map, Value};
use std::path::PathBuf;

/// Offline policy dry run for one tool call.
#[derive(Debug, Clone, PartialEq)]
pub struct CheckArgs {
    pub policies: PathBuf,
    pub tool: String,
    pub mode: Option<SecurityMode>,
    pub session: String,
    pub user: Option<String>,
    pub params: Map<String, Value>,
    pub config: Option<PathBuf>,
}

impl CheckArgs {
    pub fn parse(args: &[String]) -> Result<Self> {
        let mut policies = None;
        let mut tool = None;
        let mut mode = None;
        let mut session = "cli".to_string();
        let mut user = None;
        let mut params = Map::new();
        let mut config = None;

        let mut iter = args.iter();
        while let Some(flag) = iter.next() {
            let mut value = || {
                iter.next()
                    .cloned()
                    .ok_or_else(|| anyhow!("{} needs a value", flag))
            };
            match flag.as_str() {
                "--policies" => policies = Some(PathBuf::from(value()?)),
                "--tool" => tool = Some(value()?),
                "--mode" => {
                    let raw = value()?;
                    mode = Some(raw.parse::<SecurityMode>().map_err(|e| anyhow!(e))?);
                }
                "--session" => session = value()?,
                "--user" => user = Some(value()?),
                "--config" => config = Some(PathBuf::from(value()?)),
                "--param" => {
                    let raw = value()?;
                    let (key, val) = parse_param(&raw)?;
                    params.insert(key, val);
                }
                other => bail!("unknown option '{}'", other),
            }
        }

        Ok(Self {
            policies: policies.context("--policies is required")?,
            tool: tool.context("--tool is required")?,
            mode,
            session,
            user,
            params,
            config,
        })
    }
}

/// `key=value`; the value is read as JSON when it parses, else as a string.
fn parse_param(raw: &str) -> Result<(String, Value)> {
    let (key, value) = raw
        .split_once('=')
        .ok_or_else(|| anyhow!("--param expects key=value, got '{}'", raw))?;
    if key.is_empty() {
        bail!("--param key is empty in '{}'", raw);
    }
    let value = serde_json::from_str(value).unwrap_or_else(|_| Value::String(value.to_string()));
    Ok((key.to_string(), value))
}

/// Evaluate the call against the policies and print the decision.
/// Returns whether the call would be allowed.
pub async fn run(args: &CheckArgs) -> Result<bool> {
    let decision = evaluate(args).await?;
    println!("{}", serde_json::to_string_pretty(&decision)?);
    Ok(decision["decision"]["allowed"].as_bool().unwrap_or(false))
}

async fn evaluate(args: &CheckArgs) -> Result<Value> {
    let config = match &args.config {
        Some(path) => CoordinatorConfig::load(path)?,
        None => CoordinatorConfig::from_env()?,
    };
    let documents = load_policies(&args.policies).await?;

    let mut evaluator = PolicyEvaluator::with_default_effect(config.policy.default_effect);
    evaluator.load_policies(&documents);
    let classifier = ToolClassifier::from_settings(&config.classifier);

    let mut call = ToolCall::new(args.session.clone(), args.tool.clone(), Value::Object(args.params.clone()));
    call.user_id = args.user.clone();
    let tier = classifier.resolve_tier(&call);
    let mode = args.mode.unwrap_or(config.security_mode);

    let request = security_request(&call, &args.session, mode, tier);
    let result = evaluator.evaluate(&request);

    Ok(json!({
        "tool": args.tool,
        "securityMode": mode.as_str(),
        "securityTier": tier.map(|t| t.name()),
        "requiresApproval": tier.is_some_and(requires_approval),
        "rules": evaluator.rule_count(),
        "decision": result,
    }))
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn args(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_parse_args() {
        let parsed = CheckArgs::parse(&args(&[
            "--policies", "policies/", "--tool", "filesystem_write", "--mode", "strict",
            "--param", "path=/etc/hosts", "--param", "mode=420", "--param", "opts={\"a\":1}",
        ]))
        .unwrap();

        assert_eq!(parsed.tool, "filesystem_write");
        assert_eq!(parsed.mode, Some(SecurityMode::Strict));
        assert_eq!(parsed.session, "cli");
        assert_eq!(parsed.params["path"], json!("/etc/hosts"));
        assert_eq!(parsed.params["mode"], json!(420));
        assert_eq!(parsed.params["opts"], json!({"a": 1}));
    }

    #[test]
    fn test_parse_errors() {
        assert!(CheckArgs::parse(&args(&["--tool", "x"])).is_err());
        assert!(CheckArgs::parse(&args(&["--policies", "p", "--tool"])).is_err());
        assert!(CheckArgs::parse(&args(&["--policies", "p", "--tool", "x", "--param", "novalue"])).is_err());
        assert!(CheckArgs::parse(&args(&["--policies", "p", "--tool", "x", "--mode", "loose"])).is_err());
        assert!(CheckArgs::parse(&args(&["--policies", "p", "--tool", "x", "--bogus"])).is_err());
    }

    #[tokio::test]
    async fn test_evaluate_against_policy_file() {
        let dir = TempDir::new().unwrap();
        let policy = dir.path().join("policy.yaml");
        tokio::fs::write(
            &policy,
            r#"
version: "1.0"
rules:
  - id: deny-shell
    priority: 100
    match: { resource: tool, resourceId: shell }
    effect: deny
    reason: Shell access is not allowed
  - id: allow-tools
    priority: 0
    match: { resource: tool }
    effect: allow
"#,
        )
        .await
        .unwrap();

        let policy_arg = policy.display().to_string();
        let mut check = CheckArgs::parse(&args(&["--tool", "shell", "--policies", &policy_arg])).unwrap();

        let denied = evaluate(&check).await.unwrap();
        assert_eq!(denied["decision"]["allowed"], json!(false));
        assert_eq!(denied["decision"]["ruleId"], json!("deny-shell"));

        check.tool = "code_runner".into();
        let allowed = evaluate(&check).await.unwrap();
        assert_eq!(allowed["decision"]["allowed"], json!(true));
        assert_eq!(allowed["securityTier"], json!("RESTRICTED"));
        assert_eq!(allowed["requiresApproval"], json!(true));
    }
}
