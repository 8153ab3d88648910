use crate::classifier::ToolClassifier;
use crate::config::CoordinatorConfig;
use crate::error::CoordinatorError;
use crate::metrics::{self as pipeline_metrics, CallTimer};
use crate::scheduler::{plan_batch, BatchPlan, ExecutionMode};
use nachos_approval::{ApprovalManager, ApprovalResult};
use nachos_cache::{connect_remote, ToolCache};
use nachos_core::{
    tool_request_topic, AuditLogger, BusError, ErrorCode, MessageBus, SecurityMode, SecurityTier,
    ToolCall, ToolResult,
};
use nachos_policy::{load_directory, PolicyDocument, PolicyEvaluator, SecurityRequest, SecurityResult};
use parking_lot::RwLock;
use serde_json::{json, Value};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::{JoinError, JoinHandle};
use tracing::{debug, error, info, warn};

/// Per-batch execution switches.
#[derive(Debug, Clone, Default)]
pub struct ExecuteOptions {
    /// Skip batch planning and run every call concurrently.
    pub force_parallel: bool,
    /// Skip the cache lookup. Fresh results are still written back.
    pub bypass_cache: bool,
    /// Dispatch timeout, ahead of `ToolCall::timeout` and the configured default.
    pub timeout: Option<Duration>,
}

/// What the pipeline decided along the way, for the audit entry.
#[derive(Default)]
struct Trail {
    tier: Option<SecurityTier>,
    mode: Option<SecurityMode>,
    policy: Option<SecurityResult>,
    approval: Option<ApprovalResult>,
    cached: bool,
}

/// Entry point for running tool calls: authorize, gate, consult the cache,
/// dispatch over the bus.
///
/// Cloning is cheap; clones share every collaborator.
#[derive(Clone)]
pub struct ToolCoordinator {
    bus: Arc<dyn MessageBus>,
    config: Arc<CoordinatorConfig>,
    classifier: Arc<ToolClassifier>,
    policy: Option<Arc<RwLock<PolicyEvaluator>>>,
    approvals: Option<Arc<ApprovalManager>>,
    cache: Option<Arc<ToolCache>>,
    audit: Option<Arc<dyn AuditLogger>>,
    shut_down: Arc<AtomicBool>,
}

impl ToolCoordinator {
    pub fn new(bus: Arc<dyn MessageBus>, config: CoordinatorConfig) -> Self {
        let classifier = ToolClassifier::from_settings(&config.classifier);
        Self {
            bus,
            config: Arc::new(config),
            classifier: Arc::new(classifier),
            policy: None,
            approvals: None,
            cache: None,
            audit: None,
            shut_down: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Wire every collaborator from configuration: policies from `policy_dir`
    /// (when given), an approval manager, and the cache with its remote tier
    /// and expiry sweep.
    pub async fn from_config(
        bus: Arc<dyn MessageBus>,
        config: CoordinatorConfig,
        policy_dir: Option<&Path>,
    ) -> Result<Self, CoordinatorError> {
        config.validate()?;

        let approvals = Arc::new(ApprovalManager::new(config.approval_timeout()));
        let mut coordinator = Self::new(bus, config.clone()).with_approvals(approvals);

        if let Some(dir) = policy_dir {
            let documents = load_directory(dir).await?;
            let mut evaluator = PolicyEvaluator::with_default_effect(config.policy.default_effect);
            evaluator.load_policies(&documents);
            coordinator = coordinator.with_policy(evaluator);
        }

        if config.cache.enabled {
            let remote = connect_remote(config.cache.remote_url.as_deref()).await;
            let cache = Arc::new(ToolCache::new(config.cache.to_cache_config(), remote));
            cache.start_cleanup();
            coordinator = coordinator.with_cache(cache);
        }

        info!(
            policy = coordinator.policy.is_some(),
            cache = coordinator.cache.is_some(),
            security_mode = %config.security_mode,
            "tool coordinator ready"
        );
        Ok(coordinator)
    }

    pub fn with_classifier(mut self, classifier: ToolClassifier) -> Self {
        self.classifier = Arc::new(classifier);
        self
    }

    pub fn with_policy(mut self, evaluator: PolicyEvaluator) -> Self {
        self.policy = Some(Arc::new(RwLock::new(evaluator)));
        self
    }

    pub fn with_approvals(mut self, approvals: Arc<ApprovalManager>) -> Self {
        self.approvals = Some(approvals);
        self
    }

    pub fn with_cache(mut self, cache: Arc<ToolCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn with_audit(mut self, audit: Arc<dyn AuditLogger>) -> Self {
        self.audit = Some(audit);
        self
    }

    pub fn config(&self) -> &CoordinatorConfig {
        &self.config
    }

    pub fn classifier(&self) -> &ToolClassifier {
        &self.classifier
    }

    pub fn approvals(&self) -> Option<&Arc<ApprovalManager>> {
        self.approvals.as_ref()
    }

    pub fn cache(&self) -> Option<&Arc<ToolCache>> {
        self.cache.as_ref()
    }

    /// Swap in a new rule set. Returns the number of rules now active, or
    /// `None` when no policy engine is configured.
    pub fn reload_policies(&self, documents: &[PolicyDocument]) -> Option<usize> {
        let policy = self.policy.as_ref()?;
        let mut evaluator = policy.write();
        evaluator.load_policies(documents);
        info!(rules = evaluator.rule_count(), "policies reloaded");
        Some(evaluator.rule_count())
    }

    /// Run a batch. Results line up with `calls` by index.
    ///
    /// Parallel batches isolate every call on its own task. Sequential
    /// batches run every call to completion in input order, whatever the
    /// earlier calls returned.
    pub async fn execute_tools(&self, calls: Vec<ToolCall>, options: ExecuteOptions) -> Vec<ToolResult> {
        if calls.is_empty() {
            return Vec::new();
        }

        let plan = if options.force_parallel {
            BatchPlan::forced()
        } else {
            plan_batch(&calls, &self.classifier)
        };
        debug!(
            calls = calls.len(),
            mode = plan.mode.as_str(),
            reason = %plan.reason,
            "executing tool batch"
        );
        pipeline_metrics::record_batch(plan.mode.as_str(), calls.len());

        let mut results = Vec::with_capacity(calls.len());
        match plan.mode {
            ExecutionMode::Parallel => {
                let handles: Vec<(ToolCall, JoinHandle<ToolResult>)> = calls
                    .into_iter()
                    .map(|call| {
                        let handle = self.spawn_single(call.clone(), options.clone());
                        (call, handle)
                    })
                    .collect();
                for (call, handle) in handles {
                    results.push(self.settle(&call, handle.await));
                }
            }
            ExecutionMode::Sequential => {
                for call in calls {
                    let joined = self.spawn_single(call.clone(), options.clone()).await;
                    results.push(self.settle(&call, joined));
                }
            }
        }
        results
    }

    fn spawn_single(&self, call: ToolCall, options: ExecuteOptions) -> JoinHandle<ToolResult> {
        let coordinator = self.clone();
        tokio::spawn(async move { coordinator.execute_single(&call, &options).await })
    }

    /// Run one call through the full pipeline. Never fails: every outcome is
    /// a `ToolResult` carrying `metadata.duration` and, when resolved,
    /// `metadata.securityTier`.
    pub async fn execute_single(&self, call: &ToolCall, options: &ExecuteOptions) -> ToolResult {
        let timer = CallTimer::start();
        let mut trail = Trail::default();

        let mut result = match self.run_pipeline(call, options, &mut trail).await {
            Ok(result) => result,
            Err(e) => {
                error!(
                    tool = %call.tool,
                    session_id = ?call.session_id,
                    call_id = %call.id,
                    error = %e,
                    "tool call failed"
                );
                ToolResult::failure(ErrorCode::ExecutionError, e.to_string())
            }
        };

        result.metadata.duration = timer.finish();
        if let Some(tier) = trail.tier {
            result
                .metadata
                .extra
                .insert(TIER_KEY.to_string(), json!(tier.as_u8()));
        }

        pipeline_metrics::record_tool_call(&call.tool, &result);
        self.audit(call, &trail, &result);
        result
    }

    async fn run_pipeline(
        &self,
        call: &ToolCall,
        options: &ExecuteOptions,
        trail: &mut Trail,
    ) -> Result<ToolResult, CoordinatorError> {
        // 1. Session
        let Some(session_id) = call.session() else {
            warn!(tool = %call.tool, call_id = %call.id, "tool call rejected: missing session id");
            return Ok(ToolResult::failure(
                ErrorCode::MissingSession,
                "Tool call requires a session id",
            ));
        };

        // 2. Tier and mode
        let tier = self.classifier.resolve_tier(call);
        let mode = call.security_mode.unwrap_or(self.config.security_mode);
        trail.tier = tier;
        trail.mode = Some(mode);

        // 3. Policy
        if let Some(policy) = &self.policy {
            let request = security_request(call, session_id, mode, tier);
            let decision = policy.read().evaluate(&request);
            trail.policy = Some(decision.clone());

            if !decision.allowed {
                warn!(
                    tool = %call.tool,
                    session_id,
                    call_id = %call.id,
                    rule_id = ?decision.rule_id,
                    "tool call denied by policy"
                );
                let message = decision
                    .reason
                    .clone()
                    .unwrap_or_else(|| "Denied by policy".to_string());
                return Ok(ToolResult::failure(ErrorCode::PolicyDenied, message).with_details(
                    json!({"ruleId": decision.rule_id, "reason": decision.reason}),
                ));
            }
        }

        // 4. Approval
        if let (Some(approvals), Some(tier)) = (&self.approvals, tier) {
            if approvals.requires_approval(tier) {
                let decision = approvals.request_approval(session_id, call, tier).await;
                trail.approval = Some(decision.clone());

                if !decision.approved {
                    warn!(
                        tool = %call.tool,
                        session_id,
                        call_id = %call.id,
                        reason = ?decision.reason,
                        "tool call not approved"
                    );
                    let message = decision
                        .reason
                        .clone()
                        .unwrap_or_else(|| "Approval denied".to_string());
                    return Ok(ToolResult::failure(ErrorCode::ApprovalDenied, message)
                        .with_details(json!({"userId": decision.user_id})));
                }
            }
        }

        // 5. Cache
        if !options.bypass_cache {
            if let Some(cache) = &self.cache {
                if let Some(mut hit) = cache.get(call).await {
                    debug!(tool = %call.tool, session_id, call_id = %call.id, "tool result served from cache");
                    hit.metadata.cached = Some(true);
                    trail.cached = true;
                    return Ok(hit);
                }
            }
        }

        // 6-7. Dispatch
        let timeout = options
            .timeout
            .or_else(|| call.timeout.map(Duration::from_millis))
            .unwrap_or_else(|| self.config.tool_timeout());
        let topic = tool_request_topic(&call.tool);
        let payload = dispatch_payload(call, session_id, mode);

        let reply = match self.bus.request(&topic, payload, timeout).await {
            Ok(reply) => reply,
            Err(BusError::Timeout { .. }) => {
                warn!(tool = %call.tool, session_id, call_id = %call.id, timeout_ms = timeout.as_millis() as u64, "tool call timed out");
                return Ok(ToolResult::failure(
                    ErrorCode::Timeout,
                    format!("Tool '{}' timed out after {}ms", call.tool, timeout.as_millis()),
                ));
            }
            Err(BusError::NoResponders(_)) => {
                warn!(tool = %call.tool, session_id, call_id = %call.id, "no responder for tool");
                return Ok(ToolResult::failure(
                    ErrorCode::ToolNotAvailable,
                    format!("Tool '{}' is not available", call.tool),
                ));
            }
            Err(other) => return Err(other.into()),
        };

        let Some(result) = decode_reply(reply) else {
            warn!(tool = %call.tool, session_id, call_id = %call.id, "tool returned an invalid response");
            return Ok(ToolResult::failure(
                ErrorCode::InvalidToolResponse,
                format!("Tool '{}' returned an invalid response", call.tool),
            ));
        };

        // 8. Cache write
        if result.success {
            if let Some(cache) = &self.cache {
                let ttl = call.cache_ttl.map(Duration::from_secs);
                cache.set(call, &result, ttl).await;
            }
        }

        Ok(result)
    }

    /// Cancel the session's pending approvals. Returns how many were cancelled.
    pub fn end_session(&self, session_id: &str) -> usize {
        let cancelled = self
            .approvals
            .as_ref()
            .map_or(0, |approvals| approvals.cancel_session_requests(session_id));
        if cancelled > 0 {
            info!(session_id, cancelled, "pending approvals cancelled for ended session");
        }
        cancelled
    }

    /// Deny outstanding approvals and stop the cache. Later calls are no-ops.
    pub async fn shutdown(&self) {
        if self.shut_down.swap(true, Ordering::AcqRel) {
            return;
        }
        let cancelled = self
            .approvals
            .as_ref()
            .map_or(0, |approvals| approvals.cancel_all("Coordinator shutting down"));
        if let Some(cache) = &self.cache {
            cache.shutdown().await;
        }
        info!(cancelled_approvals = cancelled, "tool coordinator shut down");
    }

    /// Unwrap a joined call. Panics and cancellations become error results
    /// that are still metered and audited.
    fn settle(&self, call: &ToolCall, joined: Result<ToolResult, JoinError>) -> ToolResult {
        let tool = call.tool.as_str();
        let result = match joined {
            Ok(result) => return result,
            Err(e) if e.is_panic() => {
                error!(tool, call_id = %call.id, "tool call panicked");
                ToolResult::failure(ErrorCode::ExecutionError, format!("Tool call '{}' panicked", tool))
            }
            Err(_) => {
                warn!(tool, call_id = %call.id, "tool call task was cancelled");
                ToolResult::failure(ErrorCode::UnknownError, format!("Tool call '{}' was cancelled", tool))
            }
        };
        pipeline_metrics::record_tool_call(tool, &result);
        self.audit(call, &Trail::default(), &result);
        result
    }

    fn audit(&self, call: &ToolCall, trail: &Trail, result: &ToolResult) {
        let Some(audit) = self.audit.clone() else {
            return;
        };

        let entry = json!({
            "timestamp": chrono::Utc::now().to_rfc3339(),
            "sessionId": call.session_id,
            "userId": call.user_id,
            "callId": call.id,
            "tool": call.tool,
            "securityTier": trail.tier.map(SecurityTier::as_u8),
            "securityMode": trail.mode.map(SecurityMode::as_str),
            "policy": trail.policy.as_ref().map(|d| json!({
                "allowed": d.allowed,
                "ruleId": d.rule_id,
                "reason": d.reason,
            })),
            "approval": trail.approval.as_ref().map(|a| json!({
                "approved": a.approved,
                "reason": a.reason,
                "userId": a.user_id,
            })),
            "cached": trail.cached,
            "result": {
                "success": result.success,
                "errorCode": result.error_code(),
                "duration": result.metadata.duration,
            },
        });

        // Fire and forget
        tokio::spawn(async move {
            audit.log(entry).await;
        });
    }
}

/// Metadata key carrying the resolved tier. Never taken from parameters.
const TIER_KEY: &str = "securityTier";

/// Policy request for executing `call`: parameters and the resolved tier
/// (as `securityTier`) become request metadata.
pub fn security_request(
    call: &ToolCall,
    session_id: &str,
    mode: SecurityMode,
    tier: Option<SecurityTier>,
) -> SecurityRequest {
    let mut request = SecurityRequest::tool_execution(&call.tool, session_id, mode)
        .with_user(call.user_id.clone());
    if let Value::Object(parameters) = &call.parameters {
        for (key, value) in parameters.iter().filter(|(key, _)| key.as_str() != TIER_KEY) {
            request = request.with_metadata(key.clone(), value.clone());
        }
    }
    if let Some(tier) = tier {
        request = request.with_metadata(TIER_KEY, json!(tier.as_u8()));
    }
    request
}

fn dispatch_payload(call: &ToolCall, session_id: &str, mode: SecurityMode) -> Value {
    let mut payload = json!({
        "callId": call.id,
        "sessionId": session_id,
        "securityMode": mode.as_str(),
        "parameters": call.parameters,
    });
    if let Some(user_id) = &call.user_id {
        payload["userId"] = json!(user_id);
    }
    if let Some(sandbox) = call.sandbox {
        payload["sandbox"] = json!(sandbox);
    }
    payload
}

/// Accept a bare `ToolResult` or one wrapped as `{"payload": ...}`.
fn decode_reply(reply: Value) -> Option<ToolResult> {
    let body = match reply {
        Value::Object(mut envelope) if !envelope.contains_key("success") => {
            envelope.remove("payload")?
        }
        other => other,
    };
    serde_json::from_value(body).ok()
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_reply_shapes() {
        let bare = json!({"success": true, "content": [{"type": "text", "text": "ok"}]});
        assert_eq!(decode_reply(bare), Some(ToolResult::text("ok")));

        let enveloped = json!({"payload": {"success": false, "error": {"code": "ENOENT", "message": "missing"}}});
        let decoded = decode_reply(enveloped).unwrap();
        assert!(!decoded.success);
        assert_eq!(decoded.error_code(), Some("ENOENT"));

        assert_eq!(decode_reply(json!({"output": "text"})), None);
        assert_eq!(decode_reply(json!({"payload": "text"})), None);
        assert_eq!(decode_reply(json!("text")), None);
        assert_eq!(decode_reply(json!({"success": "yes"})), None);
    }

    #[test]
    fn test_dispatch_payload_fields() {
        let call = ToolCall::new("s1", "filesystem_read", json!({"path": "/a"}))
            .with_id("call-1")
            .with_user("u1")
            .with_sandbox(true);
        let payload = dispatch_payload(&call, "s1", SecurityMode::Strict);
        assert_eq!(
            payload,
            json!({
                "callId": "call-1",
                "sessionId": "s1",
                "userId": "u1",
                "securityMode": "strict",
                "sandbox": true,
                "parameters": {"path": "/a"},
            })
        );

        let minimal = dispatch_payload(&ToolCall::new("s1", "t", json!({})), "s1", SecurityMode::Standard);
        assert!(minimal.get("userId").is_none());
        assert!(minimal.get("sandbox").is_none());
    }

    #[test]
    fn test_security_request_carries_parameters_and_tier() {
        let call = ToolCall::new("s1", "filesystem_write", json!({"path": "/etc/hosts"}));
        let request = security_request(&call, "s1", SecurityMode::Standard, Some(SecurityTier::Elevated));
        assert_eq!(request.resource.id, "filesystem_write");
        assert_eq!(request.metadata["path"], json!("/etc/hosts"));
        assert_eq!(request.metadata["securityTier"], json!(2));
    }

    #[test]
    fn test_security_request_ignores_tier_parameter() {
        let call = ToolCall::new("s1", "mystery_tool", json!({"securityTier": 0, "path": "/a"}));

        let unresolved = security_request(&call, "s1", SecurityMode::Standard, None);
        assert!(!unresolved.metadata.contains_key("securityTier"));
        assert_eq!(unresolved.metadata["path"], json!("/a"));

        let resolved = security_request(&call, "s1", SecurityMode::Standard, Some(SecurityTier::Dangerous));
        assert_eq!(resolved.metadata["securityTier"], json!(4));
    }
}
