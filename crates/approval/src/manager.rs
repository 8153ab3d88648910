use crate::command::{parse_approval_command, ApprovalCommand};
use crate::format::format_approval_message;
use crate::types::{ApprovalEvent, ApprovalOutcome, ApprovalRequest, ApprovalResult};
use chrono::Utc;
use nachos_core::{SecurityTier, ToolCall};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::{broadcast, oneshot};
use tokio::time::timeout;
use tracing::{debug, info, warn};

pub const DEFAULT_APPROVAL_TIMEOUT: Duration = Duration::from_millis(120_000);

const EVENT_CAPACITY: usize = 256;

/// Whether calls of this tier must wait for a human decision.
pub fn requires_approval(tier: SecurityTier) -> bool {
    tier >= SecurityTier::Restricted
}

struct Pending {
    request: ApprovalRequest,
    responder: oneshot::Sender<ApprovalResult>,
}

/// Tracks outstanding approval requests for this process.
///
/// Each request owns a oneshot channel. `approve`/`deny`/cancellation resolve
/// it through the pending map; the waiting side races it against a timer.
/// Entries leave the map exactly once, whichever way they end.
pub struct ApprovalManager {
    pending: Mutex<HashMap<String, Pending>>,
    timeout: Duration,
    events: broadcast::Sender<ApprovalEvent>,
}

impl ApprovalManager {
    pub fn new(timeout: Duration) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            pending: Mutex::new(HashMap::new()),
            timeout,
            events,
        }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn requires_approval(&self, tier: SecurityTier) -> bool {
        requires_approval(tier)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ApprovalEvent> {
        self.events.subscribe()
    }

    /// Open a request, announce it, and wait for approve/deny/timeout.
    pub async fn request_approval(
        &self,
        session_id: &str,
        call: &ToolCall,
        tier: SecurityTier,
    ) -> ApprovalResult {
        let (request_id, mut receiver) = self.open(session_id, call, tier);
        let _guard = PendingGuard {
            manager: self,
            request_id: &request_id,
        };

        match timeout(self.timeout, &mut receiver).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => ApprovalResult::denied("Approval request was cancelled", None),
            Err(_) => {
                if self.finish(&request_id, ApprovalOutcome::TimedOut, timed_out()) {
                    warn!(request_id = %request_id, tool = %call.tool, "approval request timed out");
                    return timed_out();
                }
                // Resolved concurrently with the timer firing; honor the decision.
                receiver.try_recv().unwrap_or_else(|_| timed_out())
            }
        }
    }

    pub fn approve(&self, request_id: &str, user_id: Option<&str>) -> bool {
        let result = ApprovalResult::approved(user_id.map(str::to_string));
        self.finish(request_id, ApprovalOutcome::Approved, result)
    }

    pub fn deny(&self, request_id: &str, reason: Option<&str>, user_id: Option<&str>) -> bool {
        let result = ApprovalResult::denied(
            reason.unwrap_or("Denied by user"),
            user_id.map(str::to_string),
        );
        self.finish(request_id, ApprovalOutcome::Denied, result)
    }

    /// Deny every pending request of a session. Returns how many were pending.
    pub fn cancel_session_requests(&self, session_id: &str) -> usize {
        let ids: Vec<String> = self
            .pending
            .lock()
            .values()
            .filter(|p| p.request.session_id == session_id)
            .map(|p| p.request.id.clone())
            .collect();

        let cancelled = ids
            .iter()
            .filter(|id| {
                self.finish(
                    id,
                    ApprovalOutcome::Cancelled,
                    ApprovalResult::denied("Session ended", None),
                )
            })
            .count();

        if cancelled > 0 {
            info!(session_id, cancelled, "cancelled pending approvals for session");
        }
        cancelled
    }

    /// Deny everything still pending, e.g. on shutdown.
    pub fn cancel_all(&self, reason: &str) -> usize {
        let ids: Vec<String> = self.pending.lock().keys().cloned().collect();
        ids.iter()
            .filter(|id| {
                self.finish(
                    id,
                    ApprovalOutcome::Cancelled,
                    ApprovalResult::denied(reason, None),
                )
            })
            .count()
    }

    /// Apply an `/approve` or `/deny` chat command. `None` when `text` is not one.
    pub fn handle_command(&self, text: &str, user_id: Option<&str>) -> Option<bool> {
        let resolved = match parse_approval_command(text)? {
            ApprovalCommand::Approve { request_id } => self.approve(&request_id, user_id),
            ApprovalCommand::Deny { request_id, reason } => {
                self.deny(&request_id, reason.as_deref(), user_id)
            }
        };
        Some(resolved)
    }

    pub fn get(&self, request_id: &str) -> Option<ApprovalRequest> {
        self.pending
            .lock()
            .get(request_id)
            .map(|p| p.request.clone())
    }

    /// Pending requests, oldest first.
    pub fn pending(&self) -> Vec<ApprovalRequest> {
        let mut requests: Vec<ApprovalRequest> = self
            .pending
            .lock()
            .values()
            .map(|p| p.request.clone())
            .collect();
        requests.sort_by_key(|r| r.created_at);
        requests
    }

    pub fn pending_for_session(&self, session_id: &str) -> Vec<ApprovalRequest> {
        self.pending()
            .into_iter()
            .filter(|r| r.session_id == session_id)
            .collect()
    }

    pub fn pending_count(&self) -> usize {
        self.pending.lock().len()
    }

    /// Human-readable prompt for a request, using this manager's timeout.
    pub fn format_request(&self, request: &ApprovalRequest) -> String {
        format_approval_message(request, self.timeout)
    }

    fn open(
        &self,
        session_id: &str,
        call: &ToolCall,
        tier: SecurityTier,
    ) -> (String, oneshot::Receiver<ApprovalResult>) {
        let (responder, receiver) = oneshot::channel();
        let request = ApprovalRequest {
            id: uuid::Uuid::new_v4().to_string(),
            tool_call: call.clone(),
            security_tier: tier,
            session_id: session_id.to_string(),
            created_at: Utc::now(),
        };
        let request_id = request.id.clone();

        self.pending.lock().insert(
            request_id.clone(),
            Pending {
                request: request.clone(),
                responder,
            },
        );

        info!(
            request_id = %request_id,
            session_id,
            tool = %call.tool,
            tier = tier.name(),
            "approval requested"
        );
        let _ = self.events.send(ApprovalEvent::Requested(request));

        (request_id, receiver)
    }

    /// Remove a pending request and deliver its result. `false` if it was
    /// already resolved or never existed.
    fn finish(&self, request_id: &str, outcome: ApprovalOutcome, result: ApprovalResult) -> bool {
        let Some(pending) = self.pending.lock().remove(request_id) else {
            debug!(request_id, outcome = outcome.as_str(), "no pending approval with this id");
            return false;
        };

        metrics::counter!("nachos_approvals_total", 1, "outcome" => outcome.as_str());
        let _ = self.events.send(ApprovalEvent::Resolved {
            request_id: request_id.to_string(),
            session_id: pending.request.session_id.clone(),
            outcome,
            result: result.clone(),
        });
        // The waiter may already be gone; the decision is still recorded above.
        let _ = pending.responder.send(result);
        true
    }
}

impl Default for ApprovalManager {
    fn default() -> Self {
        Self::new(DEFAULT_APPROVAL_TIMEOUT)
    }
}

fn timed_out() -> ApprovalResult {
    ApprovalResult::denied("Approval request timed out", None)
}

// Drops the pending entry if the waiting future is abandoned mid-wait.
struct PendingGuard<'a> {
    manager: &'a ApprovalManager,
    request_id: &'a str,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        self.manager.pending.lock().remove(self.request_id);
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::Arc;

    fn call() -> ToolCall {
        ToolCall::new("s1", "code_runner", json!({"code": "print(1)"}))
    }

    async fn next_request(events: &mut broadcast::Receiver<ApprovalEvent>) -> ApprovalRequest {
        loop {
            if let ApprovalEvent::Requested(request) = events.recv().await.unwrap() {
                return request;
            }
        }
    }

    #[test]
    fn test_requires_approval_threshold() {
        assert!(!requires_approval(SecurityTier::Safe));
        assert!(!requires_approval(SecurityTier::Elevated));
        assert!(requires_approval(SecurityTier::Restricted));
        assert!(requires_approval(SecurityTier::Dangerous));
    }

    #[tokio::test]
    async fn test_approve_resolves_waiter() {
        let manager = Arc::new(ApprovalManager::new(Duration::from_secs(5)));
        let mut events = manager.subscribe();

        let waiter = {
            let manager = manager.clone();
            tokio::spawn(async move {
                manager
                    .request_approval("s1", &call(), SecurityTier::Restricted)
                    .await
            })
        };

        let request = next_request(&mut events).await;
        assert_eq!(manager.pending_count(), 1);
        assert!(manager.approve(&request.id, Some("alice")));

        let result = waiter.await.unwrap();
        assert!(result.approved);
        assert_eq!(result.user_id.as_deref(), Some("alice"));
        assert_eq!(manager.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_deny_carries_reason() {
        let manager = Arc::new(ApprovalManager::new(Duration::from_secs(5)));
        let mut events = manager.subscribe();

        let waiter = {
            let manager = manager.clone();
            tokio::spawn(async move {
                manager
                    .request_approval("s1", &call(), SecurityTier::Dangerous)
                    .await
            })
        };

        let request = next_request(&mut events).await;
        assert!(manager.deny(&request.id, Some("too risky"), None));
        let result = waiter.await.unwrap();
        assert!(!result.approved);
        assert_eq!(result.reason.as_deref(), Some("too risky"));

        // Second resolution of the same id is a no-op.
        assert!(!manager.approve(&request.id, None));
    }

    #[tokio::test]
    async fn test_timeout_denies_and_cleans_up() {
        let manager = ApprovalManager::new(Duration::from_millis(50));
        let started = std::time::Instant::now();

        let result = manager
            .request_approval("s1", &call(), SecurityTier::Restricted)
            .await;

        assert!(!result.approved);
        assert!(result.reason.unwrap().contains("timed out"));
        assert!(started.elapsed() < Duration::from_millis(1000));
        assert_eq!(manager.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_abandoned_wait_removes_entry() {
        let manager = ApprovalManager::new(Duration::from_secs(60));
        let call = call();
        let wait = manager.request_approval("s1", &call, SecurityTier::Restricted);
        let _ = tokio::time::timeout(Duration::from_millis(10), wait).await;
        assert_eq!(manager.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_cancel_session_without_pending_is_noop() {
        let manager = ApprovalManager::default();
        assert_eq!(manager.cancel_session_requests("nobody"), 0);
        assert_eq!(manager.timeout(), Duration::from_secs(120));
    }

    #[tokio::test]
    async fn test_resolved_event_reports_outcome() {
        let manager = Arc::new(ApprovalManager::new(Duration::from_secs(5)));
        let mut events = manager.subscribe();

        let waiter = {
            let manager = manager.clone();
            tokio::spawn(async move {
                manager
                    .request_approval("s9", &call(), SecurityTier::Restricted)
                    .await
            })
        };
        let request = next_request(&mut events).await;
        assert_eq!(manager.handle_command(&format!("/approve {}", request.id), Some("bob")), Some(true));

        match events.recv().await.unwrap() {
            ApprovalEvent::Resolved { request_id, session_id, outcome, .. } => {
                assert_eq!(request_id, request.id);
                assert_eq!(session_id, "s9");
                assert_eq!(outcome, ApprovalOutcome::Approved);
            }
            other => panic!("unexpected event: {other:?}"),
        }
        assert!(waiter.await.unwrap().approved);
        assert_eq!(manager.handle_command("hello there", None), None);
    }
}
