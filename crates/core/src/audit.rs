use async_trait::async_trait;
use serde_json::Value;
use tracing::info;

/// Sink for per-call audit entries. Implementations must not fail the caller.
#[async_trait]
pub trait AuditLogger: Send + Sync {
    async fn log(&self, entry: Value);
}

/// Writes audit entries to the `nachos::audit` tracing target.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingAuditLogger;

#[async_trait]
impl AuditLogger for TracingAuditLogger {
    async fn log(&self, entry: Value) {
        info!(target: "nachos::audit", entry = %entry, "tool call audited");
    }
}
