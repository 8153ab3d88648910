//! Metrics for the dispatch pipeline.

use nachos_core::ToolResult;
use std::time::Instant;

/// Outcome label for a finished call.
pub fn outcome_label(result: &ToolResult) -> &'static str {
    if result.success {
        if result.metadata.cached == Some(true) {
            "cached"
        } else {
            "success"
        }
    } else {
        match result.error_code() {
            Some("MISSING_SESSION") => "missing_session",
            Some("POLICY_DENIED") => "policy_denied",
            Some("APPROVAL_DENIED") => "approval_denied",
            Some("INVALID_TOOL_RESPONSE") => "invalid_response",
            Some("TIMEOUT") => "timeout",
            Some("TOOL_NOT_AVAILABLE") => "not_available",
            Some("EXECUTION_ERROR") => "execution_error",
            _ => "tool_error",
        }
    }
}

pub fn record_tool_call(tool: &str, result: &ToolResult) {
    metrics::counter!(
        "nachos_tool_calls_total",
        1,
        "tool" => tool.to_string(),
        "outcome" => outcome_label(result)
    );
}

pub fn record_tool_duration(duration_ms: f64) {
    metrics::histogram!("nachos_tool_duration_ms", duration_ms);
}

pub fn record_batch(mode: &'static str, size: usize) {
    metrics::counter!("nachos_tool_batches_total", 1, "mode" => mode);
    metrics::histogram!("nachos_tool_batch_size", size as f64);
}

/// Wall-clock stopwatch for one call.
pub struct CallTimer {
    start: Instant,
}

impl CallTimer {
    pub fn start() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    /// Record the duration histogram and return elapsed milliseconds.
    pub fn finish(self) -> u64 {
        let elapsed = self.start.elapsed();
        record_tool_duration(elapsed.as_secs_f64() * 1000.0);
        elapsed.as_millis() as u64
    }
}
