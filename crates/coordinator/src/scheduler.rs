//! Parallel-safety decision for a batch of tool calls.

use crate::classifier::{AccessKind, ToolClassifier};
use nachos_core::ToolCall;
use std::collections::HashSet;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionMode {
    Parallel,
    Sequential,
}

impl ExecutionMode {
    pub fn as_str(self) -> &'static str {
        match self {
            ExecutionMode::Parallel => "parallel",
            ExecutionMode::Sequential => "sequential",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlanReason {
    Independent,
    Forced,
    DuplicateTool(String),
    WriteBeforeRead { write: usize, read: usize },
}

impl fmt::Display for PlanReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PlanReason::Independent => write!(f, "calls are independent"),
            PlanReason::Forced => write!(f, "parallel execution forced by caller"),
            PlanReason::DuplicateTool(tool) => write!(f, "tool '{}' appears more than once", tool),
            PlanReason::WriteBeforeRead { write, read } => {
                write!(f, "call {} writes a resource that call {} reads", write, read)
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchPlan {
    pub mode: ExecutionMode,
    pub reason: PlanReason,
}

impl BatchPlan {
    pub fn forced() -> Self {
        Self {
            mode: ExecutionMode::Parallel,
            reason: PlanReason::Forced,
        }
    }

    fn sequential(reason: PlanReason) -> Self {
        Self {
            mode: ExecutionMode::Sequential,
            reason,
        }
    }
}

/// Decide whether `calls` can run concurrently.
///
/// The batch runs sequentially if a tool name repeats, or if a write-like
/// call precedes a read-like call on the same resource. Everything else is
/// parallel.
pub fn plan_batch(calls: &[ToolCall], classifier: &ToolClassifier) -> BatchPlan {
    let mut seen = HashSet::new();
    for call in calls {
        if !seen.insert(call.tool.as_str()) {
            return BatchPlan::sequential(PlanReason::DuplicateTool(call.tool.clone()));
        }
    }

    for (write, earlier) in calls.iter().enumerate() {
        if classifier.access_kind(&earlier.tool) != Some(AccessKind::Write) {
            continue;
        }
        for (offset, later) in calls[write + 1..].iter().enumerate() {
            if classifier.access_kind(&later.tool) == Some(AccessKind::Read)
                && classifier.same_resource(earlier, later)
            {
                return BatchPlan::sequential(PlanReason::WriteBeforeRead {
                    write,
                    read: write + 1 + offset,
                });
            }
        }
    }

    BatchPlan {
        mode: ExecutionMode::Parallel,
        reason: PlanReason::Independent,
    }
}
