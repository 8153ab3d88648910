#![allow(dead_code, clippy::unwrap_used, clippy::expect_used, clippy::panic)]

use async_trait::async_trait;
use nachos_core::{tool_request_topic, AuditLogger, LocalBus};
use nachos_coordinator::{CoordinatorConfig, ToolCoordinator};
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

pub fn ok_reply(text: &str) -> Value {
    json!({"success": true, "content": [{"type": "text", "text": text}]})
}

pub fn coordinator(bus: &Arc<LocalBus>) -> ToolCoordinator {
    ToolCoordinator::new(bus.clone(), CoordinatorConfig::default())
}

/// Register `tool` answering with a fixed text; returns its call counter.
pub fn counting_tool(bus: &LocalBus, tool: &str, text: &'static str) -> Arc<AtomicUsize> {
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = calls.clone();
    bus.handle_fn(tool_request_topic(tool), move |_payload| {
        counter.fetch_add(1, Ordering::SeqCst);
        async move { Ok(ok_reply(text)) }
    });
    calls
}

/// Register `tool` replying with whatever `reply` is; records payloads.
pub fn recording_tool(bus: &LocalBus, tool: &str, reply: Value) -> Arc<Mutex<Vec<Value>>> {
    let payloads = Arc::new(Mutex::new(Vec::new()));
    let seen = payloads.clone();
    bus.handle_fn(tool_request_topic(tool), move |payload| {
        seen.lock().push(payload);
        let reply = reply.clone();
        async move { Ok(reply) }
    });
    payloads
}

#[derive(Default)]
pub struct RecordingAudit {
    pub entries: Mutex<Vec<Value>>,
}

#[async_trait]
impl AuditLogger for RecordingAudit {
    async fn log(&self, entry: Value) {
        self.entries.lock().push(entry);
    }
}

impl RecordingAudit {
    pub async fn wait_for(&self, count: usize) -> Vec<Value> {
        for _ in 0..200 {
            if self.entries.lock().len() >= count {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        self.entries.lock().clone()
    }
}

pub async fn eventually<F: Fn() -> bool>(condition: F) {
    for _ in 0..200 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("condition not reached in time");
}
