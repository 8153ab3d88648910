#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

mod common;

use common::{coordinator, counting_tool, ok_reply, RecordingAudit};
use nachos_core::{tool_request_topic, ErrorCode, LocalBus, ToolCall};
use nachos_coordinator::ExecuteOptions;
use serde_json::json;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Barrier;

/// Register `tool` so that it only answers once `barrier` is full, which
/// can only happen if the calls run concurrently.
fn rendezvous_tool(bus: &LocalBus, tool: &str, barrier: Arc<Barrier>) {
    let name = tool.to_string();
    bus.handle_fn(tool_request_topic(tool), move |_| {
        let barrier = barrier.clone();
        let name = name.clone();
        async move {
            barrier.wait().await;
            Ok(ok_reply(&name))
        }
    });
}

/// Register `tool` tracking the peak number of concurrent invocations.
fn tracked_tool(bus: &LocalBus, tool: &str, active: Arc<AtomicUsize>, peak: Arc<AtomicUsize>) {
    bus.handle_fn(tool_request_topic(tool), move |payload| {
        let active = active.clone();
        let peak = peak.clone();
        async move {
            let now = active.fetch_add(1, Ordering::SeqCst) + 1;
            peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(10)).await;
            active.fetch_sub(1, Ordering::SeqCst);
            if payload["parameters"]["fail"] == json!(true) {
                return Ok(json!({"success": false, "error": {"code": "EIO", "message": "disk"}}));
            }
            Ok(ok_reply("done"))
        }
    });
}

fn text_of(result: &nachos_core::ToolResult) -> String {
    match &result.content[0] {
        nachos_core::ContentBlock::Text { text } => text.clone(),
        other => panic!("unexpected content: {other:?}"),
    }
}

#[tokio::test]
async fn test_empty_batch() {
    let bus = Arc::new(LocalBus::new());
    let results = coordinator(&bus)
        .execute_tools(Vec::new(), ExecuteOptions::default())
        .await;
    assert!(results.is_empty());
}

#[tokio::test]
async fn test_independent_calls_run_concurrently_in_order() {
    let bus = Arc::new(LocalBus::new());
    let barrier = Arc::new(Barrier::new(3));
    for tool in ["filesystem_read", "browser_navigate", "web_search"] {
        rendezvous_tool(&bus, tool, barrier.clone());
    }
    let calls = vec![
        ToolCall::new("s1", "filesystem_read", json!({"path": "/a"})),
        ToolCall::new("s1", "browser_navigate", json!({"url": "https://a.test"})),
        ToolCall::new("s1", "web_search", json!({"query": "q"})),
    ];

    let results = tokio::time::timeout(
        Duration::from_secs(5),
        coordinator(&bus).execute_tools(calls, ExecuteOptions::default()),
    )
    .await
    .expect("parallel batch should not wait on itself");

    let texts: Vec<String> = results.iter().map(text_of).collect();
    assert_eq!(texts, vec!["filesystem_read", "browser_navigate", "web_search"]);
}

#[tokio::test]
async fn test_panicking_call_is_isolated() {
    let bus = Arc::new(LocalBus::new());
    let reads = counting_tool(&bus, "filesystem_read", "fine");
    bus.handle_fn(tool_request_topic("unstable_tool"), |payload| async move {
        if payload["parameters"]["explode"] == json!(true) {
            panic!("tool crashed");
        }
        Ok(ok_reply("survived"))
    });

    let calls = vec![
        ToolCall::new("s1", "unstable_tool", json!({"explode": true})),
        ToolCall::new("s1", "filesystem_read", json!({"path": "/a"})),
        ToolCall::new("", "browser_navigate", json!({})),
    ];
    let results = coordinator(&bus)
        .execute_tools(calls, ExecuteOptions::default())
        .await;

    assert_eq!(results.len(), 3);
    assert!(results[0].is_error(ErrorCode::ExecutionError));
    assert!(results[1].success);
    assert!(results[2].is_error(ErrorCode::MissingSession));
    assert_eq!(reads.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_panicking_call_is_audited() {
    let bus = Arc::new(LocalBus::new());
    bus.handle_fn(tool_request_topic("unstable_tool"), |payload| async move {
        if payload["parameters"]["explode"] == json!(true) {
            panic!("tool crashed");
        }
        Ok(ok_reply("survived"))
    });
    let audit = Arc::new(RecordingAudit::default());
    let coordinator = coordinator(&bus).with_audit(audit.clone());

    let call = ToolCall::new("s1", "unstable_tool", json!({"explode": true})).with_id("crash-1");
    let results = coordinator.execute_tools(vec![call], ExecuteOptions::default()).await;
    assert!(results[0].is_error(ErrorCode::ExecutionError));

    let entries = audit.wait_for(1).await;
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0]["callId"], json!("crash-1"));
    assert_eq!(entries[0]["tool"], json!("unstable_tool"));
    assert_eq!(entries[0]["result"]["errorCode"], json!("EXECUTION_ERROR"));
}

#[tokio::test]
async fn test_repeated_tool_runs_sequentially() {
    let bus = Arc::new(LocalBus::new());
    let active = Arc::new(AtomicUsize::new(0));
    let peak = Arc::new(AtomicUsize::new(0));
    tracked_tool(&bus, "filesystem_read", active.clone(), peak.clone());

    let calls = (0..4)
        .map(|i| ToolCall::new("s1", "filesystem_read", json!({"path": format!("/{}", i)})))
        .collect();
    let results = coordinator(&bus)
        .execute_tools(calls, ExecuteOptions::default())
        .await;

    assert!(results.iter().all(|r| r.success));
    assert_eq!(peak.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_sequential_batch_runs_to_completion() {
    let bus = Arc::new(LocalBus::new());
    let active = Arc::new(AtomicUsize::new(0));
    let peak = Arc::new(AtomicUsize::new(0));
    tracked_tool(&bus, "filesystem_write", active.clone(), peak.clone());
    tracked_tool(&bus, "filesystem_read", active, peak.clone());

    let calls = vec![
        ToolCall::new("s1", "filesystem_write", json!({"path": "/a", "fail": true})),
        ToolCall::new("s1", "filesystem_read", json!({"path": "/a"})),
        ToolCall::new("s1", "no_such_tool", json!({})),
    ];
    let results = coordinator(&bus)
        .execute_tools(calls, ExecuteOptions::default())
        .await;

    assert_eq!(peak.load(Ordering::SeqCst), 1);
    assert_eq!(results[0].error_code(), Some("EIO"));
    assert!(results[1].success);
    assert!(results[2].is_error(ErrorCode::ToolNotAvailable));
}

#[tokio::test]
async fn test_force_parallel_overrides_duplicate_rule() {
    let bus = Arc::new(LocalBus::new());
    let barrier = Arc::new(Barrier::new(2));
    rendezvous_tool(&bus, "filesystem_read", barrier);

    let calls = vec![
        ToolCall::new("s1", "filesystem_read", json!({"path": "/a"})),
        ToolCall::new("s1", "filesystem_read", json!({"path": "/b"})),
    ];
    let options = ExecuteOptions {
        force_parallel: true,
        ..ExecuteOptions::default()
    };
    let results = tokio::time::timeout(
        Duration::from_secs(5),
        coordinator(&bus).execute_tools(calls, options),
    )
    .await
    .expect("forced parallel batch should not wait on itself");
    assert!(results.iter().all(|r| r.success));
}
