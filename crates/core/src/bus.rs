//! Message bus capability consumed by the coordinator.
//!
//! The real transport lives outside this workspace. `LocalBus` is an
//! in-process implementation for single-process deployments and tests.

use async_trait::async_trait;
use parking_lot::RwLock;
use serde_json::Value;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::broadcast;
use tokio::time::timeout;
use tracing::debug;

/// Topic a tool listens on for dispatch requests.
pub fn tool_request_topic(tool: &str) -> String {
    format!("nachos.tool.{}.request", tool)
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BusError {
    #[error("Request to {topic} timed out after {timeout_ms}ms")]
    Timeout { topic: String, timeout_ms: u64 },

    #[error("No responders available for {0}")]
    NoResponders(String),

    #[error("Transport error: {0}")]
    Transport(String),
}

/// Publish/subscribe and request/reply transport.
///
/// The tool pipeline only issues requests. `publish` serves the
/// collaborators around it, such as whatever relays approval prompts to
/// chat channels.
#[async_trait]
pub trait MessageBus: Send + Sync {
    /// Send `payload` to `topic` and wait at most `timeout` for one reply.
    async fn request(
        &self,
        topic: &str,
        payload: Value,
        timeout: Duration,
    ) -> Result<Value, BusError>;

    /// Fire-and-forget delivery to every subscriber of `topic`.
    async fn publish(&self, topic: &str, payload: Value) -> Result<(), BusError>;
}

/// Replies to requests on one topic.
#[async_trait]
pub trait RequestHandler: Send + Sync {
    async fn handle(&self, payload: Value) -> Result<Value, BusError>;
}

struct FnHandler<F>(F);

#[async_trait]
impl<F, Fut> RequestHandler for FnHandler<F>
where
    F: Fn(Value) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Value, BusError>> + Send + 'static,
{
    async fn handle(&self, payload: Value) -> Result<Value, BusError> {
        (self.0)(payload).await
    }
}

const LISTENER_CAPACITY: usize = 64;

#[derive(Default)]
pub struct LocalBus {
    handlers: RwLock<HashMap<String, Arc<dyn RequestHandler>>>,
    listeners: RwLock<HashMap<String, broadcast::Sender<Value>>>,
}

impl LocalBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, topic: impl Into<String>, handler: Arc<dyn RequestHandler>) {
        self.handlers.write().insert(topic.into(), handler);
    }

    /// Register a closure as the responder for `topic`.
    pub fn handle_fn<F, Fut>(&self, topic: impl Into<String>, f: F)
    where
        F: Fn(Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value, BusError>> + Send + 'static,
    {
        self.register(topic, Arc::new(FnHandler(f)));
    }

    pub fn unregister(&self, topic: &str) -> bool {
        self.handlers.write().remove(topic).is_some()
    }

    /// Receive everything published to `topic` from now on.
    pub fn subscribe(&self, topic: &str) -> broadcast::Receiver<Value> {
        self.listeners
            .write()
            .entry(topic.to_string())
            .or_insert_with(|| broadcast::channel(LISTENER_CAPACITY).0)
            .subscribe()
    }

    fn handler_for(&self, topic: &str) -> Option<Arc<dyn RequestHandler>> {
        self.handlers.read().get(topic).cloned()
    }
}

#[async_trait]
impl MessageBus for LocalBus {
    async fn request(
        &self,
        topic: &str,
        payload: Value,
        wait: Duration,
    ) -> Result<Value, BusError> {
        let handler = self
            .handler_for(topic)
            .ok_or_else(|| BusError::NoResponders(topic.to_string()))?;

        debug!(topic, "local bus request");
        match timeout(wait, handler.handle(payload)).await {
            Ok(reply) => reply,
            Err(_) => Err(BusError::Timeout {
                topic: topic.to_string(),
                timeout_ms: wait.as_millis() as u64,
            }),
        }
    }

    async fn publish(&self, topic: &str, payload: Value) -> Result<(), BusError> {
        let sender = self.listeners.read().get(topic).cloned();

        if let Some(sender) = sender {
            // No live receivers is not an error for fire-and-forget delivery.
            let _ = sender.send(payload);
        }
        Ok(())
    }
}
