use crate::key::generate_key;
use crate::memory::MemoryTier;
use crate::remote::RemoteCache;
use nachos_core::{ToolCall, ToolResult};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Upper bound on any entry's lifetime, in both tiers.
pub const MAX_CACHE_TTL: Duration = Duration::from_secs(30 * 24 * 60 * 60);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheConfig {
    /// TTL used when a caller gives none.
    pub default_ttl: Duration,
    /// Capacity of the in-process tier.
    pub max_entries: usize,
    /// Period of the background expiry sweep.
    pub cleanup_interval: Duration,
    /// TTL given to entries copied into memory after a remote hit.
    pub remote_hit_ttl: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            default_ttl: Duration::from_secs(300),
            max_entries: 1000,
            cleanup_interval: Duration::from_secs(60),
            remote_hit_ttl: Duration::from_secs(60),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub size: usize,
    pub evictions: u64,
}

/// Result cache keyed by `(tool, canonical parameters)`.
///
/// Lookups try memory first, then the remote tier when one is attached.
/// Remote failures are logged and treated as misses.
pub struct ToolCache {
    memory: Arc<Mutex<MemoryTier>>,
    remote: Option<Arc<dyn RemoteCache>>,
    config: CacheConfig,
    sweeper: Mutex<Option<JoinHandle<()>>>,
    closed: AtomicBool,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl ToolCache {
    pub fn new(config: CacheConfig, remote: Option<Arc<dyn RemoteCache>>) -> Self {
        Self {
            memory: Arc::new(Mutex::new(MemoryTier::new(config.max_entries))),
            remote,
            config,
            sweeper: Mutex::new(None),
            closed: AtomicBool::new(false),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    pub fn memory_only(config: CacheConfig) -> Self {
        Self::new(config, None)
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    pub fn has_remote(&self) -> bool {
        self.remote.is_some()
    }

    pub fn key_for(call: &ToolCall) -> String {
        generate_key(&call.tool, &call.parameters)
    }

    fn remote(&self) -> Option<&Arc<dyn RemoteCache>> {
        if self.closed.load(Ordering::Acquire) {
            return None;
        }
        self.remote.as_ref()
    }

    pub async fn get(&self, call: &ToolCall) -> Option<ToolResult> {
        let key = Self::key_for(call);

        let local = self.memory.lock().get(&key, Instant::now());
        if let Some(result) = local {
            self.record_hit("memory");
            return Some(result);
        }

        if let Some(remote) = self.remote() {
            match remote.get(&key).await {
                Ok(Some(raw)) => match serde_json::from_str::<ToolResult>(&raw) {
                    Ok(result) => {
                        let ttl = self.config.remote_hit_ttl.min(self.config.default_ttl);
                        self.memory
                            .lock()
                            .insert(key, &call.tool, result.clone(), ttl, Instant::now());
                        self.record_hit("remote");
                        return Some(result);
                    }
                    Err(e) => warn!(tool = %call.tool, error = %e, "discarding undecodable remote cache entry"),
                },
                Ok(None) => {}
                Err(e) => warn!(tool = %call.tool, error = %e, "remote cache read failed"),
            }
        }

        self.misses.fetch_add(1, Ordering::Relaxed);
        metrics::counter!("nachos_cache_misses_total", 1);
        None
    }

    /// Store `result` for `call`. `ttl` falls back to the configured default
    /// and is capped at [`MAX_CACHE_TTL`].
    pub async fn set(&self, call: &ToolCall, result: &ToolResult, ttl: Option<Duration>) {
        let ttl = ttl.unwrap_or(self.config.default_ttl).min(MAX_CACHE_TTL);
        if ttl.is_zero() {
            return;
        }
        let key = Self::key_for(call);

        self.memory
            .lock()
            .insert(key.clone(), &call.tool, result.clone(), ttl, Instant::now());

        if let Some(remote) = self.remote() {
            let stored = match serde_json::to_string(result) {
                Ok(raw) => remote.set(&key, raw, ttl).await,
                Err(e) => Err(e.into()),
            };
            if let Err(e) = stored {
                warn!(tool = %call.tool, error = %e, "remote cache write failed");
            }
        }
        debug!(tool = %call.tool, ttl_secs = ttl.as_secs(), "tool result cached");
    }

    pub async fn invalidate(&self, call: &ToolCall) {
        let key = Self::key_for(call);
        self.memory.lock().remove(&key);
        if let Some(remote) = self.remote() {
            if let Err(e) = remote.delete(&key).await {
                warn!(tool = %call.tool, error = %e, "remote cache delete failed");
            }
        }
    }

    /// Drop every in-process entry for `tool`. Remote entries are left to
    /// expire.
    pub fn invalidate_tool(&self, tool: &str) -> usize {
        self.memory.lock().remove_tool(tool)
    }

    pub async fn clear(&self) {
        self.memory.lock().clear();
        if let Some(remote) = self.remote() {
            if let Err(e) = remote.clear().await {
                warn!(error = %e, "remote cache clear failed");
            }
        }
    }

    pub fn cleanup_expired(&self) -> usize {
        self.memory.lock().purge_expired(Instant::now())
    }

    /// Start the periodic expiry sweep. Calling it again while a sweep is
    /// running does nothing.
    pub fn start_cleanup(&self) {
        let mut sweeper = self.sweeper.lock();
        if sweeper.is_some() || self.closed.load(Ordering::Acquire) {
            return;
        }

        let memory = Arc::downgrade(&self.memory);
        let period = self.config.cleanup_interval.max(Duration::from_millis(10));
        *sweeper = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let Some(memory) = memory.upgrade() else {
                    break;
                };
                let purged = memory.lock().purge_expired(Instant::now());
                if purged > 0 {
                    debug!(purged, "expired cache entries removed");
                }
            }
        }));
    }

    pub fn stats(&self) -> CacheStats {
        let memory = self.memory.lock();
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            size: memory.len(),
            evictions: memory.evictions(),
        }
    }

    /// Stop the sweep and release the remote tier. Safe to call repeatedly.
    pub async fn shutdown(&self) {
        if let Some(handle) = self.sweeper.lock().take() {
            handle.abort();
        }
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        if let Some(remote) = self.remote.as_ref() {
            if let Err(e) = remote.close().await {
                warn!(error = %e, "remote cache close failed");
            }
        }
    }

    fn record_hit(&self, tier: &'static str) {
        self.hits.fetch_add(1, Ordering::Relaxed);
        metrics::counter!("nachos_cache_hits_total", 1, "tier" => tier);
    }
}

impl Drop for ToolCache {
    fn drop(&mut self) {
        if let Some(handle) = self.sweeper.get_mut().take() {
            handle.abort();
        }
    }
}
