use crate::error::CacheError;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

/// Shared result store behind the in-process tier. Values are serialized
/// `ToolResult` JSON; keys are cache fingerprints.
#[async_trait]
pub trait RemoteCache: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError>;
    async fn set(&self, key: &str, value: String, ttl: Duration) -> Result<(), CacheError>;
    async fn delete(&self, key: &str) -> Result<(), CacheError>;
    async fn clear(&self) -> Result<(), CacheError>;

    async fn close(&self) -> Result<(), CacheError> {
        Ok(())
    }
}

/// Build the remote tier configured by `url`, if any.
///
/// A missing URL, a build without the `redis` feature, or an unreachable
/// server all yield `None`; the cache then runs memory-only.
pub async fn connect_remote(url: Option<&str>) -> Option<Arc<dyn RemoteCache>> {
    let url = url.filter(|u| !u.trim().is_empty())?;

    #[cfg(feature = "redis")]
    {
        match redis_tier::RedisRemoteCache::connect(url).await {
            Ok(remote) => Some(Arc::new(remote)),
            Err(e) => {
                warn!(error = %e, "remote cache unavailable; continuing with memory only");
                None
            }
        }
    }

    #[cfg(not(feature = "redis"))]
    {
        warn!(url, "remote cache configured but redis support is not compiled in");
        None
    }
}

#[cfg(feature = "redis")]
pub mod redis_tier {
    use super::RemoteCache;
    use crate::error::CacheError;
    use async_trait::async_trait;
    use redis::aio::MultiplexedConnection;
    use redis::AsyncCommands;
    use std::time::Duration;
    use tracing::info;

    pub const KEY_PREFIX: &str = "nachos:tool-cache:";
    const DELETE_BATCH: usize = 500;

    fn remote_err(e: redis::RedisError) -> CacheError {
        CacheError::Remote(e.to_string())
    }

    /// Redis-backed tier. Entries expire server-side via `SET ... EX`.
    pub struct RedisRemoteCache {
        conn: MultiplexedConnection,
    }

    impl RedisRemoteCache {
        pub async fn connect(url: &str) -> Result<Self, CacheError> {
            let client = redis::Client::open(url).map_err(remote_err)?;
            let conn = client
                .get_multiplexed_async_connection()
                .await
                .map_err(remote_err)?;
            info!("connected to remote cache");
            Ok(Self { conn })
        }

        fn key(key: &str) -> String {
            format!("{}{}", KEY_PREFIX, key)
        }

        /// `SCAN MATCH` pattern covering every entry this tier wrote.
        fn scan_pattern() -> String {
            format!("{}*", glob_escape(KEY_PREFIX))
        }
    }

    fn glob_escape(literal: &str) -> String {
        let mut escaped = String::with_capacity(literal.len());
        for c in literal.chars() {
            if matches!(c, '*' | '?' | '[' | ']' | '\\') {
                escaped.push('\\');
            }
            escaped.push(c);
        }
        escaped
    }

    #[async_trait]
    impl RemoteCache for RedisRemoteCache {
        async fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
            let mut conn = self.conn.clone();
            conn.get::<_, Option<String>>(Self::key(key))
                .await
                .map_err(remote_err)
        }

        async fn set(&self, key: &str, value: String, ttl: Duration) -> Result<(), CacheError> {
            let mut conn = self.conn.clone();
            let seconds = ttl.as_secs().max(1);
            redis::cmd("SET")
                .arg(Self::key(key))
                .arg(value)
                .arg("EX")
                .arg(seconds)
                .query_async::<_, ()>(&mut conn)
                .await
                .map_err(remote_err)
        }

        async fn delete(&self, key: &str) -> Result<(), CacheError> {
            let mut conn = self.conn.clone();
            conn.del::<_, ()>(Self::key(key)).await.map_err(remote_err)
        }

        async fn clear(&self) -> Result<(), CacheError> {
            let mut keys: Vec<String> = Vec::new();
            let mut scan_conn = self.conn.clone();
            {
                let mut iter = scan_conn
                    .scan_match::<_, String>(Self::scan_pattern())
                    .await
                    .map_err(remote_err)?;
                while let Some(key) = iter.next_item().await {
                    keys.push(key);
                }
            }

            let mut conn = self.conn.clone();
            for batch in keys.chunks(DELETE_BATCH) {
                conn.del::<_, ()>(batch.to_vec()).await.map_err(remote_err)?;
            }
            Ok(())
        }
    }

    #[cfg(test)]
    mod tests {
        use super::*;

        #[test]
        fn test_scan_pattern_only_covers_cache_keys() {
            assert_eq!(RedisRemoteCache::scan_pattern(), "nachos:tool-cache:*");
            assert!(RedisRemoteCache::key("filesystem_read:ab12").starts_with(KEY_PREFIX));
        }

        #[test]
        fn test_glob_escape() {
            assert_eq!(glob_escape("a*b?[c]"), "a\\*b\\?\\[c\\]");
        }
    }
}
