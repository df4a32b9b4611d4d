//! Response caching for the chat endpoint.
//!
//! The orchestrator only sees the [`ResponseCache`] trait, so the in-memory
//! [`TtlCache`] can be swapped for [`NoopCache`] (or another backend) without
//! touching request handling.

mod key;
mod memory;

pub use key::CacheKey;
pub use memory::TtlCache;

use crate::{error::AppResult, models::ChatResponse};

/// Store for normalized chat responses
#[async_trait::async_trait]
pub trait ResponseCache: Send + Sync {
    /// Returns a copy of the cached response, or `None` when absent or expired
    async fn get(&self, key: &CacheKey) -> AppResult<Option<ChatResponse>>;

    /// Inserts or overwrites the response stored under `key`
    async fn set(&self, key: CacheKey, value: ChatResponse) -> AppResult<()>;

    /// Number of live entries, for health reporting
    async fn entry_count(&self) -> usize;

    /// Backend name for logging and debugging
    fn name(&self) -> &'static str;
}

/// Cache that never stores anything
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopCache;

#[async_trait::async_trait]
impl ResponseCache for NoopCache {
    async fn get(&self, _key: &CacheKey) -> AppResult<Option<ChatResponse>> {
        Ok(None)
    }

    async fn set(&self, _key: CacheKey, _value: ChatResponse) -> AppResult<()> {
        Ok(())
    }

    async fn entry_count(&self) -> usize {
        0
    }

    fn name(&self) -> &'static str {
        "noop"
    }
}
