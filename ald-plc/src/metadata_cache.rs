//! In-memory parameter metadata cache with a short TTL (spec.md §4.1):
//! the sampler and parameter writer both need `Parameter` rows on every
//! pass, but the table changes rarely enough that hitting the database
//! every sweep is wasted work.

use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::future::BoxFuture;
use tokio::sync::RwLock;

use ald_common::{AldError, Parameter};

const DEFAULT_TTL: Duration = Duration::from_secs(300);

type Loader = dyn Fn() -> BoxFuture<'static, Result<Vec<Parameter>, AldError>> + Send + Sync;

struct Cached {
    parameters: Arc<Vec<Parameter>>,
    loaded_at: Instant,
}

/// Caches the full parameter metadata list behind a loader closure,
/// refreshing it once the TTL elapses. The loader is boxed so the cache
/// type itself stays concrete and can be stored in `Arc<...>` fields
/// across crate boundaries without threading a generic through every
/// caller.
pub struct ParameterMetadataCache {
    loader: Box<Loader>,
    ttl: Duration,
    state: RwLock<Option<Cached>>,
}

impl ParameterMetadataCache {
    pub fn new<F, Fut>(loader: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = Result<Vec<Parameter>, AldError>> + Send + 'static,
    {
        Self::with_ttl(loader, DEFAULT_TTL)
    }

    pub fn with_ttl<F, Fut>(loader: F, ttl: Duration) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = Result<Vec<Parameter>, AldError>> + Send + 'static,
    {
        Self {
            loader: Box::new(move || Box::pin(loader()) as BoxFuture<'static, Result<Vec<Parameter>, AldError>>),
            ttl,
            state: RwLock::new(None),
        }
    }

    /// Return the cached metadata, refreshing first if stale or absent.
    pub async fn get(&self) -> Result<Arc<Vec<Parameter>>, AldError> {
        {
            let guard = self.state.read().await;
            if let Some(cached) = guard.as_ref() {
                if cached.loaded_at.elapsed() < self.ttl {
                    return Ok(cached.parameters.clone());
                }
            }
        }

        let fresh = (self.loader)().await?;
        let fresh = Arc::new(fresh);
        let mut guard = self.state.write().await;
        *guard = Some(Cached {
            parameters: fresh.clone(),
            loaded_at: Instant::now(),
        });
        Ok(fresh)
    }

    /// Force the next `get()` to reload regardless of TTL.
    pub async fn invalidate(&self) {
        *self.state.write().await = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ald_common::DataType;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn param(id: &str) -> Parameter {
        Parameter {
            id: id.into(),
            name: id.into(),
            modbus_address: 0,
            data_type: DataType::Float,
            min_value: None,
            max_value: None,
            read_cadence_ms: None,
            active: true,
        }
    }

    #[tokio::test]
    async fn repeated_get_within_ttl_hits_cache_once() {
        let calls = Arc::new(AtomicUsize::new(0));
        let calls_clone = calls.clone();
        let cache = ParameterMetadataCache::with_ttl(
            move || {
                let calls = calls_clone.clone();
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok(vec![param("p1")])
                }
            },
            Duration::from_secs(300),
        );

        cache.get().await.unwrap();
        cache.get().await.unwrap();
        cache.get().await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn expired_ttl_triggers_reload() {
        let calls = Arc::new(AtomicUsize::new(0));
        let calls_clone = calls.clone();
        let cache = ParameterMetadataCache::with_ttl(
            move || {
                let calls = calls_clone.clone();
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok(vec![param("p1")])
                }
            },
            Duration::from_millis(10),
        );

        cache.get().await.unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        cache.get().await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn invalidate_forces_reload() {
        let calls = Arc::new(AtomicUsize::new(0));
        let calls_clone = calls.clone();
        let cache = ParameterMetadataCache::new(move || {
            let calls = calls_clone.clone();
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok(vec![param("p1")])
            }
        });

        cache.get().await.unwrap();
        cache.invalidate().await;
        cache.get().await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }
}
