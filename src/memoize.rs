//! Function-result caching on top of [`DistributedCache`].
//!
//! ```ignore
//! let volumes = Memoized::new(cache.clone(), "search_volume", Some(Duration::from_secs(600)));
//! let volume: u32 = volumes
//!     .get_or_compute(&("rust", "US"), || async { fetch_volume("rust", "US").await })
//!     .await?;
//! ```

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, warn};

use crate::coordinator::DistributedCache;
use crate::error::Result;
use crate::ring::KeyHasher;

/// Caches the results of one computation keyed by its arguments
#[derive(Debug, Clone)]
pub struct Memoized {
    cache: Arc<DistributedCache>,
    prefix: String,
    ttl: Option<Duration>,
}

impl Memoized {
    pub fn new(cache: Arc<DistributedCache>, prefix: impl Into<String>, ttl: Option<Duration>) -> Self {
        Self {
            cache,
            prefix: prefix.into(),
            ttl,
        }
    }

    /// Cache key for `args`: `prefix:` followed by the hex ring position of
    /// their JSON encoding
    pub fn key_for<A: Serialize + ?Sized>(&self, args: &A) -> Result<String> {
        let encoded = serde_json::to_vec(args)?;
        Ok(format!("{}:{}", self.prefix, KeyHasher::digest_hex(&encoded)))
    }

    /// Cached result for `args`, computing and storing it on a miss.
    ///
    /// Cache failures never block the computation: the result of `compute`
    /// is returned even if it could not be stored.
    pub async fn get_or_compute<A, T, F, Fut>(&self, args: &A, compute: F) -> Result<T>
    where
        A: Serialize + ?Sized,
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let key = self.key_for(args)?;

        match self.cache.get_value::<T>(&key).await {
            Ok(Some(value)) => {
                debug!(key = %key, "Memoized result served from cache");
                return Ok(value);
            }
            Ok(None) => {}
            Err(e) => warn!(key = %key, error = %e, "Memoized lookup failed, computing"),
        }

        let value = compute().await?;
        match self.cache.set_value(&key, &value, self.ttl).await {
            Ok(true) => {}
            Ok(false) => debug!(key = %key, "Memoized result stored on a subset of replicas"),
            Err(e) => warn!(key = %key, error = %e, "Memoized result not stored"),
        }
        Ok(value)
    }

    /// Drop the cached result for `args`
    pub async fn invalidate<A: Serialize + ?Sized>(&self, args: &A) -> Result<bool> {
        let key = self.key_for(args)?;
        self.cache.delete(&key).await
    }
}
