//! TTL-bounded permission cache
//!
//! Each `(directory, permission)` pair owns a slot guarded by an async mutex.
//! Concurrent callers for the same pair queue on that slot, so only the first
//! one reaches the resolver and the rest read its answer.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::{PermissionChange, PermissionKey};
use crate::module::traits::{ExchangeError, PermissionResolver};
use crate::utils::with_custom_timeout;

/// Permission cache settings
#[derive(Debug, Clone)]
pub struct PermissionCacheConfig {
    /// When false every check goes straight to the resolver
    pub enabled: bool,
    /// Lifetime of a cached answer
    pub expiry: Duration,
    /// Upper bound for one resolver call
    pub resolve_timeout: Duration,
}

impl Default for PermissionCacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            expiry: Duration::from_secs(300),
            resolve_timeout: Duration::from_secs(30),
        }
    }
}

/// Counters for cache effectiveness
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PermissionCacheStats {
    pub hits: u64,
    pub misses: u64,
    pub invalidations: u64,
}

#[derive(Debug, Clone, Copy)]
struct CachedDecision {
    allowed: bool,
    expires_at: Instant,
}

type CacheKey = (String, PermissionKey);
type Slot = Arc<Mutex<Option<CachedDecision>>>;

/// Permission cache in front of a `PermissionResolver`
pub struct PermissionCache {
    resolver: Arc<dyn PermissionResolver>,
    config: PermissionCacheConfig,
    slots: Mutex<HashMap<CacheKey, Slot>>,
    hits: AtomicU64,
    misses: AtomicU64,
    invalidations: AtomicU64,
}

impl PermissionCache {
    pub fn new(resolver: Arc<dyn PermissionResolver>, config: PermissionCacheConfig) -> Self {
        if !config.enabled {
            info!("Permission caching disabled, every check hits the resolver");
        }
        Self {
            resolver,
            config,
            slots: Mutex::new(HashMap::new()),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            invalidations: AtomicU64::new(0),
        }
    }

    /// Is `directory` allowed `key`?
    ///
    /// Resolver failures are returned as errors and never cached.
    pub async fn check(&self, directory: &str, key: &PermissionKey) -> Result<bool, ExchangeError> {
        if !self.config.enabled {
            return self.resolve(directory, key).await;
        }

        let slot = {
            let mut slots = self.slots.lock().await;
            Arc::clone(
                slots
                    .entry((directory.to_string(), key.clone()))
                    .or_insert_with(|| Arc::new(Mutex::new(None))),
            )
        };

        let mut cached = slot.lock().await;
        if let Some(decision) = *cached {
            if Instant::now() < decision.expires_at {
                self.hits.fetch_add(1, Ordering::Relaxed);
                return Ok(decision.allowed);
            }
        }

        self.misses.fetch_add(1, Ordering::Relaxed);
        let allowed = self.resolve(directory, key).await?;
        *cached = Some(CachedDecision {
            allowed,
            expires_at: Instant::now() + self.config.expiry,
        });
        Ok(allowed)
    }

    /// Check and turn a denial into `PermissionDenied`
    pub async fn require(&self, directory: &str, key: &PermissionKey) -> Result<(), ExchangeError> {
        if self.check(directory, key).await? {
            Ok(())
        } else {
            Err(ExchangeError::permission_denied(directory, key))
        }
    }

    async fn resolve(&self, directory: &str, key: &PermissionKey) -> Result<bool, ExchangeError> {
        let allowed = with_custom_timeout(self.resolver.resolve(directory, key), self.config.resolve_timeout)
            .await
            .map_err(|_| ExchangeError::Timeout(format!("permission resolution for {}", directory)))??;
        debug!(directory, permission = %key, allowed, "Permission resolved");
        Ok(allowed)
    }

    /// Apply a "permission changed" notification
    pub async fn invalidate(&self, change: &PermissionChange) {
        let mut slots = self.slots.lock().await;
        let before = slots.len();
        match &change.key {
            Some(key) => {
                slots.remove(&(change.directory.clone(), key.clone()));
            }
            None => slots.retain(|(directory, _), _| directory != &change.directory),
        }
        let removed = (before - slots.len()) as u64;
        if removed > 0 {
            self.invalidations.fetch_add(removed, Ordering::Relaxed);
            debug!(directory = %change.directory, removed, "Permission cache invalidated");
        }
    }

    /// Drop every cached answer
    pub async fn clear(&self) {
        let mut slots = self.slots.lock().await;
        self.invalidations.fetch_add(slots.len() as u64, Ordering::Relaxed);
        slots.clear();
    }

    /// Remove expired answers; returns how many were dropped
    ///
    /// Slots a caller still holds (waiting on or resolving them) are left
    /// alone, so a purge never splits one key into two resolver calls.
    pub async fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let mut slots = self.slots.lock().await;
        let before = slots.len();
        slots.retain(|_, slot| {
            if Arc::strong_count(slot) > 1 {
                return true;
            }
            match slot.try_lock() {
                Ok(cached) => (*cached).map_or(false, |d| now < d.expires_at),
                Err(_) => true,
            }
        });
        before - slots.len()
    }

    /// Listen for change notifications until the sender side closes
    pub fn spawn_invalidation_listener(
        self: &Arc<Self>,
        mut changes: mpsc::Receiver<PermissionChange>,
    ) -> JoinHandle<()> {
        let cache = Arc::clone(self);
        tokio::spawn(async move {
            while let Some(change) = changes.recv().await {
                cache.invalidate(&change).await;
            }
            warn!("Permission change channel closed, invalidation listener stopped");
        })
    }

    pub fn stats(&self) -> PermissionCacheStats {
        PermissionCacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            invalidations: self.invalidations.load(Ordering::Relaxed),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.config.enabled
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::AtomicUsize;

    struct CountingResolver {
        calls: AtomicUsize,
        allow: bool,
    }

    #[async_trait]
    impl PermissionResolver for CountingResolver {
        async fn resolve(&self, _directory: &str, _key: &PermissionKey) -> Result<bool, ExchangeError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.allow)
        }
    }

    fn cache(enabled: bool) -> (Arc<CountingResolver>, PermissionCache) {
        let resolver = Arc::new(CountingResolver {
            calls: AtomicUsize::new(0),
            allow: true,
        });
        let config = PermissionCacheConfig {
            enabled,
            expiry: Duration::from_secs(60),
            resolve_timeout: Duration::from_secs(5),
        };
        (resolver.clone(), PermissionCache::new(resolver, config))
    }

    #[tokio::test(start_paused = true)]
    async fn test_disabled_cache_always_resolves() {
        let (resolver, cache) = cache(false);
        let key = PermissionKey::import("mail");

        assert!(cache.check("sports", &key).await.unwrap());
        assert!(cache.check("sports", &key).await.unwrap());
        assert_eq!(resolver.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_directory_invalidation_drops_all_keys() {
        let (resolver, cache) = cache(true);

        cache.check("sports", &PermissionKey::import("mail")).await.unwrap();
        cache.check("sports", &PermissionKey::export("rss")).await.unwrap();
        cache.check("politics", &PermissionKey::export("rss")).await.unwrap();
        cache.invalidate(&PermissionChange::directory("sports")).await;

        cache.check("sports", &PermissionKey::import("mail")).await.unwrap();
        cache.check("politics", &PermissionKey::export("rss")).await.unwrap();
        assert_eq!(resolver.calls.load(Ordering::SeqCst), 4);
        assert_eq!(cache.stats().invalidations, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_purge_expired() {
        let (_resolver, cache) = cache(true);
        cache.check("sports", &PermissionKey::import("mail")).await.unwrap();

        tokio::time::advance(Duration::from_secs(61)).await;
        assert_eq!(cache.purge_expired().await, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_purge_keeps_slot_claimed_by_caller() {
        let (resolver, cache) = cache(true);
        let key: CacheKey = ("sports".to_string(), PermissionKey::import("mail"));

        // A caller that picked up the empty slot but has not locked it yet
        let claimed: Slot = Arc::new(Mutex::new(None));
        cache.slots.lock().await.insert(key.clone(), Arc::clone(&claimed));

        assert_eq!(cache.purge_expired().await, 0);
        assert!(Arc::ptr_eq(cache.slots.lock().await.get(&key).unwrap(), &claimed));

        // The caller and any later one resolve through the same slot
        cache.check("sports", &PermissionKey::import("mail")).await.unwrap();
        *claimed.lock().await = None;
        drop(claimed);
        assert_eq!(cache.purge_expired().await, 1);
        assert_eq!(resolver.calls.load(Ordering::SeqCst), 1);
    }
}
