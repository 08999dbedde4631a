//! Permission cache integration tests

mod common;

use common::*;
use iox_engine::module::traits::{ExchangeError, PermissionResolver};
use iox_engine::permission::PermissionCacheConfig;
use iox_engine::{PermissionCache, PermissionChange, PermissionKey};
use std::sync::Arc;
use std::time::Duration;

fn cache(resolver: &Arc<StaticResolver>, expiry: Duration) -> Arc<PermissionCache> {
    let resolver: Arc<dyn PermissionResolver> = Arc::clone(resolver) as Arc<dyn PermissionResolver>;
    Arc::new(PermissionCache::new(
        resolver,
        PermissionCacheConfig {
            enabled: true,
            expiry,
            resolve_timeout: Duration::from_secs(5),
        },
    ))
}

#[tokio::test(start_paused = true)]
async fn test_answer_cached_until_expiry() {
    let resolver = StaticResolver::allow_all();
    let cache = cache(&resolver, Duration::from_secs(60));
    let key = PermissionKey::import("mail");

    assert!(cache.check("news", &key).await.unwrap());
    tokio::time::advance(Duration::from_secs(59)).await;
    assert!(cache.check("news", &key).await.unwrap());
    assert_eq!(resolver.calls(), 1);

    tokio::time::advance(Duration::from_secs(2)).await;
    assert!(cache.check("news", &key).await.unwrap());
    assert_eq!(resolver.calls(), 2);

    let stats = cache.stats();
    assert_eq!(stats.hits, 1);
    assert_eq!(stats.misses, 2);
}

#[tokio::test(start_paused = true)]
async fn test_concurrent_checks_resolve_once() {
    let resolver = StaticResolver::slow(Duration::from_millis(200));
    let cache = cache(&resolver, Duration::from_secs(60));

    let checks: Vec<_> = (0..8)
        .map(|_| {
            let cache = Arc::clone(&cache);
            tokio::spawn(async move { cache.check("news", &PermissionKey::export("rss")).await })
        })
        .collect();
    for check in checks {
        assert!(check.await.unwrap().unwrap());
    }

    assert_eq!(resolver.calls(), 1);
    assert_eq!(cache.stats().hits, 7);
}

#[tokio::test]
async fn test_distinct_keys_resolved_separately() {
    let resolver = StaticResolver::allow_all();
    resolver.set("news", &PermissionKey::export("rss"), false);
    let cache = cache(&resolver, Duration::from_secs(60));

    assert!(cache.check("news", &PermissionKey::import("rss")).await.unwrap());
    assert!(!cache.check("news", &PermissionKey::export("rss")).await.unwrap());
    assert!(cache.check("sports", &PermissionKey::export("rss")).await.unwrap());
    assert_eq!(resolver.calls(), 3);

    assert!(matches!(
        cache.require("news", &PermissionKey::export("rss")).await,
        Err(ExchangeError::PermissionDenied { ref directory, .. }) if directory == "news"
    ));
    assert_eq!(resolver.calls(), 3);
}

#[tokio::test]
async fn test_resolver_errors_not_cached() {
    let resolver = StaticResolver::allow_all();
    resolver.set_failing(true);
    let cache = cache(&resolver, Duration::from_secs(60));
    let key = PermissionKey::import("mail");

    assert!(matches!(cache.check("news", &key).await, Err(ExchangeError::Store(_))));
    assert!(cache.check("news", &key).await.is_err());
    assert_eq!(resolver.calls(), 2);

    resolver.set_failing(false);
    assert!(cache.check("news", &key).await.unwrap());
    assert!(cache.check("news", &key).await.unwrap());
    assert_eq!(resolver.calls(), 3);
}

#[tokio::test(start_paused = true)]
async fn test_slow_resolver_times_out() {
    let resolver = StaticResolver::slow(Duration::from_secs(30));
    let cache = cache(&resolver, Duration::from_secs(60));

    let result = cache.check("news", &PermissionKey::import("mail")).await;
    assert!(matches!(result, Err(ExchangeError::Timeout(_))));
}

#[tokio::test]
async fn test_change_notification_invalidates_entry() {
    let resolver = StaticResolver::allow_all();
    let cache = cache(&resolver, Duration::from_secs(3600));
    let key = PermissionKey::export("rss");

    let (tx, rx) = tokio::sync::mpsc::channel(8);
    let listener = cache.spawn_invalidation_listener(rx);

    assert!(cache.check("news", &key).await.unwrap());
    resolver.set("news", &key, false);
    // Still the cached answer
    assert!(cache.check("news", &key).await.unwrap());

    tx.send(PermissionChange::key("news", key.clone())).await.unwrap();
    drop(tx);
    listener.await.unwrap();

    assert!(!cache.check("news", &key).await.unwrap());
    assert_eq!(resolver.calls(), 2);
    assert_eq!(cache.stats().invalidations, 1);
}
