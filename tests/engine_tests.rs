//! End-to-end engine tests over a TOML scheme directory

mod common;

use common::*;
use iox_engine::engine::HealthStatus;
use iox_engine::model::{MessagePayload, ModuleType, NewExportEntry, Scheme};
use iox_engine::module::traits::{ExchangeError, MessageDelivery, PermissionResolver, SchemeStore};
use iox_engine::store::FileSchemeStore;
use iox_engine::{ExchangeConfig, ExchangeEngine, PermissionChange, PermissionKey};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

fn fast_config() -> ExchangeConfig {
    ExchangeConfig {
        import_period: 1,
        queue_period: 1,
        max_retries: 2,
        ..ExchangeConfig::default()
    }
}

async fn eventually<F, Fut>(mut condition: F)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    for _ in 0..100 {
        if condition().await {
            return;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    panic!("condition not reached within 5s");
}

struct Fixture {
    _dir: TempDir,
    engine: ExchangeEngine,
    mailbox: Arc<Mailbox>,
    delivery: Arc<RecordingDelivery>,
    exporter: Arc<RecordingExporter>,
    resolver: Arc<StaticResolver>,
}

async fn fixture(schemes: Vec<Scheme>) -> Fixture {
    let dir = TempDir::new().unwrap();
    let store = FileSchemeStore::open(dir.path().join("schemes")).unwrap();
    for scheme in schemes {
        store.save(scheme).await.unwrap();
    }

    let mailbox = Mailbox::new();
    let delivery = RecordingDelivery::new();
    let exporter = RecordingExporter::new();
    let resolver = StaticResolver::allow_all();

    let engine = ExchangeEngine::builder(fast_config())
        .build(
            Arc::new(store) as Arc<dyn SchemeStore>,
            Arc::clone(&resolver) as Arc<dyn PermissionResolver>,
            Arc::clone(&delivery) as Arc<dyn MessageDelivery>,
        )
        .unwrap();

    let (import, _errors) = import_capability(&mailbox);
    engine.register_module(mail_registration(), import).await.unwrap();
    engine
        .register_module(rss_registration(), export_capability(&exporter))
        .await
        .unwrap();

    Fixture {
        _dir: dir,
        engine,
        mailbox,
        delivery,
        exporter,
        resolver,
    }
}

fn export_entry(tx: &str) -> NewExportEntry {
    NewExportEntry {
        directory: "sports".to_string(),
        protocol: "rss".to_string(),
        scheme_name: "sports-feed".to_string(),
        transaction_id: tx.to_string(),
        payload: MessagePayload::new(format!("report {}", tx)),
    }
}

#[test]
fn test_invalid_config_rejected_by_builder() {
    let config = ExchangeConfig {
        thread_pool_size: 0,
        ..ExchangeConfig::default()
    };
    let built = ExchangeEngine::builder(config).build(
        Arc::new(iox_engine::store::InMemorySchemeStore::new()),
        StaticResolver::allow_all(),
        RecordingDelivery::new(),
    );
    assert!(built.is_err());
}

#[tokio::test]
async fn test_activation_reports_unusable_schemes() {
    let broken = Scheme::new("broken", "broken-inbox", ModuleType::Import, "mail")
        .with_config("host", "imap.example.org");
    let no_module = Scheme::new("ftp", "ftp-drop", ModuleType::Export, "ftp");
    let f = fixture(vec![
        mail_scheme("sports-inbox"),
        broken,
        rss_scheme("sports-feed"),
        no_module,
    ])
    .await;

    let failures = f.engine.activate_schemes().await.unwrap();
    let mut failed: Vec<&str> = failures.iter().map(|(name, _)| name.as_str()).collect();
    failed.sort();
    assert_eq!(failed, vec!["broken-inbox", "ftp-drop"]);
    assert!(failures.iter().all(|(_, e)| matches!(e, ExchangeError::Config(_))));

    let mail = f.engine.registry().find_by_id("import:mail").await.unwrap();
    assert_eq!(mail.registration.schemes, vec!["sports-inbox"]);
    let rss = f.engine.registry().find_by_id("export:rss").await.unwrap();
    assert_eq!(rss.registration.schemes, vec!["sports-feed"]);

    let status = f.engine.status().await.unwrap();
    assert_eq!(status.overall_status, HealthStatus::Degraded);
    assert_eq!(status.disabled_schemes().len(), 1);
    assert_eq!(status.disabled_schemes()[0].0, "broken-inbox");
}

#[tokio::test]
async fn test_engine_imports_and_exports_until_shutdown() {
    let f = fixture(vec![mail_scheme("sports-inbox"), rss_scheme("sports-feed")]).await;
    assert!(f.engine.activate_schemes().await.unwrap().is_empty());

    f.mailbox.push("m1", "sports", "goal");
    f.mailbox.push("m2", "sports", "full time");
    f.engine.enqueue_export(export_entry("T1")).await.unwrap();
    f.engine.enqueue_export(export_entry("T2")).await.unwrap();

    f.engine.start().await;

    let mailbox = Arc::clone(&f.mailbox);
    eventually(|| {
        let mailbox = Arc::clone(&mailbox);
        async move { mailbox.unread_ids().is_empty() }
    })
    .await;
    let exporter = Arc::clone(&f.exporter);
    eventually(|| {
        let exporter = Arc::clone(&exporter);
        async move { exporter.exported_ids().len() == 2 }
    })
    .await;

    assert_eq!(f.delivery.delivered_bodies(), vec!["goal", "full time"]);
    assert_eq!(f.exporter.exported_ids(), vec!["T1", "T2"]);
    assert_eq!(f.engine.archived().await.unwrap().len(), 2);

    let status = f.engine.status().await.unwrap();
    assert_eq!(status.overall_status, HealthStatus::Healthy);
    assert!(status.export_pending_protocols.is_empty());
    assert!(status.import_schemes[0].cycles >= 1);

    f.engine.shutdown().await;
    assert!(f.engine.shutdown_controller().is_triggered());
    assert_eq!(f.mailbox.opens(), f.mailbox.closes());
}

#[tokio::test]
async fn test_dead_letter_requeued_through_engine() {
    let f = fixture(vec![rss_scheme("sports-feed")]).await;
    f.engine.activate_schemes().await.unwrap();
    f.resolver.set("sports", &PermissionKey::export("rss"), false);

    let id = f.engine.enqueue_export(export_entry("T1")).await.unwrap();
    let shutdown = f.engine.shutdown_controller().subscribe();
    f.engine.processor().tick(&shutdown).await.unwrap();

    let dead = f.engine.dead_letters().await.unwrap();
    assert_eq!(dead.len(), 1);
    assert_eq!(f.engine.status().await.unwrap().overall_status, HealthStatus::Degraded);

    // Grant the permission and tell the cache about it
    f.resolver.set("sports", &PermissionKey::export("rss"), true);
    let changes = f.engine.permission_changes();
    changes.send(PermissionChange::directory("sports")).await.unwrap();
    let permissions = Arc::clone(f.engine.permissions());
    eventually(|| {
        let permissions = Arc::clone(&permissions);
        async move { permissions.stats().invalidations > 0 }
    })
    .await;

    f.engine.requeue_dead_letter(id).await.unwrap();
    f.engine.processor().tick(&shutdown).await.unwrap();

    assert!(f.engine.dead_letters().await.unwrap().is_empty());
    assert_eq!(f.exporter.exported_ids(), vec!["T1"]);
}
