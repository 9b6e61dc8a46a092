//! Ordered shutdown of a full session.

mod common;

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use common::{wait_for_state, ScriptedTransport, Step};
use session_keeper::config::SessionConfig;
use session_keeper::connection::{ConnectionState, Identity};
use session_keeper::credentials::{CredentialStore, CREDS_KEY};
use session_keeper::lifecycle::{
    CleanupStatus, RegisterOptions, SessionContext, ShutdownOrchestrator,
};

fn session_config(db_path: &std::path::Path) -> SessionConfig {
    let mut config = SessionConfig::default();
    config.store.db_path = db_path.to_string_lossy().into_owned();
    config.store.flush_interval_ms = 60_000;
    config.health.interval_secs = 1;
    config.shutdown.cleanup_timeout_ms = 2_000;
    config
}

#[tokio::test]
async fn test_session_shuts_down_connection_before_store() {
    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("auth.db");
    let config = session_config(&db_path);

    let transport = ScriptedTransport::new(vec![Step::Open(Identity::Known)]);
    let orchestrator = Arc::new(ShutdownOrchestrator::new());
    let context =
        SessionContext::build(config.clone(), transport.clone(), orchestrator.clone()).unwrap();
    context.start().unwrap();

    let mut state = context.manager.watch_state();
    wait_for_state(&mut state, |s| *s == ConnectionState::Connected).await;

    context.store.set(CREDS_KEY, b"identity".to_vec()).await.unwrap();
    // Buffered; only the shutdown flush makes it durable.
    context.store.set("session:peer", b"s".to_vec()).await.unwrap();
    assert_eq!(context.store.pending_writes(), 1);

    let report = orchestrator.shutdown("test").await;
    assert!(report.is_clean(), "{report}");
    let order: Vec<&str> = report.outcomes.iter().map(|o| o.name.as_str()).collect();
    assert_eq!(order, vec!["connection-manager", "health-monitor", "credential-store"]);

    assert_eq!(context.manager.state(), ConnectionState::Closed);
    assert_eq!(transport.closes(), 1);
    assert!(context.store.is_closed());

    let reopened = CredentialStore::open(&config.store).unwrap();
    assert_eq!(reopened.get(CREDS_KEY).await.unwrap(), Some(b"identity".to_vec()));
    assert_eq!(reopened.get("session:peer").await.unwrap(), Some(b"s".to_vec()));
    reopened.close().await.unwrap();
}

#[tokio::test]
async fn test_health_monitor_is_optional() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = session_config(&dir.path().join("auth.db"));
    config.health.enabled = false;

    let orchestrator = Arc::new(ShutdownOrchestrator::new());
    let transport = ScriptedTransport::new(vec![]);
    let _context = SessionContext::build(config, transport, orchestrator.clone()).unwrap();

    assert_eq!(
        orchestrator.registered(),
        vec!["connection-manager", "credential-store"]
    );
    assert!(orchestrator.shutdown("test").await.is_clean());
}

#[tokio::test]
async fn test_hung_cleanup_does_not_block_the_rest() {
    let orchestrator = Arc::new(ShutdownOrchestrator::new());
    let ran = Arc::new(Mutex::new(Vec::new()));

    orchestrator
        .register(
            "hangs",
            RegisterOptions::new(10, Duration::from_millis(50)),
            || async {
                std::future::pending::<()>().await;
                Ok(())
            },
        )
        .unwrap();
    let tail = ran.clone();
    orchestrator
        .register("after", RegisterOptions::new(1, Duration::from_secs(1)), move || async move {
            tail.lock().unwrap().push("after");
            Ok(())
        })
        .unwrap();

    let started = Instant::now();
    let report = orchestrator.shutdown("test").await;
    assert!(started.elapsed() < Duration::from_secs(1));

    assert_eq!(
        report.outcomes[0].status,
        CleanupStatus::TimedOut(Duration::from_millis(50))
    );
    assert_eq!(report.outcomes[1].status, CleanupStatus::Succeeded);
    assert_eq!(*ran.lock().unwrap(), vec!["after"]);
    assert_eq!(report.failed_count(), 1);
}

#[tokio::test]
async fn test_concurrent_shutdowns_run_cleanups_once() {
    let orchestrator = Arc::new(ShutdownOrchestrator::new());
    let runs = Arc::new(Mutex::new(0u32));

    let counter = runs.clone();
    orchestrator
        .register("slow", RegisterOptions::new(1, Duration::from_secs(1)), move || async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            *counter.lock().unwrap() += 1;
            Ok(())
        })
        .unwrap();

    let first = tokio::spawn({
        let orchestrator = orchestrator.clone();
        async move { orchestrator.shutdown("SIGTERM").await }
    });
    let second = tokio::spawn({
        let orchestrator = orchestrator.clone();
        async move { orchestrator.shutdown("SIGINT").await }
    });

    let (first, second) = (first.await.unwrap(), second.await.unwrap());
    assert_eq!(first, second);
    assert_eq!(*runs.lock().unwrap(), 1);

    let later = orchestrator.shutdown("again").await;
    assert_eq!(later.reason, first.reason);
}
