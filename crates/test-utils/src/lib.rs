// crates/test-utils/src/lib.rs

pub mod builders;
pub mod fake_dispatcher;

use std::sync::{Arc, Once};
use std::time::Duration;

use tokio::sync::mpsc;
use tracing_subscriber::{fmt, EnvFilter};

use labqueue::engine::{QueueCore, QueueHandle, QueueRuntime, QueueState, RuntimeOptions};
use labqueue::protocol::ProtocolRegistry;
use labqueue::store::{MemoryJournal, RunJournal};
use labqueue::types::OrphanPolicy;

use crate::fake_dispatcher::{RecordingAlerts, ScriptedDispatcher};

static INIT: Once = Once::new();

/// Initialise tracing for tests.
///
/// - Uses `with_test_writer()`, so logs are captured per-test.
/// - The Rust test harness only prints captured output for **failing** tests
///   (unless you run with `-- --nocapture`).
///
/// Enable levels with e.g.:
/// `RUST_LOG=debug cargo test`
pub fn init_tracing() {
    INIT.call_once(|| {
        let filter =
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

        fmt()
            .with_env_filter(filter)
            .with_test_writer() // print only for failing tests unless --nocapture
            .with_target(true)
            .init();
    });
}

/// Run a future with a 5-second timeout.
#[allow(dead_code)]
pub async fn with_timeout<F, T>(f: F) -> T
where
    F: std::future::Future<Output = T>,
{
    tokio::time::timeout(Duration::from_secs(5), f)
        .await
        .expect("Test timed out after 5 seconds")
}

/// A queue service wired to fakes, with the run loop not yet spawned.
///
/// Tests drive dispatch deterministically with `runtime.tick()`, or spawn
/// `runtime.run()` to exercise the real loop.
pub struct TestQueue {
    pub handle: QueueHandle,
    pub runtime: QueueRuntime<ScriptedDispatcher>,
    pub dispatcher: ScriptedDispatcher,
    pub alerts: RecordingAlerts,
}

/// Fast timings for tests.
pub fn test_options() -> RuntimeOptions {
    RuntimeOptions {
        tick_interval: Duration::from_millis(10),
        dispatch_timeout: Duration::from_millis(200),
    }
}

/// In-memory queue over `registry`, initialized and `READY`.
pub async fn test_queue(registry: ProtocolRegistry, dispatcher: ScriptedDispatcher) -> TestQueue {
    test_queue_with(
        registry,
        dispatcher,
        Box::new(MemoryJournal::new()),
        OrphanPolicy::Fail,
        test_options(),
    )
    .await
}

pub async fn test_queue_with(
    registry: ProtocolRegistry,
    dispatcher: ScriptedDispatcher,
    journal: Box<dyn RunJournal>,
    policy: OrphanPolicy,
    options: RuntimeOptions,
) -> TestQueue {
    let (tx, rx) = mpsc::channel(64);
    let alerts = RecordingAlerts::new();

    let handle = QueueHandle::new(
        QueueCore::initializing(QueueState::Ready),
        Arc::new(registry),
        journal,
        Arc::new(alerts.clone()),
        tx,
    );
    handle
        .initialize(policy)
        .await
        .expect("queue initializes");

    let runtime = QueueRuntime::new(handle.clone(), rx, dispatcher.clone(), options);

    TestQueue {
        handle,
        runtime,
        dispatcher,
        alerts,
    }
}

/// Let spawned alert deliveries run.
pub async fn settle() {
    for _ in 0..10 {
        tokio::task::yield_now().await;
    }
}
