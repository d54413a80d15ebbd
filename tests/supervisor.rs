mod common;

use common::{FakeEngine, fast_policy};
use office_pdf::ConversionError;
use office_pdf::supervisor::{EngineState, RetryPolicy};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

#[tokio::test(flavor = "multi_thread")]
async fn healthy_engine_is_reused() {
    let engine = FakeEngine::text_document();
    let mut supervisor = engine.supervisor();

    let first = supervisor.ensure().await.expect("first ensure");
    let second = supervisor.ensure().await.expect("second ensure");

    assert_eq!(first, second);
    assert_eq!(engine.launches(), 1);
    assert_eq!(engine.connects(), 1);
    assert_eq!(supervisor.state(), EngineState::Ready);
    assert_eq!(supervisor.pid(), Some(1001));
}

#[tokio::test(flavor = "multi_thread")]
async fn crashed_engine_is_restarted_with_a_new_connection() {
    let engine = FakeEngine::text_document();
    let mut supervisor = engine.supervisor();
    let before = supervisor.ensure().await.expect("ensure");

    engine.state.crash();
    assert!(!supervisor.is_alive());
    assert_eq!(supervisor.state(), EngineState::Crashed);

    let after = supervisor.ensure().await.expect("ensure after crash");
    assert_ne!(before, after);
    assert!(after.generation() > before.generation());
    assert_eq!(engine.launches(), 2);
    assert_eq!(supervisor.state(), EngineState::Ready);
}

#[tokio::test(flavor = "multi_thread")]
async fn connects_after_transient_failures() {
    let engine = FakeEngine::text_document();
    engine.state.failing_connects.store(3, Ordering::SeqCst);
    let mut supervisor = engine.supervisor();

    supervisor.ensure().await.expect("ensure");
    assert_eq!(engine.connects(), 4);
    assert_eq!(engine.launches(), 1);
}

#[tokio::test(flavor = "multi_thread")]
async fn gives_up_after_max_attempts() {
    let engine = FakeEngine::text_document();
    engine.state.failing_connects.store(u32::MAX, Ordering::SeqCst);
    let mut supervisor = engine.supervisor_with(fast_policy());

    let err = supervisor.ensure().await.unwrap_err();
    assert!(matches!(err, ConversionError::Connection { attempts: 5 }), "{err:?}");
    assert_eq!(engine.connects(), 5);
}

#[tokio::test(flavor = "multi_thread")]
async fn unbounded_policy_keeps_trying() {
    let engine = FakeEngine::text_document();
    engine.state.failing_connects.store(20, Ordering::SeqCst);
    let mut supervisor = engine.supervisor_with(RetryPolicy {
        backoff: Duration::from_millis(1),
        max_attempts: 0,
    });

    supervisor.ensure().await.expect("ensure");
    assert_eq!(engine.connects(), 21);
}

#[tokio::test(flavor = "multi_thread")]
async fn engine_dying_while_connecting_is_a_process_error() {
    let engine = FakeEngine::text_document();
    engine.state.failing_connects.store(u32::MAX, Ordering::SeqCst);
    let mut supervisor = engine.supervisor_with(RetryPolicy {
        backoff: Duration::from_millis(5),
        max_attempts: 0,
    });

    let crasher = engine.clone();
    let watcher = tokio::spawn(async move {
        while crasher.connects() == 0 {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
        crasher.state.crash();
    });

    let err = supervisor.ensure().await.unwrap_err();
    watcher.await.unwrap();
    assert!(matches!(err, ConversionError::Process(_)), "{err:?}");
    assert!(err.is_retryable());
    assert_eq!(supervisor.state(), EngineState::Stopped);
}

#[tokio::test(flavor = "multi_thread")]
async fn teardown_is_idempotent() {
    let engine = FakeEngine::text_document();
    let mut supervisor = engine.supervisor();
    supervisor.ensure().await.expect("ensure");

    supervisor.teardown();
    supervisor.teardown();

    assert_eq!(engine.kills(), 1);
    assert_eq!(engine.state.terminates.load(Ordering::SeqCst), 1);
    assert_eq!(supervisor.state(), EngineState::Stopped);
    assert_eq!(supervisor.pid(), None);
}

#[tokio::test(flavor = "multi_thread")]
async fn teardown_kills_even_when_terminate_fails() {
    let engine = FakeEngine::text_document();
    engine.state.fail_terminate.store(true, Ordering::SeqCst);
    let mut supervisor = engine.supervisor();
    supervisor.ensure().await.expect("ensure");

    supervisor.teardown();
    assert_eq!(engine.kills(), 1);
    assert_eq!(supervisor.state(), EngineState::Stopped);
}

#[tokio::test(flavor = "multi_thread")]
async fn teardown_skips_busy_desktop() {
    let engine = FakeEngine::text_document();
    let mut supervisor = engine.supervisor();
    let conn = supervisor.ensure().await.expect("ensure");

    let desktop = conn.desktop();
    let _busy = desktop.lock().unwrap();
    supervisor.teardown();

    assert_eq!(engine.state.terminates.load(Ordering::SeqCst), 0);
    assert_eq!(engine.kills(), 1);
}

#[tokio::test(flavor = "multi_thread")]
async fn dropping_the_supervisor_stops_the_engine() {
    let engine = FakeEngine::text_document();
    {
        let mut supervisor = engine.supervisor();
        supervisor.ensure().await.expect("ensure");
    }
    assert_eq!(engine.kills(), 1);
    assert!(!engine.state.engine_alive());
}

#[tokio::test(flavor = "multi_thread")]
async fn shutdown_is_idempotent() {
    let engine = FakeEngine::text_document();
    let mut supervisor = engine.supervisor();
    supervisor.ensure().await.expect("ensure");

    supervisor.shutdown().await;
    supervisor.shutdown().await;

    assert_eq!(engine.kills(), 1);
    assert_eq!(engine.state.terminates.load(Ordering::SeqCst), 1);
    assert_eq!(supervisor.state(), EngineState::Stopped);
}

#[tokio::test]
async fn slow_shutdown_leaves_the_runtime_responsive() {
    let engine = FakeEngine::text_document();
    *engine.state.terminate_delay.lock().unwrap() = Some(Duration::from_millis(300));
    let mut supervisor = engine.supervisor();
    supervisor.ensure().await.expect("ensure");

    let ticks = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&ticks);
    let ticker = tokio::spawn(async move {
        loop {
            tokio::time::sleep(Duration::from_millis(10)).await;
            counter.fetch_add(1, Ordering::SeqCst);
        }
    });

    supervisor.shutdown().await;
    ticker.abort();

    assert_eq!(engine.kills(), 1);
    assert!(ticks.load(Ordering::SeqCst) >= 3, "runtime stalled during shutdown");
}
