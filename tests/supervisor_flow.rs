//! Ring supervisor scenarios against the simulated modem

use fonacom_core::{
    FixedReply, RingOutcome, RingSupervisor, Session, SessionConfig, SessionState,
    SimulatedModem, SupervisorConfig,
};
use std::time::Duration;

fn config(interval_ms: u64) -> SupervisorConfig {
    SupervisorConfig {
        interval: Duration::from_millis(interval_ms),
    }
}

async fn wait_until(mut condition: impl FnMut() -> bool) -> bool {
    for _ in 0..200 {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    condition()
}

#[tokio::test]
async fn heartbeat_keeps_probing() {
    let modem = SimulatedModem::new();
    let session = Session::new(SessionConfig::bare(), Box::new(modem.clone()));
    let handle = RingSupervisor::new(session.clone(), config(10), FixedReply("hi".into())).start();

    let probes = || modem.written_lines().iter().filter(|l| *l == "AT").count();
    assert!(wait_until(|| probes() >= 4).await);

    handle.shutdown().await.unwrap();
    assert_eq!(session.state(), SessionState::Disconnected);
    assert_eq!(modem.connect_count(), 1);
    assert_eq!(modem.disconnect_count(), 1);
}

#[tokio::test]
async fn heartbeat_reconnects_after_fault() {
    let modem = SimulatedModem::new();
    let session = Session::new(SessionConfig::bare(), Box::new(modem.clone()));
    let handle = RingSupervisor::new(session.clone(), config(10), FixedReply("hi".into())).start();

    assert!(wait_until(|| session.is_connected()).await);
    modem.cut_link();
    assert!(wait_until(|| !session.is_connected()).await);
    assert!(!handle.is_stopping());

    modem.restore_link();
    assert!(wait_until(|| modem.connect_count() >= 2 && session.is_connected()).await);

    handle.shutdown().await.unwrap();
    assert!(!modem.is_open());
}

#[tokio::test]
async fn ring_answers_humans_and_skips_services() {
    let modem = SimulatedModem::new();
    modem.deliver("+14155550123", "Where are you?");
    modem.deliver("+22395", "Your bill is ready");

    let session = Session::new(SessionConfig::default(), Box::new(modem.clone()));
    let handle = RingSupervisor::new(
        session.clone(),
        config(3_600_000),
        FixedReply("Driving, back soon".into()),
    )
    .start();
    assert!(wait_until(|| session.is_connected()).await);

    // the first heartbeat may still hold the transport
    let mut outcome = handle.ring_handle().ring();
    for _ in 0..100 {
        if !matches!(outcome, RingOutcome::Deferred) {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
        outcome = handle.ring_handle().ring();
    }
    let RingOutcome::Dispatched(task) = outcome else {
        panic!("ring never found the transport free");
    };
    assert_eq!(task.await.unwrap().unwrap(), 1);

    assert_eq!(
        modem.sent_messages(),
        vec![("14155550123".to_string(), "Driving, back soon".to_string())]
    );
    handle.shutdown().await.unwrap();
    assert_eq!(modem.disconnect_count(), 1);
}

#[tokio::test]
async fn ring_while_busy_leaves_lock_alone() {
    let modem = SimulatedModem::new();
    modem.deliver("+14155550123", "Hello");

    let session = Session::new(SessionConfig::bare(), Box::new(modem.clone()));
    let handle = RingSupervisor::new(session.clone(), config(3_600_000), FixedReply("x".into()))
        .start();
    assert!(wait_until(|| session.is_connected()).await);

    let held = session.lock().await;
    modem.clear_written();

    assert!(matches!(handle.ring_handle().ring(), RingOutcome::Deferred));
    assert!(session.try_lock().is_none());
    assert!(modem.written().is_empty());
    assert!(modem.sent_messages().is_empty());

    drop(held);
    handle.shutdown().await.unwrap();
    assert_eq!(modem.disconnect_count(), 1);
}

#[tokio::test]
async fn stop_waits_for_running_ring() {
    let modem = SimulatedModem::new();
    modem.deliver("+14155550123", "Hello");

    let session = Session::new(SessionConfig::bare(), Box::new(modem.clone()));
    let handle = RingSupervisor::new(session.clone(), config(3_600_000), FixedReply("ok".into()))
        .start();
    assert!(wait_until(|| session.is_connected()).await);

    let ring = handle.ring_handle();
    let mut outcome = ring.ring();
    while matches!(outcome, RingOutcome::Deferred) {
        tokio::time::sleep(Duration::from_millis(5)).await;
        outcome = ring.ring();
    }
    handle.shutdown().await.unwrap();

    // the disconnect queued behind the reply, so the reply went out first
    assert_eq!(modem.sent_messages().len(), 1);
    assert_eq!(modem.disconnect_count(), 1);
    assert_eq!(session.state(), SessionState::Disconnected);
}
