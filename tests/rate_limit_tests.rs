use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use squadron::clock::{Clock, ManualClock};
use squadron::error::FailureKind;
use squadron::kv::MemoryKvStore;
use squadron::rate::RateGate;
use tokio::time::Instant;

fn gate_with(capacity: usize) -> (Arc<RateGate>, Arc<ManualClock>) {
    let clock = Arc::new(ManualClock::new(100_000.0));
    let gate = Arc::new(RateGate::new(
        Arc::new(MemoryKvStore::new()),
        clock.clone(),
        capacity,
    ));
    (gate, clock)
}

fn far_deadline() -> Instant {
    Instant::now() + Duration::from_secs(30)
}

#[tokio::test]
async fn admissions_in_any_window_never_exceed_effective_rpm() {
    let (gate, clock) = gate_with(12);

    // rpm 5 with burst 5: fire far more attempts than the window allows,
    // advancing a virtual second per attempt.
    let mut admitted_at: Vec<f64> = Vec::new();
    for _ in 0..150 {
        let deadline = Instant::now() + Duration::from_millis(20);
        if gate.acquire("p", 5, 5, deadline).await.is_ok() {
            admitted_at.push(clock.epoch_secs());
        }
        clock.advance(Duration::from_secs(1));
    }

    assert!(!admitted_at.is_empty());
    for (i, start) in admitted_at.iter().enumerate() {
        let in_window = admitted_at[i..]
            .iter()
            .take_while(|t| **t < start + 60.0)
            .count();
        assert!(
            in_window <= 5,
            "{} admissions in one trailing minute",
            in_window
        );
    }
}

#[tokio::test]
async fn burst_at_boundary_admits_exactly_burst() {
    let (gate, clock) = gate_with(12);

    // burst + 1 attempts inside the same instant.
    let mut admitted = 0;
    for _ in 0..4 {
        let deadline = Instant::now() + Duration::from_millis(20);
        if gate.acquire("p", 3, 3, deadline).await.is_ok() {
            admitted += 1;
        }
    }
    assert_eq!(admitted, 3);

    // The deferred request stays blocked just before the window frees up
    // and is admitted right after.
    clock.advance(Duration::from_secs(59));
    let denied = gate
        .acquire("p", 3, 3, Instant::now() + Duration::from_millis(20))
        .await;
    assert!(matches!(denied, Err(FailureKind::CancelledByCaller)));

    clock.advance(Duration::from_secs(2));
    assert!(gate.acquire("p", 3, 3, far_deadline()).await.is_ok());
}

#[tokio::test]
async fn windows_are_independent_across_providers() {
    let (gate, _clock) = gate_with(12);

    let short = || Instant::now() + Duration::from_millis(20);
    assert!(gate.acquire("a", 1, 1, short()).await.is_ok());
    assert!(gate.acquire("a", 1, 1, short()).await.is_err());
    // Provider b is untouched by a's exhaustion.
    assert!(gate.acquire("b", 1, 1, short()).await.is_ok());
}

#[tokio::test]
async fn global_gate_bounds_concurrent_acquisitions() {
    let (gate, _clock) = gate_with(2);
    let in_flight = Arc::new(AtomicUsize::new(0));
    let peak = Arc::new(AtomicUsize::new(0));

    let mut handles = Vec::new();
    for _ in 0..8 {
        let gate = gate.clone();
        let in_flight = in_flight.clone();
        let peak = peak.clone();
        handles.push(tokio::spawn(async move {
            let permit = gate.acquire("p", 600, 600, far_deadline()).await.unwrap();
            let current = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            peak.fetch_max(current, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(15)).await;
            in_flight.fetch_sub(1, Ordering::SeqCst);
            drop(permit);
        }));
    }
    for handle in handles {
        handle.await.unwrap();
    }
    assert!(peak.load(Ordering::SeqCst) <= 2);
}

#[tokio::test]
async fn permit_drop_releases_the_global_slot() {
    let (gate, _clock) = gate_with(1);

    let permit = gate.acquire("p", 600, 600, far_deadline()).await.unwrap();
    assert_eq!(gate.global_available(), 0);
    drop(permit);
    assert_eq!(gate.global_available(), 1);
}

#[tokio::test]
async fn deadline_elapsing_returns_cancelled_without_leaks() {
    let (gate, _clock) = gate_with(1);

    // Exhaust the single global slot so the next acquire must wait.
    let held = gate.acquire("p", 1, 1, far_deadline()).await.unwrap();
    let denied = gate
        .acquire("p", 1, 1, Instant::now() + Duration::from_millis(30))
        .await;
    assert!(matches!(denied, Err(FailureKind::CancelledByCaller)));

    // The timed-out waiter left nothing behind: only the held permit
    // accounts for the missing slot, and dropping it restores capacity.
    assert_eq!(gate.global_available(), 0);
    drop(held);
    assert_eq!(gate.global_available(), 1);
}

#[tokio::test]
async fn status_reflects_bucket_window_and_throttle_state() {
    let (gate, _clock) = gate_with(12);

    for _ in 0..2 {
        gate.acquire("p", 10, 20, far_deadline()).await.unwrap();
    }
    let status = gate.status("p", 10, 20).await.unwrap();
    assert_eq!(status.configured_rpm, 10);
    assert_eq!(status.effective_rpm, 10);
    assert_eq!(status.window_occupancy, 2);
    assert_eq!(status.bucket_tokens, 18);
    assert_eq!(status.recent_429_count, 0);

    gate.throttle().record_429("p", 10).await.unwrap();
    let status = gate.status("p", 10, 20).await.unwrap();
    assert_eq!(status.recent_429_count, 1);
}
