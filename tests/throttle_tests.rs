use std::sync::Arc;
use std::time::Duration;

use squadron::clock::ManualClock;
use squadron::event::{MemoryEventLog, SquadronEvent};
use squadron::kv::MemoryKvStore;
use squadron::rate::throttle::AdaptiveThrottle;

const CONFIGURED: u32 = 100;

fn fixture() -> (AdaptiveThrottle, Arc<ManualClock>, Arc<MemoryEventLog>) {
    let clock = Arc::new(ManualClock::new(50_000.0));
    let log = Arc::new(MemoryEventLog::new());
    let throttle = AdaptiveThrottle::new(Arc::new(MemoryKvStore::new()), clock.clone())
        .with_event_handler(log.clone());
    (throttle, clock, log)
}

async fn spike(throttle: &AdaptiveThrottle) {
    for _ in 0..3 {
        throttle.record_429("p", CONFIGURED).await.unwrap();
    }
}

#[tokio::test]
async fn spike_drops_effective_rpm_to_eighty_percent() {
    let (throttle, _clock, log) = fixture();
    spike(&throttle).await;

    let effective = throttle.effective_rpm("p", CONFIGURED).await.unwrap();
    assert!(effective <= CONFIGURED * 8 / 10);
    assert!(effective >= CONFIGURED / 2);

    assert!(log.events().await.iter().any(|e| matches!(
        e,
        SquadronEvent::ThrottleEngaged { provider, .. } if provider == "p"
    )));
}

#[tokio::test]
async fn cap_never_falls_below_half_of_configured() {
    let (throttle, clock, _log) = fixture();

    // Repeated spike episodes separated by a minute each.
    for _ in 0..8 {
        spike(&throttle).await;
        clock.advance(Duration::from_secs(61));
        spike(&throttle).await;
    }
    let effective = throttle.effective_rpm("p", CONFIGURED).await.unwrap();
    assert!(effective >= CONFIGURED / 2, "effective {}", effective);
}

#[tokio::test]
async fn restoration_is_at_most_ten_percent_per_clean_minute() {
    let (throttle, clock, _log) = fixture();
    spike(&throttle).await;
    let dropped = throttle.effective_rpm("p", CONFIGURED).await.unwrap();
    assert_eq!(dropped, 80);

    let mut previous = dropped;
    for _ in 0..6 {
        clock.advance(Duration::from_secs(61));
        let restored = throttle.effective_rpm("p", CONFIGURED).await.unwrap();
        assert!(restored >= previous);
        assert!(restored - previous <= CONFIGURED / 10);
        assert!(restored <= CONFIGURED);
        previous = restored;
    }
    assert_eq!(previous, CONFIGURED);
}

#[tokio::test]
async fn full_restoration_takes_at_least_the_arithmetic_minimum() {
    let (throttle, clock, log) = fixture();
    spike(&throttle).await;
    assert_eq!(throttle.effective_rpm("p", CONFIGURED).await.unwrap(), 80);

    // (100 - 80) / (10% of 100) = 2 clean intervals minimum.
    clock.advance(Duration::from_secs(61));
    let after_one = throttle.effective_rpm("p", CONFIGURED).await.unwrap();
    assert!(after_one < CONFIGURED, "restored too early");

    clock.advance(Duration::from_secs(61));
    assert_eq!(throttle.effective_rpm("p", CONFIGURED).await.unwrap(), CONFIGURED);

    assert!(log.events().await.iter().any(|e| matches!(
        e,
        SquadronEvent::ThrottleRestored { provider, effective_rpm }
            if provider == "p" && *effective_rpm == CONFIGURED
    )));
}

#[tokio::test]
async fn throttle_state_is_per_provider() {
    let (throttle, _clock, _log) = fixture();
    spike(&throttle).await;

    assert!(throttle.effective_rpm("p", CONFIGURED).await.unwrap() < CONFIGURED);
    assert_eq!(throttle.effective_rpm("q", CONFIGURED).await.unwrap(), CONFIGURED);
    assert_eq!(throttle.recent_429s("q").await.unwrap(), 0);
}
