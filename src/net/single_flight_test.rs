use std::sync::atomic::AtomicUsize;
use std::time::Duration;

use super::*;

async fn slow_value(value: u32) -> u32 {
    tokio::time::sleep(Duration::from_millis(20)).await;
    value
}

#[tokio::test]
async fn concurrent_callers_share_one_episode() {
    let flight = SingleFlight::<u32>::new();
    let starts = AtomicUsize::new(0);

    let starts = &starts;
    let callers = (0..8).map(|i| {
        flight.run(move || {
            starts.fetch_add(1, Ordering::SeqCst);
            slow_value(100 + i)
        })
    });
    let results = futures::future::join_all(callers).await;

    assert_eq!(starts.load(Ordering::SeqCst), 1);
    assert_eq!(flight.episodes(), 1);
    // Every caller sees the first caller's output.
    assert!(results.iter().all(|r| *r == 100));
}

#[tokio::test]
async fn slot_is_cleared_after_completion() {
    let flight = SingleFlight::<u32>::new();
    assert!(!flight.in_flight());

    assert_eq!(flight.run(|| slow_value(1)).await, 1);
    assert!(!flight.in_flight());

    assert_eq!(flight.run(|| slow_value(2)).await, 2);
    assert_eq!(flight.episodes(), 2);
}

#[tokio::test]
async fn failure_is_delivered_to_every_waiter() {
    let flight = SingleFlight::<Result<(), String>>::new();

    let callers = (0..4).map(|_| {
        flight.run(|| async {
            tokio::time::sleep(Duration::from_millis(10)).await;
            Err::<(), _>("refresh rejected".to_owned())
        })
    });
    let results = futures::future::join_all(callers).await;

    assert_eq!(flight.episodes(), 1);
    assert!(results.iter().all(|r| r.as_ref().err().map(String::as_str) == Some("refresh rejected")));
}

#[tokio::test]
async fn in_flight_while_running() {
    let flight = Arc::new(SingleFlight::<u32>::new());
    let runner = {
        let flight = Arc::clone(&flight);
        tokio::spawn(async move { flight.run(|| slow_value(5)).await })
    };

    tokio::time::sleep(Duration::from_millis(5)).await;
    assert!(flight.in_flight());
    assert_eq!(runner.await.unwrap(), 5);
    assert!(!flight.in_flight());
}

#[tokio::test]
async fn dropped_waiter_does_not_cancel_episode() {
    let flight = SingleFlight::<u32>::new();
    let starts = AtomicUsize::new(0);

    let abandoned = tokio::time::timeout(
        Duration::from_millis(1),
        flight.run(|| {
            starts.fetch_add(1, Ordering::SeqCst);
            slow_value(9)
        }),
    )
    .await;
    assert!(abandoned.is_err());
    assert!(flight.in_flight());

    let joined = flight
        .run(|| {
            starts.fetch_add(1, Ordering::SeqCst);
            slow_value(10)
        })
        .await;

    assert_eq!(joined, 9);
    assert_eq!(starts.load(Ordering::SeqCst), 1);
}
