//! Concurrency stress tests for last-place scenarios.
//!
//! Many requests race for the same slot; the ledger must never admit more
//! visitors than the site capacity.
//!
//! Run with: `cargo test --test concurrency_stress_test -- --nocapture`

#![allow(clippy::unwrap_used, clippy::expect_used)]

mod common;

use common::{harness, morning, reserve_request, taj, visit_date};
use futures::future::join_all;
use visit_booking::{
    BookingError,
    availability::CommittedOccupancy,
    types::{SlotKey, TicketStatus},
};

async fn committed_on_morning(h: &common::Harness) -> u32 {
    let key = SlotKey::new(taj(), visit_date(), morning());
    h.engine().store().state(|s| s.ledger.committed(&key)).await
}

/// 150 single-visitor reservations for a 100-place slot.
///
/// Exactly 100 succeed, the other 50 fail with `CapacityExceeded`.
#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn exactly_capacity_single_visitor_reservations_succeed() {
    let h = harness().await;
    let engine = h.engine().clone();

    let attempts = (0..150).map(|i| {
        let engine = engine.clone();
        tokio::spawn(async move { engine.reserve(reserve_request(&format!("user-{i}"), 1)).await })
    });
    let results: Vec<_> = join_all(attempts).await.into_iter().map(Result::unwrap).collect();

    let accepted = results.iter().filter(|r| r.is_ok()).count();
    let rejected = results
        .iter()
        .filter(|r| matches!(r, Err(BookingError::CapacityExceeded { .. })))
        .count();

    println!("accepted: {accepted}, rejected: {rejected}");
    assert_eq!(accepted, 100);
    assert_eq!(rejected, 50);

    // The full slot is no longer offered
    let offered = h.engine().available_slots(&taj(), visit_date()).await.unwrap();
    assert!(offered.iter().all(|s| s.slot != morning()));
}

/// Parties of three: 33 fit, leaving one place no party can take.
#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn parties_never_overfill_the_slot() {
    let h = harness().await;
    let engine = h.engine().clone();

    let attempts = (0..60).map(|i| {
        let engine = engine.clone();
        tokio::spawn(async move { engine.reserve(reserve_request(&format!("family-{i}"), 3)).await })
    });
    let results: Vec<_> = join_all(attempts).await.into_iter().map(Result::unwrap).collect();

    let accepted = results.iter().filter(|r| r.is_ok()).count();
    assert_eq!(accepted, 33);
    for result in results.iter().filter_map(|r| r.as_ref().err()) {
        assert!(
            matches!(result, BookingError::CapacityExceeded { requested: 3, available } if *available < 3),
            "unexpected error: {result}"
        );
    }
    assert_eq!(committed_on_morning(&h).await, 99);

    // The last place still goes to a single visitor
    let single = h.engine().reserve(reserve_request("solo", 1)).await.unwrap();
    assert_eq!(single.status, TicketStatus::Booked);
}

/// Cancellations racing with new reservations never push occupancy past
/// capacity, and every released place can be taken again.
#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn cancellations_release_places_under_contention() {
    let h = harness().await;
    let engine = h.engine().clone();

    let mut held = Vec::new();
    for i in 0..100 {
        held.push(engine.reserve(reserve_request(&format!("holder-{i}"), 1)).await.unwrap());
    }
    assert_eq!(committed_on_morning(&h).await, 100);

    let cancels = held.iter().take(20).map(|ticket| {
        let engine = engine.clone();
        let reference = ticket.reference.clone();
        tokio::spawn(async move { engine.cancel(reference, "released".into()).await })
    });
    let grabs = (0..40).map(|i| {
        let engine = engine.clone();
        tokio::spawn(async move { engine.reserve(reserve_request(&format!("grabber-{i}"), 1)).await })
    });
    let (cancelled, grabbed) = tokio::join!(join_all(cancels), join_all(grabs));

    assert!(cancelled.into_iter().all(|r| r.unwrap().is_ok()));
    let grabbed = grabbed.into_iter().map(Result::unwrap).filter(Result::is_ok).count();
    assert!(grabbed <= 20, "at most the released places can be taken ({grabbed})");

    let committed = committed_on_morning(&h).await;
    assert_eq!(committed, 80 + u32::try_from(grabbed).unwrap());
    assert!(committed <= 100);
}
