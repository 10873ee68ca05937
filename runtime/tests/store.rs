//! Integration tests for the Store runtime
//!
//! Covers serialized reduction under concurrency, effect feedback, reading a
//! command's own outcome, action broadcasting and shutdown.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)] // Test code can use unwrap/expect/panic

use booking_core::{SmallVec, effect::Effect, reducer::Reducer, smallvec};
use booking_runtime::{Store, StoreError};
use std::time::Duration;

// ============================================================================
// Test Fixtures
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
enum SeatAction {
    /// Take `n` seats if they fit
    Take { n: u32 },
    /// Release `n` seats
    Release { n: u32 },
    /// Take seats, then emit `Announced` from an effect
    TakeAndAnnounce { n: u32 },
    /// Fed back by an effect
    Announced { taken: u32 },
    /// Emitted after a delay
    Ping,
}

#[derive(Debug, Default)]
struct SeatState {
    capacity: u32,
    taken: u32,
    last_accepted: bool,
    announcements: Vec<u32>,
    pings: u32,
}

struct SeatReducer;

impl Reducer for SeatReducer {
    type State = SeatState;
    type Action = SeatAction;
    type Environment = ();

    fn reduce(
        &self,
        state: &mut SeatState,
        action: SeatAction,
        _env: &(),
    ) -> SmallVec<[Effect<SeatAction>; 4]> {
        match action {
            SeatAction::Take { n } => {
                state.last_accepted = state.taken + n <= state.capacity;
                if state.last_accepted {
                    state.taken += n;
                }
                smallvec![Effect::None]
            },
            SeatAction::Release { n } => {
                state.taken = state.taken.saturating_sub(n);
                smallvec![Effect::None]
            },
            SeatAction::TakeAndAnnounce { n } => {
                state.taken += n;
                let taken = state.taken;
                smallvec![
                    Effect::future(async move {
                        tokio::time::sleep(Duration::from_millis(5)).await;
                        Some(SeatAction::Announced { taken })
                    }),
                    Effect::Delay {
                        duration: Duration::from_millis(10),
                        action: Box::new(SeatAction::Ping),
                    },
                ]
            },
            SeatAction::Announced { taken } => {
                state.announcements.push(taken);
                smallvec![Effect::None]
            },
            SeatAction::Ping => {
                state.pings += 1;
                smallvec![Effect::None]
            },
        }
    }
}

fn seat_store(capacity: u32) -> Store<SeatState, SeatAction, (), SeatReducer> {
    Store::new(
        SeatState {
            capacity,
            ..SeatState::default()
        },
        SeatReducer,
        (),
    )
}

// ============================================================================
// Tests
// ============================================================================

#[tokio::test]
async fn send_and_read_observes_own_outcome_under_contention() {
    let store = seat_store(10);

    let mut handles = Vec::new();
    for _ in 0..50 {
        let store = store.clone();
        handles.push(tokio::spawn(async move {
            store
                .send_and_read(SeatAction::Take { n: 1 }, |s| s.last_accepted)
                .await
                .unwrap()
        }));
    }

    let mut accepted = 0;
    for handle in handles {
        if handle.await.unwrap() {
            accepted += 1;
        }
    }

    assert_eq!(accepted, 10);
    assert_eq!(store.state(|s| s.taken).await, 10);
}

#[tokio::test]
async fn effects_feed_actions_back() {
    let store = seat_store(10);
    store.send(SeatAction::TakeAndAnnounce { n: 3 }).await.unwrap();

    store.settle(Duration::from_secs(1)).await.unwrap();

    let (announcements, pings) = store.state(|s| (s.announcements.clone(), s.pings)).await;
    assert_eq!(announcements, vec![3]);
    assert_eq!(pings, 1);
    assert_eq!(store.pending_effects(), 0);
}

#[tokio::test]
async fn send_and_wait_for_returns_matching_feedback() {
    let store = seat_store(10);

    let observed = store
        .send_and_wait_for(
            SeatAction::TakeAndAnnounce { n: 2 },
            |a| matches!(a, SeatAction::Announced { .. }),
            Duration::from_secs(1),
        )
        .await
        .unwrap();

    assert_eq!(observed, SeatAction::Announced { taken: 2 });
}

#[tokio::test]
async fn send_and_wait_for_times_out() {
    let store = seat_store(10);

    let result = store
        .send_and_wait_for(
            SeatAction::Release { n: 1 },
            |a| matches!(a, SeatAction::Announced { .. }),
            Duration::from_millis(20),
        )
        .await;

    assert_eq!(result, Err(StoreError::Timeout));
}

#[tokio::test]
async fn subscribers_see_every_action() {
    let store = seat_store(10);
    let mut actions = store.subscribe_actions();

    store.send(SeatAction::Take { n: 1 }).await.unwrap();
    store.send(SeatAction::Release { n: 1 }).await.unwrap();

    assert_eq!(actions.recv().await.unwrap(), SeatAction::Take { n: 1 });
    assert_eq!(actions.recv().await.unwrap(), SeatAction::Release { n: 1 });
}

#[tokio::test]
async fn shutdown_rejects_new_actions() {
    let store = seat_store(10);
    store.send(SeatAction::TakeAndAnnounce { n: 1 }).await.unwrap();

    store.shutdown(Duration::from_secs(1)).await.unwrap();

    let result = store.send(SeatAction::Take { n: 1 }).await;
    assert_eq!(result, Err(StoreError::ShutdownInProgress));
}
