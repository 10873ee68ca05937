//! # Booking Core
//!
//! Core traits and types for the visit booking engine.
//!
//! Business logic is written as reducers: pure functions that take the current
//! state, an action and an injected environment, mutate the state in place and
//! return descriptions of the side effects to perform afterwards. The runtime
//! crate executes those descriptions outside the state lock.
//!
//! ## Core Concepts
//!
//! - **State**: Domain state owned by a store
//! - **Action**: All inputs to a reducer (commands and the events they produce)
//! - **Reducer**: `(State, Action, Environment) → (State, Effects)`
//! - **Effect**: Side effect descriptions, never executed by the reducer itself
//! - **Environment**: Injected collaborators (clock, gateways, repositories)
//!
//! ## Example
//!
//! ```
//! use booking_core::{effect::Effect, reducer::Reducer, smallvec, SmallVec};
//!
//! #[derive(Default)]
//! struct Counter { count: u32 }
//!
//! #[derive(Clone, Debug)]
//! enum CounterAction { Increment }
//!
//! struct CounterReducer;
//!
//! impl Reducer for CounterReducer {
//!     type State = Counter;
//!     type Action = CounterAction;
//!     type Environment = ();
//!
//!     fn reduce(
//!         &self,
//!         state: &mut Counter,
//!         action: CounterAction,
//!         _env: &(),
//!     ) -> SmallVec<[Effect<CounterAction>; 4]> {
//!         match action {
//!             CounterAction::Increment => state.count += 1,
//!         }
//!         smallvec![Effect::None]
//!     }
//! }
//!
//! let mut state = Counter::default();
//! let effects = CounterReducer.reduce(&mut state, CounterAction::Increment, &());
//! assert_eq!(state.count, 1);
//! assert_eq!(effects.len(), 1);
//! ```

// Re-export commonly used types
pub use chrono::{DateTime, Utc};
pub use serde::{Deserialize, Serialize};
pub use smallvec::{SmallVec, smallvec};

/// Reducer module - The core trait for business logic
///
/// Reducers are pure functions: `(State, Action, Environment) → (State, Effects)`.
/// They contain all business rules and are deterministic given the environment.
pub mod reducer {
    use super::effect::Effect;
    use smallvec::SmallVec;

    /// The Reducer trait - core abstraction for business logic
    ///
    /// # Type Parameters
    ///
    /// - `State`: The domain state this reducer operates on
    /// - `Action`: The action type this reducer processes
    /// - `Environment`: The injected dependencies this reducer needs
    pub trait Reducer {
        /// The state type this reducer operates on
        type State;

        /// The action type this reducer processes
        type Action;

        /// The environment type with injected dependencies
        type Environment;

        /// Reduce an action into state changes and effects
        ///
        /// Validates the action, updates state in place and returns effect
        /// descriptions for the runtime. Most reducers return zero to three
        /// effects, so the return type stays on the stack.
        fn reduce(
            &self,
            state: &mut Self::State,
            action: Self::Action,
            env: &Self::Environment,
        ) -> SmallVec<[Effect<Self::Action>; 4]>;
    }
}

/// Effect module - Side effect descriptions
///
/// Effects are values. The store executes them after the reducer returns and
/// after the state lock has been released.
pub mod effect {
    use futures::FutureExt;
    use std::future::Future;
    use std::pin::Pin;
    use std::time::Duration;

    /// Effect type - describes a side effect to be executed
    ///
    /// # Type Parameters
    ///
    /// - `Action`: The action type that effects can produce (feedback loop)
    pub enum Effect<Action> {
        /// No-op effect
        None,

        /// Run effects in parallel
        Parallel(Vec<Effect<Action>>),

        /// Run effects sequentially
        Sequential(Vec<Effect<Action>>),

        /// Delayed action (for timeouts, retries)
        Delay {
            /// How long to wait
            duration: Duration,
            /// Action to dispatch after delay
            action: Box<Action>,
        },

        /// Arbitrary async computation
        ///
        /// Returns `Option<Action>` - if Some, the action is fed back into the reducer
        Future(Pin<Box<dyn Future<Output = Option<Action>> + Send>>),
    }

    // Manual Debug implementation since Future doesn't implement Debug
    impl<Action> std::fmt::Debug for Effect<Action>
    where
        Action: std::fmt::Debug,
    {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            match self {
                Effect::None => write!(f, "Effect::None"),
                Effect::Parallel(effects) => {
                    f.debug_tuple("Effect::Parallel").field(effects).finish()
                },
                Effect::Sequential(effects) => {
                    f.debug_tuple("Effect::Sequential").field(effects).finish()
                },
                Effect::Delay { duration, action } => f
                    .debug_struct("Effect::Delay")
                    .field("duration", duration)
                    .field("action", action)
                    .finish(),
                Effect::Future(_) => write!(f, "Effect::Future(<future>)"),
            }
        }
    }

    impl<Action> Effect<Action> {
        /// Combine effects to run in parallel
        #[must_use]
        pub const fn merge(effects: Vec<Effect<Action>>) -> Effect<Action> {
            Effect::Parallel(effects)
        }

        /// Chain effects to run sequentially
        #[must_use]
        pub const fn chain(effects: Vec<Effect<Action>>) -> Effect<Action> {
            Effect::Sequential(effects)
        }

        /// Wrap an async block as an effect.
        #[must_use]
        pub fn future<F>(fut: F) -> Effect<Action>
        where
            F: Future<Output = Option<Action>> + Send + 'static,
        {
            Effect::Future(Box::pin(fut))
        }

        /// Wrap an async block whose result is never fed back.
        #[must_use]
        pub fn fire_and_forget<F>(fut: F) -> Effect<Action>
        where
            F: Future<Output = ()> + Send + 'static,
            Action: 'static,
        {
            Effect::Future(Box::pin(fut.map(|()| None)))
        }

        /// Transform the actions this effect feeds back.
        ///
        /// Lets a parent reducer embed a child's effects under its own action type.
        #[must_use]
        pub fn map<B, F>(self, f: F) -> Effect<B>
        where
            F: Fn(Action) -> B + Clone + Send + Sync + 'static,
            Action: 'static,
            B: 'static,
        {
            match self {
                Effect::None => Effect::None,
                Effect::Parallel(effects) => {
                    Effect::Parallel(effects.into_iter().map(|e| e.map(f.clone())).collect())
                },
                Effect::Sequential(effects) => {
                    Effect::Sequential(effects.into_iter().map(|e| e.map(f.clone())).collect())
                },
                Effect::Delay { duration, action } => Effect::Delay {
                    duration,
                    action: Box::new(f(*action)),
                },
                Effect::Future(fut) => Effect::Future(Box::pin(fut.map(move |action| action.map(f)))),
            }
        }

        /// `true` when this effect does nothing.
        #[must_use]
        pub fn is_none(&self) -> bool {
            match self {
                Effect::None => true,
                Effect::Parallel(effects) | Effect::Sequential(effects) => {
                    effects.iter().all(Effect::is_none)
                },
                Effect::Delay { .. } | Effect::Future(_) => false,
            }
        }
    }
}

/// Environment module - Dependency injection traits
pub mod environment {
    use chrono::{DateTime, Utc};

    /// Clock trait - abstracts time operations for testability
    ///
    /// Every time-windowed guard (cancellation notice, check-in day, expiry
    /// cutoff) reads the time through this trait.
    pub trait Clock: Send + Sync {
        /// Get the current time
        fn now(&self) -> DateTime<Utc>;
    }

    /// Production clock backed by the system time.
    #[derive(Debug, Clone, Copy, Default)]
    pub struct SystemClock;

    impl Clock for SystemClock {
        fn now(&self) -> DateTime<Utc> {
            Utc::now()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::effect::Effect;
    use super::environment::{Clock, SystemClock};

    #[test]
    fn nested_none_effects_are_none() {
        let effect: Effect<()> = Effect::merge(vec![Effect::None, Effect::chain(vec![Effect::None])]);
        assert!(effect.is_none());
    }

    #[test]
    fn future_effects_are_not_none() {
        let effect: Effect<()> = Effect::fire_and_forget(async {});
        assert!(!effect.is_none());
        assert_eq!(format!("{effect:?}"), "Effect::Future(<future>)");
    }

    #[tokio::test]
    async fn fire_and_forget_resolves_to_no_action() {
        let Effect::Future(fut) = Effect::<u8>::fire_and_forget(async {}) else {
            unreachable!("fire_and_forget builds a Future effect");
        };
        assert_eq!(fut.await, None);
    }

    #[tokio::test]
    async fn map_rewrites_fed_back_actions() {
        let effect: Effect<u8> = Effect::merge(vec![
            Effect::Delay {
                duration: std::time::Duration::from_millis(5),
                action: Box::new(2),
            },
            Effect::future(async { Some(3) }),
        ]);

        let Effect::Parallel(mut mapped) = effect.map(|n| u32::from(n) * 10) else {
            unreachable!("map keeps the effect shape");
        };
        let Some(Effect::Future(fut)) = mapped.pop() else {
            unreachable!("second effect is a future");
        };
        assert_eq!(fut.await, Some(30));
        assert!(matches!(mapped.pop(), Some(Effect::Delay { action, .. }) if *action == 20));
    }

    #[test]
    fn system_clock_moves_forward() {
        let clock = SystemClock;
        let first = clock.now();
        assert!(clock.now() >= first);
    }
}
