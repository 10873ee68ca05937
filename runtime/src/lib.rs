//! # Booking Runtime
//!
//! Runtime implementation for the visit booking engine.
//!
//! This crate provides the [`Store`] that serializes reducer execution and
//! runs the effects reducers describe, plus the resilience pieces the engine
//! wraps around its collaborators.
//!
//! ## Core Components
//!
//! - **Store**: Owns the state, runs the reducer under a write lock, then spawns effects
//! - **Retry**: Exponential backoff for transient collaborator failures
//! - **Circuit breaker**: Fail-fast gate for a collaborator that keeps failing
//! - **Dead letter queue**: Bounded parking lot for work that exhausted its retries
//!
//! ## Example
//!
//! ```ignore
//! use booking_runtime::Store;
//!
//! let store = Store::new(initial_state, my_reducer, environment);
//!
//! // Send an action and read the outcome under the same lock
//! let outcome = store.send_and_read(Action::DoSomething, |s| s.last_outcome.clone()).await?;
//!
//! // Read state
//! let value = store.state(|s| s.some_field).await;
//! ```

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};

/// Retry logic with exponential backoff
pub mod retry;

/// Circuit breaker pattern for preventing cascading failures
pub mod circuit_breaker;

/// Prometheus exporter and store metric descriptions
pub mod metrics;

/// Error types for the Store runtime
pub mod error {
    use thiserror::Error;

    /// Errors that can occur during Store operations
    #[derive(Error, Debug, Clone, PartialEq, Eq)]
    pub enum StoreError {
        /// Store is shutting down and not accepting new actions
        #[error("Store is shutting down")]
        ShutdownInProgress,

        /// Shutdown timed out waiting for effects to complete
        #[error("Shutdown timed out with {0} effects still running")]
        ShutdownTimeout(usize),

        /// Timeout waiting for a matching action or for effects to settle
        #[error("Timeout waiting for action")]
        Timeout,

        /// Action broadcast channel closed
        #[error("Action broadcast channel closed")]
        ChannelClosed,
    }
}

pub use error::StoreError;

/// An entry parked in a [`DeadLetterQueue`].
#[derive(Debug, Clone)]
pub struct DeadLetter<T> {
    /// The work that could not be completed
    pub payload: T,
    /// Number of attempts made before giving up
    pub attempts: usize,
    /// Last error observed
    pub error_message: String,
    /// When the entry was parked
    pub failed_at: DateTime<Utc>,
}

/// Bounded FIFO of work that exhausted its retries.
///
/// Cloning shares the underlying queue. When the queue is full the oldest
/// entry is dropped.
#[derive(Debug)]
pub struct DeadLetterQueue<T> {
    queue: Arc<Mutex<VecDeque<DeadLetter<T>>>>,
    max_size: usize,
}

impl<T> DeadLetterQueue<T> {
    /// Create a queue holding at most `max_size` entries.
    #[must_use]
    pub fn new(max_size: usize) -> Self {
        Self {
            queue: Arc::new(Mutex::new(VecDeque::new())),
            max_size: max_size.max(1),
        }
    }

    /// Park a failed payload.
    pub fn push(&self, payload: T, error_message: String, attempts: usize) {
        let mut queue = self
            .queue
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);

        if queue.len() >= self.max_size {
            queue.pop_front();
            ::metrics::counter!("store_dead_letters_dropped_total").increment(1);
            tracing::warn!(max_size = self.max_size, "DLQ at capacity, dropping oldest entry");
        }

        queue.push_back(DeadLetter {
            payload,
            attempts,
            error_message,
            failed_at: Utc::now(),
        });

        // Queue length is bounded by max_size
        #[allow(clippy::cast_precision_loss)]
        ::metrics::gauge!("store_dead_letters").set(queue.len() as f64);
        ::metrics::counter!("store_dead_letters_total").increment(1);

        tracing::warn!(attempts, queue_size = queue.len(), "Operation added to dead letter queue");
    }

    /// Number of parked entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.queue
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .len()
    }

    /// `true` when nothing is parked.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Remove and return every parked entry, oldest first.
    pub fn drain(&self) -> Vec<DeadLetter<T>> {
        let mut queue = self
            .queue
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        let entries: Vec<_> = queue.drain(..).collect();
        ::metrics::gauge!("store_dead_letters").set(0.0);
        tracing::info!(count = entries.len(), "Drained dead letter queue");
        entries
    }

    /// Oldest parked entry, if any.
    #[must_use]
    pub fn peek(&self) -> Option<DeadLetter<T>>
    where
        T: Clone,
    {
        self.queue
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .front()
            .cloned()
    }

    /// Configured capacity.
    #[must_use]
    pub const fn max_size(&self) -> usize {
        self.max_size
    }
}

impl<T> Clone for DeadLetterQueue<T> {
    fn clone(&self) -> Self {
        Self {
            queue: Arc::clone(&self.queue),
            max_size: self.max_size,
        }
    }
}

impl<T> Default for DeadLetterQueue<T> {
    fn default() -> Self {
        Self::new(1000)
    }
}

/// Store construction options.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Capacity of the action broadcast channel
    pub broadcast_capacity: usize,
}

impl StoreConfig {
    /// Override the broadcast channel capacity.
    #[must_use]
    pub const fn with_broadcast_capacity(mut self, capacity: usize) -> Self {
        self.broadcast_capacity = capacity;
        self
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            broadcast_capacity: 1024,
        }
    }
}

/// Store module - the runtime for reducers
pub mod store {
    use super::{StoreConfig, StoreError};
    use booking_core::effect::Effect;
    use booking_core::reducer::Reducer;
    use futures::FutureExt;
    use futures::future::{BoxFuture, join_all};
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::time::{Duration, Instant};
    use tokio::sync::{RwLock, broadcast};

    /// The Store - owns state and serializes every action through the reducer
    ///
    /// All actions run the reducer under a single write lock, so two commands
    /// never observe each other's intermediate state. Effects are spawned only
    /// after the lock is released; an effect that resolves to an action feeds
    /// it back through [`Store::send`].
    ///
    /// Cloning is cheap and shares the same state.
    pub struct Store<S, A, E, R>
    where
        R: Reducer<State = S, Action = A, Environment = E>,
    {
        state: Arc<RwLock<S>>,
        reducer: Arc<R>,
        environment: Arc<E>,
        action_broadcast: broadcast::Sender<A>,
        pending_effects: Arc<AtomicUsize>,
        shutting_down: Arc<AtomicBool>,
    }

    struct PendingGuard(Arc<AtomicUsize>);

    impl Drop for PendingGuard {
        fn drop(&mut self) {
            self.0.fetch_sub(1, Ordering::SeqCst);
        }
    }

    impl<S, A, E, R> Store<S, A, E, R>
    where
        R: Reducer<State = S, Action = A, Environment = E> + Send + Sync + 'static,
        S: Send + Sync + 'static,
        A: Clone + Send + std::fmt::Debug + 'static,
        E: Send + Sync + 'static,
    {
        /// Create a new store with the default configuration
        #[must_use]
        pub fn new(initial_state: S, reducer: R, environment: E) -> Self {
            Self::with_config(initial_state, reducer, environment, StoreConfig::default())
        }

        /// Create a new store with explicit configuration
        #[must_use]
        pub fn with_config(initial_state: S, reducer: R, environment: E, config: StoreConfig) -> Self {
            let (action_broadcast, _) = broadcast::channel(config.broadcast_capacity.max(1));
            Self {
                state: Arc::new(RwLock::new(initial_state)),
                reducer: Arc::new(reducer),
                environment: Arc::new(environment),
                action_broadcast,
                pending_effects: Arc::new(AtomicUsize::new(0)),
                shutting_down: Arc::new(AtomicBool::new(false)),
            }
        }

        /// Send an action through the reducer
        ///
        /// # Errors
        ///
        /// Returns [`StoreError::ShutdownInProgress`] once shutdown has started.
        pub async fn send(&self, action: A) -> Result<(), StoreError> {
            self.send_and_read(action, |_| ()).await
        }

        /// Send an action and read state under the same write lock
        ///
        /// `read` runs immediately after the reducer, before any other action
        /// can touch the state, so the value it returns reflects exactly this
        /// action's outcome.
        ///
        /// # Errors
        ///
        /// Returns [`StoreError::ShutdownInProgress`] once shutdown has started.
        #[tracing::instrument(skip(self, action, read), name = "store_dispatch")]
        pub async fn send_and_read<T, F>(&self, action: A, read: F) -> Result<T, StoreError>
        where
            F: FnOnce(&S) -> T + Send,
            T: Send,
        {
            if self.shutting_down.load(Ordering::Acquire) {
                return Err(StoreError::ShutdownInProgress);
            }

            tracing::trace!(?action, "reducing action");
            let observed = action.clone();

            let (effects, output) = {
                let mut state = self.state.write().await;
                let started = Instant::now();
                let effects = self.reducer.reduce(&mut *state, action, &self.environment);
                metrics::histogram!("store_reducer_duration_seconds")
                    .record(started.elapsed().as_secs_f64());
                let output = read(&*state);
                (effects, output)
            };

            metrics::counter!("store_actions_total").increment(1);

            // No subscribers is fine
            let _ = self.action_broadcast.send(observed);

            for effect in effects {
                self.spawn_effect(effect);
            }

            Ok(output)
        }

        /// Read a projection of the current state
        pub async fn state<T, F>(&self, read: F) -> T
        where
            F: FnOnce(&S) -> T,
        {
            let state = self.state.read().await;
            read(&*state)
        }

        /// Subscribe to every action the store processes
        #[must_use]
        pub fn subscribe_actions(&self) -> broadcast::Receiver<A> {
            self.action_broadcast.subscribe()
        }

        /// Send an action and wait for a later action matching `predicate`
        ///
        /// # Errors
        ///
        /// Returns [`StoreError::Timeout`] if nothing matches in time, or
        /// [`StoreError::ChannelClosed`] if the broadcast channel closes.
        pub async fn send_and_wait_for<F>(
            &self,
            action: A,
            predicate: F,
            timeout: Duration,
        ) -> Result<A, StoreError>
        where
            F: Fn(&A) -> bool + Send,
        {
            let mut receiver = self.action_broadcast.subscribe();
            self.send(action).await?;

            let wait = async {
                loop {
                    match receiver.recv().await {
                        Ok(observed) if predicate(&observed) => return Ok(observed),
                        Ok(_) => {},
                        Err(broadcast::error::RecvError::Lagged(skipped)) => {
                            tracing::warn!(skipped, "action subscriber lagged");
                        },
                        Err(broadcast::error::RecvError::Closed) => {
                            return Err(StoreError::ChannelClosed);
                        },
                    }
                }
            };

            tokio::time::timeout(timeout, wait)
                .await
                .map_err(|_| StoreError::Timeout)?
        }

        /// Number of effects currently running
        #[must_use]
        pub fn pending_effects(&self) -> usize {
            self.pending_effects.load(Ordering::SeqCst)
        }

        /// Access the environment the reducer runs with
        #[must_use]
        pub fn environment(&self) -> &E {
            &self.environment
        }

        /// Wait until no effects are running
        ///
        /// Effects may feed back actions that spawn further effects; this
        /// returns once the whole cascade has settled.
        ///
        /// # Errors
        ///
        /// Returns [`StoreError::Timeout`] if effects are still running at the deadline.
        pub async fn settle(&self, timeout: Duration) -> Result<(), StoreError> {
            let deadline = Instant::now() + timeout;
            while self.pending_effects() > 0 {
                if Instant::now() >= deadline {
                    return Err(StoreError::Timeout);
                }
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
            Ok(())
        }

        /// Stop accepting actions and wait for in-flight effects
        ///
        /// # Errors
        ///
        /// Returns [`StoreError::ShutdownTimeout`] with the number of effects
        /// still running when the timeout elapses.
        pub async fn shutdown(&self, timeout: Duration) -> Result<(), StoreError> {
            self.shutting_down.store(true, Ordering::Release);
            tracing::info!(pending = self.pending_effects(), "store shutting down");

            match self.settle(timeout).await {
                Ok(()) => Ok(()),
                Err(_) => Err(StoreError::ShutdownTimeout(self.pending_effects())),
            }
        }

        fn spawn_effect(&self, effect: Effect<A>) {
            if effect.is_none() {
                return;
            }

            self.pending_effects.fetch_add(1, Ordering::SeqCst);
            metrics::counter!("store_effects_spawned_total").increment(1);

            let store = self.clone();
            let guard = PendingGuard(Arc::clone(&self.pending_effects));
            tokio::spawn(async move {
                let _guard = guard;
                store.run_effect(effect).await;
            });
        }

        fn run_effect(self, effect: Effect<A>) -> BoxFuture<'static, ()> {
            async move {
                match effect {
                    Effect::None => {},
                    Effect::Future(fut) => {
                        if let Some(action) = fut.await {
                            self.feed_back(action).await;
                        }
                    },
                    Effect::Delay { duration, action } => {
                        tokio::time::sleep(duration).await;
                        self.feed_back(*action).await;
                    },
                    Effect::Parallel(effects) => {
                        join_all(effects.into_iter().map(|e| self.clone().run_effect(e))).await;
                    },
                    Effect::Sequential(effects) => {
                        for e in effects {
                            self.clone().run_effect(e).await;
                        }
                    },
                }
            }
            .boxed()
        }

        async fn feed_back(&self, action: A) {
            if let Err(error) = self.send(action).await {
                tracing::debug!(%error, "dropping effect feedback action");
            }
        }
    }

    impl<S, A, E, R> Clone for Store<S, A, E, R>
    where
        R: Reducer<State = S, Action = A, Environment = E>,
    {
        fn clone(&self) -> Self {
            Self {
                state: Arc::clone(&self.state),
                reducer: Arc::clone(&self.reducer),
                environment: Arc::clone(&self.environment),
                action_broadcast: self.action_broadcast.clone(),
                pending_effects: Arc::clone(&self.pending_effects),
                shutting_down: Arc::clone(&self.shutting_down),
            }
        }
    }
}

pub use store::Store;

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn dlq_drops_oldest_at_capacity() {
        let dlq = DeadLetterQueue::new(2);
        dlq.push("a", "boom".to_string(), 3);
        dlq.push("b", "boom".to_string(), 3);
        dlq.push("c", "boom".to_string(), 3);

        assert_eq!(dlq.len(), 2);
        assert_eq!(dlq.peek().unwrap().payload, "b");

        let drained: Vec<_> = dlq.drain().into_iter().map(|d| d.payload).collect();
        assert_eq!(drained, vec!["b", "c"]);
        assert!(dlq.is_empty());
    }

    #[test]
    fn dlq_clones_share_entries() {
        let dlq = DeadLetterQueue::new(10);
        let other = dlq.clone();
        other.push(1u8, "x".to_string(), 1);
        assert_eq!(dlq.len(), 1);
        assert_eq!(dlq.max_size(), 10);
    }
}
