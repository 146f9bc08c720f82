//! Single-flight load coalescing
//!
//! Concurrent loads for the same absent key share one loader run. The first
//! caller to join becomes the leader and publishes the outcome; everyone
//! else waits on the shared flight. Errors are published like values so
//! every waiter observes the same failure, and the flight is removed once
//! resolved so the next miss starts fresh.

use std::pin::pin;
use std::sync::{Arc, OnceLock};

use dashmap::DashMap;
use tokio::sync::Notify;

use crate::cache::error::CacheError;
use crate::cache::traits::{CacheKey, CacheValue};

/// One in-flight load shared by a leader and any number of waiters.
pub(crate) struct Flight<V> {
    result: OnceLock<Result<V, CacheError>>,
    done: Notify,
}

impl<V: Clone> Flight<V> {
    fn new() -> Self {
        Flight {
            result: OnceLock::new(),
            done: Notify::new(),
        }
    }

    /// Wait for the leader's outcome.
    pub(crate) async fn wait(&self) -> Result<V, CacheError> {
        loop {
            if let Some(result) = self.result.get() {
                return result.clone();
            }
            // Register before the re-check so a completion racing with this
            // waiter cannot be missed.
            let mut notified = pin!(self.done.notified());
            notified.as_mut().enable();
            if let Some(result) = self.result.get() {
                return result.clone();
            }
            notified.await;
        }
    }

    fn complete(&self, result: Result<V, CacheError>) {
        let _ = self.result.set(result);
        self.done.notify_waiters();
    }
}

/// What `join` handed this caller.
pub(crate) enum FlightRole<V> {
    /// This caller runs the loader and must call `complete`.
    Leader(Arc<Flight<V>>),
    /// Another caller is loading; wait on the flight.
    Follower(Arc<Flight<V>>),
}

/// Per-coordinator map of keys to in-flight loads.
pub(crate) struct FlightGroup<K: CacheKey, V: CacheValue> {
    flights: DashMap<K, Arc<Flight<V>>>,
}

impl<K: CacheKey, V: CacheValue> FlightGroup<K, V> {
    pub(crate) fn new() -> Self {
        FlightGroup {
            flights: DashMap::new(),
        }
    }

    pub(crate) fn join(&self, key: &K) -> FlightRole<V> {
        use dashmap::mapref::entry::Entry;

        match self.flights.entry(key.clone()) {
            Entry::Occupied(occupied) => FlightRole::Follower(Arc::clone(occupied.get())),
            Entry::Vacant(vacant) => {
                let flight = Arc::new(Flight::new());
                vacant.insert(Arc::clone(&flight));
                FlightRole::Leader(flight)
            }
        }
    }

    /// Publish the leader's outcome and retire the flight.
    pub(crate) fn complete(&self, key: &K, flight: &Arc<Flight<V>>, result: Result<V, CacheError>) {
        flight.complete(result);
        self.flights.remove(key);
    }

    #[cfg(test)]
    pub(crate) fn in_flight(&self) -> usize {
        self.flights.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn followers_see_the_leaders_value() {
        let group: Arc<FlightGroup<String, u32>> = Arc::new(FlightGroup::new());
        let key = "k".to_string();

        let FlightRole::Leader(leader) = group.join(&key) else {
            panic!("first join must lead");
        };

        let mut waiters = Vec::new();
        for _ in 0..10 {
            let FlightRole::Follower(flight) = group.join(&key) else {
                panic!("later joins must follow");
            };
            waiters.push(tokio::spawn(async move { flight.wait().await }));
        }

        tokio::time::sleep(Duration::from_millis(10)).await;
        group.complete(&key, &leader, Ok(7));

        for waiter in waiters {
            assert_eq!(waiter.await.unwrap(), Ok(7));
        }
        assert_eq!(group.in_flight(), 0);
    }

    #[tokio::test]
    async fn errors_propagate_to_every_waiter() {
        let group: Arc<FlightGroup<String, u32>> = Arc::new(FlightGroup::new());
        let key = "k".to_string();

        let FlightRole::Leader(leader) = group.join(&key) else {
            panic!("first join must lead");
        };
        let FlightRole::Follower(follower) = group.join(&key) else {
            panic!("second join must follow");
        };

        let waiter = tokio::spawn(async move { follower.wait().await });
        group.complete(&key, &leader, Err(CacheError::store("backend down")));

        assert!(matches!(waiter.await.unwrap(), Err(CacheError::Store(_))));
        // The failed flight is retired; the next join leads again.
        assert!(matches!(group.join(&key), FlightRole::Leader(_)));
    }

    #[tokio::test]
    async fn wait_after_completion_returns_immediately() {
        let group: FlightGroup<String, u32> = FlightGroup::new();
        let key = "k".to_string();

        let FlightRole::Leader(leader) = group.join(&key) else {
            panic!("first join must lead");
        };
        let late = Arc::clone(&leader);
        group.complete(&key, &leader, Ok(1));
        assert_eq!(late.wait().await, Ok(1));
    }

    #[tokio::test]
    async fn distinct_keys_fly_independently() {
        let group: FlightGroup<String, u32> = FlightGroup::new();
        assert!(matches!(group.join(&"a".to_string()), FlightRole::Leader(_)));
        assert!(matches!(group.join(&"b".to_string()), FlightRole::Leader(_)));
        assert_eq!(group.in_flight(), 2);
    }
}
