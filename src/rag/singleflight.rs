//! Single-flight coalescing of identical in-flight requests
//!
//! Concurrent requests sharing a fingerprint execute the expensive pipeline
//! exactly once: the first arrival becomes the leader, later arrivals
//! subscribe to its outcome. Registration and lookup are atomic with
//! respect to each other, and no lock is held while the pipeline runs.

use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tokio::sync::broadcast;
use tracing::debug;

use crate::errors::KrishiRagError;
use crate::models::ChatResponse;

/// Outcome shared between the leader and its followers.
///
/// Errors travel as `Arc` since the crate error type is not `Clone`.
pub type FlightOutcome = std::result::Result<ChatResponse, Arc<KrishiRagError>>;

/// Role assigned to a request when it joins the registry
pub enum Flight {
    /// This request executes the pipeline and must call [`FlightGuard::finish`]
    Leader(FlightGuard),
    /// This request awaits the leader's outcome
    Follower(broadcast::Receiver<FlightOutcome>),
}

/// In-flight request registry keyed by fingerprint
pub struct SingleFlight {
    inflight: Arc<DashMap<String, broadcast::Sender<FlightOutcome>>>,
}

impl SingleFlight {
    #[must_use]
    pub fn new() -> Self {
        Self {
            inflight: Arc::new(DashMap::new()),
        }
    }

    /// Join the flight for `key`, atomically becoming leader or follower
    #[must_use]
    pub fn begin(&self, key: &str) -> Flight {
        match self.inflight.entry(key.to_string()) {
            Entry::Occupied(existing) => {
                debug!("Coalescing onto in-flight request");
                Flight::Follower(existing.get().subscribe())
            }
            Entry::Vacant(vacant) => {
                let (tx, _rx) = broadcast::channel(1);
                vacant.insert(tx.clone());
                Flight::Leader(FlightGuard {
                    key: key.to_string(),
                    tx: Some(tx),
                    inflight: Arc::clone(&self.inflight),
                })
            }
        }
    }

    #[must_use]
    pub fn inflight_count(&self) -> usize {
        self.inflight.len()
    }
}

impl Default for SingleFlight {
    fn default() -> Self {
        Self::new()
    }
}

/// Leader handle; deregisters the key and publishes the outcome.
///
/// Dropping the guard without finishing (leader task cancelled) removes the
/// registration so the key does not wedge; followers then observe a closed
/// channel and degrade.
pub struct FlightGuard {
    key: String,
    tx: Option<broadcast::Sender<FlightOutcome>>,
    inflight: Arc<DashMap<String, broadcast::Sender<FlightOutcome>>>,
}

impl FlightGuard {
    /// Publish the outcome to all followers and release the key
    pub fn finish(mut self, outcome: FlightOutcome) {
        self.inflight.remove(&self.key);
        if let Some(tx) = self.tx.take() {
            // No receivers is fine: there simply were no followers
            let _ = tx.send(outcome);
        }
    }
}

impl Drop for FlightGuard {
    fn drop(&mut self) {
        if self.tx.is_some() {
            self.inflight.remove(&self.key);
        }
    }
}
