use crate::errors::*;
use crate::transport::Endpoint;
use rand::Rng;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Strategy for picking which endpoint a connect attempt should target.
pub trait EndpointSelector: Send + Sync {
    /// Returns an index in `0..count`. `count` is always at least 1.
    fn select(&self, count: usize) -> usize;
}

/// Cycles through the endpoint list in order, one endpoint per attempt.
pub struct RoundRobin {
    cursor: AtomicUsize,
}

impl RoundRobin {
    pub fn new() -> RoundRobin {
        RoundRobin {
            cursor: AtomicUsize::new(0),
        }
    }
}

impl Default for RoundRobin {
    fn default() -> Self {
        RoundRobin::new()
    }
}

impl EndpointSelector for RoundRobin {
    fn select(&self, count: usize) -> usize {
        self.cursor.fetch_add(1, Ordering::Relaxed) % count
    }
}

/// Picks a uniformly random endpoint per attempt.
pub struct Random;

impl EndpointSelector for Random {
    fn select(&self, count: usize) -> usize {
        rand::thread_rng().gen_range(0..count)
    }
}

/// Hands one endpoint candidate to each connect attempt, driven by a
/// pluggable [`EndpointSelector`]. The endpoint list is fixed at
/// construction.
pub(crate) struct EndpointCycler {
    endpoints: Vec<Endpoint>,
    selector: std::sync::Arc<dyn EndpointSelector>,
}

impl std::fmt::Debug for EndpointCycler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EndpointCycler")
            .field("endpoints", &self.endpoints)
            .finish_non_exhaustive()
    }
}

impl EndpointCycler {
    pub(crate) fn new(
        endpoints: Vec<Endpoint>,
        selector: std::sync::Arc<dyn EndpointSelector>,
    ) -> Result<EndpointCycler> {
        if endpoints.is_empty() {
            return NoEndpointsSnafu.fail();
        }
        Ok(EndpointCycler {
            endpoints,
            selector,
        })
    }

    /// Select the next candidate and run `attempt` against it. Errors from
    /// `attempt` propagate so the caller can schedule the next try.
    pub(crate) fn select_one<T, F>(&self, attempt: F) -> Result<T>
    where
        F: FnOnce(&Endpoint) -> Result<T>,
    {
        let index = self.selector.select(self.endpoints.len());
        attempt(&self.endpoints[index % self.endpoints.len()])
    }
}
