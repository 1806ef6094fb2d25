//! Round-Robin locator (spec.md §4.6): ignores the key entirely, cycles
//! through nodes, skipping ones reported dead.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use crate::locator::{Locator, NodeLiveness, Selection};
use crate::request::Request;

pub struct RoundRobinLocator {
    liveness: Arc<dyn NodeLiveness>,
    counter: AtomicUsize,
}

impl RoundRobinLocator {
    pub fn new(liveness: Arc<dyn NodeLiveness>) -> Self {
        RoundRobinLocator {
            liveness,
            counter: AtomicUsize::new(0),
        }
    }
}

impl Locator for RoundRobinLocator {
    fn locate(&self, _key: &[u8], _request: &dyn Request, _replicas: u8) -> Selection {
        let n = self.liveness.node_count();
        if n == 0 {
            return Vec::new();
        }
        let start = self.counter.fetch_add(1, Ordering::Relaxed);
        for probe in 0..n {
            let index = (start + probe) % n;
            if !self.liveness.is_dead(index) {
                return vec![index];
            }
        }
        Vec::new()
    }
}
