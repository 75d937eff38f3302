//! Backend endpoint selection

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;

/// Picks the endpoint for the next connection attempt
///
/// Endpoints are visited in a random order that is fixed on first use, then
/// cycled round-robin, so N calls over N endpoints return each one once.
pub struct BackendSelector {
    endpoints: Vec<String>,
    ring: Option<Vec<String>>,
    next: usize,
    rng: StdRng,
}

impl BackendSelector {
    /// Create a selector over `endpoints`
    pub fn new(endpoints: Vec<String>) -> Self {
        Self::with_rng(endpoints, StdRng::from_entropy())
    }

    /// Create a selector with a caller-provided random source
    pub fn with_rng(endpoints: Vec<String>, rng: StdRng) -> Self {
        Self {
            endpoints,
            ring: None,
            next: 0,
            rng,
        }
    }

    /// Next endpoint, `None` when no endpoints are configured
    pub fn select(&mut self) -> Option<String> {
        if self.endpoints.is_empty() {
            return None;
        }
        if self.ring.is_none() {
            let mut ring = self.endpoints.clone();
            ring.shuffle(&mut self.rng);
            self.ring = Some(ring);
        }
        let ring = self.ring.as_ref()?;
        let endpoint = ring[self.next % ring.len()].clone();
        self.next = (self.next + 1) % ring.len();
        Some(endpoint)
    }

    /// Number of configured endpoints
    pub fn len(&self) -> usize {
        self.endpoints.len()
    }

    /// Whether no endpoints are configured
    pub fn is_empty(&self) -> bool {
        self.endpoints.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::collections::HashSet;

    #[test]
    fn test_empty_selector() {
        let mut selector = BackendSelector::new(Vec::new());
        assert!(selector.select().is_none());
        assert!(selector.is_empty());
    }

    #[test]
    fn test_single_endpoint() {
        let mut selector = BackendSelector::new(vec!["a:8081".to_string()]);
        for _ in 0..3 {
            assert_eq!(selector.select().as_deref(), Some("a:8081"));
        }
    }

    #[test]
    fn test_order_is_stable_after_first_use() {
        let endpoints: Vec<String> = (0..5).map(|i| format!("backend-{}:8081", i)).collect();
        let mut selector = BackendSelector::with_rng(endpoints, StdRng::seed_from_u64(7));

        let first: Vec<String> = (0..5).filter_map(|_| selector.select()).collect();
        let second: Vec<String> = (0..5).filter_map(|_| selector.select()).collect();
        assert_eq!(first, second);
    }

    proptest! {
        #[test]
        fn test_each_endpoint_once_per_cycle(count in 1usize..12, seed in any::<u64>()) {
            let endpoints: Vec<String> = (0..count).map(|i| format!("ws://10.0.0.{}:8081", i)).collect();
            let mut selector = BackendSelector::with_rng(endpoints.clone(), StdRng::seed_from_u64(seed));

            let picked: HashSet<String> = (0..count).filter_map(|_| selector.select()).collect();
            let expected: HashSet<String> = endpoints.into_iter().collect();
            prop_assert_eq!(picked, expected);
        }
    }
}
