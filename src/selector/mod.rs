/// Replica selection algorithms
///
/// A router asks its selector for a replica exactly once; the session caches
/// the answer for the rest of its lifetime.
use crate::core::Endpoint;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::sync::Mutex;

/// Replica selection algorithm trait
pub trait ReplicaSelector: Send + Sync {
    /// Select a replica from the configured endpoints
    fn select(&self, replicas: &[Endpoint]) -> Option<usize>;
}

/// Uniform random pick, optionally from a seeded generator
pub struct RandomSelector {
    seeded: Option<Mutex<StdRng>>,
}

impl RandomSelector {
    pub fn new() -> Self {
        Self { seeded: None }
    }

    pub fn with_seed(seed: u64) -> Self {
        Self {
            seeded: Some(Mutex::new(StdRng::seed_from_u64(seed))),
        }
    }
}

impl Default for RandomSelector {
    fn default() -> Self {
        Self::new()
    }
}

impl ReplicaSelector for RandomSelector {
    fn select(&self, replicas: &[Endpoint]) -> Option<usize> {
        if replicas.is_empty() {
            return None;
        }

        match &self.seeded {
            Some(rng) => {
                // A poisoned generator is still a usable generator
                let mut rng = rng.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
                Some(rng.gen_range(0..replicas.len()))
            }
            None => Some(rand::thread_rng().gen_range(0..replicas.len())),
        }
    }
}

/// Deterministic pick: always the same position, clamped to the replica count
pub struct FixedSelector {
    index: usize,
}

impl FixedSelector {
    pub fn new(index: usize) -> Self {
        Self { index }
    }
}

impl ReplicaSelector for FixedSelector {
    fn select(&self, replicas: &[Endpoint]) -> Option<usize> {
        if replicas.is_empty() {
            return None;
        }
        Some(self.index.min(replicas.len() - 1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn create_test_replicas(count: usize) -> Vec<Endpoint> {
        let primary = Endpoint::primary("primary", 3306, "shop", "app", "");
        (0..count)
            .map(|i| Endpoint::replica_of(&primary, &format!("replica-{}", i)))
            .collect()
    }

    #[test]
    fn test_random_selection_in_range() {
        let selector = RandomSelector::new();
        let replicas = create_test_replicas(3);

        let mut seen = [false; 3];
        for _ in 0..300 {
            let index = selector.select(&replicas).unwrap();
            seen[index] = true;
        }
        assert!(seen.iter().all(|s| *s));
    }

    #[test]
    fn test_seeded_selection_is_deterministic() {
        let replicas = create_test_replicas(5);
        let a = RandomSelector::with_seed(42);
        let b = RandomSelector::with_seed(42);

        let picks_a: Vec<_> = (0..10).map(|_| a.select(&replicas)).collect();
        let picks_b: Vec<_> = (0..10).map(|_| b.select(&replicas)).collect();
        assert_eq!(picks_a, picks_b);
    }

    #[test]
    fn test_empty_set_selects_nothing() {
        assert_eq!(RandomSelector::new().select(&[]), None);
        assert_eq!(FixedSelector::new(0).select(&[]), None);
    }

    #[test]
    fn test_fixed_selector_clamps() {
        let replicas = create_test_replicas(2);
        assert_eq!(FixedSelector::new(7).select(&replicas), Some(1));
    }
}
