//! Peer selection for discussions.
//!
//! Candidates are ranked by keyword overlap with the topic plus a random
//! perturbation in `[0, jitter)`. The generator is seedable so discussion
//! membership is reproducible in tests; a jitter of zero removes the
//! randomness entirely and ties fall back to registration order.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::debug;

use crate::persona::Persona;

pub struct PeerSelector {
    rng: StdRng,
    jitter: f64,
}

impl PeerSelector {
    pub fn new(jitter: f64, seed: Option<u64>) -> Self {
        let rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Self {
            rng,
            jitter: jitter.max(0.0),
        }
    }

    /// Deterministic selector: pure relevance, registration order on ties.
    pub fn deterministic() -> Self {
        Self::new(0.0, Some(0))
    }

    /// Pick up to `limit` candidates for `topic`. `candidates` pairs an
    /// opaque index with its persona and must be in registration order;
    /// the chosen indices are returned best first.
    pub fn select(&mut self, topic: &str, candidates: &[(usize, &Persona)], limit: usize) -> Vec<usize> {
        let mut scored: Vec<(usize, f64)> = candidates
            .iter()
            .map(|(idx, persona)| {
                let noise = if self.jitter > 0.0 {
                    self.rng.gen_range(0.0..self.jitter)
                } else {
                    0.0
                };
                (*idx, persona.relevance(topic) as f64 + noise)
            })
            .collect();

        // Stable: equal scores keep registration order.
        scored.sort_by(|a, b| b.1.total_cmp(&a.1));
        scored.truncate(limit);
        debug!(topic, chosen = ?scored, "Selected discussion peers");
        scored.into_iter().map(|(idx, _)| idx).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persona::{PersonaRegistry, Roster};

    fn candidates(registry: &PersonaRegistry) -> Vec<(usize, &Persona)> {
        registry
            .iter()
            .enumerate()
            .map(|(i, p)| (i, p.as_ref()))
            .collect()
    }

    #[test]
    fn test_relevance_ranks_first() {
        let registry = PersonaRegistry::builtin(Roster::Discovery);
        let all = candidates(&registry);
        let mut selector = PeerSelector::deterministic();

        let chosen = selector.select("information entropy", &all, 2);
        let keys: Vec<&str> = chosen.iter().map(|i| all[*i].1.key.as_str()).collect();
        assert_eq!(chosen.len(), 2);
        assert!(keys.contains(&"shannon"), "got {keys:?}");
    }

    #[test]
    fn test_ties_keep_registration_order() {
        let registry = PersonaRegistry::builtin(Roster::Discovery);
        let all = candidates(&registry);
        let mut selector = PeerSelector::deterministic();

        let chosen = selector.select("zzzz", &all, 3);
        assert_eq!(chosen, vec![0, 1, 2]);
    }

    #[test]
    fn test_seeded_selection_is_reproducible() {
        let registry = PersonaRegistry::builtin(Roster::Discovery);
        let all = candidates(&registry);

        let first = PeerSelector::new(2.0, Some(42)).select("quantum gravity", &all, 4);
        let second = PeerSelector::new(2.0, Some(42)).select("quantum gravity", &all, 4);
        assert_eq!(first, second);
        assert_eq!(first.len(), 4);
    }

    #[test]
    fn test_limit_larger_than_pool() {
        let registry = PersonaRegistry::builtin(Roster::Legends);
        let all = candidates(&registry);
        let chosen = PeerSelector::deterministic().select("gravity", &all[..2], 5);
        assert_eq!(chosen.len(), 2);
    }
}
