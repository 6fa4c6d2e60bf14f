//! Selection strategies over the eligible client set
//!
//! Selection is a pure function of the candidates handed in: callers filter
//! to eligible clients first and keep them in priority order. The only state
//! is the round-robin cursor, owned by the pool.

use crate::backends::{BackendClient, SharedClient};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};

/// How the pool picks the primary client for a call
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SelectionStrategy {
    /// Smallest `priority` value wins; ties keep configuration order
    #[default]
    Priority,
    /// Cycle through the eligible set
    RoundRobin,
    /// Smallest load score wins; ties keep iteration order
    LeastLoad,
}

impl SelectionStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Priority => "priority",
            Self::RoundRobin => "round_robin",
            Self::LeastLoad => "least_load",
        }
    }
}

impl fmt::Display for SelectionStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What a strategy needs to know about a client
pub trait Candidate {
    fn priority(&self) -> u32;
    fn load_score(&self) -> usize;
}

impl Candidate for SharedClient {
    fn priority(&self) -> u32 {
        BackendClient::priority(self.as_ref())
    }

    fn load_score(&self) -> usize {
        BackendClient::load_score(self.as_ref())
    }
}

/// Pick one candidate according to `strategy`
///
/// Returns `None` only when `candidates` is empty. Round-robin advances
/// `cursor` on every call and wraps modulo the current candidate count, so a
/// shrinking or growing eligible set never indexes out of bounds.
pub fn select<'a, C: Candidate>(
    strategy: SelectionStrategy,
    candidates: &'a [C],
    cursor: &AtomicUsize,
) -> Option<&'a C> {
    if candidates.is_empty() {
        return None;
    }

    match strategy {
        SelectionStrategy::Priority => candidates
            .iter()
            .reduce(|best, c| if c.priority() < best.priority() { c } else { best }),
        SelectionStrategy::RoundRobin => {
            let index = cursor.fetch_add(1, Ordering::Relaxed) % candidates.len();
            candidates.get(index)
        }
        SelectionStrategy::LeastLoad => candidates
            .iter()
            .reduce(|best, c| if c.load_score() < best.load_score() { c } else { best }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[derive(Debug, Clone, PartialEq, Eq)]
    struct Fake {
        id: usize,
        priority: u32,
        load: usize,
    }

    impl Candidate for Fake {
        fn priority(&self) -> u32 {
            self.priority
        }

        fn load_score(&self) -> usize {
            self.load
        }
    }

    fn fakes(specs: &[(u32, usize)]) -> Vec<Fake> {
        specs
            .iter()
            .enumerate()
            .map(|(id, &(priority, load))| Fake { id, priority, load })
            .collect()
    }

    #[test]
    fn test_empty_set_selects_nothing() {
        let cursor = AtomicUsize::new(0);
        for strategy in [
            SelectionStrategy::Priority,
            SelectionStrategy::RoundRobin,
            SelectionStrategy::LeastLoad,
        ] {
            assert!(select::<Fake>(strategy, &[], &cursor).is_none());
        }
    }

    #[test]
    fn test_priority_picks_smallest_value() {
        let set = fakes(&[(3, 0), (1, 0), (2, 0)]);
        let cursor = AtomicUsize::new(0);
        assert_eq!(select(SelectionStrategy::Priority, &set, &cursor).unwrap().id, 1);
    }

    #[test]
    fn test_priority_ties_keep_first() {
        let set = fakes(&[(2, 0), (1, 0), (1, 0)]);
        let cursor = AtomicUsize::new(0);
        assert_eq!(select(SelectionStrategy::Priority, &set, &cursor).unwrap().id, 1);
    }

    #[test]
    fn test_least_load_ties_keep_first() {
        let set = fakes(&[(1, 4), (1, 2), (1, 2), (1, 3)]);
        let cursor = AtomicUsize::new(0);
        assert_eq!(select(SelectionStrategy::LeastLoad, &set, &cursor).unwrap().id, 1);
    }

    #[test]
    fn test_round_robin_wraps_when_set_shrinks() {
        let cursor = AtomicUsize::new(0);
        let three = fakes(&[(1, 0), (1, 0), (1, 0)]);
        let two = fakes(&[(1, 0), (1, 0)]);

        assert_eq!(select(SelectionStrategy::RoundRobin, &three, &cursor).unwrap().id, 0);
        assert_eq!(select(SelectionStrategy::RoundRobin, &three, &cursor).unwrap().id, 1);
        assert_eq!(select(SelectionStrategy::RoundRobin, &three, &cursor).unwrap().id, 2);
        // cursor is now 3; 3 % 2 == 1
        assert_eq!(select(SelectionStrategy::RoundRobin, &two, &cursor).unwrap().id, 1);
        assert_eq!(select(SelectionStrategy::RoundRobin, &two, &cursor).unwrap().id, 0);
    }

    #[test]
    fn test_strategy_deserializes_snake_case() {
        #[derive(Deserialize)]
        struct Wrapper {
            strategy: SelectionStrategy,
        }
        let parsed: Wrapper = toml::from_str("strategy = \"least_load\"").unwrap();
        assert_eq!(parsed.strategy, SelectionStrategy::LeastLoad);
        let parsed: Wrapper = toml::from_str("strategy = \"round_robin\"").unwrap();
        assert_eq!(parsed.strategy, SelectionStrategy::RoundRobin);
        assert!(toml::from_str::<Wrapper>("strategy = \"random\"").is_err());
    }

    fn candidate_set() -> impl Strategy<Value = Vec<Fake>> {
        prop::collection::vec((0u32..5, 0usize..10), 1..12).prop_map(|specs| fakes(&specs))
    }

    proptest! {
        #[test]
        fn prop_round_robin_visits_each_once_per_cycle(
            set in candidate_set(),
            start in 0usize..1000,
        ) {
            let cursor = AtomicUsize::new(start);
            let mut seen: Vec<usize> = (0..set.len())
                .map(|_| select(SelectionStrategy::RoundRobin, &set, &cursor).unwrap().id)
                .collect();
            seen.sort_unstable();
            prop_assert_eq!(seen, (0..set.len()).collect::<Vec<_>>());
        }

        #[test]
        fn prop_priority_returns_minimum_first_occurrence(set in candidate_set()) {
            let cursor = AtomicUsize::new(0);
            let picked = select(SelectionStrategy::Priority, &set, &cursor).unwrap();
            let min = set.iter().map(|c| c.priority).min().unwrap();
            let first = set.iter().position(|c| c.priority == min).unwrap();
            prop_assert_eq!(picked.id, first);
        }

        #[test]
        fn prop_least_load_returns_minimum_first_occurrence(set in candidate_set()) {
            let cursor = AtomicUsize::new(0);
            let picked = select(SelectionStrategy::LeastLoad, &set, &cursor).unwrap();
            let min = set.iter().map(|c| c.load).min().unwrap();
            let first = set.iter().position(|c| c.load == min).unwrap();
            prop_assert_eq!(picked.id, first);
        }

        #[test]
        fn prop_selection_stays_in_set(set in candidate_set(), start in 0usize..1000) {
            let cursor = AtomicUsize::new(start);
            for strategy in [
                SelectionStrategy::Priority,
                SelectionStrategy::RoundRobin,
                SelectionStrategy::LeastLoad,
            ] {
                let picked = select(strategy, &set, &cursor).unwrap();
                prop_assert!(set.contains(picked));
            }
        }
    }
}
