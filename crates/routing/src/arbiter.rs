//! First-committer-wins election for one response round

use parking_lot::Mutex;
use std::collections::BTreeSet;

#[derive(Default)]
struct ArbiterState {
    active: BTreeSet<String>,
    winner: String,
    started: bool,
}

/// Elects exactly one winner among the agents of a round. All
/// operations are atomic under a single lock; the winner is
/// monotonic until `reset`.
#[derive(Default)]
pub struct Arbiter {
    inner: Mutex<ArbiterState>,
}

impl Arbiter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a round over exactly `ids`, clearing any prior winner.
    pub fn start<I, S>(&self, ids: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut state = self.inner.lock();
        state.active = ids.into_iter().map(Into::into).collect();
        state.winner.clear();
        state.started = true;
    }

    /// Try to commit `id` as the winner.
    ///
    /// Returns `(winner, is_new)`: `is_new` is true only for the
    /// call that set the winner. Calls before `start`, or for ids
    /// outside the round, leave the election untouched.
    pub fn decide(&self, id: &str) -> (String, bool) {
        let mut state = self.inner.lock();

        if !state.started || !state.active.contains(id) {
            if !state.started {
                tracing::error!(agent_id = %id, "Arbiter decide without started round");
            }
            return (state.winner.clone(), false);
        }

        if state.winner.is_empty() {
            state.winner = id.to_string();
            return (state.winner.clone(), true);
        }

        (state.winner.clone(), false)
    }

    /// All active ids except the winner; `None` while no winner is
    /// committed.
    pub fn losers(&self) -> Option<Vec<String>> {
        let state = self.inner.lock();
        if state.winner.is_empty() {
            return None;
        }
        Some(
            state
                .active
                .iter()
                .filter(|id| **id != state.winner)
                .cloned()
                .collect(),
        )
    }

    /// Current winner; empty string while undecided.
    pub fn winner(&self) -> String {
        self.inner.lock().winner.clone()
    }

    pub fn reset(&self) {
        let mut state = self.inner.lock();
        state.active.clear();
        state.winner.clear();
        state.started = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_first_commit_wins() {
        let arbiter = Arbiter::new();
        arbiter.start(["a", "b"]);

        assert_eq!(arbiter.decide("b"), ("b".to_string(), true));
        assert_eq!(arbiter.decide("a"), ("b".to_string(), false));
        assert_eq!(arbiter.decide("b"), ("b".to_string(), false));
        assert_eq!(arbiter.winner(), "b");
    }

    #[test]
    fn test_decide_before_start_is_noop() {
        let arbiter = Arbiter::new();
        assert_eq!(arbiter.decide("a"), (String::new(), false));
        assert_eq!(arbiter.winner(), "");
    }

    #[test]
    fn test_decide_outside_round_is_noop() {
        let arbiter = Arbiter::new();
        arbiter.start(["a", "b"]);
        assert_eq!(arbiter.decide("c"), (String::new(), false));

        arbiter.decide("a");
        assert_eq!(arbiter.decide("c"), ("a".to_string(), false));
    }

    #[test]
    fn test_losers() {
        let arbiter = Arbiter::new();
        arbiter.start(["a", "b", "c"]);
        assert!(arbiter.losers().is_none());

        arbiter.decide("b");
        let mut losers = arbiter.losers().unwrap();
        losers.sort();
        assert_eq!(losers, vec!["a", "c"]);
    }

    #[test]
    fn test_reset_clears_round() {
        let arbiter = Arbiter::new();
        arbiter.start(["a"]);
        arbiter.decide("a");
        arbiter.reset();

        assert_eq!(arbiter.winner(), "");
        assert!(arbiter.losers().is_none());
        assert_eq!(arbiter.decide("a"), (String::new(), false));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_decides_elect_exactly_one() {
        let arbiter = Arc::new(Arbiter::new());
        let ids: Vec<String> = (0..8).map(|i| format!("agent{i}")).collect();
        arbiter.start(ids.clone());

        let mut handles = Vec::new();
        for id in ids {
            let arbiter = Arc::clone(&arbiter);
            handles.push(tokio::spawn(async move { arbiter.decide(&id) }));
        }

        let mut new_wins = 0;
        let winner = arbiter.winner();
        for handle in handles {
            let (seen, is_new) = handle.await.unwrap();
            if is_new {
                new_wins += 1;
            }
            assert_eq!(seen, winner);
        }
        assert_eq!(new_wins, 1);
    }

    mod properties {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            // Exactly one decide returns is_new over any call order,
            // and losers never contain the winner.
            #[test]
            fn one_winner_per_round(order in proptest::sample::subsequence(
                vec!["a", "b", "c", "d"], 1..4,
            )) {
                let arbiter = Arbiter::new();
                arbiter.start(["a", "b", "c", "d"]);

                let mut new_count = 0;
                for id in &order {
                    let (winner, is_new) = arbiter.decide(id);
                    if is_new {
                        new_count += 1;
                        prop_assert_eq!(&winner, id);
                    }
                }
                prop_assert_eq!(new_count, 1);

                let winner = arbiter.winner();
                let losers = arbiter.losers().unwrap();
                prop_assert!(!losers.contains(&winner));
                prop_assert_eq!(losers.len(), 3);
            }
        }
    }
}
