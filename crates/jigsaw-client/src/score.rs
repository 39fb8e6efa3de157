//! Per-user score table.
//!
//! Maps a user to the sum of swap deltas they caused since the board was
//! loaded. An absent user reads as zero; once a user has swapped, their
//! entry exists even if it nets back to zero.

use std::collections::BTreeMap;
use std::sync::Arc;

use jigsaw_types::UserId;

/// Accumulated correctness deltas, keyed by user.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ScoreTable {
    entries: Arc<BTreeMap<UserId, i64>>,
}

impl ScoreTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Score for `user`; zero when unseen.
    pub fn get(&self, user: &UserId) -> i64 {
        self.entries.get(user).copied().unwrap_or(0)
    }

    /// Whether `user` has an entry (possibly zero).
    pub fn contains(&self, user: &UserId) -> bool {
        self.entries.contains_key(user)
    }

    /// Add `delta` to `user`, creating the entry at zero first.
    pub fn record(&mut self, user: &UserId, delta: i32) {
        let entries = Arc::make_mut(&mut self.entries);
        *entries.entry(user.clone()).or_insert(0) += i64::from(delta);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entries in user-id order.
    pub fn iter(&self) -> impl Iterator<Item = (&UserId, i64)> {
        self.entries.iter().map(|(user, score)| (user, *score))
    }

    /// Users sorted by score, highest first.
    pub fn ranking(&self) -> Vec<(UserId, i64)> {
        let mut ranked: Vec<_> = self.entries.iter().map(|(u, s)| (u.clone(), *s)).collect();
        ranked.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        ranked
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn absent_reads_zero() {
        let table = ScoreTable::new();
        assert_eq!(table.get(&UserId::new("nobody")), 0);
        assert!(!table.contains(&UserId::new("nobody")));
    }

    #[test]
    fn plus_then_minus_leaves_zero_entry() {
        let amy = UserId::new("amy");
        let mut table = ScoreTable::new();
        table.record(&amy, 1);
        table.record(&amy, -1);
        assert!(table.contains(&amy));
        assert_eq!(table.get(&amy), 0);
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn clone_is_independent() {
        let amy = UserId::new("amy");
        let mut a = ScoreTable::new();
        a.record(&amy, 2);
        let mut b = a.clone();
        b.record(&amy, 1);
        assert_eq!(a.get(&amy), 2);
        assert_eq!(b.get(&amy), 3);
    }

    #[test]
    fn ranking_orders_by_score_then_id() {
        let mut table = ScoreTable::new();
        table.record(&UserId::new("b"), 2);
        table.record(&UserId::new("a"), 2);
        table.record(&UserId::new("c"), 5);
        let ranked: Vec<_> = table.ranking().into_iter().map(|(u, _)| u.to_string()).collect();
        assert_eq!(ranked, vec!["c", "a", "b"]);
    }
}
