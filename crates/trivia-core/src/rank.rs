// Ranking model: per-player scores ordered by score, with 1-based positions.
//
// Ordering rule for equal scores: whoever already appears earlier in the
// sequence being sorted stays ahead (the sort is stable). Callers that build a
// Rank from scratch decide the initial order; `Round::ranking` feeds players
// in order of their first claim, so earlier claimers win ties.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::model::PlayerId;

/// One player's line in a ranking.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlayerScore {
    pub player_id: PlayerId,
    pub name: String,
    pub score: u32,
    pub position: usize,
}

impl PlayerScore {
    pub fn new(player_id: impl Into<PlayerId>, name: impl Into<String>, score: u32) -> Self {
        Self {
            player_id: player_id.into(),
            name: name.into(),
            score,
            position: 0,
        }
    }
}

/// Ordered list of player scores, highest first.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Rank(Vec<PlayerScore>);

impl Rank {
    pub fn new() -> Self {
        Self(Vec::new())
    }

    /// Build a ranking from unordered scores. The input order is the
    /// tie-break for equal scores.
    pub fn from_scores(scores: Vec<PlayerScore>) -> Self {
        let mut rank = Self(scores);
        rank.sort_and_number();
        rank
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, PlayerScore> {
        self.0.iter()
    }

    pub fn as_slice(&self) -> &[PlayerScore] {
        &self.0
    }

    pub fn into_vec(self) -> Vec<PlayerScore> {
        self.0
    }

    /// Look up a player's entry.
    pub fn get(&self, player_id: &PlayerId) -> Option<&PlayerScore> {
        self.0.iter().find(|ps| &ps.player_id == player_id)
    }

    /// Sum of every player's score.
    pub fn total(&self) -> u64 {
        self.0.iter().map(|ps| u64::from(ps.score)).sum()
    }

    /// Merge `other` into a new ranking: scores of the same player are summed
    /// and the name from `other` replaces the existing one. Players only in
    /// `other` are appended in its order before re-sorting, so existing
    /// players keep precedence on ties.
    pub fn add(&self, other: &Rank) -> Rank {
        let mut merged = self.0.clone();
        let mut index: HashMap<PlayerId, usize> = merged
            .iter()
            .enumerate()
            .map(|(i, ps)| (ps.player_id.clone(), i))
            .collect();

        for ps in &other.0 {
            match index.get(&ps.player_id) {
                Some(&i) => {
                    let existing = &mut merged[i];
                    existing.name = ps.name.clone();
                    existing.score = existing.score.saturating_add(ps.score);
                }
                None => {
                    index.insert(ps.player_id.clone(), merged.len());
                    merged.push(ps.clone());
                }
            }
        }

        Rank::from_scores(merged)
    }

    /// Subtract `other` from this ranking per player, flooring at zero.
    /// Players absent from `self` are ignored. Used by the export tooling to
    /// turn all-time totals into period deltas.
    pub fn subtract(&self, other: &Rank) -> Rank {
        let deltas: HashMap<&PlayerId, u32> =
            other.0.iter().map(|ps| (&ps.player_id, ps.score)).collect();

        let result = self
            .0
            .iter()
            .map(|ps| {
                let mut ps = ps.clone();
                if let Some(delta) = deltas.get(&ps.player_id) {
                    ps.score = ps.score.saturating_sub(*delta);
                }
                ps
            })
            .collect();

        Rank::from_scores(result)
    }

    fn sort_and_number(&mut self) {
        self.0.sort_by(|a, b| b.score.cmp(&a.score));
        for (i, ps) in self.0.iter_mut().enumerate() {
            ps.position = i + 1;
        }
    }
}

impl<'a> IntoIterator for &'a Rank {
    type Item = &'a PlayerScore;
    type IntoIter = std::slice::Iter<'a, PlayerScore>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

impl FromIterator<PlayerScore> for Rank {
    fn from_iter<I: IntoIterator<Item = PlayerScore>>(iter: I) -> Self {
        Rank::from_scores(iter.into_iter().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rank(entries: &[(&str, &str, u32)]) -> Rank {
        entries
            .iter()
            .map(|(id, name, score)| PlayerScore::new(*id, *name, *score))
            .collect()
    }

    fn positions(rank: &Rank) -> Vec<usize> {
        rank.iter().map(|ps| ps.position).collect()
    }

    #[test]
    fn from_scores_sorts_descending_and_numbers() {
        let r = rank(&[("a", "A", 5), ("b", "B", 20), ("c", "C", 10)]);
        let ids: Vec<&str> = r.iter().map(|ps| ps.player_id.as_str()).collect();
        assert_eq!(ids, vec!["b", "c", "a"]);
        assert_eq!(positions(&r), vec![1, 2, 3]);
    }

    #[test]
    fn equal_scores_keep_input_order() {
        let r = rank(&[("late", "Late", 10), ("early", "Early", 10)]);
        assert_eq!(r.as_slice()[0].player_id.as_str(), "late");
        assert_eq!(r.as_slice()[1].player_id.as_str(), "early");
    }

    #[test]
    fn add_merges_scores_and_takes_new_name() {
        let a = rank(&[("p1", "Old Name", 10), ("p2", "Bob", 4)]);
        let b = rank(&[("p1", "New Name", 3), ("p3", "Cid", 30)]);
        let merged = a.add(&b);

        assert_eq!(merged.len(), 3);
        let p1 = merged.get(&PlayerId::from("p1")).unwrap();
        assert_eq!(p1.score, 13);
        assert_eq!(p1.name, "New Name");
        assert_eq!(merged.as_slice()[0].player_id.as_str(), "p3");
        assert_eq!(positions(&merged), vec![1, 2, 3]);
    }

    #[test]
    fn add_is_commutative_on_totals() {
        let a = rank(&[("p1", "A", 10), ("p2", "B", 7)]);
        let b = rank(&[("p2", "B", 5), ("p3", "C", 1)]);
        let ab = a.add(&b);
        let ba = b.add(&a);
        for ps in &ab {
            assert_eq!(ba.get(&ps.player_id).unwrap().score, ps.score);
        }
        assert_eq!(ab.total(), ba.total());
        assert_eq!(ab.total(), a.total() + b.total());
    }

    #[test]
    fn add_empty_is_identity_apart_from_numbering() {
        let a = rank(&[("p1", "A", 10), ("p2", "B", 7)]);
        assert_eq!(a.add(&Rank::new()), a);
        assert_eq!(Rank::new().add(&a), a);
    }

    #[test]
    fn add_never_decreases_a_players_score() {
        let a = rank(&[("p1", "A", 10)]);
        let merged = a.add(&rank(&[("p1", "A", 0), ("p2", "B", 50)]));
        assert_eq!(merged.get(&PlayerId::from("p1")).unwrap().score, 10);
        assert_eq!(merged.get(&PlayerId::from("p1")).unwrap().position, 2);
    }

    #[test]
    fn subtract_floors_at_zero() {
        let total = rank(&[("p1", "A", 10), ("p2", "B", 3)]);
        let week = rank(&[("p1", "A", 4), ("p2", "B", 9), ("p3", "C", 100)]);
        let delta = total.subtract(&week);

        assert_eq!(delta.len(), 2);
        assert_eq!(delta.get(&PlayerId::from("p1")).unwrap().score, 6);
        assert_eq!(delta.get(&PlayerId::from("p2")).unwrap().score, 0);
        assert!(delta.get(&PlayerId::from("p3")).is_none());
        assert_eq!(positions(&delta), vec![1, 2]);
    }

    #[test]
    fn serializes_as_plain_list() {
        let r = rank(&[("p1", "A", 10)]);
        let json = serde_json::to_value(&r).unwrap();
        assert_eq!(
            json,
            serde_json::json!([{"player_id": "p1", "name": "A", "score": 10, "position": 1}])
        );
    }
}
