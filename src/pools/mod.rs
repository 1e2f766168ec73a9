//! Capped preference pools with primary/secondary demotion.
//!
//! Every pool is a descending-by-score `Vec` of nodes. A node lives in at
//! most one of the (primary, secondary) pair; overflow demotes the lowest
//! primary entry into the secondary pool, and overflow there drops it.

use crate::models::{CategoryNode, CreatorNode, FollowedCreator, SpecificNode, SubNode};
use crate::scoring;
use uuid::Uuid;

/// A node that can live in a scored pool.
pub trait Poolable {
    type Key: PartialEq + Clone;

    fn pool_key(&self) -> &Self::Key;
    fn score(&self) -> f64;
    fn set_score(&mut self, score: f64);
    fn last_updated(&self) -> i64;
    fn set_last_updated(&mut self, now_ms: i64);
}

macro_rules! impl_poolable {
    ($ty:ty, $key_ty:ty, $key_field:ident) => {
        impl Poolable for $ty {
            type Key = $key_ty;

            fn pool_key(&self) -> &Self::Key {
                &self.$key_field
            }
            fn score(&self) -> f64 {
                self.score
            }
            fn set_score(&mut self, score: f64) {
                self.score = score;
            }
            fn last_updated(&self) -> i64 {
                self.last_updated
            }
            fn set_last_updated(&mut self, now_ms: i64) {
                self.last_updated = now_ms;
            }
        }
    };
}

impl_poolable!(CategoryNode, String, name);
impl_poolable!(SubNode, String, name);
impl_poolable!(SpecificNode, String, name);
impl_poolable!(CreatorNode, Uuid, creator_id);
impl_poolable!(FollowedCreator, Uuid, user_id);

fn sort_desc<N: Poolable>(pool: &mut [N]) {
    // Stable sort; the relative order of equal scores is not observable.
    pool.sort_by(|a, b| {
        b.score()
            .partial_cmp(&a.score())
            .unwrap_or(std::cmp::Ordering::Equal)
    });
}

fn remove_by_key<N: Poolable>(pool: &mut Vec<N>, key: &N::Key) -> Option<N> {
    pool.iter()
        .position(|n| n.pool_key() == key)
        .map(|idx| pool.remove(idx))
}

/// Remove and return the node with `key` from either pool, if present.
///
/// The caller mutates the node (and any nested pools while holding it) and
/// re-inserts via [`insert_into_pools`], so no second lookup is needed.
pub fn take_node<N: Poolable>(
    primary: &mut Vec<N>,
    secondary: &mut Vec<N>,
    key: &N::Key,
) -> Option<N> {
    remove_by_key(primary, key).or_else(|| remove_by_key(secondary, key))
}

/// Single-pool variant for the flat specific level.
pub fn take_from_pool<N: Poolable>(pool: &mut Vec<N>, key: &N::Key) -> Option<N> {
    remove_by_key(pool, key)
}

/// EMA-update a node's score in place and stamp it.
pub fn update_node_score<N: Poolable>(
    node: &mut N,
    new_score: f64,
    alpha: f64,
    half_life_days: f64,
    now_ms: i64,
) {
    let updated = scoring::ema_update(
        node.score(),
        node.last_updated(),
        new_score,
        alpha,
        now_ms,
        half_life_days,
    );
    node.set_score(updated);
    node.set_last_updated(now_ms);
}

/// Push into a capped pool, replacing the tail when full and outscored.
/// Returns the dropped node, if any.
fn push_or_replace<N: Poolable>(pool: &mut Vec<N>, cap: usize, candidate: N) -> Option<N> {
    if cap == 0 {
        return Some(candidate);
    }
    if pool.len() < cap {
        pool.push(candidate);
        sort_desc(pool);
        return None;
    }
    let tail_score = pool.last().map(|n| n.score()).unwrap_or(f64::NEG_INFINITY);
    if candidate.score() > tail_score {
        let dropped = pool.pop();
        pool.push(candidate);
        sort_desc(pool);
        dropped
    } else {
        Some(candidate)
    }
}

/// Idempotent re-insertion into the (primary, secondary) pool pair.
///
/// Any existing occurrence of the key is removed first; negative-scored
/// candidates are dropped outright. Overflowing the primary demotes its
/// lowest entry into the secondary by the same push-or-replace rule.
pub fn insert_into_pools<N: Poolable>(
    primary: &mut Vec<N>,
    secondary: &mut Vec<N>,
    cap_primary: usize,
    cap_secondary: usize,
    candidate: N,
) {
    remove_by_key(primary, &candidate.pool_key().clone());
    remove_by_key(secondary, &candidate.pool_key().clone());

    if candidate.score() < 0.0 {
        return;
    }

    if primary.len() < cap_primary {
        primary.push(candidate);
        sort_desc(primary);
        return;
    }

    let tail_score = primary.last().map(|n| n.score());
    match tail_score {
        Some(tail_score) if candidate.score() > tail_score => {
            let demoted = primary.pop().expect("non-empty primary has a tail");
            primary.push(candidate);
            sort_desc(primary);
            push_or_replace(secondary, cap_secondary, demoted);
        }
        _ => {
            // Primary full (or capped at zero) and not outscored: compete
            // for a secondary slot instead.
            push_or_replace(secondary, cap_secondary, candidate);
        }
    }
}

/// Single-pool insertion used at the specific level.
pub fn insert_into_pool<N: Poolable>(pool: &mut Vec<N>, cap: usize, candidate: N) {
    remove_by_key(pool, &candidate.pool_key().clone());
    if candidate.score() < 0.0 {
        return;
    }
    push_or_replace(pool, cap, candidate);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::CategoryNode;

    fn node(name: &str, score: f64) -> CategoryNode {
        let mut n = CategoryNode::new(name, 0);
        n.score = score;
        n
    }

    fn names(pool: &[CategoryNode]) -> Vec<&str> {
        pool.iter().map(|n| n.name.as_str()).collect()
    }

    #[test]
    fn test_insert_sorts_descending() {
        let mut primary = Vec::new();
        let mut secondary = Vec::new();
        for (name, score) in [("a", 1.0), ("b", 3.0), ("c", 2.0)] {
            insert_into_pools(&mut primary, &mut secondary, 5, 3, node(name, score));
        }
        assert_eq!(names(&primary), vec!["b", "c", "a"]);
        assert!(secondary.is_empty());
    }

    #[test]
    fn test_insert_respects_caps_and_demotes() {
        let mut primary = Vec::new();
        let mut secondary = Vec::new();
        for i in 0..4 {
            insert_into_pools(
                &mut primary,
                &mut secondary,
                2,
                2,
                node(&format!("n{}", i), i as f64),
            );
        }
        // n3, n2 in primary; n1, n0 demoted in order
        assert_eq!(names(&primary), vec!["n3", "n2"]);
        assert_eq!(names(&secondary), vec!["n1", "n0"]);

        // A fifth low-scored candidate fits nowhere and is dropped.
        insert_into_pools(&mut primary, &mut secondary, 2, 2, node("low", -0.5));
        assert_eq!(primary.len(), 2);
        assert_eq!(secondary.len(), 2);

        // A mid-scored candidate replaces the secondary tail.
        insert_into_pools(&mut primary, &mut secondary, 2, 2, node("mid", 0.5));
        assert_eq!(names(&secondary), vec!["n1", "mid"]);
    }

    #[test]
    fn test_insert_drops_negative_scores() {
        let mut primary = Vec::new();
        let mut secondary = Vec::new();
        insert_into_pools(&mut primary, &mut secondary, 5, 5, node("neg", -1.0));
        assert!(primary.is_empty());
        assert!(secondary.is_empty());
    }

    #[test]
    fn test_insert_is_idempotent() {
        let mut primary = Vec::new();
        let mut secondary = Vec::new();
        for _ in 0..3 {
            insert_into_pools(&mut primary, &mut secondary, 2, 2, node("x", 1.0));
        }
        assert_eq!(primary.len(), 1);
        assert!(secondary.is_empty());
    }

    #[test]
    fn test_no_key_in_both_pools() {
        let mut primary = Vec::new();
        let mut secondary = Vec::new();
        for i in 0..3 {
            insert_into_pools(
                &mut primary,
                &mut secondary,
                2,
                2,
                node(&format!("n{}", i), i as f64),
            );
        }
        // Re-inserting a demoted key with a high score must hoist it, not copy it.
        insert_into_pools(&mut primary, &mut secondary, 2, 2, node("n0", 10.0));
        let in_primary = primary.iter().filter(|n| n.name == "n0").count();
        let in_secondary = secondary.iter().filter(|n| n.name == "n0").count();
        assert_eq!(in_primary + in_secondary, 1);
        assert_eq!(names(&primary), vec!["n0", "n2"]);
    }

    #[test]
    fn test_take_node_searches_both_pools() {
        let mut primary = vec![node("a", 2.0)];
        let mut secondary = vec![node("b", 1.0)];
        assert!(take_node(&mut primary, &mut secondary, &"b".to_string()).is_some());
        assert!(take_node(&mut primary, &mut secondary, &"b".to_string()).is_none());
        assert!(take_node(&mut primary, &mut secondary, &"a".to_string()).is_some());
    }

    #[test]
    fn test_update_node_score_stamps_timestamp() {
        let mut n = node("a", 0.0);
        update_node_score(&mut n, 2.0, 0.7, 0.5, 42_000);
        assert!((n.score - 1.4).abs() < 1e-12);
        assert_eq!(n.last_updated, 42_000);
    }
}
