//! Diff computation
//!
//! A plan is a pure function of (current members, target members, capacity).
//! It never looks at how the current state came to be, so a duplicated or
//! reordered notification plans against what is actually there.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

use crate::model::IpRange;

/// Kind of mutation carried by a batch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MutationKind {
    Add,
    Remove,
}

impl fmt::Display for MutationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MutationKind::Add => write!(f, "add"),
            MutationKind::Remove => write!(f, "remove"),
        }
    }
}

/// Which side of the diff is applied first
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApplyOrder {
    /// Additions first: the set never transiently loses a target range
    AddFirst,
    /// Removals first: needed when adding first would overflow capacity
    RemoveFirst,
}

/// Minimal set of mutations turning `current` into `target`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconcilePlan {
    /// `target − current`, ascending
    pub to_add: Vec<IpRange>,
    /// `current − target`, ascending
    pub to_remove: Vec<IpRange>,
    pub order: ApplyOrder,
}

impl ReconcilePlan {
    pub fn compute(
        current: &BTreeSet<IpRange>,
        target: &BTreeSet<IpRange>,
        capacity: usize,
    ) -> Self {
        let to_add: Vec<IpRange> = target.difference(current).copied().collect();
        let to_remove: Vec<IpRange> = current.difference(target).copied().collect();

        let order = if current.len() + to_add.len() > capacity {
            ApplyOrder::RemoveFirst
        } else {
            ApplyOrder::AddFirst
        };

        Self {
            to_add,
            to_remove,
            order,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.to_add.is_empty() && self.to_remove.is_empty()
    }

    /// The two phases in application order, skipping empty ones
    pub fn phases(&self) -> Vec<(MutationKind, &[IpRange])> {
        let adds = (MutationKind::Add, self.to_add.as_slice());
        let removes = (MutationKind::Remove, self.to_remove.as_slice());
        let ordered = match self.order {
            ApplyOrder::AddFirst => [adds, removes],
            ApplyOrder::RemoveFirst => [removes, adds],
        };
        ordered
            .into_iter()
            .filter(|(_, ranges)| !ranges.is_empty())
            .collect()
    }
}

/// Batch size to continue with after the store rejected `attempted` ranges
///
/// Uses the limit the store reported when it is smaller than what was sent,
/// otherwise halves. Never returns 0.
pub fn shrink_batch(attempted: usize, reported_limit: usize) -> usize {
    let next = if reported_limit > 0 && reported_limit < attempted {
        reported_limit
    } else {
        attempted / 2
    };
    next.max(1)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn set(items: &[&str]) -> BTreeSet<IpRange> {
        items.iter().map(|s| s.parse().unwrap()).collect()
    }

    #[test]
    fn test_diff_is_set_difference_both_ways() {
        let current = set(&["1.2.3.0/24", "9.9.9.0/24"]);
        let target = set(&["1.2.3.0/24", "5.6.7.0/24"]);

        let plan = ReconcilePlan::compute(&current, &target, 100);
        assert_eq!(plan.to_add, vec!["5.6.7.0/24".parse().unwrap()]);
        assert_eq!(plan.to_remove, vec!["9.9.9.0/24".parse().unwrap()]);
        assert_eq!(plan.order, ApplyOrder::AddFirst);
    }

    #[test]
    fn test_identical_sets_plan_nothing() {
        let current = set(&["1.2.3.0/24"]);
        let plan = ReconcilePlan::compute(&current, &current.clone(), 1);
        assert!(plan.is_empty());
        assert!(plan.phases().is_empty());
    }

    #[test]
    fn test_removals_first_when_adding_would_overflow() {
        let current = set(&["1.0.0.0/24", "2.0.0.0/24"]);
        let target = set(&["2.0.0.0/24", "3.0.0.0/24"]);

        let plan = ReconcilePlan::compute(&current, &target, 2);
        assert_eq!(plan.order, ApplyOrder::RemoveFirst);
        let phases = plan.phases();
        assert_eq!(phases[0].0, MutationKind::Remove);
        assert_eq!(phases[1].0, MutationKind::Add);
    }

    #[test]
    fn test_shrink_batch() {
        assert_eq!(shrink_batch(100, 25), 25);
        assert_eq!(shrink_batch(100, 100), 50);
        assert_eq!(shrink_batch(100, 0), 50);
        assert_eq!(shrink_batch(1, 0), 1);
    }
}
