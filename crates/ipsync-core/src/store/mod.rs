// # IP Set Store Implementations
//
// Local implementations of the IpSetStore trait. Both enforce the same
// limits as the firewall service so that reconciliation behaves the same
// against them as against a real IP set.

pub mod file;
pub mod memory;

pub use file::{FileIpSetStore, FileIpSetStoreFactory};
pub use memory::{MemoryIpSetStore, MemoryIpSetStoreFactory};

use std::collections::BTreeSet;

use crate::Error;
use crate::model::{IpRange, IpSetLimits, SyncStamp};
use crate::reconciler::MutationKind;
use crate::traits::MutationOutcome;

/// Members plus description of one IP set
///
/// Local stores keep this as their whole state. Remote stores rebuild it
/// from each read and apply mutations to it before writing back.
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct LocalIpSet {
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub addresses: BTreeSet<IpRange>,
}

impl LocalIpSet {
    pub fn state(&self) -> crate::model::IpSetState {
        crate::model::IpSetState {
            members: self.addresses.clone(),
            applied_token: SyncStamp::parse_token(&self.description),
        }
    }

    /// Apply one mutating call with service semantics
    ///
    /// Limits are checked before anything changes; a rejected call leaves
    /// the set untouched.
    pub fn apply(
        &mut self,
        kind: MutationKind,
        ranges: &[IpRange],
        stamp: &SyncStamp,
        limits: IpSetLimits,
    ) -> Result<MutationOutcome, Error> {
        if ranges.len() > limits.max_mutations_per_call {
            return Err(Error::MutationCeilingExceeded {
                attempted: ranges.len(),
                limit: limits.max_mutations_per_call,
            });
        }

        let changed = match kind {
            MutationKind::Add => {
                let new: BTreeSet<IpRange> = ranges
                    .iter()
                    .filter(|r| !self.addresses.contains(r))
                    .copied()
                    .collect();
                let required = self.addresses.len() + new.len();
                if required > limits.capacity {
                    return Err(Error::CapacityExceeded {
                        required,
                        capacity: limits.capacity,
                    });
                }
                let count = new.len();
                self.addresses.extend(new);
                count
            }
            MutationKind::Remove => ranges
                .iter()
                .filter(|r| self.addresses.remove(r))
                .count(),
        };

        self.description = stamp.description();

        Ok(MutationOutcome {
            changed,
            size_after: self.addresses.len(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::SyncToken;

    fn stamp() -> SyncStamp {
        SyncStamp {
            token: SyncToken(9),
            create_time: "2024-01-01-00-00-00".to_string(),
            service: "CLOUDFRONT".to_string(),
        }
    }

    fn ranges(list: &[&str]) -> Vec<IpRange> {
        list.iter().map(|s| s.parse().unwrap()).collect()
    }

    #[test]
    fn test_add_and_remove_are_set_operations() {
        let mut set = LocalIpSet::default();
        let limits = IpSetLimits::default();

        let out = set
            .apply(MutationKind::Add, &ranges(&["1.2.3.0/24", "5.6.7.0/24"]), &stamp(), limits)
            .unwrap();
        assert_eq!(out, MutationOutcome { changed: 2, size_after: 2 });

        let out = set
            .apply(MutationKind::Add, &ranges(&["1.2.3.0/24"]), &stamp(), limits)
            .unwrap();
        assert_eq!(out, MutationOutcome { changed: 0, size_after: 2 });

        let out = set
            .apply(MutationKind::Remove, &ranges(&["9.9.9.0/24", "1.2.3.0/24"]), &stamp(), limits)
            .unwrap();
        assert_eq!(out, MutationOutcome { changed: 1, size_after: 1 });
        assert_eq!(set.state().applied_token, Some(SyncToken(9)));
    }

    #[test]
    fn test_limits_reject_without_change() {
        let mut set = LocalIpSet::default();
        let limits = IpSetLimits {
            capacity: 2,
            max_mutations_per_call: 2,
        };

        let err = set
            .apply(
                MutationKind::Add,
                &ranges(&["1.0.0.0/24", "2.0.0.0/24", "3.0.0.0/24"]),
                &stamp(),
                limits,
            )
            .unwrap_err();
        assert!(matches!(err, Error::MutationCeilingExceeded { attempted: 3, limit: 2 }));

        set.apply(MutationKind::Add, &ranges(&["1.0.0.0/24", "2.0.0.0/24"]), &stamp(), limits)
            .unwrap();
        let err = set
            .apply(MutationKind::Add, &ranges(&["3.0.0.0/24"]), &stamp(), limits)
            .unwrap_err();
        assert!(matches!(err, Error::CapacityExceeded { required: 3, capacity: 2 }));
        assert_eq!(set.addresses.len(), 2);
    }
}
