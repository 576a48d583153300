//! Group set reconciliation.
//!
//! [`diff`] is pure and direction-agnostic:
//!
//! ```text
//! to_add    = desired − current
//! to_remove = current − desired
//! ```
//!
//! On join the persisted set is `desired` and the result is applied to the
//! live authority with [`apply_to_authority`]. On change events the live set
//! is `desired`; the store has no incremental primitive, so that direction
//! only ever re-encodes the full live set.

use serde::Serialize;

use ranksync_core::{GroupSet, UserId};

use crate::authority::PermissionAuthority;

/// Minimal changes turning one group set into another.
///
/// `to_add` and `to_remove` are disjoint by construction.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct GroupDiff {
    pub to_add: GroupSet,
    pub to_remove: GroupSet,
}

impl GroupDiff {
    pub fn is_empty(&self) -> bool {
        self.to_add.is_empty() && self.to_remove.is_empty()
    }

    /// Number of individual add/remove operations.
    pub fn len(&self) -> usize {
        self.to_add.len() + self.to_remove.len()
    }
}

/// Compute what must change for `current` to equal `desired`.
pub fn diff(current: &GroupSet, desired: &GroupSet) -> GroupDiff {
    GroupDiff {
        to_add: desired.minus(current),
        to_remove: current.minus(desired),
    }
}

/// Apply `diff` to the live authority for `user`: removals first, then
/// additions. Returns how many calls actually changed membership.
pub fn apply_to_authority(
    authority: &dyn PermissionAuthority,
    user: &UserId,
    diff: &GroupDiff,
) -> usize {
    let mut changed = 0;
    for group in &diff.to_remove {
        if authority.remove_group(user, group) {
            tracing::debug!(user = %user, group = %group, "removed group from authority");
            changed += 1;
        }
    }
    for group in &diff.to_add {
        if authority.has_group(user, group) {
            continue;
        }
        if authority.add_group(user, group) {
            tracing::debug!(user = %user, group = %group, "added group to authority");
            changed += 1;
        }
    }
    changed
}
