//! Domain types shared by the store, the reconciliation engine and the daemon.
//!
//! A user is only ever referenced by its opaque [`UserId`]; the host owns the
//! user object itself.

use std::collections::btree_set;
use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::codec;

// ---------------------------------------------------------------------------
// Newtypes
// ---------------------------------------------------------------------------

/// Stable opaque identifier of a user in the host's player registry.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(pub String);

impl UserId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<String> for UserId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for UserId {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

// ---------------------------------------------------------------------------
// GroupSet
// ---------------------------------------------------------------------------

/// The groups a user belongs to.
///
/// Set semantics; iteration is in sorted order so that the encoded RolesText
/// is deterministic for equal sets.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct GroupSet(BTreeSet<String>);

impl GroupSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `true` if the group was not already present.
    pub fn insert(&mut self, group: impl Into<String>) -> bool {
        self.0.insert(group.into())
    }

    /// Returns `true` if the group was present.
    pub fn remove(&mut self, group: &str) -> bool {
        self.0.remove(group)
    }

    pub fn contains(&self, group: &str) -> bool {
        self.0.contains(group)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> btree_set::Iter<'_, String> {
        self.0.iter()
    }

    /// Groups in `self` that are not in `other`, in sorted order.
    pub fn minus(&self, other: &GroupSet) -> GroupSet {
        self.0.difference(&other.0).cloned().collect()
    }

    /// Canonical RolesText for this set.
    pub fn encode(&self) -> String {
        codec::encode(self.iter())
    }
}

impl fmt::Display for GroupSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{{}}}", self.encode())
    }
}

impl<S: Into<String>> FromIterator<S> for GroupSet {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        Self(iter.into_iter().map(Into::into).collect())
    }
}

impl<'a> IntoIterator for &'a GroupSet {
    type Item = &'a String;
    type IntoIter = btree_set::Iter<'a, String>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

impl IntoIterator for GroupSet {
    type Item = String;
    type IntoIter = btree_set::IntoIter<String>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

// ---------------------------------------------------------------------------
// PersistedRecord
// ---------------------------------------------------------------------------

/// One row of the ranks relation: `(UserID, Ranks)`.
///
/// `roles` is `None` when the stored `Ranks` column is NULL.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersistedRecord {
    pub user_id: UserId,
    pub roles: Option<String>,
}

impl PersistedRecord {
    pub fn new(user_id: UserId, roles: impl Into<String>) -> Self {
        Self {
            user_id,
            roles: Some(roles.into()),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
