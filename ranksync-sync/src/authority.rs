//! The live permission authority and the host's user directory.
//!
//! Both are owned by the host; the engine only calls them. Each call is
//! atomic on its own, nothing more is assumed.

use std::collections::{BTreeSet, HashMap};
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use ranksync_core::{GroupSet, UserId};

/// Current group membership, mutable at any time by the host.
pub trait PermissionAuthority: Send + Sync {
    fn groups(&self, user: &UserId) -> GroupSet;

    /// Returns `true` if the user was not already in `group`.
    fn add_group(&self, user: &UserId, group: &str) -> bool;

    /// Returns `true` if the user was in `group`.
    fn remove_group(&self, user: &UserId, group: &str) -> bool;

    fn has_group(&self, user: &UserId, group: &str) -> bool {
        self.groups(user).contains(group)
    }
}

/// Resolves identifiers to currently connected users.
pub trait UserDirectory: Send + Sync {
    fn is_online(&self, user: &UserId) -> bool;

    /// Sorted.
    fn online_users(&self) -> Vec<UserId>;
}

#[derive(Debug, Default)]
struct AuthorityState {
    groups: HashMap<UserId, GroupSet>,
    online: BTreeSet<UserId>,
}

/// Lock-protected authority + directory kept entirely in memory.
#[derive(Debug, Default)]
pub struct MemoryAuthority {
    state: RwLock<AuthorityState>,
}

impl MemoryAuthority {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark `user` as connected. Returns `false` if already online.
    pub fn connect(&self, user: &UserId) -> bool {
        self.write().online.insert(user.clone())
    }

    /// Mark `user` as gone. Group membership is kept.
    pub fn disconnect(&self, user: &UserId) -> bool {
        self.write().online.remove(user)
    }

    fn read(&self) -> RwLockReadGuard<'_, AuthorityState> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, AuthorityState> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }
}

impl PermissionAuthority for MemoryAuthority {
    fn groups(&self, user: &UserId) -> GroupSet {
        self.read().groups.get(user).cloned().unwrap_or_default()
    }

    fn add_group(&self, user: &UserId, group: &str) -> bool {
        self.write()
            .groups
            .entry(user.clone())
            .or_default()
            .insert(group)
    }

    fn remove_group(&self, user: &UserId, group: &str) -> bool {
        let mut state = self.write();
        let Some(groups) = state.groups.get_mut(user) else {
            return false;
        };
        let removed = groups.remove(group);
        if groups.is_empty() {
            state.groups.remove(user);
        }
        removed
    }

    fn has_group(&self, user: &UserId, group: &str) -> bool {
        self.read()
            .groups
            .get(user)
            .is_some_and(|groups| groups.contains(group))
    }
}

impl UserDirectory for MemoryAuthority {
    fn is_online(&self, user: &UserId) -> bool {
        self.read().online.contains(user)
    }

    fn online_users(&self) -> Vec<UserId> {
        self.read().online.iter().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn add_and_remove_report_changes() {
        let authority = MemoryAuthority::new();
        let user = UserId::from("u1");
        assert!(authority.add_group(&user, "vip"));
        assert!(!authority.add_group(&user, "vip"));
        assert!(authority.has_group(&user, "vip"));
        assert!(authority.remove_group(&user, "vip"));
        assert!(!authority.remove_group(&user, "vip"));
        assert!(authority.groups(&user).is_empty());
    }

    #[test]
    fn unknown_user_has_no_groups() {
        let authority = MemoryAuthority::new();
        assert!(authority.groups(&UserId::from("nobody")).is_empty());
        assert!(!authority.has_group(&UserId::from("nobody"), "vip"));
    }

    #[test]
    fn directory_tracks_connections() {
        let authority = MemoryAuthority::new();
        let a = UserId::from("b-user");
        let b = UserId::from("a-user");
        assert!(authority.connect(&a));
        assert!(authority.connect(&b));
        assert!(!authority.connect(&a));
        assert_eq!(authority.online_users(), vec![b.clone(), a.clone()]);

        authority.add_group(&a, "vip");
        assert!(authority.disconnect(&a));
        assert!(!authority.is_online(&a));
        assert!(authority.has_group(&a, "vip"), "membership outlives the session");
    }
}
