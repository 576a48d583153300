//! # ranksync-sync
//!
//! Keeps a persisted record of each user's groups in step with the live
//! permission authority.
//!
//! - [`store`]: the record store adapter ([`RecordStore`], SQLite + memory)
//! - [`reconcile`]: set diff and application to the authority
//! - [`coordinator`]: per-user ordered event processing
//!
//! Call [`Coordinator::dispatch`] from the host's event hooks; each event is
//! handled on the affected user's lane without blocking the caller.

pub mod authority;
pub mod coordinator;
pub mod error;
pub mod memory;
pub mod reconcile;
pub mod store;

pub use authority::{MemoryAuthority, PermissionAuthority, UserDirectory};
pub use coordinator::{Coordinator, CoordinatorStats, SyncEvent, SyncOutcome, SyncState};
pub use error::SyncError;
pub use memory::MemoryRecordStore;
pub use reconcile::{apply_to_authority, diff, GroupDiff};
pub use store::{RecordStore, SqliteRecordStore};
