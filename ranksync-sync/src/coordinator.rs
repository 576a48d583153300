//! Synchronization coordinator.
//!
//! ## Per-user lanes
//!
//! Every user with pending work owns a lane: an unbounded queue drained by one
//! spawned task. Events for the same user are therefore handled strictly in
//! dispatch order, one storage round trip at a time, while lanes of different
//! users run concurrently against the shared store.
//!
//! ## States
//!
//! ```text
//! Unbootstrapped --join--> Bootstrapping --ok--> Synced
//!                               |
//!                               +--storage error--> Unbootstrapped
//! ```
//!
//! A join always re-fetches; nothing is cached across process restarts.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde::Serialize;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use ranksync_core::{codec, PersistedRecord, UserId};

use crate::authority::{PermissionAuthority, UserDirectory};
use crate::error::SyncError;
use crate::reconcile::{apply_to_authority, diff, GroupDiff};
use crate::store::RecordStore;

// ---------------------------------------------------------------------------
// Events and outcomes
// ---------------------------------------------------------------------------

/// A trigger delivered by the host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncEvent {
    UserJoined { user: UserId },
    GroupAdded { user: UserId, group: String },
    GroupRemoved { user: UserId, group: String },
    /// The user disconnected; their lane is retired.
    UserLeft { user: UserId },
}

impl SyncEvent {
    pub fn user(&self) -> &UserId {
        match self {
            SyncEvent::UserJoined { user }
            | SyncEvent::GroupAdded { user, .. }
            | SyncEvent::GroupRemoved { user, .. }
            | SyncEvent::UserLeft { user } => user,
        }
    }

    /// Skip reason used when the event's user is not connected. `None` for
    /// events that need no live user.
    fn unresolved_reason(&self) -> Option<&'static str> {
        match self {
            SyncEvent::UserJoined { .. } => Some("joined user is not connected"),
            SyncEvent::GroupAdded { .. } | SyncEvent::GroupRemoved { .. } => {
                Some("user is not connected")
            }
            SyncEvent::UserLeft { .. } => None,
        }
    }

    fn kind(&self) -> &'static str {
        match self {
            SyncEvent::UserJoined { .. } => "user_joined",
            SyncEvent::GroupAdded { .. } => "group_added",
            SyncEvent::GroupRemoved { .. } => "group_removed",
            SyncEvent::UserLeft { .. } => "user_left",
        }
    }
}

/// Why a persisted record was overwritten from the authority during bootstrap.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RederiveReason {
    NullRoles,
    MalformedRoles,
}

/// What handling one event did.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum SyncOutcome {
    /// First sighting: a record was created from the live groups.
    Inserted { roles: String },
    /// The stored roles were unusable and have been rewritten from the live groups.
    Rederived {
        roles: String,
        reason: RederiveReason,
    },
    /// The stored roles were applied to the live authority.
    Reconciled { diff: GroupDiff, applied: usize },
    /// A change event overwrote the stored roles. `matched` is `false` when no
    /// record existed for the user.
    Updated { roles: String, matched: bool },
    /// The user could not be resolved; nothing was written.
    Skipped { reason: String },
    /// Storage failed; the next triggering event retries.
    Failed { error: String },
    /// The user's lane was retired after a disconnect.
    Retired,
}

impl SyncOutcome {
    pub fn is_failure(&self) -> bool {
        matches!(self, SyncOutcome::Failed { .. })
    }
}

/// Bootstrap state of one user within this process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncState {
    Unbootstrapped,
    Bootstrapping,
    Synced,
}

/// Counters for status reporting.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CoordinatorStats {
    pub events: u64,
    pub inserted: u64,
    pub reconciled: u64,
    pub rederived: u64,
    pub updated: u64,
    pub skipped: u64,
    pub failed: u64,
    pub active_lanes: usize,
}

// ---------------------------------------------------------------------------
// Coordinator
// ---------------------------------------------------------------------------

struct SyncJob {
    event: SyncEvent,
    respond_to: oneshot::Sender<SyncOutcome>,
}

struct Lane {
    tx: mpsc::UnboundedSender<SyncJob>,
    handle: JoinHandle<()>,
}

#[derive(Default)]
struct Counters {
    events: AtomicU64,
    inserted: AtomicU64,
    reconciled: AtomicU64,
    rederived: AtomicU64,
    updated: AtomicU64,
    skipped: AtomicU64,
    failed: AtomicU64,
}

struct Shared {
    store: Arc<dyn RecordStore>,
    authority: Arc<dyn PermissionAuthority>,
    directory: Arc<dyn UserDirectory>,
    lanes: Mutex<HashMap<UserId, Lane>>,
    states: Mutex<HashMap<UserId, SyncState>>,
    counters: Counters,
}

/// Routes host events to per-user lanes. Cheap to clone.
#[derive(Clone)]
pub struct Coordinator {
    shared: Arc<Shared>,
}

impl Coordinator {
    pub fn new(
        store: Arc<dyn RecordStore>,
        authority: Arc<dyn PermissionAuthority>,
        directory: Arc<dyn UserDirectory>,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                store,
                authority,
                directory,
                lanes: Mutex::new(HashMap::new()),
                states: Mutex::new(HashMap::new()),
                counters: Counters::default(),
            }),
        }
    }

    /// Build from a host object acting as both authority and directory.
    pub fn with_host<H>(store: Arc<dyn RecordStore>, host: Arc<H>) -> Self
    where
        H: PermissionAuthority + UserDirectory + 'static,
    {
        Self::new(store, host.clone(), host)
    }

    /// Queue `event` on its user's lane and return immediately.
    ///
    /// The user is resolved against the directory here, when the host fires
    /// the event. An unresolved user is answered with `Skipped` without
    /// queueing; an accepted event is handled even if the user disconnects
    /// before its lane gets to it.
    ///
    /// Must be called from within a tokio runtime. The receiver resolves once
    /// the event has been handled.
    pub fn dispatch(&self, event: SyncEvent) -> oneshot::Receiver<SyncOutcome> {
        let (respond_to, rx) = oneshot::channel();
        let user = event.user().clone();
        tracing::debug!(user = %user, event = event.kind(), "dispatching sync event");

        if let Some(reason) = event.unresolved_reason() {
            if !self.shared.directory.is_online(&user) {
                let outcome = skipped(&user, reason);
                self.shared.count(&outcome);
                let _ = respond_to.send(outcome);
                return rx;
            }
        }

        let mut lanes = lock(&self.shared.lanes);
        let mut job = SyncJob { event, respond_to };
        if let Some(lane) = lanes.get(&user) {
            match lane.tx.send(job) {
                Ok(()) => return rx,
                // Lane task is gone; start a fresh one below.
                Err(mpsc::error::SendError(returned)) => job = returned,
            }
        }

        let (tx, lane_rx) = mpsc::unbounded_channel();
        // The receiver is alive until the lane task below drops it.
        let _ = tx.send(job);
        let handle = tokio::spawn(run_lane(self.shared.clone(), user.clone(), lane_rx));
        lanes.insert(user, Lane { tx, handle });
        rx
    }

    /// Dispatch and wait for the outcome.
    pub async fn process(&self, event: SyncEvent) -> Result<SyncOutcome, SyncError> {
        self.dispatch(event)
            .await
            .map_err(|_| SyncError::ChannelClosed("sync outcome"))
    }

    /// Bootstrap every user the directory reports online, concurrently.
    pub async fn resync_online(&self) -> Vec<(UserId, SyncOutcome)> {
        let pending: Vec<_> = self
            .shared
            .directory
            .online_users()
            .into_iter()
            .map(|user| {
                let rx = self.dispatch(SyncEvent::UserJoined { user: user.clone() });
                (user, rx)
            })
            .collect();

        let mut outcomes = Vec::with_capacity(pending.len());
        for (user, rx) in pending {
            let outcome = rx.await.unwrap_or_else(|_| SyncOutcome::Failed {
                error: SyncError::ChannelClosed("sync outcome").to_string(),
            });
            outcomes.push((user, outcome));
        }
        outcomes
    }

    pub fn state(&self, user: &UserId) -> SyncState {
        lock(&self.shared.states)
            .get(user)
            .copied()
            .unwrap_or(SyncState::Unbootstrapped)
    }

    pub fn stats(&self) -> CoordinatorStats {
        let c = &self.shared.counters;
        CoordinatorStats {
            events: c.events.load(Ordering::Relaxed),
            inserted: c.inserted.load(Ordering::Relaxed),
            reconciled: c.reconciled.load(Ordering::Relaxed),
            rederived: c.rederived.load(Ordering::Relaxed),
            updated: c.updated.load(Ordering::Relaxed),
            skipped: c.skipped.load(Ordering::Relaxed),
            failed: c.failed.load(Ordering::Relaxed),
            active_lanes: lock(&self.shared.lanes).len(),
        }
    }

    /// Close every lane and wait for already-queued events to finish.
    pub async fn shutdown(&self) {
        let lanes: Vec<Lane> = lock(&self.shared.lanes).drain().map(|(_, l)| l).collect();
        for Lane { tx, handle } in lanes {
            drop(tx);
            if let Err(err) = handle.await {
                tracing::warn!(error = %err, "sync lane ended abnormally");
            }
        }
    }
}

async fn run_lane(shared: Arc<Shared>, user: UserId, mut rx: mpsc::UnboundedReceiver<SyncJob>) {
    while let Some(job) = rx.recv().await {
        let retire = matches!(job.event, SyncEvent::UserLeft { .. });
        let outcome = shared.handle(job.event).await;
        shared.count(&outcome);
        let _ = job.respond_to.send(outcome);

        if retire {
            // Senders only enqueue while holding the lanes lock, so an empty
            // queue here stays empty once the entry is gone.
            let mut lanes = lock(&shared.lanes);
            if rx.is_empty() {
                lanes.remove(&user);
                break;
            }
        }
    }
    tracing::debug!(user = %user, "sync lane closed");
}

impl Shared {
    async fn handle(&self, event: SyncEvent) -> SyncOutcome {
        match event {
            SyncEvent::UserJoined { user } => self.on_join(&user).await,
            SyncEvent::GroupAdded { user, group } => {
                tracing::debug!(user = %user, group = %group, "group added");
                self.on_change(&user).await
            }
            SyncEvent::GroupRemoved { user, group } => {
                tracing::debug!(user = %user, group = %group, "group removed");
                self.on_change(&user).await
            }
            SyncEvent::UserLeft { user } => {
                lock(&self.states).remove(&user);
                SyncOutcome::Retired
            }
        }
    }

    async fn on_join(&self, user: &UserId) -> SyncOutcome {
        self.set_state(user, SyncState::Bootstrapping);
        match self.bootstrap(user).await {
            Ok(outcome) => {
                self.set_state(user, SyncState::Synced);
                tracing::info!(user = %user, outcome = ?outcome, "bootstrap complete");
                outcome
            }
            Err(err) => {
                self.set_state(user, SyncState::Unbootstrapped);
                tracing::error!(user = %user, error = %err, "bootstrap failed; live groups left untouched");
                SyncOutcome::Failed {
                    error: err.to_string(),
                }
            }
        }
    }

    async fn bootstrap(&self, user: &UserId) -> Result<SyncOutcome, SyncError> {
        let Some(record) = self.store.fetch_by_user(user).await? else {
            let roles = self.authority.groups(user).encode();
            self.store
                .insert(&PersistedRecord::new(user.clone(), roles.clone()))
                .await?;
            return Ok(SyncOutcome::Inserted { roles });
        };

        let Some(text) = record.roles else {
            tracing::warn!(user = %user, "stored roles are NULL; rewriting from authority");
            return self.rederive(user, RederiveReason::NullRoles).await;
        };

        let desired = match codec::decode_set(&text) {
            Ok(desired) => desired,
            Err(err) => {
                tracing::warn!(user = %user, roles = %text, error = %err, "stored roles are malformed; rewriting from authority");
                return self.rederive(user, RederiveReason::MalformedRoles).await;
            }
        };

        let current = self.authority.groups(user);
        let diff = diff(&current, &desired);
        let applied = apply_to_authority(self.authority.as_ref(), user, &diff);
        Ok(SyncOutcome::Reconciled { diff, applied })
    }

    async fn rederive(
        &self,
        user: &UserId,
        reason: RederiveReason,
    ) -> Result<SyncOutcome, SyncError> {
        let roles = self.authority.groups(user).encode();
        self.store.update_roles(user, &roles).await?;
        Ok(SyncOutcome::Rederived { roles, reason })
    }

    async fn on_change(&self, user: &UserId) -> SyncOutcome {
        let roles = self.authority.groups(user).encode();
        match self.store.update_roles(user, &roles).await {
            Ok(matched) => {
                if matched {
                    self.set_state(user, SyncState::Synced);
                } else {
                    tracing::debug!(user = %user, "no stored record to update");
                }
                SyncOutcome::Updated { roles, matched }
            }
            Err(err) => {
                tracing::error!(user = %user, error = %err, "failed to persist group change");
                SyncOutcome::Failed {
                    error: err.to_string(),
                }
            }
        }
    }

    fn set_state(&self, user: &UserId, state: SyncState) {
        lock(&self.states).insert(user.clone(), state);
    }

    fn count(&self, outcome: &SyncOutcome) {
        let c = &self.counters;
        c.events.fetch_add(1, Ordering::Relaxed);
        let counter = match outcome {
            SyncOutcome::Inserted { .. } => &c.inserted,
            SyncOutcome::Rederived { .. } => &c.rederived,
            SyncOutcome::Reconciled { .. } => &c.reconciled,
            SyncOutcome::Updated { .. } => &c.updated,
            SyncOutcome::Skipped { .. } => &c.skipped,
            SyncOutcome::Failed { .. } => &c.failed,
            SyncOutcome::Retired => return,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

fn skipped(user: &UserId, reason: &str) -> SyncOutcome {
    tracing::info!(user = %user, reason, "sync skipped");
    SyncOutcome::Skipped {
        reason: reason.to_string(),
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
