//! `ranksync record`: read a user's row directly from the rank table.

use anyhow::{Context, Result};
use clap::Args;
use colored::Colorize;
use serde::Serialize;

use ranksync_core::{codec, config, DatabaseConfig, PersistedRecord, UserId};
use ranksync_sync::{RecordStore, SqliteRecordStore, SyncError};

/// Arguments for `ranksync record`.
#[derive(Args, Debug)]
pub struct RecordArgs {
    /// User identifier.
    pub user: String,

    /// Emit machine-readable JSON.
    #[arg(long)]
    pub json: bool,
}

#[derive(Serialize)]
struct RecordJson {
    user: String,
    found: bool,
    ranks: Option<String>,
    groups: Option<Vec<String>>,
    error: Option<String>,
}

impl RecordArgs {
    pub fn run(self) -> Result<()> {
        let home = dirs::home_dir().context("could not determine home directory")?;
        let config = config::load_at(&home)
            .context("failed to load config; run `ranksync config init` first")?;

        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .context("failed to start runtime")?;

        let user = UserId::from(self.user.as_str());
        let record = runtime
            .block_on(read_record(&config.database, &user))
            .context("failed to read record")?;

        let report = build_report(&user, record);
        if self.json {
            println!(
                "{}",
                serde_json::to_string_pretty(&report).context("failed to render record JSON")?
            );
        } else {
            print_report(&report);
        }
        Ok(())
    }
}

/// Read-only: a missing database or relation reads as "no record".
async fn read_record(
    database: &DatabaseConfig,
    user: &UserId,
) -> Result<Option<PersistedRecord>, SyncError> {
    let Some(store) = SqliteRecordStore::open_existing(database).await? else {
        return Ok(None);
    };
    let result = fetch(&store, user).await;
    store.close().await;
    result
}

async fn fetch(
    store: &SqliteRecordStore,
    user: &UserId,
) -> Result<Option<PersistedRecord>, SyncError> {
    if !store.relation_exists().await? {
        return Ok(None);
    }
    store.fetch_by_user(user).await
}

fn build_report(user: &UserId, record: Option<PersistedRecord>) -> RecordJson {
    let Some(record) = record else {
        return RecordJson {
            user: user.to_string(),
            found: false,
            ranks: None,
            groups: None,
            error: None,
        };
    };

    let (groups, error) = match record.roles.as_deref().map(codec::decode) {
        Some(Ok(groups)) => (Some(groups), None),
        Some(Err(err)) => (None, Some(err.to_string())),
        None => (None, None),
    };
    RecordJson {
        user: record.user_id.to_string(),
        found: true,
        ranks: record.roles,
        groups,
        error,
    }
}

fn print_report(report: &RecordJson) {
    if !report.found {
        println!("{} no record for {}", "absent".yellow(), report.user);
        return;
    }

    println!("UserID: {}", report.user);
    match &report.ranks {
        Some(ranks) => println!("Ranks:  {ranks}"),
        None => println!("Ranks:  {}", "NULL".red()),
    }
    match (&report.groups, &report.error) {
        (Some(groups), _) => println!("Groups: {}", groups.join(", ")),
        (None, Some(err)) => println!("Groups: {} ({err})", "malformed".red()),
        (None, None) => println!("Groups: {}", "unreadable".red()),
    }
}
