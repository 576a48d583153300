//! `ranksync join|leave|grant|revoke|groups`: host events sent to the daemon.

use anyhow::{Context, Result};
use clap::Args;

use ranksync_daemon::{request_event, DaemonError, DaemonRequest, RequestKind};

#[derive(Args, Debug)]
pub struct UserArgs {
    /// User identifier.
    pub user: String,
}

#[derive(Args, Debug)]
pub struct GroupArgs {
    /// User identifier.
    pub user: String,

    /// Group name.
    pub group: String,
}

impl UserArgs {
    pub fn run(self, cmd: RequestKind) -> Result<()> {
        send(DaemonRequest::for_user(cmd, self.user))
    }
}

impl GroupArgs {
    pub fn run(self, cmd: RequestKind) -> Result<()> {
        send(DaemonRequest::for_user(cmd, self.user).with_group(self.group))
    }
}

fn send(request: DaemonRequest) -> Result<()> {
    let home = dirs::home_dir().context("could not determine home directory")?;

    let data = match request_event(&home, &request) {
        Ok(data) => data,
        Err(err @ DaemonError::DaemonNotRunning { .. }) => {
            return Err(err).context("start it with `ranksync daemon start`");
        }
        Err(err) => return Err(err).with_context(|| format!("'{}' failed", request.cmd)),
    };

    println!(
        "{}",
        serde_json::to_string_pretty(&data).context("failed to render daemon response")?
    );
    Ok(())
}
