use std::path::{Path, PathBuf};

pub use ranksync_core::config::ranksync_root;

pub const DAEMON_SOCKET: &str = "daemon.sock";

pub fn socket_path(home: &Path) -> PathBuf {
    ranksync_root(home).join(DAEMON_SOCKET)
}
