use std::fs;
use std::io::ErrorKind;
use std::os::unix::net::UnixStream as StdUnixStream;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::unix::OwnedWriteHalf;
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::broadcast;

use ranksync_core::{codec, config, Config, UserId};
use ranksync_sync::{
    Coordinator, MemoryAuthority, PermissionAuthority, RecordStore, SqliteRecordStore, SyncEvent,
    SyncOutcome, UserDirectory,
};

use crate::error::{io_err, DaemonError};
use crate::paths::{ranksync_root, socket_path};
use crate::protocol::{DaemonRequest, DaemonResponse, RequestKind};

/// The in-process host: live groups, connected users and the coordinator
/// that keeps them in step with the record table.
pub struct Host {
    authority: Arc<MemoryAuthority>,
    coordinator: Coordinator,
    table: String,
    socket: PathBuf,
    started_at_unix: u64,
}

impl Host {
    pub fn new(store: Arc<dyn RecordStore>, socket: PathBuf) -> Self {
        let authority = Arc::new(MemoryAuthority::new());
        let table = store.table().to_string();
        let coordinator = Coordinator::with_host(store, authority.clone());
        Self {
            authority,
            coordinator,
            table,
            socket,
            started_at_unix: unix_seconds_now(),
        }
    }

    pub fn coordinator(&self) -> &Coordinator {
        &self.coordinator
    }

    pub fn authority(&self) -> &MemoryAuthority {
        &self.authority
    }

    /// Answer one socket request. `stop` fires `shutdown_tx`.
    pub async fn handle_request(
        &self,
        request: &DaemonRequest,
        shutdown_tx: &broadcast::Sender<()>,
    ) -> DaemonResponse {
        match request.cmd {
            RequestKind::Status => DaemonResponse::ok(self.status_payload()),
            RequestKind::Stop => {
                let _ = shutdown_tx.send(());
                DaemonResponse::ok(json!({ "stopping": true }))
            }
            _ => match self.handle_user_command(request).await {
                Ok(data) => DaemonResponse::ok(data),
                Err(err) => DaemonResponse::error(err.to_string()),
            },
        }
    }

    async fn handle_user_command(&self, request: &DaemonRequest) -> Result<Value, DaemonError> {
        let cmd = request.cmd;
        let user = request
            .user
            .as_deref()
            .filter(|u| !u.is_empty())
            .map(UserId::from)
            .ok_or_else(|| DaemonError::Protocol(format!("'{cmd}' requires a user")))?;

        let group = if cmd.needs_group() {
            let group = request
                .group
                .as_deref()
                .filter(|g| !g.is_empty())
                .ok_or_else(|| DaemonError::Protocol(format!("'{cmd}' requires a group")))?;
            codec::validate_group(group)
                .map_err(|err| DaemonError::Protocol(format!("'{cmd}' rejected: {err}")))?;
            group.to_string()
        } else {
            String::new()
        };

        let event = match cmd {
            RequestKind::Join => {
                self.authority.connect(&user);
                SyncEvent::UserJoined { user: user.clone() }
            }
            RequestKind::Leave => {
                self.authority.disconnect(&user);
                SyncEvent::UserLeft { user: user.clone() }
            }
            RequestKind::Grant | RequestKind::Revoke => {
                let changed = if cmd == RequestKind::Grant {
                    self.authority.add_group(&user, &group)
                } else {
                    self.authority.remove_group(&user, &group)
                };
                if !changed {
                    return Ok(json!({ "user": user, "changed": false }));
                }
                if cmd == RequestKind::Grant {
                    SyncEvent::GroupAdded { user: user.clone(), group }
                } else {
                    SyncEvent::GroupRemoved { user: user.clone(), group }
                }
            }
            RequestKind::Groups | RequestKind::Status | RequestKind::Stop => {
                return Ok(self.groups_payload(&user));
            }
        };

        let outcome = self.coordinator.process(event).await?;
        Ok(self.outcome_payload(&user, &outcome))
    }

    fn groups_payload(&self, user: &UserId) -> Value {
        json!({
            "user": user,
            "online": self.authority.is_online(user),
            "state": self.coordinator.state(user),
            "groups": self.authority.groups(user).iter().collect::<Vec<_>>(),
        })
    }

    fn outcome_payload(&self, user: &UserId, outcome: &SyncOutcome) -> Value {
        json!({
            "user": user,
            "state": self.coordinator.state(user),
            "result": outcome,
        })
    }

    fn status_payload(&self) -> Value {
        let now = unix_seconds_now();
        json!({
            "running": true,
            "pid": std::process::id(),
            "socket": self.socket.display().to_string(),
            "table": self.table,
            "started_at": self.started_at_unix,
            "uptime_secs": now.saturating_sub(self.started_at_unix),
            "online_users": self.authority.online_users().len(),
            "stats": self.coordinator.stats(),
        })
    }
}

/// Load config, start the daemon runtime and block until it exits.
pub fn start_blocking(home: &Path) -> Result<(), DaemonError> {
    let config = config::load_or_init_at(home)?;
    init_tracing(config.debug);
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|e| io_err("tokio-runtime", e))?;
    runtime.block_on(run(home.to_path_buf(), config))
}

/// Run the daemon runtime.
///
/// Fails before binding the socket if the record table cannot be prepared.
pub async fn run(home: PathBuf, config: Config) -> Result<(), DaemonError> {
    config.validate()?;
    ensure_runtime_dirs(&home)?;

    let store = Arc::new(SqliteRecordStore::connect(&config.database).await?);
    store.ensure_schema().await?;
    tracing::info!(table = %config.database.table, "record table ready");

    // Every user connects through `join`, so there is nobody to resync here.
    let host = Arc::new(Host::new(store.clone(), socket_path(&home)));

    let (shutdown_tx, _) = broadcast::channel::<()>(16);

    let socket_handle = {
        let shutdown = shutdown_tx.clone();
        let host = host.clone();
        let home = home.clone();
        tokio::spawn(async move {
            let result =
                socket_server_task(home, host, shutdown.clone(), shutdown.subscribe()).await;
            let _ = shutdown.send(());
            result
        })
    };

    let signal_handle = {
        let shutdown = shutdown_tx.clone();
        tokio::spawn(async move {
            let mut shutdown_rx = shutdown.subscribe();
            tokio::select! {
                _ = shutdown_rx.recv() => Ok(()),
                signal = tokio::signal::ctrl_c() => {
                    match signal {
                        Ok(()) => {
                            tracing::info!("received ctrl-c, shutting down daemon");
                            let _ = shutdown.send(());
                            Ok(())
                        }
                        Err(err) => Err(DaemonError::Protocol(format!("ctrl-c handler failed: {err}"))),
                    }
                }
            }
        })
    };

    let (socket_result, signal_result) = tokio::join!(socket_handle, signal_handle);

    host.coordinator.shutdown().await;
    store.close().await;
    tracing::info!("daemon stopped");

    handle_join("socket_server", socket_result)?;
    handle_join("signal_handler", signal_result)?;
    Ok(())
}

async fn socket_server_task(
    home: PathBuf,
    host: Arc<Host>,
    shutdown_tx: broadcast::Sender<()>,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> Result<(), DaemonError> {
    let socket = socket_path(&home);
    prepare_socket_for_bind(&socket)?;

    let listener = UnixListener::bind(&socket).map_err(|e| io_err(&socket, e))?;
    set_socket_permissions(&socket)?;
    tracing::info!(socket = %socket.display(), "daemon listening");

    loop {
        tokio::select! {
            _ = shutdown_rx.recv() => break,
            accepted = listener.accept() => {
                let (stream, _) = accepted.map_err(|e| io_err(&socket, e))?;
                let host = host.clone();
                let shutdown_tx = shutdown_tx.clone();
                tokio::spawn(async move {
                    if let Err(err) = handle_socket_client(stream, host, shutdown_tx).await {
                        tracing::error!(error = %err, "socket client error");
                    }
                });
            }
        }
    }

    if socket.exists() {
        let _ = fs::remove_file(&socket);
    }
    Ok(())
}

async fn handle_socket_client(
    stream: UnixStream,
    host: Arc<Host>,
    shutdown_tx: broadcast::Sender<()>,
) -> Result<(), DaemonError> {
    let (reader, mut writer) = stream.into_split();
    let mut lines = BufReader::new(reader).lines();

    while let Some(line) = lines
        .next_line()
        .await
        .map_err(|e| io_err("daemon socket read", e))?
    {
        if line.trim().is_empty() {
            continue;
        }

        let request: DaemonRequest = match serde_json::from_str(&line) {
            Ok(request) => request,
            Err(err) => {
                write_response(
                    &mut writer,
                    &DaemonResponse::error(format!("invalid request JSON: {err}")),
                )
                .await?;
                continue;
            }
        };

        let response = host.handle_request(&request, &shutdown_tx).await;
        write_response(&mut writer, &response).await?;
        if request.cmd == RequestKind::Stop {
            break;
        }
    }

    Ok(())
}

fn prepare_socket_for_bind(socket: &Path) -> Result<(), DaemonError> {
    if !socket.exists() {
        return Ok(());
    }

    match StdUnixStream::connect(socket) {
        Ok(_) => {
            return Err(DaemonError::Protocol(format!(
                "daemon socket already in use: {}",
                socket.display()
            )));
        }
        Err(err) => {
            tracing::warn!(
                socket = %socket.display(),
                error = %err,
                "removing stale daemon socket before bind",
            );
        }
    }

    match fs::remove_file(socket) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
        Err(err) => Err(io_err(socket, err)),
    }
}

fn ensure_runtime_dirs(home: &Path) -> Result<(), DaemonError> {
    let root = ranksync_root(home);
    if !root.exists() {
        fs::create_dir_all(&root).map_err(|e| io_err(&root, e))?;
    }
    Ok(())
}

async fn write_response(
    writer: &mut OwnedWriteHalf,
    response: &DaemonResponse,
) -> Result<(), DaemonError> {
    let payload = serde_json::to_string(response)?;
    writer
        .write_all(payload.as_bytes())
        .await
        .map_err(|e| io_err("daemon socket write", e))?;
    writer
        .write_all(b"\n")
        .await
        .map_err(|e| io_err("daemon socket write", e))?;
    writer
        .flush()
        .await
        .map_err(|e| io_err("daemon socket flush", e))?;
    Ok(())
}

fn handle_join(
    task: &str,
    result: Result<Result<(), DaemonError>, tokio::task::JoinError>,
) -> Result<(), DaemonError> {
    match result {
        Ok(inner) => inner,
        Err(err) => Err(DaemonError::Protocol(format!(
            "{task} task join failure: {err}"
        ))),
    }
}

fn unix_seconds_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

fn init_tracing(debug: bool) {
    use tracing_subscriber::{fmt, EnvFilter};

    let default = if debug { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    let _ = fmt().with_env_filter(filter).with_target(false).try_init();
}

#[cfg(unix)]
fn set_socket_permissions(path: &Path) -> Result<(), DaemonError> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(0o600)).map_err(|e| io_err(path, e))
}

#[cfg(not(unix))]
fn set_socket_permissions(_path: &Path) -> Result<(), DaemonError> {
    Ok(())
}
