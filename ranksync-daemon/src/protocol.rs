use std::fmt;
use std::io::{BufRead, BufReader, ErrorKind, Write};
use std::os::unix::net::UnixStream;
use std::path::Path;
use std::thread::sleep;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{io_err, DaemonError};
use crate::paths::socket_path;

/// Connection attempts made while a freshly started daemon binds its socket.
const STARTUP_ATTEMPTS: u32 = 5;
const STARTUP_BACKOFF: Duration = Duration::from_millis(100);

/// The daemon's request set. Anything else fails to parse.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestKind {
    Join,
    Leave,
    Grant,
    Revoke,
    Groups,
    Status,
    Stop,
}

impl RequestKind {
    pub fn as_str(self) -> &'static str {
        match self {
            RequestKind::Join => "join",
            RequestKind::Leave => "leave",
            RequestKind::Grant => "grant",
            RequestKind::Revoke => "revoke",
            RequestKind::Groups => "groups",
            RequestKind::Status => "status",
            RequestKind::Stop => "stop",
        }
    }

    pub fn needs_user(self) -> bool {
        !matches!(self, RequestKind::Status | RequestKind::Stop)
    }

    pub fn needs_group(self) -> bool {
        matches!(self, RequestKind::Grant | RequestKind::Revoke)
    }

    /// Safe to resend when the first connection attempt found no daemon.
    /// Host events are never retried; a late daemon must not replay them.
    fn waits_for_startup(self) -> bool {
        matches!(self, RequestKind::Status | RequestKind::Groups)
    }
}

impl fmt::Display for RequestKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One request line: `{"cmd":"grant","user":"u1","group":"vip"}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DaemonRequest {
    pub cmd: RequestKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group: Option<String>,
}

impl DaemonRequest {
    pub fn new(cmd: RequestKind) -> Self {
        Self {
            cmd,
            user: None,
            group: None,
        }
    }

    pub fn for_user(cmd: RequestKind, user: impl Into<String>) -> Self {
        Self {
            user: Some(user.into()),
            ..Self::new(cmd)
        }
    }

    pub fn with_group(mut self, group: impl Into<String>) -> Self {
        self.group = Some(group.into());
        self
    }
}

/// One response line.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DaemonResponse {
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl DaemonResponse {
    pub fn ok(data: Value) -> Self {
        Self {
            ok: true,
            data: Some(data),
            error: None,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            ok: false,
            data: None,
            error: Some(message.into()),
        }
    }
}

/// Send one request and read one response. Retries only requests that
/// [`RequestKind`] marks as safe to resend, and only while no daemon answers.
pub fn send_request(home: &Path, request: &DaemonRequest) -> Result<DaemonResponse, DaemonError> {
    let socket = socket_path(home);
    let attempts = if request.cmd.waits_for_startup() {
        STARTUP_ATTEMPTS
    } else {
        1
    };

    let mut attempt = 1;
    let stream = loop {
        match connect(&socket) {
            Err(DaemonError::DaemonNotRunning { .. }) if attempt < attempts => {
                attempt += 1;
                sleep(STARTUP_BACKOFF);
            }
            other => break other?,
        }
    };

    exchange(stream, &socket, request)
}

fn connect(socket: &Path) -> Result<UnixStream, DaemonError> {
    let not_running = || DaemonError::DaemonNotRunning {
        socket: socket.to_path_buf(),
    };
    if !socket.exists() {
        return Err(not_running());
    }
    UnixStream::connect(socket).map_err(|err| match err.kind() {
        ErrorKind::NotFound | ErrorKind::ConnectionRefused | ErrorKind::ConnectionReset => {
            not_running()
        }
        _ => io_err(socket, err),
    })
}

fn exchange(
    mut stream: UnixStream,
    socket: &Path,
    request: &DaemonRequest,
) -> Result<DaemonResponse, DaemonError> {
    let mut line = serde_json::to_string(request)?;
    line.push('\n');
    stream
        .write_all(line.as_bytes())
        .and_then(|()| stream.flush())
        .map_err(|e| io_err(socket, e))?;

    let mut reply = String::new();
    let read = BufReader::new(stream)
        .read_line(&mut reply)
        .map_err(|e| io_err(socket, e))?;
    if read == 0 {
        return Err(DaemonError::Protocol(format!(
            "daemon closed connection before answering '{}'",
            request.cmd
        )));
    }
    Ok(serde_json::from_str(reply.trim_end())?)
}

/// Daemon status payload. Waits briefly for a daemon that is still starting.
pub fn request_status(home: &Path) -> Result<Value, DaemonError> {
    request_event(home, &DaemonRequest::new(RequestKind::Status))
}

pub fn request_stop(home: &Path) -> Result<(), DaemonError> {
    request_event(home, &DaemonRequest::new(RequestKind::Stop)).map(|_| ())
}

/// Send `request` and unwrap its `data`, turning an error response into
/// [`DaemonError::Protocol`].
pub fn request_event(home: &Path, request: &DaemonRequest) -> Result<Value, DaemonError> {
    response_into_data(send_request(home, request)?)
}

fn response_into_data(response: DaemonResponse) -> Result<Value, DaemonError> {
    if response.ok {
        return Ok(response.data.unwrap_or(Value::Null));
    }
    Err(DaemonError::Protocol(
        response
            .error
            .unwrap_or_else(|| "unknown daemon error".to_string()),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;
    use tempfile::TempDir;

    #[test]
    fn request_omits_absent_fields() {
        let json = serde_json::to_string(&DaemonRequest::new(RequestKind::Status)).unwrap();
        assert_eq!(json, r#"{"cmd":"status"}"#);

        let grant = DaemonRequest::for_user(RequestKind::Grant, "u1").with_group("vip");
        let json = serde_json::to_string(&grant).unwrap();
        assert_eq!(json, r#"{"cmd":"grant","user":"u1","group":"vip"}"#);
    }

    #[test]
    fn unknown_command_does_not_parse() {
        let parsed = serde_json::from_str::<DaemonRequest>(r#"{"cmd":"dance"}"#);
        assert!(parsed.is_err());
    }

    #[test]
    fn argument_requirements_follow_command() {
        assert!(RequestKind::Grant.needs_group());
        assert!(RequestKind::Join.needs_user());
        assert!(!RequestKind::Join.needs_group());
        assert!(!RequestKind::Status.needs_user());
    }

    #[test]
    fn host_events_fail_fast_without_daemon() {
        let home = TempDir::new().unwrap();
        let started = Instant::now();
        let err = send_request(home.path(), &DaemonRequest::for_user(RequestKind::Join, "u1"))
            .unwrap_err();
        assert!(matches!(err, DaemonError::DaemonNotRunning { .. }));
        assert!(started.elapsed() < STARTUP_BACKOFF);
    }

    #[test]
    fn status_waits_for_startup_before_giving_up() {
        let home = TempDir::new().unwrap();
        let started = Instant::now();
        let err = request_status(home.path()).unwrap_err();
        assert!(matches!(err, DaemonError::DaemonNotRunning { .. }));
        assert!(started.elapsed() >= STARTUP_BACKOFF * (STARTUP_ATTEMPTS - 1));
    }

    #[test]
    fn error_response_becomes_protocol_error() {
        let err = response_into_data(DaemonResponse::error("boom")).unwrap_err();
        assert!(err.to_string().contains("boom"));
    }
}
