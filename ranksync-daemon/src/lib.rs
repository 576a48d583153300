//! ranksync daemon: hosts the live authority and the sync coordinator, and
//! takes host events over a Unix socket.

mod error;
pub mod paths;
pub mod protocol;
mod runtime;

pub use error::DaemonError;
pub use protocol::{
    request_event, request_status, request_stop, send_request, DaemonRequest, DaemonResponse,
    RequestKind,
};
pub use runtime::{run, start_blocking, Host};
