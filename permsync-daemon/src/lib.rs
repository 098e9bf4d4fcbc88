//! permsync daemon: the coordinator behind a newline-delimited JSON Unix socket.

mod error;
pub mod facade;
pub mod log_rotation;
pub mod paths;
pub mod protocol;
mod runtime;

pub use error::DaemonError;
pub use facade::{ApiError, PermissionSyncFacade};
pub use protocol::{
    request, request_status, request_stop, send_request, DaemonRequest, DaemonResponse, ErrorCode,
};
pub use runtime::{run, start_blocking};
