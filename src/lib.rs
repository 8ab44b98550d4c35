//! A client library that speaks LSP to a child language server process
//! (canonically `clangd`).
//!
//! The three load-bearing pieces are the connection engine
//! ([`connection::Connection`]), the per-file state machine
//! ([`file_state::ServerFileStateStore`]), and the client lifecycle
//! controller ([`lifecycle::ClientLifecycle`]). Concrete LSP feature
//! commands (completion, hover, …) are callers of
//! [`connection::Connection::send_request`] and are not part of this
//! crate.

pub mod codec;
pub mod config;
pub mod connection;
pub mod edit_collector;
pub mod error;
pub mod file_state;
pub mod jsonrpc;
pub mod lifecycle;
pub mod logging;
pub mod queue;
pub mod registry;
pub mod subprocess;
pub mod transport;
pub mod uri;
pub mod watcher;

pub use config::{ConnectionType, ResourceLimits, ServerLaunchConfig};
pub use connection::{Connection, ConnectionOptions};
pub use edit_collector::{EditCollector, RecordingEditCollector, RejectingEditCollector};
pub use error::{ClientError, ProtocolErrorCode, Result};
pub use file_state::{FileAction, FileLifecycle, ServerFileState, ServerFileStateStore};
pub use jsonrpc::{Frame, JsonRpcError, JsonRpcNotification, JsonRpcRequest, JsonRpcResponse, RequestId};
pub use lifecycle::{ClientLifecycle, FileEventKind, FileSnapshot, InitializeCompleteHandler, TickHandler};
pub use logging::Logger;
pub use queue::NotificationQueue;
pub use registry::{Pending, ResponseRegistry};
pub use uri::{file_path_to_uri, uri_to_file_path};
pub use watcher::{FileEventHandler, ListenerFactory, NotifyListenerFactory, Watcher};
