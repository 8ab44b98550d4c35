//! Client lifecycle controller: spawn, initialize handshake, orderly
//! shutdown, watchdog, thread-safe gating.
//!
//! Owns exactly one server connection behind a single async mutex —
//! this crate manages one clangd process per instance; running several
//! is the caller's job, not this controller's.

use crate::config::{ConnectionType, ResourceLimits, ServerLaunchConfig};
use crate::connection::{Connection, ConnectionOptions};
use crate::edit_collector::EditCollector;
use crate::error::{ClientError, Result};
use crate::file_state::{FileAction, ServerFileStateStore};
use crate::logging::Logger;
use crate::subprocess::{StdioTarget, StdioWiring, SubprocessHandle};
use crate::transport::StdioTransport;
use futures::future::BoxFuture;
use lsp_types::notification::Notification as _;
use lsp_types::request::{Initialize, Request, Shutdown};
use serde_json::Value;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::{Mutex, Notify};
use tracing::{error, info, warn, Instrument};
use uuid::Uuid;

/// Runs once the `initialize` response has been stored and `initialized`
/// has been sent to the server.
pub type InitializeCompleteHandler = Box<dyn Fn(Option<Value>) -> BoxFuture<'static, ()> + Send + Sync>;

/// Runs on every `on_file_ready_to_parse` tick, alongside the canonical
/// file-sync handler.
pub type TickHandler = Box<dyn Fn(Arc<Connection>, Vec<FileSnapshot>) -> BoxFuture<'static, ()> + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum HealthState {
    NotStarted,
    Running,
    Stopped,
}

struct ServerInfo {
    health: HealthState,
    subprocess: Option<SubprocessHandle>,
    connection: Option<Arc<Connection>>,
    server_capabilities: Option<Value>,
    stderr_log_path: Option<PathBuf>,
}

impl Default for ServerInfo {
    fn default() -> Self {
        Self {
            health: HealthState::NotStarted,
            subprocess: None,
            connection: None,
            server_capabilities: None,
            stderr_log_path: None,
        }
    }
}

/// Owns a single `clangd`-like server connection end to end. All mutable
/// lifecycle state lives behind `server_info`, which sits above the
/// connection's own `writer`/`response_registry` locks in acquisition
/// order: this controller never holds `server_info` while awaiting a
/// response.
pub struct ClientLifecycle {
    config: ServerLaunchConfig,
    limits: ResourceLimits,
    server_info: Mutex<ServerInfo>,
    file_state_store: Mutex<ServerFileStateStore>,
    initialize_event: Notify,
    initialized: std::sync::atomic::AtomicBool,
    initialize_complete_handlers: Mutex<Vec<InitializeCompleteHandler>>,
    tick_handlers: Mutex<Vec<TickHandler>>,
    logger: Logger,
}

impl ClientLifecycle {
    pub fn new(config: ServerLaunchConfig, limits: ResourceLimits) -> Self {
        Self {
            config,
            limits,
            server_info: Mutex::new(ServerInfo::default()),
            file_state_store: Mutex::new(ServerFileStateStore::new()),
            initialize_event: Notify::new(),
            initialized: std::sync::atomic::AtomicBool::new(false),
            initialize_complete_handlers: Mutex::new(Vec::new()),
            tick_handlers: Mutex::new(Vec::new()),
            logger: Logger::default(),
        }
    }

    /// Registers a handler to run after the `initialize`/`initialized`
    /// handshake completes. Handlers run in reverse-registration order
    /// (most recently registered first) so a caller that layers a more
    /// specific handler on top of a general one added earlier sees it
    /// run first.
    pub async fn on_initialize_complete<F, Fut>(&self, handler: F)
    where
        F: Fn(Option<Value>) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = ()> + Send + 'static,
    {
        let boxed: InitializeCompleteHandler = Box::new(move |caps| Box::pin(handler(caps)));
        self.initialize_complete_handlers.lock().await.push(boxed);
    }

    /// Registers an additional handler to run on every
    /// `on_file_ready_to_parse` tick, after the canonical file-sync
    /// handler. Runs in reverse-registration order.
    pub async fn register_tick_handler<F, Fut>(&self, handler: F)
    where
        F: Fn(Arc<Connection>, Vec<FileSnapshot>) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = ()> + Send + 'static,
    {
        let boxed: TickHandler = Box::new(move |connection, files| Box::pin(handler(connection, files)));
        self.tick_handlers.lock().await.push(boxed);
    }

    /// Spawns the subprocess, builds the connection, awaits transport
    /// readiness, and runs the `initialize`/`initialized` handshake.
    pub async fn start_server(&self) -> bool {
        let span = self.logger.span().clone();
        self.start_server_inner().instrument(span).await
    }

    async fn start_server_inner(&self) -> bool {
        if self.config.connection_type != ConnectionType::Stdio {
            error!("TCP connection_type is not supported by this client");
            return false;
        }

        let log_path = self.stderr_log_path();
        if let Some(parent) = log_path.parent() {
            let _ = std::fs::create_dir_all(parent);
        }

        let wiring = StdioWiring {
            stdin: StdioTarget::Pipe,
            stdout: StdioTarget::Pipe,
            stderr: StdioTarget::File(log_path.clone()),
        };

        let program = match self.config.command.first() {
            Some(program) => program.clone(),
            None => {
                error!("server launch config has an empty command");
                return false;
            }
        };

        let mut subprocess = match SubprocessHandle::spawn(
            &program,
            &self.config.args,
            &self.config.env,
            &self.config.project_directory,
            wiring,
        ) {
            Ok(handle) => handle,
            Err(e) => {
                error!(error = %e, "failed to spawn server subprocess");
                return false;
            }
        };

        let stdin = subprocess.stdin().expect("piped stdin");
        let stdout = subprocess.stdout().expect("piped stdout");
        let transport = StdioTransport::new(stdin, stdout);

        let connection = Connection::new(
            self.config.project_directory.clone(),
            Box::new(transport),
            self.limits.max_queued_notifications,
            ConnectionOptions::default(),
        );
        connection.start();

        {
            let mut server_info = self.server_info.lock().await;
            server_info.subprocess = Some(subprocess);
            server_info.connection = Some(connection.clone());
            server_info.health = HealthState::Running;
            server_info.stderr_log_path = Some(log_path);
        }

        if let Err(e) = connection
            .await_server_connection(self.limits.connection_timeout())
            .await
        {
            warn!(error = %e, "server connection did not become ready in time");
            self.shutdown().await;
            return false;
        }

        if let Err(e) = self.initialize_handshake(&connection).await {
            warn!(error = %e, "initialize handshake failed");
            self.shutdown().await;
            return false;
        }

        true
    }

    async fn initialize_handshake(&self, connection: &Arc<Connection>) -> Result<()> {
        let params = serde_json::json!({
            "processId": std::process::id(),
            "rootUri": crate::uri::file_path_to_uri(&self.config.project_directory),
            "rootPath": self.config.project_directory.to_string_lossy(),
            "initializationOptions": self.config.initialization_options,
            "capabilities": default_client_capabilities(),
        });

        let pending = connection.send_request(Initialize::METHOD, Some(params)).await?;
        let response = pending.await_response(self.limits.initialize_timeout()).await?;

        {
            let mut server_info = self.server_info.lock().await;
            server_info.server_capabilities = response.result.clone();
        }
        self.initialized.store(true, std::sync::atomic::Ordering::SeqCst);
        self.initialize_event.notify_waiters();

        connection
            .send_notification(lsp_types::notification::Initialized::METHOD, Some(serde_json::json!({})))
            .await?;

        let handlers = self.initialize_complete_handlers.lock().await;
        for handler in handlers.iter().rev() {
            handler(response.result.clone()).await;
        }
        Ok(())
    }

    /// Best-effort, idempotent teardown. Errors inside shutdown are
    /// logged, never propagated — a caller tearing down never wants a
    /// shutdown to fail halfway and leave the process alive.
    pub async fn shutdown(&self) {
        let span = self.logger.span().clone();
        self.shutdown_inner().instrument(span).await
    }

    async fn shutdown_inner(&self) {
        info!("shutting down server");
        let (connection, mut subprocess) = {
            let mut server_info = self.server_info.lock().await;
            if server_info.health == HealthState::Stopped {
                return;
            }
            let connection = server_info.connection.take();
            let subprocess = server_info.subprocess.take();
            server_info.health = HealthState::Stopped;
            (connection, subprocess)
        };

        if let Some(connection) = &connection {
            self.shutdown_server_protocol(connection).await;
            connection.close().await;
        }

        if let Some(subprocess) = subprocess.as_mut() {
            match subprocess.shutdown(self.limits.shutdown_join_timeout()).await {
                Ok(()) => {}
                Err(ClientError::SubprocessTerminationStuck) => {
                    warn!("subprocess did not terminate even after escalation");
                }
                Err(e) => warn!(error = %e, "error while reaping subprocess"),
            }
        }

        if !self.config.server_keep_logfiles {
            let log_path = {
                let server_info = self.server_info.lock().await;
                server_info.stderr_log_path.clone()
            };
            if let Some(path) = log_path {
                let _ = std::fs::remove_file(path);
            }
        }

        // Release any waiter blocked on `on_file_ready_to_parse` now that
        // the server is gone; they'll see `server_initialized() == false`
        // and return instead of waiting for a handshake that won't happen.
        self.initialized.store(false, std::sync::atomic::Ordering::SeqCst);
        self.initialize_event.notify_waiters();
    }

    /// LSP `shutdown`/`exit` handshake, best-effort.
    async fn shutdown_server_protocol(&self, connection: &Arc<Connection>) {
        if self.initialized.load(std::sync::atomic::Ordering::SeqCst) {
            match connection.send_request(Shutdown::METHOD, None).await {
                Ok(pending) => {
                    match pending.await_response(self.limits.initialize_timeout()).await {
                        Ok(_) | Err(ClientError::ResponseAborted(_)) => {}
                        Err(e) => warn!(error = %e, "shutdown request failed"),
                    }
                }
                Err(e) => warn!(error = %e, "failed to send shutdown request"),
            }
        }
        if self.server_healthy().await {
            if let Err(e) = connection
                .send_notification(lsp_types::notification::Exit::METHOD, None)
                .await
            {
                warn!(error = %e, "failed to send exit notification");
            }
        }
    }

    pub async fn restart(&self) -> bool {
        self.shutdown().await;
        self.start_server().await
    }

    pub async fn server_initialized(&self) -> bool {
        self.server_healthy().await && self.initialized.load(std::sync::atomic::Ordering::SeqCst)
    }

    pub async fn server_healthy(&self) -> bool {
        let server_info = self.server_info.lock().await;
        server_info.health == HealthState::Running
    }

    /// Watchdog check: polls the subprocess for unexpected exit without
    /// blocking. Returns `true` if the process died while still marked
    /// healthy.
    pub async fn poll_for_unexpected_death(&self) -> bool {
        let mut server_info = self.server_info.lock().await;
        if server_info.health != HealthState::Running {
            return false;
        }
        if let Some(subprocess) = server_info.subprocess.as_mut() {
            if let Ok(Some(status)) = subprocess.poll() {
                warn!(?status, "server subprocess exited unexpectedly");
                server_info.health = HealthState::Stopped;
                return true;
            }
        }
        false
    }

    /// Editor tick: runs the file-sync handler if the server is already
    /// initialized, otherwise starts the server first and defers.
    pub async fn on_file_ready_to_parse(&self, files: &[FileSnapshot]) {
        if !self.server_healthy().await {
            if !self.start_server().await {
                return;
            }
        }
        // Register interest before checking the condition: `Notify`'s
        // create-before-check idiom is what makes this safe against the
        // handshake completing in the gap between the two — a concurrent
        // caller's `start_server` may finish `initialized` right here, and
        // `notified()` called only after the check would miss it.
        let initialized = self.initialize_event.notified();
        tokio::pin!(initialized);
        if !self.server_initialized().await {
            initialized.await;
        }
        let connection = {
            let server_info = self.server_info.lock().await;
            server_info.connection.clone()
        };
        let Some(connection) = connection else { return };
        self.update_server_with_file_contents(&connection, files).await;

        let handlers = self.tick_handlers.lock().await;
        for handler in handlers.iter().rev() {
            handler(connection.clone(), files.to_vec()).await;
        }
    }

    /// Returns a handle to the live connection, if the server is running.
    /// Feature commands use this to issue `send_request`/
    /// `send_notification` calls directly.
    pub async fn connection(&self) -> Option<Arc<Connection>> {
        self.server_info.lock().await.connection.clone()
    }

    /// Three phases under the file-state-store lock: dirty files, saved
    /// files (collecting a purge set), then purge missing files.
    async fn update_server_with_file_contents(&self, connection: &Arc<Connection>, files: &[FileSnapshot]) {
        let mut store = self.file_state_store.lock().await;
        let mut present = std::collections::HashSet::new();

        for file in files {
            present.insert(file.path.clone());
            let state = store.get_or_insert(&file.path);
            let action = match file.kind {
                FileEventKind::Dirty => state.dirty_file(file.contents.clone()),
                FileEventKind::Saved => state.saved_file(file.contents.clone()),
            };
            self.emit_action(connection, &file.path, action).await;
        }

        let missing: Vec<String> = store
            .filenames()
            .filter(|name| !present.contains(*name))
            .map(str::to_string)
            .collect();
        for name in missing {
            if let Some(state) = store.get(&name) {
                if matches!(state.state, crate::file_state::FileLifecycle::Open) {
                    let action = store.get_or_insert(&name).file_close();
                    self.emit_action(connection, &name, action).await;
                }
            }
            store.remove(&name);
        }
    }

    async fn emit_action(&self, connection: &Arc<Connection>, path: &str, action: FileAction) {
        let uri = crate::uri::file_path_to_uri(std::path::Path::new(path));
        let result = match action {
            FileAction::OpenFile => {
                connection
                    .send_notification(
                        "textDocument/didOpen",
                        Some(serde_json::json!({"textDocument": {"uri": uri, "languageId": "cpp", "version": 1, "text": ""}})),
                    )
                    .await
            }
            FileAction::ChangeFile => {
                connection
                    .send_notification(
                        "textDocument/didChange",
                        Some(serde_json::json!({"textDocument": {"uri": uri}, "contentChanges": []})),
                    )
                    .await
            }
            FileAction::CloseFile => {
                connection
                    .send_notification(
                        "textDocument/didClose",
                        Some(serde_json::json!({"textDocument": {"uri": uri}})),
                    )
                    .await
            }
            FileAction::NoAction => Ok(()),
        };
        if let Err(e) = result {
            warn!(error = %e, path, "failed to notify server of file event");
        }
    }

    pub async fn set_edit_collector(&self, collector: Arc<dyn EditCollector>) {
        let connection = {
            let server_info = self.server_info.lock().await;
            server_info.connection.clone()
        };
        if let Some(connection) = connection {
            connection.set_edit_collector(collector).await;
        }
    }

    fn stderr_log_path(&self) -> PathBuf {
        let sanitized: String = self
            .config
            .server_name
            .to_lowercase()
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
            .collect();
        std::env::temp_dir().join(format!("{sanitized}_stderr_{}", Uuid::new_v4()))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileEventKind {
    Dirty,
    Saved,
}

#[derive(Debug, Clone)]
pub struct FileSnapshot {
    pub path: String,
    pub kind: FileEventKind,
    pub contents: Vec<u8>,
}

fn default_client_capabilities() -> Value {
    serde_json::json!({
        "workspace": {
            "applyEdit": true,
            "configuration": true,
            "didChangeWatchedFiles": {"dynamicRegistration": true},
        },
        "textDocument": {
            "synchronization": {"dynamicRegistration": false, "didSave": true},
        },
    })
}
