//! Connection engine: reader loop, writer, dispatch, server→client
//! request handling, graceful shutdown.
//!
//! The reader task owns a split read half and decodes frames one at a
//! time; the writer is a shared mutex around the split write half so
//! any number of callers can send concurrently. Server-initiated
//! requests (`workspace/applyEdit`, `workspace/configuration`,
//! `client/registerCapability`, `client/unregisterCapability`) are
//! matched via `lsp_types::request::Request::METHOD` constants rather
//! than the typed params structs, to stay stable across minor
//! `lsp-types` releases.

use crate::codec::LspCodec;
use crate::edit_collector::{EditCollector, RejectingEditCollector};
use crate::error::{ClientError, Result};
use crate::jsonrpc::{Frame, JsonRpcError, JsonRpcResponse};
use crate::logging::Logger;
use crate::queue::NotificationQueue;
use crate::registry::{Pending, ResponseRegistry};
use crate::transport::Transport;
use crate::watcher::{root_glob_pattern, ListenerFactory, Watcher};
use futures::{SinkExt, StreamExt};
use serde_json::Value;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{Mutex as AsyncMutex, Notify};
use tokio::time::Duration;
use tokio_util::codec::{FramedRead, FramedWrite};
use tracing::{debug, error, warn, Instrument};

pub type NotificationHandler = dyn Fn(&str, Option<Value>) + Send + Sync;
pub type WorkspaceConfigurationHandler = dyn Fn(Value) -> Option<Value> + Send + Sync;

/// Optional collaborators injected at construction time.
#[derive(Default)]
pub struct ConnectionOptions {
    pub listener_factory: Option<Arc<dyn ListenerFactory>>,
    pub workspace_configuration_handler: Option<Arc<WorkspaceConfigurationHandler>>,
    pub notification_handler: Option<Arc<NotificationHandler>>,
}

struct Watchers {
    by_registration_id: HashMap<String, Box<dyn Watcher>>,
}

/// The connection engine. Cheap to clone via `Arc`; all mutable state is
/// behind locks acquired in a fixed order (`server_info > writer >
/// response_registry` at the call sites that hold more than one) — this
/// type only ever holds the writer and registry locks itself, never a
/// caller-supplied `server_info`-equivalent, which is the lifecycle
/// controller's job.
pub struct Connection {
    project_directory: PathBuf,
    writer: AsyncMutex<Option<FramedWrite<crate::transport::BoxedWrite, LspCodec>>>,
    registry: Arc<ResponseRegistry>,
    notifications: Arc<NotificationQueue>,
    connection_ready: Notify,
    connected: AtomicBool,
    stop_event: AtomicBool,
    start_gate: Notify,
    started: AtomicBool,
    collector: AsyncMutex<Arc<dyn EditCollector>>,
    watchers: AsyncMutex<Watchers>,
    options: ConnectionOptions,
    reader_task: AsyncMutex<Option<tokio::task::JoinHandle<()>>>,
    logger: Logger,
}

impl Connection {
    /// Constructs the connection over `transport`. The reader task is
    /// spawned immediately but blocks on `start_gate` until [`Self::start`]
    /// releases it, so construction never races a caller who wants to
    /// install handlers/collectors before any frame can be dispatched.
    /// The transport isn't split until the reader task actually runs, so
    /// `try_connect_blocking` still has a chance to block the handshake
    /// before any frame is read or written.
    pub fn new(
        project_directory: PathBuf,
        transport: Box<dyn Transport>,
        notification_capacity: usize,
        options: ConnectionOptions,
    ) -> Arc<Self> {
        let connection = Arc::new(Self {
            project_directory,
            writer: AsyncMutex::new(None),
            registry: Arc::new(ResponseRegistry::new()),
            notifications: Arc::new(NotificationQueue::new(notification_capacity)),
            connection_ready: Notify::new(),
            connected: AtomicBool::new(false),
            stop_event: AtomicBool::new(false),
            start_gate: Notify::new(),
            started: AtomicBool::new(false),
            collector: AsyncMutex::new(Arc::new(RejectingEditCollector) as Arc<dyn EditCollector>),
            watchers: AsyncMutex::new(Watchers {
                by_registration_id: HashMap::new(),
            }),
            options,
            reader_task: AsyncMutex::new(None),
            logger: Logger::default(),
        });

        let reader_connection = connection.clone();
        let span = reader_connection.logger.span().clone();
        let task = tokio::spawn(
            async move {
                reader_connection.start_gate.notified().await;
                reader_connection.run_reader(transport).await;
            }
            .instrument(span),
        );
        {
            // Only ever set once, before anyone else can observe it.
            let mut slot = connection.reader_task.try_lock().expect("fresh connection");
            *slot = Some(task);
        }

        connection
    }

    /// Releases the reader task from its paused state.
    pub fn start(&self) {
        if !self.started.swap(true, Ordering::SeqCst) {
            self.start_gate.notify_one();
        }
    }

    /// Waits for the transport to become ready for traffic.
    pub async fn await_server_connection(&self, timeout: Duration) -> Result<()> {
        // Register interest before checking `connected`: the reader task
        // may flip it and call `notify_waiters()` in the gap between the
        // check and the await otherwise, and `notify_waiters()` (unlike
        // `notify_one()`) stores no permit for a waiter that registers late.
        let ready = self.connection_ready.notified();
        tokio::pin!(ready);
        if self.connected.load(Ordering::SeqCst) {
            return Ok(());
        }
        tokio::time::timeout(timeout, ready)
            .await
            .map_err(|_| ClientError::ConnectionTimeout)
    }

    pub fn notifications(&self) -> &NotificationQueue {
        &self.notifications
    }

    pub async fn set_edit_collector(&self, collector: Arc<dyn EditCollector>) -> Arc<dyn EditCollector> {
        let mut guard = self.collector.lock().await;
        std::mem::replace(&mut *guard, collector)
    }

    /// Swaps the active collector for the duration of `body`, then
    /// restores the previous one. Not safe to call concurrently from two
    /// command threads — only one collector can be active at a time.
    pub async fn collect_apply_edits<F, Fut, T>(&self, collector: Arc<dyn EditCollector>, body: F) -> T
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = T>,
    {
        let previous = self.set_edit_collector(collector).await;
        let result = body().await;
        self.set_edit_collector(previous).await;
        result
    }

    pub async fn send_request(&self, method: &str, params: Option<Value>) -> Result<Pending> {
        let id = self.registry.alloc_id();
        let pending = self.registry.register(id);
        let frame = serde_json::json!({
            "jsonrpc": "2.0",
            "id": id,
            "method": method,
            "params": params,
        });
        self.write_frame(frame).await?;
        Ok(pending)
    }

    pub async fn send_notification(&self, method: &str, params: Option<Value>) -> Result<()> {
        let frame = serde_json::json!({
            "jsonrpc": "2.0",
            "method": method,
            "params": params,
        });
        self.write_frame(frame).await
    }

    async fn send_response(&self, id: Value, result: Value) -> Result<()> {
        let response = JsonRpcResponse::success(id, result);
        self.write_frame(serde_json::to_value(response)?).await
    }

    async fn send_error_response(&self, id: Value, error: JsonRpcError) -> Result<()> {
        let response = JsonRpcResponse::failure(id, error);
        self.write_frame(serde_json::to_value(response)?).await
    }

    async fn write_frame(&self, frame: Value) -> Result<()> {
        let mut guard = self.writer.lock().await;
        match guard.as_mut() {
            Some(writer) => writer.send(frame).await,
            None => Err(ClientError::ConnectionStopped),
        }
    }

    /// Sets `stop_event` and closes the writer side; the reader then
    /// unblocks on EOF and tears itself down.
    pub async fn stop(&self) {
        self.stop_event.store(true, Ordering::SeqCst);
        let mut guard = self.writer.lock().await;
        *guard = None;
    }

    /// `stop()` plus joining the reader task with a short deadline.
    pub async fn close(&self) {
        self.stop().await;
        let task = {
            let mut guard = self.reader_task.lock().await;
            guard.take()
        };
        if let Some(task) = task {
            let _ = tokio::time::timeout(Duration::from_secs(2), task).await;
        }
    }

    async fn run_reader(self: Arc<Self>, mut transport: Box<dyn Transport>) {
        if let Err(e) = transport.try_connect_blocking().await {
            error!(error = %e, "transport failed to connect, aborting connection");
            return;
        }
        let (read_half, write_half) = transport.split();
        let mut framed_read = FramedRead::new(read_half, LspCodec::default());
        let framed_write = FramedWrite::new(write_half, LspCodec::default());
        {
            let mut guard = self.writer.lock().await;
            // Don't resurrect the writer if `stop()` already ran while we
            // were connecting.
            if !self.stop_event.load(Ordering::SeqCst) {
                *guard = Some(framed_write);
            }
        }

        self.connected.store(true, Ordering::SeqCst);
        self.connection_ready.notify_waiters();

        loop {
            let next = framed_read.next().await;
            match next {
                Some(Ok(value)) => {
                    if let Err(e) = self.dispatch(value).await {
                        error!(error = %e, "error dispatching frame, aborting connection");
                        break;
                    }
                }
                Some(Err(e)) => {
                    error!(error = %e, "transport read error, aborting connection");
                    break;
                }
                None => {
                    debug!("transport reached EOF, stopping connection");
                    break;
                }
            }
            if self.stop_event.load(Ordering::SeqCst) {
                break;
            }
        }

        self.connected.store(false, Ordering::SeqCst);
        self.registry.abort_all();
        let mut watchers = self.watchers.lock().await;
        for (_, mut watcher) in watchers.by_registration_id.drain() {
            watcher.stop();
        }
    }

    async fn dispatch(&self, value: Value) -> Result<()> {
        match Frame::from_value(value)? {
            Frame::Response(response) => {
                // We only ever send numeric ids for our own requests (the
                // response registry allocates a `u64`), so a response
                // whose id isn't a number can't match anything pending.
                let Some(id) = response.id.as_u64() else {
                    warn!(id = %response.id, "dropping response with non-numeric id");
                    return Ok(());
                };
                if let Err(e) = self.registry.deliver(id, response) {
                    warn!(error = %e, "dropping response for unknown request id");
                }
                Ok(())
            }
            Frame::Notification { method, params } => {
                self.notifications.try_push(serde_json::json!({"method": method, "params": params}));
                if let Some(handler) = &self.options.notification_handler {
                    let handler = handler.clone();
                    let method_owned = method.clone();
                    let params_owned = params.clone();
                    if let Err(panic) = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
                        handler(&method_owned, params_owned)
                    })) {
                        warn!(?panic, "notification handler panicked, swallowing");
                    }
                }
                Ok(())
            }
            Frame::Request { id, method, params } => self.handle_server_request(id, &method, params).await,
        }
    }

    async fn handle_server_request(&self, id: Value, method: &str, params: Option<Value>) -> Result<()> {
        use lsp_types::request::{ApplyWorkspaceEdit, RegisterCapability, Request, UnregisterCapability, WorkspaceConfiguration};

        match method {
            m if m == ApplyWorkspaceEdit::METHOD => {
                let collector = self.collector.lock().await.clone();
                let applied = collector.apply_edit(params.as_ref().unwrap_or(&Value::Null));
                self.send_response(id, serde_json::json!({"applied": applied})).await
            }
            m if m == WorkspaceConfiguration::METHOD => match &self.options.workspace_configuration_handler {
                Some(handler) => match handler(params.unwrap_or(Value::Null)) {
                    Some(result) => self.send_response(id, result).await,
                    None => {
                        self.send_error_response(id, JsonRpcError::method_not_found(method))
                            .await
                    }
                },
                None => {
                    self.send_error_response(id, JsonRpcError::method_not_found(method))
                        .await
                }
            },
            m if m == RegisterCapability::METHOD => {
                self.handle_register_capability(params).await?;
                self.send_response(id, Value::Null).await
            }
            m if m == UnregisterCapability::METHOD => {
                self.handle_unregister_capability(params).await;
                self.send_response(id, Value::Null).await
            }
            other => {
                self.send_error_response(id, JsonRpcError::method_not_found(other))
                    .await
            }
        }
    }

    async fn handle_register_capability(&self, params: Option<Value>) -> Result<()> {
        let Some(listener_factory) = &self.options.listener_factory else {
            return Ok(());
        };
        let Some(params) = params else { return Ok(()) };
        let registrations = params
            .get("registrations")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();

        let mut watchers = self.watchers.lock().await;
        for registration in registrations {
            let Some(method) = registration.get("method").and_then(Value::as_str) else {
                continue;
            };
            if method != "workspace/didChangeWatchedFiles" {
                continue;
            }
            let Some(id) = registration.get("id").and_then(Value::as_str) else {
                continue;
            };
            let patterns = registration
                .get("registerOptions")
                .and_then(|o| o.get("watchers"))
                .and_then(Value::as_array)
                .map(|watchers| {
                    watchers
                        .iter()
                        .filter_map(|w| w.get("globPattern").and_then(Value::as_str))
                        .map(|pattern| root_glob_pattern(&self.project_directory, pattern))
                        .collect::<Vec<_>>()
                })
                .unwrap_or_default();

            if patterns.is_empty() {
                continue;
            }
            match listener_factory.watch(&patterns) {
                Ok(watcher) => {
                    watchers_insert(&mut watchers.by_registration_id, id, watcher);
                }
                Err(e) => warn!(error = %e, registration_id = id, "failed to start watcher"),
            }
        }
        Ok(())
    }

    async fn handle_unregister_capability(&self, params: Option<Value>) {
        let Some(params) = params else { return };
        let unregistrations = params
            .get("unregisterations")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();

        let mut watchers = self.watchers.lock().await;
        for unregistration in unregistrations {
            if let Some(id) = unregistration.get("id").and_then(Value::as_str) {
                if let Some(mut watcher) = watchers.by_registration_id.remove(id) {
                    watcher.stop();
                }
            }
        }
    }
}

fn watchers_insert(map: &mut HashMap<String, Box<dyn Watcher>>, id: &str, watcher: Box<dyn Watcher>) {
    if let Some(mut old) = map.insert(id.to_string(), watcher) {
        old.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::{BoxedRead, BoxedWrite, Transport};
    use futures::future::BoxFuture;

    struct DuplexTransport {
        read: Option<BoxedRead>,
        write: Option<BoxedWrite>,
    }

    impl Transport for DuplexTransport {
        fn try_connect_blocking(&mut self) -> BoxFuture<'_, Result<()>> {
            Box::pin(async { Ok(()) })
        }

        fn connected(&self) -> bool {
            true
        }

        fn split(self: Box<Self>) -> (BoxedRead, BoxedWrite) {
            let mut this = *self;
            (this.read.take().unwrap(), this.write.take().unwrap())
        }
    }

    fn make_pair() -> (Arc<Connection>, tokio::io::DuplexStream) {
        let (client_side, server_side) = tokio::io::duplex(64 * 1024);
        let (client_read, client_write) = tokio::io::split(client_side);
        let transport = DuplexTransport {
            read: Some(Box::new(client_read)),
            write: Some(Box::new(client_write)),
        };
        let connection = Connection::new(
            PathBuf::from("/proj"),
            Box::new(transport),
            16,
            ConnectionOptions::default(),
        );
        connection.start();
        (connection, server_side)
    }

    #[tokio::test]
    async fn rejects_unsupported_server_request() {
        let (connection, mut server_side) = make_pair();
        connection
            .await_server_connection(Duration::from_secs(1))
            .await
            .unwrap();

        let incoming = br#"{"id":"1","method":"test"}"#;
        let header = format!("Content-Length: {}\r\n\r\n", incoming.len());
        use tokio::io::AsyncWriteExt;
        server_side.write_all(header.as_bytes()).await.unwrap();
        server_side.write_all(incoming).await.unwrap();

        let mut codec = LspCodec::default();
        let mut buf = bytes::BytesMut::new();
        use tokio::io::AsyncReadExt;
        let mut scratch = [0u8; 256];
        let n = server_side.read(&mut scratch).await.unwrap();
        buf.extend_from_slice(&scratch[..n]);
        let value = loop {
            if let Some(v) = tokio_util::codec::Decoder::decode(&mut codec, &mut buf).unwrap() {
                break v;
            }
            let n = server_side.read(&mut scratch).await.unwrap();
            buf.extend_from_slice(&scratch[..n]);
        };
        assert_eq!(value["error"]["code"], -32601);
        assert_eq!(value["error"]["message"], "Method not found: test");
    }

    #[tokio::test]
    async fn delivers_response_to_sent_request() {
        let (connection, mut server_side) = make_pair();
        connection
            .await_server_connection(Duration::from_secs(1))
            .await
            .unwrap();

        let pending = connection
            .send_request("initialize", Some(serde_json::json!({})))
            .await
            .unwrap();
        let id = pending.id();

        use tokio::io::{AsyncReadExt, AsyncWriteExt};
        let mut scratch = [0u8; 512];
        let _ = server_side.read(&mut scratch).await.unwrap();

        let response = serde_json::json!({"jsonrpc":"2.0","id":id,"result":{"capabilities":{}}});
        let framed = crate::codec::encode(&response);
        server_side.write_all(&framed).await.unwrap();

        let result = pending.await_response(Duration::from_secs(1)).await.unwrap();
        assert_eq!(result.id, serde_json::json!(id));
    }
}
