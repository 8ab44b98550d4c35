//! In-memory scripted fake LSP server, serving a fixed response table
//! (or raw frame access) over a `tokio::io::duplex` pipe instead of a
//! real clangd subprocess.

use clangd_client::connection::{Connection, ConnectionOptions};
use clangd_client::transport::{BoxedRead, BoxedWrite, Transport};
use futures::future::BoxFuture;
use serde_json::Value;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::codec::{FramedRead, FramedWrite};

struct DuplexTransport {
    read: Option<BoxedRead>,
    write: Option<BoxedWrite>,
}

impl Transport for DuplexTransport {
    fn try_connect_blocking(&mut self) -> BoxFuture<'_, clangd_client::Result<()>> {
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

/// Spawns a scripted fake server task on the far end of a duplex pipe
/// and returns a [`Connection`] wired to the near end, started and
/// ready. `responses` maps request method name to the JSON `result` the
/// fake server replies with.
pub async fn connection_with_fake_server(
    responses: HashMap<&'static str, Value>,
    options: ConnectionOptions,
) -> Arc<Connection> {
    let (client_side, server_side) = tokio::io::duplex(256 * 1024);
    let (client_read, client_write) = tokio::io::split(client_side);
    let transport = DuplexTransport {
        read: Some(Box::new(client_read)),
        write: Some(Box::new(client_write)),
    };

    let connection = Connection::new(PathBuf::from("/proj"), Box::new(transport), 64, options);
    connection.start();

    tokio::spawn(run_fake_server(server_side, responses));

    connection
        .await_server_connection(std::time::Duration::from_secs(1))
        .await
        .expect("fake server transport should become ready immediately");

    connection
}

/// Returns a [`Connection`] wired to one end of a duplex pipe plus raw
/// access to the other end, for tests that need to script exact bytes
/// (e.g. a server-initiated `client/registerCapability` request) rather
/// than a fixed response table.
pub async fn connection_with_raw_server(
    options: ConnectionOptions,
) -> (Arc<Connection>, FramedRead<BoxedRead, clangd_client::codec::LspCodec>, FramedWrite<BoxedWrite, clangd_client::codec::LspCodec>) {
    let (client_side, server_side) = tokio::io::duplex(256 * 1024);
    let (client_read, client_write) = tokio::io::split(client_side);
    let transport = DuplexTransport {
        read: Some(Box::new(client_read)),
        write: Some(Box::new(client_write)),
    };

    let connection = Connection::new(PathBuf::from("/proj"), Box::new(transport), 64, options);
    connection.start();

    let (server_read, server_write) = tokio::io::split(server_side);
    let framed_read = FramedRead::new(Box::new(server_read) as BoxedRead, clangd_client::codec::LspCodec::default());
    let framed_write = FramedWrite::new(Box::new(server_write) as BoxedWrite, clangd_client::codec::LspCodec::default());

    connection
        .await_server_connection(std::time::Duration::from_secs(1))
        .await
        .expect("fake server transport should become ready immediately");

    (connection, framed_read, framed_write)
}

async fn run_fake_server(stream: tokio::io::DuplexStream, responses: HashMap<&'static str, Value>) {
    let (read_half, write_half) = tokio::io::split(stream);
    let mut framed_read = FramedRead::new(read_half, clangd_client::codec::LspCodec::default());
    let mut framed_write = FramedWrite::new(write_half, clangd_client::codec::LspCodec::default());

    use futures::{SinkExt, StreamExt};
    while let Some(Ok(value)) = framed_read.next().await {
        let Some(method) = value.get("method").and_then(Value::as_str) else {
            continue;
        };
        let Some(id) = value.get("id").cloned() else {
            continue;
        };
        if let Some(result) = responses.get(method) {
            let response = serde_json::json!({"jsonrpc": "2.0", "id": id, "result": result});
            if framed_write.send(response).await.is_err() {
                break;
            }
        }
    }
}
