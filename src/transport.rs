//! Injected transport capability.
//!
//! `Transport` is the seam between the connection engine and however
//! bytes actually move: a piped child process's stdio by default, or
//! anything else a caller wants to substitute (tests use an in-memory
//! duplex). Methods return `futures::future::BoxFuture` rather than
//! using `async fn` in the trait so `Box<dyn Transport>` stays
//! object-safe.

use crate::error::Result;
use futures::future::BoxFuture;
use tokio::io::{AsyncRead, AsyncWrite};

/// Either half of a transport, boxed so different implementations (a
/// real child's piped stdio, an in-memory duplex pipe for tests) can be
/// used interchangeably behind `Framed`.
pub type BoxedRead = Box<dyn AsyncRead + Unpin + Send>;
pub type BoxedWrite = Box<dyn AsyncWrite + Unpin + Send>;

pub trait Transport: Send {
    /// For stdio this is trivially ready; future transports (e.g. a
    /// handshake-requiring one) would block here until ready or time out.
    fn try_connect_blocking(&mut self) -> BoxFuture<'_, Result<()>>;

    fn connected(&self) -> bool;

    /// Splits the transport into independent read/write halves so the
    /// reader task and writer can be driven concurrently without sharing
    /// a lock over the underlying stream.
    fn split(self: Box<Self>) -> (BoxedRead, BoxedWrite);
}

/// Stdio transport over a spawned child's piped stdin/stdout.
pub struct StdioTransport {
    stdin: Option<tokio::process::ChildStdin>,
    stdout: Option<tokio::process::ChildStdout>,
}

impl StdioTransport {
    pub fn new(stdin: tokio::process::ChildStdin, stdout: tokio::process::ChildStdout) -> Self {
        Self {
            stdin: Some(stdin),
            stdout: Some(stdout),
        }
    }
}

impl Transport for StdioTransport {
    fn try_connect_blocking(&mut self) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move { Ok(()) })
    }

    fn connected(&self) -> bool {
        self.stdin.is_some() || self.stdout.is_some()
    }

    fn split(self: Box<Self>) -> (BoxedRead, BoxedWrite) {
        let mut this = *self;
        let stdout = this.stdout.take().expect("stdout already taken");
        let stdin = this.stdin.take().expect("stdin already taken");
        (Box::new(stdout), Box::new(stdin))
    }
}
