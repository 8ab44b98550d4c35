//! Injectable logging handle.
//!
//! Components hold a [`Logger`] instead of reaching for a bare global
//! `tracing` span, so log lines from one connection can be told apart
//! from another's in a process hosting more than one. A process can
//! still install one default before constructing anything and get a
//! "set once, used everywhere" span for the common single-connection case.

use std::sync::OnceLock;
use tracing::Span;

static DEFAULT_SPAN: OnceLock<Span> = OnceLock::new();

/// Thin wrapper over a [`tracing::Span`] that every logging call in this
/// crate is entered under, so log lines from one connection can be told
/// apart from another's in a process hosting more than one.
#[derive(Debug, Clone)]
pub struct Logger {
    span: Span,
}

impl Logger {
    pub fn new(span: Span) -> Self {
        Self { span }
    }

    /// Installs the process-wide default span. Idempotent: later calls
    /// after the first are no-ops, matching the "set once" ergonomic.
    pub fn install_default(span: Span) {
        let _ = DEFAULT_SPAN.set(span);
    }

    pub fn span(&self) -> &Span {
        &self.span
    }

    pub fn enter(&self) -> tracing::span::Entered<'_> {
        self.span.enter()
    }
}

impl Default for Logger {
    fn default() -> Self {
        let span = DEFAULT_SPAN
            .get_or_init(|| tracing::info_span!("clangd_client"))
            .clone();
        Self { span }
    }
}
