//! Per-file state machine.
//!
//! Tracks, per file path, a monotonic version counter and a SHA-1
//! checksum of last-sent contents, so repeated editor ticks for
//! unchanged content become no-ops instead of redundant
//! `textDocument/didChange` notifications.

use sha1::{Digest, Sha1};
use std::collections::HashMap;

pub type Checksum = [u8; 20];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileLifecycle {
    Open,
    Closed,
}

/// The action the caller must translate into an LSP notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileAction {
    OpenFile,
    ChangeFile,
    CloseFile,
    NoAction,
}

#[derive(Debug, Clone)]
pub struct ServerFileState {
    pub version: i64,
    pub state: FileLifecycle,
    pub checksum: Option<Checksum>,
    pub contents: Vec<u8>,
}

impl Default for ServerFileState {
    fn default() -> Self {
        Self {
            version: 0,
            state: FileLifecycle::Closed,
            checksum: None,
            contents: Vec::new(),
        }
    }
}

fn checksum_of(contents: &[u8]) -> Checksum {
    let mut hasher = Sha1::new();
    hasher.update(contents);
    hasher.finalize().into()
}

impl ServerFileState {
    /// A buffer edit the host considers "dirty" (unsaved content changed).
    ///
    /// - Closed: resets `version` to 0, then opens at version 1.
    /// - Open, same checksum: no-op.
    /// - Open, different checksum: bumps version, emits `ChangeFile`.
    pub fn dirty_file(&mut self, contents: impl Into<Vec<u8>>) -> FileAction {
        let contents = contents.into();
        let checksum = checksum_of(&contents);

        match self.state {
            FileLifecycle::Closed => {
                self.version = 0;
                self.version += 1;
                self.state = FileLifecycle::Open;
                self.checksum = Some(checksum);
                self.contents = contents;
                FileAction::OpenFile
            }
            FileLifecycle::Open => {
                if self.checksum == Some(checksum) {
                    FileAction::NoAction
                } else {
                    self.version += 1;
                    self.checksum = Some(checksum);
                    self.contents = contents;
                    FileAction::ChangeFile
                }
            }
        }
    }

    /// An on-disk save. Emits `ChangeFile` (not `CloseFile`) when the
    /// checksum moved. Closing and reopening would drop the server's
    /// version history for the buffer and force it to re-parse from
    /// scratch, for no benefit: the buffer was never closed, it just
    /// has bytes on disk that differ from what the server last saw.
    pub fn saved_file(&mut self, contents: impl Into<Vec<u8>>) -> FileAction {
        match self.state {
            FileLifecycle::Closed => FileAction::NoAction,
            FileLifecycle::Open => {
                let contents = contents.into();
                let checksum = checksum_of(&contents);
                if self.checksum == Some(checksum) {
                    FileAction::NoAction
                } else {
                    self.version += 1;
                    self.checksum = Some(checksum);
                    self.contents = contents;
                    FileAction::ChangeFile
                }
            }
        }
    }

    /// The host closed the buffer.
    pub fn file_close(&mut self) -> FileAction {
        match self.state {
            FileLifecycle::Open => {
                self.state = FileLifecycle::Closed;
                FileAction::CloseFile
            }
            FileLifecycle::Closed => FileAction::NoAction,
        }
    }
}

/// Filename → [`ServerFileState`], auto-creating on lookup via an
/// explicit `entry().or_insert_with()` rather than a magic-default
/// container.
#[derive(Debug, Default)]
pub struct ServerFileStateStore {
    files: HashMap<String, ServerFileState>,
}

impl ServerFileStateStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get_or_insert(&mut self, filename: &str) -> &mut ServerFileState {
        self.files.entry(filename.to_string()).or_default()
    }

    pub fn get(&self, filename: &str) -> Option<&ServerFileState> {
        self.files.get(filename)
    }

    /// Removes a tracked file. Only lifecycle logic (e.g. a purge pass
    /// for files that disappeared from the workspace) may call this.
    pub fn remove(&mut self, filename: &str) -> Option<ServerFileState> {
        self.files.remove(filename)
    }

    pub fn filenames(&self) -> impl Iterator<Item = &str> {
        self.files.keys().map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn end_to_end_scenario_5() {
        let mut state = ServerFileState::default();

        assert_eq!(state.dirty_file("test contents"), FileAction::OpenFile);
        assert_eq!(state.version, 1);

        assert_eq!(state.dirty_file("test contents"), FileAction::NoAction);
        assert_eq!(state.version, 1);

        assert_eq!(
            state.dirty_file("test contents changed"),
            FileAction::ChangeFile
        );
        assert_eq!(state.version, 2);

        assert_eq!(state.file_close(), FileAction::CloseFile);
        assert_eq!(state.state, FileLifecycle::Closed);
        assert_eq!(state.version, 2);

        assert_eq!(state.dirty_file("anything"), FileAction::OpenFile);
        assert_eq!(state.version, 1);
    }

    #[test]
    fn file_close_on_closed_is_noop() {
        let mut state = ServerFileState::default();
        assert_eq!(state.file_close(), FileAction::NoAction);
    }

    #[test]
    fn saved_file_noop_when_closed() {
        let mut state = ServerFileState::default();
        assert_eq!(state.saved_file("x"), FileAction::NoAction);
        assert_eq!(state.version, 0);
    }

    #[test]
    fn saved_file_noop_when_checksum_unchanged() {
        let mut state = ServerFileState::default();
        state.dirty_file("same");
        assert_eq!(state.saved_file("same"), FileAction::NoAction);
        assert_eq!(state.version, 1);
    }

    #[test]
    fn saved_file_changed_emits_change_file() {
        let mut state = ServerFileState::default();
        state.dirty_file("a");
        assert_eq!(state.saved_file("b"), FileAction::ChangeFile);
        assert_eq!(state.version, 2);
        assert_eq!(state.state, FileLifecycle::Open);
    }

    #[test]
    fn store_auto_creates_closed_entries() {
        let mut store = ServerFileStateStore::new();
        let entry = store.get_or_insert("/a.cpp");
        assert_eq!(entry.state, FileLifecycle::Closed);
        assert!(store.get("/a.cpp").is_some());
    }
}
