use chrono::{DateTime, Utc};

use crate::error::StoreError;

pub mod fetch;
pub mod folders;
pub mod imap;
pub mod message;

/// Lifecycle of the single stateful mail connection.
///
/// Only one folder can be selected at a time; opening another folder
/// implicitly closes the previous context. The session is owned by one
/// sorting run and never shared across concurrent runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Disconnected,
    Connecting,
    Ready,
    Ended,
}

/// One raw protocol fetch response: the ephemeral sequence number, the
/// stable UID (when the server reported one) and the full RFC822 bytes.
#[derive(Debug, Clone)]
pub struct RawMessage {
    pub seq: u32,
    pub uid: Option<u32>,
    pub body: Vec<u8>,
}

/// The narrow mail-store surface the sorting engine depends on.
///
/// Implemented over a live IMAP session in production and by an in-memory
/// fake in tests. All methods are protocol suspension points and must be
/// awaited fully before the next command is issued on the same session.
#[allow(async_fn_in_trait)]
pub trait MailStore {
    /// Establish and authenticate the session. Fatal to the calling
    /// operation on failure.
    async fn connect(&mut self) -> Result<(), StoreError>;

    /// Idempotent teardown. Never fails: faults while closing are logged
    /// and swallowed so callers can always finish their cleanup.
    async fn disconnect(&mut self);

    fn state(&self) -> SessionState;

    async fn list_folders(&mut self) -> Result<Vec<String>, StoreError>;

    /// Open a folder, read-only or read-write.
    async fn select(&mut self, folder: &str, read_only: bool) -> Result<(), StoreError>;

    /// Server-side search in the currently open folder. Returns sequence
    /// numbers in ascending order; an empty result is not an error.
    async fn search(&mut self, criteria: &str) -> Result<Vec<u32>, StoreError>;

    /// Fetch full bodies plus UID attributes for the given sequence numbers.
    async fn fetch(&mut self, seqs: &[u32]) -> Result<Vec<RawMessage>, StoreError>;

    /// Add flags (e.g. `\Seen`, `\Deleted`) to the given UIDs.
    async fn add_flags(&mut self, uids: &[u32], flags: &str) -> Result<(), StoreError>;

    /// Copy the given UIDs into another folder.
    async fn uid_copy(&mut self, uids: &[u32], dest: &str) -> Result<(), StoreError>;

    /// Permanently remove messages flagged `\Deleted` in the open folder.
    async fn expunge(&mut self) -> Result<(), StoreError>;

    async fn create_folder(&mut self, name: &str) -> Result<(), StoreError>;
}

/// Render ids as an IMAP sequence set ("4,7,12").
pub fn sequence_set(ids: &[u32]) -> String {
    ids.iter().map(|id| id.to_string()).collect::<Vec<_>>().join(",")
}

/// Time provider, so date-based filters can be pinned in tests.
pub trait Clock {
    fn now(&self) -> DateTime<Utc>;
}

/// System clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct RealClock;

impl Clock for RealClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}
