use thiserror::Error;

/// Errors raised by the mail store protocol surface.
///
/// Each variant maps to one protocol operation so callers can apply the
/// right recovery policy: connection problems are fatal to a run, folder
/// listing degrades to the fallback taxonomy, per-folder and per-category
/// failures are skipped.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("could not establish the mail session: {0}")]
    Connect(String),

    #[error("the mail session is not connected")]
    NotConnected,

    #[error("could not list mailbox folders: {0}")]
    FolderList(String),

    #[error("could not open folder '{folder}': {reason}")]
    Select { folder: String, reason: String },

    #[error("search failed in folder '{folder}': {reason}")]
    Search { folder: String, reason: String },

    #[error("fetch failed: {0}")]
    Fetch(String),

    #[error("could not store flags {flags}: {reason}")]
    Flags { flags: String, reason: String },

    #[error("could not copy messages to '{dest}': {reason}")]
    Copy { dest: String, reason: String },

    #[error("expunge failed: {0}")]
    Expunge(String),

    #[error("could not create folder '{folder}': {reason}")]
    CreateFolder { folder: String, reason: String },
}

/// Errors from the external text-classification capability.
///
/// These never escape the classifier gateway: any of them resolves to the
/// fallback category.
#[derive(Debug, Error)]
pub enum ClassifyError {
    #[error("classifier request failed: {0}")]
    Request(String),

    #[error("classifier returned HTTP {code}: {body}")]
    Status { code: u16, body: String },

    #[error("classifier returned an empty answer")]
    EmptyAnswer,
}

/// Errors surfaced by a whole sorting run.
#[derive(Debug, Error)]
pub enum SortError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("all {0} category batches failed to relocate")]
    AllCategoriesFailed(usize),
}
