use std::collections::HashSet;

use chrono::NaiveDate;
use log::{debug, warn};

use crate::error::StoreError;
use crate::mail_store::message::{parse_message, MailMessage};
use crate::mail_store::{Clock, MailStore};

/// Server-side and client-side selection for one fetch.
#[derive(Debug, Clone, Default)]
pub struct FetchFilter {
    pub only_unread: bool,
    /// Day-granularity lower bound, sent to the server as `SINCE`.
    pub since: Option<NaiveDate>,
    /// Exact-day constraint applied client-side after fetching. A server
    /// `SINCE <day>` still returns yesterday's late-evening mail; only the
    /// exact date comparison keeps the "today" view honest.
    pub same_day: Option<NaiveDate>,
    /// Cap applied to the search identifiers before bodies are fetched,
    /// so discarded messages are never downloaded or parsed.
    pub limit: Option<usize>,
}

impl FetchFilter {
    pub fn unread() -> Self {
        FetchFilter {
            only_unread: true,
            ..Default::default()
        }
    }

    pub fn all() -> Self {
        FetchFilter::default()
    }

    /// Restrict to messages received today, by the supplied clock.
    pub fn today<K: Clock>(mut self, clock: &K) -> Self {
        let day = clock.now().date_naive();
        self.since = Some(day);
        self.same_day = Some(day);
        self
    }

    pub fn with_limit(mut self, limit: Option<usize>) -> Self {
        self.limit = limit;
        self
    }
}

/// Build the IMAP SEARCH criteria string for a filter.
pub fn search_criteria(filter: &FetchFilter) -> String {
    let mut parts = vec![if filter.only_unread { "UNSEEN" } else { "ALL" }.to_string()];
    if let Some(day) = filter.since {
        parts.push(format!("SINCE {}", day.format("%d-%b-%Y")));
    }
    parts.join(" ")
}

// Exact-day comparison, both sides truncated to their calendar date in
// UTC. Messages with no parseable date cannot be proven to be from `day`
// and are excluded.
fn on_day(message: &MailMessage, day: NaiveDate) -> bool {
    message.date.map(|d| d.date_naive() == day).unwrap_or(false)
}

/// Fetch and parse the messages of one folder matching the filter.
///
/// The folder is opened read-write because relocation usually follows.
/// Zero search hits is a normal terminal state, not an error; per-message
/// parse failures are logged with their sequence number and skipped.
pub async fn fetch_folder<S: MailStore>(
    store: &mut S,
    folder: &str,
    filter: &FetchFilter,
) -> Result<Vec<MailMessage>, StoreError> {
    store.select(folder, false).await?;

    let mut seqs = store.search(&search_criteria(filter)).await?;
    if seqs.is_empty() {
        debug!("no matching mail in '{}'", folder);
        return Ok(Vec::new());
    }
    if let Some(limit) = filter.limit {
        seqs.truncate(limit);
    }

    let raw = store.fetch(&seqs).await?;

    let mut messages = Vec::with_capacity(raw.len());
    for response in &raw {
        match parse_message(response, folder) {
            Ok(message) => messages.push(message),
            Err(e) => warn!(
                "skipping unparseable message {} in '{}': {}",
                response.seq, folder, e
            ),
        }
    }

    if let Some(day) = filter.same_day {
        messages.retain(|m| on_day(m, day));
    }

    debug!("fetched {} messages from '{}'", messages.len(), folder);
    Ok(messages)
}

/// Fetch across many folders, skipping any folder that fails to open or
/// search. Mailbox folder sets are heterogeneous (non-selectable or
/// permission-restricted folders are common), so one bad folder must not
/// abort the whole sweep. Results are deduplicated by (folder, UID).
pub async fn fetch_all_folders<S: MailStore>(
    store: &mut S,
    folders: &[String],
    filter: &FetchFilter,
) -> Vec<MailMessage> {
    let mut all = Vec::new();
    let mut seen: HashSet<(String, u32)> = HashSet::new();

    for folder in folders {
        match fetch_folder(store, folder, filter).await {
            Ok(messages) => {
                for message in messages {
                    match message.uid {
                        Some(uid) => {
                            if seen.insert((folder.clone(), uid)) {
                                all.push(message);
                            }
                        }
                        // UID-less messages cannot be deduplicated; keep
                        // them, the reconciler will skip them anyway.
                        None => all.push(message),
                    }
                }
            }
            Err(e) => warn!("skipping folder '{}': {}", folder, e),
        }
    }
    all
}
