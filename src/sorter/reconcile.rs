use std::collections::BTreeMap;

use log::{debug, info, warn};

use crate::error::StoreError;
use crate::mail_store::folders::{ensure_folder, folder_matches, Category};
use crate::mail_store::message::MailMessage;
use crate::mail_store::{MailStore, SessionState};

/// Physically relocate one category's batch into its folder.
///
/// Per source folder, the protocol sequence is strict: select read-write,
/// mark `\Seen`, copy to the destination, mark `\Deleted`, expunge. The
/// expunge is the only irreversible step and is unreachable unless the
/// copy was acknowledged: a copy failure aborts the batch with the
/// messages still intact in their source folder.
///
/// Returns the number of messages relocated. Messages without a UID are
/// skipped up front: a UID is only assigned by a fresh fetch and is the
/// only safe key for mutation.
pub async fn move_batch<S: MailStore>(
    store: &mut S,
    category: &Category,
    messages: &[MailMessage],
) -> Result<usize, StoreError> {
    // Group valid UIDs by source folder; BTreeMap keeps the order stable.
    let mut by_folder: BTreeMap<String, Vec<u32>> = BTreeMap::new();
    for message in messages {
        let Some(uid) = message.uid else {
            warn!(
                "skipping '{}' (seq {} in '{}'): no UID, unsafe to relocate",
                message.subject, message.seq, message.folder
            );
            continue;
        };
        if folder_matches(&message.folder, category.name()) {
            debug!(
                "'{}' is already in '{}', nothing to move",
                message.subject, message.folder
            );
            continue;
        }
        by_folder.entry(message.folder.clone()).or_default().push(uid);
    }

    if by_folder.is_empty() {
        return Ok(0);
    }

    // Classification of a large batch can outlast the server's idle
    // timeout; the session may have silently gone away since the fetch.
    if store.state() != SessionState::Ready {
        info!("session no longer ready, reconnecting before reconciliation");
        store.connect().await?;
    }

    let dest = ensure_folder(store, category.name()).await?;

    let mut moved = 0;
    for (folder, uids) in by_folder {
        store.select(&folder, false).await?;
        store.add_flags(&uids, "\\Seen").await?;
        store.uid_copy(&uids, &dest).await?;
        store.add_flags(&uids, "\\Deleted").await?;
        store.expunge().await?;

        info!("moved {} messages from '{}' to '{}'", uids.len(), folder, dest);
        moved += uids.len();
    }

    Ok(moved)
}
