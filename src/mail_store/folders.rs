use log::{info, warn};
use utf7_imap::{decode_utf7_imap, encode_utf7_imap};

use crate::error::StoreError;
use crate::mail_store::MailStore;

/// A classification bucket, backed 1:1 by a destination folder.
///
/// Identity is case-insensitive: "factures" and "Factures" are the same
/// category.
#[derive(Debug, Clone)]
pub struct Category {
    name: String,
}

impl Category {
    pub fn new(name: impl Into<String>) -> Self {
        Category { name: name.into() }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn matches(&self, other: &str) -> bool {
        names_match(&self.name, other)
    }
}

impl std::fmt::Display for Category {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.name)
    }
}

/// How the category taxonomy is obtained for a run.
#[derive(Debug, Clone)]
pub enum CategorySource {
    /// Derive categories from the live folder list (the default policy).
    Folders,
    /// Use a fixed operator-supplied list, no folder introspection.
    Fixed(Vec<String>),
}

fn names_match(a: &str, b: &str) -> bool {
    a.to_lowercase() == b.to_lowercase()
}

/// Match a server-reported folder name against a wanted display name,
/// tolerating modified UTF-7 on either side (RFC 3501 §5.1.3). Some
/// servers report "Op&AOk-rations" where the operator typed "Opérations".
pub fn folder_matches(server_name: &str, wanted: &str) -> bool {
    if names_match(server_name, wanted) {
        return true;
    }
    if names_match(server_name, &encode_utf7_imap(wanted.to_string())) {
        return true;
    }
    names_match(&decode_utf7_imap(server_name.to_string()), wanted)
}

fn is_system_folder(name: &str) -> bool {
    // INBOX is the sorting source, bracket-prefixed names ([Gmail]/...)
    // are reserved server namespaces; neither is a valid destination.
    names_match(name, "INBOX") || name.starts_with('[')
}

/// Pure half of `build_categories`: filter the raw folder list down to
/// valid destinations and guarantee the fallback is present.
pub fn derive_category_names(folders: &[String], fallback: &str) -> Vec<String> {
    let mut names: Vec<String> = folders
        .iter()
        .filter(|f| !is_system_folder(f))
        .map(|f| decode_utf7_imap(f.to_string()))
        .collect();

    if !names.iter().any(|n| names_match(n, fallback)) {
        names.push(fallback.to_string());
    }
    names
}

/// Build the category set for one run.
///
/// With the `Folders` policy the set is a per-run snapshot of the live
/// folder list; a listing failure degrades to a fallback-only taxonomy so
/// the orchestrator always has at least one valid destination.
pub async fn build_categories<S: MailStore>(
    store: &mut S,
    source: &CategorySource,
    fallback: &str,
) -> Vec<Category> {
    let names = match source {
        CategorySource::Fixed(list) => {
            let mut names = list.clone();
            if !names.iter().any(|n| names_match(n, fallback)) {
                names.push(fallback.to_string());
            }
            names
        }
        CategorySource::Folders => match store.list_folders().await {
            Ok(folders) => derive_category_names(&folders, fallback),
            Err(e) => {
                warn!("folder listing failed, degrading to '{}' only: {}", fallback, e);
                vec![fallback.to_string()]
            }
        },
    };

    names.into_iter().map(Category::new).collect()
}

/// Make sure a destination folder exists and return the name to address it
/// by in protocol commands.
///
/// Existing folders are matched case-insensitively under both their raw
/// and decoded names; when nothing matches, the folder is created under
/// the modified-UTF-7 encoding of the requested name. A creation failure
/// propagates: relocating into a folder that does not exist would lose
/// mail.
pub async fn ensure_folder<S: MailStore>(store: &mut S, name: &str) -> Result<String, StoreError> {
    let folders = store.list_folders().await?;
    if let Some(existing) = folders.iter().find(|f| folder_matches(f, name)) {
        return Ok(existing.clone());
    }

    let encoded = encode_utf7_imap(name.to_string());
    store.create_folder(&encoded).await?;
    info!("created folder '{}' (stored as '{}')", name, encoded);
    Ok(encoded)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn folder_list(names: &[&str]) -> Vec<String> {
        names.iter().map(|n| n.to_string()).collect()
    }

    #[test]
    fn derive_excludes_inbox_and_system_folders() {
        let folders = folder_list(&["INBOX", "[Gmail]/All Mail", "Factures", "Clients"]);
        let names = derive_category_names(&folders, "Autre");
        assert!(!names.iter().any(|n| n.eq_ignore_ascii_case("INBOX")));
        assert!(!names.iter().any(|n| n.starts_with('[')));
        assert!(names.contains(&"Factures".to_string()));
        assert!(names.contains(&"Clients".to_string()));
    }

    #[test]
    fn derive_is_independent_of_listing_order() {
        let a = derive_category_names(&folder_list(&["Factures", "INBOX", "[Gmail]"]), "Autre");
        let b = derive_category_names(&folder_list(&["[Gmail]", "INBOX", "Factures"]), "Autre");
        assert_eq!(a, b);
    }

    #[test]
    fn derive_appends_fallback_once() {
        let names = derive_category_names(&folder_list(&["INBOX", "Factures"]), "Autre");
        assert_eq!(names.iter().filter(|n| *n == "Autre").count(), 1);

        let names = derive_category_names(&folder_list(&["INBOX", "autre"]), "Autre");
        assert_eq!(names.iter().filter(|n| n.eq_ignore_ascii_case("autre")).count(), 1);
    }

    #[test]
    fn derive_decodes_utf7_names_for_display() {
        let encoded = encode_utf7_imap("Opérations".to_string());
        let names = derive_category_names(&folder_list(&["INBOX", &encoded]), "Autre");
        assert!(names.contains(&"Opérations".to_string()));
    }

    #[test]
    fn folder_matching_is_case_insensitive() {
        assert!(folder_matches("Factures", "factures"));
        assert!(!folder_matches("Factures", "Clients"));
    }

    #[test]
    fn folder_matching_tolerates_utf7_on_either_side() {
        let encoded = encode_utf7_imap("Reçus".to_string());
        assert!(folder_matches(&encoded, "Reçus"));
        assert!(folder_matches("Reçus", "Reçus"));
        // The decoded server name also matches the decoded request.
        assert!(folder_matches(&encoded, &"Reçus".to_lowercase()));
    }

    #[test]
    fn category_identity_is_case_insensitive() {
        let cat = Category::new("Factures");
        assert!(cat.matches("FACTURES"));
        assert!(!cat.matches("Autre"));
    }
}
