use std::time::Duration;

use futures::future::join_all;
use log::{debug, warn};

use crate::error::ClassifyError;
use crate::mail_store::folders::Category;
use crate::mail_store::message::MailMessage;

pub mod llm;

/// External text-classification capability.
///
/// The answer is untrusted free text; `resolve_category` validates it
/// against the allowed set before it reaches any message.
#[allow(async_fn_in_trait)]
pub trait Classifier {
    async fn classify(&self, prompt: &str) -> Result<String, ClassifyError>;
}

/// Bounded excerpt of a message body, cut at a char boundary. Full bodies
/// are never sent: they cost tokens and do not improve label quality.
pub fn excerpt(body: &str, max_chars: usize) -> String {
    body.chars().take(max_chars).collect()
}

/// Assemble the classification request for one message.
pub fn build_prompt(message: &MailMessage, categories: &[Category], max_chars: usize) -> String {
    let labels = categories
        .iter()
        .map(Category::name)
        .collect::<Vec<_>>()
        .join(", ");
    let body = message.body.as_deref().unwrap_or("");

    format!(
        "Classify this email into exactly one of the following folders: {labels}.\n\
         Answer with the folder name only.\n\n\
         From: {}\nSubject: {}\n\n{}",
        message.from,
        message.subject,
        excerpt(body, max_chars),
    )
}

/// Map a classifier answer back onto the known category set.
///
/// Case-insensitive exact match after trimming; anything else resolves to
/// the fallback so an unusable answer still lands somewhere sortable.
pub fn resolve_category(answer: &str, categories: &[Category], fallback: &str) -> String {
    let trimmed = answer.trim().trim_matches('"');
    categories
        .iter()
        .find(|c| c.matches(trimmed))
        .map(|c| c.name().to_string())
        .unwrap_or_else(|| fallback.to_string())
}

/// Classify one message. Never fails: a classifier error or an unknown
/// label both degrade to the fallback category.
pub async fn assign_category<C: Classifier>(
    classifier: &C,
    message: &MailMessage,
    categories: &[Category],
    fallback: &str,
    max_chars: usize,
) -> String {
    let prompt = build_prompt(message, categories, max_chars);
    match classifier.classify(&prompt).await {
        Ok(answer) => {
            let category = resolve_category(&answer, categories, fallback);
            debug!(
                "classified '{}' as '{}' (answer was '{}')",
                message.subject,
                category,
                answer.trim()
            );
            category
        }
        Err(e) => {
            warn!(
                "classification failed for '{}', falling back to '{}': {}",
                message.subject, fallback, e
            );
            fallback.to_string()
        }
    }
}

/// Classify a batch of messages in place.
///
/// Classification calls are stateless HTTP requests and do not touch the
/// mail session, so they may run `concurrency` at a time, with a pause
/// between chunks to stay polite towards the provider.
pub async fn classify_batch<C: Classifier>(
    classifier: &C,
    messages: &mut [MailMessage],
    categories: &[Category],
    fallback: &str,
    max_chars: usize,
    concurrency: usize,
    delay: Duration,
) {
    let chunk_size = concurrency.max(1);
    let total = messages.len();
    let mut done = 0;

    for chunk in messages.chunks_mut(chunk_size) {
        let labels = join_all(
            chunk
                .iter()
                .map(|m| assign_category(classifier, m, categories, fallback, max_chars)),
        )
        .await;

        for (message, label) in chunk.iter_mut().zip(labels) {
            message.category = Some(label);
        }

        done += chunk.len();
        if done < total && !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Scripted(Result<&'static str, ()>);

    impl Classifier for Scripted {
        async fn classify(&self, _prompt: &str) -> Result<String, ClassifyError> {
            match self.0 {
                Ok(answer) => Ok(answer.to_string()),
                Err(()) => Err(ClassifyError::Request("provider down".into())),
            }
        }
    }

    fn categories() -> Vec<Category> {
        vec![Category::new("Factures"), Category::new("Clients")]
    }

    #[test]
    fn resolve_matches_case_insensitively() {
        assert_eq!(resolve_category("factures", &categories(), "Autre"), "Factures");
        assert_eq!(resolve_category("  FACTURES \n", &categories(), "Autre"), "Factures");
    }

    #[test]
    fn resolve_falls_back_on_unknown_label() {
        assert_eq!(resolve_category("Spam", &categories(), "Autre"), "Autre");
        assert_eq!(resolve_category("", &categories(), "Autre"), "Autre");
    }

    #[test]
    fn excerpt_cuts_on_char_boundaries() {
        assert_eq!(excerpt("héllo wörld", 5), "héllo");
        assert_eq!(excerpt("ab", 10), "ab");
    }

    #[test]
    fn prompt_lists_all_labels() {
        let message = MailMessage {
            from: "client@example.fr".into(),
            subject: "Facture".into(),
            body: Some("corps".into()),
            ..Default::default()
        };
        let prompt = build_prompt(&message, &categories(), 1500);
        assert!(prompt.contains("Factures, Clients"));
        assert!(prompt.contains("client@example.fr"));
    }

    #[tokio::test]
    async fn failed_call_assigns_fallback() {
        let message = MailMessage::default();
        let label = assign_category(&Scripted(Err(())), &message, &categories(), "Autre", 1500).await;
        assert_eq!(label, "Autre");
    }

    #[tokio::test]
    async fn unknown_answer_assigns_fallback() {
        let message = MailMessage::default();
        let label =
            assign_category(&Scripted(Ok("Lottery")), &message, &categories(), "Autre", 1500).await;
        assert_eq!(label, "Autre");
    }

    #[tokio::test]
    async fn batch_assigns_every_message() {
        let mut messages = vec![MailMessage::default(), MailMessage::default(), MailMessage::default()];
        classify_batch(
            &Scripted(Ok("Clients")),
            &mut messages,
            &categories(),
            "Autre",
            1500,
            2,
            Duration::ZERO,
        )
        .await;
        assert!(messages.iter().all(|m| m.category.as_deref() == Some("Clients")));
    }
}
