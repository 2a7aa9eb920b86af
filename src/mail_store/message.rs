use anyhow::{bail, Result};
use chrono::{DateTime, Utc};
use mailparse::{parse_mail, MailHeaderMap};

use crate::mail_store::RawMessage;

/// One mail item under consideration by the sorter.
///
/// `seq` is only valid within the fetch session that produced it; `uid` is
/// the stable identifier and the only safe key for later relocation. A
/// message without a UID must be skipped by the reconciler, never moved.
#[derive(Debug, Clone)]
pub struct MailMessage {
    pub seq: u32,
    pub uid: Option<u32>,
    pub from: String,
    pub to: Option<String>,
    pub subject: String,
    pub date: Option<DateTime<Utc>>,
    pub body: Option<String>,
    /// Folder the message was fetched from.
    pub folder: String,
    /// Set by the classifier gateway; one of the known categories or the
    /// fallback, never an arbitrary string.
    pub category: Option<String>,
}

impl Default for MailMessage {
    fn default() -> Self {
        MailMessage {
            seq: 0,
            uid: None,
            from: String::new(),
            to: None,
            subject: String::new(),
            date: None,
            body: None,
            folder: "INBOX".to_string(),
            category: None,
        }
    }
}

// Depth-first search for the first text part, preferring text/plain over
// other text subtypes (an HTML-only message still yields its HTML source).
fn extract_text_content(parsed_mail: &mailparse::ParsedMail) -> Result<Option<String>> {
    fn find_part(part: &mailparse::ParsedMail, subtype: &str) -> Result<Option<String>> {
        let content_type = part
            .headers
            .get_first_value("Content-Type")
            .unwrap_or_else(|| "text/plain".to_string());

        if content_type
            .to_ascii_lowercase()
            .starts_with(subtype)
        {
            return Ok(Some(part.get_body()?.to_string()));
        }

        for subpart in &part.subparts {
            if let Some(text) = find_part(subpart, subtype)? {
                return Ok(Some(text));
            }
        }

        Ok(None)
    }

    if let Some(plain) = find_part(parsed_mail, "text/plain")? {
        return Ok(Some(plain));
    }
    find_part(parsed_mail, "text/")
}

fn parse_date(raw: &str) -> Option<DateTime<Utc>> {
    let epoch = mailparse::dateparse(raw).ok()?;
    DateTime::from_timestamp(epoch, 0)
}

/// Build a typed message record from a raw fetch response.
///
/// The UID comes from the fetch attributes, not from the MIME content, so
/// it survives even when header parsing is incomplete. A message with no
/// `From` header cannot be classified meaningfully and is rejected.
pub fn parse_message(raw: &RawMessage, folder: &str) -> Result<MailMessage> {
    let parsed_mail = parse_mail(&raw.body)?;

    let from = parsed_mail.headers.get_first_value("From");
    let to = parsed_mail.headers.get_first_value("To");
    let subject = parsed_mail.headers.get_first_value("Subject");
    let date = parsed_mail
        .headers
        .get_first_value("Date")
        .and_then(|d| parse_date(&d));

    let body = extract_text_content(&parsed_mail)?;

    let Some(from) = from else {
        bail!("message {} has no From header", raw.seq);
    };

    Ok(MailMessage {
        seq: raw.seq,
        uid: raw.uid,
        from,
        to,
        subject: subject.unwrap_or_default(),
        date,
        body,
        folder: folder.to_string(),
        category: None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Datelike;

    fn raw(body: &str) -> RawMessage {
        RawMessage {
            seq: 1,
            uid: Some(101),
            body: body.replace('\n', "\r\n").into_bytes(),
        }
    }

    #[test]
    fn parses_plain_message() {
        let msg = parse_message(
            &raw("From: client@example.fr\nTo: compta@example.fr\nSubject: Facture 2024-17\nDate: Mon, 10 Mar 2025 09:30:00 +0100\n\nVeuillez trouver la facture ci-jointe.\n"),
            "INBOX",
        )
        .unwrap();

        assert_eq!(msg.from, "client@example.fr");
        assert_eq!(msg.subject, "Facture 2024-17");
        assert_eq!(msg.uid, Some(101));
        assert_eq!(msg.folder, "INBOX");
        assert_eq!(msg.date.unwrap().year(), 2025);
        assert!(msg.body.unwrap().contains("facture"));
        assert!(msg.category.is_none());
    }

    #[test]
    fn prefers_plain_text_over_html() {
        let msg = parse_message(
            &raw(concat!(
                "From: a@b.fr\n",
                "Subject: multipart\n",
                "MIME-Version: 1.0\n",
                "Content-Type: multipart/alternative; boundary=\"sep\"\n",
                "\n",
                "--sep\n",
                "Content-Type: text/html\n",
                "\n",
                "<p>riche</p>\n",
                "--sep\n",
                "Content-Type: text/plain\n",
                "\n",
                "texte brut\n",
                "--sep--\n",
            )),
            "INBOX",
        )
        .unwrap();

        assert!(msg.body.unwrap().contains("texte brut"));
    }

    #[test]
    fn rejects_message_without_from() {
        let result = parse_message(&raw("Subject: anonyme\n\ncorps\n"), "INBOX");
        assert!(result.is_err());
    }

    #[test]
    fn missing_subject_and_date_are_tolerated() {
        let msg = parse_message(&raw("From: a@b.fr\n\ncorps\n"), "INBOX").unwrap();
        assert_eq!(msg.subject, "");
        assert!(msg.date.is_none());
    }
}
