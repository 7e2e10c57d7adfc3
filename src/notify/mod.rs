//! Outbound member notifications.
//!
//! Messages are rendered as RFC 822 text, encoded URL-safe base64 and posted
//! to an HTTP mail relay as `{"raw": "..."}` (the Gmail `users.messages.send`
//! shape). Recipients travel in `Bcc` so members never see each other's
//! addresses.

use std::time::Duration;

use async_trait::async_trait;
use base64::Engine as _;
use base64::engine::general_purpose::URL_SAFE as BASE64_URL_SAFE;
use reqwest::StatusCode;
use serde::Serialize;
use tracing::debug;

use crate::config::MailConfig;

pub const MAX_RECIPIENTS_PER_MESSAGE: usize = 500;
const MAX_SUBJECT_LEN: usize = 998;

#[derive(Debug, thiserror::Error)]
pub enum MailError {
    #[error("message has no valid recipients")]
    NoRecipients,
    #[error("too many recipients: {count} exceeds {limit}")]
    TooManyRecipients { count: usize, limit: usize },
    #[error("invalid {field} header: {value}")]
    InvalidHeader { field: &'static str, value: String },
    #[error("mail relay request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("mail relay rejected message with status {status}: {body}")]
    Rejected { status: StatusCode, body: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutgoingMail {
    pub recipients: Vec<String>,
    pub subject: String,
    pub body: String,
}

impl OutgoingMail {
    pub fn new(recipients: Vec<String>, subject: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            recipients,
            subject: subject.into(),
            body: body.into(),
        }
    }
}

/// Delivery seam for notifications. No retry contract is implied.
#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send(&self, mail: &OutgoingMail) -> Result<(), MailError>;
}

#[derive(Clone)]
pub struct MailRelayClient {
    http: reqwest::Client,
    relay_url: String,
    api_token: Option<String>,
    sender: String,
    timeout: Duration,
}

impl MailRelayClient {
    pub fn new(config: &MailConfig) -> Result<Self, MailError> {
        let timeout = config.request_timeout();
        let sender = config.default_sender.trim().to_string();
        validate_header_value("From", &sender)?;

        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            http,
            relay_url: config.relay_url.clone(),
            api_token: config
                .api_token
                .as_ref()
                .map(|token| token.trim().to_string())
                .filter(|token| !token.is_empty()),
            sender,
            timeout,
        })
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }
}

#[derive(Debug, Serialize)]
struct RelayPayload<'a> {
    raw: &'a str,
}

#[async_trait]
impl Mailer for MailRelayClient {
    async fn send(&self, mail: &OutgoingMail) -> Result<(), MailError> {
        let raw = encode_raw_message(&self.sender, mail)?;
        let mut request = self
            .http
            .post(&self.relay_url)
            .json(&RelayPayload { raw: &raw });
        if let Some(token) = &self.api_token {
            request = request.bearer_auth(token);
        }

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(MailError::Rejected {
                status,
                body: truncate(&body, 512),
            });
        }

        debug!(
            recipients = mail.recipients.len(),
            subject = %mail.subject,
            "Mail relay accepted message"
        );
        Ok(())
    }
}

pub fn encode_raw_message(sender: &str, mail: &OutgoingMail) -> Result<String, MailError> {
    let rendered = render_rfc822(sender, mail)?;
    Ok(BASE64_URL_SAFE.encode(rendered.as_bytes()))
}

pub fn render_rfc822(sender: &str, mail: &OutgoingMail) -> Result<String, MailError> {
    validate_header_value("From", sender)?;
    validate_header_value("Subject", &mail.subject)?;
    if mail.subject.len() > MAX_SUBJECT_LEN {
        return Err(MailError::InvalidHeader {
            field: "Subject",
            value: truncate(&mail.subject, 64),
        });
    }

    let recipients = normalize_recipients(&mail.recipients);
    if recipients.is_empty() {
        return Err(MailError::NoRecipients);
    }
    if recipients.len() > MAX_RECIPIENTS_PER_MESSAGE {
        return Err(MailError::TooManyRecipients {
            count: recipients.len(),
            limit: MAX_RECIPIENTS_PER_MESSAGE,
        });
    }
    for recipient in &recipients {
        validate_header_value("Bcc", recipient)?;
    }

    let body = mail.body.replace("\r\n", "\n").replace('\n', "\r\n");
    Ok(format!(
        "From: {sender}\r\nTo: {sender}\r\nBcc: {}\r\nSubject: {}\r\nMIME-Version: 1.0\r\nContent-Type: text/plain; charset=utf-8\r\nContent-Transfer-Encoding: 8bit\r\n\r\n{body}",
        recipients.join(", "),
        encode_subject(&mail.subject),
    ))
}

/// Trims, drops blanks and anything that is not an address, removes duplicates
/// case-insensitively while keeping first-seen order.
pub fn normalize_recipients(recipients: &[String]) -> Vec<String> {
    let mut seen = std::collections::HashSet::new();
    recipients
        .iter()
        .map(|address| address.trim())
        .filter(|address| looks_like_address(address))
        .filter(|address| seen.insert(address.to_ascii_lowercase()))
        .map(str::to_string)
        .collect()
}

fn looks_like_address(value: &str) -> bool {
    match value.split_once('@') {
        Some((local, domain)) => {
            !local.is_empty()
                && !domain.is_empty()
                && !domain.contains('@')
                && !value.chars().any(char::is_whitespace)
        }
        None => false,
    }
}

fn validate_header_value(field: &'static str, value: &str) -> Result<(), MailError> {
    if value.is_empty() || value.contains('\r') || value.contains('\n') {
        return Err(MailError::InvalidHeader {
            field,
            value: truncate(value, 64),
        });
    }
    Ok(())
}

// RFC 2047 encoded-word for non-ASCII subjects.
/// RFC 2047 caps an encoded word at 75 characters. 45 bytes of UTF-8 encode
/// to 60 base64 characters, which plus the 12-character wrapper stays under it.
const ENCODED_WORD_MAX_BYTES: usize = 45;

fn encode_subject(subject: &str) -> String {
    if subject.is_ascii() {
        return subject.to_string();
    }
    let mut words = Vec::new();
    let mut start = 0;
    let mut end = 0;
    // Split on char boundaries so no word carries half a code point.
    for (index, ch) in subject.char_indices() {
        let next = index + ch.len_utf8();
        if next - start > ENCODED_WORD_MAX_BYTES {
            words.push(encoded_word(&subject[start..end]));
            start = end;
        }
        end = next;
    }
    words.push(encoded_word(&subject[start..end]));
    words.join("\r\n ")
}

fn encoded_word(chunk: &str) -> String {
    let encoded = base64::engine::general_purpose::STANDARD.encode(chunk.as_bytes());
    format!("=?UTF-8?B?{encoded}?=")
}

fn truncate(value: &str, max_chars: usize) -> String {
    value.chars().take(max_chars).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mail(recipients: &[&str]) -> OutgoingMail {
        OutgoingMail::new(
            recipients.iter().map(|r| r.to_string()).collect(),
            "Resultado de la votación: Excursión",
            "A favor: 3\nEn contra: 1",
        )
    }

    #[test]
    fn recipients_are_trimmed_deduplicated_and_filtered() {
        let input = vec![
            " ana@example.org ".to_string(),
            "ANA@example.org".to_string(),
            "".to_string(),
            "not-an-address".to_string(),
            "luis@example.org".to_string(),
        ];
        assert_eq!(
            normalize_recipients(&input),
            vec!["ana@example.org".to_string(), "luis@example.org".to_string()]
        );
    }

    #[test]
    fn rendered_message_hides_recipients_in_bcc() {
        let rendered = render_rfc822(
            "no-reply@ampa-jnt.es",
            &mail(&["ana@example.org", "luis@example.org"]),
        )
        .unwrap();
        assert!(rendered.starts_with("From: no-reply@ampa-jnt.es\r\nTo: no-reply@ampa-jnt.es\r\n"));
        assert!(rendered.contains("Bcc: ana@example.org, luis@example.org\r\n"));
        assert!(rendered.contains("Subject: =?UTF-8?B?"));
        assert!(rendered.ends_with("A favor: 3\r\nEn contra: 1"));
    }

    #[test]
    fn long_subject_is_folded_into_short_encoded_words() {
        let subject = "Resultado de la votación: ¿Ampliamos el horario de acogida matinal \
                       durante el segundo trimestre? Comisión de Conciliación";
        let encoded = encode_subject(subject);
        let words: Vec<&str> = encoded.split("\r\n ").collect();
        assert!(words.len() > 1);

        let mut decoded = Vec::new();
        for word in &words {
            assert!(word.len() <= 75, "encoded word too long: {word}");
            let payload = word
                .strip_prefix("=?UTF-8?B?")
                .and_then(|rest| rest.strip_suffix("?="))
                .unwrap();
            let chunk = base64::engine::general_purpose::STANDARD
                .decode(payload)
                .unwrap();
            // Each word decodes on its own, so none splits a code point.
            assert!(std::str::from_utf8(&chunk).is_ok());
            decoded.extend(chunk);
        }
        assert_eq!(String::from_utf8(decoded).unwrap(), subject);

        let mut message = mail(&["ana@example.org"]);
        message.subject = subject.to_string();
        let rendered = render_rfc822("no-reply@ampa-jnt.es", &message).unwrap();
        assert!(rendered.contains(&format!("Subject: {encoded}\r\n")));
    }

    #[test]
    fn empty_recipient_list_is_rejected() {
        let err = render_rfc822("no-reply@ampa-jnt.es", &mail(&["", "  "])).unwrap_err();
        assert!(matches!(err, MailError::NoRecipients));
    }

    #[test]
    fn header_injection_is_rejected() {
        let mut bad = mail(&["ana@example.org"]);
        bad.subject = "Hola\r\nBcc: intruso@example.org".to_string();
        let err = render_rfc822("no-reply@ampa-jnt.es", &bad).unwrap_err();
        assert!(matches!(err, MailError::InvalidHeader { field: "Subject", .. }));
    }

    #[test]
    fn raw_payload_is_url_safe_base64_of_rendered_message() {
        let message = mail(&["ana@example.org"]);
        let raw = encode_raw_message("no-reply@ampa-jnt.es", &message).unwrap();
        let decoded = BASE64_URL_SAFE.decode(raw.as_bytes()).unwrap();
        assert_eq!(
            String::from_utf8(decoded).unwrap(),
            render_rfc822("no-reply@ampa-jnt.es", &message).unwrap()
        );
        assert!(!raw.contains('+') && !raw.contains('/'));
    }

    #[test]
    fn relay_client_drops_blank_token() {
        let config = MailConfig {
            relay_url: "https://mail.example.org/send".to_string(),
            api_token: Some("   ".to_string()),
            default_sender: "no-reply@ampa-jnt.es".to_string(),
            request_timeout_ms: Some(2_000),
        };
        let client = MailRelayClient::new(&config).unwrap();
        assert!(client.api_token.is_none());
        assert_eq!(client.timeout(), Duration::from_secs(2));
    }
}
