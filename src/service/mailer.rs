//! Outbound mail via the SendGrid v3 REST API (no SDK dependency).

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde_json::json;
use thiserror::Error;
use tracing::warn;

pub const SENDGRID_URL: &str = "https://api.sendgrid.com/v3/mail/send";

#[derive(Debug, Clone)]
pub struct Attachment {
    pub filename: String,
    pub content_type: String,
    pub content: Vec<u8>,
}

#[derive(Debug, Clone)]
pub struct OutboundMail {
    pub from: String,
    pub to: String,
    pub subject: String,
    pub html_body: String,
    pub attachments: Vec<Attachment>,
}

#[derive(Debug, Error)]
pub enum MailError {
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),
}

/// Anything that can hand a message to a mail provider.
#[async_trait]
pub trait MailTransport: Send + Sync {
    /// Returns the provider's HTTP status; callers decide what counts as accepted.
    async fn send(&self, mail: &OutboundMail) -> Result<u16, MailError>;
}

pub struct SendGridTransport {
    client: reqwest::Client,
    api_key: String,
    endpoint: String,
}

impl SendGridTransport {
    pub fn new(api_key: impl Into<String>, endpoint: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key: api_key.into(),
            endpoint: endpoint.into(),
        }
    }
}

fn sendgrid_payload(mail: &OutboundMail) -> serde_json::Value {
    let attachments: Vec<serde_json::Value> = mail
        .attachments
        .iter()
        .map(|a| {
            json!({
                "content": STANDARD.encode(&a.content),
                "type": a.content_type,
                "filename": a.filename,
                "disposition": "attachment",
            })
        })
        .collect();

    let mut payload = json!({
        "personalizations": [{ "to": [{ "email": mail.to }] }],
        "from": { "email": mail.from },
        "subject": mail.subject,
        "content": [{ "type": "text/html", "value": mail.html_body }],
    });
    if !attachments.is_empty() {
        payload["attachments"] = serde_json::Value::Array(attachments);
    }
    payload
}

#[async_trait]
impl MailTransport for SendGridTransport {
    async fn send(&self, mail: &OutboundMail) -> Result<u16, MailError> {
        let resp = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&sendgrid_payload(mail))
            .send()
            .await?;

        let status = resp.status().as_u16();
        if !resp.status().is_success() {
            let body = resp.text().await.unwrap_or_default();
            warn!(status, body = %body, "SendGrid rejected message");
        }
        Ok(status)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn payload_carries_base64_attachment() {
        let mail = OutboundMail {
            from: "noreply@kioskapp.com".into(),
            to: "manager@example.com".into(),
            subject: "Daily Time Event Export - 2024-01-15".into(),
            html_body: "<p>hi</p>".into(),
            attachments: vec![Attachment {
                filename: "time_events_20240115.csv".into(),
                content_type: "text/csv".into(),
                content: b"Date,Time\n".to_vec(),
            }],
        };

        let payload = sendgrid_payload(&mail);
        assert_eq!(payload["personalizations"][0]["to"][0]["email"], "manager@example.com");
        assert_eq!(payload["from"]["email"], "noreply@kioskapp.com");
        assert_eq!(payload["attachments"][0]["filename"], "time_events_20240115.csv");
        assert_eq!(payload["attachments"][0]["type"], "text/csv");
        assert_eq!(payload["attachments"][0]["content"], STANDARD.encode(b"Date,Time\n"));
    }

    #[test]
    fn payload_omits_empty_attachments() {
        let mail = OutboundMail {
            from: "a@b.c".into(),
            to: "d@e.f".into(),
            subject: "s".into(),
            html_body: "b".into(),
            attachments: vec![],
        };
        assert!(sendgrid_payload(&mail).get("attachments").is_none());
    }
}
