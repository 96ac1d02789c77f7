use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use reqwest::{Client, Url};
use serde::Serialize;
use std::fmt;
use std::time::Duration;
use tracing::info;

use crate::config::Config;

#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send(&self, recipients: &[String], subject: &str, body: &str) -> Result<()>;
}

#[derive(Serialize, Debug)]
struct MailRequest<'a> {
    from: &'a str,
    to: &'a [String],
    subject: &'a str,
    text: &'a str,
}

/// Sends mail through an HTTP relay accepting a JSON body.
#[derive(Clone)]
pub struct HttpMailer {
    http: Client,
    endpoint: Url,
    api_key: Option<String>,
    sender: String,
}

impl fmt::Debug for HttpMailer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpMailer")
            .field("endpoint", &self.endpoint)
            .finish_non_exhaustive()
    }
}

impl HttpMailer {
    pub fn new(endpoint: Url, api_key: Option<String>, sender: String, timeout: Duration) -> Result<Self> {
        let http = Client::builder()
            .user_agent("sheetsync/0.1")
            .timeout(timeout)
            .build()
            .context("failed to build HTTP client")?;
        Ok(Self {
            http,
            endpoint,
            api_key,
            sender,
        })
    }

    pub fn build_request(
        &self,
        recipients: &[String],
        subject: &str,
        body: &str,
    ) -> Result<reqwest::Request> {
        let payload = MailRequest {
            from: &self.sender,
            to: recipients,
            subject,
            text: body,
        };
        let mut req = self.http.post(self.endpoint.clone()).json(&payload);
        if let Some(key) = &self.api_key {
            req = req.bearer_auth(key);
        }
        req.build().context("failed to build mail request")
    }
}

#[async_trait]
impl Mailer for HttpMailer {
    async fn send(&self, recipients: &[String], subject: &str, body: &str) -> Result<()> {
        let request = self.build_request(recipients, subject, body)?;
        let res = self
            .http
            .execute(request)
            .await
            .context("failed to reach mail relay")?;
        if !res.status().is_success() {
            let status = res.status();
            let text = res.text().await.unwrap_or_default();
            return Err(anyhow!("mail relay error {}: {}", status, text));
        }
        Ok(())
    }
}

/// Logs mails instead of sending them.
#[derive(Debug, Clone, Default)]
pub struct LogMailer;

#[async_trait]
impl Mailer for LogMailer {
    async fn send(&self, recipients: &[String], subject: &str, _body: &str) -> Result<()> {
        info!(to = ?recipients, subject, "mail (not sent: no relay configured)");
        Ok(())
    }
}

pub fn from_config(cfg: &Config) -> Result<Box<dyn Mailer>> {
    match cfg.mail.endpoint.as_deref() {
        Some(endpoint) => {
            let url = Url::parse(endpoint).context("invalid mail.endpoint")?;
            let timeout = Duration::from_secs(cfg.sheets.request_timeout_seconds);
            Ok(Box::new(HttpMailer::new(
                url,
                cfg.mail.api_key.clone(),
                cfg.mail.sender.clone(),
                timeout,
            )?))
        }
        None => Ok(Box::new(LogMailer)),
    }
}
