//! Operator alerts. Every sync pass reports start, success and failure here.
use anyhow::{Context, Result};
use async_trait::async_trait;
use std::fmt;
use teloxide::prelude::*;
use tracing::{info, warn};

use crate::config::Config;

#[async_trait]
pub trait Alerter: Send + Sync {
    async fn alert(&self, message: &str) -> Result<()>;
}

/// Posts alerts to a Telegram chat.
#[derive(Clone)]
pub struct TelegramAlerter {
    bot: Bot,
    chat_id: ChatId,
}

impl fmt::Debug for TelegramAlerter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TelegramAlerter")
            .field("chat_id", &self.chat_id)
            .finish_non_exhaustive()
    }
}

impl TelegramAlerter {
    pub fn new(token: String, chat_id: i64) -> Self {
        Self {
            bot: Bot::new(token),
            chat_id: ChatId(chat_id),
        }
    }
}

#[async_trait]
impl Alerter for TelegramAlerter {
    async fn alert(&self, message: &str) -> Result<()> {
        self.bot
            .send_message(self.chat_id, message)
            .await
            .context("failed to send Telegram alert")?;
        Ok(())
    }
}

/// Writes alerts to the log when no chat is configured.
#[derive(Debug, Clone, Default)]
pub struct LogAlerter;

#[async_trait]
impl Alerter for LogAlerter {
    async fn alert(&self, message: &str) -> Result<()> {
        info!(target: "alert", "{}", message);
        Ok(())
    }
}

pub fn from_config(cfg: &Config) -> Box<dyn Alerter> {
    match (&cfg.alert.telegram_bot_token, cfg.alert.telegram_chat_id) {
        (Some(token), Some(chat_id)) => Box::new(TelegramAlerter::new(token.clone(), chat_id)),
        _ => Box::new(LogAlerter),
    }
}

/// Send an alert, logging instead of failing when the channel is down.
pub async fn best_effort(alerter: &dyn Alerter, message: &str) {
    if let Err(err) = alerter.alert(message).await {
        warn!(?err, "alert delivery failed");
    }
}
