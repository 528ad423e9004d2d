//! Telegram bot delivery transport (spec §4.5 "Delivery", §6 `TELEGRAM_BOT_TOKEN`).

use std::time::Duration;

use serde::Serialize;

const API_BASE: &str = "https://api.telegram.org";
const CALL_TIMEOUT: Duration = Duration::from_secs(30);

/// How a delivery attempt failed, coarse enough for the outage-queue decision
/// in spec §4.5 ("delivery failure classified as reachability").
#[derive(Debug, Clone)]
pub enum DeliveryError {
    /// Timeout or connection failure: queue the message and mark unreachable.
    Reachability(String),
    /// The bot API rejected the request (bad chat id, bad token): do not
    /// retry via the outage queue, just log it.
    Rejected(String),
}

impl std::fmt::Display for DeliveryError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DeliveryError::Reachability(m) | DeliveryError::Rejected(m) => write!(f, "{m}"),
        }
    }
}

#[derive(Serialize)]
struct SendMessageRequest<'a> {
    chat_id: &'a str,
    text: &'a str,
}

/// Thin client over Telegram's `sendMessage` bot API call.
#[derive(Debug, Clone)]
pub struct TelegramClient {
    http: reqwest::Client,
    bot_token: String,
}

impl TelegramClient {
    /// Build a client for `bot_token` (spec §6: `TELEGRAM_BOT_TOKEN`).
    ///
    /// # Errors
    ///
    /// Returns an error if constructing the underlying HTTP client fails.
    pub fn new(bot_token: String) -> Result<Self, String> {
        let http = reqwest::Client::builder()
            .timeout(CALL_TIMEOUT)
            .build()
            .map_err(|e| e.to_string())?;
        Ok(Self { http, bot_token })
    }

    /// Send `text` to `chat_id`.
    ///
    /// # Errors
    ///
    /// Returns a [`DeliveryError`] classifying the failure.
    pub async fn send(&self, chat_id: &str, text: &str) -> Result<(), DeliveryError> {
        let url = format!("{API_BASE}/bot{}/sendMessage", self.bot_token);
        let resp = self
            .http
            .post(url)
            .json(&SendMessageRequest { chat_id, text })
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() || e.is_connect() {
                    DeliveryError::Reachability(e.to_string())
                } else {
                    DeliveryError::Rejected(e.to_string())
                }
            })?;

        if resp.status().is_server_error() {
            return Err(DeliveryError::Reachability(format!(
                "telegram returned {}",
                resp.status()
            )));
        }
        if !resp.status().is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(DeliveryError::Rejected(format!("telegram rejected message: {body}")));
        }
        Ok(())
    }
}
