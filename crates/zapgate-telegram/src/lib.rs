//! Zapgate Telegram Adapter
//!
//! Telegram Bot API long-polling with offset persistence

use anyhow::{anyhow, Result};
use reqwest::{Client, ClientBuilder};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use tokio::fs;
use tokio::sync::broadcast;
use tracing::{info, warn};
use zapgate_config::TelegramConfig;
use zapgate_ipc::{EventBus, Inbound, Reply};

const POLL_RETRY_DELAY: Duration = Duration::from_secs(2);

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelegramUpdate {
    pub update_id: i64,
    pub message: Option<TelegramMessage>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelegramMessage {
    pub message_id: i64,
    pub text: Option<String>,
    pub chat: TelegramChat,
    pub from: Option<TelegramUser>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelegramChat {
    pub id: i64,
    #[serde(rename = "type")]
    pub chat_type: String,
}

impl TelegramChat {
    pub fn is_private(&self) -> bool {
        self.chat_type == "private"
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelegramUser {
    pub id: i64,
    #[serde(default)]
    pub username: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiResponse<T> {
    ok: bool,
    result: T,
}

/// Map one Telegram message to the bus shape. Messages without text or
/// without a sender (channel posts) are dropped.
fn inbound_from_message(message: &TelegramMessage) -> Option<Inbound> {
    let text = message.text.clone()?;
    let from = message.from.as_ref()?;
    Some(Inbound {
        sender_id: from.id,
        chat_id: message.chat.id,
        message_id: message.message_id,
        text,
        private: message.chat.is_private(),
    })
}

pub struct TelegramAdapter {
    client: Client,
    bot_token: String,
    api_url: String,
    data_dir: PathBuf,
    poll_timeout_secs: u64,
    event_bus: Option<EventBus>,
}

impl TelegramAdapter {
    pub fn new(config: &TelegramConfig, data_dir: PathBuf) -> Self {
        Self {
            client: Self::build_client(config.poll_timeout_secs),
            bot_token: config.bot_token.clone(),
            api_url: format!("https://api.telegram.org/bot{}", config.bot_token),
            data_dir,
            poll_timeout_secs: config.poll_timeout_secs,
            event_bus: None,
        }
    }

    pub fn with_event_bus(mut self, event_bus: EventBus) -> Self {
        self.event_bus = Some(event_bus);
        self
    }

    fn build_client(poll_timeout_secs: u64) -> Client {
        // Total timeout must outlast the long-poll window.
        ClientBuilder::new()
            .pool_idle_timeout(Duration::from_secs(600))
            .tcp_keepalive(Some(Duration::from_secs(30)))
            .timeout(Duration::from_secs(poll_timeout_secs + 30))
            .connect_timeout(Duration::from_secs(30))
            .build()
            .expect("failed to build HTTP client")
    }

    /// One Bot API call: POST the payload, check HTTP status, unwrap the
    /// `{ok, result}` envelope. HTTP failures keep the response body in the
    /// error text so callers can match on Telegram's description strings.
    async fn api_post<T: DeserializeOwned>(
        &self,
        method: &str,
        payload: &serde_json::Value,
    ) -> Result<T> {
        let url = format!("{}/{}", self.api_url, method);
        let resp = self
            .client
            .post(&url)
            .json(payload)
            .send()
            .await
            .map_err(|e| anyhow!("telegram {} request failed: {}", method, e))?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(anyhow!("telegram {} HTTP {}: {}", method, status, body));
        }

        let parsed: ApiResponse<T> = resp
            .json()
            .await
            .map_err(|e| anyhow!("telegram {} decode failed: {}", method, e))?;
        if !parsed.ok {
            return Err(anyhow!("telegram {} returned ok=false", method));
        }
        Ok(parsed.result)
    }

    fn offset_path(&self) -> PathBuf {
        let bot_id = self.bot_token.split(':').next().unwrap_or("default");
        let runtime_dir = self.data_dir.join("runtime");
        let _ = std::fs::create_dir_all(&runtime_dir);
        runtime_dir.join(format!("telegram.{}.offset", bot_id))
    }

    async fn read_offset(&self) -> Option<i64> {
        let content = fs::read_to_string(self.offset_path()).await.ok()?;
        content.trim().parse().ok()
    }

    async fn write_offset(&self, offset: i64) {
        let _ = fs::write(self.offset_path(), format!("{}\n", offset)).await;
    }

    pub async fn get_updates(&self, offset: Option<i64>) -> Result<Vec<TelegramUpdate>> {
        let mut payload = serde_json::json!({
            "timeout": self.poll_timeout_secs,
            "allowed_updates": ["message"],
        });
        if let Some(offset) = offset {
            payload["offset"] = serde_json::json!(offset);
        }
        self.api_post("getUpdates", &payload).await
    }

    /// Send a plain-text message. A stale `reply_to` (original deleted) is
    /// retried once without the reply reference.
    pub async fn send_message(&self, chat_id: i64, text: &str, reply_to: Option<i64>) -> Result<()> {
        let mut payload = serde_json::json!({
            "chat_id": chat_id,
            "text": text,
        });
        if let Some(message_id) = reply_to {
            payload["reply_to_message_id"] = serde_json::json!(message_id);
        }

        match self.api_post::<serde_json::Value>("sendMessage", &payload).await {
            Ok(_) => Ok(()),
            Err(err) if reply_to.is_some() && Self::is_reply_target_missing(&err.to_string()) => {
                warn!("Reply target missing, resending without reply_to_message_id");
                Self::remove_reply_to_message_id(&mut payload);
                self.api_post::<serde_json::Value>("sendMessage", &payload)
                    .await
                    .map(|_| ())
            }
            Err(err) => Err(err),
        }
    }

    fn remove_reply_to_message_id(payload: &mut serde_json::Value) -> bool {
        payload
            .as_object_mut()
            .map(|obj| obj.remove("reply_to_message_id").is_some())
            .unwrap_or(false)
    }

    fn is_reply_target_missing(body: &str) -> bool {
        body.to_ascii_lowercase()
            .contains("message to be replied not found")
    }

    pub async fn poll(&self) -> Result<()> {
        let mut offset: Option<i64> = self.read_offset().await;
        info!(offset = ?offset, "Telegram polling started");

        if let Err(err) = self.sync_bot_commands().await {
            warn!("Failed to sync Telegram bot commands: {}", err);
        } else {
            info!("Telegram bot commands synced");
        }

        loop {
            match self.get_updates(offset).await {
                Ok(updates) => {
                    for update in updates {
                        let next = update.update_id + 1;
                        offset = Some(next);
                        self.write_offset(next).await;

                        if let Some(message) = &update.message {
                            self.handle_message(message).await;
                        }
                    }
                }
                Err(err) => {
                    warn!("Telegram polling error: {}", err);
                    tokio::time::sleep(POLL_RETRY_DELAY).await;
                }
            }
        }
    }

    /// Register the command menu so clients offer completion for the three
    /// commands the bot understands.
    async fn sync_bot_commands(&self) -> Result<()> {
        let payload = serde_json::json!({
            "commands": [
                { "command": "shock", "description": "Send a shock" },
                { "command": "vibrate", "description": "Send a vibration" },
                { "command": "help", "description": "Show usage and limits" }
            ]
        });
        self.api_post::<serde_json::Value>("setMyCommands", &payload)
            .await?;
        Ok(())
    }

    async fn handle_message(&self, message: &TelegramMessage) {
        let Some(inbound) = inbound_from_message(message) else {
            return;
        };

        info!(
            "Received message from {} in chat {}",
            inbound.sender_id, inbound.chat_id
        );

        let Some(event_bus) = &self.event_bus else {
            info!("No event bus configured, message not forwarded");
            return;
        };
        if let Err(e) = event_bus.publish(inbound) {
            warn!("Failed to publish message to event bus: {}", e);
        }
    }

    pub async fn run_reply_handler(&self, mut receiver: broadcast::Receiver<Reply>) {
        info!("Telegram reply handler started");

        loop {
            match receiver.recv().await {
                Ok(reply) => {
                    if let Err(e) = self
                        .send_message(reply.chat_id, &reply.text, reply.reply_to)
                        .await
                    {
                        warn!("Failed to send reply: {}", e);
                    }
                }
                Err(broadcast::error::RecvError::Closed) => {
                    info!("Telegram reply handler stopped: channel closed");
                    break;
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!("Telegram reply handler lagged; skipped {} messages", skipped);
                }
            }
        }
    }
}
