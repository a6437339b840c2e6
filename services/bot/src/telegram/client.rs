//! Bot API client
//!
//! Implements [`Notifier`] so the dispatch core can message users through
//! Telegram.

use super::{
    callback,
    types::{ApiResponse, InlineKeyboardButton, KeyboardButton, ReplyMarkup},
};
use anyhow::{Result, anyhow};
use async_trait::async_trait;
use dispatch::notify::{DeliveryError, Keyboard, MenuButton, Notifier, OutgoingMessage};
use serde_json::{Value, json};
use std::time::Duration;
use tracing::{debug, info};

const API_BASE: &str = "https://api.telegram.org";

#[derive(Clone)]
pub struct TelegramClient {
    http: reqwest::Client,
    base_url: String,
}

impl TelegramClient {
    pub fn new(token: &str) -> Result<Self> {
        Self::with_base_url(API_BASE, token)
    }

    /// Point the client at another Bot API server
    pub fn with_base_url(api_base: &str, token: &str) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()?;
        Ok(Self {
            http,
            base_url: format!("{}/bot{}", api_base.trim_end_matches('/'), token),
        })
    }

    async fn call(&self, method: &str, payload: &Value) -> Result<ApiResponse> {
        let response = self
            .http
            .post(format!("{}/{}", self.base_url, method))
            .json(payload)
            .send()
            .await?;
        let body: ApiResponse = response.json().await?;
        debug!("Bot API {} answered ok={}", method, body.ok);
        Ok(body)
    }

    async fn call_ok(&self, method: &str, payload: &Value) -> Result<Value> {
        let response = self.call(method, payload).await?;
        if !response.ok {
            return Err(anyhow!(
                "{} failed: {}",
                method,
                response.description.unwrap_or_default()
            ));
        }
        Ok(response.result.unwrap_or(Value::Null))
    }

    /// Acknowledge a button press, optionally with a toast
    pub async fn answer_callback(&self, callback_id: &str, text: Option<&str>) -> Result<()> {
        let mut payload = json!({ "callback_query_id": callback_id });
        if let Some(text) = text {
            payload["text"] = json!(text);
        }
        self.call_ok("answerCallbackQuery", &payload).await?;
        Ok(())
    }

    /// Register `url` as the webhook target
    pub async fn set_webhook(&self, url: &str, secret: Option<&str>) -> Result<()> {
        let mut payload = json!({
            "url": url,
            "allowed_updates": ["message", "callback_query"],
        });
        if let Some(secret) = secret {
            payload["secret_token"] = json!(secret);
        }
        self.call_ok("setWebhook", &payload).await?;
        info!("Webhook registered at {}", url);
        Ok(())
    }

    /// The bot's own account, used as a liveness probe
    pub async fn get_me(&self) -> Result<Value> {
        self.call_ok("getMe", &json!({})).await
    }
}

pub fn reply_markup(keyboard: &Keyboard) -> Option<ReplyMarkup> {
    match keyboard {
        Keyboard::None => None,
        Keyboard::Inline(rows) => Some(ReplyMarkup::Inline {
            inline_keyboard: rows
                .iter()
                .map(|row| {
                    row.iter()
                        .map(|button| InlineKeyboardButton {
                            text: button.label.clone(),
                            callback_data: callback::encode(&button.action),
                        })
                        .collect()
                })
                .collect(),
        }),
        Keyboard::Menu(rows) => Some(ReplyMarkup::Keyboard {
            keyboard: rows
                .iter()
                .map(|row| {
                    row.iter()
                        .map(|button| match button {
                            MenuButton::Text(text) => KeyboardButton {
                                text: text.clone(),
                                request_location: false,
                            },
                            MenuButton::RequestLocation(text) => KeyboardButton {
                                text: text.clone(),
                                request_location: true,
                            },
                        })
                        .collect()
                })
                .collect(),
            resize_keyboard: true,
        }),
    }
}

#[async_trait]
impl Notifier for TelegramClient {
    async fn send(&self, message: OutgoingMessage) -> Result<(), DeliveryError> {
        let mut payload = json!({
            "chat_id": message.recipient,
            "text": message.text,
            "parse_mode": "HTML",
        });
        if let Some(markup) = reply_markup(&message.keyboard) {
            payload["reply_markup"] = serde_json::to_value(markup)
                .map_err(|e| DeliveryError::Transport(e.to_string()))?;
        }

        let response = self
            .call("sendMessage", &payload)
            .await
            .map_err(|e| DeliveryError::Transport(e.to_string()))?;

        match (response.ok, response.error_code) {
            (true, _) => Ok(()),
            (false, Some(400 | 403)) => Err(DeliveryError::Unreachable(message.recipient)),
            (false, _) => Err(DeliveryError::Transport(
                response
                    .description
                    .unwrap_or_else(|| "sendMessage failed".to_string()),
            )),
        }
    }
}
