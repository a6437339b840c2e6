//! The subset of Bot API objects the bot reads

use super::callback;
use crate::{
    events::{ChatEvent, Inbound, Sender},
    menu,
};
use dispatch::models::Location;
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Deserialize)]
pub struct Update {
    pub update_id: i64,
    #[serde(default)]
    pub message: Option<Message>,
    #[serde(default)]
    pub callback_query: Option<CallbackQuery>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Message {
    pub message_id: i64,
    #[serde(default)]
    pub from: Option<User>,
    pub chat: Chat,
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub location: Option<GeoPoint>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Chat {
    pub id: i64,
    #[serde(rename = "type", default)]
    pub kind: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct User {
    pub id: i64,
    #[serde(default)]
    pub is_bot: bool,
    pub first_name: String,
    #[serde(default)]
    pub last_name: Option<String>,
    #[serde(default)]
    pub username: Option<String>,
}

#[derive(Debug, Clone, Copy, Deserialize)]
pub struct GeoPoint {
    pub latitude: f64,
    pub longitude: f64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CallbackQuery {
    pub id: String,
    pub from: User,
    #[serde(default)]
    pub data: Option<String>,
}

/// Envelope of every Bot API response
#[derive(Debug, Deserialize)]
pub struct ApiResponse {
    pub ok: bool,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub error_code: Option<u16>,
    #[serde(default)]
    pub result: Option<Value>,
}

#[derive(Debug, Serialize)]
pub struct InlineKeyboardButton {
    pub text: String,
    pub callback_data: String,
}

#[derive(Debug, Serialize)]
pub struct KeyboardButton {
    pub text: String,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub request_location: bool,
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
pub enum ReplyMarkup {
    Inline {
        inline_keyboard: Vec<Vec<InlineKeyboardButton>>,
    },
    Keyboard {
        keyboard: Vec<Vec<KeyboardButton>>,
        resize_keyboard: bool,
    },
}

impl User {
    fn sender(&self) -> Sender {
        let display_name = match &self.last_name {
            Some(last) => format!("{} {}", self.first_name, last),
            None => self.first_name.clone(),
        };
        Sender {
            id: self.id.to_string(),
            display_name,
            username: self.username.clone(),
        }
    }
}

impl Update {
    /// Translate the update into a bot event
    ///
    /// Returns `None` for updates the bot ignores: other bots, group chats,
    /// unknown button payloads and message kinds without text or location.
    pub fn into_inbound(self) -> Option<Inbound> {
        if let Some(query) = self.callback_query {
            if query.from.is_bot {
                return None;
            }
            let action = callback::decode(query.data.as_deref()?)?;
            return Some(Inbound {
                sender: query.from.sender(),
                event: ChatEvent::ButtonPressed(action),
                callback_id: Some(query.id),
            });
        }

        let message = self.message?;
        let from = message.from.as_ref()?;
        if from.is_bot || message.chat.kind.as_deref().is_some_and(|k| k != "private") {
            return None;
        }

        let event = if let Some(point) = message.location {
            ChatEvent::LocationShared(Location::new(point.latitude, point.longitude))
        } else {
            menu::parse_text(message.text.as_deref()?)
        };

        Some(Inbound {
            sender: from.sender(),
            event,
            callback_id: None,
        })
    }
}
