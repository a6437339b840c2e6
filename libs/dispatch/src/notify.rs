//! Outbound notifications
//!
//! The core describes what a party should see; the chat transport decides
//! how buttons are rendered. Delivery is best effort: a failure is logged
//! by [`deliver`] and never undoes a committed transition.

use crate::models::{RideClass, RideId, RideStatus, UserId};
use async_trait::async_trait;
use thiserror::Error;
use tracing::warn;

/// What pressing an inline button asks the bot to do
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ButtonAction {
    Accept(RideId),
    Reject(RideId),
    Advance { ride_id: RideId, target: RideStatus },
    Cancel(RideId),
    Rate { ride_id: RideId, stars: u8 },
    ChooseClass(RideClass),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Button {
    pub label: String,
    pub action: ButtonAction,
}

impl Button {
    pub fn new(label: impl Into<String>, action: ButtonAction) -> Self {
        Self {
            label: label.into(),
            action,
        }
    }
}

/// A key of the persistent menu under the input field
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MenuButton {
    Text(String),
    /// Sends the user's location when pressed
    RequestLocation(String),
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum Keyboard {
    #[default]
    None,
    /// Buttons attached to the message, one inner vec per row
    Inline(Vec<Vec<Button>>),
    Menu(Vec<Vec<MenuButton>>),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutgoingMessage {
    pub recipient: UserId,
    pub text: String,
    pub keyboard: Keyboard,
}

impl OutgoingMessage {
    pub fn text(recipient: impl Into<UserId>, text: impl Into<String>) -> Self {
        Self {
            recipient: recipient.into(),
            text: text.into(),
            keyboard: Keyboard::None,
        }
    }

    pub fn with_keyboard(mut self, keyboard: Keyboard) -> Self {
        self.keyboard = keyboard;
        self
    }
}

#[derive(Debug, Error)]
pub enum DeliveryError {
    /// The transport did not answer or answered with an error
    #[error("transport failure: {0}")]
    Transport(String),

    /// The recipient blocked the bot or never started a chat
    #[error("recipient {0} is unreachable")]
    Unreachable(UserId),
}

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send(&self, message: OutgoingMessage) -> Result<(), DeliveryError>;
}

/// Send a message, logging instead of failing
///
/// Returns whether the transport accepted it.
pub async fn deliver(notifier: &dyn Notifier, message: OutgoingMessage) -> bool {
    let recipient = message.recipient.clone();
    match notifier.send(message).await {
        Ok(()) => true,
        Err(e) => {
            warn!("Failed to notify {}: {}", recipient, e);
            false
        }
    }
}
