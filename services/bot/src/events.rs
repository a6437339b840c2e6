//! Transport-neutral inbound events

use dispatch::{
    models::{Location, Role, UserId},
    notify::ButtonAction,
};

/// Who sent the event
#[derive(Debug, Clone, PartialEq)]
pub struct Sender {
    pub id: UserId,
    pub display_name: String,
    pub username: Option<String>,
}

/// Text commands, typed or picked from the menu
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Start,
    SwitchRole,
    Help,
    RequestRide,
    StartDuty,
    StopDuty,
    History,
    Profile,
    CancelRide,
    Stats,
    /// Anything the bot does not recognise
    Unknown(String),
}

#[derive(Debug, Clone, PartialEq)]
pub enum ChatEvent {
    RoleSelected(Role),
    LocationShared(Location),
    ButtonPressed(ButtonAction),
    TextCommand(Command),
}

/// An event together with its sender
#[derive(Debug, Clone, PartialEq)]
pub struct Inbound {
    pub sender: Sender,
    pub event: ChatEvent,
    /// Present for button presses; must be acknowledged
    pub callback_id: Option<String>,
}
