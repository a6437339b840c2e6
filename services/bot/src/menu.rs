//! Reply keyboards and the labels on them

use crate::events::{ChatEvent, Command};
use dispatch::{
    messages::class_label,
    models::{RideClass, Role},
    notify::{Button, ButtonAction, Keyboard, MenuButton},
};

pub const CUSTOMER: &str = "🧍 Customer";
pub const DRIVER: &str = "🚗 Driver";
pub const ADMIN: &str = "🛠 Admin";
pub const REQUEST_RIDE: &str = "🚕 Request ride";
pub const SEND_PICKUP: &str = "📍 Send pickup location";
pub const SHARE_LOCATION: &str = "📍 Share location";
pub const START_DUTY: &str = "🟢 Start duty";
pub const STOP_DUTY: &str = "🔴 Stop duty";
pub const HISTORY: &str = "📜 My rides";
pub const PROFILE: &str = "👤 Profile";
pub const CANCEL: &str = "❌ Cancel ride";
pub const STATS: &str = "📊 Stats";
pub const SWITCH_ROLE: &str = "🔁 Switch role";

fn text(label: &str) -> MenuButton {
    MenuButton::Text(label.to_string())
}

pub fn role_menu(with_admin: bool) -> Keyboard {
    let mut row = vec![text(CUSTOMER), text(DRIVER)];
    if with_admin {
        row.push(text(ADMIN));
    }
    Keyboard::Menu(vec![row])
}

pub fn menu_for(role: Option<Role>) -> Keyboard {
    match role {
        None => role_menu(false),
        Some(Role::Customer) => Keyboard::Menu(vec![
            vec![text(REQUEST_RIDE)],
            vec![MenuButton::RequestLocation(SEND_PICKUP.to_string())],
            vec![text(HISTORY), text(PROFILE)],
            vec![text(CANCEL), text(SWITCH_ROLE)],
        ]),
        Some(Role::Driver) => Keyboard::Menu(vec![
            vec![text(START_DUTY), text(STOP_DUTY)],
            vec![MenuButton::RequestLocation(SHARE_LOCATION.to_string())],
            vec![text(HISTORY), text(PROFILE)],
            vec![text(CANCEL), text(SWITCH_ROLE)],
        ]),
        Some(Role::Admin) => Keyboard::Menu(vec![
            vec![text(STATS), text(PROFILE)],
            vec![text(SWITCH_ROLE)],
        ]),
    }
}

/// Inline buttons offering the ride classes
pub fn class_picker() -> Keyboard {
    Keyboard::Inline(vec![
        RideClass::ALL
            .into_iter()
            .map(|class| Button::new(class_label(class), ButtonAction::ChooseClass(class)))
            .collect(),
    ])
}

/// Map typed text to an event
///
/// Menu labels and slash commands are both accepted; a trailing
/// `@botname` on commands is ignored.
pub fn parse_text(input: &str) -> ChatEvent {
    let trimmed = input.trim();
    let command = trimmed
        .split_whitespace()
        .next()
        .unwrap_or_default()
        .split('@')
        .next()
        .unwrap_or_default();

    match (trimmed, command) {
        (CUSTOMER, _) | (_, "/customer") => ChatEvent::RoleSelected(Role::Customer),
        (DRIVER, _) | (_, "/driver") => ChatEvent::RoleSelected(Role::Driver),
        (ADMIN, _) | (_, "/admin") => ChatEvent::RoleSelected(Role::Admin),
        (_, "/start") => ChatEvent::TextCommand(Command::Start),
        (SWITCH_ROLE, _) | (_, "/role") => ChatEvent::TextCommand(Command::SwitchRole),
        (_, "/help") => ChatEvent::TextCommand(Command::Help),
        (REQUEST_RIDE, _) | (_, "/ride") => ChatEvent::TextCommand(Command::RequestRide),
        (START_DUTY, _) | (_, "/online") => ChatEvent::TextCommand(Command::StartDuty),
        (STOP_DUTY, _) | (_, "/offline") => ChatEvent::TextCommand(Command::StopDuty),
        (HISTORY, _) | (_, "/history") => ChatEvent::TextCommand(Command::History),
        (PROFILE, _) | (_, "/profile") => ChatEvent::TextCommand(Command::Profile),
        (CANCEL, _) | (_, "/cancel") => ChatEvent::TextCommand(Command::CancelRide),
        (STATS, _) | (_, "/stats") => ChatEvent::TextCommand(Command::Stats),
        _ => ChatEvent::TextCommand(Command::Unknown(trimmed.to_string())),
    }
}
