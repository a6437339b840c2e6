//! Inline button payloads
//!
//! Telegram limits `callback_data` to 64 bytes, so actions are encoded as
//! short `verb:arg[:arg]` strings.

use dispatch::{
    models::{RideClass, RideStatus},
    notify::ButtonAction,
};
use regex::Regex;
use std::sync::OnceLock;

pub fn encode(action: &ButtonAction) -> String {
    match action {
        ButtonAction::Accept(ride_id) => format!("accept:{}", ride_id),
        ButtonAction::Reject(ride_id) => format!("reject:{}", ride_id),
        ButtonAction::Advance { ride_id, target } => format!("advance:{}:{}", target, ride_id),
        ButtonAction::Cancel(ride_id) => format!("cancel:{}", ride_id),
        ButtonAction::Rate { ride_id, stars } => format!("rate:{}:{}", stars, ride_id),
        ButtonAction::ChooseClass(class) => format!("class:{}", class),
    }
}

pub fn decode(data: &str) -> Option<ButtonAction> {
    static CALLBACK_REGEX: OnceLock<Regex> = OnceLock::new();
    let regex = CALLBACK_REGEX.get_or_init(|| {
        Regex::new(r"^(accept|reject|cancel|advance|rate|class):(?:([a-z_]+|[1-5]):)?([A-Za-z0-9_-]{1,40})$")
            .expect("Failed to compile callback regex")
    });

    let captures = regex.captures(data)?;
    let verb = captures.get(1)?.as_str();
    let middle = captures.get(2).map(|m| m.as_str());
    let tail = captures.get(3)?.as_str().to_string();

    match (verb, middle) {
        ("accept", None) => Some(ButtonAction::Accept(tail)),
        ("reject", None) => Some(ButtonAction::Reject(tail)),
        ("cancel", None) => Some(ButtonAction::Cancel(tail)),
        ("advance", Some(target)) => Some(ButtonAction::Advance {
            ride_id: tail,
            target: target.parse::<RideStatus>().ok()?,
        }),
        ("rate", Some(stars)) => Some(ButtonAction::Rate {
            ride_id: tail,
            stars: stars.parse().ok()?,
        }),
        ("class", None) => Some(ButtonAction::ChooseClass(tail.parse::<RideClass>().ok()?)),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const RIDE: &str = "6f1c2a34-8d0e-4b7a-9c55-0e2d4b1f9a77";

    #[test]
    fn longest_payload_fits_telegram_limit() {
        let action = ButtonAction::Advance {
            ride_id: RIDE.to_string(),
            target: RideStatus::InProgress,
        };
        let data = encode(&action);
        assert!(data.len() <= 64, "{} bytes", data.len());
        assert_eq!(decode(&data), Some(action));
    }

    #[test]
    fn decodes_every_verb() {
        assert_eq!(
            decode(&format!("accept:{RIDE}")),
            Some(ButtonAction::Accept(RIDE.into()))
        );
        assert_eq!(
            decode(&format!("rate:4:{RIDE}")),
            Some(ButtonAction::Rate {
                ride_id: RIDE.into(),
                stars: 4
            })
        );
        assert_eq!(
            decode("class:comfort"),
            Some(ButtonAction::ChooseClass(RideClass::Comfort))
        );
        assert_eq!(
            decode(&format!("cancel:{RIDE}")),
            Some(ButtonAction::Cancel(RIDE.into()))
        );
    }

    #[test]
    fn rejects_malformed_payloads() {
        assert_eq!(decode(""), None);
        assert_eq!(decode("accept:"), None);
        assert_eq!(decode(&format!("rate:9:{RIDE}")), None);
        assert_eq!(decode(&format!("advance:teleport:{RIDE}")), None);
        assert_eq!(decode(&format!("accept:4:{RIDE}")), None);
        assert_eq!(decode("class:limousine"), None);
        assert_eq!(decode("accept:ride'; DROP TABLE rides"), None);
    }
}
