//! Texts sent to customers and drivers
//!
//! Messages use Telegram-style HTML markup, so user-provided strings go
//! through [`escape`].

use crate::{
    models::{CancelParty, Ride, RideClass, RideStatus, User},
    notify::{Button, ButtonAction, Keyboard, OutgoingMessage},
};

pub fn escape(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

pub fn money(amount: f64) -> String {
    format!("${:.2}", amount)
}

pub fn class_label(class: RideClass) -> &'static str {
    match class {
        RideClass::Economy => "Economy",
        RideClass::Comfort => "Comfort",
        RideClass::Premium => "Premium",
    }
}

pub fn status_label(status: RideStatus) -> &'static str {
    match status {
        RideStatus::Pending => "waiting for a driver",
        RideStatus::Accepted => "accepted",
        RideStatus::OnTheWay => "driver on the way",
        RideStatus::InProgress => "in progress",
        RideStatus::Completed => "completed",
        RideStatus::Cancelled => "cancelled",
        RideStatus::NoDrivers => "no drivers found",
    }
}

fn short_id(ride: &Ride) -> &str {
    ride.id.get(..8).unwrap_or(&ride.id)
}

fn rating_row(ride: &Ride) -> Vec<Vec<Button>> {
    vec![
        (1..=5)
            .map(|stars| {
                Button::new(
                    "⭐".repeat(stars as usize),
                    ButtonAction::Rate {
                        ride_id: ride.id.clone(),
                        stars,
                    },
                )
            })
            .collect(),
    ]
}

fn cancel_button(ride: &Ride) -> Button {
    Button::new("❌ Cancel", ButtonAction::Cancel(ride.id.clone()))
}

/// Offer sent to a candidate driver
pub fn ride_offer(driver_id: &str, ride: &Ride, fare: f64, pickup_km: f64) -> OutgoingMessage {
    let mut text = format!(
        "🚕 <b>New ride request</b> ({})\n\
         Pickup: {:.1} km away\n\
         Estimated fare: <b>{}</b>",
        class_label(ride.ride_class),
        pickup_km,
        money(fare)
    );
    if ride.destination.is_some() {
        text.push_str("\nDestination provided");
    }

    OutgoingMessage::text(driver_id, text).with_keyboard(Keyboard::Inline(vec![vec![
        Button::new("✅ Accept", ButtonAction::Accept(ride.id.clone())),
        Button::new("🙅 Reject", ButtonAction::Reject(ride.id.clone())),
    ]]))
}

/// Tells the customer what happened right after the request
pub fn searching(ride: &Ride, notified: usize) -> String {
    if notified == 0 {
        format!(
            "🔎 Ride <code>{}</code> created, but no drivers are nearby right now. \
             We will keep looking for a while.",
            short_id(ride)
        )
    } else {
        format!(
            "🔎 Ride <code>{}</code> created. {} driver(s) notified, waiting for one to accept.",
            short_id(ride),
            notified
        )
    }
}

pub fn ride_accepted(ride: &Ride, driver: &User, vehicle: Option<&str>) -> OutgoingMessage {
    let mut text = format!(
        "✅ <b>{}</b> accepted your ride.\nRating: {:.1} ⭐",
        escape(&driver.display_name),
        driver.rating
    );
    if let Some(vehicle) = vehicle {
        text.push_str(&format!("\nVehicle: {}", escape(vehicle)));
    }
    if let Some(fare) = ride.fare {
        text.push_str(&format!("\nFare: <b>{}</b>", money(fare)));
    }

    OutgoingMessage::text(ride.customer_id.clone(), text)
        .with_keyboard(Keyboard::Inline(vec![vec![cancel_button(ride)]]))
}

/// Next-step controls for the attached driver
pub fn driver_controls(driver_id: &str, ride: &Ride) -> OutgoingMessage {
    let (text, next) = match ride.status {
        RideStatus::Accepted => (
            format!(
                "You accepted ride <code>{}</code>. Fare: <b>{}</b>\nHead to the pickup point.",
                short_id(ride),
                money(ride.fare.unwrap_or_default())
            ),
            Some(("🚗 On my way", RideStatus::OnTheWay)),
        ),
        RideStatus::OnTheWay => (
            "Let the customer know when the trip starts.".to_string(),
            Some(("▶️ Start trip", RideStatus::InProgress)),
        ),
        RideStatus::InProgress => (
            "Trip in progress.".to_string(),
            Some(("🏁 Complete trip", RideStatus::Completed)),
        ),
        _ => (format!("Ride is {}.", status_label(ride.status)), None),
    };

    let keyboard = match next {
        Some((label, target)) => {
            let advance = Button::new(
                label,
                ButtonAction::Advance {
                    ride_id: ride.id.clone(),
                    target,
                },
            );
            if target == RideStatus::Completed {
                Keyboard::Inline(vec![vec![advance]])
            } else {
                Keyboard::Inline(vec![vec![advance, cancel_button(ride)]])
            }
        }
        None => Keyboard::None,
    };

    OutgoingMessage::text(driver_id, text).with_keyboard(keyboard)
}

/// Customer update after the driver moved the ride forward
pub fn phase_update(ride: &Ride) -> OutgoingMessage {
    let customer = ride.customer_id.clone();
    match ride.status {
        RideStatus::OnTheWay => {
            OutgoingMessage::text(customer, "🚗 Your driver is on the way to the pickup point.")
                .with_keyboard(Keyboard::Inline(vec![vec![cancel_button(ride)]]))
        }
        RideStatus::InProgress => OutgoingMessage::text(customer, "▶️ Your trip has started."),
        RideStatus::Completed => OutgoingMessage::text(
            customer,
            format!(
                "🏁 Trip completed. Fare: <b>{}</b>\nHow was your driver?",
                money(ride.fare.unwrap_or_default())
            ),
        )
        .with_keyboard(Keyboard::Inline(rating_row(ride))),
        other => OutgoingMessage::text(customer, format!("Ride is {}.", status_label(other))),
    }
}

/// Driver summary once the trip is completed
pub fn driver_completed(driver_id: &str, ride: &Ride) -> OutgoingMessage {
    OutgoingMessage::text(
        driver_id,
        format!(
            "🏁 Trip completed. {} added to your balance.\nHow was your passenger?",
            money(ride.fare.unwrap_or_default())
        ),
    )
    .with_keyboard(Keyboard::Inline(rating_row(ride)))
}

pub fn ride_cancelled(recipient: &str, ride: &Ride) -> OutgoingMessage {
    let by = match ride.cancelled_by {
        Some(CancelParty::Customer) => "by the customer",
        Some(CancelParty::Driver) => "by the driver",
        None => "",
    };
    OutgoingMessage::text(
        recipient,
        format!("❌ Ride <code>{}</code> was cancelled {}.", short_id(ride), by)
            .replace(" .", "."),
    )
}

pub fn no_drivers(ride: &Ride) -> OutgoingMessage {
    OutgoingMessage::text(
        ride.customer_id.clone(),
        format!(
            "😔 No driver accepted ride <code>{}</code>. Please try again later.",
            short_id(ride)
        ),
    )
}

/// One line per ride for history listings
pub fn ride_line(ride: &Ride, viewer: &str) -> String {
    let role = if ride.customer_id == viewer {
        "🧍"
    } else {
        "🚗"
    };
    let fare = ride
        .fare
        .map(money)
        .unwrap_or_else(|| "-".to_string());
    format!(
        "{} {} · {} · {} · {}",
        role,
        ride.created_at.format("%Y-%m-%d %H:%M"),
        class_label(ride.ride_class),
        status_label(ride.status),
        fare
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Location;
    use chrono::Utc;

    fn ride() -> Ride {
        Ride::new(
            "0f8fad5b-d9cb-469f-a165-70867728950e",
            "c1",
            RideClass::Comfort,
            Location::new(41.3, 69.2),
            None,
            Utc::now(),
        )
    }

    #[test]
    fn offer_carries_accept_and_reject() {
        let ride = ride();
        let message = ride_offer("d1", &ride, 12.5, 1.24);
        assert_eq!(message.recipient, "d1");
        assert!(message.text.contains("$12.50"));
        assert!(message.text.contains("1.2 km"));
        let Keyboard::Inline(rows) = message.keyboard else {
            panic!("offer should carry inline buttons");
        };
        assert_eq!(rows[0][0].action, ButtonAction::Accept(ride.id.clone()));
        assert_eq!(rows[0][1].action, ButtonAction::Reject(ride.id.clone()));
    }

    #[test]
    fn completion_asks_for_rating() {
        let mut ride = ride();
        ride.status = RideStatus::Completed;
        ride.fare = Some(20.0);
        let Keyboard::Inline(rows) = phase_update(&ride).keyboard else {
            panic!("completion should ask for a rating");
        };
        assert_eq!(rows[0].len(), 5);
    }

    #[test]
    fn cancellation_text_names_the_party() {
        let mut ride = ride();
        ride.cancelled_by = Some(CancelParty::Driver);
        assert!(ride_cancelled("c1", &ride).text.ends_with("by the driver."));

        ride.cancelled_by = None;
        assert!(ride_cancelled("c1", &ride).text.ends_with("cancelled."));
    }

    #[test]
    fn names_are_escaped() {
        assert_eq!(escape("<b>Tom & Jerry</b>"), "&lt;b&gt;Tom &amp; Jerry&lt;/b&gt;");
    }
}
