//! Chat event handling
//!
//! Turns inbound events into dispatch calls and answers the sender. Domain
//! errors end here as a friendly reply; nothing propagates back to the
//! webhook.

use crate::{
    conversation::SessionStore,
    events::{ChatEvent, Command, Inbound},
    menu,
};
use dispatch::{
    DispatchError, DispatchResult,
    accounts::AccountService,
    lifecycle::RideService,
    messages::{self, class_label, escape, money, status_label},
    models::{Location, RideStatus, Role, User},
    notify::{Button, ButtonAction, Keyboard, Notifier, OutgoingMessage, deliver},
    ports::Stores,
};
use std::sync::Arc;
use tracing::{debug, error, warn};

const TRY_LATER: &str = "⚠️ Something went wrong on our side. Please try again later.";

pub struct ChatHandler {
    rides: Arc<RideService>,
    accounts: Arc<AccountService>,
    stores: Stores,
    sessions: Arc<dyn SessionStore>,
    notifier: Arc<dyn Notifier>,
}

impl ChatHandler {
    pub fn new(
        rides: Arc<RideService>,
        accounts: Arc<AccountService>,
        stores: Stores,
        sessions: Arc<dyn SessionStore>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            rides,
            accounts,
            stores,
            sessions,
            notifier,
        }
    }

    pub async fn handle(&self, inbound: Inbound) {
        let Inbound { sender, event, .. } = inbound;

        let user = match self
            .accounts
            .register_contact(&sender.id, &sender.display_name, sender.username.as_deref())
            .await
        {
            Ok(user) => user,
            Err(e) => {
                error!("Failed to register {}: {}", sender.id, e);
                deliver(
                    self.notifier.as_ref(),
                    OutgoingMessage::text(sender.id, TRY_LATER),
                )
                .await;
                return;
            }
        };

        debug!("Handling {:?} from {}", event, user.id);
        let outcome = match event {
            ChatEvent::RoleSelected(role) => self.on_role(&user, role).await,
            ChatEvent::LocationShared(location) => self.on_location(&user, location).await,
            ChatEvent::ButtonPressed(action) => self.on_button(&user, action).await,
            ChatEvent::TextCommand(command) => self.on_command(&user, command).await,
        };

        let reply = match outcome {
            Ok(reply) => reply,
            Err(e) => Some(self.explain(&user, e)),
        };
        if let Some(reply) = reply {
            deliver(self.notifier.as_ref(), reply).await;
        }
    }

    fn explain(&self, user: &User, err: DispatchError) -> OutgoingMessage {
        let text = match &err {
            DispatchError::NotRegistered { .. } => {
                "This action is not available for your role. Use /start to pick one."
                    .to_string()
            }
            DispatchError::RoleNotAllowed { .. } => "You are not allowed to take that role.".into(),
            DispatchError::RoleChangeBlocked { .. } => {
                "Finish or cancel your current ride before switching roles.".into()
            }
            DispatchError::InvalidLocation => {
                "That location does not look right. Please share it again.".into()
            }
            DispatchError::RideNotFound { .. } => "That ride no longer exists.".into(),
            DispatchError::RideNotPending { status, .. } => match status {
                RideStatus::Cancelled => "This ride was already cancelled.".into(),
                RideStatus::Completed => "This ride is already finished.".into(),
                RideStatus::NoDrivers => "This ride request has expired.".into(),
                _ => "Too late, another driver already took this ride.".into(),
            },
            DispatchError::NotRideOwner { .. } => "This ride is not yours.".into(),
            DispatchError::InvalidTransition { from, .. } => format!(
                "That step is not possible right now, the ride is {}.",
                status_label(*from)
            ),
            DispatchError::NoOpenRide => "You have no open ride.".into(),
            DispatchError::OpenRideExists { .. } => {
                "You already have an open ride. Cancel it before requesting another.".into()
            }
            DispatchError::DriverBusy { .. } => "Finish your current ride first.".into(),
            DispatchError::InvalidRating(_) => "Ratings go from 1 to 5 stars.".into(),
            DispatchError::RideNotCompleted { .. } => {
                "You can rate a ride once it is completed.".into()
            }
            DispatchError::AlreadyRated { .. } => "You already rated this ride.".into(),
            DispatchError::StoreUnavailable(_) => TRY_LATER.into(),
        };

        match &err {
            DispatchError::NotRideOwner { .. } | DispatchError::InvalidTransition { .. } => {
                warn!("Rejected request from {}: {}", user.id, err)
            }
            DispatchError::StoreUnavailable(_) => error!("Store failure for {}: {}", user.id, err),
            _ => debug!("Refused request from {}: {}", user.id, err),
        }

        OutgoingMessage::text(user.id.clone(), text)
    }

    fn reply(&self, user: &User, text: impl Into<String>) -> OutgoingMessage {
        OutgoingMessage::text(user.id.clone(), text)
    }

    fn with_menu(&self, user: &User, text: impl Into<String>) -> OutgoingMessage {
        self.reply(user, text)
            .with_keyboard(menu::menu_for(user.role))
    }

    async fn on_role(&self, user: &User, role: Role) -> DispatchResult<Option<OutgoingMessage>> {
        let user = self.accounts.select_role(&user.id, role).await?;
        let text = match role {
            Role::Customer => {
                "🧍 You are registered as a customer.\nPress \"Request ride\" or simply send your pickup location."
            }
            Role::Driver => {
                "🚗 You are registered as a driver.\nStart your duty and share your location to receive ride offers."
            }
            Role::Admin => "🛠 You are registered as an admin.",
        };
        Ok(Some(self.with_menu(&user, text)))
    }

    async fn on_location(
        &self,
        user: &User,
        location: Location,
    ) -> DispatchResult<Option<OutgoingMessage>> {
        match user.role {
            Some(Role::Driver) => {
                let driver = self
                    .accounts
                    .update_driver_location(&user.id, location)
                    .await?;
                let text = if driver.is_available {
                    "📍 Location updated. You will receive offers for rides nearby."
                } else {
                    "📍 Location updated."
                };
                Ok(Some(self.reply(user, text)))
            }
            Some(Role::Customer) => {
                let class = match self.sessions.take_class(&user.id).await {
                    Ok(class) => class.unwrap_or_default(),
                    Err(e) => {
                        warn!("Could not read class choice of {}: {}", user.id, e);
                        Default::default()
                    }
                };
                let created = self
                    .rides
                    .create_ride(&user.id, location, class, None)
                    .await?;
                Ok(Some(
                    self.reply(user, messages::searching(&created.ride, created.notified))
                        .with_keyboard(Keyboard::Inline(vec![vec![Button::new(
                            "❌ Cancel",
                            ButtonAction::Cancel(created.ride.id.clone()),
                        )]])),
                ))
            }
            Some(Role::Admin) | None => Ok(Some(self.with_menu(
                user,
                "Choose whether you ride or drive before sharing a location.",
            ))),
        }
    }

    async fn on_button(
        &self,
        user: &User,
        action: ButtonAction,
    ) -> DispatchResult<Option<OutgoingMessage>> {
        match action {
            ButtonAction::Accept(ride_id) => {
                self.rides.accept_ride(&ride_id, &user.id).await?;
                Ok(None)
            }
            ButtonAction::Reject(ride_id) => {
                self.rides.reject_ride(&ride_id, &user.id).await?;
                Ok(Some(self.reply(user, "🙅 Offer declined.")))
            }
            ButtonAction::Advance { ride_id, target } => {
                self.rides.advance_ride(&ride_id, &user.id, target).await?;
                Ok(None)
            }
            ButtonAction::Cancel(ride_id) => {
                self.rides.cancel_ride(&ride_id, &user.id).await?;
                Ok(Some(self.with_menu(user, "❌ Ride cancelled.")))
            }
            ButtonAction::Rate { ride_id, stars } => {
                self.rides.rate_ride(&ride_id, &user.id, stars).await?;
                Ok(Some(self.reply(user, "🙏 Thanks for your feedback!")))
            }
            ButtonAction::ChooseClass(class) => {
                if !user.has_role(Role::Customer) {
                    return Err(DispatchError::NotRegistered {
                        user_id: user.id.clone(),
                    });
                }
                if let Err(e) = self.sessions.remember_class(&user.id, class).await {
                    warn!("Could not store class choice of {}: {}", user.id, e);
                }
                Ok(Some(self.with_menu(
                    user,
                    format!(
                        "{} selected. Now send your pickup location.",
                        class_label(class)
                    ),
                )))
            }
        }
    }

    async fn on_command(
        &self,
        user: &User,
        command: Command,
    ) -> DispatchResult<Option<OutgoingMessage>> {
        match command {
            Command::Start => {
                let text = match user.role {
                    None => format!(
                        "👋 Welcome, {}! Are you looking for a ride or offering one?",
                        escape(&user.display_name)
                    ),
                    Some(role) => format!(
                        "👋 Welcome back, {}! You are signed in as a {}.",
                        escape(&user.display_name),
                        role
                    ),
                };
                Ok(Some(self.with_menu(user, text)))
            }
            Command::SwitchRole => Ok(Some(
                self.reply(user, "Pick your role:")
                    .with_keyboard(menu::role_menu(self.accounts.is_admin(&user.id))),
            )),
            Command::Help => Ok(Some(self.with_menu(
                user,
                "Customers: request a ride and share the pickup location.\n\
                 Drivers: start duty and share your location to get offers.\n\
                 /history lists your rides, /profile shows your rating and balance, \
                 /cancel cancels your open ride.",
            ))),
            Command::RequestRide => {
                if !user.has_role(Role::Customer) {
                    return Err(DispatchError::NotRegistered {
                        user_id: user.id.clone(),
                    });
                }
                if let Some(open) = self.rides.open_ride(&user.id).await? {
                    return Err(DispatchError::OpenRideExists { ride_id: open.id });
                }
                Ok(Some(
                    self.reply(user, "Which class would you like?")
                        .with_keyboard(menu::class_picker()),
                ))
            }
            Command::StartDuty => {
                let driver = self.accounts.start_duty(&user.id, None).await?;
                let text = if driver.location.is_some() {
                    "🟢 You are on duty."
                } else {
                    "🟢 You are on duty. Share your location so customers nearby can find you."
                };
                Ok(Some(self.with_menu(user, text)))
            }
            Command::StopDuty => {
                let text = if self.accounts.stop_duty(&user.id).await? {
                    "🔴 You are off duty."
                } else {
                    "You were not on duty."
                };
                Ok(Some(self.with_menu(user, text)))
            }
            Command::History => {
                let rides = self.rides.history(&user.id).await?;
                let text = if rides.is_empty() {
                    "You have no rides yet.".to_string()
                } else {
                    let lines: Vec<String> = rides
                        .iter()
                        .map(|ride| messages::ride_line(ride, &user.id))
                        .collect();
                    format!("📜 <b>Your rides</b>\n{}", lines.join("\n"))
                };
                Ok(Some(self.reply(user, text)))
            }
            Command::Profile => self.profile(user).await.map(Some),
            Command::CancelRide => {
                self.rides.cancel_open_ride(&user.id).await?;
                Ok(Some(self.with_menu(user, "❌ Ride cancelled.")))
            }
            Command::Stats => self.stats(user).await.map(Some),
            Command::Unknown(_) => Ok(Some(self.with_menu(
                user,
                "I did not understand that. Please use the menu below.",
            ))),
        }
    }

    async fn profile(&self, user: &User) -> DispatchResult<OutgoingMessage> {
        let profile = self.accounts.profile(&user.id).await?;
        let mut text = format!(
            "👤 <b>{}</b>\nRole: {}\nRating: {:.1} ⭐ ({} votes)\nRides: {}\nBalance: {}",
            escape(&profile.display_name),
            profile
                .role
                .map(|r| r.to_string())
                .unwrap_or_else(|| "not chosen".to_string()),
            profile.rating,
            profile.rating_count,
            profile.total_rides,
            money(profile.balance)
        );
        if profile.has_role(Role::Driver) {
            let duty = match self.accounts.duty_status(&user.id).await? {
                Some(d) if d.is_available => "on duty, available",
                Some(_) => "on duty, busy",
                None => "off duty",
            };
            text.push_str(&format!("\nStatus: {}", duty));
        }
        if let Some(open) = self.rides.open_ride(&user.id).await? {
            text.push_str(&format!("\nOpen ride: {}", status_label(open.status)));
        }
        Ok(self.reply(user, text))
    }

    async fn stats(&self, user: &User) -> DispatchResult<OutgoingMessage> {
        if !user.has_role(Role::Admin) {
            return Err(DispatchError::NotRegistered {
                user_id: user.id.clone(),
            });
        }

        let rides = self.stores.rides.stats().await?;
        let roles = self.stores.users.role_counts().await?;
        let available = self.rides.available_drivers().await?.len();

        let mut text = format!(
            "📊 <b>Statistics</b>\nRides: {}\nRevenue: {}\nAvailable drivers: {}\n\
             Customers: {} · Drivers: {} · Admins: {}",
            rides.total,
            money(rides.completed_revenue),
            available,
            roles.customers,
            roles.drivers,
            roles.admins
        );
        for (status, count) in &rides.by_status {
            text.push_str(&format!("\n  {}: {}", status_label(*status), count));
        }
        Ok(self.reply(user, text))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{conversation, events::Sender, menu::parse_text};
    use dispatch::{
        models::RideClass,
        testing::{World, north_of_pickup, pickup},
    };

    struct Bot {
        world: World,
        handler: ChatHandler,
    }

    fn bot() -> Bot {
        let world = World::new();
        let handler = ChatHandler::new(
            world.rides.clone(),
            world.accounts.clone(),
            world.stores.clone(),
            conversation::in_memory(),
            world.notifier.clone(),
        );
        Bot { world, handler }
    }

    impl Bot {
        async fn send(&self, user_id: &str, event: ChatEvent) {
            self.handler
                .handle(Inbound {
                    sender: Sender {
                        id: user_id.to_string(),
                        display_name: format!("Person {user_id}"),
                        username: None,
                    },
                    event,
                    callback_id: None,
                })
                .await;
        }

        async fn say(&self, user_id: &str, text: &str) {
            self.send(user_id, parse_text(text)).await;
        }

        async fn press(&self, user_id: &str, action: ButtonAction) {
            self.send(user_id, ChatEvent::ButtonPressed(action)).await;
        }

        fn last_text(&self, user_id: &str) -> String {
            self.world
                .notifier
                .last_for(user_id)
                .map(|m| m.text)
                .unwrap_or_default()
        }
    }

    #[tokio::test]
    async fn start_offers_the_role_menu() {
        let bot = bot();
        bot.say("100", "/start").await;

        let reply = bot.world.notifier.last_for("100").unwrap();
        assert!(reply.text.contains("Welcome, Person 100"));
        assert_eq!(reply.keyboard, menu::role_menu(false));
    }

    #[tokio::test]
    async fn full_ride_through_the_chat() {
        let bot = bot();
        bot.say("200", menu::DRIVER).await;
        bot.say("200", menu::START_DUTY).await;
        bot.send("200", ChatEvent::LocationShared(north_of_pickup(1.0)))
            .await;
        assert!(bot.last_text("200").contains("receive offers"));

        bot.say("100", menu::CUSTOMER).await;
        bot.say("100", menu::REQUEST_RIDE).await;
        bot.press("100", ButtonAction::ChooseClass(RideClass::Comfort))
            .await;
        bot.send("100", ChatEvent::LocationShared(pickup())).await;
        assert!(bot.last_text("100").contains("1 driver(s) notified"));

        let ride = bot.world.rides.open_ride("100").await.unwrap().unwrap();
        assert_eq!(ride.ride_class, RideClass::Comfort);

        bot.press("200", ButtonAction::Accept(ride.id.clone())).await;
        for target in [
            RideStatus::OnTheWay,
            RideStatus::InProgress,
            RideStatus::Completed,
        ] {
            bot.press(
                "200",
                ButtonAction::Advance {
                    ride_id: ride.id.clone(),
                    target,
                },
            )
            .await;
        }
        assert!(bot.last_text("100").contains("Trip completed"));

        bot.press(
            "100",
            ButtonAction::Rate {
                ride_id: ride.id.clone(),
                stars: 5,
            },
        )
        .await;
        assert!(bot.last_text("100").contains("Thanks"));

        bot.say("200", "/profile").await;
        let profile = bot.last_text("200");
        assert!(profile.contains("Rides: 1"));
        assert!(profile.contains("on duty, available"));
    }

    #[tokio::test]
    async fn losing_driver_is_told_politely() {
        let bot = bot();
        for driver in ["201", "202"] {
            bot.say(driver, menu::DRIVER).await;
            bot.send(driver, ChatEvent::LocationShared(north_of_pickup(0.5)))
                .await;
        }
        bot.say("100", menu::CUSTOMER).await;
        bot.send("100", ChatEvent::LocationShared(pickup())).await;
        let ride = bot.world.rides.open_ride("100").await.unwrap().unwrap();

        bot.press("201", ButtonAction::Accept(ride.id.clone())).await;
        bot.press("202", ButtonAction::Accept(ride.id.clone())).await;

        assert!(bot.last_text("202").contains("another driver"));
        let stored = bot.world.rides.open_ride("100").await.unwrap().unwrap();
        assert_eq!(stored.driver_id.as_deref(), Some("201"));
    }

    #[tokio::test]
    async fn double_cancel_reports_already_cancelled() {
        let bot = bot();
        bot.say("100", menu::CUSTOMER).await;
        bot.send("100", ChatEvent::LocationShared(pickup())).await;
        let ride = bot.world.rides.open_ride("100").await.unwrap().unwrap();

        bot.press("100", ButtonAction::Cancel(ride.id.clone())).await;
        assert!(bot.last_text("100").contains("Ride cancelled"));
        bot.press("100", ButtonAction::Cancel(ride.id.clone())).await;
        assert!(bot.last_text("100").contains("already cancelled"));
    }

    #[tokio::test]
    async fn customers_cannot_use_driver_commands() {
        let bot = bot();
        bot.say("100", menu::CUSTOMER).await;
        bot.say("100", menu::START_DUTY).await;
        assert!(bot.last_text("100").contains("not available for your role"));

        bot.say("100", "/stats").await;
        assert!(bot.last_text("100").contains("not available for your role"));
    }

    #[tokio::test]
    async fn admins_see_statistics() {
        let bot = bot();
        bot.say("1", "/admin").await;
        bot.say("1", menu::STATS).await;
        let text = bot.last_text("1");
        assert!(text.contains("Statistics"));
        assert!(text.contains("Admins: 1"));
        assert!(text.contains("Available drivers: 0"));

        bot.world.driver_at("200", 1.0).await;
        bot.say("1", "/stats").await;
        assert!(bot.last_text("1").contains("Available drivers: 1"));

        bot.say("2", "/admin").await;
        assert!(bot.last_text("2").contains("not allowed"));
    }

    #[tokio::test]
    async fn request_without_drivers_says_so_right_away() {
        let bot = bot();
        bot.say("100", menu::CUSTOMER).await;
        bot.send("100", ChatEvent::LocationShared(pickup())).await;

        let reply = bot.world.notifier.last_for("100").unwrap();
        assert!(reply.text.contains("no drivers are nearby right now"));
        let ride = bot.world.rides.open_ride("100").await.unwrap().unwrap();
        assert_eq!(ride.status, RideStatus::Pending);
        assert_eq!(ride.driver_id, None);
        assert_eq!(ride.fare, None);
    }

    #[tokio::test]
    async fn history_lists_past_rides() {
        let bot = bot();
        bot.say("100", menu::CUSTOMER).await;
        bot.say("100", menu::HISTORY).await;
        assert_eq!(bot.last_text("100"), "You have no rides yet.");

        bot.send("100", ChatEvent::LocationShared(pickup())).await;
        bot.say("100", "/cancel").await;
        bot.say("100", "/history").await;
        assert!(bot.last_text("100").contains("cancelled"));
    }

    #[tokio::test]
    async fn gibberish_gets_the_menu_back() {
        let bot = bot();
        bot.say("100", menu::CUSTOMER).await;
        bot.say("100", "hello?").await;
        let reply = bot.world.notifier.last_for("100").unwrap();
        assert!(reply.text.contains("did not understand"));
        assert_eq!(reply.keyboard, menu::menu_for(Some(Role::Customer)));
    }
}
