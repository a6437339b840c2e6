//! Domain records: users, rides and on-duty drivers

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::{fmt, str::FromStr};

/// Chat platform user id, kept opaque
pub type UserId = String;

/// Ride identifier (UUID v4 rendered as a string)
pub type RideId = String;

/// Returned when a stored string does not name a known variant
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown {kind}: {value}")]
pub struct UnknownVariant {
    pub kind: &'static str,
    pub value: String,
}

macro_rules! string_enum {
    ($name:ident, $kind:literal, { $($variant:ident => $text:literal),+ $(,)? }) => {
        impl $name {
            pub fn as_str(&self) -> &'static str {
                match self {
                    $($name::$variant => $text,)+
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $name {
            type Err = UnknownVariant;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($text => Ok($name::$variant),)+
                    other => Err(UnknownVariant {
                        kind: $kind,
                        value: other.to_string(),
                    }),
                }
            }
        }
    };
}

/// What a user does on the platform
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Customer,
    Driver,
    Admin,
}

string_enum!(Role, "role", {
    Customer => "customer",
    Driver => "driver",
    Admin => "admin",
});

/// Ride lifecycle status
///
/// `Completed`, `Cancelled` and `NoDrivers` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RideStatus {
    Pending,
    Accepted,
    OnTheWay,
    InProgress,
    Completed,
    Cancelled,
    NoDrivers,
}

string_enum!(RideStatus, "ride status", {
    Pending => "pending",
    Accepted => "accepted",
    OnTheWay => "on_the_way",
    InProgress => "in_progress",
    Completed => "completed",
    Cancelled => "cancelled",
    NoDrivers => "no_drivers",
});

impl RideStatus {
    pub const ALL: [RideStatus; 7] = [
        RideStatus::Pending,
        RideStatus::Accepted,
        RideStatus::OnTheWay,
        RideStatus::InProgress,
        RideStatus::Completed,
        RideStatus::Cancelled,
        RideStatus::NoDrivers,
    ];

    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            RideStatus::Completed | RideStatus::Cancelled | RideStatus::NoDrivers
        )
    }

    /// Statuses in which a driver is attached to the ride
    pub fn has_driver(self) -> bool {
        matches!(
            self,
            RideStatus::Accepted
                | RideStatus::OnTheWay
                | RideStatus::InProgress
                | RideStatus::Completed
        )
    }

    /// The only status a driver may move the ride to next
    pub fn driver_successor(self) -> Option<RideStatus> {
        match self {
            RideStatus::Accepted => Some(RideStatus::OnTheWay),
            RideStatus::OnTheWay => Some(RideStatus::InProgress),
            RideStatus::InProgress => Some(RideStatus::Completed),
            _ => None,
        }
    }
}

/// Vehicle tier requested by the customer
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RideClass {
    #[default]
    Economy,
    Comfort,
    Premium,
}

string_enum!(RideClass, "ride class", {
    Economy => "economy",
    Comfort => "comfort",
    Premium => "premium",
});

impl RideClass {
    pub const ALL: [RideClass; 3] = [RideClass::Economy, RideClass::Comfort, RideClass::Premium];

    /// Parse a class name, falling back to economy for anything unknown
    pub fn parse_or_default(value: &str) -> RideClass {
        value.parse().unwrap_or_default()
    }
}

/// Which side ended a ride
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CancelParty {
    Customer,
    Driver,
}

string_enum!(CancelParty, "cancelling party", {
    Customer => "customer",
    Driver => "driver",
});

/// A point on the globe in decimal degrees
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Location {
    pub latitude: f64,
    pub longitude: f64,
}

impl Location {
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
        }
    }

    /// Whether both coordinates are finite and inside their ranges
    pub fn is_valid(&self) -> bool {
        self.latitude.is_finite()
            && self.longitude.is_finite()
            && (-90.0..=90.0).contains(&self.latitude)
            && (-180.0..=180.0).contains(&self.longitude)
    }
}

/// A person known to the bot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub id: UserId,
    pub display_name: String,
    pub username: Option<String>,
    /// Unset until the user picks one from the role menu
    pub role: Option<Role>,
    pub balance: f64,
    /// Running mean of received ratings, 5.0 before the first one
    pub rating: f64,
    pub rating_count: u32,
    pub total_rides: u32,
    pub created_at: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
}

impl User {
    pub const DEFAULT_RATING: f64 = 5.0;

    pub fn new(
        id: impl Into<UserId>,
        display_name: impl Into<String>,
        username: Option<String>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: id.into(),
            display_name: display_name.into(),
            username,
            role: None,
            balance: 0.0,
            rating: Self::DEFAULT_RATING,
            rating_count: 0,
            total_rides: 0,
            created_at: now,
            last_seen: now,
        }
    }

    pub fn has_role(&self, role: Role) -> bool {
        self.role == Some(role)
    }
}

/// A ride request and everything that happened to it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Ride {
    pub id: RideId,
    pub customer_id: UserId,
    /// Set exactly while the status carries a driver
    pub driver_id: Option<UserId>,
    /// Driver that held the ride when it was cancelled after acceptance
    pub cancelled_driver_id: Option<UserId>,
    pub ride_class: RideClass,
    pub pickup: Location,
    pub destination: Option<Location>,
    pub status: RideStatus,
    /// Frozen at acceptance
    pub fare: Option<f64>,
    /// Trip distance the fare was computed from
    pub distance_km: Option<f64>,
    pub created_at: DateTime<Utc>,
    pub accepted_at: Option<DateTime<Utc>>,
    pub on_the_way_at: Option<DateTime<Utc>>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub cancelled_at: Option<DateTime<Utc>>,
    pub cancelled_by: Option<CancelParty>,
    /// Stars the customer gave the driver
    pub customer_rating: Option<u8>,
    /// Stars the driver gave the customer
    pub driver_rating: Option<u8>,
}

impl Ride {
    pub fn new(
        id: impl Into<RideId>,
        customer_id: impl Into<UserId>,
        ride_class: RideClass,
        pickup: Location,
        destination: Option<Location>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: id.into(),
            customer_id: customer_id.into(),
            driver_id: None,
            cancelled_driver_id: None,
            ride_class,
            pickup,
            destination,
            status: RideStatus::Pending,
            fare: None,
            distance_km: None,
            created_at: now,
            accepted_at: None,
            on_the_way_at: None,
            started_at: None,
            completed_at: None,
            cancelled_at: None,
            cancelled_by: None,
            customer_rating: None,
            driver_rating: None,
        }
    }

    /// Whether `user_id` took part in the ride on either side
    pub fn involves(&self, user_id: &str) -> bool {
        self.customer_id == user_id
            || self.driver_id.as_deref() == Some(user_id)
            || self.cancelled_driver_id.as_deref() == Some(user_id)
    }
}

/// Who left a post-completion rating
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RatingSide {
    /// The customer rates the driver
    ByCustomer,
    /// The driver rates the customer
    ByDriver,
}

/// A driver currently on duty
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActiveDriver {
    pub user_id: UserId,
    pub display_name: String,
    pub vehicle: Option<String>,
    /// Unknown until the first location ping
    pub location: Option<Location>,
    pub is_available: bool,
    pub last_active: DateTime<Utc>,
}

/// Headline ride figures for the dashboard
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RideStats {
    pub total: u64,
    pub by_status: Vec<(RideStatus, u64)>,
    /// Sum of fares over completed rides
    pub completed_revenue: f64,
}

impl RideStats {
    pub fn count(&self, status: RideStatus) -> u64 {
        self.by_status
            .iter()
            .find(|(s, _)| *s == status)
            .map(|(_, n)| *n)
            .unwrap_or(0)
    }
}

/// Number of users per role; `unassigned` have not picked one yet
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RoleCounts {
    pub customers: u64,
    pub drivers: u64,
    pub admins: u64,
    pub unassigned: u64,
}
