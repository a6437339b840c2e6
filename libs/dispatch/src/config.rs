//! Tuning knobs for matching, expiry and retention

use crate::fare::FareTable;
use chrono::Duration;

/// How drivers are selected for a ride
#[derive(Debug, Clone, PartialEq)]
pub struct MatcherConfig {
    /// Drivers silent for longer than this are not offered rides
    pub freshness: Duration,
    pub max_radius_km: f64,
    pub max_candidates: usize,
}

impl Default for MatcherConfig {
    fn default() -> Self {
        Self {
            freshness: Duration::minutes(5),
            max_radius_km: 10.0,
            max_candidates: 50,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct DispatchConfig {
    pub matcher: MatcherConfig,
    pub fares: FareTable,
    /// Age after which a pending ride is re-matched or given up
    pub pending_timeout: Duration,
    /// On-duty drivers idle for longer than this are taken off duty
    pub driver_stale_after: Duration,
    /// Terminal rides older than this are deleted
    pub ride_retention: Duration,
    /// Users without activity for this long are deleted
    pub user_inactivity: Duration,
    /// Rides shown in a user's history
    pub history_limit: usize,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            matcher: MatcherConfig::default(),
            fares: FareTable::default(),
            pending_timeout: Duration::minutes(30),
            driver_stale_after: Duration::minutes(60),
            ride_retention: Duration::days(30),
            user_inactivity: Duration::days(90),
            history_limit: 10,
        }
    }
}
