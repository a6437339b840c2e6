//! Fare estimation
//!
//! A fare is a per-class base plus a distance and a time component. The time
//! is derived from the distance at a fixed average speed since no routing is
//! available. Amounts are rounded to cents.

use crate::models::RideClass;
use serde::{Deserialize, Serialize};

/// Pricing parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FareTable {
    pub economy_base: f64,
    pub comfort_base: f64,
    pub premium_base: f64,
    pub per_km: f64,
    pub per_minute: f64,
    pub average_speed_kmh: f64,
}

impl Default for FareTable {
    fn default() -> Self {
        Self {
            economy_base: 5.0,
            comfort_base: 8.0,
            premium_base: 12.0,
            per_km: 2.0,
            per_minute: 0.5,
            average_speed_kmh: 30.0,
        }
    }
}

impl FareTable {
    pub fn base(&self, class: RideClass) -> f64 {
        match class {
            RideClass::Economy => self.economy_base,
            RideClass::Comfort => self.comfort_base,
            RideClass::Premium => self.premium_base,
        }
    }

    /// Estimated minutes to cover `distance_km`
    pub fn minutes_for(&self, distance_km: f64) -> f64 {
        if self.average_speed_kmh > 0.0 {
            distance_km / self.average_speed_kmh * 60.0
        } else {
            0.0
        }
    }

    /// Price of a trip of `distance_km` in `class`
    ///
    /// Negative or non-finite distances are priced as zero.
    pub fn estimate(&self, distance_km: f64, class: RideClass) -> f64 {
        let distance = if distance_km.is_finite() {
            distance_km.max(0.0)
        } else {
            0.0
        };

        let amount = self.base(class)
            + distance * self.per_km
            + self.minutes_for(distance) * self.per_minute;

        round_money(amount)
    }
}

/// Round to two decimal places
pub fn round_money(amount: f64) -> f64 {
    (amount * 100.0).round() / 100.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(RideClass::Economy, 5.0)]
    #[case(RideClass::Comfort, 8.0)]
    #[case(RideClass::Premium, 12.0)]
    fn zero_distance_costs_the_base(#[case] class: RideClass, #[case] base: f64) {
        assert_eq!(FareTable::default().estimate(0.0, class), base);
    }

    #[test]
    fn ten_km_economy() {
        // 5 + 10 * 2 + 20 min * 0.5
        assert_eq!(FareTable::default().estimate(10.0, RideClass::Economy), 35.0);
    }

    #[test]
    fn rounds_to_cents() {
        let fare = FareTable::default().estimate(1.234, RideClass::Economy);
        // 5 + 2.468 + 1.234
        assert_eq!(fare, 8.7);
    }

    #[test]
    fn monotone_in_distance() {
        let table = FareTable::default();
        let mut previous = table.estimate(0.0, RideClass::Comfort);
        for step in 1..200 {
            let fare = table.estimate(step as f64 * 0.37, RideClass::Comfort);
            assert!(fare >= previous);
            previous = fare;
        }
    }

    #[test]
    fn bad_distances_price_as_zero() {
        let table = FareTable::default();
        assert_eq!(table.estimate(-3.0, RideClass::Economy), 5.0);
        assert_eq!(table.estimate(f64::NAN, RideClass::Economy), 5.0);
        assert_eq!(table.estimate(f64::INFINITY, RideClass::Economy), 5.0);
    }
}
