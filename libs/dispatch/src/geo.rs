//! Great-circle distance

use crate::models::Location;

/// Mean Earth radius in kilometres
pub const EARTH_RADIUS_KM: f64 = 6371.0;

/// Haversine distance between two points in kilometres
pub fn distance_km(from: Location, to: Location) -> f64 {
    let lat1 = from.latitude.to_radians();
    let lat2 = to.latitude.to_radians();
    let dlat = (to.latitude - from.latitude).to_radians();
    let dlon = (to.longitude - from.longitude).to_radians();

    let h = (dlat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (dlon / 2.0).sin().powi(2);
    let c = 2.0 * h.sqrt().atan2((1.0 - h).sqrt());

    EARTH_RADIUS_KM * c
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_point_is_zero() {
        let p = Location::new(41.2995, 69.2401);
        assert_eq!(distance_km(p, p), 0.0);
    }

    #[test]
    fn one_degree_of_latitude() {
        let d = distance_km(Location::new(0.0, 0.0), Location::new(1.0, 0.0));
        assert!((d - 111.195).abs() < 0.01, "got {d}");
    }

    #[test]
    fn symmetric() {
        let a = Location::new(48.8566, 2.3522);
        let b = Location::new(51.5074, -0.1278);
        let d = distance_km(a, b);
        assert!((d - distance_km(b, a)).abs() < 1e-9);
        assert!((d - 343.5).abs() < 1.0, "Paris-London was {d}");
    }
}
