/// Great-circle distance between two WGS84 coordinates, in kilometres.
pub fn haversine_km(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    let r = 6371.0;
    let d_lat = (lat2 - lat1).to_radians();
    let d_lon = (lon2 - lon1).to_radians();
    let a = (d_lat / 2.0).sin().powi(2)
        + lat1.to_radians().cos() * lat2.to_radians().cos() * (d_lon / 2.0).sin().powi(2);
    let c = 2.0 * a.sqrt().atan2((1.0 - a).sqrt());
    r * c
}

/// Same distance in metres, for radius checks against provider stop searches.
pub fn haversine_m(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    haversine_km(lat1, lon1, lat2, lon2) * 1000.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_distance_for_identical_points() {
        assert!(haversine_km(51.5074, -0.1278, 51.5074, -0.1278) < 1e-9);
    }

    #[test]
    fn symmetric_in_its_arguments() {
        // Ladbroke Grove <-> Canary Wharf
        let d1 = haversine_km(51.516, -0.176, 51.504, -0.019);
        let d2 = haversine_km(51.504, -0.019, 51.516, -0.176);
        assert!((d1 - d2).abs() < 1e-9);
    }

    #[test]
    fn known_london_crossing() {
        // Ladbroke Grove to Canary Wharf is a touch under 11 km as the crow flies.
        let d = haversine_km(51.516, -0.176, 51.504, -0.019);
        assert!(d > 10.0 && d < 12.0, "unexpected distance {d}");
    }
}
