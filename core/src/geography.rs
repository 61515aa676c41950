//! Location-derived features: distance to the nearest major metro and
//! cost-of-living adjustment of earnings by state price parity.

const EARTH_RADIUS_MILES: f64 = 3959.0;

/// Metropolitan areas with combined population above 500k.
const MAJOR_METROS: [(f64, f64); 15] = [
    (40.7128, -74.0060),  // New York
    (34.0522, -118.2437), // Los Angeles
    (41.8781, -87.6298),  // Chicago
    (29.7604, -95.3698),  // Houston
    (33.4484, -112.0740), // Phoenix
    (39.9526, -75.1652),  // Philadelphia
    (29.4241, -98.4936),  // San Antonio
    (32.7767, -96.7970),  // Dallas
    (37.5485, -121.9886), // San Jose
    (30.2672, -97.7431),  // Austin
    (47.6062, -122.3321), // Seattle
    (33.7490, -84.3880),  // Atlanta
    (42.3601, -71.0589),  // Boston
    (25.7617, -80.1918),  // Miami
    (38.9072, -77.0369),  // Washington DC
];

/// BEA regional price parities by state (100 = national average).
const PRICE_PARITY: [(&str, f64); 54] = [
    ("AL", 88.1), ("AK", 105.4), ("AZ", 97.8), ("AR", 87.8), ("CA", 115.5),
    ("CO", 103.0), ("CT", 109.0), ("DE", 101.5), ("DC", 117.0), ("FL", 100.5),
    ("GA", 93.5), ("HI", 119.2), ("ID", 94.3), ("IL", 97.8), ("IN", 90.9),
    ("IA", 90.2), ("KS", 90.1), ("KY", 89.4), ("LA", 91.0), ("ME", 97.5),
    ("MD", 108.6), ("MA", 110.8), ("MI", 93.1), ("MN", 97.8), ("MS", 86.8),
    ("MO", 89.8), ("MT", 94.2), ("NE", 91.5), ("NV", 98.2), ("NH", 105.8),
    ("NJ", 114.5), ("NM", 93.5), ("NY", 115.9), ("NC", 92.5), ("ND", 93.4),
    ("OH", 90.8), ("OK", 89.6), ("OR", 101.0), ("PA", 97.2), ("RI", 101.1),
    ("SC", 90.1), ("SD", 91.0), ("TN", 91.0), ("TX", 97.4), ("UT", 98.5),
    ("VT", 101.0), ("VA", 103.6), ("WA", 106.4), ("WV", 88.0), ("WI", 93.8),
    ("WY", 96.2), ("PR", 85.0), ("GU", 100.0), ("VI", 100.0),
];

/// Great-circle distance in miles.
pub fn haversine_miles(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    let (lat1, lon1, lat2, lon2) = (
        lat1.to_radians(),
        lon1.to_radians(),
        lat2.to_radians(),
        lon2.to_radians(),
    );
    let dlat = lat2 - lat1;
    let dlon = lon2 - lon1;
    let a = (dlat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (dlon / 2.0).sin().powi(2);
    2.0 * EARTH_RADIUS_MILES * a.sqrt().asin()
}

/// Distance from a campus to the closest major metro.
pub fn nearest_metro_miles(lat: f64, lon: f64) -> Option<f64> {
    if !lat.is_finite() || !lon.is_finite() {
        return None;
    }
    MAJOR_METROS
        .iter()
        .map(|(mlat, mlon)| haversine_miles(lat, lon, *mlat, *mlon))
        .min_by(|a, b| a.total_cmp(b))
}

/// Regional price parity for a two-letter state code; unknown states are national average.
pub fn state_price_parity(state: &str) -> f64 {
    let code = state.trim().to_ascii_uppercase();
    PRICE_PARITY
        .iter()
        .find(|(s, _)| *s == code)
        .map_or(100.0, |(_, rpp)| *rpp)
}

/// Earnings expressed in national-average purchasing power.
pub fn adjust_earnings(earnings: f64, state: &str) -> Option<f64> {
    (earnings > 0.0).then(|| earnings * 100.0 / state_price_parity(state))
}
