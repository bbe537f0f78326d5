use serde::{Deserialize, Serialize};

/// Mean Earth radius used for every great-circle computation.
pub const EARTH_RADIUS_KM: f64 = 6371.0;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinate {
    pub latitude: f64,
    pub longitude: f64,
}

impl Coordinate {
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
        }
    }

    /// Returns false for NaN/infinite components or anything outside
    /// [-90, 90] x [-180, 180].
    pub fn is_valid(&self) -> bool {
        self.latitude.is_finite()
            && self.longitude.is_finite()
            && (-90.0..=90.0).contains(&self.latitude)
            && (-180.0..=180.0).contains(&self.longitude)
    }

    pub fn validate(&self) -> Result<(), InvalidCoordinate> {
        if self.is_valid() {
            Ok(())
        } else {
            Err(InvalidCoordinate(*self))
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct InvalidCoordinate(pub Coordinate);

impl std::fmt::Display for InvalidCoordinate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "coordinate out of range: ({}, {})",
            self.0.latitude, self.0.longitude
        )
    }
}

impl std::error::Error for InvalidCoordinate {}

/// Great-circle distance in kilometres (haversine). Invalid input yields NaN;
/// callers are expected to reject it with [`Coordinate::validate`] first.
pub fn distance_km(a: Coordinate, b: Coordinate) -> f64 {
    if !a.is_valid() || !b.is_valid() {
        return f64::NAN;
    }
    let phi_a = a.latitude.to_radians();
    let phi_b = b.latitude.to_radians();
    let d_phi = (b.latitude - a.latitude).to_radians();
    let d_lambda = (b.longitude - a.longitude).to_radians();

    let h = (d_phi / 2.0).sin().powi(2)
        + phi_a.cos() * phi_b.cos() * (d_lambda / 2.0).sin().powi(2);
    // Rounding can push h a hair above 1 for antipodal points.
    let h = h.min(1.0);
    2.0 * EARTH_RADIUS_KM * h.sqrt().atan2((1.0 - h).sqrt())
}

/// Travel time in whole minutes at a constant average speed.
pub fn eta_minutes(distance_km: f64, average_speed_kmh: f64) -> f64 {
    (distance_km / average_speed_kmh * 60.0).round()
}
