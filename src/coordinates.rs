use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::cache::ItemKey;
use crate::errors::{AppError, AppResult};

/// Decimal places kept after normalization (~0.11 m at the equator).
pub const COORDINATE_PRECISION: i32 = 6;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Hemisphere {
    N,
    S,
    E,
    W,
}

impl Hemisphere {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_uppercase().as_str() {
            "N" => Some(Hemisphere::N),
            "S" => Some(Hemisphere::S),
            "E" => Some(Hemisphere::E),
            "W" => Some(Hemisphere::W),
            _ => None,
        }
    }

    pub fn sign(&self) -> f64 {
        match self {
            Hemisphere::S | Hemisphere::W => -1.0,
            Hemisphere::N | Hemisphere::E => 1.0,
        }
    }
}

/// Converts degrees/minutes/seconds plus a hemisphere letter into signed decimal
/// degrees rounded to [`COORDINATE_PRECISION`] places. Unknown references keep
/// the positive sign.
pub fn normalize(degrees: f64, minutes: f64, seconds: f64, reference: &str) -> f64 {
    let dd = degrees + minutes / 60.0 + seconds / 3600.0;
    let sign = match Hemisphere::parse(reference) {
        Some(hemisphere) => hemisphere.sign(),
        None => {
            debug!(reference, "unrecognized hemisphere reference; keeping sign");
            1.0
        }
    };
    round_to_precision(dd * sign)
}

/// Round-half-away-from-zero on the value scaled by 10^6.
pub fn round_to_precision(value: f64) -> f64 {
    let scale = 10_f64.powi(COORDINATE_PRECISION);
    (value * scale).round() / scale
}

/// One axis of a sexagesimal coordinate as the slideshow reports it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DmsValue {
    #[serde(default)]
    pub values: Vec<f64>,
    #[serde(default)]
    pub reference: String,
}

impl DmsValue {
    pub fn new(degrees: f64, minutes: f64, seconds: f64, reference: impl Into<String>) -> Self {
        Self {
            values: vec![degrees, minutes, seconds],
            reference: reference.into(),
        }
    }

    pub fn to_decimal(&self) -> f64 {
        let component = |idx: usize| self.values.get(idx).copied().unwrap_or(0.0);
        normalize(component(0), component(1), component(2), &self.reference)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Coordinate {
    pub latitude: f64,
    pub longitude: f64,
}

impl Coordinate {
    pub fn new(latitude: f64, longitude: f64) -> AppResult<Self> {
        if !latitude.is_finite() || !longitude.is_finite() {
            return Err(AppError::Validation(format!(
                "non-finite coordinate ({latitude}, {longitude})"
            )));
        }
        if !(-90.0..=90.0).contains(&latitude) {
            return Err(AppError::Validation(format!(
                "latitude {latitude} outside [-90, 90]"
            )));
        }
        if !(-180.0..=180.0).contains(&longitude) {
            return Err(AppError::Validation(format!(
                "longitude {longitude} outside [-180, 180]"
            )));
        }
        Ok(Self {
            latitude: round_to_precision(latitude),
            longitude: round_to_precision(longitude),
        })
    }
}

/// Inbound payload: `{ latitude, longitude, itemIdentifier? }`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GeocodeRequest {
    pub latitude: DmsValue,
    pub longitude: DmsValue,
    #[serde(default)]
    pub item_identifier: Option<String>,
}

impl GeocodeRequest {
    pub fn coordinate(&self) -> AppResult<Coordinate> {
        Coordinate::new(self.latitude.to_decimal(), self.longitude.to_decimal())
    }

    pub fn item_key(&self) -> Option<ItemKey> {
        self.item_identifier.as_deref().and_then(ItemKey::new)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_close(actual: f64, expected: f64) {
        assert!(
            (actual - expected).abs() < 1e-6,
            "expected {expected}, got {actual}"
        );
    }

    #[test]
    fn converts_dms_to_signed_decimal() {
        assert_close(normalize(48.0, 51.0, 29.7, "N"), 48.858250);
        assert_close(normalize(2.0, 17.0, 40.2, "W"), -2.294500);
        assert_close(normalize(33.0, 51.0, 54.0, "S"), -33.865);
        assert_close(normalize(151.0, 12.0, 36.0, "E"), 151.21);
    }

    #[test]
    fn normalization_is_idempotent() {
        for (d, m, s, r) in [
            (48.0, 51.0, 29.7, "N"),
            (2.0, 17.0, 40.2, "W"),
            (0.0, 0.0, 0.123456789, "S"),
            (179.0, 59.0, 59.99, "E"),
        ] {
            let once = normalize(d, m, s, r);
            let twice = normalize(once.abs(), 0.0, 0.0, if once < 0.0 { "S" } else { "N" });
            assert_close(twice, once);
            assert_eq!(round_to_precision(once), once);
        }
    }

    #[test]
    fn rounds_half_away_from_zero() {
        assert_eq!(round_to_precision(1.23456749), 1.234567);
        assert_eq!(round_to_precision(1.2345675001), 1.234568);
        assert_eq!(round_to_precision(-1.2345675001), -1.234568);
        for value in [0.1234565001, 48.85825, 2.2945004, 179.9999996] {
            assert_eq!(round_to_precision(-value), -round_to_precision(value));
        }
    }

    #[test]
    fn unknown_reference_keeps_sign() {
        assert_close(normalize(10.0, 30.0, 0.0, "X"), 10.5);
        assert_close(normalize(10.0, 30.0, 0.0, ""), 10.5);
        assert_close(normalize(10.0, 30.0, 0.0, " s "), -10.5);
    }

    #[test]
    fn decodes_request_payload() {
        let payload = serde_json::json!({
            "latitude": { "values": [48, 51, 29.7], "reference": "N" },
            "longitude": { "values": [2, 17], "reference": "E" },
            "itemIdentifier": "photo-1"
        });
        let request: GeocodeRequest = serde_json::from_value(payload).unwrap();
        let coordinate = request.coordinate().unwrap();
        assert_close(coordinate.latitude, 48.85825);
        assert_close(coordinate.longitude, 2.283333);
        assert_eq!(request.item_key().unwrap().as_str(), "photo-1");
    }

    #[test]
    fn rejects_out_of_range_coordinates() {
        let request = GeocodeRequest {
            latitude: DmsValue::new(95.0, 0.0, 0.0, "N"),
            longitude: DmsValue::new(2.0, 0.0, 0.0, "E"),
            item_identifier: None,
        };
        assert!(matches!(request.coordinate(), Err(AppError::Validation(_))));
        assert!(Coordinate::new(0.0, f64::NAN).is_err());
        assert!(Coordinate::new(-90.0, 180.0).is_ok());
    }
}
