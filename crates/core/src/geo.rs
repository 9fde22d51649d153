//! Geodetic point codec.
//!
//! Rows arrive with their `coordinate` column in one of two shapes:
//! - a GeoJSON-style object: `{"type": "Point", "coordinates": [lon, lat]}`
//! - a hex string of a little-endian EWKB point with SRID, e.g.
//!   `0101000020E6100000` followed by 8 bytes of longitude and 8 of latitude.
//!
//! Writes always go out as `SRID=4326;POINT(<lon> <lat>)`.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::errors::{ConsoleError, Result};

/// Hex offset where the coordinate payload starts (byte order + type + SRID).
const HEX_COORDS_OFFSET: usize = 18;
/// Hex characters per IEEE-754 double.
const HEX_F64_LEN: usize = 16;
/// Shortest hex string that still covers both coordinates.
pub const MIN_HEX_POINT_LEN: usize = HEX_COORDS_OFFSET + 2 * HEX_F64_LEN;

/// Header for a little-endian EWKB point carrying SRID 4326.
const EWKB_POINT_4326_HEADER: &str = "0101000020E6100000";

/// A latitude/longitude pair in WGS84 degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub latitude: f64,
    pub longitude: f64,
}

impl GeoPoint {
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
        }
    }

    /// Parse form input. Both values must be finite numbers.
    pub fn parse(latitude: &str, longitude: &str) -> Result<Self> {
        let lat = latitude.trim().parse::<f64>();
        let lon = longitude.trim().parse::<f64>();
        match (lat, lon) {
            (Ok(lat), Ok(lon)) => Ok(Self::new(lat, lon)),
            _ => Err(ConsoleError::validation("invalid coordinates")),
        }
    }

    /// Check that both coordinates are finite and inside WGS84 bounds.
    pub fn validate(&self) -> Result<()> {
        if !self.latitude.is_finite() || !self.longitude.is_finite() {
            return Err(ConsoleError::validation("invalid coordinates"));
        }
        if !(-90.0..=90.0).contains(&self.latitude) || !(-180.0..=180.0).contains(&self.longitude)
        {
            return Err(ConsoleError::validation("coordinates out of range"));
        }
        Ok(())
    }

    fn in_bounds(&self) -> bool {
        self.validate().is_ok()
    }
}

/// Decode a wire point. Unknown or malformed shapes yield `None`.
pub fn decode(wire: &Value) -> Option<GeoPoint> {
    match wire {
        Value::String(hex) => decode_hex(hex),
        Value::Object(map) => {
            let coords = map.get("coordinates")?.as_array()?;
            if coords.len() < 2 {
                return None;
            }
            let point = GeoPoint::new(coords[1].as_f64()?, coords[0].as_f64()?);
            point.in_bounds().then_some(point)
        }
        _ => None,
    }
}

/// Decode the legacy hex encoding.
///
/// Longitude lives at hex offsets `[18, 34)`, latitude at `[34, 50)`. Strings
/// shorter than that are rejected rather than guessed at.
pub fn decode_hex(hex: &str) -> Option<GeoPoint> {
    let hex = hex.trim();
    if hex.len() < MIN_HEX_POINT_LEN || !hex.is_ascii() {
        return None;
    }
    let lon_end = HEX_COORDS_OFFSET + HEX_F64_LEN;
    let longitude = parse_le_f64(&hex[HEX_COORDS_OFFSET..lon_end])?;
    let latitude = parse_le_f64(&hex[lon_end..lon_end + HEX_F64_LEN])?;
    let point = GeoPoint::new(latitude, longitude);
    point.in_bounds().then_some(point)
}

fn parse_le_f64(hex: &str) -> Option<f64> {
    let mut bytes = [0_u8; 8];
    for (idx, byte) in bytes.iter_mut().enumerate() {
        *byte = u8::from_str_radix(&hex[idx * 2..idx * 2 + 2], 16).ok()?;
    }
    Some(f64::from_le_bytes(bytes))
}

/// Encode a point for writing. Longitude comes first.
pub fn encode(point: &GeoPoint) -> Result<String> {
    point.validate()?;
    Ok(format!(
        "SRID=4326;POINT({} {})",
        point.longitude, point.latitude
    ))
}

/// Render a point in the legacy hex form the backend returns on reads.
pub fn to_ewkb_hex(point: &GeoPoint) -> String {
    let mut out = String::with_capacity(MIN_HEX_POINT_LEN);
    out.push_str(EWKB_POINT_4326_HEADER);
    for byte in point
        .longitude
        .to_le_bytes()
        .iter()
        .chain(point.latitude.to_le_bytes().iter())
    {
        out.push_str(&format!("{:02X}", byte));
    }
    out
}

/// Parse a `SRID=4326;POINT(lon lat)` literal back into a point.
pub fn parse_wkt(text: &str) -> Option<GeoPoint> {
    let body = text.trim().strip_prefix("SRID=4326;")?;
    let inner = body.strip_prefix("POINT(")?.strip_suffix(')')?;
    let mut parts = inner.split_whitespace();
    let lon = parts.next()?.parse::<f64>().ok()?;
    let lat = parts.next()?.parse::<f64>().ok()?;
    if parts.next().is_some() {
        return None;
    }
    Some(GeoPoint::new(lat, lon))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const TOLERANCE: f64 = 1e-9;

    fn assert_close(a: GeoPoint, b: GeoPoint) {
        assert!((a.latitude - b.latitude).abs() < TOLERANCE, "{:?} vs {:?}", a, b);
        assert!((a.longitude - b.longitude).abs() < TOLERANCE, "{:?} vs {:?}", a, b);
    }

    #[test]
    fn decodes_hex_point_from_backend() {
        let szeged = GeoPoint::new(46.253, 20.14824);
        let hex = to_ewkb_hex(&szeged);
        assert_eq!(hex.len(), 50);
        assert!(hex.starts_with("0101000020E6100000"));
        assert_close(decode(&json!(hex)).expect("decoded"), szeged);
    }

    #[test]
    fn decodes_structured_point() {
        let wire = json!({"type": "Point", "coordinates": [19.0402, 47.4979]});
        let point = decode(&wire).expect("decoded");
        assert_close(point, GeoPoint::new(47.4979, 19.0402));
    }

    #[test]
    fn short_hex_string_is_unknown() {
        let short = "0101000020E61000000000000000003440000000";
        assert_eq!(short.len(), 40);
        assert_eq!(decode(&json!(short)), None);
        assert_eq!(decode_hex(""), None);
    }

    #[test]
    fn malformed_input_is_unknown() {
        let not_hex = "Z".repeat(60);
        assert_eq!(decode_hex(&not_hex), None);
        assert_eq!(decode_hex("0101000020E6100000ő0000000000034400000000000004740"), None);
        assert_eq!(decode(&json!(null)), None);
        assert_eq!(decode(&json!(42)), None);
        assert_eq!(decode(&json!({"type": "Point"})), None);
        assert_eq!(decode(&json!({"coordinates": [1.0]})), None);
        assert_eq!(decode(&json!({"coordinates": ["a", "b"]})), None);
    }

    #[test]
    fn out_of_range_payload_is_unknown() {
        let bogus = GeoPoint::new(123.0, 10.0);
        assert_eq!(decode_hex(&to_ewkb_hex(&bogus)), None);
    }

    #[test]
    fn encode_puts_longitude_first() {
        let wire = encode(&GeoPoint::new(47.5, 19.04)).expect("encoded");
        assert_eq!(wire, "SRID=4326;POINT(19.04 47.5)");
    }

    #[test]
    fn encode_rejects_out_of_range() {
        let err = encode(&GeoPoint::new(95.0, 10.0)).unwrap_err();
        assert_eq!(err, ConsoleError::validation("coordinates out of range"));
        let err = encode(&GeoPoint::new(10.0, -180.5)).unwrap_err();
        assert_eq!(err, ConsoleError::validation("coordinates out of range"));
    }

    #[test]
    fn encode_rejects_non_finite() {
        let err = encode(&GeoPoint::new(f64::NAN, 10.0)).unwrap_err();
        assert_eq!(err, ConsoleError::validation("invalid coordinates"));
        let err = GeoPoint::parse("47.1", "east").unwrap_err();
        assert_eq!(err, ConsoleError::validation("invalid coordinates"));
    }

    #[test]
    fn written_points_survive_a_read_back() {
        let samples = [
            GeoPoint::new(0.0, 0.0),
            GeoPoint::new(-90.0, 180.0),
            GeoPoint::new(90.0, -180.0),
            GeoPoint::new(46.25301234567, 20.14824987654),
            GeoPoint::new(-33.8688, 151.2093),
        ];
        for point in samples {
            let written = encode(&point).expect("encoded");
            let reparsed = parse_wkt(&written).expect("reparsed");
            let decoded = decode(&json!(to_ewkb_hex(&reparsed))).expect("decoded");
            assert_close(decoded, point);
        }
    }
}
