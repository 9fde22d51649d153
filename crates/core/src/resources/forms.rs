//! Editable field sets per resource kind and their normalization rules.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{Payload, Record, RegistryEntry, ResourceKind};
use crate::errors::{ConsoleError, Result};
use crate::geo::{self, GeoPoint};

const CAPACITY_LEVELS: &[&str] = &["small", "medium", "large"];
const PRICE_RANGES: &[&str] = &["$", "$$", "$$$"];
const USER_ROLES: &[&str] = &["user", "admin"];
const FEEDBACK_PRIORITIES: &[&str] = &["low", "medium", "high"];
const MIN_RATING: f64 = 1.0;
const MAX_RATING: f64 = 5.0;

/// Whether a payload is being built for an insert or an update.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MutationIntent {
    Create,
    Update,
}

/// Fields shared by every spatial resource, as typed into a form.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LocationForm {
    pub name: String,
    pub description: String,
    pub city: String,
    pub latitude: String,
    pub longitude: String,
    pub picture_urls: Vec<String>,
}

impl LocationForm {
    /// Prefill an edit form from a stored row.
    ///
    /// Coordinates that cannot be decoded are left blank so the form shows
    /// them as unknown.
    pub fn from_record(record: &Record) -> Self {
        let point = match (record.get("lat"), record.get("lon")) {
            (Some(lat), Some(lon)) => match (lat.as_f64(), lon.as_f64()) {
                (Some(lat), Some(lon)) => Some(GeoPoint::new(lat, lon)),
                _ => None,
            },
            _ => record.get("coordinate").and_then(geo::decode),
        };
        let (latitude, longitude) = point
            .map(|p| (p.latitude.to_string(), p.longitude.to_string()))
            .unwrap_or_default();

        Self {
            name: text_field(record, "name"),
            description: text_field(record, "description"),
            city: text_field(record, "city"),
            latitude,
            longitude,
            picture_urls: record
                .get("picture_url")
                .and_then(Value::as_array)
                .map(|urls| {
                    urls.iter()
                        .filter_map(Value::as_str)
                        .map(str::to_string)
                        .collect()
                })
                .unwrap_or_default(),
        }
    }

    fn write_into(&self, payload: &mut Payload) -> Result<()> {
        // Coordinates first: a bad point blocks the whole mutation.
        let point = GeoPoint::parse(&self.latitude, &self.longitude)?;
        let coordinate = geo::encode(&point)?;

        let name = self.name.trim();
        if name.is_empty() {
            return Err(ConsoleError::validation("name is required"));
        }
        payload.insert("name".to_string(), Value::String(name.to_string()));
        payload.insert("description".to_string(), optional_text(&self.description));
        payload.insert(
            "city".to_string(),
            Value::String(self.city.trim().to_string()),
        );
        let pictures: Vec<Value> = self
            .picture_urls
            .iter()
            .map(|url| url.trim())
            .filter(|url| !url.is_empty())
            .map(|url| Value::String(url.to_string()))
            .collect();
        payload.insert(
            "picture_url".to_string(),
            if pictures.is_empty() {
                Value::Null
            } else {
                Value::Array(pictures)
            },
        );
        payload.insert("coordinate".to_string(), Value::String(coordinate));
        Ok(())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ParkingForm {
    pub covered: bool,
    pub is_open_24h: bool,
    pub capacity_level: String,
    pub has_camera: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceForm {
    pub phone: String,
    pub website: String,
    pub opening_hours: String,
    pub rating: String,
    pub price_range: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RepairForm {
    pub covered: bool,
    pub free: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct UserForm {
    pub username: String,
    pub full_name: String,
    pub role: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FeedbackForm {
    pub status: String,
    pub priority: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PoiFlagForm {
    pub status: String,
    pub comment: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ImageSubmissionForm {
    pub status: String,
}

/// Editable fields of one record, tagged by kind.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", tag = "kind")]
pub enum ResourceForm {
    User(UserForm),
    ParkingSpot {
        location: LocationForm,
        parking: ParkingForm,
    },
    Service {
        location: LocationForm,
        service: ServiceForm,
    },
    RepairStation {
        location: LocationForm,
        repair: RepairForm,
    },
    Feedback(FeedbackForm),
    PoiFlag(PoiFlagForm),
    ImageSubmission(ImageSubmissionForm),
}

impl ResourceForm {
    pub fn kind(&self) -> ResourceKind {
        match self {
            ResourceForm::User(_) => ResourceKind::User,
            ResourceForm::ParkingSpot { .. } => ResourceKind::ParkingSpot,
            ResourceForm::Service { .. } => ResourceKind::Service,
            ResourceForm::RepairStation { .. } => ResourceKind::RepairStation,
            ResourceForm::Feedback(_) => ResourceKind::Feedback,
            ResourceForm::PoiFlag(_) => ResourceKind::PoiFlag,
            ResourceForm::ImageSubmission(_) => ResourceKind::ImageSubmission,
        }
    }

    pub(super) fn to_payload(&self, entry: &RegistryEntry) -> Result<Payload> {
        let mut payload = Payload::new();
        match self {
            ResourceForm::User(form) => {
                let username = form.username.trim();
                if username.is_empty() {
                    return Err(ConsoleError::validation("username is required"));
                }
                payload.insert("username".to_string(), Value::String(username.to_string()));
                payload.insert("full_name".to_string(), optional_text(&form.full_name));
                payload.insert(
                    "role".to_string(),
                    Value::String(one_of("role", &form.role, USER_ROLES)?.to_string()),
                );
            }
            ResourceForm::ParkingSpot { location, parking } => {
                location.write_into(&mut payload)?;
                payload.insert("covered".to_string(), Value::Bool(parking.covered));
                payload.insert("is_open_24h".to_string(), Value::Bool(parking.is_open_24h));
                payload.insert(
                    "capacity_level".to_string(),
                    optional_choice("capacity_level", &parking.capacity_level, CAPACITY_LEVELS)?,
                );
                payload.insert("has_camera".to_string(), Value::Bool(parking.has_camera));
            }
            ResourceForm::Service { location, service } => {
                location.write_into(&mut payload)?;
                payload.insert("phone".to_string(), optional_text(&service.phone));
                payload.insert("website".to_string(), optional_text(&service.website));
                payload.insert(
                    "opening_hours".to_string(),
                    optional_text(&service.opening_hours),
                );
                payload.insert("rating".to_string(), parse_rating(&service.rating)?);
                payload.insert(
                    "price_range".to_string(),
                    optional_choice("price_range", &service.price_range, PRICE_RANGES)?,
                );
            }
            ResourceForm::RepairStation { location, repair } => {
                location.write_into(&mut payload)?;
                payload.insert("covered".to_string(), Value::Bool(repair.covered));
                payload.insert("free".to_string(), Value::Bool(repair.free));
            }
            ResourceForm::Feedback(form) => {
                entry.check_status(form.status.trim())?;
                payload.insert(
                    "status".to_string(),
                    Value::String(form.status.trim().to_string()),
                );
                payload.insert(
                    "priority".to_string(),
                    Value::String(
                        one_of("priority", &form.priority, FEEDBACK_PRIORITIES)?.to_string(),
                    ),
                );
            }
            ResourceForm::PoiFlag(form) => {
                entry.check_status(form.status.trim())?;
                payload.insert(
                    "status".to_string(),
                    Value::String(form.status.trim().to_string()),
                );
                payload.insert("comment".to_string(), optional_text(&form.comment));
            }
            ResourceForm::ImageSubmission(form) => {
                entry.check_status(form.status.trim())?;
                payload.insert(
                    "status".to_string(),
                    Value::String(form.status.trim().to_string()),
                );
            }
        }
        Ok(payload)
    }
}

fn text_field(record: &Record, key: &str) -> String {
    record
        .get(key)
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string()
}

fn optional_text(raw: &str) -> Value {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        Value::Null
    } else {
        Value::String(trimmed.to_string())
    }
}

fn one_of<'a>(field: &str, raw: &'a str, allowed: &[&str]) -> Result<&'a str> {
    let value = raw.trim();
    if allowed.contains(&value) {
        Ok(value)
    } else {
        Err(ConsoleError::validation(format!(
            "{} must be one of {}",
            field,
            allowed.join(", ")
        )))
    }
}

fn optional_choice(field: &str, raw: &str, allowed: &[&str]) -> Result<Value> {
    if raw.trim().is_empty() {
        return Ok(Value::Null);
    }
    one_of(field, raw, allowed).map(|value| Value::String(value.to_string()))
}

fn parse_rating(raw: &str) -> Result<Value> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Ok(Value::Null);
    }
    let rating = raw
        .parse::<f64>()
        .ok()
        .filter(|r| (MIN_RATING..=MAX_RATING).contains(r))
        .ok_or_else(|| ConsoleError::validation("rating must be a number between 1 and 5"))?;
    serde_json::Number::from_f64(rating)
        .map(Value::Number)
        .ok_or_else(|| ConsoleError::validation("rating must be a number between 1 and 5"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resources::resolve;
    use chrono::{TimeZone, Utc};
    use serde_json::json;

    fn now() -> chrono::DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap()
    }

    fn location() -> LocationForm {
        LocationForm {
            name: "  Dóm tér  ".to_string(),
            description: "".to_string(),
            city: "Szeged".to_string(),
            latitude: "46.2502".to_string(),
            longitude: "20.1496".to_string(),
            picture_urls: vec![],
        }
    }

    fn normalize(form: &ResourceForm, intent: MutationIntent) -> Result<Payload> {
        resolve(form.kind()).unwrap().normalize(form, intent, now())
    }

    #[test]
    fn parking_create_payload() {
        let form = ResourceForm::ParkingSpot {
            location: location(),
            parking: ParkingForm {
                covered: true,
                is_open_24h: false,
                capacity_level: "medium".to_string(),
                has_camera: true,
            },
        };
        let payload = normalize(&form, MutationIntent::Create).unwrap();
        assert_eq!(payload["name"], json!("Dóm tér"));
        assert_eq!(payload["description"], Value::Null);
        assert_eq!(payload["picture_url"], Value::Null);
        assert_eq!(payload["capacity_level"], json!("medium"));
        assert_eq!(payload["available"], json!(true));
        assert_eq!(
            payload["coordinate"],
            json!("SRID=4326;POINT(20.1496 46.2502)")
        );
        assert!(!payload.contains_key("updated_at"));
    }

    #[test]
    fn update_stamps_updated_at() {
        let form = ResourceForm::RepairStation {
            location: location(),
            repair: RepairForm {
                covered: false,
                free: true,
            },
        };
        let payload = normalize(&form, MutationIntent::Update).unwrap();
        assert_eq!(payload["updated_at"], json!(now().to_rfc3339()));
        assert_eq!(payload["free"], json!(true));
        assert!(!payload.contains_key("available"));
    }

    #[test]
    fn empty_capacity_level_is_cleared_and_unknown_rejected() {
        let mut parking = ParkingForm::default();
        let form = ResourceForm::ParkingSpot {
            location: location(),
            parking: parking.clone(),
        };
        assert_eq!(
            normalize(&form, MutationIntent::Create).unwrap()["capacity_level"],
            Value::Null
        );

        parking.capacity_level = "huge".to_string();
        let form = ResourceForm::ParkingSpot {
            location: location(),
            parking,
        };
        assert!(matches!(
            normalize(&form, MutationIntent::Create),
            Err(ConsoleError::Validation(_))
        ));
    }

    #[test]
    fn rating_bounds() {
        let build = |rating: &str| ResourceForm::Service {
            location: location(),
            service: ServiceForm {
                rating: rating.to_string(),
                price_range: "$$".to_string(),
                ..ServiceForm::default()
            },
        };
        assert_eq!(
            normalize(&build("4.5"), MutationIntent::Update).unwrap()["rating"],
            json!(4.5)
        );
        assert_eq!(
            normalize(&build(""), MutationIntent::Update).unwrap()["rating"],
            Value::Null
        );
        for bad in ["0.5", "5.1", "great", "NaN"] {
            assert!(
                matches!(
                    normalize(&build(bad), MutationIntent::Update),
                    Err(ConsoleError::Validation(_))
                ),
                "{bad}"
            );
        }
    }

    #[test]
    fn out_of_range_latitude_blocks_payload() {
        let mut loc = location();
        loc.latitude = "95".to_string();
        loc.longitude = "10".to_string();
        let form = ResourceForm::ParkingSpot {
            location: loc,
            parking: ParkingForm::default(),
        };
        assert_eq!(
            normalize(&form, MutationIntent::Update).unwrap_err(),
            ConsoleError::validation("coordinates out of range")
        );
    }

    #[test]
    fn blank_name_rejected() {
        let mut loc = location();
        loc.name = "   ".to_string();
        let form = ResourceForm::RepairStation {
            location: loc,
            repair: RepairForm::default(),
        };
        assert_eq!(
            normalize(&form, MutationIntent::Create).unwrap_err(),
            ConsoleError::validation("name is required")
        );
    }

    #[test]
    fn moderation_forms_validate_status() {
        let ok = ResourceForm::PoiFlag(PoiFlagForm {
            status: "dismissed".to_string(),
            comment: " duplicate of #12 ".to_string(),
        });
        let payload = normalize(&ok, MutationIntent::Update).unwrap();
        assert_eq!(payload["comment"], json!("duplicate of #12"));

        let bad = ResourceForm::ImageSubmission(ImageSubmissionForm {
            status: "maybe".to_string(),
        });
        assert!(matches!(
            normalize(&bad, MutationIntent::Update),
            Err(ConsoleError::Validation(_))
        ));

        let feedback = ResourceForm::Feedback(FeedbackForm {
            status: "in_progress".to_string(),
            priority: "urgent".to_string(),
        });
        assert!(matches!(
            normalize(&feedback, MutationIntent::Update),
            Err(ConsoleError::Validation(_))
        ));
    }

    #[test]
    fn user_role_must_be_known() {
        let form = ResourceForm::User(UserForm {
            username: "kerekes".to_string(),
            full_name: "".to_string(),
            role: "admin".to_string(),
        });
        let payload = normalize(&form, MutationIntent::Update).unwrap();
        assert_eq!(payload["role"], json!("admin"));
        assert_eq!(payload["full_name"], Value::Null);
    }

    #[test]
    fn mismatched_entry_is_config_error() {
        let form = ResourceForm::ImageSubmission(ImageSubmissionForm {
            status: "approved".to_string(),
        });
        let entry = resolve(ResourceKind::Feedback).unwrap();
        assert!(matches!(
            entry.normalize(&form, MutationIntent::Update, now()),
            Err(ConsoleError::Config(_))
        ));
    }

    #[test]
    fn edit_form_prefills_from_hex_coordinate() {
        let point = GeoPoint::new(47.4979, 19.0402);
        let record: Record = serde_json::from_value(json!({
            "id": "a1",
            "name": "Deák tér",
            "city": "Budapest",
            "coordinate": geo::to_ewkb_hex(&point),
            "picture_url": ["https://cdn.example/a.jpg"],
        }))
        .unwrap();
        let form = LocationForm::from_record(&record);
        assert_eq!(form.name, "Deák tér");
        assert_eq!(form.latitude.parse::<f64>().unwrap(), 47.4979);
        assert_eq!(form.longitude.parse::<f64>().unwrap(), 19.0402);
        assert_eq!(form.picture_urls, vec!["https://cdn.example/a.jpg".to_string()]);
    }

    #[test]
    fn edit_form_leaves_unknown_coordinates_blank() {
        let record: Record = serde_json::from_value(json!({
            "name": "Broken",
            "coordinate": "0101000020E6100000ABCDEF",
        }))
        .unwrap();
        let form = LocationForm::from_record(&record);
        assert_eq!(form.latitude, "");
        assert_eq!(form.longitude, "");
    }

    #[test]
    fn form_deserializes_from_tagged_json() {
        let form: ResourceForm = serde_json::from_value(json!({
            "kind": "parkingSpot",
            "location": {"name": "X", "latitude": "1", "longitude": "2"},
            "parking": {"covered": true}
        }))
        .unwrap();
        assert_eq!(form.kind(), ResourceKind::ParkingSpot);
    }
}
