//! Resource kinds managed by the console and their backend wiring.

mod forms;

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::errors::{ConsoleError, Result};

pub use forms::{
    FeedbackForm, ImageSubmissionForm, LocationForm, MutationIntent, ParkingForm, PoiFlagForm,
    RepairForm, ResourceForm, ServiceForm, UserForm,
};

/// One backend row, as returned by reads.
pub type Record = serde_json::Map<String, serde_json::Value>;

/// Column/value payload sent with a mutation.
pub type Payload = serde_json::Map<String, serde_json::Value>;

/// Primary key of a row.
pub type RowId = String;

/// The seven record categories the console manages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ResourceKind {
    User,
    ParkingSpot,
    Service,
    RepairStation,
    Feedback,
    PoiFlag,
    ImageSubmission,
}

impl ResourceKind {
    pub const ALL: [ResourceKind; 7] = [
        ResourceKind::User,
        ResourceKind::ParkingSpot,
        ResourceKind::Service,
        ResourceKind::RepairStation,
        ResourceKind::Feedback,
        ResourceKind::PoiFlag,
        ResourceKind::ImageSubmission,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceKind::User => "user",
            ResourceKind::ParkingSpot => "parkingSpot",
            ResourceKind::Service => "service",
            ResourceKind::RepairStation => "repairStation",
            ResourceKind::Feedback => "feedback",
            ResourceKind::PoiFlag => "poiFlag",
            ResourceKind::ImageSubmission => "imageSubmission",
        }
    }

    /// Parking spots, services and repair stations carry a coordinate.
    pub fn is_spatial(&self) -> bool {
        matches!(
            self,
            ResourceKind::ParkingSpot | ResourceKind::Service | ResourceKind::RepairStation
        )
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ResourceKind {
    type Err = ConsoleError;

    fn from_str(s: &str) -> Result<Self> {
        ResourceKind::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| ConsoleError::config(format!("unknown resource kind '{}'", s)))
    }
}

/// What the console is currently showing.
///
/// `Dashboard` has no backing collection: it never reads and never subscribes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", tag = "view", content = "kind")]
pub enum ActiveView {
    Dashboard,
    Resource(ResourceKind),
}

impl ActiveView {
    pub fn resource(&self) -> Option<ResourceKind> {
        match self {
            ActiveView::Dashboard => None,
            ActiveView::Resource(kind) => Some(*kind),
        }
    }
}

impl From<ResourceKind> for ActiveView {
    fn from(kind: ResourceKind) -> Self {
        ActiveView::Resource(kind)
    }
}

/// Static wiring for one resource kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegistryEntry {
    pub kind: ResourceKind,
    /// Backend table name.
    pub collection: &'static str,
    /// Text columns OR-ed together for free-text search, in order.
    pub search_fields: &'static [&'static str],
    /// Allowed values of the `status` column; empty when the kind has none.
    pub statuses: &'static [&'static str],
    /// Boolean columns that can be flipped in place.
    pub flag_fields: &'static [&'static str],
    /// Whether new rows may be created from the console.
    pub creatable: bool,
    /// Status changes are reviews and get `reviewed_at`/`reviewed_by` stamps.
    pub moderated: bool,
    /// Column holding a public URL of a stored file that goes with the row.
    pub blob_field: Option<&'static str>,
}

impl RegistryEntry {
    pub fn has_status(&self) -> bool {
        !self.statuses.is_empty()
    }

    pub fn check_status(&self, status: &str) -> Result<()> {
        if !self.has_status() {
            return Err(ConsoleError::validation(format!(
                "{} records have no status",
                self.kind
            )));
        }
        if !self.statuses.contains(&status) {
            return Err(ConsoleError::validation(format!(
                "invalid status '{}' for {}",
                status, self.kind
            )));
        }
        Ok(())
    }

    pub fn check_flag(&self, flag: &str) -> Result<()> {
        if self.flag_fields.contains(&flag) {
            Ok(())
        } else {
            Err(ConsoleError::validation(format!(
                "'{}' is not a toggleable field of {}",
                flag, self.kind
            )))
        }
    }

    /// Validate and normalize a form into a mutation payload.
    pub fn normalize(
        &self,
        form: &ResourceForm,
        intent: MutationIntent,
        now: chrono::DateTime<chrono::Utc>,
    ) -> Result<Payload> {
        if form.kind() != self.kind {
            return Err(ConsoleError::config(format!(
                "{} form passed to the {} registry entry",
                form.kind(),
                self.kind
            )));
        }
        let mut payload = form.to_payload(self)?;
        if self.kind.is_spatial() {
            match intent {
                MutationIntent::Create => {
                    payload.insert("available".to_string(), serde_json::Value::Bool(true));
                }
                MutationIntent::Update => {
                    payload.insert(
                        "updated_at".to_string(),
                        serde_json::Value::String(now.to_rfc3339()),
                    );
                }
            }
        }
        Ok(payload)
    }
}

const SPATIAL_SEARCH: &[&str] = &["name", "city"];

static REGISTRY: [RegistryEntry; 7] = [
    RegistryEntry {
        kind: ResourceKind::User,
        collection: "profiles",
        search_fields: &["username", "full_name", "email"],
        statuses: &[],
        flag_fields: &[],
        creatable: false,
        moderated: false,
        blob_field: None,
    },
    RegistryEntry {
        kind: ResourceKind::ParkingSpot,
        collection: "parkingSpots",
        search_fields: SPATIAL_SEARCH,
        statuses: &[],
        flag_fields: &["available", "covered", "is_open_24h", "has_camera"],
        creatable: true,
        moderated: false,
        blob_field: None,
    },
    RegistryEntry {
        kind: ResourceKind::Service,
        collection: "bicycleService",
        search_fields: SPATIAL_SEARCH,
        statuses: &[],
        flag_fields: &["available"],
        creatable: true,
        moderated: false,
        blob_field: None,
    },
    RegistryEntry {
        kind: ResourceKind::RepairStation,
        collection: "repairStation",
        search_fields: SPATIAL_SEARCH,
        statuses: &[],
        flag_fields: &["available", "covered", "free"],
        creatable: true,
        moderated: false,
        blob_field: None,
    },
    RegistryEntry {
        kind: ResourceKind::Feedback,
        collection: "feedback",
        search_fields: &["title", "description"],
        statuses: &["open", "in_progress", "resolved", "closed", "duplicate"],
        flag_fields: &[],
        creatable: false,
        moderated: false,
        blob_field: None,
    },
    RegistryEntry {
        kind: ResourceKind::PoiFlag,
        collection: "poi_flags",
        search_fields: &["reason", "comment", "poi_type"],
        statuses: &["pending", "reviewed", "resolved", "dismissed"],
        flag_fields: &[],
        creatable: false,
        moderated: true,
        blob_field: None,
    },
    RegistryEntry {
        kind: ResourceKind::ImageSubmission,
        collection: "parking_image_submissions",
        search_fields: &["status", "image_url"],
        statuses: &["pending", "approved", "rejected"],
        flag_fields: &[],
        creatable: false,
        moderated: true,
        blob_field: Some("image_url"),
    },
];

/// Look up the wiring for a kind.
pub fn resolve(kind: ResourceKind) -> Result<&'static RegistryEntry> {
    REGISTRY
        .iter()
        .find(|entry| entry.kind == kind)
        .ok_or_else(|| ConsoleError::config(format!("no registry entry for '{}'", kind)))
}
