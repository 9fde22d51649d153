//! Wire types shared by the REST and realtime clients.

use serde::{Deserialize, Serialize};

/// PostgREST / storage error body.
#[derive(Debug, Clone, Deserialize)]
pub struct ApiErrorResponse {
    #[serde(default)]
    pub code: Option<String>,
    #[serde(alias = "msg")]
    pub message: String,
    #[serde(default)]
    pub details: Option<String>,
    #[serde(default)]
    pub hint: Option<String>,
}

/// Body of a storage bulk-remove request.
#[derive(Debug, Clone, Serialize)]
pub struct RemoveObjectsRequest<'a> {
    pub prefixes: &'a [String],
}

/// One frame of the Phoenix channel protocol.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PhoenixFrame {
    pub topic: String,
    pub event: String,
    #[serde(default)]
    pub payload: serde_json::Value,
    #[serde(rename = "ref", default)]
    pub reference: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub join_ref: Option<String>,
}
