//! Validated writes and their side effects.

use chrono::Utc;
use log::{debug, info, warn};
use serde_json::Value;
use std::sync::Arc;

use crate::backend::{MutationOperation, MutationReceipt, MutationRequest, ObjectStorage, ResourceBackend};
use crate::errors::{ConsoleError, Result};
use crate::query::ReadRequest;
use crate::resources::{resolve, MutationIntent, Payload, RegistryEntry, ResourceForm, ResourceKind};
use crate::storage::locate_object;

/// Turns console edits into backend mutations.
///
/// Every operation validates locally first; nothing is sent when validation
/// fails.
pub struct MutationGateway {
    backend: Arc<dyn ResourceBackend>,
    storage: Arc<dyn ObjectStorage>,
    storage_marker: String,
    reviewer_id: Option<String>,
}

impl MutationGateway {
    pub fn new(
        backend: Arc<dyn ResourceBackend>,
        storage: Arc<dyn ObjectStorage>,
        storage_marker: String,
        reviewer_id: Option<String>,
    ) -> Self {
        Self {
            backend,
            storage,
            storage_marker,
            reviewer_id,
        }
    }

    pub async fn create(&self, kind: ResourceKind, form: &ResourceForm) -> Result<MutationReceipt> {
        let entry = resolve(kind)?;
        if !entry.creatable {
            return Err(ConsoleError::validation(format!(
                "{} records cannot be created from the console",
                kind
            )));
        }
        let fields = entry.normalize(form, MutationIntent::Create, Utc::now())?;
        self.dispatch(MutationRequest {
            collection: entry.collection,
            operation: MutationOperation::Insert,
            id: None,
            fields: Some(fields),
        })
        .await
    }

    pub async fn update(
        &self,
        kind: ResourceKind,
        id: &str,
        form: &ResourceForm,
    ) -> Result<MutationReceipt> {
        let entry = resolve(kind)?;
        let id = require_id(id)?;
        let fields = entry.normalize(form, MutationIntent::Update, Utc::now())?;
        self.dispatch(update_request(entry, id, fields)).await
    }

    /// Delete a row. Kinds with an attached file have the file removed first;
    /// a failed removal is logged and the row is deleted anyway.
    pub async fn delete(&self, kind: ResourceKind, id: &str) -> Result<MutationReceipt> {
        let entry = resolve(kind)?;
        let id = require_id(id)?;
        if let Some(blob_field) = entry.blob_field {
            self.remove_blob(entry, blob_field, id).await;
        }
        self.dispatch(MutationRequest {
            collection: entry.collection,
            operation: MutationOperation::Delete,
            id: Some(id.to_string()),
            fields: None,
        })
        .await
    }

    /// Change the `status` column. For moderated kinds the decision is
    /// stamped with `reviewed_at` and, when known, `reviewed_by`.
    pub async fn set_status(
        &self,
        kind: ResourceKind,
        id: &str,
        status: &str,
    ) -> Result<MutationReceipt> {
        let entry = resolve(kind)?;
        let id = require_id(id)?;
        entry.check_status(status)?;

        let mut fields = Payload::new();
        fields.insert("status".to_string(), Value::String(status.to_string()));
        if entry.moderated {
            fields.insert(
                "reviewed_at".to_string(),
                Value::String(Utc::now().to_rfc3339()),
            );
            if let Some(reviewer) = &self.reviewer_id {
                fields.insert("reviewed_by".to_string(), Value::String(reviewer.clone()));
            }
        }
        self.dispatch(update_request(entry, id, fields)).await
    }

    /// Write the negation of `current` to a boolean column.
    pub async fn toggle_flag(
        &self,
        kind: ResourceKind,
        id: &str,
        flag: &str,
        current: bool,
    ) -> Result<MutationReceipt> {
        let entry = resolve(kind)?;
        let id = require_id(id)?;
        entry.check_flag(flag)?;

        let mut fields = Payload::new();
        fields.insert(flag.to_string(), Value::Bool(!current));
        self.dispatch(update_request(entry, id, fields)).await
    }

    async fn remove_blob(&self, entry: &RegistryEntry, blob_field: &str, id: &str) {
        let rows = match self
            .backend
            .read(&ReadRequest::by_id(entry.collection, id))
            .await
        {
            Ok(rows) => rows,
            Err(failure) => {
                warn!(
                    "[Mutation] Could not look up {} {} before delete: {:?}",
                    entry.kind, id, failure
                );
                return;
            }
        };
        let Some(url) = rows
            .first()
            .and_then(|row| row.get(blob_field))
            .and_then(Value::as_str)
        else {
            debug!("[Mutation] {} {} has no stored file", entry.kind, id);
            return;
        };
        let Some(object) = locate_object(url, &self.storage_marker) else {
            warn!("[Mutation] Not a storage URL, skipping removal: {}", url);
            return;
        };
        match self
            .storage
            .remove(&object.bucket, std::slice::from_ref(&object.path))
            .await
        {
            Ok(()) => info!(
                "[Mutation] Removed {}/{} for {} {}",
                object.bucket, object.path, entry.kind, id
            ),
            Err(failure) => warn!(
                "[Mutation] Failed to remove {}/{}: {:?}",
                object.bucket, object.path, failure
            ),
        }
    }

    async fn dispatch(&self, request: MutationRequest) -> Result<MutationReceipt> {
        let collection = request.collection;
        let operation = request.operation;
        match self.backend.mutate(request).await {
            Ok(receipt) => {
                info!("[Mutation] {:?} on {} succeeded", operation, collection);
                Ok(receipt)
            }
            Err(failure) => {
                let err = ConsoleError::from_backend(failure);
                warn!("[Mutation] {:?} on {} failed: {}", operation, collection, err);
                Err(err)
            }
        }
    }
}

fn require_id(id: &str) -> Result<&str> {
    let id = id.trim();
    if id.is_empty() {
        return Err(ConsoleError::validation("record id is required"));
    }
    Ok(id)
}

fn update_request(entry: &RegistryEntry, id: &str, fields: Payload) -> MutationRequest {
    MutationRequest {
        collection: entry.collection,
        operation: MutationOperation::Update,
        id: Some(id.to_string()),
        fields: Some(fields),
    }
}
