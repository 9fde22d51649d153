//! PostgREST and storage client for the Supabase project behind the console.
//!
//! Rows are read, counted and written through the REST API; uploaded images
//! are removed through the storage API.

use async_trait::async_trait;
use log::{debug, error};
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_RANGE, CONTENT_TYPE};
use serde_json::Value;

use bikemap_core::query::{CountRequest, FilterExpr, ReadRequest};
use bikemap_core::resources::{Payload, Record};
use bikemap_core::sync::row_id;
use bikemap_core::{
    BackendFailure, MutationOperation, MutationReceipt, MutationRequest, ObjectStorage,
    ResourceBackend,
};

use crate::config::SupabaseConfig;
use crate::error::{Result, SupabaseError};
use crate::types::{ApiErrorResponse, RemoveObjectsRequest};

const MAX_LOG_BODY_CHARS: usize = 512;

/// Client for the REST and storage APIs of one Supabase project.
#[derive(Debug, Clone)]
pub struct SupabaseClient {
    client: reqwest::Client,
    config: SupabaseConfig,
}

impl SupabaseClient {
    fn log_response(status: reqwest::StatusCode, body: &str) {
        if status.is_success() {
            debug!("API response status: {}", status);
            return;
        }

        let mut preview = body.chars().take(MAX_LOG_BODY_CHARS).collect::<String>();
        if body.chars().count() > MAX_LOG_BODY_CHARS {
            preview.push_str("...");
        }
        debug!("API response error ({}): {}", status, preview);
    }

    pub fn new(config: SupabaseConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()?;
        Ok(Self { client, config })
    }

    pub fn config(&self) -> &SupabaseConfig {
        &self.config
    }

    fn headers(&self) -> Result<HeaderMap> {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

        let api_key = HeaderValue::from_str(&self.config.anon_key)
            .map_err(|_| SupabaseError::auth("Invalid anon key format"))?;
        headers.insert("apikey", api_key);

        let auth_value = HeaderValue::from_str(&format!("Bearer {}", self.config.bearer()))
            .map_err(|_| SupabaseError::auth("Invalid access token format"))?;
        headers.insert(AUTHORIZATION, auth_value);

        Ok(headers)
    }

    fn rest_url(&self, collection: &str, params: &[(String, String)]) -> String {
        let mut url = format!(
            "{}/rest/v1/{}",
            self.config.url,
            urlencoding::encode(collection)
        );
        for (i, (name, value)) in params.iter().enumerate() {
            url.push(if i == 0 { '?' } else { '&' });
            url.push_str(&urlencoding::encode(name));
            url.push('=');
            url.push_str(&urlencoding::encode(value));
        }
        url
    }

    fn filter_params(filter: &Option<FilterExpr>) -> Vec<(String, String)> {
        match filter {
            None => Vec::new(),
            Some(expr @ FilterExpr::AnyILike { .. }) => {
                vec![("or".to_string(), format!("({})", expr))]
            }
            Some(FilterExpr::Eq { field, value }) => {
                vec![(field.to_string(), format!("eq.{}", value))]
            }
        }
    }

    fn id_params(id: Option<&str>) -> Result<Vec<(String, String)>> {
        let id = id
            .map(str::trim)
            .filter(|id| !id.is_empty())
            .ok_or_else(|| SupabaseError::invalid_request("Mutation requires a row id"))?;
        Ok(vec![("id".to_string(), format!("eq.{}", id))])
    }

    /// Turn a non-success response into an API error.
    async fn error_from_response(response: reqwest::Response) -> SupabaseError {
        let status = response.status();
        let body = match response.text().await {
            Ok(body) => body,
            Err(err) => return SupabaseError::Http(err),
        };
        Self::log_response(status, &body);

        if let Ok(error) = serde_json::from_str::<ApiErrorResponse>(&body) {
            let mut message = error.message;
            if let Some(details) = error.details.filter(|d| !d.is_empty()) {
                debug!("API error details: {}", details);
            }
            if let Some(hint) = error.hint.filter(|h| !h.is_empty()) {
                message = format!("{} ({})", message, hint);
            }
            return SupabaseError::api(status.as_u16(), error.code, message);
        }
        let message = if body.is_empty() {
            format!("Request failed: {}", status)
        } else {
            format!("Request failed: {}", body)
        };
        SupabaseError::api(status.as_u16(), None, message)
    }

    /// Parse a JSON response body.
    async fn parse_response<T: serde::de::DeserializeOwned>(
        response: reqwest::Response,
    ) -> Result<T> {
        let status = response.status();
        if !status.is_success() {
            return Err(Self::error_from_response(response).await);
        }
        let body = response.text().await?;
        Self::log_response(status, &body);

        serde_json::from_str(&body).map_err(|e| {
            error!(
                "Failed to deserialize response. Body: {}, Error: {}",
                body.chars().take(MAX_LOG_BODY_CHARS).collect::<String>(),
                e
            );
            SupabaseError::Json(e)
        })
    }

    /// Check a response whose body is not needed.
    async fn ensure_success(response: reqwest::Response) -> Result<()> {
        let status = response.status();
        if !status.is_success() {
            return Err(Self::error_from_response(response).await);
        }
        debug!("API response status: {}", status);
        Ok(())
    }

    /// Total from a `Content-Range` header such as `0-9/57` or `*/57`.
    fn parse_content_range(headers: &HeaderMap) -> Result<u64> {
        let raw = headers
            .get(CONTENT_RANGE)
            .ok_or_else(|| SupabaseError::invalid_request("Missing header Content-Range"))?
            .to_str()
            .map_err(|_| SupabaseError::invalid_request("Invalid header Content-Range"))?;
        raw.rsplit_once('/')
            .and_then(|(_, total)| total.trim().parse::<u64>().ok())
            .ok_or_else(|| {
                SupabaseError::invalid_request(format!("Unexpected Content-Range '{}'", raw))
            })
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Rows
    // ─────────────────────────────────────────────────────────────────────────

    /// GET /rest/v1/{collection}
    pub async fn select(&self, request: &ReadRequest) -> Result<Vec<Record>> {
        let mut params = vec![("select".to_string(), "*".to_string())];
        params.extend(Self::filter_params(&request.filter));
        if let Some(order) = &request.order {
            let direction = if order.ascending { "asc" } else { "desc" };
            params.push(("order".to_string(), format!("{}.{}", order.key, direction)));
        }
        let url = self.rest_url(request.collection, &params);
        debug!("Selecting rows: {}", url);

        let mut builder = self.client.get(&url).headers(self.headers()?);
        if let Some(range) = request.range {
            builder = builder
                .header("Range-Unit", "items")
                .header("Range", format!("{}-{}", range.from, range.to));
        }
        let response = builder.send().await?;
        Self::parse_response(response).await
    }

    /// HEAD /rest/v1/{collection} with an exact count.
    pub async fn count_rows(&self, request: &CountRequest) -> Result<u64> {
        let mut params = vec![("select".to_string(), "*".to_string())];
        params.extend(Self::filter_params(&request.filter));
        let url = self.rest_url(request.collection, &params);
        debug!("Counting rows: {}", url);

        let response = self
            .client
            .head(&url)
            .headers(self.headers()?)
            .header("Prefer", "count=exact")
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(Self::error_from_response(response).await);
        }
        Self::parse_content_range(response.headers())
    }

    /// POST /rest/v1/{collection}
    pub async fn insert(&self, collection: &str, fields: &Payload) -> Result<MutationReceipt> {
        let url = self.rest_url(collection, &[]);
        debug!("Inserting into {}", collection);

        let response = self
            .client
            .post(&url)
            .headers(self.headers()?)
            .header("Prefer", "return=representation")
            .json(fields)
            .send()
            .await?;
        let rows: Vec<Record> = Self::parse_response(response).await?;
        Ok(MutationReceipt {
            id: rows.first().and_then(row_id),
        })
    }

    /// PATCH /rest/v1/{collection}?id=eq.{id}
    pub async fn update(&self, collection: &str, id: &str, fields: &Payload) -> Result<()> {
        let url = self.rest_url(collection, &Self::id_params(Some(id))?);
        debug!("Updating {} {}", collection, id);

        let response = self
            .client
            .patch(&url)
            .headers(self.headers()?)
            .header("Prefer", "return=minimal")
            .json(fields)
            .send()
            .await?;
        Self::ensure_success(response).await
    }

    /// DELETE /rest/v1/{collection}?id=eq.{id}
    pub async fn delete(&self, collection: &str, id: &str) -> Result<()> {
        let url = self.rest_url(collection, &Self::id_params(Some(id))?);
        debug!("Deleting {} {}", collection, id);

        let response = self
            .client
            .delete(&url)
            .headers(self.headers()?)
            .send()
            .await?;
        Self::ensure_success(response).await
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Storage
    // ─────────────────────────────────────────────────────────────────────────

    /// DELETE /storage/v1/object/{bucket}
    pub async fn remove_objects(&self, bucket: &str, paths: &[String]) -> Result<()> {
        if paths.is_empty() {
            return Ok(());
        }
        let url = format!(
            "{}/storage/v1/object/{}",
            self.config.url,
            urlencoding::encode(bucket)
        );
        debug!("Removing {} object(s) from {}", paths.len(), bucket);

        let response = self
            .client
            .delete(&url)
            .headers(self.headers()?)
            .json(&RemoveObjectsRequest { prefixes: paths })
            .send()
            .await?;
        // The body lists the removed objects; nothing in it is needed.
        let _: Value = Self::parse_response(response).await?;
        Ok(())
    }
}

#[async_trait]
impl ResourceBackend for SupabaseClient {
    async fn read(&self, request: &ReadRequest) -> std::result::Result<Vec<Record>, BackendFailure> {
        self.select(request).await.map_err(Into::into)
    }

    async fn count(&self, request: &CountRequest) -> std::result::Result<u64, BackendFailure> {
        self.count_rows(request).await.map_err(Into::into)
    }

    async fn mutate(
        &self,
        request: MutationRequest,
    ) -> std::result::Result<MutationReceipt, BackendFailure> {
        let empty = Payload::new();
        let fields = request.fields.as_ref().unwrap_or(&empty);
        let id = request.id.as_deref();
        let outcome = match request.operation {
            MutationOperation::Insert => self.insert(request.collection, fields).await,
            MutationOperation::Update => match id {
                Some(id) => self
                    .update(request.collection, id, fields)
                    .await
                    .map(|()| MutationReceipt {
                        id: Some(id.to_string()),
                    }),
                None => Err(SupabaseError::invalid_request("Update requires a row id")),
            },
            MutationOperation::Delete => match id {
                Some(id) => self
                    .delete(request.collection, id)
                    .await
                    .map(|()| MutationReceipt {
                        id: Some(id.to_string()),
                    }),
                None => Err(SupabaseError::invalid_request("Delete requires a row id")),
            },
        };
        outcome.map_err(Into::into)
    }
}

#[async_trait]
impl ObjectStorage for SupabaseClient {
    async fn remove(&self, bucket: &str, paths: &[String]) -> std::result::Result<(), BackendFailure> {
        self.remove_objects(bucket, paths).await.map_err(Into::into)
    }
}
