//! The search backend facade and its Elasticsearch implementation.
//!
//! The consumer worker only ever talks to [`SearchBackend`]; the production
//! implementation is [`ElasticClient`], a thin reqwest wrapper over one or
//! more cluster endpoints. Collections live inside a single physical index
//! and are addressed as mapping types (`/{index}/{collection}/...`).

use async_trait::async_trait;
use serde_json::Value;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

/// Typed failures of the indexing backend.
#[derive(Debug, Error)]
pub enum ElasticError {
    /// No endpoint produced a response.
    #[error("connection to {endpoint} failed: {reason}")]
    Connection { endpoint: String, reason: String },

    /// The backend answered with a non-2xx status.
    #[error("backend responded {status}: {body}")]
    ResponseCode { status: u16, body: String },

    /// A bulk request was accepted but some items failed.
    #[error("bulk write had {failed} failed item(s); first failure: {first}")]
    BulkFail { failed: usize, first: String },

    /// The response body did not have the expected shape.
    #[error("unexpected response body: {0}")]
    InvalidResponse(String),
}

/// One document write inside a bulk request.
#[derive(Debug, Clone)]
pub struct BulkOp {
    pub collection: String,
    pub id: Option<String>,
    pub body: Value,
}

/// An ordered batch of document writes against one physical index.
#[derive(Debug, Default)]
pub struct BulkBatch {
    ops: Vec<BulkOp>,
}

impl BulkBatch {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue an insert into `collection`; `id` of `None` lets the backend
    /// assign one.
    pub fn push(&mut self, collection: &str, id: Option<String>, body: Value) {
        self.ops.push(BulkOp {
            collection: collection.to_string(),
            id,
            body,
        });
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn ops(&self) -> &[BulkOp] {
        &self.ops
    }

    /// Render the newline-delimited `_bulk` request body.
    pub fn render(&self) -> String {
        let mut body = String::new();
        for op in &self.ops {
            let mut action = serde_json::Map::new();
            let mut meta = serde_json::Map::new();
            meta.insert("_type".to_string(), Value::String(op.collection.clone()));
            if let Some(id) = &op.id {
                meta.insert("_id".to_string(), Value::String(id.clone()));
            }
            action.insert("index".to_string(), Value::Object(meta));
            body.push_str(&Value::Object(action).to_string());
            body.push('\n');
            body.push_str(&op.body.to_string());
            body.push('\n');
        }
        body
    }
}

/// The six operations the ingestion core needs from the indexing backend.
#[async_trait]
pub trait SearchBackend: Send + Sync {
    /// Ensure the physical index exists with `mappings`; idempotent.
    async fn init_index(&self, mappings: &Value) -> Result<(), ElasticError>;

    /// Remove the physical index. Missing index is not an error.
    async fn delete_index(&self) -> Result<(), ElasticError>;

    /// Insert or replace one document.
    async fn index_doc(
        &self,
        collection: &str,
        body: &Value,
        id: Option<&str>,
    ) -> Result<(), ElasticError>;

    /// Write a batch; fails with [`ElasticError::BulkFail`] on partial failure.
    async fn bulk_perform(&self, batch: &BulkBatch) -> Result<(), ElasticError>;

    /// Run a query and return the raw result tree; callers inspect
    /// `hits.total` and `hits.hits`.
    async fn search(&self, collection: &str, query: &Value) -> Result<Value, ElasticError>;

    /// Delete every document matching `query`.
    async fn delete_by_query(&self, collection: &str, query: &Value) -> Result<(), ElasticError>;

    /// Number of documents in `collection`.
    async fn count_doc(&self, collection: &str) -> Result<u64, ElasticError>;
}

/// Elasticsearch client over one or more endpoints.
///
/// Requests start from a rotating endpoint and fail over to the next on
/// connection-level errors; HTTP-level errors are returned as-is.
pub struct ElasticClient {
    http: reqwest::Client,
    endpoints: Vec<String>,
    index: String,
    cursor: AtomicUsize,
}

impl ElasticClient {
    pub fn new(endpoints: Vec<String>, index: impl Into<String>) -> Self {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .expect("failed to build http client");
        let endpoints = endpoints
            .into_iter()
            .map(|e| e.trim_end_matches('/').to_string())
            .collect();
        Self {
            http,
            endpoints,
            index: index.into(),
            cursor: AtomicUsize::new(0),
        }
    }

    pub fn index_name(&self) -> &str {
        &self.index
    }

    async fn request(
        &self,
        method: reqwest::Method,
        path: &str,
        body: Option<RequestBody<'_>>,
    ) -> Result<reqwest::Response, ElasticError> {
        let start = self.cursor.fetch_add(1, Ordering::Relaxed);
        let mut last_error = None;
        for offset in 0..self.endpoints.len() {
            let endpoint = &self.endpoints[(start + offset) % self.endpoints.len()];
            let url = format!("{endpoint}{path}");
            let mut req = self.http.request(method.clone(), &url);
            req = match &body {
                Some(RequestBody::Json(v)) => req.json(*v),
                Some(RequestBody::Ndjson(s)) => req
                    .header(reqwest::header::CONTENT_TYPE, "application/x-ndjson")
                    .body(s.to_string()),
                None => req,
            };
            match req.send().await {
                Ok(resp) => return Ok(resp),
                Err(err) => {
                    debug!(endpoint, error = %err, "endpoint unreachable, trying next");
                    last_error = Some(ElasticError::Connection {
                        endpoint: endpoint.clone(),
                        reason: err.to_string(),
                    });
                }
            }
        }
        Err(last_error.unwrap_or(ElasticError::Connection {
            endpoint: "<none>".to_string(),
            reason: "no endpoints configured".to_string(),
        }))
    }

    async fn expect_success(resp: reqwest::Response) -> Result<reqwest::Response, ElasticError> {
        let status = resp.status();
        if status.is_success() {
            return Ok(resp);
        }
        let body = resp.text().await.unwrap_or_default();
        Err(ElasticError::ResponseCode {
            status: status.as_u16(),
            body,
        })
    }

    async fn json_body(resp: reqwest::Response) -> Result<Value, ElasticError> {
        resp.json::<Value>()
            .await
            .map_err(|e| ElasticError::InvalidResponse(e.to_string()))
    }
}

enum RequestBody<'a> {
    Json(&'a Value),
    Ndjson(&'a str),
}

#[async_trait]
impl SearchBackend for ElasticClient {
    async fn init_index(&self, mappings: &Value) -> Result<(), ElasticError> {
        let path = format!("/{}", self.index);
        let head = self
            .request(reqwest::Method::HEAD, &path, None)
            .await?;
        if head.status().is_success() {
            return Ok(());
        }
        let resp = self
            .request(reqwest::Method::PUT, &path, Some(RequestBody::Json(mappings)))
            .await?;
        Self::expect_success(resp).await?;
        Ok(())
    }

    async fn delete_index(&self) -> Result<(), ElasticError> {
        let path = format!("/{}", self.index);
        let resp = self.request(reqwest::Method::DELETE, &path, None).await?;
        if resp.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(());
        }
        Self::expect_success(resp).await?;
        Ok(())
    }

    async fn index_doc(
        &self,
        collection: &str,
        body: &Value,
        id: Option<&str>,
    ) -> Result<(), ElasticError> {
        let resp = match id {
            Some(id) => {
                let path = format!("/{}/{collection}/{id}", self.index);
                self.request(reqwest::Method::PUT, &path, Some(RequestBody::Json(body)))
                    .await?
            }
            None => {
                let path = format!("/{}/{collection}", self.index);
                self.request(reqwest::Method::POST, &path, Some(RequestBody::Json(body)))
                    .await?
            }
        };
        Self::expect_success(resp).await?;
        Ok(())
    }

    async fn bulk_perform(&self, batch: &BulkBatch) -> Result<(), ElasticError> {
        if batch.is_empty() {
            return Ok(());
        }
        let path = format!("/{}/_bulk", self.index);
        let body = batch.render();
        let resp = self
            .request(reqwest::Method::POST, &path, Some(RequestBody::Ndjson(&body)))
            .await?;
        let resp = Self::expect_success(resp).await?;
        let result = Self::json_body(resp).await?;

        if result["errors"].as_bool() != Some(true) {
            return Ok(());
        }
        let empty = Vec::new();
        let items = result["items"].as_array().unwrap_or(&empty);
        let mut failed = 0usize;
        let mut first = String::new();
        for item in items {
            if let Some(error) = item["index"]["error"].as_object() {
                failed += 1;
                if first.is_empty() {
                    first = Value::Object(error.clone()).to_string();
                }
            }
        }
        Err(ElasticError::BulkFail { failed, first })
    }

    async fn search(&self, collection: &str, query: &Value) -> Result<Value, ElasticError> {
        let path = format!("/{}/{collection}/_search", self.index);
        let resp = self
            .request(reqwest::Method::POST, &path, Some(RequestBody::Json(query)))
            .await?;
        let resp = Self::expect_success(resp).await?;
        Self::json_body(resp).await
    }

    async fn delete_by_query(&self, collection: &str, query: &Value) -> Result<(), ElasticError> {
        let path = format!("/{}/{collection}/_delete_by_query", self.index);
        let resp = self
            .request(reqwest::Method::POST, &path, Some(RequestBody::Json(query)))
            .await?;
        Self::expect_success(resp).await?;
        Ok(())
    }

    async fn count_doc(&self, collection: &str) -> Result<u64, ElasticError> {
        let path = format!("/{}/{collection}/_count", self.index);
        let resp = self.request(reqwest::Method::GET, &path, None).await?;
        let resp = Self::expect_success(resp).await?;
        let body = Self::json_body(resp).await?;
        body["count"]
            .as_u64()
            .ok_or_else(|| ElasticError::InvalidResponse("count missing from response".into()))
    }
}
