//! Persistence collaborator
//!
//! The store never talks to the backend directly. Everything it persists
//! goes through [`Persistence`]; [`HttpPersistence`] is the REST
//! implementation used by hosts, tests substitute their own.

use crate::error::{Error, Result};
use crate::normalize;
use crate::region::Region;
use async_trait::async_trait;
use reqwest::{Method, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use spanlab_common::config::ApiConfig;
use std::time::Duration;

const USER_AGENT: &str = concat!("spanlab-editor/", env!("CARGO_PKG_VERSION"));

/// Body sent on submit and update
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SubmissionBody {
    /// Annotation pk; only sent on update-style requests
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<i64>,
    pub result: Vec<Region>,
    pub draft_id: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_prediction: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_annotation: Option<i64>,
    pub offset: f64,
    /// Seconds spent on the annotation across sessions
    pub lead_time: f64,
    /// Task lock token for optimistic concurrency
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unique_id: Option<String>,
    /// Caller-supplied fields (review decision, comment, ...)
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl SubmissionBody {
    /// Keys serialized from the typed fields
    pub const TYPED_FIELDS: [&'static str; 8] = [
        "id",
        "result",
        "draft_id",
        "parent_prediction",
        "parent_annotation",
        "offset",
        "lead_time",
        "unique_id",
    ];

    /// Merge caller-supplied fields; keys of typed fields are ignored
    pub fn with_extra(mut self, extra: Map<String, Value>) -> Self {
        for (key, value) in extra {
            if Self::TYPED_FIELDS.contains(&key.as_str()) {
                tracing::debug!(key = %key, "Extra field shadows a typed field, ignored");
                continue;
            }
            self.extra.insert(key, value);
        }
        self
    }

    /// Draft body: the same payload without `id`
    pub fn into_draft(self) -> Map<String, Value> {
        let SubmissionBody {
            result,
            draft_id,
            parent_prediction,
            parent_annotation,
            offset,
            lead_time,
            extra,
            ..
        } = self;

        let mut body = Map::new();
        body.insert("result".into(), serde_json::to_value(result).unwrap_or(Value::Array(Vec::new())));
        body.insert("draft_id".into(), draft_id.map(Value::from).unwrap_or(Value::Null));
        if let Some(pk) = parent_prediction {
            body.insert("parent_prediction".into(), Value::from(pk));
        }
        if let Some(pk) = parent_annotation {
            body.insert("parent_annotation".into(), Value::from(pk));
        }
        body.insert("offset".into(), Value::from(offset));
        body.insert("lead_time".into(), Value::from(lead_time));
        for (key, value) in extra {
            body.insert(key, value);
        }
        body
    }
}

/// Where a new draft is attached
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DraftTarget {
    /// Draft for a task that has no persisted annotation yet
    Task(i64),
    /// Draft on top of an existing annotation
    Annotation { task_id: i64, pk: i64 },
}

/// Backend operations the editor relies on
///
/// Every method returns the backend's JSON answer (or `Value::Null` for
/// empty bodies). Failures are reported, never retried.
#[async_trait]
pub trait Persistence: Send + Sync {
    async fn submit(&self, task_id: i64, body: &SubmissionBody) -> Result<Value>;

    async fn update(&self, task_id: i64, pk: i64, body: &SubmissionBody) -> Result<Value>;

    async fn create_draft(&self, target: DraftTarget, body: &Map<String, Value>) -> Result<Value>;

    async fn update_draft(&self, draft_id: i64, body: &Map<String, Value>) -> Result<Value>;

    async fn delete_draft(&self, draft_id: i64) -> Result<()>;

    async fn delete_annotation(&self, task_id: i64, pk: i64) -> Result<()>;

    /// Persist the full task metadata blob
    async fn save_offset(&self, task_id: i64, meta: &Value) -> Result<Value>;
}

/// `id` field of a backend answer
pub fn response_id(response: &Value) -> Option<i64> {
    response.get("id").and_then(|v| normalize::coerce_id("response id", v))
}

/// REST implementation of [`Persistence`]
#[derive(Debug, Clone)]
pub struct HttpPersistence {
    http_client: reqwest::Client,
    base_url: String,
    token: Option<String>,
}

impl HttpPersistence {
    pub fn new(config: &ApiConfig) -> Result<Self> {
        let http_client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()?;

        Ok(Self {
            http_client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            token: config.token.clone(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn send<B: Serialize + ?Sized + Sync>(
        &self,
        method: Method,
        path: &str,
        body: Option<&B>,
    ) -> Result<(StatusCode, Value)> {
        let url = format!("{}{}", self.base_url, path);
        tracing::debug!(method = %method, url = %url, "Backend request");

        let mut request = self.http_client.request(method.clone(), &url);
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }
        if let Some(body) = body {
            request = request.json(body);
        }

        let response = request.send().await?;
        let status = response.status();
        let text = response.text().await?;

        if !status.is_success() {
            tracing::warn!(method = %method, url = %url, status = status.as_u16(), "Backend request failed");
            return Err(Error::Api {
                status: status.as_u16(),
                message: error_message(&text, status),
            });
        }

        let value = if text.trim().is_empty() {
            Value::Null
        } else {
            serde_json::from_str(&text)?
        };
        Ok((status, value))
    }
}

fn error_message(text: &str, status: StatusCode) -> String {
    if let Ok(Value::Object(map)) = serde_json::from_str::<Value>(text) {
        for key in ["detail", "message", "error"] {
            if let Some(msg) = map.get(key).and_then(Value::as_str) {
                return msg.to_string();
            }
        }
    }
    if text.trim().is_empty() {
        status
            .canonical_reason()
            .unwrap_or("request failed")
            .to_string()
    } else {
        text.trim().to_string()
    }
}

#[async_trait]
impl Persistence for HttpPersistence {
    async fn submit(&self, task_id: i64, body: &SubmissionBody) -> Result<Value> {
        let path = format!("/api/tasks/{}/annotations", task_id);
        match self.send(Method::POST, &path, Some(body)).await {
            Ok((_, value)) => {
                tracing::info!(task_id, pk = ?response_id(&value), "Annotation submitted");
                Ok(value)
            }
            Err(Error::Api { status: 409, message }) => {
                tracing::warn!(task_id, "Duplicate annotation rejected by backend");
                Err(Error::Api {
                    status: 409,
                    message: format!("duplicate annotation: {}", message),
                })
            }
            Err(e) => Err(e),
        }
    }

    async fn update(&self, task_id: i64, pk: i64, body: &SubmissionBody) -> Result<Value> {
        let path = format!("/api/annotations/{}", pk);
        let (_, value) = self.send(Method::PATCH, &path, Some(body)).await?;
        tracing::info!(task_id, pk, "Annotation updated");
        Ok(value)
    }

    async fn create_draft(&self, target: DraftTarget, body: &Map<String, Value>) -> Result<Value> {
        let path = match target {
            DraftTarget::Task(task_id) => format!("/api/tasks/{}/drafts", task_id),
            DraftTarget::Annotation { pk, .. } => format!("/api/annotations/{}/drafts", pk),
        };
        let (_, value) = self.send(Method::POST, &path, Some(body)).await?;
        tracing::info!(?target, draft_id = ?response_id(&value), "Draft created");
        Ok(value)
    }

    async fn update_draft(&self, draft_id: i64, body: &Map<String, Value>) -> Result<Value> {
        let path = format!("/api/drafts/{}", draft_id);
        let (_, value) = self.send(Method::PATCH, &path, Some(body)).await?;
        tracing::info!(draft_id, "Draft updated");
        Ok(value)
    }

    async fn delete_draft(&self, draft_id: i64) -> Result<()> {
        let path = format!("/api/drafts/{}", draft_id);
        self.send::<Value>(Method::DELETE, &path, None).await?;
        tracing::info!(draft_id, "Draft deleted");
        Ok(())
    }

    async fn delete_annotation(&self, task_id: i64, pk: i64) -> Result<()> {
        let path = format!("/api/annotations/{}", pk);
        self.send::<Value>(Method::DELETE, &path, None).await?;
        tracing::info!(task_id, pk, "Annotation deleted");
        Ok(())
    }

    async fn save_offset(&self, task_id: i64, meta: &Value) -> Result<Value> {
        let path = format!("/api/tasks/{}", task_id);
        let body = serde_json::json!({ "meta": meta });
        let (_, value) = self.send(Method::PATCH, &path, Some(&body)).await?;
        tracing::info!(task_id, "Task metadata saved");
        Ok(value)
    }
}
