//! Shared plumbing for the management API entity endpoints

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::marker::PhantomData;

use super::client::Client;
use super::error::ApiError;

/// Error body returned by the management API
#[derive(Debug, Deserialize)]
pub struct ApiErrorResponse {
    #[serde(default)]
    pub message: Option<serde_json::Value>,
    #[serde(default)]
    pub error: Option<String>,
}

impl ApiErrorResponse {
    /// Flattens `message`, which is either a string or a list of strings
    pub fn summary(&self) -> Option<String> {
        match &self.message {
            Some(serde_json::Value::String(s)) => Some(s.clone()),
            Some(serde_json::Value::Array(items)) => Some(
                items
                    .iter()
                    .map(|v| v.as_str().map(str::to_string).unwrap_or_else(|| v.to_string()))
                    .collect::<Vec<_>>()
                    .join("; "),
            ),
            _ => self.error.clone(),
        }
    }
}

/// An entity exposed under `/v1/projects`
pub trait ApiResource: Send + Sync + 'static {
    type Remote: DeserializeOwned + Send;
    type Create: Serialize + Send + Sync;
    type Update: Serialize + Send + Sync;

    /// Singular, for log lines and diagnostics
    const NAME: &'static str;

    /// Collection path, scoped to `project` for everything but projects
    fn collection_path(project: Option<&str>) -> String;

    fn item_path(project: Option<&str>, item: &str) -> String {
        format!(
            "{}/{}",
            Self::collection_path(project),
            urlencoding::encode(item)
        )
    }
}

/// CRUD calls for one entity type, optionally scoped to a project
pub struct Endpoint<'a, R> {
    client: &'a Client,
    project: Option<String>,
    _resource: PhantomData<R>,
}

impl<'a, R: ApiResource> Endpoint<'a, R> {
    pub fn new(client: &'a Client, project: Option<&str>) -> Self {
        Self {
            client,
            project: project.map(str::to_string),
            _resource: PhantomData,
        }
    }

    /// POST {collection}
    pub async fn create(&self, request: &R::Create) -> Result<R::Remote, ApiError> {
        tracing::debug!(entity = R::NAME, "creating");
        self.client
            .post(&R::collection_path(self.project.as_deref()), request)
            .await
    }

    /// GET {collection}/{item}
    pub async fn get(&self, item: &str) -> Result<R::Remote, ApiError> {
        self.client
            .get(&R::item_path(self.project.as_deref(), item))
            .await
    }

    /// PATCH {collection}/{item}
    pub async fn update(&self, item: &str, request: &R::Update) -> Result<R::Remote, ApiError> {
        tracing::debug!(entity = R::NAME, item, "updating");
        self.client
            .patch(&R::item_path(self.project.as_deref(), item), request)
            .await
    }

    /// DELETE {collection}/{item}
    pub async fn delete(&self, item: &str) -> Result<(), ApiError> {
        tracing::debug!(entity = R::NAME, item, "deleting");
        self.client
            .delete(&R::item_path(self.project.as_deref(), item))
            .await
    }
}

/// Path segment for a project id or key
pub fn project_path(project: Option<&str>, collection: &str) -> String {
    format!(
        "/v1/projects/{}/{}",
        urlencoding::encode(project.unwrap_or_default()),
        collection
    )
}
