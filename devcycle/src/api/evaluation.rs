//! Variable evaluation against the bucketing API

use reqwest::header::AUTHORIZATION;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};

use super::client::{build_http_client, error_from_response, normalize_base_url, parse_json};
use super::error::ApiError;
use crate::codec::VariableType;

pub const DEFAULT_BUCKETING_API_URL: &str = "https://bucketing-api.devcycle.com";

/// The user a variable is evaluated for
#[derive(Debug, Clone, Default, Serialize, PartialEq)]
pub struct EvaluationUser {
    pub user_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(rename = "appVersion", skip_serializing_if = "Option::is_none")]
    pub app_version: Option<String>,
    #[serde(rename = "appBuild", skip_serializing_if = "Option::is_none")]
    pub app_build: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EvaluatedVariable {
    #[serde(rename = "_id", default)]
    pub id: String,
    pub key: String,
    #[serde(rename = "type")]
    pub variable_type: VariableType,
    pub value: serde_json::Value,
}

#[derive(Clone)]
pub struct EvaluationClient {
    http_client: reqwest::Client,
    base_url: String,
    sdk_token: String,
}

impl EvaluationClient {
    pub fn new(base_url: &str, sdk_token: &str) -> Result<Self, ApiError> {
        Ok(Self {
            http_client: build_http_client(30)?,
            base_url: normalize_base_url(base_url)?,
            sdk_token: sdk_token.to_string(),
        })
    }

    /// `None` when the key does not resolve for this SDK token
    pub async fn variable(
        &self,
        user: &EvaluationUser,
        key: &str,
    ) -> Result<Option<EvaluatedVariable>, ApiError> {
        let url = format!(
            "{}/v1/variables/{}",
            self.base_url,
            urlencoding::encode(key)
        );
        tracing::debug!("Evaluating variable {} for user {}", key, user.user_id);

        let response = self
            .http_client
            .post(&url)
            .header(AUTHORIZATION, &self.sdk_token)
            .json(user)
            .send()
            .await?;

        match response.status() {
            StatusCode::NOT_FOUND => {
                tracing::debug!("Variable {} not found, using default", key);
                Ok(None)
            }
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Err(ApiError::AuthError),
            status if status.is_success() => parse_json(response).await.map(Some),
            _ => Err(error_from_response(response).await),
        }
    }
}
