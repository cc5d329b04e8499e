//! Client-credentials token exchange against the DevCycle auth server

use reqwest::StatusCode;
use serde::Deserialize;

use super::client::{build_http_client, error_from_response, normalize_base_url, parse_json};
use super::error::ApiError;

pub const DEFAULT_AUTH_URL: &str = "https://auth.devcycle.com";
pub const AUDIENCE: &str = "https://api.devcycle.com/";

#[derive(Debug, Clone, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    #[serde(default)]
    pub expires_in: Option<u64>,
    #[serde(default)]
    pub token_type: Option<String>,
}

pub struct OAuthClient {
    http_client: reqwest::Client,
    auth_url: String,
}

impl OAuthClient {
    pub fn new(auth_url: &str) -> Result<Self, ApiError> {
        Ok(Self {
            http_client: build_http_client(30)?,
            auth_url: normalize_base_url(auth_url)?,
        })
    }

    /// POST {auth_url}/oauth/token. The lifetime of the returned token is
    /// logged, not tracked.
    pub async fn exchange(
        &self,
        client_id: &str,
        client_secret: &str,
    ) -> Result<TokenResponse, ApiError> {
        let url = format!("{}/oauth/token", self.auth_url);
        tracing::debug!("Requesting access token from {}", url);

        let response = self
            .http_client
            .post(&url)
            .form(&[
                ("grant_type", "client_credentials"),
                ("client_id", client_id),
                ("client_secret", client_secret),
                ("audience", AUDIENCE),
            ])
            .send()
            .await?;

        let status = response.status();
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            return Err(ApiError::AuthError);
        }
        if !status.is_success() {
            return Err(error_from_response(response).await);
        }

        let token: TokenResponse = parse_json(response).await?;
        if token.access_token.is_empty() {
            return Err(ApiError::ParseError(
                "token response has an empty access_token".to_string(),
            ));
        }
        tracing::info!(
            "Obtained {} access token, expires in {}s",
            token.token_type.as_deref().unwrap_or("bearer"),
            token.expires_in.unwrap_or_default()
        );
        Ok(token)
    }
}
