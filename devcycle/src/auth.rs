//! Credential resolution for the management API
//!
//! Sources are tried in order and the first one that yields a token wins:
//! `access_token` in configuration, `client_id`/`client_secret` in
//! configuration, `DEVCYCLE_CLIENT_ID`/`DEVCYCLE_CLIENT_SECRET`, then
//! `DEVCYCLE_ACCESS_TOKEN`. A failed token exchange is a warning and the
//! next source is tried.

use tfplug::types::AttributePath;
use tfplug::{Diagnostic, DynamicValue};

use crate::api::evaluation::DEFAULT_BUCKETING_API_URL;
use crate::api::oauth::DEFAULT_AUTH_URL;
use crate::api::{OAuthClient, DEFAULT_API_URL};

pub const ENV_ACCESS_TOKEN: &str = "DEVCYCLE_ACCESS_TOKEN";
pub const ENV_CLIENT_ID: &str = "DEVCYCLE_CLIENT_ID";
pub const ENV_CLIENT_SECRET: &str = "DEVCYCLE_CLIENT_SECRET";
pub const ENV_SERVER_TOKEN: &str = "DEVCYCLE_SERVER_TOKEN";
pub const ENV_API_URL: &str = "DEVCYCLE_API_URL";
pub const ENV_AUTH_URL: &str = "DEVCYCLE_AUTH_URL";
pub const ENV_BUCKETING_API_URL: &str = "DEVCYCLE_BUCKETING_API_URL";

/// Credentials from one place, configuration or environment
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CredentialInputs {
    pub access_token: Option<String>,
    pub client_id: Option<String>,
    pub client_secret: Option<String>,
}

/// Provider configuration with environment fallbacks applied to everything
/// except management credentials, which keep their source for resolution
#[derive(Debug, Clone, PartialEq)]
pub struct ProviderSettings {
    pub config: CredentialInputs,
    pub env: CredentialInputs,
    pub server_sdk_token: Option<String>,
    pub api_url: String,
    pub auth_url: String,
    pub bucketing_api_url: String,
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.is_empty())
}

impl ProviderSettings {
    /// `env` looks up an environment variable; tests pass a map instead of
    /// the process environment
    pub fn from_config<F>(config: &DynamicValue, env: F) -> tfplug::Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let attr = |name: &str| -> tfplug::Result<Option<String>> {
            Ok(non_empty(config.get_string_opt(&AttributePath::new(name))?))
        };
        let var = |name: &str| non_empty(env(name));

        Ok(Self {
            config: CredentialInputs {
                access_token: attr("access_token")?,
                client_id: attr("client_id")?,
                client_secret: attr("client_secret")?,
            },
            env: CredentialInputs {
                access_token: var(ENV_ACCESS_TOKEN),
                client_id: var(ENV_CLIENT_ID),
                client_secret: var(ENV_CLIENT_SECRET),
            },
            server_sdk_token: attr("server_sdk_token")?.or_else(|| var(ENV_SERVER_TOKEN)),
            api_url: attr("api_url")?
                .or_else(|| var(ENV_API_URL))
                .unwrap_or_else(|| DEFAULT_API_URL.to_string()),
            auth_url: attr("auth_url")?
                .or_else(|| var(ENV_AUTH_URL))
                .unwrap_or_else(|| DEFAULT_AUTH_URL.to_string()),
            bucketing_api_url: attr("bucketing_api_url")?
                .or_else(|| var(ENV_BUCKETING_API_URL))
                .unwrap_or_else(|| DEFAULT_BUCKETING_API_URL.to_string()),
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenSource {
    ConfigAccessToken,
    ConfigClientCredentials,
    EnvClientCredentials,
    EnvAccessToken,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Credentials {
    Unconfigured,
    Configured {
        access_token: String,
        source: TokenSource,
    },
}

pub struct Resolution {
    pub credentials: Credentials,
    pub diagnostics: Vec<Diagnostic>,
}

async fn exchange(
    oauth: &OAuthClient,
    inputs: &CredentialInputs,
    origin: &str,
    diagnostics: &mut Vec<Diagnostic>,
) -> Option<String> {
    match (&inputs.client_id, &inputs.client_secret) {
        (Some(id), Some(secret)) => match oauth.exchange(id, secret).await {
            Ok(token) => Some(token.access_token),
            Err(e) => {
                tracing::warn!("OAuth exchange with {} credentials failed: {}", origin, e);
                diagnostics.push(Diagnostic::warning(
                    "Failed to obtain access token",
                    format!("Client credentials from {} were rejected: {}", origin, e),
                ));
                None
            }
        },
        (None, None) => None,
        _ => {
            diagnostics.push(Diagnostic::warning(
                "Incomplete client credentials",
                format!(
                    "Both client_id and client_secret must be set in {}; ignoring them",
                    origin
                ),
            ));
            None
        }
    }
}

pub async fn resolve(settings: &ProviderSettings, oauth: &OAuthClient) -> Resolution {
    let mut diagnostics = Vec::new();
    let configured = |access_token: String, source: TokenSource| {
        tracing::debug!("Using management credentials from {:?}", source);
        Credentials::Configured {
            access_token,
            source,
        }
    };

    let credentials = if let Some(token) = &settings.config.access_token {
        configured(token.clone(), TokenSource::ConfigAccessToken)
    } else if let Some(token) =
        exchange(oauth, &settings.config, "the provider configuration", &mut diagnostics).await
    {
        configured(token, TokenSource::ConfigClientCredentials)
    } else if let Some(token) =
        exchange(oauth, &settings.env, "the environment", &mut diagnostics).await
    {
        configured(token, TokenSource::EnvClientCredentials)
    } else if let Some(token) = &settings.env.access_token {
        configured(token.clone(), TokenSource::EnvAccessToken)
    } else {
        Credentials::Unconfigured
    };

    Resolution {
        credentials,
        diagnostics,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tfplug::Dynamic;

    fn config(pairs: &[(&str, &str)]) -> DynamicValue {
        let mut value = DynamicValue::object();
        for (name, v) in pairs {
            value.set_string(&AttributePath::new(name), *v).unwrap();
        }
        value
    }

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| vars.get(name).cloned()
    }

    #[test]
    fn urls_fall_back_to_environment_then_defaults() {
        let settings = ProviderSettings::from_config(
            &config(&[("api_url", "http://localhost:1")]),
            env(&[(ENV_API_URL, "http://ignored"), (ENV_AUTH_URL, "http://auth.local")]),
        )
        .unwrap();

        assert_eq!(settings.api_url, "http://localhost:1");
        assert_eq!(settings.auth_url, "http://auth.local");
        assert_eq!(settings.bucketing_api_url, DEFAULT_BUCKETING_API_URL);
    }

    #[test]
    fn empty_strings_are_unset() {
        let settings = ProviderSettings::from_config(
            &config(&[("access_token", ""), ("server_sdk_token", "")]),
            env(&[(ENV_SERVER_TOKEN, "dvc_server")]),
        )
        .unwrap();

        assert_eq!(settings.config.access_token, None);
        assert_eq!(settings.server_sdk_token.as_deref(), Some("dvc_server"));
    }

    #[test]
    fn null_config_reads_as_unset() {
        let mut value = DynamicValue::object();
        value
            .set_value(&AttributePath::new("access_token"), Dynamic::Null)
            .unwrap();
        let settings = ProviderSettings::from_config(&value, env(&[])).unwrap();
        assert_eq!(settings.config, CredentialInputs::default());
        assert_eq!(settings.api_url, DEFAULT_API_URL);
    }

    #[tokio::test]
    async fn config_token_needs_no_exchange() {
        let settings = ProviderSettings::from_config(
            &config(&[("access_token", "tok"), ("client_id", "id"), ("client_secret", "s")]),
            env(&[]),
        )
        .unwrap();
        // Unroutable auth server: any exchange attempt would fail
        let oauth = OAuthClient::new("http://127.0.0.1:9").unwrap();

        let resolution = resolve(&settings, &oauth).await;
        assert_eq!(
            resolution.credentials,
            Credentials::Configured {
                access_token: "tok".to_string(),
                source: TokenSource::ConfigAccessToken
            }
        );
        assert!(resolution.diagnostics.is_empty());
    }

    #[tokio::test]
    async fn half_configured_credentials_warn() {
        let settings =
            ProviderSettings::from_config(&config(&[("client_id", "id")]), env(&[])).unwrap();
        let oauth = OAuthClient::new("http://127.0.0.1:9").unwrap();

        let resolution = resolve(&settings, &oauth).await;
        assert_eq!(resolution.credentials, Credentials::Unconfigured);
        assert_eq!(resolution.diagnostics[0].summary, "Incomplete client credentials");
        assert!(!resolution.diagnostics[0].is_error());
    }
}
