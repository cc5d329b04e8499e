pub mod api;
pub mod auth;
pub mod codec;
pub mod data_sources;
pub mod error;
pub mod provider_data;
pub mod resources;

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tfplug::context::Context;
use tfplug::provider::{
    ConfigureProviderRequest, ConfigureProviderResponse, DataSourceFactory, Provider,
    ProviderMetadataRequest, ProviderMetadataResponse, ProviderSchemaRequest,
    ProviderSchemaResponse, ResourceFactory,
};
use tfplug::schema::Attribute;
use tfplug::{
    AttributeBuilder, AttributeType, DataSourceWithConfigure, Diagnostic, ResourceWithConfigure,
    SchemaBuilder,
};

use crate::api::{Client, EvaluationClient, OAuthClient, RetryConfig};
use crate::auth::{Credentials, ProviderSettings};
use crate::codec::VariableType;
use crate::data_sources::environment::EnvironmentLookup;
use crate::data_sources::evaluated_variable::EvaluatedVariableDataSource;
use crate::data_sources::feature::FeatureLookup;
use crate::data_sources::project::ProjectLookup;
use crate::data_sources::variable::VariableLookup;
use crate::data_sources::{Lookup, LookupDataSource};
use crate::provider_data::DevCycleProviderData;
use crate::resources::environment::EnvironmentEntity;
use crate::resources::feature::FeatureEntity;
use crate::resources::project::ProjectEntity;
use crate::resources::variable::VariableEntity;
use crate::resources::{ManagedEntity, ManagedResource};

#[derive(Default)]
pub struct DevCycleProvider;

impl DevCycleProvider {
    pub fn new() -> Self {
        Self
    }

    /// Builds both clients. A management client exists only when
    /// credentials resolved; the evaluation client only with an SDK token.
    async fn build_provider_data(
        &self,
        ctx: Context,
        settings: &ProviderSettings,
        diagnostics: &mut Vec<Diagnostic>,
    ) -> DevCycleProviderData {
        let management = match OAuthClient::new(&settings.auth_url) {
            Ok(oauth) => {
                let resolution = auth::resolve(settings, &oauth).await;
                diagnostics.extend(resolution.diagnostics);
                match resolution.credentials {
                    Credentials::Configured { access_token, .. } => match Client::with_config(
                        &settings.api_url,
                        &access_token,
                        RetryConfig::default(),
                        ctx,
                    ) {
                        Ok(client) => Some(client),
                        Err(e) => {
                            diagnostics.push(Diagnostic::error(
                                "Failed to create API client",
                                e.to_string(),
                            ));
                            None
                        }
                    },
                    Credentials::Unconfigured => {
                        tracing::warn!("No DevCycle management credentials found");
                        diagnostics.push(Diagnostic::warning(
                            "Provider not configured",
                            "No access_token or client credentials were found in the provider \
                             configuration or environment. Managing DevCycle resources will fail.",
                        ));
                        None
                    }
                }
            }
            Err(e) => {
                diagnostics.push(Diagnostic::error("Invalid auth_url", e.to_string()));
                None
            }
        };

        let evaluation = match &settings.server_sdk_token {
            Some(token) => match EvaluationClient::new(&settings.bucketing_api_url, token) {
                Ok(client) => Some(client),
                Err(e) => {
                    diagnostics.push(Diagnostic::error(
                        "Invalid bucketing_api_url",
                        e.to_string(),
                    ));
                    None
                }
            },
            None => None,
        };

        DevCycleProviderData::new(management, evaluation)
    }
}

fn string_attribute(name: &str, description: &str) -> Attribute {
    AttributeBuilder::new(name, AttributeType::String)
        .description(description)
        .optional()
        .build()
}

fn secret_attribute(name: &str, description: &str) -> Attribute {
    AttributeBuilder::new(name, AttributeType::String)
        .description(description)
        .optional()
        .sensitive()
        .build()
}

fn managed<E: ManagedEntity>() -> (String, ResourceFactory) {
    (
        E::TYPE_NAME.to_string(),
        Box::new(|| Box::new(ManagedResource::<E>::new()) as Box<dyn ResourceWithConfigure>),
    )
}

fn lookup<L: Lookup>() -> (String, DataSourceFactory) {
    (
        L::TYPE_NAME.to_string(),
        Box::new(|| Box::new(LookupDataSource::<L>::new()) as Box<dyn DataSourceWithConfigure>),
    )
}

fn evaluated(variable_type: VariableType) -> (String, DataSourceFactory) {
    (
        EvaluatedVariableDataSource::type_name_for(variable_type),
        Box::new(move || {
            Box::new(EvaluatedVariableDataSource::new(variable_type)) as Box<dyn DataSourceWithConfigure>
        }),
    )
}

#[async_trait]
impl Provider for DevCycleProvider {
    fn type_name(&self) -> &str {
        "devcycle"
    }

    async fn metadata(
        &self,
        _ctx: Context,
        _request: ProviderMetadataRequest,
    ) -> ProviderMetadataResponse {
        ProviderMetadataResponse {
            type_name: "devcycle".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }

    async fn schema(&self, _ctx: Context, _request: ProviderSchemaRequest) -> ProviderSchemaResponse {
        let schema = SchemaBuilder::new()
            .description("Manages DevCycle projects, environments, features and variables")
            .attribute(secret_attribute(
                "access_token",
                "Management API token. Takes precedence over client credentials.",
            ))
            .attribute(string_attribute(
                "client_id",
                "OAuth client ID. Can also be set with DEVCYCLE_CLIENT_ID.",
            ))
            .attribute(secret_attribute(
                "client_secret",
                "OAuth client secret. Can also be set with DEVCYCLE_CLIENT_SECRET.",
            ))
            .attribute(secret_attribute(
                "server_sdk_token",
                "Server SDK token used to evaluate variables. Can also be set with DEVCYCLE_SERVER_TOKEN.",
            ))
            .attribute(string_attribute(
                "api_url",
                "Management API base URL. Defaults to https://api.devcycle.com.",
            ))
            .attribute(string_attribute(
                "auth_url",
                "OAuth base URL. Defaults to https://auth.devcycle.com.",
            ))
            .attribute(string_attribute(
                "bucketing_api_url",
                "Bucketing API base URL. Defaults to https://bucketing-api.devcycle.com.",
            ))
            .build();

        ProviderSchemaResponse {
            schema,
            diagnostics: vec![],
        }
    }

    async fn configure(
        &mut self,
        ctx: Context,
        request: ConfigureProviderRequest,
    ) -> ConfigureProviderResponse {
        let mut diagnostics = Vec::new();

        let settings = match ProviderSettings::from_config(&request.config, |name| {
            std::env::var(name).ok()
        }) {
            Ok(settings) => settings,
            Err(e) => {
                diagnostics.push(Diagnostic::error(
                    "Invalid provider configuration",
                    e.to_string(),
                ));
                return ConfigureProviderResponse {
                    diagnostics,
                    provider_data: None,
                };
            }
        };

        let provider_data = self
            .build_provider_data(ctx, &settings, &mut diagnostics)
            .await;

        ConfigureProviderResponse {
            diagnostics,
            provider_data: Some(Arc::new(provider_data)),
        }
    }

    fn resources(&self) -> HashMap<String, ResourceFactory> {
        HashMap::from([
            managed::<ProjectEntity>(),
            managed::<EnvironmentEntity>(),
            managed::<FeatureEntity>(),
            managed::<VariableEntity>(),
        ])
    }

    fn data_sources(&self) -> HashMap<String, DataSourceFactory> {
        HashMap::from([
            lookup::<ProjectLookup>(),
            lookup::<EnvironmentLookup>(),
            lookup::<FeatureLookup>(),
            lookup::<VariableLookup>(),
            evaluated(VariableType::Boolean),
            evaluated(VariableType::String),
            evaluated(VariableType::Number),
            evaluated(VariableType::Json),
        ])
    }
}
