//! Helpers shared by the integration suites
#![allow(dead_code)]

use devcycle::DevCycleProvider;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::any::Any;
use std::sync::Arc;
use tfplug::context::Context;
use tfplug::data_source::ConfigureDataSourceRequest;
use tfplug::provider::{ConfigureProviderRequest, Provider};
use tfplug::resource::ConfigureResourceRequest;
use tfplug::types::{AttributePath, ClientCapabilities, DynamicValue};
use tfplug::{DataSourceWithConfigure, ResourceWithConfigure};

pub const ACCESS_TOKEN: &str = "test-access-token";

const KEY_CHARS: &[u8] = b"abcdefghijklmnopqrstuvwxyz0123456789-";

/// A valid entity key, stable for a given seed so failures reproduce
pub fn key_fixture(seed: u64) -> String {
    let mut rng = StdRng::seed_from_u64(seed);
    let suffix: String = (0..10)
        .map(|_| KEY_CHARS[rng.gen_range(0..KEY_CHARS.len())] as char)
        .collect();
    format!("tf-{}", suffix)
}

pub fn attr(name: &str) -> AttributePath {
    AttributePath::new(name)
}

pub fn capabilities() -> ClientCapabilities {
    ClientCapabilities {
        deferral_allowed: false,
        write_only_attributes_allowed: false,
    }
}

/// Provider configuration pointing every API at `server_url`
pub fn provider_config(server_url: &str) -> DynamicValue {
    let mut config = DynamicValue::object();
    config.set_string(&attr("access_token"), ACCESS_TOKEN).unwrap();
    config.set_string(&attr("api_url"), server_url).unwrap();
    config.set_string(&attr("auth_url"), server_url).unwrap();
    config
        .set_string(&attr("bucketing_api_url"), server_url)
        .unwrap();
    config
}

pub async fn configure(config: DynamicValue) -> (DevCycleProvider, Option<Arc<dyn Any + Send + Sync>>) {
    let mut provider = DevCycleProvider::new();
    let response = provider
        .configure(
            Context::new(),
            ConfigureProviderRequest {
                terraform_version: "1.9.0".to_string(),
                config,
                client_capabilities: capabilities(),
            },
        )
        .await;
    assert!(
        !tfplug::types::has_errors(&response.diagnostics),
        "configure failed: {:?}",
        response.diagnostics
    );
    (provider, response.provider_data)
}

pub async fn resource(server_url: &str, type_name: &str) -> Box<dyn ResourceWithConfigure> {
    let (provider, provider_data) = configure(provider_config(server_url)).await;
    resource_with(&provider, provider_data, type_name).await
}

pub async fn resource_with(
    provider: &DevCycleProvider,
    provider_data: Option<Arc<dyn Any + Send + Sync>>,
    type_name: &str,
) -> Box<dyn ResourceWithConfigure> {
    let factories = provider.resources();
    let mut resource = factories.get(type_name).expect("resource registered")();
    resource
        .configure(Context::new(), ConfigureResourceRequest { provider_data })
        .await;
    resource
}

pub async fn data_source(server_url: &str, type_name: &str) -> Box<dyn DataSourceWithConfigure> {
    let (provider, provider_data) = configure(provider_config(server_url)).await;
    data_source_with(&provider, provider_data, type_name).await
}

pub async fn data_source_with(
    provider: &DevCycleProvider,
    provider_data: Option<Arc<dyn Any + Send + Sync>>,
    type_name: &str,
) -> Box<dyn DataSourceWithConfigure> {
    let factories = provider.data_sources();
    let mut data_source = factories.get(type_name).expect("data source registered")();
    data_source
        .configure(Context::new(), ConfigureDataSourceRequest { provider_data })
        .await;
    data_source
}
