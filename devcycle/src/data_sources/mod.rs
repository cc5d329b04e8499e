//! Read-only data sources
//!
//! The entity lookups share [`LookupDataSource`]; evaluated variables talk
//! to the bucketing API instead and live in [`evaluated_variable`].

pub mod environment;
pub mod evaluated_variable;
pub mod feature;
pub mod project;
pub mod variable;

use async_trait::async_trait;
use tfplug::context::Context;
use tfplug::data_source::{
    ConfigureDataSourceRequest, ConfigureDataSourceResponse, DataSource,
    DataSourceSchemaRequest, DataSourceSchemaResponse, DataSourceWithConfigure,
    ReadDataSourceRequest, ReadDataSourceResponse,
};
use tfplug::schema::{Attribute, Schema};
use tfplug::{AttributeBuilder, AttributeType, DynamicValue};

use crate::api::{ApiError, Client};
use crate::error::ProviderError;
use crate::provider_data::{downcast, DevCycleProviderData};

/// Fetches one entity by the identifying attributes in `config`
#[async_trait]
pub trait Lookup: Default + Send + Sync + 'static {
    const TYPE_NAME: &'static str;

    fn schema(&self) -> Schema;

    async fn read(&self, client: &Client, config: &DynamicValue)
        -> Result<DynamicValue, ProviderError>;
}

pub struct LookupDataSource<L: Lookup> {
    lookup: L,
    provider_data: Option<DevCycleProviderData>,
}

impl<L: Lookup> Default for LookupDataSource<L> {
    fn default() -> Self {
        Self {
            lookup: L::default(),
            provider_data: None,
        }
    }
}

impl<L: Lookup> LookupDataSource<L> {
    pub fn new() -> Self {
        Self::default()
    }

    async fn read_remote(&self, config: &DynamicValue) -> Result<DynamicValue, ProviderError> {
        let client = self
            .provider_data
            .as_ref()
            .ok_or(ProviderError::NotConfigured)?
            .management()?;
        self.lookup.read(client, config).await
    }
}

#[async_trait]
impl<L: Lookup> DataSource for LookupDataSource<L> {
    fn type_name(&self) -> &str {
        L::TYPE_NAME
    }

    async fn schema(&self, _ctx: Context, _request: DataSourceSchemaRequest) -> DataSourceSchemaResponse {
        DataSourceSchemaResponse {
            schema: self.lookup.schema(),
            diagnostics: vec![],
        }
    }

    async fn read(&self, _ctx: Context, request: ReadDataSourceRequest) -> ReadDataSourceResponse {
        match self.read_remote(&request.config).await {
            Ok(state) => ReadDataSourceResponse {
                state,
                diagnostics: vec![],
            },
            Err(e) => ReadDataSourceResponse {
                state: request.config,
                diagnostics: vec![e.diagnostic(format!("Failed to read {}", L::TYPE_NAME))],
            },
        }
    }
}

#[async_trait]
impl<L: Lookup> DataSourceWithConfigure for LookupDataSource<L> {
    async fn configure(
        &mut self,
        _ctx: Context,
        request: ConfigureDataSourceRequest,
    ) -> ConfigureDataSourceResponse {
        self.provider_data = downcast(request.provider_data);
        ConfigureDataSourceResponse {
            diagnostics: vec![],
        }
    }
}

pub(crate) fn lookup_string(name: &str, description: &str) -> Attribute {
    AttributeBuilder::new(name, AttributeType::String)
        .description(description)
        .required()
        .build()
}

pub(crate) fn computed_string(name: &str, description: &str) -> Attribute {
    AttributeBuilder::new(name, AttributeType::String)
        .description(description)
        .computed()
        .build()
}

/// A 404 from a lookup names what was looked for
pub(crate) fn not_found(entity: &str, key: &str, err: ApiError) -> ProviderError {
    if err.is_not_found() {
        ProviderError::InvalidState(format!("{} {:?} does not exist", entity, key))
    } else {
        err.into()
    }
}
