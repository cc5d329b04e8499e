//! tfplugin6 gRPC service
//!
//! Bridges the protocol messages Terraform sends to the [`Provider`],
//! [`Resource`](crate::resource::Resource) and
//! [`DataSource`](crate::data_source::DataSource) traits. Resources and data
//! sources are built from the provider's factories on every call and
//! configured with the provider data stored by ConfigureProvider.

use crate::context::Context;
use crate::data_source::{
    ConfigureDataSourceRequest, DataSourceSchemaRequest, DataSourceWithConfigure,
    ReadDataSourceRequest, ValidateDataSourceConfigRequest,
};
use crate::error::TfplugError;
use crate::proto;
use crate::provider::{
    ConfigureProviderRequest, DataSourceFactory, Provider, ProviderSchemaRequest,
    ResourceFactory, ValidateProviderConfigRequest,
};
use crate::resource::{
    ConfigureResourceRequest, CreateResourceRequest, DeleteResourceRequest,
    ImportResourceStateRequest, ReadResourceRequest, ResourceSchemaRequest,
    ResourceWithConfigure, UpdateResourceRequest, UpgradeResourceStateRequest,
    ValidateResourceConfigRequest,
};
use crate::schema::{Attribute, NestingMode, Schema, ValidatorRequest};
use crate::schema::PlanModifierRequest;
use crate::types::{
    AttributePath, AttributePathStep, ClientCapabilities, Diagnostic, DiagnosticSeverity, Dynamic,
    DynamicValue, RawState,
};
use std::any::Any;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{OnceCell, RwLock};
use tonic::{Request, Response, Status};

type ProviderData = Option<Arc<dyn Any + Send + Sync>>;

pub struct ProviderService<P: Provider> {
    provider: RwLock<P>,
    provider_data: RwLock<ProviderData>,
    resources: HashMap<String, ResourceFactory>,
    data_sources: HashMap<String, DataSourceFactory>,
    resource_schemas: OnceCell<HashMap<String, Schema>>,
    data_source_schemas: OnceCell<HashMap<String, Schema>>,
    root: Context,
}

impl<P: Provider + 'static> ProviderService<P> {
    pub fn new(provider: P) -> Self {
        let resources = provider.resources();
        let data_sources = provider.data_sources();
        Self {
            provider: RwLock::new(provider),
            provider_data: RwLock::new(None),
            resources,
            data_sources,
            resource_schemas: OnceCell::new(),
            data_source_schemas: OnceCell::new(),
            root: Context::new(),
        }
    }

    /// Context cancelled by StopProvider
    pub fn context(&self) -> Context {
        self.root.clone()
    }

    async fn resource_schemas(&self) -> &HashMap<String, Schema> {
        self.resource_schemas
            .get_or_init(|| async {
                let mut schemas = HashMap::new();
                for (name, factory) in &self.resources {
                    let response = factory()
                        .schema(self.root.child(), ResourceSchemaRequest)
                        .await;
                    schemas.insert(name.clone(), response.schema);
                }
                schemas
            })
            .await
    }

    async fn data_source_schemas(&self) -> &HashMap<String, Schema> {
        self.data_source_schemas
            .get_or_init(|| async {
                let mut schemas = HashMap::new();
                for (name, factory) in &self.data_sources {
                    let response = factory()
                        .schema(self.root.child(), DataSourceSchemaRequest)
                        .await;
                    schemas.insert(name.clone(), response.schema);
                }
                schemas
            })
            .await
    }

    async fn resource_schema(&self, type_name: &str) -> Result<&Schema, Status> {
        self.resource_schemas()
            .await
            .get(type_name)
            .ok_or_else(|| TfplugError::ResourceNotFound(type_name.to_string()).into())
    }

    async fn data_source_schema(&self, type_name: &str) -> Result<&Schema, Status> {
        self.data_source_schemas()
            .await
            .get(type_name)
            .ok_or_else(|| TfplugError::DataSourceNotFound(type_name.to_string()).into())
    }

    async fn configured_resource(
        &self,
        ctx: &Context,
        type_name: &str,
    ) -> Result<(Box<dyn ResourceWithConfigure>, Vec<Diagnostic>), Status> {
        let factory = self
            .resources
            .get(type_name)
            .ok_or_else(|| Status::from(TfplugError::ResourceNotFound(type_name.to_string())))?;
        let mut resource = factory();
        let provider_data = self.provider_data.read().await.clone();
        let response = resource
            .configure(ctx.clone(), ConfigureResourceRequest { provider_data })
            .await;
        Ok((resource, response.diagnostics))
    }

    async fn configured_data_source(
        &self,
        ctx: &Context,
        type_name: &str,
    ) -> Result<(Box<dyn DataSourceWithConfigure>, Vec<Diagnostic>), Status> {
        let factory = self
            .data_sources
            .get(type_name)
            .ok_or_else(|| Status::from(TfplugError::DataSourceNotFound(type_name.to_string())))?;
        let mut data_source = factory();
        let provider_data = self.provider_data.read().await.clone();
        let response = data_source
            .configure(ctx.clone(), ConfigureDataSourceRequest { provider_data })
            .await;
        Ok((data_source, response.diagnostics))
    }
}

#[tonic::async_trait]
impl<P: Provider + 'static> proto::provider_server::Provider for ProviderService<P> {
    async fn get_metadata(
        &self,
        _request: Request<proto::get_metadata::Request>,
    ) -> Result<Response<proto::get_metadata::Response>, Status> {
        let mut resources: Vec<_> = self.resources.keys().cloned().collect();
        let mut data_sources: Vec<_> = self.data_sources.keys().cloned().collect();
        resources.sort();
        data_sources.sort();

        Ok(Response::new(proto::get_metadata::Response {
            server_capabilities: Some(server_capabilities()),
            diagnostics: vec![],
            resources: resources
                .into_iter()
                .map(|type_name| proto::get_metadata::ResourceMetadata { type_name })
                .collect(),
            data_sources: data_sources
                .into_iter()
                .map(|type_name| proto::get_metadata::DataSourceMetadata { type_name })
                .collect(),
        }))
    }

    async fn get_provider_schema(
        &self,
        _request: Request<proto::get_provider_schema::Request>,
    ) -> Result<Response<proto::get_provider_schema::Response>, Status> {
        let ctx = self.root.child();
        let provider_schema = self
            .provider
            .read()
            .await
            .schema(ctx, ProviderSchemaRequest)
            .await;

        let resource_schemas = self
            .resource_schemas()
            .await
            .iter()
            .map(|(name, schema)| (name.clone(), schema_to_proto(schema)))
            .collect();
        let data_source_schemas = self
            .data_source_schemas()
            .await
            .iter()
            .map(|(name, schema)| (name.clone(), schema_to_proto(schema)))
            .collect();

        Ok(Response::new(proto::get_provider_schema::Response {
            provider: Some(schema_to_proto(&provider_schema.schema)),
            resource_schemas,
            data_source_schemas,
            diagnostics: diagnostics_to_proto(&provider_schema.diagnostics),
            provider_meta: None,
            server_capabilities: Some(server_capabilities()),
        }))
    }

    async fn validate_provider_config(
        &self,
        request: Request<proto::validate_provider_config::Request>,
    ) -> Result<Response<proto::validate_provider_config::Response>, Status> {
        let req = request.into_inner();
        let config = decode_value(req.config.as_ref())?;
        let provider = self.provider.read().await;

        let schema = provider.schema(self.root.child(), ProviderSchemaRequest).await;
        let mut diagnostics = vec![];
        run_validators(
            &schema.schema.block.attributes,
            &AttributePath::root(),
            &config.value,
            &mut diagnostics,
        );
        let response = provider
            .validate(self.root.child(), ValidateProviderConfigRequest { config })
            .await;
        diagnostics.extend(response.diagnostics);

        Ok(Response::new(proto::validate_provider_config::Response {
            diagnostics: diagnostics_to_proto(&diagnostics),
        }))
    }

    async fn configure_provider(
        &self,
        request: Request<proto::configure_provider::Request>,
    ) -> Result<Response<proto::configure_provider::Response>, Status> {
        let req = request.into_inner();
        tracing::debug!(terraform_version = %req.terraform_version, "ConfigureProvider");

        let config = decode_value(req.config.as_ref())?;
        let response = self
            .provider
            .write()
            .await
            .configure(
                self.root.child(),
                ConfigureProviderRequest {
                    terraform_version: req.terraform_version,
                    config,
                    client_capabilities: client_capabilities(req.client_capabilities),
                },
            )
            .await;

        *self.provider_data.write().await = response.provider_data;

        Ok(Response::new(proto::configure_provider::Response {
            diagnostics: diagnostics_to_proto(&response.diagnostics),
        }))
    }

    async fn validate_resource_config(
        &self,
        request: Request<proto::validate_resource_config::Request>,
    ) -> Result<Response<proto::validate_resource_config::Response>, Status> {
        let req = request.into_inner();
        let ctx = self.root.child();
        let config = decode_value(req.config.as_ref())?;

        let mut diagnostics = vec![];
        let schema = self.resource_schema(&req.type_name).await?;
        run_validators(
            &schema.block.attributes,
            &AttributePath::root(),
            &config.value,
            &mut diagnostics,
        );

        let (resource, _) = self.configured_resource(&ctx, &req.type_name).await?;
        let response = resource
            .validate(
                ctx,
                ValidateResourceConfigRequest {
                    type_name: req.type_name,
                    config,
                    client_capabilities: client_capabilities(req.client_capabilities),
                },
            )
            .await;
        diagnostics.extend(response.diagnostics);

        Ok(Response::new(proto::validate_resource_config::Response {
            diagnostics: diagnostics_to_proto(&diagnostics),
        }))
    }

    async fn validate_data_resource_config(
        &self,
        request: Request<proto::validate_data_resource_config::Request>,
    ) -> Result<Response<proto::validate_data_resource_config::Response>, Status> {
        let req = request.into_inner();
        let ctx = self.root.child();
        let config = decode_value(req.config.as_ref())?;

        let mut diagnostics = vec![];
        let schema = self.data_source_schema(&req.type_name).await?;
        run_validators(
            &schema.block.attributes,
            &AttributePath::root(),
            &config.value,
            &mut diagnostics,
        );

        let (data_source, _) = self.configured_data_source(&ctx, &req.type_name).await?;
        let response = data_source
            .validate(
                ctx,
                ValidateDataSourceConfigRequest {
                    type_name: req.type_name,
                    config,
                },
            )
            .await;
        diagnostics.extend(response.diagnostics);

        Ok(Response::new(proto::validate_data_resource_config::Response {
            diagnostics: diagnostics_to_proto(&diagnostics),
        }))
    }

    async fn upgrade_resource_state(
        &self,
        request: Request<proto::upgrade_resource_state::Request>,
    ) -> Result<Response<proto::upgrade_resource_state::Response>, Status> {
        let req = request.into_inner();
        let ctx = self.root.child();
        let schema = self.resource_schema(&req.type_name).await?;
        let (resource, _) = self.configured_resource(&ctx, &req.type_name).await?;

        let raw_state = req
            .raw_state
            .map(|raw| RawState {
                json: (!raw.json.is_empty()).then_some(raw.json),
                flatmap: raw.flatmap,
            })
            .unwrap_or_default();

        let mut response = resource
            .upgrade_state(
                ctx,
                UpgradeResourceStateRequest {
                    type_name: req.type_name,
                    version: req.version,
                    schema_version: schema.version,
                    raw_state,
                },
            )
            .await;
        schema.conform(&mut response.upgraded_state);

        Ok(Response::new(proto::upgrade_resource_state::Response {
            upgraded_state: Some(encode_value(&response.upgraded_state)?),
            diagnostics: diagnostics_to_proto(&response.diagnostics),
        }))
    }

    async fn read_resource(
        &self,
        request: Request<proto::read_resource::Request>,
    ) -> Result<Response<proto::read_resource::Response>, Status> {
        let req = request.into_inner();
        let ctx = self.root.child();
        tracing::debug!(type_name = %req.type_name, "ReadResource");

        let schema = self.resource_schema(&req.type_name).await?;
        let (resource, mut diagnostics) = self.configured_resource(&ctx, &req.type_name).await?;
        let current_state = decode_value(req.current_state.as_ref())?;

        let response = resource
            .read(
                ctx,
                ReadResourceRequest {
                    type_name: req.type_name,
                    current_state,
                    private: req.private,
                    client_capabilities: client_capabilities(req.client_capabilities),
                },
            )
            .await;
        diagnostics.extend(response.diagnostics);

        let mut new_state = response.new_state.unwrap_or_else(DynamicValue::null);
        schema.conform(&mut new_state);

        Ok(Response::new(proto::read_resource::Response {
            new_state: Some(encode_value(&new_state)?),
            diagnostics: diagnostics_to_proto(&diagnostics),
            private: response.private,
            deferred: None,
        }))
    }

    async fn plan_resource_change(
        &self,
        request: Request<proto::plan_resource_change::Request>,
    ) -> Result<Response<proto::plan_resource_change::Response>, Status> {
        let req = request.into_inner();
        tracing::debug!(type_name = %req.type_name, "PlanResourceChange");

        let schema = self.resource_schema(&req.type_name).await?;
        let prior_state = decode_value(req.prior_state.as_ref())?;
        let proposed = decode_value(req.proposed_new_state.as_ref())?;
        let config = decode_value(req.config.as_ref())?;

        // Destroy plans pass through untouched
        if proposed.is_null() {
            return Ok(Response::new(proto::plan_resource_change::Response {
                planned_state: Some(encode_value(&proposed)?),
                requires_replace: vec![],
                planned_private: req.prior_private,
                diagnostics: vec![],
                legacy_type_system: false,
                deferred: None,
            }));
        }

        let outcome = plan_change(schema, &prior_state, proposed, &config);

        Ok(Response::new(proto::plan_resource_change::Response {
            planned_state: Some(encode_value(&outcome.planned_state)?),
            requires_replace: outcome.requires_replace.iter().map(path_to_proto).collect(),
            planned_private: req.prior_private,
            diagnostics: diagnostics_to_proto(&outcome.diagnostics),
            legacy_type_system: false,
            deferred: None,
        }))
    }

    async fn apply_resource_change(
        &self,
        request: Request<proto::apply_resource_change::Request>,
    ) -> Result<Response<proto::apply_resource_change::Response>, Status> {
        let req = request.into_inner();
        let ctx = self.root.child();

        let schema = self.resource_schema(&req.type_name).await?;
        let (resource, mut diagnostics) = self.configured_resource(&ctx, &req.type_name).await?;
        let prior_state = decode_value(req.prior_state.as_ref())?;
        let planned_state = decode_value(req.planned_state.as_ref())?;
        let config = decode_value(req.config.as_ref())?;

        let (mut new_state, private) = if planned_state.is_null() {
            tracing::debug!(type_name = %req.type_name, "ApplyResourceChange: delete");
            let response = resource
                .delete(
                    ctx,
                    DeleteResourceRequest {
                        type_name: req.type_name,
                        prior_state: prior_state.clone(),
                        planned_private: req.planned_private,
                    },
                )
                .await;
            let failed = crate::types::has_errors(&response.diagnostics);
            diagnostics.extend(response.diagnostics);
            // A failed delete keeps the object in state
            let state = if failed {
                prior_state
            } else {
                DynamicValue::null()
            };
            (state, vec![])
        } else if prior_state.is_null() {
            tracing::debug!(type_name = %req.type_name, "ApplyResourceChange: create");
            let response = resource
                .create(
                    ctx,
                    CreateResourceRequest {
                        type_name: req.type_name,
                        planned_state,
                        config,
                        planned_private: req.planned_private,
                    },
                )
                .await;
            diagnostics.extend(response.diagnostics);
            (response.new_state, response.private)
        } else {
            tracing::debug!(type_name = %req.type_name, "ApplyResourceChange: update");
            let response = resource
                .update(
                    ctx,
                    UpdateResourceRequest {
                        type_name: req.type_name,
                        prior_state,
                        planned_state,
                        config,
                        planned_private: req.planned_private,
                    },
                )
                .await;
            diagnostics.extend(response.diagnostics);
            (response.new_state, response.private)
        };
        schema.conform(&mut new_state);

        Ok(Response::new(proto::apply_resource_change::Response {
            new_state: Some(encode_value(&new_state)?),
            private,
            diagnostics: diagnostics_to_proto(&diagnostics),
            legacy_type_system: false,
        }))
    }

    async fn import_resource_state(
        &self,
        request: Request<proto::import_resource_state::Request>,
    ) -> Result<Response<proto::import_resource_state::Response>, Status> {
        let req = request.into_inner();
        let ctx = self.root.child();
        tracing::debug!(type_name = %req.type_name, id = %req.id, "ImportResourceState");

        let schema = self.resource_schema(&req.type_name).await?;
        let (resource, mut diagnostics) = self.configured_resource(&ctx, &req.type_name).await?;
        let response = resource
            .import_state(
                ctx,
                ImportResourceStateRequest {
                    type_name: req.type_name,
                    id: req.id,
                    client_capabilities: client_capabilities(req.client_capabilities),
                },
            )
            .await;
        diagnostics.extend(response.diagnostics);

        let mut imported_resources = Vec::with_capacity(response.imported_resources.len());
        for mut imported in response.imported_resources {
            schema.conform(&mut imported.state);
            imported_resources.push(proto::import_resource_state::ImportedResource {
                type_name: imported.type_name,
                state: Some(encode_value(&imported.state)?),
                private: imported.private,
            });
        }

        Ok(Response::new(proto::import_resource_state::Response {
            imported_resources,
            diagnostics: diagnostics_to_proto(&diagnostics),
            deferred: None,
        }))
    }

    async fn read_data_source(
        &self,
        request: Request<proto::read_data_source::Request>,
    ) -> Result<Response<proto::read_data_source::Response>, Status> {
        let req = request.into_inner();
        let ctx = self.root.child();
        tracing::debug!(type_name = %req.type_name, "ReadDataSource");

        let schema = self.data_source_schema(&req.type_name).await?;
        let (data_source, mut diagnostics) =
            self.configured_data_source(&ctx, &req.type_name).await?;
        let config = decode_value(req.config.as_ref())?;

        let response = data_source
            .read(
                ctx,
                ReadDataSourceRequest {
                    type_name: req.type_name,
                    config,
                    client_capabilities: client_capabilities(req.client_capabilities),
                },
            )
            .await;
        diagnostics.extend(response.diagnostics);

        let mut state = response.state;
        schema.conform(&mut state);

        Ok(Response::new(proto::read_data_source::Response {
            state: Some(encode_value(&state)?),
            diagnostics: diagnostics_to_proto(&diagnostics),
            deferred: None,
        }))
    }

    async fn stop_provider(
        &self,
        _request: Request<proto::stop_provider::Request>,
    ) -> Result<Response<proto::stop_provider::Response>, Status> {
        tracing::info!("StopProvider received, cancelling in-flight requests");
        self.root.cancel();
        Ok(Response::new(proto::stop_provider::Response {
            error: String::new(),
        }))
    }
}

/// Result of planning a create or update
pub struct PlannedChange {
    pub planned_state: DynamicValue,
    pub requires_replace: Vec<AttributePath>,
    pub diagnostics: Vec<Diagnostic>,
}

/// Plans a create or update.
///
/// When the resource is new, or the proposed state differs from the prior
/// state, computed attributes the configuration leaves null become unknown.
/// Plan modifiers then run on every attribute, nested ones included.
pub fn plan_change(
    schema: &Schema,
    prior_state: &DynamicValue,
    proposed: DynamicValue,
    config: &DynamicValue,
) -> PlannedChange {
    let resource_exists = !prior_state.is_null();
    let mut planned_state = proposed;

    if !resource_exists || planned_state.value != prior_state.value {
        mark_computed_unknown(&schema.block.attributes, &config.value, &mut planned_state.value);
    }

    let mut requires_replace = vec![];
    let mut diagnostics = vec![];
    apply_plan_modifiers(
        &schema.block.attributes,
        &AttributePath::root(),
        &PlanValues {
            config: &config.value,
            prior: &prior_state.value,
        },
        &mut planned_state.value,
        resource_exists,
        &mut requires_replace,
        &mut diagnostics,
    );

    PlannedChange {
        planned_state,
        requires_replace,
        diagnostics,
    }
}

fn child<'a>(value: &'a Dynamic, name: &str) -> &'a Dynamic {
    match value {
        Dynamic::Map(entries) => entries.get(name).unwrap_or(&Dynamic::Null),
        _ => &Dynamic::Null,
    }
}

fn element(value: &Dynamic, idx: usize) -> &Dynamic {
    match value {
        Dynamic::List(items) => items.get(idx).unwrap_or(&Dynamic::Null),
        _ => &Dynamic::Null,
    }
}

/// The element of `list` whose `name` attribute equals `key`
fn matching_element<'a>(list: &'a Dynamic, name: &str, key: &Dynamic) -> &'a Dynamic {
    if key.is_null() || key.is_unknown() {
        return &Dynamic::Null;
    }
    match list {
        Dynamic::List(items) => items
            .iter()
            .find(|item| child(item, name) == key)
            .unwrap_or(&Dynamic::Null),
        _ => &Dynamic::Null,
    }
}

fn mark_computed_unknown(attributes: &[Attribute], config: &Dynamic, planned: &mut Dynamic) {
    let Dynamic::Map(entries) = planned else {
        return;
    };

    for attr in attributes {
        let config_value = child(config, &attr.name);
        if attr.computed && config_value.is_null() {
            entries.insert(attr.name.clone(), Dynamic::Unknown);
            continue;
        }

        let (Some(nested), Some(planned_value)) = (&attr.nested_type, entries.get_mut(&attr.name))
        else {
            continue;
        };
        match (nested.nesting, planned_value) {
            (NestingMode::List, Dynamic::List(items)) => {
                for (idx, item) in items.iter_mut().enumerate() {
                    mark_computed_unknown(&nested.attributes, element(config_value, idx), item);
                }
            }
            (NestingMode::Single, item) => {
                mark_computed_unknown(&nested.attributes, config_value, item);
            }
            _ => {}
        }
    }
}

struct PlanValues<'a> {
    config: &'a Dynamic,
    prior: &'a Dynamic,
}

fn apply_plan_modifiers(
    attributes: &[Attribute],
    base: &AttributePath,
    values: &PlanValues<'_>,
    planned: &mut Dynamic,
    resource_exists: bool,
    requires_replace: &mut Vec<AttributePath>,
    diagnostics: &mut Vec<Diagnostic>,
) {
    let Dynamic::Map(entries) = planned else {
        return;
    };

    for attr in attributes {
        let path = base.clone().attribute(&attr.name);
        let config_value = child(values.config, &attr.name);
        let prior_value = child(values.prior, &attr.name);
        let mut plan_value = entries.get(&attr.name).cloned().unwrap_or(Dynamic::Null);

        for modifier in &attr.plan_modifiers {
            let response = modifier.modify(PlanModifierRequest {
                config_value: DynamicValue::new(config_value.clone()),
                state_value: DynamicValue::new(prior_value.clone()),
                plan_value: DynamicValue::new(plan_value),
                path: path.clone(),
                resource_exists,
            });
            plan_value = response.plan_value.value;
            if response.requires_replace {
                requires_replace.push(path.clone());
            }
            diagnostics.extend(response.diagnostics);
        }

        if let Some(nested) = &attr.nested_type {
            match (nested.nesting, &mut plan_value) {
                (NestingMode::List, Dynamic::List(items)) => {
                    for (idx, item) in items.iter_mut().enumerate() {
                        let prior_item = match &nested.match_by {
                            Some(name) => matching_element(prior_value, name, child(item, name)),
                            None => element(prior_value, idx),
                        };
                        apply_plan_modifiers(
                            &nested.attributes,
                            &path.clone().index(idx as i64),
                            &PlanValues {
                                config: element(config_value, idx),
                                prior: prior_item,
                            },
                            item,
                            resource_exists && !prior_item.is_null(),
                            requires_replace,
                            diagnostics,
                        );
                    }
                }
                (NestingMode::Single, item) => {
                    apply_plan_modifiers(
                        &nested.attributes,
                        &path,
                        &PlanValues {
                            config: config_value,
                            prior: prior_value,
                        },
                        item,
                        resource_exists && !prior_value.is_null(),
                        requires_replace,
                        diagnostics,
                    );
                }
                _ => {}
            }
        }

        entries.insert(attr.name.clone(), plan_value);
    }
}

fn run_validators(
    attributes: &[Attribute],
    base: &AttributePath,
    config: &Dynamic,
    diagnostics: &mut Vec<Diagnostic>,
) {
    for attr in attributes {
        let path = base.clone().attribute(&attr.name);
        let value = child(config, &attr.name);

        for validator in &attr.validators {
            let response = validator.validate(ValidatorRequest {
                config_value: DynamicValue::new(value.clone()),
                path: path.clone(),
            });
            diagnostics.extend(response.diagnostics);
        }

        if let Some(nested) = &attr.nested_type {
            match (nested.nesting, value) {
                (NestingMode::List, Dynamic::List(items)) => {
                    for (idx, item) in items.iter().enumerate() {
                        run_validators(
                            &nested.attributes,
                            &path.clone().index(idx as i64),
                            item,
                            diagnostics,
                        );
                    }
                }
                (NestingMode::Single, item) => {
                    run_validators(&nested.attributes, &path, item, diagnostics)
                }
                _ => {}
            }
        }
    }
}

fn server_capabilities() -> proto::ServerCapabilities {
    proto::ServerCapabilities {
        plan_destroy: false,
        get_provider_schema_optional: false,
        move_resource_state: false,
    }
}

fn client_capabilities(capabilities: Option<proto::ClientCapabilities>) -> ClientCapabilities {
    capabilities
        .map(|c| ClientCapabilities {
            deferral_allowed: c.deferral_allowed,
            write_only_attributes_allowed: c.write_only_attributes_allowed,
        })
        .unwrap_or_default()
}

fn decode_value(value: Option<&proto::DynamicValue>) -> Result<DynamicValue, Status> {
    let decoded = match value {
        None => Ok(DynamicValue::null()),
        Some(v) if !v.msgpack.is_empty() => DynamicValue::decode_msgpack(&v.msgpack),
        Some(v) => DynamicValue::decode_json(&v.json),
    };
    decoded.map_err(Status::from)
}

fn encode_value(value: &DynamicValue) -> Result<proto::DynamicValue, Status> {
    Ok(proto::DynamicValue {
        msgpack: value.encode_msgpack()?,
        json: vec![],
    })
}

pub fn schema_to_proto(schema: &Schema) -> proto::Schema {
    proto::Schema {
        version: schema.version,
        block: Some(proto::schema::Block {
            version: schema.version,
            attributes: schema.block.attributes.iter().map(attribute_to_proto).collect(),
            block_types: vec![],
            description: schema.block.description.clone(),
            description_kind: proto::StringKind::Plain as i32,
            deprecated: schema.block.deprecated,
        }),
    }
}

fn attribute_to_proto(attr: &Attribute) -> proto::schema::Attribute {
    let nested_type = attr.nested_type.as_ref().map(|nested| proto::schema::Object {
        attributes: nested.attributes.iter().map(attribute_to_proto).collect(),
        nesting: match nested.nesting {
            NestingMode::Single => proto::schema::object::NestingMode::Single,
            NestingMode::List => proto::schema::object::NestingMode::List,
        } as i32,
        min_items: 0,
        max_items: 0,
    });

    proto::schema::Attribute {
        name: attr.name.clone(),
        // Nested attributes describe their type through nested_type alone
        r#type: if nested_type.is_some() {
            vec![]
        } else {
            attr.r#type.encode()
        },
        nested_type,
        description: attr.description.clone(),
        required: attr.required,
        optional: attr.optional,
        computed: attr.computed,
        sensitive: attr.sensitive,
        description_kind: proto::StringKind::Plain as i32,
        deprecated: attr.deprecated,
        write_only: false,
    }
}

fn diagnostics_to_proto(diagnostics: &[Diagnostic]) -> Vec<proto::Diagnostic> {
    diagnostics
        .iter()
        .map(|d| proto::Diagnostic {
            severity: match d.severity {
                DiagnosticSeverity::Invalid => proto::diagnostic::Severity::Invalid,
                DiagnosticSeverity::Error => proto::diagnostic::Severity::Error,
                DiagnosticSeverity::Warning => proto::diagnostic::Severity::Warning,
            } as i32,
            summary: d.summary.clone(),
            detail: d.detail.clone(),
            attribute: d.attribute.as_ref().map(path_to_proto),
        })
        .collect()
}

fn path_to_proto(path: &AttributePath) -> proto::AttributePath {
    use proto::attribute_path::step::Selector;

    proto::AttributePath {
        steps: path
            .steps
            .iter()
            .map(|step| proto::attribute_path::Step {
                selector: Some(match step {
                    AttributePathStep::AttributeName(name) => Selector::AttributeName(name.clone()),
                    AttributePathStep::ElementKeyString(key) => {
                        Selector::ElementKeyString(key.clone())
                    }
                    AttributePathStep::ElementKeyInt(idx) => Selector::ElementKeyInt(*idx),
                }),
            })
            .collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plan_modifier::{RequiresReplace, UseStateForUnknown};
    use crate::proto::provider_server::Provider as _;
    use crate::provider::{
        ConfigureProviderResponse, ProviderMetadataRequest, ProviderMetadataResponse,
        ProviderSchemaResponse,
    };
    use crate::resource::{
        CreateResourceResponse, ConfigureResourceResponse, DeleteResourceResponse, ReadResourceResponse,
        Resource, ResourceSchemaResponse, UpdateResourceResponse,
    };
    use crate::schema::{AttributeBuilder, AttributeType, SchemaBuilder};
    use async_trait::async_trait;
    use std::collections::BTreeMap;

    struct WidgetResource;

    #[async_trait]
    impl Resource for WidgetResource {
        fn type_name(&self) -> &str {
            "test_widget"
        }

        async fn schema(&self, _ctx: Context, _request: ResourceSchemaRequest) -> ResourceSchemaResponse {
            ResourceSchemaResponse {
                schema: SchemaBuilder::new()
                    .attribute(
                        AttributeBuilder::new("key", AttributeType::String)
                            .required()
                            .plan_modifier(RequiresReplace)
                            .build(),
                    )
                    .attribute(AttributeBuilder::new("name", AttributeType::String).required().build())
                    .attribute(
                        AttributeBuilder::new("id", AttributeType::String)
                            .computed()
                            .plan_modifier(UseStateForUnknown)
                            .build(),
                    )
                    .attribute(AttributeBuilder::new("updated_at", AttributeType::String).computed().build())
                    .attribute(
                        AttributeBuilder::nested_list(
                            "parts",
                            vec![
                                AttributeBuilder::new("key", AttributeType::String).required().build(),
                                AttributeBuilder::new("id", AttributeType::String)
                                    .computed()
                                    .plan_modifier(UseStateForUnknown)
                                    .build(),
                            ],
                        )
                        .match_elements_by("key")
                        .optional()
                        .build(),
                    )
                    .build(),
                diagnostics: vec![],
            }
        }

        async fn create(&self, _ctx: Context, request: CreateResourceRequest) -> CreateResourceResponse {
            let mut state = request.planned_state;
            state.set_string(&AttributePath::new("id"), "w-1").unwrap();
            state.set_string(&AttributePath::new("updated_at"), "now").unwrap();
            CreateResourceResponse {
                new_state: state,
                private: vec![],
                diagnostics: vec![],
            }
        }

        async fn read(&self, _ctx: Context, request: ReadResourceRequest) -> ReadResourceResponse {
            let gone = request
                .current_state
                .get_string(&AttributePath::new("key"))
                .map(|k| k == "gone")
                .unwrap_or(false);
            ReadResourceResponse {
                new_state: (!gone).then_some(request.current_state),
                diagnostics: vec![],
                private: request.private,
            }
        }

        async fn update(&self, _ctx: Context, request: UpdateResourceRequest) -> UpdateResourceResponse {
            UpdateResourceResponse {
                new_state: request.planned_state,
                private: vec![],
                diagnostics: vec![],
            }
        }

        async fn delete(&self, _ctx: Context, _request: DeleteResourceRequest) -> DeleteResourceResponse {
            DeleteResourceResponse { diagnostics: vec![] }
        }
    }

    #[async_trait]
    impl ResourceWithConfigure for WidgetResource {
        async fn configure(
            &mut self,
            _ctx: Context,
            _request: ConfigureResourceRequest,
        ) -> ConfigureResourceResponse {
            ConfigureResourceResponse { diagnostics: vec![] }
        }
    }

    struct TestProvider;

    #[async_trait]
    impl Provider for TestProvider {
        fn type_name(&self) -> &str {
            "test"
        }

        async fn metadata(&self, _ctx: Context, _request: ProviderMetadataRequest) -> ProviderMetadataResponse {
            ProviderMetadataResponse {
                type_name: "test".to_string(),
                version: "0.0.0".to_string(),
            }
        }

        async fn schema(&self, _ctx: Context, _request: ProviderSchemaRequest) -> ProviderSchemaResponse {
            ProviderSchemaResponse {
                schema: SchemaBuilder::new().build(),
                diagnostics: vec![],
            }
        }

        async fn configure(
            &mut self,
            _ctx: Context,
            _request: ConfigureProviderRequest,
        ) -> ConfigureProviderResponse {
            ConfigureProviderResponse {
                diagnostics: vec![],
                provider_data: None,
            }
        }

        fn resources(&self) -> HashMap<String, ResourceFactory> {
            let mut resources: HashMap<String, ResourceFactory> = HashMap::new();
            resources.insert("test_widget".to_string(), Box::new(|| Box::new(WidgetResource)));
            resources
        }

        fn data_sources(&self) -> HashMap<String, DataSourceFactory> {
            HashMap::new()
        }
    }

    fn widget(key: &str, name: &str) -> DynamicValue {
        let mut value = DynamicValue::object();
        value.set_string(&AttributePath::new("key"), key).unwrap();
        value.set_string(&AttributePath::new("name"), name).unwrap();
        value
    }

    fn encode(value: &DynamicValue) -> Option<proto::DynamicValue> {
        Some(encode_value(value).unwrap())
    }

    fn decode(value: Option<proto::DynamicValue>) -> DynamicValue {
        decode_value(value.as_ref()).unwrap()
    }

    #[tokio::test]
    async fn schema_lists_registered_resources() {
        let service = ProviderService::new(TestProvider);
        let response = service
            .get_provider_schema(Request::new(proto::get_provider_schema::Request {}))
            .await
            .unwrap()
            .into_inner();

        let widget = &response.resource_schemas["test_widget"];
        let attrs = &widget.block.as_ref().unwrap().attributes;
        let parts = attrs.iter().find(|a| a.name == "parts").unwrap();
        assert!(parts.r#type.is_empty());
        assert_eq!(
            parts.nested_type.as_ref().unwrap().nesting,
            proto::schema::object::NestingMode::List as i32
        );
        let key = attrs.iter().find(|a| a.name == "key").unwrap();
        assert_eq!(key.r#type, br#""string""#.to_vec());
    }

    #[tokio::test]
    async fn create_plan_marks_computed_unknown() {
        let service = ProviderService::new(TestProvider);
        let config = widget("alpha", "Alpha");

        let response = service
            .plan_resource_change(Request::new(proto::plan_resource_change::Request {
                type_name: "test_widget".to_string(),
                prior_state: encode(&DynamicValue::null()),
                proposed_new_state: encode(&config),
                config: encode(&config),
                ..Default::default()
            }))
            .await
            .unwrap()
            .into_inner();

        let planned = decode(response.planned_state);
        assert!(planned.get(&AttributePath::new("id")).unwrap().is_unknown());
        assert!(planned.get(&AttributePath::new("updated_at")).unwrap().is_unknown());
        assert!(response.requires_replace.is_empty());
    }

    #[tokio::test]
    async fn update_plan_keeps_stable_ids_and_flags_replacement() {
        let service = ProviderService::new(TestProvider);

        let mut prior = widget("alpha", "Alpha");
        prior.set_string(&AttributePath::new("id"), "w-1").unwrap();
        prior.set_string(&AttributePath::new("updated_at"), "yesterday").unwrap();

        let config = widget("beta", "Alpha");
        let mut proposed = config.clone();
        proposed.set_string(&AttributePath::new("id"), "w-1").unwrap();
        proposed.set_string(&AttributePath::new("updated_at"), "yesterday").unwrap();

        let response = service
            .plan_resource_change(Request::new(proto::plan_resource_change::Request {
                type_name: "test_widget".to_string(),
                prior_state: encode(&prior),
                proposed_new_state: encode(&proposed),
                config: encode(&config),
                ..Default::default()
            }))
            .await
            .unwrap()
            .into_inner();

        let planned = decode(response.planned_state);
        assert_eq!(planned.get_string(&AttributePath::new("id")).unwrap(), "w-1");
        assert!(planned.get(&AttributePath::new("updated_at")).unwrap().is_unknown());
        assert_eq!(response.requires_replace.len(), 1);
    }

    #[tokio::test]
    async fn unchanged_plan_is_a_no_op() {
        let service = ProviderService::new(TestProvider);
        let mut prior = widget("alpha", "Alpha");
        prior.set_string(&AttributePath::new("id"), "w-1").unwrap();
        prior.set_string(&AttributePath::new("updated_at"), "yesterday").unwrap();

        let response = service
            .plan_resource_change(Request::new(proto::plan_resource_change::Request {
                type_name: "test_widget".to_string(),
                prior_state: encode(&prior),
                proposed_new_state: encode(&prior),
                config: encode(&widget("alpha", "Alpha")),
                ..Default::default()
            }))
            .await
            .unwrap()
            .into_inner();

        // Planned state comes back with every schema attribute present
        let schema = WidgetResource.schema(Context::new(), ResourceSchemaRequest).await.schema;
        schema.conform(&mut prior);
        assert_eq!(decode(response.planned_state), prior);
    }

    #[test]
    fn nested_computed_values_follow_prior_elements() {
        let schema = tokio_test::block_on(WidgetResource.schema(Context::new(), ResourceSchemaRequest)).schema;
        let part = |key: &str, id: Option<&str>| {
            let mut entries = BTreeMap::from([("key".to_string(), Dynamic::from(key))]);
            entries.insert("id".to_string(), id.map(Dynamic::from).unwrap_or(Dynamic::Null));
            Dynamic::Map(entries)
        };

        let mut prior = widget("alpha", "Alpha");
        prior.set_string(&AttributePath::new("id"), "w-1").unwrap();
        prior.set_list(&AttributePath::new("parts"), vec![part("a", Some("p-1"))]).unwrap();

        let mut config = widget("alpha", "Alpha");
        config
            .set_list(&AttributePath::new("parts"), vec![part("a", None), part("b", None)])
            .unwrap();

        let outcome = plan_change(&schema, &prior, config.clone(), &config);
        let planned = outcome.planned_state;
        assert_eq!(
            planned.get_string(&AttributePath::new("parts").index(0).attribute("id")).unwrap(),
            "p-1"
        );
        assert!(planned
            .get(&AttributePath::new("parts").index(1).attribute("id"))
            .unwrap()
            .is_unknown());
    }

    #[test]
    fn inserted_element_does_not_inherit_neighbour_state() {
        let schema = tokio_test::block_on(WidgetResource.schema(Context::new(), ResourceSchemaRequest)).schema;
        let part = |key: &str, id: Option<&str>| {
            let mut entries = BTreeMap::from([("key".to_string(), Dynamic::from(key))]);
            entries.insert("id".to_string(), id.map(Dynamic::from).unwrap_or(Dynamic::Null));
            Dynamic::Map(entries)
        };
        let parts = AttributePath::new("parts");

        let mut prior = widget("alpha", "Alpha");
        prior.set_string(&AttributePath::new("id"), "w-1").unwrap();
        prior
            .set_list(&parts, vec![part("a", Some("p-a")), part("c", Some("p-c"))])
            .unwrap();

        let mut config = widget("alpha", "Alpha");
        config
            .set_list(&parts, vec![part("a", None), part("b", None), part("c", None)])
            .unwrap();

        let planned = plan_change(&schema, &prior, config.clone(), &config).planned_state;
        assert_eq!(planned.get_string(&parts.clone().index(0).attribute("id")).unwrap(), "p-a");
        assert!(planned.get(&parts.clone().index(1).attribute("id")).unwrap().is_unknown());
        assert_eq!(planned.get_string(&parts.clone().index(2).attribute("id")).unwrap(), "p-c");
    }

    #[tokio::test]
    async fn apply_create_returns_conformed_state() {
        let service = ProviderService::new(TestProvider);
        let mut planned = widget("alpha", "Alpha");
        planned.mark_unknown(&AttributePath::new("id")).unwrap();
        planned.mark_unknown(&AttributePath::new("updated_at")).unwrap();

        let response = service
            .apply_resource_change(Request::new(proto::apply_resource_change::Request {
                type_name: "test_widget".to_string(),
                prior_state: encode(&DynamicValue::null()),
                planned_state: encode(&planned),
                config: encode(&widget("alpha", "Alpha")),
                ..Default::default()
            }))
            .await
            .unwrap()
            .into_inner();

        let state = decode(response.new_state);
        assert_eq!(state.get_string(&AttributePath::new("id")).unwrap(), "w-1");
        assert_eq!(state.get(&AttributePath::new("parts")), Some(&Dynamic::Null));
    }

    #[tokio::test]
    async fn read_of_missing_object_returns_null_state() {
        let service = ProviderService::new(TestProvider);
        let response = service
            .read_resource(Request::new(proto::read_resource::Request {
                type_name: "test_widget".to_string(),
                current_state: encode(&widget("gone", "Gone")),
                ..Default::default()
            }))
            .await
            .unwrap()
            .into_inner();

        assert!(decode(response.new_state).is_null());
    }

    #[tokio::test]
    async fn unknown_type_is_not_found() {
        let service = ProviderService::new(TestProvider);
        let status = service
            .read_resource(Request::new(proto::read_resource::Request {
                type_name: "test_nothing".to_string(),
                ..Default::default()
            }))
            .await
            .unwrap_err();

        assert_eq!(status.code(), tonic::Code::NotFound);
    }

    #[tokio::test]
    async fn stop_provider_cancels_root_context() {
        let service = ProviderService::new(TestProvider);
        let ctx = service.context().child();

        service
            .stop_provider(Request::new(proto::stop_provider::Request {}))
            .await
            .unwrap();
        assert!(ctx.is_cancelled());
    }
}
