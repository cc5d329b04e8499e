//! Managed resources
//!
//! Every DevCycle entity goes through the same CRUD adapter,
//! [`ManagedResource`]. An entity only describes its schema, how its state
//! maps to API bodies, and how it is addressed.

pub mod environment;
pub mod feature;
pub mod project;
pub mod variable;

use async_trait::async_trait;
use std::collections::BTreeMap;
use tfplug::context::Context;
use tfplug::plan_modifier::{RequiresReplace, UseStateForUnknown};
use tfplug::resource::{
    ConfigureResourceRequest, ConfigureResourceResponse, CreateResourceRequest,
    CreateResourceResponse, DeleteResourceRequest, DeleteResourceResponse,
    ImportResourceStateRequest, ImportResourceStateResponse, ReadResourceRequest,
    ReadResourceResponse, Resource, ResourceSchemaRequest, ResourceSchemaResponse,
    ResourceWithConfigure, UpdateResourceRequest, UpdateResourceResponse,
    ValidateResourceConfigRequest, ValidateResourceConfigResponse,
};
use tfplug::schema::{Attribute, Schema};
use tfplug::types::{has_errors, AttributePath};
use tfplug::validator::StringMatches;
use tfplug::{
    import_state_passthrough_id, import_state_split_id, AttributeBuilder, AttributeType,
    Diagnostic, Dynamic, DynamicValue,
};

use crate::api::common::{ApiResource, Endpoint};
use crate::api::Client;
use crate::error::ProviderError;
use crate::provider_data::{downcast, DevCycleProviderData};

pub const KEY_PATTERN: &str = "^[a-z0-9-_.]+$";

type Remote<E> = <<E as ManagedEntity>::Api as ApiResource>::Remote;
type CreateBody<E> = <<E as ManagedEntity>::Api as ApiResource>::Create;
type UpdateBody<E> = <<E as ManagedEntity>::Api as ApiResource>::Update;

/// One DevCycle entity as seen by [`ManagedResource`]
#[async_trait]
pub trait ManagedEntity: Default + Send + Sync + 'static {
    type Api: ApiResource;
    type Model: Send + Sync;

    const TYPE_NAME: &'static str;

    fn schema(&self) -> Schema;

    /// Attributes seeded by `terraform import`; several means a `/`
    /// separated identifier
    fn import_attributes(&self) -> Vec<AttributePath>;

    /// Reads config, plan or state. Unknown and null values read as absent.
    fn read_model(&self, value: &DynamicValue) -> Result<Self::Model, ProviderError>;

    fn write_model(&self, model: &Self::Model) -> Result<DynamicValue, ProviderError>;

    fn create_request(&self, model: &Self::Model) -> Result<CreateBody<Self>, ProviderError>;

    fn update_request(&self, model: &Self::Model) -> Result<UpdateBody<Self>, ProviderError>;

    /// Builds the new model from the API response. `local` supplies the
    /// values Terraform owns, such as the project reference as configured.
    fn merge_remote(
        &self,
        remote: Remote<Self>,
        local: &Self::Model,
    ) -> Result<Self::Model, ProviderError>;

    fn project<'m>(&self, model: &'m Self::Model) -> Option<&'m str>;

    /// Path segment addressing an existing entity
    fn item_ref(&self, model: &Self::Model) -> String;

    /// Checks beyond the per-attribute validators
    fn validate(&self, _config: &DynamicValue) -> Vec<Diagnostic> {
        vec![]
    }

    async fn before_delete(
        &self,
        _client: &Client,
        _model: &Self::Model,
    ) -> Result<(), ProviderError> {
        Ok(())
    }
}

/// Generic CRUD resource over a [`ManagedEntity`]
pub struct ManagedResource<E: ManagedEntity> {
    entity: E,
    provider_data: Option<DevCycleProviderData>,
}

impl<E: ManagedEntity> Default for ManagedResource<E> {
    fn default() -> Self {
        Self {
            entity: E::default(),
            provider_data: None,
        }
    }
}

impl<E: ManagedEntity> ManagedResource<E> {
    pub fn new() -> Self {
        Self::default()
    }

    fn client(&self) -> Result<&Client, ProviderError> {
        self.provider_data
            .as_ref()
            .ok_or(ProviderError::NotConfigured)?
            .management()
    }

    fn endpoint<'a>(client: &'a Client, project: Option<&str>) -> Endpoint<'a, E::Api> {
        Endpoint::new(client, project)
    }

    async fn create_remote(&self, planned: &DynamicValue) -> Result<DynamicValue, ProviderError> {
        let client = self.client()?;
        let model = self.entity.read_model(planned)?;
        let body = self.entity.create_request(&model)?;

        let remote = Self::endpoint(client, self.entity.project(&model))
            .create(&body)
            .await?;
        let model = self.entity.merge_remote(remote, &model)?;
        self.entity.write_model(&model)
    }

    async fn read_remote(
        &self,
        current: &DynamicValue,
    ) -> Result<Option<DynamicValue>, ProviderError> {
        let client = self.client()?;
        let model = self.entity.read_model(current)?;
        let item = self.entity.item_ref(&model);

        match Self::endpoint(client, self.entity.project(&model))
            .get(&item)
            .await
        {
            Ok(remote) => {
                let model = self.entity.merge_remote(remote, &model)?;
                Ok(Some(self.entity.write_model(&model)?))
            }
            Err(e) if e.is_not_found() => {
                tracing::warn!(
                    "{} {} no longer exists, removing it from state",
                    E::TYPE_NAME,
                    item
                );
                Ok(None)
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn update_remote(
        &self,
        prior: &DynamicValue,
        planned: &DynamicValue,
    ) -> Result<DynamicValue, ProviderError> {
        let client = self.client()?;
        let prior = self.entity.read_model(prior)?;
        let model = self.entity.read_model(planned)?;
        let body = self.entity.update_request(&model)?;

        let remote = Self::endpoint(client, self.entity.project(&prior))
            .update(&self.entity.item_ref(&prior), &body)
            .await?;
        let model = self.entity.merge_remote(remote, &model)?;
        self.entity.write_model(&model)
    }

    async fn delete_remote(&self, prior: &DynamicValue) -> Result<(), ProviderError> {
        let client = self.client()?;
        let model = self.entity.read_model(prior)?;
        self.entity.before_delete(client, &model).await?;

        let item = self.entity.item_ref(&model);
        match Self::endpoint(client, self.entity.project(&model))
            .delete(&item)
            .await
        {
            Err(e) if e.is_not_found() => {
                tracing::warn!("{} {} was already deleted", E::TYPE_NAME, item);
                Ok(())
            }
            other => other.map_err(Into::into),
        }
    }
}

#[async_trait]
impl<E: ManagedEntity> Resource for ManagedResource<E> {
    fn type_name(&self) -> &str {
        E::TYPE_NAME
    }

    async fn schema(&self, _ctx: Context, _request: ResourceSchemaRequest) -> ResourceSchemaResponse {
        ResourceSchemaResponse {
            schema: self.entity.schema(),
            diagnostics: vec![],
        }
    }

    async fn validate(
        &self,
        _ctx: Context,
        request: ValidateResourceConfigRequest,
    ) -> ValidateResourceConfigResponse {
        ValidateResourceConfigResponse {
            diagnostics: self.entity.validate(&request.config),
        }
    }

    async fn create(&self, _ctx: Context, request: CreateResourceRequest) -> CreateResourceResponse {
        match self.create_remote(&request.planned_state).await {
            Ok(new_state) => CreateResourceResponse {
                new_state,
                private: vec![],
                diagnostics: vec![],
            },
            Err(e) => CreateResourceResponse {
                new_state: DynamicValue::null(),
                private: vec![],
                diagnostics: vec![e.diagnostic(format!("Failed to create {}", E::TYPE_NAME))],
            },
        }
    }

    async fn read(&self, _ctx: Context, request: ReadResourceRequest) -> ReadResourceResponse {
        match self.read_remote(&request.current_state).await {
            Ok(new_state) => ReadResourceResponse {
                new_state,
                diagnostics: vec![],
                private: request.private,
            },
            Err(e) => ReadResourceResponse {
                new_state: Some(request.current_state),
                diagnostics: vec![e.diagnostic(format!("Failed to read {}", E::TYPE_NAME))],
                private: request.private,
            },
        }
    }

    async fn update(&self, _ctx: Context, request: UpdateResourceRequest) -> UpdateResourceResponse {
        match self
            .update_remote(&request.prior_state, &request.planned_state)
            .await
        {
            Ok(new_state) => UpdateResourceResponse {
                new_state,
                private: vec![],
                diagnostics: vec![],
            },
            Err(e) => UpdateResourceResponse {
                new_state: request.prior_state,
                private: request.planned_private,
                diagnostics: vec![e.diagnostic(format!("Failed to update {}", E::TYPE_NAME))],
            },
        }
    }

    async fn delete(&self, _ctx: Context, request: DeleteResourceRequest) -> DeleteResourceResponse {
        let diagnostics = match self.delete_remote(&request.prior_state).await {
            Ok(()) => vec![],
            Err(e) => vec![e.diagnostic(format!("Failed to delete {}", E::TYPE_NAME))],
        };
        DeleteResourceResponse { diagnostics }
    }

    async fn import_state(
        &self,
        _ctx: Context,
        request: ImportResourceStateRequest,
    ) -> ImportResourceStateResponse {
        let mut response = ImportResourceStateResponse {
            imported_resources: vec![],
            diagnostics: vec![],
        };
        match self.entity.import_attributes().as_slice() {
            [single] => import_state_passthrough_id(single.clone(), &request, &mut response),
            paths => import_state_split_id(paths, '/', &request, &mut response),
        }
        if has_errors(&response.diagnostics) {
            return response;
        }

        for imported in response.imported_resources.iter_mut() {
            match self.read_remote(&imported.state).await {
                Ok(Some(state)) => imported.state = state,
                Ok(None) => response.diagnostics.push(Diagnostic::error(
                    "Cannot import non-existent remote object",
                    format!("No {} matches import ID {:?}", E::TYPE_NAME, request.id),
                )),
                Err(e) => response
                    .diagnostics
                    .push(e.diagnostic(format!("Failed to import {}", E::TYPE_NAME))),
            }
        }
        if has_errors(&response.diagnostics) {
            response.imported_resources.clear();
        }
        response
    }
}

#[async_trait]
impl<E: ManagedEntity> ResourceWithConfigure for ManagedResource<E> {
    async fn configure(
        &mut self,
        _ctx: Context,
        request: ConfigureResourceRequest,
    ) -> ConfigureResourceResponse {
        self.provider_data = downcast(request.provider_data);
        ConfigureResourceResponse {
            diagnostics: vec![],
        }
    }
}

// Attribute and model helpers shared by the entities

pub(crate) fn id_attribute() -> Attribute {
    AttributeBuilder::new("id", AttributeType::String)
        .description("Identifier assigned by DevCycle")
        .computed()
        .plan_modifier(UseStateForUnknown)
        .build()
}

pub(crate) fn key_attribute(description: &str) -> AttributeBuilder {
    AttributeBuilder::new("key", AttributeType::String)
        .description(description)
        .required()
        .validator(StringMatches::new(
            KEY_PATTERN,
            "must contain only lowercase letters, digits, '-', '_' and '.'",
        ))
}

pub(crate) fn project_id_attribute() -> Attribute {
    AttributeBuilder::new("project_id", AttributeType::String)
        .description("Key or ID of the owning project")
        .required()
        .plan_modifier(RequiresReplace)
        .build()
}

pub(crate) fn path(name: &str) -> AttributePath {
    AttributePath::new(name)
}

/// A required string; absent reads as empty so that partially seeded
/// import state still parses
pub(crate) fn string(value: &DynamicValue, name: &str) -> Result<String, ProviderError> {
    Ok(value.get_string_opt(&path(name))?.unwrap_or_default())
}

pub(crate) fn optional(value: &DynamicValue, name: &str) -> Result<Option<String>, ProviderError> {
    Ok(value.get_string_opt(&path(name))?)
}

pub(crate) fn set_optional(
    state: &mut DynamicValue,
    name: &str,
    value: Option<&str>,
) -> Result<(), ProviderError> {
    match value {
        Some(v) => state.set_string(&path(name), v)?,
        None => state.set_null(&path(name))?,
    }
    Ok(())
}

/// The API reports an unset optional string as empty or absent. Keep an
/// explicit empty string only when Terraform had one.
pub(crate) fn merge_optional(remote: Option<&str>, local: Option<&str>) -> Option<String> {
    match remote {
        Some(r) if !r.is_empty() => Some(r.to_string()),
        _ if local == Some("") => Some(String::new()),
        _ => None,
    }
}

/// The elements of a list of nested objects as standalone values
pub(crate) fn nested_objects(
    value: &DynamicValue,
    name: &str,
) -> Result<Vec<DynamicValue>, ProviderError> {
    Ok(value
        .get_list_or_empty(&path(name))?
        .into_iter()
        .map(DynamicValue::new)
        .collect())
}

pub(crate) fn string_list(items: &[String]) -> Dynamic {
    Dynamic::List(items.iter().cloned().map(Dynamic::String).collect())
}

pub(crate) fn string_map(entries: &BTreeMap<String, String>) -> Dynamic {
    Dynamic::Map(
        entries
            .iter()
            .map(|(k, v)| (k.clone(), Dynamic::String(v.clone())))
            .collect(),
    )
}

/// Warns when `keys` are not in ascending order, since state always is
pub(crate) fn sorted_warning(attribute: &str, keys: &[String]) -> Option<Diagnostic> {
    if keys.windows(2).all(|w| w[0] <= w[1]) {
        return None;
    }
    Some(
        Diagnostic::warning(
            format!("{} are not sorted by key", attribute),
            format!(
                "DevCycle returns {} ordered by key; listing them in that order avoids a \
                 perpetual diff",
                attribute
            ),
        )
        .with_attribute(path(attribute)),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn merge_optional_keeps_explicit_empty_strings() {
        assert_eq!(merge_optional(Some("text"), None), Some("text".to_string()));
        assert_eq!(merge_optional(Some(""), Some("")), Some(String::new()));
        assert_eq!(merge_optional(None, Some("")), Some(String::new()));
        assert_eq!(merge_optional(Some(""), None), None);
        assert_eq!(merge_optional(None, Some("stale")), None);
    }

    #[test]
    fn sorted_warning_only_for_unsorted_keys() {
        let sorted = vec!["a".to_string(), "b".to_string(), "b".to_string()];
        assert!(sorted_warning("variations", &sorted).is_none());

        let unsorted = vec!["on".to_string(), "off".to_string()];
        let warning = sorted_warning("variations", &unsorted).unwrap();
        assert!(!warning.is_error());
        assert_eq!(warning.attribute, Some(path("variations")));
    }

    #[test]
    fn nested_objects_splits_list_elements() {
        let mut value = DynamicValue::object();
        value
            .set_list(
                &path("variables"),
                vec![
                    Dynamic::Map(BTreeMap::from([("key".to_string(), Dynamic::from("a"))])),
                    Dynamic::Map(BTreeMap::from([("key".to_string(), Dynamic::from("b"))])),
                ],
            )
            .unwrap();

        let items = nested_objects(&value, "variables").unwrap();
        assert_eq!(items.len(), 2);
        assert_eq!(string(&items[1], "key").unwrap(), "b");
        assert!(nested_objects(&value, "variations").unwrap().is_empty());
    }
}
