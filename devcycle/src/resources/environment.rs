use std::collections::BTreeMap;
use tfplug::plan_modifier::{RequiresReplace, UseStateForUnknown};
use tfplug::schema::Schema;
use tfplug::types::AttributePath;
use tfplug::validator::{StringMatches, StringOneOf};
use tfplug::{AttributeBuilder, AttributeType, Dynamic, DynamicValue, SchemaBuilder};

use super::{
    id_attribute, key_attribute, merge_optional, optional, path, project_id_attribute,
    set_optional, string, string_list, ManagedEntity,
};
use crate::api::environments::{Environment, EnvironmentRequest, EnvironmentSettings};
use crate::error::ProviderError;

pub const ENVIRONMENT_TYPES: [&str; 4] = [
    "development",
    "staging",
    "production",
    "disaster_recovery",
];

pub const COLOR_PATTERN: &str = "^#[0-9a-fA-F]{6}$";

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Settings {
    pub app_icon_uri: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct EnvironmentModel {
    pub id: Option<String>,
    pub project_id: String,
    pub key: String,
    pub name: String,
    pub description: Option<String>,
    pub color: Option<String>,
    pub environment_type: String,
    pub settings: Option<Settings>,
    pub sdk_keys: Vec<String>,
}

impl EnvironmentModel {
    pub fn from_remote(remote: Environment, local: &EnvironmentModel) -> Self {
        let remote_icon = remote
            .settings
            .and_then(|s| s.app_icon_uri)
            .filter(|uri| !uri.is_empty());
        let local_icon = local
            .settings
            .as_ref()
            .and_then(|s| s.app_icon_uri.as_deref());
        let settings = match (&local.settings, remote_icon) {
            (None, None) => None,
            (_, icon) => Some(Settings {
                app_icon_uri: merge_optional(icon.as_deref(), local_icon),
            }),
        };

        Self {
            id: Some(remote.id),
            project_id: local.project_id.clone(),
            key: remote.key,
            name: remote.name,
            description: merge_optional(remote.description.as_deref(), local.description.as_deref()),
            color: merge_optional(remote.color.as_deref(), local.color.as_deref()),
            environment_type: remote.environment_type,
            settings,
            sdk_keys: remote.sdk_keys.flatten(),
        }
    }

    fn to_request(&self) -> EnvironmentRequest {
        EnvironmentRequest {
            name: self.name.clone(),
            key: self.key.clone(),
            description: self.description.clone(),
            color: self.color.clone(),
            environment_type: self.environment_type.clone(),
            settings: self.settings.as_ref().map(|s| EnvironmentSettings {
                app_icon_uri: s.app_icon_uri.clone(),
            }),
        }
    }
}

#[derive(Default)]
pub struct EnvironmentEntity;

impl ManagedEntity for EnvironmentEntity {
    type Api = Environment;
    type Model = EnvironmentModel;

    const TYPE_NAME: &'static str = "devcycle_environment";

    fn schema(&self) -> Schema {
        SchemaBuilder::new()
            .version(0)
            .description("Manages an environment of a DevCycle project")
            .attribute(id_attribute())
            .attribute(project_id_attribute())
            .attribute(
                key_attribute("Environment key, unique within the project")
                    .plan_modifier(RequiresReplace)
                    .build(),
            )
            .attribute(
                AttributeBuilder::new("name", AttributeType::String)
                    .description("Environment name")
                    .required()
                    .build(),
            )
            .attribute(
                AttributeBuilder::new("description", AttributeType::String)
                    .description("Environment description")
                    .optional()
                    .build(),
            )
            .attribute(
                AttributeBuilder::new("color", AttributeType::String)
                    .description("Display color as #rrggbb, assigned by DevCycle when unset")
                    .optional()
                    .computed()
                    .plan_modifier(UseStateForUnknown)
                    .validator(StringMatches::new(
                        COLOR_PATTERN,
                        "must be a hex color such as #1a2b3c",
                    ))
                    .build(),
            )
            .attribute(
                AttributeBuilder::new("type", AttributeType::String)
                    .description("One of development, staging, production, disaster_recovery")
                    .required()
                    .validator(StringOneOf::new(ENVIRONMENT_TYPES))
                    .build(),
            )
            .attribute(
                AttributeBuilder::nested_object(
                    "settings",
                    vec![AttributeBuilder::new("app_icon_uri", AttributeType::String)
                        .description("URI of the app icon shown for this environment")
                        .optional()
                        .build()],
                )
                .description("Environment settings")
                .optional()
                .build(),
            )
            .attribute(
                AttributeBuilder::new("sdk_keys", AttributeType::list_of(AttributeType::String))
                    .description("SDK keys of the environment: mobile, then client, then server")
                    .computed()
                    .sensitive()
                    .plan_modifier(UseStateForUnknown)
                    .build(),
            )
            .build()
    }

    fn import_attributes(&self) -> Vec<AttributePath> {
        vec![path("project_id"), path("key")]
    }

    fn read_model(&self, value: &DynamicValue) -> Result<EnvironmentModel, ProviderError> {
        let settings = match value.get(&path("settings")) {
            Some(Dynamic::Map(_)) => Some(Settings {
                app_icon_uri: value
                    .get_string_opt(&path("settings").attribute("app_icon_uri"))?,
            }),
            _ => None,
        };

        Ok(EnvironmentModel {
            id: optional(value, "id")?,
            project_id: string(value, "project_id")?,
            key: string(value, "key")?,
            name: string(value, "name")?,
            description: optional(value, "description")?,
            color: optional(value, "color")?,
            environment_type: string(value, "type")?,
            settings,
            sdk_keys: value
                .get_string_list_opt(&path("sdk_keys"))?
                .unwrap_or_default(),
        })
    }

    fn write_model(&self, model: &EnvironmentModel) -> Result<DynamicValue, ProviderError> {
        let mut state = DynamicValue::object();
        set_optional(&mut state, "id", model.id.as_deref())?;
        state.set_string(&path("project_id"), &model.project_id)?;
        state.set_string(&path("key"), &model.key)?;
        state.set_string(&path("name"), &model.name)?;
        set_optional(&mut state, "description", model.description.as_deref())?;
        set_optional(&mut state, "color", model.color.as_deref())?;
        state.set_string(&path("type"), &model.environment_type)?;

        let settings = match &model.settings {
            Some(settings) => Dynamic::Map(BTreeMap::from([(
                "app_icon_uri".to_string(),
                Dynamic::from(settings.app_icon_uri.clone()),
            )])),
            None => Dynamic::Null,
        };
        state.set_value(&path("settings"), settings)?;
        state.set_value(&path("sdk_keys"), string_list(&model.sdk_keys))?;
        Ok(state)
    }

    fn create_request(&self, model: &EnvironmentModel) -> Result<EnvironmentRequest, ProviderError> {
        Ok(model.to_request())
    }

    fn update_request(&self, model: &EnvironmentModel) -> Result<EnvironmentRequest, ProviderError> {
        Ok(model.to_request())
    }

    fn merge_remote(
        &self,
        remote: Environment,
        local: &EnvironmentModel,
    ) -> Result<EnvironmentModel, ProviderError> {
        Ok(EnvironmentModel::from_remote(remote, local))
    }

    fn project<'m>(&self, model: &'m EnvironmentModel) -> Option<&'m str> {
        Some(&model.project_id)
    }

    fn item_ref(&self, model: &EnvironmentModel) -> String {
        model.key.clone()
    }
}
