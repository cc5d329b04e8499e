use tfplug::plan_modifier::{RequiresReplace, UseStateForUnknown};
use tfplug::schema::Schema;
use tfplug::types::AttributePath;
use tfplug::validator::StringOneOf;
use tfplug::{AttributeBuilder, AttributeType, Diagnostic, DynamicValue, SchemaBuilder};

use super::{
    id_attribute, key_attribute, merge_optional, optional, path, project_id_attribute,
    set_optional, string, ManagedEntity,
};
use crate::api::variables::{Variable, VariableRequest};
use crate::codec::{self, CodecError, VariableType};
use crate::error::ProviderError;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct VariableModel {
    pub id: Option<String>,
    pub project_id: String,
    pub feature_id: Option<String>,
    pub key: String,
    pub name: Option<String>,
    pub description: Option<String>,
    /// `None` only in state seeded by import
    pub variable_type: Option<VariableType>,
    pub default_value: Option<String>,
}

impl VariableModel {
    pub fn from_remote(remote: Variable, local: &VariableModel) -> Result<Self, CodecError> {
        let default_value = match &remote.default_value {
            None | Some(serde_json::Value::Null) => None,
            Some(wire) => {
                let text = codec::decode(wire, remote.variable_type)?;
                let keep_local = local.default_value.as_ref().is_some_and(|l| {
                    codec::canonicalize(l, remote.variable_type).ok().as_ref() == Some(&text)
                });
                if keep_local {
                    local.default_value.clone()
                } else {
                    Some(text)
                }
            }
        };

        Ok(Self {
            id: Some(remote.id),
            project_id: local.project_id.clone(),
            feature_id: local.feature_id.clone().or(remote.feature),
            name: remote
                .name
                .filter(|n| !n.is_empty())
                .or_else(|| local.name.clone()),
            description: merge_optional(remote.description.as_deref(), local.description.as_deref()),
            key: remote.key,
            variable_type: Some(remote.variable_type),
            default_value,
        })
    }

    fn to_request(&self) -> Result<VariableRequest, ProviderError> {
        let variable_type = self.variable_type.ok_or_else(|| {
            ProviderError::InvalidState(format!("variable {} has no type", self.key))
        })?;
        let default_value = self
            .default_value
            .as_deref()
            .map(|text| codec::encode(text, variable_type))
            .transpose()?;

        Ok(VariableRequest {
            key: self.key.clone(),
            name: self.name.clone(),
            description: self.description.clone(),
            feature: self.feature_id.clone(),
            variable_type,
            default_value,
        })
    }
}

#[derive(Default)]
pub struct VariableEntity;

impl ManagedEntity for VariableEntity {
    type Api = Variable;
    type Model = VariableModel;

    const TYPE_NAME: &'static str = "devcycle_variable";

    fn schema(&self) -> Schema {
        SchemaBuilder::new()
            .version(0)
            .description("Manages a DevCycle variable, optionally attached to a feature")
            .attribute(id_attribute())
            .attribute(project_id_attribute())
            .attribute(
                AttributeBuilder::new("feature_id", AttributeType::String)
                    .description("Key or ID of the feature the variable belongs to")
                    .optional()
                    .computed()
                    .plan_modifier(UseStateForUnknown)
                    .plan_modifier(RequiresReplace)
                    .build(),
            )
            .attribute(key_attribute("Variable key, unique within the project").build())
            .attribute(
                AttributeBuilder::new("name", AttributeType::String)
                    .description("Variable name, defaults to the key")
                    .optional()
                    .computed()
                    .plan_modifier(UseStateForUnknown)
                    .build(),
            )
            .attribute(
                AttributeBuilder::new("description", AttributeType::String)
                    .description("Variable description")
                    .optional()
                    .build(),
            )
            .attribute(
                AttributeBuilder::new("type", AttributeType::String)
                    .description("One of String, Boolean, Number, JSON")
                    .required()
                    .validator(StringOneOf::new(VariableType::TAGS))
                    .plan_modifier(RequiresReplace)
                    .build(),
            )
            .attribute(
                AttributeBuilder::new("default_value", AttributeType::String)
                    .description("Default value written as text of the variable's type")
                    .optional()
                    .build(),
            )
            .build()
    }

    fn import_attributes(&self) -> Vec<AttributePath> {
        vec![path("project_id"), path("key")]
    }

    fn read_model(&self, value: &DynamicValue) -> Result<VariableModel, ProviderError> {
        let variable_type = match optional(value, "type")? {
            Some(tag) => Some(tag.parse()?),
            None => None,
        };
        Ok(VariableModel {
            id: optional(value, "id")?,
            project_id: string(value, "project_id")?,
            feature_id: optional(value, "feature_id")?,
            key: string(value, "key")?,
            name: optional(value, "name")?,
            description: optional(value, "description")?,
            variable_type,
            default_value: optional(value, "default_value")?,
        })
    }

    fn write_model(&self, model: &VariableModel) -> Result<DynamicValue, ProviderError> {
        let mut state = DynamicValue::object();
        set_optional(&mut state, "id", model.id.as_deref())?;
        state.set_string(&path("project_id"), &model.project_id)?;
        set_optional(&mut state, "feature_id", model.feature_id.as_deref())?;
        state.set_string(&path("key"), &model.key)?;
        set_optional(&mut state, "name", model.name.as_deref())?;
        set_optional(&mut state, "description", model.description.as_deref())?;
        set_optional(&mut state, "type", model.variable_type.map(|t| t.as_str()))?;
        set_optional(&mut state, "default_value", model.default_value.as_deref())?;
        Ok(state)
    }

    fn create_request(&self, model: &VariableModel) -> Result<VariableRequest, ProviderError> {
        model.to_request()
    }

    fn update_request(&self, model: &VariableModel) -> Result<VariableRequest, ProviderError> {
        model.to_request()
    }

    fn merge_remote(&self, remote: Variable, local: &VariableModel) -> Result<VariableModel, ProviderError> {
        Ok(VariableModel::from_remote(remote, local)?)
    }

    fn project<'m>(&self, model: &'m VariableModel) -> Option<&'m str> {
        Some(&model.project_id)
    }

    /// The id once known, so that renaming the key updates in place
    fn item_ref(&self, model: &VariableModel) -> String {
        model.id.clone().unwrap_or_else(|| model.key.clone())
    }

    fn validate(&self, config: &DynamicValue) -> Vec<Diagnostic> {
        let (Ok(Some(tag)), Ok(Some(text))) =
            (optional(config, "type"), optional(config, "default_value"))
        else {
            return vec![];
        };
        let Ok(variable_type) = tag.parse::<VariableType>() else {
            return vec![];
        };

        match codec::canonicalize(&text, variable_type) {
            Ok(canonical) if canonical != text => vec![Diagnostic::warning(
                "Default value is not in canonical form",
                format!("DevCycle will report {:?} as {:?}", text, canonical),
            )
            .with_attribute(path("default_value"))],
            Ok(_) => vec![],
            Err(e) => vec![Diagnostic::error("Invalid default value", e.to_string())
                .with_attribute(path("default_value"))],
        }
    }
}
