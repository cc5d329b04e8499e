//! Features with their variations and inline variables
//!
//! Variation values are stored in Terraform as text and converted with
//! [`crate::codec`] using the type of the variable they set. Both nested
//! lists are kept sorted by key, matching what the API returns.

use async_trait::async_trait;
use std::collections::BTreeMap;
use tfplug::plan_modifier::{RequiresReplace, UseStateForUnknown};
use tfplug::schema::Schema;
use tfplug::types::AttributePath;
use tfplug::validator::StringOneOf;
use tfplug::{AttributeBuilder, AttributeType, Diagnostic, Dynamic, DynamicValue, SchemaBuilder};

use super::{
    id_attribute, key_attribute, merge_optional, nested_objects, optional, path,
    project_id_attribute, set_optional, sorted_warning, string, string_list, string_map,
    ManagedEntity,
};
use crate::api::features::{
    Feature, FeatureRequest, FeatureVariableRequest, Variation, VariationRequest,
};
use crate::api::variables::Variable;
use crate::api::Client;
use crate::codec::{self, CodecError, VariableType};
use crate::error::ProviderError;

pub const FEATURE_TYPES: [&str; 4] = ["release", "experiment", "permission", "ops"];

#[derive(Debug, Clone, Default, PartialEq)]
pub struct VariationModel {
    pub id: Option<String>,
    pub key: String,
    pub name: String,
    /// Variable key to value text
    pub variables: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FeatureVariableModel {
    pub id: Option<String>,
    pub key: String,
    pub name: Option<String>,
    pub description: Option<String>,
    pub feature_key: Option<String>,
    pub variable_type: VariableType,
    pub created_at: Option<String>,
    pub updated_at: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct FeatureModel {
    pub id: Option<String>,
    pub project_id: String,
    pub key: String,
    pub name: String,
    pub description: Option<String>,
    pub feature_type: String,
    pub source: Option<String>,
    /// `None` while unknown
    pub tags: Option<Vec<String>>,
    pub variations: Option<Vec<VariationModel>>,
    pub variables: Option<Vec<FeatureVariableModel>>,
}

fn non_empty(value: String) -> Option<String> {
    Some(value).filter(|v| !v.is_empty())
}

fn decode_variation(
    variation: Variation,
    types: &BTreeMap<String, VariableType>,
    local: Option<&VariationModel>,
) -> Result<VariationModel, CodecError> {
    let mut variables = BTreeMap::new();
    for (key, wire) in &variation.variables {
        let variable_type = types
            .get(key)
            .copied()
            .ok_or_else(|| CodecError::UnknownVariable {
                variation: variation.key.clone(),
                variable: key.clone(),
            })?;
        let text = codec::decode(wire, variable_type)?;
        let local_text = local
            .and_then(|l| l.variables.get(key))
            .filter(|t| codec::canonicalize(t, variable_type).ok().as_ref() == Some(&text));
        variables.insert(key.clone(), local_text.cloned().unwrap_or(text));
    }

    Ok(VariationModel {
        id: Some(variation.id),
        key: variation.key,
        name: variation.name,
        variables,
    })
}

fn variable_from_remote(
    remote: Variable,
    feature_key: &str,
    local: Option<&FeatureVariableModel>,
) -> FeatureVariableModel {
    FeatureVariableModel {
        id: Some(remote.id),
        name: remote
            .name
            .filter(|n| !n.is_empty())
            .or_else(|| local.and_then(|l| l.name.clone())),
        description: merge_optional(
            remote.description.as_deref(),
            local.and_then(|l| l.description.as_deref()),
        ),
        feature_key: Some(feature_key.to_string()),
        variable_type: remote.variable_type,
        created_at: non_empty(remote.created_at),
        updated_at: non_empty(remote.updated_at),
        key: remote.key,
    }
}

impl FeatureModel {
    /// Declared variable types by key
    pub fn variable_types(&self) -> BTreeMap<String, VariableType> {
        self.variables
            .iter()
            .flatten()
            .map(|v| (v.key.clone(), v.variable_type))
            .collect()
    }

    pub fn validate_variations(&self) -> Result<(), CodecError> {
        codec::validate_variations(
            &self.variable_types(),
            self.variations
                .iter()
                .flatten()
                .map(|v| (v.key.as_str(), &v.variables)),
        )
    }

    fn encode_variation(
        variation: &VariationModel,
        types: &BTreeMap<String, VariableType>,
    ) -> Result<VariationRequest, CodecError> {
        let mut variables = BTreeMap::new();
        for (key, text) in &variation.variables {
            let variable_type =
                types
                    .get(key)
                    .copied()
                    .ok_or_else(|| CodecError::UnknownVariable {
                        variation: variation.key.clone(),
                        variable: key.clone(),
                    })?;
            variables.insert(key.clone(), codec::encode(text, variable_type)?);
        }
        Ok(VariationRequest {
            key: variation.key.clone(),
            name: variation.name.clone(),
            variables,
        })
    }

    pub fn to_request(&self) -> Result<FeatureRequest, ProviderError> {
        self.validate_variations()?;
        let types = self.variable_types();

        let variations = match &self.variations {
            Some(variations) => Some(
                variations
                    .iter()
                    .map(|v| Self::encode_variation(v, &types))
                    .collect::<Result<Vec<_>, _>>()?,
            ),
            None => None,
        };

        let variables = self.variables.as_ref().map(|variables| {
            variables
                .iter()
                .map(|v| FeatureVariableRequest {
                    key: v.key.clone(),
                    name: v.name.clone(),
                    description: v.description.clone(),
                    variable_type: v.variable_type,
                })
                .collect()
        });

        Ok(FeatureRequest {
            name: self.name.clone(),
            key: self.key.clone(),
            description: self.description.clone(),
            feature_type: self.feature_type.clone(),
            tags: self.tags.clone(),
            variations,
            variables,
        })
    }

    /// Rebuilds the model from the API, sorting both nested lists by key.
    /// A value equal to the local text after canonicalization keeps the
    /// local spelling.
    pub fn from_remote(remote: Feature, local: &FeatureModel) -> Result<Self, CodecError> {
        let types: BTreeMap<String, VariableType> = remote
            .variables
            .iter()
            .map(|v| (v.key.clone(), v.variable_type))
            .collect();

        let local_variations: BTreeMap<&str, &VariationModel> = local
            .variations
            .iter()
            .flatten()
            .map(|v| (v.key.as_str(), v))
            .collect();
        let mut variations = Vec::with_capacity(remote.variations.len());
        for variation in remote.variations {
            let local = local_variations.get(variation.key.as_str()).copied();
            variations.push(decode_variation(variation, &types, local)?);
        }
        variations.sort_by(|a, b| a.key.cmp(&b.key));

        let local_variables: BTreeMap<&str, &FeatureVariableModel> = local
            .variables
            .iter()
            .flatten()
            .map(|v| (v.key.as_str(), v))
            .collect();
        let mut variables: Vec<FeatureVariableModel> = remote
            .variables
            .into_iter()
            .map(|v| {
                let local = local_variables.get(v.key.as_str()).copied();
                variable_from_remote(v, &remote.key, local)
            })
            .collect();
        variables.sort_by(|a, b| a.key.cmp(&b.key));

        Ok(Self {
            id: Some(remote.id),
            project_id: local.project_id.clone(),
            description: merge_optional(remote.description.as_deref(), local.description.as_deref()),
            key: remote.key,
            name: remote.name,
            feature_type: remote.feature_type,
            source: remote.source,
            tags: Some(remote.tags),
            variations: Some(variations),
            variables: Some(variables),
        })
    }
}

fn read_variation(value: &DynamicValue) -> Result<VariationModel, ProviderError> {
    Ok(VariationModel {
        id: optional(value, "id")?,
        key: string(value, "key")?,
        name: string(value, "name")?,
        variables: value.get_string_map(&path("variables"))?,
    })
}

fn read_variable(value: &DynamicValue) -> Result<FeatureVariableModel, ProviderError> {
    Ok(FeatureVariableModel {
        id: optional(value, "id")?,
        key: string(value, "key")?,
        name: optional(value, "name")?,
        description: optional(value, "description")?,
        feature_key: optional(value, "feature_key")?,
        variable_type: string(value, "type")?.parse()?,
        created_at: optional(value, "created_at")?,
        updated_at: optional(value, "updated_at")?,
    })
}

fn optional_dynamic(value: Option<&str>) -> Dynamic {
    Dynamic::from(value.map(str::to_string))
}

fn variation_value(variation: &VariationModel) -> Dynamic {
    Dynamic::Map(BTreeMap::from([
        ("id".to_string(), optional_dynamic(variation.id.as_deref())),
        ("key".to_string(), Dynamic::from(variation.key.as_str())),
        ("name".to_string(), Dynamic::from(variation.name.as_str())),
        ("variables".to_string(), string_map(&variation.variables)),
    ]))
}

fn variable_value(variable: &FeatureVariableModel) -> Dynamic {
    Dynamic::Map(BTreeMap::from([
        ("id".to_string(), optional_dynamic(variable.id.as_deref())),
        ("key".to_string(), Dynamic::from(variable.key.as_str())),
        ("name".to_string(), optional_dynamic(variable.name.as_deref())),
        (
            "description".to_string(),
            optional_dynamic(variable.description.as_deref()),
        ),
        (
            "feature_key".to_string(),
            optional_dynamic(variable.feature_key.as_deref()),
        ),
        (
            "type".to_string(),
            Dynamic::from(variable.variable_type.as_str()),
        ),
        (
            "created_at".to_string(),
            optional_dynamic(variable.created_at.as_deref()),
        ),
        (
            "updated_at".to_string(),
            optional_dynamic(variable.updated_at.as_deref()),
        ),
    ]))
}

/// Reads a list of nested objects that may still be unknown
fn known_list<T>(
    value: &DynamicValue,
    name: &str,
    read: impl Fn(&DynamicValue) -> Result<T, ProviderError>,
) -> Result<Option<Vec<T>>, ProviderError> {
    match value.get(&path(name)) {
        Some(Dynamic::List(_)) => nested_objects(value, name)?
            .iter()
            .map(read)
            .collect::<Result<Vec<_>, _>>()
            .map(Some),
        _ => Ok(None),
    }
}

#[derive(Default)]
pub struct FeatureEntity;

#[async_trait]
impl ManagedEntity for FeatureEntity {
    type Api = Feature;
    type Model = FeatureModel;

    const TYPE_NAME: &'static str = "devcycle_feature";

    fn schema(&self) -> Schema {
        let variation_attributes = vec![
            id_attribute(),
            key_attribute("Variation key, unique within the feature").build(),
            AttributeBuilder::new("name", AttributeType::String)
                .description("Variation name")
                .required()
                .build(),
            AttributeBuilder::new("variables", AttributeType::map_of(AttributeType::String))
                .description("Value served for each variable, written as text of the variable's type")
                .required()
                .build(),
        ];

        let variable_attributes = vec![
            id_attribute(),
            key_attribute("Variable key, unique within the project").build(),
            AttributeBuilder::new("type", AttributeType::String)
                .description("One of String, Boolean, Number, JSON")
                .required()
                .validator(StringOneOf::new(VariableType::TAGS))
                .build(),
            AttributeBuilder::new("name", AttributeType::String)
                .description("Variable name, defaults to the key")
                .optional()
                .computed()
                .build(),
            AttributeBuilder::new("description", AttributeType::String)
                .description("Variable description")
                .optional()
                .build(),
            AttributeBuilder::new("feature_key", AttributeType::String)
                .description("Key of the feature the variable belongs to")
                .computed()
                .build(),
            AttributeBuilder::new("created_at", AttributeType::String)
                .description("Creation timestamp")
                .computed()
                .plan_modifier(UseStateForUnknown)
                .build(),
            AttributeBuilder::new("updated_at", AttributeType::String)
                .description("Last update timestamp")
                .computed()
                .build(),
        ];

        SchemaBuilder::new()
            .version(0)
            .description("Manages a DevCycle feature, its variations and its variables")
            .attribute(id_attribute())
            .attribute(project_id_attribute())
            .attribute(
                key_attribute("Feature key, unique within the project")
                    .plan_modifier(RequiresReplace)
                    .build(),
            )
            .attribute(
                AttributeBuilder::new("name", AttributeType::String)
                    .description("Feature name")
                    .required()
                    .build(),
            )
            .attribute(
                AttributeBuilder::new("description", AttributeType::String)
                    .description("Feature description")
                    .optional()
                    .build(),
            )
            .attribute(
                AttributeBuilder::new("type", AttributeType::String)
                    .description("One of release, experiment, permission, ops")
                    .required()
                    .validator(StringOneOf::new(FEATURE_TYPES))
                    .build(),
            )
            .attribute(
                AttributeBuilder::new("source", AttributeType::String)
                    .description("Where the feature was created")
                    .computed()
                    .plan_modifier(UseStateForUnknown)
                    .build(),
            )
            .attribute(
                AttributeBuilder::new("tags", AttributeType::list_of(AttributeType::String))
                    .description("Feature tags")
                    .optional()
                    .computed()
                    .build(),
            )
            .attribute(
                AttributeBuilder::nested_list("variations", variation_attributes)
                    .match_elements_by("key")
                    .description("Variations, sorted by key")
                    .optional()
                    .computed()
                    .build(),
            )
            .attribute(
                AttributeBuilder::nested_list("variables", variable_attributes)
                    .match_elements_by("key")
                    .description("Variables declared by the feature, sorted by key")
                    .optional()
                    .computed()
                    .build(),
            )
            .build()
    }

    fn import_attributes(&self) -> Vec<AttributePath> {
        vec![path("project_id"), path("key")]
    }

    fn read_model(&self, value: &DynamicValue) -> Result<FeatureModel, ProviderError> {
        Ok(FeatureModel {
            id: optional(value, "id")?,
            project_id: string(value, "project_id")?,
            key: string(value, "key")?,
            name: string(value, "name")?,
            description: optional(value, "description")?,
            feature_type: string(value, "type")?,
            source: optional(value, "source")?,
            tags: value.get_string_list_opt(&path("tags"))?,
            variations: known_list(value, "variations", read_variation)?,
            variables: known_list(value, "variables", read_variable)?,
        })
    }

    fn write_model(&self, model: &FeatureModel) -> Result<DynamicValue, ProviderError> {
        let mut state = DynamicValue::object();
        set_optional(&mut state, "id", model.id.as_deref())?;
        state.set_string(&path("project_id"), &model.project_id)?;
        state.set_string(&path("key"), &model.key)?;
        state.set_string(&path("name"), &model.name)?;
        set_optional(&mut state, "description", model.description.as_deref())?;
        state.set_string(&path("type"), &model.feature_type)?;
        set_optional(&mut state, "source", model.source.as_deref())?;

        let tags = model.tags.as_deref().map_or(Dynamic::Null, string_list);
        state.set_value(&path("tags"), tags)?;

        let variations = model.variations.as_ref().map_or(Dynamic::Null, |v| {
            Dynamic::List(v.iter().map(variation_value).collect())
        });
        state.set_value(&path("variations"), variations)?;

        let variables = model.variables.as_ref().map_or(Dynamic::Null, |v| {
            Dynamic::List(v.iter().map(variable_value).collect())
        });
        state.set_value(&path("variables"), variables)?;
        Ok(state)
    }

    fn create_request(&self, model: &FeatureModel) -> Result<FeatureRequest, ProviderError> {
        model.to_request()
    }

    fn update_request(&self, model: &FeatureModel) -> Result<FeatureRequest, ProviderError> {
        model.to_request()
    }

    fn merge_remote(&self, remote: Feature, local: &FeatureModel) -> Result<FeatureModel, ProviderError> {
        Ok(FeatureModel::from_remote(remote, local)?)
    }

    fn project<'m>(&self, model: &'m FeatureModel) -> Option<&'m str> {
        Some(&model.project_id)
    }

    fn item_ref(&self, model: &FeatureModel) -> String {
        model.key.clone()
    }

    fn validate(&self, config: &DynamicValue) -> Vec<Diagnostic> {
        let nested_unknown = ["variations", "variables"]
            .iter()
            .any(|name| config.get(&path(name)).is_some_and(Dynamic::contains_unknown));
        if nested_unknown {
            return vec![];
        }

        let model = match self.read_model(config) {
            Ok(model) => model,
            Err(e) => return vec![e.diagnostic("Invalid feature configuration")],
        };

        let mut diagnostics = vec![];
        if let Err(e) = model.validate_variations() {
            diagnostics.push(
                Diagnostic::error("Invalid variation", e.to_string())
                    .with_attribute(path("variations")),
            );
            return diagnostics;
        }

        let types = model.variable_types();
        for variation in model.variations.iter().flatten() {
            for (key, text) in &variation.variables {
                let Some(variable_type) = types.get(key) else {
                    continue;
                };
                if let Ok(canonical) = codec::canonicalize(text, *variable_type) {
                    if &canonical != text {
                        diagnostics.push(Diagnostic::warning(
                            "Variation value is not in canonical form",
                            format!(
                                "Variation {:?} sets {:?} to {:?}; DevCycle will report it as {:?}",
                                variation.key, key, text, canonical
                            ),
                        ));
                    }
                }
            }
        }

        let variation_keys: Vec<String> = model
            .variations
            .iter()
            .flatten()
            .map(|v| v.key.clone())
            .collect();
        let variable_keys: Vec<String> = model
            .variables
            .iter()
            .flatten()
            .map(|v| v.key.clone())
            .collect();
        diagnostics.extend(sorted_warning("variations", &variation_keys));
        diagnostics.extend(sorted_warning("variables", &variable_keys));
        diagnostics
    }

    /// Deletes the feature's variables in state order. A variable that is
    /// already gone is skipped; any other failure stops before the feature
    /// itself is deleted.
    async fn before_delete(&self, client: &Client, model: &FeatureModel) -> Result<(), ProviderError> {
        let endpoint = client.variables(&model.project_id);
        for variable in model.variables.iter().flatten() {
            let item = variable.id.as_deref().unwrap_or(&variable.key);
            match endpoint.delete(item).await {
                Ok(()) => {}
                Err(e) if e.is_not_found() => {
                    tracing::warn!("Variable {} of feature {} was already deleted", item, model.key);
                }
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn remote_feature() -> Feature {
        serde_json::from_value(json!({
            "_id": "f1",
            "_project": "p1",
            "key": "new-checkout",
            "name": "New Checkout",
            "type": "release",
            "source": "api",
            "tags": [],
            "variations": [
                {"_id": "vr2", "key": "variation-on", "name": "On", "variables": {"k1": "hello", "limit": 2.0}},
                {"_id": "vr1", "key": "variation-off", "name": "Off", "variables": {"k1": "bye", "limit": 0}}
            ],
            "variables": [
                {"_id": "v2", "key": "limit", "type": "Number", "_feature": "f1", "createdAt": "2024-01-01"},
                {"_id": "v1", "key": "k1", "type": "String", "_feature": "f1"}
            ]
        }))
        .unwrap()
    }

    #[test]
    fn remote_lists_are_sorted_by_key() {
        let model = FeatureModel::from_remote(remote_feature(), &FeatureModel::default()).unwrap();

        let variations = model.variations.unwrap();
        assert_eq!(variations[0].key, "variation-off");
        assert_eq!(variations[1].key, "variation-on");
        assert_eq!(variations[1].variables["k1"], "hello");
        assert_eq!(variations[1].variables["limit"], "2");

        let variables = model.variables.unwrap();
        assert_eq!(variables[0].key, "k1");
        assert_eq!(variables[1].key, "limit");
        assert_eq!(variables[1].feature_key.as_deref(), Some("new-checkout"));
        assert_eq!(variables[1].created_at.as_deref(), Some("2024-01-01"));
        assert_eq!(variables[0].created_at, None);
    }

    #[test]
    fn local_spelling_survives_when_equivalent() {
        let local = FeatureModel {
            variations: Some(vec![VariationModel {
                key: "variation-on".to_string(),
                name: "On".to_string(),
                variables: BTreeMap::from([("limit".to_string(), "2.0".to_string())]),
                ..Default::default()
            }]),
            ..Default::default()
        };
        let model = FeatureModel::from_remote(remote_feature(), &local).unwrap();
        let on = &model.variations.unwrap()[1];
        assert_eq!(on.variables["limit"], "2.0");
    }

    #[test]
    fn wire_kind_must_match_variable_type() {
        let mut remote = remote_feature();
        remote.variations[0]
            .variables
            .insert("limit".to_string(), json!("two"));
        let err = FeatureModel::from_remote(remote, &FeatureModel::default()).unwrap_err();
        assert!(matches!(err, CodecError::TypeMismatch { expected: VariableType::Number, .. }));
    }

    #[test]
    fn request_encodes_values_by_variable_type() {
        let model = FeatureModel::from_remote(remote_feature(), &FeatureModel::default()).unwrap();
        let request = model.to_request().unwrap();
        let variations = request.variations.unwrap();
        assert_eq!(variations[1].variables["limit"], json!(2.0));
        assert_eq!(variations[1].variables["k1"], json!("hello"));
        assert_eq!(request.variables.unwrap().len(), 2);
    }

    #[test]
    fn undeclared_variation_variable_is_rejected() {
        let model = FeatureModel {
            variables: Some(vec![]),
            variations: Some(vec![VariationModel {
                key: "on".to_string(),
                name: "On".to_string(),
                variables: BTreeMap::from([("k1".to_string(), "x".to_string())]),
                ..Default::default()
            }]),
            ..Default::default()
        };
        assert!(matches!(
            model.to_request(),
            Err(ProviderError::Codec(CodecError::UnknownVariable { .. }))
        ));
    }

    #[test]
    fn state_round_trips_through_model() {
        let entity = FeatureEntity;
        let mut model = FeatureModel::from_remote(remote_feature(), &FeatureModel::default()).unwrap();
        model.project_id = "checkout".to_string();
        let state = entity.write_model(&model).unwrap();
        assert_eq!(entity.read_model(&state).unwrap(), model);
    }

    #[test]
    fn validate_warns_on_unsorted_and_non_canonical_values() {
        let entity = FeatureEntity;
        let mut model = FeatureModel::from_remote(remote_feature(), &FeatureModel::default()).unwrap();
        model.project_id = "checkout".to_string();
        if let Some(variations) = model.variations.as_mut() {
            variations.reverse();
            variations[0]
                .variables
                .insert("limit".to_string(), "2.50".to_string());
        }
        let config = entity.write_model(&model).unwrap();

        let diagnostics = entity.validate(&config);
        assert!(diagnostics.iter().all(|d| !d.is_error()));
        assert!(diagnostics
            .iter()
            .any(|d| d.summary == "Variation value is not in canonical form"));
        assert!(diagnostics
            .iter()
            .any(|d| d.summary == "variations are not sorted by key"));
    }
}
