use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::common::{project_path, ApiResource};
use super::variables::Variable;
use crate::codec::VariableType;

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Feature {
    #[serde(rename = "_id")]
    pub id: String,
    pub key: String,
    pub name: String,
    #[serde(rename = "_project", default)]
    pub project: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(rename = "type")]
    pub feature_type: String,
    #[serde(default)]
    pub source: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub variations: Vec<Variation>,
    #[serde(default)]
    pub variables: Vec<Variable>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Variation {
    #[serde(rename = "_id")]
    pub id: String,
    pub key: String,
    pub name: String,
    /// Variable key to wire value
    #[serde(default)]
    pub variables: BTreeMap<String, serde_json::Value>,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct FeatureRequest {
    pub name: String,
    pub key: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(rename = "type")]
    pub feature_type: String,
    /// Left out when Terraform has no value yet, so DevCycle applies its
    /// defaults
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tags: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub variations: Option<Vec<VariationRequest>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub variables: Option<Vec<FeatureVariableRequest>>,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct VariationRequest {
    pub key: String,
    pub name: String,
    pub variables: BTreeMap<String, serde_json::Value>,
}

/// A variable declared inline on a feature
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct FeatureVariableRequest {
    pub key: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(rename = "type")]
    pub variable_type: VariableType,
}

impl ApiResource for Feature {
    type Remote = Feature;
    type Create = FeatureRequest;
    type Update = FeatureRequest;

    const NAME: &'static str = "feature";

    fn collection_path(project: Option<&str>) -> String {
        project_path(project, "features")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deserializes_nested_variations_and_variables() {
        let feature: Feature = serde_json::from_str(
            r#"{
                "_id": "f1",
                "_project": "p1",
                "key": "new-checkout",
                "name": "New Checkout",
                "type": "release",
                "source": "api",
                "tags": ["web"],
                "variations": [
                    {"_id": "var2", "key": "on", "name": "On", "variables": {"enabled": true}},
                    {"_id": "var1", "key": "off", "name": "Off", "variables": {"enabled": false}}
                ],
                "variables": [
                    {"_id": "v1", "key": "enabled", "type": "Boolean", "_feature": "f1", "_project": "p1"}
                ]
            }"#,
        )
        .unwrap();

        assert_eq!(feature.variations.len(), 2);
        assert_eq!(feature.variations[0].variables["enabled"], serde_json::json!(true));
        assert_eq!(feature.variables[0].variable_type, VariableType::Boolean);
        assert_eq!(feature.source.as_deref(), Some("api"));
    }

    #[test]
    fn request_leaves_out_unset_collections() {
        let body = serde_json::to_value(FeatureRequest {
            name: "New Checkout".to_string(),
            key: "new-checkout".to_string(),
            description: None,
            feature_type: "release".to_string(),
            tags: Some(vec![]),
            variations: None,
            variables: None,
        })
        .unwrap();

        assert_eq!(body["tags"], serde_json::json!([]));
        assert!(body.get("variations").is_none());
        assert_eq!(body["type"], "release");
    }
}
