use serde::{Deserialize, Serialize};

use super::common::{project_path, ApiResource};
use crate::codec::VariableType;

/// A variable, either standalone or attached to a feature
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Variable {
    #[serde(rename = "_id")]
    pub id: String,
    pub key: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(rename = "_feature", default)]
    pub feature: Option<String>,
    #[serde(rename = "_project", default)]
    pub project: String,
    #[serde(rename = "type")]
    pub variable_type: VariableType,
    #[serde(default)]
    pub default_value: Option<serde_json::Value>,
    #[serde(default)]
    pub created_at: String,
    #[serde(default)]
    pub updated_at: String,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct VariableRequest {
    pub key: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(rename = "_feature", skip_serializing_if = "Option::is_none")]
    pub feature: Option<String>,
    #[serde(rename = "type")]
    pub variable_type: VariableType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default_value: Option<serde_json::Value>,
}

impl ApiResource for Variable {
    type Remote = Variable;
    type Create = VariableRequest;
    type Update = VariableRequest;

    const NAME: &'static str = "variable";

    fn collection_path(project: Option<&str>) -> String {
        project_path(project, "variables")
    }
}
