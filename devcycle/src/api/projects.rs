use serde::{Deserialize, Serialize};

use super::common::ApiResource;

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Project {
    #[serde(rename = "_id")]
    pub id: String,
    pub key: String,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(rename = "_organization", default)]
    pub organization: String,
    #[serde(rename = "_createdBy", default)]
    pub created_by: String,
    #[serde(default)]
    pub created_at: String,
    #[serde(default)]
    pub updated_at: String,
}

/// Body for both POST and PATCH; updates always send every field
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ProjectRequest {
    pub name: String,
    pub key: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl ApiResource for Project {
    type Remote = Project;
    type Create = ProjectRequest;
    type Update = ProjectRequest;

    const NAME: &'static str = "project";

    fn collection_path(_project: Option<&str>) -> String {
        "/v1/projects".to_string()
    }
}
