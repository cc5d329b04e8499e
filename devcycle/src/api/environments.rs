use serde::{Deserialize, Serialize};

use super::common::{project_path, ApiResource};

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Environment {
    #[serde(rename = "_id")]
    pub id: String,
    pub key: String,
    pub name: String,
    #[serde(rename = "_project", default)]
    pub project: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub color: Option<String>,
    #[serde(rename = "type")]
    pub environment_type: String,
    #[serde(default)]
    pub settings: Option<EnvironmentSettings>,
    #[serde(default)]
    pub sdk_keys: SdkKeys,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct EnvironmentSettings {
    #[serde(
        rename = "appIconURI",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub app_icon_uri: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SdkKeys {
    #[serde(default)]
    pub mobile: Vec<ApiKey>,
    #[serde(default)]
    pub client: Vec<ApiKey>,
    #[serde(default)]
    pub server: Vec<ApiKey>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiKey {
    pub key: String,
}

impl SdkKeys {
    /// Mobile, then client, then server keys
    pub fn flatten(&self) -> Vec<String> {
        self.mobile
            .iter()
            .chain(&self.client)
            .chain(&self.server)
            .map(|k| k.key.clone())
            .collect()
    }
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct EnvironmentRequest {
    pub name: String,
    pub key: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub color: Option<String>,
    #[serde(rename = "type")]
    pub environment_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub settings: Option<EnvironmentSettings>,
}

impl ApiResource for Environment {
    type Remote = Environment;
    type Create = EnvironmentRequest;
    type Update = EnvironmentRequest;

    const NAME: &'static str = "environment";

    fn collection_path(project: Option<&str>) -> String {
        project_path(project, "environments")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sdk_keys_flatten_in_fixed_order() {
        let env: Environment = serde_json::from_str(
            r#"{
                "_id": "e1",
                "_project": "p1",
                "key": "staging",
                "name": "Staging",
                "type": "staging",
                "sdkKeys": {
                    "server": [{"key": "dvc_server_1"}],
                    "client": [{"key": "dvc_client_1"}],
                    "mobile": [{"key": "dvc_mobile_1"}, {"key": "dvc_mobile_2"}]
                }
            }"#,
        )
        .unwrap();

        assert_eq!(
            env.sdk_keys.flatten(),
            vec!["dvc_mobile_1", "dvc_mobile_2", "dvc_client_1", "dvc_server_1"]
        );
        assert!(env.settings.is_none());
    }

    #[test]
    fn request_uses_remote_field_names() {
        let body = serde_json::to_value(EnvironmentRequest {
            name: "Staging".to_string(),
            key: "staging".to_string(),
            description: None,
            color: Some("#00ff00".to_string()),
            environment_type: "staging".to_string(),
            settings: Some(EnvironmentSettings {
                app_icon_uri: Some("https://example.com/icon.png".to_string()),
            }),
        })
        .unwrap();

        assert_eq!(body["type"], "staging");
        assert_eq!(body["settings"]["appIconURI"], "https://example.com/icon.png");
        assert!(body.get("description").is_none());
    }

    #[test]
    fn paths_are_project_scoped() {
        assert_eq!(
            Environment::item_path(Some("checkout"), "staging"),
            "/v1/projects/checkout/environments/staging"
        );
    }
}
