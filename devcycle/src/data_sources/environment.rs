use async_trait::async_trait;
use tfplug::schema::Schema;
use tfplug::{AttributeBuilder, AttributeType, DynamicValue, SchemaBuilder};

use super::{computed_string, lookup_string, not_found, Lookup};
use crate::api::Client;
use crate::error::ProviderError;
use crate::resources::environment::{EnvironmentEntity, EnvironmentModel};
use crate::resources::{path, ManagedEntity};

#[derive(Default)]
pub struct EnvironmentLookup;

#[async_trait]
impl Lookup for EnvironmentLookup {
    const TYPE_NAME: &'static str = "devcycle_environment";

    fn schema(&self) -> Schema {
        SchemaBuilder::new()
            .description("Looks up an environment of a DevCycle project")
            .attribute(lookup_string("project_id", "Project key or ID"))
            .attribute(lookup_string("key", "Environment key"))
            .attribute(computed_string("id", "Environment ID"))
            .attribute(computed_string("name", "Environment name"))
            .attribute(computed_string("description", "Environment description"))
            .attribute(computed_string("color", "Display color"))
            .attribute(computed_string("type", "Environment type"))
            .attribute(
                AttributeBuilder::nested_object(
                    "settings",
                    vec![computed_string("app_icon_uri", "URI of the app icon")],
                )
                .description("Environment settings")
                .computed()
                .build(),
            )
            .attribute(
                AttributeBuilder::new("sdk_keys", AttributeType::list_of(AttributeType::String))
                    .description("SDK keys: mobile, then client, then server")
                    .computed()
                    .sensitive()
                    .build(),
            )
            .build()
    }

    async fn read(&self, client: &Client, config: &DynamicValue) -> Result<DynamicValue, ProviderError> {
        let project_id = config.get_string(&path("project_id"))?;
        let key = config.get_string(&path("key"))?;
        let remote = client
            .environments(&project_id)
            .get(&key)
            .await
            .map_err(|e| not_found("environment", &key, e))?;

        let local = EnvironmentModel {
            project_id,
            ..Default::default()
        };
        let mut state = EnvironmentEntity.write_model(&EnvironmentModel::from_remote(remote, &local))?;
        state.set_string(&path("key"), key)?;
        Ok(state)
    }
}
