use async_trait::async_trait;
use tfplug::schema::Schema;
use tfplug::{AttributeBuilder, AttributeType, DynamicValue, SchemaBuilder};

use super::{computed_string, lookup_string, not_found, Lookup};
use crate::api::Client;
use crate::error::ProviderError;
use crate::resources::feature::{FeatureEntity, FeatureModel};
use crate::resources::{path, ManagedEntity};

#[derive(Default)]
pub struct FeatureLookup;

#[async_trait]
impl Lookup for FeatureLookup {
    const TYPE_NAME: &'static str = "devcycle_feature";

    fn schema(&self) -> Schema {
        SchemaBuilder::new()
            .description("Looks up a DevCycle feature with its variations and variables")
            .attribute(lookup_string("project_id", "Project key or ID"))
            .attribute(lookup_string("key", "Feature key"))
            .attribute(computed_string("id", "Feature ID"))
            .attribute(computed_string("name", "Feature name"))
            .attribute(computed_string("description", "Feature description"))
            .attribute(computed_string("type", "Feature type"))
            .attribute(computed_string("source", "Where the feature was created"))
            .attribute(
                AttributeBuilder::new("tags", AttributeType::list_of(AttributeType::String))
                    .description("Feature tags")
                    .computed()
                    .build(),
            )
            .attribute(
                AttributeBuilder::nested_list(
                    "variations",
                    vec![
                        computed_string("id", "Variation ID"),
                        computed_string("key", "Variation key"),
                        computed_string("name", "Variation name"),
                        AttributeBuilder::new("variables", AttributeType::map_of(AttributeType::String))
                            .description("Value served for each variable")
                            .computed()
                            .build(),
                    ],
                )
                .description("Variations, sorted by key")
                .computed()
                .build(),
            )
            .attribute(
                AttributeBuilder::nested_list(
                    "variables",
                    vec![
                        computed_string("id", "Variable ID"),
                        computed_string("key", "Variable key"),
                        computed_string("name", "Variable name"),
                        computed_string("description", "Variable description"),
                        computed_string("feature_key", "Key of the owning feature"),
                        computed_string("type", "Variable type"),
                        computed_string("created_at", "Creation timestamp"),
                        computed_string("updated_at", "Last update timestamp"),
                    ],
                )
                .description("Variables, sorted by key")
                .computed()
                .build(),
            )
            .build()
    }

    async fn read(&self, client: &Client, config: &DynamicValue) -> Result<DynamicValue, ProviderError> {
        let project_id = config.get_string(&path("project_id"))?;
        let key = config.get_string(&path("key"))?;
        let remote = client
            .features(&project_id)
            .get(&key)
            .await
            .map_err(|e| not_found("feature", &key, e))?;

        let local = FeatureModel {
            project_id,
            ..Default::default()
        };
        let model = FeatureModel::from_remote(remote, &local)?;
        let mut state = FeatureEntity.write_model(&model)?;
        state.set_string(&path("key"), key)?;
        Ok(state)
    }
}
