use async_trait::async_trait;
use tfplug::schema::Schema;
use tfplug::{DynamicValue, SchemaBuilder};

use super::{computed_string, lookup_string, not_found, Lookup};
use crate::api::Client;
use crate::error::ProviderError;
use crate::resources::project::{ProjectEntity, ProjectModel};
use crate::resources::{path, ManagedEntity};

#[derive(Default)]
pub struct ProjectLookup;

#[async_trait]
impl Lookup for ProjectLookup {
    const TYPE_NAME: &'static str = "devcycle_project";

    fn schema(&self) -> Schema {
        SchemaBuilder::new()
            .description("Looks up a DevCycle project by key")
            .attribute(lookup_string("key", "Project key or ID"))
            .attribute(computed_string("id", "Project ID"))
            .attribute(computed_string("name", "Project name"))
            .attribute(computed_string("description", "Project description"))
            .attribute(computed_string("organization", "Owning organization"))
            .attribute(computed_string("created_by", "User that created the project"))
            .attribute(computed_string("created_at", "Creation timestamp"))
            .attribute(computed_string("updated_at", "Last update timestamp"))
            .build()
    }

    async fn read(&self, client: &Client, config: &DynamicValue) -> Result<DynamicValue, ProviderError> {
        let key = config.get_string(&path("key"))?;
        let remote = client
            .projects()
            .get(&key)
            .await
            .map_err(|e| not_found("project", &key, e))?;

        let created_by = remote.created_by.clone();
        let created_at = remote.created_at.clone();
        let updated_at = remote.updated_at.clone();
        let model = ProjectModel::from_remote(remote, &ProjectModel::default());

        let mut state = ProjectEntity.write_model(&model)?;
        // Looked up by ID, `key` still reports what was configured
        state.set_string(&path("key"), key)?;
        state.set_string(&path("created_by"), created_by)?;
        state.set_string(&path("created_at"), created_at)?;
        state.set_string(&path("updated_at"), updated_at)?;
        Ok(state)
    }
}
