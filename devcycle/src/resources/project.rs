use tfplug::plan_modifier::{RequiresReplace, UseStateForUnknown};
use tfplug::schema::Schema;
use tfplug::types::AttributePath;
use tfplug::validator::StringLength;
use tfplug::{AttributeBuilder, AttributeType, DynamicValue, SchemaBuilder};

use super::{id_attribute, key_attribute, merge_optional, optional, path, set_optional, string, ManagedEntity};
use crate::api::projects::{Project, ProjectRequest};
use crate::error::ProviderError;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProjectModel {
    pub id: Option<String>,
    pub key: String,
    pub name: String,
    pub description: Option<String>,
    pub organization: Option<String>,
}

impl ProjectModel {
    pub fn from_remote(remote: Project, local: &ProjectModel) -> Self {
        Self {
            id: Some(remote.id),
            key: remote.key,
            name: remote.name,
            description: merge_optional(remote.description.as_deref(), local.description.as_deref()),
            organization: Some(remote.organization),
        }
    }

    pub fn to_request(&self) -> ProjectRequest {
        ProjectRequest {
            name: self.name.clone(),
            key: self.key.clone(),
            description: self.description.clone(),
        }
    }
}

#[derive(Default)]
pub struct ProjectEntity;

impl ManagedEntity for ProjectEntity {
    type Api = Project;
    type Model = ProjectModel;

    const TYPE_NAME: &'static str = "devcycle_project";

    fn schema(&self) -> Schema {
        SchemaBuilder::new()
            .version(0)
            .description("Manages a DevCycle project")
            .attribute(id_attribute())
            .attribute(
                key_attribute("Unique project key, used in API paths")
                    .plan_modifier(RequiresReplace)
                    .build(),
            )
            .attribute(
                AttributeBuilder::new("name", AttributeType::String)
                    .description("Project name")
                    .required()
                    .validator(StringLength { min: 1, max: Some(100) })
                    .build(),
            )
            .attribute(
                AttributeBuilder::new("description", AttributeType::String)
                    .description("Project description")
                    .optional()
                    .build(),
            )
            .attribute(
                AttributeBuilder::new("organization", AttributeType::String)
                    .description("Organization that owns the project")
                    .computed()
                    .plan_modifier(UseStateForUnknown)
                    .build(),
            )
            .build()
    }

    fn import_attributes(&self) -> Vec<AttributePath> {
        vec![path("key")]
    }

    fn read_model(&self, value: &DynamicValue) -> Result<ProjectModel, ProviderError> {
        Ok(ProjectModel {
            id: optional(value, "id")?,
            key: string(value, "key")?,
            name: string(value, "name")?,
            description: optional(value, "description")?,
            organization: optional(value, "organization")?,
        })
    }

    fn write_model(&self, model: &ProjectModel) -> Result<DynamicValue, ProviderError> {
        let mut state = DynamicValue::object();
        set_optional(&mut state, "id", model.id.as_deref())?;
        state.set_string(&path("key"), &model.key)?;
        state.set_string(&path("name"), &model.name)?;
        set_optional(&mut state, "description", model.description.as_deref())?;
        set_optional(&mut state, "organization", model.organization.as_deref())?;
        Ok(state)
    }

    fn create_request(&self, model: &ProjectModel) -> Result<ProjectRequest, ProviderError> {
        Ok(model.to_request())
    }

    fn update_request(&self, model: &ProjectModel) -> Result<ProjectRequest, ProviderError> {
        Ok(model.to_request())
    }

    fn merge_remote(&self, remote: Project, local: &ProjectModel) -> Result<ProjectModel, ProviderError> {
        Ok(ProjectModel::from_remote(remote, local))
    }

    fn project<'m>(&self, _model: &'m ProjectModel) -> Option<&'m str> {
        None
    }

    fn item_ref(&self, model: &ProjectModel) -> String {
        model.key.clone()
    }
}
