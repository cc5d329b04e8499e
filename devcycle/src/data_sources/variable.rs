use async_trait::async_trait;
use tfplug::schema::Schema;
use tfplug::{AttributeBuilder, AttributeType, Dynamic, DynamicValue, SchemaBuilder};

use super::{computed_string, lookup_string, not_found, Lookup};
use crate::api::Client;
use crate::codec::VariableValue;
use crate::error::ProviderError;
use crate::resources::variable::{VariableEntity, VariableModel};
use crate::resources::{path, ManagedEntity};

#[derive(Default)]
pub struct VariableLookup;

/// Fills the typed projection of the default value matching its type and
/// leaves the others null
fn set_typed_values(
    state: &mut DynamicValue,
    value: Option<VariableValue>,
) -> Result<(), ProviderError> {
    let mut projections = [
        ("string_value", Dynamic::Null),
        ("number_value", Dynamic::Null),
        ("bool_value", Dynamic::Null),
        ("json_value", Dynamic::Null),
    ];
    match value {
        Some(VariableValue::String(s)) => projections[0].1 = Dynamic::String(s),
        Some(VariableValue::Number(n)) => projections[1].1 = Dynamic::Number(n),
        Some(VariableValue::Boolean(b)) => projections[2].1 = Dynamic::Bool(b),
        Some(json @ VariableValue::Json(_)) => projections[3].1 = Dynamic::String(json.to_text()),
        None => {}
    }
    for (name, value) in projections {
        state.set_value(&path(name), value)?;
    }
    Ok(())
}

#[async_trait]
impl Lookup for VariableLookup {
    const TYPE_NAME: &'static str = "devcycle_variable";

    fn schema(&self) -> Schema {
        SchemaBuilder::new()
            .description("Looks up a DevCycle variable")
            .attribute(lookup_string("project_id", "Project key or ID"))
            .attribute(lookup_string("key", "Variable key or ID"))
            .attribute(computed_string("id", "Variable ID"))
            .attribute(computed_string("name", "Variable name"))
            .attribute(computed_string("description", "Variable description"))
            .attribute(computed_string("feature_id", "ID of the owning feature"))
            .attribute(computed_string("type", "Variable type"))
            .attribute(computed_string("default_value", "Default value as text"))
            .attribute(computed_string("string_value", "Default value of a String variable"))
            .attribute(
                AttributeBuilder::new("number_value", AttributeType::Number)
                    .description("Default value of a Number variable")
                    .computed()
                    .build(),
            )
            .attribute(
                AttributeBuilder::new("bool_value", AttributeType::Bool)
                    .description("Default value of a Boolean variable")
                    .computed()
                    .build(),
            )
            .attribute(computed_string("json_value", "Default value of a JSON variable"))
            .build()
    }

    async fn read(&self, client: &Client, config: &DynamicValue) -> Result<DynamicValue, ProviderError> {
        let project_id = config.get_string(&path("project_id"))?;
        let key = config.get_string(&path("key"))?;
        let remote = client
            .variables(&project_id)
            .get(&key)
            .await
            .map_err(|e| not_found("variable", &key, e))?;

        let typed = match &remote.default_value {
            None | Some(serde_json::Value::Null) => None,
            Some(wire) => Some(VariableValue::from_wire(wire, remote.variable_type)?),
        };
        let local = VariableModel {
            project_id,
            ..Default::default()
        };
        let model = VariableModel::from_remote(remote, &local)?;

        let mut state = VariableEntity.write_model(&model)?;
        state.set_string(&path("key"), key)?;
        set_typed_values(&mut state, typed)?;
        Ok(state)
    }
}
