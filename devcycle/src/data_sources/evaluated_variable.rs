//! Variables evaluated for a user through the bucketing API
//!
//! One data source per variable type so `default_value` and `value` carry a
//! fixed Terraform type. JSON values travel as canonical JSON text.

use async_trait::async_trait;
use tfplug::context::Context;
use tfplug::data_source::{
    ConfigureDataSourceRequest, ConfigureDataSourceResponse, DataSource,
    DataSourceSchemaRequest, DataSourceSchemaResponse, DataSourceWithConfigure,
    ReadDataSourceRequest, ReadDataSourceResponse, ValidateDataSourceConfigRequest,
    ValidateDataSourceConfigResponse,
};
use tfplug::schema::Schema;
use tfplug::{AttributeBuilder, AttributeType, Diagnostic, Dynamic, DynamicValue, SchemaBuilder};

use crate::api::EvaluationUser;
use crate::codec::{CodecError, VariableType, VariableValue};
use crate::error::ProviderError;
use crate::provider_data::{downcast, DevCycleProviderData};
use crate::resources::path;

pub struct EvaluatedVariableDataSource {
    variable_type: VariableType,
    type_name: String,
    provider_data: Option<DevCycleProviderData>,
}

impl EvaluatedVariableDataSource {
    pub fn new(variable_type: VariableType) -> Self {
        Self {
            variable_type,
            type_name: Self::type_name_for(variable_type),
            provider_data: None,
        }
    }

    pub fn type_name_for(variable_type: VariableType) -> String {
        format!(
            "devcycle_evaluated_variable_{}",
            variable_type.as_str().to_lowercase()
        )
    }

    fn value_type(&self) -> AttributeType {
        match self.variable_type {
            VariableType::Boolean => AttributeType::Bool,
            VariableType::Number => AttributeType::Number,
            VariableType::String | VariableType::Json => AttributeType::String,
        }
    }

    fn user_attributes() -> Vec<tfplug::schema::Attribute> {
        let optional = |name: &str, description: &str| {
            AttributeBuilder::new(name, AttributeType::String)
                .description(description)
                .optional()
                .build()
        };
        vec![
            AttributeBuilder::new("id", AttributeType::String)
                .description("User ID the variable is bucketed on")
                .required()
                .build(),
            optional("name", "User name"),
            optional("email", "User email"),
            optional("app_version", "Version of the calling application"),
            optional("app_build", "Build of the calling application"),
        ]
    }

    fn read_user(config: &DynamicValue) -> Result<EvaluationUser, ProviderError> {
        let user = path("user");
        Ok(EvaluationUser {
            user_id: config.get_string(&user.clone().attribute("id"))?,
            name: config.get_string_opt(&user.clone().attribute("name"))?,
            email: config.get_string_opt(&user.clone().attribute("email"))?,
            app_version: config.get_string_opt(&user.clone().attribute("app_version"))?,
            app_build: config.get_string_opt(&user.attribute("app_build"))?,
        })
    }

    fn read_default(&self, config: &DynamicValue) -> Result<VariableValue, ProviderError> {
        let default = path("default_value");
        let value = match self.variable_type {
            VariableType::Boolean => VariableValue::Boolean(config.get_bool(&default)?),
            VariableType::Number => VariableValue::Number(config.get_number(&default)?),
            VariableType::String => VariableValue::String(config.get_string(&default)?),
            VariableType::Json => {
                VariableValue::parse(&config.get_string(&default)?, VariableType::Json)?
            }
        };
        Ok(value)
    }

    async fn evaluate(&self, config: &DynamicValue) -> Result<DynamicValue, ProviderError> {
        let client = self
            .provider_data
            .as_ref()
            .ok_or(ProviderError::EvaluationNotConfigured)?
            .evaluation()?;

        let key = config.get_string(&path("id"))?;
        let user = Self::read_user(config)?;
        let default = self.read_default(config)?;

        let value = match client.variable(&user, &key).await? {
            None => default,
            Some(evaluated) if evaluated.variable_type != self.variable_type => {
                return Err(CodecError::TypeMismatch {
                    expected: self.variable_type,
                    actual: evaluated.variable_type.to_string(),
                }
                .into());
            }
            Some(evaluated) => VariableValue::from_wire(&evaluated.value, self.variable_type)?,
        };

        let mut state = config.clone();
        state.set_value(&path("value"), to_dynamic(value))?;
        Ok(state)
    }
}

fn to_dynamic(value: VariableValue) -> Dynamic {
    match value {
        VariableValue::Boolean(b) => Dynamic::Bool(b),
        VariableValue::Number(n) => Dynamic::Number(n),
        VariableValue::String(s) => Dynamic::String(s),
        json @ VariableValue::Json(_) => Dynamic::String(json.to_text()),
    }
}

#[async_trait]
impl DataSource for EvaluatedVariableDataSource {
    fn type_name(&self) -> &str {
        &self.type_name
    }

    async fn schema(&self, _ctx: Context, _request: DataSourceSchemaRequest) -> DataSourceSchemaResponse {
        let description = format!("Evaluates a {} variable for a user", self.variable_type);
        let schema: Schema = SchemaBuilder::new()
            .description(&description)
            .attribute(
                AttributeBuilder::new("id", AttributeType::String)
                    .description("Variable key")
                    .required()
                    .build(),
            )
            .attribute(
                AttributeBuilder::nested_object("user", Self::user_attributes())
                    .description("User to evaluate the variable for")
                    .required()
                    .build(),
            )
            .attribute(
                AttributeBuilder::new("default_value", self.value_type())
                    .description("Value used when the variable does not exist")
                    .required()
                    .build(),
            )
            .attribute(
                AttributeBuilder::new("value", self.value_type())
                    .description("Evaluated value")
                    .computed()
                    .build(),
            )
            .build();
        DataSourceSchemaResponse {
            schema,
            diagnostics: vec![],
        }
    }

    async fn validate(
        &self,
        _ctx: Context,
        request: ValidateDataSourceConfigRequest,
    ) -> ValidateDataSourceConfigResponse {
        let mut diagnostics = vec![];
        if self.variable_type == VariableType::Json {
            if let Ok(Some(text)) = request.config.get_string_opt(&path("default_value")) {
                if let Err(e) = VariableValue::parse(&text, VariableType::Json) {
                    diagnostics.push(
                        Diagnostic::error("Invalid default_value", e.to_string())
                            .with_attribute(path("default_value")),
                    );
                }
            }
        }
        ValidateDataSourceConfigResponse { diagnostics }
    }

    async fn read(&self, _ctx: Context, request: ReadDataSourceRequest) -> ReadDataSourceResponse {
        match self.evaluate(&request.config).await {
            Ok(state) => ReadDataSourceResponse {
                state,
                diagnostics: vec![],
            },
            Err(e) => ReadDataSourceResponse {
                state: request.config,
                diagnostics: vec![e.diagnostic(format!("Failed to evaluate {}", self.type_name))],
            },
        }
    }
}

#[async_trait]
impl DataSourceWithConfigure for EvaluatedVariableDataSource {
    async fn configure(
        &mut self,
        _ctx: Context,
        request: ConfigureDataSourceRequest,
    ) -> ConfigureDataSourceResponse {
        self.provider_data = downcast(request.provider_data);
        ConfigureDataSourceResponse {
            diagnostics: vec![],
        }
    }
}
