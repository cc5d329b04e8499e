//! Schema model for providers, resources and data sources
//!
//! Schemas are built once per type with [`SchemaBuilder`] and
//! [`AttributeBuilder`], then converted to protocol form by the gRPC layer.
//! Validators and plan modifiers hang off individual attributes.

use crate::types::{AttributePath, Diagnostic, Dynamic, DynamicValue};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

/// Terraform's type system, encoded on the wire as cty type JSON
#[derive(Debug, Clone, PartialEq)]
pub enum AttributeType {
    String,
    Number,
    Bool,
    List(Box<AttributeType>),
    Set(Box<AttributeType>),
    Map(Box<AttributeType>),
    Object(BTreeMap<String, AttributeType>),
}

impl AttributeType {
    pub fn list_of(element: AttributeType) -> Self {
        AttributeType::List(Box::new(element))
    }

    pub fn map_of(element: AttributeType) -> Self {
        AttributeType::Map(Box::new(element))
    }

    /// The cty JSON type descriptor, e.g. `["list","string"]`
    pub fn to_json(&self) -> serde_json::Value {
        use serde_json::{json, Value};

        match self {
            AttributeType::String => json!("string"),
            AttributeType::Number => json!("number"),
            AttributeType::Bool => json!("bool"),
            AttributeType::List(inner) => json!(["list", inner.to_json()]),
            AttributeType::Set(inner) => json!(["set", inner.to_json()]),
            AttributeType::Map(inner) => json!(["map", inner.to_json()]),
            AttributeType::Object(fields) => {
                let fields: serde_json::Map<String, Value> = fields
                    .iter()
                    .map(|(name, ty)| (name.clone(), ty.to_json()))
                    .collect();
                json!(["object", fields])
            }
        }
    }

    pub fn encode(&self) -> Vec<u8> {
        self.to_json().to_string().into_bytes()
    }
}

/// Validates a single configured attribute value
pub trait Validator: Send + Sync {
    fn description(&self) -> String;
    fn validate(&self, request: ValidatorRequest) -> ValidatorResponse;
}

pub struct ValidatorRequest {
    pub config_value: DynamicValue,
    pub path: AttributePath,
}

#[derive(Default)]
pub struct ValidatorResponse {
    pub diagnostics: Vec<Diagnostic>,
}

/// Adjusts the planned value of an attribute after the framework has
/// marked computed values unknown
pub trait PlanModifier: Send + Sync {
    fn description(&self) -> String;
    fn modify(&self, request: PlanModifierRequest) -> PlanModifierResponse;
}

pub struct PlanModifierRequest {
    pub config_value: DynamicValue,
    pub state_value: DynamicValue,
    pub plan_value: DynamicValue,
    pub path: AttributePath,
    /// False while the resource is being created
    pub resource_exists: bool,
}

pub struct PlanModifierResponse {
    pub plan_value: DynamicValue,
    pub requires_replace: bool,
    pub diagnostics: Vec<Diagnostic>,
}

impl PlanModifierResponse {
    pub fn unchanged(request: &PlanModifierRequest) -> Self {
        Self {
            plan_value: request.plan_value.clone(),
            requires_replace: false,
            diagnostics: vec![],
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NestingMode {
    Single,
    List,
}

/// Attributes nested inside an attribute, e.g. a list of objects
#[derive(Debug, Clone)]
pub struct NestedType {
    pub attributes: Vec<Attribute>,
    pub nesting: NestingMode,
    /// List elements are paired with prior state by this attribute rather
    /// than by position
    pub match_by: Option<String>,
}

impl NestedType {
    pub fn list(attributes: Vec<Attribute>) -> Self {
        Self {
            attributes,
            nesting: NestingMode::List,
            match_by: None,
        }
    }

    pub fn single(attributes: Vec<Attribute>) -> Self {
        Self {
            attributes,
            nesting: NestingMode::Single,
            match_by: None,
        }
    }
}

#[derive(Clone)]
pub struct Attribute {
    pub name: String,
    /// Ignored when `nested_type` is set
    pub r#type: AttributeType,
    pub description: String,
    pub required: bool,
    pub optional: bool,
    pub computed: bool,
    pub sensitive: bool,
    pub deprecated: bool,
    pub nested_type: Option<NestedType>,
    pub validators: Vec<Arc<dyn Validator>>,
    pub plan_modifiers: Vec<Arc<dyn PlanModifier>>,
}

impl fmt::Debug for Attribute {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Attribute")
            .field("name", &self.name)
            .field("type", &self.r#type)
            .field("required", &self.required)
            .field("optional", &self.optional)
            .field("computed", &self.computed)
            .field("sensitive", &self.sensitive)
            .field("nested_type", &self.nested_type)
            .field("validators", &self.validators.len())
            .field("plan_modifiers", &self.plan_modifiers.len())
            .finish()
    }
}

impl Attribute {
    /// Fills attributes missing from `value` with null, recursing into
    /// nested objects. Terraform rejects objects with absent attributes.
    fn conform(&self, value: &mut Dynamic) {
        let Some(nested) = &self.nested_type else {
            return;
        };
        match nested.nesting {
            NestingMode::Single => conform_object(&nested.attributes, value),
            NestingMode::List => {
                if let Dynamic::List(items) = value {
                    for item in items.iter_mut() {
                        conform_object(&nested.attributes, item);
                    }
                }
            }
        }
    }
}

fn conform_object(attributes: &[Attribute], value: &mut Dynamic) {
    let Dynamic::Map(entries) = value else {
        return;
    };
    for attr in attributes {
        let slot = entries.entry(attr.name.clone()).or_insert(Dynamic::Null);
        attr.conform(slot);
    }
}

#[derive(Debug, Clone, Default)]
pub struct Block {
    pub attributes: Vec<Attribute>,
    pub description: String,
    pub deprecated: bool,
}

#[derive(Debug, Clone, Default)]
pub struct Schema {
    /// Bump when stored state needs an upgrade
    pub version: i64,
    pub block: Block,
}

impl Schema {
    pub fn attribute(&self, name: &str) -> Option<&Attribute> {
        self.block.attributes.iter().find(|a| a.name == name)
    }

    /// Fills every schema attribute missing from an object value with null
    pub fn conform(&self, value: &mut DynamicValue) {
        if value.is_null() || value.is_unknown() {
            return;
        }
        conform_object(&self.block.attributes, &mut value.value);
    }
}

/// Fluent construction of a single attribute
pub struct AttributeBuilder {
    attribute: Attribute,
}

impl AttributeBuilder {
    pub fn new(name: &str, type_: AttributeType) -> Self {
        Self {
            attribute: Attribute {
                name: name.to_string(),
                r#type: type_,
                description: String::new(),
                required: false,
                optional: false,
                computed: false,
                sensitive: false,
                deprecated: false,
                nested_type: None,
                validators: Vec::new(),
                plan_modifiers: Vec::new(),
            },
        }
    }

    /// An attribute holding a list of objects
    pub fn nested_list(name: &str, attributes: Vec<Attribute>) -> Self {
        let mut builder = Self::new(name, AttributeType::List(Box::new(AttributeType::String)));
        builder.attribute.nested_type = Some(NestedType::list(attributes));
        builder
    }

    /// An attribute holding a single object
    pub fn nested_object(name: &str, attributes: Vec<Attribute>) -> Self {
        let mut builder = Self::new(name, AttributeType::Object(BTreeMap::new()));
        builder.attribute.nested_type = Some(NestedType::single(attributes));
        builder
    }

    /// Pairs nested list elements with their prior state by `attribute`,
    /// so inserting an element does not shift the state of its neighbours
    pub fn match_elements_by(mut self, attribute: &str) -> Self {
        if let Some(nested) = self.attribute.nested_type.as_mut() {
            nested.match_by = Some(attribute.to_string());
        }
        self
    }

    pub fn description(mut self, desc: &str) -> Self {
        self.attribute.description = desc.to_string();
        self
    }

    pub fn required(mut self) -> Self {
        self.attribute.required = true;
        self.attribute.optional = false;
        self
    }

    pub fn optional(mut self) -> Self {
        self.attribute.optional = true;
        self.attribute.required = false;
        self
    }

    pub fn computed(mut self) -> Self {
        self.attribute.computed = true;
        self
    }

    pub fn sensitive(mut self) -> Self {
        self.attribute.sensitive = true;
        self
    }

    pub fn deprecated(mut self) -> Self {
        self.attribute.deprecated = true;
        self
    }

    pub fn validator(mut self, validator: impl Validator + 'static) -> Self {
        self.attribute.validators.push(Arc::new(validator));
        self
    }

    pub fn plan_modifier(mut self, modifier: impl PlanModifier + 'static) -> Self {
        self.attribute.plan_modifiers.push(Arc::new(modifier));
        self
    }

    pub fn build(self) -> Attribute {
        self.attribute
    }
}

/// Fluent construction of a schema
#[derive(Default)]
pub struct SchemaBuilder {
    schema: Schema,
}

impl SchemaBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn version(mut self, version: i64) -> Self {
        self.schema.version = version;
        self
    }

    pub fn description(mut self, desc: &str) -> Self {
        self.schema.block.description = desc.to_string();
        self
    }

    pub fn attribute(mut self, attr: Attribute) -> Self {
        self.schema.block.attributes.push(attr);
        self
    }

    pub fn build(self) -> Schema {
        self.schema
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::AttributePath;

    #[test]
    fn type_descriptors_match_cty_json() {
        assert_eq!(AttributeType::String.encode(), br#""string""#.to_vec());
        assert_eq!(
            AttributeType::list_of(AttributeType::String).encode(),
            br#"["list","string"]"#.to_vec()
        );
        assert_eq!(
            AttributeType::map_of(AttributeType::String).encode(),
            br#"["map","string"]"#.to_vec()
        );

        let object = AttributeType::Object(BTreeMap::from([
            ("id".to_string(), AttributeType::String),
            ("enabled".to_string(), AttributeType::Bool),
        ]));
        assert_eq!(
            object.encode(),
            br#"["object",{"enabled":"bool","id":"string"}]"#.to_vec()
        );
    }

    #[test]
    fn builder_flags() {
        let attr = AttributeBuilder::new("client_secret", AttributeType::String)
            .description("OAuth client secret")
            .optional()
            .sensitive()
            .build();

        assert!(attr.optional);
        assert!(!attr.required);
        assert!(attr.sensitive);
        assert_eq!(attr.description, "OAuth client secret");
    }

    #[test]
    fn conform_fills_missing_attributes_with_null() {
        let schema = SchemaBuilder::new()
            .attribute(AttributeBuilder::new("key", AttributeType::String).required().build())
            .attribute(AttributeBuilder::new("id", AttributeType::String).computed().build())
            .attribute(
                AttributeBuilder::nested_list(
                    "variations",
                    vec![
                        AttributeBuilder::new("key", AttributeType::String).required().build(),
                        AttributeBuilder::new("id", AttributeType::String).computed().build(),
                    ],
                )
                .optional()
                .build(),
            )
            .build();

        let mut value = DynamicValue::object();
        value.set_string(&AttributePath::new("key"), "feature").unwrap();
        value
            .set_list(
                &AttributePath::new("variations"),
                vec![Dynamic::Map(BTreeMap::from([(
                    "key".to_string(),
                    Dynamic::from("on"),
                )]))],
            )
            .unwrap();

        schema.conform(&mut value);

        assert_eq!(value.get(&AttributePath::new("id")), Some(&Dynamic::Null));
        assert_eq!(
            value.get(&AttributePath::new("variations").index(0).attribute("id")),
            Some(&Dynamic::Null)
        );
    }
}
