//! Generated tfplugin6 messages and service
//!
//! Several message names clash with framework types (`DynamicValue`,
//! `Schema`, `Diagnostic`), so refer to these through the `proto::` prefix.

include!(concat!(env!("OUT_DIR"), "/tfplugin6.rs"));

#[cfg(test)]
mod tests {
    use super::*;
    use prost::Message;

    #[test]
    fn dynamic_value_wire_roundtrip() {
        let value = DynamicValue {
            msgpack: vec![0xc0],
            json: vec![],
        };
        let bytes = value.encode_to_vec();
        assert_eq!(DynamicValue::decode(bytes.as_slice()).unwrap(), value);
    }

    #[test]
    fn nested_types_are_generated() {
        let _ = schema::object::NestingMode::List;
        let _ = attribute_path::step::Selector::ElementKeyInt(0);
        let _ = import_resource_state::ImportedResource::default();
        let _ = stop_provider::Response::default().error;
    }
}
