//! Import helpers

use crate::resource::{ImportResourceStateRequest, ImportResourceStateResponse, ImportedResource};
use crate::types::{AttributePath, Diagnostic, DynamicValue};

/// Seeds state with the import id stored at `attr_path`.
///
/// `terraform import devcycle_project.main my-project` gives
/// `{ key = "my-project" }`.
pub fn import_state_passthrough_id(
    attr_path: AttributePath,
    request: &ImportResourceStateRequest,
    response: &mut ImportResourceStateResponse,
) {
    let mut state = DynamicValue::object();
    if let Err(e) = state.set_string(&attr_path, request.id.clone()) {
        response.diagnostics.push(
            Diagnostic::error(
                "Failed to set import ID",
                format!("Could not set {} to {:?}: {}", attr_path, request.id, e),
            )
            .with_attribute(attr_path),
        );
        return;
    }

    response.imported_resources.push(ImportedResource {
        type_name: request.type_name.clone(),
        state,
        private: Vec::new(),
    });
}

/// Seeds state from a composite import id such as `project/feature`.
///
/// The id must have exactly one non-empty part per attribute.
pub fn import_state_split_id(
    attr_paths: &[AttributePath],
    separator: char,
    request: &ImportResourceStateRequest,
    response: &mut ImportResourceStateResponse,
) {
    let parts: Vec<&str> = request.id.split(separator).collect();
    if parts.len() != attr_paths.len() || parts.iter().any(|p| p.is_empty()) {
        let expected = attr_paths
            .iter()
            .map(|p| format!("<{}>", p))
            .collect::<Vec<_>>()
            .join(&separator.to_string());
        response.diagnostics.push(Diagnostic::error(
            "Unexpected import identifier",
            format!("Expected an import ID of the form {}, got {:?}", expected, request.id),
        ));
        return;
    }

    let mut state = DynamicValue::object();
    for (path, part) in attr_paths.iter().zip(parts) {
        if let Err(e) = state.set_string(path, part) {
            response.diagnostics.push(
                Diagnostic::error("Failed to set import ID", e.to_string())
                    .with_attribute(path.clone()),
            );
            return;
        }
    }

    response.imported_resources.push(ImportedResource {
        type_name: request.type_name.clone(),
        state,
        private: Vec::new(),
    });
}
