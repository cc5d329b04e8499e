//! Built-in plan modifiers

use crate::schema::{PlanModifier, PlanModifierRequest, PlanModifierResponse};
use crate::types::Dynamic;

/// Forces destroy and recreate when the value of an existing resource changes.
///
/// Unknown plan values are left alone: if the new value can only be known
/// after apply, Terraform cannot tell whether it changed.
pub struct RequiresReplace;

impl PlanModifier for RequiresReplace {
    fn description(&self) -> String {
        "Changing this value forces a new resource to be created".to_string()
    }

    fn modify(&self, request: PlanModifierRequest) -> PlanModifierResponse {
        let mut response = PlanModifierResponse::unchanged(&request);
        if !request.resource_exists || request.plan_value.is_unknown() {
            return response;
        }
        // A computed attribute left out of config keeps its state value
        if request.config_value.is_null() && request.plan_value.is_null() {
            return response;
        }

        response.requires_replace = request.state_value.value != request.plan_value.value;
        response
    }
}

/// Copies the prior state value into the plan when the plan would
/// otherwise be unknown. For remote assigned values that never change.
pub struct UseStateForUnknown;

impl PlanModifier for UseStateForUnknown {
    fn description(&self) -> String {
        "Once set, the value of this attribute in state will not change".to_string()
    }

    fn modify(&self, request: PlanModifierRequest) -> PlanModifierResponse {
        let mut response = PlanModifierResponse::unchanged(&request);
        if request.plan_value.is_unknown()
            && request.config_value.is_null()
            && !matches!(request.state_value.value, Dynamic::Null)
        {
            response.plan_value = request.state_value;
        }
        response
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{AttributePath, DynamicValue};

    fn request(
        config: Dynamic,
        state: Dynamic,
        plan: Dynamic,
        resource_exists: bool,
    ) -> PlanModifierRequest {
        PlanModifierRequest {
            config_value: DynamicValue::new(config),
            state_value: DynamicValue::new(state),
            plan_value: DynamicValue::new(plan),
            path: AttributePath::new("key"),
            resource_exists,
        }
    }

    #[test]
    fn requires_replace_on_changed_value() {
        let response = RequiresReplace.modify(request(
            Dynamic::from("new-key"),
            Dynamic::from("old-key"),
            Dynamic::from("new-key"),
            true,
        ));
        assert!(response.requires_replace);
    }

    #[test]
    fn requires_replace_ignores_creates_and_equal_values() {
        let create = RequiresReplace.modify(request(
            Dynamic::from("key"),
            Dynamic::Null,
            Dynamic::from("key"),
            false,
        ));
        assert!(!create.requires_replace);

        let same = RequiresReplace.modify(request(
            Dynamic::from("key"),
            Dynamic::from("key"),
            Dynamic::from("key"),
            true,
        ));
        assert!(!same.requires_replace);
    }

    #[test]
    fn requires_replace_ignores_unknown_plan() {
        let response = RequiresReplace.modify(request(
            Dynamic::Unknown,
            Dynamic::from("old"),
            Dynamic::Unknown,
            true,
        ));
        assert!(!response.requires_replace);
    }

    #[test]
    fn use_state_for_unknown_keeps_prior_value() {
        let response = UseStateForUnknown.modify(request(
            Dynamic::Null,
            Dynamic::from("61f97628ff4afcb6d057dbf0"),
            Dynamic::Unknown,
            true,
        ));
        assert_eq!(response.plan_value.value, Dynamic::from("61f97628ff4afcb6d057dbf0"));
    }

    #[test]
    fn use_state_for_unknown_leaves_creates_unknown() {
        let response =
            UseStateForUnknown.modify(request(Dynamic::Null, Dynamic::Null, Dynamic::Unknown, false));
        assert!(response.plan_value.is_unknown());
    }
}
