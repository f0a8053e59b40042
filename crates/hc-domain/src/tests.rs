use crate::types::*;
use crate::DomainError;
use serde_json::json;

fn duration_option() -> Option {
    Option::from_api(&json!({
        "key": "BSH.Common.Option.Duration",
        "type": "Int",
        "value": 3600,
        "unit": "seconds",
        "constraints": { "min": 0, "max": 86400, "stepsize": 60, "access": "readWrite" }
    }))
    .unwrap()
}

fn enum_option() -> Option {
    Option::from_api(&json!({
        "key": "Cooking.Oven.Option.WarmingLevel",
        "type": "Cooking.Oven.EnumType.WarmingLevel",
        "value": "Cooking.Oven.EnumType.WarmingLevel.Low",
        "constraints": {
            "allowedvalues": [
                "Cooking.Oven.EnumType.WarmingLevel.Low",
                "Cooking.Oven.EnumType.WarmingLevel.Medium"
            ],
            "access": "readWrite"
        }
    }))
    .unwrap()
}

#[test]
fn validate_value_rejects_out_of_range() {
    let opt = duration_option();
    let err = opt.validate_value(json!(90000)).unwrap_err();
    assert!(matches!(err, DomainError::OutOfRange { .. }));
}

#[test]
fn validate_value_rejects_step_mismatch() {
    let opt = duration_option();
    let err = opt.validate_value(json!(65)).unwrap_err();
    assert!(matches!(err, DomainError::StepMismatch { .. }));
}

#[test]
fn validate_value_returns_the_candidate_not_the_stored_value() {
    let opt = duration_option();
    let validated = opt.validate_value(json!(1800)).unwrap();
    assert_eq!(validated, json!(1800));
    assert_ne!(validated, opt.value.unwrap());
}

#[test]
fn validate_value_rejects_value_outside_allowed_set() {
    let opt = enum_option();
    let err = opt
        .validate_value(json!("Cooking.Oven.EnumType.WarmingLevel.High"))
        .unwrap_err();
    assert!(matches!(err, DomainError::NotAllowed { .. }));
}

#[test]
fn validate_value_rejects_read_only_option() {
    let mut opt = duration_option();
    opt.access = Some(Access::Read);
    let err = opt.validate_value(json!(120)).unwrap_err();
    assert!(matches!(err, DomainError::ReadOnly(_)));
}

#[test]
fn operation_state_parses_suffix_of_full_enum_key() {
    let state = OperationState::from_wire("BSH.Common.EnumType.OperationState.DelayedStart");
    assert_eq!(state, Some(OperationState::DelayedStart));
}

#[test]
fn operation_state_unknown_value_is_none() {
    assert_eq!(OperationState::from_wire("BSH.Common.EnumType.OperationState.Bogus"), None);
}

#[test]
fn applied_program_options_is_none_when_catalog_is_missing_the_key() {
    let mut appliance = Appliance::from_api(&json!({ "haId": "SIEMENS-HCS000001" })).unwrap();
    appliance.active_program = Some(Program {
        key: "Cooking.Oven.Program.HeatingMode.HotAir".into(),
        name: None,
        options: Default::default(),
        execution: None,
        active: true,
    });
    assert!(appliance.get_applied_program_available_options().is_none());
}

#[test]
fn applied_program_options_found_when_catalog_has_the_key() {
    let mut appliance = Appliance::from_api(&json!({ "haId": "SIEMENS-HCS000001" })).unwrap();
    let program = Program {
        key: "Cooking.Oven.Program.HeatingMode.HotAir".into(),
        name: Some("Hot air".into()),
        options: Default::default(),
        execution: None,
        active: false,
    };
    appliance.available_programs.insert(program.key.clone(), program.clone());
    appliance.active_program = Some(program);
    assert!(appliance.get_applied_program_available_options().is_some());
}
