use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::DomainError;

// ── Option ───────────────────────────────────────────────────────────────────

/// When an option or program can be changed: only while selecting
/// (`SelectOnly`), only at program start (`StartOnly`, buffered client-side
/// rather than sent with `set_option`/`select_program`), or at any time
/// (`Always`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Execution {
    SelectOnly,
    StartOnly,
    Always,
}

/// Read/write access level of an option or setting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Access {
    Read,
    ReadWrite,
}

/// A single option of a program (e.g. `BSH.Common.Option.Duration`), or a
/// setting of an appliance (settings reuse this shape — the Home Connect API
/// returns both as `{key, value, ...}` records with the same constraint
/// vocabulary).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Option {
    pub key: String,
    pub value: std::option::Option<Value>,
    #[serde(rename = "type")]
    pub option_type: std::option::Option<String>,
    pub name: std::option::Option<String>,
    pub unit: std::option::Option<String>,
    pub display_value: std::option::Option<String>,
    pub min: std::option::Option<i64>,
    pub max: std::option::Option<i64>,
    pub step_size: std::option::Option<i64>,
    pub allowed_values: std::option::Option<Vec<String>>,
    pub execution: std::option::Option<Execution>,
    pub live_update: std::option::Option<bool>,
    pub access: std::option::Option<Access>,
}

impl Option {
    /// Build an `Option` from a raw Home Connect API option/setting record.
    ///
    /// Restores the fuller field set the later upstream split
    /// (`options.py`) settled on rather than the narrower one an earlier
    /// monolithic snapshot carried.
    pub fn from_api(data: &Value) -> Result<Self, DomainError> {
        let key = data
            .get("key")
            .and_then(Value::as_str)
            .ok_or_else(|| DomainError::MalformedPayload("option missing 'key'".into()))?
            .to_string();

        let constraints = data.get("constraints");
        Ok(Option {
            key,
            value: data.get("value").cloned(),
            option_type: str_field(data, "type"),
            name: str_field(data, "name"),
            unit: str_field(data, "unit"),
            display_value: str_field(data, "displayvalue"),
            min: constraints.and_then(|c| c.get("min")).and_then(Value::as_i64),
            max: constraints.and_then(|c| c.get("max")).and_then(Value::as_i64),
            step_size: constraints
                .and_then(|c| c.get("stepsize"))
                .and_then(Value::as_i64),
            allowed_values: constraints
                .and_then(|c| c.get("allowedvalues"))
                .and_then(Value::as_array)
                .map(|a| a.iter().filter_map(|v| v.as_str().map(String::from)).collect()),
            execution: constraints
                .and_then(|c| c.get("execution"))
                .and_then(Value::as_str)
                .and_then(parse_execution),
            live_update: constraints
                .and_then(|c| c.get("liveupdate"))
                .and_then(Value::as_bool),
            access: constraints
                .and_then(|c| c.get("access"))
                .and_then(Value::as_str)
                .and_then(parse_access),
        })
    }

    /// Validate `value` against this option's constraints and, if valid,
    /// return it unchanged so the caller can send it on to the API.
    ///
    /// A passing validation returns the candidate `value` itself, not the
    /// option's currently stored value — otherwise "validate before PUT"
    /// would be a silent no-op.
    pub fn validate_value(&self, value: Value) -> Result<Value, DomainError> {
        if self.access == Some(Access::Read) {
            return Err(DomainError::ReadOnly(self.key.clone()));
        }

        if let std::option::Option::Some(allowed) = &self.allowed_values {
            let as_str = value.as_str().map(str::to_string).unwrap_or_else(|| value.to_string());
            if !allowed.iter().any(|a| a == &as_str) {
                return Err(DomainError::NotAllowed {
                    key: self.key.clone(),
                    value: as_str,
                });
            }
        }

        if self.min.is_some() || self.max.is_some() || self.step_size.is_some() {
            let numeric = value
                .as_i64()
                .ok_or_else(|| DomainError::NotNumeric(self.key.clone()))?;

            if let std::option::Option::Some(min) = self.min {
                if numeric < min {
                    return Err(DomainError::OutOfRange {
                        key: self.key.clone(),
                        value: numeric,
                        min,
                        max: self.max.unwrap_or(i64::MAX),
                    });
                }
            }
            if let std::option::Option::Some(max) = self.max {
                if numeric > max {
                    return Err(DomainError::OutOfRange {
                        key: self.key.clone(),
                        value: numeric,
                        min: self.min.unwrap_or(i64::MIN),
                        max,
                    });
                }
            }
            if let std::option::Option::Some(step) = self.step_size {
                if step != 0 && numeric % step != 0 {
                    return Err(DomainError::StepMismatch {
                        key: self.key.clone(),
                        value: numeric,
                        step,
                    });
                }
            }
        }

        Ok(value)
    }

    /// Shape the `{key, value, unit}` payload the PUT endpoints expect.
    pub fn to_api_payload(&self, value: Value) -> Value {
        serde_json::json!({
            "key": self.key,
            "value": value,
            "unit": self.unit,
        })
    }
}

fn str_field(data: &Value, field: &str) -> std::option::Option<String> {
    data.get(field).and_then(Value::as_str).map(String::from)
}

fn parse_execution(s: &str) -> std::option::Option<Execution> {
    match s {
        "selectonly" | "selectOnly" => Some(Execution::SelectOnly),
        "startonly" | "startOnly" => Some(Execution::StartOnly),
        "auto" | "always" => Some(Execution::Always),
        _ => None,
    }
}

fn parse_access(s: &str) -> std::option::Option<Access> {
    match s {
        "read" => Some(Access::Read),
        "readWrite" => Some(Access::ReadWrite),
        _ => None,
    }
}

// ── Program ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Program {
    pub key: String,
    pub name: std::option::Option<String>,
    pub options: HashMap<String, Option>,
    pub execution: std::option::Option<Execution>,
    #[serde(default)]
    pub active: bool,
}

impl Program {
    pub fn from_api(data: &Value) -> Result<Self, DomainError> {
        let key = data
            .get("key")
            .and_then(Value::as_str)
            .ok_or_else(|| DomainError::MalformedPayload("program missing 'key'".into()))?
            .to_string();

        let mut options = HashMap::new();
        if let std::option::Option::Some(raw_options) = data.get("options").and_then(Value::as_array) {
            for raw in raw_options {
                let opt = Option::from_api(raw)?;
                options.insert(opt.key.clone(), opt);
            }
        }

        Ok(Program {
            key,
            name: str_field(data, "name"),
            options,
            execution: data
                .get("constraints")
                .and_then(|c| c.get("execution"))
                .and_then(Value::as_str)
                .and_then(parse_execution),
            active: false,
        })
    }
}

// ── Status ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Status {
    pub key: String,
    pub value: std::option::Option<Value>,
    pub name: std::option::Option<String>,
    pub display_value: std::option::Option<String>,
    pub unit: std::option::Option<String>,
}

impl Status {
    pub fn from_api(data: &Value) -> Result<Self, DomainError> {
        let key = data
            .get("key")
            .and_then(Value::as_str)
            .ok_or_else(|| DomainError::MalformedPayload("status missing 'key'".into()))?
            .to_string();

        Ok(Status {
            key,
            value: data.get("value").cloned(),
            name: str_field(data, "name"),
            display_value: str_field(data, "displayvalue"),
            unit: str_field(data, "unit"),
        })
    }
}

// ── Command ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Command {
    pub key: String,
    pub name: std::option::Option<String>,
}

impl Command {
    pub fn from_api(data: &Value) -> Result<Self, DomainError> {
        let key = data
            .get("key")
            .and_then(Value::as_str)
            .ok_or_else(|| DomainError::MalformedPayload("command missing 'key'".into()))?
            .to_string();
        Ok(Command { key, name: str_field(data, "name") })
    }
}

// ── OperationState ───────────────────────────────────────────────────────────

/// Lifecycle state of an appliance's currently active program.
///
/// Drives which of `start_program` / `stop_program` / `set_option` the
/// coordinator considers legal. Values correspond to
/// `BSH.Common.EnumType.OperationState.*` keys on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OperationState {
    Inactive,
    Ready,
    DelayedStart,
    Run,
    Pause,
    ActionRequired,
    Finished,
    Error,
    Aborting,
}

impl OperationState {
    /// Parse the enum value out of the full `BSH.Common.EnumType.OperationState.X` key.
    pub fn from_wire(value: &str) -> std::option::Option<Self> {
        let suffix = value.rsplit('.').next().unwrap_or(value);
        Some(match suffix {
            "Inactive" => OperationState::Inactive,
            "Ready" => OperationState::Ready,
            "DelayedStart" => OperationState::DelayedStart,
            "Run" => OperationState::Run,
            "Pause" => OperationState::Pause,
            "ActionRequired" => OperationState::ActionRequired,
            "Finished" => OperationState::Finished,
            "Error" => OperationState::Error,
            "Aborting" => OperationState::Aborting,
            _ => return None,
        })
    }

    pub fn is_running(&self) -> bool {
        matches!(self, OperationState::Run | OperationState::DelayedStart | OperationState::Pause)
    }
}

// ── Appliance ────────────────────────────────────────────────────────────────

/// A single paired Home Connect appliance and everything known about it.
///
/// Deliberately holds no handle back to the coordinator, transport, or
/// callback registry — those are internal collaborators the coordinator
/// wires up around a `ManagedAppliance` (see `hc-engine`), not data that
/// belongs to the appliance's own serializable state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Appliance {
    pub ha_id: String,
    pub vib: std::option::Option<String>,
    pub brand: std::option::Option<String>,
    #[serde(rename = "type")]
    pub appliance_type: std::option::Option<String>,
    pub name: std::option::Option<String>,
    pub enumber: std::option::Option<String>,
    pub connected: bool,

    /// Catalog of programs the appliance supports, keyed by program key.
    pub available_programs: HashMap<String, Program>,
    pub selected_program: std::option::Option<Program>,
    pub active_program: std::option::Option<Program>,

    pub status: HashMap<String, Status>,
    pub settings: HashMap<String, Option>,

    /// Commands the appliance advertises (e.g. pause/resume), keyed by key.
    pub commands: HashMap<String, Command>,
    /// Client-side buffer of options with `execution == StartOnly`, set via
    /// `set_option`/`select_program` without a REST call and folded into the
    /// next `start_program`'s options body.
    pub startonly_options: HashMap<String, Option>,
}

impl Appliance {
    /// Builds a minimal appliance record directly, without a wire payload.
    /// Useful for store tests and for synthesizing entries outside of a
    /// `GET /api/homeappliances` response.
    pub fn new(
        ha_id: impl Into<String>,
        name: impl Into<String>,
        brand: impl Into<String>,
        appliance_type: impl Into<String>,
    ) -> Self {
        Appliance {
            ha_id: ha_id.into(),
            vib: None,
            brand: Some(brand.into()),
            appliance_type: Some(appliance_type.into()),
            name: Some(name.into()),
            enumber: None,
            connected: true,
            available_programs: HashMap::new(),
            selected_program: None,
            active_program: None,
            status: HashMap::new(),
            settings: HashMap::new(),
            commands: HashMap::new(),
            startonly_options: HashMap::new(),
        }
    }

    pub fn from_api(data: &Value) -> Result<Self, DomainError> {
        let ha_id = data
            .get("haId")
            .and_then(Value::as_str)
            .ok_or_else(|| DomainError::MalformedPayload("appliance missing 'haId'".into()))?
            .to_string();

        Ok(Appliance {
            ha_id,
            vib: str_field(data, "vib"),
            brand: str_field(data, "brand"),
            appliance_type: str_field(data, "type"),
            name: str_field(data, "name"),
            enumber: str_field(data, "enumber"),
            connected: data.get("connected").and_then(Value::as_bool).unwrap_or(false),
            available_programs: HashMap::new(),
            selected_program: None,
            active_program: None,
            status: HashMap::new(),
            settings: HashMap::new(),
            commands: HashMap::new(),
            startonly_options: HashMap::new(),
        })
    }

    /// The options available for the currently applied (active, falling
    /// back to selected) program, or `None` when that program's key isn't
    /// in the appliance's catalog yet.
    ///
    /// A freshly paired appliance can report an active program before its
    /// catalog has finished loading; that is a normal transient state, so
    /// this returns `None` rather than panicking or synthesizing an empty
    /// program.
    pub fn get_applied_program_available_options(&self) -> std::option::Option<&Program> {
        let applied = self.active_program.as_ref().or(self.selected_program.as_ref())?;
        self.available_programs.get(&applied.key)
    }

    pub fn operation_state(&self) -> std::option::Option<OperationState> {
        self.status
            .get("BSH.Common.Status.OperationState")
            .and_then(|s| s.value.as_ref())
            .and_then(Value::as_str)
            .and_then(OperationState::from_wire)
    }
}
