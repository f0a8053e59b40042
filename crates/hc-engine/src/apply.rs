use hc_domain::{Appliance, Option as HcOption, OperationState, Status};
use hc_transport::HomeConnectTransport;
use serde_json::Value;

use crate::error::EngineError;
use crate::refresh::{
    refresh_active_program, refresh_available_programs, refresh_commands, refresh_everything,
    refresh_selected_program,
};

const KEY_ACTIVE_PROGRAM: &str = "BSH.Common.Root.ActiveProgram";
const KEY_SELECTED_PROGRAM: &str = "BSH.Common.Root.SelectedProgram";
const KEY_OPERATION_STATE: &str = "BSH.Common.Status.OperationState";
const KEY_REMOTE_CONTROL_START_ALLOWED: &str = "BSH.Common.Status.RemoteControlStartAllowed";
const KEY_REMOTE_CONTROL_ACTIVE: &str = "BSH.Common.Status.RemoteControlActive";
const KEY_PROGRESS: &str = "BSH.Common.Option.ProgramProgress";
const KEY_REMAINING_TIME: &str = "BSH.Common.Option.RemainingProgramTime";
const KEY_PROGRAM_FINISHED: &str = "BSH.Common.Event.ProgramFinished";
const KEY_CONNECTED: &str = "BSH.Common.Status.Connected";

/// What changed about an appliance as a result of applying one event item, in
/// the literal event-name taxonomy the callback registry broadcasts under.
#[derive(Debug, Clone, PartialEq)]
pub enum ObservableEvent {
    /// A single key's value changed — fired for every changed key in
    /// addition to any more specific event below, since exact-key
    /// subscribers rely on it even when an aggregate event also fires.
    DataChanged,
    ProgramSelected,
    ProgramStarted,
    ProgramFinished,
    Paired,
    Depaired,
    Connected,
    Disconnected,
    ConnectionChanged,
    Unhandled,
}

impl ObservableEvent {
    /// The literal wire-level key this event broadcasts under.
    pub fn key(&self) -> &'static str {
        match self {
            ObservableEvent::DataChanged => "DATA_CHANGED",
            ObservableEvent::ProgramSelected => "PROGRAM_SELECTED",
            ObservableEvent::ProgramStarted => "PROGRAM_STARTED",
            ObservableEvent::ProgramFinished => "PROGRAM_FINISHED",
            ObservableEvent::Paired => "PAIRED",
            ObservableEvent::Depaired => "DEPAIRED",
            ObservableEvent::Connected => "CONNECTED",
            ObservableEvent::Disconnected => "DISCONNECTED",
            ObservableEvent::ConnectionChanged => "CONNECTION_CHANGED",
            ObservableEvent::Unhandled => "UNHANDLED",
        }
    }
}

fn value_is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::String(s) => !s.is_empty(),
        _ => true,
    }
}

/// Applies one `NOTIFY`/`EVENT`/`STATUS` item to `appliance`'s in-memory
/// state, issuing whatever on-demand REST refreshes the item implies, and
/// returns every observable event the update produced.
///
/// This is the only place an appliance's status/settings/program state is
/// mutated in response to a stream item; the coordinator never mutates an
/// `Appliance` directly. Step 1 of the algorithm (disconnected → refresh
/// everything, emit PAIRED) is the coordinator's responsibility, since it
/// needs to happen once per batch of items rather than once per key.
pub async fn apply_event(
    transport: &HomeConnectTransport,
    appliance: &mut Appliance,
    key: &str,
    value: &Value,
) -> Result<Vec<ObservableEvent>, EngineError> {
    let mut events = Vec::new();

    match key {
        KEY_SELECTED_PROGRAM => {
            if value_is_truthy(value) {
                refresh_selected_program(transport, appliance).await?;
                refresh_available_programs(transport, appliance).await?;
                events.push(ObservableEvent::ProgramSelected);
            } else {
                appliance.selected_program = None;
                events.push(ObservableEvent::ProgramSelected);
            }
        }
        KEY_ACTIVE_PROGRAM if value_is_truthy(value) && appliance.active_program.is_none() => {
            refresh_active_program(transport, appliance).await?;
            refresh_available_programs(transport, appliance).await?;
            refresh_commands(transport, appliance).await?;
            events.push(ObservableEvent::ProgramStarted);
        }
        KEY_PROGRESS | KEY_REMAINING_TIME if appliance.active_program.is_none() => {
            refresh_active_program(transport, appliance).await?;
            refresh_available_programs(transport, appliance).await?;
            refresh_commands(transport, appliance).await?;
            events.push(ObservableEvent::ProgramStarted);
            apply_program_option(appliance, key, value);
        }
        KEY_OPERATION_STATE if is_run(value) && appliance.active_program.is_none() => {
            apply_status(appliance, key, value);
            refresh_active_program(transport, appliance).await?;
            refresh_available_programs(transport, appliance).await?;
            refresh_commands(transport, appliance).await?;
            events.push(ObservableEvent::ProgramStarted);
        }
        KEY_ACTIVE_PROGRAM if !value_is_truthy(value) && appliance.active_program.is_some() => {
            appliance.active_program = None;
            refresh_commands(transport, appliance).await?;
            refresh_available_programs(transport, appliance).await?;
            events.push(ObservableEvent::ProgramFinished);
        }
        KEY_OPERATION_STATE if is_ready(value) && appliance.active_program.is_some() => {
            apply_status(appliance, key, value);
            appliance.active_program = None;
            refresh_commands(transport, appliance).await?;
            refresh_available_programs(transport, appliance).await?;
            events.push(ObservableEvent::ProgramFinished);
        }
        KEY_PROGRAM_FINISHED if appliance.active_program.is_some() => {
            appliance.active_program = None;
            refresh_commands(transport, appliance).await?;
            refresh_available_programs(transport, appliance).await?;
            events.push(ObservableEvent::ProgramFinished);
        }
        KEY_PROGRAM_FINISHED => {
            // ProgramFinished with no active program tracked — nothing to
            // null out, still a data point worth broadcasting raw.
        }
        KEY_ACTIVE_PROGRAM => {
            // Truthy while already running, or falsy while already idle —
            // redundant re-announcement, no state transition to make.
        }
        KEY_OPERATION_STATE => {
            apply_status(appliance, key, value);
        }
        KEY_REMOTE_CONTROL_START_ALLOWED => {
            apply_status(appliance, key, value);
            refresh_available_programs(transport, appliance).await?;
        }
        KEY_CONNECTED => {
            if let Some(connected) = value.as_bool() {
                appliance.connected = connected;
            }
            events.push(ObservableEvent::ConnectionChanged);
        }
        KEY_REMOTE_CONTROL_ACTIVE if appliance.available_programs.is_empty() && is_ready_state(appliance) => {
            apply_status(appliance, key, value);
            refresh_everything(transport, appliance).await?;
            events.push(ObservableEvent::Paired);
        }
        _ if key.starts_with("BSH.Common.Status.") || is_status_key(appliance, key) => {
            apply_status(appliance, key, value);
        }
        _ if appliance.settings.contains_key(key) => {
            apply_setting(appliance, key, value);
        }
        _ => {
            apply_program_option(appliance, key, value);
        }
    }

    events.push(ObservableEvent::DataChanged);
    Ok(events)
}

fn is_run(value: &Value) -> bool {
    value
        .as_str()
        .and_then(OperationState::from_wire)
        .map(|s| s == OperationState::Run)
        .unwrap_or(false)
}

fn is_ready(value: &Value) -> bool {
    value
        .as_str()
        .and_then(OperationState::from_wire)
        .map(|s| s == OperationState::Ready)
        .unwrap_or(false)
}

fn is_ready_state(appliance: &Appliance) -> bool {
    appliance.operation_state() == Some(OperationState::Ready)
}

fn is_status_key(appliance: &Appliance, key: &str) -> bool {
    appliance.status.contains_key(key)
}

fn apply_status(appliance: &mut Appliance, key: &str, value: &Value) {
    appliance
        .status
        .entry(key.to_string())
        .and_modify(|s| s.value = Some(value.clone()))
        .or_insert_with(|| Status {
            key: key.to_string(),
            value: Some(value.clone()),
            name: None,
            display_value: None,
            unit: None,
        });
}

fn apply_setting(appliance: &mut Appliance, key: &str, value: &Value) {
    if let Some(setting) = appliance.settings.get_mut(key) {
        setting.value = Some(value.clone());
    }
}

fn apply_program_option(appliance: &mut Appliance, key: &str, value: &Value) {
    let program = appliance
        .active_program
        .as_mut()
        .or(appliance.selected_program.as_mut());
    if let Some(program) = program {
        if let Some(option) = program.options.get_mut(key) {
            option.value = Some(value.clone());
            return;
        }
        program.options.insert(
            key.to_string(),
            HcOption {
                key: key.to_string(),
                value: Some(value.clone()),
                option_type: None,
                name: None,
                unit: None,
                display_value: None,
                min: None,
                max: None,
                step_size: None,
                allowed_values: None,
                execution: None,
                live_update: None,
                access: None,
            },
        );
    }
}
