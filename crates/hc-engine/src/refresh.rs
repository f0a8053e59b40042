use hc_domain::{Appliance, Command, Program};
use hc_transport::HomeConnectTransport;
use serde_json::Value;

use crate::error::EngineError;

/// On-demand REST refreshes the Appliance Engine issues as it applies
/// incoming stream items or serves `get_active_program`/`get_selected_program`
/// calls. Each one fetches a single collection and folds it into `appliance`
/// in place; none of them touch the callback registry or the store — that is
/// the coordinator's job once it knows which events the refresh produced.
pub async fn refresh_available_programs(
    transport: &HomeConnectTransport,
    appliance: &mut Appliance,
) -> Result<(), EngineError> {
    let ha_id = appliance.ha_id.clone();
    let response = transport
        .get(&format!("/api/homeappliances/{ha_id}/programs/available"))
        .await?;
    let Some(payload) = response else {
        appliance.available_programs.clear();
        return Ok(());
    };
    let mut programs = std::collections::HashMap::new();
    if let Some(list) = payload.get("programs").and_then(Value::as_array) {
        for raw in list {
            if let Ok(program) = Program::from_api(raw) {
                programs.insert(program.key.clone(), program);
            }
        }
    }
    appliance.available_programs = programs;
    Ok(())
}

pub async fn refresh_selected_program(
    transport: &HomeConnectTransport,
    appliance: &mut Appliance,
) -> Result<(), EngineError> {
    let ha_id = appliance.ha_id.clone();
    let response = transport
        .get(&format!("/api/homeappliances/{ha_id}/programs/selected"))
        .await?;
    appliance.selected_program = match response {
        Some(data) => Program::from_api(&data).ok(),
        None => None,
    };
    Ok(())
}

pub async fn refresh_active_program(
    transport: &HomeConnectTransport,
    appliance: &mut Appliance,
) -> Result<(), EngineError> {
    let ha_id = appliance.ha_id.clone();
    let response = transport
        .get(&format!("/api/homeappliances/{ha_id}/programs/active"))
        .await?;
    appliance.active_program = match response {
        Some(data) => Program::from_api(&data).ok().map(|mut p| {
            p.active = true;
            p
        }),
        None => None,
    };
    Ok(())
}

pub async fn refresh_status(transport: &HomeConnectTransport, appliance: &mut Appliance) -> Result<(), EngineError> {
    let ha_id = appliance.ha_id.clone();
    if let Some(status) = transport.get(&format!("/api/homeappliances/{ha_id}/status")).await? {
        if let Some(list) = status.get("status").and_then(Value::as_array) {
            for raw in list {
                if let Ok(s) = hc_domain::Status::from_api(raw) {
                    appliance.status.insert(s.key.clone(), s);
                }
            }
        }
    }
    Ok(())
}

pub async fn refresh_settings(transport: &HomeConnectTransport, appliance: &mut Appliance) -> Result<(), EngineError> {
    let ha_id = appliance.ha_id.clone();
    if let Some(settings) = transport.get(&format!("/api/homeappliances/{ha_id}/settings")).await? {
        if let Some(list) = settings.get("settings").and_then(Value::as_array) {
            for raw in list {
                if let Ok(opt) = hc_domain::Option::from_api(raw) {
                    appliance.settings.insert(opt.key.clone(), opt);
                }
            }
        }
    }
    Ok(())
}

pub async fn refresh_commands(transport: &HomeConnectTransport, appliance: &mut Appliance) -> Result<(), EngineError> {
    let ha_id = appliance.ha_id.clone();
    let response = transport.get(&format!("/api/homeappliances/{ha_id}/commands")).await?;
    let mut commands = std::collections::HashMap::new();
    if let Some(payload) = response {
        if let Some(list) = payload.get("commands").and_then(Value::as_array) {
            for raw in list {
                if let Ok(command) = Command::from_api(raw) {
                    commands.insert(command.key.clone(), command);
                }
            }
        }
    }
    appliance.commands = commands;
    Ok(())
}

/// Fetches every collection a freshly paired or just-reconnected appliance
/// needs: the program catalog, status, settings, and commands. Selected and
/// active programs are deliberately excluded — they are refreshed on demand
/// when the engine sees the keys that imply they changed.
pub async fn refresh_everything(transport: &HomeConnectTransport, appliance: &mut Appliance) -> Result<(), EngineError> {
    refresh_available_programs(transport, appliance).await?;
    refresh_status(transport, appliance).await?;
    refresh_settings(transport, appliance).await?;
    refresh_commands(transport, appliance).await?;
    refresh_selected_program(transport, appliance).await?;
    refresh_active_program(transport, appliance).await?;
    Ok(())
}
