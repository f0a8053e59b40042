use std::sync::Arc;

use anyhow::{Context, Result};
use hc_config::CoordinatorConfig;
use hc_engine::{health, CallbackRegistry, HealthTracker, HomeConnectCoordinator};
use hc_store::{InMemoryStore, ApplianceStore};
use hc_transport::{HomeConnectTransport, StaticToken};

use crate::output;

async fn build_coordinator(token: String, simulate: bool) -> Result<Arc<HomeConnectCoordinator>> {
    let auth = Arc::new(StaticToken(token));
    let overall_health = Arc::new(std::sync::Mutex::new(HealthTracker::new()));
    let transport = Arc::new(
        HomeConnectTransport::new(auth.clone(), simulate, "en-GB")
            .with_rate_limit_hook(health::rate_limit_hook(overall_health.clone())),
    );
    let store: Arc<dyn ApplianceStore> = Arc::new(InMemoryStore::new());
    let callbacks = Arc::new(CallbackRegistry::new());

    HomeConnectCoordinator::create(
        transport,
        auth,
        store,
        callbacks,
        CoordinatorConfig::default(),
        None,
        overall_health,
    )
    .await
    .context("failed to load initial appliance snapshot")
}

pub async fn list(token: String, simulate: bool) -> Result<()> {
    let coordinator = build_coordinator(token, simulate).await?;
    print!("{}", output::render_list(&coordinator.appliances().await));
    Ok(())
}

pub async fn show(token: String, simulate: bool, ha_id: String) -> Result<()> {
    let coordinator = build_coordinator(token, simulate).await?;
    let appliance = coordinator
        .appliances()
        .await
        .into_iter()
        .find(|a| a.ha_id == ha_id)
        .with_context(|| format!("no such appliance: {ha_id}"))?;
    print!("{}", output::render_detail(&appliance));
    Ok(())
}

pub async fn set_option(
    token: String,
    simulate: bool,
    ha_id: String,
    option_key: String,
    value: String,
) -> Result<()> {
    let coordinator = build_coordinator(token, simulate).await?;
    let parsed = serde_json::from_str(&value).unwrap_or(serde_json::Value::String(value));
    coordinator
        .set_option(&ha_id, &option_key, parsed)
        .await
        .context("failed to set option")?;
    println!("ok");
    Ok(())
}

pub async fn start_program(token: String, simulate: bool, ha_id: String, program_key: String) -> Result<()> {
    let coordinator = build_coordinator(token, simulate).await?;
    coordinator
        .start_program(&ha_id, &program_key, Vec::new())
        .await
        .context("failed to start program")?;
    println!("started {program_key} on {ha_id}");
    Ok(())
}

pub async fn stop_program(token: String, simulate: bool, ha_id: String) -> Result<()> {
    let coordinator = build_coordinator(token, simulate).await?;
    coordinator.stop_program(&ha_id).await.context("failed to stop program")?;
    println!("stopped program on {ha_id}");
    Ok(())
}

pub async fn watch(token: String, simulate: bool) -> Result<()> {
    let coordinator = build_coordinator(token, simulate).await?;
    println!("watching for events, press Ctrl+C to stop");
    tokio::select! {
        _ = coordinator.run() => {}
        _ = tokio::signal::ctrl_c() => {
            coordinator.close().await;
        }
    }
    Ok(())
}
