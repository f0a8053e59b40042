use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use hc_config::CoordinatorConfig;
use hc_domain::{Appliance, Command, Execution, OperationState, Program};
use hc_store::ApplianceStore;
use hc_transport::{run_event_loop, AuthProvider, HomeConnectTransport, StreamEvent};
use serde_json::Value;
use tokio::sync::{oneshot, Mutex, RwLock};
use tracing::{debug, info, warn};

use crate::apply::{apply_event, ObservableEvent};
use crate::callback::CallbackRegistry;
use crate::error::EngineError;
use crate::health::{HealthStatus, HealthTracker};
use crate::refresh::{
    refresh_active_program, refresh_available_programs, refresh_everything, refresh_selected_program,
};

const COMMAND_PAUSE: &str = "BSH.Common.Command.PauseProgram";
const COMMAND_RESUME: &str = "BSH.Common.Command.ResumeProgram";

/// Wraps one appliance with the lock the coordinator needs to serialize
/// `select_program` calls against it.
///
/// Per-appliance rather than the upstream's single process-wide
/// `Synchronization.selected_program_lock`, so selecting a program on one
/// oven never blocks selecting a program on an unrelated dishwasher.
pub struct ManagedAppliance {
    pub appliance: Mutex<Appliance>,
    pub selected_program_lock: Mutex<()>,
}

impl ManagedAppliance {
    fn new(appliance: Appliance) -> Self {
        Self {
            appliance: Mutex::new(appliance),
            selected_program_lock: Mutex::new(()),
        }
    }
}

/// How thoroughly `HomeConnectCoordinator::load` refreshes its appliance map
/// against `/api/homeappliances` on each call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshMode {
    /// Don't touch the network at all.
    Nothing,
    /// Diff the paired-appliance list only: create newly-paired appliances
    /// (fully hydrated), remove ones no longer present. Existing appliances'
    /// dynamic data is left untouched.
    Validate,
    /// `Validate`, plus refresh existing appliances' status/settings/
    /// selected/active program (not their program catalog or commands).
    DynamicOnly,
    /// Fully rehydrate every appliance, new or existing.
    All,
}

/// Owns the in-memory appliance map, drives the SSE read loop, and exposes
/// the public command surface (`execute_command`, `set_option`,
/// `select_program`, `start_program`, `stop_program`, and friends).
pub struct HomeConnectCoordinator {
    transport: Arc<HomeConnectTransport>,
    auth: Arc<dyn AuthProvider>,
    store: Arc<dyn ApplianceStore>,
    callbacks: Arc<CallbackRegistry>,
    config: CoordinatorConfig,
    appliances: RwLock<HashMap<String, Arc<ManagedAppliance>>>,
    health: Mutex<HashMap<String, HealthTracker>>,
    overall_health: Arc<std::sync::Mutex<HealthTracker>>,
    on_error: std::option::Option<Arc<dyn Fn(&EngineError) + Send + Sync>>,
    shutdown: Mutex<std::option::Option<oneshot::Sender<()>>>,
}

impl HomeConnectCoordinator {
    /// Loads the initial snapshot of every paired appliance, mirroring the
    /// upstream `HomeConnect.create` factory.
    ///
    /// `overall_health` is the coordinator-wide connectivity tracker (not
    /// one appliance's): callers build it up front and hand the same `Arc`
    /// to `HomeConnectTransport::with_rate_limit_hook` (via
    /// [`crate::health::rate_limit_hook`]) so a `429` anywhere and an SSE
    /// reconnect both land on the one tracker this coordinator reports
    /// through [`Self::overall_health`]. `on_error`, when set, is called
    /// instead of propagating a failed [`Self::load`] — the coordinator
    /// flips to `LOADING_FAILED` either way.
    pub async fn create(
        transport: Arc<HomeConnectTransport>,
        auth: Arc<dyn AuthProvider>,
        store: Arc<dyn ApplianceStore>,
        callbacks: Arc<CallbackRegistry>,
        config: CoordinatorConfig,
        on_error: std::option::Option<Arc<dyn Fn(&EngineError) + Send + Sync>>,
        overall_health: Arc<std::sync::Mutex<HealthTracker>>,
    ) -> Result<Arc<Self>, EngineError> {
        let coordinator = Arc::new(Self {
            transport,
            auth,
            store,
            callbacks,
            config,
            appliances: RwLock::new(HashMap::new()),
            health: Mutex::new(HashMap::new()),
            overall_health,
            on_error,
            shutdown: Mutex::new(None),
        });
        coordinator.load(RefreshMode::All).await?;
        Ok(coordinator)
    }

    /// Current coordinator-wide connectivity flags (`BLOCKED` from rate
    /// limiting, `UPDATES` from the SSE loop's connection state).
    pub fn overall_health(&self) -> HealthStatus {
        let mut health = self.overall_health.lock().unwrap();
        health.refresh_block();
        health.status()
    }

    /// Diffs `/api/homeappliances` against the in-memory map per `mode`:
    /// newly-listed appliances are created (fully hydrated), previously-known
    /// ones no longer listed are removed with a `DEPAIRED` broadcast, and
    /// existing ones are refreshed as `mode` dictates. Failures flip
    /// `LOADING_FAILED` on every currently-known appliance and are handed to
    /// `on_error` if one was supplied, instead of propagating.
    pub async fn load(&self, mode: RefreshMode) -> Result<(), EngineError> {
        if mode == RefreshMode::Nothing {
            return Ok(());
        }

        match self.load_inner(mode).await {
            Ok(()) => Ok(()),
            Err(e) => {
                let mut health = self.health.lock().await;
                for tracker in health.values_mut() {
                    tracker.set(HealthStatus::LOADING_FAILED);
                }
                drop(health);
                match &self.on_error {
                    Some(on_error) => {
                        on_error(&e);
                        Ok(())
                    }
                    None => Err(e),
                }
            }
        }
    }

    async fn load_inner(&self, mode: RefreshMode) -> Result<(), EngineError> {
        let payload = self
            .transport
            .get("/api/homeappliances")
            .await?
            .unwrap_or(Value::Null);

        let raw_list = payload
            .get("homeappliances")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();

        let mut seen = HashSet::new();

        for raw in raw_list {
            let mut appliance = Appliance::from_api(&raw)?;
            if self.config.disabled_appliance_ids.contains(&appliance.ha_id) {
                continue;
            }
            let ha_id = appliance.ha_id.clone();
            seen.insert(ha_id.clone());

            let existing = self.appliances.read().await.get(&ha_id).cloned();
            match existing {
                None => {
                    self.hydrate(&mut appliance).await?;
                    self.store.upsert(appliance.clone()).await?;
                    self.health
                        .lock()
                        .await
                        .entry(ha_id.clone())
                        .or_insert_with(HealthTracker::new)
                        .set(HealthStatus::LOADED);
                    self.appliances
                        .write()
                        .await
                        .insert(ha_id, Arc::new(ManagedAppliance::new(appliance)));
                }
                Some(managed) if mode == RefreshMode::DynamicOnly => {
                    let mut current = managed.appliance.lock().await;
                    current.connected = appliance.connected;
                    refresh_everything_dynamic(&self.transport, &mut current).await?;
                    let snapshot = current.clone();
                    drop(current);
                    self.store.upsert(snapshot).await?;
                }
                Some(managed) if mode == RefreshMode::All => {
                    let mut current = managed.appliance.lock().await;
                    current.connected = appliance.connected;
                    self.hydrate(&mut current).await?;
                    let snapshot = current.clone();
                    drop(current);
                    self.store.upsert(snapshot).await?;
                }
                Some(_) => {
                    // Validate: presence confirmed, dynamic data left alone.
                }
            }
        }

        let known: Vec<String> = self.appliances.read().await.keys().cloned().collect();
        for ha_id in known {
            if seen.contains(&ha_id) {
                continue;
            }
            if let Some(managed) = self.appliances.write().await.remove(&ha_id) {
                let appliance = managed.appliance.lock().await;
                self.callbacks.broadcast(&appliance, ObservableEvent::Depaired.key(), None);
            }
            let _ = self.store.remove(&ha_id).await;
            self.callbacks.clear_appliance_callbacks(&ha_id);
            self.health.lock().await.remove(&ha_id);
        }

        Ok(())
    }

    /// Fetches every collection a freshly discovered or fully-reloaded
    /// appliance needs.
    async fn hydrate(&self, appliance: &mut Appliance) -> Result<(), EngineError> {
        refresh_everything(&self.transport, appliance).await
    }

    /// Fetches a single not-yet-known appliance by id, as the `PAIRED` SSE
    /// event and a `CONNECTED` event for an unrecognized `haId` both need —
    /// a single-appliance fetch, not a full `/homeappliances` reload.
    async fn pair_appliance(&self, ha_id: &str) -> Result<Arc<ManagedAppliance>, EngineError> {
        let raw = self
            .transport
            .get(&format!("/api/homeappliances/{ha_id}"))
            .await?
            .ok_or_else(|| EngineError::ApplianceNotFound(ha_id.to_string()))?;

        let mut appliance = Appliance::from_api(&raw)?;
        self.hydrate(&mut appliance).await?;
        self.store.upsert(appliance.clone()).await?;
        self.health
            .lock()
            .await
            .entry(ha_id.to_string())
            .or_insert_with(HealthTracker::new)
            .set(HealthStatus::LOADED);

        let managed = Arc::new(ManagedAppliance::new(appliance));
        self.appliances.write().await.insert(ha_id.to_string(), managed.clone());

        let appliance = managed.appliance.lock().await;
        self.callbacks.broadcast(&appliance, ObservableEvent::Paired.key(), None);
        drop(appliance);

        Ok(managed)
    }

    /// Drives the SSE reconnect loop until `close()` is called. Returns
    /// once the loop has fully wound down.
    pub async fn run(self: &Arc<Self>) {
        let (tx, rx) = oneshot::channel();
        *self.shutdown.lock().await = Some(tx);

        let this = self.clone();
        let client = reqwest::Client::new();
        let host = self.transport.host().to_string();
        let auth = self.auth.clone();
        let health = self.overall_health.clone();

        run_event_loop(
            &client,
            &auth,
            &host,
            "/api/homeappliances/events",
            move |event| {
                let this = this.clone();
                tokio::spawn(async move {
                    this.handle_stream_event(event).await;
                });
            },
            move |connected| {
                let mut health = health.lock().unwrap();
                if connected {
                    health.set(HealthStatus::UPDATES);
                    health.refresh_block();
                } else {
                    health.unset(HealthStatus::UPDATES);
                }
            },
            rx,
        )
        .await;
    }

    pub async fn close(&self) {
        if let Some(tx) = self.shutdown.lock().await.take() {
            let _ = tx.send(());
        }
    }

    async fn handle_stream_event(&self, event: StreamEvent) {
        match event.event_type.as_str() {
            "PAIRED" => {
                info!(ha_id = %event.ha_id, "appliance paired");
                if self.appliances.read().await.contains_key(&event.ha_id) {
                    return;
                }
                if let Err(e) = self.pair_appliance(&event.ha_id).await {
                    warn!(error = %e, ha_id = %event.ha_id, "failed to fetch newly paired appliance");
                }
            }
            "DEPAIRED" => {
                info!(ha_id = %event.ha_id, "appliance depaired");
                if let Some(managed) = self.appliances.write().await.remove(&event.ha_id) {
                    let appliance = managed.appliance.lock().await;
                    self.callbacks.broadcast(&appliance, ObservableEvent::Depaired.key(), None);
                }
                let _ = self.store.remove(&event.ha_id).await;
                self.callbacks.clear_appliance_callbacks(&event.ha_id);
                self.health.lock().await.remove(&event.ha_id);
            }
            "CONNECTED" | "DISCONNECTED" => {
                if let Err(e) = self.set_connection_state(&event.ha_id, event.event_type == "CONNECTED").await {
                    warn!(error = %e, ha_id = %event.ha_id, "failed to apply connection state change");
                }
            }
            "KEEP-ALIVE" => {
                debug!(ha_id = %event.ha_id, "keep-alive received");
                self.health
                    .lock()
                    .await
                    .entry(event.ha_id.clone())
                    .or_insert_with(HealthTracker::new)
                    .touch();
            }
            "NOTIFY" | "EVENT" | "STATUS" => {
                self.apply_items(&event).await;
            }
            other => {
                debug!(event_type = other, "unhandled SSE event type");
            }
        }
    }

    /// Sets one appliance's connection flag. Fetches and creates the
    /// appliance first if `ha_id` isn't known yet (a `CONNECTED` can arrive
    /// mid-stream for an appliance this process hasn't paired yet), then
    /// refreshes its dynamic data on a `false -> true` transition, and
    /// always broadcasts the literal `CONNECTED`/`DISCONNECTED` event plus
    /// the aggregate `CONNECTION_CHANGED`.
    pub async fn set_connection_state(&self, ha_id: &str, connected: bool) -> Result<(), EngineError> {
        let managed = match self.require_appliance(ha_id).await {
            Ok(managed) => managed,
            Err(_) => self.pair_appliance(ha_id).await?,
        };

        let was_connected = managed.appliance.lock().await.connected;
        {
            let mut appliance = managed.appliance.lock().await;
            appliance.connected = connected;
        }

        if connected && !was_connected {
            let mut appliance = managed.appliance.lock().await;
            refresh_everything_dynamic(&self.transport, &mut appliance).await?;
        }

        let appliance = managed.appliance.lock().await;
        let literal = if connected { ObservableEvent::Connected } else { ObservableEvent::Disconnected };
        self.callbacks.broadcast(&appliance, literal.key(), Some(&Value::Bool(connected)));
        self.callbacks
            .broadcast(&appliance, ObservableEvent::ConnectionChanged.key(), Some(&Value::Bool(connected)));
        let snapshot = appliance.clone();
        drop(appliance);
        let _ = self.store.upsert(snapshot).await;
        Ok(())
    }

    async fn apply_items(&self, event: &StreamEvent) {
        let managed = self.appliances.read().await.get(&event.ha_id).cloned();
        let Some(managed) = managed else {
            warn!(ha_id = %event.ha_id, "event for unknown appliance, forcing a full reload");
            if let Err(e) = self.load(RefreshMode::All).await {
                warn!(error = %e, "full reload after unknown-appliance event failed");
            }
            return;
        };

        let parsed: Value = match serde_json::from_str(&event.data) {
            Ok(v) => v,
            Err(e) => {
                warn!(error = %e, "failed to parse SSE event payload");
                return;
            }
        };

        let Some(items) = parsed.get("items").and_then(Value::as_array) else { return };

        let mut appliance = managed.appliance.lock().await;

        if !appliance.connected {
            appliance.connected = true;
            match refresh_everything(&self.transport, &mut appliance).await {
                Ok(()) => self.callbacks.broadcast(&appliance, ObservableEvent::Paired.key(), None),
                Err(e) => warn!(error = %e, "failed to refresh appliance after implicit reconnect"),
            }
        }

        for item in items {
            let (Some(key), Some(value)) = (item.get("key").and_then(Value::as_str), item.get("value")) else {
                continue;
            };

            match apply_event(&self.transport, &mut appliance, key, value).await {
                Ok(observed) => {
                    for ev in &observed {
                        self.callbacks.broadcast(&appliance, ev.key(), Some(value));
                    }
                    self.callbacks.broadcast(&appliance, key, Some(value));
                }
                Err(e) => warn!(error = %e, key, "failed to apply stream item"),
            }
        }

        let snapshot = appliance.clone();
        drop(appliance);
        let _ = self.store.upsert(snapshot).await;
    }

    pub async fn execute_command(&self, ha_id: &str, command: &Command) -> Result<(), EngineError> {
        self.transport
            .put(
                &format!("/api/homeappliances/{ha_id}/commands/{}", command.key),
                serde_json::json!({ "data": { "key": command.key, "value": true } }),
            )
            .await?;
        Ok(())
    }

    /// Sends `BSH.Common.Command.PauseProgram`. Fails if the appliance
    /// doesn't advertise the command or isn't currently `Run`.
    pub async fn pause_active_program(&self, ha_id: &str) -> Result<(), EngineError> {
        let managed = self.require_appliance(ha_id).await?;
        let command = {
            let appliance = managed.appliance.lock().await;
            if appliance.operation_state() != Some(OperationState::Run) {
                return Err(EngineError::InvalidState { ha_id: ha_id.to_string(), expected: "Run" });
            }
            appliance
                .commands
                .get(COMMAND_PAUSE)
                .cloned()
                .ok_or_else(|| EngineError::CommandNotSupported {
                    ha_id: ha_id.to_string(),
                    command: COMMAND_PAUSE.to_string(),
                })?
        };
        self.execute_command(ha_id, &command).await
    }

    /// Sends `BSH.Common.Command.ResumeProgram`. Fails if the appliance
    /// doesn't advertise the command or isn't currently `Pause`.
    pub async fn resume_paused_program(&self, ha_id: &str) -> Result<(), EngineError> {
        let managed = self.require_appliance(ha_id).await?;
        let command = {
            let appliance = managed.appliance.lock().await;
            if appliance.operation_state() != Some(OperationState::Pause) {
                return Err(EngineError::InvalidState { ha_id: ha_id.to_string(), expected: "Pause" });
            }
            appliance
                .commands
                .get(COMMAND_RESUME)
                .cloned()
                .ok_or_else(|| EngineError::CommandNotSupported {
                    ha_id: ha_id.to_string(),
                    command: COMMAND_RESUME.to_string(),
                })?
        };
        self.execute_command(ha_id, &command).await
    }

    /// If `option_key`'s `execution` is `StartOnly`, buffers the validated
    /// value into `startonly_options` with no REST call; otherwise validates
    /// and PUTs it to the applied program's options endpoint.
    pub async fn set_option(&self, ha_id: &str, option_key: &str, value: Value) -> Result<(), EngineError> {
        let managed = self.require_appliance(ha_id).await?;
        let appliance = managed.appliance.lock().await;

        let option = appliance
            .get_applied_program_available_options()
            .and_then(|p| p.options.get(option_key))
            .ok_or_else(|| EngineError::OptionNotFound(option_key.to_string()))?;

        let validated = option.validate_value(value)?;

        if option.execution == Some(Execution::StartOnly) {
            let mut buffered = option.clone();
            buffered.value = Some(validated.clone());
            drop(appliance);
            let mut appliance = managed.appliance.lock().await;
            appliance.startonly_options.insert(option_key.to_string(), buffered);
            self.callbacks.broadcast(&appliance, option_key, Some(&validated));
            let snapshot = appliance.clone();
            drop(appliance);
            let _ = self.store.upsert(snapshot).await;
            return Ok(());
        }

        let payload = option.to_api_payload(validated);
        drop(appliance);

        self.transport
            .put(
                &format!("/api/homeappliances/{ha_id}/programs/active/options/{option_key}"),
                serde_json::json!({ "data": payload }),
            )
            .await?;
        Ok(())
    }

    /// Validates and PUTs a setting (not a program option) to
    /// `/settings/{key}`.
    pub async fn apply_setting(&self, ha_id: &str, key: &str, value: Value) -> Result<(), EngineError> {
        let managed = self.require_appliance(ha_id).await?;
        let (validated, payload) = {
            let appliance = managed.appliance.lock().await;
            let setting = appliance
                .settings
                .get(key)
                .ok_or_else(|| EngineError::OptionNotFound(key.to_string()))?;
            let validated = setting.validate_value(value)?;
            (validated.clone(), setting.to_api_payload(validated))
        };

        self.transport
            .put(&format!("/api/homeappliances/{ha_id}/settings/{key}"), serde_json::json!({ "data": payload }))
            .await?;

        let mut appliance = managed.appliance.lock().await;
        if let Some(setting) = appliance.settings.get_mut(key) {
            setting.value = Some(validated.clone());
        }
        self.callbacks.broadcast(&appliance, key, Some(&validated));
        let snapshot = appliance.clone();
        drop(appliance);
        let _ = self.store.upsert(snapshot).await;
        Ok(())
    }

    /// Updates the selected program. If its `execution` is `StartOnly`,
    /// records it locally with no REST call; otherwise PUTs to
    /// `/programs/selected`, serialized per-appliance under
    /// `selected_program_lock`, then refetches selected + available and
    /// emits `PROGRAM_SELECTED` and `DATA_CHANGED`.
    pub async fn select_program(
        &self,
        ha_id: &str,
        program_key: &str,
        options: Vec<Value>,
    ) -> Result<(), EngineError> {
        let managed = self.require_appliance(ha_id).await?;
        let _guard = managed.selected_program_lock.lock().await;

        let target_execution = {
            let appliance = managed.appliance.lock().await;
            let program = appliance
                .available_programs
                .get(program_key)
                .ok_or_else(|| EngineError::ProgramNotFound(program_key.to_string()))?;
            program.execution
        };

        if target_execution == Some(Execution::StartOnly) {
            let mut appliance = managed.appliance.lock().await;
            if let Some(mut program) = appliance.available_programs.get(program_key).cloned() {
                program.active = false;
                appliance.selected_program = Some(program);
            }
            self.callbacks.broadcast(&appliance, ObservableEvent::ProgramSelected.key(), None);
            let snapshot = appliance.clone();
            drop(appliance);
            let _ = self.store.upsert(snapshot).await;
            return Ok(());
        }

        // Re-check after acquiring the lock: a concurrent
        // `Root.SelectedProgram` notification may have already landed this
        // exact selection while we waited.
        {
            let appliance = managed.appliance.lock().await;
            if appliance.selected_program.as_ref().map(|p| p.key.as_str()) == Some(program_key) {
                return Ok(());
            }
        }

        self.transport
            .put(
                &format!("/api/homeappliances/{ha_id}/programs/selected"),
                serde_json::json!({ "data": { "key": program_key, "options": options } }),
            )
            .await?;

        let mut appliance = managed.appliance.lock().await;
        refresh_selected_program(&self.transport, &mut appliance).await?;
        refresh_available_programs(&self.transport, &mut appliance).await?;
        self.callbacks.broadcast(&appliance, ObservableEvent::ProgramSelected.key(), None);
        self.callbacks.broadcast(&appliance, ObservableEvent::DataChanged.key(), None);
        let snapshot = appliance.clone();
        drop(appliance);
        let _ = self.store.upsert(snapshot).await;
        Ok(())
    }

    /// Starts `program_key` with a composed options list: the currently
    /// selected program's options that the target also supports, union
    /// buffered `startonly_options`, union `overrides` (highest priority).
    /// Retries with the offending option dropped whenever the API rejects
    /// one as `SDK.Error.UnsupportedOption`.
    pub async fn start_program(
        &self,
        ha_id: &str,
        program_key: &str,
        overrides: Vec<Value>,
    ) -> Result<(), EngineError> {
        let managed = self.require_appliance(ha_id).await?;

        let mut options: HashMap<String, Value> = {
            let appliance = managed.appliance.lock().await;
            let target = appliance
                .available_programs
                .get(program_key)
                .ok_or_else(|| EngineError::ProgramNotFound(program_key.to_string()))?;

            let mut composed = HashMap::new();
            if let Some(selected) = &appliance.selected_program {
                for (key, option) in &selected.options {
                    if target.options.contains_key(key) {
                        if let Some(value) = &option.value {
                            composed.insert(key.clone(), value.clone());
                        }
                    }
                }
            }
            for (key, option) in &appliance.startonly_options {
                if let Some(value) = &option.value {
                    composed.insert(key.clone(), value.clone());
                }
            }
            composed
        };

        for raw in &overrides {
            if let (Some(key), Some(value)) = (raw.get("key").and_then(Value::as_str), raw.get("value")) {
                options.insert(key.to_string(), value.clone());
            }
        }

        loop {
            let body: Vec<Value> = options
                .iter()
                .map(|(key, value)| serde_json::json!({ "key": key, "value": value }))
                .collect();

            let result = self
                .transport
                .put(
                    &format!("/api/homeappliances/{ha_id}/programs/active"),
                    serde_json::json!({ "data": { "key": program_key, "options": body } }),
                )
                .await;

            match result {
                Ok(_) => break,
                Err(e) => match e.unsupported_option_key() {
                    Some(bad_key) if options.remove(&bad_key).is_some() => {
                        debug!(option = bad_key, "dropping unsupported option and retrying start_program");
                        continue;
                    }
                    _ => return Err(e.into()),
                },
            }
        }

        let mut appliance = managed.appliance.lock().await;
        appliance.startonly_options.clear();
        drop(appliance);

        Ok(())
    }

    pub async fn stop_program(&self, ha_id: &str) -> Result<(), EngineError> {
        self.require_appliance(ha_id).await?;
        self.transport
            .delete(&format!("/api/homeappliances/{ha_id}/programs/active"))
            .await?;
        Ok(())
    }

    /// Refetches and returns the currently active program, or `None` if
    /// nothing is running.
    pub async fn get_active_program(&self, ha_id: &str) -> Result<std::option::Option<Program>, EngineError> {
        let managed = self.require_appliance(ha_id).await?;
        let mut appliance = managed.appliance.lock().await;
        refresh_active_program(&self.transport, &mut appliance).await?;
        let result = appliance.active_program.clone();
        let snapshot = appliance.clone();
        drop(appliance);
        let _ = self.store.upsert(snapshot).await;
        Ok(result)
    }

    /// Refetches and returns the currently selected program, or `None`.
    pub async fn get_selected_program(&self, ha_id: &str) -> Result<std::option::Option<Program>, EngineError> {
        let managed = self.require_appliance(ha_id).await?;
        let mut appliance = managed.appliance.lock().await;
        refresh_selected_program(&self.transport, &mut appliance).await?;
        let result = appliance.selected_program.clone();
        let snapshot = appliance.clone();
        drop(appliance);
        let _ = self.store.upsert(snapshot).await;
        Ok(result)
    }

    async fn require_appliance(&self, ha_id: &str) -> Result<Arc<ManagedAppliance>, EngineError> {
        self.appliances
            .read()
            .await
            .get(ha_id)
            .cloned()
            .ok_or_else(|| EngineError::ApplianceNotFound(ha_id.to_string()))
    }

    /// Current health flags for one appliance, or `None` if it isn't known.
    pub async fn health_of(&self, ha_id: &str) -> std::option::Option<HealthStatus> {
        self.health.lock().await.get(ha_id).map(HealthTracker::status)
    }

    pub async fn appliances(&self) -> Vec<Appliance> {
        let guard = self.appliances.read().await;
        let mut out = Vec::with_capacity(guard.len());
        for managed in guard.values() {
            out.push(managed.appliance.lock().await.clone());
        }
        out
    }
}

/// The "dynamic" subset of `refresh_everything`: status, settings, and the
/// selected/active programs, but not the (rarely-changing) program catalog
/// or command list. Used for `RefreshMode::DynamicOnly` and for the
/// `false -> true` connection-state transition, mirroring the upstream
/// `async_fetch_data(include_static_data=False)`.
async fn refresh_everything_dynamic(
    transport: &HomeConnectTransport,
    appliance: &mut Appliance,
) -> Result<(), EngineError> {
    crate::refresh::refresh_status(transport, appliance).await?;
    crate::refresh::refresh_settings(transport, appliance).await?;
    refresh_selected_program(transport, appliance).await?;
    refresh_active_program(transport, appliance).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use hc_store::InMemoryStore;
    use hc_transport::StaticToken;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;

    async fn coordinator_against(server: &MockServer) -> Arc<HomeConnectCoordinator> {
        let auth: Arc<dyn AuthProvider> = Arc::new(StaticToken("tok".into()));
        let transport = Arc::new(HomeConnectTransport::for_host(auth.clone(), server.uri(), "en-GB"));
        let store: Arc<dyn ApplianceStore> = Arc::new(InMemoryStore::new());
        let callbacks = Arc::new(CallbackRegistry::new());
        let overall_health = Arc::new(std::sync::Mutex::new(HealthTracker::new()));

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
        .expect("snapshot load should succeed")
    }

    async fn mount_empty_hydration(server: &MockServer, ha_id: &str) {
        for suffix in ["programs/available", "status", "settings", "commands", "programs/selected", "programs/active"]
        {
            Mock::given(method("GET"))
                .and(path(format!("/api/homeappliances/{ha_id}/{suffix}")))
                .respond_with(ResponseTemplate::new(404))
                .mount(server)
                .await;
        }
    }

    fn single_appliance_list(ha_id: &str, connected: bool) -> serde_json::Value {
        serde_json::json!({
            "data": { "homeappliances": [
                { "haId": ha_id, "name": "Oven", "brand": "BOSCH", "type": "Oven", "connected": connected }
            ] }
        })
    }

    #[tokio::test]
    async fn load_snapshot_populates_the_appliance_map() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/homeappliances"))
            .respond_with(ResponseTemplate::new(200).set_body_json(single_appliance_list("OVEN-1", true)))
            .mount(&server)
            .await;
        mount_empty_hydration(&server, "OVEN-1").await;

        let coordinator = coordinator_against(&server).await;
        let appliances = coordinator.appliances().await;
        assert_eq!(appliances.len(), 1);
        assert_eq!(appliances[0].ha_id, "OVEN-1");
    }

    #[tokio::test]
    async fn load_snapshot_skips_disabled_appliances() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/homeappliances"))
            .respond_with(ResponseTemplate::new(200).set_body_json(single_appliance_list("OVEN-1", true)))
            .mount(&server)
            .await;

        let auth: Arc<dyn AuthProvider> = Arc::new(StaticToken("tok".into()));
        let transport = Arc::new(HomeConnectTransport::for_host(auth.clone(), server.uri(), "en-GB"));
        let store: Arc<dyn ApplianceStore> = Arc::new(InMemoryStore::new());
        let callbacks = Arc::new(CallbackRegistry::new());
        let mut config = CoordinatorConfig::default();
        config.disabled_appliance_ids.push("OVEN-1".to_string());

        let coordinator = HomeConnectCoordinator::create(
            transport,
            auth,
            store,
            callbacks,
            config,
            None,
            Arc::new(std::sync::Mutex::new(HealthTracker::new())),
        )
        .await
        .unwrap();
        assert!(coordinator.appliances().await.is_empty());
    }

    #[tokio::test]
    async fn handle_stream_event_depaired_removes_the_appliance() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/homeappliances"))
            .respond_with(ResponseTemplate::new(200).set_body_json(single_appliance_list("OVEN-1", true)))
            .mount(&server)
            .await;
        mount_empty_hydration(&server, "OVEN-1").await;

        let coordinator = coordinator_against(&server).await;
        coordinator
            .handle_stream_event(StreamEvent {
                ha_id: "OVEN-1".into(),
                event_type: "DEPAIRED".into(),
                data: String::new(),
            })
            .await;

        assert!(coordinator.appliances().await.is_empty());
    }

    #[tokio::test]
    async fn handle_stream_event_connected_flips_the_flag_and_fires_a_callback() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/homeappliances"))
            .respond_with(ResponseTemplate::new(200).set_body_json(single_appliance_list("OVEN-1", false)))
            .mount(&server)
            .await;
        mount_empty_hydration(&server, "OVEN-1").await;

        let coordinator = coordinator_against(&server).await;
        let fired = Arc::new(AtomicUsize::new(0));
        let fired_clone = fired.clone();
        coordinator.callbacks.on_key_value(None, "CONNECTED", move |_key, _value| {
            fired_clone.fetch_add(1, Ordering::SeqCst);
        });

        coordinator
            .handle_stream_event(StreamEvent {
                ha_id: "OVEN-1".into(),
                event_type: "CONNECTED".into(),
                data: String::new(),
            })
            .await;

        let appliances = coordinator.appliances().await;
        assert!(appliances[0].connected);
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn connected_event_for_unknown_appliance_pairs_it_first() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/homeappliances"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "data": { "homeappliances": [] }
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/api/homeappliances/GHOST-1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "data": { "haId": "GHOST-1", "name": "Oven", "brand": "BOSCH", "type": "Oven", "connected": false }
            })))
            .mount(&server)
            .await;
        mount_empty_hydration(&server, "GHOST-1").await;

        let coordinator = coordinator_against(&server).await;
        let paired = Arc::new(AtomicUsize::new(0));
        let paired_clone = paired.clone();
        coordinator.callbacks.on_key_value(None, "PAIRED", move |_k, _v| {
            paired_clone.fetch_add(1, Ordering::SeqCst);
        });

        coordinator
            .handle_stream_event(StreamEvent {
                ha_id: "GHOST-1".into(),
                event_type: "CONNECTED".into(),
                data: String::new(),
            })
            .await;

        assert_eq!(paired.load(Ordering::SeqCst), 1);
        let appliances = coordinator.appliances().await;
        assert_eq!(appliances.len(), 1);
        assert!(appliances[0].connected);
    }

    #[tokio::test]
    async fn set_option_rejects_an_option_not_on_the_applied_program() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/homeappliances"))
            .respond_with(ResponseTemplate::new(200).set_body_json(single_appliance_list("OVEN-1", true)))
            .mount(&server)
            .await;
        mount_empty_hydration(&server, "OVEN-1").await;

        let coordinator = coordinator_against(&server).await;
        let err = coordinator
            .set_option("OVEN-1", "BSH.Common.Option.Duration", serde_json::json!(60))
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::OptionNotFound(_)));
    }

    #[tokio::test]
    async fn select_program_rejects_an_unknown_program_key() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/homeappliances"))
            .respond_with(ResponseTemplate::new(200).set_body_json(single_appliance_list("OVEN-1", true)))
            .mount(&server)
            .await;
        mount_empty_hydration(&server, "OVEN-1").await;

        let coordinator = coordinator_against(&server).await;
        let err = coordinator
            .select_program("OVEN-1", "Cooking.Oven.Program.HeatingMode.HotAir", vec![])
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::ProgramNotFound(_)));
    }

    #[tokio::test]
    async fn commands_on_an_unknown_appliance_return_appliance_not_found() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/homeappliances"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "data": { "homeappliances": [] }
            })))
            .mount(&server)
            .await;

        let coordinator = coordinator_against(&server).await;
        let err = coordinator.stop_program("GHOST-1").await.unwrap_err();
        assert!(matches!(err, EngineError::ApplianceNotFound(_)));
    }

    #[tokio::test]
    async fn keep_alive_records_a_health_heartbeat() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/homeappliances"))
            .respond_with(ResponseTemplate::new(200).set_body_json(single_appliance_list("OVEN-1", true)))
            .mount(&server)
            .await;
        mount_empty_hydration(&server, "OVEN-1").await;

        let coordinator = coordinator_against(&server).await;
        assert!(coordinator.health_of("OVEN-1").await.unwrap().contains(HealthStatus::LOADED));
        assert!(coordinator.health.lock().await.get("OVEN-1").unwrap().last_seen().is_none());

        coordinator
            .handle_stream_event(StreamEvent {
                ha_id: "OVEN-1".into(),
                event_type: "KEEP-ALIVE".into(),
                data: String::new(),
            })
            .await;

        assert!(coordinator.health.lock().await.get("OVEN-1").unwrap().last_seen().is_some());
    }

    #[tokio::test]
    async fn pause_active_program_fails_when_not_running() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/homeappliances"))
            .respond_with(ResponseTemplate::new(200).set_body_json(single_appliance_list("OVEN-1", true)))
            .mount(&server)
            .await;
        mount_empty_hydration(&server, "OVEN-1").await;

        let coordinator = coordinator_against(&server).await;
        let err = coordinator.pause_active_program("OVEN-1").await.unwrap_err();
        assert!(matches!(err, EngineError::InvalidState { expected: "Run", .. }));
    }

    #[tokio::test]
    async fn set_option_buffers_a_startonly_option_without_a_put() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/homeappliances"))
            .respond_with(ResponseTemplate::new(200).set_body_json(single_appliance_list("OVEN-1", true)))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/api/homeappliances/OVEN-1/programs/active"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "data": {
                    "key": "Cooking.Oven.Program.HeatingMode.HotAir",
                    "options": [{
                        "key": "Extra.Dry",
                        "value": false,
                        "constraints": { "execution": "startonly" }
                    }]
                }
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/api/homeappliances/OVEN-1/programs/available"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "data": { "programs": [{
                    "key": "Cooking.Oven.Program.HeatingMode.HotAir",
                    "options": [{ "key": "Extra.Dry", "constraints": { "execution": "startonly" } }]
                }] }
            })))
            .mount(&server)
            .await;
        for suffix in ["status", "settings", "commands", "programs/selected"] {
            Mock::given(method("GET"))
                .and(path(format!("/api/homeappliances/OVEN-1/{suffix}")))
                .respond_with(ResponseTemplate::new(404))
                .mount(&server)
                .await;
        }

        let coordinator = coordinator_against(&server).await;
        // No PUT mock is registered for options — a PUT here would fail the test.
        coordinator
            .set_option("OVEN-1", "Extra.Dry", serde_json::json!(true))
            .await
            .unwrap();

        let appliances = coordinator.appliances().await;
        assert_eq!(
            appliances[0].startonly_options.get("Extra.Dry").unwrap().value,
            Some(serde_json::json!(true))
        );
    }
}
