use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

/// Connection/loading health of one appliance or the coordinator as a
/// whole, as a small bitset rather than a single linear enum — mirrors the
/// upstream `HealthStatus` `IntFlag`, where e.g. `Loaded` literally is
/// `Init | Running`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HealthStatus(u8);

impl HealthStatus {
    pub const INIT: HealthStatus = HealthStatus(0);
    pub const RUNNING: HealthStatus = HealthStatus(1);
    pub const LOADED: HealthStatus = HealthStatus(1 | 2);
    pub const UPDATES: HealthStatus = HealthStatus(4);
    pub const UPDATES_NO_DATA: HealthStatus = HealthStatus(4 | 1);
    pub const READY: HealthStatus = HealthStatus(1 | 2 | 4);
    pub const LOADING_FAILED: HealthStatus = HealthStatus(8);
    pub const BLOCKED: HealthStatus = HealthStatus(16);

    pub fn set(&mut self, flag: HealthStatus) {
        self.0 |= flag.0;
    }

    pub fn unset(&mut self, flag: HealthStatus) {
        self.0 &= !flag.0;
    }

    pub fn contains(&self, flag: HealthStatus) -> bool {
        self.0 & flag.0 == flag.0
    }
}

impl Default for HealthStatus {
    fn default() -> Self {
        HealthStatus::INIT
    }
}

/// Tracks one appliance's (or the coordinator's) health flags plus a
/// rate-limit cooldown timer, set whenever a `429` forces the transport to
/// back off.
#[derive(Debug, Default)]
pub struct HealthTracker {
    status: HealthStatus,
    blocked_until: std::option::Option<Instant>,
    last_seen: std::option::Option<Instant>,
}

impl HealthTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn status(&self) -> HealthStatus {
        self.status
    }

    /// Records a `KEEP-ALIVE` (or any other liveness signal) from the
    /// appliance's event stream.
    pub fn touch(&mut self) {
        self.last_seen = Some(Instant::now());
    }

    pub fn last_seen(&self) -> std::option::Option<Instant> {
        self.last_seen
    }

    pub fn set(&mut self, flag: HealthStatus) {
        self.status.set(flag);
    }

    pub fn unset(&mut self, flag: HealthStatus) {
        self.status.unset(flag);
    }

    pub fn block_for(&mut self, duration: Duration) {
        self.status.set(HealthStatus::BLOCKED);
        self.blocked_until = Some(Instant::now() + duration);
    }

    /// Clears the `BLOCKED` flag once its cooldown has elapsed. Callers
    /// should poll this before deciding whether a blocked appliance is
    /// usable again.
    pub fn refresh_block(&mut self) {
        if let Some(until) = self.blocked_until {
            if Instant::now() >= until {
                self.status.unset(HealthStatus::BLOCKED);
                self.blocked_until = None;
            }
        }
    }

    pub fn blocked_until(&self) -> std::option::Option<Instant> {
        self.blocked_until
    }
}

/// Builds the `Fn(Duration)` hook `HomeConnectTransport::with_rate_limit_hook`
/// expects, closing over a shared overall-health tracker.
///
/// `hc-transport` sits below `hc-engine` in the dependency graph and can't
/// know about `HealthTracker` directly, so the coordinator's caller builds
/// this hook and hands it to the transport at construction time, while
/// giving the same `Arc` to `HomeConnectCoordinator::create` so both sides
/// observe the one shared tracker.
pub fn rate_limit_hook(health: Arc<Mutex<HealthTracker>>) -> Arc<dyn Fn(Duration) + Send + Sync> {
    Arc::new(move |duration| {
        health.lock().unwrap().block_for(duration);
    })
}
