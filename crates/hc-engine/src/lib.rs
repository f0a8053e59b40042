pub mod apply;
pub mod callback;
pub mod coordinator;
pub mod error;
pub mod health;
pub mod refresh;

pub use apply::{apply_event, ObservableEvent};
pub use callback::{Callback, CallbackRegistry};
pub use coordinator::{HomeConnectCoordinator, ManagedAppliance, RefreshMode};
pub use error::EngineError;
pub use health::{rate_limit_hook, HealthStatus, HealthTracker};
