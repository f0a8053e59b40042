pub mod auth;
pub mod error;
pub mod sse;
pub mod transport;

pub use auth::{AuthProvider, StaticToken};
pub use error::{AuthError, TransportError};
pub use sse::{run_event_loop, BackoffKind, LoopState, StreamEvent};
pub use transport::{HomeConnectTransport, API_HOST, SIM_HOST};
