use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("appliance not found: {0}")]
    ApplianceNotFound(String),

    #[error("program not found in catalog: {0}")]
    ProgramNotFound(String),

    #[error("option not available on the applied program: {0}")]
    OptionNotFound(String),

    #[error("appliance {ha_id} does not advertise command: {command}")]
    CommandNotSupported { ha_id: String, command: String },

    #[error("appliance {ha_id} is not in state {expected} required for this command")]
    InvalidState { ha_id: String, expected: &'static str },

    #[error("domain error: {0}")]
    Domain(#[from] hc_domain::DomainError),

    #[error("transport error: {0}")]
    Transport(#[from] hc_transport::TransportError),

    #[error("store error: {0}")]
    Store(#[from] hc_store::StoreError),
}
