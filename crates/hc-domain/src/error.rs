use thiserror::Error;

#[derive(Debug, Error)]
pub enum DomainError {
    #[error("option '{0}' is read-only")]
    ReadOnly(String),

    #[error("value for option '{key}' is not in the allowed set: {value}")]
    NotAllowed { key: String, value: String },

    #[error("value {value} for option '{key}' is out of range [{min}, {max}]")]
    OutOfRange {
        key: String,
        value: i64,
        min: i64,
        max: i64,
    },

    #[error("value {value} for option '{key}' is not a multiple of step size {step}")]
    StepMismatch { key: String, value: i64, step: i64 },

    #[error("option '{0}' expects a numeric value")]
    NotNumeric(String),

    #[error("unknown operation state: {0}")]
    UnknownOperationState(String),

    #[error("malformed appliance payload: {0}")]
    MalformedPayload(String),
}
