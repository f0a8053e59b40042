use thiserror::Error;

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("failed to obtain access token: {0}")]
    TokenUnavailable(String),
}

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error(transparent)]
    Auth(#[from] AuthError),

    #[error("service error {status}: {body}")]
    Service { status: u16, body: String },

    #[error("exhausted retry budget calling {endpoint}")]
    RetriesExhausted { endpoint: String },
}

impl TransportError {
    /// If this is a `SDK.Error.UnsupportedOption` response whose description
    /// matches `Option <key> not supported`, returns the offending option
    /// key so the caller can drop it and retry.
    pub fn unsupported_option_key(&self) -> std::option::Option<String> {
        let TransportError::Service { body, .. } = self else { return None };
        let parsed: serde_json::Value = serde_json::from_str(body).ok()?;
        let error = parsed.get("error")?;
        if error.get("key").and_then(serde_json::Value::as_str) != Some("SDK.Error.UnsupportedOption") {
            return None;
        }
        let description = error.get("description").and_then(serde_json::Value::as_str)?;
        description
            .strip_prefix("Option ")
            .and_then(|rest| rest.strip_suffix(" not supported"))
            .map(str::to_string)
    }
}
