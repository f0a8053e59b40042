use async_trait::async_trait;

use crate::error::AuthError;

/// Supplies a currently-valid OAuth access token on demand.
///
/// The transport never refreshes tokens itself — it asks the provider for
/// one before every request and trusts that the provider has already
/// renewed it if the old one expired. This mirrors the upstream SDK's split
/// between `AbstractAuth` (request shaping) and `AuthManager` (token
/// lifecycle): only the token-sourcing contract is the transport's concern.
#[async_trait]
pub trait AuthProvider: Send + Sync + 'static {
    async fn access_token(&self) -> Result<String, AuthError>;
}

/// Fixed-token provider, for tests and for callers who manage their own
/// refresh loop outside this crate.
pub struct StaticToken(pub String);

#[async_trait]
impl AuthProvider for StaticToken {
    async fn access_token(&self) -> Result<String, AuthError> {
        Ok(self.0.clone())
    }
}
