// Token Validation
//
// The core consumes a single capability: resolve a bearer token to the
// scope it speaks for (a user scope, the first-party scope, or nothing).
// How tokens are minted and stored is a collaborator concern.

use crate::error::CoreError;
use crate::scope::Scope;
use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::RwLock;

const MIN_TOKEN_LENGTH: usize = 32;

#[async_trait]
pub trait TokenValidator: Send + Sync {
    /// Resolve a token to its scope; `None` means the token is invalid.
    async fn validate(&self, token: &str) -> Result<Option<Scope>, CoreError>;
}

fn strip_bearer(token: &str) -> &str {
    token.strip_prefix("Bearer ").unwrap_or(token)
}

/// In-memory token registry mapping tokens to scope claims.
pub struct StaticTokenValidator {
    tokens: RwLock<HashMap<String, Scope>>,
}

impl StaticTokenValidator {
    pub fn new() -> Self {
        Self {
            tokens: RwLock::new(HashMap::new()),
        }
    }

    /// Register a token for a scope.
    pub async fn register(&self, token: String, scope: Scope) -> Result<(), CoreError> {
        let token = strip_bearer(&token).to_string();
        if token.len() < MIN_TOKEN_LENGTH {
            return Err(CoreError::Token(format!(
                "token too short (min {} chars)",
                MIN_TOKEN_LENGTH
            )));
        }
        self.tokens.write().await.insert(token, scope);
        Ok(())
    }

    pub async fn revoke(&self, token: &str) {
        self.tokens.write().await.remove(strip_bearer(token));
    }

    pub async fn token_count(&self) -> usize {
        self.tokens.read().await.len()
    }
}

impl Default for StaticTokenValidator {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TokenValidator for StaticTokenValidator {
    async fn validate(&self, token: &str) -> Result<Option<Scope>, CoreError> {
        let token = strip_bearer(token);

        if token.len() < MIN_TOKEN_LENGTH {
            tracing::debug!("Token rejected: too short ({} chars)", token.len());
            return Ok(None);
        }
        if !token
            .chars()
            .all(|c| c.is_alphanumeric() || c == '-' || c == '_' || c == '.')
        {
            tracing::debug!("Token rejected: invalid characters");
            return Ok(None);
        }

        Ok(self.tokens.read().await.get(token).cloned())
    }
}
