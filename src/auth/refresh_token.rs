/// Refresh Token Ledger
///
/// Records which refresh tokens are currently exchangeable. Tokens are:
/// - Signed JWTs minted by `TokenIssuer` (unique per issuance via `jti`)
/// - Hashed with SHA-256 before storage (never store plaintext)
/// - Revoked by deleting the ledger entry; there is no other revocation path
/// - Purged by the store 7 days after they were recorded

use std::sync::Arc;

use chrono::Utc;
use uuid::Uuid;

use crate::auth::token_digest::token_digest;
use crate::error::{AppError, StoreError};
use crate::store::{RefreshTokenEntry, RefreshTokenStore};

#[derive(Clone)]
pub struct RefreshLedger {
    store: Arc<dyn RefreshTokenStore>,
}

impl RefreshLedger {
    pub fn new(store: Arc<dyn RefreshTokenStore>) -> Self {
        Self { store }
    }

    /// Record a freshly issued refresh token
    ///
    /// # Errors
    /// `Conflict` if the token is already recorded
    pub async fn record(&self, token: &str, user_id: Uuid) -> Result<(), AppError> {
        let entry = RefreshTokenEntry {
            token_hash: token_digest(token),
            user_id,
            created_at: Utc::now(),
        };

        self.store.insert(&entry).await.map_err(|e| match e {
            StoreError::Conflict(_) => {
                tracing::error!(user_id = %user_id, "Refresh token digest collision");
                AppError::Conflict("Refresh token already recorded".to_string())
            }
            other => other.into(),
        })
    }

    pub async fn find(&self, token: &str) -> Result<Option<RefreshTokenEntry>, AppError> {
        Ok(self.store.find(&token_digest(token)).await?)
    }

    /// Revoke a refresh token
    ///
    /// Returns `false` when the token was not in the ledger.
    pub async fn delete(&self, token: &str) -> Result<bool, AppError> {
        Ok(self.store.delete(&token_digest(token)).await?)
    }
}
