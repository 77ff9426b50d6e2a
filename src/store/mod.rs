/// Credential Store and Refresh Ledger persistence
///
/// The core only talks to persistence through the two traits below.
/// `PgStore` backs them with Postgres; `InMemoryStore` keeps the same
/// uniqueness and retention rules in process memory.

mod memory;
mod models;
mod postgres;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::StoreError;

pub use memory::InMemoryStore;
pub use models::{NewUser, RefreshTokenEntry, Role, User};
pub use postgres::PgStore;

/// Ledger entries older than this are purged by the store.
pub const REFRESH_TOKEN_RETENTION_DAYS: i64 = 7;

/// Oldest `created_at` still visible at `now`
pub fn retention_cutoff(now: DateTime<Utc>) -> DateTime<Utc> {
    now - chrono::Duration::days(REFRESH_TOKEN_RETENTION_DAYS)
}

/// User records
///
/// `create` must reject a duplicate username or email with
/// `StoreError::Conflict`, including the loser of a concurrent race.
#[async_trait]
pub trait CredentialStore: Send + Sync {
    async fn find_by_username(&self, username: &str) -> Result<Option<User>, StoreError>;

    async fn find_by_email(&self, email: &str) -> Result<Option<User>, StoreError>;

    async fn find_by_id(&self, id: Uuid) -> Result<Option<User>, StoreError>;

    /// Exact match on the stored reset-token digest
    async fn find_by_reset_token(&self, token_hash: &str) -> Result<Option<User>, StoreError>;

    async fn create(&self, user: NewUser) -> Result<User, StoreError>;

    /// Persist every mutable field of `user`. `StoreError::NotFound` if the id is unknown.
    async fn update(&self, user: &User) -> Result<(), StoreError>;

    /// Remove a user; `Ok(false)` when the id is unknown
    async fn delete_user(&self, id: Uuid) -> Result<bool, StoreError>;

    /// Replace the user's reset token digest and expiry, leaving other fields alone
    async fn set_reset_token(
        &self,
        id: Uuid,
        token_hash: &str,
        expires_at: DateTime<Utc>,
    ) -> Result<(), StoreError>;

    /// Clear the reset token only while the user still holds `token_hash`.
    async fn clear_reset_token(&self, id: Uuid, token_hash: &str) -> Result<bool, StoreError>;

    /// Set a new password and clear the reset token in one step, only while
    /// the user still holds `token_hash`. `Ok(false)` means the token was
    /// already consumed or superseded and nothing changed.
    async fn complete_reset(
        &self,
        id: Uuid,
        token_hash: &str,
        password_hash: &str,
        salt: &str,
    ) -> Result<bool, StoreError>;
}

/// Refresh-token ledger keyed by token digest
#[async_trait]
pub trait RefreshTokenStore: Send + Sync {
    /// `StoreError::Conflict` if the digest is already present
    async fn insert(&self, entry: &RefreshTokenEntry) -> Result<(), StoreError>;

    /// Entries past retention are reported as absent.
    async fn find(&self, token_hash: &str) -> Result<Option<RefreshTokenEntry>, StoreError>;

    /// `Ok(false)` when nothing was deleted, including entries past retention
    async fn delete(&self, token_hash: &str) -> Result<bool, StoreError>;
}
