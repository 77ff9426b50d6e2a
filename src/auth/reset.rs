/// Password Reset Exchange
///
/// Per-user state machine: no active reset -> requested -> consumed or expired.
/// The reset token lives on the user record as a SHA-256 digest, so a
/// new request overwrites (and thereby invalidates) any earlier one.
/// Delivering the token is the caller's job.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use rand::RngCore;
use uuid::Uuid;

use crate::auth::password::hash_new_password;
use crate::auth::token_digest::token_digest;
use crate::error::{AppError, AuthError};
use crate::store::CredentialStore;

pub const RESET_TOKEN_TTL_MINUTES: i64 = 60;
const RESET_TOKEN_BYTES: usize = 32;

/// Everything the notifier needs to deliver a reset token
#[derive(Debug, Clone)]
pub struct ResetTicket {
    pub token: String,
    pub user_id: Uuid,
    pub email: String,
    pub username: String,
    pub expires_at: DateTime<Utc>,
}

fn generate_reset_token() -> String {
    let mut bytes = [0u8; RESET_TOKEN_BYTES];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

#[derive(Clone)]
pub struct ResetExchange {
    users: Arc<dyn CredentialStore>,
    ttl: Duration,
}

impl ResetExchange {
    pub fn new(users: Arc<dyn CredentialStore>) -> Self {
        Self {
            users,
            ttl: Duration::minutes(RESET_TOKEN_TTL_MINUTES),
        }
    }

    pub async fn request_reset(&self, email: &str) -> Result<ResetTicket, AppError> {
        self.request_reset_at(email, Utc::now()).await
    }

    /// Start a reset for the account registered under `email`
    ///
    /// # Errors
    /// `NotFound` if no user has that email
    pub async fn request_reset_at(
        &self,
        email: &str,
        now: DateTime<Utc>,
    ) -> Result<ResetTicket, AppError> {
        let user = self
            .users
            .find_by_email(email)
            .await?
            .ok_or_else(|| AppError::NotFound("No account registered with that email".to_string()))?;

        let token = generate_reset_token();
        let expires_at = now + self.ttl;

        if user.reset_token_hash.is_some() {
            tracing::info!(user_id = %user.id, "Superseding earlier password reset request");
        }
        self.users
            .set_reset_token(user.id, &token_digest(&token), expires_at)
            .await?;

        tracing::info!(user_id = %user.id, expires_at = %expires_at, "Password reset requested");

        Ok(ResetTicket {
            token,
            user_id: user.id,
            email: user.email,
            username: user.username,
            expires_at,
        })
    }

    pub async fn consume_reset(&self, token: &str, new_password: &str) -> Result<(), AppError> {
        self.consume_reset_at(token, new_password, Utc::now()).await
    }

    /// Exchange a reset token for a password change
    ///
    /// # Errors
    /// - `InvalidResetToken` if no user holds this exact token
    /// - `ResetTokenExpired` if `now` is past the expiry; the stale token is cleared
    pub async fn consume_reset_at(
        &self,
        token: &str,
        new_password: &str,
        now: DateTime<Utc>,
    ) -> Result<(), AppError> {
        let digest = token_digest(token);
        let user = self
            .users
            .find_by_reset_token(&digest)
            .await?
            .ok_or(AuthError::InvalidResetToken)?;

        let expires_at = match user.reset_token_expires_at {
            Some(expires_at) => expires_at,
            None => {
                // Digest without expiry: treat as unusable and clean up.
                self.users.clear_reset_token(user.id, &digest).await?;
                return Err(AuthError::InvalidResetToken.into());
            }
        };

        if now > expires_at {
            self.users.clear_reset_token(user.id, &digest).await?;
            tracing::info!(user_id = %user.id, "Expired password reset token rejected");
            return Err(AuthError::ResetTokenExpired.into());
        }

        let hashed = hash_new_password(new_password.to_string()).await?;
        let consumed = self
            .users
            .complete_reset(user.id, &digest, &hashed.hash, &hashed.salt)
            .await?;
        if !consumed {
            tracing::warn!(user_id = %user.id, "Reset token consumed or superseded concurrently");
            return Err(AuthError::InvalidResetToken.into());
        }

        tracing::info!(user_id = %user.id, "Password reset completed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::password::{generate_salt, hash_password, verify_password};
    use crate::store::{InMemoryStore, NewUser, Role};

    async fn exchange_with_user() -> (ResetExchange, Arc<InMemoryStore>) {
        let store = Arc::new(InMemoryStore::new());
        let salt = generate_salt();
        store
            .create(NewUser {
                role: Role::Customer,
                username: "alice".to_string(),
                email: "a@x.com".to_string(),
                password_hash: hash_password("longenough1", &salt),
                salt,
            })
            .await
            .unwrap();
        (ResetExchange::new(store.clone()), store)
    }

    #[tokio::test]
    async fn test_unknown_email_is_not_found() {
        let (exchange, _) = exchange_with_user().await;
        let result = exchange.request_reset("nobody@x.com").await;
        assert!(matches!(result, Err(AppError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_request_stores_digest_not_token() {
        let (exchange, store) = exchange_with_user().await;
        let ticket = exchange.request_reset("a@x.com").await.unwrap();

        let user = store.find_by_email("a@x.com").await.unwrap().unwrap();
        assert_eq!(user.reset_token_hash, Some(token_digest(&ticket.token)));
        assert_ne!(user.reset_token_hash.as_deref(), Some(ticket.token.as_str()));
        assert_eq!(user.reset_token_expires_at, Some(ticket.expires_at));
        assert_eq!(ticket.username, "alice");
    }

    #[tokio::test]
    async fn test_consume_changes_password_once() {
        let (exchange, store) = exchange_with_user().await;
        let ticket = exchange.request_reset("a@x.com").await.unwrap();
        let before = store.find_by_email("a@x.com").await.unwrap().unwrap();

        exchange.consume_reset(&ticket.token, "brand-new-pass").await.unwrap();

        let after = store.find_by_email("a@x.com").await.unwrap().unwrap();
        assert_ne!(after.salt, before.salt);
        assert!(verify_password("brand-new-pass", &after.salt, &after.password_hash));
        assert!(!verify_password("longenough1", &after.salt, &after.password_hash));
        assert!(after.reset_token_hash.is_none());
        assert!(after.reset_token_expires_at.is_none());

        let replay = exchange.consume_reset(&ticket.token, "another-pass").await;
        assert!(matches!(replay, Err(AppError::Auth(AuthError::InvalidResetToken))));
    }

    #[tokio::test]
    async fn test_second_request_invalidates_first() {
        let (exchange, _) = exchange_with_user().await;
        let first = exchange.request_reset("a@x.com").await.unwrap();
        let second = exchange.request_reset("a@x.com").await.unwrap();
        assert_ne!(first.token, second.token);

        let stale = exchange.consume_reset(&first.token, "brand-new-pass").await;
        assert!(matches!(stale, Err(AppError::Auth(AuthError::InvalidResetToken))));

        exchange.consume_reset(&second.token, "brand-new-pass").await.unwrap();
    }

    #[tokio::test]
    async fn test_token_expires_after_one_hour() {
        let (exchange, store) = exchange_with_user().await;
        let requested_at = Utc::now();
        let ticket = exchange.request_reset_at("a@x.com", requested_at).await.unwrap();

        let too_late = requested_at + Duration::hours(1) + Duration::seconds(1);
        let result = exchange
            .consume_reset_at(&ticket.token, "brand-new-pass", too_late)
            .await;
        assert!(matches!(result, Err(AppError::Auth(AuthError::ResetTokenExpired))));

        // Stale token was cleared on detection
        let user = store.find_by_email("a@x.com").await.unwrap().unwrap();
        assert!(user.reset_token_hash.is_none());
        assert!(verify_password("longenough1", &user.salt, &user.password_hash));

        let again = exchange
            .consume_reset_at(&ticket.token, "brand-new-pass", requested_at)
            .await;
        assert!(matches!(again, Err(AppError::Auth(AuthError::InvalidResetToken))));
    }

    #[tokio::test]
    async fn test_token_valid_just_before_expiry() {
        let (exchange, _) = exchange_with_user().await;
        let requested_at = Utc::now();
        let ticket = exchange.request_reset_at("a@x.com", requested_at).await.unwrap();

        let just_in_time = requested_at + Duration::minutes(59);
        exchange
            .consume_reset_at(&ticket.token, "brand-new-pass", just_in_time)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_lookup_is_exact_match() {
        let (exchange, _) = exchange_with_user().await;
        let ticket = exchange.request_reset("a@x.com").await.unwrap();

        let upper = ticket.token.to_uppercase();
        let prefix = &ticket.token[..ticket.token.len() - 1];
        for candidate in [upper.as_str(), prefix, ""] {
            let result = exchange.consume_reset(candidate, "brand-new-pass").await;
            assert!(matches!(result, Err(AppError::Auth(AuthError::InvalidResetToken))));
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_consumes_have_one_winner() {
        let (exchange, store) = exchange_with_user().await;

        for _ in 0..20 {
            let ticket = exchange.request_reset("a@x.com").await.unwrap();
            let (first, second) = tokio::join!(
                exchange.consume_reset(&ticket.token, "first-pass-1"),
                exchange.consume_reset(&ticket.token, "second-pass-2"),
            );

            let outcomes = [first, second];
            let winners = outcomes.iter().filter(|r| r.is_ok()).count();
            let rejected = outcomes
                .iter()
                .filter(|r| matches!(r, Err(AppError::Auth(AuthError::InvalidResetToken))))
                .count();
            assert_eq!(winners, 1);
            assert_eq!(rejected, 1);

            let user = store.find_by_email("a@x.com").await.unwrap().unwrap();
            assert!(user.reset_token_hash.is_none());
        }
    }

    #[tokio::test]
    async fn test_consume_does_not_erase_a_newer_request() {
        let (exchange, store) = exchange_with_user().await;
        let first = exchange.request_reset("a@x.com").await.unwrap();
        let user = store.find_by_email("a@x.com").await.unwrap().unwrap();

        // A second request lands after the first token was looked up.
        let second = exchange.request_reset("a@x.com").await.unwrap();
        let stale_write = store
            .complete_reset(user.id, &token_digest(&first.token), "h", "s")
            .await
            .unwrap();
        assert!(!stale_write);

        let user = store.find_by_email("a@x.com").await.unwrap().unwrap();
        assert_eq!(user.reset_token_hash, Some(token_digest(&second.token)));
        assert!(verify_password("longenough1", &user.salt, &user.password_hash));
    }
}
