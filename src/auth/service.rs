/// Credential lifecycle orchestration
///
/// Registration and login end in a token pair whose refresh half is
/// recorded in the ledger. Refresh is a two-phase check (signature, then
/// ledger presence). Revocation deletes the ledger entry.

use std::sync::Arc;

use crate::auth::claims::{Claims, TokenKind};
use crate::auth::jwt::{TokenError, TokenIssuer, TokenPair};
use crate::auth::password::{hash_new_password, verify_password_offloaded};
use crate::auth::refresh_token::RefreshLedger;
use crate::auth::reset::{ResetExchange, ResetTicket};
use crate::error::{AppError, AuthError};
use crate::store::{CredentialStore, NewUser, RefreshTokenStore, Role, User};

// Burned on unknown usernames so both login failures cost one derivation.
const DUMMY_SALT: &str = "00000000000000000000000000000000";
const DUMMY_HASH: &str = "00";

/// Validated registration input
#[derive(Clone)]
pub struct Registration {
    pub role: Role,
    pub username: String,
    pub email: String,
    pub password: String,
}

#[derive(Clone)]
pub struct AuthService {
    users: Arc<dyn CredentialStore>,
    ledger: RefreshLedger,
    tokens: Arc<TokenIssuer>,
    resets: ResetExchange,
}

impl AuthService {
    pub fn new(
        users: Arc<dyn CredentialStore>,
        refresh_tokens: Arc<dyn RefreshTokenStore>,
        tokens: Arc<TokenIssuer>,
    ) -> Self {
        Self {
            resets: ResetExchange::new(users.clone()),
            ledger: RefreshLedger::new(refresh_tokens),
            users,
            tokens,
        }
    }

    pub fn tokens(&self) -> &TokenIssuer {
        &self.tokens
    }

    /// Shared handle for the bearer-token gate
    pub fn token_issuer(&self) -> Arc<TokenIssuer> {
        self.tokens.clone()
    }

    /// Create an account and sign it in
    ///
    /// If the token pair cannot be issued or recorded the new user is
    /// deleted again before the error is returned.
    ///
    /// # Errors
    /// `Conflict` if the username or email is taken, whether caught by the
    /// pre-check or by the store's uniqueness constraint.
    pub async fn register(&self, registration: Registration) -> Result<(User, TokenPair), AppError> {
        if self.users.find_by_username(&registration.username).await?.is_some() {
            return Err(AppError::Conflict("Username already taken".to_string()));
        }
        if self.users.find_by_email(&registration.email).await?.is_some() {
            return Err(AppError::Conflict("Email already registered".to_string()));
        }

        let hashed = hash_new_password(registration.password).await?;

        let user = self
            .users
            .create(NewUser {
                role: registration.role,
                username: registration.username,
                email: registration.email,
                password_hash: hashed.hash,
                salt: hashed.salt,
            })
            .await?;

        // A user who never received tokens must be able to register again.
        let pair = match self.issue_and_record(&user).await {
            Ok(pair) => pair,
            Err(e) => {
                tracing::error!(user_id = %user.id, error = %e, "Token issuance failed, rolling back registration");
                if let Err(rollback) = self.users.delete_user(user.id).await {
                    tracing::error!(user_id = %user.id, error = %rollback, "Registration rollback failed");
                }
                return Err(e);
            }
        };

        tracing::info!(user_id = %user.id, role = %user.role, "User registered");
        Ok((user, pair))
    }

    /// Authenticate by username and password
    ///
    /// Unknown user and wrong password both yield `InvalidCredentials`.
    pub async fn login(&self, username: &str, password: &str) -> Result<(User, TokenPair), AppError> {
        let user = match self.users.find_by_username(username).await? {
            Some(user) => user,
            None => {
                verify_password_offloaded(
                    password.to_string(),
                    DUMMY_SALT.to_string(),
                    DUMMY_HASH.to_string(),
                )
                .await?;
                return Err(AuthError::InvalidCredentials.into());
            }
        };

        let valid = verify_password_offloaded(
            password.to_string(),
            user.salt.clone(),
            user.password_hash.clone(),
        )
        .await?;
        if !valid {
            return Err(AuthError::InvalidCredentials.into());
        }

        let pair = self.issue_and_record(&user).await?;
        tracing::info!(user_id = %user.id, "User logged in");
        Ok((user, pair))
    }

    async fn issue_and_record(&self, user: &User) -> Result<TokenPair, AppError> {
        let pair = self.tokens.issue_pair(user.id, user.role)?;
        self.ledger.record(&pair.refresh_token, user.id).await?;
        Ok(pair)
    }

    /// Exchange a refresh token for a new access token
    ///
    /// # Errors
    /// - `InvalidToken` / `TokenExpired` if the token fails verification
    /// - `NotFound` if it is not (or no longer) in the ledger, or the user is gone
    pub async fn refresh(&self, refresh_token: &str) -> Result<String, AppError> {
        let claims = self.tokens.validate(refresh_token, TokenKind::Refresh)?;
        let subject = claims.user_id()?;

        let entry = self.ledger.find(refresh_token).await?.ok_or_else(|| {
            tracing::warn!(user_id = %subject, "Refresh attempted with revoked or unknown token");
            AppError::NotFound("Refresh token not found".to_string())
        })?;

        if entry.user_id != subject {
            tracing::error!(user_id = %subject, "Ledger entry belongs to another user");
            return Err(AuthError::InvalidToken.into());
        }

        // Mint with the current role, not the one frozen into the refresh token.
        let user = self
            .users
            .find_by_id(subject)
            .await?
            .ok_or_else(|| AppError::NotFound("User not found".to_string()))?;

        let access_token = self.tokens.issue_access(user.id, user.role)?;
        tracing::info!(user_id = %user.id, "Access token refreshed");
        Ok(access_token)
    }

    /// Remove a refresh token from the ledger
    ///
    /// # Errors
    /// `NotFound` if the token is not in the ledger
    pub async fn revoke(&self, refresh_token: &str) -> Result<(), AppError> {
        if self.ledger.delete(refresh_token).await? {
            tracing::info!("Refresh token revoked");
            Ok(())
        } else {
            Err(AppError::NotFound("Refresh token not found".to_string()))
        }
    }

    /// Single-phase access token check (signature and expiry only)
    pub fn validate_access(&self, token: &str) -> Result<Claims, TokenError> {
        self.tokens.validate(token, TokenKind::Access)
    }

    pub async fn request_password_reset(&self, email: &str) -> Result<ResetTicket, AppError> {
        self.resets.request_reset(email).await
    }

    pub async fn reset_password(&self, token: &str, new_password: &str) -> Result<(), AppError> {
        self.resets.consume_reset(token, new_password).await
    }
}
