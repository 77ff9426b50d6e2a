use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use super::{retention_cutoff, CredentialStore, NewUser, RefreshTokenEntry, RefreshTokenStore, User};
use crate::error::StoreError;

/// Process-local store with the same uniqueness and retention rules as `PgStore`
#[derive(Default)]
pub struct InMemoryStore {
    users: Mutex<HashMap<Uuid, User>>,
    refresh_tokens: Mutex<HashMap<String, RefreshTokenEntry>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> Result<MutexGuard<'_, T>, StoreError> {
    mutex
        .lock()
        .map_err(|_| StoreError::Unavailable("in-memory store lock poisoned".to_string()))
}

#[async_trait]
impl CredentialStore for InMemoryStore {
    async fn find_by_username(&self, username: &str) -> Result<Option<User>, StoreError> {
        let users = lock(&self.users)?;
        Ok(users.values().find(|u| u.username == username).cloned())
    }

    async fn find_by_email(&self, email: &str) -> Result<Option<User>, StoreError> {
        let users = lock(&self.users)?;
        Ok(users.values().find(|u| u.email == email).cloned())
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<User>, StoreError> {
        let users = lock(&self.users)?;
        Ok(users.get(&id).cloned())
    }

    async fn find_by_reset_token(&self, token_hash: &str) -> Result<Option<User>, StoreError> {
        let users = lock(&self.users)?;
        Ok(users
            .values()
            .find(|u| u.reset_token_hash.as_deref() == Some(token_hash))
            .cloned())
    }

    async fn create(&self, user: NewUser) -> Result<User, StoreError> {
        // Check and insert under one lock so racing registrations see each other.
        let mut users = lock(&self.users)?;

        if users.values().any(|u| u.username == user.username) {
            return Err(StoreError::Conflict("username already exists".to_string()));
        }
        if users.values().any(|u| u.email == user.email) {
            return Err(StoreError::Conflict("email already exists".to_string()));
        }

        let now = Utc::now();
        let record = User {
            id: Uuid::new_v4(),
            role: user.role,
            username: user.username,
            email: user.email,
            password_hash: user.password_hash,
            salt: user.salt,
            reset_token_hash: None,
            reset_token_expires_at: None,
            created_at: now,
            updated_at: now,
        };
        users.insert(record.id, record.clone());
        Ok(record)
    }

    async fn update(&self, user: &User) -> Result<(), StoreError> {
        let mut users = lock(&self.users)?;

        let clash = users.values().any(|u| {
            u.id != user.id && (u.username == user.username || u.email == user.email)
        });
        if clash {
            return Err(StoreError::Conflict("username or email already exists".to_string()));
        }

        match users.get_mut(&user.id) {
            Some(existing) => {
                *existing = user.clone();
                existing.updated_at = Utc::now();
                Ok(())
            }
            None => Err(StoreError::NotFound),
        }
    }

    async fn delete_user(&self, id: Uuid) -> Result<bool, StoreError> {
        let removed = lock(&self.users)?.remove(&id).is_some();
        if removed {
            lock(&self.refresh_tokens)?.retain(|_, e| e.user_id != id);
        }
        Ok(removed)
    }

    async fn set_reset_token(
        &self,
        id: Uuid,
        token_hash: &str,
        expires_at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let mut users = lock(&self.users)?;

        if users
            .values()
            .any(|u| u.id != id && u.reset_token_hash.as_deref() == Some(token_hash))
        {
            return Err(StoreError::Conflict("reset token already exists".to_string()));
        }

        let user = users.get_mut(&id).ok_or(StoreError::NotFound)?;
        user.reset_token_hash = Some(token_hash.to_string());
        user.reset_token_expires_at = Some(expires_at);
        user.updated_at = Utc::now();
        Ok(())
    }

    async fn clear_reset_token(&self, id: Uuid, token_hash: &str) -> Result<bool, StoreError> {
        let mut users = lock(&self.users)?;
        match users.get_mut(&id) {
            Some(user) if user.reset_token_hash.as_deref() == Some(token_hash) => {
                user.clear_reset();
                user.updated_at = Utc::now();
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn complete_reset(
        &self,
        id: Uuid,
        token_hash: &str,
        password_hash: &str,
        salt: &str,
    ) -> Result<bool, StoreError> {
        // Check and write under one lock so only one consumer can win.
        let mut users = lock(&self.users)?;
        match users.get_mut(&id) {
            Some(user) if user.reset_token_hash.as_deref() == Some(token_hash) => {
                user.password_hash = password_hash.to_string();
                user.salt = salt.to_string();
                user.clear_reset();
                user.updated_at = Utc::now();
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}

#[async_trait]
impl RefreshTokenStore for InMemoryStore {
    async fn insert(&self, entry: &RefreshTokenEntry) -> Result<(), StoreError> {
        let mut tokens = lock(&self.refresh_tokens)?;

        let cutoff = retention_cutoff(Utc::now());
        tokens.retain(|_, e| e.created_at > cutoff);

        if tokens.contains_key(&entry.token_hash) {
            return Err(StoreError::Conflict("refresh token already recorded".to_string()));
        }
        tokens.insert(entry.token_hash.clone(), entry.clone());
        Ok(())
    }

    async fn find(&self, token_hash: &str) -> Result<Option<RefreshTokenEntry>, StoreError> {
        let tokens = lock(&self.refresh_tokens)?;
        let cutoff = retention_cutoff(Utc::now());
        Ok(tokens
            .get(token_hash)
            .filter(|e| e.created_at > cutoff)
            .cloned())
    }

    async fn delete(&self, token_hash: &str) -> Result<bool, StoreError> {
        let mut tokens = lock(&self.refresh_tokens)?;
        let cutoff = retention_cutoff(Utc::now());
        Ok(tokens
            .remove(token_hash)
            .map_or(false, |e| e.created_at > cutoff))
    }
}
