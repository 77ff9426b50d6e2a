use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Authorization role carried in token claims
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Admin,
    #[default]
    Customer,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Admin => "admin",
            Role::Customer => "customer",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "admin" => Ok(Role::Admin),
            "customer" => Ok(Role::Customer),
            other => Err(format!("unknown role: {}", other)),
        }
    }
}

/// Identity record
///
/// `password_hash` is always the PBKDF2 digest of the password under
/// `salt`. The reset fields are both set or both empty.
#[derive(Clone, PartialEq)]
pub struct User {
    pub id: Uuid,
    pub role: Role,
    pub username: String,
    pub email: String,
    pub password_hash: String,
    pub salt: String,
    pub reset_token_hash: Option<String>,
    pub reset_token_expires_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl User {
    pub fn clear_reset(&mut self) {
        self.reset_token_hash = None;
        self.reset_token_expires_at = None;
    }
}

// Credentials stay out of logs and panic messages.
impl fmt::Debug for User {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("User")
            .field("id", &self.id)
            .field("role", &self.role)
            .field("username", &self.username)
            .field("email", &self.email)
            .field("reset_pending", &self.reset_token_hash.is_some())
            .finish()
    }
}

/// Input to `CredentialStore::create`; the store assigns the id.
#[derive(Clone)]
pub struct NewUser {
    pub role: Role,
    pub username: String,
    pub email: String,
    pub password_hash: String,
    pub salt: String,
}

/// Refresh ledger entry
#[derive(Debug, Clone, PartialEq)]
pub struct RefreshTokenEntry {
    pub token_hash: String,
    pub user_id: Uuid,
    pub created_at: DateTime<Utc>,
}
