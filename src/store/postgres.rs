use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use uuid::Uuid;

use super::{retention_cutoff, CredentialStore, NewUser, RefreshTokenEntry, RefreshTokenStore, Role, User};
use crate::configuration::DatabaseSettings;
use crate::error::StoreError;

/// Postgres-backed credential store and refresh ledger
///
/// Uniqueness of username, email and ledger digests is enforced by
/// unique indexes (see `migrations/`), so concurrent writers are
/// arbitrated by the database.
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

#[derive(sqlx::FromRow)]
struct UserRow {
    id: Uuid,
    role: String,
    username: String,
    email: String,
    password_hash: String,
    salt: String,
    reset_token_hash: Option<String>,
    reset_token_expires_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<UserRow> for User {
    type Error = StoreError;

    fn try_from(row: UserRow) -> Result<Self, Self::Error> {
        let role = row.role.parse::<Role>().map_err(StoreError::Query)?;
        Ok(User {
            id: row.id,
            role,
            username: row.username,
            email: row.email,
            password_hash: row.password_hash,
            salt: row.salt,
            reset_token_hash: row.reset_token_hash,
            reset_token_expires_at: row.reset_token_expires_at,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

const USER_COLUMNS: &str = "id, role, username, email, password_hash, salt, \
    reset_token_hash, reset_token_expires_at, created_at, updated_at";

impl PgStore {
    /// Open a pool using the configured size and acquire timeout
    pub async fn connect(settings: &DatabaseSettings) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(settings.max_connections)
            .acquire_timeout(settings.acquire_timeout())
            .connect(&settings.connection_string())
            .await?;
        Ok(Self { pool })
    }

    pub async fn migrate(&self) -> Result<(), StoreError> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| StoreError::Query(format!("migration failed: {}", e)))
    }

    async fn find_user_by(&self, column: &str, value: &str) -> Result<Option<User>, StoreError> {
        let sql = format!("SELECT {} FROM users WHERE {} = $1", USER_COLUMNS, column);
        sqlx::query_as::<_, UserRow>(&sql)
            .bind(value)
            .fetch_optional(&self.pool)
            .await?
            .map(User::try_from)
            .transpose()
    }
}

#[async_trait]
impl CredentialStore for PgStore {
    async fn find_by_username(&self, username: &str) -> Result<Option<User>, StoreError> {
        self.find_user_by("username", username).await
    }

    async fn find_by_email(&self, email: &str) -> Result<Option<User>, StoreError> {
        self.find_user_by("email", email).await
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<User>, StoreError> {
        let sql = format!("SELECT {} FROM users WHERE id = $1", USER_COLUMNS);
        sqlx::query_as::<_, UserRow>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .map(User::try_from)
            .transpose()
    }

    async fn find_by_reset_token(&self, token_hash: &str) -> Result<Option<User>, StoreError> {
        self.find_user_by("reset_token_hash", token_hash).await
    }

    async fn create(&self, user: NewUser) -> Result<User, StoreError> {
        let now = Utc::now();
        let sql = format!(
            r#"
            INSERT INTO users (id, role, username, email, password_hash, salt, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $7)
            RETURNING {}
            "#,
            USER_COLUMNS
        );

        let row = sqlx::query_as::<_, UserRow>(&sql)
            .bind(Uuid::new_v4())
            .bind(user.role.as_str())
            .bind(&user.username)
            .bind(&user.email)
            .bind(&user.password_hash)
            .bind(&user.salt)
            .bind(now)
            .fetch_one(&self.pool)
            .await?;

        User::try_from(row)
    }

    async fn update(&self, user: &User) -> Result<(), StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE users
            SET role = $2, username = $3, email = $4, password_hash = $5, salt = $6,
                reset_token_hash = $7, reset_token_expires_at = $8, updated_at = $9
            WHERE id = $1
            "#,
        )
        .bind(user.id)
        .bind(user.role.as_str())
        .bind(&user.username)
        .bind(&user.email)
        .bind(&user.password_hash)
        .bind(&user.salt)
        .bind(&user.reset_token_hash)
        .bind(user.reset_token_expires_at)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }

    async fn delete_user(&self, id: Uuid) -> Result<bool, StoreError> {
        // refresh_tokens rows go with it (ON DELETE CASCADE)
        let result = sqlx::query("DELETE FROM users WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn set_reset_token(
        &self,
        id: Uuid,
        token_hash: &str,
        expires_at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE users
            SET reset_token_hash = $2, reset_token_expires_at = $3, updated_at = $4
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(token_hash)
        .bind(expires_at)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }

    async fn clear_reset_token(&self, id: Uuid, token_hash: &str) -> Result<bool, StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE users
            SET reset_token_hash = NULL, reset_token_expires_at = NULL, updated_at = $3
            WHERE id = $1 AND reset_token_hash = $2
            "#,
        )
        .bind(id)
        .bind(token_hash)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn complete_reset(
        &self,
        id: Uuid,
        token_hash: &str,
        password_hash: &str,
        salt: &str,
    ) -> Result<bool, StoreError> {
        // The token predicate makes this a compare-and-set: one consumer wins.
        let result = sqlx::query(
            r#"
            UPDATE users
            SET password_hash = $2, salt = $3,
                reset_token_hash = NULL, reset_token_expires_at = NULL, updated_at = $4
            WHERE id = $1 AND reset_token_hash = $5
            "#,
        )
        .bind(id)
        .bind(password_hash)
        .bind(salt)
        .bind(Utc::now())
        .bind(token_hash)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }
}

#[async_trait]
impl RefreshTokenStore for PgStore {
    async fn insert(&self, entry: &RefreshTokenEntry) -> Result<(), StoreError> {
        // Retention sweep piggybacks on writes.
        let purged = sqlx::query("DELETE FROM refresh_tokens WHERE created_at <= $1")
            .bind(retention_cutoff(Utc::now()))
            .execute(&self.pool)
            .await?
            .rows_affected();
        if purged > 0 {
            tracing::debug!(purged = purged, "Purged refresh tokens past retention");
        }

        sqlx::query(
            r#"
            INSERT INTO refresh_tokens (token_hash, user_id, created_at)
            VALUES ($1, $2, $3)
            "#,
        )
        .bind(&entry.token_hash)
        .bind(entry.user_id)
        .bind(entry.created_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn find(&self, token_hash: &str) -> Result<Option<RefreshTokenEntry>, StoreError> {
        let row = sqlx::query_as::<_, (String, Uuid, DateTime<Utc>)>(
            r#"
            SELECT token_hash, user_id, created_at
            FROM refresh_tokens
            WHERE token_hash = $1 AND created_at > $2
            "#,
        )
        .bind(token_hash)
        .bind(retention_cutoff(Utc::now()))
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|(token_hash, user_id, created_at)| RefreshTokenEntry {
            token_hash,
            user_id,
            created_at,
        }))
    }

    async fn delete(&self, token_hash: &str) -> Result<bool, StoreError> {
        let result =
            sqlx::query("DELETE FROM refresh_tokens WHERE token_hash = $1 AND created_at > $2")
                .bind(token_hash)
                .bind(retention_cutoff(Utc::now()))
                .execute(&self.pool)
                .await?;
        Ok(result.rows_affected() > 0)
    }
}
