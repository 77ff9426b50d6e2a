/// JWT Token Issuance and Validation
///
/// Access and refresh tokens are both HS256 JWTs. Signing always uses the
/// current secret; validation accepts any trusted secret so keys can be
/// rotated without invalidating outstanding tokens.

use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use thiserror::Error;
use uuid::Uuid;

use crate::auth::claims::{Claims, TokenKind};
use crate::configuration::JwtSettings;
use crate::error::{AppError, AuthError, ConfigError};
use crate::store::Role;

/// Token verification failures
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum TokenError {
    #[error("token signature does not verify against any trusted key")]
    InvalidSignature,
    #[error("token has expired")]
    Expired,
    /// Undecodable, wrong issuer, or the wrong kind of token
    #[error("token is malformed")]
    Malformed,
}

impl From<TokenError> for AppError {
    fn from(err: TokenError) -> Self {
        match err {
            TokenError::Expired => AppError::Auth(AuthError::TokenExpired),
            TokenError::InvalidSignature | TokenError::Malformed => {
                AppError::Auth(AuthError::InvalidToken)
            }
        }
    }
}

/// Access/refresh pair returned by register and login
#[derive(Debug, Clone)]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: String,
}

/// Mints and verifies signed tokens
pub struct TokenIssuer {
    encoding_key: EncodingKey,
    decoding_keys: Vec<DecodingKey>,
    issuer: String,
    access_token_expiry: i64,
    refresh_token_expiry: i64,
}

impl TokenIssuer {
    /// Build the issuer from configuration
    ///
    /// # Errors
    /// Returns error if the secret is empty or a TTL is not positive
    pub fn new(config: &JwtSettings) -> Result<Self, ConfigError> {
        if config.secret.trim().is_empty() {
            return Err(ConfigError::MissingRequired("jwt.secret".to_string()));
        }
        if config.access_token_expiry <= 0 || config.refresh_token_expiry <= 0 {
            return Err(ConfigError::InvalidValue(
                "jwt token expiries must be positive".to_string(),
            ));
        }

        let decoding_keys = std::iter::once(&config.secret)
            .chain(config.previous_secrets.iter().filter(|s| !s.trim().is_empty()))
            .map(|secret| DecodingKey::from_secret(secret.as_bytes()))
            .collect();

        Ok(Self {
            encoding_key: EncodingKey::from_secret(config.secret.as_bytes()),
            decoding_keys,
            issuer: config.issuer.clone(),
            access_token_expiry: config.access_token_expiry,
            refresh_token_expiry: config.refresh_token_expiry,
        })
    }

    /// Access token lifetime in seconds
    pub fn access_token_expiry(&self) -> i64 {
        self.access_token_expiry
    }

    pub fn issue_access(&self, user_id: Uuid, role: Role) -> Result<String, AppError> {
        let claims = Claims::new(
            user_id,
            role,
            TokenKind::Access,
            self.access_token_expiry,
            self.issuer.clone(),
        );
        self.sign(&claims)
    }

    pub fn issue_pair(&self, user_id: Uuid, role: Role) -> Result<TokenPair, AppError> {
        let refresh_claims = Claims::new(
            user_id,
            role,
            TokenKind::Refresh,
            self.refresh_token_expiry,
            self.issuer.clone(),
        );

        Ok(TokenPair {
            access_token: self.issue_access(user_id, role)?,
            refresh_token: self.sign(&refresh_claims)?,
        })
    }

    pub(crate) fn sign(&self, claims: &Claims) -> Result<String, AppError> {
        encode(&Header::new(Algorithm::HS256), claims, &self.encoding_key)
            .map_err(|e| AppError::Internal(format!("Token generation failed: {}", e)))
    }

    /// Verify signature, issuer, expiry and token kind
    ///
    /// # Errors
    /// - `InvalidSignature` if no trusted key verifies the token
    /// - `Expired` if the token is past `exp`
    /// - `Malformed` for anything else
    pub fn validate(&self, token: &str, expected: TokenKind) -> Result<Claims, TokenError> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.set_issuer(&[&self.issuer]);
        validation.leeway = 0;

        for key in &self.decoding_keys {
            match decode::<Claims>(token, key, &validation) {
                Ok(data) if data.claims.typ == expected => return Ok(data.claims),
                Ok(data) => {
                    tracing::warn!(kind = ?data.claims.typ, "Token presented with the wrong kind");
                    return Err(TokenError::Malformed);
                }
                Err(e) => match e.kind() {
                    ErrorKind::InvalidSignature => continue,
                    // Signature already verified at this point
                    ErrorKind::ExpiredSignature => return Err(TokenError::Expired),
                    _ => {
                        tracing::debug!(error = %e, "JWT rejected");
                        return Err(TokenError::Malformed);
                    }
                },
            }
        }

        Err(TokenError::InvalidSignature)
    }
}
