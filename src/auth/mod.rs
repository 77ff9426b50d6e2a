/// Authentication module
///
/// Password hashing, token issuance/validation, the refresh-token
/// ledger, the password reset exchange, and the service that ties
/// them together.

mod claims;
mod jwt;
mod password;
mod refresh_token;
mod reset;
mod service;
mod token_digest;

pub use claims::{Claims, TokenKind};
pub use jwt::{TokenError, TokenIssuer, TokenPair};
pub use password::{
    generate_salt, hash_new_password, hash_password, verify_password, verify_password_offloaded,
    HashedPassword, PBKDF2_ITERATIONS,
};
pub use refresh_token::RefreshLedger;
pub use reset::{ResetExchange, ResetTicket, RESET_TOKEN_TTL_MINUTES};
pub use service::{AuthService, Registration};
