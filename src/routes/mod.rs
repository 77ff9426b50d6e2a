mod auth;
mod health_check;

pub use auth::{forgot_password, login, refresh, register, reset_password, revoke, validate};
pub use health_check::health_check;
