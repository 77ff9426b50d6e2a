/// Authentication Routes
///
/// Registration, login, password reset, refresh-token exchange and
/// revocation, and access-token validation.

use actix_web::{web, HttpRequest, HttpResponse};
use serde::{Deserialize, Serialize};

use crate::auth::{AuthService, Claims, Registration, TokenPair};
use crate::email_client::ResetNotifier;
use crate::error::{AppError, ErrorContext};
use crate::store::Role;
use crate::validators::{
    is_valid_email, is_valid_username, parse_role, required, validate_password,
};

const TOKEN_TYPE: &str = "Bearer";

/// User registration request
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterRequest {
    pub role: Option<String>,
    pub username: Option<String>,
    pub email: Option<String>,
    pub password: Option<String>,
}

/// User login request
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginRequest {
    pub username: Option<String>,
    pub password: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ForgotPasswordRequest {
    pub email: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResetPasswordRequest {
    #[serde(alias = "password")]
    pub new_password: Option<String>,
}

/// Body shared by refresh and revoke
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RefreshTokenRequest {
    pub refresh_token: Option<String>,
}

/// Token pair returned by register and login
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthResponse {
    pub access_token: String,
    pub refresh_token: String,
    pub token_type: String,
    pub expires_in: i64,
}

impl AuthResponse {
    fn new(pair: TokenPair, expires_in: i64) -> Self {
        Self {
            access_token: pair.access_token,
            refresh_token: pair.refresh_token,
            token_type: TOKEN_TYPE.to_string(),
            expires_in,
        }
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AccessTokenResponse {
    pub access_token: String,
    pub token_type: String,
    pub expires_in: i64,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidateResponse {
    pub subject_id: String,
    pub role: Role,
    pub issued_at: i64,
    pub expires_at: i64,
}

#[derive(Serialize)]
pub struct MessageResponse {
    pub message: String,
}

impl MessageResponse {
    fn new(message: &str) -> Self {
        Self {
            message: message.to_string(),
        }
    }
}

/// POST /auth/register
///
/// # Validation
/// - Username 1-64 chars, no control characters
/// - Email must be a valid address
/// - Password 8-128 chars
/// - Role, if given, is `admin` or `customer`
///
/// # Errors
/// - 400: Validation errors
/// - 409: Username or email already registered
/// - 500: Internal server error
pub async fn register(
    req: HttpRequest,
    form: web::Json<RegisterRequest>,
    service: web::Data<AuthService>,
) -> Result<HttpResponse, AppError> {
    let context = ErrorContext::for_request(&req, "user_registration");
    let form = form.into_inner();

    let role = parse_role(form.role.as_deref())?;
    let username = is_valid_username(required(&form.username, "username")?)?;
    let email = is_valid_email(required(&form.email, "email")?)?;
    let password = required(&form.password, "password")?;
    validate_password(password)?;

    let (user, pair) = service
        .register(Registration {
            role,
            username,
            email,
            password: password.to_string(),
        })
        .await?;

    tracing::info!(
        request_id = %context.request_id,
        operation = %context.operation,
        user_id = %user.id,
        "User registered successfully"
    );

    Ok(HttpResponse::Created().json(AuthResponse::new(
        pair,
        service.tokens().access_token_expiry(),
    )))
}

/// POST /auth/login
///
/// # Errors
/// - 400: Missing username or password
/// - 401: Invalid credentials (unknown user and wrong password look the same)
/// - 500: Internal server error
pub async fn login(
    req: HttpRequest,
    form: web::Json<LoginRequest>,
    service: web::Data<AuthService>,
) -> Result<HttpResponse, AppError> {
    let context = ErrorContext::for_request(&req, "user_login");

    let username = required(&form.username, "username")?.trim();
    let password = required(&form.password, "password")?;

    let (user, pair) = service.login(username, password).await?;

    tracing::info!(
        request_id = %context.request_id,
        operation = %context.operation,
        user_id = %user.id,
        "User logged in successfully"
    );

    Ok(HttpResponse::Created().json(AuthResponse::new(
        pair,
        service.tokens().access_token_expiry(),
    )))
}

/// POST /auth/forgot-password
///
/// Issues a reset token and mails it to the account's address.
///
/// # Errors
/// - 400: Missing or malformed email
/// - 404: No account with that email
/// - 500: Store or mail delivery failure
pub async fn forgot_password(
    req: HttpRequest,
    form: web::Json<ForgotPasswordRequest>,
    service: web::Data<AuthService>,
    notifier: web::Data<dyn ResetNotifier>,
) -> Result<HttpResponse, AppError> {
    let context = ErrorContext::for_request(&req, "forgot_password");

    let email = is_valid_email(required(&form.email, "email")?)?;
    let ticket = service.request_password_reset(&email).await?;
    notifier.send_password_reset(&ticket).await?;

    tracing::info!(
        request_id = %context.request_id,
        operation = %context.operation,
        user_id = %ticket.user_id,
        "Password reset requested"
    );

    Ok(HttpResponse::Ok().json(MessageResponse::new(
        "Password reset instructions sent",
    )))
}

/// POST /auth/reset-password/{token}
///
/// # Errors
/// - 400: Invalid or expired reset token, or password policy violation
/// - 500: Internal server error
pub async fn reset_password(
    req: HttpRequest,
    path: web::Path<String>,
    form: web::Json<ResetPasswordRequest>,
    service: web::Data<AuthService>,
) -> Result<HttpResponse, AppError> {
    let context = ErrorContext::for_request(&req, "reset_password");
    let token = path.into_inner();

    let new_password = required(&form.new_password, "newPassword")?;
    validate_password(new_password)?;

    service.reset_password(&token, new_password).await?;

    tracing::info!(
        request_id = %context.request_id,
        operation = %context.operation,
        "Password reset completed"
    );

    Ok(HttpResponse::Ok().json(MessageResponse::new("Password has been reset")))
}

/// POST /auth/refresh
///
/// Two-phase check: the token must verify and still be in the ledger.
/// The refresh token itself is not rotated.
///
/// # Errors
/// - 400: Missing or malformed token
/// - 401: Refresh token expired
/// - 404: Token revoked or unknown
/// - 500: Internal server error
pub async fn refresh(
    req: HttpRequest,
    form: web::Json<RefreshTokenRequest>,
    service: web::Data<AuthService>,
) -> Result<HttpResponse, AppError> {
    let context = ErrorContext::for_request(&req, "token_refresh");

    let refresh_token = required(&form.refresh_token, "refreshToken")?;
    let access_token = service.refresh(refresh_token.trim()).await?;

    tracing::info!(
        request_id = %context.request_id,
        operation = %context.operation,
        "Token refreshed successfully"
    );

    Ok(HttpResponse::Ok().json(AccessTokenResponse {
        access_token,
        token_type: TOKEN_TYPE.to_string(),
        expires_in: service.tokens().access_token_expiry(),
    }))
}

/// POST /auth/revoke
///
/// # Errors
/// - 400: Missing token
/// - 404: Token not in the ledger
pub async fn revoke(
    req: HttpRequest,
    form: web::Json<RefreshTokenRequest>,
    service: web::Data<AuthService>,
) -> Result<HttpResponse, AppError> {
    let context = ErrorContext::for_request(&req, "token_revoke");

    let refresh_token = required(&form.refresh_token, "refreshToken")?;
    service.revoke(refresh_token.trim()).await?;

    tracing::info!(
        request_id = %context.request_id,
        operation = %context.operation,
        "Refresh token revoked"
    );

    Ok(HttpResponse::Ok().json(MessageResponse::new("Refresh token revoked")))
}

/// POST /auth/validate
///
/// **Requires a valid access token**; claims are injected by `JwtMiddleware`.
pub async fn validate(claims: web::ReqData<Claims>) -> Result<HttpResponse, AppError> {
    let claims = claims.into_inner();
    let subject_id = claims.user_id()?;

    Ok(HttpResponse::Ok().json(ValidateResponse {
        subject_id: subject_id.to_string(),
        role: claims.role,
        issued_at: claims.iat,
        expires_at: claims.exp,
    }))
}
