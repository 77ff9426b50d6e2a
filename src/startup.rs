use actix_web::dev::Server;
use actix_web::{web, App, HttpServer};
use std::net::TcpListener;
use std::sync::Arc;

use crate::auth::AuthService;
use crate::configuration::RateLimitSettings;
use crate::email_client::ResetNotifier;
use crate::error::{AppError, ValidationError};
use crate::middleware::{JwtMiddleware, RateLimitMiddleware, RateLimiter, RequestLogger};
use crate::routes::{
    forgot_password, health_check, login, refresh, register, reset_password, revoke, validate,
};

pub fn run(
    listener: TcpListener,
    service: AuthService,
    notifier: Arc<dyn ResetNotifier>,
    rate_limit: RateLimitSettings,
) -> Result<Server, std::io::Error> {
    let tokens = service.token_issuer();
    let service = web::Data::new(service);
    let notifier: web::Data<dyn ResetNotifier> = web::Data::from(notifier);
    // One limiter shared by every worker.
    let limiter = Arc::new(RateLimiter::new(&rate_limit));

    let server = HttpServer::new(move || {
        App::new()
            .wrap(RequestLogger)
            .app_data(service.clone())
            .app_data(notifier.clone())
            .app_data(web::JsonConfig::default().error_handler(|err, _req| {
                AppError::from(ValidationError::MalformedBody(err.to_string())).into()
            }))
            .route("/health_check", web::get().to(health_check))
            .service(
                web::scope("/auth")
                    .wrap(RateLimitMiddleware::new(limiter.clone()))
                    .route("/register", web::post().to(register))
                    .route("/login", web::post().to(login))
                    .route("/forgot-password", web::post().to(forgot_password))
                    .route("/reset-password/{token}", web::post().to(reset_password))
                    .route("/refresh", web::post().to(refresh))
                    .route("/revoke", web::post().to(revoke))
                    .service(
                        web::resource("/validate")
                            .wrap(JwtMiddleware::new(tokens.clone()))
                            .route(web::post().to(validate)),
                    ),
            )
    })
    .listen(listener)?
    .run();

    Ok(server)
}
