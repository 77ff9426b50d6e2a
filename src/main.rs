use std::net::TcpListener;
use std::sync::Arc;

use identity_service::auth::{AuthService, TokenIssuer};
use identity_service::configuration::{get_configuration, StoreBackend};
use identity_service::email_client::{EmailClient, ResetNotifier};
use identity_service::startup::run;
use identity_service::store::{CredentialStore, InMemoryStore, PgStore, RefreshTokenStore};
use identity_service::telemetry::init_telemetry;

fn startup_error(kind: std::io::ErrorKind, message: &str) -> std::io::Error {
    std::io::Error::new(kind, message.to_string())
}

#[tokio::main]
async fn main() -> std::io::Result<()> {
    dotenvy::dotenv().ok();
    init_telemetry("info");

    tracing::info!("Starting application");

    let configuration = match get_configuration() {
        Ok(config) => {
            tracing::info!("Configuration loaded successfully");
            config
        }
        Err(e) => {
            tracing::error!("Failed to read configuration: {}", e);
            return Err(startup_error(
                std::io::ErrorKind::InvalidInput,
                "Configuration error",
            ));
        }
    };

    let (users, refresh_tokens): (Arc<dyn CredentialStore>, Arc<dyn RefreshTokenStore>) =
        match configuration.database.backend {
            StoreBackend::Postgres => {
                tracing::info!("Attempting to connect to database");
                let store = PgStore::connect(&configuration.database).await.map_err(|e| {
                    tracing::error!("Failed to create connection pool: {}", e);
                    startup_error(
                        std::io::ErrorKind::ConnectionRefused,
                        "Database connection error",
                    )
                })?;
                store.migrate().await.map_err(|e| {
                    tracing::error!("Failed to run migrations: {}", e);
                    startup_error(std::io::ErrorKind::Other, "Database migration error")
                })?;
                tracing::info!("Database connection pool created successfully");
                let store = Arc::new(store);
                (store.clone(), store)
            }
            StoreBackend::Memory => {
                tracing::warn!("Using in-memory store; data is lost on restart");
                let store = Arc::new(InMemoryStore::new());
                (store.clone(), store)
            }
        };

    let tokens = TokenIssuer::new(&configuration.jwt).map_err(|e| {
        tracing::error!("Invalid JWT configuration: {}", e);
        startup_error(std::io::ErrorKind::InvalidInput, "JWT configuration error")
    })?;

    let email_client = EmailClient::from_settings(&configuration.email).map_err(|e| {
        tracing::error!("Invalid email configuration: {}", e);
        startup_error(std::io::ErrorKind::InvalidInput, "Email configuration error")
    })?;
    let notifier: Arc<dyn ResetNotifier> = Arc::new(email_client);

    let service = AuthService::new(users, refresh_tokens, Arc::new(tokens));

    let address = format!(
        "{}:{}",
        configuration.application.host, configuration.application.port
    );
    let listener = TcpListener::bind(&address)?;
    tracing::info!("Server listening on: {}", address);

    let server = run(listener, service, notifier, configuration.rate_limit)?;
    server.await
}
