mod config;
mod db;
mod error;
mod handlers;
mod middleware;
mod models;
mod services;

use axum::{
    http::{header, HeaderValue, Method},
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::Config;
use crate::db::Database;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub db: Database,
    pub config: Arc<Config>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,fedcm_idp=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting fedcm-idp...");

    // Load configuration
    let config = Config::load()?;
    let config = Arc::new(config);

    // Initialize database
    let db = Database::new(&config.database.path).await?;
    db.run_migrations().await?;
    tracing::info!("Database initialized");

    let state = AppState {
        db: db.clone(),
        config: config.clone(),
    };

    // Abandoned ceremonies and expired logins leave session rows behind;
    // sweep them periodically
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(std::time::Duration::from_secs(600));
        loop {
            interval.tick().await;
            match db::sessions::purge_stale(&db, 24).await {
                Ok(0) => {}
                Ok(purged) => tracing::debug!("Purged {} stale session(s)", purged),
                Err(e) => tracing::error!("Session purge failed: {:?}", e),
            }
        }
    });

    // Build router
    let app = create_router(state);

    // Start server
    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("Server listening on {}", addr);

    axum::serve(listener, app).await?;

    Ok(())
}

fn create_router(state: AppState) -> Router {
    // Credentialed CORS restricted to the registered client origins
    let allowed_origins: Vec<HeaderValue> = state
        .config
        .clients
        .values()
        .filter_map(|c| c.origin.parse().ok())
        .collect();
    let cors = CorsLayer::new()
        .allow_origin(AllowOrigin::list(allowed_origins))
        .allow_methods([Method::GET, Method::POST])
        .allow_headers([header::CONTENT_TYPE])
        .allow_credentials(true);

    Router::new()
        // FedCM discovery
        .route("/.well-known/web-identity", get(handlers::metadata::well_known))
        .route("/fedcm.json", get(handlers::metadata::config_document))
        // FedCM protocol endpoints
        .route("/fedcm/accounts_endpoint", get(handlers::fedcm::accounts))
        .route(
            "/fedcm/client_metadata_endpoint",
            get(handlers::fedcm::client_metadata),
        )
        .route("/fedcm/token_endpoint", post(handlers::fedcm::token))
        .route(
            "/fedcm/revocation_endpoint",
            post(handlers::fedcm::revocation),
        )
        .route("/fedcm/authorize_endpoint", post(handlers::fedcm::authorize))
        // WebAuthn ceremonies
        .route(
            "/api/auth/generate-registration-options",
            post(handlers::passkey::generate_registration_options),
        )
        .route(
            "/api/auth/verify-registration",
            post(handlers::passkey::verify_registration),
        )
        .route(
            "/api/auth/generate-authentication-options",
            post(handlers::passkey::generate_authentication_options),
        )
        .route(
            "/api/auth/verify-authentication",
            post(handlers::passkey::verify_authentication),
        )
        // Password and session management
        .route("/api/auth/signup", post(handlers::auth::signup))
        .route("/api/auth/signin", post(handlers::auth::signin))
        .route("/api/auth/signout", post(handlers::auth::signout))
        .route("/api/auth/remove_client", post(handlers::auth::remove_client))
        .route(
            "/api/auth/expire-session-outofband",
            post(handlers::auth::expire_session_outofband),
        )
        .route("/api/auth/delete-user", post(handlers::auth::delete_user))
        .layer(axum::middleware::from_fn_with_state(
            state.clone(),
            middleware::context::request_context,
        ))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}
