mod config;
mod db;
mod models;
mod responses;
mod routes;
mod services;
mod state;

use axum::http::header::CONTENT_TYPE;
use axum::http::{HeaderValue, Method};
use axum::{
    response::{IntoResponse, Response},
    routing::{get, post},
    Router,
};
use config::Config;
use db::billing_repository::BillingRepository;
use db::postgres_billing_repository::PostgresBillingRepository;
use responses::JsonResponse;
use routes::billing::{
    create_checkout, create_portal, get_config, get_status, sync_subscription, webhook,
};
use services::billing::BillingService;
use services::stripe::{LiveStripeService, StripeService};
use sqlx::PgPool;
use std::{net::SocketAddr, sync::Arc};
use tokio::net::TcpListener;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{info, warn, Level};
use tracing_subscriber::FmtSubscriber;

use crate::state::AppState;

#[tokio::main]
async fn main() {
    let subscriber = FmtSubscriber::builder()
        .with_max_level(Level::INFO)
        .finish();
    tracing::subscriber::set_global_default(subscriber).unwrap();

    let config = Arc::new(Config::from_env());

    let pg_pool = establish_connection(&config.database_url).await;
    sqlx::migrate!("./migrations")
        .run(&pg_pool)
        .await
        .expect("Failed to run database migrations");

    let billing_repo =
        Arc::new(PostgresBillingRepository { pool: pg_pool }) as Arc<dyn BillingRepository>;
    let stripe =
        Arc::new(LiveStripeService::from_settings(&config.stripe)) as Arc<dyn StripeService>;

    // Ledger rows older than Stripe's redelivery window are dead weight.
    let prune_repo = billing_repo.clone();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(std::time::Duration::from_secs(24 * 60 * 60));
        loop {
            interval.tick().await;
            let cutoff = time::OffsetDateTime::now_utc() - time::Duration::days(30);
            match prune_repo.prune_processed_events_before(cutoff).await {
                Ok(0) => {}
                Ok(pruned) => info!(pruned, "pruned processed stripe events"),
                Err(err) => warn!(%err, "failed to prune processed stripe events"),
            }
        }
    });

    let state = AppState {
        billing: Arc::new(BillingService::new(billing_repo, stripe)),
        config: config.clone(),
    };

    let cors = CorsLayer::new()
        .allow_origin(config.frontend_origin.parse::<HeaderValue>().unwrap())
        .allow_methods([Method::GET, Method::POST])
        .allow_headers([CONTENT_TYPE])
        .allow_credentials(true);

    // Webhook stays out of CORS concerns: Stripe calls it server-to-server.
    let billing_routes = Router::new()
        .route("/webhook", post(webhook))
        .route("/checkout", post(create_checkout))
        .route("/portal", post(create_portal))
        .route("/status", get(get_status))
        .route("/sync", post(sync_subscription))
        .route("/config", get(get_config));

    let app = Router::new()
        .route("/", get(root))
        .nest("/api/billing", billing_routes)
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(cors);

    let port: u16 = std::env::var("PORT")
        .ok()
        .and_then(|v| v.parse::<u16>().ok())
        .unwrap_or(3000);
    let addr = SocketAddr::from(([127, 0, 0, 1], port));

    let listener = TcpListener::bind(addr).await.unwrap();
    info!("Listening on http://{}", addr);
    axum::serve(listener, app).await.unwrap();
}

/// A simple root route.
async fn root() -> Response {
    JsonResponse::success("Hello, Qamar billing!").into_response()
}

/// Establish a connection to the database and verify it.
async fn establish_connection(database_url: &str) -> PgPool {
    let pool = PgPool::connect(database_url)
        .await
        .expect("Failed to connect to the database");

    sqlx::query("SELECT 1")
        .execute(&pool)
        .await
        .expect("Failed to verify database connection");

    info!("Successfully connected to the database");
    pool
}
