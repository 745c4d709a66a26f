//! Application startup and lifecycle management.

use crate::config::{Config, ProviderKind};
use crate::handlers;
use crate::providers::{PaymentProvider, SquareClient, StripeClient};
use crate::services::{Database, PendingPaymentSweeper};
use axum::{
    middleware::from_fn,
    routing::{get, post},
    Router,
};
use dojo_core::error::AppError;
use dojo_core::middleware::{request_id_middleware, track_http_metrics};
use secrecy::ExposeSecret;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub db: Database,
    pub provider: Arc<dyn PaymentProvider>,
    pub config: Config,
}

/// Application container for managing server lifecycle.
pub struct Application {
    port: u16,
    listener: TcpListener,
    state: AppState,
}

impl Application {
    /// Build the application with the given configuration.
    pub async fn build(config: Config) -> Result<Self, AppError> {
        let db = Database::new(
            config.database.url.expose_secret(),
            config.database.max_connections,
        )
        .await?;
        db.run_migrations().await?;

        let provider: Arc<dyn PaymentProvider> = match config.provider.kind {
            ProviderKind::Stripe => {
                let client = StripeClient::new(config.provider.stripe.clone());
                if !client.is_configured() {
                    tracing::warn!(
                        "Stripe credentials not configured - session creation will fail"
                    );
                }
                Arc::new(client)
            }
            ProviderKind::Square => {
                let client = SquareClient::new(config.provider.square.clone());
                if !client.is_configured() {
                    tracing::warn!(
                        "Square credentials not configured - session creation will fail"
                    );
                }
                Arc::new(client)
            }
        };
        tracing::info!(provider = provider.name(), "Payment provider initialized");

        let state = AppState {
            db,
            provider,
            config: config.clone(),
        };

        // Port 0 = random port for testing.
        let addr = SocketAddr::from(([0, 0, 0, 0], config.server.port));
        let listener = TcpListener::bind(addr).await.map_err(|e| {
            tracing::error!("Failed to bind listener to {}: {}", addr, e);
            AppError::from(e)
        })?;
        let port = listener.local_addr()?.port();

        tracing::info!("Billing service listening on port {}", port);

        Ok(Self {
            port,
            listener,
            state,
        })
    }

    /// Get the port the server is listening on.
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Get the application state.
    pub fn state(&self) -> AppState {
        self.state.clone()
    }

    /// Run the application until interrupted.
    pub async fn run_until_stopped(self) -> std::io::Result<()> {
        let shutdown = CancellationToken::new();

        let sweeper = PendingPaymentSweeper::new(
            self.state.db.clone(),
            Duration::from_secs(self.state.config.sweeper.interval_secs),
            self.state.config.sweeper.max_age_secs,
        );
        let sweeper_handle = tokio::spawn(sweeper.run(shutdown.clone()));

        let app = build_router(self.state);

        let serve_shutdown = shutdown.clone();
        let result = axum::serve(self.listener, app)
            .with_graceful_shutdown(async move {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {}
                    _ = serve_shutdown.cancelled() => {}
                }
            })
            .await;

        shutdown.cancel();
        let _ = sweeper_handle.await;

        result
    }
}

/// Assemble the router. Request ids are attached outermost so the trace
/// span and metrics both see them.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(handlers::health_check))
        .route("/ready", get(handlers::readiness_check))
        .route("/metrics", get(handlers::metrics_endpoint))
        .route(
            "/payment-sessions",
            post(handlers::payment_sessions::create_payment_session),
        )
        .route(
            "/payments/:payment_id",
            get(handlers::payment_sessions::get_payment),
        )
        .route(
            "/discounts/eligible",
            post(handlers::discounts::eligible_discounts),
        )
        .route(
            "/discounts/validate",
            post(handlers::discounts::validate_discount),
        )
        .route(
            "/webhooks/payments",
            post(handlers::webhooks::payment_webhook),
        )
        .with_state(state)
        .layer(from_fn(track_http_metrics))
        .layer(
            TraceLayer::new_for_http().make_span_with(|request: &axum::http::Request<_>| {
                let request_id = request
                    .headers()
                    .get("x-request-id")
                    .and_then(|value| value.to_str().ok())
                    .unwrap_or("-");

                tracing::info_span!(
                    "http_request",
                    request_id = %request_id,
                    method = %request.method(),
                    uri = %request.uri(),
                )
            }),
        )
        .layer(from_fn(request_id_middleware))
        .layer(CorsLayer::permissive())
}
