//! Application startup and lifecycle management.

use crate::config::DispatchConfig;
use crate::handlers::{health, items, orders};
use crate::inventory::{DeviceCategoryResolver, InventoryCatalog};
use crate::middleware::http_metrics_middleware;
use crate::policy::{AmendPolicy, AmendWindowPolicy, Geocoder, NoopGeocoder};
use crate::services::{metrics::init_metrics, Database};
use axum::{
    middleware,
    routing::{get, post, put},
    Router,
};
use service_core::error::AppError;
use service_core::middleware::request_id_middleware;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub config: DispatchConfig,
    pub db: Arc<Database>,
    pub amend_policy: Arc<dyn AmendPolicy>,
    pub geocoder: Arc<dyn Geocoder>,
    pub resolver: Arc<dyn DeviceCategoryResolver>,
}

/// Build the HTTP router over `state`.
pub fn router(state: AppState) -> Router {
    let request_timeout = state.config.common.request_timeout();

    Router::new()
        .route("/health", get(health::health_check))
        .route("/ready", get(health::readiness_check))
        .route("/metrics", get(health::metrics_handler))
        .route("/orders", post(orders::create_order))
        .route("/orders/import", post(orders::import_orders))
        .route(
            "/orders/:order_id",
            get(orders::get_order).patch(orders::update_order),
        )
        .route("/orders/:order_id/assign", post(orders::assign_order))
        .route(
            "/orders/:order_id/completion",
            post(orders::complete_order).put(orders::amend_completion),
        )
        .route(
            "/admin/orders/:order_id/completion",
            put(orders::admin_edit_completion),
        )
        .route("/items", post(items::receive_item))
        .route("/items/:item_id/issue", post(items::issue_item))
        .route("/items/:item_id/ledger", get(items::item_ledger))
        .route("/items/:item_id/projection", get(items::item_projection))
        .route("/materials", post(items::define_material))
        .route_layer(middleware::from_fn(http_metrics_middleware))
        .layer(TraceLayer::new_for_http())
        .layer(middleware::from_fn(request_id_middleware))
        .layer(TimeoutLayer::new(request_timeout))
        .with_state(state)
}

/// Application container for managing server lifecycle.
pub struct Application {
    http_port: u16,
    http_listener: TcpListener,
    state: AppState,
}

impl Application {
    /// Build the application with the given configuration.
    pub async fn build(config: DispatchConfig) -> Result<Self, AppError> {
        Self::build_internal(config, true).await
    }

    /// Build the application without running migrations.
    /// Use this in tests when migrations are already applied by the test harness.
    pub async fn build_without_migrations(config: DispatchConfig) -> Result<Self, AppError> {
        Self::build_internal(config, false).await
    }

    async fn build_internal(
        config: DispatchConfig,
        run_migrations: bool,
    ) -> Result<Self, AppError> {
        init_metrics();

        let db = Database::new(
            &config.database.url,
            config.database.max_connections,
            config.database.min_connections,
        )
        .await
        .map_err(|e| {
            tracing::error!(error = %e, "Failed to connect to PostgreSQL");
            e
        })?;

        if run_migrations {
            db.run_migrations().await.map_err(|e| {
                tracing::error!(error = %e, "Failed to run migrations");
                e
            })?;
        }

        let state = AppState {
            amend_policy: Arc::new(AmendWindowPolicy::new(config.completion.amend_window())),
            geocoder: Arc::new(NoopGeocoder),
            resolver: Arc::new(InventoryCatalog),
            config: config.clone(),
            db: Arc::new(db),
        };

        let http_addr = SocketAddr::from(([0, 0, 0, 0], config.common.port));
        let http_listener = TcpListener::bind(http_addr).await.map_err(|e| {
            tracing::error!(error = %e, addr = %http_addr, "Failed to bind HTTP listener");
            AppError::from(e)
        })?;
        let http_port = http_listener.local_addr()?.port();

        tracing::info!(http_port = http_port, "Dispatch service listener bound");

        Ok(Self {
            http_port,
            http_listener,
            state,
        })
    }

    /// Get the HTTP port the server is listening on.
    pub fn http_port(&self) -> u16 {
        self.http_port
    }

    /// Get a reference to the database.
    pub fn db(&self) -> &Database {
        &self.state.db
    }

    /// Run the application until stopped.
    pub async fn run_until_stopped(self) -> std::io::Result<()> {
        let router = router(self.state);

        tracing::info!(
            service = "dispatch-service",
            version = env!("CARGO_PKG_VERSION"),
            http_port = self.http_port,
            "Service ready to accept connections"
        );

        axum::serve(self.http_listener, router).await.map_err(|e| {
            tracing::error!(error = %e, "HTTP server error");
            std::io::Error::other(format!("HTTP server error: {}", e))
        })
    }
}
