//! API server implementation.
//!
//! Wires the emission pipeline into an axum router and serves it. This
//! layer holds no domain policy: allocation, emission and alerting all
//! live in `boletera-core`.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::Router;
use axum::http::{HeaderValue, Method, header};
use axum::response::IntoResponse;
use axum::routing::get;
use serde::Serialize;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;

use boletera_core::alert::AlertNotifier;
use boletera_core::dte::CertificateRef;
use boletera_core::folio::FolioAllocator;
use boletera_core::gateway::TaxGateway;
use boletera_core::pipeline::EmissionPipeline;
use boletera_core::store::ReceiptStore;
use boletera_core::{Error, Result};

use crate::config::{Config, CorsConfig};
use crate::routes;

/// Health check response.
#[derive(Debug, Serialize)]
#[cfg_attr(test, derive(serde::Deserialize))]
pub struct HealthResponse {
    /// Service status.
    pub status: String,
}

/// Shared application state for all request handlers.
#[derive(Clone)]
pub struct AppState {
    /// Server configuration.
    pub config: Config,
    /// Emission pipeline (allocation, gateway round-trip, persistence).
    pipeline: EmissionPipeline,
    /// Gateway client, also used directly by the folio-request endpoint.
    gateway: Arc<dyn TaxGateway>,
}

impl std::fmt::Debug for AppState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppState")
            .field("config", &self.config)
            .field("pipeline", &"<EmissionPipeline>")
            .field("gateway", &"<TaxGateway>")
            .finish()
    }
}

impl AppState {
    /// Creates application state from configuration and collaborators.
    #[must_use]
    pub fn new(
        config: Config,
        store: Arc<dyn ReceiptStore>,
        gateway: Arc<dyn TaxGateway>,
        notifier: Arc<dyn AlertNotifier>,
    ) -> Self {
        let certificate = CertificateRef {
            rut: config.gateway.certificate_rut.clone(),
            password: config.gateway.certificate_password.clone(),
        };
        let pipeline = EmissionPipeline::new(
            store,
            Arc::clone(&gateway),
            notifier,
            FolioAllocator::new(config.caf_directory.clone()),
            config.issuer.to_identity(),
            certificate,
        )
        .with_alert_threshold(config.alert_threshold);

        Self {
            config,
            pipeline,
            gateway,
        }
    }

    /// The emission pipeline.
    #[must_use]
    pub fn pipeline(&self) -> &EmissionPipeline {
        &self.pipeline
    }

    /// The gateway client.
    #[must_use]
    pub fn gateway(&self) -> Arc<dyn TaxGateway> {
        Arc::clone(&self.gateway)
    }
}

/// Health check endpoint handler.
///
/// Returns 200 OK if the service is alive. Shallow: does not verify the
/// CAF directory or database.
async fn health() -> impl IntoResponse {
    axum::Json(HealthResponse {
        status: "ok".to_string(),
    })
}

fn cors_layer(config: &CorsConfig) -> Option<CorsLayer> {
    if config.allowed_origins.is_empty() {
        return None;
    }

    let layer = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST])
        .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION])
        .max_age(std::time::Duration::from_secs(config.max_age_seconds));

    let layer = if config.allowed_origins.iter().any(|o| o == "*") {
        layer.allow_origin(Any)
    } else {
        let origins: Vec<HeaderValue> = config
            .allowed_origins
            .iter()
            .filter_map(|origin| HeaderValue::from_str(origin).ok())
            .collect();
        layer.allow_origin(AllowOrigin::list(origins))
    };
    Some(layer)
}

/// Boletera API server.
pub struct Server {
    state: Arc<AppState>,
}

impl Server {
    /// Creates a server around prepared application state.
    #[must_use]
    pub fn new(state: AppState) -> Self {
        Self {
            state: Arc::new(state),
        }
    }

    /// Builds the full router, for serving or for in-process tests.
    #[must_use]
    pub fn router(&self) -> Router {
        let mut router = Router::new()
            .route("/health", get(health))
            .nest("/api/boletas", routes::boleta_routes())
            .with_state(Arc::clone(&self.state))
            .layer(TraceLayer::new_for_http());

        if let Some(cors) = cors_layer(&self.state.config.cors) {
            router = router.layer(cors);
        }
        router
    }

    /// Binds the configured port and serves until shutdown.
    ///
    /// # Errors
    ///
    /// Returns an error when the port cannot be bound or the server loop
    /// fails.
    pub async fn serve(self) -> Result<()> {
        let addr = SocketAddr::from(([0, 0, 0, 0], self.state.config.http_port));
        let listener = tokio::net::TcpListener::bind(addr)
            .await
            .map_err(|e| Error::internal(format!("cannot bind {addr}: {e}")))?;
        tracing::info!(%addr, "boletera-api listening");

        axum::serve(listener, self.router())
            .await
            .map_err(|e| Error::internal(format!("server loop failed: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cors_disabled_when_no_origins() {
        assert!(cors_layer(&CorsConfig::default()).is_none());
    }

    #[test]
    fn cors_wildcard_builds_layer() {
        let config = CorsConfig {
            allowed_origins: vec!["*".to_string()],
            max_age_seconds: 60,
        };
        assert!(cors_layer(&config).is_some());
    }

    #[test]
    fn cors_explicit_origins_build_layer() {
        let config = CorsConfig {
            allowed_origins: vec!["https://caja.terminal.cl".to_string()],
            max_age_seconds: 60,
        };
        assert!(cors_layer(&config).is_some());
    }
}
