//! HTTP route handlers.

pub mod boletas;

use std::sync::Arc;

use axum::Router;

use crate::server::AppState;

/// `/api/boletas` routes.
pub fn boleta_routes() -> Router<Arc<AppState>> {
    boletas::routes()
}
