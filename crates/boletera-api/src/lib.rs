//! # boletera-api
//!
//! HTTP composition layer for the boleta emission service.
//!
//! This crate provides the API surface, handling:
//!
//! - **Routing**: the `/api/boletas` endpoint family
//! - **Service Wiring**: store, gateway client and notifier composition
//! - **Configuration**: `BOLETERA_*` environment variables
//! - **Observability**: request tracing and health checks
//!
//! ## Design Principles
//!
//! This crate is a **thin composition layer** with no domain policy.
//! Allocation, emission and alerting live in `boletera-core`.
//!
//! ## Endpoints
//!
//! ```text
//! GET  /health                        - Health check
//! GET  /api/boletas/folios-restantes  - Remaining folio capacity
//! GET  /api/boletas/info-caf          - Loaded CAF ranges
//! POST /api/boletas/enviar            - Emit one boleta
//! POST /api/boletas/enviar-lote       - Emit a batch boleta
//! POST /api/boletas/solicitar-folios  - Request a fresh CAF
//! ```

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(rust_2018_idioms)]
#![warn(clippy::pedantic)]

pub mod config;
pub mod error;
pub mod gateway_client;
pub mod notifier;
pub mod openapi;
pub mod routes;
pub mod server;

/// Prelude module for convenient imports.
pub mod prelude {
    pub use crate::config::Config;
    pub use crate::error::{ApiError, ApiResult};
    pub use crate::gateway_client::SimpleApiClient;
    pub use crate::notifier::WebhookNotifier;
    pub use crate::server::{AppState, Server};
}
