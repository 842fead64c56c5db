//! Boleta emission API routes.
//!
//! ## Routes
//!
//! - `GET  /folios-restantes` - Remaining capacity and selected CAF
//! - `GET  /info-caf` - Every loaded CAF range with resolution data
//! - `POST /enviar` - Emit one boleta (early folio acknowledgment)
//! - `POST /enviar-lote` - Emit a batch boleta
//! - `POST /solicitar-folios` - Request a fresh CAF from the provider
//!
//! Request and response bodies keep the register frontend's Spanish wire
//! keys; everything behind the handlers speaks the core types.

use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use boletera_core::caf::{self, CafRange};
use boletera_core::clock;
use boletera_core::dte::SaleItem;
use boletera_core::pipeline::EmissionOutcome;

use crate::error::{ApiError, ApiResult};
use crate::server::AppState;

/// Creates boleta routes.
pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/folios-restantes", get(folios_restantes))
        .route("/info-caf", get(info_caf))
        .route("/enviar", post(enviar))
        .route("/enviar-lote", post(enviar_lote))
        .route("/solicitar-folios", post(solicitar_folios))
}

// ============================================================================
// Wire types
// ============================================================================

/// CAF resolution data as the frontend expects it.
#[derive(Debug, Serialize, ToSchema)]
pub struct ResolucionCaf {
    /// Resolution date.
    #[serde(rename = "FechaResolucion")]
    pub fecha: String,
    /// Resolution number.
    #[serde(rename = "NumeroResolucion")]
    pub numero: u32,
}

impl ResolucionCaf {
    fn from_range(range: &CafRange) -> Option<Self> {
        range.resolution.as_ref().map(|r| Self {
            fecha: r.date.clone(),
            numero: r.number,
        })
    }
}

/// Response body for `GET /folios-restantes`.
#[derive(Debug, Serialize, ToSchema)]
pub struct FoliosRestantesResponse {
    /// Message set when no CAF covers the next folio.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// File name of the CAF backing the next folio.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub caf: Option<String>,
    /// Last consumed folio, `null` when nothing is assignable.
    #[serde(rename = "ultimoFolio")]
    pub ultimo_folio: Option<u64>,
    /// Folios still assignable across all ranges.
    #[serde(rename = "totalFoliosRestantes")]
    pub total_folios_restantes: u64,
    /// Resolution data of the selected CAF.
    #[serde(rename = "resolucionCAF", skip_serializing_if = "Option::is_none")]
    pub resolucion_caf: Option<ResolucionCaf>,
}

/// One CAF range in `GET /info-caf`.
#[derive(Debug, Serialize, ToSchema)]
pub struct InfoCafEntry {
    /// CAF file name.
    pub archivo: String,
    /// First authorized folio.
    pub desde: u64,
    /// Last authorized folio.
    pub hasta: u64,
    /// Folios the certificate authorizes in total.
    pub total: u64,
    /// Resolution data, when present in the certificate.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resolucion: Option<ResolucionCaf>,
}

/// Response body for `GET /info-caf`.
#[derive(Debug, Serialize, ToSchema)]
pub struct InfoCafResponse {
    /// Every parseable CAF, ascending by starting folio.
    pub cafs: Vec<InfoCafEntry>,
}

/// Request body for `POST /enviar`.
#[derive(Debug, Deserialize, ToSchema)]
pub struct EnviarRequest {
    /// Product description.
    pub nombre: Option<String>,
    /// Gross price in pesos.
    pub precio: Option<i64>,
}

/// Request body for `POST /enviar-lote`.
#[derive(Debug, Deserialize, ToSchema)]
pub struct EnviarLoteRequest {
    /// Product description.
    pub nombre: Option<String>,
    /// Unit gross price in pesos.
    pub precio: Option<i64>,
    /// Units covered by the batch.
    pub cantidad: Option<u32>,
    /// Batch gross total; defaults to `precio * cantidad`.
    pub total: Option<i64>,
}

/// Response body for emission endpoints.
#[derive(Debug, Serialize, ToSchema)]
#[cfg_attr(test, derive(serde::Deserialize))]
pub struct EnviarResponse {
    /// Outcome description.
    pub message: String,
    /// Assigned folio (real or fictitious placeholder).
    pub folio: String,
    /// Whether the receipt is a fictitious placeholder.
    pub ficticia: bool,
    /// Low-capacity warning, when remaining folios dipped below threshold.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub alerta: Option<String>,
}

/// Request body for `POST /solicitar-folios`.
#[derive(Debug, Deserialize, ToSchema)]
pub struct SolicitarFoliosRequest {
    /// Number of folios to request from the provider.
    pub cantidad: Option<i64>,
}

/// Response body for `POST /solicitar-folios`.
#[derive(Debug, Serialize, ToSchema)]
#[cfg_attr(test, derive(serde::Deserialize))]
pub struct SolicitarFoliosResponse {
    /// Outcome description.
    pub message: String,
    /// Where the received CAF was stored.
    #[serde(rename = "cafGuardadoEn")]
    pub caf_guardado_en: String,
}

// ============================================================================
// Handlers
// ============================================================================

/// Remaining folio capacity and the CAF backing the next folio.
#[utoipa::path(
    get,
    path = "/api/boletas/folios-restantes",
    tag = "boletas",
    responses(
        (status = 200, description = "Capacity computed", body = FoliosRestantesResponse),
        (status = 404, description = "No CAF covers the next folio", body = FoliosRestantesResponse),
        (status = 500, description = "CAF store unavailable", body = crate::error::ApiErrorBody),
    )
)]
pub(crate) async fn folios_restantes(
    State(state): State<Arc<AppState>>,
) -> ApiResult<Response> {
    let allocation = state.pipeline().allocate_next().await?;

    let ultimo_folio = allocation.assigned_folio.map(|f| f - 1);
    let Some(range) = allocation.backing_range else {
        let body = FoliosRestantesResponse {
            message: Some("No hay CAF disponibles para emitir boletas.".to_string()),
            caf: None,
            ultimo_folio,
            total_folios_restantes: allocation.remaining_capacity,
            resolucion_caf: None,
        };
        return Ok((StatusCode::NOT_FOUND, Json(body)).into_response());
    };

    let body = FoliosRestantesResponse {
        message: None,
        resolucion_caf: ResolucionCaf::from_range(&range),
        caf: Some(range.file_id),
        ultimo_folio,
        total_folios_restantes: allocation.remaining_capacity,
    };
    Ok((StatusCode::OK, Json(body)).into_response())
}

/// Every parseable CAF range with its resolution data.
#[utoipa::path(
    get,
    path = "/api/boletas/info-caf",
    tag = "boletas",
    responses(
        (status = 200, description = "CAF ranges listed", body = InfoCafResponse),
        (status = 500, description = "CAF store unavailable", body = crate::error::ApiErrorBody),
    )
)]
pub(crate) async fn info_caf(
    State(state): State<Arc<AppState>>,
) -> ApiResult<Json<InfoCafResponse>> {
    let directory = state.pipeline().caf_directory().to_path_buf();
    let ranges = tokio::task::spawn_blocking(move || caf::load_ranges(&directory))
        .await
        .map_err(|e| ApiError::internal(format!("caf scan task failed: {e}")))??;

    let cafs = ranges
        .iter()
        .map(|range| InfoCafEntry {
            archivo: range.file_id.clone(),
            desde: range.from,
            hasta: range.to,
            total: range.span(),
            resolucion: ResolucionCaf::from_range(range),
        })
        .collect();
    Ok(Json(InfoCafResponse { cafs }))
}

fn emission_response(outcome: EmissionOutcome) -> (StatusCode, Json<EnviarResponse>) {
    let message = if outcome.fictitious {
        "No hay folios disponibles. Se generó una boleta ficticia.".to_string()
    } else {
        "Boleta generada correctamente".to_string()
    };
    let alerta = outcome.low_capacity.then(|| {
        format!(
            "Quedan solo {} folios disponibles",
            outcome.remaining_capacity
        )
    });
    (
        StatusCode::CREATED,
        Json(EnviarResponse {
            message,
            folio: outcome.folio,
            ficticia: outcome.fictitious,
            alerta,
        }),
    )
}

/// Emits one boleta. Responds as soon as a folio is reserved; the
/// authority round-trip continues in the background.
#[utoipa::path(
    post,
    path = "/api/boletas/enviar",
    tag = "boletas",
    request_body = EnviarRequest,
    responses(
        (status = 201, description = "Folio reserved", body = EnviarResponse),
        (status = 400, description = "Missing product data", body = crate::error::ApiErrorBody),
        (status = 500, description = "CAF store unavailable", body = crate::error::ApiErrorBody),
    )
)]
pub(crate) async fn enviar(
    State(state): State<Arc<AppState>>,
    Json(request): Json<EnviarRequest>,
) -> ApiResult<impl IntoResponse> {
    let (Some(nombre), Some(precio)) = (request.nombre, request.precio) else {
        return Err(ApiError::bad_request("Faltan datos del producto"));
    };
    if nombre.trim().is_empty() || precio <= 0 {
        return Err(ApiError::bad_request("Faltan datos del producto"));
    }

    let outcome = state
        .pipeline()
        .emit(SaleItem::single(nombre, precio), false)
        .await?;
    Ok(emission_response(outcome))
}

/// Emits one batch boleta covering several units of a product.
#[utoipa::path(
    post,
    path = "/api/boletas/enviar-lote",
    tag = "boletas",
    request_body = EnviarLoteRequest,
    responses(
        (status = 201, description = "Folio reserved", body = EnviarResponse),
        (status = 400, description = "Missing or inconsistent batch data", body = crate::error::ApiErrorBody),
        (status = 500, description = "CAF store unavailable", body = crate::error::ApiErrorBody),
    )
)]
pub(crate) async fn enviar_lote(
    State(state): State<Arc<AppState>>,
    Json(request): Json<EnviarLoteRequest>,
) -> ApiResult<impl IntoResponse> {
    let (Some(nombre), Some(precio), Some(cantidad)) =
        (request.nombre, request.precio, request.cantidad)
    else {
        return Err(ApiError::bad_request("Faltan datos del lote"));
    };
    if nombre.trim().is_empty() || precio <= 0 || cantidad == 0 {
        return Err(ApiError::bad_request("Faltan datos del lote"));
    }

    let computed_total = precio * i64::from(cantidad);
    let total = request.total.unwrap_or(computed_total);
    if total != computed_total {
        return Err(ApiError::bad_request(
            "El total no coincide con precio por cantidad",
        ));
    }

    let sale = SaleItem {
        product: nombre,
        unit_gross: precio,
        quantity: cantidad,
        gross_total: total,
    };
    let outcome = state.pipeline().emit(sale, true).await?;
    Ok(emission_response(outcome))
}

/// Requests a fresh CAF from the provider and deposits it in the CAF
/// directory, where the next allocation will pick it up.
#[utoipa::path(
    post,
    path = "/api/boletas/solicitar-folios",
    tag = "boletas",
    request_body = SolicitarFoliosRequest,
    responses(
        (status = 201, description = "CAF received and stored", body = SolicitarFoliosResponse),
        (status = 400, description = "Invalid quantity", body = crate::error::ApiErrorBody),
        (status = 502, description = "Provider call failed", body = crate::error::ApiErrorBody),
    )
)]
pub(crate) async fn solicitar_folios(
    State(state): State<Arc<AppState>>,
    Json(request): Json<SolicitarFoliosRequest>,
) -> ApiResult<impl IntoResponse> {
    let Some(cantidad) = request.cantidad else {
        return Err(ApiError::bad_request(
            "Debes enviar la cantidad de folios a solicitar.",
        ));
    };
    if cantidad <= 0 {
        return Err(ApiError::bad_request("Cantidad de folios inválida."));
    }
    let cantidad = cantidad.unsigned_abs();

    let minimum = state.pipeline().alert_threshold();
    if cantidad < minimum {
        return Err(ApiError::bad_request(format!(
            "La cantidad de folios solicitados es menor a {minimum}. Sugerencia: 500000"
        )));
    }

    let caf_body = state.gateway().request_folios(cantidad).await?;
    if caf_body.trim().is_empty() {
        return Err(ApiError::gateway("No se recibió CAF desde el proveedor."));
    }

    let file_name = format!("caf_{}.xml", clock::caf_file_timestamp());
    let destination = state.pipeline().caf_directory().join(&file_name);
    tokio::fs::write(&destination, caf_body).await.map_err(|e| {
        ApiError::internal(format!(
            "error guardando el CAF en {}: {e}",
            destination.display()
        ))
    })?;
    tracing::info!(file = %destination.display(), cantidad, "CAF stored");

    Ok((
        StatusCode::CREATED,
        Json(SolicitarFoliosResponse {
            message: "Nuevos folios solicitados correctamente".to_string(),
            caf_guardado_en: destination.display().to_string(),
        }),
    ))
}
