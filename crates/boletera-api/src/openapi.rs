//! `OpenAPI` specification generation for `boletera-api`.
//!
//! Used to generate the register frontend's client and to detect breaking
//! API changes.

use utoipa::OpenApi;

/// `OpenAPI` documentation for the boleta REST API (`/api/boletas/*`).
#[derive(OpenApi)]
#[openapi(
    info(
        title = "Boletera API",
        description = "Folio allocation and electronic-receipt emission"
    ),
    paths(
        crate::routes::boletas::folios_restantes,
        crate::routes::boletas::info_caf,
        crate::routes::boletas::enviar,
        crate::routes::boletas::enviar_lote,
        crate::routes::boletas::solicitar_folios,
    ),
    components(
        schemas(
            crate::error::ApiErrorBody,
            crate::routes::boletas::ResolucionCaf,
            crate::routes::boletas::FoliosRestantesResponse,
            crate::routes::boletas::InfoCafEntry,
            crate::routes::boletas::InfoCafResponse,
            crate::routes::boletas::EnviarRequest,
            crate::routes::boletas::EnviarLoteRequest,
            crate::routes::boletas::EnviarResponse,
            crate::routes::boletas::SolicitarFoliosRequest,
            crate::routes::boletas::SolicitarFoliosResponse,
        )
    ),
    tags(
        (name = "boletas", description = "Boleta emission and folio management"),
    )
)]
pub struct ApiDoc;

/// Returns the generated `OpenAPI` spec.
#[must_use]
pub fn openapi() -> utoipa::openapi::OpenApi {
    ApiDoc::openapi()
}
