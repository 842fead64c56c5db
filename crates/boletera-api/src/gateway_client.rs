//! HTTP client for the invoicing gateway (SimpleAPI contract).
//!
//! Implements [`TaxGateway`] over the provider's four document calls plus
//! folio issuance. Every call is a multipart POST carrying the signing
//! certificate; the document calls can grow large (certificate + generated
//! XML), so they run under a generous timeout while status queries use a
//! short one.

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use serde_json::json;

use boletera_core::caf::CafResolution;
use boletera_core::dte::{CertificateRef, DtePayload};
use boletera_core::gateway::TaxGateway;
use boletera_core::{Error, Result};

use crate::config::GatewayConfig;

/// Timeout for document generation, envelope and submission calls.
const DOCUMENT_TIMEOUT: Duration = Duration::from_secs(120);
/// Timeout for status queries.
const QUERY_TIMEOUT: Duration = Duration::from_secs(30);

/// Fixed receiver RUT on submission envelopes (the authority itself).
const ENVELOPE_RECEIVER_RUT: &str = "60803000-K";
/// Environment flag for production submissions.
const SUBMIT_ENVIRONMENT: u8 = 1;
/// Document type requested from the folio-issuance endpoint (boleta).
const FOLIO_DOCUMENT_TYPE: u16 = 39;
/// Environment flag for folio issuance.
const FOLIO_REQUEST_ENVIRONMENT: u8 = 0;

/// Invoicing-gateway client.
#[derive(Clone)]
pub struct SimpleApiClient {
    base_url: String,
    folios_url: String,
    api_key: String,
    certificate: Vec<u8>,
    certificate_ref: CertificateRef,
    issuer_rut: String,
    client: reqwest::Client,
}

impl SimpleApiClient {
    /// Creates a client from gateway configuration, reading the signing
    /// certificate off disk once.
    ///
    /// # Errors
    ///
    /// Returns an error when the certificate file cannot be read.
    pub fn new(config: &GatewayConfig, issuer_rut: impl Into<String>) -> Result<Self> {
        let certificate = std::fs::read(&config.certificate_path).map_err(|e| {
            Error::InvalidInput(format!(
                "cannot read signing certificate {}: {e}",
                config.certificate_path.display()
            ))
        })?;
        Ok(Self {
            base_url: config.base_url.trim_end_matches('/').to_string(),
            folios_url: config.folios_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
            certificate,
            certificate_ref: config.certificate_ref(),
            issuer_rut: issuer_rut.into(),
            client: reqwest::Client::new(),
        })
    }

    fn certificate_part(&self) -> Part {
        Part::bytes(self.certificate.clone()).file_name("certificado.pfx")
    }

    async fn post_multipart(
        &self,
        step: &'static str,
        url: String,
        form: Form,
        timeout: Duration,
    ) -> Result<reqwest::Response> {
        let response = self
            .client
            .post(url)
            .header(reqwest::header::AUTHORIZATION, self.api_key.clone())
            .multipart(form)
            .timeout(timeout)
            .send()
            .await
            .map_err(|e| Error::gateway(step, e))?;

        if response.status().is_success() {
            return Ok(response);
        }

        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        let message = serde_json::from_str::<serde_json::Value>(&body)
            .ok()
            .and_then(|value| {
                value
                    .get("message")
                    .and_then(|v| v.as_str())
                    .map(str::to_string)
            })
            .unwrap_or(body);
        Err(Error::gateway(step, format!("({status}): {message}")))
    }

    async fn body_text(step: &'static str, response: reqwest::Response) -> Result<String> {
        response.text().await.map_err(|e| Error::gateway(step, e))
    }

    async fn body_json(step: &'static str, response: reqwest::Response) -> Result<serde_json::Value> {
        response
            .json::<serde_json::Value>()
            .await
            .map_err(|e| Error::gateway(step, e))
    }
}

#[async_trait]
impl TaxGateway for SimpleApiClient {
    async fn generate_document(&self, payload: &DtePayload, caf_path: &Path) -> Result<String> {
        let caf_bytes = tokio::fs::read(caf_path).await.map_err(|e| {
            Error::gateway("generate", format!("cannot read CAF {}: {e}", caf_path.display()))
        })?;
        let caf_name = caf_path
            .file_name()
            .map_or_else(|| "caf.xml".to_string(), |n| n.to_string_lossy().into_owned());

        let input = serde_json::to_string(payload)
            .map_err(|e| Error::gateway("generate", format!("cannot encode payload: {e}")))?;
        let form = Form::new()
            .part("files", self.certificate_part())
            .part("files2", Part::bytes(caf_bytes).file_name(caf_name))
            .text("input", input);

        let response = self
            .post_multipart(
                "generate",
                format!("{}/dte/generar", self.base_url),
                form,
                DOCUMENT_TIMEOUT,
            )
            .await?;
        Self::body_text("generate", response).await
    }

    async fn generate_envelope(
        &self,
        document_xml: &str,
        folio: u64,
        resolution: &CafResolution,
    ) -> Result<String> {
        let input = json!({
            "Certificado": self.certificate_ref,
            "Caratula": {
                "RutEmisor": self.issuer_rut,
                "RutReceptor": ENVELOPE_RECEIVER_RUT,
                "FechaResolucion": resolution.date,
                "NumeroResolucion": resolution.number,
            },
        });
        let form = Form::new()
            .text("input", input.to_string())
            .part("files", self.certificate_part())
            .part(
                "files",
                Part::bytes(document_xml.as_bytes().to_vec())
                    .file_name(format!("dte_{folio}.xml")),
            );

        let response = self
            .post_multipart(
                "envelope",
                format!("{}/envio/generar", self.base_url),
                form,
                DOCUMENT_TIMEOUT,
            )
            .await?;
        Self::body_text("envelope", response).await
    }

    async fn submit_envelope(&self, envelope_xml: &str, folio: u64) -> Result<String> {
        let input = json!({
            "Certificado": self.certificate_ref,
            "Ambiente": SUBMIT_ENVIRONMENT,
            "Tipo": 2,
        });
        let form = Form::new()
            .part("files", self.certificate_part())
            .part(
                "files2",
                Part::bytes(envelope_xml.as_bytes().to_vec())
                    .file_name(format!("sobre_{folio}.xml")),
            )
            .text("input", input.to_string());

        let response = self
            .post_multipart(
                "submit",
                format!("{}/envio/enviar", self.base_url),
                form,
                DOCUMENT_TIMEOUT,
            )
            .await?;

        let body = Self::body_json("submit", response).await?;
        match body.get("trackId") {
            Some(serde_json::Value::String(track_id)) => Ok(track_id.clone()),
            Some(serde_json::Value::Number(track_id)) => Ok(track_id.to_string()),
            _ => Err(Error::gateway("submit", "response missing trackId")),
        }
    }

    async fn query_status(&self, track_id: &str) -> Result<String> {
        let input = json!({
            "Certificado": self.certificate_ref,
            "RutEmpresa": self.issuer_rut,
            "TrackId": track_id,
            "Ambiente": SUBMIT_ENVIRONMENT,
            "ServidorBoletaREST": true,
        });
        let form = Form::new()
            .part("files", self.certificate_part())
            .text("input", input.to_string());

        let response = self
            .post_multipart(
                "query",
                format!("{}/consulta/envio", self.base_url),
                form,
                QUERY_TIMEOUT,
            )
            .await?;

        let body = Self::body_json("query", response).await?;
        body.get("estado")
            .and_then(|v| v.as_str())
            .map(str::to_string)
            .ok_or_else(|| Error::gateway("query", "response missing estado"))
    }

    async fn request_folios(&self, quantity: u64) -> Result<String> {
        let input = json!({
            "RutCertificado": self.certificate_ref.rut,
            "Password": self.certificate_ref.password,
            "RutEmpresa": self.issuer_rut,
            "Ambiente": FOLIO_REQUEST_ENVIRONMENT,
        });
        let form = Form::new()
            .text("input", input.to_string())
            .part("files", self.certificate_part());

        let response = self
            .post_multipart(
                "request_folios",
                format!(
                    "{}/folios/get/{FOLIO_DOCUMENT_TYPE}/{quantity}",
                    self.folios_url
                ),
                form,
                DOCUMENT_TIMEOUT,
            )
            .await?;
        Self::body_text("request_folios", response).await
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use axum::Router;
    use axum::http::StatusCode;
    use axum::routing::post;
    use serde_json::json;

    use boletera_core::dte::{IssuerIdentity, SaleItem, build_payload};

    use super::*;

    async fn spawn_gateway(router: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind");
        let addr = listener.local_addr().expect("local addr");
        tokio::spawn(async move {
            let _ = axum::serve(listener, router).await;
        });
        format!("http://{addr}")
    }

    fn client_for(base_url: &str, cert_path: PathBuf) -> SimpleApiClient {
        let config = GatewayConfig {
            base_url: base_url.to_string(),
            folios_url: base_url.to_string(),
            api_key: "test-key".to_string(),
            certificate_path: cert_path,
            certificate_rut: "11222333-4".to_string(),
            certificate_password: "secret".to_string(),
        };
        SimpleApiClient::new(&config, "76123456-7").expect("client")
    }

    fn temp_certificate() -> (tempfile::TempDir, PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("certificado.pfx");
        std::fs::write(&path, b"not-a-real-pfx").unwrap();
        (dir, path)
    }

    fn sample_payload() -> DtePayload {
        let issuer = IssuerIdentity {
            rut: "76123456".to_string(),
            dv: "7".to_string(),
            business_name: "TERMINAL SERVICIOS S.A.".to_string(),
            business_line: "SERVICIOS HIGIENICOS".to_string(),
            origin_address: "AV. BORGOÑO 1251".to_string(),
            origin_commune: "ESTACION CENTRAL".to_string(),
        };
        let certificate = CertificateRef {
            rut: "11222333-4".to_string(),
            password: "secret".to_string(),
        };
        build_payload(
            &SaleItem::single("Baño", 500),
            151,
            "2025-06-01".to_string(),
            &issuer,
            certificate,
        )
    }

    #[tokio::test]
    async fn generate_document_returns_body_text() {
        let router = Router::new().route("/dte/generar", post(|| async { "<DTE/>" }));
        let base_url = spawn_gateway(router).await;
        let (dir, cert_path) = temp_certificate();
        let caf_path = dir.path().join("caf_1.xml");
        std::fs::write(&caf_path, "<AUTORIZACION/>").unwrap();

        let client = client_for(&base_url, cert_path);
        let xml = client
            .generate_document(&sample_payload(), &caf_path)
            .await
            .unwrap();
        assert_eq!(xml, "<DTE/>");
    }

    #[tokio::test]
    async fn submit_envelope_parses_numeric_and_string_track_ids() {
        let router = Router::new().route(
            "/envio/enviar",
            post(|| async { axum::Json(json!({ "trackId": 25_436_099 })) }),
        );
        let base_url = spawn_gateway(router).await;
        let (_dir, cert_path) = temp_certificate();

        let client = client_for(&base_url, cert_path);
        let track_id = client.submit_envelope("<Sobre/>", 151).await.unwrap();
        assert_eq!(track_id, "25436099");
    }

    #[tokio::test]
    async fn query_status_requires_estado_field() {
        let router = Router::new().route(
            "/consulta/envio",
            post(|| async { axum::Json(json!({ "detalles": [] })) }),
        );
        let base_url = spawn_gateway(router).await;
        let (_dir, cert_path) = temp_certificate();

        let client = client_for(&base_url, cert_path);
        let err = client.query_status("25436099").await.unwrap_err();
        assert!(matches!(err, Error::Gateway { step: "query", .. }));
    }

    #[tokio::test]
    async fn error_status_maps_to_gateway_error_with_message() {
        let router = Router::new().route(
            "/envio/enviar",
            post(|| async {
                (
                    StatusCode::UNPROCESSABLE_ENTITY,
                    axum::Json(json!({ "message": "sobre inválido" })),
                )
            }),
        );
        let base_url = spawn_gateway(router).await;
        let (_dir, cert_path) = temp_certificate();

        let client = client_for(&base_url, cert_path);
        let err = client.submit_envelope("<Sobre/>", 151).await.unwrap_err();
        let Error::Gateway { step, message } = err else {
            panic!("unexpected error: {err:?}");
        };
        assert_eq!(step, "submit");
        assert!(message.contains("sobre inválido"));
    }

    #[tokio::test]
    async fn request_folios_returns_caf_body() {
        let router = Router::new().route(
            "/folios/get/39/500000",
            post(|| async { "<AUTORIZACION><CAF/></AUTORIZACION>" }),
        );
        let base_url = spawn_gateway(router).await;
        let (_dir, cert_path) = temp_certificate();

        let client = client_for(&base_url, cert_path);
        let caf = client.request_folios(500_000).await.unwrap();
        assert!(caf.contains("<CAF/>"));
    }

    #[tokio::test]
    async fn missing_certificate_fails_at_construction() {
        let config = GatewayConfig {
            base_url: "http://localhost".to_string(),
            folios_url: "http://localhost".to_string(),
            api_key: "k".to_string(),
            certificate_path: PathBuf::from("/nonexistent/cert.pfx"),
            certificate_rut: "1-9".to_string(),
            certificate_password: "p".to_string(),
        };
        assert!(SimpleApiClient::new(&config, "76123456-7").is_err());
    }
}
