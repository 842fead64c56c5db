//! Tax document gateway boundary.
//!
//! The pipeline talks to the invoicing provider through this trait so the
//! HTTP client stays swappable: production wires the reqwest-based client
//! from the API crate, tests wire an in-process fake.

use std::path::Path;

use async_trait::async_trait;

use crate::caf::CafResolution;
use crate::dte::DtePayload;
use crate::error::Result;

/// The four document calls plus folio issuance, as exposed by the provider.
///
/// Certificate material (file bytes, RUT, password) is owned by the
/// implementation; callers only hand over per-document data.
#[async_trait]
pub trait TaxGateway: Send + Sync + 'static {
    /// Generates the raw DTE from a payload plus the backing CAF file.
    /// Returns the document XML.
    async fn generate_document(&self, payload: &DtePayload, caf_path: &Path) -> Result<String>;

    /// Wraps a generated document into a submission envelope under the
    /// CAF's resolution data. Returns the envelope XML.
    async fn generate_envelope(
        &self,
        document_xml: &str,
        folio: u64,
        resolution: &CafResolution,
    ) -> Result<String>;

    /// Submits the envelope to the authority. Returns the tracking id.
    async fn submit_envelope(&self, envelope_xml: &str, folio: u64) -> Result<String>;

    /// Queries the processing status for a tracking id.
    async fn query_status(&self, track_id: &str) -> Result<String>;

    /// Requests a new CAF covering `quantity` folios from the provider's
    /// folio-issuance endpoint. Returns the CAF document body.
    async fn request_folios(&self, quantity: u64) -> Result<String>;
}
