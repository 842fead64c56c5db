//! Document emission pipeline.
//!
//! Per emission request:
//!
//! ```text
//! Start → FolioAssigned | Fictitious
//!   Fictitious:    persist placeholder → Done
//!   FolioAssigned: acknowledge caller → (detached) generate → envelope →
//!                  submit → poll status → persist → Done
//! ```
//!
//! Folio assignment is the only user-blocking step; the caller is
//! acknowledged as soon as a folio (real or fictitious) exists, and the
//! authority round-trip runs in a spawned task with its own error
//! boundary. Anything that fails after acknowledgment is absorbed into a
//! persisted fallback record plus a log entry — the client never learns of
//! post-acknowledgment failures, and an assigned folio is never returned
//! to the pool.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use rand::Rng;
use tracing::Instrument;

use crate::alert::{self, AlertNotifier, DEFAULT_ALERT_THRESHOLD};
use crate::caf::CafRange;
use crate::clock;
use crate::dte::{self, CertificateRef, IssuerIdentity, SaleItem};
use crate::error::{Error, Result};
use crate::fictitious;
use crate::folio::{AllocationResult, FolioAllocator};
use crate::gateway::TaxGateway;
use crate::observability;
use crate::store::{
    ACCEPTED_STATUSES, DocumentRecord, ReceiptStore, STATUS_COLLISION, STATUS_FICTITIOUS,
    STATUS_FICTITIOUS_API_ERROR, STATUS_UNKNOWN,
};

/// Default number of status-poll attempts after submission.
pub const DEFAULT_POLL_ATTEMPTS: u32 = 5;
/// Default delay between status-poll attempts.
pub const DEFAULT_POLL_DELAY: Duration = Duration::from_millis(1500);

/// What the caller is told at acknowledgment time.
#[derive(Debug, Clone)]
pub struct EmissionOutcome {
    /// Assigned folio: plain digits for a real folio, compound for a
    /// fictitious one.
    pub folio: String,
    /// Whether the receipt is a fictitious placeholder.
    pub fictitious: bool,
    /// Remaining capacity observed at allocation time.
    pub remaining_capacity: u64,
    /// Whether capacity was below the alert threshold.
    pub low_capacity: bool,
}

/// Result of the authority round-trip for a real folio.
struct RoundTrip {
    status: String,
    document_xml_base64: String,
    track_id: String,
}

/// Orchestrates allocation, generation, submission and recording.
#[derive(Clone)]
pub struct EmissionPipeline {
    store: Arc<dyn ReceiptStore>,
    gateway: Arc<dyn TaxGateway>,
    notifier: Arc<dyn AlertNotifier>,
    allocator: FolioAllocator,
    issuer: IssuerIdentity,
    certificate: CertificateRef,
    alert_threshold: u64,
    poll_attempts: u32,
    poll_delay: Duration,
}

impl EmissionPipeline {
    /// Creates a pipeline with default polling and alert settings.
    #[must_use]
    pub fn new(
        store: Arc<dyn ReceiptStore>,
        gateway: Arc<dyn TaxGateway>,
        notifier: Arc<dyn AlertNotifier>,
        allocator: FolioAllocator,
        issuer: IssuerIdentity,
        certificate: CertificateRef,
    ) -> Self {
        Self {
            store,
            gateway,
            notifier,
            allocator,
            issuer,
            certificate,
            alert_threshold: DEFAULT_ALERT_THRESHOLD,
            poll_attempts: DEFAULT_POLL_ATTEMPTS,
            poll_delay: DEFAULT_POLL_DELAY,
        }
    }

    /// Overrides the low-capacity alert threshold.
    #[must_use]
    pub fn with_alert_threshold(mut self, threshold: u64) -> Self {
        self.alert_threshold = threshold;
        self
    }

    /// Overrides status polling (attempt count and inter-attempt delay).
    #[must_use]
    pub fn with_polling(mut self, attempts: u32, delay: Duration) -> Self {
        self.poll_attempts = attempts.max(1);
        self.poll_delay = delay;
        self
    }

    /// The receipt store backing this pipeline.
    #[must_use]
    pub fn store(&self) -> Arc<dyn ReceiptStore> {
        Arc::clone(&self.store)
    }

    /// The CAF directory the allocator reads.
    #[must_use]
    pub fn caf_directory(&self) -> &Path {
        self.allocator.caf_directory()
    }

    /// The configured alert threshold.
    #[must_use]
    pub fn alert_threshold(&self) -> u64 {
        self.alert_threshold
    }

    /// Computes the next allocation from persisted history and the CAF
    /// directory. Always a fresh read on both sides.
    ///
    /// # Errors
    ///
    /// Returns [`Error::StoreUnavailable`] when the CAF directory cannot be
    /// listed, or a persistence error when folio history cannot be read.
    pub async fn allocate_next(&self) -> Result<AllocationResult> {
        let last_used = self.store.last_used_folio().await?;
        let allocator = self.allocator.clone();
        tokio::task::spawn_blocking(move || allocator.allocate(last_used))
            .await
            .map_err(|e| Error::internal(format!("allocation task failed: {e}")))?
    }

    /// Emits one receipt for `sale`.
    ///
    /// Returns as soon as a folio is reserved (real) or a placeholder is
    /// persisted (fictitious). For real folios the authority round-trip
    /// continues in a detached task.
    ///
    /// # Errors
    ///
    /// Returns an error only for failures before acknowledgment: an
    /// unreadable CAF store, folio-history read failures, or a failed
    /// fictitious-record insert.
    pub async fn emit(&self, sale: SaleItem, batch: bool) -> Result<EmissionOutcome> {
        let allocation = self.allocate_next().await?;
        let remaining_capacity = allocation.remaining_capacity;
        let low_capacity = remaining_capacity < self.alert_threshold;

        let (folio, backing_range) = match (allocation.assigned_folio, allocation.backing_range) {
            (Some(folio), Some(range)) => (folio, range),
            _ => {
                let outcome = self.emit_fictitious(&sale, batch, remaining_capacity).await?;
                return Ok(outcome);
            }
        };

        tracing::info!(
            folio,
            caf = %backing_range.file_id,
            remaining_capacity,
            product = %sale.product,
            "folio reserved, continuing emission in background"
        );

        let pipeline = self.clone();
        let background_sale = sale.clone();
        let span = observability::emission_span("background", &folio.to_string(), &sale.product);
        tokio::spawn(
            async move {
                pipeline
                    .finish_emission(
                        folio,
                        backing_range,
                        remaining_capacity,
                        background_sale,
                        batch,
                    )
                    .await;
            }
            .instrument(span),
        );

        Ok(EmissionOutcome {
            folio: folio.to_string(),
            fictitious: false,
            remaining_capacity,
            low_capacity,
        })
    }

    /// Fictitious short-circuit: no range covers the next candidate, for
    /// whatever reason — the business response is identical in all cases.
    async fn emit_fictitious(
        &self,
        sale: &SaleItem,
        batch: bool,
        remaining_capacity: u64,
    ) -> Result<EmissionOutcome> {
        let folio = fictitious::generate_unique(self.store.as_ref()).await?;
        tracing::warn!(
            %folio,
            remaining_capacity,
            product = %sale.product,
            "no folio assignable, recording fictitious receipt"
        );

        let mut record = DocumentRecord::fictitious(
            folio.clone(),
            sale.product.clone(),
            sale.gross_total,
            clock::record_timestamp(),
            STATUS_FICTITIOUS,
        );
        if batch {
            record.parent_folio = Some(folio.clone());
            record.batch_amount = Some(sale.gross_total);
            record.batch_count = Some(sale.quantity);
        }
        self.store.insert(record).await?;

        Ok(EmissionOutcome {
            folio,
            fictitious: true,
            remaining_capacity,
            low_capacity: remaining_capacity < self.alert_threshold,
        })
    }

    /// Detached continuation after the caller was acknowledged. Never
    /// propagates: every failure path ends in a persisted record.
    async fn finish_emission(
        &self,
        folio: u64,
        backing_range: CafRange,
        remaining_capacity: u64,
        sale: SaleItem,
        batch: bool,
    ) {
        match self.authority_round_trip(folio, &backing_range, &sale).await {
            Ok(trip) => {
                self.record_round_trip(folio, remaining_capacity, &sale, batch, trip)
                    .await;
            }
            Err(err) => {
                tracing::warn!(
                    folio,
                    error = %err,
                    "authority round-trip failed after acknowledgment, recording fallback"
                );
                self.record_gateway_failure(folio, &sale, batch).await;
            }
        }
    }

    /// Payload → generate → envelope → submit → poll.
    async fn authority_round_trip(
        &self,
        folio: u64,
        backing_range: &CafRange,
        sale: &SaleItem,
    ) -> Result<RoundTrip> {
        let payload = dte::build_payload(
            sale,
            folio,
            clock::emission_date(),
            &self.issuer,
            self.certificate.clone(),
        );

        let document_xml = self
            .gateway
            .generate_document(&payload, &backing_range.path)
            .await?;

        let resolution = backing_range.resolution()?;
        let envelope_xml = self
            .gateway
            .generate_envelope(&document_xml, folio, resolution)
            .await?;

        let track_id = self.gateway.submit_envelope(&envelope_xml, folio).await?;
        tracing::info!(folio, %track_id, "envelope submitted");

        let status = self.poll_status(&track_id).await;
        Ok(RoundTrip {
            status,
            document_xml_base64: BASE64.encode(document_xml),
            track_id,
        })
    }

    /// Polls the authority until a terminal status or the attempt budget
    /// runs out. Query errors are retried like unknown statuses.
    async fn poll_status(&self, track_id: &str) -> String {
        let mut last_seen: Option<String> = None;
        for attempt in 1..=self.poll_attempts {
            match self.gateway.query_status(track_id).await {
                Ok(status) => {
                    tracing::info!(attempt, track_id, %status, "authority status");
                    if ACCEPTED_STATUSES.contains(&status.as_str()) || status == STATUS_COLLISION {
                        return status;
                    }
                    last_seen = Some(status);
                }
                Err(err) => {
                    tracing::warn!(attempt, track_id, error = %err, "status query failed");
                }
            }
            if attempt < self.poll_attempts {
                tokio::time::sleep(self.poll_delay).await;
            }
        }
        tracing::warn!(
            track_id,
            attempts = self.poll_attempts,
            "no terminal status from authority"
        );
        last_seen.unwrap_or_else(|| STATUS_UNKNOWN.to_string())
    }

    /// Persists the terminal record for a completed round-trip, applying
    /// collision renumbering and the alert latch.
    async fn record_round_trip(
        &self,
        folio: u64,
        remaining_capacity: u64,
        sale: &SaleItem,
        batch: bool,
        trip: RoundTrip,
    ) {
        // A collision keeps the local record unique without pretending the
        // numeric folio is still clean; the prefix still consumes folio N.
        let stored_folio = if trip.status == STATUS_COLLISION {
            let renumbered = renumber(folio);
            tracing::warn!(folio, %renumbered, "authority collision, renumbering record");
            renumbered
        } else {
            folio.to_string()
        };

        let previous_flag = match self.store.last_alert_fired().await {
            Ok(flag) => flag,
            Err(err) => {
                tracing::warn!(error = %err, "could not read alert latch, assuming unfired");
                false
            }
        };
        let decision = alert::evaluate(remaining_capacity, self.alert_threshold, previous_flag);
        if decision.fire {
            if let Err(err) = self.notifier.notify_low_capacity(remaining_capacity).await {
                tracing::warn!(error = %err, "low-capacity notification failed");
            }
        }

        let record = DocumentRecord {
            folio: stored_folio.clone(),
            product: sale.product.clone(),
            gross_amount: sale.gross_total,
            issued_at: clock::record_timestamp(),
            authority_status: trip.status,
            document_xml_base64: Some(trip.document_xml_base64),
            track_id: Some(trip.track_id),
            is_fictitious: false,
            alert_fired: decision.flag,
            parent_folio: batch.then(|| stored_folio.clone()),
            batch_amount: batch.then_some(sale.gross_total),
            batch_count: batch.then_some(sale.quantity),
        };

        if let Err(err) = self.store.insert(record).await {
            tracing::error!(
                folio = %stored_folio,
                error = %err,
                "failed to persist receipt record"
            );
        }
    }

    /// Records a `FICTICIA_ERROR_API` fallback so the business operation is
    /// never silently lost. The compound folio keeps the attempted number
    /// traceable while the fictitious flag excludes it from sequencing.
    async fn record_gateway_failure(&self, folio: u64, sale: &SaleItem, batch: bool) {
        let fallback_folio = renumber(folio);
        let mut record = DocumentRecord::fictitious(
            fallback_folio.clone(),
            sale.product.clone(),
            sale.gross_total,
            clock::record_timestamp(),
            STATUS_FICTITIOUS_API_ERROR,
        );
        if batch {
            record.parent_folio = Some(fallback_folio.clone());
            record.batch_amount = Some(sale.gross_total);
            record.batch_count = Some(sale.quantity);
        }

        if let Err(err) = self.store.insert(record).await {
            tracing::error!(
                folio = %fallback_folio,
                error = %err,
                "failed to persist fallback record"
            );
        }
    }
}

/// Appends a random six-digit suffix to a folio.
fn renumber(folio: u64) -> String {
    let suffix = rand::thread_rng().gen_range(100_000..1_000_000u32);
    format!("{folio}-{suffix}")
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicU32, Ordering};

    use async_trait::async_trait;

    use super::*;
    use crate::caf::{CafResolution, test_support::caf_body};
    use crate::store::MemoryReceiptStore;

    struct FakeGateway {
        statuses: Mutex<VecDeque<String>>,
        fail_submit: bool,
    }

    impl FakeGateway {
        fn accepting() -> Self {
            Self::with_statuses(&["EPR"])
        }

        fn with_statuses(statuses: &[&str]) -> Self {
            Self {
                statuses: Mutex::new(statuses.iter().map(|s| (*s).to_string()).collect()),
                fail_submit: false,
            }
        }

        fn failing_submit() -> Self {
            Self {
                statuses: Mutex::new(VecDeque::new()),
                fail_submit: true,
            }
        }
    }

    #[async_trait]
    impl TaxGateway for FakeGateway {
        async fn generate_document(
            &self,
            payload: &crate::dte::DtePayload,
            _caf_path: &Path,
        ) -> Result<String> {
            Ok(format!("<DTE folio=\"{}\"/>", payload.folio()))
        }

        async fn generate_envelope(
            &self,
            document_xml: &str,
            _folio: u64,
            _resolution: &CafResolution,
        ) -> Result<String> {
            Ok(format!("<Sobre>{document_xml}</Sobre>"))
        }

        async fn submit_envelope(&self, _envelope_xml: &str, _folio: u64) -> Result<String> {
            if self.fail_submit {
                return Err(Error::gateway("submit", "connection timed out"));
            }
            Ok("91823".to_string())
        }

        async fn query_status(&self, _track_id: &str) -> Result<String> {
            let mut statuses = self.statuses.lock().unwrap();
            Ok(statuses.pop_front().unwrap_or_else(|| "PRD".to_string()))
        }

        async fn request_folios(&self, _quantity: u64) -> Result<String> {
            Ok(caf_body(1, 100))
        }
    }

    #[derive(Default)]
    struct CountingNotifier {
        fired: AtomicU32,
    }

    #[async_trait]
    impl AlertNotifier for CountingNotifier {
        async fn notify_low_capacity(&self, _remaining_capacity: u64) -> Result<()> {
            self.fired.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn issuer() -> IssuerIdentity {
        IssuerIdentity {
            rut: "76123456".to_string(),
            dv: "7".to_string(),
            business_name: "TERMINAL SERVICIOS S.A.".to_string(),
            business_line: "SERVICIOS HIGIENICOS".to_string(),
            origin_address: "AV. BORGOÑO 1251".to_string(),
            origin_commune: "ESTACION CENTRAL".to_string(),
        }
    }

    fn certificate() -> CertificateRef {
        CertificateRef {
            rut: "11222333-4".to_string(),
            password: "secret".to_string(),
        }
    }

    struct Harness {
        pipeline: EmissionPipeline,
        store: Arc<MemoryReceiptStore>,
        notifier: Arc<CountingNotifier>,
        _caf_dir: tempfile::TempDir,
    }

    fn harness(gateway: FakeGateway, caf_ranges: &[(u64, u64)]) -> Harness {
        let caf_dir = tempfile::tempdir().unwrap();
        for (index, (from, to)) in caf_ranges.iter().enumerate() {
            std::fs::write(
                caf_dir.path().join(format!("caf_{index}.xml")),
                caf_body(*from, *to),
            )
            .unwrap();
        }

        let store = Arc::new(MemoryReceiptStore::new());
        let notifier = Arc::new(CountingNotifier::default());
        let pipeline = EmissionPipeline::new(
            Arc::clone(&store) as Arc<dyn ReceiptStore>,
            Arc::new(gateway),
            Arc::clone(&notifier) as Arc<dyn AlertNotifier>,
            FolioAllocator::new(caf_dir.path()),
            issuer(),
            certificate(),
        )
        .with_polling(5, Duration::from_millis(1));

        Harness {
            pipeline,
            store,
            notifier,
            _caf_dir: caf_dir,
        }
    }

    async fn wait_for_records(store: &MemoryReceiptStore, expected: usize) {
        for _ in 0..500 {
            if store.records().len() >= expected {
                return;
            }
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
        panic!("expected {expected} records, got {}", store.records().len());
    }

    #[tokio::test]
    async fn empty_caf_directory_produces_fictitious_record() {
        let h = harness(FakeGateway::accepting(), &[]);
        let outcome = h.pipeline.emit(SaleItem::single("Baño", 500), false).await.unwrap();

        assert!(outcome.fictitious);
        assert_eq!(outcome.remaining_capacity, 0);
        assert!(outcome.folio.contains('-'));

        let records = h.store.records();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].authority_status, STATUS_FICTITIOUS);
        assert!(records[0].is_fictitious);
        assert!(records[0].document_xml_base64.is_none());
    }

    #[tokio::test]
    async fn accepted_emission_persists_real_record_in_background() {
        let h = harness(FakeGateway::accepting(), &[(1, 100)]);
        let outcome = h.pipeline.emit(SaleItem::single("Baño", 500), false).await.unwrap();

        assert!(!outcome.fictitious);
        assert_eq!(outcome.folio, "1");
        assert_eq!(outcome.remaining_capacity, 100);

        wait_for_records(&h.store, 1).await;
        let records = h.store.records();
        assert_eq!(records[0].folio, "1");
        assert_eq!(records[0].authority_status, "EPR");
        assert_eq!(records[0].track_id.as_deref(), Some("91823"));
        assert!(!records[0].is_fictitious);
        assert!(records[0].document_xml_base64.is_some());

        // The consumed folio drives the next allocation.
        assert_eq!(h.store.last_used_folio().await.unwrap(), 1);
        let next = h.pipeline.allocate_next().await.unwrap();
        assert_eq!(next.assigned_folio, Some(2));
    }

    #[tokio::test]
    async fn collision_status_renumbers_but_still_consumes_the_folio() {
        let h = harness(FakeGateway::with_statuses(&["RSC"]), &[(1, 100)]);
        h.pipeline.emit(SaleItem::single("Baño", 500), false).await.unwrap();

        wait_for_records(&h.store, 1).await;
        let records = h.store.records();
        assert_eq!(records[0].authority_status, STATUS_COLLISION);
        assert!(records[0].folio.starts_with("1-"));
        assert!(!records[0].is_fictitious);
        assert_eq!(h.store.last_used_folio().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn submit_failure_after_acknowledgment_records_api_error_fallback() {
        let h = harness(FakeGateway::failing_submit(), &[(1, 100)]);
        let outcome = h.pipeline.emit(SaleItem::single("Baño", 500), false).await.unwrap();
        assert!(!outcome.fictitious);

        wait_for_records(&h.store, 1).await;
        let records = h.store.records();
        assert_eq!(records[0].authority_status, STATUS_FICTITIOUS_API_ERROR);
        assert!(records[0].is_fictitious);
        assert!(records[0].folio.starts_with("1-"));

        // The fallback is excluded from sequencing: folio 1 is reusable.
        assert_eq!(h.store.last_used_folio().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn unknown_status_after_retries_is_recorded_without_rollback() {
        let h = harness(FakeGateway::with_statuses(&["PRD", "PRD", "PRD", "PRD", "PRD"]), &[(1, 100)]);
        h.pipeline.emit(SaleItem::single("Baño", 500), false).await.unwrap();

        wait_for_records(&h.store, 1).await;
        let records = h.store.records();
        assert_eq!(records[0].authority_status, "PRD");
        assert!(!records[0].is_fictitious);
        assert_eq!(h.store.last_used_folio().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn alert_fires_once_per_depletion_episode() {
        // Threshold far above the 100-folio CAF: every emission is low.
        let h = harness(FakeGateway::with_statuses(&["EPR", "EPR"]), &[(1, 100)]);
        let pipeline = h.pipeline.clone().with_alert_threshold(1_000);

        pipeline.emit(SaleItem::single("Baño", 500), false).await.unwrap();
        wait_for_records(&h.store, 1).await;
        pipeline.emit(SaleItem::single("Baño", 500), false).await.unwrap();
        wait_for_records(&h.store, 2).await;

        assert_eq!(h.notifier.fired.load(Ordering::SeqCst), 1);
        let records = h.store.records();
        assert!(records[0].alert_fired);
        assert!(records[1].alert_fired);
    }

    #[tokio::test]
    async fn batch_emission_carries_batch_fields() {
        let h = harness(FakeGateway::accepting(), &[(1, 100)]);
        let sale = SaleItem {
            product: "Baño".to_string(),
            unit_gross: 500,
            quantity: 12,
            gross_total: 6000,
        };
        let outcome = h.pipeline.emit(sale, true).await.unwrap();
        assert_eq!(outcome.folio, "1");

        wait_for_records(&h.store, 1).await;
        let records = h.store.records();
        assert_eq!(records[0].parent_folio.as_deref(), Some("1"));
        assert_eq!(records[0].batch_amount, Some(6000));
        assert_eq!(records[0].batch_count, Some(12));
    }

    #[tokio::test]
    async fn gap_between_ranges_falls_back_to_fictitious() {
        let h = harness(FakeGateway::accepting(), &[(100, 199)]);
        // Empty history: candidate 1 is below the range — a gap, not
        // exhaustion, and the caller cannot tell the difference.
        let outcome = h.pipeline.emit(SaleItem::single("Baño", 500), false).await.unwrap();
        assert!(outcome.fictitious);
        assert_eq!(outcome.remaining_capacity, 100);
    }
}
