//! Durable receipt records and the store boundary.
//!
//! The store is the single source of truth for folio sequencing: every
//! allocation reads the maximum numeric folio among non-fictitious records
//! before assigning the next one. Records are insert-only — a correction is
//! a new record (e.g. the renumbered `-suffix` folio), never an update.
//!
//! Two implementations are provided: [`SqliteReceiptStore`] for production
//! and [`MemoryReceiptStore`] for tests and debug runs.

use std::path::Path;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use rusqlite::{Connection, OptionalExtension, params};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::folio::numeric_prefix;

/// Authority status recorded for a fictitious receipt (no real folio).
pub const STATUS_FICTITIOUS: &str = "FICTICIA";
/// Authority status recorded when the gateway failed after acknowledgment.
pub const STATUS_FICTITIOUS_API_ERROR: &str = "FICTICIA_ERROR_API";
/// Authority status recorded when polling never observed a known status.
pub const STATUS_UNKNOWN: &str = "SIN_ESTADO";
/// Authority status signalling a folio collision (triggers renumbering).
pub const STATUS_COLLISION: &str = "RSC";
/// Authority statuses treated as terminal acceptance.
pub const ACCEPTED_STATUSES: [&str; 5] = ["ACE", "EPR", "REC", "SOK", "DOK"];

/// A previously emitted or attempted receipt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentRecord {
    /// Folio string: plain digits for real folios, compound `id-suffix`
    /// for fictitious or renumbered ones.
    pub folio: String,
    /// Product description as charged at the register.
    pub product: String,
    /// Gross amount in integer pesos.
    pub gross_amount: i64,
    /// Civil timestamp in `America/Santiago`, `YYYY-MM-DD HH:MM:SS`.
    pub issued_at: String,
    /// Terminal authority status, frozen at insert.
    pub authority_status: String,
    /// Generated DTE XML, base64-encoded. Absent for fictitious records.
    pub document_xml_base64: Option<String>,
    /// Tracking identifier returned by the authority on submission.
    pub track_id: Option<String>,
    /// Whether this record is a placeholder with no authority backing.
    pub is_fictitious: bool,
    /// Whether the low-capacity alert had been emitted when this record
    /// was created (the alert latch reads the most recent value).
    pub alert_fired: bool,
    /// For batch emissions, the folio of the batch parent document.
    pub parent_folio: Option<String>,
    /// For batch emissions, the batch gross total.
    pub batch_amount: Option<i64>,
    /// For batch emissions, the number of units covered.
    pub batch_count: Option<u32>,
}

impl DocumentRecord {
    /// Builds a fictitious placeholder record.
    #[must_use]
    pub fn fictitious(
        folio: impl Into<String>,
        product: impl Into<String>,
        gross_amount: i64,
        issued_at: impl Into<String>,
        status: &str,
    ) -> Self {
        Self {
            folio: folio.into(),
            product: product.into(),
            gross_amount,
            issued_at: issued_at.into(),
            authority_status: status.to_string(),
            document_xml_base64: None,
            track_id: None,
            is_fictitious: true,
            alert_fired: false,
            parent_folio: None,
            batch_amount: None,
            batch_count: None,
        }
    }
}

/// Store boundary for receipt records.
///
/// At-most-one insert per logical emission is guaranteed by the pipeline's
/// single write path, not by a database constraint; the trait therefore has
/// no upsert or delete surface.
#[async_trait]
pub trait ReceiptStore: Send + Sync + 'static {
    /// Maximum numeric folio prefix among non-fictitious records, `0` when
    /// none exist. Drives the next allocation candidate.
    async fn last_used_folio(&self) -> Result<u64>;

    /// Returns true when any record already carries `folio` verbatim.
    async fn folio_exists(&self, folio: &str) -> Result<bool>;

    /// Whether the most recently inserted record had its alert flag set.
    /// `false` when the store is empty.
    async fn last_alert_fired(&self) -> Result<bool>;

    /// Appends a record. Records are never mutated after insert.
    async fn insert(&self, record: DocumentRecord) -> Result<()>;

    /// Total number of records, for reporting.
    async fn count(&self) -> Result<u64>;
}

// ============================================================================
// SQLite implementation
// ============================================================================

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS receipts (
    id                  INTEGER PRIMARY KEY AUTOINCREMENT,
    folio               TEXT    NOT NULL,
    product             TEXT    NOT NULL,
    gross_amount        INTEGER NOT NULL,
    issued_at           TEXT    NOT NULL,
    authority_status    TEXT    NOT NULL,
    document_xml_base64 TEXT,
    track_id            TEXT,
    is_fictitious       INTEGER NOT NULL DEFAULT 0,
    alert_fired         INTEGER NOT NULL DEFAULT 0,
    parent_folio        TEXT,
    batch_amount        INTEGER,
    batch_count         INTEGER
);
CREATE INDEX IF NOT EXISTS idx_receipts_folio ON receipts(folio);
";

/// SQLite-backed receipt store.
///
/// The connection is shared behind a mutex and every statement runs on the
/// blocking pool, keeping the async callers suspension-safe.
#[derive(Clone)]
pub struct SqliteReceiptStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteReceiptStore {
    /// Opens (or creates) the database at `path` and applies the schema.
    ///
    /// # Errors
    ///
    /// Returns a persistence error when the file cannot be opened or the
    /// schema cannot be applied.
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)
            .map_err(|e| Error::persistence_with_source("cannot open receipts database", e))?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Opens an in-memory database, mainly for tests.
    ///
    /// # Errors
    ///
    /// Returns a persistence error when the schema cannot be applied.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()
            .map_err(|e| Error::persistence_with_source("cannot open in-memory database", e))?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    async fn with_conn<T, F>(&self, op: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&Connection) -> Result<T> + Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let guard = conn
                .lock()
                .map_err(|_| Error::persistence("receipts connection poisoned"))?;
            op(&guard)
        })
        .await
        .map_err(|e| Error::persistence_with_source("blocking store task failed", e))?
    }
}

#[async_trait]
impl ReceiptStore for SqliteReceiptStore {
    async fn last_used_folio(&self) -> Result<u64> {
        self.with_conn(|conn| {
            // CAST takes the numeric prefix of compound folios, so a
            // renumbered `151-482910` still counts as 151.
            let max: Option<i64> = conn.query_row(
                "SELECT MAX(CAST(folio AS INTEGER)) FROM receipts WHERE is_fictitious = 0",
                [],
                |row| row.get(0),
            )?;
            Ok(u64::try_from(max.unwrap_or(0)).unwrap_or(0))
        })
        .await
    }

    async fn folio_exists(&self, folio: &str) -> Result<bool> {
        let folio = folio.to_string();
        self.with_conn(move |conn| {
            let found: Option<i64> = conn
                .query_row(
                    "SELECT 1 FROM receipts WHERE folio = ?1 LIMIT 1",
                    params![folio],
                    |row| row.get(0),
                )
                .optional()?;
            Ok(found.is_some())
        })
        .await
    }

    async fn last_alert_fired(&self) -> Result<bool> {
        self.with_conn(|conn| {
            let fired: Option<bool> = conn
                .query_row(
                    "SELECT alert_fired FROM receipts ORDER BY id DESC LIMIT 1",
                    [],
                    |row| row.get(0),
                )
                .optional()?;
            Ok(fired.unwrap_or(false))
        })
        .await
    }

    async fn insert(&self, record: DocumentRecord) -> Result<()> {
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT INTO receipts (folio, product, gross_amount, issued_at, \
                 authority_status, document_xml_base64, track_id, is_fictitious, \
                 alert_fired, parent_folio, batch_amount, batch_count) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
                params![
                    record.folio,
                    record.product,
                    record.gross_amount,
                    record.issued_at,
                    record.authority_status,
                    record.document_xml_base64,
                    record.track_id,
                    record.is_fictitious,
                    record.alert_fired,
                    record.parent_folio,
                    record.batch_amount,
                    record.batch_count,
                ],
            )?;
            Ok(())
        })
        .await
    }

    async fn count(&self) -> Result<u64> {
        self.with_conn(|conn| {
            let count: i64 = conn.query_row("SELECT COUNT(*) FROM receipts", [], |row| row.get(0))?;
            Ok(u64::try_from(count).unwrap_or(0))
        })
        .await
    }
}

// ============================================================================
// In-memory implementation (tests, debug)
// ============================================================================

/// In-memory receipt store for tests and debug runs.
#[derive(Default)]
pub struct MemoryReceiptStore {
    records: Mutex<Vec<DocumentRecord>>,
}

impl MemoryReceiptStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of all records, in insertion order.
    #[must_use]
    pub fn records(&self) -> Vec<DocumentRecord> {
        self.records.lock().expect("records lock").clone()
    }
}

#[async_trait]
impl ReceiptStore for MemoryReceiptStore {
    async fn last_used_folio(&self) -> Result<u64> {
        let records = self.records.lock().expect("records lock");
        Ok(records
            .iter()
            .filter(|r| !r.is_fictitious)
            .filter_map(|r| numeric_prefix(&r.folio))
            .max()
            .unwrap_or(0))
    }

    async fn folio_exists(&self, folio: &str) -> Result<bool> {
        let records = self.records.lock().expect("records lock");
        Ok(records.iter().any(|r| r.folio == folio))
    }

    async fn last_alert_fired(&self) -> Result<bool> {
        let records = self.records.lock().expect("records lock");
        Ok(records.last().map(|r| r.alert_fired).unwrap_or(false))
    }

    async fn insert(&self, record: DocumentRecord) -> Result<()> {
        self.records.lock().expect("records lock").push(record);
        Ok(())
    }

    async fn count(&self) -> Result<u64> {
        Ok(self.records.lock().expect("records lock").len() as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn real_record(folio: &str, alert_fired: bool) -> DocumentRecord {
        DocumentRecord {
            folio: folio.to_string(),
            product: "Baño".to_string(),
            gross_amount: 500,
            issued_at: "2025-06-01 10:00:00".to_string(),
            authority_status: "EPR".to_string(),
            document_xml_base64: Some("PGR0ZS8+".to_string()),
            track_id: Some("91823".to_string()),
            is_fictitious: false,
            alert_fired,
            parent_folio: None,
            batch_amount: None,
            batch_count: None,
        }
    }

    #[tokio::test]
    async fn sqlite_last_used_folio_ignores_fictitious_and_parses_prefix() {
        let store = SqliteReceiptStore::open_in_memory().unwrap();
        store.insert(real_record("151", false)).await.unwrap();
        store.insert(real_record("153-482910", false)).await.unwrap();
        store
            .insert(DocumentRecord::fictitious(
                "812-4471",
                "Ducha",
                1500,
                "2025-06-01 10:05:00",
                STATUS_FICTITIOUS,
            ))
            .await
            .unwrap();

        assert_eq!(store.last_used_folio().await.unwrap(), 153);
    }

    #[tokio::test]
    async fn sqlite_empty_store_sequences_from_zero() {
        let store = SqliteReceiptStore::open_in_memory().unwrap();
        assert_eq!(store.last_used_folio().await.unwrap(), 0);
        assert!(!store.last_alert_fired().await.unwrap());
        assert_eq!(store.count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn sqlite_folio_exists_matches_verbatim() {
        let store = SqliteReceiptStore::open_in_memory().unwrap();
        store.insert(real_record("151", false)).await.unwrap();
        assert!(store.folio_exists("151").await.unwrap());
        assert!(!store.folio_exists("151-000001").await.unwrap());
    }

    #[tokio::test]
    async fn sqlite_last_alert_fired_reads_most_recent_record() {
        let store = SqliteReceiptStore::open_in_memory().unwrap();
        store.insert(real_record("151", true)).await.unwrap();
        assert!(store.last_alert_fired().await.unwrap());
        store.insert(real_record("152", false)).await.unwrap();
        assert!(!store.last_alert_fired().await.unwrap());
    }

    #[tokio::test]
    async fn memory_store_matches_sqlite_sequencing_semantics() {
        let store = MemoryReceiptStore::new();
        store.insert(real_record("151", false)).await.unwrap();
        store.insert(real_record("153-482910", true)).await.unwrap();
        store
            .insert(DocumentRecord::fictitious(
                "812-4471",
                "Ducha",
                1500,
                "2025-06-01 10:05:00",
                STATUS_FICTITIOUS,
            ))
            .await
            .unwrap();

        assert_eq!(store.last_used_folio().await.unwrap(), 153);
        // Fictitious record is the most recent one and carries flag=false.
        assert!(!store.last_alert_fired().await.unwrap());
        assert_eq!(store.count().await.unwrap(), 3);
    }

    #[tokio::test]
    async fn sqlite_persists_batch_fields() {
        let store = SqliteReceiptStore::open_in_memory().unwrap();
        let mut record = real_record("200", false);
        record.parent_folio = Some("200".to_string());
        record.batch_amount = Some(6000);
        record.batch_count = Some(12);
        store.insert(record).await.unwrap();
        assert_eq!(store.count().await.unwrap(), 1);
        assert!(store.folio_exists("200").await.unwrap());
    }
}
