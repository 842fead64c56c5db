//! # boletera-core
//!
//! Domain logic for folio/CAF allocation and electronic-receipt emission.
//!
//! This crate holds everything the back office needs to turn a sale into a
//! durable, authority-backed receipt record:
//!
//! - **CAF Store**: reads authorized folio-range certificates off disk
//! - **Folio Allocator**: computes the next folio and remaining capacity
//! - **Fictitious Generator**: placeholder folios when no range applies
//! - **Emission Pipeline**: generate → envelope → submit → poll → persist
//! - **Receipt Store**: insert-only record history (SQLite or in-memory)
//! - **Alerting**: edge-triggered low-capacity latch
//!
//! ## Crate Boundary
//!
//! Transport concerns stay outside: the invoicing gateway and the alert
//! notifier are traits ([`gateway::TaxGateway`], [`alert::AlertNotifier`])
//! implemented by the API crate. The pipeline coordinates three unreliable
//! collaborators — disk, database, external authority — with no transaction
//! spanning them, so every contract here spells out which side wins on
//! partial failure.

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(rust_2018_idioms)]
#![warn(clippy::pedantic)]

pub mod alert;
pub mod caf;
pub mod clock;
pub mod dte;
pub mod error;
pub mod fictitious;
pub mod folio;
pub mod gateway;
pub mod observability;
pub mod pipeline;
pub mod store;

pub use error::{Error, Result};

/// Prelude module for convenient imports.
pub mod prelude {
    pub use crate::alert::{AlertNotifier, NoopNotifier};
    pub use crate::caf::{CafRange, CafResolution};
    pub use crate::dte::{CertificateRef, IssuerIdentity, SaleItem};
    pub use crate::error::{Error, Result};
    pub use crate::folio::{AllocationResult, FolioAllocator};
    pub use crate::gateway::TaxGateway;
    pub use crate::pipeline::{EmissionOutcome, EmissionPipeline};
    pub use crate::store::{DocumentRecord, MemoryReceiptStore, ReceiptStore, SqliteReceiptStore};
}
