//! Low-capacity alerting: an edge-triggered latch over receipt records.
//!
//! The alert fires at most once per depletion episode. The latch is keyed
//! off the immediately preceding record's flag rather than a time window:
//! once a record below the threshold carries the flag, subsequent low
//! readings inherit it silently, and the episode resets only when a reading
//! clears the threshold again (a fresh CAF was loaded).

use async_trait::async_trait;

use crate::error::Result;

/// Default remaining-folio threshold below which the alert engages.
pub const DEFAULT_ALERT_THRESHOLD: u64 = 10_000;

/// Outcome of one latch evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AlertDecision {
    /// Whether to emit the out-of-band notification now.
    pub fire: bool,
    /// The alert flag to stamp on the record being inserted.
    pub flag: bool,
}

/// Evaluates the latch for a new remaining-capacity reading.
///
/// `previous_flag` is the alert flag of the most recently persisted record
/// (`false` for an empty store).
#[must_use]
pub fn evaluate(remaining_capacity: u64, threshold: u64, previous_flag: bool) -> AlertDecision {
    if remaining_capacity >= threshold {
        return AlertDecision {
            fire: false,
            flag: false,
        };
    }
    AlertDecision {
        fire: !previous_flag,
        flag: true,
    }
}

/// Out-of-band notification sink for depletion alerts.
///
/// Delivery transport (webhook, mail relay) lives outside the core; a
/// failed notification is logged by the pipeline and never fails the
/// emission.
#[async_trait]
pub trait AlertNotifier: Send + Sync + 'static {
    /// Notifies that only `remaining_capacity` folios are left.
    async fn notify_low_capacity(&self, remaining_capacity: u64) -> Result<()>;
}

/// Notifier that only logs, for debug runs and tests.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopNotifier;

#[async_trait]
impl AlertNotifier for NoopNotifier {
    async fn notify_low_capacity(&self, remaining_capacity: u64) -> Result<()> {
        tracing::info!(remaining_capacity, "low-folio alert (noop notifier)");
        Ok(())
    }
}
