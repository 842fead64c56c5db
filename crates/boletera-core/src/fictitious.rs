//! Fictitious folio generation.
//!
//! When no real folio is assignable (no CAF files, a gap below the next
//! range, or true exhaustion) the register must keep issuing receipts, so
//! the pipeline records a placeholder with a locally-unique compound
//! identifier instead of blocking the sale.

use rand::Rng;

use crate::error::{Error, Result};
use crate::store::ReceiptStore;

/// Upper bound on regeneration attempts before giving up.
///
/// The `NNN-NNNN` space holds ten million identifiers against a volume of
/// at most a few thousand fictitious receipts per depletion episode, so the
/// bound exists to guarantee termination, not because collisions are
/// expected. The residual probability of exhausting all attempts is
/// accepted.
const MAX_ATTEMPTS: u32 = 32;

/// Produces a random `NNN-NNNN` candidate.
fn candidate() -> String {
    let mut rng = rand::thread_rng();
    format!(
        "{:03}-{:04}",
        rng.gen_range(0..1000u32),
        rng.gen_range(0..10000u32)
    )
}

/// Generates a fictitious folio not yet present in the store.
///
/// # Errors
///
/// Returns a persistence error when the store lookup fails, or an internal
/// error after [`MAX_ATTEMPTS`] collisions.
pub async fn generate_unique(store: &dyn ReceiptStore) -> Result<String> {
    for _ in 0..MAX_ATTEMPTS {
        let folio = candidate();
        if !store.folio_exists(&folio).await? {
            return Ok(folio);
        }
        tracing::debug!(%folio, "fictitious folio collision, regenerating");
    }
    Err(Error::internal(format!(
        "could not generate a unique fictitious folio after {MAX_ATTEMPTS} attempts"
    )))
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;
    use std::sync::Mutex;

    use async_trait::async_trait;

    use super::*;
    use crate::error::Result;
    use crate::store::{DocumentRecord, MemoryReceiptStore};

    #[test]
    fn candidates_match_compound_format() {
        for _ in 0..100 {
            let folio = candidate();
            let (head, tail) = folio.split_once('-').unwrap();
            assert_eq!(head.len(), 3);
            assert_eq!(tail.len(), 4);
            assert!(head.chars().all(|c| c.is_ascii_digit()));
            assert!(tail.chars().all(|c| c.is_ascii_digit()));
        }
    }

    /// Store whose existence check cycles through a small collision set,
    /// forcing regeneration without ever exhausting the attempt budget.
    #[derive(Default)]
    struct CyclingCollisionStore {
        seen: Mutex<HashSet<String>>,
        calls: Mutex<u32>,
    }

    #[async_trait]
    impl ReceiptStore for CyclingCollisionStore {
        async fn last_used_folio(&self) -> Result<u64> {
            Ok(0)
        }

        async fn folio_exists(&self, folio: &str) -> Result<bool> {
            let mut calls = self.calls.lock().unwrap();
            *calls += 1;
            // Every seventh lookup reports a collision once.
            if *calls % 7 == 0 {
                return Ok(true);
            }
            Ok(!self.seen.lock().unwrap().insert(folio.to_string()))
        }

        async fn last_alert_fired(&self) -> Result<bool> {
            Ok(false)
        }

        async fn insert(&self, _record: DocumentRecord) -> Result<()> {
            Ok(())
        }

        async fn count(&self) -> Result<u64> {
            Ok(0)
        }
    }

    #[tokio::test]
    async fn generated_folios_are_pairwise_distinct_under_collisions() {
        let store = CyclingCollisionStore::default();
        let mut produced = HashSet::new();
        for _ in 0..10_000 {
            let folio = generate_unique(&store).await.unwrap();
            assert!(produced.insert(folio), "duplicate fictitious folio");
        }
    }

    #[tokio::test]
    async fn generation_succeeds_against_empty_store() {
        let store = MemoryReceiptStore::new();
        let folio = generate_unique(&store).await.unwrap();
        assert!(folio.contains('-'));
    }
}
