//! Civil-time helpers for the issuing site.
//!
//! All persisted timestamps and DTE emission dates use local time in
//! `America/Santiago`, matching what the authority expects on the document.

use chrono::{DateTime, Utc};
use chrono_tz::America::Santiago;
use chrono_tz::Tz;

/// Returns the current civil time in Santiago.
#[must_use]
pub fn now_santiago() -> DateTime<Tz> {
    Utc::now().with_timezone(&Santiago)
}

/// Emission date for the DTE header, `YYYY-MM-DD`.
#[must_use]
pub fn emission_date() -> String {
    now_santiago().format("%Y-%m-%d").to_string()
}

/// Timestamp persisted on receipt records, `YYYY-MM-DD HH:MM:SS`.
#[must_use]
pub fn record_timestamp() -> String {
    now_santiago().format("%Y-%m-%d %H:%M:%S").to_string()
}

/// Compact timestamp used for CAF file names, `YYYYMMDDHHMMSS`.
#[must_use]
pub fn caf_file_timestamp() -> String {
    now_santiago().format("%Y%m%d%H%M%S").to_string()
}
