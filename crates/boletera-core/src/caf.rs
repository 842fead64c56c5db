//! CAF store: reads and parses authorized folio-range certificates.
//!
//! A CAF (Certificate of Authorized Folios) is an XML document deposited in
//! a directory on disk. Each file declares one contiguous folio range via a
//! `<RNG><D>from</D><H>to</H></RNG>` marker, plus the resolution date
//! (`<FA>`) and number (`<IDK>`) needed for the submission envelope.
//!
//! The directory is re-read on every allocation. New files can be deposited
//! at any time by the folio-request endpoint, and a stale view could
//! reassign a consumed folio after a fresh CAF lands.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use regex::Regex;

use crate::error::{Error, Result};

static RANGE_MARKER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"<RNG>\s*<D>(\d+)</D>\s*<H>(\d+)</H>\s*</RNG>").expect("invalid range pattern")
});

static RESOLUTION_DATE_MARKER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"<FA>(.*?)</FA>").expect("invalid resolution date pattern"));

static RESOLUTION_NUMBER_MARKER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"<IDK>(\d+)</IDK>").expect("invalid resolution number pattern"));

/// Resolution metadata carried by a CAF, required on submission envelopes.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct CafResolution {
    /// Resolution date as it appears in the certificate (`YYYY-MM-DD`).
    pub date: String,
    /// Resolution number.
    pub number: u32,
}

/// One authorized folio-range certificate on disk.
///
/// Immutable once loaded. Ranges across files may be disjoint or, by
/// misconfiguration, overlapping; the allocator tolerates overlap by
/// processing ranges in ascending `from` order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CafRange {
    /// File name within the CAF directory, used as the range identity.
    pub file_id: String,
    /// Absolute path to the certificate file.
    pub path: PathBuf,
    /// First authorized folio, inclusive.
    pub from: u64,
    /// Last authorized folio, inclusive.
    pub to: u64,
    /// Resolution metadata, when the markers were present.
    pub resolution: Option<CafResolution>,
}

impl CafRange {
    /// Returns true when `folio` falls inside this range.
    #[must_use]
    pub fn contains(&self, folio: u64) -> bool {
        folio >= self.from && folio <= self.to
    }

    /// Total number of folios the certificate authorizes.
    #[must_use]
    pub fn span(&self) -> u64 {
        self.to - self.from + 1
    }

    /// Returns the resolution metadata.
    ///
    /// # Errors
    ///
    /// Returns [`Error::CafParse`] if the certificate lacked the resolution
    /// markers. Deferred to first use so that range scanning never fails on
    /// an incomplete certificate.
    pub fn resolution(&self) -> Result<&CafResolution> {
        self.resolution.as_ref().ok_or_else(|| Error::CafParse {
            file: self.file_id.clone(),
            message: "missing resolution markers (<FA>/<IDK>)".to_string(),
        })
    }
}

/// Parses the folio range out of a certificate body.
///
/// Returns `None` when the range marker is absent or malformed, which
/// callers treat as "not a CAF", not as an error.
#[must_use]
pub fn parse_range(content: &str) -> Option<(u64, u64)> {
    let captures = RANGE_MARKER.captures(content)?;
    let from = captures.get(1)?.as_str().parse().ok()?;
    let to: u64 = captures.get(2)?.as_str().parse().ok()?;
    if to < from {
        return None;
    }
    Some((from, to))
}

/// Parses the resolution metadata out of a certificate body.
#[must_use]
pub fn parse_resolution(content: &str) -> Option<CafResolution> {
    let date = RESOLUTION_DATE_MARKER.captures(content)?.get(1)?.as_str();
    let number = RESOLUTION_NUMBER_MARKER
        .captures(content)?
        .get(1)?
        .as_str()
        .parse()
        .ok()?;
    Some(CafResolution {
        date: date.trim().to_string(),
        number,
    })
}

/// Loads every parseable CAF range from `directory`, ascending by `from`.
///
/// Only files with an `.xml` extension are considered. A file that cannot
/// be read or lacks a parseable range marker is skipped: malformed or
/// irrelevant files in the drop directory are expected, not exceptional.
///
/// # Errors
///
/// Returns [`Error::StoreUnavailable`] only when the directory itself
/// cannot be listed. An empty directory is a valid empty state.
pub fn load_ranges(directory: &Path) -> Result<Vec<CafRange>> {
    let entries = fs::read_dir(directory).map_err(|e| {
        Error::store_unavailable_with_source(
            format!("cannot list CAF directory {}", directory.display()),
            e,
        )
    })?;

    let mut ranges = Vec::new();
    for entry in entries {
        let Ok(entry) = entry else { continue };
        let path = entry.path();
        if path.extension().and_then(|ext| ext.to_str()) != Some("xml") {
            continue;
        }
        let Ok(content) = fs::read_to_string(&path) else {
            tracing::debug!(file = %path.display(), "skipping unreadable CAF file");
            continue;
        };
        let Some((from, to)) = parse_range(&content) else {
            tracing::debug!(file = %path.display(), "skipping file without range marker");
            continue;
        };
        let file_id = entry.file_name().to_string_lossy().into_owned();
        ranges.push(CafRange {
            file_id,
            path,
            from,
            to,
            resolution: parse_resolution(&content),
        });
    }

    ranges.sort_by_key(|range| range.from);
    Ok(ranges)
}

#[cfg(test)]
pub(crate) mod test_support {
    /// Minimal CAF body carrying range and resolution markers.
    pub(crate) fn caf_body(from: u64, to: u64) -> String {
        format!(
            "<AUTORIZACION><CAF version=\"1.0\"><DA>\
             <RE>76123456-7</RE><TD>39</TD>\
             <RNG><D>{from}</D><H>{to}</H></RNG>\
             <FA>2025-03-14</FA><IDK>300</IDK>\
             </DA></CAF></AUTORIZACION>"
        )
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::caf_body;
    use super::*;

    #[test]
    fn parse_range_extracts_bounds() {
        assert_eq!(parse_range(&caf_body(100, 199)), Some((100, 199)));
    }

    #[test]
    fn parse_range_rejects_inverted_bounds() {
        assert_eq!(parse_range(&caf_body(200, 100)), None);
    }

    #[test]
    fn parse_range_tolerates_whitespace_between_markers() {
        let body = "<RNG>\n  <D>5</D>\n  <H>9</H>\n</RNG>";
        assert_eq!(parse_range(body), Some((5, 9)));
    }

    #[test]
    fn parse_resolution_extracts_date_and_number() {
        let resolution = parse_resolution(&caf_body(1, 10)).unwrap();
        assert_eq!(resolution.date, "2025-03-14");
        assert_eq!(resolution.number, 300);
    }

    #[test]
    fn load_ranges_skips_files_without_markers_and_sorts() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("b.xml"), caf_body(500, 600)).unwrap();
        std::fs::write(dir.path().join("a.xml"), caf_body(100, 199)).unwrap();
        std::fs::write(dir.path().join("junk.xml"), "<not-a-caf/>").unwrap();
        std::fs::write(dir.path().join("notes.txt"), "ignore me").unwrap();

        let ranges = load_ranges(dir.path()).unwrap();
        assert_eq!(ranges.len(), 2);
        assert_eq!(ranges[0].from, 100);
        assert_eq!(ranges[1].from, 500);
        assert_eq!(ranges[0].file_id, "a.xml");
    }

    #[test]
    fn load_ranges_empty_directory_is_ok() {
        let dir = tempfile::tempdir().unwrap();
        assert!(load_ranges(dir.path()).unwrap().is_empty());
    }

    #[test]
    fn load_ranges_missing_directory_is_store_unavailable() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("nope");
        let err = load_ranges(&missing).unwrap_err();
        assert!(matches!(err, Error::StoreUnavailable { .. }));
    }

    #[test]
    fn resolution_accessor_errors_when_markers_absent() {
        let range = CafRange {
            file_id: "caf_1.xml".to_string(),
            path: PathBuf::from("/tmp/caf_1.xml"),
            from: 1,
            to: 10,
            resolution: None,
        };
        assert!(matches!(range.resolution(), Err(Error::CafParse { .. })));
    }
}
