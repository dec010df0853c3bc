//! Callsign normalization and canonical-format validation.
//!
//! A callsign is the primary key of every aggregate, so one normal form is
//! enforced at the boundary: uppercase, trimmed, portable designators
//! stripped. `EI6LF`, `ei6lf` and `EI6LF/P` all identify the same station.

use std::sync::LazyLock;

use regex::Regex;

/// Canonical amateur callsign shape: one to three alphanumeric prefix
/// characters, a separating digit, then a suffix ending in a letter.
static CALLSIGN_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Z0-9]{1,3}[0-9][A-Z0-9]{0,3}[A-Z]$").expect("callsign pattern"));

/// Normalizes `raw` to its base callsign, or `None` when no segment of the
/// input is a valid callsign.
///
/// Portable forms are reduced to the base call by taking the longest
/// `/`-separated segment that matches the canonical pattern, so both
/// `EI6LF/P` and `EA8/EI6LF` normalize to `EI6LF`.
pub fn normalize(raw: &str) -> Option<String> {
    let upper = raw.trim().to_ascii_uppercase();
    if upper.is_empty() {
        return None;
    }

    upper
        .split('/')
        .filter(|seg| CALLSIGN_RE.is_match(seg))
        .max_by_key(|seg| seg.len())
        .map(str::to_owned)
}

/// Returns true when `raw` normalizes to a valid base callsign.
pub fn is_valid(raw: &str) -> bool {
    normalize(raw).is_some()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_calls_normalize_to_uppercase() {
        assert_eq!(normalize("ei6lf").as_deref(), Some("EI6LF"));
        assert_eq!(normalize(" W1ABC ").as_deref(), Some("W1ABC"));
        assert_eq!(normalize("9A1AA").as_deref(), Some("9A1AA"));
    }

    #[test]
    fn portable_designators_are_stripped() {
        assert_eq!(normalize("EI6LF/P").as_deref(), Some("EI6LF"));
        assert_eq!(normalize("EA8/EI6LF").as_deref(), Some("EI6LF"));
        assert_eq!(normalize("W1ABC/QRP").as_deref(), Some("W1ABC"));
    }

    #[test]
    fn garbage_is_rejected() {
        assert!(normalize("").is_none());
        assert!(normalize("/").is_none());
        assert!(normalize("QSL?").is_none());
        assert!(normalize("THE-QUEUE").is_none());
        assert!(normalize("12345").is_none());
    }
}
