//! EAN-8 / EAN-13 recognition with checksum validation

use std::sync::LazyLock;

use regex::Regex;

use crate::models::{IdentifierCandidate, IdentifierKind};

static EAN_RUN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)(?P<label>\b(?:EAN|GTIN)(?:[- ]?(?:13|8))?\s*[:#]?\s*)?\b(?P<code>\d{13}|\d{8})\b")
        .expect("valid EAN pattern")
});

pub fn validate_ean13(code: &str) -> bool {
    code.len() == 13 && checksum_ok(code)
}

pub fn validate_ean8(code: &str) -> bool {
    code.len() == 8 && checksum_ok(code)
}

/// Weighted mod-10 check: counting from the digit left of the check digit,
/// weights alternate 3, 1, 3, ...
fn checksum_ok(code: &str) -> bool {
    if !code.bytes().all(|b| b.is_ascii_digit()) {
        return false;
    }
    let digits: Vec<u32> = code.bytes().map(|b| u32::from(b - b'0')).collect();
    let Some((&check, payload)) = digits.split_last() else {
        return false;
    };

    let sum: u32 = payload
        .iter()
        .rev()
        .enumerate()
        .map(|(i, d)| if i % 2 == 0 { d * 3 } else { *d })
        .sum();

    (10 - sum % 10) % 10 == check
}

/// Candidate for a single value, if it is a checksum-valid EAN.
pub fn ean_candidate(value: &str) -> Option<IdentifierCandidate> {
    let value = value.trim();
    let kind = if validate_ean13(value) {
        IdentifierKind::Ean13
    } else if validate_ean8(value) {
        IdentifierKind::Ean8
    } else {
        return None;
    };

    Some(IdentifierCandidate {
        value: value.to_string(),
        kind,
        validated: true,
        is_last_resort: false,
    })
}

/// First checksum-valid EAN in `text`. Labeled codes win over bare runs,
/// EAN-13 over EAN-8.
pub fn find_ean(text: &str) -> Option<IdentifierCandidate> {
    let mut found: Vec<(bool, IdentifierCandidate)> = EAN_RUN
        .captures_iter(text)
        .filter_map(|caps| {
            let labeled = caps.name("label").is_some();
            ean_candidate(caps.name("code")?.as_str()).map(|c| (labeled, c))
        })
        .collect();

    // stable: document order survives within each rank
    found.sort_by_key(|(labeled, c)| (!labeled, c.kind != IdentifierKind::Ean13));
    found.into_iter().next().map(|(_, c)| c)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validates_known_ean13() {
        assert!(validate_ean13("4006381333931"));
        assert!(!validate_ean13("4006381333932"));
        assert!(!validate_ean13("400638133393"));
    }

    #[test]
    fn validates_known_ean8() {
        assert!(validate_ean8("96385074"));
        assert!(!validate_ean8("96385075"));
        assert!(validate_ean8("73513537"));
    }

    #[test]
    fn rejects_non_digits() {
        assert!(!validate_ean13("40063813339a1"));
    }

    #[test]
    fn prefers_labeled_codes() {
        let text = "Ref 96385074 - EAN: 4006381333931";
        let candidate = find_ean(text).unwrap();

        assert_eq!(candidate.value, "4006381333931");
        assert_eq!(candidate.kind, IdentifierKind::Ean13);
    }

    #[test]
    fn ignores_checksum_failures() {
        assert_eq!(find_ean("EAN 4006381333932"), None);
    }
}
