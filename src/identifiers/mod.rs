//! SKU / EAN extraction from a page or list-item fragment
//!
//! Sources are searched in a fixed order and the first validated value wins:
//!
//! 1. elements hinted as identifiers by class, id, name or `data-*` attributes
//! 2. the fragment's text, line by line, for `<label>: <token>`
//! 3. structured data (JSON-LD and microdata `sku` / `mpn` / `productID`)
//! 4. definition lists and table rows with a label header
//! 5. a whole-text sweep, one pattern per label
//!
//! Values that look like internal check numbers are held back and only
//! returned, flagged `is_last_resort`, when nothing else turned up. A
//! checksum-valid EAN ranks between the two.

pub mod ean;

use regex::Regex;
use scraper::{ElementRef, Html};
use serde_json::Value;
use tracing::debug;

use crate::config::WordLists;
use crate::models::{IdentifierCandidate, IdentifierKind};
use crate::scraper::{compile, element_lines, element_text};

pub use ean::{find_ean, validate_ean8, validate_ean13};

/// A raw value found by one search step.
#[derive(Debug, Clone)]
struct Found {
    value: String,
    /// Introduced by an explicit label rather than inferred
    labeled: bool,
}

impl Found {
    fn labeled(value: &str) -> Self {
        Self {
            value: value.to_string(),
            labeled: true,
        }
    }

    fn unlabeled(value: &str) -> Self {
        Self {
            value: value.to_string(),
            labeled: false,
        }
    }
}

#[derive(Debug, PartialEq, Eq)]
enum Verdict {
    Accept(String),
    LookAlike(String),
    Reject,
}

/// Values held back while the search runs.
#[derive(Default)]
struct Reserve {
    look_alikes: Vec<String>,
    eans: Vec<IdentifierCandidate>,
}

/// Compiled identifier search rules.
#[derive(Debug, Clone)]
pub struct IdentifierExtractor {
    label_value: Regex,
    label_only: Regex,
    label_sweeps: Vec<Regex>,
    disqualifying: Option<Regex>,
    digit_run: Regex,
    prefixed_check: Regex,
    hints: Vec<String>,
}

impl IdentifierExtractor {
    pub fn new(words: &WordLists) -> Self {
        let mut labels: Vec<&String> = words.identifier_labels.iter().collect();
        // longest first so "Artikelnummer" is not cut short by a shorter label
        labels.sort_by_key(|label| std::cmp::Reverse(label.len()));
        let alternation = labels
            .iter()
            .map(|label| regex::escape(label))
            .collect::<Vec<_>>()
            .join("|");

        let disqualifying = (!words.disqualifying_words.is_empty()).then(|| {
            let words = words
                .disqualifying_words
                .iter()
                .map(|w| regex::escape(w))
                .collect::<Vec<_>>()
                .join("|");
            Regex::new(&format!(r"(?i)\b(?:{words})\b")).expect("escaped words form a valid pattern")
        });

        let prefix = regex::escape(words.check_digit_prefix.trim());

        Self {
            label_value: Regex::new(&format!(
                r"(?i)\b(?:{alternation})\.?(?:\s*[:#]\s*|\s+)(\w[\w-]*)"
            ))
            .expect("escaped labels form a valid pattern"),
            label_only: Regex::new(&format!(r"(?i)^\s*(?:{alternation})\.?\s*[:#]?\s*$"))
                .expect("escaped labels form a valid pattern"),
            label_sweeps: labels
                .iter()
                .filter_map(|label| {
                    Regex::new(&format!(r"(?i)\b{}\.?\s*[:#]?\s*(\w[\w-]*)", regex::escape(label)))
                        .ok()
                })
                .collect(),
            disqualifying,
            digit_run: Regex::new(r"\b\d[\d\s-]{6,}\d\b").expect("valid digit run pattern"),
            prefixed_check: Regex::new(&format!(r"^{prefix}[\s-]?\d{{6,10}}$"))
                .expect("escaped prefix forms a valid pattern"),
            hints: words
                .identifier_hints
                .iter()
                .map(|h| h.to_lowercase())
                .collect(),
        }
    }

    /// Convenience wrapper over [`Self::extract`] for raw markup.
    pub fn extract_from_markup(&self, markup: &str) -> Option<IdentifierCandidate> {
        let fragment = Html::parse_fragment(markup);
        self.extract(&fragment.root_element())
    }

    pub fn extract(&self, fragment: &ElementRef<'_>) -> Option<IdentifierCandidate> {
        let mut reserve = Reserve::default();

        let steps: [(&str, Vec<Found>); 5] = [
            ("hinted element", self.from_hints(fragment)),
            ("text line", self.from_lines(fragment, &mut reserve)),
            ("structured data", self.from_structured_data(fragment, &mut reserve)),
            ("table row", self.from_rows(fragment)),
            ("text sweep", self.from_sweep(fragment)),
        ];

        for (step, found) in steps {
            if let Some(value) = self.choose(found, &mut reserve) {
                debug!("Identifier '{}' found via {}", value, step);
                return Some(IdentifierCandidate::sku(value));
            }
        }

        if let Some(ean) = reserve.eans.into_iter().next() {
            return Some(ean);
        }
        let clean_text = self.qualified_lines(fragment).join("\n");
        if let Some(ean) = find_ean(&clean_text) {
            return Some(ean);
        }

        reserve.look_alikes.into_iter().next().map(|value| {
            debug!("Falling back to check-number look-alike '{}'", value);
            IdentifierCandidate {
                value,
                kind: IdentifierKind::Sku,
                validated: false,
                is_last_resort: true,
            }
        })
    }

    /// Validate a step's findings: the first labeled value wins, otherwise
    /// the best-ranked unlabeled one.
    fn choose(&self, found: Vec<Found>, reserve: &mut Reserve) -> Option<String> {
        let mut unlabeled = Vec::new();

        for candidate in found {
            match self.judge(&candidate.value) {
                Verdict::Accept(value) if candidate.labeled => return Some(value),
                Verdict::Accept(value) => unlabeled.push(value),
                Verdict::LookAlike(value) => {
                    if let Some(ean) = ean::ean_candidate(&value) {
                        reserve.eans.push(ean);
                    }
                    reserve.look_alikes.push(value);
                }
                Verdict::Reject => {}
            }
        }

        rank_skus(unlabeled)
    }

    fn judge(&self, raw: &str) -> Verdict {
        let value = raw
            .trim()
            .trim_matches(|c: char| matches!(c, '.' | ',' | ';' | ':' | '-'));
        if value.len() < 3 || value.len() > 40 || !value.chars().any(|c| c.is_ascii_digit()) {
            return Verdict::Reject;
        }
        if self.is_check_number(value) {
            return Verdict::LookAlike(value.to_string());
        }
        Verdict::Accept(value.to_string())
    }

    /// Pure digit strings of eight or more digits, or the configured prefix
    /// followed by 6-10 digits.
    pub fn is_check_number(&self, value: &str) -> bool {
        let value = value.trim();
        (value.len() >= 8 && value.bytes().all(|b| b.is_ascii_digit()))
            || self.prefixed_check.is_match(value)
    }

    fn is_disqualified(&self, line: &str) -> bool {
        self.disqualifying.as_ref().is_some_and(|re| re.is_match(line))
    }

    fn qualified_lines(&self, fragment: &ElementRef<'_>) -> Vec<String> {
        element_lines(fragment)
            .into_iter()
            .filter(|line| !self.is_disqualified(line))
            .collect()
    }

    fn from_hints(&self, fragment: &ElementRef<'_>) -> Vec<Found> {
        let mut found = Vec::new();

        for element in fragment.descendants().filter_map(ElementRef::wrap) {
            let el = element.value();
            let hinted_by_value = ["class", "id", "name"]
                .iter()
                .filter_map(|attr| el.attr(attr))
                .any(|v| self.is_hint(v));

            for (name, value) in el.attrs() {
                if name.starts_with("data-") && self.is_hint(name) && !value.trim().is_empty() {
                    found.push(Found::unlabeled(value));
                }
            }
            if !hinted_by_value {
                continue;
            }

            if matches!(el.name(), "input" | "meta") {
                if let Some(value) = el.attr("value").or_else(|| el.attr("content")) {
                    found.push(Found::unlabeled(value));
                }
                continue;
            }

            let text = element_text(&element);
            if let Some(caps) = self.label_value.captures(&text) {
                found.push(Found::labeled(&caps[1]));
            } else if !text.is_empty() && !text.contains(char::is_whitespace) {
                found.push(Found::unlabeled(&text));
            }
        }

        found
    }

    fn is_hint(&self, value: &str) -> bool {
        let value = value.to_lowercase();
        self.hints.iter().any(|hint| value.contains(hint.as_str()))
    }

    fn from_lines(&self, fragment: &ElementRef<'_>, reserve: &mut Reserve) -> Vec<Found> {
        let lines = element_lines(fragment);
        let mut found = Vec::new();

        for (i, line) in lines.iter().enumerate() {
            if self.is_disqualified(line) {
                for run in self.digit_run.find_iter(line) {
                    let compact: String = run.as_str().chars().filter(|c| !c.is_whitespace()).collect();
                    if self.is_check_number(&compact) || self.is_check_number(run.as_str()) {
                        reserve.look_alikes.push(compact);
                    }
                }
                continue;
            }

            if let Some(caps) = self.label_value.captures(line) {
                found.push(Found::labeled(&caps[1]));
            } else if self.label_only.is_match(line)
                && let Some(next) = lines.get(i + 1)
                && !self.is_disqualified(next)
                && let Some(token) = next.split_whitespace().next()
            {
                found.push(Found::labeled(token));
            }
        }

        found
    }

    fn from_structured_data(&self, fragment: &ElementRef<'_>, reserve: &mut Reserve) -> Vec<Found> {
        let mut found = Vec::new();

        if let Some(script) = compile(r#"script[type="application/ld+json"]"#) {
            for node in fragment.select(&script) {
                let raw: String = node.text().collect();
                match serde_json::from_str::<Value>(raw.trim()) {
                    Ok(json) => collect_json_ids(&json, &mut found, reserve),
                    Err(e) => debug!("Skipping unparsable JSON-LD block: {}", e),
                }
            }
        }

        if let Some(microdata) = compile(
            "[itemprop=sku], [itemprop=mpn], [itemprop=productID], [itemprop=gtin13], [itemprop=gtin8], [itemprop=gtin]",
        ) {
            for node in fragment.select(&microdata) {
                let value = node
                    .value()
                    .attr("content")
                    .map(str::to_string)
                    .unwrap_or_else(|| element_text(&node));
                if node.value().attr("itemprop").is_some_and(|p| p.starts_with("gtin")) {
                    reserve.eans.extend(ean::ean_candidate(&value));
                } else if !value.is_empty() {
                    found.push(Found::unlabeled(&value));
                }
            }
        }

        found
    }

    fn from_rows(&self, fragment: &ElementRef<'_>) -> Vec<Found> {
        let mut found = Vec::new();

        if let Some(terms) = compile("dl > dt") {
            for term in fragment.select(&terms) {
                if !self.label_only.is_match(&element_text(&term)) {
                    continue;
                }
                let definition = term
                    .next_siblings()
                    .filter_map(ElementRef::wrap)
                    .find(|el| el.value().name() == "dd");
                if let Some(token) = definition.and_then(|dd| first_token(&element_text(&dd))) {
                    found.push(Found::labeled(&token));
                }
            }
        }

        if let (Some(rows), Some(cell)) = (compile("tr"), compile("th, td")) {
            for row in fragment.select(&rows) {
                let cells: Vec<String> = row.select(&cell).map(|c| element_text(&c)).collect();
                if let [header, value, ..] = cells.as_slice()
                    && self.label_only.is_match(header)
                    && let Some(token) = first_token(value)
                {
                    found.push(Found::labeled(&token));
                }
            }
        }

        found
    }

    fn from_sweep(&self, fragment: &ElementRef<'_>) -> Vec<Found> {
        let text = self.qualified_lines(fragment).join(" ");
        self.label_sweeps
            .iter()
            .filter_map(|re| re.captures(&text))
            .map(|caps| Found::labeled(&caps[1]))
            .collect()
    }
}

fn first_token(text: &str) -> Option<String> {
    text.split_whitespace().next().map(str::to_string)
}

fn collect_json_ids(value: &Value, found: &mut Vec<Found>, reserve: &mut Reserve) {
    match value {
        Value::Object(map) => {
            for (key, inner) in map {
                let scalar = match inner {
                    Value::String(s) => Some(s.clone()),
                    Value::Number(n) => Some(n.to_string()),
                    _ => None,
                };
                match (key.to_ascii_lowercase().as_str(), scalar) {
                    ("sku" | "mpn" | "productid", Some(s)) => found.push(Found::unlabeled(&s)),
                    ("gtin" | "gtin13" | "gtin8" | "ean", Some(s)) => {
                        reserve.eans.extend(ean::ean_candidate(&s));
                    }
                    _ => collect_json_ids(inner, found, reserve),
                }
            }
        }
        Value::Array(items) => {
            for item in items {
                collect_json_ids(item, found, reserve);
            }
        }
        _ => {}
    }
}

/// Order unlabeled SKU candidates: values with letters first, then values
/// with `-` or `_`, then length closest to 10.
pub fn rank_skus(candidates: Vec<String>) -> Option<String> {
    candidates.into_iter().min_by_key(|value| {
        let has_letter = value.chars().any(char::is_alphabetic);
        let has_separator = value.contains(['-', '_']);
        (!has_letter, !has_separator, value.chars().count().abs_diff(10))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn extractor() -> IdentifierExtractor {
        IdentifierExtractor::new(&WordLists::default())
    }

    #[test]
    fn check_number_alone_is_returned_as_last_resort() {
        let found = extractor()
            .extract_from_markup("<div><p>Prüfziffer 49012345678</p></div>")
            .unwrap();

        assert_eq!(found.value, "49012345678");
        assert!(found.is_last_resort);
    }

    #[test]
    fn labeled_number_beats_check_number() {
        let found = extractor()
            .extract_from_markup(
                "<div><p>Prüfziffer 49012345678</p><p>Artikel-Nr.: XYZ-100</p></div>",
            )
            .unwrap();

        assert_eq!(found.value, "XYZ-100");
        assert!(!found.is_last_resort);
        assert_eq!(found.kind, IdentifierKind::Sku);
    }

    #[test]
    fn hinted_element_wins_over_later_steps() {
        let markup = r#"
            <div>
              <span class="product-sku">AB-2231</span>
              <script type="application/ld+json">{"@type":"Product","sku":"JSON-9"}</script>
            </div>"#;

        assert_eq!(extractor().extract_from_markup(markup).unwrap().value, "AB-2231");
    }

    #[test]
    fn label_and_value_in_separate_elements() {
        let markup = "<ul><li><span>Artikelnummer:</span>\n<span>K-4410</span></li></ul>";

        assert_eq!(extractor().extract_from_markup(markup).unwrap().value, "K-4410");
    }

    #[test]
    fn hersteller_lines_are_skipped() {
        let markup = "<div><p>Hersteller: ACME 2000</p><p>SKU: Q-7781</p></div>";

        assert_eq!(extractor().extract_from_markup(markup).unwrap().value, "Q-7781");
    }

    #[test]
    fn nested_json_ld_offers_are_searched() {
        let markup = r#"<script type="application/ld+json">
            {"@graph": [{"@type": "WebPage"}, {"@type": "Product", "offers": {"sku": "OFF-12"}}]}
        </script>"#;

        assert_eq!(extractor().extract_from_markup(markup).unwrap().value, "OFF-12");
    }

    #[test]
    fn table_rows_with_label_header() {
        let markup = "<table><tr><th>Farbe</th><td>Rot</td></tr><tr><th>Modell</th><td>RX-500 neu</td></tr></table>";
        let fragment = Html::parse_fragment(markup);

        let found = extractor().from_rows(&fragment.root_element());

        assert_eq!(found.len(), 1);
        assert_eq!(found[0].value, "RX-500");
        assert!(found[0].labeled);
    }

    #[test]
    fn definition_list_row() {
        let markup = "<dl><dt>Farbe</dt><dd>Blau</dd><dt>MPN</dt><dd>M-55-B</dd></dl>";
        let fragment = Html::parse_fragment(markup);

        let found = extractor().from_rows(&fragment.root_element());
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].value, "M-55-B");

        assert_eq!(extractor().extract_from_markup(markup).unwrap().value, "M-55-B");
    }

    #[test]
    fn valid_ean_used_when_no_sku_exists() {
        let found = extractor()
            .extract_from_markup("<p>EAN 4006381333931</p>")
            .unwrap();

        assert_eq!(found.kind, IdentifierKind::Ean13);
        assert!(found.validated);
    }

    #[test]
    fn values_without_digits_are_rejected() {
        assert_eq!(extractor().extract_from_markup("<p>SKU: unbekannt</p>"), None);
    }

    #[test]
    fn ranking_prefers_letters_then_separators_then_length() {
        assert_eq!(
            rank_skus(vec!["1234567".into(), "AB12345".into(), "AB-12345".into()]).as_deref(),
            Some("AB-12345")
        );
        assert_eq!(
            rank_skus(vec!["A1".into(), "A123456789".into()]).as_deref(),
            Some("A123456789")
        );
    }

    #[test]
    fn prefixed_check_numbers_are_look_alikes() {
        let extractor = extractor();

        assert!(extractor.is_check_number("49-1234567"));
        assert!(extractor.is_check_number("12345678"));
        assert!(!extractor.is_check_number("AB-1234567"));
    }
}
