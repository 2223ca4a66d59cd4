//! URL, image and price normalisation shared by every extractor

use std::sync::LazyLock;

use regex::Regex;
use scraper::ElementRef;
use url::Url;

use crate::config::WordLists;

static CURRENCY_PRICE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)(?:(?P<c1>€|\$|£|¥|\bCHF|\bEUR|\bUSD|\bGBP|\bSEK|\bPLN)\s?(?P<n1>\d[\d.,]*\d|\d))|(?:(?P<n2>\d[\d.,]*\d|\d)\s?(?P<c2>€|\$|£|CHF\b|EUR\b|USD\b|GBP\b|SEK\b|PLN\b|kr\b|zł))",
    )
    .expect("valid price pattern")
});

static BARE_DECIMAL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b\d{1,3}(?:[.,]\d{3})*[.,]\d{2}\b").expect("valid decimal pattern")
});

static PLACEHOLDER_IMAGE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)(placeholder|no[-_]?image|no[-_]?photo|spacer|blank\.(gif|png)|loader|loading\.gif|dummy|default[-_]?image|^data:)",
    )
    .expect("valid placeholder pattern")
});

static PRODUCT_PATH: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)(/(products?|produkte?|items?|p|artikel|dp|prod|detail)/[^/?#]+)|([?&](sku|pid|product_?id|item_?id|artikel|article|id)=\d{3,})|(/[a-z0-9-]+-p-?\d{3,}(\.html)?$)",
    )
    .expect("valid product path pattern")
});

/// Resolve an href against `base`. Returns `None` for links that do not
/// lead to another document (fragments, `javascript:`, `mailto:`, ...).
pub fn resolve_url(base: &Url, href: &str) -> Option<String> {
    let href = href.trim();
    if href.is_empty() || href.starts_with('#') {
        return None;
    }
    let lower = href.to_ascii_lowercase();
    if ["javascript:", "mailto:", "tel:", "data:"]
        .iter()
        .any(|scheme| lower.starts_with(scheme))
    {
        return None;
    }

    let mut url = base.join(href).ok()?;
    if !matches!(url.scheme(), "http" | "https") {
        return None;
    }
    url.set_fragment(None);
    Some(url.to_string())
}

/// Canonical form used to compare two URLs for equality: no fragment, no
/// trailing slash on non-root paths.
pub fn canonical_url(raw: &str) -> String {
    match Url::parse(raw) {
        Ok(mut url) => {
            url.set_fragment(None);
            let path = url.path().to_string();
            if path.len() > 1 && path.ends_with('/') {
                url.set_path(path.trim_end_matches('/'));
            }
            url.to_string()
        }
        Err(_) => raw.trim().to_string(),
    }
}

pub fn same_url(a: &str, b: &str) -> bool {
    canonical_url(a) == canonical_url(b)
}

/// Link classification rules compiled from the configured word lists.
#[derive(Debug, Clone)]
pub struct LinkRules {
    generic: Option<Regex>,
    action: Option<Regex>,
}

impl LinkRules {
    pub fn new(words: &WordLists) -> Self {
        Self {
            generic: path_word_pattern(&words.generic_link_words),
            action: path_word_pattern(&words.action_link_words),
        }
    }

    /// Links to help, legal, account and similar site furniture.
    pub fn is_generic(&self, url: &str) -> bool {
        matches_path(self.generic.as_ref(), url)
    }

    /// Per-item action links: cart, wishlist, compare.
    pub fn is_action(&self, url: &str) -> bool {
        matches_path(self.action.as_ref(), url)
    }

    pub fn is_product_path(&self, url: &str) -> bool {
        PRODUCT_PATH.is_match(&path_and_query(url)) && !self.is_generic(url)
    }
}

fn path_word_pattern(words: &[String]) -> Option<Regex> {
    if words.is_empty() {
        return None;
    }
    let alternation = words
        .iter()
        .map(|w| regex::escape(&w.to_lowercase()))
        .collect::<Vec<_>>()
        .join("|");
    // whole path segments (an extension is allowed) or query keys, never a
    // piece of a hyphenated slug
    Regex::new(&format!(
        r"(?:(?:^|/)(?:{alternation})(?:\.[a-z0-9]{{2,5}})?(?:/|\?|$))|(?:[?&](?:{alternation})(?:[=&]|$))"
    ))
    .ok()
}

fn matches_path(pattern: Option<&Regex>, url: &str) -> bool {
    pattern.is_some_and(|re| re.is_match(&path_and_query(url).to_lowercase()))
}

fn path_and_query(url: &str) -> String {
    match Url::parse(url) {
        Ok(parsed) => match parsed.query() {
            Some(query) => format!("{}?{}", parsed.path(), query),
            None => parsed.path().to_string(),
        },
        Err(_) => url.to_string(),
    }
}

/// Best image source of an `<img>` (or `<source>`) element, honouring the
/// usual lazy-loading attributes.
pub fn image_source(img: &ElementRef<'_>) -> Option<String> {
    const ATTRS: [&str; 7] = [
        "data-src",
        "data-lazy-src",
        "data-original",
        "data-zoom-image",
        "data-srcset",
        "srcset",
        "src",
    ];

    ATTRS
        .iter()
        .filter_map(|attr| img.value().attr(attr).map(|value| (*attr, value)))
        .map(|(attr, value)| {
            if attr.ends_with("srcset") {
                // first candidate, without its width descriptor
                value
                    .split(',')
                    .next()
                    .and_then(|candidate| candidate.split_whitespace().next())
                    .unwrap_or("")
                    .to_string()
            } else {
                value.trim().to_string()
            }
        })
        .find(|src| !src.is_empty() && !src.starts_with("data:"))
}

/// Absolute image URL with width templates filled in.
pub fn normalize_image(base: &Url, src: &str) -> Option<String> {
    let mut src = src.trim().replace("{width}", "800");
    if src.starts_with("//") {
        src = format!("{}:{}", base.scheme(), src);
    }
    resolve_url(base, &src)
}

pub fn is_placeholder_image(url: &str) -> bool {
    PLACEHOLDER_IMAGE.is_match(url)
}

/// A price found in free text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PriceMatch {
    /// Amount with `.` as decimal separator and no grouping
    pub amount: String,
    pub currency: Option<String>,
}

/// Whether the text carries a currency-anchored price.
pub fn has_price_token(text: &str) -> bool {
    CURRENCY_PRICE.is_match(text)
}

/// First price in `text`, preferring currency-anchored amounts over bare
/// decimals.
pub fn find_price(text: &str) -> Option<PriceMatch> {
    if let Some(caps) = CURRENCY_PRICE.captures(text) {
        let number = caps.name("n1").or_else(|| caps.name("n2"))?;
        let symbol = caps.name("c1").or_else(|| caps.name("c2"));
        return Some(PriceMatch {
            amount: normalize_amount(number.as_str()),
            currency: symbol.and_then(|s| currency_code(s.as_str())),
        });
    }

    BARE_DECIMAL.find(text).map(|m| PriceMatch {
        amount: normalize_amount(m.as_str()),
        currency: None,
    })
}

/// `1.299,00` and `1,299.00` both become `1299.00`; `1.299` becomes `1299`.
pub fn normalize_amount(raw: &str) -> String {
    let raw = raw.trim().trim_matches(|c: char| c == '.' || c == ',');
    let Some(last_sep) = raw.rfind(['.', ',']) else {
        return raw.to_string();
    };

    let (int_part, frac_part) = (&raw[..last_sep], &raw[last_sep + 1..]);
    let int_digits: String = int_part.chars().filter(char::is_ascii_digit).collect();

    if (1..=2).contains(&frac_part.len()) {
        let int_digits = if int_digits.is_empty() { "0".to_string() } else { int_digits };
        format!("{int_digits}.{frac_part:0<2}")
    } else {
        format!("{int_digits}{frac_part}")
    }
}

/// ISO 4217 code for a currency symbol or code.
pub fn currency_code(symbol: &str) -> Option<String> {
    let code = match symbol.trim().to_uppercase().as_str() {
        "€" | "EUR" => "EUR",
        "$" | "USD" => "USD",
        "£" | "GBP" => "GBP",
        "¥" | "JPY" => "JPY",
        "CHF" => "CHF",
        "KR" | "SEK" => "SEK",
        "ZŁ" | "PLN" => "PLN",
        _ => return None,
    };
    Some(code.to_string())
}
