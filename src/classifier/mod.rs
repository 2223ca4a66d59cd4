//! Structural page classification and item-container location
//!
//! The decision is split into pure pieces so the weights can be tuned and
//! tested without markup: [`collect_signals`] reads the document,
//! [`decide`] turns counts into a page type, and [`score_root`] rates a
//! candidate container.

use std::collections::HashSet;
use std::sync::LazyLock;

use regex::Regex;
use scraper::ElementRef;
use serde_json::Value;
use tracing::debug;

use crate::config::{ClassifierWeights, WordLists};
use crate::models::{CandidateRoot, PageSignals, PageType, StructuralVerdict};
use crate::normalize::{LinkRules, has_price_token, resolve_url};
use crate::scraper::{Page, compile, compile_all, element_text};

/// Shapes of a single product card across common storefront themes.
pub const CARD_SELECTORS: &[&str] = &[
    ".product-card",
    ".product-item",
    ".product-tile",
    ".product-box",
    ".product-miniature",
    ".productbox",
    ".card-product",
    ".grid-product",
    ".product-grid-item",
    ".product-list-item",
    "li.product",
    "article.product",
    "[data-product-id]",
];

/// Item container patterns, most specific first.
pub const ROOT_PATTERNS: &[&str] = &[
    "ul.products > li.product",
    ".product-grid .grid__item",
    ".cms-listing-row .cms-listing-col",
    ".product-items > .product-item",
    ".products .product-miniature",
    ".product-list > *",
    ".product-grid > *",
    ".product-listing > *",
    ".products > *",
    "[class*=product-list] > *",
    "[class*=product-grid] > *",
    "[class*=products] > li",
    ".items > *",
    ".grid > *",
];

/// Whole-document fallback when no container pattern scores above the base.
pub const DOCUMENT_ROOT: &str = "html";

static CARD_CLASS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)(^|[\s_-])(product|item|card|tile|box|article|artikel)([\s_-]|$)")
        .expect("valid card class pattern")
});

/// Whether an element looks like a product card by tag or class.
pub fn is_card_shaped(element: &ElementRef<'_>) -> bool {
    let el = element.value();
    matches!(el.name(), "li" | "article")
        || el.attr("data-product-id").is_some()
        || el.attr("class").is_some_and(|class| CARD_CLASS.is_match(class))
}

/// Classify a parsed page.
pub fn classify(page: &Page<'_>, words: &WordLists, weights: &ClassifierWeights) -> StructuralVerdict {
    let rules = LinkRules::new(words);
    let signals = collect_signals(page, &rules, words, weights);
    let (page_type, confidence) = decide(&signals, weights);
    let root = locate_root(page, weights);

    debug!(
        "Classified {} as {:?} ({:.2}); cards={} product_anchors={} price={} cart={} root='{}'",
        page.sample.url,
        page_type,
        confidence,
        signals.card_count,
        signals.product_anchors,
        signals.has_price,
        signals.has_cart,
        root.selector_path
    );

    StructuralVerdict {
        page_type,
        confidence,
        root,
        signals,
    }
}

/// Turn page signals into a page type and confidence.
pub fn decide(signals: &PageSignals, weights: &ClassifierWeights) -> (PageType, f32) {
    if signals.structured_product {
        return (PageType::Product, 1.0);
    }

    let commerce = signals.has_price || signals.has_cart;

    if signals.card_count <= weights.product_max_cards && commerce && signals.image_count >= 1 {
        return (PageType::Product, weights.product_confidence);
    }

    if signals.card_count >= weights.catalog_min_cards
        || signals.product_anchors >= weights.catalog_min_anchors
    {
        if !commerce && signals.generic_link_ratio >= weights.generic_ratio_limit {
            return (PageType::Homepage, weights.homepage_confidence);
        }
        let evidence = signals.card_count as f32 * weights.catalog_card_unit
            + signals.product_anchors as f32 * weights.catalog_anchor_unit;
        let confidence =
            (weights.catalog_base_confidence + evidence).min(weights.catalog_confidence_cap);
        return (PageType::Catalog, confidence);
    }

    (PageType::Homepage, weights.homepage_confidence)
}

pub fn collect_signals(
    page: &Page<'_>,
    rules: &LinkRules,
    words: &WordLists,
    weights: &ClassifierWeights,
) -> PageSignals {
    let anchors: Vec<String> = compile("a[href]")
        .map(|sel| {
            page.document
                .select(&sel)
                .filter_map(|a| a.value().attr("href"))
                .filter_map(|href| resolve_url(&page.base, href))
                .collect()
        })
        .unwrap_or_default();

    let product_anchors = anchors.iter().filter(|url| rules.is_product_path(url)).count();

    let sample: Vec<&String> = anchors.iter().take(weights.generic_sample).collect();
    let generic_link_ratio = if sample.is_empty() {
        0.0
    } else {
        sample.iter().filter(|url| rules.is_generic(url)).count() as f32 / sample.len() as f32
    };

    let text = page.text();

    PageSignals {
        structured_product: has_structured_product(page),
        product_anchors,
        card_count: count_cards(page),
        image_count: compile("img").map_or(0, |sel| page.document.select(&sel).count()),
        has_price: has_price_token(&text),
        has_cart: has_cart_phrase(page, &text, words),
        generic_link_ratio,
    }
}

/// Outermost elements matching any card shape.
fn count_cards(page: &Page<'_>) -> usize {
    let selectors = compile_all(CARD_SELECTORS);
    let matched: HashSet<_> = selectors
        .iter()
        .flat_map(|(_, sel)| page.document.select(sel))
        .map(|el| el.id())
        .collect();

    selectors
        .iter()
        .flat_map(|(_, sel)| page.document.select(sel))
        .filter(|el| !el.ancestors().any(|a| matched.contains(&a.id())))
        .map(|el| el.id())
        .collect::<HashSet<_>>()
        .len()
}

fn has_cart_phrase(page: &Page<'_>, text: &str, words: &WordLists) -> bool {
    let mut haystack = text.to_lowercase();
    if let Some(controls) = compile("button, input[type=submit], a[title], [aria-label]") {
        for control in page.document.select(&controls) {
            for attr in ["value", "title", "aria-label"] {
                if let Some(value) = control.value().attr(attr) {
                    haystack.push(' ');
                    haystack.push_str(&value.to_lowercase());
                }
            }
        }
    }

    words
        .cart_phrases
        .iter()
        .any(|phrase| haystack.contains(&phrase.to_lowercase()))
}

/// JSON-LD or microdata that declares this page to be a single product.
///
/// Only top-level records (or `@graph` members) count; products nested in an
/// `ItemList` describe a listing, not this page.
pub fn has_structured_product(page: &Page<'_>) -> bool {
    if let Some(script) = compile(r#"script[type="application/ld+json"]"#) {
        for node in page.document.select(&script) {
            let raw: String = node.text().collect();
            let Ok(json) = serde_json::from_str::<Value>(raw.trim()) else {
                continue;
            };
            if top_level_records(&json).any(is_product_record) {
                return true;
            }
        }
    }

    compile(r#"[itemscope][itemtype*="schema.org/Product"]"#)
        .is_some_and(|sel| page.document.select(&sel).count() == 1)
}

fn top_level_records(json: &Value) -> Box<dyn Iterator<Item = &Value> + '_> {
    match json {
        Value::Array(items) => Box::new(items.iter().flat_map(top_level_records)),
        Value::Object(map) => match map.get("@graph") {
            Some(graph) => Box::new(std::iter::once(json).chain(top_level_records(graph))),
            None => Box::new(std::iter::once(json)),
        },
        _ => Box::new(std::iter::empty()),
    }
}

fn is_product_record(record: &Value) -> bool {
    let typed_product = match record.get("@type") {
        Some(Value::String(t)) => t.eq_ignore_ascii_case("product"),
        Some(Value::Array(types)) => types
            .iter()
            .any(|t| t.as_str().is_some_and(|t| t.eq_ignore_ascii_case("product"))),
        _ => false,
    };

    typed_product || record.get("offers").is_some_and(offer_has_price)
}

fn offer_has_price(offers: &Value) -> bool {
    match offers {
        Value::Array(items) => items.iter().any(offer_has_price),
        Value::Object(map) => ["price", "lowPrice"].iter().any(|k| map.contains_key(*k)),
        _ => false,
    }
}

/// `0.2 + min(0.4, price*0.04) + min(0.2, links*0.01) + min(0.2, images*0.01)`
/// with the constants taken from `weights`.
pub fn score_root(price_like: usize, links: usize, images: usize, weights: &ClassifierWeights) -> f32 {
    weights.root_base
        + (price_like as f32 * weights.root_price_unit).min(weights.root_price_cap)
        + (links as f32 * weights.root_link_unit).min(weights.root_link_cap)
        + (images as f32 * weights.root_image_unit).min(weights.root_image_cap)
}

/// Best repeating item container, or the whole document.
pub fn locate_root(page: &Page<'_>, weights: &ClassifierWeights) -> CandidateRoot {
    let links = compile("a[href]");
    let images = compile("img");
    let mut best: Option<CandidateRoot> = None;

    for (pattern, selector) in compile_all(ROOT_PATTERNS) {
        let matched: Vec<ElementRef<'_>> = page.document.select(&selector).collect();
        if matched.is_empty() {
            continue;
        }

        let sample = &matched[..matched.len().min(weights.root_sample)];
        let price_like_count = sample
            .iter()
            .filter(|item| has_price_token(&element_text(item)))
            .count();
        let link_count = links
            .as_ref()
            .map_or(0, |sel| sample.iter().map(|item| item.select(sel).count()).sum());
        let image_count = images
            .as_ref()
            .map_or(0, |sel| sample.iter().map(|item| item.select(sel).count()).sum());

        let candidate = CandidateRoot {
            selector_path: pattern,
            score: score_root(price_like_count, link_count, image_count, weights),
            node_count: matched.len(),
            price_like_count,
            link_count,
            image_count,
        };

        if best.as_ref().is_none_or(|b| candidate.score > b.score) {
            best = Some(candidate);
        }
    }

    match best {
        Some(root) if root.score > weights.root_base => root,
        _ => CandidateRoot {
            selector_path: DOCUMENT_ROOT.to_string(),
            score: weights.root_fallback_confidence,
            node_count: 1,
            price_like_count: 0,
            link_count: 0,
            image_count: 0,
        },
    }
}
