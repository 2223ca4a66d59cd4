//! Extraction adapters and the cascade that picks between them
//!
//! The registry is static and ordered: a platform adapter chosen by
//! fingerprint, then the generic anchor adapter, then the last-resort anchor
//! sweep. The first adapter producing at least [`ACCEPTANCE_THRESHOLD`] valid
//! items wins, so identical input always selects the same adapter.

pub mod generic;
pub mod last_resort;
pub mod platform;

use std::collections::HashSet;

use scraper::ElementRef;
use serde::Serialize;
use tracing::{debug, info};

use crate::identifiers::IdentifierExtractor;
use crate::models::{DraftItem, PageType};
use crate::normalize::{LinkRules, find_price, image_source, normalize_image};
use crate::scraper::{Page, compile, element_text};

pub use platform::{PLATFORMS, PlatformProfile, SiteSelectors, detect_platform};

/// Valid items an adapter must produce to be accepted.
pub const ACCEPTANCE_THRESHOLD: usize = 3;

const TITLE_LIMIT: usize = 300;

/// Everything an adapter may read while extracting.
pub struct AdapterContext<'a> {
    pub page: &'a Page<'a>,
    pub rules: &'a LinkRules,
    pub identifiers: &'a IdentifierExtractor,
    /// Item container chosen by the classifier
    pub root_selector: &'a str,
}

/// One extraction strategy.
#[derive(Debug, Clone, Copy)]
pub enum Adapter {
    Platform(&'static PlatformProfile),
    GenericAnchors,
    LastResortAnchors,
}

impl Adapter {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Platform(profile) => profile.name,
            Self::GenericAnchors => "generic-anchors",
            Self::LastResortAnchors => "last-resort-anchors",
        }
    }

    /// Extract up to `limit` items. Pure with respect to the page.
    pub fn extract(&self, ctx: &AdapterContext<'_>, limit: usize) -> Vec<DraftItem> {
        match self {
            Self::Platform(profile) => platform::extract(profile, ctx, limit),
            Self::GenericAnchors => generic::extract(ctx, limit),
            Self::LastResortAnchors => last_resort::extract(ctx, limit),
        }
    }
}

/// How one adapter fared.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AdapterAttempt {
    pub adapter: &'static str,
    pub items: usize,
    pub valid: usize,
}

#[derive(Debug, Clone)]
pub struct CascadeOutcome {
    /// Adapter whose items were kept; `None` when nothing produced output
    pub selected: Option<&'static str>,
    pub platform: Option<&'static str>,
    pub attempts: Vec<AdapterAttempt>,
    pub items: Vec<DraftItem>,
}

pub fn valid_count(items: &[DraftItem]) -> usize {
    items.iter().filter(|item| item.is_valid()).count()
}

/// Run the cascade over one listing page.
pub fn run_cascade(ctx: &AdapterContext<'_>, page_type: PageType, limit: usize) -> CascadeOutcome {
    let platform = detect_platform(ctx.page.sample);
    let mut attempts = Vec::new();
    let mut best: Option<(Adapter, Vec<DraftItem>, usize)> = None;

    let mut candidates = Vec::new();
    if let Some(profile) = platform {
        candidates.push(Adapter::Platform(profile));
    }
    if platform.is_some() || page_type == PageType::Catalog {
        candidates.push(Adapter::GenericAnchors);
    }

    for adapter in candidates {
        let items = adapter.extract(ctx, limit);
        let valid = valid_count(&items);
        attempts.push(AdapterAttempt {
            adapter: adapter.name(),
            items: items.len(),
            valid,
        });

        if valid >= ACCEPTANCE_THRESHOLD {
            return finish(ctx, Some(adapter), platform, attempts, items, limit);
        }
        debug!(
            "Adapter {} produced {} valid items on {}, below threshold",
            adapter.name(),
            valid,
            ctx.page.sample.url
        );
        if valid > 0 && best.as_ref().is_none_or(|(_, _, best_valid)| valid > *best_valid) {
            best = Some((adapter, items, valid));
        }
    }

    if let Some((adapter, items, _)) = best {
        return finish(ctx, Some(adapter), platform, attempts, items, limit);
    }

    let adapter = Adapter::LastResortAnchors;
    let items = adapter.extract(ctx, limit);
    attempts.push(AdapterAttempt {
        adapter: adapter.name(),
        items: items.len(),
        valid: valid_count(&items),
    });
    let selected = (!items.is_empty()).then_some(adapter);
    finish(ctx, selected, platform, attempts, items, limit)
}

fn finish(
    ctx: &AdapterContext<'_>,
    adapter: Option<Adapter>,
    platform: Option<&'static PlatformProfile>,
    attempts: Vec<AdapterAttempt>,
    items: Vec<DraftItem>,
    limit: usize,
) -> CascadeOutcome {
    let before = items.len();
    let items: Vec<DraftItem> = items
        .into_iter()
        .filter(|item| item.is_valid() && !ctx.rules.is_generic(&item.detail_url))
        .take(limit)
        .collect();

    info!(
        "Selected adapter {} for {}: {} items ({} dropped)",
        adapter.map_or("none", |a| a.name()),
        ctx.page.sample.url,
        items.len(),
        before.saturating_sub(items.len())
    );

    CascadeOutcome {
        selected: adapter.map(|a| a.name()),
        platform: platform.map(|p| p.name),
        attempts,
        items,
    }
}

/// Tracks URLs already emitted by one adapter run.
#[derive(Default)]
pub(crate) struct Seen(HashSet<String>);

impl Seen {
    /// True the first time a URL is offered.
    pub(crate) fn first(&mut self, url: &str) -> bool {
        self.0.insert(url.to_string())
    }
}

/// Build an item from a card-shaped block and the link chosen inside it.
pub(crate) fn card_item(
    ctx: &AdapterContext<'_>,
    card: &ElementRef<'_>,
    anchor: Option<&ElementRef<'_>>,
    detail_url: String,
) -> DraftItem {
    let title = compile("h1, h2, h3, h4, h5, [class*=title], [class*=name]")
        .and_then(|sel| {
            card.select(&sel)
                .map(|el| element_text(&el))
                .find(|t| !t.is_empty())
        })
        .or_else(|| anchor.and_then(|a| a.value().attr("title")).map(str::to_string))
        .or_else(|| anchor.map(element_text).filter(|t| !t.is_empty()))
        .or_else(|| {
            compile("img[alt]").and_then(|sel| {
                card.select(&sel)
                    .filter_map(|img| img.value().attr("alt"))
                    .map(str::trim)
                    .find(|alt| !alt.is_empty())
                    .map(str::to_string)
            })
        })
        .unwrap_or_default();

    let image_url = compile("img, source")
        .and_then(|sel| card.select(&sel).find_map(|img| image_source(&img)))
        .and_then(|src| normalize_image(&ctx.page.base, &src));

    let price = compile("[class*=price]")
        .and_then(|sel| card.select(&sel).find_map(|el| find_price(&element_text(&el))))
        .or_else(|| find_price(&element_text(card)));

    let (price_text, currency) = match price {
        Some(p) => (Some(p.amount), p.currency),
        None => (None, None),
    };

    DraftItem {
        sku: ctx.identifiers.extract(card).map(|c| c.value),
        title: title.chars().take(TITLE_LIMIT).collect(),
        detail_url,
        image_url,
        price_text,
        currency,
        moq: None,
        description: None,
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::classifier::DOCUMENT_ROOT;
    use crate::config::WordLists;
    use crate::models::PageSample;

    /// Run the cascade over markup served from `url`.
    pub(crate) fn cascade(url: &str, markup: &str, page_type: PageType) -> CascadeOutcome {
        let sample = PageSample::new(url, markup);
        let page = Page::parse(&sample).unwrap();
        let words = WordLists::default();
        let rules = LinkRules::new(&words);
        let identifiers = IdentifierExtractor::new(&words);
        let ctx = AdapterContext {
            page: &page,
            rules: &rules,
            identifiers: &identifiers,
            root_selector: DOCUMENT_ROOT,
        };
        run_cascade(&ctx, page_type, 100)
    }

    fn shopify_card(i: usize) -> String {
        format!(
            r#"<div class="product-card-wrapper"><a href="/products/mug-{i}"><h3 class="card__heading">Mug {i}</h3></a><span class="price-item--regular">{i}.50 $</span></div>"#
        )
    }

    fn tile(i: usize) -> String {
        format!(
            r#"<div class="product-tile"><a href="/products/plate-{i}"><img src="/img/plate-{i}.jpg" alt="Plate {i}"></a><p class="tile-price">$ {i}.00</p></div>"#
        )
    }

    const SHOPIFY_HEAD: &str = r#"<head><link rel="stylesheet" href="//cdn.shopify.com/s/files/theme.css"></head>"#;

    #[test]
    fn platform_adapter_accepted_at_threshold() {
        let markup = format!(
            "<html>{SHOPIFY_HEAD}<body>{}</body></html>",
            (1..=4).map(shopify_card).collect::<String>()
        );

        let outcome = cascade("https://mugs.test/collections/all", &markup, PageType::Catalog);

        assert_eq!(outcome.platform, Some("shopify"));
        assert_eq!(outcome.selected, Some("shopify"));
        assert_eq!(outcome.items.len(), 4);
        assert_eq!(outcome.items[0].title, "Mug 1");
        assert_eq!(outcome.items[0].price_text.as_deref(), Some("1.50"));
        assert_eq!(outcome.items[0].detail_url, "https://mugs.test/products/mug-1");
    }

    #[test]
    fn generic_adapter_replaces_thin_platform_output() {
        let markup = format!(
            "<html>{SHOPIFY_HEAD}<body>{}{}</body></html>",
            (1..=2).map(shopify_card).collect::<String>(),
            (1..=5).map(tile).collect::<String>()
        );

        let outcome = cascade("https://mugs.test/collections/all", &markup, PageType::Catalog);

        assert_eq!(outcome.attempts[0].adapter, "shopify");
        assert_eq!(outcome.attempts[0].valid, 2);
        assert_eq!(outcome.selected, Some("generic-anchors"));
        assert!(outcome.items.len() >= 3);
        assert!(
            outcome
                .items
                .iter()
                .any(|item| item.detail_url == "https://mugs.test/products/plate-3"
                    && item.title == "Plate 3")
        );
    }

    #[test]
    fn last_resort_only_when_nothing_else_yields() {
        let markup = r#"<body>
            <a href="/help">Help</a>
            <a href="/cart">Cart</a>
            <a href="/shoes/red-runner">Red Runner</a>
            <a href="/shoes/red-runner#reviews">Red Runner reviews</a>
            <a href="/shoes/blue-runner">Blue Runner</a>
        </body>"#;

        let outcome = cascade("https://shoes.test/", markup, PageType::Homepage);

        assert_eq!(outcome.platform, None);
        assert_eq!(outcome.selected, Some("last-resort-anchors"));
        let urls: Vec<_> = outcome.items.iter().map(|i| i.detail_url.as_str()).collect();
        assert_eq!(
            urls,
            vec!["https://shoes.test/shoes/red-runner", "https://shoes.test/shoes/blue-runner"]
        );
    }

    #[test]
    fn slugs_containing_denylisted_words_are_kept() {
        let slugs = [
            "cookie-jar",
            "help-desk-bell",
            "shipping-box-large",
            "about-time-dvd",
            "blue-cart-wheel",
            "jobs-biography",
        ];
        let cards: String = slugs
            .iter()
            .map(|slug| {
                format!(r#"<article class="product"><a href="/products/{slug}"><h3>{slug}</h3></a><span class="price">9,00 €</span></article>"#)
            })
            .collect();

        let outcome = cascade("https://gifts.test/c", &format!("<body>{cards}</body>"), PageType::Catalog);

        assert_eq!(outcome.selected, Some("generic-anchors"));
        let urls: Vec<_> = outcome.items.iter().map(|i| i.detail_url.clone()).collect();
        let expected: Vec<_> = slugs
            .iter()
            .map(|slug| format!("https://gifts.test/products/{slug}"))
            .collect();
        assert_eq!(urls, expected);
    }

    #[test]
    fn empty_page_returns_no_items() {
        let outcome = cascade("https://shoes.test/", "<body><p>Closed</p></body>", PageType::Homepage);

        assert!(outcome.items.is_empty());
        assert_eq!(outcome.selected, None);
    }

    #[test]
    fn cascade_is_deterministic() {
        let markup = format!(
            "<html>{SHOPIFY_HEAD}<body>{}{}</body></html>",
            (1..=2).map(shopify_card).collect::<String>(),
            (1..=5).map(tile).collect::<String>()
        );

        let first = cascade("https://mugs.test/c", &markup, PageType::Catalog);
        let second = cascade("https://mugs.test/c", &markup, PageType::Catalog);

        assert_eq!(first.selected, second.selected);
        assert_eq!(first.items, second.items);
    }
}
