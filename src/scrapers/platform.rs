//! Platform profiles for the shop systems we recognise by fingerprint

use tracing::debug;

use super::{AdapterContext, Seen, card_item};
use crate::models::{DraftItem, PageSample};
use crate::normalize::{find_price, image_source, normalize_image, resolve_url};
use crate::scraper::{compile, element_text};

/// CSS selectors used to pull listing items out of a known platform.
#[derive(Debug, Clone, Copy)]
pub struct SiteSelectors {
    pub product_container: &'static str,
    pub title: &'static str,
    pub price: &'static str,
    pub link: &'static str,
    pub image: &'static str,
    pub sku: Option<&'static str>,
}

/// A recognisable shop platform.
#[derive(Debug)]
pub struct PlatformProfile {
    pub name: &'static str,
    /// Substrings of the origin host
    pub host_markers: &'static [&'static str],
    /// Lowercase substrings of the raw markup
    pub markup_markers: &'static [&'static str],
    pub selectors: SiteSelectors,
}

/// Registry order is detection order.
pub const PLATFORMS: &[PlatformProfile] = &[
    PlatformProfile {
        name: "shopify",
        host_markers: &["myshopify.com"],
        markup_markers: &["cdn.shopify.com", "shopify.theme", "shopify-section"],
        selectors: SiteSelectors {
            product_container: ".product-card-wrapper, .grid-product, .product-card, .productitem",
            title: ".card__heading, .grid-product__title, .product-card__title, .productitem--title",
            price: ".price-item--sale, .price-item--regular, .grid-product__price, .price",
            link: "a[href*='/products/']",
            image: "img",
            sku: None,
        },
    },
    PlatformProfile {
        name: "shopware",
        host_markers: &[],
        markup_markers: &["/bundles/storefront/", "shopware", "cms-listing-col"],
        selectors: SiteSelectors {
            product_container: ".product-box, .cms-listing-col .card",
            title: ".product-name",
            price: ".product-price",
            link: "a.product-name, a.product-image-link, a[href]",
            image: ".product-image, img",
            sku: Some(".product-number, [itemprop=sku]"),
        },
    },
    PlatformProfile {
        name: "woocommerce",
        host_markers: &[],
        markup_markers: &["woocommerce", "wp-content/plugins/woocommerce"],
        selectors: SiteSelectors {
            product_container: "ul.products li.product, .wc-block-grid__product",
            title: ".woocommerce-loop-product__title, .wc-block-grid__product-title, h2, h3",
            price: ".price",
            link: "a.woocommerce-LoopProduct-link, a.wc-block-grid__product-link, a[href]",
            image: "img",
            sku: Some("[data-product_sku]"),
        },
    },
    PlatformProfile {
        name: "magento",
        host_markers: &[],
        markup_markers: &["data-mage-init", "mage/cookies", "magento_"],
        selectors: SiteSelectors {
            product_container: "li.product-item, .product-item-info",
            title: ".product-item-link, .product-item-name",
            price: "[data-price-type=finalPrice] .price, .price",
            link: "a.product-item-link, a.product-item-photo",
            image: "img.product-image-photo, img",
            sku: None,
        },
    },
    PlatformProfile {
        name: "prestashop",
        host_markers: &[],
        markup_markers: &["prestashop", "product-miniature"],
        selectors: SiteSelectors {
            product_container: ".product-miniature, article.js-product-miniature",
            title: ".product-title",
            price: ".price, .product-price",
            link: ".product-title a, a.thumbnail, a[href]",
            image: "img",
            sku: Some("[data-id-product-reference], .product-reference"),
        },
    },
];

/// First registered platform whose fingerprint matches the sample.
pub fn detect_platform(sample: &PageSample) -> Option<&'static PlatformProfile> {
    let markup = sample.markup.to_lowercase();
    let found = PLATFORMS.iter().find(|profile| {
        profile
            .host_markers
            .iter()
            .any(|marker| sample.origin_host.contains(marker))
            || profile.markup_markers.iter().any(|marker| markup.contains(marker))
    });

    if let Some(profile) = found {
        debug!("Detected platform {} on {}", profile.name, sample.url);
    }
    found
}

pub(crate) fn extract(profile: &PlatformProfile, ctx: &AdapterContext<'_>, limit: usize) -> Vec<DraftItem> {
    let selectors = &profile.selectors;
    let (Some(container), Some(link)) = (compile(selectors.product_container), compile(selectors.link))
    else {
        return Vec::new();
    };
    let title_selector = compile(selectors.title);
    let price_selector = compile(selectors.price);
    let image_selector = compile(selectors.image);
    let sku_selector = selectors.sku.and_then(compile);

    let mut seen = Seen::default();
    let mut items = Vec::new();

    for card in ctx.page.document.select(&container) {
        if items.len() >= limit {
            break;
        }

        let Some(anchor) = card.select(&link).find(|a| {
            a.value()
                .attr("href")
                .and_then(|href| resolve_url(&ctx.page.base, href))
                .is_some_and(|url| !ctx.rules.is_action(&url))
        }) else {
            continue;
        };
        let Some(url) = anchor
            .value()
            .attr("href")
            .and_then(|href| resolve_url(&ctx.page.base, href))
        else {
            continue;
        };
        if !seen.first(&url) {
            continue;
        }

        let mut item = card_item(ctx, &card, Some(&anchor), url);

        // Platform selectors are more precise than the card heuristics.
        if let Some(title) = title_selector.as_ref().and_then(|sel| {
            card.select(sel)
                .map(|el| element_text(&el))
                .find(|t| !t.is_empty())
        }) {
            item.title = title;
        }
        if let Some(price) = price_selector
            .as_ref()
            .and_then(|sel| card.select(sel).find_map(|el| find_price(&element_text(&el))))
        {
            item.price_text = Some(price.amount);
            item.currency = price.currency;
        }
        if let Some(image) = image_selector
            .as_ref()
            .and_then(|sel| card.select(sel).find_map(|img| image_source(&img)))
            .and_then(|src| normalize_image(&ctx.page.base, &src))
        {
            item.image_url = Some(image);
        }
        if let Some(sku) = sku_selector.as_ref().and_then(|sel| {
            card.select(sel).find_map(|el| {
                el.value()
                    .attr("data-product_sku")
                    .or_else(|| el.value().attr("data-id-product-reference"))
                    .map(str::to_string)
                    .or_else(|| Some(element_text(&el)))
                    .filter(|s| !s.trim().is_empty())
            })
        }) {
            item.sku = Some(sku.trim().to_string());
        }

        items.push(item);
    }

    items
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::PageType;
    use crate::scrapers::tests::cascade;

    #[test]
    fn detects_by_markup_fingerprint() {
        let sample = PageSample::new(
            "https://books.test/",
            r#"<link href="/wp-content/plugins/woocommerce/assets/style.css">"#,
        );
        assert_eq!(detect_platform(&sample).map(|p| p.name), Some("woocommerce"));
    }

    #[test]
    fn detects_by_host() {
        let sample = PageSample::new("https://tea-house.myshopify.com/collections/all", "<html></html>");
        assert_eq!(detect_platform(&sample).map(|p| p.name), Some("shopify"));
    }

    #[test]
    fn unknown_platform_is_none() {
        let sample = PageSample::new("https://plain.test/", "<html><body>Hello</body></html>");
        assert!(detect_platform(&sample).is_none());
    }

    #[test]
    fn woocommerce_cards_carry_sku_attribute() {
        let card = |i: usize| {
            format!(
                r#"<li class="product"><a class="woocommerce-LoopProduct-link" href="/shop/book-{i}/">
                <img src="/img/book-{i}.jpg"><h2 class="woocommerce-loop-product__title">Book {i}</h2>
                <span class="price">{i}2,90&nbsp;€</span></a>
                <a href="?add-to-cart=1{i}" data-product_sku="BK-{i}00">Add to cart</a></li>"#
            )
        };
        let markup = format!(
            r#"<html><head><link href="/wp-content/plugins/woocommerce/x.css"></head><body><ul class="products">{}</ul></body></html>"#,
            (1..=3).map(card).collect::<String>()
        );

        let outcome = cascade("https://books.test/shop/", &markup, PageType::Catalog);

        assert_eq!(outcome.selected, Some("woocommerce"));
        let first = &outcome.items[0];
        assert_eq!(first.title, "Book 1");
        assert_eq!(first.detail_url, "https://books.test/shop/book-1/");
        assert_eq!(first.sku.as_deref(), Some("BK-100"));
        assert_eq!(first.price_text.as_deref(), Some("12.90"));
        assert_eq!(first.currency.as_deref(), Some("EUR"));
        assert_eq!(first.image_url.as_deref(), Some("https://books.test/img/book-1.jpg"));
    }
}
