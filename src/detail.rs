//! Field extraction from a single product (detail) page

use std::sync::LazyLock;

use regex::Regex;
use serde_json::Value;

use crate::identifiers::IdentifierExtractor;
use crate::models::{DraftItem, IdentifierCandidate};
use crate::normalize::{
    PriceMatch, currency_code, find_price, image_source, is_placeholder_image, normalize_amount,
    normalize_image,
};
use crate::scraper::{Page, compile, element_text};

static MOQ: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)\b(?:MOQ|Mindestbestellmenge|Mindestabnahme|Mindestmenge|minimum order(?: quantity)?|min\.\s?order)\s*[:.]?\s*(\d+(?:[.,]\d+)?(?:\s?(?:Stück|Stk|pcs|pieces|units|St)\b\.?)?)",
    )
    .expect("valid MOQ pattern")
});

const DESCRIPTION_LIMIT: usize = 2000;

/// Everything a detail page can tell about its product.
#[derive(Debug, Clone, Default)]
pub struct DetailFields {
    pub title: Option<String>,
    pub price: Option<PriceMatch>,
    pub image_url: Option<String>,
    pub description: Option<String>,
    pub moq: Option<String>,
    pub identifier: Option<IdentifierCandidate>,
}

impl DetailFields {
    /// Build a draft item for a page that is itself the product.
    pub fn into_item(self, url: &str) -> DraftItem {
        let (price_text, currency) = match self.price {
            Some(price) => (Some(price.amount), price.currency),
            None => (None, None),
        };

        DraftItem {
            sku: self.identifier.map(|c| c.value),
            title: self.title.unwrap_or_default(),
            detail_url: url.to_string(),
            image_url: self.image_url,
            price_text,
            currency,
            moq: self.moq,
            description: self.description,
        }
    }
}

pub fn extract_detail(page: &Page<'_>, identifiers: &IdentifierExtractor) -> DetailFields {
    let product = product_json(page);

    DetailFields {
        title: extract_title(page, product.as_ref()),
        price: extract_price(page, product.as_ref()),
        image_url: extract_image(page, product.as_ref()),
        description: extract_description(page),
        moq: MOQ
            .captures(&page.text())
            .map(|caps| caps[1].trim().to_string()),
        identifier: identifiers.extract(&page.root()),
    }
}

/// First JSON-LD record typed `Product`, searched through `@graph` and arrays.
fn product_json(page: &Page<'_>) -> Option<Value> {
    let script = compile(r#"script[type="application/ld+json"]"#)?;
    page.document
        .select(&script)
        .filter_map(|node| serde_json::from_str::<Value>(node.text().collect::<String>().trim()).ok())
        .find_map(|json| find_product(&json).cloned())
}

fn find_product(json: &Value) -> Option<&Value> {
    match json {
        Value::Array(items) => items.iter().find_map(find_product),
        Value::Object(map) => {
            let is_product = match map.get("@type") {
                Some(Value::String(t)) => t.eq_ignore_ascii_case("product"),
                Some(Value::Array(ts)) => ts.iter().any(|t| t.as_str() == Some("Product")),
                _ => false,
            };
            if is_product {
                return Some(json);
            }
            map.get("@graph").and_then(find_product)
        }
        _ => None,
    }
}

fn meta_content(page: &Page<'_>, css: &str) -> Option<String> {
    let selector = compile(css)?;
    page.document
        .select(&selector)
        .filter_map(|el| el.value().attr("content"))
        .map(str::trim)
        .find(|v| !v.is_empty())
        .map(str::to_string)
}

fn first_text(page: &Page<'_>, css: &str) -> Option<String> {
    let selector = compile(css)?;
    page.document
        .select(&selector)
        .map(|el| element_text(&el))
        .find(|t| !t.is_empty())
}

fn extract_title(page: &Page<'_>, product: Option<&Value>) -> Option<String> {
    product
        .and_then(|p| p.get("name"))
        .and_then(Value::as_str)
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .or_else(|| meta_content(page, r#"meta[property="og:title"]"#))
        .or_else(|| first_text(page, "h1"))
        .or_else(|| first_text(page, "title"))
}

fn extract_price(page: &Page<'_>, product: Option<&Value>) -> Option<PriceMatch> {
    if let Some(offer) = product.and_then(|p| p.get("offers")) {
        let offer = match offer {
            Value::Array(items) => items.first().unwrap_or(offer),
            other => other,
        };
        let amount = offer
            .get("price")
            .or_else(|| offer.get("lowPrice"))
            .and_then(|v| match v {
                Value::String(s) => Some(s.clone()),
                Value::Number(n) => Some(n.to_string()),
                _ => None,
            });
        if let Some(amount) = amount {
            return Some(PriceMatch {
                amount: normalize_amount(&amount),
                currency: offer
                    .get("priceCurrency")
                    .and_then(Value::as_str)
                    .and_then(currency_code),
            });
        }
    }

    if let Some(amount) = meta_content(page, r#"[itemprop="price"], meta[property="product:price:amount"]"#) {
        let currency = meta_content(
            page,
            r#"[itemprop="priceCurrency"], meta[property="product:price:currency"]"#,
        )
        .and_then(|c| currency_code(&c));
        return Some(PriceMatch {
            amount: normalize_amount(&amount),
            currency,
        });
    }

    let selector = compile(".product-price, .price, [class*=price], [itemprop=price]")?;
    page.document
        .select(&selector)
        .find_map(|el| find_price(&element_text(&el)))
}

fn extract_image(page: &Page<'_>, product: Option<&Value>) -> Option<String> {
    let from_json = product.and_then(|p| p.get("image")).and_then(|image| match image {
        Value::String(s) => Some(s.clone()),
        Value::Array(items) => items.first().and_then(|i| match i {
            Value::String(s) => Some(s.clone()),
            other => other.get("url").and_then(Value::as_str).map(str::to_string),
        }),
        other => other.get("url").and_then(Value::as_str).map(str::to_string),
    });

    let candidates = meta_content(page, r#"meta[property="og:image"]"#)
        .into_iter()
        .chain(from_json)
        .chain(meta_content(page, r#"meta[itemprop="image"]"#));

    let from_markup = compile(
        ".product-image img, .product-gallery img, .gallery img, [itemprop=image], [class*=product] img, main img",
    )
    .map(|sel| {
        page.document
            .select(&sel)
            .filter_map(|img| image_source(&img))
            .collect::<Vec<_>>()
    })
    .unwrap_or_default();

    candidates
        .chain(from_markup)
        .filter_map(|src| normalize_image(&page.base, &src))
        .find(|url| !is_placeholder_image(url))
}

fn extract_description(page: &Page<'_>) -> Option<String> {
    let description = first_text(page, "[itemprop=description], .product-description, #description")
        .or_else(|| meta_content(page, r#"meta[name="description"], meta[property="og:description"]"#))?;

    Some(description.chars().take(DESCRIPTION_LIMIT).collect())
}
