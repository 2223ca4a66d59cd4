//! Data models for fetched pages, classification verdicts and product records

use serde::{Deserialize, Serialize};

/// One fetched document.
#[derive(Debug, Clone)]
pub struct PageSample {
    /// Final URL of the document, after redirects
    pub url: String,
    /// Host the document was served from
    pub origin_host: String,
    pub markup: String,
}

impl PageSample {
    pub fn new(url: impl Into<String>, markup: impl Into<String>) -> Self {
        let url = url.into();
        let origin_host = url::Url::parse(&url)
            .ok()
            .and_then(|u| u.host_str().map(str::to_string))
            .unwrap_or_default();

        Self {
            url,
            origin_host,
            markup: markup.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PageType {
    Homepage,
    Catalog,
    Product,
}

/// Raw counts the classifier based its decision on.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PageSignals {
    pub structured_product: bool,
    pub product_anchors: usize,
    pub card_count: usize,
    pub image_count: usize,
    pub has_price: bool,
    pub has_cart: bool,
    /// Share of the leading anchors that point at generic site links
    pub generic_link_ratio: f32,
}

/// Scoring record for one candidate container pattern.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CandidateRoot {
    pub selector_path: String,
    pub score: f32,
    pub node_count: usize,
    pub price_like_count: usize,
    pub link_count: usize,
    pub image_count: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct StructuralVerdict {
    pub page_type: PageType,
    pub confidence: f32,
    pub root: CandidateRoot,
    pub signals: PageSignals,
}

impl StructuralVerdict {
    pub fn root_selector(&self) -> &str {
        &self.root.selector_path
    }
}

/// A product record while it is still being assembled.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DraftItem {
    pub sku: Option<String>,
    pub title: String,
    pub detail_url: String,
    pub image_url: Option<String>,
    pub price_text: Option<String>,
    pub currency: Option<String>,
    pub moq: Option<String>,
    pub description: Option<String>,
}

impl DraftItem {
    /// Items need a title and a link to count toward the acceptance threshold.
    pub fn is_valid(&self) -> bool {
        !self.title.trim().is_empty() && !self.detail_url.trim().is_empty()
    }

    pub fn needs_enrichment(&self) -> bool {
        self.sku.is_none() || (self.price_text.is_none() && self.image_url.is_none())
    }
}

/// The emitted record, handed to persistence and exporters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Product {
    pub title: String,
    pub sku: Option<String>,
    pub price: Option<String>,
    pub currency: Option<String>,
    pub moq: Option<String>,
    pub image_url: Option<String>,
    pub detail_url: String,
    pub description: Option<String>,
}

impl From<DraftItem> for Product {
    fn from(item: DraftItem) -> Self {
        Self {
            title: item.title,
            sku: item.sku,
            price: item.price_text,
            currency: item.currency,
            moq: item.moq,
            image_url: item.image_url,
            detail_url: item.detail_url,
            description: item.description,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum IdentifierKind {
    Ean13,
    Ean8,
    Sku,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IdentifierCandidate {
    pub value: String,
    pub kind: IdentifierKind,
    pub validated: bool,
    /// Set when the value looks like an internal check number and was only
    /// accepted because nothing else was found.
    pub is_last_resort: bool,
}

impl IdentifierCandidate {
    pub fn sku(value: impl Into<String>) -> Self {
        Self {
            value: value.into(),
            kind: IdentifierKind::Sku,
            validated: true,
            is_last_resort: false,
        }
    }
}
