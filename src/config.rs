//! Invocation options, politeness presets, word lists and scoring weights

use std::path::Path;
use std::time::Duration;

use serde::Deserialize;
use tracing::{info, warn};

use crate::error::HarvestError;

/// How hard the harvester may hit a site.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SpeedPreset {
    #[default]
    Normal,
    Fast,
}

impl SpeedPreset {
    pub fn politeness(self) -> Politeness {
        match self {
            Self::Normal => Politeness {
                workers: 3,
                retries: 3,
                delay_min: Duration::from_millis(220),
                delay_max: Duration::from_millis(440),
                timeout: Duration::from_secs(18),
            },
            Self::Fast => Politeness {
                workers: 10,
                retries: 1,
                delay_min: Duration::from_millis(60),
                delay_max: Duration::from_millis(120),
                timeout: Duration::from_secs(9),
            },
        }
    }
}

impl std::str::FromStr for SpeedPreset {
    type Err = HarvestError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "normal" => Ok(Self::Normal),
            "fast" => Ok(Self::Fast),
            other => Err(HarvestError::Config(format!("unknown speed preset '{other}'"))),
        }
    }
}

/// Concurrency, retry and pacing settings for outbound fetches.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Politeness {
    pub workers: usize,
    pub retries: u32,
    pub delay_min: Duration,
    pub delay_max: Duration,
    pub timeout: Duration,
}

/// Language-listed strings that drive the heuristics. Any subset can be
/// overridden from a JSON file.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct WordLists {
    /// Labels that introduce an article number
    pub identifier_labels: Vec<String>,
    /// Bare words that disqualify a text line from the identifier scan
    pub disqualifying_words: Vec<String>,
    /// Class, id and attribute fragments that mark an identifier element
    pub identifier_hints: Vec<String>,
    /// Path fragments of generic site links (help, legal, account, ...)
    pub generic_link_words: Vec<String>,
    /// Path fragments of per-item action links
    pub action_link_words: Vec<String>,
    pub cart_phrases: Vec<String>,
    pub next_words: Vec<String>,
    /// Two-digit prefix of internal check numbers
    pub check_digit_prefix: String,
}

impl Default for WordLists {
    fn default() -> Self {
        fn owned(words: &[&str]) -> Vec<String> {
            words.iter().map(|w| (*w).to_string()).collect()
        }

        Self {
            identifier_labels: owned(&[
                "Herstellernummer",
                "Artikelnummer",
                "Bestellnummer",
                "Artikel-Nr",
                "Art.-Nr",
                "Item number",
                "Product code",
                "SKU",
                "MPN",
                "Modell",
            ]),
            disqualifying_words: owned(&["Prüfziffer", "Hersteller"]),
            identifier_hints: owned(&[
                "sku",
                "ordernumber",
                "order-number",
                "product-number",
                "productnumber",
                "article-number",
                "artikelnummer",
                "item-number",
            ]),
            generic_link_words: owned(&[
                "help", "hilfe", "faq", "privacy", "datenschutz", "login", "logout", "signin",
                "register", "account", "konto", "cart", "warenkorb", "basket", "checkout",
                "legal", "impressum", "imprint", "agb", "terms", "newsletter", "contact",
                "kontakt", "about", "ueber-uns", "shipping", "versand", "returns", "widerruf",
                "careers", "jobs", "blog", "cookie", "sitemap",
            ]),
            action_link_words: owned(&[
                "cart", "warenkorb", "basket", "wishlist", "wunschliste", "merkzettel",
                "compare", "vergleich", "add-to-cart", "add_to_cart",
            ]),
            cart_phrases: owned(&[
                "add to cart",
                "add to basket",
                "in den warenkorb",
                "ajouter au panier",
                "añadir al carrito",
                "aggiungi al carrello",
                "in winkelwagen",
                "dodaj do koszyka",
                "lägg i varukorgen",
                "adicionar ao carrinho",
                "buy now",
                "jetzt kaufen",
            ]),
            next_words: owned(&[
                "next", "weiter", "nächste", "naechste", "suivant", "siguiente", "próxima",
                "successivo", "volgende", "następna", "nästa", "næste", "seuraava", "další",
                "sonraki", "»", "›",
            ]),
            check_digit_prefix: "49".to_string(),
        }
    }
}

impl WordLists {
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, HarvestError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|e| {
            HarvestError::Config(format!("cannot read word lists {}: {e}", path.display()))
        })?;
        serde_json::from_str(&raw).map_err(|e| {
            HarvestError::Config(format!("invalid word lists {}: {e}", path.display()))
        })
    }
}

/// Empirically tuned scoring constants for the classifier and root locator.
#[derive(Debug, Clone, PartialEq)]
pub struct ClassifierWeights {
    pub product_max_cards: usize,
    pub catalog_min_cards: usize,
    pub catalog_min_anchors: usize,
    pub generic_ratio_limit: f32,
    pub generic_sample: usize,
    pub product_confidence: f32,
    pub catalog_base_confidence: f32,
    /// Confidence added per card and per product anchor on a catalog
    pub catalog_card_unit: f32,
    pub catalog_anchor_unit: f32,
    pub catalog_confidence_cap: f32,
    pub homepage_confidence: f32,
    pub root_base: f32,
    pub root_price_unit: f32,
    pub root_price_cap: f32,
    pub root_link_unit: f32,
    pub root_link_cap: f32,
    pub root_image_unit: f32,
    pub root_image_cap: f32,
    pub root_sample: usize,
    pub root_fallback_confidence: f32,
}

impl Default for ClassifierWeights {
    fn default() -> Self {
        Self {
            product_max_cards: 3,
            catalog_min_cards: 6,
            catalog_min_anchors: 12,
            generic_ratio_limit: 0.4,
            generic_sample: 60,
            product_confidence: 0.7,
            catalog_base_confidence: 0.5,
            catalog_card_unit: 0.02,
            catalog_anchor_unit: 0.01,
            catalog_confidence_cap: 0.95,
            homepage_confidence: 0.5,
            root_base: 0.2,
            root_price_unit: 0.04,
            root_price_cap: 0.4,
            root_link_unit: 0.01,
            root_link_cap: 0.2,
            root_image_unit: 0.01,
            root_image_cap: 0.2,
            root_sample: 12,
            root_fallback_confidence: 0.1,
        }
    }
}

/// Parameters of one pipeline invocation.
#[derive(Debug, Clone)]
pub struct HarvestOptions {
    pub limit: usize,
    pub speed: SpeedPreset,
    pub enable_detail_enrichment: bool,
    pub max_pages: usize,
    /// Seed for the politeness delays; `None` uses fresh randomness
    pub seed: Option<u64>,
    pub words: WordLists,
    pub weights: ClassifierWeights,
}

impl Default for HarvestOptions {
    fn default() -> Self {
        Self {
            limit: 100,
            speed: SpeedPreset::Normal,
            enable_detail_enrichment: true,
            max_pages: 50,
            seed: None,
            words: WordLists::default(),
            weights: ClassifierWeights::default(),
        }
    }
}

impl HarvestOptions {
    pub fn politeness(&self) -> Politeness {
        self.speed.politeness()
    }
}

/// Binary-level configuration, read from the environment.
#[derive(Debug, Clone)]
pub struct HarvestConfig {
    pub options: HarvestOptions,
    pub database_url: String,
    pub schedule: Option<String>,
}

impl HarvestConfig {
    pub fn from_env() -> Result<Self, HarvestError> {
        let mut options = HarvestOptions::default();

        if let Some(limit) = env_var("HARVEST_LIMIT") {
            options.limit = limit
                .parse()
                .map_err(|_| HarvestError::Config(format!("HARVEST_LIMIT is not a number: {limit}")))?;
        }
        if let Some(speed) = env_var("HARVEST_SPEED") {
            options.speed = speed.parse()?;
        }
        if let Some(enrich) = env_var("HARVEST_ENRICH") {
            options.enable_detail_enrichment = parse_flag(&enrich)
                .ok_or_else(|| HarvestError::Config(format!("HARVEST_ENRICH is not a flag: {enrich}")))?;
        }
        if let Some(pages) = env_var("HARVEST_MAX_PAGES") {
            options.max_pages = pages
                .parse()
                .map_err(|_| HarvestError::Config(format!("HARVEST_MAX_PAGES is not a number: {pages}")))?;
        }
        if let Some(path) = env_var("HARVEST_WORDLISTS") {
            info!("Loading word lists from {}", path);
            options.words = WordLists::from_file(&path)?;
        }

        let database_url =
            env_var("HARVEST_DB").unwrap_or_else(|| "sqlite:database/products.db".to_string());
        let schedule = env_var("HARVEST_SCHEDULE");

        Ok(Self {
            options,
            database_url,
            schedule,
        })
    }
}

fn env_var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

fn parse_flag(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        other => {
            warn!("Unrecognised flag value '{}'", other);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn presets_match_politeness_table() {
        let normal = SpeedPreset::Normal.politeness();
        assert_eq!(normal.workers, 3);
        assert_eq!(normal.retries, 3);
        assert_eq!(normal.timeout, Duration::from_secs(18));

        let fast = SpeedPreset::Fast.politeness();
        assert_eq!(fast.workers, 10);
        assert_eq!(fast.retries, 1);
        assert_eq!(fast.delay_min, Duration::from_millis(60));
        assert_eq!(fast.delay_max, Duration::from_millis(120));
    }

    #[test]
    fn word_lists_merge_partial_json_with_defaults() {
        let words: WordLists =
            serde_json::from_str(r#"{"identifier_labels": ["Codice"]}"#).unwrap();

        assert_eq!(words.identifier_labels, vec!["Codice".to_string()]);
        assert_eq!(words.check_digit_prefix, "49");
        assert!(words.cart_phrases.iter().any(|p| p == "add to cart"));
    }

    #[test]
    fn speed_preset_parses_case_insensitively() {
        assert_eq!("FAST".parse::<SpeedPreset>().unwrap(), SpeedPreset::Fast);
        assert!("turbo".parse::<SpeedPreset>().is_err());
    }
}
