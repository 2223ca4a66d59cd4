//! Adaptive product-catalog harvesting
//!
//! Classifies an unknown shop page, extracts product records through an
//! ordered cascade of adapters, follows pagination and fills incomplete
//! records from their detail pages.

pub mod classifier;
pub mod config;
pub mod database;
pub mod detail;
pub mod enrichment;
pub mod error;
pub mod harvester;
pub mod identifiers;
pub mod models;
pub mod normalize;
pub mod observer;
pub mod pagination;
pub mod pipeline;
pub mod scraper;
pub mod scrapers;
pub mod traits;

pub use config::{HarvestConfig, HarvestOptions, SpeedPreset};
pub use error::{FetchError, HarvestError, HarvestResult};
pub use harvester::Harvester;
pub use models::Product;
pub use pipeline::harvest;
