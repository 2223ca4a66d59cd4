use std::sync::Arc;

use anyhow::Result;
use tracing::info;

use crate::config::{HarvestConfig, HarvestOptions};
use crate::database::{Database, product_id};
use crate::models::Product;
use crate::observer::TracingObserver;
use crate::pipeline::harvest;
use crate::scraper::HttpFetcher;
use crate::traits::{Observer, PageFetcher};

/// Runs the pipeline for one URL and stores what it finds.
#[derive(Clone)]
pub struct Harvester {
    fetcher: Arc<dyn PageFetcher>,
    observer: Arc<dyn Observer>,
    database: Database,
    options: HarvestOptions,
}

impl Harvester {
    pub async fn new(config: &HarvestConfig) -> Result<Self> {
        let fetcher = Arc::new(HttpFetcher::new()?);
        let database = Database::connect(&config.database_url).await?;

        Ok(Self::with_parts(fetcher, database, config.options.clone()))
    }

    pub fn with_parts(fetcher: Arc<dyn PageFetcher>, database: Database, options: HarvestOptions) -> Self {
        Self {
            fetcher,
            observer: Arc::new(TracingObserver),
            database,
            options,
        }
    }

    pub fn with_observer(mut self, observer: Arc<dyn Observer>) -> Self {
        self.observer = observer;
        self
    }

    /// Harvest `url`, persist the records and return all of them.
    pub async fn run(&self, url: &str) -> Result<Vec<Product>> {
        let products = harvest(
            Arc::clone(&self.fetcher),
            url,
            &self.options,
            self.observer.as_ref(),
        )
        .await?;

        let existing_ids = self.database.existing_product_ids().await?;
        for product in products.iter().filter(|p| !existing_ids.contains(&product_id(p))) {
            info!(
                "New product found: {} - {}",
                product.title,
                product.price.as_deref().unwrap_or("no price")
            );
        }

        let new_products = self.database.save_products(url, &products).await?;
        if new_products > 0 {
            info!("Found {} new products on {}", new_products, url);
        } else {
            info!("No new products found on {}", url);
        }

        Ok(products)
    }
}
