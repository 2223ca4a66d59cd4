//! One harvest: start page, classification, traversal, enrichment

use std::sync::Arc;

use serde_json::json;
use tracing::info;
use url::Url;

use crate::classifier::classify;
use crate::config::HarvestOptions;
use crate::detail::extract_detail;
use crate::enrichment::{Enricher, Pacer, fetch_with_retry};
use crate::error::{HarvestError, HarvestResult};
use crate::identifiers::IdentifierExtractor;
use crate::models::{DraftItem, PageSample, PageType, Product, StructuralVerdict};
use crate::pagination::traverse;
use crate::scraper::Page;
use crate::traits::{Observer, PageFetcher, Stage};

/// Harvest product records starting from `url`.
///
/// Only an invalid URL or an unreachable start page is an error. Everything
/// after that degrades to fewer or less complete records.
pub async fn harvest(
    fetcher: Arc<dyn PageFetcher>,
    url: &str,
    options: &HarvestOptions,
    observer: &dyn Observer,
) -> HarvestResult<Vec<Product>> {
    let start_url = Url::parse(url).map_err(|_| HarvestError::InvalidUrl(url.to_string()))?;
    if !matches!(start_url.scheme(), "http" | "https") {
        return Err(HarvestError::InvalidUrl(url.to_string()));
    }
    if options.limit == 0 {
        return Ok(Vec::new());
    }

    info!("Harvesting {} (limit {}, {:?})", start_url, options.limit, options.speed);

    let politeness = options.politeness();
    let mut pacer = Pacer::from_politeness(&politeness, options.seed);
    let page = fetch_with_retry(fetcher.as_ref(), start_url.as_str(), &politeness, &mut pacer)
        .await
        .map_err(|source| HarvestError::StartPage {
            url: start_url.to_string(),
            source,
        })?;

    let sample = PageSample::new(page.final_url, page.markup);
    let Some((verdict, single)) = inspect_start(&sample, options) else {
        return Err(HarvestError::InvalidUrl(sample.url));
    };
    info!(
        "Start page {} classified as {:?} ({:.2})",
        sample.url, verdict.page_type, verdict.confidence
    );
    observer.record(
        Stage::PageClassified,
        &json!({"url": sample.url, "verdict": verdict}),
    );

    let items = match single {
        Some(item) => vec![item],
        None => {
            let traversal = traverse(fetcher.as_ref(), sample, verdict, options, observer).await;
            if options.enable_detail_enrichment {
                Enricher::new(Arc::clone(&fetcher), options)
                    .enrich(traversal.items, observer)
                    .await
            } else {
                traversal.items
            }
        }
    };

    info!("Harvested {} products from {}", items.len(), start_url);
    Ok(items.into_iter().map(Product::from).collect())
}

/// Classify the start page, building the single record when it is itself a
/// product page.
fn inspect_start(
    sample: &PageSample,
    options: &HarvestOptions,
) -> Option<(StructuralVerdict, Option<DraftItem>)> {
    let page = Page::parse(sample)?;
    let verdict = classify(&page, &options.words, &options.weights);

    let single = (verdict.page_type == PageType::Product)
        .then(|| {
            let identifiers = IdentifierExtractor::new(&options.words);
            extract_detail(&page, &identifiers).into_item(&sample.url)
        })
        .filter(DraftItem::is_valid);

    Some((verdict, single))
}
