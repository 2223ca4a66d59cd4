//! Detail-page enrichment
//!
//! Items that lack an identifier, or both price and image, are queued and
//! visited by a fixed pool of workers. Each worker owns its pacer and pulls
//! tasks from a shared FIFO until it is empty. A failed enrichment leaves the
//! item exactly as the listing page produced it.

pub mod retry;

use std::collections::VecDeque;
use std::sync::Arc;

use serde_json::json;
use tokio::sync::Mutex;
use tokio::task::JoinSet;
use tracing::{error, info, warn};

use crate::config::{HarvestOptions, Politeness};
use crate::detail::{DetailFields, extract_detail};
use crate::identifiers::IdentifierExtractor;
use crate::models::{DraftItem, PageSample};
use crate::normalize::is_placeholder_image;
use crate::scraper::Page;
use crate::traits::{Observer, PageFetcher, Stage};

pub use retry::{Pacer, fetch_with_retry};

/// One queued item, tagged with its position in the listing order.
#[derive(Debug)]
struct EnrichmentTask {
    index: usize,
    item: DraftItem,
}

#[derive(Debug, Default)]
struct WorkerReport {
    done: Vec<EnrichmentTask>,
    enriched: usize,
    failed: usize,
}

type TaskQueue = Arc<Mutex<VecDeque<EnrichmentTask>>>;

pub struct Enricher {
    fetcher: Arc<dyn PageFetcher>,
    identifiers: Arc<IdentifierExtractor>,
    politeness: Politeness,
    seed: Option<u64>,
}

impl Enricher {
    pub fn new(fetcher: Arc<dyn PageFetcher>, options: &HarvestOptions) -> Self {
        Self {
            fetcher,
            identifiers: Arc::new(IdentifierExtractor::new(&options.words)),
            politeness: options.politeness(),
            seed: options.seed,
        }
    }

    /// Enrich `items` in place of their listing versions. Output order equals
    /// input order.
    pub async fn enrich(&self, mut items: Vec<DraftItem>, observer: &dyn Observer) -> Vec<DraftItem> {
        let queue: VecDeque<EnrichmentTask> = items
            .iter()
            .enumerate()
            .filter(|(_, item)| item.needs_enrichment())
            .map(|(index, item)| EnrichmentTask {
                index,
                item: item.clone(),
            })
            .collect();

        let attempted = queue.len();
        if attempted == 0 {
            observer.record(
                Stage::EnrichmentCompleted,
                &json!({"attempted": 0, "enriched": 0, "failed": 0}),
            );
            return items;
        }

        let workers = self.politeness.workers.clamp(1, attempted);
        info!("Enriching {} of {} items with {} workers", attempted, items.len(), workers);

        let queue: TaskQueue = Arc::new(Mutex::new(queue));
        let mut join_set = JoinSet::new();

        for worker in 0..workers {
            let queue = Arc::clone(&queue);
            let fetcher = Arc::clone(&self.fetcher);
            let identifiers = Arc::clone(&self.identifiers);
            let politeness = self.politeness.clone();
            let pacer = Pacer::from_politeness(
                &politeness,
                self.seed.map(|seed| seed.wrapping_add(worker as u64)),
            );

            join_set.spawn(async move {
                run_worker(queue, fetcher.as_ref(), &identifiers, &politeness, pacer).await
            });
        }

        let mut enriched = 0;
        let mut failed = 0;
        while let Some(joined) = join_set.join_next().await {
            match joined {
                Ok(report) => {
                    enriched += report.enriched;
                    failed += report.failed;
                    for task in report.done {
                        items[task.index] = task.item;
                    }
                }
                Err(e) => error!("Enrichment worker failed: {}", e),
            }
        }

        info!("Enrichment finished: {} enriched, {} failed", enriched, failed);
        observer.record(
            Stage::EnrichmentCompleted,
            &json!({"attempted": attempted, "enriched": enriched, "failed": failed, "workers": workers}),
        );

        items
    }
}

async fn run_worker(
    queue: TaskQueue,
    fetcher: &dyn PageFetcher,
    identifiers: &IdentifierExtractor,
    politeness: &Politeness,
    mut pacer: Pacer,
) -> WorkerReport {
    let mut report = WorkerReport::default();

    loop {
        let next = queue.lock().await.pop_front();
        let Some(mut task) = next else {
            break;
        };

        match fetch_with_retry(fetcher, &task.item.detail_url, politeness, &mut pacer).await {
            Ok(page) => match read_detail(&page.final_url, page.markup, identifiers) {
                Some(fields) => {
                    merge_detail(&mut task.item, fields);
                    report.enriched += 1;
                }
                None => report.failed += 1,
            },
            Err(e) => {
                warn!("Could not enrich {}: {}", task.item.detail_url, e);
                report.failed += 1;
            }
        }

        report.done.push(task);
        pacer.pause().await;
    }

    report
}

fn read_detail(url: &str, markup: String, identifiers: &IdentifierExtractor) -> Option<DetailFields> {
    let sample = PageSample::new(url, markup);
    let page = Page::parse(&sample)?;
    Some(extract_detail(&page, identifiers))
}

/// Fill the empty fields of `item` from its detail page. Fields the listing
/// already provided are kept, except placeholder images.
pub fn merge_detail(item: &mut DraftItem, fields: DetailFields) {
    if item.title.trim().is_empty()
        && let Some(title) = fields.title
    {
        item.title = title;
    }
    if item.sku.is_none() {
        item.sku = fields.identifier.map(|candidate| candidate.value);
    }
    if item.price_text.is_none()
        && let Some(price) = fields.price
    {
        item.price_text = Some(price.amount);
        if item.currency.is_none() {
            item.currency = price.currency;
        }
    }
    let placeholder = item.image_url.as_deref().is_none_or(is_placeholder_image);
    if placeholder && fields.image_url.is_some() {
        item.image_url = fields.image_url;
    }
    if item.moq.is_none() {
        item.moq = fields.moq;
    }
    if item.description.is_none() {
        item.description = fields.description;
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use async_trait::async_trait;

    use super::*;
    use crate::config::SpeedPreset;
    use crate::error::FetchError;
    use crate::normalize::PriceMatch;
    use crate::observer::NoopObserver;
    use crate::observer::testing::RecordingObserver;
    use crate::scraper::MemoryFetcher;
    use crate::traits::{FetchRequest, FetchedPage};

    /// Counts concurrent fetches and serves a product page after a delay.
    #[derive(Default)]
    struct SlowFetcher {
        in_flight: AtomicUsize,
        peak: AtomicUsize,
    }

    #[async_trait]
    impl PageFetcher for SlowFetcher {
        async fn fetch(&self, request: &FetchRequest) -> Result<FetchedPage, FetchError> {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(150)).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);

            Ok(FetchedPage {
                markup: r#"<div class="product-info">Artikelnummer: AB-1234</div>"#.to_string(),
                status: 200,
                final_url: request.url.clone(),
            })
        }
    }

    /// Never answers for `stalled`; serves a product page for anything else.
    struct StallingFetcher {
        stalled: &'static str,
        calls: std::sync::Mutex<Vec<String>>,
    }

    impl StallingFetcher {
        fn new(stalled: &'static str) -> Self {
            Self {
                stalled,
                calls: std::sync::Mutex::default(),
            }
        }

        fn call_count(&self, url: &str) -> usize {
            self.calls.lock().unwrap().iter().filter(|u| *u == url).count()
        }
    }

    #[async_trait]
    impl PageFetcher for StallingFetcher {
        async fn fetch(&self, request: &FetchRequest) -> Result<FetchedPage, FetchError> {
            self.calls.lock().unwrap().push(request.url.clone());
            if request.url == self.stalled {
                tokio::time::sleep(Duration::from_secs(3600)).await;
            }

            Ok(FetchedPage {
                markup: r#"<div class="product-info">Artikelnummer: AB-1234</div>"#.to_string(),
                status: 200,
                final_url: request.url.clone(),
            })
        }
    }

    fn draft(i: usize) -> DraftItem {
        DraftItem {
            title: format!("Item {i}"),
            detail_url: format!("https://shop.test/p/{i}"),
            ..DraftItem::default()
        }
    }

    fn options(seed: u64) -> HarvestOptions {
        HarvestOptions {
            seed: Some(seed),
            ..HarvestOptions::default()
        }
    }

    #[tokio::test(start_paused = true)]
    async fn pool_never_exceeds_worker_count() {
        let fetcher = Arc::new(SlowFetcher::default());
        let enricher = Enricher::new(fetcher.clone(), &options(3));
        let items: Vec<_> = (0..9).map(draft).collect();

        let enriched = enricher.enrich(items, &NoopObserver).await;

        assert_eq!(fetcher.peak.load(Ordering::SeqCst), 3);
        assert_eq!(enriched.len(), 9);
        for (i, item) in enriched.iter().enumerate() {
            assert_eq!(item.detail_url, format!("https://shop.test/p/{i}"));
            assert_eq!(item.sku.as_deref(), Some("AB-1234"));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn failed_enrichment_keeps_listing_item() {
        let fetcher = Arc::new(
            MemoryFetcher::new()
                .with_failure(
                    "https://shop.test/p/0",
                    FetchError::HttpStatus {
                        url: "https://shop.test/p/0".into(),
                        status: 500,
                    },
                )
                .with_failure(
                    "https://shop.test/p/1",
                    FetchError::HttpStatus {
                        url: "https://shop.test/p/1".into(),
                        status: 404,
                    },
                ),
        );
        let observer = RecordingObserver::default();
        let enricher = Enricher::new(fetcher.clone(), &options(9));
        let items = vec![draft(0), draft(1)];

        let enriched = enricher.enrich(items.clone(), &observer).await;

        assert_eq!(enriched, items);
        let retries = SpeedPreset::Normal.politeness().retries as usize;
        assert_eq!(fetcher.call_count("https://shop.test/p/0"), retries + 1);
        assert_eq!(fetcher.call_count("https://shop.test/p/1"), 1);
        assert_eq!(observer.stages(), vec![Stage::EnrichmentCompleted]);
    }

    #[tokio::test(start_paused = true)]
    async fn slow_fetch_times_out_and_is_retried() {
        let url = "https://shop.test/p/0";
        let fetcher = StallingFetcher::new(url);
        let politeness = SpeedPreset::Normal.politeness();
        let mut pacer = Pacer::from_politeness(&politeness, Some(2));

        let result = fetch_with_retry(&fetcher, url, &politeness, &mut pacer).await;

        assert!(matches!(result, Err(FetchError::Timeout { .. })));
        assert_eq!(fetcher.call_count(url), politeness.retries as usize + 1);
    }

    #[tokio::test(start_paused = true)]
    async fn stalled_item_does_not_block_its_siblings() {
        let fetcher = Arc::new(StallingFetcher::new("https://shop.test/p/0"));
        let enricher = Enricher::new(fetcher.clone(), &options(4));
        let items = vec![draft(0), draft(1)];

        let enriched = enricher.enrich(items, &NoopObserver).await;

        let retries = SpeedPreset::Normal.politeness().retries as usize;
        assert_eq!(fetcher.call_count("https://shop.test/p/0"), retries + 1);
        assert_eq!(enriched[0], draft(0));
        assert_eq!(enriched[1].sku.as_deref(), Some("AB-1234"));
    }

    #[tokio::test(start_paused = true)]
    async fn complete_items_are_not_fetched() {
        let fetcher = Arc::new(MemoryFetcher::new());
        let enricher = Enricher::new(fetcher.clone(), &options(1));
        let complete = DraftItem {
            sku: Some("KL-900".into()),
            price_text: Some("4.99".into()),
            ..draft(0)
        };

        let enriched = enricher.enrich(vec![complete.clone()], &NoopObserver).await;

        assert_eq!(enriched, vec![complete]);
        assert!(fetcher.calls().is_empty());
    }

    #[test]
    fn merge_fills_gaps_and_replaces_placeholders() {
        let mut item = DraftItem {
            title: "Listing title".into(),
            detail_url: "https://shop.test/p/1".into(),
            image_url: Some("https://shop.test/img/placeholder.gif".into()),
            price_text: Some("10.00".into()),
            ..DraftItem::default()
        };
        let fields = DetailFields {
            title: Some("Detail title".into()),
            price: Some(PriceMatch {
                amount: "12.00".into(),
                currency: Some("EUR".into()),
            }),
            image_url: Some("https://shop.test/img/real.jpg".into()),
            description: Some("Sturdy.".into()),
            moq: None,
            identifier: None,
        };

        merge_detail(&mut item, fields);

        assert_eq!(item.title, "Listing title");
        assert_eq!(item.price_text.as_deref(), Some("10.00"));
        assert_eq!(item.currency, None);
        assert_eq!(item.image_url.as_deref(), Some("https://shop.test/img/real.jpg"));
        assert_eq!(item.description.as_deref(), Some("Sturdy."));
    }
}
