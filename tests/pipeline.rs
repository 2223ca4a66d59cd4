use std::ops::RangeInclusive;
use std::sync::{Arc, Mutex};

use serde_json::Value;

use catalog_harvester::database::Database;
use catalog_harvester::observer::NoopObserver;
use catalog_harvester::scraper::MemoryFetcher;
use catalog_harvester::traits::{Observer, Stage};
use catalog_harvester::{HarvestOptions, Harvester, SpeedPreset, harvest};

const START: &str = "https://lamps.test/lamps";
const PAGE_TWO: &str = "https://lamps.test/lamps?page=2";

#[derive(Default)]
struct Stages(Mutex<Vec<Stage>>);

impl Observer for Stages {
    fn record(&self, stage: Stage, _payload: &Value) {
        self.0.lock().unwrap().push(stage);
    }
}

fn listing(range: RangeInclusive<usize>, next: Option<&str>) -> String {
    let cards: String = range
        .map(|i| {
            format!(
                r#"<article class="product">
                    <a href="/product/lamp-{i}"><img src="/img/lamp-{i}.jpg" alt="Lamp {i}"><h3>Lamp {i}</h3></a>
                    <span class="price">{i}9,00 €</span>
                </article>"#
            )
        })
        .collect();
    let next = next
        .map(|href| format!(r#"<nav class="pagination"><a rel="next" href="{href}">Next</a></nav>"#))
        .unwrap_or_default();

    format!(r#"<html><body><h1>Lamps</h1><main class="catalog">{cards}</main>{next}</body></html>"#)
}

fn detail(i: usize) -> String {
    format!(
        r#"<html><head>
            <script type="application/ld+json">{{"@context": "https://schema.org", "@type": "Product",
              "name": "Lamp {i}", "sku": "LMP-{i}00", "image": "/media/lamp-{i}-large.jpg",
              "offers": {{"@type": "Offer", "price": "{i}9.00", "priceCurrency": "EUR"}}}}</script>
            <meta name="description" content="Lamp number {i}.">
        </head><body><h1>Lamp {i}</h1><p>Mindestbestellmenge: 5 Stück</p>
        <button>In den Warenkorb</button></body></html>"#
    )
}

fn shop() -> MemoryFetcher {
    let mut fetcher = MemoryFetcher::new()
        .with_page(START, listing(1..=6, Some("/lamps?page=2")))
        .with_page(PAGE_TWO, listing(7..=12, None));
    for i in 1..=12 {
        fetcher = fetcher.with_page(format!("https://lamps.test/product/lamp-{i}"), detail(i));
    }
    fetcher
}

fn options() -> HarvestOptions {
    HarvestOptions {
        seed: Some(42),
        ..HarvestOptions::default()
    }
}

#[tokio::test(start_paused = true)]
async fn paginated_catalog_is_harvested_and_enriched() {
    let fetcher = Arc::new(shop());

    let products = harvest(fetcher.clone(), START, &options(), &NoopObserver)
        .await
        .unwrap();

    assert_eq!(products.len(), 12);
    for (n, product) in products.iter().enumerate() {
        let i = n + 1;
        assert_eq!(product.detail_url, format!("https://lamps.test/product/lamp-{i}"));
        assert_eq!(product.title, format!("Lamp {i}"));
        assert_eq!(product.sku.as_deref(), Some(format!("LMP-{i}00").as_str()));
    }

    let first = &products[0];
    assert_eq!(first.price.as_deref(), Some("19.00"));
    assert_eq!(first.currency.as_deref(), Some("EUR"));
    assert_eq!(first.image_url.as_deref(), Some("https://lamps.test/img/lamp-1.jpg"));
    assert_eq!(first.moq.as_deref(), Some("5 Stück"));
    assert_eq!(first.description.as_deref(), Some("Lamp number 1."));
    assert_eq!(fetcher.call_count(PAGE_TWO), 1);
}

#[tokio::test(start_paused = true)]
async fn limit_caps_listing_and_enrichment() {
    let fetcher = Arc::new(shop());
    let options = HarvestOptions {
        limit: 4,
        ..options()
    };

    let products = harvest(fetcher.clone(), START, &options, &NoopObserver)
        .await
        .unwrap();

    assert_eq!(products.len(), 4);
    assert_eq!(fetcher.call_count(PAGE_TWO), 0);
    let detail_fetches = fetcher
        .calls()
        .iter()
        .filter(|url| url.contains("/product/"))
        .count();
    assert_eq!(detail_fetches, 4);
}

#[tokio::test(start_paused = true)]
async fn disabled_enrichment_keeps_listing_fields() {
    let fetcher = Arc::new(shop());
    let options = HarvestOptions {
        enable_detail_enrichment: false,
        ..options()
    };

    let products = harvest(fetcher.clone(), START, &options, &NoopObserver)
        .await
        .unwrap();

    assert_eq!(products.len(), 12);
    assert!(products.iter().all(|p| p.sku.is_none() && p.moq.is_none()));
    assert_eq!(fetcher.calls(), vec![START.to_string(), PAGE_TWO.to_string()]);
}

#[tokio::test(start_paused = true)]
async fn product_start_page_yields_one_record() {
    let url = "https://lamps.test/product/lamp-3";
    let fetcher = Arc::new(MemoryFetcher::new().with_page(url, detail(3)));

    let products = harvest(fetcher.clone(), url, &options(), &NoopObserver)
        .await
        .unwrap();

    assert_eq!(products.len(), 1);
    let product = &products[0];
    assert_eq!(product.title, "Lamp 3");
    assert_eq!(product.sku.as_deref(), Some("LMP-300"));
    assert_eq!(product.price.as_deref(), Some("39.00"));
    assert_eq!(product.image_url.as_deref(), Some("https://lamps.test/media/lamp-3-large.jpg"));
    assert_eq!(product.detail_url, url);
    assert_eq!(fetcher.calls(), vec![url.to_string()]);
}

#[tokio::test(start_paused = true)]
async fn observer_sees_each_stage_in_order() {
    let fetcher = Arc::new(shop());
    let stages = Stages::default();

    harvest(fetcher, START, &options(), &stages).await.unwrap();

    assert_eq!(
        *stages.0.lock().unwrap(),
        vec![
            Stage::PageClassified,
            Stage::AdapterSelected,
            Stage::PageClassified,
            Stage::AdapterSelected,
            Stage::TraversalFinished,
            Stage::EnrichmentCompleted,
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn observer_does_not_change_results() {
    let silent = harvest(Arc::new(shop()), START, &options(), &NoopObserver)
        .await
        .unwrap();
    let watched = harvest(Arc::new(shop()), START, &options(), &Stages::default())
        .await
        .unwrap();

    assert_eq!(silent, watched);
}

#[tokio::test]
async fn harvester_persists_each_product_once() {
    let database = Database::connect("sqlite::memory:").await.unwrap();
    let options = HarvestOptions {
        speed: SpeedPreset::Fast,
        ..options()
    };
    let harvester = Harvester::with_parts(Arc::new(shop()), database.clone(), options);

    let first = harvester.run(START).await.unwrap();
    let second = harvester.run(START).await.unwrap();

    assert_eq!(first, second);
    assert_eq!(database.existing_product_ids().await.unwrap().len(), 12);
    assert_eq!(database.products_for(START).await.unwrap(), first);
}
