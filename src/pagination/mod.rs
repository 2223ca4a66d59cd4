//! Next-page discovery and the listing traversal loop

use std::collections::HashSet;

use serde::Serialize;
use serde_json::json;
use tracing::{info, warn};
use url::Url;

use crate::classifier::classify;
use crate::config::{HarvestOptions, WordLists};
use crate::enrichment::{Pacer, fetch_with_retry};
use crate::identifiers::IdentifierExtractor;
use crate::models::{DraftItem, PageSample, PageType, StructuralVerdict};
use crate::normalize::{LinkRules, canonical_url, resolve_url, same_url};
use crate::scraper::{Page, compile, element_text};
use crate::scrapers::{AdapterContext, CascadeOutcome, run_cascade};
use crate::traits::{Observer, PageFetcher, Stage};

const NEXT_CLASS_SELECTORS: &str = "a.next, a.next-page, a.pagination-next, a.pagination__next, \
     a.action.next, li.next > a, .next > a, .pagination-next > a, a[class*=next], a[aria-label=Next]";

const PAGINATION_CONTAINERS: &str =
    "nav, .pagination, .pager, .pages, .page-numbers, [class*=paginat], [class*=pager]";

const CURRENT_PAGE: &str = "[aria-current=page], .active, .current, .is-active, .selected";

const PAGE_PARAMS: [&str; 4] = ["page", "p", "pg", "seite"];

/// Longest anchor text, in words, still treated as a "next" label.
const MAX_NEXT_LABEL_WORDS: usize = 3;

/// Find the link to the page after `page`, trying in order: `rel=next`,
/// next-classes, localized "next" labels, then the numeric successor of the
/// current page. The first match is returned even when it points back at
/// the page itself, so the caller can stop on it.
pub fn find_next_link(page: &Page<'_>, words: &WordLists, rules: &LinkRules) -> Option<String> {
    let accept = |href: Option<&str>| {
        let url = resolve_url(&page.base, href?)?;
        (!rules.is_generic(&url) && !rules.is_action(&url)).then_some(url)
    };

    if let Some(selector) = compile("link[rel~=next], a[rel~=next]")
        && let Some(url) = page
            .document
            .select(&selector)
            .find_map(|el| accept(el.value().attr("href")))
    {
        return Some(url);
    }

    if let Some(selector) = compile(NEXT_CLASS_SELECTORS)
        && let Some(url) = page
            .document
            .select(&selector)
            .find_map(|el| accept(el.value().attr("href")))
    {
        return Some(url);
    }

    let labels: Vec<String> = words.next_words.iter().map(|w| w.to_lowercase()).collect();
    if let Some(selector) = compile("a[href]")
        && let Some(url) = page.document.select(&selector).find_map(|el| {
            let text = element_text(&el);
            let label = el
                .value()
                .attr("aria-label")
                .or_else(|| el.value().attr("title"))
                .unwrap_or_default();
            (is_next_label(&text, &labels) || is_next_label(label, &labels))
                .then(|| accept(el.value().attr("href")))
                .flatten()
        })
    {
        return Some(url);
    }

    numeric_successor(page).and_then(|href| accept(Some(&href)))
}

fn is_next_label(text: &str, labels: &[String]) -> bool {
    let text = text.to_lowercase();
    let tokens: Vec<&str> = text
        .split(|c: char| c.is_whitespace() || matches!(c, '.' | ':' | '(' | ')' | '[' | ']'))
        .filter(|t| !t.is_empty())
        .collect();

    !tokens.is_empty()
        && tokens.len() <= MAX_NEXT_LABEL_WORDS
        && tokens.iter().any(|token| labels.iter().any(|label| label == token))
}

/// Link labelled with the number after the current page, searched inside
/// pagination blocks only.
fn numeric_successor(page: &Page<'_>) -> Option<String> {
    let containers = compile(PAGINATION_CONTAINERS)?;
    let current_marker = compile(CURRENT_PAGE)?;
    let anchors = compile("a[href]")?;

    for container in page.document.select(&containers) {
        let current = container
            .select(&current_marker)
            .find_map(|el| element_text(&el).parse::<usize>().ok())
            .or_else(|| page_param(&page.base))
            .unwrap_or(1);
        let wanted = (current + 1).to_string();

        if let Some(href) = container
            .select(&anchors)
            .find(|a| element_text(a) == wanted)
            .and_then(|a| a.value().attr("href"))
        {
            return Some(href.to_string());
        }
    }
    None
}

fn page_param(url: &Url) -> Option<usize> {
    url.query_pairs()
        .find(|(key, _)| PAGE_PARAMS.contains(&key.as_ref()))
        .and_then(|(_, value)| value.parse().ok())
}

/// Why a traversal ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    NoNextLink,
    SelfLink,
    Revisit,
    MaxPages,
    LimitReached,
    FetchFailed,
}

enum CrawlState {
    Fetching(String),
    /// A page and, for the start page, the verdict already reached on it
    Extracting(PageSample, Option<StructuralVerdict>),
    LocatingNext {
        current: String,
        next: Option<String>,
    },
    Done(StopReason),
}

/// Pages seen so far in one traversal.
#[derive(Debug, Default)]
pub struct CrawlFrontier {
    visited: HashSet<String>,
    page_count: usize,
}

impl CrawlFrontier {
    pub fn visit(&mut self, url: &str) {
        self.visited.insert(canonical_url(url));
        self.page_count += 1;
    }

    pub fn alias(&mut self, url: &str) {
        self.visited.insert(canonical_url(url));
    }

    pub fn has_visited(&self, url: &str) -> bool {
        self.visited.contains(&canonical_url(url))
    }

    pub fn page_count(&self) -> usize {
        self.page_count
    }
}

#[derive(Debug)]
pub struct Traversal {
    pub items: Vec<DraftItem>,
    pub pages: usize,
    pub stop: StopReason,
}

/// Walk a paginated listing starting from an already fetched and classified
/// page. Every later page is classified on its own.
pub async fn traverse(
    fetcher: &dyn PageFetcher,
    start: PageSample,
    start_verdict: StructuralVerdict,
    options: &HarvestOptions,
    observer: &dyn Observer,
) -> Traversal {
    let politeness = options.politeness();
    let rules = LinkRules::new(&options.words);
    let identifiers = IdentifierExtractor::new(&options.words);
    let mut pacer = Pacer::from_politeness(&politeness, options.seed);

    let mut frontier = CrawlFrontier::default();
    let mut items: Vec<DraftItem> = Vec::new();
    let mut seen_items: HashSet<String> = HashSet::new();
    let mut state = CrawlState::Extracting(start, Some(start_verdict));

    let stop = loop {
        state = match state {
            CrawlState::Fetching(url) => {
                pacer.pause().await;
                match fetch_with_retry(fetcher, &url, &politeness, &mut pacer).await {
                    Ok(page) => {
                        frontier.alias(&url);
                        CrawlState::Extracting(PageSample::new(page.final_url, page.markup), None)
                    }
                    Err(e) => {
                        warn!("Stopping traversal, could not fetch {}: {}", url, e);
                        CrawlState::Done(StopReason::FetchFailed)
                    }
                }
            }
            CrawlState::Extracting(sample, verdict) => {
                frontier.visit(&sample.url);
                let remaining = options.limit.saturating_sub(items.len());
                let Some(listing) =
                    read_listing(&sample, verdict, options, &rules, &identifiers, remaining)
                else {
                    warn!("Stopping traversal, {} is not a parsable URL", sample.url);
                    break StopReason::FetchFailed;
                };
                if let Some(verdict) = &listing.classified {
                    observer.record(
                        Stage::PageClassified,
                        &json!({"url": sample.url, "verdict": verdict}),
                    );
                }
                let outcome = listing.outcome;

                observer.record(
                    Stage::AdapterSelected,
                    &json!({
                        "url": sample.url,
                        "platform": outcome.platform,
                        "adapter": outcome.selected,
                        "attempts": outcome.attempts,
                        "items": outcome.items.len(),
                    }),
                );

                for item in outcome.items {
                    if items.len() >= options.limit {
                        break;
                    }
                    if seen_items.insert(canonical_url(&item.detail_url)) {
                        items.push(item);
                    }
                }

                CrawlState::LocatingNext {
                    current: sample.url,
                    next: listing.next,
                }
            }
            CrawlState::LocatingNext { current, next } => {
                if items.len() >= options.limit {
                    CrawlState::Done(StopReason::LimitReached)
                } else {
                    match next {
                        None => CrawlState::Done(StopReason::NoNextLink),
                        Some(url) if same_url(&url, &current) => CrawlState::Done(StopReason::SelfLink),
                        Some(url) if frontier.has_visited(&url) => CrawlState::Done(StopReason::Revisit),
                        Some(_) if frontier.page_count() >= options.max_pages => {
                            CrawlState::Done(StopReason::MaxPages)
                        }
                        Some(url) => CrawlState::Fetching(url),
                    }
                }
            }
            CrawlState::Done(reason) => break reason,
        };
    };

    info!(
        "Traversal finished after {} pages with {} items ({:?})",
        frontier.page_count(),
        items.len(),
        stop
    );
    observer.record(
        Stage::TraversalFinished,
        &json!({"pages": frontier.page_count(), "items": items.len(), "stop": stop}),
    );

    Traversal {
        items,
        pages: frontier.page_count(),
        stop,
    }
}

struct ListingPage {
    /// Verdict reached on this page, when it was not supplied by the caller
    classified: Option<StructuralVerdict>,
    outcome: CascadeOutcome,
    next: Option<String>,
}

/// Classify one listing page if needed, run the cascade over it and locate
/// its successor.
fn read_listing(
    sample: &PageSample,
    verdict: Option<StructuralVerdict>,
    options: &HarvestOptions,
    rules: &LinkRules,
    identifiers: &IdentifierExtractor,
    limit: usize,
) -> Option<ListingPage> {
    let page = Page::parse(sample)?;
    let (verdict, classified) = match verdict {
        Some(verdict) => (verdict, None),
        None => {
            let verdict = classify(&page, &options.words, &options.weights);
            (verdict.clone(), Some(verdict))
        }
    };

    // A page reached through a next link belongs to a listing even when it
    // only holds a couple of cards.
    let page_type = match verdict.page_type {
        PageType::Product if classified.is_some() => PageType::Catalog,
        other => other,
    };

    let ctx = AdapterContext {
        page: &page,
        rules,
        identifiers,
        root_selector: verdict.root_selector(),
    };
    let outcome = run_cascade(&ctx, page_type, limit);
    let next = find_next_link(&page, &options.words, rules);

    Some(ListingPage {
        classified,
        outcome,
        next,
    })
}
