//! HTTP page fetching and the parsed page view shared by the extractors

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use scraper::{ElementRef, Html, Selector};
use tracing::{debug, warn};
use url::Url;

use crate::error::FetchError;
use crate::models::PageSample;
use crate::traits::{FetchRequest, FetchedPage, PageFetcher};

const USER_AGENT: &str = "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36";

/// `reqwest`-backed fetcher used in production.
#[derive(Clone)]
pub struct HttpFetcher {
    client: Client,
}

impl HttpFetcher {
    pub fn new() -> anyhow::Result<Self> {
        let client = Client::builder()
            .user_agent(USER_AGENT)
            .timeout(Duration::from_secs(30))
            .redirect(reqwest::redirect::Policy::limited(5))
            .build()?;

        Ok(Self { client })
    }
}

#[async_trait]
impl PageFetcher for HttpFetcher {
    async fn fetch(&self, request: &FetchRequest) -> Result<FetchedPage, FetchError> {
        debug!("Fetching {}", request.url);

        let mut builder = self
            .client
            .get(&request.url)
            .timeout(request.timeout)
            .header(
                reqwest::header::ACCEPT,
                "text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8",
            );
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }

        let response = builder.send().await.map_err(|e| to_fetch_error(&request.url, &e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::HttpStatus {
                url: request.url.clone(),
                status: status.as_u16(),
            });
        }

        let final_url = response.url().to_string();
        // Charset comes from Content-Type; anything undecodable is replaced
        // rather than failing the fetch.
        let markup = response
            .text_with_charset("utf-8")
            .await
            .map_err(|e| to_fetch_error(&request.url, &e))?;

        Ok(FetchedPage {
            markup,
            status: status.as_u16(),
            final_url,
        })
    }
}

fn to_fetch_error(url: &str, error: &reqwest::Error) -> FetchError {
    if error.is_timeout() {
        FetchError::Timeout {
            url: url.to_string(),
        }
    } else {
        FetchError::Network {
            url: url.to_string(),
            message: error.to_string(),
        }
    }
}

/// Serves canned markup by URL. Used for offline runs and tests.
#[derive(Default)]
pub struct MemoryFetcher {
    pages: HashMap<String, Result<String, FetchError>>,
    calls: Mutex<Vec<String>>,
}

impl MemoryFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_page(mut self, url: impl Into<String>, markup: impl Into<String>) -> Self {
        self.pages.insert(url.into(), Ok(markup.into()));
        self
    }

    pub fn with_failure(mut self, url: impl Into<String>, error: FetchError) -> Self {
        self.pages.insert(url.into(), Err(error));
        self
    }

    /// URLs requested so far, in order
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }

    pub fn call_count(&self, url: &str) -> usize {
        self.calls().iter().filter(|u| u.as_str() == url).count()
    }
}

#[async_trait]
impl PageFetcher for MemoryFetcher {
    async fn fetch(&self, request: &FetchRequest) -> Result<FetchedPage, FetchError> {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(request.url.clone());
        }

        match self.pages.get(&request.url) {
            Some(Ok(markup)) => Ok(FetchedPage {
                markup: markup.clone(),
                status: 200,
                final_url: request.url.clone(),
            }),
            Some(Err(error)) => Err(error.clone()),
            None => Err(FetchError::HttpStatus {
                url: request.url.clone(),
                status: 404,
            }),
        }
    }
}

/// A parsed document together with the URL relative links resolve against.
///
/// `Html` is not `Send`, so a `Page` must never be held across an `.await`.
pub struct Page<'a> {
    pub sample: &'a PageSample,
    pub base: Url,
    pub document: Html,
}

impl<'a> Page<'a> {
    pub fn parse(sample: &'a PageSample) -> Option<Self> {
        let base = Url::parse(&sample.url).ok()?;
        let document = Html::parse_document(&sample.markup);
        Some(Self {
            sample,
            base,
            document,
        })
    }

    pub fn root(&self) -> ElementRef<'_> {
        self.document.root_element()
    }

    /// Visible text of the whole document, whitespace collapsed.
    pub fn text(&self) -> String {
        element_text(&self.root())
    }
}

/// Compile a CSS selector, logging instead of failing on bad input.
pub fn compile(css: &str) -> Option<Selector> {
    match Selector::parse(css) {
        Ok(selector) => Some(selector),
        Err(e) => {
            warn!("Failed to compile selector '{}': {:?}", css, e);
            None
        }
    }
}

/// Compile a list of selectors, skipping the invalid ones.
pub fn compile_all(selectors: &[&str]) -> Vec<(String, Selector)> {
    selectors
        .iter()
        .filter_map(|css| compile(css).map(|sel| ((*css).to_string(), sel)))
        .collect()
}

/// Text nodes below `element`, skipping script, style and template content.
pub fn visible_text<'a>(element: &ElementRef<'a>) -> impl Iterator<Item = &'a str> + 'a {
    element.descendants().filter_map(|node| {
        let text = node.value().as_text()?;
        let hidden = node
            .ancestors()
            .filter_map(ElementRef::wrap)
            .any(|el| matches!(el.value().name(), "script" | "style" | "noscript" | "template"));
        (!hidden).then_some(&**text)
    })
}

/// Text content of an element with runs of whitespace collapsed.
pub fn element_text(element: &ElementRef<'_>) -> String {
    visible_text(element)
        .flat_map(str::split_whitespace)
        .collect::<Vec<_>>()
        .join(" ")
}

/// Text content with one entry per non-empty line of each text node.
pub fn element_lines(element: &ElementRef<'_>) -> Vec<String> {
    visible_text(element)
        .flat_map(str::lines)
        .map(|line| line.split_whitespace().collect::<Vec<_>>().join(" "))
        .filter(|line| !line.is_empty())
        .collect()
}
