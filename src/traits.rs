//! Seams between the extraction core and its collaborators

use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use crate::error::FetchError;

/// A single outbound page request.
#[derive(Debug, Clone)]
pub struct FetchRequest {
    pub url: String,
    pub timeout: Duration,
    pub headers: Vec<(String, String)>,
}

impl FetchRequest {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Self {
        Self {
            url: url.into(),
            timeout,
            headers: Vec::new(),
        }
    }
}

/// A fetched and decoded document.
#[derive(Debug, Clone)]
pub struct FetchedPage {
    pub markup: String,
    pub status: u16,
    /// URL after redirects
    pub final_url: String,
}

/// Source of decoded page markup.
///
/// Implementations must always return decoded text: charset detection and
/// fallback decoding happen behind this trait.
#[async_trait]
pub trait PageFetcher: Send + Sync {
    /// Fetch a page
    ///
    /// # Arguments
    /// * `request` - URL, timeout and extra headers
    ///
    /// # Returns
    /// * `Result<FetchedPage, FetchError>` - The decoded page or a fetch failure
    async fn fetch(&self, request: &FetchRequest) -> Result<FetchedPage, FetchError>;
}

/// Pipeline stages reported to an [`Observer`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    PageClassified,
    AdapterSelected,
    EnrichmentCompleted,
    TraversalFinished,
}

impl Stage {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::PageClassified => "page_classified",
            Self::AdapterSelected => "adapter_selected",
            Self::EnrichmentCompleted => "enrichment_completed",
            Self::TraversalFinished => "traversal_finished",
        }
    }
}

/// Informational hook. Must not block, and the pipeline never branches on it.
pub trait Observer: Send + Sync {
    fn record(&self, stage: Stage, payload: &Value);
}
