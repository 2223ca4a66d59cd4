//! Built-in diagnostics observers

use serde_json::Value;
use tracing::debug;

use crate::traits::{Observer, Stage};

/// Discards every event.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopObserver;

impl Observer for NoopObserver {
    fn record(&self, _stage: Stage, _payload: &Value) {}
}

/// Forwards events to `tracing` at debug level.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingObserver;

impl Observer for TracingObserver {
    fn record(&self, stage: Stage, payload: &Value) {
        debug!(stage = stage.as_str(), payload = %payload, "pipeline event");
    }
}
