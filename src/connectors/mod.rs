//! Source connectors: the only components that touch the network.
//!
//! A connector fetches the raw payload for one (source, window) pair under
//! cache, throttle and retry discipline, then hands the bytes to its
//! [`PayloadParser`]. Fetches are all-or-nothing per window: either the
//! whole payload (all pages merged) lands in the cache, or nothing does.

pub mod factory;
pub mod http;
pub mod parsers;
pub mod retry;
pub mod throttle;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::{debug, info, instrument, warn};

use crate::cache::FetchCache;
use crate::common::error::{PipelineError, Result};
use crate::domain::{AccessMethod, RawRecord, SourceDescriptor, TimeWindow};
use crate::observability::metrics;

use http::HttpFetch;
use parsers::PayloadParser;
use retry::{is_retryable, RetryPolicy};
use throttle::Throttle;

/// Capability interface every source implements: fetch the raw records for
/// one time window.
#[async_trait]
pub trait SourceConnector: Send + Sync {
    fn descriptor(&self) -> &SourceDescriptor;

    /// Fetch raw records for `window`. An empty window yields an empty
    /// sequence. Transient failures are retried per the connector's policy;
    /// exhaustion (or a terminal upstream response) surfaces as
    /// [`PipelineError::SourceUnavailable`] carrying the last cause.
    async fn fetch(&self, window: &TimeWindow) -> Result<Vec<RawRecord>>;
}

/// The single connector implementation, parameterized by access method and
/// payload parser.
pub struct HttpConnector {
    descriptor: SourceDescriptor,
    parser: Box<dyn PayloadParser>,
    http: Arc<dyn HttpFetch>,
    cache: Arc<FetchCache>,
    retry: RetryPolicy,
    throttle: Throttle,
}

impl HttpConnector {
    pub fn new(
        descriptor: SourceDescriptor,
        parser: Box<dyn PayloadParser>,
        http: Arc<dyn HttpFetch>,
        cache: Arc<FetchCache>,
        retry: RetryPolicy,
    ) -> Self {
        let throttle = Throttle::new(Duration::from_millis(descriptor.min_request_interval_ms));
        Self {
            descriptor,
            parser,
            http,
            cache,
            retry,
            throttle,
        }
    }

    /// One throttled GET with status checking. 2xx returns the body;
    /// anything else is an [`PipelineError::HttpStatus`] for the retry
    /// classifier to sort out.
    async fn get_checked(&self, url: &str) -> Result<Vec<u8>> {
        self.throttle.wait().await;
        let result = self.http.get(url).await?;
        if !(200..300).contains(&result.status) {
            metrics::sources::request_error();
            return Err(PipelineError::HttpStatus {
                url: url.to_string(),
                status: result.status,
            });
        }
        metrics::sources::request_success();
        metrics::sources::payload_bytes(result.bytes.len());
        Ok(result.bytes)
    }

    /// Fetch the whole window as one payload, paginating where the access
    /// method requires it. Any page failure fails the window; the
    /// already-fetched prefix is dropped so partial results never leak.
    async fn fetch_window(&self, window: &TimeWindow) -> Result<Vec<u8>> {
        match self.descriptor.access.method {
            AccessMethod::FeatureLayerQuery => self.fetch_feature_pages(window).await,
            AccessMethod::RestApi => {
                let url = rest_api_url(&self.descriptor.access.url, window)?;
                self.get_checked(&url).await
            }
            AccessMethod::StaticFile => self.get_checked(&self.descriptor.access.url).await,
        }
    }

    /// ArcGIS feature layers cap each response (typically 2000 records) and
    /// flag truncation with `exceededTransferLimit`. We page via
    /// `resultOffset` until the flag clears and merge every page into a
    /// single `{"features": [...]}` document before caching. The offset
    /// advances by the number of features actually returned: servers
    /// enforce their own `maxRecordCount` and may deliver fewer records
    /// per page than requested.
    async fn fetch_feature_pages(&self, window: &TimeWindow) -> Result<Vec<u8>> {
        let page_size = self.descriptor.page_size.unwrap_or(2000);
        let mut features: Vec<Value> = Vec::new();
        let mut offset: u32 = 0;
        loop {
            let url = feature_layer_url(&self.descriptor.access.url, window, offset, page_size)?;
            let bytes = self.get_checked(&url).await?;
            let doc: Value = serde_json::from_slice(&bytes)?;
            let page = doc
                .get("features")
                .and_then(|f| f.as_array())
                .ok_or_else(|| PipelineError::SchemaDrift {
                    source_id: self.descriptor.source_id.clone(),
                    detail: "feature-layer page has no 'features' array".into(),
                })?;
            let returned = page.len() as u32;
            features.extend(page.iter().cloned());
            let truncated = doc
                .get("exceededTransferLimit")
                .and_then(Value::as_bool)
                .unwrap_or(false);
            // An empty truncated page would never advance; stop either way.
            if !truncated || returned == 0 {
                break;
            }
            offset += returned;
            debug!(
                source_id = %self.descriptor.source_id,
                offset,
                "feature layer truncated, fetching next page"
            );
        }
        Ok(serde_json::to_vec(&json!({ "features": features }))?)
    }

    async fn fetch_with_retry(&self, window: &TimeWindow) -> Result<Vec<u8>> {
        let mut attempt: u32 = 0;
        loop {
            attempt += 1;
            match self.fetch_window(window).await {
                Ok(payload) => return Ok(payload),
                // Re-fetching cannot fix a shape mismatch; fail fast.
                Err(e @ PipelineError::SchemaDrift { .. }) => return Err(e),
                Err(e) if is_retryable(&e) && attempt < self.retry.max_attempts => {
                    let delay = self.retry.delay_for(attempt);
                    warn!(
                        source_id = %self.descriptor.source_id,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "fetch failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) => {
                    return Err(PipelineError::SourceUnavailable {
                        source_id: self.descriptor.source_id.clone(),
                        attempts: attempt,
                        cause: Box::new(e),
                    })
                }
            }
        }
    }
}

#[async_trait]
impl SourceConnector for HttpConnector {
    fn descriptor(&self) -> &SourceDescriptor {
        &self.descriptor
    }

    #[instrument(skip(self), fields(source_id = %self.descriptor.source_id, window = %window.key()))]
    async fn fetch(&self, window: &TimeWindow) -> Result<Vec<RawRecord>> {
        if window.is_empty() {
            return Ok(Vec::new());
        }

        // Check-then-fetch is a critical section per cache key.
        let guard = self.cache.lock_for(&self.descriptor.source_id, window);
        let _held = guard.lock().await;

        if let Some(payload) = self.cache.get(&self.descriptor.source_id, window)? {
            debug!("cache hit, skipping network fetch");
            return self.parser.parse(&payload, &self.descriptor);
        }

        let payload = self.fetch_with_retry(window).await?;
        self.cache.put(&self.descriptor.source_id, window, &payload)?;
        let records = self.parser.parse(&payload, &self.descriptor)?;
        info!(records = records.len(), "fetched window");
        Ok(records)
    }
}

fn rest_api_url(base: &str, window: &TimeWindow) -> Result<String> {
    let url = reqwest::Url::parse_with_params(
        base,
        &[
            ("since", window.since.to_rfc3339()),
            ("until", window.until.to_rfc3339()),
        ],
    )
    .map_err(|e| PipelineError::Registry {
        message: format!("invalid endpoint url '{base}': {e}"),
    })?;
    Ok(url.into())
}

fn feature_layer_url(
    base: &str,
    window: &TimeWindow,
    offset: u32,
    page_size: u32,
) -> Result<String> {
    let ts = "%Y-%m-%d %H:%M:%S";
    let where_clause = format!(
        "data_hora >= TIMESTAMP '{}' AND data_hora < TIMESTAMP '{}'",
        window.since.format(ts),
        window.until.format(ts)
    );
    let offset = offset.to_string();
    let page_size = page_size.to_string();
    let url = reqwest::Url::parse_with_params(
        base,
        &[
            ("where", where_clause.as_str()),
            ("outFields", "*"),
            ("f", "json"),
            ("resultOffset", offset.as_str()),
            ("resultRecordCount", page_size.as_str()),
        ],
    )
    .map_err(|e| PipelineError::Registry {
        message: format!("invalid endpoint url '{base}': {e}"),
    })?;
    Ok(url.into())
}
