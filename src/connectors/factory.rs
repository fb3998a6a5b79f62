//! Builds a connector for a source descriptor. The access method picks the
//! parser: feature layers use the ArcGIS shape; REST endpoints and static
//! file drops both deliver the MonitorAr row shape.

use std::sync::Arc;

use crate::cache::FetchCache;
use crate::domain::{AccessMethod, SourceDescriptor};

use super::http::HttpFetch;
use super::parsers::{ArcGisFeatureParser, MonitorArParser, PayloadParser};
use super::retry::RetryPolicy;
use super::HttpConnector;

pub fn connector_for(
    descriptor: SourceDescriptor,
    http: Arc<dyn HttpFetch>,
    cache: Arc<FetchCache>,
    retry: RetryPolicy,
) -> HttpConnector {
    let parser: Box<dyn PayloadParser> = match descriptor.access.method {
        AccessMethod::FeatureLayerQuery => Box::new(ArcGisFeatureParser),
        AccessMethod::RestApi | AccessMethod::StaticFile => Box::new(MonitorArParser),
    };
    HttpConnector::new(descriptor, parser, http, cache, retry)
}
