//! Payload parsers: one per upstream shape. Parsers turn raw payload bytes
//! into [`RawRecord`]s and nothing else; fetching, caching and retries live
//! in the connector. A payload whose overall shape is wrong is schema drift
//! and fails the fetch, while individually incomplete records pass through
//! as-is and are discarded later by normalization.

use serde_json::Value;

use crate::common::error::{PipelineError, Result};
use crate::domain::{RawRecord, SourceDescriptor};

pub trait PayloadParser: Send + Sync {
    fn parse(&self, payload: &[u8], source: &SourceDescriptor) -> Result<Vec<RawRecord>>;
}

/// ArcGIS feature-layer query results: `{"features": [{"attributes": {...},
/// "geometry": {"x": lon, "y": lat}}]}`.
pub struct ArcGisFeatureParser;

impl PayloadParser for ArcGisFeatureParser {
    fn parse(&self, payload: &[u8], source: &SourceDescriptor) -> Result<Vec<RawRecord>> {
        let doc: Value = serde_json::from_slice(payload)?;
        let features = doc
            .get("features")
            .and_then(|f| f.as_array())
            .ok_or_else(|| PipelineError::SchemaDrift {
                source_id: source.source_id.clone(),
                detail: "response has no 'features' array".into(),
            })?;

        let mut records = Vec::with_capacity(features.len());
        for feature in features {
            let attrs =
                feature
                    .get("attributes")
                    .and_then(|a| a.as_object())
                    .ok_or_else(|| PipelineError::SchemaDrift {
                        source_id: source.source_id.clone(),
                        detail: "feature without 'attributes' object".into(),
                    })?;
            let geometry = feature.get("geometry");
            records.push(RawRecord {
                source_id: source.source_id.clone(),
                station: text(attrs.get("estacao").or_else(|| attrs.get("nome"))),
                pollutant: text(attrs.get("poluente")),
                value: text(attrs.get("valor")),
                unit: text(attrs.get("unidade")),
                timestamp: text(attrs.get("data_hora")),
                latitude: geometry.and_then(|g| g.get("y")).and_then(Value::as_f64),
                longitude: geometry.and_then(|g| g.get("x")).and_then(Value::as_f64),
            });
        }
        Ok(records)
    }
}

/// MonitorAr JSON: `{"data": [{"estacao": ..., "parametro": ..., "valor":
/// ..., "unidade": ..., "data": ...}]}`.
pub struct MonitorArParser;

impl PayloadParser for MonitorArParser {
    fn parse(&self, payload: &[u8], source: &SourceDescriptor) -> Result<Vec<RawRecord>> {
        let doc: Value = serde_json::from_slice(payload)?;
        let rows = doc
            .get("data")
            .and_then(|d| d.as_array())
            .ok_or_else(|| PipelineError::SchemaDrift {
                source_id: source.source_id.clone(),
                detail: "response has no 'data' array".into(),
            })?;

        let mut records = Vec::with_capacity(rows.len());
        for row in rows {
            records.push(RawRecord {
                source_id: source.source_id.clone(),
                station: text(row.get("estacao")),
                pollutant: text(row.get("parametro").or_else(|| row.get("poluente"))),
                value: text(row.get("valor")),
                unit: text(row.get("unidade")),
                timestamp: text(row.get("data")),
                latitude: row.get("latitude").and_then(Value::as_f64),
                longitude: row.get("longitude").and_then(Value::as_f64),
            });
        }
        Ok(records)
    }
}

// Raw fields stay strings: numbers are rendered, everything else becomes
// empty and gets discarded during normalization.
fn text(value: Option<&Value>) -> String {
    match value {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Number(n)) => n.to_string(),
        _ => String::new(),
    }
}
