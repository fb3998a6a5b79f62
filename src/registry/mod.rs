//! Source registry: one JSON descriptor per upstream provider, loaded at
//! startup. The registry is read-only input produced by the discovery step
//! (or maintained by hand); the pipeline never mutates it.

use std::collections::HashMap;
use std::fs;
use std::path::Path;

use tracing::debug;

use crate::common::error::{PipelineError, Result};
use crate::domain::SourceDescriptor;
use crate::observability::metrics;

pub struct SourceRegistry {
    sources: HashMap<String, SourceDescriptor>,
}

impl SourceRegistry {
    /// Load every `*.json` descriptor under `dir`.
    pub fn load_dir(dir: &Path) -> Result<Self> {
        let mut sources = HashMap::new();
        let entries = fs::read_dir(dir).map_err(|e| PipelineError::Registry {
            message: format!("cannot read registry dir {}: {e}", dir.display()),
        })?;
        for entry in entries {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let descriptor = load_descriptor(&path)?;
            debug!(source_id = %descriptor.source_id, path = %path.display(), "loaded source descriptor");
            sources.insert(descriptor.source_id.clone(), descriptor);
        }
        if sources.is_empty() {
            return Err(PipelineError::Registry {
                message: format!("no source descriptors found under {}", dir.display()),
            });
        }
        Ok(Self { sources })
    }

    pub fn from_descriptors(descriptors: Vec<SourceDescriptor>) -> Self {
        Self {
            sources: descriptors
                .into_iter()
                .map(|d| (d.source_id.clone(), d))
                .collect(),
        }
    }

    pub fn get(&self, source_id: &str) -> Option<&SourceDescriptor> {
        self.sources.get(source_id)
    }

    pub fn enabled(&self) -> impl Iterator<Item = &SourceDescriptor> {
        self.sources.values().filter(|d| d.enabled)
    }

    pub fn len(&self) -> usize {
        self.sources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }
}

pub fn load_descriptor(path: &Path) -> Result<SourceDescriptor> {
    let raw = fs::read_to_string(path)?;
    match serde_json::from_str::<SourceDescriptor>(&raw) {
        Ok(spec) => {
            metrics::registry::load_success();
            Ok(spec)
        }
        Err(e) => {
            metrics::registry::load_error();
            Err(PipelineError::Registry {
                message: format!("invalid descriptor {}: {e}", path.display()),
            })
        }
    }
}
