//! Raw (bronze) and canonical (silver) layer persistence.
//!
//! Bronze: one NDJSON file per (source, window) fetch, append-only; an
//! existing file is never rewritten. Silver: canonical records for a
//! (source, window) replace any prior output for the same key, written into
//! `year=YYYY/month=MM/` partitions for the export consumer.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use chrono::Datelike;
use tracing::{debug, info};

use crate::common::error::Result;
use crate::domain::{CanonicalRecord, RawRecord, TimeWindow};

#[derive(Clone)]
pub struct RawStore {
    root: PathBuf,
}

impl RawStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Persist one fetch as a discrete bronze file. If the file already
    /// exists it is left untouched: bronze is append-only and a re-run over
    /// the same window is a no-op.
    pub fn append(&self, source_id: &str, window: &TimeWindow, records: &[RawRecord]) -> Result<PathBuf> {
        let path = self.path_for(source_id, window);
        if path.exists() {
            debug!(source_id, window = %window.key(), "bronze file already present, keeping it");
            return Ok(path);
        }
        fs::create_dir_all(path.parent().expect("bronze path has parent"))?;
        write_ndjson_atomic(&path, records)?;
        info!(source_id, window = %window.key(), records = records.len(), "wrote bronze file");
        Ok(path)
    }

    pub fn load(&self, source_id: &str, window: &TimeWindow) -> Result<Vec<RawRecord>> {
        read_ndjson(&self.path_for(source_id, window))
    }

    /// Every (source, window) fetch present in the bronze layer.
    pub fn list(&self) -> Result<Vec<(String, TimeWindow)>> {
        let mut found = Vec::new();
        let root = match fs::read_dir(&self.root) {
            Ok(dir) => dir,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(found),
            Err(e) => return Err(e.into()),
        };
        for source_dir in root {
            let source_dir = source_dir?.path();
            if !source_dir.is_dir() {
                continue;
            }
            let source_id = source_dir
                .file_name()
                .and_then(|n| n.to_str())
                .unwrap_or_default()
                .to_string();
            for file in fs::read_dir(&source_dir)? {
                let path = file?.path();
                if path.extension().and_then(|e| e.to_str()) != Some("ndjson") {
                    continue;
                }
                if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                    found.push((source_id.clone(), TimeWindow::from_key(stem)?));
                }
            }
        }
        found.sort_by(|a, b| (&a.0, a.1.since).cmp(&(&b.0, b.1.since)));
        Ok(found)
    }

    fn path_for(&self, source_id: &str, window: &TimeWindow) -> PathBuf {
        self.root
            .join(source_id)
            .join(format!("{}.ndjson", window.key()))
    }
}

#[derive(Clone)]
pub struct CanonicalStore {
    root: PathBuf,
}

impl CanonicalStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Replace the canonical output for (source, window): any prior files
    /// for the key are removed, then records are grouped by the year/month
    /// of `timestamp_utc` and written one partition file at a time.
    pub fn replace(
        &self,
        source_id: &str,
        window: &TimeWindow,
        records: &[CanonicalRecord],
    ) -> Result<Vec<PathBuf>> {
        let file_name = format!("{source_id}_{}.ndjson", window.key());
        for stale in self.files_named(&file_name)? {
            fs::remove_file(&stale)?;
            debug!(path = %stale.display(), "removed prior canonical output");
        }

        let mut partitions: BTreeMap<(i32, u32), Vec<&CanonicalRecord>> = BTreeMap::new();
        for record in records {
            partitions
                .entry((record.timestamp_utc.year(), record.timestamp_utc.month()))
                .or_default()
                .push(record);
        }

        let mut written = Vec::new();
        for ((year, month), group) in partitions {
            let dir = self
                .root
                .join(format!("year={year:04}"))
                .join(format!("month={month:02}"));
            fs::create_dir_all(&dir)?;
            let path = dir.join(&file_name);
            write_ndjson_atomic(&path, &group)?;
            written.push(path);
        }
        info!(
            source_id,
            window = %window.key(),
            records = records.len(),
            partitions = written.len(),
            "replaced canonical output"
        );
        Ok(written)
    }

    /// All canonical files, partition order.
    pub fn list(&self) -> Result<Vec<PathBuf>> {
        let mut files = Vec::new();
        collect_ndjson(&self.root, &mut files)?;
        files.sort();
        Ok(files)
    }

    pub fn load(&self, path: &Path) -> Result<Vec<CanonicalRecord>> {
        read_ndjson(path)
    }

    fn files_named(&self, file_name: &str) -> Result<Vec<PathBuf>> {
        let mut all = Vec::new();
        collect_ndjson(&self.root, &mut all)?;
        Ok(all
            .into_iter()
            .filter(|p| p.file_name().and_then(|n| n.to_str()) == Some(file_name))
            .collect())
    }
}

fn collect_ndjson(dir: &Path, out: &mut Vec<PathBuf>) -> Result<()> {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
        Err(e) => return Err(e.into()),
    };
    for entry in entries {
        let path = entry?.path();
        if path.is_dir() {
            collect_ndjson(&path, out)?;
        } else if path.extension().and_then(|e| e.to_str()) == Some("ndjson") {
            out.push(path);
        }
    }
    Ok(())
}

fn write_ndjson_atomic<T: serde::Serialize>(path: &Path, records: &[T]) -> Result<()> {
    let mut buf = Vec::new();
    for record in records {
        serde_json::to_writer(&mut buf, record)?;
        buf.push(b'\n');
    }
    let tmp = path.with_extension("ndjson.tmp");
    fs::write(&tmp, &buf)?;
    fs::rename(&tmp, path)?;
    Ok(())
}

fn read_ndjson<T: serde::de::DeserializeOwned>(path: &Path) -> Result<Vec<T>> {
    let raw = fs::read_to_string(path)?;
    let mut records = Vec::new();
    for line in raw.lines() {
        if line.trim().is_empty() {
            continue;
        }
        records.push(serde_json::from_str(line)?);
    }
    Ok(records)
}
