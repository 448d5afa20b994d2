//! Append-only persisted label table.
//!
//! The file has a `Label_Tag,Class_name` header followed by one row per
//! recorded label. Rows are only ever appended.

use crate::collector::table::{quote_field, split_record};
use crate::collector::types::RawLabel;
use std::fs::OpenOptions;
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::debug;

pub const STORE_HEADER: &str = "Label_Tag,Class_name";

#[derive(Debug, Error)]
pub enum LabelStoreError {
    #[error("label store IO error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// A label table on disk.
#[derive(Debug, Clone)]
pub struct LabelStore {
    path: PathBuf,
}

impl LabelStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn io_error(&self, source: std::io::Error) -> LabelStoreError {
        LabelStoreError::Io {
            path: self.path.clone(),
            source,
        }
    }

    /// Read every entry. A store that does not exist yet is empty.
    pub fn load(&self) -> Result<Vec<(RawLabel, String)>, LabelStoreError> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }
        let file = std::fs::File::open(&self.path).map_err(|e| self.io_error(e))?;

        let mut entries = Vec::new();
        for (index, line) in BufReader::new(file).lines().enumerate() {
            let line = line.map_err(|e| self.io_error(e))?;
            let line = line.trim_end_matches('\r');
            if line.trim().is_empty() || (index == 0 && line.trim() == STORE_HEADER) {
                continue;
            }

            let fields = split_record(line);
            let (Some(raw), Some(class)) = (fields.first(), fields.get(1)) else {
                debug!(row = index + 1, "skipping malformed label row");
                continue;
            };
            match RawLabel::parse(raw) {
                Some(raw) => entries.push((raw, class.trim().to_string())),
                None => debug!(row = index + 1, "skipping label row without a raw label"),
            }
        }
        Ok(entries)
    }

    /// Append one entry, writing the header first if the store is new.
    pub fn append(&self, raw: &RawLabel, class_name: &str) -> Result<(), LabelStoreError> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| self.io_error(e))?;
            }
        }

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(|e| self.io_error(e))?;
        let is_new = file.metadata().map_err(|e| self.io_error(e))?.len() == 0;

        let mut out = String::new();
        if is_new {
            out.push_str(STORE_HEADER);
            out.push('\n');
        }
        out.push_str(&quote_field(&raw.to_string()));
        out.push(',');
        out.push_str(&quote_field(class_name));
        out.push('\n');

        file.write_all(out.as_bytes()).map_err(|e| self.io_error(e))?;
        file.flush().map_err(|e| self.io_error(e))
    }
}
