//! Snapshot file output.
//!
//! Every file is staged as a temp file in the destination directory and
//! renamed into place, so a reader never sees a half-written JSON document.
//! File names carry the snapshot's timestamp token; a write never touches
//! files of another token.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use serde::Serialize;
use serde_json::{Map, Value};
use tempfile::NamedTempFile;
use tracing::{debug, info, warn};

use super::{Section, Snapshot, SnapshotError, SnapshotResult};

pub const COMBINED_PREFIX: &str = "qdev_complete_export";
pub const COMPLETE_DATASET_PREFIX: &str = "complete_dataset";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum OutputMode {
    /// One `qdev_complete_export_<token>.json`.
    #[default]
    Combined,
    /// One file per section plus `complete_dataset_<token>.json`.
    Split,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WrittenFiles {
    pub token: String,
    pub files: Vec<PathBuf>,
}

#[derive(Debug, Clone)]
pub struct SnapshotWriter {
    output_dir: PathBuf,
    pretty: bool,
}

impl SnapshotWriter {
    pub fn new(output_dir: impl Into<PathBuf>) -> Self {
        Self {
            output_dir: output_dir.into(),
            pretty: true,
        }
    }

    pub fn pretty(mut self, pretty: bool) -> Self {
        self.pretty = pretty;
        self
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    pub fn write(&self, snapshot: &Snapshot, mode: OutputMode) -> SnapshotResult<WrittenFiles> {
        match mode {
            OutputMode::Combined => self.write_combined(snapshot),
            OutputMode::Split => self.write_split(snapshot),
        }
    }

    pub fn write_combined(&self, snapshot: &Snapshot) -> SnapshotResult<WrittenFiles> {
        let token = snapshot.export_info.file_token();
        let path = self.save_json(snapshot, &format!("{COMBINED_PREFIX}_{token}.json"))?;
        Ok(WrittenFiles {
            token,
            files: vec![path],
        })
    }

    /// Write each section to its own file, then the complete dataset.
    ///
    /// All files are staged before any is renamed into place. If a rename
    /// fails, files already placed for this token are removed again.
    pub fn write_split(&self, snapshot: &Snapshot) -> SnapshotResult<WrittenFiles> {
        let token = snapshot.export_info.file_token();
        self.ensure_dir()?;

        let mut staged = Vec::with_capacity(Section::ALL.len() + 1);
        for section in Section::ALL {
            let doc = section_document(snapshot, section)?;
            let name = format!("{}_{token}.json", section.key());
            staged.push(self.stage(&doc, &name)?);
        }
        staged.push(self.stage(snapshot, &format!("{COMPLETE_DATASET_PREFIX}_{token}.json"))?);

        let mut placed: Vec<PathBuf> = Vec::with_capacity(staged.len());
        for (tmp, dest) in staged {
            if let Err(err) = tmp.persist(&dest) {
                for path in &placed {
                    if let Err(e) = fs::remove_file(path) {
                        warn!(
                            path = %path.display(),
                            error = %e,
                            "failed to roll back split export file"
                        );
                    }
                }
                return Err(SnapshotError::Write {
                    path: dest,
                    source: err.error,
                });
            }
            debug!(path = %dest.display(), "wrote export file");
            placed.push(dest);
        }

        info!(
            token = %token,
            files = placed.len(),
            dir = %self.output_dir.display(),
            "split export written"
        );
        Ok(WrittenFiles {
            token,
            files: placed,
        })
    }

    /// Write a single section with its `export_info`.
    pub fn write_section(&self, snapshot: &Snapshot, section: Section) -> SnapshotResult<PathBuf> {
        let doc = section_document(snapshot, section)?;
        let token = snapshot.export_info.file_token();
        self.save_json(&doc, &format!("{}_{token}.json", section.key()))
    }

    /// Serialize `value` to `<output_dir>/<file_name>` atomically.
    pub fn save_json<T: Serialize + ?Sized>(
        &self,
        value: &T,
        file_name: &str,
    ) -> SnapshotResult<PathBuf> {
        self.ensure_dir()?;
        let (tmp, dest) = self.stage(value, file_name)?;
        tmp.persist(&dest).map_err(|e| SnapshotError::Write {
            path: dest.clone(),
            source: e.error,
        })?;
        info!(path = %dest.display(), "wrote export file");
        Ok(dest)
    }

    fn ensure_dir(&self) -> SnapshotResult<()> {
        fs::create_dir_all(&self.output_dir).map_err(|source| SnapshotError::Write {
            path: self.output_dir.clone(),
            source,
        })
    }

    /// Serialize into a temp file next to the destination.
    fn stage<T: Serialize + ?Sized>(
        &self,
        value: &T,
        file_name: &str,
    ) -> SnapshotResult<(NamedTempFile, PathBuf)> {
        let dest = self.output_dir.join(file_name);
        let bytes = if self.pretty {
            serde_json::to_vec_pretty(value)?
        } else {
            serde_json::to_vec(value)?
        };
        let write_err = |source: std::io::Error| SnapshotError::Write {
            path: dest.clone(),
            source,
        };
        let mut tmp = NamedTempFile::new_in(&self.output_dir).map_err(write_err)?;
        tmp.write_all(&bytes).map_err(write_err)?;
        tmp.write_all(b"\n").map_err(write_err)?;
        tmp.as_file().sync_all().map_err(write_err)?;
        Ok((tmp, dest))
    }
}

/// `{ "export_info": ..., "<section>": ... }`
fn section_document(snapshot: &Snapshot, section: Section) -> SnapshotResult<Value> {
    let mut doc = Map::new();
    doc.insert(
        "export_info".to_string(),
        serde_json::to_value(&snapshot.export_info)?,
    );
    doc.insert(section.key().to_string(), snapshot.section_value(section)?);
    Ok(Value::Object(doc))
}

/// Read a combined or complete-dataset file back.
pub fn read_snapshot(path: &Path) -> SnapshotResult<Snapshot> {
    let text = fs::read_to_string(path).map_err(|source| SnapshotError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(serde_json::from_str(&text)?)
}
