use super::models::Sample;
use super::SampleStore;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DocumentError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Current document layout version.
const DOCUMENT_VERSION: u32 = 1;

#[derive(Serialize, Deserialize)]
struct LibraryDocument {
    version: u32,
    samples: Vec<Sample>,
}

/// Flat-document backend: the whole sample list as one JSON file.
pub struct DocumentStore {
    path: PathBuf,
}

impl DocumentStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read(&self) -> Result<Vec<Sample>, DocumentError> {
        let contents = std::fs::read_to_string(&self.path)?;
        let doc: LibraryDocument = serde_json::from_str(&contents)?;
        if doc.version > DOCUMENT_VERSION {
            log::warn!(
                "{} has document version {}, newer than supported {}",
                self.path.display(),
                doc.version,
                DOCUMENT_VERSION
            );
        }
        Ok(doc.samples)
    }
}

impl SampleStore for DocumentStore {
    type Error = DocumentError;

    fn load(&self) -> Vec<Sample> {
        if !self.path.exists() {
            log::debug!("No library document at {}, starting empty", self.path.display());
            return Vec::new();
        }
        match self.read() {
            Ok(samples) => samples,
            Err(e) => {
                log::warn!("Failed to read {}: {}. Starting empty.", self.path.display(), e);
                Vec::new()
            }
        }
    }

    fn save(&self, samples: &[Sample]) -> Result<(), DocumentError> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let doc = LibraryDocument {
            version: DOCUMENT_VERSION,
            samples: samples.to_vec(),
        };
        let json = serde_json::to_vec_pretty(&doc)?;

        // Write beside the target, then rename over it
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, json)?;
        std::fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}
