use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use uuid::Uuid;

/// Stable identity of a sample. Assigned once at creation, never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SampleId(Uuid);

impl SampleId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SampleId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SampleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for SampleId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

/// One audio file in the library.
///
/// Every metadata field is independently optional: a probe that could read
/// the container but not decode the stream still produces a sample, and that
/// partial state is persisted as-is.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    pub id: SampleId,
    pub path: PathBuf,
    /// Sorted, no empty or duplicate entries.
    pub tags: Vec<String>,
    pub created_at: DateTime<Utc>,

    pub duration_seconds: Option<f64>,
    pub sample_rate: Option<f64>,
    pub bit_depth: Option<u32>,
    pub format: Option<String>,
    pub file_created: Option<DateTime<Utc>>,
    pub file_size_bytes: Option<u64>,
}

impl Sample {
    /// A sample with a fresh id and no metadata.
    pub fn new(path: impl Into<PathBuf>, tags: Vec<String>) -> Self {
        Self {
            id: SampleId::new(),
            path: path.into(),
            tags: normalize_tags(tags),
            created_at: Utc::now(),
            duration_seconds: None,
            sample_rate: None,
            bit_depth: None,
            format: None,
            file_created: None,
            file_size_bytes: None,
        }
    }

    /// File name as shown to the user, extension included.
    pub fn display_name(&self) -> String {
        display_name(&self.path)
    }

    /// True when no optional field is missing, i.e. a refresh has nothing to fill in.
    pub fn has_complete_metadata(&self) -> bool {
        self.duration_seconds.is_some()
            && self.sample_rate.is_some()
            && self.bit_depth.is_some()
            && self.format.is_some()
            && self.file_created.is_some()
            && self.file_size_bytes.is_some()
    }

    /// Copy every metadata field from `fresh`, keeping identity, tags and creation time.
    ///
    /// This is a full replacement: a field absent in `fresh` becomes absent here.
    pub fn with_metadata_from(&self, fresh: &Sample) -> Sample {
        Sample {
            id: self.id,
            path: fresh.path.clone(),
            tags: self.tags.clone(),
            created_at: self.created_at,
            duration_seconds: fresh.duration_seconds,
            sample_rate: fresh.sample_rate,
            bit_depth: fresh.bit_depth,
            format: fresh.format.clone(),
            file_created: fresh.file_created,
            file_size_bytes: fresh.file_size_bytes,
        }
    }
}

pub fn display_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| path.to_string_lossy().to_string())
}

/// Sort and deduplicate tags, dropping empty ones. Case is preserved.
pub fn normalize_tags(tags: Vec<String>) -> Vec<String> {
    let mut tags: Vec<String> = tags
        .into_iter()
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty())
        .collect();
    tags.sort();
    tags.dedup();
    tags
}

/// Split user tag text on commas, trimming and dropping empty fragments.
pub fn parse_tag_text(text: &str) -> Vec<String> {
    text.split(',')
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(str::to_string)
        .collect()
}

/// Aggregate numbers for the `stats` command.
#[derive(Debug, Default)]
pub struct LibraryStats {
    pub total_samples: usize,
    pub total_duration_secs: f64,
    pub total_bytes: u64,
    pub incomplete_metadata: usize,
    pub formats: Vec<(String, usize)>,
}
