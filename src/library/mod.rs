pub mod query;

use crate::db::models::{LibraryStats, Sample, SampleId, normalize_tags, parse_tag_text};
use crate::scanner::metadata::read_file_attributes;
use crate::scanner::standardize_path;
use std::collections::{BTreeSet, HashMap, HashSet};
use std::path::{Path, PathBuf};

pub use query::{SortKey, SortOrder};

/// Result of [`Library::rename`].
#[derive(Debug, PartialEq)]
pub enum RenameOutcome {
    /// File moved; `old_path` is where it used to live.
    Renamed { old_path: PathBuf },
    /// Destination equals source, nothing to do.
    Unchanged,
    /// Unknown id, invalid name, or the move failed. Sample left as it was.
    Failed,
}

/// The authoritative, ordered sample collection plus selection state.
#[derive(Debug, Default)]
pub struct Library {
    samples: Vec<Sample>,
    selection: BTreeSet<SampleId>,
    last_import: Vec<SampleId>,
}

impl Library {
    pub fn new(samples: Vec<Sample>) -> Self {
        Self {
            samples,
            ..Default::default()
        }
    }

    pub fn samples(&self) -> &[Sample] {
        &self.samples
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn get(&self, id: SampleId) -> Option<&Sample> {
        self.samples.iter().find(|s| s.id == id)
    }

    pub fn selection(&self) -> &BTreeSet<SampleId> {
        &self.selection
    }

    pub fn last_import(&self) -> &[SampleId] {
        &self.last_import
    }

    /// Standardized paths currently present.
    pub fn path_set(&self) -> HashSet<PathBuf> {
        self.samples.iter().map(|s| s.path.clone()).collect()
    }

    pub fn contains_path(&self, path: &Path) -> bool {
        let std_path = standardize_path(path);
        self.samples.iter().any(|s| s.path == std_path)
    }

    /// Resolve a full id or a unique prefix of its textual form.
    pub fn find_by_prefix(&self, prefix: &str) -> Option<SampleId> {
        let prefix = prefix.trim().to_lowercase();
        if prefix.is_empty() {
            return None;
        }
        let mut hits = self
            .samples
            .iter()
            .filter(|s| s.id.to_string().starts_with(&prefix));
        match (hits.next(), hits.next()) {
            (Some(s), None) => Some(s.id),
            _ => None,
        }
    }

    /// Add a batch as one block, skipping paths already present or repeated
    /// within the batch (first occurrence wins).
    ///
    /// Selection and the last-import record both become exactly the inserted ids.
    pub fn insert(&mut self, batch: Vec<Sample>, at_front: bool) -> Vec<SampleId> {
        let mut seen = self.path_set();
        let mut accepted = Vec::with_capacity(batch.len());
        for mut sample in batch {
            sample.path = standardize_path(&sample.path);
            if seen.insert(sample.path.clone()) {
                accepted.push(sample);
            } else {
                log::debug!("Skipping duplicate {}", sample.path.display());
            }
        }

        let ids: Vec<SampleId> = accepted.iter().map(|s| s.id).collect();
        if at_front {
            self.samples.splice(0..0, accepted);
        } else {
            self.samples.extend(accepted);
        }

        self.selection = ids.iter().copied().collect();
        self.last_import = ids.clone();
        ids
    }

    /// Drop entries from the library only; files stay on disk.
    pub fn remove_logical(&mut self, ids: &[SampleId]) -> Vec<Sample> {
        let doomed: HashSet<SampleId> = ids.iter().copied().collect();
        let (removed, kept): (Vec<Sample>, Vec<Sample>) = std::mem::take(&mut self.samples)
            .into_iter()
            .partition(|s| doomed.contains(&s.id));
        self.samples = kept;
        self.selection.retain(|id| !doomed.contains(id));
        self.last_import.retain(|id| !doomed.contains(id));
        removed
    }

    /// Remove entries and delete their files. A failed delete is logged and
    /// does not stop the rest.
    pub fn remove_and_delete(&mut self, ids: &[SampleId]) -> Vec<Sample> {
        let removed = self.remove_logical(ids);
        for sample in &removed {
            if let Err(e) = std::fs::remove_file(&sample.path) {
                log::warn!("Could not delete {}: {}", sample.path.display(), e);
            }
        }
        removed
    }

    /// Move the file to `new_name` in the same directory.
    ///
    /// The original extension is kept when `new_name` has none. On success
    /// the path and file attributes are updated; otherwise nothing changes.
    pub fn rename(&mut self, id: SampleId, new_name: &str) -> RenameOutcome {
        let Some(sample) = self.samples.iter_mut().find(|s| s.id == id) else {
            return RenameOutcome::Failed;
        };

        let Some(destination) = rename_destination(&sample.path, new_name) else {
            log::warn!("Invalid name {:?} for {}", new_name, sample.path.display());
            return RenameOutcome::Failed;
        };
        if destination == sample.path {
            return RenameOutcome::Unchanged;
        }
        if destination.exists() {
            log::warn!("Not renaming onto existing {}", destination.display());
            return RenameOutcome::Failed;
        }

        if let Err(e) = std::fs::rename(&sample.path, &destination) {
            log::warn!(
                "Could not move {} to {}: {}",
                sample.path.display(),
                destination.display(),
                e
            );
            return RenameOutcome::Failed;
        }

        let old_path = std::mem::replace(&mut sample.path, destination);
        sample.file_created = None;
        sample.file_size_bytes = None;
        let (created, size) = read_file_attributes(&sample.path);
        sample.file_created = created;
        sample.file_size_bytes = size;

        RenameOutcome::Renamed { old_path }
    }

    /// Union the comma-separated tags in `text` into each target. Returns how
    /// many samples changed.
    pub fn add_tags(&mut self, text: &str, targets: &[SampleId]) -> usize {
        let new_tags = parse_tag_text(text);
        if new_tags.is_empty() {
            return 0;
        }
        self.update_targets(targets, |sample| {
            let mut merged = sample.tags.clone();
            merged.extend(new_tags.iter().cloned());
            normalize_tags(merged)
        })
    }

    /// Remove the comma-separated tags in `text`, ignoring case.
    pub fn remove_tags(&mut self, text: &str, targets: &[SampleId]) -> usize {
        let doomed: HashSet<String> = parse_tag_text(text)
            .into_iter()
            .map(|t| t.to_lowercase())
            .collect();
        if doomed.is_empty() {
            return 0;
        }
        self.update_targets(targets, |sample| {
            sample
                .tags
                .iter()
                .filter(|t| !doomed.contains(&t.to_lowercase()))
                .cloned()
                .collect()
        })
    }

    fn update_targets(
        &mut self,
        targets: &[SampleId],
        new_tags: impl Fn(&Sample) -> Vec<String>,
    ) -> usize {
        let targets: HashSet<SampleId> = targets.iter().copied().collect();
        let mut changed = 0;
        for sample in self.samples.iter_mut().filter(|s| targets.contains(&s.id)) {
            let tags = new_tags(sample);
            if tags != sample.tags {
                sample.tags = tags;
                changed += 1;
            }
        }
        changed
    }

    pub fn filter(&self, query: &str) -> Vec<&Sample> {
        query::filter(&self.samples, query)
    }

    /// Reorder the library in place.
    pub fn sort(&mut self, key: SortKey, order: SortOrder) {
        query::sort(&mut self.samples, key, order);
    }

    /// Replace the selection, keeping only ids that exist.
    pub fn select(&mut self, ids: &[SampleId]) {
        let present: HashSet<SampleId> = self.samples.iter().map(|s| s.id).collect();
        self.selection = ids.iter().copied().filter(|id| present.contains(id)).collect();
    }

    /// Undo the most recent [`insert`](Self::insert). No-op when nothing is recorded.
    pub fn remove_last_import(&mut self) -> Vec<Sample> {
        if self.last_import.is_empty() {
            return Vec::new();
        }
        let ids = std::mem::take(&mut self.last_import);
        self.remove_logical(&ids)
    }

    /// Swap in refreshed copies of samples by id.
    ///
    /// Samples removed since the snapshot was taken stay removed, and samples
    /// added since are kept in place.
    pub fn apply_refreshed(&mut self, refreshed: Vec<Sample>) -> usize {
        let mut by_id: HashMap<SampleId, Sample> =
            refreshed.into_iter().map(|s| (s.id, s)).collect();
        let mut replaced = 0;
        for slot in self.samples.iter_mut() {
            if let Some(fresh) = by_id.remove(&slot.id) {
                if *slot != fresh {
                    *slot = fresh;
                    replaced += 1;
                }
            }
        }
        replaced
    }

    pub fn stats(&self) -> LibraryStats {
        let mut formats: HashMap<String, usize> = HashMap::new();
        let mut stats = LibraryStats {
            total_samples: self.samples.len(),
            ..Default::default()
        };
        for s in &self.samples {
            stats.total_duration_secs += s.duration_seconds.unwrap_or(0.0);
            stats.total_bytes += s.file_size_bytes.unwrap_or(0);
            if !s.has_complete_metadata() {
                stats.incomplete_metadata += 1;
            }
            let fmt = s.format.clone().unwrap_or_else(|| "?".to_string());
            *formats.entry(fmt).or_insert(0) += 1;
        }
        let mut formats: Vec<(String, usize)> = formats.into_iter().collect();
        formats.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        stats.formats = formats;
        stats
    }
}

/// Destination for a rename inside the source's directory, or `None` for
/// names that are empty or would leave the directory.
fn rename_destination(source: &Path, new_name: &str) -> Option<PathBuf> {
    let name = new_name.trim();
    if name.is_empty() || name == "." || name == ".." || name.contains(['/', '\\']) {
        return None;
    }
    let parent = source.parent()?;
    let mut file_name = name.to_string();
    if Path::new(name).extension().is_none() {
        if let Some(ext) = source.extension() {
            file_name.push('.');
            file_name.push_str(&ext.to_string_lossy());
        }
    }
    Some(parent.join(file_name))
}
