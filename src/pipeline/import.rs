use super::{Applied, PipelineState, report_progress};
use crate::audio::isolate_panic;
use crate::scanner::metadata::{ProbeError, probe};
use crate::scanner::{scan_dir, standardize_path};
use crossbeam_channel::Sender;
use std::collections::HashSet;
use std::path::PathBuf;

/// Everything an import worker needs, captured on the owner before dispatch.
pub(crate) struct ImportJob {
    pub dir: PathBuf,
    pub tags: Vec<String>,
    /// Standardized paths already in the library when the import started.
    pub known: HashSet<PathBuf>,
    pub progress_interval: usize,
}

/// Scan then probe in discovery order, posting progress and one final batch.
pub(crate) fn run(job: ImportJob, tx: &Sender<Applied>) {
    let paths = scan_dir(&job.dir);
    if paths.is_empty() {
        log::info!("No audio files found in {}", job.dir.display());
        tx.send(Applied::ImportEmpty).ok();
        return;
    }

    tx.send(Applied::Phase(PipelineState::Probing)).ok();
    let total = paths.len();
    let mut seen = job.known;
    let mut samples = Vec::with_capacity(total);
    let mut skipped = 0usize;

    for (i, path) in paths.iter().enumerate() {
        if seen.insert(standardize_path(path)) {
            match isolate_panic(path, || probe(path, &job.tags)) {
                Some(Ok(sample)) => samples.push(sample),
                Some(Err(ProbeError::NotFound(p))) => {
                    log::warn!("Vanished before probing: {}", p);
                    skipped += 1;
                }
                None => {
                    log::warn!("Skipping {}: probe crashed", path.display());
                    skipped += 1;
                }
            }
        } else {
            log::debug!("Already in library: {}", path.display());
            skipped += 1;
        }
        report_progress(tx, i + 1, total, job.progress_interval);
    }

    log::info!(
        "Probed {} files in {} ({} skipped)",
        samples.len(),
        job.dir.display(),
        skipped
    );
    tx.send(Applied::ImportFinished { samples, skipped }).ok();
}
