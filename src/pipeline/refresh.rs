use super::{Applied, report_progress};
use crate::audio::isolate_panic;
use crate::db::models::Sample;
use crate::scanner::metadata::probe;
use crossbeam_channel::Sender;

/// Re-probe every sample with missing metadata in `snapshot`.
pub(crate) fn run(snapshot: Vec<Sample>, progress_interval: usize, tx: &Sender<Applied>) {
    let total = snapshot.len();
    let mut refreshed = Vec::with_capacity(total);
    let mut reprobed = 0usize;

    for (i, sample) in snapshot.into_iter().enumerate() {
        let (sample, probed) = refresh_one(sample);
        if probed {
            reprobed += 1;
        }
        refreshed.push(sample);
        report_progress(tx, i + 1, total, progress_interval);
    }

    log::info!("Re-probed {} of {} samples", reprobed, total);
    tx.send(Applied::RefreshFinished { samples: refreshed }).ok();
}

/// Complete samples pass through untouched. Others take every metadata
/// field from a fresh probe; a failed or crashed probe keeps the original.
fn refresh_one(sample: Sample) -> (Sample, bool) {
    if sample.has_complete_metadata() {
        return (sample, false);
    }
    match isolate_panic(&sample.path, || probe(&sample.path, &sample.tags)) {
        Some(Ok(fresh)) => (sample.with_metadata_from(&fresh), true),
        Some(Err(e)) => {
            log::debug!("Keeping {} as is: {}", sample.path.display(), e);
            (sample, false)
        }
        None => (sample, false),
    }
}
