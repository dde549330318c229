//! The engine: sole owner of the library and its persisted copy.
//!
//! Long-running work (scan, probe, refresh, convert, render) runs on a rayon
//! pool and reports back as [`Applied`] messages. Library state only changes
//! when the owner drains those messages in [`Engine::process_pending`] or
//! [`Engine::wait_idle`], and every change is persisted before observers are
//! told about it.

mod import;
mod refresh;

use crate::audio::panic_message;
use crate::convert::{ConvertOptions, convert_batch};
use crate::db::models::{Sample, SampleId, parse_tag_text};
use crate::db::{SampleStore, Store};
use crate::library::{Library, RenameOutcome, SortKey, SortOrder};
use crate::waveform::{WaveformCache, WaveformImage, WaveformSize};
use crossbeam_channel::{Receiver, Sender};
use rayon::ThreadPool;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("An import or refresh is already running")]
    Busy,
    #[error("Could not start worker pool: {0}")]
    Pool(#[from] rayon::ThreadPoolBuildError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PipelineState {
    #[default]
    Idle,
    Scanning,
    Probing,
    Merging,
    Refreshing,
}

/// Observable engine state. Only the apply step writes it.
#[derive(Debug, Clone, Default)]
pub struct EngineState {
    pub pipeline: PipelineState,
    /// 0.0..=1.0 for the running batch.
    pub progress: f64,
    pub status: String,
    /// Conversion batches still running.
    pub conversions: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub enum LibraryEvent {
    SamplesChanged,
    SelectionChanged,
    Progress { fraction: f64, status: String },
    StateChanged(PipelineState),
}

/// Worker-to-owner messages.
pub(crate) enum Applied {
    Phase(PipelineState),
    Progress { processed: usize, total: usize },
    ImportEmpty,
    ImportFinished { samples: Vec<Sample>, skipped: usize },
    RefreshFinished { samples: Vec<Sample> },
    ConversionFinished { written: Vec<PathBuf>, requested: usize },
    /// A worker died before posting its result.
    Aborted { status: String },
}

pub(crate) fn report_progress(tx: &Sender<Applied>, processed: usize, total: usize, interval: usize) {
    if processed == total || processed % interval.max(1) == 0 {
        tx.send(Applied::Progress { processed, total }).ok();
    }
}

#[derive(Debug, Clone)]
pub struct EngineOptions {
    pub cache_dir: PathBuf,
    pub workers: usize,
    pub progress_interval: usize,
}

pub struct Engine {
    library: Library,
    store: Store,
    cache: WaveformCache,
    pool: Arc<ThreadPool>,
    state: EngineState,
    progress_interval: usize,
    tx: Sender<Applied>,
    rx: Receiver<Applied>,
    subscribers: Vec<Sender<LibraryEvent>>,
}

impl Engine {
    /// Load the library from `store` and start the worker pool.
    pub fn new(store: Store, options: EngineOptions) -> Result<Self, EngineError> {
        let pool = Arc::new(
            rayon::ThreadPoolBuilder::new()
                .num_threads(options.workers.max(1))
                .thread_name(|i| format!("sampledeck-worker-{i}"))
                .panic_handler(|payload| log::error!("Worker panicked: {}", panic_message(payload.as_ref())))
                .build()?,
        );
        let samples = store.load();
        log::info!("Loaded {} samples", samples.len());
        let (tx, rx) = crossbeam_channel::unbounded();

        Ok(Self {
            library: Library::new(samples),
            store,
            cache: WaveformCache::new(options.cache_dir, Arc::clone(&pool)),
            pool,
            state: EngineState::default(),
            progress_interval: options.progress_interval.max(1),
            tx,
            rx,
            subscribers: Vec::new(),
        })
    }

    pub fn library(&self) -> &Library {
        &self.library
    }

    pub fn state(&self) -> &EngineState {
        &self.state
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    pub fn waveform_cache(&self) -> &WaveformCache {
        &self.cache
    }

    pub fn subscribe(&mut self) -> Receiver<LibraryEvent> {
        let (tx, rx) = crossbeam_channel::unbounded();
        self.subscribers.push(tx);
        rx
    }

    pub fn is_busy(&self) -> bool {
        self.state.pipeline != PipelineState::Idle
    }

    // --- background batches ---

    /// Scan `dir` and probe what it finds, tagging every new sample with
    /// the comma-separated `tag_text`.
    pub fn start_import(&mut self, dir: &Path, tag_text: &str) -> Result<(), EngineError> {
        if self.is_busy() {
            return Err(EngineError::Busy);
        }
        let job = import::ImportJob {
            dir: dir.to_path_buf(),
            tags: parse_tag_text(tag_text),
            known: self.library.path_set(),
            progress_interval: self.progress_interval,
        };
        self.set_pipeline(PipelineState::Scanning);
        self.set_progress(0.0, format!("Scanning {}", dir.display()));

        let abort = Applied::Aborted { status: "Import failed".to_string() };
        self.spawn_job(abort, move |tx| import::run(job, tx));
        Ok(())
    }

    /// Re-probe every sample that is missing metadata.
    pub fn start_refresh(&mut self) -> Result<(), EngineError> {
        if self.is_busy() {
            return Err(EngineError::Busy);
        }
        let snapshot = self.library.samples().to_vec();
        let interval = self.progress_interval;
        self.set_pipeline(PipelineState::Refreshing);
        self.set_progress(0.0, "Refreshing metadata".to_string());

        let abort = Applied::Aborted { status: "Refresh failed".to_string() };
        self.spawn_job(abort, move |tx| refresh::run(snapshot, interval, tx));
        Ok(())
    }

    /// Convert the given samples into `dest_dir`. Unknown ids are ignored.
    /// Returns how many files were queued.
    pub fn start_conversion(&mut self, ids: &[SampleId], dest_dir: &Path, options: ConvertOptions) -> usize {
        let sources: Vec<PathBuf> = ids
            .iter()
            .filter_map(|id| self.library.get(*id))
            .map(|s| s.path.clone())
            .collect();
        if sources.is_empty() {
            return 0;
        }
        let queued = sources.len();
        self.state.conversions += 1;

        let dest_dir = dest_dir.to_path_buf();
        let abort = Applied::ConversionFinished { written: Vec::new(), requested: queued };
        self.spawn_job(abort, move |tx| {
            let written = convert_batch(&sources, &dest_dir, options);
            tx.send(Applied::ConversionFinished { written, requested: sources.len() }).ok();
        });
        queued
    }

    /// Run `job` on the pool. If it panics, `abort` is posted in its place so
    /// the owner never waits on a result that will not come.
    fn spawn_job<F>(&self, abort: Applied, job: F)
    where
        F: FnOnce(&Sender<Applied>) + Send + 'static,
    {
        let tx = self.tx.clone();
        self.pool.spawn(move || {
            if let Err(payload) = catch_unwind(AssertUnwindSafe(|| job(&tx))) {
                log::error!("Background job panicked: {}", panic_message(payload.as_ref()));
                tx.send(abort).ok();
            }
        });
    }

    /// Apply every message already posted by workers. Never blocks.
    pub fn process_pending(&mut self) -> usize {
        let mut applied = 0;
        while let Ok(msg) = self.rx.try_recv() {
            self.apply(msg);
            applied += 1;
        }
        applied
    }

    /// Block for the next worker message and apply it. Returns `false` once
    /// no import, refresh or conversion is running.
    pub fn step(&mut self) -> bool {
        if !self.is_busy() && self.state.conversions == 0 {
            return false;
        }
        match self.rx.recv() {
            Ok(msg) => {
                self.apply(msg);
                true
            }
            Err(_) => false,
        }
    }

    /// Block until no import, refresh or conversion is running.
    pub fn wait_idle(&mut self) {
        while self.step() {}
        self.process_pending();
    }

    fn apply(&mut self, msg: Applied) {
        match msg {
            Applied::Phase(state) => self.set_pipeline(state),
            Applied::Progress { processed, total } => {
                let fraction = processed as f64 / total.max(1) as f64;
                self.set_progress(fraction, format!("Processing {processed} of {total}…"));
            }
            Applied::ImportEmpty => {
                self.set_progress(1.0, "No audio files found".to_string());
                self.set_pipeline(PipelineState::Idle);
            }
            Applied::ImportFinished { samples, skipped } => {
                self.set_pipeline(PipelineState::Merging);
                let ids = self.library.insert(samples, true);
                if skipped > 0 {
                    log::info!("Skipped {} files during import", skipped);
                }
                self.persist();
                self.notify(LibraryEvent::SamplesChanged);
                self.notify(LibraryEvent::SelectionChanged);
                self.set_progress(1.0, format!("Imported {} samples", ids.len()));
                self.set_pipeline(PipelineState::Idle);
            }
            Applied::RefreshFinished { samples } => {
                let total = samples.len();
                let changed = self.library.apply_refreshed(samples);
                log::info!("Refresh changed {} of {} samples", changed, total);
                self.persist();
                self.notify(LibraryEvent::SamplesChanged);
                self.set_progress(1.0, format!("Refreshed {total} samples"));
                self.set_pipeline(PipelineState::Idle);
            }
            Applied::ConversionFinished { written, requested } => {
                self.state.conversions = self.state.conversions.saturating_sub(1);
                let status = format!("Converted {} of {} files", written.len(), requested);
                self.set_progress(1.0, status);
            }
            Applied::Aborted { status } => {
                self.set_progress(1.0, status);
                self.set_pipeline(PipelineState::Idle);
            }
        }
    }

    // --- manual operations; not blocked by a running batch ---

    pub fn add_tags(&mut self, text: &str, ids: &[SampleId]) -> usize {
        let changed = self.library.add_tags(text, ids);
        if changed > 0 {
            self.commit(false);
        }
        changed
    }

    pub fn remove_tags(&mut self, text: &str, ids: &[SampleId]) -> usize {
        let changed = self.library.remove_tags(text, ids);
        if changed > 0 {
            self.commit(false);
        }
        changed
    }

    pub fn rename(&mut self, id: SampleId, new_name: &str) -> RenameOutcome {
        let outcome = self.library.rename(id, new_name);
        if let RenameOutcome::Renamed { .. } = outcome {
            self.cache.invalidate(id);
            self.commit(false);
        }
        outcome
    }

    /// Remove samples from the library, optionally deleting their files.
    pub fn remove(&mut self, ids: &[SampleId], delete_files: bool) -> Vec<Sample> {
        let removed = if delete_files {
            self.library.remove_and_delete(ids)
        } else {
            self.library.remove_logical(ids)
        };
        for sample in &removed {
            self.cache.invalidate(sample.id);
        }
        if !removed.is_empty() {
            self.commit(true);
        }
        removed
    }

    /// Roll back the most recent import.
    pub fn remove_last_import(&mut self) -> Vec<Sample> {
        let removed = self.library.remove_last_import();
        for sample in &removed {
            self.cache.invalidate(sample.id);
        }
        if !removed.is_empty() {
            self.commit(true);
        }
        removed
    }

    pub fn sort(&mut self, key: SortKey, order: SortOrder) {
        self.library.sort(key, order);
        self.commit(false);
    }

    pub fn select(&mut self, ids: &[SampleId]) {
        self.library.select(ids);
        self.notify(LibraryEvent::SelectionChanged);
    }

    pub fn filter(&self, query: &str) -> Vec<&Sample> {
        self.library.filter(query)
    }

    /// Cached preview for `id`, scheduling a render on a miss.
    pub fn waveform(&self, id: SampleId, size: WaveformSize) -> Option<Arc<WaveformImage>> {
        let sample = self.library.get(id)?;
        self.cache.request(sample, size)
    }

    fn commit(&mut self, selection_touched: bool) {
        self.persist();
        self.notify(LibraryEvent::SamplesChanged);
        if selection_touched {
            self.notify(LibraryEvent::SelectionChanged);
        }
    }

    fn persist(&self) {
        if let Err(e) = self.store.save(self.library.samples()) {
            log::error!("Failed to save library: {}", e);
        }
    }

    fn set_pipeline(&mut self, pipeline: PipelineState) {
        if self.state.pipeline != pipeline {
            self.state.pipeline = pipeline;
            self.notify(LibraryEvent::StateChanged(pipeline));
        }
    }

    fn set_progress(&mut self, fraction: f64, status: String) {
        self.state.progress = fraction;
        self.state.status = status.clone();
        self.notify(LibraryEvent::Progress { fraction, status });
    }

    fn notify(&mut self, event: LibraryEvent) {
        self.subscribers.retain(|s| s.send(event.clone()).is_ok());
    }
}
