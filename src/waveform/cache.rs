use super::{WaveformImage, WaveformSize, render};
use crate::db::models::{Sample, SampleId};
use parking_lot::Mutex;
use rayon::ThreadPool;
use sha2::{Digest, Sha256};
use std::collections::hash_map::Entry;
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// What a cached preview was rendered from. Any difference means the entry
/// is stale. Content edits that keep the file size are not detected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fingerprint {
    pub path: PathBuf,
    pub file_size: u64,
    pub size: WaveformSize,
}

impl Fingerprint {
    pub fn of(sample: &Sample, size: WaveformSize) -> Self {
        let file_size = sample
            .file_size_bytes
            .or_else(|| std::fs::metadata(&sample.path).ok().map(|m| m.len()))
            .unwrap_or(0);
        Self {
            path: sample.path.clone(),
            file_size,
            size,
        }
    }

    /// Disk-tier file name: hex SHA-256 of the composite key.
    pub fn file_name(&self) -> String {
        let key = format!(
            "{}|{}|{}|{}",
            self.path.display(),
            self.file_size,
            self.size.width,
            self.size.height
        );
        format!("{}.png", hex::encode(Sha256::digest(key.as_bytes())))
    }
}

struct MemoryEntry {
    fingerprint: Fingerprint,
    image: Arc<WaveformImage>,
}

struct Inner {
    dir: PathBuf,
    pool: Arc<ThreadPool>,
    memory: Mutex<HashMap<SampleId, MemoryEntry>>,
    /// Bumped by every invalidation. A render only lands if the generation
    /// it started under is still current.
    generations: Mutex<HashMap<SampleId, u64>>,
    /// Scheduled renders, keyed by id, holding the generation they serve.
    pending: Mutex<HashMap<SampleId, u64>>,
    /// Disk files written or served per id, so invalidation can remove them.
    disk_files: Mutex<HashMap<SampleId, HashSet<PathBuf>>>,
}

/// Two-tier preview cache: memory by sample id, disk by fingerprint hash.
///
/// Misses schedule at most one render per id on the pool. Callers poll with
/// [`get`](Self::get) or repeat [`request`](Self::request) until it returns
/// an image.
#[derive(Clone)]
pub struct WaveformCache {
    inner: Arc<Inner>,
}

impl WaveformCache {
    pub fn new(dir: impl Into<PathBuf>, pool: Arc<ThreadPool>) -> Self {
        Self {
            inner: Arc::new(Inner {
                dir: dir.into(),
                pool,
                memory: Mutex::new(HashMap::new()),
                generations: Mutex::new(HashMap::new()),
                pending: Mutex::new(HashMap::new()),
                disk_files: Mutex::new(HashMap::new()),
            }),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.inner.dir
    }

    /// Serve from memory or disk, else schedule a render and return `None`.
    pub fn request(&self, sample: &Sample, size: WaveformSize) -> Option<Arc<WaveformImage>> {
        let fingerprint = Fingerprint::of(sample, size);

        if let Some(image) = self.inner.memory_hit(sample.id, &fingerprint) {
            return Some(image);
        }
        if let Some(image) = self.inner.disk_hit(sample.id, &fingerprint) {
            return Some(image);
        }

        let id = sample.id;
        let generation = self.inner.generation(id);
        if let Entry::Vacant(slot) = self.inner.pending.lock().entry(id) {
            slot.insert(generation);
            log::debug!("Scheduling waveform for {}", sample.path.display());
            let inner = Arc::clone(&self.inner);
            self.inner.pool.spawn(move || {
                inner.render_and_store(id, fingerprint, generation);
                inner.finish_pending(id, generation);
            });
        }
        None
    }

    /// Poll the memory tier for a finished render of `sample` as it is now.
    pub fn get(&self, sample: &Sample, size: WaveformSize) -> Option<Arc<WaveformImage>> {
        self.inner.memory_hit(sample.id, &Fingerprint::of(sample, size))
    }

    pub fn is_pending(&self, id: SampleId) -> bool {
        self.inner.pending.lock().contains_key(&id)
    }

    /// Forget everything cached for `id` in both tiers. A render already in
    /// flight is discarded when it lands. No re-render is scheduled.
    pub fn invalidate(&self, id: SampleId) {
        let mut generations = self.inner.generations.lock();
        *generations.entry(id).or_insert(0) += 1;
        self.inner.pending.lock().remove(&id);
        self.inner.memory.lock().remove(&id);
        let files = self.inner.disk_files.lock().remove(&id).unwrap_or_default();
        for file in files {
            match std::fs::remove_file(&file) {
                Ok(()) => log::debug!("Evicted {}", file.display()),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => log::warn!("Could not evict {}: {}", file.display(), e),
            }
        }
    }
}

impl Inner {
    fn generation(&self, id: SampleId) -> u64 {
        self.generations.lock().get(&id).copied().unwrap_or(0)
    }

    fn finish_pending(&self, id: SampleId, generation: u64) {
        let mut pending = self.pending.lock();
        if pending.get(&id) == Some(&generation) {
            pending.remove(&id);
        }
    }

    fn memory_hit(&self, id: SampleId, fingerprint: &Fingerprint) -> Option<Arc<WaveformImage>> {
        self.memory
            .lock()
            .get(&id)
            .filter(|e| &e.fingerprint == fingerprint)
            .map(|e| Arc::clone(&e.image))
    }

    fn disk_hit(&self, id: SampleId, fingerprint: &Fingerprint) -> Option<Arc<WaveformImage>> {
        let file = self.dir.join(fingerprint.file_name());
        let png = std::fs::read(&file).ok()?;
        if let Err(e) = image::load_from_memory_with_format(&png, image::ImageFormat::Png) {
            log::debug!("Ignoring unreadable cache file {}: {}", file.display(), e);
            return None;
        }
        let image = Arc::new(WaveformImage {
            width: fingerprint.size.bins() as u32,
            height: fingerprint.size.height.max(1),
            png,
        });
        self.remember(id, fingerprint.clone(), Arc::clone(&image), file);
        Some(image)
    }

    fn render_and_store(&self, id: SampleId, fingerprint: Fingerprint, generation: u64) {
        let Some(image) = render(&fingerprint.path, fingerprint.size) else {
            return;
        };
        let file = self.dir.join(fingerprint.file_name());
        if let Err(e) = std::fs::create_dir_all(&self.dir).and_then(|_| std::fs::write(&file, &image.png)) {
            log::warn!("Could not write waveform cache {}: {}", file.display(), e);
        }

        let generations = self.generations.lock();
        if generations.get(&id).copied().unwrap_or(0) != generation {
            log::debug!("Discarding stale waveform for {}", fingerprint.path.display());
            std::fs::remove_file(&file).ok();
            return;
        }
        self.remember(id, fingerprint, Arc::new(image), file);
    }

    fn remember(&self, id: SampleId, fingerprint: Fingerprint, image: Arc<WaveformImage>, file: PathBuf) {
        self.disk_files.lock().entry(id).or_default().insert(file);
        self.memory.lock().insert(id, MemoryEntry { fingerprint, image });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::test_support::write_sine_wav;
    use crate::library::{Library, RenameOutcome};
    use std::time::{Duration, Instant};

    fn pool() -> Arc<ThreadPool> {
        Arc::new(rayon::ThreadPoolBuilder::new().num_threads(2).build().unwrap())
    }

    fn wait_for(cache: &WaveformCache, sample: &Sample, size: WaveformSize) -> Option<Arc<WaveformImage>> {
        let deadline = Instant::now() + Duration::from_secs(10);
        while cache.is_pending(sample.id) && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(10));
        }
        cache.get(sample, size)
    }

    /// Block until every job queued on a single-thread pool so far has run.
    fn drain(pool: &ThreadPool) {
        let (done_tx, done_rx) = crossbeam_channel::bounded::<()>(1);
        pool.spawn(move || {
            done_tx.send(()).ok();
        });
        done_rx.recv_timeout(Duration::from_secs(10)).unwrap();
    }

    fn sample_at(path: &Path) -> Sample {
        let mut sample = Sample::new(path, vec![]);
        sample.file_size_bytes = std::fs::metadata(path).ok().map(|m| m.len());
        sample
    }

    #[test]
    fn test_fingerprint_file_name_is_stable_and_distinct() {
        let mut s = Sample::new("/lib/kick.wav", vec![]);
        s.file_size_bytes = Some(1000);
        let a = Fingerprint::of(&s, WaveformSize::new(400, 80));
        let b = Fingerprint::of(&s, WaveformSize::new(400, 80));
        let c = Fingerprint::of(&s, WaveformSize::new(200, 80));
        assert_eq!(a.file_name(), b.file_name());
        assert_ne!(a.file_name(), c.file_name());
        assert_eq!(a.file_name().len(), 64 + 4);

        s.file_size_bytes = Some(1001);
        assert_ne!(Fingerprint::of(&s, WaveformSize::new(400, 80)).file_name(), a.file_name());
    }

    #[test]
    fn test_miss_then_render_then_hit() {
        let dir = tempfile::tempdir().unwrap();
        let wav = dir.path().join("kick.wav");
        write_sine_wav(&wav, 44100, 16, 1, 0.2);
        let cache = WaveformCache::new(dir.path().join("cache"), pool());
        let sample = sample_at(&wav);
        let size = WaveformSize::new(100, 40);

        assert!(cache.request(&sample, size).is_none());
        let rendered = wait_for(&cache, &sample, size).unwrap();
        assert_eq!(rendered.width, 100);

        let again = cache.request(&sample, size).unwrap();
        assert!(Arc::ptr_eq(&rendered, &again));
        let on_disk = cache.dir().join(Fingerprint::of(&sample, size).file_name());
        assert!(on_disk.exists());
    }

    #[test]
    fn test_disk_tier_survives_new_cache() {
        let dir = tempfile::tempdir().unwrap();
        let wav = dir.path().join("pad.wav");
        write_sine_wav(&wav, 44100, 16, 2, 0.2);
        let cache_dir = dir.path().join("cache");
        let sample = sample_at(&wav);
        let size = WaveformSize::new(60, 20);

        let first = WaveformCache::new(&cache_dir, pool());
        first.request(&sample, size);
        wait_for(&first, &sample, size).unwrap();

        let second = WaveformCache::new(&cache_dir, pool());
        let served = second.request(&sample, size).unwrap();
        assert_eq!((served.width, served.height), (60, 20));
        assert!(!second.is_pending(sample.id));
    }

    #[test]
    fn test_repeated_requests_schedule_once() {
        let dir = tempfile::tempdir().unwrap();
        let wav = dir.path().join("hat.wav");
        write_sine_wav(&wav, 44100, 16, 1, 0.5);
        let single = Arc::new(rayon::ThreadPoolBuilder::new().num_threads(1).build().unwrap());
        let cache = WaveformCache::new(dir.path().join("cache"), Arc::clone(&single));
        let sample = sample_at(&wav);
        let size = WaveformSize::new(80, 20);

        // Park the only worker so the render cannot start yet
        let (release_tx, release_rx) = crossbeam_channel::bounded::<()>(0);
        single.spawn(move || {
            release_rx.recv().ok();
        });

        assert!(cache.request(&sample, size).is_none());
        assert!(cache.request(&sample, size).is_none());
        assert!(cache.is_pending(sample.id));
        assert_eq!(cache.inner.pending.lock().len(), 1);

        release_tx.send(()).unwrap();
        assert!(wait_for(&cache, &sample, size).is_some());
        assert!(!cache.is_pending(sample.id));
    }

    #[test]
    fn test_failed_render_clears_pending() {
        let dir = tempfile::tempdir().unwrap();
        let junk = dir.path().join("junk.wav");
        std::fs::write(&junk, b"nope").unwrap();
        let cache = WaveformCache::new(dir.path().join("cache"), pool());
        let sample = sample_at(&junk);
        let size = WaveformSize::new(40, 10);

        assert!(cache.request(&sample, size).is_none());
        assert!(wait_for(&cache, &sample, size).is_none());
        assert!(!cache.is_pending(sample.id));
    }

    #[test]
    fn test_rename_forces_fresh_render() {
        let dir = tempfile::tempdir().unwrap();
        let wav = dir.path().join("kick.wav");
        write_sine_wav(&wav, 44100, 16, 1, 0.2);
        let cache = WaveformCache::new(dir.path().join("cache"), pool());
        let size = WaveformSize::new(50, 20);

        let mut lib = Library::default();
        let id = lib.insert(vec![sample_at(&wav)], true)[0];
        let before = lib.get(id).unwrap().clone();
        cache.request(&before, size);
        wait_for(&cache, &before, size).unwrap();
        let old_file = cache.dir().join(Fingerprint::of(&before, size).file_name());
        assert!(old_file.exists());

        assert!(matches!(lib.rename(id, "kick2"), RenameOutcome::Renamed { .. }));
        cache.invalidate(id);
        assert!(!old_file.exists());
        assert!(cache.get(&before, size).is_none());

        let after = lib.get(id).unwrap().clone();
        assert!(cache.get(&after, size).is_none());
        assert!(cache.request(&after, size).is_none());
        let fresh = wait_for(&cache, &after, size).unwrap();
        assert_eq!(fresh.width, 50);
    }

    #[test]
    fn test_stale_fingerprint_misses_without_invalidate() {
        let dir = tempfile::tempdir().unwrap();
        let wav = dir.path().join("snare.wav");
        write_sine_wav(&wav, 44100, 16, 1, 0.2);
        let cache = WaveformCache::new(dir.path().join("cache"), pool());
        let size = WaveformSize::new(50, 20);
        let mut sample = sample_at(&wav);

        cache.request(&sample, size);
        wait_for(&cache, &sample, size).unwrap();

        sample.file_size_bytes = sample.file_size_bytes.map(|n| n + 1);
        assert!(cache.request(&sample, size).is_none());
    }

    #[test]
    fn test_render_in_flight_at_invalidate_is_discarded() {
        let dir = tempfile::tempdir().unwrap();
        let wav = dir.path().join("kick.wav");
        write_sine_wav(&wav, 44100, 16, 1, 0.2);
        let single = Arc::new(rayon::ThreadPoolBuilder::new().num_threads(1).build().unwrap());
        let cache = WaveformCache::new(dir.path().join("cache"), Arc::clone(&single));
        let size = WaveformSize::new(50, 20);

        let mut lib = Library::default();
        let id = lib.insert(vec![sample_at(&wav)], true)[0];
        let before = lib.get(id).unwrap().clone();

        let (release_tx, release_rx) = crossbeam_channel::bounded::<()>(0);
        single.spawn(move || {
            release_rx.recv().ok();
        });
        assert!(cache.request(&before, size).is_none());

        assert!(matches!(lib.rename(id, "kick_soft"), RenameOutcome::Renamed { .. }));
        cache.invalidate(id);
        assert!(!cache.is_pending(id));

        release_tx.send(()).unwrap();
        drain(&single);

        let after = lib.get(id).unwrap().clone();
        assert!(cache.get(&before, size).is_none());
        assert!(cache.get(&after, size).is_none());
        assert!(cache.inner.memory.lock().is_empty());
        assert!(cache.inner.disk_files.lock().is_empty());
        assert!(!cache.dir().join(Fingerprint::of(&before, size).file_name()).exists());

        // A request for the renamed file schedules a fresh render
        assert!(cache.request(&after, size).is_none());
        assert!(wait_for(&cache, &after, size).is_some());
    }

    #[test]
    fn test_removed_id_is_not_repopulated() {
        let dir = tempfile::tempdir().unwrap();
        let wav = dir.path().join("clap.wav");
        write_sine_wav(&wav, 44100, 16, 1, 0.2);
        let single = Arc::new(rayon::ThreadPoolBuilder::new().num_threads(1).build().unwrap());
        let cache = WaveformCache::new(dir.path().join("cache"), Arc::clone(&single));
        let size = WaveformSize::new(40, 10);
        let sample = sample_at(&wav);

        let (release_tx, release_rx) = crossbeam_channel::bounded::<()>(0);
        single.spawn(move || {
            release_rx.recv().ok();
        });
        cache.request(&sample, size);
        cache.invalidate(sample.id);
        release_tx.send(()).unwrap();
        drain(&single);

        assert!(cache.get(&sample, size).is_none());
        assert!(cache.inner.memory.lock().is_empty());
    }
}
