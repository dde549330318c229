use crate::audio::{AudioStream, StreamInfo};
use crate::db::models::{Sample, normalize_tags};
use chrono::{DateTime, Utc};
use lofty::prelude::*;
use std::path::Path;
use thiserror::Error;

use super::standardize_path;

#[derive(Error, Debug)]
pub enum ProbeError {
    #[error("File not found: {0}")]
    NotFound(String),
}

/// Build a sample for `path`, reading whatever metadata is available.
///
/// Each dimension is read independently and left absent on failure; only a
/// missing file aborts the probe.
pub fn probe(path: &Path, tags: &[String]) -> Result<Sample, ProbeError> {
    if !path.exists() {
        return Err(ProbeError::NotFound(path.display().to_string()));
    }

    let path = standardize_path(path);
    let mut sample = Sample::new(path.clone(), normalize_tags(tags.to_vec()));

    let stream = read_stream_info(&path);
    sample.duration_seconds = read_duration(&path).or_else(|| stream.and_then(|s| s.duration_secs()));
    sample.sample_rate = stream.and_then(|s| s.sample_rate).map(f64::from);
    sample.bit_depth = stream.and_then(|s| s.bits_per_sample);
    sample.format = read_format(&path);

    let (file_created, file_size_bytes) = read_file_attributes(&path);
    sample.file_created = file_created;
    sample.file_size_bytes = file_size_bytes;

    Ok(sample)
}

/// Container-reported duration. `None` when unreadable or zero.
pub fn read_duration(path: &Path) -> Option<f64> {
    let tagged_file = match lofty::read_from_path(path) {
        Ok(f) => f,
        Err(e) => {
            log::debug!("Could not read properties from {}: {}", path.display(), e);
            return None;
        }
    };
    let secs = tagged_file.properties().duration().as_secs_f64();
    if secs > 0.0 { Some(secs) } else { None }
}

/// Native decoder parameters. `None` when the stream cannot be opened.
fn read_stream_info(path: &Path) -> Option<StreamInfo> {
    match AudioStream::open(path) {
        Ok(stream) => Some(stream.info()),
        Err(e) => {
            log::debug!("Decode unavailable for {}: {}", path.display(), e);
            None
        }
    }
}

/// Lowercase file extension; `None` only when there is none.
pub fn read_format(path: &Path) -> Option<String> {
    path.extension()
        .map(|e| e.to_string_lossy().to_lowercase())
        .filter(|e| !e.is_empty())
}

/// Filesystem creation time and byte size, each independently optional.
pub fn read_file_attributes(path: &Path) -> (Option<DateTime<Utc>>, Option<u64>) {
    let meta = match std::fs::metadata(path) {
        Ok(meta) => meta,
        Err(e) => {
            log::debug!("Could not stat {}: {}", path.display(), e);
            return (None, None);
        }
    };
    let created = meta.created().ok().map(DateTime::<Utc>::from);
    (created, Some(meta.len()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::test_support::write_sine_wav;

    #[test]
    fn test_probe_wav_reads_all_dimensions() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("kick.wav");
        write_sine_wav(&path, 48000, 24, 2, 2.5);

        let s = probe(&path, &["drums".into(), "live".into()]).unwrap();
        assert_eq!(s.sample_rate, Some(48000.0));
        assert_eq!(s.bit_depth, Some(24));
        assert_eq!(s.format.as_deref(), Some("wav"));
        assert!((s.duration_seconds.unwrap() - 2.5).abs() < 0.01);
        assert_eq!(s.file_size_bytes, Some(std::fs::metadata(&path).unwrap().len()));
        assert_eq!(s.tags, vec!["drums", "live"]);
        assert_eq!(s.path, standardize_path(&path));
    }

    #[test]
    fn test_probe_undecodable_file_keeps_partial_metadata() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("snare.mp3");
        std::fs::write(&path, b"not really audio").unwrap();

        let s = probe(&path, &[]).unwrap();
        assert_eq!(s.format.as_deref(), Some("mp3"));
        assert_eq!(s.file_size_bytes, Some(16));
        assert!(s.sample_rate.is_none());
        assert!(s.bit_depth.is_none());
        assert!(s.duration_seconds.is_none());
    }

    #[test]
    fn test_probe_missing_file_is_not_found() {
        let err = probe(Path::new("/no/such/kick.wav"), &[]).unwrap_err();
        assert!(matches!(err, ProbeError::NotFound(_)));
    }

    #[test]
    fn test_read_format() {
        assert_eq!(read_format(Path::new("/a/B.WAV")).as_deref(), Some("wav"));
        assert_eq!(read_format(Path::new("/a/noext")), None);
    }

    #[test]
    fn test_probe_assigns_distinct_ids() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("hat.wav");
        write_sine_wav(&path, 44100, 16, 1, 0.1);
        let a = probe(&path, &[]).unwrap();
        let b = probe(&path, &[]).unwrap();
        assert_ne!(a.id, b.id);
    }
}
