pub mod resample;
pub mod sink;

use crate::audio::{AudioStream, DecodeError, isolate_panic};
use crate::scanner::standardize_path;
use rayon::prelude::*;
use resample::StreamResampler;
use sink::{FrameSink, Mp3Sink, WavSink};
use std::path::{Component, Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConvertError {
    #[error("Cannot open source {path}: {source}")]
    Open { path: String, source: DecodeError },
    #[error("Decode error: {0}")]
    Decode(#[from] DecodeError),
    #[error("Encode error: {0}")]
    Encode(String),
    #[error("Resample error: {0}")]
    Resample(String),
    #[error("Destination is the source file {0}")]
    SameFile(String),
    #[error("Decoder panicked on {0}")]
    Panicked(String),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum TargetFormat {
    #[default]
    Wav,
    Mp3,
}

impl TargetFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            Self::Wav => "wav",
            Self::Mp3 => "mp3",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WavBitDepth {
    #[default]
    Sixteen,
    TwentyFour,
    ThirtyTwo,
}

impl WavBitDepth {
    pub fn from_bits(bits: u16) -> Option<Self> {
        match bits {
            16 => Some(Self::Sixteen),
            24 => Some(Self::TwentyFour),
            32 => Some(Self::ThirtyTwo),
            _ => None,
        }
    }

    pub fn bits(&self) -> u16 {
        match self {
            Self::Sixteen => 16,
            Self::TwentyFour => 24,
            Self::ThirtyTwo => 32,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WavSampleRate {
    #[default]
    Hz44100,
    Hz48000,
}

impl WavSampleRate {
    pub fn from_hz(hz: u32) -> Option<Self> {
        match hz {
            44100 => Some(Self::Hz44100),
            48000 => Some(Self::Hz48000),
            _ => None,
        }
    }

    pub fn hz(&self) -> u32 {
        match self {
            Self::Hz44100 => 44100,
            Self::Hz48000 => 48000,
        }
    }
}

/// Target format plus the WAV-only parameters. MP3 ignores the WAV fields
/// and keeps the source's rate and channel count.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ConvertOptions {
    pub format: TargetFormat,
    pub wav_bit_depth: WavBitDepth,
    pub wav_sample_rate: WavSampleRate,
}

impl ConvertOptions {
    pub fn wav(bit_depth: WavBitDepth, sample_rate: WavSampleRate) -> Self {
        Self {
            format: TargetFormat::Wav,
            wav_bit_depth: bit_depth,
            wav_sample_rate: sample_rate,
        }
    }

    pub fn mp3() -> Self {
        Self {
            format: TargetFormat::Mp3,
            ..Default::default()
        }
    }
}

/// `<dest_dir>/<source stem>.<ext>`.
pub fn destination_path(source: &Path, dest_dir: &Path, format: TargetFormat) -> Option<PathBuf> {
    let stem = source.file_stem()?;
    let mut name = stem.to_os_string();
    name.push(".");
    name.push(format.extension());
    Some(dest_dir.join(name))
}

/// Stream-convert one file. Any existing file at the destination is replaced,
/// unless it resolves to the source itself.
///
/// On failure the partially written destination is removed.
pub fn convert(source: &Path, dest_dir: &Path, opts: ConvertOptions) -> Result<PathBuf, ConvertError> {
    let destination = destination_path(source, dest_dir, opts.format)
        .ok_or_else(|| ConvertError::Encode(format!("no file name in {}", source.display())))?;

    let opened = isolate_panic(source, || AudioStream::open(source))
        .ok_or_else(|| ConvertError::Panicked(source.display().to_string()))?;
    let mut stream = opened.map_err(|e| ConvertError::Open {
        path: source.display().to_string(),
        source: e,
    })?;

    if resolve_future_path(&destination) == standardize_path(source) {
        return Err(ConvertError::SameFile(source.display().to_string()));
    }
    std::fs::create_dir_all(dest_dir)?;

    let result = isolate_panic(source, || stream_into(&mut stream, &destination, opts))
        .unwrap_or_else(|| Err(ConvertError::Panicked(source.display().to_string())));
    match result {
        Ok(frames) => {
            log::debug!("Converted {} ({} frames) -> {}", source.display(), frames, destination.display());
            Ok(destination)
        }
        Err(e) => {
            std::fs::remove_file(&destination).ok();
            Err(e)
        }
    }
}

/// Where `path` will point once its missing directories exist: the deepest
/// existing ancestor is canonicalized and the rest applied lexically.
fn resolve_future_path(path: &Path) -> PathBuf {
    let absolute = std::path::absolute(path).unwrap_or_else(|_| path.to_path_buf());
    let mut existing = absolute.as_path();
    let mut tail = Vec::new();
    loop {
        if let Ok(mut resolved) = std::fs::canonicalize(existing) {
            for component in tail.iter().rev() {
                match component {
                    Component::ParentDir => {
                        resolved.pop();
                    }
                    Component::CurDir => {}
                    other => resolved.push(other.as_os_str()),
                }
            }
            return resolved;
        }
        match (existing.parent(), existing.components().next_back()) {
            (Some(parent), Some(last)) => {
                tail.push(last);
                existing = parent;
            }
            _ => return absolute,
        }
    }
}

/// Copy decoded chunks into a new sink until the source is exhausted.
/// Returns the number of source frames read.
fn stream_into(
    stream: &mut AudioStream,
    destination: &Path,
    opts: ConvertOptions,
) -> Result<u64, ConvertError> {
    // The first chunk pins down the channel count for containers that omit it
    let first = stream.read_chunk()?.to_vec();
    let channels = stream
        .channels()
        .filter(|&c| c > 0)
        .ok_or_else(|| ConvertError::Decode(DecodeError::Decode("unknown channel count".into())))?;
    let native_rate = stream
        .info()
        .sample_rate
        .ok_or_else(|| ConvertError::Decode(DecodeError::Decode("unknown sample rate".into())))?;

    let mut resampler = None;
    let mut sink: Box<dyn FrameSink> = match opts.format {
        TargetFormat::Wav => {
            let rate = opts.wav_sample_rate.hz();
            if rate != native_rate {
                resampler = Some(StreamResampler::new(native_rate, rate, channels)?);
            }
            Box::new(WavSink::create(destination, channels as u16, rate, opts.wav_bit_depth)?)
        }
        TargetFormat::Mp3 => Box::new(Mp3Sink::create(destination, channels as u16, native_rate)?),
    };

    let mut frames = 0u64;
    let mut chunk = first;
    while !chunk.is_empty() {
        frames += (chunk.len() / channels) as u64;
        match resampler.as_mut() {
            Some(rs) => sink.write(&rs.push(&chunk)?)?,
            None => sink.write(&chunk)?,
        }
        chunk.clear();
        chunk.extend_from_slice(stream.read_chunk()?);
    }
    if let Some(rs) = resampler.as_mut() {
        sink.write(&rs.finish()?)?;
    }
    sink.finish()?;

    Ok(frames)
}

/// Convert every source independently and in parallel.
///
/// A failure is logged and affects only its own file; the returned list holds
/// the destinations that were written.
pub fn convert_batch(sources: &[PathBuf], dest_dir: &Path, opts: ConvertOptions) -> Vec<PathBuf> {
    let results: Vec<_> = sources
        .par_iter()
        .map(|source| (source, convert(source, dest_dir, opts)))
        .collect();

    let mut written = Vec::new();
    for (source, result) in results {
        match result {
            Ok(path) => written.push(path),
            Err(e) => log::warn!("Conversion failed for {}: {}", source.display(), e),
        }
    }
    log::info!("Converted {} of {} files", written.len(), sources.len());
    written
}
