//! Streaming decode shared by the metadata probe, the waveform renderer and
//! the converter. Audio is pulled one packet at a time as interleaved `f32`,
//! so no caller ever holds a whole file in memory.

use std::any::Any;
use std::fs::File;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::path::Path;
use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::{CODEC_TYPE_NULL, CodecParameters, Decoder, DecoderOptions};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::{FormatOptions, FormatReader};
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DecodeError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Unsupported or unreadable stream: {0}")]
    Unsupported(String),
    #[error("No decodable audio track")]
    NoTrack,
    #[error("Decode error: {0}")]
    Decode(String),
}

/// Native stream parameters as reported by the container and codec.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StreamInfo {
    pub sample_rate: Option<u32>,
    pub bits_per_sample: Option<u32>,
    pub channels: Option<usize>,
    pub total_frames: Option<u64>,
}

impl StreamInfo {
    fn from_params(params: &CodecParameters) -> Self {
        Self {
            sample_rate: params.sample_rate,
            bits_per_sample: params.bits_per_sample,
            channels: params.channels.map(|c| c.count()),
            total_frames: params.n_frames,
        }
    }

    /// Duration derived from frame count and rate, when both are known.
    pub fn duration_secs(&self) -> Option<f64> {
        match (self.total_frames, self.sample_rate) {
            (Some(frames), Some(rate)) if frames > 0 && rate > 0 => {
                Some(frames as f64 / rate as f64)
            }
            _ => None,
        }
    }
}

/// An open audio file yielding interleaved `f32` chunks.
pub struct AudioStream {
    format: Box<dyn FormatReader>,
    decoder: Box<dyn Decoder>,
    track_id: u32,
    info: StreamInfo,
    buf: Option<SampleBuffer<f32>>,
}

impl AudioStream {
    /// Probe the container and set up a decoder for its first audio track.
    pub fn open(path: &Path) -> Result<Self, DecodeError> {
        let file = File::open(path)?;
        let mss = MediaSourceStream::new(Box::new(file), Default::default());

        let mut hint = Hint::new();
        if let Some(ext) = path.extension().and_then(|e| e.to_str()) {
            hint.with_extension(ext);
        }

        let probed = symphonia::default::get_probe()
            .format(&hint, mss, &FormatOptions::default(), &MetadataOptions::default())
            .map_err(|e| DecodeError::Unsupported(e.to_string()))?;
        let format = probed.format;

        let track = format
            .tracks()
            .iter()
            .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
            .ok_or(DecodeError::NoTrack)?;
        let track_id = track.id;
        let info = StreamInfo::from_params(&track.codec_params);

        let decoder = symphonia::default::get_codecs()
            .make(&track.codec_params, &DecoderOptions::default())
            .map_err(|e| DecodeError::Unsupported(e.to_string()))?;

        Ok(Self {
            format,
            decoder,
            track_id,
            info,
            buf: None,
        })
    }

    pub fn info(&self) -> StreamInfo {
        self.info
    }

    /// Channel count; only guaranteed known after the first chunk for
    /// containers that leave it out of the header.
    pub fn channels(&self) -> Option<usize> {
        self.info.channels
    }

    /// Decode the next packet. An empty slice means end of stream.
    ///
    /// Corrupt packets are skipped, matching how players tolerate damaged files.
    pub fn read_chunk(&mut self) -> Result<&[f32], DecodeError> {
        Ok(self.read_frames()?.1)
    }

    /// Like [`read_chunk`](Self::read_chunk), paired with the channel count
    /// of the returned chunk so callers can walk frames while it is borrowed.
    pub fn read_frames(&mut self) -> Result<(usize, &[f32]), DecodeError> {
        loop {
            let packet = match self.format.next_packet() {
                Ok(packet) => packet,
                Err(SymphoniaError::IoError(e))
                    if e.kind() == std::io::ErrorKind::UnexpectedEof =>
                {
                    return Ok((self.channels().unwrap_or(1).max(1), &[]));
                }
                Err(SymphoniaError::ResetRequired) => {
                    return Ok((self.channels().unwrap_or(1).max(1), &[]));
                }
                Err(e) => return Err(DecodeError::Decode(e.to_string())),
            };

            if packet.track_id() != self.track_id {
                continue;
            }

            let decoded = match self.decoder.decode(&packet) {
                Ok(decoded) => decoded,
                Err(SymphoniaError::DecodeError(e)) => {
                    log::debug!("Skipping corrupt packet: {}", e);
                    continue;
                }
                Err(e) => return Err(DecodeError::Decode(e.to_string())),
            };

            if decoded.frames() == 0 {
                continue;
            }

            let spec = *decoded.spec();
            let channels = spec.channels.count();
            self.info.channels = Some(channels);
            if self.info.sample_rate.is_none() {
                self.info.sample_rate = Some(spec.rate);
            }

            let needed = decoded.capacity() * channels;
            let buf = match self.buf.take() {
                Some(buf) if buf.capacity() >= needed => buf,
                _ => SampleBuffer::<f32>::new(decoded.capacity() as u64, spec),
            };
            let buf = self.buf.insert(buf);
            buf.copy_interleaved_ref(decoded);
            return Ok((channels.max(1), buf.samples()));
        }
    }

    /// Count remaining frames by decoding to the end. Used when the container
    /// does not report a frame count.
    pub fn count_frames(mut self) -> Result<u64, DecodeError> {
        let mut total = 0u64;
        loop {
            let (channels, chunk) = self.read_frames()?;
            if chunk.is_empty() {
                return Ok(total);
            }
            total += (chunk.len() / channels) as u64;
        }
    }
}

/// Run decoder-driven work on `path`, turning a panic into `None`.
///
/// Symphonia and lofty can panic on malformed input; callers treat `None`
/// as a failure of that one file.
pub(crate) fn isolate_panic<T>(path: &Path, work: impl FnOnce() -> T) -> Option<T> {
    match catch_unwind(AssertUnwindSafe(work)) {
        Ok(value) => Some(value),
        Err(payload) => {
            log::error!("Decoder panicked on {}: {}", path.display(), panic_message(payload.as_ref()));
            None
        }
    }
}

pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use std::path::Path;

    /// Write a sine WAV of `secs` seconds at the given format.
    pub fn write_sine_wav(path: &Path, rate: u32, bits: u16, channels: u16, secs: f64) {
        let spec = hound::WavSpec {
            channels,
            sample_rate: rate,
            bits_per_sample: bits,
            sample_format: hound::SampleFormat::Int,
        };
        let mut writer = hound::WavWriter::create(path, spec).unwrap();
        let frames = (rate as f64 * secs).round() as usize;
        let amplitude = ((1i64 << (bits - 1)) - 1) as f64 * 0.5;
        for i in 0..frames {
            let t = i as f64 / rate as f64;
            let v = (amplitude * (2.0 * std::f64::consts::PI * 220.0 * t).sin()) as i32;
            for _ in 0..channels {
                writer.write_sample(v).unwrap();
            }
        }
        writer.finalize().unwrap();
    }

    pub fn ffmpeg_available() -> bool {
        std::process::Command::new("ffmpeg")
            .arg("-version")
            .stdout(std::process::Stdio::null())
            .stderr(std::process::Stdio::null())
            .status()
            .map(|s| s.success())
            .unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::write_sine_wav;
    use super::*;

    #[test]
    fn test_open_reports_native_format() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("kick.wav");
        write_sine_wav(&path, 48000, 24, 2, 0.5);

        let stream = AudioStream::open(&path).unwrap();
        let info = stream.info();
        assert_eq!(info.sample_rate, Some(48000));
        assert_eq!(info.bits_per_sample, Some(24));
        assert_eq!(info.channels, Some(2));
        assert_eq!(info.total_frames, Some(24000));
        assert!((info.duration_secs().unwrap() - 0.5).abs() < 1e-9);
    }

    #[test]
    fn test_read_chunks_until_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tone.wav");
        write_sine_wav(&path, 44100, 16, 1, 0.25);

        let mut stream = AudioStream::open(&path).unwrap();
        let mut samples = 0usize;
        loop {
            let chunk = stream.read_chunk().unwrap();
            if chunk.is_empty() {
                break;
            }
            assert!(chunk.iter().all(|s| s.abs() <= 1.0));
            samples += chunk.len();
        }
        assert_eq!(samples, 11025);
    }

    #[test]
    fn test_count_frames() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tone.wav");
        write_sine_wav(&path, 44100, 16, 2, 0.1);
        let stream = AudioStream::open(&path).unwrap();
        assert_eq!(stream.count_frames().unwrap(), 4410);
    }

    #[test]
    fn test_read_frames_reports_channels() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tone.wav");
        write_sine_wav(&path, 44100, 16, 2, 0.05);

        let mut stream = AudioStream::open(&path).unwrap();
        let (channels, chunk) = stream.read_frames().unwrap();
        assert_eq!(channels, 2);
        assert_eq!(chunk.len() % 2, 0);
        assert!(!chunk.is_empty());
    }

    #[test]
    fn test_isolate_panic_contains_failure() {
        let path = Path::new("/lib/broken.mp3");
        assert_eq!(isolate_panic(path, || 7), Some(7));
        let caught: Option<u32> = isolate_panic(path, || panic!("bad frame header"));
        assert_eq!(caught, None);
        let owned: Option<()> = isolate_panic(path, || panic!("{}", String::from("owned")));
        assert!(owned.is_none());
    }

    #[test]
    fn test_open_garbage_is_unsupported() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("snare.mp3");
        std::fs::write(&path, b"definitely not an mpeg stream").unwrap();
        assert!(AudioStream::open(&path).is_err());
    }

    #[test]
    fn test_open_missing_is_io() {
        let err = AudioStream::open(Path::new("/nonexistent/x.wav")).err().unwrap();
        assert!(matches!(err, DecodeError::Io(_)));
    }
}
