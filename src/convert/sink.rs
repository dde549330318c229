use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;
use std::process::{Child, ChildStdin, Command, Stdio};

use super::{ConvertError, WavBitDepth};

/// Destination for decoded interleaved `f32` frames.
pub trait FrameSink {
    fn write(&mut self, interleaved: &[f32]) -> Result<(), ConvertError>;

    /// Flush and close. Must be called for the output to be valid.
    fn finish(self: Box<Self>) -> Result<(), ConvertError>;
}

/// Linear PCM WAV via hound.
pub struct WavSink {
    writer: hound::WavWriter<BufWriter<File>>,
    bit_depth: WavBitDepth,
}

impl WavSink {
    pub fn create(
        path: &Path,
        channels: u16,
        sample_rate: u32,
        bit_depth: WavBitDepth,
    ) -> Result<Self, ConvertError> {
        let spec = hound::WavSpec {
            channels,
            sample_rate,
            bits_per_sample: bit_depth.bits(),
            sample_format: hound::SampleFormat::Int,
        };
        let writer = hound::WavWriter::create(path, spec).map_err(wav_error)?;
        Ok(Self { writer, bit_depth })
    }
}

impl FrameSink for WavSink {
    fn write(&mut self, interleaved: &[f32]) -> Result<(), ConvertError> {
        for &s in interleaved {
            let s = s.clamp(-1.0, 1.0) as f64;
            let written = match self.bit_depth {
                WavBitDepth::Sixteen => self.writer.write_sample((s * i16::MAX as f64) as i16),
                WavBitDepth::TwentyFour => self.writer.write_sample((s * 8_388_607.0) as i32),
                WavBitDepth::ThirtyTwo => self.writer.write_sample((s * i32::MAX as f64) as i32),
            };
            written.map_err(wav_error)?;
        }
        Ok(())
    }

    fn finish(self: Box<Self>) -> Result<(), ConvertError> {
        self.writer.finalize().map_err(wav_error)
    }
}

fn wav_error(e: hound::Error) -> ConvertError {
    match e {
        hound::Error::IoError(io) => ConvertError::Io(io),
        other => ConvertError::Encode(other.to_string()),
    }
}

/// VBR MP3 at LAME's highest quality setting, encoded by an `ffmpeg` child
/// process fed raw float PCM on stdin.
pub struct Mp3Sink {
    child: Option<Child>,
    stdin: Option<BufWriter<ChildStdin>>,
    bytes: Vec<u8>,
}

impl Mp3Sink {
    pub fn create(path: &Path, channels: u16, sample_rate: u32) -> Result<Self, ConvertError> {
        let mut child = Command::new("ffmpeg")
            .args(["-hide_banner", "-loglevel", "error", "-y"])
            .args(["-f", "f32le"])
            .args(["-ar", &sample_rate.to_string()])
            .args(["-ac", &channels.to_string()])
            .args(["-i", "pipe:0"])
            .args(["-codec:a", "libmp3lame", "-q:a", "0"])
            .arg(path)
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| match e.kind() {
                std::io::ErrorKind::NotFound => {
                    ConvertError::Encode("ffmpeg not found; it is required for MP3 output".into())
                }
                _ => ConvertError::Io(e),
            })?;

        let stdin = child
            .stdin
            .take()
            .map(BufWriter::new)
            .ok_or_else(|| ConvertError::Encode("ffmpeg stdin unavailable".into()))?;

        Ok(Self {
            child: Some(child),
            stdin: Some(stdin),
            bytes: Vec::new(),
        })
    }
}

impl FrameSink for Mp3Sink {
    fn write(&mut self, interleaved: &[f32]) -> Result<(), ConvertError> {
        let Some(stdin) = self.stdin.as_mut() else {
            return Err(ConvertError::Encode("encoder already closed".into()));
        };
        self.bytes.clear();
        self.bytes.reserve(interleaved.len() * 4);
        for s in interleaved {
            self.bytes.extend_from_slice(&s.to_le_bytes());
        }
        stdin.write_all(&self.bytes)?;
        Ok(())
    }

    fn finish(mut self: Box<Self>) -> Result<(), ConvertError> {
        // Dropping stdin closes the pipe so ffmpeg sees end of input
        if let Some(mut stdin) = self.stdin.take() {
            stdin.flush()?;
        }
        let Some(child) = self.child.take() else {
            return Err(ConvertError::Encode("encoder already closed".into()));
        };
        let output = child.wait_with_output()?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(ConvertError::Encode(format!("ffmpeg failed: {}", stderr.trim())));
        }
        Ok(())
    }
}

impl Drop for Mp3Sink {
    fn drop(&mut self) {
        // Abandoned mid-stream: close the pipe and reap the child
        self.stdin.take();
        if let Some(mut child) = self.child.take() {
            let _ = child.kill();
            let _ = child.wait();
        }
    }
}
