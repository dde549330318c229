//! Peak-normalized waveform previews.
//!
//! The renderer streams a file through [`AudioStream`], folds every frame
//! into a fixed number of bins, and draws one 1-px bar per bin.

pub mod cache;

use crate::audio::{AudioStream, DecodeError, isolate_panic};
use image::{ImageFormat, Rgba, RgbaImage};
use std::io::Cursor;
use std::path::Path;
use thiserror::Error;

pub use cache::WaveformCache;

/// Narrowest preview ever drawn, in bins (and pixels).
pub const MIN_BINS: u32 = 40;

const BAR_COLOR: Rgba<u8> = Rgba([0x3d, 0x8e, 0xd6, 0xff]);

#[derive(Error, Debug)]
pub enum WaveformError {
    #[error("Decode failed: {0}")]
    Decode(#[from] DecodeError),
    #[error("Stream has no frames")]
    Empty,
    #[error("PNG encode failed: {0}")]
    Encode(#[from] image::ImageError),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct WaveformSize {
    pub width: u32,
    pub height: u32,
}

impl WaveformSize {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    pub fn bins(&self) -> usize {
        self.width.max(MIN_BINS) as usize
    }
}

/// An encoded preview. `width` is the bin count, which may exceed the
/// requested width for very narrow sizes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WaveformImage {
    pub width: u32,
    pub height: u32,
    pub png: Vec<u8>,
}

/// Render `path` at `size`. Undecodable or empty sources, and sources that
/// make the decoder panic, yield `None`.
pub fn render(path: &Path, size: WaveformSize) -> Option<WaveformImage> {
    match isolate_panic(path, || try_render(path, size))? {
        Ok(image) => Some(image),
        Err(e) => {
            log::debug!("No waveform for {}: {}", path.display(), e);
            None
        }
    }
}

pub fn try_render(path: &Path, size: WaveformSize) -> Result<WaveformImage, WaveformError> {
    let peaks = compute_peaks(path, size.bins())?;
    draw(&peaks, size.height)
}

/// Per-bin peak amplitudes, normalized so the loudest bin is 1.0.
pub fn compute_peaks(path: &Path, bins: usize) -> Result<Vec<f32>, WaveformError> {
    let mut stream = AudioStream::open(path)?;
    let total_frames = match stream.info().total_frames {
        Some(n) => n,
        None => AudioStream::open(path)?.count_frames()?,
    };
    if total_frames == 0 || bins == 0 {
        return Err(WaveformError::Empty);
    }

    let mut peaks = vec![0f32; bins];
    let mut frame_index = 0u64;
    loop {
        let (channels, chunk) = stream.read_frames()?;
        if chunk.is_empty() {
            break;
        }
        for frame in chunk.chunks_exact(channels) {
            let amplitude = frame.iter().map(|s| s.abs()).sum::<f32>() / channels as f32;
            let bin = bin_for_frame(frame_index, total_frames, bins);
            if amplitude > peaks[bin] {
                peaks[bin] = amplitude;
            }
            frame_index += 1;
        }
    }
    if frame_index == 0 {
        return Err(WaveformError::Empty);
    }

    normalize(&mut peaks);
    Ok(peaks)
}

/// `floor(frame / total * bins)`, clamped to the last bin so a frame count
/// that undercounts the stream still lands in range.
fn bin_for_frame(frame: u64, total_frames: u64, bins: usize) -> usize {
    let bin = (frame as f64 / total_frames as f64 * bins as f64) as usize;
    bin.min(bins - 1)
}

fn normalize(peaks: &mut [f32]) {
    let max = peaks.iter().copied().fold(0f32, f32::max);
    if max > 0.0 {
        for p in peaks.iter_mut() {
            *p /= max;
        }
    }
}

/// One vertical bar per bin, centered on the midline, on a transparent background.
fn draw(peaks: &[f32], height: u32) -> Result<WaveformImage, WaveformError> {
    let width = peaks.len() as u32;
    let height = height.max(1);
    let mut img = RgbaImage::new(width, height);

    for (x, &peak) in peaks.iter().enumerate() {
        let bar = ((peak.clamp(0.0, 1.0) * height as f32).round() as u32).min(height);
        if bar == 0 {
            continue;
        }
        let top = (height - bar) / 2;
        for y in top..top + bar {
            img.put_pixel(x as u32, y, BAR_COLOR);
        }
    }

    let mut png = Vec::new();
    img.write_to(&mut Cursor::new(&mut png), ImageFormat::Png)?;
    Ok(WaveformImage { width, height, png })
}
