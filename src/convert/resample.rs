use rubato::{FastFixedIn, PolynomialDegree, Resampler};

use super::ConvertError;

/// Input frames handed to rubato per call.
const CHUNK_FRAMES: usize = 1024;

/// Streaming sample-rate converter over interleaved `f32`.
///
/// Input is buffered until a full chunk is available; the resampler's
/// startup delay is trimmed so output lines up with the source, and
/// [`finish`](Self::finish) pads the tail out to the exact expected length.
pub struct StreamResampler {
    inner: FastFixedIn<f32>,
    channels: usize,
    ratio: f64,
    pending: Vec<f32>,
    delay_to_skip: usize,
    frames_in: u64,
    frames_out: u64,
}

impl StreamResampler {
    pub fn new(from_rate: u32, to_rate: u32, channels: usize) -> Result<Self, ConvertError> {
        let ratio = to_rate as f64 / from_rate as f64;
        let inner = FastFixedIn::<f32>::new(
            ratio,
            1.0,
            PolynomialDegree::Septic,
            CHUNK_FRAMES,
            channels,
        )
        .map_err(|e| ConvertError::Resample(e.to_string()))?;
        let delay_to_skip = inner.output_delay();

        Ok(Self {
            inner,
            channels,
            ratio,
            pending: Vec::new(),
            delay_to_skip,
            frames_in: 0,
            frames_out: 0,
        })
    }

    /// Feed interleaved input, returning whatever output is ready.
    pub fn push(&mut self, input: &[f32]) -> Result<Vec<f32>, ConvertError> {
        self.pending.extend_from_slice(input);
        self.frames_in += (input.len() / self.channels) as u64;

        let mut out = Vec::new();
        loop {
            let needed = self.inner.input_frames_next() * self.channels;
            if self.pending.len() < needed {
                break;
            }
            let chunk: Vec<f32> = self.pending.drain(..needed).collect();
            let planar = deinterleave(&chunk, self.channels);
            let processed = self
                .inner
                .process(&planar, None)
                .map_err(|e| ConvertError::Resample(e.to_string()))?;
            self.emit(processed, &mut out, u64::MAX);
        }
        Ok(out)
    }

    /// Drain buffered input and the resampler's internal delay.
    pub fn finish(&mut self) -> Result<Vec<f32>, ConvertError> {
        let expected = (self.frames_in as f64 * self.ratio).round() as u64;
        let mut out = Vec::new();

        if !self.pending.is_empty() {
            let chunk = std::mem::take(&mut self.pending);
            let planar = deinterleave(&chunk, self.channels);
            let processed = self
                .inner
                .process_partial(Some(planar.as_slice()), None)
                .map_err(|e| ConvertError::Resample(e.to_string()))?;
            self.emit(processed, &mut out, expected);
        }

        // Each empty call pushes another chunk of silence through the delay line
        let mut guard = 0;
        while self.frames_out < expected && guard < 8 {
            let processed = self
                .inner
                .process_partial::<Vec<f32>>(None, None)
                .map_err(|e| ConvertError::Resample(e.to_string()))?;
            self.emit(processed, &mut out, expected);
            guard += 1;
        }
        Ok(out)
    }

    fn emit(&mut self, planar: Vec<Vec<f32>>, out: &mut Vec<f32>, limit: u64) {
        let frames = planar.first().map(Vec::len).unwrap_or(0);
        for i in 0..frames {
            if self.delay_to_skip > 0 {
                self.delay_to_skip -= 1;
                continue;
            }
            if self.frames_out >= limit {
                return;
            }
            for channel in &planar {
                out.push(channel[i]);
            }
            self.frames_out += 1;
        }
    }
}

fn deinterleave(samples: &[f32], channels: usize) -> Vec<Vec<f32>> {
    let frames = samples.len() / channels;
    let mut planar = vec![Vec::with_capacity(frames); channels];
    for frame in samples.chunks_exact(channels) {
        for (ch, &s) in frame.iter().enumerate() {
            planar[ch].push(s);
        }
    }
    planar
}
