// Sample buffering, downsampling and PCM conversion
//
// Microphone hardware delivers float blocks at its native rate (44.1kHz or
// 48kHz on most devices); the voice service expects fixed-cadence 16kHz
// PCM16LE frames. The chunker accumulates raw samples and drains one ~100ms
// span at a time, so frame cadence is independent of the device rate.

/// Accumulates raw samples and slices off fixed-duration spans
pub struct FrameChunker {
    source_rate: u32,
    target_rate: u32,
    /// Samples per span at the source rate
    span: usize,
    buffer: Vec<f32>,
}

impl FrameChunker {
    pub fn new(source_rate: u32, target_rate: u32, chunk_ms: u64) -> Self {
        let span = ((source_rate as u64 * chunk_ms) / 1000).max(1) as usize;

        Self {
            source_rate,
            target_rate,
            span,
            buffer: Vec::with_capacity(span * 2),
        }
    }

    /// Append raw samples; returns every full downsampled chunk now available
    ///
    /// The accumulation buffer always holds less than one full span after
    /// this returns.
    pub fn push(&mut self, samples: &[f32]) -> Vec<Vec<f32>> {
        self.buffer.extend_from_slice(samples);

        let mut chunks = Vec::new();
        while self.buffer.len() >= self.span {
            let span: Vec<f32> = self.buffer.drain(..self.span).collect();
            chunks.push(downsample(&span, self.source_rate, self.target_rate));
        }

        chunks
    }

    /// Drop any accumulated samples
    pub fn clear(&mut self) {
        self.buffer.clear();
    }

    /// Raw samples currently buffered (always less than one span between calls)
    pub fn pending(&self) -> usize {
        self.buffer.len()
    }
}

/// Bucket-average downsampling
///
/// Each output sample is the arithmetic mean of the input samples whose time
/// span maps onto it. Output length is round(len * target / source) within
/// one sample. Upsampling is not supported; a target at or above the source
/// rate returns the input unchanged.
pub fn downsample(input: &[f32], source_rate: u32, target_rate: u32) -> Vec<f32> {
    if input.is_empty() || target_rate >= source_rate {
        return input.to_vec();
    }

    let ratio = source_rate as f64 / target_rate as f64;
    let out_len = (input.len() as f64 / ratio).round() as usize;
    let mut output = Vec::with_capacity(out_len);

    for i in 0..out_len {
        let start = ((i as f64 * ratio).floor() as usize).min(input.len() - 1);
        let end = (((i + 1) as f64 * ratio).floor() as usize)
            .clamp(start + 1, input.len());

        let span = &input[start..end];
        let mean = span.iter().sum::<f32>() / span.len() as f32;
        output.push(mean);
    }

    output
}

/// Convert normalized f32 samples to 16-bit little-endian PCM bytes
pub fn encode_pcm16(samples: &[f32]) -> Vec<u8> {
    samples
        .iter()
        .flat_map(|&s| {
            let quantized = (s.clamp(-1.0, 1.0) * 32767.0).round() as i16;
            quantized.to_le_bytes()
        })
        .collect()
}

/// Inverse of [`encode_pcm16`]; odd trailing bytes are dropped
pub fn decode_pcm16(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(2)
        .map(|pair| i16::from_le_bytes([pair[0], pair[1]]) as f32 / 32767.0)
        .collect()
}

/// Root-mean-square energy of a chunk (0.0 for an empty chunk)
pub fn rms(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }

    let sum_squares: f32 = samples.iter().map(|s| s * s).sum();
    (sum_squares / samples.len() as f32).sqrt()
}
