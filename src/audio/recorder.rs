use anyhow::{Context, Result};
use std::path::Path;
use tracing::info;

/// Whole-utterance recorder for the non-streaming fallback path
///
/// Hosts without callback-driven capture record a complete utterance and
/// upload it as a single payload on stop, instead of streaming ~100ms
/// frames. The recorder just accumulates raw samples; resampling and
/// encoding happen when the utterance is finished.
pub struct UtteranceRecorder {
    samples: Vec<f32>,
    sample_rate: u32,
}

impl UtteranceRecorder {
    pub fn new() -> Self {
        Self {
            samples: Vec::new(),
            sample_rate: 0,
        }
    }

    /// Append one captured block
    ///
    /// The first block fixes the recording rate; later blocks at a
    /// different rate are rejected.
    pub fn push(&mut self, samples: &[f32], sample_rate: u32) -> Result<()> {
        if self.sample_rate == 0 {
            self.sample_rate = sample_rate;
        } else if self.sample_rate != sample_rate {
            anyhow::bail!(
                "Sample rate changed mid-utterance: {} -> {}",
                self.sample_rate,
                sample_rate
            );
        }

        self.samples.extend_from_slice(samples);
        Ok(())
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Take the accumulated utterance, leaving the recorder empty
    pub fn finish(&mut self) -> (Vec<f32>, u32) {
        let rate = self.sample_rate;
        self.sample_rate = 0;

        info!(
            "Utterance finished: {} samples at {}Hz",
            self.samples.len(),
            rate
        );

        (std::mem::take(&mut self.samples), rate)
    }

    /// Dump the current buffer to a WAV file for debugging
    pub fn save_wav(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();

        let spec = hound::WavSpec {
            channels: 1,
            sample_rate: self.sample_rate.max(1),
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };

        let mut writer = hound::WavWriter::create(path, spec)
            .with_context(|| format!("Failed to create WAV file: {:?}", path))?;

        for &sample in &self.samples {
            let quantized = (sample.clamp(-1.0, 1.0) * 32767.0).round() as i16;
            writer
                .write_sample(quantized)
                .context("Failed to write sample to WAV")?;
        }

        writer.finalize().context("Failed to finalize WAV file")?;

        info!("Utterance dumped to {:?}", path);

        Ok(())
    }
}

impl Default for UtteranceRecorder {
    fn default() -> Self {
        Self::new()
    }
}
