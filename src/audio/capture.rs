use anyhow::{bail, Context, Result};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use tokio::sync::{mpsc, oneshot};
use tracing::{info, warn};

/// One block of raw microphone samples at the device's native rate
#[derive(Debug, Clone)]
pub struct CaptureBlock {
    /// Mono samples, normalized to -1.0..1.0
    pub samples: Vec<f32>,
    /// Device sample rate in Hz
    pub sample_rate: u32,
}

/// Audio capture source
///
/// Implementations:
/// - `CpalSource`: default microphone via the host audio subsystem
/// - `ScriptedSource`: predefined blocks, for tests and offline runs
#[async_trait::async_trait]
pub trait CaptureSource: Send {
    /// Start capturing audio
    ///
    /// Returns a channel receiver that will receive raw sample blocks
    async fn start(&mut self) -> Result<mpsc::Receiver<CaptureBlock>>;

    /// Stop capturing audio
    async fn stop(&mut self) -> Result<()>;

    /// Check if the source is currently capturing
    fn is_capturing(&self) -> bool;

    /// Get source name for logging
    fn name(&self) -> &str;
}

/// Microphone capture via cpal
///
/// The cpal stream is not `Send`, so it lives on a dedicated thread for the
/// duration of the capture; the thread parks on a stop signal and drops the
/// stream on its way out.
pub struct CpalSource {
    device_name: String,
    stop_tx: Option<std::sync::mpsc::Sender<()>>,
    thread: Option<std::thread::JoinHandle<()>>,
    capturing: bool,
}

impl CpalSource {
    /// Errors if the host has no default input device
    pub fn new() -> Result<Self> {
        let device = cpal::default_host()
            .default_input_device()
            .context("No audio input device available")?;

        let device_name = device
            .name()
            .unwrap_or_else(|_| "unknown input device".to_string());

        info!("Using input device: {}", device_name);

        Ok(Self {
            device_name,
            stop_tx: None,
            thread: None,
            capturing: false,
        })
    }

    /// Whether the host offers any input device at all
    pub fn available() -> bool {
        cpal::default_host().default_input_device().is_some()
    }
}

#[async_trait::async_trait]
impl CaptureSource for CpalSource {
    async fn start(&mut self) -> Result<mpsc::Receiver<CaptureBlock>> {
        if self.capturing {
            bail!("Already capturing");
        }

        let (block_tx, block_rx) = mpsc::channel(64);
        let (stop_tx, stop_rx) = std::sync::mpsc::channel();
        let (ready_tx, ready_rx) = oneshot::channel();

        let thread = std::thread::spawn(move || capture_thread(block_tx, stop_rx, ready_tx));

        match ready_rx.await {
            Ok(Ok(sample_rate)) => {
                info!("Microphone capture started ({}Hz)", sample_rate);
            }
            Ok(Err(e)) => {
                let _ = thread.join();
                return Err(e);
            }
            Err(_) => {
                let _ = thread.join();
                bail!("Capture thread exited before reporting readiness");
            }
        }

        self.stop_tx = Some(stop_tx);
        self.thread = Some(thread);
        self.capturing = true;

        Ok(block_rx)
    }

    async fn stop(&mut self) -> Result<()> {
        if !self.capturing {
            return Ok(());
        }

        info!("Stopping microphone capture");

        if let Some(stop_tx) = self.stop_tx.take() {
            let _ = stop_tx.send(());
        }

        if let Some(handle) = self.thread.take() {
            tokio::task::spawn_blocking(move || {
                if handle.join().is_err() {
                    warn!("Capture thread panicked during shutdown");
                }
            })
            .await
            .context("Failed to join capture thread")?;
        }

        self.capturing = false;

        Ok(())
    }

    fn is_capturing(&self) -> bool {
        self.capturing
    }

    fn name(&self) -> &str {
        &self.device_name
    }
}

/// Owns the cpal stream for the lifetime of one capture
fn capture_thread(
    block_tx: mpsc::Sender<CaptureBlock>,
    stop_rx: std::sync::mpsc::Receiver<()>,
    ready_tx: oneshot::Sender<Result<u32>>,
) {
    let build = move || -> Result<(cpal::Stream, u32)> {
        let device = cpal::default_host()
            .default_input_device()
            .context("No audio input device available")?;

        let default_config = device
            .default_input_config()
            .context("Failed to query default input config")?;

        let sample_rate = default_config.sample_rate().0;
        let channels = default_config.channels();

        let stream_config = cpal::StreamConfig {
            channels,
            sample_rate: default_config.sample_rate(),
            buffer_size: cpal::BufferSize::Default,
        };

        let stream = device
            .build_input_stream(
                &stream_config,
                move |data: &[f32], _: &cpal::InputCallbackInfo| {
                    let samples = if channels > 1 {
                        downmix_to_mono(data, channels)
                    } else {
                        data.to_vec()
                    };

                    // Never block the audio callback; a backlogged
                    // receiver loses this block
                    let _ = block_tx.try_send(CaptureBlock {
                        samples,
                        sample_rate,
                    });
                },
                |err| {
                    warn!("Audio input stream error: {}", err);
                },
                None,
            )
            .context("Failed to build input stream")?;

        stream.play().context("Failed to start input stream")?;

        Ok((stream, sample_rate))
    };

    match build() {
        Ok((stream, sample_rate)) => {
            let _ = ready_tx.send(Ok(sample_rate));
            // Park until stop is signalled or the source is dropped
            let _ = stop_rx.recv();
            drop(stream);
        }
        Err(e) => {
            let _ = ready_tx.send(Err(e));
        }
    }
}

/// Average interleaved channels down to mono
fn downmix_to_mono(data: &[f32], channels: u16) -> Vec<f32> {
    data.chunks(channels as usize)
        .map(|frame| frame.iter().sum::<f32>() / frame.len() as f32)
        .collect()
}

/// Capture source that replays predefined blocks
///
/// Stands in for a microphone in tests and headless environments.
pub struct ScriptedSource {
    blocks: Vec<CaptureBlock>,
    capturing: bool,
}

impl ScriptedSource {
    pub fn new(blocks: Vec<CaptureBlock>) -> Self {
        Self {
            blocks,
            capturing: false,
        }
    }

    /// Constant-amplitude blocks at the given rate, split into equal slices
    pub fn constant(amplitude: f32, sample_rate: u32, block_len: usize, block_count: usize) -> Self {
        let blocks = (0..block_count)
            .map(|_| CaptureBlock {
                samples: vec![amplitude; block_len],
                sample_rate,
            })
            .collect();

        Self::new(blocks)
    }
}

#[async_trait::async_trait]
impl CaptureSource for ScriptedSource {
    async fn start(&mut self) -> Result<mpsc::Receiver<CaptureBlock>> {
        if self.capturing {
            bail!("Already capturing");
        }

        let (tx, rx) = mpsc::channel(64);
        let blocks = std::mem::take(&mut self.blocks);

        tokio::spawn(async move {
            for block in blocks {
                if tx.send(block).await.is_err() {
                    break;
                }
            }
            // Sender drops here; the receiver sees end-of-stream
        });

        self.capturing = true;

        Ok(rx)
    }

    async fn stop(&mut self) -> Result<()> {
        self.capturing = false;
        Ok(())
    }

    fn is_capturing(&self) -> bool {
        self.capturing
    }

    fn name(&self) -> &str {
        "scripted"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_downmix_stereo() {
        let interleaved = [0.2, 0.4, -0.6, -0.2];
        let mono = downmix_to_mono(&interleaved, 2);

        assert_eq!(mono.len(), 2);
        assert!((mono[0] - 0.3).abs() < 1e-6); // (0.2 + 0.4) / 2
        assert!((mono[1] + 0.4).abs() < 1e-6); // (-0.6 + -0.2) / 2
    }

    #[tokio::test]
    async fn test_scripted_source_replays_blocks() {
        let mut source = ScriptedSource::constant(0.5, 48_000, 1600, 3);
        let mut rx = source.start().await.unwrap();

        let mut received = 0;
        while let Some(block) = rx.recv().await {
            assert_eq!(block.sample_rate, 48_000);
            assert_eq!(block.samples.len(), 1600);
            received += 1;
        }

        assert_eq!(received, 3);
    }
}
