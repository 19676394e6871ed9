use anyhow::{Context, Result};
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{broadcast, mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::audio::{
    downsample, encode_pcm16, rms, CaptureBlock, CaptureSource, CpalSource, FrameChunker,
    UtteranceRecorder,
};
use crate::wire::{ClientFrame, FrameDecoder, ServerEvent, SocketInput, SocketReader, VoiceSocket};

use super::config::SessionConfig;
use super::events::{Role, SessionEvent};
use super::turn::{TurnCommand, TurnTaking};

/// Conversation parameters kept for reconnection
#[derive(Debug, Clone)]
struct Conversation {
    config_id: String,
    system_prompt: Option<String>,
}

/// In-flight fallback recording
struct RecorderState {
    source: Box<dyn CaptureSource>,
    task: JoinHandle<()>,
    recorder: Arc<Mutex<UtteranceRecorder>>,
}

/// A live voice conversation with the remote voice service
///
/// Owns exactly one socket, one microphone stream and one turn-taking
/// controller. Cheap to clone; clones share the same session state. One
/// instance per active conversation: the hosting layer constructs it
/// explicitly rather than going through a shared singleton.
#[derive(Clone)]
pub struct VoiceSession {
    config: SessionConfig,
    events: broadcast::Sender<SessionEvent>,

    /// Write half of the open socket, if any
    socket: Arc<Mutex<Option<VoiceSocket>>>,

    decoder: Arc<Mutex<FrameDecoder>>,
    turn: Arc<Mutex<TurnTaking>>,

    connected: Arc<AtomicBool>,
    streaming: Arc<AtomicBool>,

    /// Set by disconnect() so a user-initiated close never reconnects
    user_closed: Arc<AtomicBool>,
    reconnect_attempts: Arc<AtomicU32>,

    /// Parameters reused by reconnection attempts
    conversation: Arc<Mutex<Option<Conversation>>>,

    reader_task: Arc<Mutex<Option<JoinHandle<()>>>>,
    reconnect_task: Arc<Mutex<Option<JoinHandle<()>>>>,
    mic_task: Arc<Mutex<Option<JoinHandle<()>>>>,
    mic_source: Arc<Mutex<Option<Box<dyn CaptureSource>>>>,
    recorder: Arc<Mutex<Option<RecorderState>>>,
}

impl VoiceSession {
    pub fn new(config: SessionConfig) -> Self {
        let (events, _) = broadcast::channel(64);
        let turn = TurnTaking::new(config.speech_threshold, config.silence_window);

        Self {
            config,
            events,
            socket: Arc::new(Mutex::new(None)),
            decoder: Arc::new(Mutex::new(FrameDecoder::new())),
            turn: Arc::new(Mutex::new(turn)),
            connected: Arc::new(AtomicBool::new(false)),
            streaming: Arc::new(AtomicBool::new(false)),
            user_closed: Arc::new(AtomicBool::new(false)),
            reconnect_attempts: Arc::new(AtomicU32::new(0)),
            conversation: Arc::new(Mutex::new(None)),
            reader_task: Arc::new(Mutex::new(None)),
            reconnect_task: Arc::new(Mutex::new(None)),
            mic_task: Arc::new(Mutex::new(None)),
            mic_source: Arc::new(Mutex::new(None)),
            recorder: Arc::new(Mutex::new(None)),
        }
    }

    /// Subscribe to session events
    ///
    /// Listeners can come and go without disturbing in-flight dispatch.
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    pub fn is_streaming(&self) -> bool {
        self.streaming.load(Ordering::SeqCst)
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Connect to the voice service and perform the handshake
    ///
    /// Resolves once the socket is open and the configuration frame (plus
    /// the optional system-prompt seed) has been sent. A connect while
    /// already connected force-closes the previous connection first. There
    /// is no timeout on the open wait.
    pub async fn connect(&self, config_id: &str, system_prompt: Option<&str>) -> Result<()> {
        if self.connected.load(Ordering::SeqCst) {
            // At most one live socket
            self.disconnect().await?;
        }

        info!("Connecting session {}", self.config.session_id);

        // A fresh connect supersedes any reconnect still waiting out its
        // backoff delay
        if let Some(handle) = self.reconnect_task.lock().await.take() {
            handle.abort();
        }

        self.user_closed.store(false, Ordering::SeqCst);
        self.reconnect_attempts.store(0, Ordering::SeqCst);

        *self.conversation.lock().await = Some(Conversation {
            config_id: config_id.to_string(),
            system_prompt: system_prompt.map(str::to_string),
        });

        self.open_socket().await
    }

    /// Open the socket and perform the handshake for the stored conversation
    ///
    /// Returns a boxed, explicitly-`Send` future so the compiler can resolve
    /// `Send`-ness across the `run_reader` -> `schedule_reconnect` ->
    /// `open_socket` reconnect cycle without recursing on an opaque type.
    fn open_socket(&self) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        Box::pin(async move {
        let conversation = self
            .conversation
            .lock()
            .await
            .clone()
            .context("No conversation configured")?;

        let (mut socket, reader) =
            VoiceSocket::connect(&self.config.endpoint, &self.config.api_key).await?;

        // Configuration frame goes out before any audio
        socket
            .send(&ClientFrame::session_settings(
                &conversation.config_id,
                self.config.sample_rate,
                self.config.channels,
            ))
            .await?;

        if let Some(prompt) = &conversation.system_prompt {
            socket
                .send(&ClientFrame::AssistantInput {
                    text: prompt.clone(),
                })
                .await?;

            // The service may echo the seed back as assistant speech;
            // remember it verbatim so the decoder can drop that copy
            self.decoder.lock().await.set_seed(prompt);
        }

        self.reconnect_attempts.store(0, Ordering::SeqCst);
        self.turn.lock().await.reset();

        *self.socket.lock().await = Some(socket);
        self.connected.store(true, Ordering::SeqCst);

        info!("Session {} connected", self.config.session_id);
        let _ = self.events.send(SessionEvent::Connected);

        // Spawn the reader only after Connected is out, so inbound frames
        // can never be dispatched ahead of it
        let session = self.clone();
        let task = tokio::spawn(async move { session.run_reader(reader).await });
        if let Some(old) = self.reader_task.lock().await.replace(task) {
            old.abort();
        }

        Ok(())
        })
    }

    /// Tear the session down
    ///
    /// Idempotent and safe from any state: cancels a pending reconnect,
    /// stops capture, abandons any in-flight fallback recording and closes
    /// the socket with a normal closure code.
    pub async fn disconnect(&self) -> Result<()> {
        self.user_closed.store(true, Ordering::SeqCst);

        if let Some(handle) = self.reconnect_task.lock().await.take() {
            handle.abort();
        }

        self.stop_mic_stream().await?;

        if let Some(mut state) = self.recorder.lock().await.take() {
            if let Err(e) = state.source.stop().await {
                warn!("Failed to stop recording source: {}", e);
            }
            state.task.abort();
        }

        if let Some(mut socket) = self.socket.lock().await.take() {
            if let Err(e) = socket.close().await {
                warn!("Error closing voice service socket: {}", e);
            }
        }

        if let Some(handle) = self.reader_task.lock().await.take() {
            handle.abort();
        }

        let was_connected = self.connected.swap(false, Ordering::SeqCst);
        if was_connected {
            info!("Session {} disconnected", self.config.session_id);
            let _ = self.events.send(SessionEvent::Disconnected);
        }

        Ok(())
    }

    /// Start streaming the default microphone
    ///
    /// Errors if not connected. A no-op when already streaming, and a
    /// documented no-op on hosts without any audio input device; such
    /// hosts use the record/stop-and-upload fallback instead.
    pub async fn start_mic_stream(&self) -> Result<()> {
        if !self.connected.load(Ordering::SeqCst) {
            anyhow::bail!("Cannot start microphone stream: not connected");
        }

        if !CpalSource::available() {
            warn!("No audio input device; microphone streaming is unavailable on this host");
            return Ok(());
        }

        let source = CpalSource::new()?;
        self.start_stream_from(Box::new(source)).await
    }

    /// Start streaming from an arbitrary capture source
    pub async fn start_stream_from(&self, mut source: Box<dyn CaptureSource>) -> Result<()> {
        if !self.connected.load(Ordering::SeqCst) {
            anyhow::bail!("Cannot start audio streaming: not connected");
        }

        if self.streaming.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        let block_rx = match source.start().await {
            Ok(rx) => rx,
            Err(e) => {
                self.streaming.store(false, Ordering::SeqCst);
                return Err(e);
            }
        };

        info!("Audio streaming started ({})", source.name());

        *self.mic_source.lock().await = Some(source);

        let session = self.clone();
        let task = tokio::spawn(async move { session.mic_loop(block_rx).await });
        *self.mic_task.lock().await = Some(task);

        Ok(())
    }

    /// Stop streaming; idempotent
    pub async fn stop_mic_stream(&self) -> Result<()> {
        if !self.streaming.swap(false, Ordering::SeqCst) {
            return Ok(());
        }

        if let Some(mut source) = self.mic_source.lock().await.take() {
            if let Err(e) = source.stop().await {
                warn!("Failed to stop capture source: {}", e);
            }
        }

        if let Some(handle) = self.mic_task.lock().await.take() {
            if let Err(e) = handle.await {
                error!("Audio streaming task panicked: {}", e);
            }
        }

        info!("Audio streaming stopped");

        Ok(())
    }

    /// Chunk, downsample and transmit captured blocks until the stream ends
    async fn mic_loop(self, mut block_rx: mpsc::Receiver<CaptureBlock>) {
        debug!("Audio streaming task started");

        // The chunker is created from the first block, once the device
        // rate is known; it dies with the task, so a restarted stream
        // always begins with an empty accumulation buffer.
        let mut chunker: Option<FrameChunker> = None;

        while let Some(block) = block_rx.recv().await {
            if !self.streaming.load(Ordering::SeqCst) {
                break;
            }

            let chunker = chunker.get_or_insert_with(|| {
                FrameChunker::new(
                    block.sample_rate,
                    self.config.sample_rate,
                    self.config.chunk_ms,
                )
            });

            for chunk in chunker.push(&block.samples) {
                self.handle_chunk(&chunk).await;
            }
        }

        debug!("Audio streaming task stopped");
    }

    /// Process one downsampled chunk: energy, turn-taking, transmission
    async fn handle_chunk(&self, chunk: &[f32]) {
        let energy = rms(chunk);
        let _ = self.events.send(SessionEvent::Rms(energy));

        let command = self.turn.lock().await.on_chunk(energy, Instant::now());

        if !self.connected.load(Ordering::SeqCst) {
            // Between close and reconnect there is nowhere to send;
            // chunks are dropped quietly
            return;
        }

        if let Some(command) = command {
            let frame = match command {
                TurnCommand::PauseAssistant => ClientFrame::PauseAssistantMessage,
                TurnCommand::ResumeAssistant => ClientFrame::ResumeAssistantMessage,
            };

            if let Err(e) = self.send_frame(&frame).await {
                warn!("Failed to send turn command: {}", e);
            }
        }

        let pcm = encode_pcm16(chunk);
        let frame = ClientFrame::audio_input(&pcm, self.config.sample_rate, self.config.channels);

        if let Err(e) = self.send_frame(&frame).await {
            debug!("Dropping audio frame: {}", e);
        }
    }

    /// Manual pause: stops capture outright and tells the service to pause
    ///
    /// Unlike the automatic VAD pause, which keeps capturing so it can
    /// detect when to resume.
    pub async fn pause_streaming(&self) -> Result<()> {
        self.send_frame(&ClientFrame::PauseAssistantMessage).await?;
        self.turn.lock().await.set_paused(true);
        self.stop_mic_stream().await
    }

    /// Manual resume: restarts capture and tells the service to resume
    pub async fn resume_streaming(&self) -> Result<()> {
        self.send_frame(&ClientFrame::ResumeAssistantMessage)
            .await?;
        self.turn.lock().await.set_paused(false);
        self.start_mic_stream().await
    }

    /// Send typed user text (fallback for hosts without audio capture)
    pub async fn send_text(&self, text: &str) -> Result<()> {
        self.send_frame(&ClientFrame::UserInput {
            text: text.to_string(),
        })
        .await
    }

    /// Record a complete utterance for one-shot upload
    ///
    /// Capture failures (no device, permission denied) surface here as
    /// errors rather than as events. No-op if a recording is in progress.
    pub async fn start_live_recording(&self) -> Result<()> {
        if !self.connected.load(Ordering::SeqCst) {
            anyhow::bail!("Cannot start recording: not connected");
        }

        let mut guard = self.recorder.lock().await;
        if guard.is_some() {
            return Ok(());
        }

        let mut source: Box<dyn CaptureSource> = Box::new(CpalSource::new()?);
        let mut block_rx = source.start().await?;

        let recorder = Arc::new(Mutex::new(UtteranceRecorder::new()));
        let sink = Arc::clone(&recorder);

        let task = tokio::spawn(async move {
            while let Some(block) = block_rx.recv().await {
                if let Err(e) = sink.lock().await.push(&block.samples, block.sample_rate) {
                    warn!("Dropping capture block: {}", e);
                }
            }
        });

        *guard = Some(RecorderState {
            source,
            task,
            recorder,
        });

        info!("Utterance recording started");
        let _ = self.events.send(SessionEvent::RecordingStarted);

        Ok(())
    }

    /// Stop the fallback recording and upload the utterance as one frame
    pub async fn stop_live_recording(&self) -> Result<()> {
        let state = self.recorder.lock().await.take();
        let Some(mut state) = state else {
            return Ok(());
        };

        if let Err(e) = state.source.stop().await {
            warn!("Failed to stop recording source: {}", e);
        }

        if let Err(e) = state.task.await {
            error!("Recording task panicked: {}", e);
        }

        let (samples, source_rate) = state.recorder.lock().await.finish();

        if !samples.is_empty() {
            let resampled = downsample(&samples, source_rate, self.config.sample_rate);
            let pcm = encode_pcm16(&resampled);

            self.send_frame(&ClientFrame::audio_input(
                &pcm,
                self.config.sample_rate,
                self.config.channels,
            ))
            .await?;

            info!(
                "Uploaded utterance: {} samples at {}Hz",
                resampled.len(),
                self.config.sample_rate
            );
        }

        let _ = self.events.send(SessionEvent::RecordingStopped);

        Ok(())
    }

    async fn send_frame(&self, frame: &ClientFrame) -> Result<()> {
        let mut guard = self.socket.lock().await;
        let socket = guard
            .as_mut()
            .context("Not connected to the voice service")?;

        socket.send(frame).await
    }

    /// Consume inbound socket inputs until the connection goes away
    ///
    /// Socket-level errors are surfaced as events but do not end the
    /// session; only the close path decides whether to reconnect, so a
    /// failure never triggers reconnection twice.
    async fn run_reader(self, mut reader: SocketReader) {
        let mut normal_close = false;

        loop {
            match reader.next().await {
                None => break, // transport gone without a close frame
                Some(SocketInput::Frame(text)) => {
                    let event = self.decoder.lock().await.decode(&text);
                    if let Some(event) = event {
                        self.dispatch(event);
                    }
                }
                Some(SocketInput::Error(message)) => {
                    warn!("Voice service socket error: {}", message);
                    let _ = self.events.send(SessionEvent::Error(message));
                }
                Some(SocketInput::Closed { normal }) => {
                    normal_close = normal;
                    break;
                }
            }
        }

        self.connected.store(false, Ordering::SeqCst);
        *self.socket.lock().await = None;

        if self.user_closed.load(Ordering::SeqCst) {
            return;
        }

        info!(
            "Voice service connection lost (normal_close={})",
            normal_close
        );
        let _ = self.events.send(SessionEvent::Disconnected);

        if !normal_close {
            self.schedule_reconnect().await;
        }
    }

    /// Spawn the bounded linear-backoff reconnect loop
    async fn schedule_reconnect(&self) {
        let mut guard = self.reconnect_task.lock().await;

        // Only one pending reconnect at a time
        if let Some(handle) = guard.take() {
            handle.abort();
        }

        let session = self.clone();
        *guard = Some(tokio::spawn(async move {
            loop {
                let attempt = session.reconnect_attempts.fetch_add(1, Ordering::SeqCst) + 1;

                if attempt > session.config.max_reconnect_attempts {
                    warn!(
                        "Reconnection abandoned after {} attempts",
                        session.config.max_reconnect_attempts
                    );
                    let _ = session.events.send(SessionEvent::ReconnectionFailed);
                    return;
                }

                let delay = session.config.reconnect_base_delay * attempt;
                info!(
                    "Reconnecting in {:?} (attempt {}/{})",
                    delay, attempt, session.config.max_reconnect_attempts
                );
                tokio::time::sleep(delay).await;

                if session.user_closed.load(Ordering::SeqCst) {
                    return;
                }

                match session.open_socket().await {
                    Ok(()) => return, // counter was reset on open
                    Err(e) => {
                        let _ = session.events.send(SessionEvent::Error(format!(
                            "Reconnect attempt {} failed: {}",
                            attempt, e
                        )));
                    }
                }
            }
        }));
    }

    /// Map one decoded server event onto the public event stream
    fn dispatch(&self, event: ServerEvent) {
        match event {
            ServerEvent::ChatMetadata(value) => {
                let _ = self.events.send(SessionEvent::ChatMetadata(value));
            }
            ServerEvent::Message(message) => {
                if message.role == Role::Assistant {
                    // Assistant text is about to be spoken by the UI layer
                    let _ = self
                        .events
                        .send(SessionEvent::Speaking(message.content.clone()));
                }
                let _ = self.events.send(SessionEvent::Message(message));
            }
            ServerEvent::Interim(message) => {
                let _ = self.events.send(SessionEvent::InterimMessage(message));
            }
            ServerEvent::Error(message) => {
                let _ = self.events.send(SessionEvent::Error(message));
            }
        }
    }
}
