use anyhow::Result;
use sereno_voice::{Config, SessionEvent, VoiceSession};
use std::time::Duration;
use tokio::time::timeout;
use tracing::info;

/// Walkthrough of a complete short conversation: connect, stream the
/// microphone for 30 seconds, print everything the service sends back,
/// then hang up.
#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    info!("Starting live conversation demo");

    // 1. Load configuration (API key via SERENO__VOICE__API_KEY)
    let cfg = Config::load("config/sereno-voice")?;

    // 2. Create the session and subscribe before connecting so no event
    //    is missed
    let session = VoiceSession::new(cfg.session());
    let mut events = session.subscribe();

    // 3. Connect with a seed prompt; its echo will be suppressed
    session
        .connect(
            &cfg.voice.config_id,
            Some("You are a calm, supportive listener."),
        )
        .await?;
    info!("Connected");

    // 4. Stream the microphone
    session.start_mic_stream().await?;
    info!("Speak now; the assistant pauses while you talk");

    // 5. Print events for 30 seconds
    let run = async {
        let mut messages = 0usize;
        loop {
            match events.recv().await {
                Ok(SessionEvent::Message(msg)) => {
                    messages += 1;
                    info!("#{} [{:?}] {}", messages, msg.role, msg.content);
                }
                Ok(SessionEvent::InterimMessage(msg)) => {
                    info!("(interim) {}", msg.content);
                }
                Ok(SessionEvent::Speaking(text)) => {
                    info!("assistant speaking: {} chars", text.len());
                }
                Ok(SessionEvent::Rms(_)) => {}
                Ok(other) => info!("{:?}", other),
                Err(_) => break,
            }
        }
    };

    let _ = timeout(Duration::from_secs(30), run).await;

    // 6. Hang up
    session.disconnect().await?;
    info!("Demo complete");

    Ok(())
}
