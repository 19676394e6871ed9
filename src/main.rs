use anyhow::Result;
use clap::Parser;
use sereno_voice::{Config, SessionEvent, VoiceSession};
use std::io::Write;
use tracing::{error, info};

/// Console client for a live voice conversation
#[derive(Debug, Parser)]
#[command(name = "sereno-voice", version)]
struct Args {
    /// Path to the configuration file (without extension)
    #[arg(long, default_value = "config/sereno-voice")]
    config: String,

    /// Voice configuration id (overrides the config file)
    #[arg(long)]
    config_id: Option<String>,

    /// System prompt to seed the assistant with
    #[arg(long)]
    prompt: Option<String>,

    /// Send one typed message instead of streaming the microphone
    #[arg(long)]
    text: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    let args = Args::parse();
    let cfg = Config::load(&args.config)?;

    info!("{} starting", cfg.service.name);

    let config_id = args
        .config_id
        .clone()
        .unwrap_or_else(|| cfg.voice.config_id.clone());

    let session = VoiceSession::new(cfg.session());
    let mut events = session.subscribe();

    session.connect(&config_id, args.prompt.as_deref()).await?;

    match &args.text {
        Some(text) => {
            session.send_text(text).await?;
        }
        None => {
            session.start_mic_stream().await?;
            info!("Streaming microphone; press Ctrl-C to end the conversation");
        }
    }

    loop {
        tokio::select! {
            event = events.recv() => {
                match event {
                    Ok(SessionEvent::Message(msg)) => {
                        let speaker = match msg.role {
                            sereno_voice::Role::User => "you",
                            sereno_voice::Role::Assistant => "sereno",
                        };
                        println!("\n[{}] {}", speaker, msg.content);
                    }
                    Ok(SessionEvent::InterimMessage(msg)) => {
                        print!("\r… {}", msg.content);
                        std::io::stdout().flush().ok();
                    }
                    Ok(SessionEvent::Error(e)) => {
                        error!("Session error: {}", e);
                    }
                    Ok(SessionEvent::ReconnectionFailed) => {
                        error!("Connection lost for good; exiting");
                        break;
                    }
                    Ok(SessionEvent::Disconnected) => {
                        info!("Disconnected");
                    }
                    Ok(_) => {}
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                        info!("Dropped {} events (slow console)", skipped);
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Shutting down");
                break;
            }
        }
    }

    session.disconnect().await?;

    Ok(())
}
