// Session lifecycle tests against a loopback WebSocket server standing in
// for the remote voice service.

use base64::Engine;
use futures::{SinkExt, StreamExt};
use sereno_voice::{ScriptedSource, SessionConfig, SessionEvent, VoiceSession};
use serde_json::Value;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::{broadcast, mpsc};
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;

async fn bind() -> (TcpListener, String) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let endpoint = format!("ws://{}", listener.local_addr().unwrap());
    (listener, endpoint)
}

fn test_config(endpoint: String) -> SessionConfig {
    SessionConfig {
        endpoint,
        api_key: "test-key".to_string(),
        max_reconnect_attempts: 3,
        reconnect_base_delay: Duration::from_millis(30),
        ..SessionConfig::default()
    }
}

async fn next_event(rx: &mut broadcast::Receiver<SessionEvent>) -> SessionEvent {
    timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("timed out waiting for session event")
        .expect("event channel closed")
}

/// Next event that is not an RMS sample (those flood while streaming)
async fn next_non_rms(rx: &mut broadcast::Receiver<SessionEvent>) -> SessionEvent {
    loop {
        match next_event(rx).await {
            SessionEvent::Rms(_) => continue,
            event => return event,
        }
    }
}

#[tokio::test]
async fn test_disconnect_is_idempotent_without_connecting() {
    // P1: repeated disconnects on a never-connected session are safe
    let session = VoiceSession::new(test_config("ws://127.0.0.1:1".to_string()));

    session.disconnect().await.unwrap();
    session.disconnect().await.unwrap();
    session.disconnect().await.unwrap();

    assert!(!session.is_connected());
    assert!(!session.is_streaming());

    // Teardown helpers are equally safe with nothing running
    session.stop_mic_stream().await.unwrap();
    session.stop_live_recording().await.unwrap();
}

#[tokio::test]
async fn test_start_mic_stream_requires_connection() {
    let session = VoiceSession::new(test_config("ws://127.0.0.1:1".to_string()));

    let result = session.start_mic_stream().await;
    assert!(result.is_err());

    let result = session
        .start_stream_from(Box::new(ScriptedSource::constant(0.1, 48_000, 480, 1)))
        .await;
    assert!(result.is_err());
}

#[tokio::test]
async fn test_handshake_precedes_audio() {
    // Scenario A: the configuration frame arrives, with the exact expected
    // shape, before any audio frame
    let (listener, endpoint) = bind().await;
    let (frame_tx, mut frame_rx) = mpsc::channel::<Value>(64);

    let request_path = Arc::new(std::sync::Mutex::new(String::new()));
    let request_path_server = Arc::clone(&request_path);

    tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();

        let callback = |req: &tokio_tungstenite::tungstenite::handshake::server::Request,
                        resp: tokio_tungstenite::tungstenite::handshake::server::Response| {
            *request_path_server.lock().unwrap() = req.uri().to_string();
            Ok(resp)
        };

        let mut ws = tokio_tungstenite::accept_hdr_async(stream, callback)
            .await
            .unwrap();

        while let Some(Ok(msg)) = ws.next().await {
            if let Message::Text(text) = msg {
                let value: Value = serde_json::from_str(text.as_str()).unwrap();
                if frame_tx.send(value).await.is_err() {
                    break;
                }
            }
        }
    });

    let session = VoiceSession::new(test_config(endpoint));
    session.connect("abc", None).await.unwrap();

    // Two 100ms spans of constant signal at a 48kHz device rate
    session
        .start_stream_from(Box::new(ScriptedSource::constant(0.5, 48_000, 4800, 2)))
        .await
        .unwrap();

    let mut frames = Vec::new();
    let first_audio = loop {
        let frame = timeout(Duration::from_secs(5), frame_rx.recv())
            .await
            .expect("timed out waiting for frames")
            .expect("server task ended");

        let is_audio = frame["type"] == "audio_input";
        frames.push(frame.clone());
        if is_audio {
            break frame;
        }
    };

    // The API key travels on the connection URI
    assert!(request_path.lock().unwrap().contains("api_key=test-key"));

    // Configuration first, exact shape
    assert_eq!(frames[0]["type"], "session_settings");
    assert_eq!(frames[0]["config_id"], "abc");
    assert_eq!(frames[0]["audio"]["sample_rate"], 16000);
    assert_eq!(frames[0]["audio"]["encoding"], "linear16");
    assert_eq!(frames[0]["audio"]["channels"], 1);

    // 100ms at 16kHz mono PCM16 = 1600 samples = 3200 bytes
    let pcm = base64::engine::general_purpose::STANDARD
        .decode(first_audio["data"].as_str().unwrap())
        .unwrap();
    assert_eq!(pcm.len(), 3200);

    let sample = i16::from_le_bytes([pcm[0], pcm[1]]);
    assert_eq!(sample, 16384); // 0.5 * 32767, rounded

    // A loud constant signal also pauses the assistant before the audio
    assert!(frames
        .iter()
        .any(|f| f["type"] == "pause_assistant_message"));

    session.disconnect().await.unwrap();
}

#[tokio::test]
async fn test_seed_echo_suppressed_once() {
    // P5: the echoed seed is dropped exactly once
    let (listener, endpoint) = bind().await;

    tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();

        // session_settings + assistant_input
        let _ = ws.next().await;
        let _ = ws.next().await;

        let echo = serde_json::json!({
            "type": "assistant_message",
            "message": {"role": "assistant", "content": "PROMPT_X"}
        })
        .to_string();

        ws.send(Message::Text(echo.clone().into())).await.unwrap();
        ws.send(Message::Text(echo.into())).await.unwrap();

        // Hold the connection open for the duration of the test
        tokio::time::sleep(Duration::from_secs(5)).await;
    });

    let session = VoiceSession::new(test_config(endpoint));
    let mut events = session.subscribe();

    session.connect("abc", Some("PROMPT_X")).await.unwrap();

    // Exactly one Message event arrives for the two inbound frames
    let message = loop {
        match next_non_rms(&mut events).await {
            SessionEvent::Message(msg) => break msg,
            _ => continue,
        }
    };
    assert_eq!(message.content, "PROMPT_X");

    let extra = timeout(Duration::from_millis(300), async {
        loop {
            if let Ok(SessionEvent::Message(msg)) = events.recv().await {
                return msg;
            }
        }
    })
    .await;
    assert!(extra.is_err(), "second echo should not have been delivered");

    session.disconnect().await.unwrap();
}

#[tokio::test]
async fn test_inbound_frames_dispatch_in_order() {
    let (listener, endpoint) = bind().await;

    tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();

        let _ = ws.next().await; // session_settings

        for payload in [
            serde_json::json!({"type": "user_message", "content": "I feel anxious today"}),
            serde_json::json!({"type": "interim_transcript", "text": "I fee"}),
            serde_json::json!({"type": "interim_transcript", "text": "I feel anx"}),
            serde_json::json!({"type": "error", "message": "quota exceeded"}),
        ] {
            ws.send(Message::Text(payload.to_string().into()))
                .await
                .unwrap();
        }

        tokio::time::sleep(Duration::from_secs(5)).await;
    });

    let session = VoiceSession::new(test_config(endpoint));
    let mut events = session.subscribe();

    session.connect("abc", None).await.unwrap();

    assert!(matches!(next_non_rms(&mut events).await, SessionEvent::Connected));

    match next_non_rms(&mut events).await {
        SessionEvent::Message(msg) => {
            assert_eq!(msg.role, sereno_voice::Role::User);
            assert_eq!(msg.content, "I feel anxious today");
            assert!(!msg.interim);
        }
        other => panic!("expected user message, got {:?}", other),
    }

    match next_non_rms(&mut events).await {
        SessionEvent::InterimMessage(msg) => {
            assert!(msg.interim);
            assert_eq!(msg.content, "I fee");
        }
        other => panic!("expected interim, got {:?}", other),
    }

    match next_non_rms(&mut events).await {
        SessionEvent::InterimMessage(msg) => {
            assert_eq!(msg.content, "I feel anx");
        }
        other => panic!("expected interim, got {:?}", other),
    }

    match next_non_rms(&mut events).await {
        SessionEvent::Error(msg) => assert_eq!(msg, "quota exceeded"),
        other => panic!("expected error event, got {:?}", other),
    }

    session.disconnect().await.unwrap();
}

#[tokio::test]
async fn test_abnormal_close_reconnects_within_budget() {
    // P2: a non-normal close triggers exactly max_attempts reconnection
    // attempts, then a single ReconnectionFailed
    let (listener, endpoint) = bind().await;

    tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();

        let _ = ws.next().await; // session_settings

        ws.close(Some(CloseFrame {
            code: CloseCode::Error,
            reason: "server going away".into(),
        }))
        .await
        .ok();

        // Listener drops here; reconnect attempts are refused
    });

    let session = VoiceSession::new(test_config(endpoint));
    let mut events = session.subscribe();

    session.connect("abc", None).await.unwrap();

    let mut failed_attempts = 0usize;
    let mut saw_disconnect = false;

    loop {
        match next_event(&mut events).await {
            SessionEvent::Disconnected => saw_disconnect = true,
            SessionEvent::Error(msg) if msg.contains("Reconnect attempt") => {
                failed_attempts += 1;
            }
            SessionEvent::ReconnectionFailed => break,
            _ => {}
        }
    }

    assert!(saw_disconnect);
    assert_eq!(failed_attempts, 3);
    assert!(!session.is_connected());

    // ReconnectionFailed fires exactly once
    let second = timeout(Duration::from_millis(400), async {
        loop {
            if let Ok(SessionEvent::ReconnectionFailed) = events.recv().await {
                return;
            }
        }
    })
    .await;
    assert!(second.is_err());

    // The session stays usable: once the service is back, a fresh
    // connect() on the same endpoint is accepted
    let addr = session.config().endpoint.trim_start_matches("ws://").to_string();
    let listener = TcpListener::bind(&addr).await.unwrap();
    tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();
        while let Some(Ok(_)) = ws.next().await {}
    });

    session.connect("abc", None).await.unwrap();
    assert!(session.is_connected());

    session.disconnect().await.unwrap();
    assert!(!session.is_connected());
}

#[tokio::test]
async fn test_normal_close_never_reconnects() {
    let (listener, endpoint) = bind().await;
    let accepts = Arc::new(AtomicUsize::new(0));
    let accepts_server = Arc::clone(&accepts);

    tokio::spawn(async move {
        loop {
            let (stream, _) = match listener.accept().await {
                Ok(conn) => conn,
                Err(_) => break,
            };
            accepts_server.fetch_add(1, Ordering::SeqCst);

            let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();
            let _ = ws.next().await; // session_settings

            ws.close(Some(CloseFrame {
                code: CloseCode::Normal,
                reason: "conversation over".into(),
            }))
            .await
            .ok();
        }
    });

    let session = VoiceSession::new(test_config(endpoint));
    let mut events = session.subscribe();

    session.connect("abc", None).await.unwrap();

    // The server hangs up normally: one Disconnected, then nothing
    loop {
        match next_event(&mut events).await {
            SessionEvent::Disconnected => break,
            _ => {}
        }
    }

    tokio::time::sleep(Duration::from_millis(300)).await;

    assert_eq!(accepts.load(Ordering::SeqCst), 1);
    assert!(!session.is_connected());
}

#[tokio::test]
async fn test_connect_twice_keeps_single_connection() {
    let (listener, endpoint) = bind().await;
    let accepts = Arc::new(AtomicUsize::new(0));
    let accepts_server = Arc::clone(&accepts);

    tokio::spawn(async move {
        let mut sockets = Vec::new();
        loop {
            let (stream, _) = match listener.accept().await {
                Ok(conn) => conn,
                Err(_) => break,
            };
            accepts_server.fetch_add(1, Ordering::SeqCst);

            // Keep every accepted socket alive so closes are client-driven
            let ws = tokio_tungstenite::accept_async(stream).await.unwrap();
            sockets.push(tokio::spawn(async move {
                let mut ws = ws;
                while let Some(Ok(_)) = ws.next().await {}
            }));
        }
    });

    let session = VoiceSession::new(test_config(endpoint));

    session.connect("abc", None).await.unwrap();
    assert!(session.is_connected());

    // A second connect force-closes the first socket and opens a new one
    session.connect("abc", None).await.unwrap();
    assert!(session.is_connected());

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(accepts.load(Ordering::SeqCst), 2);

    session.disconnect().await.unwrap();
    assert!(!session.is_connected());
}
