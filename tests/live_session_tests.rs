//! Duplex websocket transport against a local stub model server.

#![cfg(feature = "live")]

use futures::{SinkExt, StreamExt};
use realtime_transports::{
    AudioFormat, AudioSink, AudioSinkFactory, AudioSource, AudioSourceFactory, FunctionCall,
    LiveConfig, LiveTransport, Result as TransportResult, Transport, TransportEvents,
    TransportMessage, TransportState,
};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::WebSocketStream;
use url::Url;

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();
}

/// Microphone stub producing silent chunks at a steady cadence.
struct SilentMic {
    chunk: usize,
}

impl AudioSource for SilentMic {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        std::thread::sleep(Duration::from_millis(10));
        let n = self.chunk.min(buf.len());
        buf[..n].fill(0);
        Ok(n)
    }
}

struct SilentMicFactory;

impl AudioSourceFactory for SilentMicFactory {
    fn open(&self, format: AudioFormat) -> TransportResult<Box<dyn AudioSource>> {
        Ok(Box::new(SilentMic { chunk: format.chunk_size_bytes() }))
    }
}

/// Microphone stub whose device dies after a few reads.
struct DyingMic {
    chunk: usize,
    reads_left: usize,
}

impl AudioSource for DyingMic {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        if self.reads_left == 0 {
            return Err(std::io::Error::other("mic unplugged"));
        }
        self.reads_left -= 1;
        std::thread::sleep(Duration::from_millis(10));
        let n = self.chunk.min(buf.len());
        buf[..n].fill(0);
        Ok(n)
    }
}

struct DyingMicFactory;

impl AudioSourceFactory for DyingMicFactory {
    fn open(&self, format: AudioFormat) -> TransportResult<Box<dyn AudioSource>> {
        Ok(Box::new(DyingMic { chunk: format.chunk_size_bytes(), reads_left: 2 }))
    }
}

/// Speaker stub forwarding every written frame to the test.
struct RecordingSink {
    tx: mpsc::UnboundedSender<Vec<u8>>,
}

impl AudioSink for RecordingSink {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        let _ = self.tx.send(buf.to_vec());
        Ok(buf.len())
    }
}

struct RecordingSinkFactory {
    tx: mpsc::UnboundedSender<Vec<u8>>,
}

impl AudioSinkFactory for RecordingSinkFactory {
    fn open(&self, _format: AudioFormat) -> TransportResult<Box<dyn AudioSink>> {
        Ok(Box::new(RecordingSink { tx: self.tx.clone() }))
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Ev {
    Connected,
    State(TransportState),
    BotStart,
    BotStop,
    UserStart,
    UserStop,
    Function(FunctionCall),
    Inputs(bool, bool),
    Disconnected(bool),
}

struct Recorder {
    tx: mpsc::UnboundedSender<Ev>,
}

#[async_trait::async_trait]
impl TransportEvents for Recorder {
    async fn on_connected(&self) {
        let _ = self.tx.send(Ev::Connected);
    }

    async fn on_disconnected(&self, reason: Option<&str>) {
        let _ = self.tx.send(Ev::Disconnected(reason.is_some()));
    }

    async fn on_state_changed(&self, state: TransportState) {
        let _ = self.tx.send(Ev::State(state));
    }

    async fn on_bot_started_speaking(&self) {
        let _ = self.tx.send(Ev::BotStart);
    }

    async fn on_bot_stopped_speaking(&self) {
        let _ = self.tx.send(Ev::BotStop);
    }

    async fn on_user_started_speaking(&self) {
        let _ = self.tx.send(Ev::UserStart);
    }

    async fn on_user_stopped_speaking(&self) {
        let _ = self.tx.send(Ev::UserStop);
    }

    async fn on_function_call(&self, call: FunctionCall) {
        let _ = self.tx.send(Ev::Function(call));
    }

    async fn on_inputs_updated(&self, mic_enabled: bool, camera_enabled: bool) {
        let _ = self.tx.send(Ev::Inputs(mic_enabled, camera_enabled));
    }
}

type ServerWs = WebSocketStream<TcpStream>;

/// Bind a listener and hand the accepted websocket to the script.
async fn spawn_server<F, Fut>(script: F) -> Url
where
    F: FnOnce(ServerWs) -> Fut + Send + 'static,
    Fut: std::future::Future<Output = ()> + Send,
{
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let ws = tokio_tungstenite::accept_async(stream).await.unwrap();
        script(ws).await;
    });
    Url::parse(&format!("ws://{addr}/live")).unwrap()
}

/// Read text frames until one satisfies the predicate, skipping the rest
/// (captured-audio frames arrive interleaved with everything else).
async fn next_json_matching(
    ws: &mut ServerWs,
    pred: impl Fn(&Value) -> bool,
) -> Value {
    loop {
        let msg = tokio::time::timeout(Duration::from_secs(5), ws.next())
            .await
            .expect("timed out waiting for client frame")
            .expect("socket closed early")
            .unwrap();
        if let Message::Text(text) = msg {
            let value: Value = serde_json::from_str(&text).unwrap();
            if pred(&value) {
                return value;
            }
        }
    }
}

async fn send_json(ws: &mut ServerWs, value: Value) {
    ws.send(Message::Text(value.to_string().into())).await.unwrap();
}

async fn expect_event(rx: &mut mpsc::UnboundedReceiver<Ev>, expected: Ev) {
    loop {
        let event = tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .unwrap_or_else(|_| panic!("timed out waiting for {expected:?}"))
            .expect("event channel closed");
        if event == expected {
            return;
        }
    }
}

fn make_transport(
    url: Url,
    events: Arc<dyn TransportEvents>,
    sink_tx: mpsc::UnboundedSender<Vec<u8>>,
) -> LiveTransport {
    let config = LiveConfig::new(url, json!({"model": "stub"}))
        .with_initial_message("hello there");
    LiveTransport::new(
        config,
        events,
        Arc::new(SilentMicFactory),
        Arc::new(RecordingSinkFactory { tx: sink_tx }),
    )
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn setup_handshake_reaches_ready_and_sends_initial_message() -> anyhow::Result<()> {
    init_tracing();
    let (done_tx, done_rx) = tokio::sync::oneshot::channel();
    let (chunk_tx, chunk_rx) = tokio::sync::oneshot::channel();

    let url = spawn_server(|mut ws| async move {
        let setup = next_json_matching(&mut ws, |v| v.get("setup").is_some()).await;
        assert_eq!(setup["setup"]["model"], "stub");

        send_json(&mut ws, json!({"setup_complete": {}})).await;

        // The configured initial message is the first user turn.
        let turn = next_json_matching(&mut ws, |v| v.get("client_content").is_some()).await;
        assert_eq!(turn["client_content"]["turns"][0]["parts"][0]["text"], "hello there");
        assert_eq!(turn["client_content"]["turn_complete"], true);

        // Capture starts streaming once setup completes; the chunk decodes
        // back to the exact captured bytes.
        let input = next_json_matching(&mut ws, |v| v.get("realtime_input").is_some()).await;
        let chunk = &input["realtime_input"]["media_chunks"][0];
        assert_eq!(chunk["mime_type"], "audio/pcm;rate=16000");
        let decoded = {
            use base64::Engine;
            base64::engine::general_purpose::STANDARD
                .decode(chunk["data"].as_str().unwrap())
                .unwrap()
        };
        assert_eq!(decoded, vec![0u8; AudioFormat::pcm16_16khz().chunk_size_bytes()]);
        let _ = chunk_tx.send(());

        // Wait for the client to close.
        while let Some(Ok(msg)) = ws.next().await {
            if let Message::Close(_) = msg {
                break;
            }
        }
        let _ = done_tx.send(());
    })
    .await;

    let (event_tx, mut events) = mpsc::unbounded_channel();
    let (sink_tx, _sink_rx) = mpsc::unbounded_channel();
    let transport = make_transport(url, Arc::new(Recorder { tx: event_tx }), sink_tx);

    transport.connect().await?;
    expect_event(&mut events, Ev::State(TransportState::Connecting)).await;
    expect_event(&mut events, Ev::State(TransportState::Ready)).await;
    expect_event(&mut events, Ev::Connected).await;
    assert_eq!(transport.state(), TransportState::Ready);

    // Disconnecting before the first capture chunk reaches the server would
    // cut the stream assertion short.
    tokio::time::timeout(Duration::from_secs(5), chunk_rx).await??;

    transport.disconnect().await?;
    expect_event(&mut events, Ev::Disconnected(false)).await;
    assert_eq!(transport.state(), TransportState::Disconnected);

    tokio::time::timeout(Duration::from_secs(5), done_rx).await??;
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn model_audio_plays_back_and_talking_edges_fire_once() {
    init_tracing();
    let pcm: Vec<u8> = vec![1, 2, 3, 4, 5, 6, 7, 8];
    let encoded = {
        use base64::Engine;
        base64::engine::general_purpose::STANDARD.encode(&pcm)
    };
    let (audio_seen_tx, audio_seen_rx) = tokio::sync::oneshot::channel::<()>();

    let pcm_for_server = encoded.clone();
    let url = spawn_server(|mut ws| async move {
        next_json_matching(&mut ws, |v| v.get("setup").is_some()).await;
        send_json(&mut ws, json!({"setup_complete": {}})).await;

        send_json(
            &mut ws,
            json!({"server_content": {"model_turn": {"parts": [
                {"inline_data": {"mime_type": "audio/pcm;rate=24000", "data": pcm_for_server}}
            ]}}}),
        )
        .await;

        // Hold barge-in until the test has observed playback, so the
        // queued frame cannot be discarded before it reaches the sink.
        audio_seen_rx.await.unwrap();
        send_json(&mut ws, json!({"server_content": {"interrupted": true}})).await;
        send_json(&mut ws, json!({"server_content": {"interrupted": true}})).await;
        send_json(&mut ws, json!({"server_content": {"turn_complete": true}})).await;
        send_json(
            &mut ws,
            json!({"tool_call": {"function_calls": [
                {"id": "call-1", "name": "get_weather", "args": {"city": "Oslo"}}
            ]}}),
        )
        .await;

        while let Some(Ok(msg)) = ws.next().await {
            if let Message::Close(_) = msg {
                break;
            }
        }
    })
    .await;

    let (event_tx, mut events) = mpsc::unbounded_channel();
    let (sink_tx, mut sink_rx) = mpsc::unbounded_channel();
    let transport = make_transport(url, Arc::new(Recorder { tx: event_tx }), sink_tx);

    transport.connect().await.unwrap();
    expect_event(&mut events, Ev::BotStart).await;

    // Model audio must arrive at the output device byte-identical.
    let played = tokio::time::timeout(Duration::from_secs(5), sink_rx.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(played, pcm);
    audio_seen_tx.send(()).unwrap();

    expect_event(&mut events, Ev::BotStop).await;
    expect_event(&mut events, Ev::UserStart).await;

    // The duplicate interrupt and the turn_complete must produce no further
    // edges; the function call is the next observable event.
    loop {
        let event = tokio::time::timeout(Duration::from_secs(5), events.recv())
            .await
            .unwrap()
            .unwrap();
        match event {
            Ev::Function(call) => {
                assert_eq!(call.id.as_deref(), Some("call-1"));
                assert_eq!(call.name, "get_weather");
                assert_eq!(call.arguments, json!({"city": "Oslo"}));
                break;
            }
            Ev::BotStart | Ev::BotStop | Ev::UserStart | Ev::UserStop => {
                panic!("unexpected talking edge after barge-in: {event:?}");
            }
            _ => {}
        }
    }

    transport.disconnect().await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn send_message_translates_to_wire_frames() {
    init_tracing();
    let (done_tx, done_rx) = tokio::sync::oneshot::channel();

    let url = spawn_server(|mut ws| async move {
        next_json_matching(&mut ws, |v| v.get("setup").is_some()).await;
        send_json(&mut ws, json!({"setup_complete": {}})).await;
        // Skip the configured initial message.
        next_json_matching(&mut ws, |v| v.get("client_content").is_some()).await;

        let text = next_json_matching(&mut ws, |v| v.get("client_content").is_some()).await;
        assert_eq!(text["client_content"]["turns"][0]["parts"][0]["text"], "ping");

        let tool = next_json_matching(&mut ws, |v| v.get("tool_response").is_some()).await;
        let entry = &tool["tool_response"]["function_responses"][0];
        assert_eq!(entry["name"], "get_weather");
        assert_eq!(entry["response"], json!({"temp": 3}));

        let _ = done_tx.send(());
        while let Some(Ok(msg)) = ws.next().await {
            if let Message::Close(_) = msg {
                break;
            }
        }
    })
    .await;

    let (event_tx, mut events) = mpsc::unbounded_channel();
    let (sink_tx, _sink_rx) = mpsc::unbounded_channel();
    let transport = make_transport(url, Arc::new(Recorder { tx: event_tx }), sink_tx);

    transport.connect().await.unwrap();
    expect_event(&mut events, Ev::Connected).await;

    transport
        .send_message(TransportMessage::new("send-text", json!({"text": "ping"})))
        .await
        .unwrap();
    transport
        .send_message(TransportMessage::new(
            "function-result",
            json!({"name": "get_weather", "response": {"temp": 3}}),
        ))
        .await
        .unwrap();

    let err = transport
        .send_message(TransportMessage::new("set-avatar", json!({})))
        .await
        .unwrap_err();
    assert!(matches!(err, realtime_transports::TransportError::Unsupported(_)));

    tokio::time::timeout(Duration::from_secs(5), done_rx).await.unwrap().unwrap();
    transport.disconnect().await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn server_initiated_close_ends_the_session() {
    init_tracing();

    let url = spawn_server(|mut ws| async move {
        next_json_matching(&mut ws, |v| v.get("setup").is_some()).await;
        send_json(&mut ws, json!({"setup_complete": {}})).await;
        ws.close(None).await.unwrap();
    })
    .await;

    let (event_tx, mut events) = mpsc::unbounded_channel();
    let (sink_tx, _sink_rx) = mpsc::unbounded_channel();
    let transport = make_transport(url, Arc::new(Recorder { tx: event_tx }), sink_tx);

    transport.connect().await.unwrap();
    expect_event(&mut events, Ev::Disconnected(false)).await;

    // Operations after the session ended fail cleanly.
    let err = transport
        .send_message(TransportMessage::new("send-text", json!({"text": "late"})))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        realtime_transports::TransportError::SessionClosed
            | realtime_transports::TransportError::NotInitialized
    ));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn capture_device_failure_ends_the_session() {
    init_tracing();

    let url = spawn_server(|mut ws| async move {
        next_json_matching(&mut ws, |v| v.get("setup").is_some()).await;
        send_json(&mut ws, json!({"setup_complete": {}})).await;
        while ws.next().await.is_some() {}
    })
    .await;

    let (event_tx, mut events) = mpsc::unbounded_channel();
    let (sink_tx, _sink_rx) = mpsc::unbounded_channel();
    let transport = LiveTransport::new(
        LiveConfig::new(url, json!({"model": "stub"})),
        Arc::new(Recorder { tx: event_tx }),
        Arc::new(DyingMicFactory),
        Arc::new(RecordingSinkFactory { tx: sink_tx }),
    );

    transport.connect().await.unwrap();

    // The device error tears the whole session down with a reason, not just
    // an error notification on a still-running session.
    expect_event(&mut events, Ev::Disconnected(true)).await;
    assert_eq!(transport.state(), TransportState::Error);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn enable_mic_notifies_only_on_change() {
    init_tracing();

    let url = spawn_server(|mut ws| async move {
        next_json_matching(&mut ws, |v| v.get("setup").is_some()).await;
        send_json(&mut ws, json!({"setup_complete": {}})).await;
        while let Some(Ok(msg)) = ws.next().await {
            if let Message::Close(_) = msg {
                break;
            }
        }
    })
    .await;

    let (event_tx, mut events) = mpsc::unbounded_channel();
    let (sink_tx, _sink_rx) = mpsc::unbounded_channel();
    let transport = make_transport(url, Arc::new(Recorder { tx: event_tx }), sink_tx);

    transport.connect().await.unwrap();
    expect_event(&mut events, Ev::Connected).await;

    // The session starts with the mic on, so re-enabling must stay silent;
    // the first inputs notification observed is the disable.
    transport.enable_mic(true).await.unwrap();
    transport.enable_mic(false).await.unwrap();
    loop {
        let event = tokio::time::timeout(Duration::from_secs(5), events.recv())
            .await
            .unwrap()
            .unwrap();
        if let Ev::Inputs(mic_enabled, camera_enabled) = event {
            assert!(!mic_enabled, "no-op enable must not notify");
            assert!(!camera_enabled);
            break;
        }
    }

    transport.disconnect().await.unwrap();
}

#[tokio::test]
async fn camera_is_unsupported_on_the_websocket_path() {
    let (sink_tx, _sink_rx) = mpsc::unbounded_channel();
    let transport = make_transport(
        Url::parse("ws://127.0.0.1:1/live").unwrap(),
        Arc::new(realtime_transports::NoOpEvents),
        sink_tx,
    );

    let err = transport
        .enable_camera(Some(realtime_transports::CameraMode::Front))
        .await
        .unwrap_err();
    assert!(matches!(err, realtime_transports::TransportError::Unsupported(_)));
    assert!(transport.enable_camera(None).await.is_ok());
}
