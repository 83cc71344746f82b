//! Single-task actor owning the duplex model socket.
//!
//! Every input reaches the session as a [`SessionEvent`] on one unbounded
//! queue: parsed server frames from the socket reader task, captured audio
//! chunks from the capture thread, playback levels from the playback thread,
//! and control calls from the transport. The consuming task handles one
//! event to completion before dequeuing the next, which totally orders
//! websocket writes, talking-state transitions, and callback notifications.

use crate::audio::{
    AudioCapture, AudioFrame, AudioSink, AudioSourceFactory, CaptureObserver, PlaybackQueue,
};
use crate::config::LiveConfig;
use crate::error::{Result, TransportError};
use crate::live::wire::{ClientMessage, FunctionResponse, ServerMessage};
use crate::transport::{FunctionCall, FunctionResult, TransportEvents};
use futures::stream::{SplitSink, StreamExt};
use futures::SinkExt;
use secrecy::ExposeSecret;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

type WsSink = SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, Message>;

/// Inputs to the session loop. Exactly one consumer dequeues these.
#[derive(Debug)]
pub(crate) enum SessionEvent {
    /// A chunk captured from the microphone, with its normalized RMS level.
    CapturedAudio { data: Vec<u8>, level: f32 },
    /// The capture loop died on a device error.
    CaptureFailed(TransportError),
    /// Normalized level of a frame the playback thread just wrote.
    RemoteAudioLevel(f32),
    /// Send a complete user text turn.
    SendText(String),
    /// Send a tool/function result.
    SendFunctionResult(FunctionResult),
    /// Toggle the capture mute flag.
    SetMicMuted(bool),
    /// Close the session. Processed after any already-queued sends.
    Stop,
    /// A parsed inbound server frame.
    Socket(ServerMessage),
    /// The socket closed or failed; terminates the loop.
    SocketClosed { error: Option<String> },
}

/// Handle to a running duplex session.
pub(crate) struct LiveSession {
    tx: mpsc::UnboundedSender<SessionEvent>,
    task: tokio::sync::Mutex<Option<tokio::task::JoinHandle<()>>>,
}

impl LiveSession {
    /// Open the websocket, send the setup message, and start the actor loop
    /// together with its capture and playback pipelines.
    pub(crate) async fn start(
        config: LiveConfig,
        events: Arc<dyn TransportEvents>,
        mic_factory: Arc<dyn AudioSourceFactory>,
        sink: Box<dyn AudioSink>,
    ) -> Result<Self> {
        let mut url = config.ws_url.clone();
        if let Some(key) = &config.api_key {
            url.query_pairs_mut().append_pair("key", key.expose_secret());
        }

        let (ws, _response) = connect_async(url.as_str())
            .await
            .map_err(|e| TransportError::connection(format!("websocket connect failed: {e}")))?;
        tracing::debug!(url = %config.ws_url, "websocket connected");

        let (mut write, mut read) = ws.split();

        // One-time model configuration; the session is not usable until the
        // server acknowledges it with setup_complete.
        send_frame(&mut write, &ClientMessage::setup(config.setup.clone())).await?;

        let (tx, rx) = mpsc::unbounded_channel();
        // Raised by the reader as soon as the peer closes cleanly, so a send
        // racing the close frame is not misread as a failure.
        let close_received = Arc::new(AtomicBool::new(false));

        // Reader task: parse inbound frames and forward them into the queue.
        let reader_tx = tx.clone();
        let reader_close = close_received.clone();
        tokio::spawn(async move {
            let mut close_sent = false;
            while let Some(msg) = read.next().await {
                match msg {
                    Ok(Message::Text(text)) => forward_server_frame(&reader_tx, text.as_bytes()),
                    Ok(Message::Binary(data)) => forward_server_frame(&reader_tx, &data),
                    Ok(Message::Close(frame)) => {
                        tracing::debug!(?frame, "server closed websocket");
                        reader_close.store(true, Ordering::SeqCst);
                        let _ = reader_tx.send(SessionEvent::SocketClosed { error: None });
                        close_sent = true;
                        break;
                    }
                    Ok(_) => {}
                    Err(e) => {
                        let _ = reader_tx
                            .send(SessionEvent::SocketClosed { error: Some(e.to_string()) });
                        close_sent = true;
                        break;
                    }
                }
            }
            if !close_sent {
                reader_close.store(true, Ordering::SeqCst);
                let _ = reader_tx.send(SessionEvent::SocketClosed { error: None });
            }
        });

        let playback_tx = tx.clone();
        let playback = PlaybackQueue::start(
            sink,
            Some(Box::new(move |level| {
                let _ = playback_tx.send(SessionEvent::RemoteAudioLevel(level));
            })),
        )?;

        let capture = AudioCapture::start(
            mic_factory,
            config.input_format,
            Box::new(QueueingObserver { tx: tx.clone() }),
        )?;

        let task = tokio::spawn(run_session_loop(
            rx,
            write,
            capture,
            playback,
            events,
            config,
            close_received,
        ));

        Ok(Self { tx, task: tokio::sync::Mutex::new(Some(task)) })
    }

    pub(crate) fn send_text(&self, text: String) -> Result<()> {
        self.post(SessionEvent::SendText(text))
    }

    pub(crate) fn send_function_result(&self, result: FunctionResult) -> Result<()> {
        self.post(SessionEvent::SendFunctionResult(result))
    }

    pub(crate) fn set_mic_muted(&self, muted: bool) -> Result<()> {
        self.post(SessionEvent::SetMicMuted(muted))
    }

    /// Post the stop event and wait for the loop to finish. The stop is
    /// ordered after any sends already in the queue.
    pub(crate) async fn stop(&self) {
        let _ = self.tx.send(SessionEvent::Stop);
        if let Some(task) = self.task.lock().await.take() {
            if task.await.is_err() {
                tracing::error!("session loop panicked");
            }
        }
    }

    fn post(&self, event: SessionEvent) -> Result<()> {
        self.tx.send(event).map_err(|_| TransportError::SessionClosed)
    }
}

impl std::fmt::Debug for LiveSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LiveSession").field("closed", &self.tx.is_closed()).finish()
    }
}

/// Capture-thread observer that re-posts everything into the event queue.
struct QueueingObserver {
    tx: mpsc::UnboundedSender<SessionEvent>,
}

impl CaptureObserver for QueueingObserver {
    fn on_chunk(&mut self, data: &[u8], level: f32) {
        let _ = self.tx.send(SessionEvent::CapturedAudio { data: data.to_vec(), level });
    }

    fn on_error(&mut self, error: TransportError) {
        let _ = self.tx.send(SessionEvent::CaptureFailed(error));
    }
}

fn forward_server_frame(tx: &mpsc::UnboundedSender<SessionEvent>, raw: &[u8]) {
    match serde_json::from_slice::<ServerMessage>(raw) {
        Ok(frame) => {
            let _ = tx.send(SessionEvent::Socket(frame));
        }
        // Malformed frames are logged and dropped, never fatal.
        Err(e) => tracing::warn!(error = %e, "dropping unparseable server frame"),
    }
}

async fn send_frame(write: &mut WsSink, msg: &ClientMessage) -> Result<()> {
    let text = serde_json::to_string(msg)?;
    write
        .send(Message::Text(text.into()))
        .await
        .map_err(|e| TransportError::connection(format!("websocket send failed: {e}")))
}

async fn run_session_loop(
    mut rx: mpsc::UnboundedReceiver<SessionEvent>,
    mut write: WsSink,
    mut capture: AudioCapture,
    playback: PlaybackQueue,
    events: Arc<dyn TransportEvents>,
    config: LiveConfig,
    close_received: Arc<AtomicBool>,
) {
    // Talking-state flags live only inside this loop.
    let mut bot_talking = false;
    let mut user_talking = false;
    // Audio forwarding is gated until the server acknowledges setup.
    let mut ready = false;

    while let Some(event) = rx.recv().await {
        match event {
            SessionEvent::CapturedAudio { data, level } => {
                events.on_user_audio_level(level).await;
                if !ready {
                    continue;
                }
                let frame = AudioFrame::new(data, config.input_format);
                let msg = ClientMessage::media_chunk(config.input_format, frame.to_base64());
                if let Err(e) = send_frame(&mut write, &msg).await {
                    let error = fatal_unless_closed(e, &close_received, &mut rx);
                    end_session(&mut capture, &playback, &events, error).await;
                    return;
                }
            }
            SessionEvent::CaptureFailed(error) => {
                // The capture device is gone; the session cannot continue.
                end_session(&mut capture, &playback, &events, Some(error)).await;
                return;
            }
            SessionEvent::RemoteAudioLevel(level) => {
                events.on_remote_audio_level(level).await;
            }
            SessionEvent::SendText(text) => {
                if let Err(e) = send_frame(&mut write, &ClientMessage::user_text(text)).await {
                    let error = fatal_unless_closed(e, &close_received, &mut rx);
                    end_session(&mut capture, &playback, &events, error).await;
                    return;
                }
            }
            SessionEvent::SendFunctionResult(result) => {
                let msg = ClientMessage::tool_response(vec![FunctionResponse {
                    id: result.id,
                    name: result.name,
                    response: result.response,
                    will_continue: result.will_continue,
                    scheduling: result.scheduling,
                }]);
                if let Err(e) = send_frame(&mut write, &msg).await {
                    let error = fatal_unless_closed(e, &close_received, &mut rx);
                    end_session(&mut capture, &playback, &events, error).await;
                    return;
                }
            }
            SessionEvent::SetMicMuted(muted) => {
                capture.set_muted(muted);
            }
            SessionEvent::Stop => {
                capture.stop();
                playback.interrupt();
                playback.stop();
                let close = Message::Close(Some(CloseFrame {
                    code: CloseCode::Normal,
                    reason: "session closed".into(),
                }));
                if let Err(e) = write.send(close).await {
                    tracing::debug!(error = %e, "close frame not delivered");
                }
                events.on_disconnected(None).await;
                return;
            }
            SessionEvent::SocketClosed { error } => {
                end_session(&mut capture, &playback, &events, error.map(TransportError::connection))
                    .await;
                return;
            }
            SessionEvent::Socket(frame) => {
                if let Some(err) = handle_server_frame(
                    frame,
                    &mut write,
                    &playback,
                    &events,
                    &config,
                    &mut ready,
                    &mut bot_talking,
                    &mut user_talking,
                )
                .await
                {
                    let error = fatal_unless_closed(err, &close_received, &mut rx);
                    end_session(&mut capture, &playback, &events, error).await;
                    return;
                }
            }
        }
    }

    // All senders dropped without an explicit stop.
    end_session(&mut capture, &playback, &events, None).await;
}

/// Classify a websocket send failure. A failure after the peer's close
/// frame was received (or is already sitting in the queue) is a normal
/// shutdown, not an error.
fn fatal_unless_closed(
    error: TransportError,
    close_received: &AtomicBool,
    rx: &mut mpsc::UnboundedReceiver<SessionEvent>,
) -> Option<TransportError> {
    if close_received.load(Ordering::SeqCst) {
        return None;
    }
    while let Ok(event) = rx.try_recv() {
        if matches!(event, SessionEvent::SocketClosed { error: None }) {
            return None;
        }
    }
    Some(error)
}

/// Handle one inbound server frame. Returns the fatal error, if any.
#[allow(clippy::too_many_arguments)]
async fn handle_server_frame(
    frame: ServerMessage,
    write: &mut WsSink,
    playback: &PlaybackQueue,
    events: &Arc<dyn TransportEvents>,
    config: &LiveConfig,
    ready: &mut bool,
    bot_talking: &mut bool,
    user_talking: &mut bool,
) -> Option<TransportError> {
    if frame.setup_complete.is_some() && !*ready {
        *ready = true;
        tracing::info!("session setup complete");
        if let Some(text) = &config.initial_message {
            if let Err(e) = send_frame(write, &ClientMessage::user_text(text.clone())).await {
                return Some(e);
            }
        }
        events.on_connected().await;
        events.on_bot_ready().await;
    }

    if let Some(content) = frame.server_content {
        if content.interrupted == Some(true) {
            // Barge-in: discard queued model audio before anything else.
            playback.interrupt();
            if *bot_talking {
                *bot_talking = false;
                events.on_bot_stopped_speaking().await;
            }
            if !*user_talking {
                *user_talking = true;
                events.on_user_started_speaking().await;
            }
        }

        if let Some(turn) = content.model_turn {
            let mut audio_enqueued = false;
            for part in turn.parts {
                if let Some(text) = part.text {
                    tracing::debug!(%text, "model text part");
                }
                if let Some(inline) = part.inline_data {
                    match AudioFrame::from_base64(&inline.data, config.output_format) {
                        Ok(audio_frame) => {
                            playback.write(audio_frame.data);
                            audio_enqueued = true;
                        }
                        Err(e) => {
                            tracing::warn!(error = %e, "dropping undecodable audio part");
                        }
                    }
                }
            }
            if audio_enqueued {
                if !*bot_talking {
                    *bot_talking = true;
                    events.on_bot_started_speaking().await;
                }
                if *user_talking {
                    *user_talking = false;
                    events.on_user_stopped_speaking().await;
                }
            }
        }

        if content.turn_complete == Some(true) {
            if *bot_talking {
                *bot_talking = false;
                events.on_bot_stopped_speaking().await;
            }
            if !*user_talking {
                *user_talking = true;
                events.on_user_started_speaking().await;
            }
        }
    }

    if let Some(tool_call) = frame.tool_call {
        for call in tool_call.function_calls {
            events
                .on_function_call(FunctionCall {
                    id: call.id,
                    name: call.name,
                    arguments: call.args.unwrap_or(serde_json::Value::Null),
                })
                .await;
        }
    }

    None
}

/// Tear the pipelines down and emit the session-ended notification. Every
/// loop exit path funnels through here exactly once.
async fn end_session(
    capture: &mut AudioCapture,
    playback: &PlaybackQueue,
    events: &Arc<dyn TransportEvents>,
    error: Option<TransportError>,
) {
    capture.stop();
    playback.interrupt();
    playback.stop();
    match error {
        Some(e) => {
            tracing::warn!(error = %e, "session ended with error");
            events.on_error(&e).await;
            events.on_disconnected(Some(&e.to_string())).await;
        }
        None => events.on_disconnected(None).await,
    }
}
