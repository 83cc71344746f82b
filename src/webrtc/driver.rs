//! I/O driver for the sans-IO peer connection.
//!
//! Owns the `Rtc` state machine outright: timers, UDP ingress/egress, state
//! events, and control-channel writes all happen on this task. The session
//! talks to it only through the command and close channels.

use crate::error::TransportError;
use crate::tracks::{MediaTrack, TrackKind, TrackRegistry, TrackSet};
use crate::transport::{TransportEvents, TransportMessage};
use parking_lot::Mutex;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;
use str0m::channel::ChannelId;
use str0m::media::MediaKind;
use str0m::net::{Protocol, Receive};
use str0m::{Event, Input, Output, Rtc};
use tokio::net::UdpSocket;
use tokio::sync::mpsc;

/// Cap on messages queued while the control channel is still opening.
const MAX_PENDING_CONTROL: usize = 50;

/// Commands from the session to the driver.
#[derive(Debug)]
pub(crate) enum DriverCommand {
    /// Write a JSON payload to the control channel; queued until open.
    SendControl(String),
}

#[allow(clippy::too_many_arguments)]
pub(crate) async fn run(
    mut rtc: Rtc,
    socket: UdpSocket,
    local_addr: SocketAddr,
    channel_id: ChannelId,
    mut cmd_rx: mpsc::Receiver<DriverCommand>,
    mut close_rx: mpsc::Receiver<()>,
    events: Arc<dyn TransportEvents>,
    registry: Arc<TrackRegistry>,
    tracks: Arc<Mutex<TrackSet>>,
) {
    let mut buf = vec![0u8; 2000];
    let mut channel_open = false;
    let mut pending: Vec<String> = Vec::new();
    let mut failure: Option<TransportError> = None;

    'driver: loop {
        // Drain the state machine before sleeping.
        let deadline = loop {
            match rtc.poll_output() {
                Ok(Output::Timeout(deadline)) => break deadline,
                Ok(Output::Transmit(transmit)) => {
                    if let Err(e) = socket.send_to(&transmit.contents, transmit.destination).await
                    {
                        tracing::warn!(error = %e, "UDP send failed");
                    }
                }
                Ok(Output::Event(event)) => {
                    handle_event(
                        event,
                        &mut rtc,
                        channel_id,
                        &mut channel_open,
                        &mut pending,
                        &events,
                        &registry,
                        &tracks,
                    )
                    .await;
                }
                Err(e) => {
                    failure =
                        Some(TransportError::connection(format!("peer connection failed: {e}")));
                    break 'driver;
                }
            }
        };

        if !rtc.is_alive() {
            break;
        }

        let wait = deadline.saturating_duration_since(Instant::now());
        tokio::select! {
            _ = tokio::time::sleep(wait) => {
                if let Err(e) = rtc.handle_input(Input::Timeout(Instant::now())) {
                    failure = Some(TransportError::connection(format!("timer handling failed: {e}")));
                    break;
                }
            }
            received = socket.recv_from(&mut buf) => match received {
                Ok((n, source)) => match buf[..n].try_into() {
                    Ok(contents) => {
                        let input = Input::Receive(
                            Instant::now(),
                            Receive {
                                proto: Protocol::Udp,
                                source,
                                destination: local_addr,
                                contents,
                            },
                        );
                        // Stray datagrams (wrong peer, bad STUN) are not fatal.
                        if let Err(e) = rtc.handle_input(input) {
                            tracing::warn!(error = %e, "dropped inbound datagram");
                        }
                    }
                    Err(e) => tracing::warn!(error = %e, "undecodable datagram"),
                },
                Err(e) => {
                    failure = Some(TransportError::connection(format!("UDP receive failed: {e}")));
                    break;
                }
            },
            cmd = cmd_rx.recv() => match cmd {
                Some(DriverCommand::SendControl(json)) => {
                    if channel_open {
                        write_control(&mut rtc, channel_id, &json);
                    } else if pending.len() < MAX_PENDING_CONTROL {
                        tracing::debug!("control channel not open, queuing message");
                        pending.push(json);
                    } else {
                        tracing::error!("control queue full, dropping message");
                    }
                }
                None => rtc.disconnect(),
            },
            _ = close_rx.recv() => rtc.disconnect(),
        }
    }

    clear_remote_tracks(&registry, &tracks);

    match failure {
        Some(e) => {
            tracing::warn!(error = %e, "peer connection ended with error");
            events.on_error(&e).await;
            events.on_disconnected(Some(&e.to_string())).await;
        }
        None => events.on_disconnected(None).await,
    }
}

/// Register a fresh remote track for `kind`, unregistering the track it
/// replaces. Returns the new snapshot and whether this is the session's
/// first remote track.
fn merge_remote_track(
    kind: TrackKind,
    registry: &TrackRegistry,
    tracks: &Mutex<TrackSet>,
) -> (TrackSet, bool) {
    let track = MediaTrack::remote(kind);
    registry.register(track.clone());
    let (snapshot, first_remote, replaced) = {
        let mut set = tracks.lock();
        let was_empty = set.remote.audio.is_none() && set.remote.video.is_none();
        let replaced = set.remote.set(kind, Some(track));
        (set.clone(), was_empty, replaced)
    };
    if let Some(old) = replaced {
        registry.unregister(&old.id);
    }
    (snapshot, first_remote)
}

/// Unregister all remote tracks and clear their snapshot slots. Runs on
/// every driver exit so disposal never leaks registry entries.
fn clear_remote_tracks(registry: &TrackRegistry, tracks: &Mutex<TrackSet>) {
    let remote = std::mem::take(&mut tracks.lock().remote);
    for track in [remote.audio, remote.video].into_iter().flatten() {
        registry.unregister(&track.id);
    }
}


#[allow(clippy::too_many_arguments)]
async fn handle_event(
    event: Event,
    rtc: &mut Rtc,
    channel_id: ChannelId,
    channel_open: &mut bool,
    pending: &mut Vec<String>,
    events: &Arc<dyn TransportEvents>,
    registry: &Arc<TrackRegistry>,
    tracks: &Arc<Mutex<TrackSet>>,
) {
    match event {
        Event::Connected => {
            tracing::info!("peer connection established");
        }
        Event::ChannelOpen(id, label) => {
            if id == channel_id {
                tracing::info!(%label, queued = pending.len(), "control channel open");
                *channel_open = true;
                for json in pending.drain(..) {
                    write_control(rtc, channel_id, &json);
                }
                events.on_connected().await;
            }
        }
        Event::ChannelData(data) => {
            if data.id != channel_id {
                return;
            }
            match serde_json::from_slice::<TransportMessage>(&data.data) {
                Ok(message) => {
                    if message.msg_type == "bot-ready" {
                        events.on_bot_ready().await;
                    } else {
                        events.on_message(message).await;
                    }
                }
                // Malformed control messages are logged and dropped.
                Err(e) => tracing::warn!(error = %e, "dropping undecodable control message"),
            }
        }
        Event::ChannelClose(id) => {
            if id == channel_id {
                tracing::debug!("control channel closed");
                *channel_open = false;
            }
        }
        Event::MediaAdded(media) => {
            let kind = match media.kind {
                MediaKind::Audio => TrackKind::Audio,
                MediaKind::Video => TrackKind::Video,
            };
            let (snapshot, first_remote) = merge_remote_track(kind, registry, tracks);
            tracing::debug!(mid = %media.mid, ?kind, "remote track added");
            if first_remote {
                events.on_participant_joined(&media.mid.to_string()).await;
            }
            events.on_tracks_updated(&snapshot).await;
        }
        Event::IceConnectionStateChange(state) => {
            tracing::debug!(?state, "ICE connection state changed");
        }
        _ => {}
    }
}

fn write_control(rtc: &mut Rtc, id: ChannelId, json: &str) {
    match rtc.channel(id) {
        Some(mut channel) => {
            if let Err(e) = channel.write(false, json.as_bytes()) {
                tracing::error!(error = %e, "control channel write failed");
            }
        }
        None => tracing::error!("control channel not available"),
    }
}
