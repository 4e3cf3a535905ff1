//! Relay connection: decodes control frames into [`SignalingEvents`] callbacks and relays
//! outbound offers, answers and candidates.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use parking_lot::{Mutex, RwLock};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::{
    connect_async,
    tungstenite::{error::ProtocolError as WsProtocolError, Error as WsError, Message},
};
use tracing::{debug, info, trace, warn};
use url::Url;

use crate::protocol::{
    decode_inbound, encode_outbound, Decoded, IceCandidate, Inbound, Outbound, PeerId,
    SessionDescription,
};

#[derive(Debug, Error)]
pub enum SignalingError {
    #[error("invalid relay url {url}: {reason}")]
    InvalidUrl { url: String, reason: String },
    #[error("relay connect failed: {0}")]
    Connect(String),
    #[error("relay connection already open")]
    AlreadyConnected,
}

/// Inbound relay events. Exactly one collaborator receives them, in wire order.
pub trait SignalingEvents: Send + Sync {
    fn on_welcome(&self, _self_id: &PeerId) {}

    /// `is_welcome` is true for peers listed in the welcome, false for later arrivals.
    fn on_peer_discovered(&self, peer_id: PeerId, is_welcome: bool);

    fn on_peer_departed(&self, peer_id: PeerId);

    fn on_ice_candidate(&self, peer_id: PeerId, candidate: IceCandidate);

    fn on_offer(&self, peer_id: PeerId, sdp: SessionDescription);

    fn on_answer(&self, peer_id: PeerId, sdp: SessionDescription);

    /// The relay connection ended without `stop()` being called.
    fn on_relay_closed(&self) {}
}

/// Outbound half of the channel: the only capability peer sessions get.
pub trait Signaler: Send + Sync {
    fn signal_ice_candidate(&self, peer_id: &PeerId, candidate: IceCandidate);
    fn signal_offer(&self, peer_id: &PeerId, sdp: SessionDescription);
    fn signal_answer(&self, peer_id: &PeerId, sdp: SessionDescription);
}

/// Best-effort sender; drops messages while no connection is open.
#[derive(Clone, Default)]
pub struct RelaySender {
    tx: Arc<Mutex<Option<mpsc::UnboundedSender<String>>>>,
}

impl RelaySender {
    pub fn is_connected(&self) -> bool {
        self.tx.lock().is_some()
    }

    fn send(&self, message: Outbound) {
        let guard = self.tx.lock();
        let Some(tx) = guard.as_ref() else {
            debug!(
                kind = message.kind(),
                target_peer = %message.target(),
                "relay not connected; dropping signal"
            );
            return;
        };
        match encode_outbound(&message) {
            Ok(text) => {
                trace!(kind = message.kind(), target_peer = %message.target(), "signal out");
                if tx.send(text).is_err() {
                    debug!(kind = message.kind(), "relay writer gone; dropping signal");
                }
            }
            Err(err) => warn!(error = %err, "failed to encode signal"),
        }
    }
}

impl Signaler for RelaySender {
    fn signal_ice_candidate(&self, peer_id: &PeerId, candidate: IceCandidate) {
        self.send(Outbound::IceCandidate {
            target: peer_id.clone(),
            candidate,
        });
    }

    fn signal_offer(&self, peer_id: &PeerId, sdp: SessionDescription) {
        self.send(Outbound::Offer {
            target: peer_id.clone(),
            sdp,
        });
    }

    fn signal_answer(&self, peer_id: &PeerId, sdp: SessionDescription) {
        self.send(Outbound::Answer {
            target: peer_id.clone(),
            sdp,
        });
    }
}

pub struct SignalingChannel {
    events: Arc<dyn SignalingEvents>,
    sender: RelaySender,
    self_id: Arc<RwLock<Option<PeerId>>>,
    connection: Arc<AtomicU64>,
    reader: Mutex<Option<JoinHandle<()>>>,
}

impl SignalingChannel {
    pub fn new(events: Arc<dyn SignalingEvents>) -> Self {
        Self::with_sender(events, RelaySender::default())
    }

    /// Uses `sender` as the outbound half, so it can be handed out before the channel exists.
    pub fn with_sender(events: Arc<dyn SignalingEvents>, sender: RelaySender) -> Self {
        Self {
            events,
            sender,
            self_id: Arc::new(RwLock::new(None)),
            connection: Arc::new(AtomicU64::new(0)),
            reader: Mutex::new(None),
        }
    }

    pub fn sender(&self) -> RelaySender {
        self.sender.clone()
    }

    pub fn is_connected(&self) -> bool {
        self.sender.is_connected()
    }

    /// Id the relay assigned in its welcome, once received.
    pub fn self_id(&self) -> Option<PeerId> {
        self.self_id.read().clone()
    }

    pub async fn start(&self, address: &str) -> Result<(), SignalingError> {
        if self.sender.is_connected() {
            return Err(SignalingError::AlreadyConnected);
        }
        let url = parse_relay_url(address)?;
        let (ws_stream, _) = connect_async(url.as_str())
            .await
            .map_err(|err| SignalingError::Connect(err.to_string()))?;
        info!(url = %url, "relay connected");
        let (mut ws_write, mut ws_read) = ws_stream.split();

        let (send_tx, mut send_rx) = mpsc::unbounded_channel::<String>();
        let connection = self.connection.fetch_add(1, Ordering::SeqCst) + 1;
        *self.self_id.write() = None;
        *self.sender.tx.lock() = Some(send_tx);

        // The writer owns the sink and exits on its own once its queue closes.
        tokio::spawn(async move {
            while let Some(text) = send_rx.recv().await {
                if let Err(err) = ws_write.send(Message::Text(text)).await {
                    debug!(error = %err, "relay write failed");
                    return;
                }
            }
            let _ = ws_write.close().await;
        });

        let events = Arc::clone(&self.events);
        let self_id = Arc::clone(&self.self_id);
        let sender = self.sender.clone();
        let current = Arc::clone(&self.connection);
        let reader = tokio::spawn(async move {
            while let Some(frame) = ws_read.next().await {
                match frame {
                    Ok(Message::Text(text)) => handle_frame(&text, events.as_ref(), &self_id),
                    Ok(Message::Binary(data)) => match String::from_utf8(data) {
                        Ok(text) => handle_frame(&text, events.as_ref(), &self_id),
                        Err(_) => warn!("dropping non-utf8 binary relay frame"),
                    },
                    Ok(Message::Close(_)) => break,
                    Ok(_) => {}
                    Err(err) => {
                        match &err {
                            WsError::ConnectionClosed
                            | WsError::AlreadyClosed
                            | WsError::Protocol(WsProtocolError::ResetWithoutClosingHandshake) => {
                                debug!(error = %err, "relay connection closed")
                            }
                            _ => warn!(error = %err, "relay connection error"),
                        }
                        break;
                    }
                }
            }
            if current.load(Ordering::SeqCst) == connection {
                sender.tx.lock().take();
                info!("relay connection closed");
                events.on_relay_closed();
            }
        });

        *self.reader.lock() = Some(reader);
        Ok(())
    }

    /// Closes the relay connection. Safe to call repeatedly or before `start`.
    pub fn stop(&self) {
        self.connection.fetch_add(1, Ordering::SeqCst);
        let had_connection = self.sender.tx.lock().take().is_some();
        if let Some(reader) = self.reader.lock().take() {
            reader.abort();
        }
        if had_connection {
            info!("relay connection stopped");
        }
    }
}

impl Signaler for SignalingChannel {
    fn signal_ice_candidate(&self, peer_id: &PeerId, candidate: IceCandidate) {
        self.sender.signal_ice_candidate(peer_id, candidate);
    }

    fn signal_offer(&self, peer_id: &PeerId, sdp: SessionDescription) {
        self.sender.signal_offer(peer_id, sdp);
    }

    fn signal_answer(&self, peer_id: &PeerId, sdp: SessionDescription) {
        self.sender.signal_answer(peer_id, sdp);
    }
}

impl Drop for SignalingChannel {
    fn drop(&mut self) {
        self.stop();
    }
}

pub fn parse_relay_url(raw: &str) -> Result<Url, SignalingError> {
    let url = Url::parse(raw).map_err(|err| SignalingError::InvalidUrl {
        url: raw.to_string(),
        reason: err.to_string(),
    })?;
    match url.scheme() {
        "ws" | "wss" => Ok(url),
        other => Err(SignalingError::InvalidUrl {
            url: raw.to_string(),
            reason: format!("unsupported scheme {other}"),
        }),
    }
}

fn handle_frame(text: &str, events: &dyn SignalingEvents, self_id: &RwLock<Option<PeerId>>) {
    trace!(len = text.len(), "relay frame in");
    let inbound = match decode_inbound(text) {
        Ok(Decoded::Message(inbound)) => inbound,
        Ok(Decoded::Unknown(kind)) => {
            debug!(kind = %kind, "ignoring unknown control message");
            return;
        }
        Err(err) => {
            warn!(error = %err, "dropping control message");
            return;
        }
    };

    match inbound {
        Inbound::Welcome { self_id: id, peers } => {
            info!(self_id = %id, peers = peers.len(), "welcomed by relay");
            *self_id.write() = Some(id.clone());
            events.on_welcome(&id);
            for peer in peers {
                if peer == id {
                    continue;
                }
                events.on_peer_discovered(peer, true);
            }
        }
        Inbound::AddPeer { src } => events.on_peer_discovered(src, false),
        Inbound::RemovePeer { src } => events.on_peer_departed(src),
        Inbound::IceCandidate { src, candidate } => events.on_ice_candidate(src, candidate),
        Inbound::Offer { src, sdp } => events.on_offer(src, sdp),
        Inbound::Answer { src, sdp } => events.on_answer(src, sdp),
    }
}
