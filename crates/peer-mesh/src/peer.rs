//! Per-peer negotiation state machine.
//!
//! A [`PeerSession`] is owned by the session manager's actor and is only ever touched from that
//! task. Work that completes later (descriptor creation, link callbacks) comes back as a
//! [`SessionEvent`] tagged with the session's generation so stale completions can be told apart
//! from current ones.

use std::fmt;
use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{debug, info, trace, warn};

use crate::config::LinkConfig;
use crate::link::{Link, LinkError, LinkEvent, LinkEventSink, LinkFactory};
use crate::protocol::{IceCandidate, PeerId, SessionDescription};
use crate::signaling::Signaler;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// Listed in our welcome: we open the channel and send the offer.
    Offerer,
    /// Announced after us: we wait for its offer.
    Answerer,
}

impl Role {
    pub fn from_discovery(is_welcome: bool) -> Self {
        if is_welcome {
            Role::Offerer
        } else {
            Role::Answerer
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    New,
    Negotiating,
    LinkOpen,
    Closed,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SessionState::New => "new",
            SessionState::Negotiating => "negotiating",
            SessionState::LinkOpen => "link-open",
            SessionState::Closed => "closed",
        };
        f.write_str(name)
    }
}

#[derive(Debug)]
pub struct SessionEvent {
    pub peer_id: PeerId,
    pub generation: u64,
    pub kind: SessionEventKind,
}

#[derive(Debug)]
pub enum SessionEventKind {
    Link(LinkEvent),
    OfferCreated(Result<SessionDescription, LinkError>),
    AnswerCreated(Result<SessionDescription, LinkError>),
}

/// What the owner has to act on after feeding the session an event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionUpdate {
    Ready,
    NotReady,
    Message(String),
}

pub struct PeerSession {
    id: PeerId,
    role: Role,
    generation: u64,
    state: SessionState,
    ready: bool,
    link: Option<Arc<dyn Link>>,
    signaler: Arc<dyn Signaler>,
    events: mpsc::UnboundedSender<SessionEvent>,
}

impl fmt::Debug for PeerSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PeerSession")
            .field("id", &self.id)
            .field("role", &self.role)
            .field("generation", &self.generation)
            .field("state", &self.state)
            .field("ready", &self.ready)
            .field("has_link", &self.link.is_some())
            .finish()
    }
}

impl PeerSession {
    pub fn new(
        id: PeerId,
        role: Role,
        generation: u64,
        signaler: Arc<dyn Signaler>,
        events: mpsc::UnboundedSender<SessionEvent>,
    ) -> Self {
        Self {
            id,
            role,
            generation,
            state: SessionState::New,
            ready: false,
            link: None,
            signaler,
            events,
        }
    }

    pub fn id(&self) -> &PeerId {
        &self.id
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn is_ready(&self) -> bool {
        self.ready
    }

    /// Creates the link. The offerer also opens its data channel and starts building the offer,
    /// which arrives later as [`SessionEventKind::OfferCreated`].
    pub async fn init(
        &mut self,
        factory: &dyn LinkFactory,
        config: &LinkConfig,
    ) -> Result<(), LinkError> {
        if self.state != SessionState::New || self.link.is_some() {
            warn!(peer_id = %self.id, state = %self.state, "session already initialized");
            return Ok(());
        }

        let link = factory
            .create_link(&self.id, config, self.event_sink())
            .await?;
        self.link = Some(Arc::clone(&link));

        match self.role {
            Role::Offerer => {
                link.open_data_channel(&config.data_channel_label, config.ordered)
                    .await?;
                let tx = self.events.clone();
                let peer_id = self.id.clone();
                let generation = self.generation;
                tokio::spawn(async move {
                    let result = link.create_offer().await;
                    let _ = tx.send(SessionEvent {
                        peer_id,
                        generation,
                        kind: SessionEventKind::OfferCreated(result),
                    });
                });
                debug!(peer_id = %self.id, "creating offer");
            }
            Role::Answerer => {
                link.accept_data_channel().await?;
                self.state = SessionState::Negotiating;
                debug!(peer_id = %self.id, "awaiting offer");
            }
        }
        Ok(())
    }

    pub async fn process_offer(&mut self, sdp: SessionDescription) {
        let Some(link) = self.live_link("offer") else {
            return;
        };
        if self.role == Role::Offerer {
            debug!(peer_id = %self.id, "offer received by offering side; forwarding anyway");
        }
        if let Err(err) = link.set_remote_description(sdp).await {
            warn!(peer_id = %self.id, error = %err, "failed to apply remote offer");
            return;
        }
        let tx = self.events.clone();
        let peer_id = self.id.clone();
        let generation = self.generation;
        tokio::spawn(async move {
            let result = link.create_answer().await;
            let _ = tx.send(SessionEvent {
                peer_id,
                generation,
                kind: SessionEventKind::AnswerCreated(result),
            });
        });
    }

    pub async fn process_answer(&mut self, sdp: SessionDescription) {
        let Some(link) = self.live_link("answer") else {
            return;
        };
        if self.role == Role::Answerer {
            debug!(peer_id = %self.id, "answer received by answering side; forwarding anyway");
        }
        if let Err(err) = link.set_remote_description(sdp).await {
            warn!(peer_id = %self.id, error = %err, "failed to apply remote answer");
        }
    }

    pub async fn add_ice_candidate(&mut self, candidate: IceCandidate) {
        let Some(link) = self.live_link("candidate") else {
            return;
        };
        if let Err(err) = link.add_ice_candidate(candidate).await {
            warn!(peer_id = %self.id, error = %err, "failed to add remote candidate");
        }
    }

    /// Returns whether the link accepted the message.
    pub async fn send_msg(&self, text: &str) -> bool {
        let Some(link) = self.link.as_ref() else {
            trace!(peer_id = %self.id, "no link; dropping outbound message");
            return false;
        };
        if self.state == SessionState::Closed {
            return false;
        }
        match link.send_text(text).await {
            Ok(()) => true,
            Err(err) => {
                trace!(peer_id = %self.id, error = %err, "outbound message dropped");
                false
            }
        }
    }

    pub async fn handle_event(&mut self, kind: SessionEventKind) -> Option<SessionUpdate> {
        if self.state == SessionState::Closed {
            trace!(peer_id = %self.id, event = ?kind, "session closed; ignoring event");
            return None;
        }
        match kind {
            SessionEventKind::OfferCreated(Ok(offer)) => {
                self.signaler.signal_offer(&self.id, offer);
                if self.state == SessionState::New {
                    self.state = SessionState::Negotiating;
                }
                None
            }
            SessionEventKind::AnswerCreated(Ok(answer)) => {
                self.signaler.signal_answer(&self.id, answer);
                None
            }
            SessionEventKind::OfferCreated(Err(err)) | SessionEventKind::AnswerCreated(Err(err)) => {
                warn!(peer_id = %self.id, error = %err, "descriptor creation failed");
                None
            }
            SessionEventKind::Link(LinkEvent::LocalCandidate(candidate)) => {
                self.signaler.signal_ice_candidate(&self.id, candidate);
                None
            }
            SessionEventKind::Link(LinkEvent::ChannelOpen) => {
                if self.ready {
                    return None;
                }
                self.state = SessionState::LinkOpen;
                self.ready = true;
                info!(peer_id = %self.id, "direct link open");
                Some(SessionUpdate::Ready)
            }
            SessionEventKind::Link(LinkEvent::ChannelClosed) => {
                info!(peer_id = %self.id, "direct link closed");
                self.close().await
            }
            SessionEventKind::Link(LinkEvent::Message(text)) => Some(SessionUpdate::Message(text)),
        }
    }

    /// Tears the session down. Calling it again is a no-op.
    pub async fn destroy(&mut self) -> Option<SessionUpdate> {
        if self.state == SessionState::Closed {
            return None;
        }
        debug!(peer_id = %self.id, "destroying session");
        self.close().await
    }

    async fn close(&mut self) -> Option<SessionUpdate> {
        self.state = SessionState::Closed;
        if let Some(link) = self.link.take() {
            link.close().await;
        }
        if self.ready {
            self.ready = false;
            Some(SessionUpdate::NotReady)
        } else {
            None
        }
    }

    fn live_link(&self, what: &'static str) -> Option<Arc<dyn Link>> {
        if self.state == SessionState::Closed {
            debug!(peer_id = %self.id, what, "session closed; dropping");
            return None;
        }
        let link = self.link.clone();
        if link.is_none() {
            debug!(peer_id = %self.id, what, "no link yet; dropping");
        }
        link
    }

    fn event_sink(&self) -> LinkEventSink {
        let tx = self.events.clone();
        let peer_id = self.id.clone();
        let generation = self.generation;
        LinkEventSink::new(move |event| {
            let _ = tx.send(SessionEvent {
                peer_id: peer_id.clone(),
                generation,
                kind: SessionEventKind::Link(event),
            });
        })
    }
}
