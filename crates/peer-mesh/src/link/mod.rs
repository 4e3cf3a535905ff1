//! Direct-link capability.
//!
//! The peer session drives link establishment through these traits and never touches the
//! underlying ICE/DTLS/SCTP machinery itself. Lifecycle changes, locally gathered candidates
//! and inbound messages flow back through the [`LinkEventSink`] handed to the factory.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

use crate::config::LinkConfig;
use crate::protocol::{IceCandidate, PeerId, SessionDescription};

pub mod mock;
pub mod rtc;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum LinkError {
    #[error("link setup failed: {0}")]
    Setup(String),
    #[error("descriptor negotiation failed: {0}")]
    Negotiation(String),
    #[error("candidate rejected: {0}")]
    Candidate(String),
    #[error("send failed: {0}")]
    Send(String),
    #[error("data channel not open")]
    NotOpen,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkEvent {
    /// A candidate gathered locally that the remote side needs.
    LocalCandidate(IceCandidate),
    ChannelOpen,
    ChannelClosed,
    Message(String),
}

/// Observer for one link's events.
#[derive(Clone)]
pub struct LinkEventSink {
    emit: Arc<dyn Fn(LinkEvent) + Send + Sync>,
}

impl LinkEventSink {
    pub fn new(emit: impl Fn(LinkEvent) + Send + Sync + 'static) -> Self {
        Self {
            emit: Arc::new(emit),
        }
    }

    pub fn emit(&self, event: LinkEvent) {
        (self.emit)(event);
    }
}

impl fmt::Debug for LinkEventSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LinkEventSink").finish_non_exhaustive()
    }
}

#[async_trait]
pub trait LinkFactory: Send + Sync {
    async fn create_link(
        &self,
        peer_id: &PeerId,
        config: &LinkConfig,
        events: LinkEventSink,
    ) -> Result<Arc<dyn Link>, LinkError>;
}

#[async_trait]
pub trait Link: Send + Sync {
    /// Opens the outbound data channel (offerer side).
    async fn open_data_channel(&self, label: &str, ordered: bool) -> Result<(), LinkError>;

    /// Adopts the data channel the remote side opens (answerer side).
    async fn accept_data_channel(&self) -> Result<(), LinkError>;

    /// Creates a local offer and applies it as the local description.
    async fn create_offer(&self) -> Result<SessionDescription, LinkError>;

    /// Creates a local answer and applies it as the local description.
    async fn create_answer(&self) -> Result<SessionDescription, LinkError>;

    async fn set_remote_description(&self, sdp: SessionDescription) -> Result<(), LinkError>;

    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<(), LinkError>;

    async fn send_text(&self, text: &str) -> Result<(), LinkError>;

    async fn close(&self);
}
