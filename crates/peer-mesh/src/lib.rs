//! Direct peer-to-peer text links negotiated over a shared signaling relay.
//!
//! Every participant connects to the relay, learns who else is present, and negotiates one
//! direct data link per peer. Application messages then travel peer to peer; the relay only
//! ever carries offers, answers and candidates.

pub mod config;
pub mod engine;
pub mod error;
pub mod link;
pub mod manager;
pub mod peer;
pub mod protocol;
pub mod signaling;
pub mod telemetry;

pub use config::{IceServer, LinkConfig, LinkConfigBuilder, MeshConfig};
pub use engine::MeshEngine;
pub use error::MeshError;
pub use link::{Link, LinkError, LinkEvent, LinkEventSink, LinkFactory};
pub use manager::{ManagerHandle, ManagerSnapshot, PeerSnapshot};
pub use peer::{Role, SessionState};
pub use protocol::{IceCandidate, PeerId, SdpKind, SessionDescription};
pub use signaling::{SignalingChannel, SignalingError, SignalingEvents, Signaler};
