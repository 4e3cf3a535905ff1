//! Relay control protocol.
//!
//! One JSON object per text frame, discriminated by `type`. Inbound messages name their sender
//! in `src`; outbound messages name their addressee in `target`. Candidate and descriptor
//! payloads use the browser `RTCIceCandidateInit` / `RTCSessionDescriptionInit` shapes so that
//! browser clients attached to the same relay interoperate.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Relay-assigned participant identifier.
pub type PeerId = String;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IceCandidate {
    pub candidate: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sdp_mid: Option<String>,
    #[serde(
        rename = "sdpMLineIndex",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub sdp_mline_index: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username_fragment: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SdpKind {
    Offer,
    Answer,
    Pranswer,
    Rollback,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionDescription {
    #[serde(rename = "type")]
    pub kind: SdpKind,
    #[serde(default)]
    pub sdp: String,
}

impl SessionDescription {
    pub fn offer(sdp: impl Into<String>) -> Self {
        Self {
            kind: SdpKind::Offer,
            sdp: sdp.into(),
        }
    }

    pub fn answer(sdp: impl Into<String>) -> Self {
        Self {
            kind: SdpKind::Answer,
            sdp: sdp.into(),
        }
    }
}

/// Messages received from the relay, after `src` validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inbound {
    Welcome { self_id: PeerId, peers: Vec<PeerId> },
    AddPeer { src: PeerId },
    RemovePeer { src: PeerId },
    IceCandidate { src: PeerId, candidate: IceCandidate },
    Offer { src: PeerId, sdp: SessionDescription },
    Answer { src: PeerId, sdp: SessionDescription },
}

/// Messages sent to the relay for forwarding to `target`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type")]
pub enum Outbound {
    #[serde(rename = "ice")]
    IceCandidate {
        target: PeerId,
        #[serde(rename = "iceCandidate")]
        candidate: IceCandidate,
    },
    #[serde(rename = "offer")]
    Offer {
        target: PeerId,
        #[serde(rename = "offer")]
        sdp: SessionDescription,
    },
    #[serde(rename = "answer")]
    Answer {
        target: PeerId,
        #[serde(rename = "answer")]
        sdp: SessionDescription,
    },
}

impl Outbound {
    pub fn target(&self) -> &str {
        match self {
            Outbound::IceCandidate { target, .. }
            | Outbound::Offer { target, .. }
            | Outbound::Answer { target, .. } => target,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Outbound::IceCandidate { .. } => "ice",
            Outbound::Offer { .. } => "offer",
            Outbound::Answer { .. } => "answer",
        }
    }
}

#[derive(Debug)]
pub enum Decoded {
    Message(Inbound),
    /// A well-formed frame whose `type` this client does not know.
    Unknown(String),
}

#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("malformed control message: {0}")]
    Json(#[from] serde_json::Error),
    #[error("{kind} message without src")]
    MissingSource { kind: &'static str },
}

#[derive(Deserialize)]
struct Envelope {
    #[serde(rename = "type")]
    kind: String,
}

#[derive(Deserialize)]
struct WireWelcome {
    id: String,
    #[serde(default)]
    peers: Vec<String>,
}

#[derive(Deserialize)]
struct WirePeer {
    #[serde(default)]
    src: Option<String>,
}

#[derive(Deserialize)]
struct WireIce {
    #[serde(default)]
    src: Option<String>,
    #[serde(rename = "iceCandidate")]
    candidate: IceCandidate,
}

#[derive(Deserialize)]
struct WireOffer {
    #[serde(default)]
    src: Option<String>,
    offer: SessionDescription,
}

#[derive(Deserialize)]
struct WireAnswer {
    #[serde(default)]
    src: Option<String>,
    answer: SessionDescription,
}

pub fn decode_inbound(text: &str) -> Result<Decoded, ProtocolError> {
    let value: serde_json::Value = serde_json::from_str(text)?;
    let envelope: Envelope = serde_json::from_value(value.clone())?;
    let inbound = match envelope.kind.as_str() {
        "welcome" => {
            let msg: WireWelcome = serde_json::from_value(value)?;
            Inbound::Welcome {
                self_id: msg.id,
                peers: msg.peers,
            }
        }
        "addPeer" => {
            let msg: WirePeer = serde_json::from_value(value)?;
            Inbound::AddPeer {
                src: require_src(msg.src, "addPeer")?,
            }
        }
        "removePeer" => {
            let msg: WirePeer = serde_json::from_value(value)?;
            Inbound::RemovePeer {
                src: require_src(msg.src, "removePeer")?,
            }
        }
        "ice" => {
            let msg: WireIce = serde_json::from_value(value)?;
            Inbound::IceCandidate {
                src: require_src(msg.src, "ice")?,
                candidate: msg.candidate,
            }
        }
        "offer" => {
            let msg: WireOffer = serde_json::from_value(value)?;
            Inbound::Offer {
                src: require_src(msg.src, "offer")?,
                sdp: msg.offer,
            }
        }
        "answer" => {
            let msg: WireAnswer = serde_json::from_value(value)?;
            Inbound::Answer {
                src: require_src(msg.src, "answer")?,
                sdp: msg.answer,
            }
        }
        _ => return Ok(Decoded::Unknown(envelope.kind)),
    };
    Ok(Decoded::Message(inbound))
}

pub fn encode_outbound(message: &Outbound) -> Result<String, ProtocolError> {
    Ok(serde_json::to_string(message)?)
}

fn require_src(src: Option<String>, kind: &'static str) -> Result<PeerId, ProtocolError> {
    match src {
        Some(src) if !src.is_empty() => Ok(src),
        _ => Err(ProtocolError::MissingSource { kind }),
    }
}
