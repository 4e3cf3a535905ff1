//! WebRTC-backed links built on the `webrtc` crate.

use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tracing::{debug, trace, warn};
use webrtc::api::APIBuilder;
use webrtc::data_channel::data_channel_init::RTCDataChannelInit;
use webrtc::data_channel::data_channel_message::DataChannelMessage;
use webrtc::data_channel::data_channel_state::RTCDataChannelState;
use webrtc::data_channel::RTCDataChannel;
use webrtc::ice_transport::ice_candidate::{RTCIceCandidate, RTCIceCandidateInit};
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::RTCPeerConnection;

use super::{Link, LinkError, LinkEvent, LinkEventSink, LinkFactory};
use crate::config::{IceServer, LinkConfig};
use crate::protocol::{IceCandidate, PeerId, SdpKind, SessionDescription};

#[derive(Debug, Default, Clone, Copy)]
pub struct WebRtcLinkFactory;

impl WebRtcLinkFactory {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl LinkFactory for WebRtcLinkFactory {
    async fn create_link(
        &self,
        peer_id: &PeerId,
        config: &LinkConfig,
        events: LinkEventSink,
    ) -> Result<Arc<dyn Link>, LinkError> {
        let api = APIBuilder::new().build();
        let rtc_config = RTCConfiguration {
            ice_servers: config.ice_servers.iter().map(to_rtc_ice_server).collect(),
            ..Default::default()
        };
        let peer_connection = Arc::new(
            api.new_peer_connection(rtc_config)
                .await
                .map_err(|err| LinkError::Setup(err.to_string()))?,
        );

        let candidate_sink = events.clone();
        let candidate_peer = peer_id.clone();
        peer_connection.on_ice_candidate(Box::new(move |candidate: Option<RTCIceCandidate>| {
            let sink = candidate_sink.clone();
            let peer = candidate_peer.clone();
            Box::pin(async move {
                let Some(candidate) = candidate else {
                    trace!(peer_id = %peer, "candidate gathering complete");
                    return;
                };
                match candidate.to_json() {
                    Ok(init) => sink.emit(LinkEvent::LocalCandidate(from_rtc_candidate(init))),
                    Err(err) => {
                        warn!(peer_id = %peer, error = %err, "failed to serialize local candidate")
                    }
                }
            })
        }));

        let state_peer = peer_id.clone();
        peer_connection.on_peer_connection_state_change(Box::new(
            move |state: RTCPeerConnectionState| {
                let peer = state_peer.clone();
                Box::pin(async move {
                    debug!(peer_id = %peer, state = %state, "peer connection state changed");
                })
            },
        ));

        Ok(Arc::new(WebRtcLink {
            peer_id: peer_id.clone(),
            peer_connection,
            channel: Arc::new(Mutex::new(None)),
            events,
        }))
    }
}

pub struct WebRtcLink {
    peer_id: PeerId,
    peer_connection: Arc<RTCPeerConnection>,
    channel: Arc<Mutex<Option<Arc<RTCDataChannel>>>>,
    events: LinkEventSink,
}

#[async_trait]
impl Link for WebRtcLink {
    async fn open_data_channel(&self, label: &str, ordered: bool) -> Result<(), LinkError> {
        let init = RTCDataChannelInit {
            ordered: Some(ordered),
            ..Default::default()
        };
        let channel = self
            .peer_connection
            .create_data_channel(label, Some(init))
            .await
            .map_err(|err| LinkError::Setup(err.to_string()))?;
        wire_channel(&self.peer_id, &channel, &self.events);
        *self.channel.lock() = Some(channel);
        Ok(())
    }

    async fn accept_data_channel(&self) -> Result<(), LinkError> {
        let slot = Arc::clone(&self.channel);
        let events = self.events.clone();
        let peer = self.peer_id.clone();
        self.peer_connection
            .on_data_channel(Box::new(move |channel: Arc<RTCDataChannel>| {
                let slot = Arc::clone(&slot);
                let events = events.clone();
                let peer = peer.clone();
                Box::pin(async move {
                    debug!(peer_id = %peer, label = channel.label(), "inbound data channel");
                    wire_channel(&peer, &channel, &events);
                    *slot.lock() = Some(channel);
                })
            }));
        Ok(())
    }

    async fn create_offer(&self) -> Result<SessionDescription, LinkError> {
        let offer = self
            .peer_connection
            .create_offer(None)
            .await
            .map_err(|err| LinkError::Negotiation(err.to_string()))?;
        let sdp = offer.sdp.clone();
        self.peer_connection
            .set_local_description(offer)
            .await
            .map_err(|err| LinkError::Negotiation(err.to_string()))?;
        Ok(SessionDescription::offer(sdp))
    }

    async fn create_answer(&self) -> Result<SessionDescription, LinkError> {
        let answer = self
            .peer_connection
            .create_answer(None)
            .await
            .map_err(|err| LinkError::Negotiation(err.to_string()))?;
        let sdp = answer.sdp.clone();
        self.peer_connection
            .set_local_description(answer)
            .await
            .map_err(|err| LinkError::Negotiation(err.to_string()))?;
        Ok(SessionDescription::answer(sdp))
    }

    async fn set_remote_description(&self, sdp: SessionDescription) -> Result<(), LinkError> {
        let description = to_rtc_description(sdp)?;
        self.peer_connection
            .set_remote_description(description)
            .await
            .map_err(|err| LinkError::Negotiation(err.to_string()))
    }

    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<(), LinkError> {
        let init = RTCIceCandidateInit {
            candidate: candidate.candidate,
            sdp_mid: candidate.sdp_mid,
            sdp_mline_index: candidate.sdp_mline_index,
            username_fragment: candidate.username_fragment,
        };
        self.peer_connection
            .add_ice_candidate(init)
            .await
            .map_err(|err| LinkError::Candidate(err.to_string()))
    }

    async fn send_text(&self, text: &str) -> Result<(), LinkError> {
        let channel = self.channel.lock().clone().ok_or(LinkError::NotOpen)?;
        if channel.ready_state() != RTCDataChannelState::Open {
            return Err(LinkError::NotOpen);
        }
        channel
            .send_text(text.to_string())
            .await
            .map(|_| ())
            .map_err(|err| LinkError::Send(err.to_string()))
    }

    async fn close(&self) {
        if let Err(err) = self.peer_connection.close().await {
            debug!(peer_id = %self.peer_id, error = %err, "peer connection close failed");
        }
    }
}

fn wire_channel(peer_id: &PeerId, channel: &Arc<RTCDataChannel>, events: &LinkEventSink) {
    let open_sink = events.clone();
    let open_peer = peer_id.clone();
    channel.on_open(Box::new(move || {
        let sink = open_sink.clone();
        let peer = open_peer.clone();
        Box::pin(async move {
            debug!(peer_id = %peer, "data channel open");
            sink.emit(LinkEvent::ChannelOpen);
        })
    }));

    let close_sink = events.clone();
    let close_peer = peer_id.clone();
    channel.on_close(Box::new(move || {
        let sink = close_sink.clone();
        let peer = close_peer.clone();
        Box::pin(async move {
            debug!(peer_id = %peer, "data channel closed");
            sink.emit(LinkEvent::ChannelClosed);
        })
    }));

    let message_sink = events.clone();
    let message_peer = peer_id.clone();
    channel.on_message(Box::new(move |message: DataChannelMessage| {
        let sink = message_sink.clone();
        let peer = message_peer.clone();
        Box::pin(async move {
            match String::from_utf8(message.data.to_vec()) {
                Ok(text) => sink.emit(LinkEvent::Message(text)),
                Err(_) => warn!(
                    peer_id = %peer,
                    len = message.data.len(),
                    "dropping non-utf8 data channel message"
                ),
            }
        })
    }));
}

fn to_rtc_ice_server(server: &IceServer) -> RTCIceServer {
    RTCIceServer {
        urls: server.urls.clone(),
        username: server.username.clone().unwrap_or_default(),
        credential: server.credential.clone().unwrap_or_default(),
        ..Default::default()
    }
}

fn from_rtc_candidate(init: RTCIceCandidateInit) -> IceCandidate {
    IceCandidate {
        candidate: init.candidate,
        sdp_mid: init.sdp_mid,
        sdp_mline_index: init.sdp_mline_index,
        username_fragment: init.username_fragment,
    }
}

fn to_rtc_description(sdp: SessionDescription) -> Result<RTCSessionDescription, LinkError> {
    let parsed = match sdp.kind {
        SdpKind::Offer => RTCSessionDescription::offer(sdp.sdp),
        SdpKind::Answer => RTCSessionDescription::answer(sdp.sdp),
        SdpKind::Pranswer => RTCSessionDescription::pranswer(sdp.sdp),
        SdpKind::Rollback => {
            return Err(LinkError::Negotiation(
                "rollback descriptors are not supported".into(),
            ))
        }
    };
    parsed.map_err(|err| LinkError::Negotiation(err.to_string()))
}
