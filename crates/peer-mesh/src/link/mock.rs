//! In-memory links for tests and simulations.
//!
//! Nothing crosses the network: descriptors are synthesized, and the test drives the channel
//! lifecycle by hand through [`MockLink::open_channel`], [`MockLink::close_channel`] and
//! [`MockLink::deliver`].

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::watch;

use super::{Link, LinkError, LinkEvent, LinkEventSink, LinkFactory};
use crate::config::LinkConfig;
use crate::protocol::{IceCandidate, PeerId, SessionDescription};

#[derive(Clone)]
pub struct MockLinkFactory {
    inner: Arc<FactoryInner>,
}

struct FactoryInner {
    links: Mutex<HashMap<PeerId, Arc<MockLink>>>,
    created: Mutex<Vec<PeerId>>,
    hold: watch::Sender<bool>,
    fail_descriptors: AtomicBool,
}

impl Default for MockLinkFactory {
    fn default() -> Self {
        Self::new()
    }
}

impl MockLinkFactory {
    pub fn new() -> Self {
        let (hold, _) = watch::channel(false);
        Self {
            inner: Arc::new(FactoryInner {
                links: Mutex::new(HashMap::new()),
                created: Mutex::new(Vec::new()),
                hold,
                fail_descriptors: AtomicBool::new(false),
            }),
        }
    }

    /// Latest link created for `peer_id`.
    pub fn link(&self, peer_id: &str) -> Option<Arc<MockLink>> {
        self.inner.links.lock().get(peer_id).cloned()
    }

    /// Peer ids in link-creation order, duplicates included.
    pub fn created(&self) -> Vec<PeerId> {
        self.inner.created.lock().clone()
    }

    /// Parks offer/answer creation until [`release_descriptors`](Self::release_descriptors).
    pub fn hold_descriptors(&self) {
        self.inner.hold.send_replace(true);
    }

    pub fn release_descriptors(&self) {
        self.inner.hold.send_replace(false);
    }

    pub fn fail_descriptors(&self, fail: bool) {
        self.inner.fail_descriptors.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl LinkFactory for MockLinkFactory {
    async fn create_link(
        &self,
        peer_id: &PeerId,
        _config: &LinkConfig,
        events: LinkEventSink,
    ) -> Result<Arc<dyn Link>, LinkError> {
        let link = Arc::new(MockLink {
            peer_id: peer_id.clone(),
            events,
            factory: Arc::clone(&self.inner),
            state: Mutex::new(MockLinkState::default()),
            open: AtomicBool::new(false),
            closes: AtomicUsize::new(0),
        });
        self.inner
            .links
            .lock()
            .insert(peer_id.clone(), Arc::clone(&link));
        self.inner.created.lock().push(peer_id.clone());
        Ok(link)
    }
}

#[derive(Debug, Default, Clone)]
pub struct MockLinkState {
    pub opened_label: Option<String>,
    pub accepting: bool,
    pub local_descriptions: Vec<SessionDescription>,
    pub remote_descriptions: Vec<SessionDescription>,
    pub candidates: Vec<IceCandidate>,
    pub sent: Vec<String>,
}

pub struct MockLink {
    peer_id: PeerId,
    events: LinkEventSink,
    factory: Arc<FactoryInner>,
    state: Mutex<MockLinkState>,
    open: AtomicBool,
    closes: AtomicUsize,
}

impl MockLink {
    pub fn peer_id(&self) -> &str {
        &self.peer_id
    }

    pub fn snapshot(&self) -> MockLinkState {
        self.state.lock().clone()
    }

    pub fn sent(&self) -> Vec<String> {
        self.state.lock().sent.clone()
    }

    pub fn close_count(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }

    pub fn open_channel(&self) {
        self.open.store(true, Ordering::SeqCst);
        self.events.emit(LinkEvent::ChannelOpen);
    }

    pub fn close_channel(&self) {
        self.open.store(false, Ordering::SeqCst);
        self.events.emit(LinkEvent::ChannelClosed);
    }

    pub fn deliver(&self, text: impl Into<String>) {
        self.events.emit(LinkEvent::Message(text.into()));
    }

    pub fn gather(&self, candidate: IceCandidate) {
        self.events.emit(LinkEvent::LocalCandidate(candidate));
    }

    async fn descriptor_gate(&self) -> Result<(), LinkError> {
        let mut hold = self.factory.hold.subscribe();
        while *hold.borrow_and_update() {
            if hold.changed().await.is_err() {
                break;
            }
        }
        if self.factory.fail_descriptors.load(Ordering::SeqCst) {
            return Err(LinkError::Negotiation("mock descriptor failure".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl Link for MockLink {
    async fn open_data_channel(&self, label: &str, _ordered: bool) -> Result<(), LinkError> {
        self.state.lock().opened_label = Some(label.to_string());
        Ok(())
    }

    async fn accept_data_channel(&self) -> Result<(), LinkError> {
        self.state.lock().accepting = true;
        Ok(())
    }

    async fn create_offer(&self) -> Result<SessionDescription, LinkError> {
        self.descriptor_gate().await?;
        let offer = SessionDescription::offer(format!("mock-offer-{}", self.peer_id));
        self.state.lock().local_descriptions.push(offer.clone());
        Ok(offer)
    }

    async fn create_answer(&self) -> Result<SessionDescription, LinkError> {
        self.descriptor_gate().await?;
        let answer = SessionDescription::answer(format!("mock-answer-{}", self.peer_id));
        self.state.lock().local_descriptions.push(answer.clone());
        Ok(answer)
    }

    async fn set_remote_description(&self, sdp: SessionDescription) -> Result<(), LinkError> {
        self.state.lock().remote_descriptions.push(sdp);
        Ok(())
    }

    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<(), LinkError> {
        self.state.lock().candidates.push(candidate);
        Ok(())
    }

    async fn send_text(&self, text: &str) -> Result<(), LinkError> {
        if !self.open.load(Ordering::SeqCst) {
            return Err(LinkError::NotOpen);
        }
        self.state.lock().sent.push(text.to_string());
        Ok(())
    }

    async fn close(&self) {
        self.open.store(false, Ordering::SeqCst);
        self.closes.fetch_add(1, Ordering::SeqCst);
    }
}
