//! Session manager actor.
//!
//! One task owns the peer map and the ready count. Relay events and UI commands reach it through
//! [`ManagerHandle`]; link events and descriptor completions come back from the sessions on a
//! second channel. Everything is applied in arrival order on that one task.

use std::collections::HashMap;
use std::ops::ControlFlow;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, trace, warn};

use crate::config::LinkConfig;
use crate::link::LinkFactory;
use crate::peer::{PeerSession, Role, SessionEvent, SessionState, SessionUpdate};
use crate::protocol::{IceCandidate, PeerId, SessionDescription};
use crate::signaling::{SignalingEvents, Signaler};

pub type ReadyHandler = Arc<dyn Fn(bool) + Send + Sync>;
pub type MessageHandler = Arc<dyn Fn(&PeerId, &str) + Send + Sync>;

/// UI observers. One registrant each; registering again replaces the previous one.
#[derive(Clone, Default)]
pub struct Handlers {
    ready: Arc<RwLock<Option<ReadyHandler>>>,
    message: Arc<RwLock<Option<MessageHandler>>>,
}

impl Handlers {
    pub fn set_ready(&self, handler: ReadyHandler) {
        *self.ready.write() = Some(handler);
    }

    pub fn set_message(&self, handler: MessageHandler) {
        *self.message.write() = Some(handler);
    }

    fn notify_ready(&self, ready: bool) {
        let handler = self.ready.read().clone();
        if let Some(handler) = handler {
            handler(ready);
        }
    }

    fn deliver(&self, peer_id: &PeerId, text: &str) {
        let handler = self.message.read().clone();
        match handler {
            Some(handler) => handler(peer_id, text),
            None => trace!(peer_id = %peer_id, "no message handler; dropping inbound message"),
        }
    }
}

#[derive(Debug)]
pub enum ManagerCommand {
    PeerDiscovered {
        peer_id: PeerId,
        is_welcome: bool,
    },
    PeerDeparted {
        peer_id: PeerId,
    },
    IceCandidate {
        peer_id: PeerId,
        candidate: IceCandidate,
    },
    Offer {
        peer_id: PeerId,
        sdp: SessionDescription,
    },
    Answer {
        peer_id: PeerId,
        sdp: SessionDescription,
    },
    Broadcast {
        text: String,
        reply: oneshot::Sender<usize>,
    },
    Snapshot {
        reply: oneshot::Sender<ManagerSnapshot>,
    },
    Shutdown {
        reply: oneshot::Sender<()>,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerSnapshot {
    pub peer_id: PeerId,
    pub role: Role,
    pub state: SessionState,
    pub ready: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ManagerSnapshot {
    /// Sorted by peer id.
    pub peers: Vec<PeerSnapshot>,
    pub ready_count: usize,
}

impl ManagerSnapshot {
    pub fn peer(&self, peer_id: &str) -> Option<&PeerSnapshot> {
        self.peers.iter().find(|peer| peer.peer_id == peer_id)
    }
}

/// Cloneable front door to the manager task. Also the signaling collaborator.
#[derive(Clone)]
pub struct ManagerHandle {
    commands: mpsc::UnboundedSender<ManagerCommand>,
    ready: Arc<AtomicBool>,
}

impl ManagerHandle {
    fn command(&self, command: ManagerCommand) {
        if self.commands.send(command).is_err() {
            debug!("session manager stopped; dropping command");
        }
    }

    /// Whether at least one direct link is open.
    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::SeqCst)
    }

    /// Sends `text` to every tracked peer; returns how many links accepted it.
    pub async fn broadcast(&self, text: impl Into<String>) -> usize {
        let (reply, rx) = oneshot::channel();
        self.command(ManagerCommand::Broadcast {
            text: text.into(),
            reply,
        });
        rx.await.unwrap_or(0)
    }

    pub async fn snapshot(&self) -> Option<ManagerSnapshot> {
        let (reply, rx) = oneshot::channel();
        self.command(ManagerCommand::Snapshot { reply });
        rx.await.ok()
    }

    /// Destroys every session and ends the manager task.
    pub async fn shutdown(&self) {
        let (reply, rx) = oneshot::channel();
        self.command(ManagerCommand::Shutdown { reply });
        let _ = rx.await;
    }
}

impl SignalingEvents for ManagerHandle {
    fn on_peer_discovered(&self, peer_id: PeerId, is_welcome: bool) {
        self.command(ManagerCommand::PeerDiscovered {
            peer_id,
            is_welcome,
        });
    }

    fn on_peer_departed(&self, peer_id: PeerId) {
        self.command(ManagerCommand::PeerDeparted { peer_id });
    }

    fn on_ice_candidate(&self, peer_id: PeerId, candidate: IceCandidate) {
        self.command(ManagerCommand::IceCandidate { peer_id, candidate });
    }

    fn on_offer(&self, peer_id: PeerId, sdp: SessionDescription) {
        self.command(ManagerCommand::Offer { peer_id, sdp });
    }

    fn on_answer(&self, peer_id: PeerId, sdp: SessionDescription) {
        self.command(ManagerCommand::Answer { peer_id, sdp });
    }

    fn on_relay_closed(&self) {
        warn!("relay connection lost; existing direct links stay up");
    }
}

pub struct SessionManager {
    peers: HashMap<PeerId, PeerSession>,
    ready_count: usize,
    next_generation: u64,
    factory: Arc<dyn LinkFactory>,
    config: LinkConfig,
    signaler: Arc<dyn Signaler>,
    handlers: Handlers,
    ready: Arc<AtomicBool>,
    session_tx: mpsc::UnboundedSender<SessionEvent>,
}

impl SessionManager {
    /// Spawns the manager task on the current runtime.
    pub fn spawn(
        factory: Arc<dyn LinkFactory>,
        config: LinkConfig,
        signaler: Arc<dyn Signaler>,
        handlers: Handlers,
    ) -> (ManagerHandle, JoinHandle<()>) {
        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        let (session_tx, session_rx) = mpsc::unbounded_channel();
        let ready = Arc::new(AtomicBool::new(false));
        let manager = SessionManager {
            peers: HashMap::new(),
            ready_count: 0,
            next_generation: 0,
            factory,
            config,
            signaler,
            handlers,
            ready: Arc::clone(&ready),
            session_tx,
        };
        let task = tokio::spawn(manager.run(commands_rx, session_rx));
        let handle = ManagerHandle {
            commands: commands_tx,
            ready,
        };
        (handle, task)
    }

    async fn run(
        mut self,
        mut commands: mpsc::UnboundedReceiver<ManagerCommand>,
        mut session_events: mpsc::UnboundedReceiver<SessionEvent>,
    ) {
        debug!("session manager started");
        loop {
            tokio::select! {
                biased;
                Some(event) = session_events.recv() => self.on_session_event(event).await,
                command = commands.recv() => match command {
                    Some(command) => {
                        if self.on_command(command).await.is_break() {
                            break;
                        }
                    }
                    None => {
                        self.destroy_all().await;
                        break;
                    }
                },
            }
        }
        debug!("session manager stopped");
    }

    async fn on_command(&mut self, command: ManagerCommand) -> ControlFlow<()> {
        match command {
            ManagerCommand::PeerDiscovered {
                peer_id,
                is_welcome,
            } => self.on_peer_discovered(peer_id, is_welcome).await,
            ManagerCommand::PeerDeparted { peer_id } => self.on_peer_departed(peer_id).await,
            ManagerCommand::IceCandidate { peer_id, candidate } => {
                if let Some(session) = self.tracked(&peer_id, "ice") {
                    session.add_ice_candidate(candidate).await;
                }
            }
            ManagerCommand::Offer { peer_id, sdp } => {
                if let Some(session) = self.tracked(&peer_id, "offer") {
                    session.process_offer(sdp).await;
                }
            }
            ManagerCommand::Answer { peer_id, sdp } => {
                if let Some(session) = self.tracked(&peer_id, "answer") {
                    session.process_answer(sdp).await;
                }
            }
            ManagerCommand::Broadcast { text, reply } => {
                let delivered = self.broadcast(&text).await;
                let _ = reply.send(delivered);
            }
            ManagerCommand::Snapshot { reply } => {
                let _ = reply.send(self.snapshot());
            }
            ManagerCommand::Shutdown { reply } => {
                self.destroy_all().await;
                let _ = reply.send(());
                return ControlFlow::Break(());
            }
        }
        ControlFlow::Continue(())
    }

    async fn on_peer_discovered(&mut self, peer_id: PeerId, is_welcome: bool) {
        if self.peers.contains_key(&peer_id) {
            warn!(peer_id = %peer_id, "peer already tracked; keeping existing session");
            return;
        }
        let role = Role::from_discovery(is_welcome);
        self.next_generation += 1;
        let mut session = PeerSession::new(
            peer_id.clone(),
            role,
            self.next_generation,
            Arc::clone(&self.signaler),
            self.session_tx.clone(),
        );
        info!(peer_id = %peer_id, role = ?role, "peer discovered");
        if let Err(err) = session.init(self.factory.as_ref(), &self.config).await {
            warn!(peer_id = %peer_id, error = %err, "link setup failed");
        }
        self.peers.insert(peer_id, session);
    }

    async fn on_peer_departed(&mut self, peer_id: PeerId) {
        let Some(mut session) = self.peers.remove(&peer_id) else {
            debug!(peer_id = %peer_id, "departed peer was not tracked");
            return;
        };
        info!(peer_id = %peer_id, "peer departed");
        if let Some(update) = session.destroy().await {
            self.apply_update(&peer_id, update);
        }
    }

    async fn on_session_event(&mut self, event: SessionEvent) {
        let SessionEvent {
            peer_id,
            generation,
            kind,
        } = event;
        let Some(session) = self.peers.get_mut(&peer_id) else {
            trace!(peer_id = %peer_id, "event for untracked peer; ignoring");
            return;
        };
        if session.generation() != generation {
            trace!(peer_id = %peer_id, generation, "event for replaced session; ignoring");
            return;
        }
        if let Some(update) = session.handle_event(kind).await {
            self.apply_update(&peer_id, update);
        }
    }

    async fn broadcast(&self, text: &str) -> usize {
        let mut delivered = 0;
        for session in self.peers.values() {
            if session.send_msg(text).await {
                delivered += 1;
            }
        }
        trace!(delivered, tracked = self.peers.len(), "broadcast");
        delivered
    }

    async fn destroy_all(&mut self) {
        let peers: Vec<PeerId> = self.peers.keys().cloned().collect();
        for peer_id in peers {
            self.on_peer_departed(peer_id).await;
        }
    }

    fn apply_update(&mut self, peer_id: &PeerId, update: SessionUpdate) {
        match update {
            SessionUpdate::Ready => self.apply_readiness(peer_id, true),
            SessionUpdate::NotReady => self.apply_readiness(peer_id, false),
            SessionUpdate::Message(text) => self.handlers.deliver(peer_id, &text),
        }
    }

    fn apply_readiness(&mut self, peer_id: &PeerId, ready: bool) {
        if ready {
            self.ready_count += 1;
            if self.ready_count == 1 {
                self.ready.store(true, Ordering::SeqCst);
                info!("mesh ready");
                self.handlers.notify_ready(true);
            }
            return;
        }
        if self.ready_count == 0 {
            error!(peer_id = %peer_id, "ready count underflow; clamping at zero");
            return;
        }
        self.ready_count -= 1;
        if self.ready_count == 0 {
            self.ready.store(false, Ordering::SeqCst);
            info!("mesh not ready");
            self.handlers.notify_ready(false);
        }
    }

    fn tracked(&mut self, peer_id: &PeerId, what: &'static str) -> Option<&mut PeerSession> {
        let session = self.peers.get_mut(peer_id);
        if session.is_none() {
            debug!(peer_id = %peer_id, what, "unknown peer; dropping");
        }
        session
    }

    fn snapshot(&self) -> ManagerSnapshot {
        let mut peers: Vec<PeerSnapshot> = self
            .peers
            .values()
            .map(|session| PeerSnapshot {
                peer_id: session.id().clone(),
                role: session.role(),
                state: session.state(),
                ready: session.is_ready(),
            })
            .collect();
        peers.sort_by(|a, b| a.peer_id.cmp(&b.peer_id));
        ManagerSnapshot {
            peers,
            ready_count: self.ready_count,
        }
    }
}
