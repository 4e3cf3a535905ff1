use std::sync::{Arc, OnceLock};

use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::{LinkConfig, MeshConfig};
use crate::error::MeshError;
use crate::link::rtc::WebRtcLinkFactory;
use crate::link::LinkFactory;
use crate::manager::{Handlers, ManagerHandle, SessionManager};
use crate::protocol::PeerId;
use crate::signaling::{parse_relay_url, RelaySender, SignalingChannel};

/// Owner of one mesh membership: a relay connection plus the sessions it spawns.
///
/// ```no_run
/// # async fn demo() -> Result<(), peer_mesh::MeshError> {
/// use peer_mesh::{LinkConfig, MeshEngine};
///
/// let engine = MeshEngine::new();
/// engine.register_message_handler(|peer, text| println!("[{peer}] {text}"));
/// engine.initialize("ws://localhost:8514", LinkConfig::default())?;
/// engine.start().await?;
/// engine.send("hello").await;
/// engine.stop().await;
/// # Ok(())
/// # }
/// ```
pub struct MeshEngine {
    factory: Arc<dyn LinkFactory>,
    handlers: Handlers,
    config: OnceLock<MeshConfig>,
    lifecycle: tokio::sync::Mutex<()>,
    running: Mutex<Option<Arc<Running>>>,
}

struct Running {
    channel: SignalingChannel,
    manager: ManagerHandle,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl Default for MeshEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl MeshEngine {
    pub fn new() -> Self {
        Self::with_link_factory(Arc::new(WebRtcLinkFactory::new()))
    }

    pub fn with_link_factory(factory: Arc<dyn LinkFactory>) -> Self {
        Self {
            factory,
            handlers: Handlers::default(),
            config: OnceLock::new(),
            lifecycle: tokio::sync::Mutex::new(()),
            running: Mutex::new(None),
        }
    }

    /// Records where the relay lives and how links are built. Only the first call takes effect.
    pub fn initialize(&self, relay_url: &str, link: LinkConfig) -> Result<(), MeshError> {
        if self.config.get().is_some() {
            warn!(relay_url, "engine already initialized; ignoring");
            return Ok(());
        }
        parse_relay_url(relay_url)?;
        let config = MeshConfig {
            relay_url: relay_url.to_string(),
            link,
        };
        if self.config.set(config).is_err() {
            warn!(relay_url, "engine already initialized; ignoring");
        }
        Ok(())
    }

    pub async fn start(&self) -> Result<(), MeshError> {
        let _lifecycle = self.lifecycle.lock().await;
        let config = self.config.get().ok_or(MeshError::NotInitialized)?;
        if self.running.lock().is_some() {
            return Err(MeshError::AlreadyRunning);
        }

        let sender = RelaySender::default();
        let (manager, task) = SessionManager::spawn(
            Arc::clone(&self.factory),
            config.link.clone(),
            Arc::new(sender.clone()),
            self.handlers.clone(),
        );
        let channel = SignalingChannel::with_sender(Arc::new(manager.clone()), sender);
        if let Err(err) = channel.start(&config.relay_url).await {
            manager.shutdown().await;
            let _ = task.await;
            return Err(err.into());
        }

        info!(relay_url = %config.relay_url, "mesh engine started");
        *self.running.lock() = Some(Arc::new(Running {
            channel,
            manager,
            task: Mutex::new(Some(task)),
        }));
        Ok(())
    }

    /// Disconnects from the relay and tears down every session. Safe to call repeatedly.
    pub async fn stop(&self) {
        let _lifecycle = self.lifecycle.lock().await;
        let Some(running) = self.running.lock().take() else {
            debug!("mesh engine not running");
            return;
        };
        running.channel.stop();
        running.manager.shutdown().await;
        let task = running.task.lock().take();
        if let Some(task) = task {
            let _ = task.await;
        }
        info!("mesh engine stopped");
    }

    /// Sends `text` to every peer; returns how many direct links accepted it.
    pub async fn send(&self, text: &str) -> usize {
        let Some(running) = self.running() else {
            debug!("mesh engine not running; dropping message");
            return 0;
        };
        running.manager.broadcast(text).await
    }

    pub fn register_ready_change_handler(&self, handler: impl Fn(bool) + Send + Sync + 'static) {
        self.handlers.set_ready(Arc::new(handler));
    }

    pub fn register_message_handler(
        &self,
        handler: impl Fn(&PeerId, &str) + Send + Sync + 'static,
    ) {
        self.handlers.set_message(Arc::new(handler));
    }

    pub fn is_ready(&self) -> bool {
        self.running()
            .map(|running| running.manager.is_ready())
            .unwrap_or(false)
    }

    pub fn is_running(&self) -> bool {
        self.running.lock().is_some()
    }

    /// Id the relay assigned to this participant, once welcomed.
    pub fn self_id(&self) -> Option<PeerId> {
        self.running().and_then(|running| running.channel.self_id())
    }

    pub fn config(&self) -> Option<&MeshConfig> {
        self.config.get()
    }

    /// Handle to the running session manager, for inspection.
    pub fn manager(&self) -> Option<ManagerHandle> {
        self.running().map(|running| running.manager.clone())
    }

    fn running(&self) -> Option<Arc<Running>> {
        self.running.lock().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::link::mock::MockLinkFactory;
    use crate::signaling::SignalingError;

    fn engine() -> MeshEngine {
        MeshEngine::with_link_factory(Arc::new(MockLinkFactory::new()))
    }

    #[tokio::test]
    async fn start_requires_initialize() {
        let engine = engine();
        assert!(matches!(
            engine.start().await,
            Err(MeshError::NotInitialized)
        ));
        assert!(!engine.is_running());
    }

    #[tokio::test]
    async fn first_initialize_wins() {
        let engine = engine();
        engine
            .initialize("ws://first:1", LinkConfig::localhost())
            .unwrap();
        engine
            .initialize("ws://second:2", LinkConfig::default())
            .unwrap();
        engine
            .initialize("not a url", LinkConfig::default())
            .unwrap();
        let config = engine.config().unwrap();
        assert_eq!(config.relay_url, "ws://first:1");
        assert!(config.link.ice_servers.is_empty());
    }

    #[tokio::test]
    async fn initialize_rejects_non_websocket_urls() {
        let engine = engine();
        let err = engine
            .initialize("http://relay:1", LinkConfig::localhost())
            .unwrap_err();
        assert!(matches!(
            err,
            MeshError::Signaling(SignalingError::InvalidUrl { .. })
        ));
        assert!(engine.config().is_none());
    }

    #[tokio::test]
    async fn failed_connect_leaves_engine_stopped() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let engine = engine();
        engine
            .initialize(&format!("ws://{addr}"), LinkConfig::localhost())
            .unwrap();
        assert!(matches!(
            engine.start().await,
            Err(MeshError::Signaling(SignalingError::Connect(_)))
        ));
        assert!(!engine.is_running());
        assert_eq!(engine.send("nobody").await, 0);
    }

    #[tokio::test]
    async fn stop_without_start_is_a_no_op() {
        let engine = engine();
        engine.stop().await;
        engine.stop().await;
        assert!(!engine.is_ready());
        assert!(engine.self_id().is_none());
    }
}
