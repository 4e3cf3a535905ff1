use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::{json, Value};
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, info};
use uuid::Uuid;

/// Outbound queue for one connected client; each entry is one JSON text frame.
pub type ClientSender = mpsc::UnboundedSender<String>;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ForwardError {
    #[error("frame is not a json object")]
    NotAnObject,
    #[error("invalid json: {0}")]
    InvalidJson(String),
    #[error("frame has no string target")]
    MissingTarget,
    #[error("unknown target {0}")]
    UnknownTarget(String),
}

/// Connected clients keyed by relay-assigned id.
#[derive(Clone, Default)]
pub struct RelayState {
    clients: Arc<Mutex<HashMap<String, ClientSender>>>,
}

impl RelayState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a client under a fresh id, sends it `welcome` listing everyone already present,
    /// and announces it to them with `addPeer`.
    pub fn join(&self, tx: ClientSender) -> String {
        let id = generate_client_id();
        let mut clients = self.clients.lock();
        let mut peers: Vec<String> = clients.keys().cloned().collect();
        peers.sort();

        let welcome = json!({ "type": "welcome", "id": id, "peers": peers }).to_string();
        let _ = tx.send(welcome);
        let add = json!({ "type": "addPeer", "src": id }).to_string();
        for peer in clients.values() {
            let _ = peer.send(add.clone());
        }
        clients.insert(id.clone(), tx);
        info!(client_id = %id, peers = peers.len(), "client joined");
        id
    }

    /// Unregisters `id` and tells the remaining clients.
    pub fn leave(&self, id: &str) {
        let mut clients = self.clients.lock();
        if clients.remove(id).is_none() {
            return;
        }
        let remove = json!({ "type": "removePeer", "src": id }).to_string();
        for peer in clients.values() {
            let _ = peer.send(remove.clone());
        }
        info!(client_id = %id, remaining = clients.len(), "client left");
    }

    /// Re-addresses a client frame: `target` is stripped, `src` is set to the sender.
    pub fn forward(&self, src: &str, text: &str) -> Result<String, ForwardError> {
        let value: Value =
            serde_json::from_str(text).map_err(|err| ForwardError::InvalidJson(err.to_string()))?;
        let Value::Object(mut frame) = value else {
            return Err(ForwardError::NotAnObject);
        };
        let target = match frame.remove("target") {
            Some(Value::String(target)) => target,
            _ => return Err(ForwardError::MissingTarget),
        };
        frame.insert("src".into(), Value::String(src.to_string()));
        let out = Value::Object(frame).to_string();

        let clients = self.clients.lock();
        let Some(tx) = clients.get(&target) else {
            return Err(ForwardError::UnknownTarget(target));
        };
        if tx.send(out).is_err() {
            debug!(target_id = %target, "target queue closed");
        }
        Ok(target)
    }

    pub fn len(&self) -> usize {
        self.clients.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn generate_client_id() -> String {
    Uuid::new_v4().to_string()
}
