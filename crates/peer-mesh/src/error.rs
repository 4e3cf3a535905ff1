use thiserror::Error;

use crate::link::LinkError;
use crate::signaling::SignalingError;

#[derive(Debug, Error)]
pub enum MeshError {
    #[error("engine not initialized")]
    NotInitialized,
    #[error("engine already running")]
    AlreadyRunning,
    #[error(transparent)]
    Signaling(#[from] SignalingError),
    #[error(transparent)]
    Link(#[from] LinkError),
}
