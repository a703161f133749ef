// Peer-to-peer billing overlay
// Signed message framing, role-tagged membership, gossip discovery, dispatch

pub mod framing;
pub mod messages;
pub mod node;
pub mod server;

pub use messages::{ConnectPayload, Envelope, Message, Payload, SignedMessage};
pub use node::{NodeInfo, NodeRole, NodeTable};
pub use server::{handle_connect, run, BillingServer, BillingState, NetworkCore};

use privbill_core::{BillingError, HidingError, ValidationError};
use thiserror::Error;

/// Error types for the network layer
#[derive(Debug, Error)]
pub enum NetworkError {
    #[error("transport failure: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to decode payload: {0}")]
    Deserialization(#[from] bincode::Error),
    #[error("invalid signature on `{0}` message")]
    InvalidSignature(&'static str),
    #[error("frame of {0} bytes exceeds the frame limit")]
    FrameTooLarge(u64),
    #[error(transparent)]
    Hiding(#[from] HidingError),
    #[error(transparent)]
    Billing(#[from] BillingError),
    #[error(transparent)]
    Validation(#[from] ValidationError),
}
