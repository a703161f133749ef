use crate::node::{NodeInfo, NodeRole};
use crate::server::BillingState;
use crate::NetworkError;
use privbill_core::crypto::{PublicKey, Signature};
use privbill_core::{Bill, CycleContext, CycleId, Data, HiddenBill, HiddenData, Seed};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::net::SocketAddr;

/// A protocol message: where to reach the sender, and what it wants.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Message {
    pub reply_address: SocketAddr,
    pub body: Payload,
}

/// The closed set of protocol message types.
///
/// Verification and reply behaviour are properties of the variant, not of
/// whichever handler happens to receive it.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub enum Payload {
    /// Membership gossip: sender's identity and its view of the network.
    Connect(ConnectPayload),
    /// Pairwise mask seed, core to core.
    Seed { seed: Seed },
    /// Local injection of plaintext data into the owning core.
    Data(Data),
    /// A participant's hidden cycle data, core to edge.
    HiddenData(Box<HiddenData>),
    /// Market prices for a cycle.
    CycleContext(CycleContext),
    /// An encrypted bill on its way back, edge to core.
    HiddenBill(Box<HiddenBill>),
    /// Bill lookup request.
    GetBill { cycle_id: CycleId },
    /// Bill lookup reply.
    Bill { bill: Option<Bill> },
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ConnectPayload {
    pub public_key: PublicKey,
    pub role: NodeRole,
    pub network_state: HashMap<SocketAddr, NodeInfo>,
    pub billing_state: BillingState,
}

impl Payload {
    pub fn kind(&self) -> &'static str {
        match self {
            Payload::Connect(_) => "connect",
            Payload::Seed { .. } => "seed",
            Payload::Data(_) => "data",
            Payload::HiddenData(_) => "hidden_data",
            Payload::CycleContext(_) => "cycle_context",
            Payload::HiddenBill(_) => "hidden_bill",
            Payload::GetBill { .. } => "get_bill",
            Payload::Bill { .. } => "bill",
        }
    }

    /// Whether receipt is gated on a valid origin signature.
    pub fn requires_verification(&self) -> bool {
        matches!(
            self,
            Payload::Seed { .. } | Payload::HiddenData(_) | Payload::HiddenBill(_)
        )
    }

    /// Whether the handler replies on the request socket. Everything else
    /// is acknowledged with an empty frame before dispatch.
    pub fn replies(&self) -> bool {
        matches!(self, Payload::GetBill { .. })
    }
}

/// An encoded [`Message`] with the sender's signature over the bytes.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SignedMessage {
    pub message: Vec<u8>,
    pub signature: Signature,
}

impl SignedMessage {
    pub fn decode(&self) -> Result<Message, NetworkError> {
        Ok(bincode::deserialize(&self.message)?)
    }
}

/// What actually crosses the wire inside a frame.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub enum Envelope {
    Plain(Message),
    Signed(SignedMessage),
}

impl Envelope {
    pub fn to_bytes(&self) -> Result<Vec<u8>, NetworkError> {
        Ok(bincode::serialize(self)?)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, NetworkError> {
        Ok(bincode::deserialize(bytes)?)
    }
}
