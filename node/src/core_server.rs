use async_trait::async_trait;
use privbill_core::{
    Bill, CycleId, Data, FixedPointConvertor, HiddenBill, HidingContext, SharedMaskGenerator,
};
use privbill_network::{
    handle_connect, BillingServer, ConnectPayload, Message, NetworkCore, NetworkError, NodeInfo,
    NodeRole, Payload,
};
use std::collections::HashMap;
use std::net::SocketAddr;
use tracing::{debug, info, warn};

// Fixed-point layout of the mask domain: six integer digits, four
// fractional digits.
const MASK_INTEGER_DIGITS: u32 = 6;
const MASK_FRACTIONAL_DIGITS: u32 = 4;

/// Data-owner node: exchanges mask seeds with the other cores, hides and
/// submits its metering data, and receives and decrypts its bills.
pub struct CoreServer {
    network: NetworkCore,
    masks: SharedMaskGenerator,
    hiding: Option<HidingContext>,
    bills: HashMap<CycleId, Bill>,
}

impl CoreServer {
    pub fn new(address: SocketAddr) -> Self {
        CoreServer {
            network: NetworkCore::new(address, NodeRole::Core),
            masks: SharedMaskGenerator::new(FixedPointConvertor::new(
                MASK_INTEGER_DIGITS,
                MASK_FRACTIONAL_DIGITS,
            )),
            hiding: None,
            bills: HashMap::new(),
        }
    }

    /// Join the overlay through a bootstrap edge.
    pub async fn join(&self, edge: SocketAddr) -> Result<(), NetworkError> {
        info!(%edge, "joining network");
        self.network.send_connect(edge).await
    }

    pub fn bill(&self, cycle_id: CycleId) -> Option<&Bill> {
        self.bills.get(&cycle_id)
    }

    /// Whether data can currently be hidden and submitted: hiding
    /// parameters are fixed and the seed exchange has settled.
    pub fn ready_to_submit(&self) -> bool {
        self.hiding.is_some()
            && self.masks.is_stable()
            && self.masks.exchanged_peer_count() > 0
    }

    /// Cores with a completed two-way seed exchange.
    pub fn exchanged_seed_count(&self) -> usize {
        self.masks.exchanged_peer_count()
    }

    async fn handle_connect_message(
        &mut self,
        reply_address: SocketAddr,
        connect: ConnectPayload,
    ) -> Result<(), NetworkError> {
        let cycle_length = connect.billing_state.cycle_length;
        handle_connect(self, reply_address, connect).await?;

        // the first edge to advertise a cycle length fixes our hiding
        // parameters for the process lifetime
        if let (Some(cycle_length), None) = (cycle_length, &self.hiding) {
            info!(cycle_length, "creating hiding context");
            self.hiding = Some(HidingContext::new(cycle_length)?);
        }

        if let Some(origin) = self.network.members.get(reply_address).cloned() {
            self.try_send_seed(&origin).await?;
        }
        Ok(())
    }

    /// Offer our mask seed to a newly met core, once.
    async fn try_send_seed(&mut self, node: &NodeInfo) -> Result<(), NetworkError> {
        if node.role != NodeRole::Core || node.id() == self.network.id() {
            return Ok(());
        }
        if self.masks.has_seed_for_peer(node.id()) {
            return Ok(());
        }
        let seed = self.masks.seed_for_peer(node.id());
        debug!(peer = node.id(), "sending mask seed");
        self.network
            .send(Payload::Seed { seed }, node.address)
            .await?;
        Ok(())
    }

    async fn handle_seed(
        &mut self,
        seed: privbill_core::Seed,
        origin: &NodeInfo,
    ) -> Result<(), NetworkError> {
        self.masks.accept_foreign_seed(seed, origin.id());
        self.try_send_seed(origin).await
    }

    /// Local producer hook: hide the plaintext data and submit it to
    /// every known edge.
    async fn handle_data(&mut self, mut data: Data) -> Result<(), NetworkError> {
        let Some(hiding) = &self.hiding else {
            warn!("dropping data: no hiding context yet");
            return Ok(());
        };
        if !self.masks.is_stable() || self.masks.exchanged_peer_count() == 0 {
            warn!("dropping data: seed exchange still in progress");
            return Ok(());
        }

        // the submission is ours regardless of what the injector claims
        data.client_id = self.network.id();
        let hidden = data.hide(hiding, &self.masks)?;
        info!(cycle_id = hidden.cycle_id, "submitting hidden data");

        let edges: Vec<SocketAddr> = self.network.members.edges().map(|n| n.address).collect();
        self.network
            .broadcast(Payload::HiddenData(Box::new(hidden)), edges)
            .await;
        Ok(())
    }

    fn handle_hidden_bill(&mut self, hidden: HiddenBill) -> Result<(), NetworkError> {
        let Some(hiding) = &self.hiding else {
            warn!("dropping hidden bill: no hiding context");
            return Ok(());
        };
        let bill = hidden.reveal(hiding)?;
        info!(cycle_id = bill.cycle_id, total = bill.total(), "bill received");
        self.bills.insert(bill.cycle_id, bill);
        Ok(())
    }

    fn handle_get_bill(&self, cycle_id: CycleId) -> Message {
        Message {
            reply_address: self.network.address(),
            body: Payload::Bill {
                bill: self.bills.get(&cycle_id).cloned(),
            },
        }
    }
}

#[async_trait]
impl BillingServer for CoreServer {
    fn network(&self) -> &NetworkCore {
        &self.network
    }

    fn network_mut(&mut self) -> &mut NetworkCore {
        &mut self.network
    }

    async fn dispatch(
        &mut self,
        message: Message,
        origin: Option<NodeInfo>,
    ) -> Result<Option<Message>, NetworkError> {
        match message.body {
            Payload::Connect(connect) => {
                self.handle_connect_message(message.reply_address, connect)
                    .await?;
                Ok(None)
            }
            Payload::Seed { seed } => {
                // the dispatcher only lets verified seed messages through,
                // so a known origin is guaranteed
                if let Some(origin) = origin {
                    self.handle_seed(seed, &origin).await?;
                }
                Ok(None)
            }
            Payload::Data(data) => {
                self.handle_data(data).await?;
                Ok(None)
            }
            Payload::HiddenBill(hidden) => {
                self.handle_hidden_bill(*hidden)?;
                Ok(None)
            }
            Payload::GetBill { cycle_id } => Ok(Some(self.handle_get_bill(cycle_id))),
            Payload::CycleContext(_) => {
                // edges gossip contexts everywhere; a core takes its cycle
                // length from the connect exchange instead
                Ok(None)
            }
            other => {
                warn!(kind = other.kind(), "message not handled by core role");
                Ok(None)
            }
        }
    }
}
