use async_trait::async_trait;
use privbill_core::{CycleContext, CycleId, HiddenData, SharedBilling};
use privbill_network::{
    handle_connect, BillingServer, Message, NetworkCore, NetworkError, NodeInfo, NodeRole,
    Payload,
};
use std::collections::HashSet;
use std::net::SocketAddr;
use tracing::{debug, error, info, warn};

/// Aggregator node: collects hidden data and cycle contexts, runs the
/// encrypted billing computation once a cycle is complete, and returns
/// each core its encrypted bill.
pub struct EdgeServer {
    network: NetworkCore,
    biller: SharedBilling,
    billed: HashSet<CycleId>,
}

impl EdgeServer {
    pub fn new(address: SocketAddr, cycle_length: usize) -> Self {
        let mut network = NetworkCore::new(address, NodeRole::Edge);
        // advertised to joining peers; cores size their hiding contexts
        // from it
        network.billing_state.cycle_length = Some(cycle_length);
        EdgeServer {
            network,
            biller: SharedBilling::new(),
            billed: HashSet::new(),
        }
    }

    async fn handle_cycle_context(&mut self, cyc: CycleContext) -> Result<(), NetworkError> {
        // a known context has already been recorded and gossiped; stopping
        // here is what terminates the edge-to-edge rebroadcast
        if self.biller.context(cyc.cycle_id).is_some() {
            return Ok(());
        }
        cyc.check_validity()?;
        info!(cycle_id = cyc.cycle_id, "recording cycle context");
        self.biller.record_context(cyc.clone());
        self.try_run_billing(cyc.cycle_id).await;

        let peers: Vec<SocketAddr> = self.network.members.peers().map(|n| n.address).collect();
        self.network
            .broadcast(Payload::CycleContext(cyc), peers)
            .await;
        Ok(())
    }

    async fn handle_hidden_data(&mut self, data: HiddenData) -> Result<(), NetworkError> {
        let cycle_id = data.cycle_id;
        if let Some(cyc) = self.biller.context(cycle_id) {
            data.check_validity(cyc)?;
        }
        info!(cycle_id, client = data.client_id, "recording hidden data");
        self.biller.record_data(data);
        self.try_run_billing(cycle_id).await;
        Ok(())
    }

    /// Run billing for `cycle_id` if everything is in place and it has
    /// not been billed yet, then return each core its hidden bill.
    async fn try_run_billing(&mut self, cycle_id: CycleId) {
        if self.billed.contains(&cycle_id) {
            return;
        }
        if !self.biller.is_ready(cycle_id) {
            debug!(cycle_id, "not ready for billing");
            return;
        }

        info!(cycle_id, "billing cycle");
        let bills = match self.biller.compute_bills(cycle_id) {
            Ok(bills) => bills,
            Err(e) => {
                // the cycle stays unbilled; a later record retries
                error!(cycle_id, "billing failed: {e}");
                return;
            }
        };
        self.billed.insert(cycle_id);

        let cores: Vec<NodeInfo> = self.network.members.cores().cloned().collect();
        for core in cores {
            match bills.get(&core.id()) {
                Some(bill) => {
                    if let Err(e) = self
                        .network
                        .send(Payload::HiddenBill(Box::new(bill.clone())), core.address)
                        .await
                    {
                        warn!(client = core.id(), "failed to deliver bill: {e}");
                    }
                }
                None => warn!(client = core.id(), "no bill for registered core"),
            }
        }

        // hidden data is only owned until its cycle completes
        self.biller.discard_cycle(cycle_id);
        info!(cycle_id, "billing complete");
    }
}

#[async_trait]
impl BillingServer for EdgeServer {
    fn network(&self) -> &NetworkCore {
        &self.network
    }

    fn network_mut(&mut self) -> &mut NetworkCore {
        &mut self.network
    }

    fn register_node(&mut self, node: NodeInfo) {
        // every core in the table is expected to contribute data; its
        // masked shares enter the aggregate once certified here
        if node.role == NodeRole::Core {
            self.biller.include_client(node.id());
        }
        self.network_mut().members.insert(node);
    }

    async fn dispatch(
        &mut self,
        message: Message,
        _origin: Option<NodeInfo>,
    ) -> Result<Option<Message>, NetworkError> {
        match message.body {
            Payload::Connect(connect) => {
                handle_connect(self, message.reply_address, connect).await?;
                Ok(None)
            }
            Payload::CycleContext(cyc) => {
                self.handle_cycle_context(cyc).await?;
                Ok(None)
            }
            Payload::HiddenData(data) => {
                self.handle_hidden_data(*data).await?;
                Ok(None)
            }
            other => {
                warn!(kind = other.kind(), "message not handled by edge role");
                Ok(None)
            }
        }
    }
}
