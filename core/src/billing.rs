use crate::bill::HiddenBill;
use crate::cycle::{ClientId, CycleContext, CycleId, ValidationError};
use crate::hidden::HiddenData;
use crate::hiding::HidingError;
use std::collections::{HashMap, HashSet};
use thiserror::Error;

/// Error types for the shared billing process
#[derive(Debug, Error)]
pub enum BillingError {
    #[error("cannot run billing for cycle {0}: not ready")]
    NotReady(CycleId),
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error(transparent)]
    Hiding(#[from] HidingError),
}

/// Edge-side billing state: hidden data per cycle and client, cycle
/// contexts, and the certified client set.
///
/// The two client sets are deliberately distinct: aggregates are
/// recovered from the *included* clients' masked shares only (a
/// stranger's share would leak individual values through an incomplete
/// mask sum), while a hidden bill is computed for every client whose
/// data was *recorded*.
pub struct SharedBilling {
    client_data: HashMap<CycleId, HashMap<ClientId, HiddenData>>,
    cycle_contexts: HashMap<CycleId, CycleContext>,
    clients: HashSet<ClientId>,
}

impl SharedBilling {
    pub fn new() -> Self {
        SharedBilling {
            client_data: HashMap::new(),
            cycle_contexts: HashMap::new(),
            clients: HashSet::new(),
        }
    }

    /// Record a client's hidden data for its cycle.
    pub fn record_data(&mut self, data: HiddenData) {
        self.client_data
            .entry(data.cycle_id)
            .or_default()
            .insert(data.client_id, data);
    }

    /// Record a cycle context.
    pub fn record_context(&mut self, cyc: CycleContext) {
        self.cycle_contexts.insert(cyc.cycle_id, cyc);
    }

    pub fn context(&self, cycle_id: CycleId) -> Option<&CycleContext> {
        self.cycle_contexts.get(&cycle_id)
    }

    /// Include a client in coming billing cycles.
    pub fn include_client(&mut self, client: ClientId) {
        self.clients.insert(client);
    }

    /// Exclude a client from future billing cycles.
    pub fn exclude_client(&mut self, client: ClientId) {
        self.clients.remove(&client);
    }

    /// Whether bills can be computed for `cycle_id`: at least one
    /// certified client, the context present, and data recorded for
    /// every certified client. Monotone in the record operations.
    pub fn is_ready(&self, cycle_id: CycleId) -> bool {
        if self.clients.is_empty() || !self.cycle_contexts.contains_key(&cycle_id) {
            return false;
        }
        match self.client_data.get(&cycle_id) {
            Some(cycle_data) => self.clients.iter().all(|c| cycle_data.contains_key(c)),
            None => false,
        }
    }

    /// Compute hidden bills for every recorded client of `cycle_id`,
    /// using aggregates recovered from the included clients' shares.
    pub fn compute_bills(
        &self,
        cycle_id: CycleId,
    ) -> Result<HashMap<ClientId, HiddenBill>, BillingError> {
        if !self.is_ready(cycle_id) {
            return Err(BillingError::NotReady(cycle_id));
        }

        // is_ready established both lookups
        let cycle_data = &self.client_data[&cycle_id];
        let cyc = &self.cycle_contexts[&cycle_id];

        let included: Vec<&HiddenData> = self
            .clients
            .iter()
            .filter_map(|c| cycle_data.get(c))
            .collect();
        let scd = HiddenData::unmask_data(&included);
        scd.check_validity(cyc)?;

        let mut bills = HashMap::new();
        for (client, data) in cycle_data {
            bills.insert(*client, data.compute_hidden_bill(&scd, cyc)?);
        }
        Ok(bills)
    }

    /// Drop a completed cycle's hidden data.
    pub fn discard_cycle(&mut self, cycle_id: CycleId) {
        self.client_data.remove(&cycle_id);
    }
}

impl Default for SharedBilling {
    fn default() -> Self {
        Self::new()
    }
}
