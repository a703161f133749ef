use crate::cycle::{ClientId, CycleContext, CycleId, ValidationError};
use crate::hidden::HiddenData;
use crate::hiding::{HidingContext, HidingError, HidingOps};
use crate::masking::{masking_iv, SharedMaskGenerator};
use crate::vector::{Flag, Vector};
use serde::{Deserialize, Serialize};

/// One participant's clear metering data for a cycle.
///
/// Sign convention: positive utilization is consumption, negative is
/// supply. A slot's promise decides the participant's market role there;
/// a zero promise means the participant was not accepted for trading.
///
/// Lives only inside the originating core and is consumed once to
/// produce a [`HiddenData`].
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Data {
    pub client_id: ClientId,
    pub cycle_id: CycleId,
    pub utilization_promises: Vector<f64>,
    pub utilizations: Vector<f64>,
}

impl Data {
    pub fn new(
        client_id: ClientId,
        cycle_id: CycleId,
        utilization_promises: Vector<f64>,
        utilizations: Vector<f64>,
    ) -> Self {
        Data {
            client_id,
            cycle_id,
            utilization_promises,
            utilizations,
        }
    }

    pub fn consumptions(&self) -> Vector<f64> {
        self.utilizations.max_scalar(0.0)
    }

    pub fn supplies(&self) -> Vector<f64> {
        (&self.utilizations * -1.0).max_scalar(0.0)
    }

    pub fn consumption_promises(&self) -> Vector<f64> {
        self.utilization_promises.max_scalar(0.0)
    }

    pub fn supply_promises(&self) -> Vector<f64> {
        (&self.utilization_promises * -1.0).max_scalar(0.0)
    }

    /// Slots where the participant was accepted to trade as a consumer.
    pub fn accepted_consumer_flags(&self) -> Vector<Flag> {
        self.utilization_promises.positive_flags()
    }

    /// Slots where the participant was accepted to trade as a producer.
    pub fn accepted_producer_flags(&self) -> Vector<Flag> {
        (&self.utilization_promises * -1.0).positive_flags()
    }

    pub fn consumption_deviations(&self) -> Vector<f64> {
        self.consumptions() - self.consumption_promises()
    }

    pub fn supply_deviations(&self) -> Vector<f64> {
        self.supplies() - self.supply_promises()
    }

    /// Signed deviation from the promise, nonzero only in slots where the
    /// participant was accepted for trading. Over-supply counts positive,
    /// over-consumption negative.
    pub fn individual_deviations(&self) -> Vector<f64> {
        self.supply_deviations() * self.accepted_producer_flags().as_floats()
            - self.consumption_deviations() * self.accepted_consumer_flags().as_floats()
    }

    /// Slots with a positive consumption or supply deviation, restricted
    /// to the slots accepted for trading.
    pub fn positive_deviation_flags(&self) -> Vector<Flag> {
        let consumer = self.consumption_deviations().positive_flags()
            * self.accepted_consumer_flags();
        let producer =
            self.supply_deviations().positive_flags() * self.accepted_producer_flags();
        consumer ^ producer
    }

    /// Slots in which the participant takes part in the market as a
    /// peer-to-peer consumer.
    pub fn p2p_consumer_flags(&self) -> Vector<Flag> {
        self.consumption_promises().positive_flags()
    }

    /// Slots in which the participant takes part in the market as a
    /// peer-to-peer producer.
    pub fn p2p_producer_flags(&self) -> Vector<Flag> {
        self.supply_promises().positive_flags()
    }

    /// Hide this data: encrypt the vectors the billing kernel multiplies,
    /// mask the vectors that only ever get summed. The IV per masked
    /// field is derived from the cycle and the field name, so streams
    /// never repeat across cycles or fields.
    pub fn hide(
        &self,
        hc: &HidingContext,
        masks: &SharedMaskGenerator,
    ) -> Result<HiddenData, HidingError> {
        Ok(HiddenData {
            client_id: self.client_id,
            cycle_id: self.cycle_id,
            consumptions: hc.encrypt(&self.consumptions())?,
            supplies: hc.encrypt(&self.supplies())?,
            accepted_consumer_flags: hc.encrypt_flags(&self.accepted_consumer_flags())?,
            accepted_producer_flags: hc.encrypt_flags(&self.accepted_producer_flags())?,
            positive_deviation_flags: hc.encrypt_flags(&self.positive_deviation_flags())?,
            masked_individual_deviations: hc.mask(
                masks,
                &self.individual_deviations(),
                masking_iv(self.cycle_id, "individual_deviations"),
            ),
            masked_p2p_consumer_flags: hc.mask(
                masks,
                &self.p2p_consumer_flags().as_floats(),
                masking_iv(self.cycle_id, "p2p_consumer_flags"),
            ),
            masked_p2p_producer_flags: hc.mask(
                masks,
                &self.p2p_producer_flags().as_floats(),
                masking_iv(self.cycle_id, "p2p_producer_flags"),
            ),
            phc: hc.public_view(),
        })
    }

    pub fn check_validity(&self, cyc: &CycleContext) -> Result<(), ValidationError> {
        if self.cycle_id != cyc.cycle_id {
            return Err(ValidationError::CycleMismatch {
                data: self.cycle_id,
                context: cyc.cycle_id,
            });
        }
        if self.utilization_promises.len() != cyc.cycle_length {
            return Err(ValidationError::LengthMismatch {
                field: "utilization_promises",
                len: self.utilization_promises.len(),
                expected: cyc.cycle_length,
            });
        }
        if self.utilizations.len() != cyc.cycle_length {
            return Err(ValidationError::LengthMismatch {
                field: "utilizations",
                len: self.utilizations.len(),
                expected: cyc.cycle_length,
            });
        }
        Ok(())
    }
}
