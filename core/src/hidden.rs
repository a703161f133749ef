use crate::bill::HiddenBill;
use crate::cycle::{ClientId, CycleContext, CycleId, SharedCycleData, ValidationError};
use crate::hiding::{EncryptedVector, HidingError, HidingOps, PublicHidingContext, VALUE_SCALE};
use crate::vector::Vector;
use serde::{Deserialize, Serialize};

/// One participant's hidden cycle data as it travels to an edge.
///
/// Vectors the billing kernel multiplies are encrypted; vectors that only
/// ever get summed carry an additive mask instead. Summing the masked
/// vectors of every participant in a closed seed-exchange group cancels
/// the masks and yields the per-slot aggregate.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct HiddenData {
    pub client_id: ClientId,
    pub cycle_id: CycleId,
    pub consumptions: EncryptedVector,
    pub supplies: EncryptedVector,
    pub accepted_consumer_flags: EncryptedVector,
    pub accepted_producer_flags: EncryptedVector,
    pub positive_deviation_flags: EncryptedVector,
    pub masked_individual_deviations: Vector<f64>,
    pub masked_p2p_consumer_flags: Vector<f64>,
    pub masked_p2p_producer_flags: Vector<f64>,
    pub phc: PublicHidingContext,
}

impl HiddenData {
    /// Sum the masked shares of a closed participant group; the masks
    /// cancel and the aggregates remain.
    pub fn unmask_data(cycle_data: &[&HiddenData]) -> SharedCycleData {
        let len = cycle_data[0].masked_individual_deviations.len();
        let mut total_deviations = Vector::new(len, 0.0);
        let mut consumer_counts = Vector::new(len, 0.0);
        let mut producer_counts = Vector::new(len, 0.0);

        for datum in cycle_data {
            total_deviations = &total_deviations + &datum.masked_individual_deviations;
            consumer_counts = &consumer_counts + &datum.masked_p2p_consumer_flags;
            producer_counts = &producer_counts + &datum.masked_p2p_producer_flags;
        }

        SharedCycleData {
            total_deviations,
            total_p2p_consumers: consumer_counts,
            total_p2p_producers: producer_counts,
        }
    }

    /// The billing kernel. Everything participant-specific stays under
    /// encryption; the aggregates and prices are public per-slot vectors.
    ///
    /// Rejected participants pay retail and earn feed-in. Accepted
    /// participants settle at the trading price, with a retail-shaped
    /// top-up for positive deviators when the market is net short and a
    /// feed-in-shaped reward reduction when it is net long.
    pub fn compute_hidden_bill(
        &self,
        scd: &SharedCycleData,
        cyc: &CycleContext,
    ) -> Result<HiddenBill, HidingError> {
        let phc = &self.phc;

        // Bump zero counts so the plaintext division below is defined.
        // When a count really is zero, every matching flag is zero too,
        // so the bumped rows contribute nothing.
        let total_p2p_consumers = scd.total_p2p_consumers.max_scalar(1.0);
        let total_p2p_producers = scd.total_p2p_producers.max_scalar(1.0);

        let rejected_consumer = phc.invert_flags(&self.accepted_consumer_flags)?;
        let rejected_producer = phc.invert_flags(&self.accepted_producer_flags)?;

        // Not accepted for trading: retail price for consumption,
        // feed-in tariff for supply.
        let bill_no_p2p = phc.multiply(
            &phc.multiply_plain(&self.consumptions, &cyc.retail_prices, VALUE_SCALE)?,
            &rejected_consumer,
        )?;
        let reward_no_p2p = phc.multiply(
            &phc.multiply_plain(&self.supplies, &cyc.feed_in_tariffs, VALUE_SCALE)?,
            &rejected_producer,
        )?;

        // Accepted: both sides settle at the trading price.
        let base_bill =
            phc.multiply_plain(&self.consumptions, &cyc.trading_prices, VALUE_SCALE)?;
        let base_reward =
            phc.multiply_plain(&self.supplies, &cyc.trading_prices, VALUE_SCALE)?;

        // bill = consumption * trading + TD/nr_consumers * (retail - trading)
        // for positive deviators while the market is net short.
        let bill_supplement = ((&cyc.retail_prices - &cyc.trading_prices)
            / total_p2p_consumers)
            * scd.total_deviations.clone();
        let bill_supplement_ct = phc.multiply_plain_flags(
            &phc.multiply_plain(
                &self.positive_deviation_flags,
                &bill_supplement,
                2 * VALUE_SCALE,
            )?,
            &scd.negative_total_deviation_flags(),
        )?;

        // reward = supply * trading + TD/nr_producers * (feed_in - trading)
        // for positive deviators while the market is net long. The second
        // term is negative: the tariff sits below the trading price.
        let reward_penalty = ((&cyc.feed_in_tariffs - &cyc.trading_prices)
            / total_p2p_producers)
            * scd.total_deviations.clone();
        let reward_penalty_ct = phc.multiply_plain_flags(
            &phc.multiply_plain(
                &self.positive_deviation_flags,
                &reward_penalty,
                2 * VALUE_SCALE,
            )?,
            &scd.positive_total_deviation_flags(),
        )?;

        let bill_p2p = phc.multiply(
            &phc.add(&base_bill, &bill_supplement_ct)?,
            &self.accepted_consumer_flags,
        )?;
        let reward_p2p = phc.multiply(
            &phc.add(&base_reward, &reward_penalty_ct)?,
            &self.accepted_producer_flags,
        )?;

        Ok(HiddenBill {
            cycle_id: self.cycle_id,
            hidden_bill: phc.add(&bill_p2p, &bill_no_p2p)?,
            hidden_reward: phc.add(&reward_p2p, &reward_no_p2p)?,
        })
    }

    pub fn check_validity(&self, cyc: &CycleContext) -> Result<(), ValidationError> {
        for (field, vec) in [
            (
                "masked_individual_deviations",
                &self.masked_individual_deviations,
            ),
            ("masked_p2p_consumer_flags", &self.masked_p2p_consumer_flags),
            ("masked_p2p_producer_flags", &self.masked_p2p_producer_flags),
        ] {
            if vec.len() != cyc.cycle_length {
                return Err(ValidationError::LengthMismatch {
                    field,
                    len: vec.len(),
                    expected: cyc.cycle_length,
                });
            }
        }
        Ok(())
    }
}
