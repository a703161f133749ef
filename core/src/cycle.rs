use crate::vector::{Flag, Vector};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub type CycleId = u64;
pub type ClientId = u64;

/// Error types for entity validity checks
#[derive(Debug, Error, PartialEq)]
pub enum ValidationError {
    #[error("vector `{field}` has length {len}, cycle length is {expected}")]
    LengthMismatch {
        field: &'static str,
        len: usize,
        expected: usize,
    },
    #[error("data is for cycle {data}, context is for cycle {context}")]
    CycleMismatch { data: CycleId, context: CycleId },
}

fn check_length(
    field: &'static str,
    vec: &Vector<f64>,
    expected: usize,
) -> Result<(), ValidationError> {
    if vec.len() != expected {
        return Err(ValidationError::LengthMismatch {
            field,
            len: vec.len(),
            expected,
        });
    }
    Ok(())
}

/// Public market parameters for one billing cycle.
///
/// Immutable once created; distributed in plaintext to every node.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CycleContext {
    pub cycle_id: CycleId,
    pub cycle_length: usize,
    pub retail_prices: Vector<f64>,
    pub feed_in_tariffs: Vector<f64>,
    pub trading_prices: Vector<f64>,
}

impl CycleContext {
    pub fn new(
        cycle_id: CycleId,
        cycle_length: usize,
        retail_prices: Vector<f64>,
        feed_in_tariffs: Vector<f64>,
        trading_prices: Vector<f64>,
    ) -> Result<Self, ValidationError> {
        let cyc = CycleContext {
            cycle_id,
            cycle_length,
            retail_prices,
            feed_in_tariffs,
            trading_prices,
        };
        cyc.check_validity()?;
        Ok(cyc)
    }

    /// Flat-priced context, every slot at the same three prices.
    pub fn flat(
        cycle_id: CycleId,
        cycle_length: usize,
        retail: f64,
        feed_in: f64,
        trading: f64,
    ) -> Self {
        CycleContext {
            cycle_id,
            cycle_length,
            retail_prices: Vector::new(cycle_length, retail),
            feed_in_tariffs: Vector::new(cycle_length, feed_in),
            trading_prices: Vector::new(cycle_length, trading),
        }
    }

    pub fn check_validity(&self) -> Result<(), ValidationError> {
        check_length("retail_prices", &self.retail_prices, self.cycle_length)?;
        check_length("feed_in_tariffs", &self.feed_in_tariffs, self.cycle_length)?;
        check_length("trading_prices", &self.trading_prices, self.cycle_length)?;
        Ok(())
    }
}

/// Per-slot aggregates recovered by summing the masked shares of every
/// included participant.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SharedCycleData {
    pub total_deviations: Vector<f64>,
    pub total_p2p_consumers: Vector<f64>,
    pub total_p2p_producers: Vector<f64>,
}

impl SharedCycleData {
    /// Slots in which the market as a whole over-produced.
    pub fn positive_total_deviation_flags(&self) -> Vector<Flag> {
        self.total_deviations.positive_flags()
    }

    /// Slots in which the market as a whole over-consumed.
    pub fn negative_total_deviation_flags(&self) -> Vector<Flag> {
        (&self.total_deviations * -1.0).positive_flags()
    }

    pub fn check_validity(&self, cyc: &CycleContext) -> Result<(), ValidationError> {
        check_length("total_deviations", &self.total_deviations, cyc.cycle_length)?;
        check_length(
            "total_p2p_consumers",
            &self.total_p2p_consumers,
            cyc.cycle_length,
        )?;
        check_length(
            "total_p2p_producers",
            &self.total_p2p_producers,
            cyc.cycle_length,
        )?;
        Ok(())
    }
}
