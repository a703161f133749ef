use crate::cycle::{CycleContext, CycleId, ValidationError};
use crate::hiding::{DecryptOps, EncryptedVector, HidingContext, HidingError};
use crate::vector::Vector;
use serde::{Deserialize, Serialize};

/// An encrypted bill/reward pair on its way back to the owning core.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct HiddenBill {
    pub cycle_id: CycleId,
    pub hidden_bill: EncryptedVector,
    pub hidden_reward: EncryptedVector,
}

impl HiddenBill {
    /// Decrypt with the owner's secret material and strip the scheme
    /// noise by rounding to five fractional digits.
    pub fn reveal(&self, hc: &HidingContext) -> Result<Bill, HidingError> {
        Ok(Bill {
            cycle_id: self.cycle_id,
            bill: round5(hc.decrypt(&self.hidden_bill)?),
            reward: round5(hc.decrypt(&self.hidden_reward)?),
        })
    }
}

fn round5(values: Vector<f64>) -> Vector<f64> {
    values
        .into_iter()
        .map(|v| (v * 1e5).round() / 1e5)
        .collect()
}

/// A revealed per-slot bill/reward pair.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Bill {
    pub cycle_id: CycleId,
    pub bill: Vector<f64>,
    pub reward: Vector<f64>,
}

impl Bill {
    /// Net amount owed over the cycle.
    pub fn total(&self) -> f64 {
        self.bill.sum() - self.reward.sum()
    }

    pub fn check_validity(&self, cyc: &CycleContext) -> Result<(), ValidationError> {
        for (field, vec) in [("bill", &self.bill), ("reward", &self.reward)] {
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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_total_is_bill_minus_reward() {
        let bill = Bill {
            cycle_id: 1,
            bill: Vector::from(vec![0.21, 0.21, 0.0]),
            reward: Vector::from(vec![0.0, 0.05, 0.05]),
        };
        assert!((bill.total() - 0.32).abs() < 1e-12);
    }

    #[test]
    fn test_validity_against_context() {
        let cyc = CycleContext::flat(1, 3, 0.21, 0.05, 0.11);
        let bill = Bill {
            cycle_id: 1,
            bill: Vector::new(3, 0.0),
            reward: Vector::new(3, 0.0),
        };
        assert!(bill.check_validity(&cyc).is_ok());

        let short = Bill {
            cycle_id: 1,
            bill: Vector::new(2, 0.0),
            reward: Vector::new(3, 0.0),
        };
        assert!(short.check_validity(&cyc).is_err());
    }

    #[test]
    fn test_bill_serde_round_trip() {
        let bill = Bill {
            cycle_id: 9,
            bill: Vector::from(vec![0.1, 0.2]),
            reward: Vector::from(vec![0.0, 0.05]),
        };
        let bytes = bincode::serialize(&bill).unwrap();
        assert_eq!(bincode::deserialize::<Bill>(&bytes).unwrap(), bill);
    }
}
