// Private billing core
// Vector algebra, masking, homomorphic hiding, and the bill computation kernel

pub mod bill;
pub mod billing;
pub mod convert;
pub mod crypto;
pub mod cycle;
pub mod data;
pub mod hidden;
pub mod hiding;
pub mod masking;
pub mod vector;

pub use bill::{Bill, HiddenBill};
pub use billing::{BillingError, SharedBilling};
pub use convert::FixedPointConvertor;
pub use cycle::{ClientId, CycleContext, CycleId, SharedCycleData, ValidationError};
pub use data::Data;
pub use hidden::HiddenData;
pub use hiding::{
    DecryptOps, EncryptedVector, HidingContext, HidingError, HidingOps, PublicHidingContext,
};
pub use masking::{masking_iv, Seed, SharedMaskGenerator};
pub use vector::{Flag, Vector};
