use crate::masking::SharedMaskGenerator;
use crate::vector::{Flag, Vector};
use fhe::bfv;
use fhe_traits::{
    DeserializeParametrized, FheDecoder, FheDecrypter, FheEncoder, FheEncrypter,
    Serialize as FheSerialize,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;

/// Ring dimension of the leveled scheme.
const RING_DEGREE: usize = 1 << 14;

/// Plaintext modulus: 53-bit prime, congruent to 1 mod 2^15 so SIMD
/// batching is available at the full ring dimension.
const PLAINTEXT_MODULUS: u64 = 4_503_599_627_763_713;

/// Ciphertext modulus chain; leaves a wide noise margin for the
/// multiplicative depth 3 the bill kernel uses.
const MODULI_SIZES: [usize; 7] = [62; 7];

/// Decimal digits of fixed-point precision carried by encrypted value
/// vectors. Flag vectors are encrypted exactly, at scale 10^0.
pub const VALUE_SCALE: u32 = 6;

/// Error types for the hiding layer
#[derive(Debug, Error)]
pub enum HidingError {
    #[error("fhe library error: {0}")]
    Fhe(#[from] fhe::Error),
    #[error("ciphertext scales differ: 10^{0} vs 10^{1}")]
    ScaleMismatch(u32, u32),
    #[error("expected a unit-scale flag ciphertext, got scale 10^{0}")]
    NotFlagScale(u32),
    #[error("value {0} does not fit the plaintext domain at scale 10^{1}")]
    ValueOutOfRange(f64, u32),
    #[error("vector of length {0} exceeds cycle length {1}")]
    VectorTooLong(usize, usize),
}

/// A ciphertext at rest: the serialized polynomials plus the decimal
/// scale exponent its slots are encoded at. Arithmetic goes through a
/// hiding context, which holds the parameters needed to parse it.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EncryptedVector {
    pub(crate) bytes: Vec<u8>,
    pub(crate) scale: u32,
}

/// Homomorphic operations available with public material only.
pub trait HidingOps {
    fn cycle_length(&self) -> usize;

    /// Encrypt a real vector at the value scale, zero-padded to the
    /// batch size.
    fn encrypt(&self, values: &Vector<f64>) -> Result<EncryptedVector, HidingError>;

    /// Encrypt a 0/1 flag vector exactly, at unit scale.
    fn encrypt_flags(&self, flags: &Vector<Flag>) -> Result<EncryptedVector, HidingError>;

    fn add(
        &self,
        a: &EncryptedVector,
        b: &EncryptedVector,
    ) -> Result<EncryptedVector, HidingError>;

    /// Ciphertext-ciphertext product, relinearized.
    fn multiply(
        &self,
        a: &EncryptedVector,
        b: &EncryptedVector,
    ) -> Result<EncryptedVector, HidingError>;

    /// Multiply by a plaintext real vector encoded at `scale` decimal
    /// digits. The result carries the summed scale.
    fn multiply_plain(
        &self,
        a: &EncryptedVector,
        values: &Vector<f64>,
        scale: u32,
    ) -> Result<EncryptedVector, HidingError>;

    /// Multiply by a plaintext 0/1 vector; the operand scale is kept.
    fn multiply_plain_flags(
        &self,
        a: &EncryptedVector,
        flags: &Vector<Flag>,
    ) -> Result<EncryptedVector, HidingError>;

    /// `1 - flags`, element-wise, for a unit-scale flag ciphertext.
    fn invert_flags(&self, flags: &EncryptedVector) -> Result<EncryptedVector, HidingError>;
}

/// Decryption capability; only the private context has it.
pub trait DecryptOps {
    fn decrypt(&self, ct: &EncryptedVector) -> Result<Vector<f64>, HidingError>;
}

fn build_parameters() -> Result<Arc<bfv::BfvParameters>, HidingError> {
    Ok(bfv::BfvParametersBuilder::new()
        .set_degree(RING_DEGREE)
        .set_plaintext_modulus(PLAINTEXT_MODULUS)
        .set_moduli_sizes(&MODULI_SIZES)
        .build_arc()?)
}

/// Shareable hiding material: scheme parameters, encryption key, and the
/// relinearization key.
///
/// The relinearization key is an explicit field, serialized next to the
/// public key and passed to every ciphertext product; receivers never
/// depend on an ambient key set that a deserialization could clobber.
#[derive(Clone)]
pub struct PublicHidingContext {
    cycle_length: usize,
    batch_size: usize,
    params: Arc<bfv::BfvParameters>,
    public_key: bfv::PublicKey,
    relin_key: bfv::RelinearizationKey,
}

#[derive(Serialize, Deserialize)]
struct PublicHidingContextWire {
    cycle_length: u64,
    public_key: Vec<u8>,
    relin_key: Vec<u8>,
}

impl Serialize for PublicHidingContext {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        PublicHidingContextWire {
            cycle_length: self.cycle_length as u64,
            public_key: self.public_key.to_bytes(),
            relin_key: self.relin_key.to_bytes(),
        }
        .serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for PublicHidingContext {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let wire = PublicHidingContextWire::deserialize(deserializer)?;
        PublicHidingContext::from_wire(wire).map_err(serde::de::Error::custom)
    }
}

impl std::fmt::Debug for PublicHidingContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PublicHidingContext")
            .field("cycle_length", &self.cycle_length)
            .field("batch_size", &self.batch_size)
            .finish()
    }
}

impl PublicHidingContext {
    fn from_wire(wire: PublicHidingContextWire) -> Result<Self, HidingError> {
        let cycle_length = wire.cycle_length as usize;
        let params = build_parameters()?;
        let public_key = bfv::PublicKey::from_bytes(&wire.public_key, &params)?;
        let relin_key = bfv::RelinearizationKey::from_bytes(&wire.relin_key, &params)?;
        Ok(PublicHidingContext {
            cycle_length,
            batch_size: cycle_length.next_power_of_two(),
            params,
            public_key,
            relin_key,
        })
    }

    fn parse(&self, ct: &EncryptedVector) -> Result<bfv::Ciphertext, HidingError> {
        Ok(bfv::Ciphertext::from_bytes(&ct.bytes, &self.params)?)
    }

    fn wrap(&self, ct: &bfv::Ciphertext, scale: u32) -> EncryptedVector {
        EncryptedVector {
            bytes: ct.to_bytes(),
            scale,
        }
    }

    /// Pack a real vector as fixed-point slots at the given decimal scale.
    fn encode_fixed(
        &self,
        values: &Vector<f64>,
        scale: u32,
    ) -> Result<bfv::Plaintext, HidingError> {
        if values.len() > self.cycle_length {
            return Err(HidingError::VectorTooLong(values.len(), self.cycle_length));
        }
        let factor = 10f64.powi(scale as i32);
        let modulus = PLAINTEXT_MODULUS as i128;
        let mut slots = vec![0u64; self.batch_size];
        for (slot, v) in slots.iter_mut().zip(values.iter()) {
            let scaled = (v * factor).round();
            if !scaled.is_finite() || scaled.abs() * 2.0 >= modulus as f64 {
                return Err(HidingError::ValueOutOfRange(*v, scale));
            }
            *slot = (scaled as i128).rem_euclid(modulus) as u64;
        }
        Ok(bfv::Plaintext::try_encode(
            slots.as_slice(),
            bfv::Encoding::simd(),
            &self.params,
        )?)
    }

    fn encode_flags(&self, flags: &Vector<Flag>) -> Result<bfv::Plaintext, HidingError> {
        if flags.len() > self.cycle_length {
            return Err(HidingError::VectorTooLong(flags.len(), self.cycle_length));
        }
        let mut slots = vec![0u64; self.batch_size];
        for (slot, flag) in slots.iter_mut().zip(flags.iter()) {
            *slot = u64::from(*flag);
        }
        Ok(bfv::Plaintext::try_encode(
            slots.as_slice(),
            bfv::Encoding::simd(),
            &self.params,
        )?)
    }

    fn encrypt_plaintext(
        &self,
        pt: &bfv::Plaintext,
        scale: u32,
    ) -> Result<EncryptedVector, HidingError> {
        let ct: bfv::Ciphertext = self.public_key.try_encrypt(pt, &mut rand09::rng())?;
        Ok(self.wrap(&ct, scale))
    }
}

impl HidingOps for PublicHidingContext {
    fn cycle_length(&self) -> usize {
        self.cycle_length
    }

    fn encrypt(&self, values: &Vector<f64>) -> Result<EncryptedVector, HidingError> {
        let pt = self.encode_fixed(values, VALUE_SCALE)?;
        self.encrypt_plaintext(&pt, VALUE_SCALE)
    }

    fn encrypt_flags(&self, flags: &Vector<Flag>) -> Result<EncryptedVector, HidingError> {
        let pt = self.encode_flags(flags)?;
        self.encrypt_plaintext(&pt, 0)
    }

    fn add(
        &self,
        a: &EncryptedVector,
        b: &EncryptedVector,
    ) -> Result<EncryptedVector, HidingError> {
        if a.scale != b.scale {
            return Err(HidingError::ScaleMismatch(a.scale, b.scale));
        }
        let sum = &self.parse(a)? + &self.parse(b)?;
        Ok(self.wrap(&sum, a.scale))
    }

    fn multiply(
        &self,
        a: &EncryptedVector,
        b: &EncryptedVector,
    ) -> Result<EncryptedVector, HidingError> {
        let mut product = &self.parse(a)? * &self.parse(b)?;
        self.relin_key.relinearizes(&mut product)?;
        Ok(self.wrap(&product, a.scale + b.scale))
    }

    fn multiply_plain(
        &self,
        a: &EncryptedVector,
        values: &Vector<f64>,
        scale: u32,
    ) -> Result<EncryptedVector, HidingError> {
        let pt = self.encode_fixed(values, scale)?;
        let product = &self.parse(a)? * &pt;
        Ok(self.wrap(&product, a.scale + scale))
    }

    fn multiply_plain_flags(
        &self,
        a: &EncryptedVector,
        flags: &Vector<Flag>,
    ) -> Result<EncryptedVector, HidingError> {
        let pt = self.encode_flags(flags)?;
        let product = &self.parse(a)? * &pt;
        Ok(self.wrap(&product, a.scale))
    }

    fn invert_flags(&self, flags: &EncryptedVector) -> Result<EncryptedVector, HidingError> {
        if flags.scale != 0 {
            return Err(HidingError::NotFlagScale(flags.scale));
        }
        let ones = self.encrypt_flags(&Vector::new(self.cycle_length, 1))?;
        let inverted = &self.parse(&ones)? - &self.parse(flags)?;
        Ok(self.wrap(&inverted, 0))
    }
}

/// Private hiding context: the public material plus the secret key.
pub struct HidingContext {
    secret_key: bfv::SecretKey,
    public: PublicHidingContext,
}

impl HidingContext {
    /// Build parameters and generate fresh key material for cycles of
    /// `cycle_length` slots.
    pub fn new(cycle_length: usize) -> Result<Self, HidingError> {
        let params = build_parameters()?;
        let mut rng = rand09::rng();
        let secret_key = bfv::SecretKey::random(&params, &mut rng);
        let public_key = bfv::PublicKey::new(&secret_key, &mut rng);
        let relin_key = bfv::RelinearizationKey::new(&secret_key, &mut rng)?;
        Ok(HidingContext {
            secret_key,
            public: PublicHidingContext {
                cycle_length,
                batch_size: cycle_length.next_power_of_two(),
                params,
                public_key,
                relin_key,
            },
        })
    }

    /// The shareable subset: parameters and public keys, no decryption.
    pub fn public_view(&self) -> PublicHidingContext {
        self.public.clone()
    }

    /// Add additive masks to a plaintext vector. The generator is passed
    /// explicitly; the context holds no masking state.
    pub fn mask(
        &self,
        masks: &SharedMaskGenerator,
        values: &Vector<f64>,
        iv: u128,
    ) -> Vector<f64> {
        values + &masks.generate_masks(iv, values.len())
    }
}

impl HidingOps for HidingContext {
    fn cycle_length(&self) -> usize {
        self.public.cycle_length()
    }

    fn encrypt(&self, values: &Vector<f64>) -> Result<EncryptedVector, HidingError> {
        self.public.encrypt(values)
    }

    fn encrypt_flags(&self, flags: &Vector<Flag>) -> Result<EncryptedVector, HidingError> {
        self.public.encrypt_flags(flags)
    }

    fn add(
        &self,
        a: &EncryptedVector,
        b: &EncryptedVector,
    ) -> Result<EncryptedVector, HidingError> {
        self.public.add(a, b)
    }

    fn multiply(
        &self,
        a: &EncryptedVector,
        b: &EncryptedVector,
    ) -> Result<EncryptedVector, HidingError> {
        self.public.multiply(a, b)
    }

    fn multiply_plain(
        &self,
        a: &EncryptedVector,
        values: &Vector<f64>,
        scale: u32,
    ) -> Result<EncryptedVector, HidingError> {
        self.public.multiply_plain(a, values, scale)
    }

    fn multiply_plain_flags(
        &self,
        a: &EncryptedVector,
        flags: &Vector<Flag>,
    ) -> Result<EncryptedVector, HidingError> {
        self.public.multiply_plain_flags(a, flags)
    }

    fn invert_flags(&self, flags: &EncryptedVector) -> Result<EncryptedVector, HidingError> {
        self.public.invert_flags(flags)
    }
}

impl DecryptOps for HidingContext {
    fn decrypt(&self, ct: &EncryptedVector) -> Result<Vector<f64>, HidingError> {
        let parsed = self.public.parse(ct)?;
        let pt = self.secret_key.try_decrypt(&parsed)?;
        let slots = Vec::<u64>::try_decode(&pt, bfv::Encoding::simd())?;
        let factor = 10f64.powi(ct.scale as i32);
        let half = PLAINTEXT_MODULUS / 2;
        Ok(slots
            .iter()
            .take(self.public.cycle_length)
            .map(|&slot| {
                let centered = if slot > half {
                    slot as i128 - PLAINTEXT_MODULUS as i128
                } else {
                    slot as i128
                };
                centered as f64 / factor
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CYCLE_LENGTH: usize = 8;

    fn assert_close(got: &Vector<f64>, want: &[f64]) {
        assert_eq!(got.len(), want.len());
        for (g, w) in got.iter().zip(want.iter()) {
            assert!((g - w).abs() < 1e-5, "got {g}, want {w}");
        }
    }

    #[test]
    fn test_encrypt_decrypt_round_trip() {
        let hc = HidingContext::new(CYCLE_LENGTH).unwrap();
        let values = vec![0.0, 1.5, -2.25, 0.21, -0.05, 100.0, -99.99, 0.00001];
        let ct = hc.encrypt(&Vector::from(values.clone())).unwrap();
        assert_close(&hc.decrypt(&ct).unwrap(), &values);
    }

    #[test]
    fn test_short_vector_is_zero_padded() {
        let hc = HidingContext::new(CYCLE_LENGTH).unwrap();
        let ct = hc.encrypt(&Vector::from(vec![3.5, -1.0])).unwrap();
        assert_close(
            &hc.decrypt(&ct).unwrap(),
            &[3.5, -1.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0],
        );
    }

    #[test]
    fn test_flags_round_trip_exactly() {
        let hc = HidingContext::new(CYCLE_LENGTH).unwrap();
        let flags = Vector::from(vec![1u8, 0, 1, 1, 0, 0, 1, 0]);
        let ct = hc.encrypt_flags(&flags).unwrap();
        let out = hc.decrypt(&ct).unwrap();
        assert_close(&out, &[1.0, 0.0, 1.0, 1.0, 0.0, 0.0, 1.0, 0.0]);
    }

    #[test]
    fn test_invert_flags() {
        let hc = HidingContext::new(CYCLE_LENGTH).unwrap();
        let flags = Vector::from(vec![1u8, 0, 1, 0, 0, 1, 1, 0]);
        let ct = hc.encrypt_flags(&flags).unwrap();
        let inverted = hc.invert_flags(&ct).unwrap();
        assert_close(
            &hc.decrypt(&inverted).unwrap(),
            &[0.0, 1.0, 0.0, 1.0, 1.0, 0.0, 0.0, 1.0],
        );
    }

    #[test]
    fn test_invert_rejects_value_ciphertext() {
        let hc = HidingContext::new(CYCLE_LENGTH).unwrap();
        let ct = hc.encrypt(&Vector::new(CYCLE_LENGTH, 1.0)).unwrap();
        assert!(matches!(
            hc.invert_flags(&ct),
            Err(HidingError::NotFlagScale(VALUE_SCALE))
        ));
    }

    #[test]
    fn test_ciphertext_product() {
        let hc = HidingContext::new(CYCLE_LENGTH).unwrap();
        let a = hc.encrypt(&Vector::new(CYCLE_LENGTH, 2.5)).unwrap();
        let b = hc.encrypt(&Vector::new(CYCLE_LENGTH, -3.0)).unwrap();
        let product = hc.multiply(&a, &b).unwrap();
        assert_close(&hc.decrypt(&product).unwrap(), &[-7.5; CYCLE_LENGTH]);
    }

    #[test]
    fn test_plaintext_product_and_sum() {
        let hc = HidingContext::new(CYCLE_LENGTH).unwrap();
        let a = hc.encrypt(&Vector::new(CYCLE_LENGTH, 2.0)).unwrap();
        let scaled = hc
            .multiply_plain(&a, &Vector::new(CYCLE_LENGTH, 0.21), VALUE_SCALE)
            .unwrap();
        let b = hc.encrypt(&Vector::new(CYCLE_LENGTH, 1.0)).unwrap();
        let b_scaled = hc
            .multiply_plain(&b, &Vector::new(CYCLE_LENGTH, 0.11), VALUE_SCALE)
            .unwrap();
        let sum = hc.add(&scaled, &b_scaled).unwrap();
        assert_close(&hc.decrypt(&sum).unwrap(), &[0.53; CYCLE_LENGTH]);
    }

    #[test]
    fn test_add_rejects_mismatched_scales() {
        let hc = HidingContext::new(CYCLE_LENGTH).unwrap();
        let values = hc.encrypt(&Vector::new(CYCLE_LENGTH, 1.0)).unwrap();
        let flags = hc.encrypt_flags(&Vector::new(CYCLE_LENGTH, 1)).unwrap();
        assert!(matches!(
            hc.add(&values, &flags),
            Err(HidingError::ScaleMismatch(VALUE_SCALE, 0))
        ));
    }

    #[test]
    fn test_public_context_round_trip() {
        let hc = HidingContext::new(CYCLE_LENGTH).unwrap();
        let bytes = bincode::serialize(&hc.public_view()).unwrap();
        let phc: PublicHidingContext = bincode::deserialize(&bytes).unwrap();

        // Encrypt under the deserialized context, including a product that
        // exercises the transported relinearization key.
        let a = phc.encrypt(&Vector::new(CYCLE_LENGTH, 2.0)).unwrap();
        let flags = phc.encrypt_flags(&Vector::new(CYCLE_LENGTH, 1)).unwrap();
        let gated = phc.multiply(&a, &flags).unwrap();
        assert_close(&hc.decrypt(&gated).unwrap(), &[2.0; CYCLE_LENGTH]);
    }

    #[test]
    fn test_mask_delegates_to_generator() {
        use crate::convert::FixedPointConvertor;
        use crate::masking::SharedMaskGenerator;

        let hc = HidingContext::new(CYCLE_LENGTH).unwrap();
        let mut mg = SharedMaskGenerator::new(FixedPointConvertor::new(6, 4));
        mg.seed_for_peer(1);
        mg.accept_foreign_seed(7, 1);

        let values = Vector::new(CYCLE_LENGTH, 1.0);
        let masked = hc.mask(&mg, &values, 42);
        let expected = &values + &mg.generate_masks(42, CYCLE_LENGTH);
        assert_eq!(masked, expected);
    }
}
