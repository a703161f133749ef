use crate::convert::FixedPointConvertor;
use crate::cycle::{ClientId, CycleId};
use crate::vector::Vector;
use rand::RngCore;
use rand_pcg::Pcg64;
use sha2::{Digest, Sha256};
use std::collections::HashMap;

/// 128-bit pairwise mask seed.
pub type Seed = u128;

// Fixed PCG stream selector so both ends of a seed exchange derive the
// same output sequence.
const MASK_STREAM: u128 = 0xa02b_dbf7_bb3c_0a7a_c28f_a16a_64ab_f96d;

/// Additive mask generator backed by pairwise-exchanged PRG seeds.
///
/// Every peer pair shares two seeds: one this party generated (`owned`) and
/// one it received (`foreign`). Masks derived from owned seeds are added,
/// masks from foreign seeds subtracted, so over a closed group in which
/// every pair has exchanged, the masks sum to zero and aggregates can be
/// recovered from the masked shares alone.
pub struct SharedMaskGenerator {
    convertor: FixedPointConvertor,
    owned_seeds: HashMap<ClientId, Seed>,
    foreign_seeds: HashMap<ClientId, Seed>,
}

impl SharedMaskGenerator {
    pub fn new(convertor: FixedPointConvertor) -> Self {
        SharedMaskGenerator {
            convertor,
            owned_seeds: HashMap::new(),
            foreign_seeds: HashMap::new(),
        }
    }

    /// Seed to share with `peer`. Repeated calls return the stored seed;
    /// re-rolling after an exchange would break cancellation.
    pub fn seed_for_peer(&mut self, peer: ClientId) -> Seed {
        *self.owned_seeds.entry(peer).or_insert_with(random_seed)
    }

    pub fn has_seed_for_peer(&self, peer: ClientId) -> bool {
        self.owned_seeds.contains_key(&peer)
    }

    /// Store a seed received from `peer`.
    pub fn accept_foreign_seed(&mut self, seed: Seed, peer: ClientId) {
        self.foreign_seeds.insert(peer, seed);
    }

    /// Whether every peer we generated a seed for has sent one back and
    /// vice-versa. Data must not be masked and submitted while unstable.
    pub fn is_stable(&self) -> bool {
        self.owned_seeds.len() == self.foreign_seeds.len()
            && self
                .owned_seeds
                .keys()
                .all(|peer| self.foreign_seeds.contains_key(peer))
    }

    /// Number of peers with a completed two-way exchange.
    pub fn exchanged_peer_count(&self) -> usize {
        self.owned_seeds
            .keys()
            .filter(|peer| self.foreign_seeds.contains_key(peer))
            .count()
    }

    /// Generate `n` additive masks for initialisation vector `iv`.
    pub fn generate_masks(&self, iv: u128, n: usize) -> Vector<f64> {
        assert!(
            !(self.owned_seeds.is_empty() && self.foreign_seeds.is_empty()),
            "mask generator has no seeds"
        );

        let mut masks = vec![0.0; n];
        for seed in self.owned_seeds.values() {
            let mut prg = Pcg64::new(seed.wrapping_add(iv), MASK_STREAM);
            for mask in masks.iter_mut() {
                *mask += self.convertor.convert(prg.next_u64());
            }
        }
        for seed in self.foreign_seeds.values() {
            let mut prg = Pcg64::new(seed.wrapping_add(iv), MASK_STREAM);
            for mask in masks.iter_mut() {
                *mask -= self.convertor.convert(prg.next_u64());
            }
        }
        Vector::from(masks)
    }

    /// Sum masked shares; over a closed group the masks cancel and the
    /// per-slot aggregate remains.
    pub fn unmask(shares: &[Vector<f64>]) -> Vector<f64> {
        let mut total = Vector::new(shares[0].len(), 0.0);
        for share in shares {
            total = &total + share;
        }
        total
    }
}

/// Masking initialisation vector for a `(cycle, field)` pair: the low
/// 128 bits, little-endian, of `SHA256("round=<cycle_id>, <field>")`.
/// Distinct fields and cycles never share a PRG stream.
pub fn masking_iv(cycle_id: CycleId, field: &str) -> u128 {
    let digest = Sha256::digest(format!("round={cycle_id}, {field}").as_bytes());
    let mut low = [0u8; 16];
    low.copy_from_slice(&digest[..16]);
    u128::from_le_bytes(low)
}

fn random_seed() -> Seed {
    let mut bytes = [0u8; 16];
    rand::rngs::OsRng.fill_bytes(&mut bytes);
    u128::from_le_bytes(bytes)
}
