//! Differentially-private dummy-row synthesis.
//!
//! Each party pads its table with dummy rows before the intersection so
//! the revealed cardinality only leaks a DP-protected quantity. A column
//! gets τ "common" rows drawn from a PRNG seeded identically on both sides
//! (each side keeps a private random half of a 2τ pool, so the dummy overlap
//! itself is random) and (k−1)·τ "unique" rows from the party's private
//! PRNG.

use binnacle::{AesRng, Block};
use rand::{seq::SliceRandom, Rng, SeedableRng};

/// Length of a synthesized identifier before its suffixes.
pub const IDENTIFIER_LEN: usize = 32;

const ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz";
const NUMBER: &[u8] = b"0123456789";

/// Synthesize `n` random identifiers, alternating digit and letter
/// characters, each followed by `suffix`.
pub fn random_keys(prng: &mut AesRng, n: usize, suffix: &str) -> Vec<String> {
    let mut result = Vec::with_capacity(n);
    for _ in 0..n {
        let mut identifier = String::with_capacity(IDENTIFIER_LEN + suffix.len());
        for idx in 0..IDENTIFIER_LEN {
            let byte = prng.gen::<u8>();
            if idx & 1 == 1 {
                identifier.push(ALPHABET[byte as usize % ALPHABET.len()] as char);
            } else {
                identifier.push(NUMBER[byte as usize % NUMBER.len()] as char);
            }
        }
        identifier.push_str(suffix);
        result.push(identifier);
    }
    result
}

/// Synthesize `n` random feature values, or zeros when `is_zero` is set.
pub fn random_features(prng: &mut AesRng, n: usize, is_zero: bool) -> Vec<u64> {
    if is_zero {
        vec![0; n]
    } else {
        (0..n).map(|_| prng.gen::<u64>()).collect()
    }
}

/// The dummy-row sampler: a private PRNG plus a PRNG whose seed is agreed
/// with the peer.
pub struct DpSampling {
    prng: AesRng,
    common_prng: AesRng,
}

impl Default for DpSampling {
    fn default() -> Self {
        Self::new()
    }
}

impl DpSampling {
    /// Create a sampler with a fresh private seed and a zero common seed;
    /// call `set_common_seed` before sampling.
    pub fn new() -> Self {
        Self {
            prng: AesRng::new(),
            common_prng: AesRng::from_seed(Block::ZERO),
        }
    }

    /// Re-seed the common PRNG with the block agreed with the peer.
    pub fn set_common_seed(&mut self, seed: Block) {
        self.common_prng = AesRng::from_seed(seed);
    }

    /// Sample dummy rows for all key columns and feature columns.
    ///
    /// Column `j` holds, at offset `j·τ`, τ rows picked from the shared 2τ
    /// pool (made column-specific by appending the digit `j`), surrounded by
    /// the `(k−1)·τ` unique rows carrying the role suffix. With
    /// `use_precomputed_tau` unset the pad is empty. `zero_column` (or −1)
    /// names the feature column whose dummy values must be zero.
    pub fn multi_key_sampling(
        &mut self,
        key_size: usize,
        feature_size: usize,
        zero_column: i64,
        is_sender: bool,
        use_precomputed_tau: bool,
        precomputed_tau: usize,
    ) -> (Vec<Vec<String>>, Vec<Vec<u64>>) {
        let tau = if use_precomputed_tau {
            precomputed_tau
        } else {
            0
        };
        let dummy_data_size = key_size * tau;

        let common_keys = random_keys(&mut self.common_prng, 2 * tau, "");
        let unique_suffix = if is_sender { "DA" } else { "DB" };
        let unique_keys = random_keys(&mut self.prng, (key_size - 1) * tau, unique_suffix);

        let mut dummied_features = Vec::with_capacity(feature_size);
        for feat_idx in 0..feature_size {
            dummied_features.push(random_features(
                &mut self.prng,
                dummy_data_size,
                feat_idx as i64 == zero_column,
            ));
        }

        let mut dummied_keys = Vec::with_capacity(key_size);
        for key_idx in 0..key_size {
            let digit = key_idx.to_string();
            let mut unique_keys_i: Vec<String> = unique_keys
                .iter()
                .map(|key| format!("{}{}", key, digit))
                .collect();
            let mut common_keys_i: Vec<String> = common_keys
                .iter()
                .map(|key| format!("{}{}", key, digit))
                .collect();
            // The private shuffle decides which τ of the 2τ shared rows this
            // party keeps.
            common_keys_i.shuffle(&mut self.prng);
            let insert_at = key_idx * tau;
            unique_keys_i.splice(
                insert_at..insert_at,
                common_keys_i.into_iter().take(tau),
            );
            dummied_keys.push(unique_keys_i);
        }
        (dummied_keys, dummied_features)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shapes() {
        let mut sampling = DpSampling::new();
        sampling.set_common_seed(Block::ZERO);
        let (keys, features) = sampling.multi_key_sampling(3, 2, -1, true, true, 10);
        assert_eq!(keys.len(), 3);
        assert_eq!(features.len(), 2);
        for column in &keys {
            assert_eq!(column.len(), 30);
        }
        for column in &features {
            assert_eq!(column.len(), 30);
        }
    }

    #[test]
    fn test_zero_column() {
        let mut sampling = DpSampling::new();
        sampling.set_common_seed(Block::ZERO);
        let (_, features) = sampling.multi_key_sampling(2, 3, 1, false, true, 8);
        assert!(features[1].iter().all(|v| *v == 0));
        assert!(features[0].iter().any(|v| *v != 0));
        assert!(features[2].iter().any(|v| *v != 0));
    }

    #[test]
    fn test_role_suffixes() {
        let mut sender = DpSampling::new();
        sender.set_common_seed(Block::ZERO);
        let (keys, _) = sender.multi_key_sampling(2, 0, -1, true, true, 4);
        assert!(keys[0].iter().any(|k| k.contains("DA")));
        assert!(keys[0].iter().all(|k| !k.contains("DB")));

        let mut receiver = DpSampling::new();
        receiver.set_common_seed(Block::ZERO);
        let (keys, _) = receiver.multi_key_sampling(2, 0, -1, false, true, 4);
        assert!(keys[1].iter().any(|k| k.contains("DB")));
    }

    // The two parties agree on the 2τ-row pool, and each column's common
    // rows end a distinct column digit, so rows never match across columns.
    #[test]
    fn test_common_pool_shared_and_column_specific() {
        let seed = rand::random::<Block>();
        let mut a = DpSampling::new();
        a.set_common_seed(seed);
        let mut b = DpSampling::new();
        b.set_common_seed(seed);
        let tau = 16;
        let (keys_a, _) = a.multi_key_sampling(2, 0, -1, true, true, tau);
        let (keys_b, _) = b.multi_key_sampling(2, 0, -1, false, true, tau);

        for col in 0..2 {
            let common_a: Vec<&String> = keys_a[col]
                .iter()
                .filter(|k| !k.contains("DA") && !k.contains("DB"))
                .collect();
            assert_eq!(common_a.len(), tau);
            let overlap = common_a
                .iter()
                .filter(|k| keys_b[col].contains(**k))
                .count();
            // Two random τ-subsets of a 2τ pool overlap, but rarely fully.
            assert!(overlap <= tau);
            // Cross-column: never a match, thanks to the appended digit.
            let cross = common_a
                .iter()
                .filter(|k| keys_b[1 - col].contains(**k))
                .count();
            assert_eq!(cross, 0);
        }
    }

    #[test]
    fn test_no_precomputed_tau_means_empty_pad() {
        let mut sampling = DpSampling::new();
        let (keys, features) = sampling.multi_key_sampling(2, 1, -1, true, false, 1440);
        assert!(keys.iter().all(|column| column.is_empty()));
        assert!(features.iter().all(|column| column.is_empty()));
    }
}
