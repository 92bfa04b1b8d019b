//! The differentially-private cardinality/attribution PSI state machine.
//!
//! One session runs, in lockstep with the peer: parameter consistency
//! checks, Paillier public-key exchange, size sync, optional DP dummy
//! padding, multi-key DH matching column by column, Paillier feature
//! exchange, and additive-share generation over 2^64.

use crate::{
    config::PsiParams,
    ecc::{EccCipher, CURVE_ID_P256, POINT_BYTES},
    errors::Error,
    paillier::Paillier,
    sampling::DpSampling,
    utils::{generate_permutation, permute},
};
use binnacle::{AbstractChannel, AesRng, Block};
use log::info;
use num_bigint::{BigUint, RandBigInt};
use num_traits::One;
use rayon::prelude::*;

/// Bytes kept of a double-encrypted point for equality checks. Sound while
/// 2·u·v ≪ 2^96 for row counts u and v.
pub const COMPARE_BYTES: usize = 12;
/// Bit width of a feature value and of an additive share.
pub const VALUE_BITS: usize = 64;

fn check_consistency_u64<C: AbstractChannel>(
    channel: &mut C,
    is_sender: bool,
    name: &str,
    value: u64,
) -> Result<(), Error> {
    let remote = if is_sender {
        channel.write_u64(value)?;
        channel.flush()?;
        channel.read_u64()?
    } else {
        let remote = channel.read_u64()?;
        channel.write_u64(value)?;
        channel.flush()?;
        remote
    };
    if value != remote {
        return Err(Error::Parameter(format!(
            "disagreement on parameter {}, {} vs {}",
            name, value, remote
        )));
    }
    Ok(())
}

fn check_consistency_bool<C: AbstractChannel>(
    channel: &mut C,
    is_sender: bool,
    name: &str,
    value: bool,
) -> Result<(), Error> {
    check_consistency_u64(channel, is_sender, name, value as u64)
}

fn check_consistency_f64<C: AbstractChannel>(
    channel: &mut C,
    is_sender: bool,
    name: &str,
    value: f64,
) -> Result<(), Error> {
    check_consistency_u64(channel, is_sender, name, value.to_bits())
}

fn check_in_range(name: &str, value: u64, low: u64, high: u64) -> Result<(), Error> {
    if value < low || value > high {
        return Err(Error::Parameter(format!(
            "{} ({}) is not in range [{}, {}]",
            name, value, low, high
        )));
    }
    Ok(())
}

fn check_equal_one_of(name: &str, value: u64, expected: &[u64]) -> Result<(), Error> {
    if !expected.contains(&value) {
        return Err(Error::Parameter(format!(
            "{} ({}) is not one of the expected values {:?}",
            name, value, expected
        )));
    }
    Ok(())
}

/// One party's end of a DPCA-PSI session.
pub struct DpcaPsi {
    is_sender: bool,
    key_size: usize,
    input_dp: bool,
    use_precomputed_tau: bool,
    precomputed_tau: usize,
    has_zero_column: bool,
    zero_column_index: i64,
    apply_packing: bool,
    slot_bits: usize,
    ecc_cipher: EccCipher,
    sender_paillier: Paillier,
    receiver_paillier: Paillier,
    rng: AesRng,
    sender_data_size: usize,
    receiver_data_size: usize,
    sender_feature_size: usize,
    receiver_feature_size: usize,
    plaintext_keys: Vec<Vec<String>>,
    plaintext_features: Vec<Vec<u64>>,
    sender_permutation: Vec<usize>,
    receiver_permutation: Vec<usize>,
    exchanged_keys: Vec<Vec<Vec<u8>>>,
    intersection_indices: Vec<(bool, Vec<u8>)>,
    intersection_size: usize,
}

impl DpcaPsi {
    /// Validate parameters against the peer, generate this party's Paillier
    /// key, and exchange public keys. No other traffic happens before the
    /// consistency checks pass.
    pub fn init<C: AbstractChannel>(params: &PsiParams, channel: &mut C) -> Result<Self, Error> {
        let is_sender = params.common.is_sender;
        Self::check_params(params, channel)?;

        let mut rng = AesRng::new();
        let key_size = params.common.ids_num;
        let apply_packing = params.paillier_params.apply_packing;
        let slot_bits = if apply_packing {
            VALUE_BITS + params.paillier_params.statistical_security_bits + 1
        } else {
            0
        };
        let ecc_cipher = EccCipher::new(params.ecc_params.curve_id, key_size, &mut rng)?;

        let n_len = params.paillier_params.paillier_n_len;
        let enable_djn = params.paillier_params.enable_djn;
        let mut sender_paillier = Paillier::default();
        let mut receiver_paillier = Paillier::default();
        if is_sender {
            sender_paillier.keygen(n_len, enable_djn, &mut rng)?;
            channel.write_bool(enable_djn)?;
            channel.write_vec(&sender_paillier.export_pk()?)?;
            channel.flush()?;
            info!("sender sent paillier pk");
            let receiver_enable_djn = channel.read_bool()?;
            let receiver_pk = channel.read_vec()?;
            receiver_paillier.import_pk(&receiver_pk, receiver_enable_djn)?;
            info!("sender received paillier pk");
        } else {
            receiver_paillier.keygen(n_len, enable_djn, &mut rng)?;
            let sender_enable_djn = channel.read_bool()?;
            let sender_pk = channel.read_vec()?;
            info!("receiver received paillier pk");
            channel.write_bool(enable_djn)?;
            channel.write_vec(&receiver_paillier.export_pk()?)?;
            channel.flush()?;
            info!("receiver sent paillier pk");
            sender_paillier.import_pk(&sender_pk, sender_enable_djn)?;
        }

        Ok(Self {
            is_sender,
            key_size,
            input_dp: params.dp_params.input_dp,
            use_precomputed_tau: params.dp_params.use_precomputed_tau,
            precomputed_tau: params.dp_params.precomputed_tau,
            has_zero_column: params.dp_params.has_zero_column,
            zero_column_index: params.dp_params.zero_column_index,
            apply_packing,
            slot_bits,
            ecc_cipher,
            sender_paillier,
            receiver_paillier,
            rng,
            sender_data_size: 0,
            receiver_data_size: 0,
            sender_feature_size: 0,
            receiver_feature_size: 0,
            plaintext_keys: Vec::new(),
            plaintext_features: Vec::new(),
            sender_permutation: Vec::new(),
            receiver_permutation: Vec::new(),
            exchanged_keys: Vec::new(),
            intersection_indices: Vec::new(),
            intersection_size: 0,
        })
    }

    fn check_params<C: AbstractChannel>(params: &PsiParams, channel: &mut C) -> Result<(), Error> {
        let is_sender = params.common.is_sender;

        let curve_id = params.ecc_params.curve_id as u64;
        check_consistency_u64(channel, is_sender, "ecc_curve_id", curve_id)?;
        check_equal_one_of("curve_id", curve_id, &[CURVE_ID_P256 as u64])?;

        let ids_num = params.common.ids_num as u64;
        check_consistency_u64(channel, is_sender, "ids_num", ids_num)?;
        check_in_range("ids_num", ids_num, 1, 100)?;

        check_consistency_bool(channel, is_sender, "input_dp", params.dp_params.input_dp)?;
        check_equal_one_of(
            "paillier_n_len",
            params.paillier_params.paillier_n_len as u64,
            &[1024, 2048, 3072],
        )?;

        check_consistency_bool(
            channel,
            is_sender,
            "apply_packing",
            params.paillier_params.apply_packing,
        )?;
        if params.paillier_params.apply_packing {
            let bits = params.paillier_params.statistical_security_bits as u64;
            check_consistency_u64(channel, is_sender, "statistical_security_bits", bits)?;
            check_in_range("statistical_security_bits", bits, 40, 80)?;
        }
        if params.dp_params.input_dp {
            check_consistency_bool(
                channel,
                is_sender,
                "use_precomputed_tau",
                params.dp_params.use_precomputed_tau,
            )?;
            if !params.dp_params.use_precomputed_tau {
                check_consistency_f64(channel, is_sender, "dp_epsilon", params.dp_params.epsilon)?;
                check_consistency_u64(
                    channel,
                    is_sender,
                    "dp_maximum_queries",
                    params.dp_params.maximum_queries as u64,
                )?;
            } else {
                check_in_range(
                    "precomputed_tau",
                    params.dp_params.precomputed_tau as u64,
                    0,
                    1 << 20,
                )?;
            }
        }
        Ok(())
    }

    /// Sync table shapes, pad the inputs with DP dummies when enabled, and
    /// draw the per-party permutations.
    pub fn data_sampling<C: AbstractChannel>(
        &mut self,
        channel: &mut C,
        keys: &[Vec<String>],
        features: &[Vec<u64>],
    ) -> Result<(), Error> {
        if keys.len() != self.key_size {
            return Err(Error::Parameter(format!(
                "expected {} key columns, got {}",
                self.key_size,
                keys.len()
            )));
        }
        let rows = keys[0].len();
        if keys.iter().any(|column| column.len() != rows)
            || features.iter().any(|column| column.len() != rows)
        {
            return Err(Error::Parameter("ragged input table".into()));
        }

        if self.is_sender {
            self.sender_data_size = rows;
            self.sender_feature_size = features.len();
            channel.write_u64(self.sender_data_size as u64)?;
            channel.write_u64(self.sender_feature_size as u64)?;
            channel.flush()?;
            self.receiver_data_size = channel.read_u64()? as usize;
            self.receiver_feature_size = channel.read_u64()? as usize;
        } else {
            self.receiver_data_size = rows;
            self.receiver_feature_size = features.len();
            self.sender_data_size = channel.read_u64()? as usize;
            self.sender_feature_size = channel.read_u64()? as usize;
            channel.write_u64(self.receiver_data_size as u64)?;
            channel.write_u64(self.receiver_feature_size as u64)?;
            channel.flush()?;
        }
        info!(
            "data sizes synced: sender {}x{}, receiver {}x{}",
            self.sender_data_size,
            self.sender_feature_size,
            self.receiver_data_size,
            self.receiver_feature_size
        );

        self.plaintext_keys = keys.to_vec();
        self.plaintext_features = features.to_vec();

        if self.input_dp {
            let mut tau = 0;
            if self.use_precomputed_tau {
                tau = self.precomputed_tau;
                let remote_tau = if self.is_sender {
                    channel.write_u64(tau as u64)?;
                    channel.flush()?;
                    channel.read_u64()? as usize
                } else {
                    let remote = channel.read_u64()? as usize;
                    channel.write_u64(tau as u64)?;
                    channel.flush()?;
                    remote
                };
                tau = tau.max(remote_tau);
            }

            let feature_size = if self.is_sender {
                self.sender_feature_size
            } else {
                self.receiver_feature_size
            };
            let zero_column_index = if feature_size == 0 {
                -1
            } else {
                let resolved = self.zero_column_index.rem_euclid(feature_size as i64);
                if self.has_zero_column {
                    resolved
                } else {
                    -1
                }
            };

            let mut dp_sampling = DpSampling::new();
            if self.is_sender {
                let common_seed = rand::random::<Block>();
                channel.write_block(&common_seed)?;
                channel.flush()?;
                dp_sampling.set_common_seed(common_seed);
            } else {
                let common_seed = channel.read_block()?;
                dp_sampling.set_common_seed(common_seed);
            }

            info!("dp sample start.");
            let (dummy_keys, dummy_features) = dp_sampling.multi_key_sampling(
                self.key_size,
                feature_size,
                zero_column_index,
                self.is_sender,
                self.use_precomputed_tau,
                tau,
            );
            info!("dp sample end. dummy data size is {}", dummy_keys[0].len());

            let dummied_data_size = dummy_keys[0].len()
                + if self.is_sender {
                    self.sender_data_size
                } else {
                    self.receiver_data_size
                };
            for (column, dummies) in self.plaintext_keys.iter_mut().zip(dummy_keys) {
                column.extend(dummies);
            }
            for (column, dummies) in self.plaintext_features.iter_mut().zip(dummy_features) {
                column.extend(dummies);
            }

            if self.is_sender {
                self.sender_data_size = dummied_data_size;
                channel.write_u64(self.sender_data_size as u64)?;
                channel.flush()?;
                self.receiver_data_size = channel.read_u64()? as usize;
            } else {
                self.sender_data_size = channel.read_u64()? as usize;
                self.receiver_data_size = dummied_data_size;
                channel.write_u64(self.receiver_data_size as u64)?;
                channel.flush()?;
            }
            info!(
                "updated data sizes: sender {}, receiver {}",
                self.sender_data_size, self.receiver_data_size
            );
        }

        self.sender_permutation = generate_permutation(self.sender_data_size);
        self.receiver_permutation = generate_permutation(self.receiver_data_size);
        info!("generate permutation done.");
        Ok(())
    }

    /// Run the matching and share-generation pipeline. Returns the share
    /// columns ordered [sender features..., receiver features...]; every
    /// value is this party's additive share mod 2^64 of the corresponding
    /// intersection row.
    pub fn process<C: AbstractChannel>(
        &mut self,
        channel: &mut C,
    ) -> Result<Vec<Vec<u64>>, Error> {
        let encrypted_keys = self.shuffle_and_encrypt_keys_round_one()?;
        info!("shuffle and encrypt keys round one done.");

        let received_data_size = self.peer_data_size();
        self.exchanged_keys =
            self.exchange_encrypted_keys(channel, &encrypted_keys, received_data_size)?;
        drop(encrypted_keys);
        info!("send and receive encrypted keys round one done.");

        let reshuffled_keys = self.reshuffle_and_encrypt_exchanged_keys_round_one()?;
        info!("reshuffle and double encrypt keys round one done.");
        let single_encrypted_keys = self.exchange_single_encrypted_keys(
            channel,
            &reshuffled_keys,
            self.own_data_size(),
            COMPARE_BYTES,
        )?;
        drop(reshuffled_keys);
        info!("send and receive double encrypted keys round one done.");

        let intersection_size_round_one =
            self.calculate_intersection_round_one(&single_encrypted_keys);
        drop(single_encrypted_keys);
        info!("intersection size round 1 is {}", intersection_size_round_one);

        let intersection_size = self.repeatedly_match(channel, intersection_size_round_one)?;
        self.intersection_size = intersection_size;
        info!("intersection size is {}", intersection_size);

        let encrypted_features = self.shuffle_and_encrypt_features()?;
        info!("shuffle and encrypt features done.");

        let self_paillier_len = self.own_paillier().get_bytes_len(true);
        let remote_paillier_len = self.peer_paillier().get_bytes_len(true);
        let mut received_feature_size = self.peer_feature_size();
        if self.apply_packing {
            let capacity = (self.peer_paillier().get_bytes_len(false) * 8 / self.slot_bits).max(1);
            received_feature_size = (received_feature_size + capacity - 1) / capacity;
        }
        let exchanged_encrypted_features = self.exchange_encrypted_features(
            channel,
            &encrypted_features,
            self_paillier_len,
            remote_paillier_len,
            received_feature_size,
            self.peer_data_size(),
        )?;
        drop(encrypted_features);
        info!("send and receive encrypted features done.");

        let mut intersection_features =
            self.filter_intersection_features(&exchanged_encrypted_features, intersection_size);
        drop(exchanged_encrypted_features);
        info!("filter intersection features done.");

        let random_r = self.generate_additive_shares(&mut intersection_features)?;
        info!("generate additive shares done.");

        let mut received_feature_size = self.own_feature_size();
        if self.apply_packing {
            let capacity = (self.own_paillier().get_bytes_len(false) * 8 / self.slot_bits).max(1);
            received_feature_size = (received_feature_size + capacity - 1) / capacity;
        }
        let exchanged_shares = self.exchange_encrypted_features(
            channel,
            &intersection_features,
            remote_paillier_len,
            self_paillier_len,
            received_feature_size,
            intersection_size,
        )?;
        drop(intersection_features);
        info!("send and receive encrypted additive shares done.");

        let shares = self.decrypt_and_reveal_shares(&exchanged_shares, &random_r, intersection_size)?;
        info!("decrypt and reveal shares done.");

        self.reset_data();
        Ok(shares)
    }

    /// The intersection cardinality of the last completed `process` call
    /// (dummy matches included when DP padding was on).
    pub fn intersection_size(&self) -> usize {
        self.intersection_size
    }

    fn own_data_size(&self) -> usize {
        if self.is_sender {
            self.sender_data_size
        } else {
            self.receiver_data_size
        }
    }

    fn peer_data_size(&self) -> usize {
        if self.is_sender {
            self.receiver_data_size
        } else {
            self.sender_data_size
        }
    }

    fn own_feature_size(&self) -> usize {
        if self.is_sender {
            self.sender_feature_size
        } else {
            self.receiver_feature_size
        }
    }

    fn peer_feature_size(&self) -> usize {
        if self.is_sender {
            self.receiver_feature_size
        } else {
            self.sender_feature_size
        }
    }

    fn own_paillier(&self) -> &Paillier {
        if self.is_sender {
            &self.sender_paillier
        } else {
            &self.receiver_paillier
        }
    }

    fn peer_paillier(&self) -> &Paillier {
        if self.is_sender {
            &self.receiver_paillier
        } else {
            &self.sender_paillier
        }
    }

    fn shuffle_and_encrypt_keys_round_one(&mut self) -> Result<Vec<Vec<Vec<u8>>>, Error> {
        let permutation = if self.is_sender {
            self.sender_permutation.clone()
        } else {
            self.receiver_permutation.clone()
        };
        let mut encrypted_keys = Vec::with_capacity(self.key_size);
        for key_idx in 0..self.key_size {
            permute(&permutation, true, &mut self.plaintext_keys[key_idx]);
            let cipher = &self.ecc_cipher;
            let encrypted: Vec<Vec<u8>> = self.plaintext_keys[key_idx]
                .par_iter()
                .map(|item| cipher.hash_encrypt(item.as_bytes(), 0))
                .collect::<Result<_, _>>()?;
            encrypted_keys.push(encrypted);
        }
        Ok(encrypted_keys)
    }

    fn reshuffle_and_encrypt_exchanged_keys_round_one(&mut self) -> Result<Vec<Vec<u8>>, Error> {
        let cipher = &self.ecc_cipher;
        let double_encrypted: Vec<Vec<u8>> = self.exchanged_keys[0]
            .par_iter()
            .map(|item| cipher.encrypt(item, 0))
            .collect::<Result<_, _>>()?;
        for (slot, point) in self.exchanged_keys[0].iter_mut().zip(double_encrypted) {
            *slot = point[point.len() - COMPARE_BYTES..].to_vec();
        }

        let mut reshuffled = self.exchanged_keys[0].clone();
        // A fresh local permutation over the peer's rows; the peer only uses
        // the returned fingerprints as a sorted set.
        let permutation = if self.is_sender {
            self.receiver_permutation.clone()
        } else {
            self.sender_permutation.clone()
        };
        permute(&permutation, true, &mut reshuffled);
        Ok(reshuffled)
    }

    fn repeatedly_match<C: AbstractChannel>(
        &mut self,
        channel: &mut C,
        intersection_round_one: usize,
    ) -> Result<usize, Error> {
        let mut intersection_size = intersection_round_one;
        for key_idx in 1..self.key_size {
            // Rows matched by an earlier column sit out this round.
            let mut filtered = Vec::new();
            let mut mapping = Vec::new();
            for (item_idx, flag) in self.intersection_indices.iter().enumerate() {
                if !flag.0 {
                    filtered.push(self.exchanged_keys[key_idx][item_idx].clone());
                    mapping.push(item_idx);
                }
            }

            let cipher = &self.ecc_cipher;
            let mut filtered: Vec<Vec<u8>> = filtered
                .par_iter()
                .map(|item| cipher.encrypt(item, key_idx))
                .collect::<Result<_, _>>()?;

            let permutation_i = generate_permutation(filtered.len());
            permute(&permutation_i, true, &mut filtered);

            let received_data_size = self.own_data_size() - intersection_size;
            let single_encrypted_keys = self.exchange_single_encrypted_keys(
                channel,
                &filtered,
                received_data_size,
                POINT_BYTES,
            )?;
            info!("send and receive encrypted keys round {} done.", key_idx + 1);

            let cipher = &self.ecc_cipher;
            let single_encrypted_keys: Vec<Vec<u8>> = single_encrypted_keys
                .par_iter()
                .map(|item| {
                    cipher
                        .encrypt_and_div(item, key_idx, 0)
                        .map(|point| point[point.len() - COMPARE_BYTES..].to_vec())
                })
                .collect::<Result<_, _>>()?;

            let received_data_size = filtered.len();
            let mut exchanged = self.exchange_single_encrypted_keys(
                channel,
                &single_encrypted_keys,
                received_data_size,
                COMPARE_BYTES,
            )?;
            info!(
                "send and receive double encrypted keys round {} done.",
                key_idx + 1
            );

            permute(&permutation_i, false, &mut exchanged);

            let round =
                self.calculate_intersection_round_i(&single_encrypted_keys, &exchanged, &mapping);
            info!("intersection size round {} is {}", key_idx + 1, round);
            intersection_size += round;
        }
        Ok(intersection_size)
    }

    fn calculate_intersection_round_one(&mut self, encrypted_keys: &[Vec<u8>]) -> usize {
        self.intersection_indices = vec![(false, Vec::new()); self.exchanged_keys[0].len()];
        let mut sorted = encrypted_keys.to_vec();
        sorted.sort_unstable();

        let mut count = 0;
        for (item_idx, key) in self.exchanged_keys[0].iter().enumerate() {
            if !self.intersection_indices[item_idx].0 && sorted.binary_search(key).is_ok() {
                self.intersection_indices[item_idx] = (true, key.clone());
                count += 1;
            }
        }
        count
    }

    // The i-th column's matches, folded back to original row indices through
    // `mapping`. Earlier columns keep their fingerprints.
    fn calculate_intersection_round_i(
        &mut self,
        encrypted_keys: &[Vec<u8>],
        exchanged_keys: &[Vec<u8>],
        mapping: &[usize],
    ) -> usize {
        let mut sorted = encrypted_keys.to_vec();
        sorted.sort_unstable();

        let mut count = 0;
        for (item_idx, key) in exchanged_keys.iter().enumerate() {
            let original_idx = mapping[item_idx];
            if !self.intersection_indices[original_idx].0 && sorted.binary_search(key).is_ok() {
                self.intersection_indices[original_idx] = (true, key.clone());
                count += 1;
            }
        }
        count
    }

    fn shuffle_and_encrypt_features(&mut self) -> Result<Vec<Vec<Vec<u8>>>, Error> {
        let raw_feature_size = self.own_feature_size();
        let data_size = self.own_data_size();
        let paillier = self.own_paillier().clone();

        let packing_capacity = if self.apply_packing {
            (paillier.get_bytes_len(false) * 8 / self.slot_bits).max(1)
        } else {
            1
        };
        let feature_size = if self.apply_packing {
            (raw_feature_size + packing_capacity - 1) / packing_capacity
        } else {
            raw_feature_size
        };

        let mut encrypted_features = Vec::with_capacity(feature_size);
        if self.apply_packing {
            let slot = BigUint::one() << self.slot_bits;
            for feat_idx in 0..feature_size {
                let cur_packed_num =
                    packing_capacity.min(raw_feature_size - feat_idx * packing_capacity);
                let mut column = Vec::with_capacity(data_size);
                for item_idx in 0..data_size {
                    let mut packed = BigUint::from(
                        self.plaintext_features[feat_idx * packing_capacity][item_idx],
                    );
                    for pack_idx in 1..cur_packed_num {
                        let raw_feat_idx = feat_idx * packing_capacity + pack_idx;
                        packed = packed * &slot
                            + BigUint::from(self.plaintext_features[raw_feat_idx][item_idx]);
                    }
                    let cipher = paillier.encrypt(&packed, &mut self.rng)?;
                    column.push(paillier.encode(&cipher, true)?);
                }
                encrypted_features.push(column);
            }
        } else {
            for feat_idx in 0..feature_size {
                let mut column = Vec::with_capacity(data_size);
                for item_idx in 0..data_size {
                    let plain = BigUint::from(self.plaintext_features[feat_idx][item_idx]);
                    let cipher = paillier.encrypt(&plain, &mut self.rng)?;
                    column.push(paillier.encode(&cipher, true)?);
                }
                encrypted_features.push(column);
            }
        }
        info!("encrypt features done.");

        let permutation = if self.is_sender {
            &self.sender_permutation
        } else {
            &self.receiver_permutation
        };
        for column in encrypted_features.iter_mut() {
            permute(permutation, true, column);
        }
        Ok(encrypted_features)
    }

    fn filter_intersection_features(
        &self,
        encrypted_features: &[Vec<Vec<u8>>],
        intersection_size: usize,
    ) -> Vec<Vec<Vec<u8>>> {
        if encrypted_features.is_empty() {
            return Vec::new();
        }
        let data_size = encrypted_features[0].len();

        // Matches from different columns merge into one set, ordered by the
        // fingerprint that won the match; both parties sort the same way.
        let mut intersection_keys = Vec::with_capacity(intersection_size);
        let mut index_counter = 0;
        for flag in self.intersection_indices.iter() {
            if flag.0 {
                intersection_keys.push((flag.1.clone(), index_counter));
                index_counter += 1;
            }
        }

        let mut intersection_features = Vec::with_capacity(encrypted_features.len());
        for column in encrypted_features.iter() {
            let mut buffer = Vec::with_capacity(intersection_size);
            for item_idx in 0..data_size {
                if self.intersection_indices[item_idx].0 {
                    buffer.push(column[item_idx].clone());
                }
            }
            intersection_features.push(buffer);
        }

        intersection_keys.sort_unstable();
        let sort_permutation: Vec<usize> = intersection_keys
            .into_iter()
            .map(|(_, idx)| idx)
            .collect();
        for column in intersection_features.iter_mut() {
            permute(&sort_permutation, false, column);
        }
        intersection_features
    }

    // Blind each received ciphertext with `Enc(r)` under the peer's key and
    // keep `r`; this party's share of a value will be derived from `-r`.
    fn generate_additive_shares(
        &mut self,
        encrypted_features: &mut [Vec<Vec<u8>>],
    ) -> Result<Vec<Vec<BigUint>>, Error> {
        let paillier = self.peer_paillier().clone();
        let feature_size = encrypted_features.len();
        let data_size = encrypted_features.first().map_or(0, |column| column.len());
        let two_power_l = BigUint::one() << VALUE_BITS;
        let n = paillier.n()?.clone();
        let n_minus_l = &n - &two_power_l;
        let raw_feature_size = self.peer_feature_size();

        let mut random_r = Vec::with_capacity(feature_size);
        if self.apply_packing {
            let packing_capacity = (paillier.get_bytes_len(false) * 8 / self.slot_bits).max(1);
            let slot = BigUint::one() << self.slot_bits;
            let two_power_k_minus_one = BigUint::one() << (self.slot_bits - 1);
            let mask_minus_l = &two_power_k_minus_one - &two_power_l;
            for (feat_idx, column) in encrypted_features.iter_mut().enumerate() {
                let cur_packed_num =
                    packing_capacity.min(raw_feature_size - feat_idx * packing_capacity);
                let mut buffer = Vec::with_capacity(data_size);
                for item in column.iter_mut() {
                    let mut r = &two_power_l + self.rng.gen_biguint_below(&mask_minus_l);
                    for _ in 1..cur_packed_num {
                        r = r * &slot
                            + (&two_power_l + self.rng.gen_biguint_below(&mask_minus_l));
                    }
                    let cipher = Paillier::decode(item);
                    let blinded = paillier.add_plain(&cipher, &r)?;
                    *item = paillier.encode(&blinded, true)?;
                    buffer.push(r);
                }
                random_r.push(buffer);
            }
        } else {
            for column in encrypted_features.iter_mut() {
                let mut buffer = Vec::with_capacity(data_size);
                for item in column.iter_mut() {
                    let r = &two_power_l + self.rng.gen_biguint_below(&n_minus_l);
                    let cipher = Paillier::decode(item);
                    let blinded = paillier.add_plain(&cipher, &r)?;
                    *item = paillier.encode(&blinded, true)?;
                    buffer.push(r);
                }
                random_r.push(buffer);
            }
        }
        Ok(random_r)
    }

    fn decrypt_and_reveal_shares(
        &self,
        encrypted_shares: &[Vec<Vec<u8>>],
        random_r: &[Vec<BigUint>],
        intersection_size: usize,
    ) -> Result<Vec<Vec<u64>>, Error> {
        let mut shares = Vec::with_capacity(self.sender_feature_size + self.receiver_feature_size);
        if self.apply_packing {
            let sender_capacity =
                (self.sender_paillier.get_bytes_len(false) * 8 / self.slot_bits).max(1);
            let receiver_capacity =
                (self.receiver_paillier.get_bytes_len(false) * 8 / self.slot_bits).max(1);
            if self.is_sender {
                self.compute_b_with_packing(
                    &self.sender_paillier,
                    encrypted_shares,
                    intersection_size,
                    self.sender_feature_size,
                    sender_capacity,
                    &mut shares,
                )?;
                self.compute_a_with_packing(
                    random_r,
                    intersection_size,
                    self.receiver_feature_size,
                    receiver_capacity,
                    &mut shares,
                )?;
            } else {
                self.compute_a_with_packing(
                    random_r,
                    intersection_size,
                    self.sender_feature_size,
                    sender_capacity,
                    &mut shares,
                )?;
                self.compute_b_with_packing(
                    &self.receiver_paillier,
                    encrypted_shares,
                    intersection_size,
                    self.receiver_feature_size,
                    receiver_capacity,
                    &mut shares,
                )?;
            }
        } else if self.is_sender {
            self.compute_b(&self.sender_paillier, encrypted_shares, intersection_size, &mut shares)?;
            self.compute_a(&self.receiver_paillier, random_r, intersection_size, &mut shares)?;
        } else {
            self.compute_a(&self.sender_paillier, random_r, intersection_size, &mut shares)?;
            self.compute_b(
                &self.receiver_paillier,
                encrypted_shares,
                intersection_size,
                &mut shares,
            )?;
        }
        Ok(shares)
    }

    // a = ((N - r) mod 2^64 - (N mod 2^64)) mod 2^64. The second reduction
    // step must stay exactly as written so the share carries no bias from
    // N mod 2^64.
    fn compute_a(
        &self,
        paillier: &Paillier,
        random_r: &[Vec<BigUint>],
        intersection_size: usize,
        shares: &mut Vec<Vec<u64>>,
    ) -> Result<(), Error> {
        let modulus = BigUint::one() << VALUE_BITS;
        let n = paillier.n()?;
        let n_mod_modulus = n % &modulus;
        for column in random_r.iter() {
            let mut buffer = Vec::with_capacity(intersection_size);
            for r in column.iter() {
                let a = (n - r) % &modulus;
                let a = (a + &modulus - &n_mod_modulus) % &modulus;
                buffer.push(bn_to_u64(&a));
            }
            shares.push(buffer);
        }
        Ok(())
    }

    fn compute_a_with_packing(
        &self,
        random_r: &[Vec<BigUint>],
        intersection_size: usize,
        raw_feature_size: usize,
        packing_capacity: usize,
        shares: &mut Vec<Vec<u64>>,
    ) -> Result<(), Error> {
        let modulus = BigUint::one() << VALUE_BITS;
        let slot_modulus = BigUint::one() << self.slot_bits;
        let mut buffers: Vec<Vec<u64>> = vec![Vec::with_capacity(intersection_size); packing_capacity];
        for (feat_idx, column) in random_r.iter().enumerate() {
            let cur_packed_num =
                packing_capacity.min(raw_feature_size - feat_idx * packing_capacity);
            for r in column.iter() {
                let mut r = r.clone();
                // slot_modulus mod 2^64 == 0, so reducing by the slot first
                // then by 2^64 keeps the share exact.
                let a = (&slot_modulus - (&r % &slot_modulus)) % &modulus;
                buffers[cur_packed_num - 1].push(bn_to_u64(&a));
                for pack_idx in 1..cur_packed_num {
                    r /= &slot_modulus;
                    let a = (&slot_modulus - (&r % &slot_modulus)) % &modulus;
                    buffers[cur_packed_num - 1 - pack_idx].push(bn_to_u64(&a));
                }
            }
            for buffer in buffers.iter_mut().take(cur_packed_num) {
                shares.push(std::mem::take(buffer));
            }
        }
        Ok(())
    }

    fn compute_b(
        &self,
        paillier: &Paillier,
        encrypted_shares: &[Vec<Vec<u8>>],
        intersection_size: usize,
        shares: &mut Vec<Vec<u64>>,
    ) -> Result<(), Error> {
        let modulus = BigUint::one() << VALUE_BITS;
        for column in encrypted_shares.iter() {
            let mut buffer = Vec::with_capacity(intersection_size);
            for item in column.iter() {
                let plain = paillier.decrypt(&Paillier::decode(item))?;
                buffer.push(bn_to_u64(&(plain % &modulus)));
            }
            shares.push(buffer);
        }
        Ok(())
    }

    fn compute_b_with_packing(
        &self,
        paillier: &Paillier,
        encrypted_shares: &[Vec<Vec<u8>>],
        intersection_size: usize,
        raw_feature_size: usize,
        packing_capacity: usize,
        shares: &mut Vec<Vec<u64>>,
    ) -> Result<(), Error> {
        let modulus = BigUint::one() << VALUE_BITS;
        let slot_modulus = BigUint::one() << self.slot_bits;
        let mut buffers: Vec<Vec<u64>> = vec![Vec::with_capacity(intersection_size); packing_capacity];
        for (feat_idx, column) in encrypted_shares.iter().enumerate() {
            let cur_packed_num =
                packing_capacity.min(raw_feature_size - feat_idx * packing_capacity);
            for item in column.iter() {
                let mut x_plus_r = paillier.decrypt(&Paillier::decode(item))?;
                let b = (&x_plus_r % &slot_modulus) % &modulus;
                buffers[cur_packed_num - 1].push(bn_to_u64(&b));
                for pack_idx in 1..cur_packed_num {
                    x_plus_r /= &slot_modulus;
                    let b = (&x_plus_r % &slot_modulus) % &modulus;
                    buffers[cur_packed_num - 1 - pack_idx].push(bn_to_u64(&b));
                }
            }
            for buffer in buffers.iter_mut().take(cur_packed_num) {
                shares.push(std::mem::take(buffer));
            }
        }
        Ok(())
    }

    fn exchange_encrypted_keys<C: AbstractChannel>(
        &self,
        channel: &mut C,
        encrypted_keys: &[Vec<Vec<u8>>],
        received_data_size: usize,
    ) -> Result<Vec<Vec<Vec<u8>>>, Error> {
        let send = |channel: &mut C| -> Result<(), Error> {
            for column in encrypted_keys.iter() {
                let mut buffer = Vec::with_capacity(column.len() * POINT_BYTES);
                for key in column.iter() {
                    buffer.extend_from_slice(key);
                }
                channel.write_vec(&buffer)?;
            }
            channel.flush()?;
            Ok(())
        };
        let recv = |channel: &mut C| -> Result<Vec<Vec<Vec<u8>>>, Error> {
            let mut received = Vec::with_capacity(self.key_size);
            for _ in 0..self.key_size {
                received.push(split_blob(
                    channel.read_vec()?,
                    received_data_size,
                    POINT_BYTES,
                )?);
            }
            Ok(received)
        };
        if self.is_sender {
            send(channel)?;
            recv(channel)
        } else {
            let received = recv(channel)?;
            send(channel)?;
            Ok(received)
        }
    }

    fn exchange_single_encrypted_keys<C: AbstractChannel>(
        &self,
        channel: &mut C,
        encrypted_keys: &[Vec<u8>],
        received_data_size: usize,
        point_len: usize,
    ) -> Result<Vec<Vec<u8>>, Error> {
        let send = |channel: &mut C| -> Result<(), Error> {
            let mut buffer = Vec::with_capacity(encrypted_keys.len() * point_len);
            for key in encrypted_keys.iter() {
                buffer.extend_from_slice(key);
            }
            channel.write_vec(&buffer)?;
            channel.flush()?;
            Ok(())
        };
        let recv = |channel: &mut C| -> Result<Vec<Vec<u8>>, Error> {
            split_blob(channel.read_vec()?, received_data_size, point_len)
        };
        if self.is_sender {
            send(channel)?;
            recv(channel)
        } else {
            let received = recv(channel)?;
            send(channel)?;
            Ok(received)
        }
    }

    fn exchange_encrypted_features<C: AbstractChannel>(
        &self,
        channel: &mut C,
        encrypted_features: &[Vec<Vec<u8>>],
        self_paillier_len: usize,
        remote_paillier_len: usize,
        received_feature_size: usize,
        received_data_size: usize,
    ) -> Result<Vec<Vec<Vec<u8>>>, Error> {
        let send = |channel: &mut C| -> Result<(), Error> {
            for column in encrypted_features.iter() {
                let mut buffer = Vec::with_capacity(column.len() * self_paillier_len);
                for feature in column.iter() {
                    buffer.extend_from_slice(feature);
                }
                channel.write_vec(&buffer)?;
            }
            channel.flush()?;
            Ok(())
        };
        let recv = |channel: &mut C| -> Result<Vec<Vec<Vec<u8>>>, Error> {
            let mut received = Vec::with_capacity(received_feature_size);
            for _ in 0..received_feature_size {
                received.push(split_blob(
                    channel.read_vec()?,
                    received_data_size,
                    remote_paillier_len,
                )?);
            }
            Ok(received)
        };
        if self.is_sender {
            send(channel)?;
            recv(channel)
        } else {
            let received = recv(channel)?;
            send(channel)?;
            Ok(received)
        }
    }

    fn reset_data(&mut self) {
        self.sender_data_size = 0;
        self.sender_feature_size = 0;
        self.receiver_data_size = 0;
        self.receiver_feature_size = 0;
        self.plaintext_keys.clear();
        self.plaintext_features.clear();
        self.sender_permutation.clear();
        self.receiver_permutation.clear();
        self.exchanged_keys.clear();
        self.intersection_indices.clear();
    }
}

fn bn_to_u64(value: &BigUint) -> u64 {
    value.iter_u64_digits().next().unwrap_or(0)
}

fn split_blob(blob: Vec<u8>, count: usize, width: usize) -> Result<Vec<Vec<u8>>, Error> {
    if blob.len() != count * width {
        return Err(Error::Deserialization(format!(
            "blob of {} bytes does not hold {} entries of {} bytes",
            blob.len(),
            count,
            width
        )));
    }
    Ok(blob.chunks_exact(width).map(|chunk| chunk.to_vec()).collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use binnacle::Channel;
    use std::{
        io::{BufReader, BufWriter},
        os::unix::net::UnixStream,
    };

    fn test_params(is_sender: bool) -> PsiParams {
        let mut params = PsiParams::default();
        params.common.is_sender = is_sender;
        params.common.ids_num = 2;
        params.paillier_params.paillier_n_len = 1024;
        params.dp_params.input_dp = false;
        params
    }

    fn channel_for(stream: UnixStream) -> Channel<BufReader<UnixStream>, BufWriter<UnixStream>> {
        Channel::new(BufReader::new(stream.try_clone().unwrap()), BufWriter::new(stream))
    }

    fn run_party(
        stream: UnixStream,
        params: PsiParams,
        keys: Vec<Vec<String>>,
        features: Vec<Vec<u64>>,
    ) -> Result<(usize, Vec<Vec<u64>>), Error> {
        let mut channel = channel_for(stream);
        let mut psi = DpcaPsi::init(&params, &mut channel)?;
        psi.data_sampling(&mut channel, &keys, &features)?;
        let shares = psi.process(&mut channel)?;
        Ok((psi.intersection_size(), shares))
    }

    fn strings(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    fn sender_fixture() -> (Vec<Vec<String>>, Vec<Vec<u64>>) {
        (
            vec![
                strings(&["c", "h", "e", "g", "y", "z"]),
                strings(&["*", "#", "&", "@", "%", "!"]),
            ],
            vec![vec![10, 20, 3, 40, 50, 60]],
        )
    }

    fn receiver_fixture() -> (Vec<Vec<String>>, Vec<Vec<u64>>) {
        (
            vec![strings(&["b", "c", "e", "g"]), strings(&["#", "*", "&", "!"])],
            vec![vec![1, 2, 3, 4], vec![5, 6, 7, 8]],
        )
    }

    fn reconstruct_columns(
        sender_shares: &[Vec<u64>],
        receiver_shares: &[Vec<u64>],
    ) -> Vec<Vec<u64>> {
        sender_shares
            .iter()
            .zip(receiver_shares.iter())
            .map(|(s, r)| {
                s.iter()
                    .zip(r.iter())
                    .map(|(a, b)| a.wrapping_add(*b))
                    .collect()
            })
            .collect()
    }

    fn run_pair(
        sender_params: PsiParams,
        receiver_params: PsiParams,
        sender_input: (Vec<Vec<String>>, Vec<Vec<u64>>),
        receiver_input: (Vec<Vec<String>>, Vec<Vec<u64>>),
    ) -> ((usize, Vec<Vec<u64>>), (usize, Vec<Vec<u64>>)) {
        let (s_stream, r_stream) = UnixStream::pair().unwrap();
        let handle = std::thread::spawn(move || {
            run_party(s_stream, sender_params, sender_input.0, sender_input.1).unwrap()
        });
        let receiver = run_party(r_stream, receiver_params, receiver_input.0, receiver_input.1)
            .unwrap();
        let sender = handle.join().unwrap();
        (sender, receiver)
    }

    #[test]
    fn test_multi_key_match_and_share_sums() {
        let (sender, receiver) = run_pair(
            test_params(true),
            test_params(false),
            sender_fixture(),
            receiver_fixture(),
        );
        // Column 0 matches {c, e, g}; column 1 then adds "#" for row "b".
        assert_eq!(sender.0, 4);
        assert_eq!(receiver.0, 4);

        let columns = reconstruct_columns(&sender.1, &receiver.1);
        assert_eq!(columns.len(), 3);
        // Matched pairs: (S1,R0) via "#", (S0,R1), (S2,R2), (S3,R3).
        let sums: Vec<u64> = columns
            .iter()
            .map(|col| col.iter().fold(0u64, |acc, v| acc.wrapping_add(*v)))
            .collect();
        assert_eq!(sums[0], 20 + 10 + 3 + 40); // sender feature on matched rows
        assert_eq!(sums[1], 1 + 2 + 3 + 4);
        assert_eq!(sums[2], 5 + 6 + 7 + 8);
    }

    #[test]
    fn test_rows_align_across_parties() {
        let (sender, receiver) = run_pair(
            test_params(true),
            test_params(false),
            sender_fixture(),
            receiver_fixture(),
        );
        let columns = reconstruct_columns(&sender.1, &receiver.1);
        // Row-wise alignment: each reconstructed row must pair the sender
        // value with the receiver values of the same underlying identifier.
        let mut rows: Vec<(u64, u64, u64)> = (0..4)
            .map(|i| (columns[0][i], columns[1][i], columns[2][i]))
            .collect();
        rows.sort_unstable();
        assert_eq!(rows, vec![(3, 3, 7), (10, 2, 6), (20, 1, 5), (40, 4, 8)]);
    }

    #[test]
    fn test_without_packing_share_sums() {
        let mut sender_params = test_params(true);
        let mut receiver_params = test_params(false);
        sender_params.paillier_params.apply_packing = false;
        receiver_params.paillier_params.apply_packing = false;
        let (sender, receiver) = run_pair(
            sender_params,
            receiver_params,
            sender_fixture(),
            receiver_fixture(),
        );
        let columns = reconstruct_columns(&sender.1, &receiver.1);
        let mut rows: Vec<(u64, u64, u64)> = (0..4)
            .map(|i| (columns[0][i], columns[1][i], columns[2][i]))
            .collect();
        rows.sort_unstable();
        assert_eq!(rows, vec![(3, 3, 7), (10, 2, 6), (20, 1, 5), (40, 4, 8)]);
    }

    #[test]
    fn test_empty_feature_tables() {
        let keys = vec![strings(&["x", "y", "z"]), strings(&["1", "2", "3"])];
        let (sender, receiver) = run_pair(
            test_params(true),
            test_params(false),
            (keys.clone(), Vec::new()),
            (keys, Vec::new()),
        );
        assert_eq!(sender.0, 3);
        assert_eq!(receiver.0, 3);
        assert!(sender.1.is_empty());
        assert!(receiver.1.is_empty());
    }

    #[test]
    fn test_dp_padding_with_zero_column() {
        let mut sender_params = test_params(true);
        sender_params.dp_params.input_dp = true;
        sender_params.dp_params.precomputed_tau = 8;
        let mut receiver_params = test_params(false);
        receiver_params.dp_params.input_dp = true;
        receiver_params.dp_params.precomputed_tau = 8;
        receiver_params.dp_params.has_zero_column = true;
        receiver_params.dp_params.zero_column_index = -1;

        let keys = vec![strings(&["p", "q", "r", "s"]), strings(&["5", "6", "7", "8"])];
        let (sender, receiver) = run_pair(
            sender_params,
            receiver_params,
            (keys.clone(), Vec::new()),
            (keys, vec![vec![11, 22, 33, 44]]),
        );
        // Dummy rows can only add matches on top of the four real ones.
        assert!(sender.0 >= 4);
        assert_eq!(sender.0, receiver.0);
        // The receiver's only feature column is its zero column, so dummy
        // matches contribute nothing to the reconstructed sum.
        let columns = reconstruct_columns(&sender.1, &receiver.1);
        let total: u64 = columns[0].iter().fold(0u64, |acc, v| acc.wrapping_add(*v));
        assert_eq!(total, 11 + 22 + 33 + 44);
    }

    #[test]
    fn test_curve_id_mismatch_fails_both_sides() {
        let mut sender_params = test_params(true);
        sender_params.ecc_params.curve_id = 416;
        let receiver_params = test_params(false);

        let (s_stream, r_stream) = UnixStream::pair().unwrap();
        let handle = std::thread::spawn(move || {
            let mut channel = channel_for(s_stream);
            DpcaPsi::init(&sender_params, &mut channel).map(|_| ())
        });
        let mut channel = channel_for(r_stream);
        let receiver_result = DpcaPsi::init(&receiver_params, &mut channel).map(|_| ());
        let sender_result = handle.join().unwrap();
        assert!(matches!(sender_result, Err(Error::Parameter(_))));
        assert!(matches!(receiver_result, Err(Error::Parameter(_))));
    }

    #[test]
    fn test_tau_out_of_range_rejected() {
        let mut sender_params = test_params(true);
        sender_params.dp_params.input_dp = true;
        sender_params.dp_params.precomputed_tau = (1 << 20) + 1;
        let mut receiver_params = test_params(false);
        receiver_params.dp_params.input_dp = true;
        receiver_params.dp_params.precomputed_tau = (1 << 20) + 1;

        let (s_stream, r_stream) = UnixStream::pair().unwrap();
        let handle = std::thread::spawn(move || {
            let mut channel = channel_for(s_stream);
            DpcaPsi::init(&sender_params, &mut channel).map(|_| ())
        });
        let mut channel = channel_for(r_stream);
        let receiver_result = DpcaPsi::init(&receiver_params, &mut channel).map(|_| ());
        let sender_result = handle.join().unwrap();
        assert!(sender_result.is_err());
        assert!(receiver_result.is_err());
    }
}
