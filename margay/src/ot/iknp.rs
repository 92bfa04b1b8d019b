//! Implementation of the IKNP oblivious transfer extension (cf.
//! <https://www.iacr.org/archive/crypto2003/27290145/27290145.pdf>),
//! semi-honest variant.
//!
//! The correlation-robust hash is a fixed-key AES shared by both parties:
//! `H(i, x) = AES_K(x ⊕ i)` with `i` encoded as a 128-bit integer.

use crate::{errors::Error, utils};
use binnacle::{Aes128, AesRng, Block};
use rand::{RngCore, SeedableRng};

/// The number of base OTs an extension is built from.
pub const BASE_OT_COUNT: usize = 128;

fn fill_blocks(rng: &mut AesRng, blocks: &mut [Block]) {
    rng.fill_bytes(utils::blocks_as_bytes_mut(blocks));
}

/// Extension sender. Holds one PRNG per base OT, seeded with the message
/// selected by the corresponding bit of the sender's choice vector δ.
pub struct Sender {
    hash: Aes128,
    prngs: Vec<AesRng>,
}

impl Sender {
    /// Create a sender whose correlation-robust hash is keyed with `hash_key`.
    pub fn new(hash_key: Block) -> Self {
        Self {
            hash: Aes128::new(hash_key),
            prngs: Vec::new(),
        }
    }

    /// Seed the per-row PRNGs from the base-OT outputs.
    pub fn init(&mut self, seeds: &[Block]) {
        debug_assert_eq!(seeds.len(), BASE_OT_COUNT);
        self.prngs = seeds.iter().map(|s| AesRng::from_seed(*s)).collect();
    }

    /// Extend: given the receiver's u-matrix (row-major, one row of
    /// `m / 128` blocks per base OT), produce `m` message pairs.
    pub fn extend(
        &mut self,
        delta: Block,
        received: &[Block],
        msgs0: &mut [Block],
        msgs1: &mut [Block],
    ) -> Result<(), Error> {
        let m = msgs0.len();
        if m % BASE_OT_COUNT != 0 || msgs1.len() != m || received.len() != m {
            return Err(Error::InvalidInputLength);
        }
        if self.prngs.len() != BASE_OT_COUNT {
            return Err(Error::Other("extension used before base OTs".into()));
        }
        let width = m / BASE_OT_COUNT;

        let mut cols = vec![Block::ZERO; m];
        for (i, prng) in self.prngs.iter_mut().enumerate() {
            let row = &mut cols[i * width..(i + 1) * width];
            fill_blocks(prng, row);
            if delta.bit(i) {
                for (q, u) in row.iter_mut().zip(&received[i * width..(i + 1) * width]) {
                    *q ^= *u;
                }
            }
        }

        let mut chunk = [Block::ZERO; BASE_OT_COUNT];
        for j in 0..width {
            for i in 0..BASE_OT_COUNT {
                chunk[i] = cols[i * width + j];
            }
            let rows = utils::transpose_128(&chunk);
            for (k, q) in rows.iter().enumerate() {
                let i = j * BASE_OT_COUNT + k;
                let x = *q ^ Block::from_low_u64(i as u64);
                msgs0[i] = self.hash.encrypt(x);
                msgs1[i] = self.hash.encrypt(x ^ delta);
            }
        }
        Ok(())
    }
}

/// Extension receiver. Holds two PRNGs per base OT, seeded with both of the
/// base-OT sender's messages.
pub struct Receiver {
    hash: Aes128,
    prngs: Vec<(AesRng, AesRng)>,
}

impl Receiver {
    /// Create a receiver whose correlation-robust hash is keyed with
    /// `hash_key`.
    pub fn new(hash_key: Block) -> Self {
        Self {
            hash: Aes128::new(hash_key),
            prngs: Vec::new(),
        }
    }

    /// Seed the per-row PRNG pairs from the base-OT message pairs.
    pub fn init(&mut self, seeds: &[(Block, Block)]) {
        debug_assert_eq!(seeds.len(), BASE_OT_COUNT);
        self.prngs = seeds
            .iter()
            .map(|(s0, s1)| (AesRng::from_seed(*s0), AesRng::from_seed(*s1)))
            .collect();
    }

    /// Extend with packed choice bits (one block per 128 transfers). Writes
    /// the u-matrix for the sender into `u_out` and the selected messages
    /// into `msgs`.
    pub fn extend(
        &mut self,
        choices: &[Block],
        u_out: &mut [Block],
        msgs: &mut [Block],
    ) -> Result<(), Error> {
        let m = msgs.len();
        if m % BASE_OT_COUNT != 0 || u_out.len() != m || choices.len() != m / BASE_OT_COUNT {
            return Err(Error::InvalidInputLength);
        }
        if self.prngs.len() != BASE_OT_COUNT {
            return Err(Error::Other("extension used before base OTs".into()));
        }
        let width = m / BASE_OT_COUNT;

        let mut t0 = vec![Block::ZERO; m];
        let mut t1 = vec![Block::ZERO; width];
        for (i, (prng0, prng1)) in self.prngs.iter_mut().enumerate() {
            let row = &mut t0[i * width..(i + 1) * width];
            fill_blocks(prng0, row);
            fill_blocks(prng1, &mut t1);
            for j in 0..width {
                u_out[i * width + j] = row[j] ^ t1[j] ^ choices[j];
            }
        }

        let mut chunk = [Block::ZERO; BASE_OT_COUNT];
        for j in 0..width {
            for i in 0..BASE_OT_COUNT {
                chunk[i] = t0[i * width + j];
            }
            let rows = utils::transpose_128(&chunk);
            for (k, t) in rows.iter().enumerate() {
                let i = j * BASE_OT_COUNT + k;
                msgs[i] = self.hash.encrypt(*t ^ Block::from_low_u64(i as u64));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::Rng;

    // Drive both ends back to back with ideal base OTs.
    #[test]
    fn test_extension_correctness() {
        let mut rng = AesRng::new();
        let hash_key = rng.gen::<Block>();
        let delta = rng.gen::<Block>();
        let seeds: Vec<(Block, Block)> =
            (0..BASE_OT_COUNT).map(|_| (rng.gen(), rng.gen())).collect();
        let picked: Vec<Block> = seeds
            .iter()
            .enumerate()
            .map(|(i, (s0, s1))| if delta.bit(i) { *s1 } else { *s0 })
            .collect();

        let mut sender = Sender::new(hash_key);
        sender.init(&picked);
        let mut receiver = Receiver::new(hash_key);
        receiver.init(&seeds);

        let m = 512;
        let choices: Vec<Block> = (0..m / 128).map(|_| rng.gen()).collect();
        let mut u = vec![Block::ZERO; m];
        let mut recv_msgs = vec![Block::ZERO; m];
        receiver.extend(&choices, &mut u, &mut recv_msgs).unwrap();

        let mut msgs0 = vec![Block::ZERO; m];
        let mut msgs1 = vec![Block::ZERO; m];
        sender.extend(delta, &u, &mut msgs0, &mut msgs1).unwrap();

        for i in 0..m {
            let c = choices[i / 128].bit(i % 128);
            let expected = if c { msgs1[i] } else { msgs0[i] };
            assert_eq!(recv_msgs[i], expected, "instance {}", i);
            assert_ne!(msgs0[i], msgs1[i]);
        }
    }
}
