//! Implementation of AES-128, encryption only, using Intel's AES-NI
//! instructions.
//!
//! Besides single-block ECB this exposes the counter-mode walk used by the
//! PRNG and the OT extension: encryptions of `base`, `base + 1`, …, where the
//! addition only touches the low 64-bit limb of the counter block.

use crate::Block;
use std::arch::x86_64::*;

/// AES-128, encryption only.
#[derive(Clone)]
pub struct Aes128 {
    round_keys: [Block; 11],
}

macro_rules! expand_round {
    ($round_keys:expr, $i:expr, $rcon:literal) => {
        let prev = $round_keys[$i - 1].0;
        let gen = _mm_aeskeygenassist_si128::<$rcon>(prev);
        let gen = _mm_shuffle_epi32::<0xFF>(gen);
        let mut key = _mm_xor_si128(prev, _mm_slli_si128::<4>(prev));
        key = _mm_xor_si128(key, _mm_slli_si128::<4>(key));
        key = _mm_xor_si128(key, _mm_slli_si128::<4>(key));
        $round_keys[$i] = Block(_mm_xor_si128(key, gen));
    };
}

impl Aes128 {
    /// Create a new `Aes128` object, using `key` as the AES key.
    pub fn new(key: Block) -> Self {
        let mut round_keys = [Block::default(); 11];
        round_keys[0] = key;
        unsafe {
            expand_round!(round_keys, 1, 0x01);
            expand_round!(round_keys, 2, 0x02);
            expand_round!(round_keys, 3, 0x04);
            expand_round!(round_keys, 4, 0x08);
            expand_round!(round_keys, 5, 0x10);
            expand_round!(round_keys, 6, 0x20);
            expand_round!(round_keys, 7, 0x40);
            expand_round!(round_keys, 8, 0x80);
            expand_round!(round_keys, 9, 0x1B);
            expand_round!(round_keys, 10, 0x36);
        }
        Aes128 { round_keys }
    }

    /// Return the key the schedule was built from.
    #[inline]
    pub fn key(&self) -> Block {
        self.round_keys[0]
    }

    /// Encrypt a block, outputting the ciphertext.
    #[inline]
    pub fn encrypt(&self, m: Block) -> Block {
        unsafe {
            let keys = &self.round_keys;
            let mut c = _mm_xor_si128(m.0, keys[0].0);
            for key in keys[1..10].iter() {
                c = _mm_aesenc_si128(c, key.0);
            }
            Block(_mm_aesenclast_si128(c, keys[10].0))
        }
    }

    /// Encrypt eight blocks at a time, outputting the ciphertexts.
    #[inline]
    pub fn encrypt8(&self, blocks: [Block; 8]) -> [Block; 8] {
        unsafe {
            let keys = &self.round_keys;
            let mut c: [__m128i; 8] = [
                _mm_xor_si128(blocks[0].0, keys[0].0),
                _mm_xor_si128(blocks[1].0, keys[0].0),
                _mm_xor_si128(blocks[2].0, keys[0].0),
                _mm_xor_si128(blocks[3].0, keys[0].0),
                _mm_xor_si128(blocks[4].0, keys[0].0),
                _mm_xor_si128(blocks[5].0, keys[0].0),
                _mm_xor_si128(blocks[6].0, keys[0].0),
                _mm_xor_si128(blocks[7].0, keys[0].0),
            ];
            for key in keys[1..10].iter() {
                for ci in c.iter_mut() {
                    *ci = _mm_aesenc_si128(*ci, key.0);
                }
            }
            let mut out = [Block::default(); 8];
            for (o, ci) in out.iter_mut().zip(c.iter()) {
                *o = Block(_mm_aesenclast_si128(*ci, keys[10].0));
            }
            out
        }
    }

    /// Counter-mode walk: `out[i] = AES_k(base + i)`, where `+` increments the
    /// low 64-bit limb of the counter block. `base.low + out.len()` must not
    /// carry into the high limb.
    pub fn encrypt_ctr(&self, base: Block, out: &mut [Block]) {
        let mut ctr = base;
        let mut chunks = out.chunks_exact_mut(8);
        for chunk in &mut chunks {
            let blocks = [
                ctr,
                ctr.wrapping_add_low(1),
                ctr.wrapping_add_low(2),
                ctr.wrapping_add_low(3),
                ctr.wrapping_add_low(4),
                ctr.wrapping_add_low(5),
                ctr.wrapping_add_low(6),
                ctr.wrapping_add_low(7),
            ];
            chunk.copy_from_slice(&self.encrypt8(blocks));
            ctr = ctr.wrapping_add_low(8);
        }
        for slot in chunks.into_remainder() {
            *slot = self.encrypt(ctr);
            ctr = ctr.wrapping_add_low(1);
        }
    }

    /// Counter-mode walk starting from a 64-bit counter.
    #[inline]
    pub fn encrypt_ctr_u64(&self, base: u64, out: &mut [Block]) {
        self.encrypt_ctr(Block::from_low_u64(base), out)
    }
}
