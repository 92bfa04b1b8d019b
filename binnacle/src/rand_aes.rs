//! AES-CTR-based random number generator.
//!
//! The output stream is exactly the AES-CTR keystream of the seed key over
//! the counters 0, 1, 2, …, consumed byte by byte through a 256-block buffer.
//! Seeding two generators with the same block therefore yields identical
//! streams, which the protocol relies on for its "common" randomness.

use crate::{Aes128, Block};
use rand::{CryptoRng, Error, Rng, RngCore, SeedableRng};

const BUFFER_BLOCKS: usize = 256;

/// Implementation of a random number generator based on AES-CTR.
#[derive(Clone)]
pub struct AesRng {
    aes: Aes128,
    buffer: Vec<Block>,
    // Next unused counter value. Never reused: each refill advances it by the
    // number of blocks produced.
    block_idx: u64,
    byte_idx: usize,
}

impl AesRng {
    /// Create a new random number generator using a random seed from
    /// `rand::random`.
    pub fn new() -> Self {
        AesRng::from_seed(rand::random::<Block>())
    }

    /// Create a new RNG using a random seed from this one.
    pub fn fork(&mut self) -> Self {
        AesRng::from_seed(self.gen::<Block>())
    }

    /// Return the seed block this generator was keyed with.
    pub fn seed(&self) -> Block {
        self.aes.key()
    }

    /// A boolean draw: the low bit of one fresh byte of keystream.
    pub fn bit(&mut self) -> bool {
        let mut byte = [0u8; 1];
        self.fill_bytes(&mut byte);
        byte[0] & 1 == 1
    }

    fn capacity(&self) -> usize {
        self.buffer.len() * 16
    }

    fn buffer_bytes(&self) -> &[u8] {
        unsafe {
            std::slice::from_raw_parts(self.buffer.as_ptr() as *const u8, self.capacity())
        }
    }

    fn refill(&mut self) {
        let base = self.block_idx;
        self.aes.encrypt_ctr_u64(base, &mut self.buffer);
        self.block_idx = base + self.buffer.len() as u64;
        self.byte_idx = 0;
    }
}

impl RngCore for AesRng {
    #[inline]
    fn next_u32(&mut self) -> u32 {
        let mut bytes = [0u8; 4];
        self.fill_bytes(&mut bytes);
        u32::from_ne_bytes(bytes)
    }

    #[inline]
    fn next_u64(&mut self) -> u64 {
        let mut bytes = [0u8; 8];
        self.fill_bytes(&mut bytes);
        u64::from_ne_bytes(bytes)
    }

    fn fill_bytes(&mut self, dest: &mut [u8]) {
        let mut offset = 0;
        while offset < dest.len() {
            let step = (dest.len() - offset).min(self.capacity() - self.byte_idx);
            dest[offset..offset + step]
                .copy_from_slice(&self.buffer_bytes()[self.byte_idx..self.byte_idx + step]);
            self.byte_idx += step;
            offset += step;

            if self.byte_idx == self.capacity() {
                // Large requests bypass the buffer: generate whole blocks
                // straight into a scratch vector, then refill.
                let remaining = dest.len() - offset;
                if remaining >= 8 * 16 {
                    let nblocks = remaining / 16;
                    let mut bulk = vec![Block::default(); nblocks];
                    self.aes.encrypt_ctr_u64(self.block_idx, &mut bulk);
                    self.block_idx += nblocks as u64;
                    let bytes = unsafe {
                        std::slice::from_raw_parts(bulk.as_ptr() as *const u8, nblocks * 16)
                    };
                    dest[offset..offset + nblocks * 16].copy_from_slice(bytes);
                    offset += nblocks * 16;
                }
                self.refill();
            }
        }
    }

    #[inline]
    fn try_fill_bytes(&mut self, dest: &mut [u8]) -> Result<(), Error> {
        self.fill_bytes(dest);
        Ok(())
    }
}

impl SeedableRng for AesRng {
    type Seed = Block;

    fn from_seed(seed: Self::Seed) -> Self {
        let mut rng = AesRng {
            aes: Aes128::new(seed),
            buffer: vec![Block::default(); BUFFER_BLOCKS],
            block_idx: 0,
            byte_idx: 0,
        };
        rng.refill();
        rng
    }
}

impl CryptoRng for AesRng {}

impl Default for AesRng {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generate() {
        let mut rng = AesRng::new();
        let a = rng.gen::<[Block; 8]>();
        let b = rng.gen::<[Block; 8]>();
        assert_ne!(a, b);
    }

    #[test]
    fn test_determinism() {
        let seed = rand::random::<Block>();
        let mut a = AesRng::from_seed(seed);
        let mut b = AesRng::from_seed(seed);
        let mut buf_a = vec![0u8; 10_000];
        let mut buf_b = vec![0u8; 10_000];
        a.fill_bytes(&mut buf_a);
        b.fill_bytes(&mut buf_b);
        assert_eq!(buf_a, buf_b);
    }

    #[test]
    fn test_determinism_across_read_sizes() {
        let seed = rand::random::<Block>();
        let mut a = AesRng::from_seed(seed);
        let mut b = AesRng::from_seed(seed);
        // One big read against many odd-sized reads, spanning several refills.
        let mut big = vec![0u8; 16 * BUFFER_BLOCKS * 3 + 5];
        a.fill_bytes(&mut big);
        let mut small = Vec::new();
        let mut remaining = big.len();
        let mut step = 1;
        while remaining > 0 {
            let n = step.min(remaining);
            let mut chunk = vec![0u8; n];
            b.fill_bytes(&mut chunk);
            small.extend_from_slice(&chunk);
            remaining -= n;
            step = step * 2 + 1;
        }
        assert_eq!(big, small);
    }

    #[test]
    fn test_keystream_is_aes_ctr() {
        let seed = rand::random::<Block>();
        let mut rng = AesRng::from_seed(seed);
        let mut first = [0u8; 16];
        rng.fill_bytes(&mut first);
        let aes = Aes128::new(seed);
        assert_eq!(first, <[u8; 16]>::from(aes.encrypt(Block::from_low_u64(0))));
    }

    #[test]
    fn test_fork_diverges() {
        let mut rng = AesRng::new();
        let mut forked = rng.fork();
        assert_ne!(rng.gen::<u64>(), forked.gen::<u64>());
    }
}
