//! The session's paired randomness: one AES-CTR stream shared with the peer
//! and one private to this party.

use binnacle::{AesRng, Block};
use rand::{RngCore, SeedableRng};

/// A common/unique PRNG pair. Draws from the common stream are identical on
/// both sides as long as both consume them in the same order.
pub struct PseudoRand {
    common: AesRng,
    unique: AesRng,
}

impl PseudoRand {
    /// Build from the seed block agreed with the peer; the unique stream is
    /// seeded from the OS.
    pub fn new(common_seed: Block) -> Self {
        Self {
            common: AesRng::from_seed(common_seed),
            unique: AesRng::new(),
        }
    }

    /// Next value of the shared stream.
    #[inline]
    pub fn get_common(&mut self) -> i64 {
        self.common.next_u64() as i64
    }

    /// Next value of the private stream.
    #[inline]
    pub fn get_unique(&mut self) -> i64 {
        self.unique.next_u64() as i64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_common_streams_agree() {
        let seed = rand::random::<Block>();
        let mut a = PseudoRand::new(seed);
        let mut b = PseudoRand::new(seed);
        for _ in 0..100 {
            assert_eq!(a.get_common(), b.get_common());
        }
        assert_ne!(a.get_unique(), b.get_unique());
    }
}
