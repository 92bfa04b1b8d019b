//! The 128-bit block every symmetric primitive in the stack is built on.
//!
//! A `Block` is an opaque 16-byte value kept in an SSE register: an AES
//! state, a PRNG seed, an OT pad, or 128 packed choice bits, depending on
//! who is holding it. The protocols only ever XOR blocks, compare them for
//! equality, pull out bits and 64-bit limbs, and move them through byte
//! buffers, so that is the whole surface.

use std::arch::x86_64::*;

/// A 128-bit value, SIMD-backed.
#[derive(Clone, Copy)]
pub struct Block(pub __m128i);

impl Block {
    /// The all-zero block.
    pub const ZERO: Block = Block(unsafe { std::mem::transmute::<u128, __m128i>(0) });

    /// A block whose low 64-bit limb is `lo` and whose high limb is zero.
    #[inline]
    pub fn from_low_u64(lo: u64) -> Self {
        Block::from_u64s(lo, 0)
    }

    /// A block assembled from two 64-bit limbs.
    #[inline]
    pub fn from_u64s(lo: u64, hi: u64) -> Self {
        unsafe { Block(_mm_set_epi64x(hi as i64, lo as i64)) }
    }

    /// The low 64-bit limb.
    #[inline]
    pub fn low_u64(&self) -> u64 {
        u128::from(*self) as u64
    }

    /// Add `n` into the low limb, wrapping at 2^64 and leaving the high
    /// limb alone. The counter-mode walk steps through counters this way.
    #[inline]
    pub fn wrapping_add_low(&self, n: u64) -> Block {
        unsafe { Block(_mm_add_epi64(self.0, _mm_set_epi64x(0, n as i64))) }
    }

    /// Bit `i`, with bytes walked low to high and bits numbered from the
    /// least significant end of each byte. Choice vectors in the OT layer
    /// are indexed with this layout.
    #[inline]
    pub fn bit(&self, i: usize) -> bool {
        debug_assert!(i < 128);
        (u128::from(*self) >> i) & 1 == 1
    }

    /// Build a block from a slice that must hold exactly 16 bytes.
    #[inline]
    pub fn try_from_slice(bytes: &[u8]) -> Option<Self> {
        let bytes: [u8; 16] = bytes.try_into().ok()?;
        Some(Block::from(bytes))
    }
}

impl Default for Block {
    #[inline]
    fn default() -> Self {
        Block::ZERO
    }
}

impl PartialEq for Block {
    #[inline]
    fn eq(&self, other: &Block) -> bool {
        u128::from(*self) == u128::from(*other)
    }
}

impl Eq for Block {}

impl std::ops::BitXor for Block {
    type Output = Block;
    #[inline]
    fn bitxor(self, rhs: Self) -> Self {
        unsafe { Block(_mm_xor_si128(self.0, rhs.0)) }
    }
}

impl std::ops::BitXorAssign for Block {
    #[inline]
    fn bitxor_assign(&mut self, rhs: Self) {
        *self = *self ^ rhs;
    }
}

impl AsRef<[u8]> for Block {
    #[inline]
    fn as_ref(&self) -> &[u8] {
        unsafe { std::slice::from_raw_parts(self as *const Block as *const u8, 16) }
    }
}

impl AsMut<[u8]> for Block {
    #[inline]
    fn as_mut(&mut self) -> &mut [u8] {
        unsafe { std::slice::from_raw_parts_mut(self as *mut Block as *mut u8, 16) }
    }
}

impl From<u128> for Block {
    #[inline]
    fn from(value: u128) -> Self {
        Block(unsafe { std::mem::transmute::<u128, __m128i>(value) })
    }
}

impl From<Block> for u128 {
    #[inline]
    fn from(block: Block) -> u128 {
        unsafe { std::mem::transmute::<__m128i, u128>(block.0) }
    }
}

impl From<[u8; 16]> for Block {
    #[inline]
    fn from(bytes: [u8; 16]) -> Self {
        Block::from(u128::from_ne_bytes(bytes))
    }
}

impl From<Block> for [u8; 16] {
    #[inline]
    fn from(block: Block) -> [u8; 16] {
        u128::from(block).to_ne_bytes()
    }
}

impl rand::distributions::Distribution<Block> for rand::distributions::Standard {
    #[inline]
    fn sample<R: rand::Rng + ?Sized>(&self, rng: &mut R) -> Block {
        rng.gen::<u128>().into()
    }
}

impl std::fmt::Debug for Block {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "Block({:032X})", u128::from(*self))
    }
}
