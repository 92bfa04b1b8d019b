//! Bit-matrix transposition and friends.

use binnacle::Block;
use std::arch::x86_64::*;

/// Transpose a 128x128 bit matrix, one row per block. Bits are indexed
/// low byte to high byte, least significant bit first within a byte.
pub fn transpose_128(input: &[Block]) -> [Block; 128] {
    assert_eq!(input.len(), 128);
    let inp = unsafe { std::slice::from_raw_parts(input.as_ptr() as *const u8, 128 * 16) };
    let mut out = [Block::default(); 128];
    let outp = unsafe { std::slice::from_raw_parts_mut(out.as_mut_ptr() as *mut u8, 128 * 16) };
    for i in (0..128).step_by(16) {
        for j in (0..128).step_by(8) {
            let mut v = unsafe {
                _mm_set_epi8(
                    inp[(i + 15) * 16 + j / 8] as i8,
                    inp[(i + 14) * 16 + j / 8] as i8,
                    inp[(i + 13) * 16 + j / 8] as i8,
                    inp[(i + 12) * 16 + j / 8] as i8,
                    inp[(i + 11) * 16 + j / 8] as i8,
                    inp[(i + 10) * 16 + j / 8] as i8,
                    inp[(i + 9) * 16 + j / 8] as i8,
                    inp[(i + 8) * 16 + j / 8] as i8,
                    inp[(i + 7) * 16 + j / 8] as i8,
                    inp[(i + 6) * 16 + j / 8] as i8,
                    inp[(i + 5) * 16 + j / 8] as i8,
                    inp[(i + 4) * 16 + j / 8] as i8,
                    inp[(i + 3) * 16 + j / 8] as i8,
                    inp[(i + 2) * 16 + j / 8] as i8,
                    inp[(i + 1) * 16 + j / 8] as i8,
                    inp[i * 16 + j / 8] as i8,
                )
            };
            for k in (0..8).rev() {
                let mask = unsafe { _mm_movemask_epi8(v) } as u16;
                let pos = (j + k) * 16 + i / 8;
                outp[pos..pos + 2].copy_from_slice(&mask.to_le_bytes());
                v = unsafe { _mm_slli_epi64::<1>(v) };
            }
        }
    }
    out
}

/// View a block slice as raw bytes.
pub fn blocks_as_bytes(blocks: &[Block]) -> &[u8] {
    unsafe { std::slice::from_raw_parts(blocks.as_ptr() as *const u8, blocks.len() * 16) }
}

/// View a mutable block slice as raw bytes.
pub fn blocks_as_bytes_mut(blocks: &mut [Block]) -> &mut [u8] {
    unsafe { std::slice::from_raw_parts_mut(blocks.as_mut_ptr() as *mut u8, blocks.len() * 16) }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transpose_single_bit() {
        let mut m = vec![Block::default(); 128];
        // Bit 5 of row 3 moves to bit 3 of row 5.
        m[3] = Block::from(1u128 << 5);
        let t = transpose_128(&m);
        for (i, row) in t.iter().enumerate() {
            if i == 5 {
                assert_eq!(*row, Block::from(1u128 << 3));
            } else {
                assert_eq!(*row, Block::default());
            }
        }
    }

    #[test]
    fn test_transpose_involution() {
        let m = (0..128).map(|_| rand::random::<Block>()).collect::<Vec<_>>();
        let t = transpose_128(&m);
        let tt = transpose_128(&t);
        assert_eq!(&tt[..], &m[..]);
    }
}
