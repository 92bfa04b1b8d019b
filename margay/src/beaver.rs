//! Beaver AND-triple generation from random oblivious transfers.
//!
//! A triple is three `i64`s `(a, b, c)` holding 64 independent bit triples
//! with `c = a & b` across the XOR shares of the two parties. Each batch of
//! `n` triples costs `2 * 64 * n` OT instances: two passes of the standard
//! OT-based shared-AND conversion, one per cross term.

use crate::{errors::Error, ot::OtPool};
use binnacle::AbstractChannel;

/// Triples produced per refill.
pub const TRIPLE_BUFFER_SIZE: usize = 1024;

/// A buffered generator of random AND triples.
pub struct BoolTripleGenerator {
    party: usize,
    buffer: Vec<[i64; 3]>,
    idx: usize,
}

// Pack the least significant bits of 64 consecutive values into one i64,
// first value in the most significant lane position.
fn lsb_pack(input: &[i64]) -> Vec<i64> {
    debug_assert_eq!(input.len() % 64, 0);
    input
        .chunks_exact(64)
        .map(|chunk| chunk.iter().fold(0i64, |acc, m| (acc << 1) | (m & 1)))
        .collect()
}

impl BoolTripleGenerator {
    /// Create an empty generator for `party`; the first `get_triple` fills it.
    pub fn new(party: usize) -> Self {
        Self {
            party,
            buffer: Vec::new(),
            idx: 0,
        }
    }

    /// Pop the next triple, refilling the buffer from the OT pool if needed.
    pub fn get_triple<C: AbstractChannel>(
        &mut self,
        channel: &mut C,
        ot: &mut OtPool,
    ) -> Result<[i64; 3], Error> {
        if self.idx >= self.buffer.len() {
            self.refill(channel, ot)?;
        }
        let triple = self.buffer[self.idx];
        self.idx += 1;
        Ok(triple)
    }

    fn pass<C: AbstractChannel>(
        &mut self,
        channel: &mut C,
        ot: &mut OtPool,
        len: usize,
    ) -> Result<(Vec<i64>, Vec<i64>), Error> {
        let mut msgs0 = vec![0i64; 64 * len];
        let mut msgs1 = vec![0i64; 64 * len];
        for i in 0..64 * len {
            let msg = ot.get_ot_instance(channel, 0)?;
            msgs0[i] = msg[0];
            msgs1[i] = msg[1];
        }
        Ok((lsb_pack(&msgs0), lsb_pack(&msgs1)))
    }

    fn refill<C: AbstractChannel>(
        &mut self,
        channel: &mut C,
        ot: &mut OtPool,
    ) -> Result<(), Error> {
        let len = TRIPLE_BUFFER_SIZE;

        // Pass one. Party 0 plays OT sender with random pads (x0, x1): its
        // b-share is x0 ^ x1 and its mask is x0. Party 1's a-share is its
        // choice vector and its mask is the received pad, so the two masks
        // XOR to a * (x0 ^ x1).
        let (first, second) = self.pass(channel, ot, len)?;
        let (b1, a0, v0, u0);
        if self.party == 0 {
            b1 = first
                .iter()
                .zip(second.iter())
                .map(|(x0, x1)| x0 ^ x1)
                .collect::<Vec<_>>();
            v0 = first;
            a0 = Vec::new();
            u0 = Vec::new();
        } else {
            u0 = first;
            a0 = second;
            b1 = Vec::new();
            v0 = Vec::new();
        }

        // Pass two, cross terms swapped.
        let (first, second) = self.pass(channel, ot, len)?;
        let (a1, b0, v1, u1);
        if self.party == 0 {
            a1 = first
                .iter()
                .zip(second.iter())
                .map(|(x0, x1)| x0 ^ x1)
                .collect::<Vec<_>>();
            v1 = first;
            b0 = Vec::new();
            u1 = Vec::new();
        } else {
            u1 = first;
            b0 = second;
            a1 = Vec::new();
            v1 = Vec::new();
        }

        self.buffer.clear();
        self.buffer.reserve(len);
        if self.party == 0 {
            for i in 0..len {
                self.buffer
                    .push([b1[i], a1[i], (a1[i] & b1[i]) ^ v0[i] ^ v1[i]]);
            }
        } else {
            for i in 0..len {
                self.buffer
                    .push([b0[i], a0[i], (a0[i] & b0[i]) ^ u0[i] ^ u1[i]]);
            }
        }
        self.idx = 0;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use binnacle::{Block, Channel};
    use std::{
        io::{BufReader, BufWriter},
        os::unix::net::UnixStream,
    };

    #[test]
    fn test_triples_are_valid() {
        let common = rand::random::<Block>();
        let (s0, s1) = UnixStream::pair().unwrap();
        let n = 200;

        let handle = std::thread::spawn(move || {
            let reader = BufReader::new(s1.try_clone().unwrap());
            let writer = BufWriter::new(s1);
            let mut channel = Channel::new(reader, writer);
            let mut pool = OtPool::new(1, common, rand::random::<Block>());
            pool.init(&mut channel).unwrap();
            let mut gen = BoolTripleGenerator::new(1);
            (0..n)
                .map(|_| gen.get_triple(&mut channel, &mut pool).unwrap())
                .collect::<Vec<_>>()
        });

        let reader = BufReader::new(s0.try_clone().unwrap());
        let writer = BufWriter::new(s0);
        let mut channel = Channel::new(reader, writer);
        let mut pool = OtPool::new(0, common, rand::random::<Block>());
        pool.init(&mut channel).unwrap();
        let mut gen = BoolTripleGenerator::new(0);
        let mine: Vec<[i64; 3]> = (0..n)
            .map(|_| gen.get_triple(&mut channel, &mut pool).unwrap())
            .collect();

        let theirs = handle.join().unwrap();
        for ([a0, b0, c0], [a1, b1, c1]) in mine.iter().zip(theirs.iter()) {
            assert_eq!((a0 ^ a1) & (b0 ^ b1), c0 ^ c1);
        }
    }
}
