//! Row-major share matrices and the fixed-point encoding.
//!
//! Arithmetic shares are `i64` lanes that wrap mod 2^64; a boolean-shared
//! matrix uses the same representation with each bit position an independent
//! XOR share. Real values carry an implicit scale of 2^16.

use binnacle::AbstractChannel;
use std::io::Result;

/// Fixed-point scale: 16 fractional bits.
pub const FIXED_POINT_SCALE: i64 = 1 << 16;

/// Quantize a real value to fixed point.
#[inline]
pub fn float_to_fixed(input: f64) -> i64 {
    (input * FIXED_POINT_SCALE as f64) as i64
}

/// Dequantize a fixed-point value.
#[inline]
pub fn fixed_to_float(input: i64) -> f64 {
    input as f64 / FIXED_POINT_SCALE as f64
}

/// One party's half of a secret-shared matrix, row-major.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ShareMatrix {
    /// The share lanes.
    pub shares: Vec<i64>,
    rows: usize,
    cols: usize,
}

impl ShareMatrix {
    /// An all-zero matrix of the given shape.
    pub fn new(rows: usize, cols: usize) -> Self {
        Self {
            shares: vec![0; rows * cols],
            rows,
            cols,
        }
    }

    /// Number of rows.
    pub fn rows(&self) -> usize {
        self.rows
    }

    /// Number of columns.
    pub fn cols(&self) -> usize {
        self.cols
    }

    /// Number of lanes.
    pub fn size(&self) -> usize {
        self.shares.len()
    }

    /// The lane at (row, col).
    #[inline]
    pub fn at(&self, row: usize, col: usize) -> i64 {
        self.shares[row * self.cols + col]
    }

    /// Set the lane at (row, col).
    #[inline]
    pub fn set(&mut self, row: usize, col: usize, value: i64) {
        self.shares[row * self.cols + col] = value;
    }

    /// Copy one column out as an n×1 matrix.
    pub fn column(&self, col: usize) -> ShareMatrix {
        let mut out = ShareMatrix::new(self.rows, 1);
        for row in 0..self.rows {
            out.shares[row] = self.at(row, col);
        }
        out
    }

    /// Lane-wise wrapping addition.
    pub fn add(&self, other: &ShareMatrix) -> ShareMatrix {
        debug_assert_eq!(self.size(), other.size());
        let mut out = self.clone();
        for (lane, v) in out.shares.iter_mut().zip(other.shares.iter()) {
            *lane = lane.wrapping_add(*v);
        }
        out
    }

    /// Lane-wise wrapping subtraction.
    pub fn sub(&self, other: &ShareMatrix) -> ShareMatrix {
        debug_assert_eq!(self.size(), other.size());
        let mut out = self.clone();
        for (lane, v) in out.shares.iter_mut().zip(other.shares.iter()) {
            *lane = lane.wrapping_sub(*v);
        }
        out
    }

    /// Write the lanes to the channel, native-endian, no framing.
    pub fn write_to<C: AbstractChannel>(&self, channel: &mut C) -> Result<()> {
        let mut buffer = Vec::with_capacity(self.shares.len() * 8);
        for v in self.shares.iter() {
            buffer.extend_from_slice(&v.to_ne_bytes());
        }
        channel.write_bytes(&buffer)
    }

    /// Read a matrix of the given shape from the channel.
    pub fn read_from<C: AbstractChannel>(channel: &mut C, rows: usize, cols: usize) -> Result<Self> {
        let mut buffer = vec![0u8; rows * cols * 8];
        channel.read_bytes(&mut buffer)?;
        let shares = buffer
            .chunks_exact(8)
            .map(|chunk| i64::from_ne_bytes(chunk.try_into().unwrap()))
            .collect();
        Ok(Self { shares, rows, cols })
    }
}

/// A cleartext matrix of real values, row-major.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct PlainMatrix {
    /// The values.
    pub data: Vec<f64>,
    rows: usize,
    cols: usize,
}

impl PlainMatrix {
    /// An all-zero matrix of the given shape.
    pub fn new(rows: usize, cols: usize) -> Self {
        Self {
            data: vec![0.0; rows * cols],
            rows,
            cols,
        }
    }

    /// Build from row-major values.
    pub fn from_values(rows: usize, cols: usize, data: Vec<f64>) -> Self {
        debug_assert_eq!(data.len(), rows * cols);
        Self { data, rows, cols }
    }

    /// Number of rows.
    pub fn rows(&self) -> usize {
        self.rows
    }

    /// Number of columns.
    pub fn cols(&self) -> usize {
        self.cols
    }

    /// The value at (row, col).
    #[inline]
    pub fn at(&self, row: usize, col: usize) -> f64 {
        self.data[row * self.cols + col]
    }
}
