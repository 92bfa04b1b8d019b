//! `abacus` is the secure two-party computation layer of the attribution
//! stack: arithmetic and boolean secret shares over 2^64 with conversions
//! between them, built on Beaver triples and buffered OTs, plus the session
//! coordinator that chains DPCA-PSI into the windowed-attribution sum.

pub mod aby;
mod errors;
pub mod matrix;
mod rand_pair;
pub mod session;

pub use crate::{
    aby::Aby,
    errors::Error,
    matrix::{fixed_to_float, float_to_fixed, PlainMatrix, ShareMatrix},
    rand_pair::PseudoRand,
    session::Measurement,
};
