#![allow(clippy::many_single_char_names)]

//! `paddlepop` implements differentially-private cardinality/attribution
//! PSI: two parties match their tables on any of several identifier
//! columns through a commutative P-256 cipher, pad the inputs with
//! DP-sampled dummy rows, and walk away with additive shares mod 2^64 of
//! the intersection rows' features, produced under Paillier encryption.

pub mod config;
pub mod csv_io;
pub mod ecc;
mod errors;
pub mod paillier;
pub mod psi;
pub mod sampling;
pub mod utils;

pub use crate::{
    config::{CommonParams, DpParams, EccParams, PaillierParams, PsiParams},
    ecc::EccCipher,
    errors::Error,
    paillier::Paillier,
    psi::DpcaPsi,
    sampling::DpSampling,
};
