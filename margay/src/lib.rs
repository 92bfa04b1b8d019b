//! `margay` provides the oblivious-transfer machinery of the two-party
//! attribution stack: Naor-Pinkas base OTs over P-256, the semi-honest IKNP
//! extension, buffered directional OT pools, and Beaver AND-triple
//! generation on top of them.

pub mod beaver;
mod errors;
pub mod ot;
pub mod utils;

pub use crate::{
    beaver::{BoolTripleGenerator, TRIPLE_BUFFER_SIZE},
    errors::Error,
    ot::{OtPool, BASE_OT_COUNT, OT_BUFFER_SIZE},
};
