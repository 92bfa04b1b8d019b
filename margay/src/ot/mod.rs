//! Oblivious transfer: Naor-Pinkas base OTs, IKNP extension, and the
//! buffered pools the share layer draws from.

pub mod iknp;
pub mod naor_pinkas;
pub mod pool;

pub use pool::{OtPool, BASE_OT_COUNT, OT_BUFFER_SIZE};
