//! Implementation of the Naor-Pinkas random oblivious transfer protocol (cf.
//! <https://dl.acm.org/citation.cfm?id=365502>) over NIST P-256.
//!
//! Both parties end up with 128-bit values: the sender with a pair per
//! transfer, the receiver with the one selected by its choice bit. The
//! values seed the IKNP extension; no chosen messages are ever encrypted.

use crate::errors::Error;
use binnacle::Block;
use p256::{
    elliptic_curve::{
        sec1::{FromEncodedPoint, ToEncodedPoint},
        Field,
    },
    AffinePoint, EncodedPoint, ProjectivePoint, Scalar,
};
use rand::{CryptoRng, Rng};
use sha2::{Digest, Sha256};

/// Length of a compressed P-256 point.
pub const POINT_BYTES: usize = 33;

pub(crate) fn export_point(point: &ProjectivePoint) -> Result<[u8; POINT_BYTES], Error> {
    let encoded = point.to_affine().to_encoded_point(true);
    let bytes = encoded.as_bytes();
    if bytes.len() != POINT_BYTES {
        return Err(Error::InvalidPoint);
    }
    let mut out = [0u8; POINT_BYTES];
    out.copy_from_slice(bytes);
    Ok(out)
}

pub(crate) fn import_point(bytes: &[u8]) -> Result<ProjectivePoint, Error> {
    let encoded = EncodedPoint::from_bytes(bytes).map_err(|_| Error::InvalidPoint)?;
    let affine: Option<AffinePoint> = AffinePoint::from_encoded_point(&encoded).into();
    affine
        .map(ProjectivePoint::from)
        .ok_or(Error::InvalidPoint)
}

// The first byte of the compressed encoding is overwritten with the bit
// index before hashing, breaking the symmetry between the two pads.
fn derive_output(mut point: [u8; POINT_BYTES], index: u8) -> Block {
    point[0] = index;
    let digest = Sha256::digest(point);
    Block::try_from_slice(&digest[..16]).unwrap()
}

/// Oblivious transfer sender.
pub struct Sender {
    cs: Vec<Scalar>,
    rs: Vec<Scalar>,
    /// The derived message pairs, valid after `send_post`.
    pub msgs: Vec<(Block, Block)>,
}

impl Sender {
    /// Draw the ephemeral scalars for `count` transfers.
    pub fn new<RNG: CryptoRng + Rng>(count: usize, rng: &mut RNG) -> Self {
        let cs = (0..count).map(|_| Scalar::random(&mut *rng)).collect();
        let rs = (0..count).map(|_| Scalar::random(&mut *rng)).collect();
        Self {
            cs,
            rs,
            msgs: vec![(Block::ZERO, Block::ZERO); count],
        }
    }

    /// First flow for transfer `idx`: the pair (C, g^r) to send.
    pub fn send_pre(&self, idx: usize) -> Result<[[u8; POINT_BYTES]; 2], Error> {
        let c = ProjectivePoint::GENERATOR * self.cs[idx];
        let gr = ProjectivePoint::GENERATOR * self.rs[idx];
        Ok([export_point(&c)?, export_point(&gr)?])
    }

    /// Second flow: given the receiver's PK_0, derive both pads.
    pub fn send_post(&mut self, idx: usize, pk0_bytes: &[u8]) -> Result<(), Error> {
        let pk0 = import_point(pk0_bytes)?;
        let r = self.rs[idx];
        let cr = ProjectivePoint::GENERATOR * (self.cs[idx] * r);
        let pk0_r = pk0 * r;
        let pk1_r = cr - pk0_r;
        self.msgs[idx] = (
            derive_output(export_point(&pk0_r)?, 0),
            derive_output(export_point(&pk1_r)?, 1),
        );
        Ok(())
    }
}

/// Oblivious transfer receiver.
pub struct Receiver {
    choices: Block,
    ks: Vec<Scalar>,
    /// The selected messages, valid after `recv`.
    pub msgs: Vec<Block>,
}

impl Receiver {
    /// Draw the ephemeral scalars for `count` transfers with the given
    /// choice bits.
    pub fn new<RNG: CryptoRng + Rng>(count: usize, choices: Block, rng: &mut RNG) -> Self {
        let ks = (0..count).map(|_| Scalar::random(&mut *rng)).collect();
        Self {
            choices,
            ks,
            msgs: vec![Block::ZERO; count],
        }
    }

    /// Process the sender's (C, g^r) for transfer `idx`, returning PK_0 to
    /// send back.
    pub fn recv(
        &mut self,
        idx: usize,
        input: &[[u8; POINT_BYTES]; 2],
    ) -> Result<[u8; POINT_BYTES], Error> {
        let sigma = self.choices.bit(idx);
        let c = import_point(&input[0])?;
        let gr = import_point(&input[1])?;
        let k = self.ks[idx];
        let pk_sigma = ProjectivePoint::GENERATOR * k;
        let pk0 = if sigma { c - pk_sigma } else { pk_sigma };
        let out = export_point(&pk0)?;
        let grk = gr * k;
        self.msgs[idx] = derive_output(export_point(&grk)?, sigma as u8);
        Ok(out)
    }
}
