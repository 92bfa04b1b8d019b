//! The session coordinator: PSI, then shared attribution, then reveal.

use crate::{
    aby::Aby,
    errors::Error,
    matrix::{ShareMatrix, FIXED_POINT_SCALE},
};
use binnacle::AbstractChannel;
use log::info;
use paddlepop::{DpcaPsi, PsiParams};

/// A full two-party measurement session. Owns the share layer (with its OT
/// pools and seeds) and the PSI state machine; both run over the one channel
/// the caller provides.
pub struct Measurement {
    psi: DpcaPsi,
    aby: Aby,
}

fn to_fixed_features(features: &[Vec<f64>]) -> Vec<Vec<u64>> {
    features
        .iter()
        .map(|column| {
            column
                .iter()
                .map(|v| (v * FIXED_POINT_SCALE as f64) as i64 as u64)
                .collect()
        })
        .collect()
}

fn shares_to_matrix(shares: &[Vec<u64>]) -> ShareMatrix {
    let cols = shares.len();
    let rows = shares.first().map_or(0, |column| column.len());
    let mut matrix = ShareMatrix::new(rows, cols);
    for (col, column) in shares.iter().enumerate() {
        for (row, value) in column.iter().enumerate() {
            matrix.set(row, col, *value as i64);
        }
    }
    matrix
}

impl Measurement {
    /// Initialize the share layer (seed agreement, OT pools) and the PSI
    /// session against the peer. The sender plays party 0.
    pub fn init<C: AbstractChannel>(params: &PsiParams, channel: &mut C) -> Result<Self, Error> {
        let party_id = if params.common.is_sender { 0 } else { 1 };
        let aby = Aby::init(party_id, channel)?;
        let psi = DpcaPsi::init(params, channel)?;
        info!("measurement session initialized as party {}", party_id);
        Ok(Self { psi, aby })
    }

    /// The intersection cardinality of the last completed run.
    pub fn intersection_size(&self) -> usize {
        self.psi.intersection_size()
    }

    /// Run the full pipeline: fixed-point quantization, DP sampling, PSI
    /// share generation, windowed attribution under shares, and a bilateral
    /// reveal of the single scalar.
    ///
    /// The combined share table must come out with exactly three columns
    /// (t0, t1, value) across both parties' features.
    pub fn measure<C: AbstractChannel>(
        &mut self,
        channel: &mut C,
        threshold: f64,
        keys: &[Vec<String>],
        features: &[Vec<f64>],
    ) -> Result<f64, Error> {
        let fixed = to_fixed_features(features);
        self.psi.data_sampling(channel, keys, &fixed)?;
        let shares = self.psi.process(channel)?;
        let input = shares_to_matrix(&shares);
        info!(
            "psi produced {} shared rows over {} columns",
            input.rows(),
            input.cols()
        );

        let result = self.aby.attribution(channel, threshold, &input)?;
        let r0 = self.aby.reveal(channel, 0, &result)?;
        let r1 = self.aby.reveal(channel, 1, &result)?;
        let plain = r0
            .or(r1)
            .ok_or_else(|| Error::ProtocolError("reveal returned no plaintext".into()))?;
        Ok(plain.data[0])
    }

    /// Cleartext cross-check: run the same PSI, reveal the whole share table
    /// to both sides, and evaluate the attribution predicate in the clear.
    pub fn plain_measure<C: AbstractChannel>(
        &mut self,
        channel: &mut C,
        threshold: f64,
        keys: &[Vec<String>],
        features: &[Vec<f64>],
    ) -> Result<f64, Error> {
        let fixed = to_fixed_features(features);
        self.psi.data_sampling(channel, keys, &fixed)?;
        let shares = self.psi.process(channel)?;
        let input = shares_to_matrix(&shares);
        if input.cols() != 3 {
            return Err(Error::ProtocolError(
                "plain measurement expects columns (t0, t1, value)".into(),
            ));
        }

        let r0 = self.aby.reveal(channel, 0, &input)?;
        let r1 = self.aby.reveal(channel, 1, &input)?;
        let plain = r0
            .or(r1)
            .ok_or_else(|| Error::ProtocolError("reveal returned no plaintext".into()))?;

        let mut total = 0.0;
        for row in 0..plain.rows() {
            let delta = plain.at(row, 1) - plain.at(row, 0);
            if delta > 0.0 && delta < threshold {
                total += plain.at(row, 2);
            }
        }
        Ok(total)
    }
}
