//! Typed configuration for a PSI/attribution session.
//!
//! The JSON shape matches the parameter files the batch binaries consume;
//! every section and field has a default, so a partial document (or an empty
//! one) is a valid configuration. Unknown fields are rejected.

use serde::{Deserialize, Serialize};

/// Endpoint and data-shape options.
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(deny_unknown_fields, default)]
pub struct CommonParams {
    /// Peer address, IPv4 or IPv6.
    pub address: String,
    /// Port this party connects to.
    pub remote_port: u16,
    /// Port this party serves on.
    pub local_port: u16,
    /// Connect deadline in seconds.
    pub timeout: u64,
    /// Path of the party's input CSV.
    pub input_file: String,
    /// Whether the input CSV starts with a header row.
    pub has_header: bool,
    /// Path of the party's output CSV.
    pub output_file: String,
    /// Number of identifier columns, 1..=100.
    pub ids_num: usize,
    /// Whether this party plays the sender.
    pub is_sender: bool,
    /// Chatty progress logging.
    pub verbose: bool,
}

impl Default for CommonParams {
    fn default() -> Self {
        Self {
            address: "127.0.0.1".into(),
            remote_port: 30330,
            local_port: 30331,
            timeout: 90,
            input_file: "data/sender_input_file.csv".into(),
            has_header: false,
            output_file: "data/sender_output_file.csv".into(),
            ids_num: 3,
            is_sender: true,
            verbose: false,
        }
    }
}

/// Paillier options.
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(deny_unknown_fields, default)]
pub struct PaillierParams {
    /// Modulus length in bits; one of 1024, 2048, 3072.
    pub paillier_n_len: usize,
    /// Use the DJN precomputed-generator acceleration.
    pub enable_djn: bool,
    /// Pack several feature values into one ciphertext.
    pub apply_packing: bool,
    /// Statistical security parameter for packing masks, 40..=80.
    pub statistical_security_bits: usize,
}

impl Default for PaillierParams {
    fn default() -> Self {
        Self {
            paillier_n_len: 2048,
            enable_djn: true,
            apply_packing: true,
            statistical_security_bits: 40,
        }
    }
}

/// Elliptic-curve options.
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(deny_unknown_fields, default)]
pub struct EccParams {
    /// Curve identifier; only 415 (NIST P-256) is accepted.
    pub curve_id: usize,
}

impl Default for EccParams {
    fn default() -> Self {
        Self { curve_id: 415 }
    }
}

/// Differential-privacy options for the dummy-row padding.
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(deny_unknown_fields, default)]
pub struct DpParams {
    /// Privacy budget, used when the dummy count is not precomputed.
    pub epsilon: f64,
    /// Query budget matching `epsilon`.
    pub maximum_queries: usize,
    /// Take the per-column dummy count from `precomputed_tau`.
    pub use_precomputed_tau: bool,
    /// Per-column dummy count, 0..=2^20.
    pub precomputed_tau: usize,
    /// Pad the input tables at all.
    pub input_dp: bool,
    /// Force one feature column of the dummies to zero.
    pub has_zero_column: bool,
    /// Index of that column; negative counts from the end.
    pub zero_column_index: i64,
}

impl Default for DpParams {
    fn default() -> Self {
        Self {
            epsilon: 2.0,
            maximum_queries: 10,
            use_precomputed_tau: true,
            precomputed_tau: 1440,
            input_dp: true,
            has_zero_column: false,
            zero_column_index: -1,
        }
    }
}

/// The full parameter set of a session.
#[derive(Clone, Debug, Default, Deserialize, Serialize)]
#[serde(deny_unknown_fields, default)]
pub struct PsiParams {
    /// Endpoint and data-shape options.
    pub common: CommonParams,
    /// Paillier options.
    pub paillier_params: PaillierParams,
    /// Elliptic-curve options.
    pub ecc_params: EccParams,
    /// Differential-privacy options.
    pub dp_params: DpParams,
}

impl PsiParams {
    /// Parse a parameter document, filling omitted fields with defaults.
    pub fn from_json(text: &str) -> Result<Self, crate::Error> {
        serde_json::from_str(text).map_err(|e| crate::Error::Parameter(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let params = PsiParams::from_json("{}").unwrap();
        assert_eq!(params.common.ids_num, 3);
        assert_eq!(params.paillier_params.paillier_n_len, 2048);
        assert!(params.paillier_params.enable_djn);
        assert_eq!(params.ecc_params.curve_id, 415);
        assert_eq!(params.dp_params.precomputed_tau, 1440);
        assert_eq!(params.dp_params.zero_column_index, -1);
    }

    #[test]
    fn test_partial_document() {
        let params = PsiParams::from_json(
            r#"{"common": {"ids_num": 2, "is_sender": false}, "dp_params": {"input_dp": false}}"#,
        )
        .unwrap();
        assert_eq!(params.common.ids_num, 2);
        assert!(!params.common.is_sender);
        assert!(!params.dp_params.input_dp);
        assert_eq!(params.common.remote_port, 30330);
    }

    #[test]
    fn test_unknown_field_rejected() {
        assert!(PsiParams::from_json(r#"{"commons": {}}"#).is_err());
        assert!(PsiParams::from_json(r#"{"common": {"idsnum": 4}}"#).is_err());
    }
}
