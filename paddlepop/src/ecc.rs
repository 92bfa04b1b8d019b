//! Multi-key elliptic-curve cipher over NIST P-256.
//!
//! Each instance carries an array of private scalars. Plaintexts enter the
//! group through a try-and-increment hash-to-curve whose x-candidates come
//! from a SHA3-256 random oracle; all outputs are 33-byte compressed SEC1
//! encodings. Commuting the scalar multiplications is what lets the two
//! parties compare double-encrypted identifiers.

use crate::errors::Error;
use num_bigint::{BigUint, RandBigInt};
use num_traits::Zero;
use p256::{
    elliptic_curve::{
        generic_array::GenericArray,
        sec1::{FromEncodedPoint, ToEncodedPoint},
        Field, PrimeField,
    },
    AffinePoint, EncodedPoint, ProjectivePoint, Scalar,
};
use rand::{CryptoRng, Rng};
use sha3::{Digest, Sha3_256};

/// The only accepted curve identifier (NIST P-256 / secp256r1).
pub const CURVE_ID_P256: usize = 415;
/// Length of a compressed point encoding.
pub const POINT_BYTES: usize = 33;
/// Bit length of a private scalar.
pub const KEY_BITS: u64 = 256;

const P_HEX: &[u8] = b"FFFFFFFF00000001000000000000000000000000FFFFFFFFFFFFFFFFFFFFFFFF";
const B_HEX: &[u8] = b"5AC635D8AA3A93E7B3EBBD55769886BC651D06B0CC53B0F63BCE3C3E27D2604B";
const ORDER_HEX: &[u8] = b"FFFFFFFF00000000FFFFFFFFFFFFFFFFBCE6FAADA7179E84F3B9CAC2FC632551";

/// An array of private scalars together with the P-256 curve constants.
pub struct EccCipher {
    keys: Vec<Scalar>,
    p: BigUint,
    a: BigUint,
    b: BigUint,
    p_minus_one_over_two: BigUint,
    // (p + 1) / 4; valid square-root exponent since p ≡ 3 (mod 4).
    sqrt_exp: BigUint,
}

fn biguint_to_scalar(value: &BigUint) -> Result<Scalar, Error> {
    let bytes = value.to_bytes_be();
    if bytes.len() > 32 {
        return Err(Error::Crypto("scalar out of range".into()));
    }
    let mut repr = [0u8; 32];
    repr[32 - bytes.len()..].copy_from_slice(&bytes);
    let scalar: Option<Scalar> =
        Scalar::from_repr(GenericArray::clone_from_slice(&repr)).into();
    scalar.ok_or_else(|| Error::Crypto("scalar out of range".into()))
}

fn fixed_width_be(value: &BigUint, width: usize) -> Vec<u8> {
    let bytes = value.to_bytes_be();
    let mut out = vec![0u8; width];
    out[width - bytes.len()..].copy_from_slice(&bytes);
    out
}

impl EccCipher {
    /// Create a cipher with `key_count` fresh private scalars. Only curve id
    /// 415 is accepted.
    pub fn new<RNG: CryptoRng + Rng>(
        curve_id: usize,
        key_count: usize,
        rng: &mut RNG,
    ) -> Result<Self, Error> {
        if curve_id != CURVE_ID_P256 {
            return Err(Error::Parameter(format!(
                "curve_id ({}) is not supported; expected {}",
                curve_id, CURVE_ID_P256
            )));
        }
        let p = BigUint::parse_bytes(P_HEX, 16).unwrap();
        let b = BigUint::parse_bytes(B_HEX, 16).unwrap();
        let a = &p - 3u32;
        let order = BigUint::parse_bytes(ORDER_HEX, 16).unwrap();

        // Rejection-sample each key until the draw has full bit length, then
        // shift by one so zero is excluded.
        let order_minus_one = &order - 1u32;
        let mut keys = Vec::with_capacity(key_count);
        for _ in 0..key_count {
            let value = loop {
                let candidate = rng.gen_biguint_below(&order_minus_one);
                if candidate.bits() == KEY_BITS {
                    break candidate + 1u32;
                }
            };
            keys.push(biguint_to_scalar(&value)?);
        }

        let p_minus_one_over_two = (&p - 1u32) >> 1;
        let sqrt_exp = (&p + 1u32) >> 2;
        Ok(Self {
            keys,
            p,
            a,
            b,
            p_minus_one_over_two,
            sqrt_exp,
        })
    }

    /// Number of private scalars.
    pub fn key_count(&self) -> usize {
        self.keys.len()
    }

    /// Hash `msg` to the curve and raise it to the `key_index`-th scalar.
    pub fn hash_encrypt(&self, msg: &[u8], key_index: usize) -> Result<Vec<u8>, Error> {
        let point = self.hash_to_curve(msg) * self.keys[key_index];
        export_point(&point)
    }

    /// Raise a serialized point to the `key_index`-th scalar.
    pub fn encrypt(&self, point: &[u8], key_index: usize) -> Result<Vec<u8>, Error> {
        let point = import_point(point)?;
        export_point(&(point * self.keys[key_index]))
    }

    /// Raise a serialized point to `k_first / k_second` modulo the curve
    /// order, removing one earlier encryption while applying another.
    pub fn encrypt_and_div(
        &self,
        point: &[u8],
        key_index_first: usize,
        key_index_second: usize,
    ) -> Result<Vec<u8>, Error> {
        let point = import_point(point)?;
        let inverse: Option<Scalar> = self.keys[key_index_second].invert().into();
        let inverse = inverse.ok_or_else(|| Error::Crypto("scalar inversion failed".into()))?;
        let exponent = self.keys[key_index_first] * inverse;
        export_point(&(point * exponent))
    }

    /// Map an arbitrary byte string to a curve point with even y-coordinate.
    /// Terminates for every input: a failed candidate re-enters the random
    /// oracle as the big-endian bytes of x.
    pub fn hash_to_curve(&self, msg: &[u8]) -> ProjectivePoint {
        let mut x = self.random_oracle(msg);
        loop {
            let w = (&x * &x * &x + &self.a * &x + &self.b) % &self.p;
            if self.is_square(&w) {
                let mut s = w.modpow(&self.sqrt_exp, &self.p);
                if s.bit(0) {
                    s = &self.p - &s;
                }
                if let Some(point) = self.point_from_affine(&x, &s) {
                    return point;
                }
            }
            x = self.random_oracle(&x.to_bytes_be());
        }
    }

    // y ← 0; for i = 1..⌈(bits(p)+256)/256⌉: y ← (y << 256) + SHA3-256(i ‖ msg);
    // return y mod p.
    fn random_oracle(&self, msg: &[u8]) -> BigUint {
        let output_bits = self.p.bits() as usize + 256;
        let iters = (output_bits + 255) / 256;
        let mut y = BigUint::zero();
        for i in 1..=iters {
            y <<= 256;
            let mut hasher = Sha3_256::new();
            hasher.update([i as u8]);
            hasher.update(msg);
            y += BigUint::from_bytes_be(&hasher.finalize());
        }
        y % &self.p
    }

    // Euler criterion: w is a nonzero quadratic residue iff w^((p-1)/2) ≡ 1.
    fn is_square(&self, w: &BigUint) -> bool {
        w.modpow(&self.p_minus_one_over_two, &self.p) == BigUint::from(1u32)
    }

    fn point_from_affine(&self, x: &BigUint, y: &BigUint) -> Option<ProjectivePoint> {
        let x_bytes = fixed_width_be(x, 32);
        let y_bytes = fixed_width_be(y, 32);
        let encoded = EncodedPoint::from_affine_coordinates(
            GenericArray::from_slice(&x_bytes),
            GenericArray::from_slice(&y_bytes),
            false,
        );
        let affine: Option<AffinePoint> = AffinePoint::from_encoded_point(&encoded).into();
        affine.map(ProjectivePoint::from)
    }
}

/// Serialize a point to its 33-byte compressed encoding.
pub fn export_point(point: &ProjectivePoint) -> Result<Vec<u8>, Error> {
    let encoded = point.to_affine().to_encoded_point(true);
    let bytes = encoded.as_bytes();
    if bytes.len() != POINT_BYTES {
        return Err(Error::Crypto("point serialized to unexpected length".into()));
    }
    Ok(bytes.to_vec())
}

/// Deserialize a 33-byte compressed encoding. The all-zero string and any
/// off-curve encoding are rejected.
pub fn import_point(bytes: &[u8]) -> Result<ProjectivePoint, Error> {
    if bytes.len() != POINT_BYTES {
        return Err(Error::Deserialization(format!(
            "expected {} point bytes, got {}",
            POINT_BYTES,
            bytes.len()
        )));
    }
    if bytes.iter().all(|b| *b == 0) {
        return Err(Error::Deserialization("all-zero point encoding".into()));
    }
    let encoded = EncodedPoint::from_bytes(bytes)
        .map_err(|_| Error::Deserialization("malformed point encoding".into()))?;
    let affine: Option<AffinePoint> = AffinePoint::from_encoded_point(&encoded).into();
    affine
        .map(ProjectivePoint::from)
        .ok_or_else(|| Error::Deserialization("point is not on the curve".into()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use binnacle::AesRng;

    #[test]
    fn test_rejects_unknown_curve() {
        let mut rng = AesRng::new();
        assert!(EccCipher::new(416, 1, &mut rng).is_err());
        assert!(EccCipher::new(0, 1, &mut rng).is_err());
    }

    #[test]
    fn test_hash_to_curve_even_y() {
        let mut rng = AesRng::new();
        let cipher = EccCipher::new(CURVE_ID_P256, 1, &mut rng).unwrap();
        for msg in [&b""[..], b"a", b"hello world", &[0u8; 64], b"\xff\xff"] {
            let point = cipher.hash_to_curve(msg);
            let uncompressed = point.to_affine().to_encoded_point(false);
            let y = uncompressed.y().unwrap();
            assert_eq!(y[31] & 1, 0, "odd y for {:?}", msg);
        }
    }

    #[test]
    fn test_hash_to_curve_deterministic() {
        let mut rng = AesRng::new();
        let cipher = EccCipher::new(CURVE_ID_P256, 1, &mut rng).unwrap();
        let other = EccCipher::new(CURVE_ID_P256, 1, &mut rng).unwrap();
        let p1 = cipher.hash_to_curve(b"determinism");
        let p2 = other.hash_to_curve(b"determinism");
        assert_eq!(
            export_point(&p1).unwrap(),
            export_point(&p2).unwrap()
        );
    }

    #[test]
    fn test_dh_commutativity() {
        let mut rng = AesRng::new();
        let cipher = EccCipher::new(CURVE_ID_P256, 2, &mut rng).unwrap();
        for msg in [&b"alpha"[..], b"beta", b"gamma"] {
            let first = cipher.hash_encrypt(msg, 0).unwrap();
            let ab = cipher.encrypt(&first, 1).unwrap();
            let second = cipher.hash_encrypt(msg, 1).unwrap();
            let ba = cipher.encrypt(&second, 0).unwrap();
            assert_eq!(ab, ba);
        }
    }

    #[test]
    fn test_encrypt_and_div_cancels() {
        let mut rng = AesRng::new();
        let cipher = EccCipher::new(CURVE_ID_P256, 2, &mut rng).unwrap();
        let e0 = cipher.hash_encrypt(b"msg", 0).unwrap();
        let e01 = cipher.encrypt(&e0, 1).unwrap();
        // k0/k1 · (k0 k1 H) = k0² H
        let cancelled = cipher.encrypt_and_div(&e01, 0, 1).unwrap();
        let twice = cipher.encrypt(&e0, 0).unwrap();
        assert_eq!(cancelled, twice);
    }

    #[test]
    fn test_import_rejects_bad_encodings() {
        assert!(import_point(&[0u8; POINT_BYTES]).is_err());
        assert!(import_point(&[0xABu8; POINT_BYTES]).is_err());
        assert!(import_point(&[1u8; 10]).is_err());
    }
}
