//! Paillier additively homomorphic encryption with optional DJN
//! acceleration.
//!
//! Plaintexts live mod N, ciphertexts mod N². Decryption runs the usual CRT
//! split over (p, q). With DJN enabled, encryption replaces the `r^N`
//! blinding by `(h^N)^r` for a precomputed `h = -x² mod N` and a short
//! exponent `r` of ⌈bits(N)/2⌉ bits.

use crate::errors::Error;
use num_bigint::{BigUint, RandBigInt};
use num_integer::Integer;
use num_traits::{One, Zero};
use rand::{CryptoRng, Rng};
use std::rc::Rc;

/// Smallest accepted modulus length in bits.
pub const MIN_KEY_BITS: usize = 1024;

const MILLER_RABIN_ROUNDS: usize = 40;

const SMALL_PRIMES: [u32; 54] = [
    2, 3, 5, 7, 11, 13, 17, 19, 23, 29, 31, 37, 41, 43, 47, 53, 59, 61, 67, 71, 73, 79, 83, 89,
    97, 101, 103, 107, 109, 113, 127, 131, 137, 139, 149, 151, 157, 163, 167, 173, 179, 181, 191,
    193, 197, 199, 211, 223, 227, 229, 233, 239, 241, 251,
];

/// Public half of a key pair: the modulus and, with DJN, the precomputed
/// `h^N mod N²`.
#[derive(Clone, Debug)]
pub struct PublicKey {
    n: BigUint,
    n_square: BigUint,
    bits: usize,
    hs: Option<BigUint>,
    rand_bits: usize,
}

#[derive(Clone, Debug)]
struct PrivateKey {
    n: BigUint,
    p: BigUint,
    q: BigUint,
    p_square: BigUint,
    q_square: BigUint,
    hp: BigUint,
    hq: BigUint,
    p_inverse_mod_q: BigUint,
}

impl PrivateKey {
    fn new(p: BigUint, q: BigUint) -> Result<Self, Error> {
        let n = &p * &q;
        let p_square = &p * &p;
        let q_square = &q * &q;
        // L_p((1+N)^(p-1) mod p²) = (p-1)·q mod p, and symmetrically for q.
        let hp_base = ((&p - 1u32) * &q) % &p;
        let hp = hp_base
            .modinv(&p)
            .ok_or_else(|| Error::Crypto("p is not prime".into()))?;
        let hq_base = ((&q - 1u32) * &p) % &q;
        let hq = hq_base
            .modinv(&q)
            .ok_or_else(|| Error::Crypto("q is not prime".into()))?;
        let p_inverse_mod_q = p
            .modinv(&q)
            .ok_or_else(|| Error::Crypto("p and q are not coprime".into()))?;
        Ok(Self {
            n,
            p,
            q,
            p_square,
            q_square,
            hp,
            hq,
            p_inverse_mod_q,
        })
    }
}

/// A Paillier instance: always a public key, and a private key when this
/// party generated or imported one.
#[derive(Clone, Debug, Default)]
pub struct Paillier {
    pk: Option<Rc<PublicKey>>,
    sk: Option<PrivateKey>,
    n_len: usize,
    enable_djn: bool,
}

fn fixed_width_be(value: &BigUint, width: usize) -> Result<Vec<u8>, Error> {
    let bytes = value.to_bytes_be();
    if bytes.len() > width {
        return Err(Error::Arithmetic(format!(
            "value needs {} bytes, field holds {}",
            bytes.len(),
            width
        )));
    }
    let mut out = vec![0u8; width];
    out[width - bytes.len()..].copy_from_slice(&bytes);
    Ok(out)
}

fn miller_rabin<R: CryptoRng + Rng>(n: &BigUint, rng: &mut R) -> bool {
    let one = BigUint::one();
    let two = &one + &one;
    let n_minus_one = n - &one;
    let s = match n_minus_one.trailing_zeros() {
        Some(s) => s,
        None => return false, // n - 1 == 0
    };
    let d = &n_minus_one >> s;
    'witness: for _ in 0..MILLER_RABIN_ROUNDS {
        let a = rng.gen_biguint_range(&two, &n_minus_one);
        let mut x = a.modpow(&d, n);
        if x == one || x == n_minus_one {
            continue;
        }
        for _ in 0..s - 1 {
            x = &x * &x % n;
            if x == n_minus_one {
                continue 'witness;
            }
        }
        return false;
    }
    true
}

fn is_prime<R: CryptoRng + Rng>(n: &BigUint, rng: &mut R) -> bool {
    for sp in SMALL_PRIMES.iter() {
        let sp = BigUint::from(*sp);
        if *n == sp {
            return true;
        }
        if (n % &sp) == BigUint::from(0u32) {
            return false;
        }
    }
    miller_rabin(n, rng)
}

fn gen_prime<R: CryptoRng + Rng>(bits: u64, rng: &mut R) -> BigUint {
    loop {
        let mut candidate = rng.gen_biguint(bits);
        // Top two bits set so the product of two primes has full length.
        candidate.set_bit(bits - 1, true);
        candidate.set_bit(bits - 2, true);
        candidate.set_bit(0, true);
        if is_prime(&candidate, rng) {
            return candidate;
        }
    }
}

impl Paillier {
    /// Generate a fresh key pair with an `n_len`-bit modulus.
    pub fn keygen<R: CryptoRng + Rng>(
        &mut self,
        n_len: usize,
        enable_djn: bool,
        rng: &mut R,
    ) -> Result<(), Error> {
        if n_len < MIN_KEY_BITS {
            return Err(Error::Arithmetic("Paillier key length is too short".into()));
        }
        let half = (n_len / 2) as u64;
        let (p, q) = loop {
            let p = gen_prime(half, rng);
            let q = gen_prime(half, rng);
            if p != q && (&p * &q).bits() == n_len as u64 {
                break (p, q);
            }
        };
        let n = &p * &q;
        let n_square = &n * &n;
        let hs = if enable_djn {
            let x = loop {
                let x = rng.gen_biguint_below(&n);
                if !x.is_zero() && x.gcd(&n).is_one() {
                    break x;
                }
            };
            let h = &n - (&x * &x) % &n;
            Some(h.modpow(&n, &n_square))
        } else {
            None
        };
        self.pk = Some(Rc::new(PublicKey {
            n,
            n_square,
            bits: n_len,
            hs,
            rand_bits: (n_len + 1) / 2,
        }));
        self.sk = Some(PrivateKey::new(p, q)?);
        self.n_len = n_len;
        self.enable_djn = enable_djn;
        Ok(())
    }

    fn pk(&self) -> Result<&PublicKey, Error> {
        self.pk
            .as_deref()
            .ok_or_else(|| Error::Crypto("public key not set".into()))
    }

    fn sk(&self) -> Result<&PrivateKey, Error> {
        self.sk
            .as_ref()
            .ok_or_else(|| Error::Crypto("private key not set".into()))
    }

    /// The public modulus.
    pub fn n(&self) -> Result<&BigUint, Error> {
        Ok(&self.pk()?.n)
    }

    /// Modulus length in bits.
    pub fn n_len(&self) -> usize {
        self.n_len
    }

    /// Whether this instance carries a private key.
    pub fn has_private_key(&self) -> bool {
        self.sk.is_some()
    }

    /// Whether the DJN acceleration is on.
    pub fn enable_djn(&self) -> bool {
        self.enable_djn
    }

    /// Encrypt a plaintext in [0, N).
    pub fn encrypt<R: CryptoRng + Rng>(
        &self,
        m: &BigUint,
        rng: &mut R,
    ) -> Result<BigUint, Error> {
        let pk = self.pk()?;
        if m >= &pk.n {
            return Err(Error::Arithmetic("plaintext exceeds the modulus".into()));
        }
        let gm = (BigUint::one() + m * &pk.n) % &pk.n_square;
        let blinding = match &pk.hs {
            Some(hs) => {
                let r = rng.gen_biguint(pk.rand_bits as u64);
                hs.modpow(&r, &pk.n_square)
            }
            None => {
                let r = loop {
                    let r = rng.gen_biguint_below(&pk.n);
                    if !r.is_zero() && r.gcd(&pk.n).is_one() {
                        break r;
                    }
                };
                r.modpow(&pk.n, &pk.n_square)
            }
        };
        Ok(gm * blinding % &pk.n_square)
    }

    /// Decrypt a ciphertext with the CRT over (p, q).
    pub fn decrypt(&self, c: &BigUint) -> Result<BigUint, Error> {
        let sk = self.sk()?;
        let cp = c.modpow(&(&sk.p - 1u32), &sk.p_square);
        let lp = (cp - 1u32) / &sk.p;
        let mp = lp * &sk.hp % &sk.p;
        let cq = c.modpow(&(&sk.q - 1u32), &sk.q_square);
        let lq = (cq - 1u32) / &sk.q;
        let mq = lq * &sk.hq % &sk.q;
        let u = ((&mq + &sk.q - (&mp % &sk.q)) % &sk.q) * &sk.p_inverse_mod_q % &sk.q;
        Ok(mp + u * &sk.p)
    }

    /// Homomorphic addition of two ciphertexts.
    pub fn add(&self, c1: &BigUint, c2: &BigUint) -> Result<BigUint, Error> {
        let pk = self.pk()?;
        Ok(c1 * c2 % &pk.n_square)
    }

    /// Homomorphic addition of a plaintext into a ciphertext.
    pub fn add_plain(&self, c: &BigUint, m: &BigUint) -> Result<BigUint, Error> {
        let pk = self.pk()?;
        let gm = (BigUint::one() + m * &pk.n) % &pk.n_square;
        Ok(c * gm % &pk.n_square)
    }

    /// Homomorphic multiplication of a ciphertext by a plaintext scalar.
    pub fn mul_plain(&self, c: &BigUint, m: &BigUint) -> Result<BigUint, Error> {
        let pk = self.pk()?;
        Ok(c.modpow(m, &pk.n_square))
    }

    /// Serialize the public key: N, then HS when DJN is on, all fixed-width
    /// big-endian.
    pub fn export_pk(&self) -> Result<Vec<u8>, Error> {
        let pk = self.pk()?;
        let n_bytes = self.get_bytes_len(false);
        let mut out = fixed_width_be(&pk.n, n_bytes)?;
        if let Some(hs) = &pk.hs {
            out.extend_from_slice(&fixed_width_be(hs, 2 * n_bytes)?);
        }
        Ok(out)
    }

    /// Import a public key serialized by `export_pk`.
    pub fn import_pk(&mut self, bytes: &[u8], enable_djn: bool) -> Result<(), Error> {
        let (n, hs, n_bytes) = if enable_djn {
            if bytes.is_empty() || bytes.len() % 3 != 0 {
                return Err(Error::Deserialization("enable djn, invalid pk".into()));
            }
            let n_bytes = bytes.len() / 3;
            let n = BigUint::from_bytes_be(&bytes[..n_bytes]);
            let hs = BigUint::from_bytes_be(&bytes[n_bytes..]);
            (n, Some(hs), n_bytes)
        } else {
            if bytes.is_empty() {
                return Err(Error::Deserialization("invalid pk".into()));
            }
            (BigUint::from_bytes_be(bytes), None, bytes.len())
        };
        let n_len = n_bytes * 8;
        if n.bits() != n_len as u64 {
            return Err(Error::Deserialization(format!(
                "modulus bit length {} does not match field width {}",
                n.bits(),
                n_len
            )));
        }
        if n_len < MIN_KEY_BITS {
            return Err(Error::Arithmetic("Paillier key length is too short".into()));
        }
        let n_square = &n * &n;
        self.pk = Some(Rc::new(PublicKey {
            n,
            n_square,
            bits: n_len,
            hs,
            rand_bits: (n_len + 1) / 2,
        }));
        self.sk = None;
        self.n_len = n_len;
        self.enable_djn = enable_djn;
        Ok(())
    }

    /// Serialize the private key: N ‖ p ‖ q, fixed-width big-endian.
    pub fn export_sk(&self) -> Result<Vec<u8>, Error> {
        let sk = self.sk()?;
        let n_bytes = self.get_bytes_len(false);
        let mut out = fixed_width_be(&sk.n, n_bytes)?;
        out.extend_from_slice(&fixed_width_be(&sk.p, n_bytes / 2)?);
        out.extend_from_slice(&fixed_width_be(&sk.q, n_bytes / 2)?);
        Ok(out)
    }

    /// Import a private key serialized by `export_sk`.
    pub fn import_sk(&mut self, bytes: &[u8]) -> Result<(), Error> {
        if bytes.is_empty() || bytes.len() % 2 != 0 {
            return Err(Error::Deserialization("invalid sk".into()));
        }
        let half = bytes.len() / 4;
        let n = BigUint::from_bytes_be(&bytes[..2 * half]);
        let p = BigUint::from_bytes_be(&bytes[2 * half..3 * half]);
        let q = BigUint::from_bytes_be(&bytes[3 * half..]);
        if &p * &q != n {
            return Err(Error::Deserialization("sk factors do not multiply to N".into()));
        }
        self.sk = Some(PrivateKey::new(p, q)?);
        self.n_len = 2 * half * 8;
        Ok(())
    }

    /// Serialized length of the public key for a given modulus size.
    pub fn pubkey_bytes(key_bits: usize, enable_djn: bool) -> usize {
        let n_bytes = (key_bits + 7) / 8;
        n_bytes * (1 + 2 * enable_djn as usize)
    }

    /// Serialized length of the private key for a given modulus size.
    pub fn privkey_bytes(key_bits: usize) -> usize {
        let n_bytes = (key_bits + 7) / 8;
        n_bytes * 2
    }

    /// Serialize a plaintext (`is_n_square = false`) or ciphertext
    /// (`is_n_square = true`) at the key's fixed width, big-endian.
    pub fn encode(&self, value: &BigUint, is_n_square: bool) -> Result<Vec<u8>, Error> {
        fixed_width_be(value, self.get_bytes_len(is_n_square))
    }

    /// Deserialize a value encoded by `encode`.
    pub fn decode(bytes: &[u8]) -> BigUint {
        BigUint::from_bytes_be(bytes)
    }

    /// Byte width of a plaintext (`false`) or ciphertext (`true`).
    pub fn get_bytes_len(&self, is_n_square: bool) -> usize {
        let bytes_len = (self.n_len + 7) / 8;
        bytes_len * (1 + is_n_square as usize)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use binnacle::AesRng;

    const TEST_BITS: usize = 1024;

    fn keyed(djn: bool) -> (Paillier, AesRng) {
        let mut rng = AesRng::new();
        let mut paillier = Paillier::default();
        paillier.keygen(TEST_BITS, djn, &mut rng).unwrap();
        (paillier, rng)
    }

    #[test]
    fn test_keygen_rejects_short_keys() {
        let mut rng = AesRng::new();
        let mut paillier = Paillier::default();
        assert!(paillier.keygen(512, false, &mut rng).is_err());
    }

    #[test]
    fn test_roundtrip() {
        for djn in [false, true] {
            let (paillier, mut rng) = keyed(djn);
            for _ in 0..4 {
                let m = rng.gen_biguint_below(paillier.n().unwrap());
                let c = paillier.encrypt(&m, &mut rng).unwrap();
                assert_eq!(paillier.decrypt(&c).unwrap(), m);
            }
        }
    }

    #[test]
    fn test_homomorphic_add() {
        let (paillier, mut rng) = keyed(true);
        let n = paillier.n().unwrap().clone();
        let m1 = rng.gen_biguint_below(&n);
        let m2 = rng.gen_biguint_below(&n);
        let c1 = paillier.encrypt(&m1, &mut rng).unwrap();
        let c2 = paillier.encrypt(&m2, &mut rng).unwrap();
        let sum = paillier.add(&c1, &c2).unwrap();
        assert_eq!(paillier.decrypt(&sum).unwrap(), (&m1 + &m2) % &n);

        let shifted = paillier.add_plain(&c1, &m2).unwrap();
        assert_eq!(paillier.decrypt(&shifted).unwrap(), (&m1 + &m2) % &n);
    }

    #[test]
    fn test_homomorphic_mul() {
        let (paillier, mut rng) = keyed(false);
        let n = paillier.n().unwrap().clone();
        let m1 = rng.gen_biguint_below(&n);
        let m2 = BigUint::from(rng.gen::<u64>());
        let c1 = paillier.encrypt(&m1, &mut rng).unwrap();
        let prod = paillier.mul_plain(&c1, &m2).unwrap();
        assert_eq!(paillier.decrypt(&prod).unwrap(), (&m1 * &m2) % &n);
    }

    #[test]
    fn test_key_serialization_roundtrip() {
        for djn in [false, true] {
            let (paillier, mut rng) = keyed(djn);
            let pk = paillier.export_pk().unwrap();
            assert_eq!(pk.len(), Paillier::pubkey_bytes(TEST_BITS, djn));
            let sk = paillier.export_sk().unwrap();
            assert_eq!(sk.len(), Paillier::privkey_bytes(TEST_BITS));

            let mut other = Paillier::default();
            other.import_pk(&pk, djn).unwrap();
            other.import_sk(&sk).unwrap();
            assert_eq!(other.export_pk().unwrap(), pk);
            assert_eq!(other.export_sk().unwrap(), sk);

            // A ciphertext under the original key decrypts under the import.
            let m = rng.gen_biguint_below(paillier.n().unwrap());
            let c = other.encrypt(&m, &mut rng).unwrap();
            assert_eq!(paillier.decrypt(&c).unwrap(), m);
        }
    }

    #[test]
    fn test_import_rejects_malformed_keys() {
        let mut paillier = Paillier::default();
        assert!(paillier.import_pk(&[], true).is_err());
        assert!(paillier.import_pk(&[1u8; 128], true).is_err()); // not divisible by 3
        assert!(paillier.import_sk(&[]).is_err());
        assert!(paillier.import_sk(&[1u8; 129]).is_err()); // odd length
        // Leading zero byte: bit length disagrees with the field width.
        let mut bytes = vec![0u8; 128];
        bytes[1] = 0x80;
        assert!(paillier.import_pk(&bytes, false).is_err());
    }

    #[test]
    fn test_ciphertext_width() {
        let (paillier, mut rng) = keyed(false);
        let m = BigUint::from(12u32);
        let c = paillier.encrypt(&m, &mut rng).unwrap();
        let encoded = paillier.encode(&c, true).unwrap();
        assert_eq!(encoded.len(), paillier.get_bytes_len(true));
        assert_eq!(Paillier::decode(&encoded), c);
    }
}
