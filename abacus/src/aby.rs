//! The arithmetic/boolean share layer.
//!
//! Values are secret-shared between party 0 and party 1 as wrapping `i64`
//! lanes (arithmetic: shares sum to the value mod 2^64; boolean: shares XOR
//! to it bit-wise). The layer owns the session's paired randomness, the two
//! directional OT pools, and the Beaver triple generator; every operation
//! must be called by both parties in the same order.

use crate::{
    errors::Error,
    matrix::{fixed_to_float, float_to_fixed, PlainMatrix, ShareMatrix},
    rand_pair::PseudoRand,
};
use binnacle::{AbstractChannel, Block};
use margay::{BoolTripleGenerator, OtPool};

const KEEP_MASKS: [i64; 6] = [0x1, 0x3, 0xF, 0xFF, 0xFFFF, 0xFFFF_FFFF];

/// One party's end of the share layer.
pub struct Aby {
    party_id: usize,
    rand: PseudoRand,
    ot: OtPool,
    triples: BoolTripleGenerator,
}

impl Aby {
    /// Agree a seed with the peer, derive the common/unique streams, and
    /// initialize the OT pools. Party 0 writes its seed contribution first.
    pub fn init<C: AbstractChannel>(party_id: usize, channel: &mut C) -> Result<Self, Error> {
        let mine = rand::random::<Block>();
        let theirs = if party_id == 0 {
            channel.write_block(&mine)?;
            channel.flush()?;
            channel.read_block()?
        } else {
            let theirs = channel.read_block()?;
            channel.write_block(&mine)?;
            channel.flush()?;
            theirs
        };
        let mut rand = PseudoRand::new(mine ^ theirs);

        let common_hi = rand.get_common() as u64;
        let common_lo = rand.get_common() as u64;
        let unique_hi = rand.get_unique() as u64;
        let unique_lo = rand.get_unique() as u64;
        let mut ot = OtPool::new(
            party_id,
            Block::from_u64s(common_lo, common_hi),
            Block::from_u64s(unique_lo, unique_hi),
        );
        ot.init(channel)?;
        let triples = BoolTripleGenerator::new(party_id);
        Ok(Self {
            party_id,
            rand,
            ot,
            triples,
        })
    }

    /// This party's id.
    pub fn party_id(&self) -> usize {
        self.party_id
    }

    /// Secret-share `input` held by `party`. No traffic: the owner masks
    /// with the common stream, the peer draws the matching masks.
    pub fn share(&mut self, party: usize, input: &PlainMatrix) -> ShareMatrix {
        let mut out = ShareMatrix::new(input.rows(), input.cols());
        if party == self.party_id {
            for (lane, value) in out.shares.iter_mut().zip(input.data.iter()) {
                *lane = float_to_fixed(*value).wrapping_sub(self.rand.get_common());
            }
        } else {
            for lane in out.shares.iter_mut() {
                *lane = self.rand.get_common();
            }
        }
        out
    }

    /// Open a shared matrix towards `party`. Returns `Some` on the receiving
    /// side, `None` on the side that only contributed its share.
    pub fn reveal<C: AbstractChannel>(
        &mut self,
        channel: &mut C,
        party: usize,
        input: &ShareMatrix,
    ) -> Result<Option<PlainMatrix>, Error> {
        if self.party_id != party {
            input.write_to(channel)?;
            channel.flush()?;
            return Ok(None);
        }
        let other = ShareMatrix::read_from(channel, input.rows(), input.cols())?;
        let combined = other.add(input);
        let mut out = PlainMatrix::new(input.rows(), input.cols());
        for (value, lane) in out.data.iter_mut().zip(combined.shares.iter()) {
            *value = fixed_to_float(*lane);
        }
        Ok(Some(out))
    }

    /// Lane-wise addition of shares.
    pub fn add(&self, x: &ShareMatrix, y: &ShareMatrix) -> ShareMatrix {
        x.add(y)
    }

    /// Lane-wise subtraction of shares.
    pub fn sub(&self, x: &ShareMatrix, y: &ShareMatrix) -> ShareMatrix {
        x.sub(y)
    }

    /// Bit-wise AND of two boolean-shared matrices via Beaver triples.
    pub fn elementwise_bool_and<C: AbstractChannel>(
        &mut self,
        channel: &mut C,
        x: &ShareMatrix,
        y: &ShareMatrix,
    ) -> Result<ShareMatrix, Error> {
        if x.size() != y.size() {
            return Err(Error::ProtocolError("AND over mismatched shapes".into()));
        }
        let size = x.size();
        let mut a = vec![0i64; size];
        let mut b = vec![0i64; size];
        let mut c = vec![0i64; size];
        for i in 0..size {
            let triple = self.triples.get_triple(channel, &mut self.ot)?;
            a[i] = triple[0];
            b[i] = triple[1];
            c[i] = triple[2];
        }

        let mut e = ShareMatrix::new(x.rows(), x.cols());
        let mut f = ShareMatrix::new(x.rows(), x.cols());
        for i in 0..size {
            e.shares[i] = x.shares[i] ^ a[i];
            f.shares[i] = y.shares[i] ^ b[i];
        }

        let (mut reveal_e, mut reveal_f);
        if self.party_id == 0 {
            e.write_to(channel)?;
            f.write_to(channel)?;
            channel.flush()?;
            reveal_e = ShareMatrix::read_from(channel, x.rows(), x.cols())?;
            reveal_f = ShareMatrix::read_from(channel, x.rows(), x.cols())?;
        } else {
            reveal_e = ShareMatrix::read_from(channel, x.rows(), x.cols())?;
            reveal_f = ShareMatrix::read_from(channel, x.rows(), x.cols())?;
            e.write_to(channel)?;
            f.write_to(channel)?;
            channel.flush()?;
        }
        for i in 0..size {
            reveal_e.shares[i] ^= e.shares[i];
            reveal_f.shares[i] ^= f.shares[i];
        }

        let mut z = ShareMatrix::new(x.rows(), x.cols());
        if self.party_id == 0 {
            for i in 0..size {
                z.shares[i] = (reveal_f.shares[i] & a[i]) ^ (reveal_e.shares[i] & b[i]) ^ c[i];
            }
        } else {
            for i in 0..size {
                z.shares[i] = (reveal_e.shares[i] & reveal_f.shares[i])
                    ^ (reveal_f.shares[i] & a[i])
                    ^ (reveal_e.shares[i] & b[i])
                    ^ c[i];
            }
        }
        Ok(z)
    }

    /// Kogge-Stone parallel-prefix adder over boolean shares: six layers of
    /// masked AND, then the carry-shifted XOR of the inputs.
    pub fn kogge_stone_ppa<C: AbstractChannel>(
        &mut self,
        channel: &mut C,
        x: &ShareMatrix,
        y: &ShareMatrix,
    ) -> Result<ShareMatrix, Error> {
        if x.size() != y.size() {
            return Err(Error::ProtocolError("PPA over mismatched shapes".into()));
        }
        let size = x.size();

        let mut g = self.elementwise_bool_and(channel, x, y)?;
        let mut p = ShareMatrix::new(x.rows(), x.cols());
        for i in 0..size {
            p.shares[i] = x.shares[i] ^ y.shares[i];
        }

        for layer in 0..6 {
            let shift = 1u32 << layer;
            let mut p1 = ShareMatrix::new(x.rows(), x.cols());
            let mut g1 = ShareMatrix::new(x.rows(), x.cols());
            for i in 0..size {
                p1.shares[i] = p.shares[i] << shift;
                g1.shares[i] = g.shares[i] << shift;
            }
            if self.party_id == 0 {
                for i in 0..size {
                    p1.shares[i] ^= KEEP_MASKS[layer];
                }
            }
            let g1 = self.elementwise_bool_and(channel, &p, &g1)?;
            for i in 0..size {
                g.shares[i] ^= g1.shares[i];
            }
            p = self.elementwise_bool_and(channel, &p, &p1)?;
        }

        let mut z = ShareMatrix::new(x.rows(), x.cols());
        for i in 0..size {
            z.shares[i] = (g.shares[i] << 1) ^ x.shares[i] ^ y.shares[i];
        }
        Ok(z)
    }

    /// Arithmetic-to-boolean conversion of the sign bit: blind each share
    /// with common randomness, add the two boolean halves with the PPA, and
    /// keep the MSB. The result is a boolean share of `v < 0`.
    pub fn a2b<C: AbstractChannel>(
        &mut self,
        channel: &mut C,
        x: &ShareMatrix,
    ) -> Result<ShareMatrix, Error> {
        let size = x.size();
        let mut input0 = ShareMatrix::new(x.rows(), x.cols());
        let mut input1 = ShareMatrix::new(x.rows(), x.cols());
        if self.party_id == 0 {
            for i in 0..size {
                input0.shares[i] = x.shares[i] ^ self.rand.get_common();
                input1.shares[i] = self.rand.get_common();
            }
        } else {
            for i in 0..size {
                input0.shares[i] = self.rand.get_common();
                input1.shares[i] = x.shares[i] ^ self.rand.get_common();
            }
        }
        let mut z = self.kogge_stone_ppa(channel, &input0, &input1)?;
        for lane in z.shares.iter_mut() {
            *lane = (*lane >> 63) & 0x1;
        }
        Ok(z)
    }

    /// Boolean share of `x > y`: the sign of `y - x`.
    pub fn greater<C: AbstractChannel>(
        &mut self,
        channel: &mut C,
        x: &ShareMatrix,
        y: &ShareMatrix,
    ) -> Result<ShareMatrix, Error> {
        self.a2b(channel, &y.sub(x))
    }

    /// Boolean share of `x > y` for a public `y`.
    pub fn greater_plain<C: AbstractChannel>(
        &mut self,
        channel: &mut C,
        x: &ShareMatrix,
        y: &[f64],
    ) -> Result<ShareMatrix, Error> {
        let mut c = ShareMatrix::new(x.rows(), x.cols());
        if self.party_id == 0 {
            for (i, lane) in c.shares.iter_mut().enumerate() {
                *lane = float_to_fixed(y[i]).wrapping_sub(x.shares[i]);
            }
        } else {
            for (i, lane) in c.shares.iter_mut().enumerate() {
                *lane = x.shares[i].wrapping_neg();
            }
        }
        self.a2b(channel, &c)
    }

    /// Boolean share of `x < y`: the sign of `x - y`.
    pub fn less<C: AbstractChannel>(
        &mut self,
        channel: &mut C,
        x: &ShareMatrix,
        y: &ShareMatrix,
    ) -> Result<ShareMatrix, Error> {
        self.a2b(channel, &x.sub(y))
    }

    /// Boolean share of `x < y` for a public `y`.
    pub fn less_plain<C: AbstractChannel>(
        &mut self,
        channel: &mut C,
        x: &ShareMatrix,
        y: &[f64],
    ) -> Result<ShareMatrix, Error> {
        let mut c = ShareMatrix::new(x.rows(), x.cols());
        if self.party_id == 0 {
            for (i, lane) in c.shares.iter_mut().enumerate() {
                *lane = x.shares[i].wrapping_sub(float_to_fixed(y[i]));
            }
        } else {
            c.shares.copy_from_slice(&x.shares);
        }
        self.a2b(channel, &c)
    }

    /// Column-wise sum; no interaction.
    pub fn sum(&self, input: &ShareMatrix) -> ShareMatrix {
        let mut out = ShareMatrix::new(1, input.cols());
        for row in 0..input.rows() {
            for col in 0..input.cols() {
                let v = out.at(0, col).wrapping_add(input.at(row, col));
                out.set(0, col, v);
            }
        }
        out
    }

    // One direction of the two-OT selection. The chooser holds a random pad
    // and its choice bit from the pool; the helper swaps its masked pair
    // according to the chooser's correction bit.
    fn multiplexer_pass<C: AbstractChannel>(
        &mut self,
        channel: &mut C,
        sender_party: usize,
        x: &ShareMatrix,
        s0: &[i64],
        s1: &[i64],
        z: &mut ShareMatrix,
    ) -> Result<(), Error> {
        let size = x.size();
        if self.party_id != sender_party {
            // Chooser: consume OTs as the pool receiver.
            let mut pad = vec![0i64; size];
            let mut k = vec![false; size];
            for i in 0..size {
                let msg = self.ot.get_ot_instance(channel, sender_party)?;
                k[i] = (msg[1] ^ x.shares[i]) != 0;
                pad[i] = msg[0];
            }
            channel.write_bools(&k)?;
            channel.flush()?;
            let y0 = ShareMatrix::read_from(channel, x.rows(), x.cols())?;
            let y1 = ShareMatrix::read_from(channel, x.rows(), x.cols())?;
            for i in 0..size {
                z.shares[i] = if x.shares[i] == 0 {
                    y0.shares[i] ^ pad[i]
                } else {
                    y1.shares[i] ^ pad[i]
                };
            }
        } else {
            // Helper: mask the selection pair with the pool's pads.
            let mut y0 = vec![0i64; size];
            let mut y1 = vec![0i64; size];
            for i in 0..size {
                let msg = self.ot.get_ot_instance(channel, sender_party)?;
                y0[i] = msg[0];
                y1[i] = msg[1];
            }
            let k = channel.read_bools(size)?;
            for i in 0..size {
                if !k[i] {
                    y0[i] ^= s0[i];
                    y1[i] ^= s1[i];
                } else {
                    let t = s0[i] ^ y1[i];
                    y1[i] = s1[i] ^ y0[i];
                    y0[i] = t;
                }
            }
            let mut m0 = ShareMatrix::new(x.rows(), x.cols());
            let mut m1 = ShareMatrix::new(x.rows(), x.cols());
            m0.shares = y0;
            m1.shares = y1;
            m0.write_to(channel)?;
            m1.write_to(channel)?;
            channel.flush()?;
        }
        Ok(())
    }

    /// Oblivious selection: given a boolean share `x` of a bit per lane and
    /// an arithmetic share `y`, returns an arithmetic share of `bit · y`.
    pub fn multiplexer<C: AbstractChannel>(
        &mut self,
        channel: &mut C,
        x: &ShareMatrix,
        y: &ShareMatrix,
    ) -> Result<ShareMatrix, Error> {
        if x.size() != y.size() {
            return Err(Error::ProtocolError("MUX over mismatched shapes".into()));
        }
        let size = x.size();

        let mut r = vec![0i64; size];
        for lane in r.iter_mut() {
            *lane = self.rand.get_unique();
        }
        let mut s0 = vec![0i64; size];
        let mut s1 = vec![0i64; size];
        for i in 0..size {
            if x.shares[i] == 0 {
                s0[i] = r[i].wrapping_neg();
                s1[i] = y.shares[i].wrapping_sub(r[i]);
            } else {
                s0[i] = y.shares[i].wrapping_sub(r[i]);
                s1[i] = r[i].wrapping_neg();
            }
        }

        let mut z = ShareMatrix::new(x.rows(), x.cols());
        // Party 0 chooses against party 1's pool, then roles swap.
        self.multiplexer_pass(channel, 1, x, &s0, &s1, &mut z)?;
        self.multiplexer_pass(channel, 0, x, &s0, &s1, &mut z)?;

        for i in 0..size {
            z.shares[i] = z.shares[i].wrapping_add(r[i]);
        }
        Ok(z)
    }

    /// The windowed attribution reduction over a three-column shared matrix
    /// (t0, t1, value): Σ 1(0 < t1 - t0 < threshold) · value, still shared.
    pub fn attribution<C: AbstractChannel>(
        &mut self,
        channel: &mut C,
        threshold: f64,
        input: &ShareMatrix,
    ) -> Result<ShareMatrix, Error> {
        if input.cols() != 3 {
            return Err(Error::ProtocolError(
                "attribution expects columns (t0, t1, value)".into(),
            ));
        }
        let rows = input.rows();
        let t0 = input.column(0);
        let t1 = input.column(1);
        let value = input.column(2);

        let delta = t1.sub(&t0);
        let gt_zero = self.greater_plain(channel, &delta, &vec![0.0; rows])?;
        let ls_threshold = self.less_plain(channel, &delta, &vec![threshold; rows])?;

        let mut select_bits = self.elementwise_bool_and(channel, &gt_zero, &ls_threshold)?;
        for lane in select_bits.shares.iter_mut() {
            *lane &= 0x1;
        }

        let selected = self.multiplexer(channel, &select_bits, &value)?;
        Ok(self.sum(&selected))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use binnacle::Channel;
    use std::{
        io::{BufReader, BufWriter},
        os::unix::net::UnixStream,
    };

    fn channel_for(stream: UnixStream) -> Channel<BufReader<UnixStream>, BufWriter<UnixStream>> {
        Channel::new(
            BufReader::new(stream.try_clone().unwrap()),
            BufWriter::new(stream),
        )
    }

    // Run the same closure on both parties and return party 0's output.
    fn run_both<T: Send + 'static>(
        f: impl Fn(usize, &mut Channel<BufReader<UnixStream>, BufWriter<UnixStream>>, &mut Aby) -> T
            + Send
            + Sync
            + 'static,
    ) -> (T, T) {
        let f = std::sync::Arc::new(f);
        let f1 = f.clone();
        let (s0, s1) = UnixStream::pair().unwrap();
        let handle = std::thread::spawn(move || {
            let mut channel = channel_for(s1);
            let mut aby = Aby::init(1, &mut channel).unwrap();
            f1(1, &mut channel, &mut aby)
        });
        let mut channel = channel_for(s0);
        let mut aby = Aby::init(0, &mut channel).unwrap();
        let out0 = f(0, &mut channel, &mut aby);
        let out1 = handle.join().unwrap();
        (out0, out1)
    }

    #[test]
    fn test_share_reveal_add_sub() {
        let (out0, out1) = run_both(|_party, channel, aby| {
            let a = PlainMatrix::from_values(2, 1, vec![1.5, -2.25]);
            let b = PlainMatrix::from_values(2, 1, vec![0.5, 10.0]);
            let sa = aby.share(0, &a);
            let sb = aby.share(1, &b);
            let sum = aby.add(&sa, &sb);
            let diff = aby.sub(&sa, &sb);
            let sum_plain = aby.reveal(channel, 0, &sum).unwrap();
            let diff_plain = aby.reveal(channel, 0, &diff).unwrap();
            (sum_plain, diff_plain)
        });
        assert!(out1.0.is_none() && out1.1.is_none());
        let sum = out0.0.unwrap();
        let diff = out0.1.unwrap();
        assert!((sum.data[0] - 2.0).abs() < 1e-4);
        assert!((sum.data[1] - 7.75).abs() < 1e-4);
        assert!((diff.data[0] - 1.0).abs() < 1e-4);
        assert!((diff.data[1] + 12.25).abs() < 1e-4);
    }

    #[test]
    fn test_bool_and() {
        let xs = [0x0123_4567_89AB_CDEFu64 as i64, -1, 0, 0x5555];
        let ys = [0x0F0F_F0F0_1234_0000u64 as i64, 0x7FFF, -1, 0x3333];
        let (z0, z1) = run_both(move |party, channel, aby| {
            // Build boolean shares by XOR-splitting with the common stream.
            let mut x = ShareMatrix::new(4, 1);
            let mut y = ShareMatrix::new(4, 1);
            for i in 0..4 {
                let mask_x = aby.rand.get_common();
                let mask_y = aby.rand.get_common();
                x.shares[i] = if party == 0 { xs[i] ^ mask_x } else { mask_x };
                y.shares[i] = if party == 0 { ys[i] ^ mask_y } else { mask_y };
            }
            aby.elementwise_bool_and(channel, &x, &y).unwrap()
        });
        for i in 0..4 {
            assert_eq!(z0.shares[i] ^ z1.shares[i], xs[i] & ys[i]);
        }
    }

    #[test]
    fn test_ppa_adds() {
        let xs = [123456789i64, -98765, 0, i64::MAX];
        let ys = [987654321i64, 4242, -1, 1];
        let (z0, z1) = run_both(move |party, channel, aby| {
            let mut x = ShareMatrix::new(4, 1);
            let mut y = ShareMatrix::new(4, 1);
            for i in 0..4 {
                let mask_x = aby.rand.get_common();
                let mask_y = aby.rand.get_common();
                x.shares[i] = if party == 0 { xs[i] ^ mask_x } else { mask_x };
                y.shares[i] = if party == 0 { ys[i] ^ mask_y } else { mask_y };
            }
            aby.kogge_stone_ppa(channel, &x, &y).unwrap()
        });
        for i in 0..4 {
            assert_eq!(z0.shares[i] ^ z1.shares[i], xs[i].wrapping_add(ys[i]));
        }
    }

    #[test]
    fn test_a2b_sign() {
        let values = [5i64 << 16, -(3i64 << 16), 0, i64::MIN, i64::MAX];
        let (z0, z1) = run_both(move |party, channel, aby| {
            let mut x = ShareMatrix::new(values.len(), 1);
            for (i, v) in values.iter().enumerate() {
                let mask = aby.rand.get_common();
                x.shares[i] = if party == 0 { v.wrapping_sub(mask) } else { mask };
            }
            aby.a2b(channel, &x).unwrap()
        });
        for (i, v) in values.iter().enumerate() {
            let sign = (z0.shares[i] ^ z1.shares[i]) & 1;
            assert_eq!(sign == 1, *v < 0, "value {}", v);
        }
    }

    #[test]
    fn test_comparisons_against_public() {
        let values = [0.5f64, 4.99, 5.0, 5.01, -1.0];
        let (out0, out1) = run_both(move |_party, channel, aby| {
            let plain = PlainMatrix::from_values(values.len(), 1, values.to_vec());
            let x = aby.share(0, &plain);
            let gt = aby.greater_plain(channel, &x, &vec![0.0; values.len()]).unwrap();
            let ls = aby.less_plain(channel, &x, &vec![5.0; values.len()]).unwrap();
            (gt, ls)
        });
        for (i, v) in values.iter().enumerate() {
            let gt = (out0.0.shares[i] ^ out1.0.shares[i]) & 1;
            let ls = (out0.1.shares[i] ^ out1.1.shares[i]) & 1;
            assert_eq!(gt == 1, *v > 0.0, "gt for {}", v);
            assert_eq!(ls == 1, *v < 5.0, "ls for {}", v);
        }
    }

    #[test]
    fn test_multiplexer_selects() {
        let bits = [0i64, 1, 1, 0];
        let vals = [10.0f64, 20.0, -30.0, 40.0];
        let (z0, z1) = run_both(move |party, channel, aby| {
            let mut bit_shares = ShareMatrix::new(4, 1);
            for (i, bit) in bits.iter().enumerate() {
                let mask = aby.rand.get_common() & 1;
                bit_shares.shares[i] = if party == 0 { bit ^ mask } else { mask };
            }
            let plain = PlainMatrix::from_values(4, 1, vals.to_vec());
            let val_shares = aby.share(1, &plain);
            aby.multiplexer(channel, &bit_shares, &val_shares).unwrap()
        });
        for i in 0..4 {
            let combined = z0.shares[i].wrapping_add(z1.shares[i]);
            let expected = if bits[i] == 1 { vals[i] } else { 0.0 };
            assert!(
                (fixed_to_float(combined) - expected).abs() < 1e-4,
                "lane {}",
                i
            );
        }
    }

    #[test]
    fn test_attribution_fixture() {
        // Rows (t0, t1, value): selected iff 0 < t1 - t0 < 5.
        let rows: [[f64; 3]; 4] = [
            [2.0, 0.1, 0.1],   // delta < 0
            [0.1, 2.0, 2.0],   // selected
            [0.03, 0.3, 0.3],  // selected
            [4.0, 4.0, 4.0],   // delta == 0
        ];
        let (out0, out1) = run_both(move |_, channel, aby| {
            let flat: Vec<f64> = rows.iter().flatten().copied().collect();
            let plain = PlainMatrix::from_values(4, 3, flat);
            let shared = aby.share(0, &plain);
            let result = aby.attribution(channel, 5.0, &shared).unwrap();
            let r0 = aby.reveal(channel, 0, &result).unwrap();
            let r1 = aby.reveal(channel, 1, &result).unwrap();
            r0.or(r1).unwrap()
        });
        assert!((out0.data[0] - 2.3).abs() < 1e-3);
        assert!((out1.data[0] - 2.3).abs() < 1e-3);
    }
}
