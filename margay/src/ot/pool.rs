//! Buffered pools of random oblivious transfers.
//!
//! A session owns one `OtPool`, which holds two directional pools: one where
//! party 0 plays the OT sender and one where party 1 does. Both are seeded
//! from 128 Naor-Pinkas base OTs and refilled on demand through the IKNP
//! extension, 1024 transfers at a time. Consumers on the two sides must draw
//! instances in the same order.

use crate::{
    errors::Error,
    ot::{iknp, naor_pinkas},
    utils,
};
use binnacle::{AbstractChannel, AesRng, Block, SemiHonest};
use rand::{Rng, SeedableRng};

pub use crate::ot::iknp::BASE_OT_COUNT;

/// Transfers produced per pool refill.
pub const OT_BUFFER_SIZE: usize = 1024;

const POINT_BYTES: usize = naor_pinkas::POINT_BYTES;

/// A pair of directional random-OT pools between two parties.
pub struct OtPool {
    party: usize,
    prng: AesRng,
    base_choices: Block,
    np_sender: naor_pinkas::Sender,
    np_receiver: naor_pinkas::Receiver,
    ext_sender: iknp::Sender,
    ext_receiver: iknp::Receiver,
    send_msgs0: Vec<Block>,
    send_msgs1: Vec<Block>,
    recv_msgs: Vec<Block>,
    ext_choices: Vec<Block>,
    now_idx: [usize; 2],
}

impl OtPool {
    /// Create a pool for `party` (0 or 1). `common_seed` keys the
    /// correlation-robust hash and must be shared with the peer;
    /// `unique_seed` drives this party's private randomness.
    pub fn new(party: usize, common_seed: Block, unique_seed: Block) -> Self {
        let mut prng = AesRng::from_seed(unique_seed);
        let base_choices = prng.gen::<Block>();
        let np_sender = naor_pinkas::Sender::new(BASE_OT_COUNT, &mut prng);
        let np_receiver = naor_pinkas::Receiver::new(BASE_OT_COUNT, base_choices, &mut prng);
        Self {
            party,
            prng,
            base_choices,
            np_sender,
            np_receiver,
            ext_sender: iknp::Sender::new(common_seed),
            ext_receiver: iknp::Receiver::new(common_seed),
            send_msgs0: vec![Block::ZERO; OT_BUFFER_SIZE],
            send_msgs1: vec![Block::ZERO; OT_BUFFER_SIZE],
            recv_msgs: vec![Block::ZERO; OT_BUFFER_SIZE],
            ext_choices: vec![Block::ZERO; OT_BUFFER_SIZE / BASE_OT_COUNT],
            // Drained until `init` fills the pools.
            now_idx: [OT_BUFFER_SIZE, OT_BUFFER_SIZE],
        }
    }

    /// Run the base OTs in both directions and fill both pools once.
    /// Party 0 first answers the peer's base OTs, then runs its own; party 1
    /// does the reverse, keeping the two flows in lockstep.
    pub fn init<C: AbstractChannel>(&mut self, channel: &mut C) -> Result<(), Error> {
        if self.party == 0 {
            self.np_receive(channel)?;
            self.np_send_pre(channel)?;
            self.np_send_post(channel)?;
        } else {
            self.np_send_pre(channel)?;
            self.np_send_post(channel)?;
            self.np_receive(channel)?;
        }

        self.ext_receiver.init(&self.np_sender.msgs);
        self.ext_sender.init(&self.np_receiver.msgs);

        self.fill(channel, 0)?;
        self.fill(channel, 1)?;
        Ok(())
    }

    fn np_send_pre<C: AbstractChannel>(&mut self, channel: &mut C) -> Result<(), Error> {
        let mut buffer = Vec::with_capacity(BASE_OT_COUNT * 2 * POINT_BYTES);
        for idx in 0..BASE_OT_COUNT {
            let flow = self.np_sender.send_pre(idx)?;
            buffer.extend_from_slice(&flow[0]);
            buffer.extend_from_slice(&flow[1]);
        }
        channel.write_bytes(&buffer)?;
        channel.flush()?;
        Ok(())
    }

    fn np_send_post<C: AbstractChannel>(&mut self, channel: &mut C) -> Result<(), Error> {
        let buffer = channel.read_exact_vec(BASE_OT_COUNT * POINT_BYTES)?;
        for (idx, pk0) in buffer.chunks_exact(POINT_BYTES).enumerate() {
            self.np_sender.send_post(idx, pk0)?;
        }
        Ok(())
    }

    fn np_receive<C: AbstractChannel>(&mut self, channel: &mut C) -> Result<(), Error> {
        let buffer = channel.read_exact_vec(BASE_OT_COUNT * 2 * POINT_BYTES)?;
        let mut out = Vec::with_capacity(BASE_OT_COUNT * POINT_BYTES);
        for (idx, flow) in buffer.chunks_exact(2 * POINT_BYTES).enumerate() {
            let mut pair = [[0u8; POINT_BYTES]; 2];
            pair[0].copy_from_slice(&flow[..POINT_BYTES]);
            pair[1].copy_from_slice(&flow[POINT_BYTES..]);
            let pk0 = self.np_receiver.recv(idx, &pair)?;
            out.extend_from_slice(&pk0);
        }
        channel.write_bytes(&out)?;
        channel.flush()?;
        Ok(())
    }

    fn fill<C: AbstractChannel>(
        &mut self,
        channel: &mut C,
        sender_party: usize,
    ) -> Result<(), Error> {
        if self.party == sender_party {
            let mut u = vec![Block::ZERO; OT_BUFFER_SIZE];
            channel.read_bytes(utils::blocks_as_bytes_mut(&mut u))?;
            self.ext_sender.extend(
                self.base_choices,
                &u,
                &mut self.send_msgs0,
                &mut self.send_msgs1,
            )?;
        } else {
            for c in self.ext_choices.iter_mut() {
                *c = self.prng.gen();
            }
            let mut u = vec![Block::ZERO; OT_BUFFER_SIZE];
            self.ext_receiver
                .extend(&self.ext_choices, &mut u, &mut self.recv_msgs)?;
            channel.write_bytes(utils::blocks_as_bytes(&u))?;
            channel.flush()?;
        }
        self.now_idx[sender_party] = 0;
        Ok(())
    }

    /// Pop the next transfer from the pool where `sender_party` plays the
    /// sender. The sender side gets the low 64 bits of both messages; the
    /// receiver side gets the low 64 bits of its selected message and the
    /// choice bit.
    pub fn get_ot_instance<C: AbstractChannel>(
        &mut self,
        channel: &mut C,
        sender_party: usize,
    ) -> Result<[i64; 2], Error> {
        if self.now_idx[sender_party] == OT_BUFFER_SIZE {
            self.fill(channel, sender_party)?;
        }
        let idx = self.now_idx[sender_party];
        let ret = if self.party == sender_party {
            [
                self.send_msgs0[idx].low_u64() as i64,
                self.send_msgs1[idx].low_u64() as i64,
            ]
        } else {
            let choice = self.ext_choices[idx / BASE_OT_COUNT].bit(idx % BASE_OT_COUNT);
            [self.recv_msgs[idx].low_u64() as i64, choice as i64]
        };
        self.now_idx[sender_party] += 1;
        Ok(ret)
    }
}

impl SemiHonest for OtPool {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pool_both_directions() {
        let common = rand::random::<Block>();
        let (s0, s1) = std::os::unix::net::UnixStream::pair().unwrap();
        let n = OT_BUFFER_SIZE + 17; // force one refill

        let handle = std::thread::spawn(move || {
            let reader = std::io::BufReader::new(s1.try_clone().unwrap());
            let writer = std::io::BufWriter::new(s1);
            let mut c1 = binnacle::Channel::new(reader, writer);
            let mut pool = OtPool::new(1, common, rand::random::<Block>());
            pool.init(&mut c1).unwrap();
            let mut out = Vec::new();
            for dir in [0usize, 1] {
                for _ in 0..n {
                    out.push(pool.get_ot_instance(&mut c1, dir).unwrap());
                }
            }
            out
        });

        let reader = std::io::BufReader::new(s0.try_clone().unwrap());
        let writer = std::io::BufWriter::new(s0);
        let mut c0 = binnacle::Channel::new(reader, writer);
        let mut pool = OtPool::new(0, common, rand::random::<Block>());
        pool.init(&mut c0).unwrap();
        let mut mine = Vec::new();
        for dir in [0usize, 1] {
            for _ in 0..n {
                mine.push(pool.get_ot_instance(&mut c0, dir).unwrap());
            }
        }
        let theirs = handle.join().unwrap();

        // Direction 0: party 0 sends, party 1 receives.
        for i in 0..n {
            let [m0, m1] = mine[i];
            let [mc, c] = theirs[i];
            assert_eq!(mc, if c == 1 { m1 } else { m0 });
        }
        // Direction 1: roles swap.
        for i in 0..n {
            let [m0, m1] = theirs[n + i];
            let [mc, c] = mine[n + i];
            assert_eq!(mc, if c == 1 { m1 } else { m0 });
        }
    }
}
