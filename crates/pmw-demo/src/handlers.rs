//! The one handler this demo registers: a Monte Carlo dart-throw sampler.

/// A small deterministic generator so the demo has no extra dependency for
/// randomness; not suitable for anything beyond this illustration.
struct XorShift64(u64);

impl XorShift64 {
    fn next_unit_interval(&mut self) -> f64 {
        let mut x = self.0;
        x ^= x << 13;
        x ^= x >> 7;
        x ^= x << 17;
        self.0 = x;
        (x >> 11) as f64 / (1u64 << 53) as f64
    }
}

fn throw_dart(rng: &mut XorShift64) -> u64 {
    let x = rng.next_unit_interval();
    let y = rng.next_unit_interval();
    if x * x + y * y <= 1.0 { 1 } else { 0 }
}

/// `(seed, num_tests) -> (num_hits, num_tests)`.
pub fn throw_darts(args: &[Vec<u8>]) -> anyhow::Result<Vec<u8>> {
    let (seed, num_tests): (u64, u64) = bincode::deserialize(&args[0])?;
    let mut rng = XorShift64(seed.wrapping_mul(2_685_821_657_736_338_717).max(1));

    let mut num_hits = 0u64;
    for _ in 0..num_tests {
        num_hits += throw_dart(&mut rng);
    }

    Ok(bincode::serialize(&(num_hits, num_tests))?)
}
