//! R-compatible random number generation for permutation tests
//!
//! Mersenne Twister seeded the way R's `set.seed()` does, with R's
//! rejection-sampling `sample()` so permutations are reproducible.

/// R's Mersenne Twister RNG
pub struct RMersenneTwister {
    state: [u32; 624],
    index: usize,
}

impl RMersenneTwister {
    const N: usize = 624;
    const M: usize = 397;
    const MATRIX_A: u32 = 0x9908B0DF;
    const UPPER_MASK: u32 = 0x80000000;
    const LOWER_MASK: u32 = 0x7FFFFFFF;
    const I2_32M1: f64 = 2.3283064365386963e-10;

    /// Same state as R's `set.seed(seed)`
    pub fn new(seed: u32) -> Self {
        let mut mt = RMersenneTwister {
            state: [0; Self::N],
            index: Self::N,
        };
        mt.r_init_seed(seed);
        mt
    }

    /// LCG x <- 69069 x + 1: 50 warm-up rounds, one discarded value, then 624 state words
    fn r_init_seed(&mut self, seed: u32) {
        let mut x = seed;
        for _ in 0..51 {
            x = x.wrapping_mul(69069).wrapping_add(1);
        }
        for word in self.state.iter_mut() {
            x = x.wrapping_mul(69069).wrapping_add(1);
            *word = x;
        }
        self.index = Self::N;
    }

    fn generate_numbers(&mut self) {
        for i in 0..Self::N {
            let y = (self.state[i] & Self::UPPER_MASK) | (self.state[(i + 1) % Self::N] & Self::LOWER_MASK);
            self.state[i] = self.state[(i + Self::M) % Self::N] ^ (y >> 1);
            if y & 1 != 0 {
                self.state[i] ^= Self::MATRIX_A;
            }
        }
        self.index = 0;
    }

    fn next_u32(&mut self) -> u32 {
        if self.index >= Self::N {
            self.generate_numbers();
        }
        let mut y = self.state[self.index];
        self.index += 1;

        y ^= y >> 11;
        y ^= (y << 7) & 0x9D2C5680;
        y ^= (y << 15) & 0xEFC60000;
        y ^= y >> 18;
        y
    }

    /// Uniform on (0, 1), with R's fixup keeping both ends open
    pub fn runif(&mut self) -> f64 {
        let value = self.next_u32() as f64 * Self::I2_32M1;
        if value <= 0.0 {
            0.5 * Self::I2_32M1
        } else if 1.0 - value <= 0.0 {
            1.0 - 0.5 * Self::I2_32M1
        } else {
            value
        }
    }

    /// Random integer built 16 bits at a time from uniforms, masked to `bits`
    fn rbits(&mut self, bits: u32) -> u64 {
        let mut v: u64 = 0;
        let mut n = 0;
        while n <= bits {
            let v1 = (self.runif() * 65536.0).floor() as u64;
            v = v.wrapping_mul(65536).wrapping_add(v1);
            n += 16;
        }
        v & ((1u64 << bits) - 1)
    }

    /// Uniform index in [0, n) by rejection sampling
    pub fn unif_index(&mut self, n: usize) -> usize {
        if n <= 1 {
            return 0;
        }
        let bits = (n as f64).log2().ceil() as u32;
        loop {
            let v = self.rbits(bits);
            if (v as usize) < n {
                return v as usize;
            }
        }
    }

    /// `k` draws without replacement from 0..n, in R's `sample(n, k)` order
    pub fn sample(&mut self, n: usize, k: usize) -> Vec<usize> {
        let mut pool: Vec<usize> = (0..n).collect();
        let mut remaining = n;
        let mut out = Vec::with_capacity(k.min(n));
        for _ in 0..k.min(n) {
            let j = self.unif_index(remaining);
            out.push(pool[j]);
            remaining -= 1;
            pool[j] = pool[remaining];
        }
        out
    }

    /// A random permutation of 0..n
    pub fn permutation(&mut self, n: usize) -> Vec<usize> {
        self.sample(n, n)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_runif_matches_r() {
        // set.seed(42); runif(3)
        let mut rng = RMersenneTwister::new(42);
        let expected = [0.914806043496355, 0.937075413297862, 0.286139534786344];
        for e in expected {
            assert!((rng.runif() - e).abs() < 1e-12);
        }
    }

    #[test]
    fn test_sample_matches_r() {
        // set.seed(42); sample(10) - 1
        let mut rng = RMersenneTwister::new(42);
        assert_eq!(rng.permutation(10), vec![0, 4, 9, 7, 1, 3, 5, 8, 6, 2]);
    }

    #[test]
    fn test_permutation_is_complete() {
        let mut rng = RMersenneTwister::new(7);
        let mut perm = rng.permutation(100);
        perm.sort_unstable();
        assert_eq!(perm, (0..100).collect::<Vec<_>>());
    }

    #[test]
    fn test_unif_index_range() {
        let mut rng = RMersenneTwister::new(1);
        assert!((0..1000).map(|_| rng.unif_index(7)).all(|i| i < 7));
        assert_eq!(rng.unif_index(1), 0);
    }
}
