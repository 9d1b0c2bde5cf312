use crate::{Progress, SequenceGenerator, Step};
use num_bigint::BigUint;
use num_integer::Integer;
use num_traits::{One, Zero};
use rand::Rng;

/// Default number of Miller-Rabin witness rounds.
pub const DEFAULT_PRIME_CONFIDENCE: u32 = 1024;

/// Produces the smallest prime strictly greater than the previous value.
///
/// Every odd candidate is first screened with `confidence` rounds of
/// Miller-Rabin using random witnesses. Candidates that survive are confirmed
/// by trial division with odd divisors up to `sqrt(n)`, so the answer never
/// depends on the random witnesses, only the cost does.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PrimeGenerator {
    confidence: u32,
}

impl PrimeGenerator {
    /// Creates a generator running `confidence` witness rounds per candidate
    /// (at least one).
    pub const fn new(confidence: u32) -> Self {
        Self {
            confidence: if confidence == 0 { 1 } else { confidence },
        }
    }

    pub const fn confidence(&self) -> u32 {
        self.confidence
    }

    /// Smallest prime strictly greater than `previous`.
    pub fn next_prime(&self, previous: &BigUint) -> BigUint {
        let two = BigUint::from(2u32);
        if previous < &two {
            return two;
        }

        // Only the first candidate can be even; after that we step by two.
        let mut candidate = previous + 1u32;
        if candidate.is_even() {
            candidate += 1u32;
        }
        loop {
            if self.is_prime(&candidate) {
                return candidate;
            }
            candidate += 2u32;
        }
    }

    /// Exact primality: probabilistic screen, then trial division.
    pub fn is_prime(&self, n: &BigUint) -> bool {
        let two = BigUint::from(2u32);
        if n < &two {
            return false;
        }
        if n <= &BigUint::from(3u32) {
            return true;
        }
        if n.is_even() {
            return false;
        }
        if !miller_rabin(n, self.confidence) {
            return false;
        }
        trial_division(n)
    }
}

impl Default for PrimeGenerator {
    fn default() -> Self {
        Self::new(DEFAULT_PRIME_CONFIDENCE)
    }
}

impl SequenceGenerator for PrimeGenerator {
    fn name(&self) -> &'static str {
        "prime"
    }

    fn seed(&self) -> BigUint {
        BigUint::one()
    }

    fn progress(&self) -> Progress {
        Progress::Value
    }

    fn next(&mut self, previous: &BigUint) -> Step {
        Step::Computed(self.next_prime(previous))
    }
}

/// `n` must be odd and at least 5. Returns `false` only for composites.
fn miller_rabin(n: &BigUint, rounds: u32) -> bool {
    let one = BigUint::one();
    let n_minus_one = n - &one;
    let s = n_minus_one.trailing_zeros().unwrap_or(0);
    let d = &n_minus_one >> s;
    // Witnesses are drawn from [2, n - 2].
    let span = n - 3u32;
    let mut rng = rand::rng();

    'witness: for _ in 0..rounds {
        let a = BigUint::from(rng.random::<u64>()) % &span + 2u32;
        let mut x = a.modpow(&d, n);
        if x == one || x == n_minus_one {
            continue;
        }
        for _ in 1..s {
            x = &x * &x % n;
            if x == n_minus_one {
                continue 'witness;
            }
        }
        return false;
    }
    true
}

/// `n` must be odd and at least 5.
fn trial_division(n: &BigUint) -> bool {
    let mut divisor = BigUint::from(3u32);
    while &divisor * &divisor <= *n {
        if (n % &divisor).is_zero() {
            return false;
        }
        divisor += 2u32;
    }
    true
}
