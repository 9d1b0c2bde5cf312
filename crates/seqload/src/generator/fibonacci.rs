use crate::{Error, Progress, SequenceGenerator, Step};
use num_bigint::BigUint;
use num_traits::{ToPrimitive, Zero};

/// How far the cached pair is walked forward before falling back to
/// fast doubling.
const MAX_FORWARD_STEPS: u64 = 64;

/// Produces `fib(previous + 1)` for a previous *index*.
///
/// The generator carries `(fib(n), fib(n + 1))` for the last index it
/// answered, so the steady state of a worker calling it with consecutive
/// indices costs a single big-integer addition per term. Any other input is
/// answered in `O(log n)` multiplications by fast doubling.
#[derive(Debug, Clone, Default)]
pub struct FibonacciGenerator {
    cached: Option<FibPair>,
}

impl FibonacciGenerator {
    pub const fn new() -> Self {
        Self { cached: None }
    }
}

impl SequenceGenerator for FibonacciGenerator {
    fn name(&self) -> &'static str {
        "fibonacci"
    }

    fn seed(&self) -> BigUint {
        BigUint::zero()
    }

    fn progress(&self) -> Progress {
        Progress::Position
    }

    fn next(&mut self, previous: &BigUint) -> Step {
        let Some(index) = previous.to_u64().and_then(|n| n.checked_add(1)) else {
            return Step::Failed(Error::Computation {
                reason: format!("Fibonacci index {previous} + 1 does not fit in 64 bits"),
            });
        };

        let pair = match self.cached.take() {
            Some(pair) if pair.index <= index && index - pair.index <= MAX_FORWARD_STEPS => {
                pair.advance_to(index)
            }
            _ => FibPair::at(index),
        };
        let value = pair.current.clone();
        self.cached = Some(pair);
        Step::Computed(value)
    }
}

/// `fib(n)` with `fib(0) = 0` and `fib(1) = 1`.
pub fn fib(n: u64) -> BigUint {
    FibPair::at(n).current
}

#[derive(Debug, Clone)]
struct FibPair {
    index: u64,
    current: BigUint,
    next: BigUint,
}

impl FibPair {
    /// Fast doubling:
    /// `fib(2k) = fib(k) * (2 * fib(k + 1) - fib(k))` and
    /// `fib(2k + 1) = fib(k)^2 + fib(k + 1)^2`.
    fn at(index: u64) -> Self {
        let mut a = BigUint::zero();
        let mut b = BigUint::from(1u32);
        for bit in (0..u64::BITS - index.leading_zeros()).rev() {
            // fib(k + 1) >= fib(k), so the subtraction cannot underflow.
            let c = &a * ((&b << 1u32) - &a);
            let d = &a * &a + &b * &b;
            if (index >> bit) & 1 == 0 {
                a = c;
                b = d;
            } else {
                b = c + &d;
                a = d;
            }
        }
        Self {
            index,
            current: a,
            next: b,
        }
    }

    fn advance_to(mut self, index: u64) -> Self {
        while self.index < index {
            let following = &self.current + &self.next;
            self.current = core::mem::replace(&mut self.next, following);
            self.index += 1;
        }
        self
    }
}
