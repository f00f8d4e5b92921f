use std::ops::{Add, Div, Mul, Rem};

use embervm_proc_macros::{NumBytes, Read, Write};

use crate::chain::{config::RATE_LIMITING_PRECISION, error::ChainError, utils::chain_assert};

/// An exact rational factor. Multiplication always multiplies first and
/// divides second, truncating toward zero, so two nodes computing the same
/// sequence get bit-identical results.
#[derive(Debug, Clone, Copy, PartialEq, Read, Write, NumBytes, Default, Eq, Hash)]
pub struct Ratio<T> {
    pub numerator: T,
    pub denominator: T,
}

impl<T> Ratio<T> {
    pub const fn new(numerator: T, denominator: T) -> Self {
        Ratio {
            numerator,
            denominator,
        }
    }
}

impl Mul<Ratio<u64>> for u64 {
    type Output = Result<u64, ChainError>;

    fn mul(self, r: Ratio<u64>) -> Self::Output {
        chain_assert(
            r.numerator == 0 || u64::MAX / r.numerator >= self,
            ChainError::InvalidArgument(
                "usage exceeds maximum value representable after extending for precision"
                    .to_string(),
            ),
        )?;
        Ok((self * r.numerator) / r.denominator)
    }
}

/// A decaying average of usage over a fixed window of block ordinals.
///
/// `value_ex` is the average pre-multiplied by [`RATE_LIMITING_PRECISION`]
/// so the decay arithmetic stays integer-only and reproducible.
#[derive(Debug, Clone, Copy, NumBytes, Read, Write, Default, PartialEq, Eq, Hash)]
pub struct UsageAccumulator {
    /// The ordinal of the last period which has contributed to the average.
    pub last_ordinal: u32,
    /// The current average pre-multiplied by the precision.
    pub value_ex: u64,
    /// The last period's average plus the current period's contribution so far.
    pub consumed: u64,
}

impl UsageAccumulator {
    pub fn average(&self) -> u64 {
        integer_divide_ceil(self.value_ex, RATE_LIMITING_PRECISION)
    }

    pub fn max_raw_value(&self) -> u64 {
        u64::MAX / RATE_LIMITING_PRECISION
    }

    /// The pre-multiplied value as it would read at `ordinal`, after the
    /// idle periods since `last_ordinal` have been applied in one step.
    /// Does not mutate; a window or more of idleness decays to zero.
    pub fn decayed_value_ex(&self, ordinal: u32, window_size: u64) -> Result<u64, ChainError> {
        if ordinal <= self.last_ordinal {
            return Ok(self.value_ex);
        }
        if (self.last_ordinal as u64) + window_size > ordinal as u64 {
            let delta = ordinal - self.last_ordinal;
            let decay = Ratio::new(window_size - delta as u64, window_size);
            self.value_ex * decay
        } else {
            Ok(0)
        }
    }

    /// Like [`UsageAccumulator::average`], lazily caught up to `ordinal`.
    pub fn decayed_average(&self, ordinal: u32, window_size: u64) -> Result<u64, ChainError> {
        Ok(integer_divide_ceil(
            self.decayed_value_ex(ordinal, window_size)?,
            RATE_LIMITING_PRECISION,
        ))
    }

    /// Integrate `units` of usage observed at `ordinal`.
    pub fn add(&mut self, units: u64, ordinal: u32, window_size: u64) -> Result<(), ChainError> {
        // check the numerical limits before any state mutation
        chain_assert(
            units <= self.max_raw_value(),
            ChainError::InvalidArgument(
                "usage exceeds maximum value representable after extending for precision"
                    .to_string(),
            ),
        )?;
        chain_assert(
            u64::MAX - self.consumed >= units,
            ChainError::InvalidArgument("overflow in tracked usage when adding usage".to_string()),
        )?;

        let value_ex_contrib = integer_divide_ceil(units * RATE_LIMITING_PRECISION, window_size);
        chain_assert(
            u64::MAX - self.value_ex >= value_ex_contrib,
            ChainError::InvalidArgument(
                "overflow in accumulated value when adding usage".to_string(),
            ),
        )?;

        if self.last_ordinal != ordinal {
            chain_assert(
                ordinal > self.last_ordinal,
                ChainError::InvalidArgument(
                    "new ordinal cannot be less than the previous ordinal".to_string(),
                ),
            )?;
            self.value_ex = self.decayed_value_ex(ordinal, window_size)?;
            self.last_ordinal = ordinal;
            self.consumed = self.average();
        }

        self.consumed += units;
        self.value_ex += value_ex_contrib;

        Ok(())
    }
}

pub fn integer_divide_ceil<T>(num: T, den: T) -> T
where
    T: Copy + PartialOrd + Div<Output = T> + Rem<Output = T> + Add<Output = T> + From<u8>,
{
    let div = num / den;
    let rem = num % den;
    if rem > T::from(0) { div + T::from(1) } else { div }
}

#[cfg(test)]
mod tests {
    use super::*;

    const WINDOW: u64 = 10;

    #[test]
    fn constant_input_converges_to_input() {
        let mut acc = UsageAccumulator::default();
        for ordinal in 1..=100u32 {
            acc.add(1000, ordinal, WINDOW).unwrap();
        }
        assert_eq!(acc.average(), 1000);
    }

    #[test]
    fn single_sample_decays_per_period() {
        let mut acc = UsageAccumulator::default();
        acc.add(1000, 1, WINDOW).unwrap();
        assert_eq!(acc.value_ex, 100_000_000);
        assert_eq!(acc.average(), 100);

        acc.add(0, 2, WINDOW).unwrap();
        assert_eq!(acc.average(), 90);
    }

    #[test]
    fn idle_for_a_full_window_decays_to_zero() {
        let mut acc = UsageAccumulator::default();
        acc.add(1000, 1, WINDOW).unwrap();
        acc.add(0, 11, WINDOW).unwrap();
        assert_eq!(acc.value_ex, 0);
        assert_eq!(acc.average(), 0);
    }

    #[test]
    fn lazy_read_matches_eager_decay() {
        let mut eager = UsageAccumulator::default();
        eager.add(5000, 1, WINDOW).unwrap();
        let lazy = eager;

        eager.add(0, 4, WINDOW).unwrap();
        assert_eq!(
            lazy.decayed_value_ex(4, WINDOW).unwrap(),
            eager.value_ex
        );
        assert_eq!(lazy.decayed_average(4, WINDOW).unwrap(), eager.average());
    }

    #[test]
    fn ordinal_regression_is_rejected() {
        let mut acc = UsageAccumulator::default();
        acc.add(10, 5, WINDOW).unwrap();
        assert!(acc.add(10, 4, WINDOW).is_err());
    }

    #[test]
    fn oversized_sample_is_rejected_before_mutation() {
        let mut acc = UsageAccumulator::default();
        let before = acc;
        assert!(acc.add(u64::MAX, 1, WINDOW).is_err());
        assert_eq!(acc, before);
    }
}
