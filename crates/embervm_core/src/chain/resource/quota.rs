use core::fmt;

use embervm_serialization::{NumBytes, Read, ReadError, Write, WriteError};

/// A configured allowance: either unmetered or a hard bound. Stored as a
/// tagged value, so no integer sentinel ever reaches the arithmetic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Quota {
    #[default]
    Unlimited,
    Bounded(u64),
}

impl Quota {
    pub const fn is_unlimited(&self) -> bool {
        matches!(self, Quota::Unlimited)
    }

    pub const fn bounded(&self) -> Option<u64> {
        match self {
            Quota::Unlimited => None,
            Quota::Bounded(value) => Some(*value),
        }
    }
}

impl fmt::Display for Quota {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Quota::Unlimited => write!(f, "unlimited"),
            Quota::Bounded(value) => write!(f, "{}", value),
        }
    }
}

impl NumBytes for Quota {
    #[inline]
    fn num_bytes(&self) -> usize {
        match self {
            Quota::Unlimited => 1,
            Quota::Bounded(value) => 1 + value.num_bytes(),
        }
    }
}

impl Read for Quota {
    #[inline]
    fn read(bytes: &[u8], pos: &mut usize) -> Result<Self, ReadError> {
        match u8::read(bytes, pos)? {
            0 => Ok(Quota::Unlimited),
            1 => Ok(Quota::Bounded(u64::read(bytes, pos)?)),
            _ => Err(ReadError::ParseError),
        }
    }
}

impl Write for Quota {
    #[inline]
    fn write(&self, bytes: &mut [u8], pos: &mut usize) -> Result<(), WriteError> {
        match self {
            Quota::Unlimited => 0u8.write(bytes, pos),
            Quota::Bounded(value) => {
                1u8.write(bytes, pos)?;
                value.write(bytes, pos)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use embervm_serialization::Write as _;

    #[test]
    fn round_trips() {
        for quota in [Quota::Unlimited, Quota::Bounded(0), Quota::Bounded(u64::MAX)] {
            let packed = quota.pack().unwrap();
            let mut pos = 0;
            assert_eq!(Quota::read(&packed, &mut pos).unwrap(), quota);
            assert_eq!(pos, packed.len());
        }
    }

    #[test]
    fn rejects_unknown_tag() {
        let mut pos = 0;
        assert!(Quota::read(&[2u8], &mut pos).is_err());
    }
}
