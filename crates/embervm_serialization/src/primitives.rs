use std::{
    collections::{BTreeMap, HashSet, VecDeque},
    hash::Hash,
    str,
};

use crate::{NumBytes, Read, ReadError, VarUint32, Write, WriteError};

impl NumBytes for usize {
    #[inline(always)]
    fn num_bytes(&self) -> usize {
        VarUint32::from(*self).num_bytes()
    }
}

impl Read for usize {
    #[inline(always)]
    fn read(bytes: &[u8], pos: &mut usize) -> Result<Self, ReadError> {
        VarUint32::read(bytes, pos).map(|v| v.0 as usize)
    }
}

impl Write for usize {
    #[inline(always)]
    fn write(&self, bytes: &mut [u8], pos: &mut usize) -> Result<(), WriteError> {
        u32::try_from(*self)
            .map_err(|_| WriteError::TryFromIntError)
            .and_then(|v| VarUint32(v).write(bytes, pos))
    }
}

macro_rules! int_impls {
    ($($unsigned:ty, $signed:ty)*) => {$(
        impl NumBytes for $unsigned {
            #[inline(always)]
            fn num_bytes(&self) -> usize {
                core::mem::size_of::<$unsigned>()
            }
        }

        impl NumBytes for $signed {
            #[inline(always)]
            fn num_bytes(&self) -> usize {
                core::mem::size_of::<$unsigned>()
            }
        }

        impl Read for $unsigned {
            #[inline(always)]
            fn read(bytes: &[u8], pos: &mut usize) -> Result<Self, ReadError> {
                const SIZE: usize = core::mem::size_of::<$unsigned>();
                if bytes.len() < *pos + SIZE {
                    return Err(ReadError::NotEnoughBytes);
                }
                let mut arr = [0u8; SIZE];
                arr.copy_from_slice(&bytes[*pos..*pos + SIZE]);
                *pos += SIZE;
                Ok(<$unsigned>::from_le_bytes(arr))
            }
        }

        impl Read for $signed {
            #[inline(always)]
            fn read(bytes: &[u8], pos: &mut usize) -> Result<Self, ReadError> {
                <$unsigned>::read(bytes, pos).map(|v| v as $signed)
            }
        }

        impl Write for $unsigned {
            #[inline(always)]
            fn write(&self, bytes: &mut [u8], pos: &mut usize) -> Result<(), WriteError> {
                const SIZE: usize = core::mem::size_of::<$unsigned>();
                if bytes.len() < *pos + SIZE {
                    return Err(WriteError::NotEnoughSpace);
                }
                bytes[*pos..*pos + SIZE].copy_from_slice(&self.to_le_bytes());
                *pos += SIZE;
                Ok(())
            }
        }

        impl Write for $signed {
            #[inline(always)]
            fn write(&self, bytes: &mut [u8], pos: &mut usize) -> Result<(), WriteError> {
                (*self as $unsigned).write(bytes, pos)
            }
        }
    )*};
}

int_impls!(u8, i8 u16, i16 u32, i32 u64, i64);

impl NumBytes for bool {
    #[inline(always)]
    fn num_bytes(&self) -> usize {
        core::mem::size_of::<u8>()
    }
}

impl Read for bool {
    #[inline(always)]
    fn read(bytes: &[u8], pos: &mut usize) -> Result<Self, ReadError> {
        let value = u8::read(bytes, pos)?;
        Ok(value != 0)
    }
}

impl Write for bool {
    #[inline(always)]
    fn write(&self, bytes: &mut [u8], pos: &mut usize) -> Result<(), WriteError> {
        (*self as u8).write(bytes, pos)
    }
}

impl NumBytes for String {
    #[inline(always)]
    fn num_bytes(&self) -> usize {
        self.len().num_bytes() + self.len()
    }
}

impl Read for String {
    #[inline(always)]
    fn read(bytes: &[u8], pos: &mut usize) -> Result<Self, ReadError> {
        let len = usize::read(bytes, pos)?;

        if *pos + len > bytes.len() {
            return Err(ReadError::NotEnoughBytes);
        }

        let str_bytes = &bytes[*pos..*pos + len];
        *pos += len;

        match str::from_utf8(str_bytes) {
            Ok(s) => Ok(s.to_string()),
            Err(_) => Err(ReadError::ParseError),
        }
    }
}

impl Write for String {
    #[inline(always)]
    fn write(&self, bytes: &mut [u8], pos: &mut usize) -> Result<(), WriteError> {
        self.len().write(bytes, pos)?;
        if bytes.len() < *pos + self.len() {
            return Err(WriteError::NotEnoughSpace);
        }
        bytes[*pos..*pos + self.len()].copy_from_slice(self.as_bytes());
        *pos += self.len();
        Ok(())
    }
}

impl<T: NumBytes> NumBytes for Option<T> {
    #[inline(always)]
    fn num_bytes(&self) -> usize {
        match self {
            Some(value) => 1 + value.num_bytes(),
            None => 1,
        }
    }
}

impl<T: Read> Read for Option<T> {
    #[inline(always)]
    fn read(bytes: &[u8], pos: &mut usize) -> Result<Self, ReadError> {
        let is_some = bool::read(bytes, pos)?;
        if is_some {
            Ok(Some(T::read(bytes, pos)?))
        } else {
            Ok(None)
        }
    }
}

impl<T: Write> Write for Option<T> {
    #[inline(always)]
    fn write(&self, bytes: &mut [u8], pos: &mut usize) -> Result<(), WriteError> {
        match self {
            Some(value) => {
                true.write(bytes, pos)?;
                value.write(bytes, pos)
            }
            None => false.write(bytes, pos),
        }
    }
}

impl<T: NumBytes> NumBytes for Vec<T> {
    #[inline(always)]
    fn num_bytes(&self) -> usize {
        let mut count = self.len().num_bytes();
        for item in self {
            count += item.num_bytes();
        }
        count
    }
}

impl<T: Read> Read for Vec<T> {
    #[inline(always)]
    fn read(bytes: &[u8], pos: &mut usize) -> Result<Self, ReadError> {
        let len = usize::read(bytes, pos)?;

        if *pos + len > bytes.len() {
            return Err(ReadError::NotEnoughBytes);
        }

        let mut vec = Vec::with_capacity(len);
        for _ in 0..len {
            vec.push(T::read(bytes, pos)?);
        }
        Ok(vec)
    }
}

impl<T: Write> Write for Vec<T> {
    #[inline(always)]
    fn write(&self, bytes: &mut [u8], pos: &mut usize) -> Result<(), WriteError> {
        self.len().write(bytes, pos)?;
        for item in self {
            item.write(bytes, pos)?;
        }
        Ok(())
    }
}

impl<T: NumBytes> NumBytes for VecDeque<T> {
    #[inline(always)]
    fn num_bytes(&self) -> usize {
        let mut count = self.len().num_bytes();
        for item in self {
            count += item.num_bytes();
        }
        count
    }
}

impl<T: Read> Read for VecDeque<T> {
    #[inline(always)]
    fn read(bytes: &[u8], pos: &mut usize) -> Result<Self, ReadError> {
        let len = usize::read(bytes, pos)?;

        if *pos + len > bytes.len() {
            return Err(ReadError::NotEnoughBytes);
        }

        let mut vec = VecDeque::with_capacity(len);
        for _ in 0..len {
            vec.push_back(T::read(bytes, pos)?);
        }
        Ok(vec)
    }
}

impl<T: Write> Write for VecDeque<T> {
    #[inline(always)]
    fn write(&self, bytes: &mut [u8], pos: &mut usize) -> Result<(), WriteError> {
        self.len().write(bytes, pos)?;
        for item in self {
            item.write(bytes, pos)?;
        }
        Ok(())
    }
}

impl<T: NumBytes> NumBytes for HashSet<T> {
    #[inline(always)]
    fn num_bytes(&self) -> usize {
        let mut count = self.len().num_bytes();
        for item in self {
            count += item.num_bytes();
        }
        count
    }
}

impl<T: Read + Hash + Eq> Read for HashSet<T> {
    #[inline(always)]
    fn read(bytes: &[u8], pos: &mut usize) -> Result<Self, ReadError> {
        let len = usize::read(bytes, pos)?;

        if *pos + len > bytes.len() {
            return Err(ReadError::NotEnoughBytes);
        }

        let mut set = HashSet::with_capacity(len);
        for _ in 0..len {
            set.insert(T::read(bytes, pos)?);
        }
        Ok(set)
    }
}

impl<T: Write + Hash + Eq> Write for HashSet<T> {
    #[inline(always)]
    fn write(&self, bytes: &mut [u8], pos: &mut usize) -> Result<(), WriteError> {
        self.len().write(bytes, pos)?;
        for item in self {
            item.write(bytes, pos)?;
        }
        Ok(())
    }
}

impl<K: NumBytes, V: NumBytes> NumBytes for BTreeMap<K, V> {
    #[inline(always)]
    fn num_bytes(&self) -> usize {
        let mut count = self.len().num_bytes();
        for (key, value) in self {
            count += key.num_bytes();
            count += value.num_bytes();
        }
        count
    }
}

impl<K: Read + Ord, V: Read> Read for BTreeMap<K, V> {
    #[inline(always)]
    fn read(bytes: &[u8], pos: &mut usize) -> Result<Self, ReadError> {
        let len = usize::read(bytes, pos)?;

        if *pos + len > bytes.len() {
            return Err(ReadError::NotEnoughBytes);
        }

        let mut map = BTreeMap::new();
        for _ in 0..len {
            let key = K::read(bytes, pos)?;
            let value = V::read(bytes, pos)?;
            map.insert(key, value);
        }
        Ok(map)
    }
}

impl<K: Write + Ord, V: Write> Write for BTreeMap<K, V> {
    #[inline(always)]
    fn write(&self, bytes: &mut [u8], pos: &mut usize) -> Result<(), WriteError> {
        self.len().write(bytes, pos)?;
        for (key, value) in self {
            key.write(bytes, pos)?;
            value.write(bytes, pos)?;
        }
        Ok(())
    }
}

impl<T1: NumBytes, T2: NumBytes> NumBytes for (T1, T2) {
    #[inline(always)]
    fn num_bytes(&self) -> usize {
        self.0.num_bytes() + self.1.num_bytes()
    }
}

impl<T1: Read, T2: Read> Read for (T1, T2) {
    #[inline(always)]
    fn read(bytes: &[u8], pos: &mut usize) -> Result<Self, ReadError> {
        let first = T1::read(bytes, pos)?;
        let second = T2::read(bytes, pos)?;
        Ok((first, second))
    }
}

impl<T1: Write, T2: Write> Write for (T1, T2) {
    #[inline(always)]
    fn write(&self, bytes: &mut [u8], pos: &mut usize) -> Result<(), WriteError> {
        self.0.write(bytes, pos)?;
        self.1.write(bytes, pos)
    }
}

impl<T1: NumBytes, T2: NumBytes, T3: NumBytes> NumBytes for (T1, T2, T3) {
    #[inline(always)]
    fn num_bytes(&self) -> usize {
        self.0.num_bytes() + self.1.num_bytes() + self.2.num_bytes()
    }
}

impl<T1: Read, T2: Read, T3: Read> Read for (T1, T2, T3) {
    #[inline(always)]
    fn read(bytes: &[u8], pos: &mut usize) -> Result<Self, ReadError> {
        let first = T1::read(bytes, pos)?;
        let second = T2::read(bytes, pos)?;
        let third = T3::read(bytes, pos)?;
        Ok((first, second, third))
    }
}

impl<T1: Write, T2: Write, T3: Write> Write for (T1, T2, T3) {
    #[inline(always)]
    fn write(&self, bytes: &mut [u8], pos: &mut usize) -> Result<(), WriteError> {
        self.0.write(bytes, pos)?;
        self.1.write(bytes, pos)?;
        self.2.write(bytes, pos)
    }
}

#[cfg(test)]
mod tests {
    use crate::{Read, Write};

    #[test]
    fn integers_round_trip() {
        let packed = 0xDEAD_BEEF_u32.pack().unwrap();
        assert_eq!(packed, 0xDEAD_BEEF_u32.to_le_bytes());
        let mut pos = 0;
        assert_eq!(u32::read(&packed, &mut pos).unwrap(), 0xDEAD_BEEF);
    }

    #[test]
    fn string_round_trips() {
        let value = "hello world".to_string();
        let packed = value.pack().unwrap();
        let mut pos = 0;
        assert_eq!(String::read(&packed, &mut pos).unwrap(), value);
    }

    #[test]
    fn vec_of_tuples_round_trips() {
        let value = vec![(1u64, true), (2u64, false)];
        let packed = value.pack().unwrap();
        let mut pos = 0;
        assert_eq!(Vec::<(u64, bool)>::read(&packed, &mut pos).unwrap(), value);
    }

    #[test]
    fn truncated_input_errors() {
        let packed = 7u64.pack().unwrap();
        let mut pos = 0;
        assert!(u64::read(&packed[..4], &mut pos).is_err());
    }
}
