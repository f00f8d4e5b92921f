use embervm_chainbase::{ChainbaseObject, SecondaryKey};
use embervm_proc_macros::{NumBytes, Read, Write};
use embervm_serialization::ReadError;

use crate::chain::Name;

/// The RAM ledger: bytes currently consumed per account. Enforced eagerly
/// against the quota, never smoothed.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Read, Write, NumBytes)]
pub struct RamUsage {
    pub owner: Name,
    pub ram_usage: u64,
}

impl RamUsage {
    pub fn new(owner: Name) -> Self {
        RamUsage {
            owner,
            ram_usage: 0,
        }
    }
}

impl ChainbaseObject for RamUsage {
    type PrimaryKey = Name;

    fn primary_key(&self) -> Vec<u8> {
        RamUsage::primary_key_to_bytes(self.owner)
    }

    fn primary_key_to_bytes(key: Self::PrimaryKey) -> Vec<u8> {
        key.as_u64().to_be_bytes().to_vec()
    }

    fn primary_key_from_bytes(bytes: &[u8]) -> Result<Self::PrimaryKey, ReadError> {
        let arr: [u8; 8] = bytes.try_into().map_err(|_| ReadError::NotEnoughBytes)?;
        Ok(Name::new(u64::from_be_bytes(arr)))
    }

    fn table_name() -> &'static str {
        "ram_usage"
    }

    fn secondary_indexes(&self) -> Vec<SecondaryKey> {
        vec![]
    }
}
