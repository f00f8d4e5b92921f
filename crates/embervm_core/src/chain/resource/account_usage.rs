use embervm_chainbase::{ChainbaseObject, SecondaryKey};
use embervm_proc_macros::{NumBytes, Read, Write};
use embervm_serialization::ReadError;

use crate::chain::{Name, utils::UsageAccumulator};

/// Smoothed CPU and NET consumption for one account. The accumulators
/// carry the last ordinal they saw, so an idle account is caught up lazily.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Read, Write, NumBytes)]
pub struct AccountUsage {
    pub owner: Name,
    pub cpu_usage: UsageAccumulator,
    pub net_usage: UsageAccumulator,
}

impl AccountUsage {
    pub fn new(owner: Name) -> Self {
        AccountUsage {
            owner,
            cpu_usage: UsageAccumulator::default(),
            net_usage: UsageAccumulator::default(),
        }
    }
}

impl ChainbaseObject for AccountUsage {
    type PrimaryKey = Name;

    fn primary_key(&self) -> Vec<u8> {
        AccountUsage::primary_key_to_bytes(self.owner)
    }

    fn primary_key_to_bytes(key: Self::PrimaryKey) -> Vec<u8> {
        key.as_u64().to_be_bytes().to_vec()
    }

    fn primary_key_from_bytes(bytes: &[u8]) -> Result<Self::PrimaryKey, ReadError> {
        let arr: [u8; 8] = bytes.try_into().map_err(|_| ReadError::NotEnoughBytes)?;
        Ok(Name::new(u64::from_be_bytes(arr)))
    }

    fn table_name() -> &'static str {
        "account_usage"
    }

    fn secondary_indexes(&self) -> Vec<SecondaryKey> {
        vec![]
    }
}
