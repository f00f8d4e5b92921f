use embervm_chainbase::{ChainbaseObject, SecondaryIndex, SecondaryKey};
use embervm_proc_macros::{NumBytes, Read, Write};
use embervm_serialization::ReadError;

use crate::chain::{Name, resource::Quota};

/// Configured allowances for one account. Limit changes are staged as a
/// second row with `pending = true` and folded into the aggregate weight
/// sums by `process_account_limit_updates`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Read, Write, NumBytes)]
pub struct AccountLimits {
    pub id: u64,
    pub owner: Name,
    pub pending: bool,
    pub ram_bytes: Quota,
    pub net_weight: Quota,
    pub cpu_weight: Quota,
}

impl AccountLimits {
    pub fn new(
        id: u64,
        owner: Name,
        pending: bool,
        ram_bytes: Quota,
        net_weight: Quota,
        cpu_weight: Quota,
    ) -> Self {
        AccountLimits {
            id,
            owner,
            pending,
            ram_bytes,
            net_weight,
            cpu_weight,
        }
    }
}

impl ChainbaseObject for AccountLimits {
    type PrimaryKey = u64;

    fn primary_key(&self) -> Vec<u8> {
        AccountLimits::primary_key_to_bytes(self.id)
    }

    fn primary_key_to_bytes(key: Self::PrimaryKey) -> Vec<u8> {
        key.to_be_bytes().to_vec()
    }

    fn primary_key_from_bytes(bytes: &[u8]) -> Result<Self::PrimaryKey, ReadError> {
        let arr: [u8; 8] = bytes.try_into().map_err(|_| ReadError::NotEnoughBytes)?;
        Ok(u64::from_be_bytes(arr))
    }

    fn table_name() -> &'static str {
        "account_limits"
    }

    fn secondary_indexes(&self) -> Vec<SecondaryKey> {
        vec![SecondaryKey {
            key: AccountLimitsByOwnerIndex::secondary_key_as_bytes((self.pending, self.owner)),
            index_name: AccountLimitsByOwnerIndex::index_name(),
        }]
    }
}

/// Unique ascending ordering on `(pending, owner)`: all staged rows sort
/// after all actual rows, so one range scan visits every dirty row.
#[derive(Debug, Default)]
pub struct AccountLimitsByOwnerIndex;

impl SecondaryIndex<AccountLimits> for AccountLimitsByOwnerIndex {
    type Key = (bool, Name);

    fn secondary_key(object: &AccountLimits) -> Vec<u8> {
        AccountLimitsByOwnerIndex::secondary_key_as_bytes((object.pending, object.owner))
    }

    fn secondary_key_as_bytes(key: Self::Key) -> Vec<u8> {
        let (pending, owner) = key;
        let mut bytes = Vec::with_capacity(9);
        bytes.push(pending as u8);
        bytes.extend_from_slice(&owner.as_u64().to_be_bytes());
        bytes
    }

    fn index_name() -> &'static str {
        "account_limits_by_owner"
    }
}
