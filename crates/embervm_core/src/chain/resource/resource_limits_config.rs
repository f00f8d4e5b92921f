use embervm_chainbase::{ChainbaseObject, SecondaryKey};
use embervm_proc_macros::{NumBytes, Read, Write};
use embervm_serialization::ReadError;

use crate::chain::{
    config::{
        ACCOUNT_CPU_USAGE_AVERAGE_WINDOW_MS, ACCOUNT_NET_USAGE_AVERAGE_WINDOW_MS,
        BLOCK_CPU_USAGE_AVERAGE_WINDOW_MS, BLOCK_INTERVAL_MS, BLOCK_SIZE_AVERAGE_WINDOW_MS,
        DEFAULT_MAX_BLOCK_CPU_USAGE, DEFAULT_MAX_BLOCK_NET_USAGE,
        DEFAULT_TARGET_BLOCK_CPU_USAGE_PCT, DEFAULT_TARGET_BLOCK_NET_USAGE_PCT,
        MAXIMUM_ELASTIC_RESOURCE_MULTIPLIER, chain_percent,
    },
    resource::ElasticLimitParameters,
    utils::Ratio,
};

/// Singleton rate-limiting configuration, fixed at genesis.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Read, Write, NumBytes)]
pub struct ResourceLimitsConfig {
    pub cpu_limit_parameters: ElasticLimitParameters,
    pub net_limit_parameters: ElasticLimitParameters,

    pub account_cpu_usage_average_window: u32,
    pub account_net_usage_average_window: u32,
}

impl Default for ResourceLimitsConfig {
    fn default() -> Self {
        ResourceLimitsConfig {
            cpu_limit_parameters: ElasticLimitParameters {
                target: chain_percent(
                    DEFAULT_MAX_BLOCK_CPU_USAGE as u64,
                    DEFAULT_TARGET_BLOCK_CPU_USAGE_PCT,
                ),
                max: DEFAULT_MAX_BLOCK_CPU_USAGE as u64,
                periods: BLOCK_CPU_USAGE_AVERAGE_WINDOW_MS / BLOCK_INTERVAL_MS,
                max_multiplier: MAXIMUM_ELASTIC_RESOURCE_MULTIPLIER,
                contract_rate: Ratio::new(99, 100),
                expand_rate: Ratio::new(1000, 999),
            },
            net_limit_parameters: ElasticLimitParameters {
                target: chain_percent(
                    DEFAULT_MAX_BLOCK_NET_USAGE as u64,
                    DEFAULT_TARGET_BLOCK_NET_USAGE_PCT,
                ),
                max: DEFAULT_MAX_BLOCK_NET_USAGE as u64,
                periods: BLOCK_SIZE_AVERAGE_WINDOW_MS / BLOCK_INTERVAL_MS,
                max_multiplier: MAXIMUM_ELASTIC_RESOURCE_MULTIPLIER,
                contract_rate: Ratio::new(99, 100),
                expand_rate: Ratio::new(1000, 999),
            },
            account_cpu_usage_average_window: ACCOUNT_CPU_USAGE_AVERAGE_WINDOW_MS
                / BLOCK_INTERVAL_MS,
            account_net_usage_average_window: ACCOUNT_NET_USAGE_AVERAGE_WINDOW_MS
                / BLOCK_INTERVAL_MS,
        }
    }
}

impl ResourceLimitsConfig {
    pub fn validate(&self) -> Result<(), crate::chain::error::ChainError> {
        self.cpu_limit_parameters.validate()?;
        self.net_limit_parameters.validate()
    }
}

impl ChainbaseObject for ResourceLimitsConfig {
    type PrimaryKey = u64;

    fn primary_key(&self) -> Vec<u8> {
        ResourceLimitsConfig::primary_key_to_bytes(0)
    }

    fn primary_key_to_bytes(key: Self::PrimaryKey) -> Vec<u8> {
        key.to_be_bytes().to_vec()
    }

    fn primary_key_from_bytes(bytes: &[u8]) -> Result<Self::PrimaryKey, ReadError> {
        let arr: [u8; 8] = bytes.try_into().map_err(|_| ReadError::NotEnoughBytes)?;
        Ok(u64::from_be_bytes(arr))
    }

    fn table_name() -> &'static str {
        "resource_limits_config"
    }

    fn secondary_indexes(&self) -> Vec<SecondaryKey> {
        vec![]
    }
}
