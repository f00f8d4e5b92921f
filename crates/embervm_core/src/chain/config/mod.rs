//! Consensus-critical rate limiting constants. Changing any of these is a
//! protocol upgrade.

pub const RATE_LIMITING_PRECISION: u64 = 1000 * 1000;

pub const BLOCK_INTERVAL_MS: u32 = 500;

pub const PERCENT_100: u64 = 10000; // basis points
pub const PERCENT_1: u64 = 100;

pub const ACCOUNT_CPU_USAGE_AVERAGE_WINDOW_MS: u32 = 24 * 60 * 60 * 1000;
pub const ACCOUNT_NET_USAGE_AVERAGE_WINDOW_MS: u32 = 24 * 60 * 60 * 1000;
pub const BLOCK_CPU_USAGE_AVERAGE_WINDOW_MS: u32 = 60 * 1000;
pub const BLOCK_SIZE_AVERAGE_WINDOW_MS: u32 = 60 * 1000;
pub const MAXIMUM_ELASTIC_RESOURCE_MULTIPLIER: u32 = 1000;

pub const DEFAULT_MAX_BLOCK_NET_USAGE: u32 = 1024 * 1024;
pub const DEFAULT_TARGET_BLOCK_NET_USAGE_PCT: u32 = 10 * PERCENT_1 as u32; // 10%

pub const DEFAULT_MAX_BLOCK_CPU_USAGE: u32 = 200_000;
pub const DEFAULT_TARGET_BLOCK_CPU_USAGE_PCT: u32 = 10 * PERCENT_1 as u32; // 10%

pub const fn chain_percent(value: u64, percentage: u32) -> u64 {
    (value * percentage as u64) / PERCENT_100
}
