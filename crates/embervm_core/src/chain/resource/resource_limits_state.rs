use embervm_chainbase::{ChainbaseObject, SecondaryKey};
use embervm_proc_macros::{NumBytes, Read, Write};
use embervm_serialization::ReadError;

use crate::chain::{
    error::ChainError,
    resource::{ElasticLimitParameters, ResourceLimitsConfig},
    utils::UsageAccumulator,
};

/// Singleton accounting state, mutated once per transaction (pending
/// totals) and once per block close (averages and virtual limits).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Read, Write, NumBytes)]
pub struct ResourceLimitsState {
    pub average_block_net_usage: UsageAccumulator,
    pub average_block_cpu_usage: UsageAccumulator,

    pub pending_net_usage: u64,
    pub pending_cpu_usage: u64,

    pub total_net_weight: u64,
    pub total_cpu_weight: u64,
    pub total_ram_bytes: u64,

    pub virtual_net_limit: u64,
    pub virtual_cpu_limit: u64,
}

impl ResourceLimitsState {
    pub fn update_virtual_cpu_limit(
        &mut self,
        config: &ResourceLimitsConfig,
    ) -> Result<(), ChainError> {
        self.virtual_cpu_limit = update_elastic_limit(
            self.virtual_cpu_limit,
            self.average_block_cpu_usage.average(),
            &config.cpu_limit_parameters,
        )?;
        Ok(())
    }

    pub fn update_virtual_net_limit(
        &mut self,
        config: &ResourceLimitsConfig,
    ) -> Result<(), ChainError> {
        self.virtual_net_limit = update_elastic_limit(
            self.virtual_net_limit,
            self.average_block_net_usage.average(),
            &config.net_limit_parameters,
        )?;
        Ok(())
    }
}

/// One step of the congestion controller. Below target the limit climbs
/// multiplicatively toward the ceiling; at or above target it decays
/// toward the floor, faster than it climbs. The result is always clamped
/// to `[max, max * max_multiplier]`.
pub fn update_elastic_limit(
    current_limit: u64,
    average_usage: u64,
    params: &ElasticLimitParameters,
) -> Result<u64, ChainError> {
    let result = if average_usage < params.target {
        (current_limit * params.expand_rate)?
    } else {
        (current_limit * params.contract_rate)?
    };
    Ok(result.clamp(params.max, params.max * params.max_multiplier as u64))
}

impl ChainbaseObject for ResourceLimitsState {
    type PrimaryKey = u64;

    fn primary_key(&self) -> Vec<u8> {
        ResourceLimitsState::primary_key_to_bytes(0)
    }

    fn primary_key_to_bytes(key: Self::PrimaryKey) -> Vec<u8> {
        key.to_be_bytes().to_vec()
    }

    fn primary_key_from_bytes(bytes: &[u8]) -> Result<Self::PrimaryKey, ReadError> {
        let arr: [u8; 8] = bytes.try_into().map_err(|_| ReadError::NotEnoughBytes)?;
        Ok(u64::from_be_bytes(arr))
    }

    fn table_name() -> &'static str {
        "resource_limits_state"
    }

    fn secondary_indexes(&self) -> Vec<SecondaryKey> {
        vec![]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::utils::Ratio;

    fn params() -> ElasticLimitParameters {
        ElasticLimitParameters {
            target: 50_000,
            max: 100_000,
            periods: 120,
            max_multiplier: 1000,
            contract_rate: Ratio::new(99, 100),
            expand_rate: Ratio::new(1000, 999),
        }
    }

    #[test]
    fn idle_step_expands_exactly() {
        let params = params();
        assert_eq!(update_elastic_limit(100_000, 0, &params).unwrap(), 100_100);
    }

    #[test]
    fn congested_step_contracts_exactly() {
        let params = params();
        // 2x target; one step of 99/100, still above the floor
        assert_eq!(
            update_elastic_limit(102_030, 100_000, &params).unwrap(),
            101_009
        );
    }

    #[test]
    fn contraction_clamps_at_the_floor() {
        let params = params();
        assert_eq!(
            update_elastic_limit(100_100, 100_000, &params).unwrap(),
            100_000
        );
    }

    #[test]
    fn usage_exactly_at_target_contracts() {
        let params = params();
        assert_eq!(
            update_elastic_limit(200_000, 50_000, &params).unwrap(),
            198_000
        );
    }

    #[test]
    fn limit_stays_inside_the_band_and_converges() {
        let params = params();
        let ceiling = params.max * params.max_multiplier as u64;

        // idle from the floor: strictly increasing until the ceiling
        let mut limit = params.max;
        let mut steps = 0u32;
        while limit < ceiling {
            let next = update_elastic_limit(limit, 0, &params).unwrap();
            assert!(next > limit);
            assert!(next >= params.max && next <= ceiling);
            limit = next;
            steps += 1;
            assert!(steps < 20_000, "relaxation failed to reach the ceiling");
        }
        assert_eq!(limit, ceiling);

        // congested from the ceiling: strictly decreasing until the floor
        let mut steps = 0u32;
        while limit > params.max {
            let next = update_elastic_limit(limit, params.target, &params).unwrap();
            assert!(next < limit);
            assert!(next >= params.max && next <= ceiling);
            limit = next;
            steps += 1;
            assert!(steps < 2_000, "contraction failed to reach the floor");
        }
        assert_eq!(limit, params.max);
    }
}
