mod account_limits;
pub use account_limits::{AccountLimits, AccountLimitsByOwnerIndex};

mod account_resource_limit;
pub use account_resource_limit::AccountResourceLimit;

mod account_usage;
pub use account_usage::AccountUsage;

mod elastic_limit_parameters;
pub use elastic_limit_parameters::ElasticLimitParameters;

mod quota;
pub use quota::Quota;

mod ram_usage;
pub use ram_usage::RamUsage;

mod resource_limits_config;
pub use resource_limits_config::ResourceLimitsConfig;

mod resource_limits_state;
pub use resource_limits_state::{ResourceLimitsState, update_elastic_limit};
