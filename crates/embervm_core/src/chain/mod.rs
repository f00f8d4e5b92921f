pub mod config;

pub mod error;

mod name;
pub use name::{Name, ParseNameError};

pub mod utils;
pub use utils::{Ratio, UsageAccumulator};

pub mod resource;

mod resource_limits;
pub use resource_limits::ResourceLimitsManager;

mod snapshot;
pub use snapshot::{SnapshotReader, SnapshotWriter};
