mod usage_accumulator;
pub use usage_accumulator::{Ratio, UsageAccumulator, integer_divide_ceil};

use embervm_chainbase::{ChainbaseObject, Database};

use crate::chain::error::ChainError;

#[inline]
pub fn chain_assert<T>(condition: bool, error: T) -> Result<(), T> {
    if condition { Ok(()) } else { Err(error) }
}

/// Open the partitions backing `T` so every node creates them in the same
/// order before any session touches them.
pub fn prepare_db_object<T: ChainbaseObject>(db: &Database) -> Result<(), ChainError> {
    db.prepare::<T>()
        .map_err(|e| ChainError::DatabaseError(e.to_string()))?;
    Ok(())
}
