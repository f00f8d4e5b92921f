use serde::Serialize;

/// Read model returned by the per-account capacity queries.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct AccountResourceLimit {
    /// quantity used in the current window
    pub used: u64,
    /// quantity still available under current congestion
    pub available: u64,
    /// max per window under current congestion
    pub max: u64,
}

impl AccountResourceLimit {
    pub fn new(used: u64, available: u64, max: u64) -> Self {
        Self {
            used,
            available,
            max,
        }
    }
}
