pub mod chain;
pub mod state_history;
