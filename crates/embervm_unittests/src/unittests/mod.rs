mod resource_limits_tests;
mod state_history_tests;
