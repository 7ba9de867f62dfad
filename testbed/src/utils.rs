/// Loading component configs from YAML files.
pub mod config;
/// Structured logging setup shared by the binaries.
pub mod logging;
/// Helpers for locating test fixtures.
pub mod tests;
