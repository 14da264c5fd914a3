//! Common test utilities and helpers

#![allow(dead_code)] // Test utilities may not all be used in every test file

pub mod builders;
pub mod mock_helpers;

use x2cscope::config::ResolverConfig;

/// Resolver settings that never reach for the external dump tool
pub fn native_only() -> ResolverConfig {
    let mut config = ResolverConfig::default();
    config.legacy_dump.enabled = false;
    config
}

/// Assert two floats are approximately equal
pub fn assert_float_eq(a: f64, b: f64, epsilon: f64) {
    assert!(
        (a - b).abs() < epsilon,
        "Expected {} to be approximately equal to {} (epsilon: {})",
        a,
        b,
        epsilon
    );
}
