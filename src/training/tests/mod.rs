//! Cross-module test suite
//!
//! Covers the robust losses end to end and the data pipeline from on-disk
//! fixtures through partitions to loader batches.

// Test modules
pub mod data_tests;

// Utility modules for testing
pub mod test_utils;
