//! Prometheus metrics for the App Operator
//!
//! This module exposes metrics for monitoring operator health and performance.

pub mod prometheus;

pub use prometheus::*;
