//! Giant Swarm App Operator
//!
//! Reconciles `App` and `Catalog` resources in a management cluster. Apps are
//! installed as `Chart` resources into the workload clusters they target, and
//! Chart status flows back onto the App. Catalogs are mirrored as Flux
//! `HelmRepository` objects.

pub mod adapters;
pub mod backoff;
pub mod clients;
pub mod config;
pub mod controllers;
pub mod crd;
pub mod error;
pub mod metrics;
pub mod pipeline;
pub mod reconcilers;
pub mod store;
pub mod watcher;

pub use error::{Error, Result};
