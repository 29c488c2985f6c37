//! Pipeline steps for the App and Catalog controllers

pub mod app;
pub mod catalog;
pub mod legacy_finalizer;
