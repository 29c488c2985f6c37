//! Builders and projections between the operator's resources and the objects it manages

pub mod chart;
pub mod helm_repository;
pub mod secrets;
pub mod status;
pub mod values;
