//! Vancomycin pharmacokinetics forecasting library
//!
//! This library provides a one-compartment vancomycin model whose elimination
//! follows the patient's creatinine trajectory, a grid-search Bayesian fit of
//! the individual elimination multiplier against measured levels, and a
//! regimen advisor targeting a 24-hour AUC.

pub mod models;
pub mod creatinine;
pub mod parameters;
pub mod dosing;
pub mod auc;
pub mod simulation;
pub mod fitting;
pub mod advisor;
pub mod parser;
pub mod output;
pub mod example_data;
pub mod errors;

pub use models::*;
pub use simulation::*;
pub use errors::*;

/// Re-export commonly used types
pub type Result<T> = std::result::Result<T, VancoError>;
