//! Core fitting components for the apex-fit library
//!
//! This module contains the problem side of a fit:
//! - Parameter vectors with fixed flags
//! - Model functions and datasets
//! - Fit tasks binding both to a fitter and estimating parameter errors

pub mod fit_task;
pub mod model;
pub mod parameters;

pub use fit_task::{DifferenceStep, FitTask};
pub use model::{Dataset, MAX_POSITIONAL_PARAMS, ModelFunction, PointXY};
pub use parameters::ParameterVector;
