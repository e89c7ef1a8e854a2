//! Levenberg-Marquardt curve fitting.
//!
//! A [`Fitter`] minimizes a sum of squared residuals; a [`FitTask`] supplies
//! those residuals from a [`ModelFunction`] and its [`Dataset`], keeps chosen
//! parameters fixed and estimates parameter errors after the fit.
//!
//! ```no_run
//! use apex_fit::{Dataset, FitTask, ModelFunction, PointXY};
//!
//! # fn main() -> apex_fit::FitResult<()> {
//! let points: Vec<PointXY> = (0..20)
//!     .map(|i| PointXY::new(i as f64, 3.0 * (-0.2 * i as f64).exp()))
//!     .collect();
//! let model = ModelFunction::point(2, |x, p| Some(p[0] * (-p[1] * x).exp()));
//!
//! let mut task = FitTask::new(model, Dataset::Points(&points))?;
//! task.fitter_mut().set_params(&[1.0, 0.1])?;
//! task.fit()?;
//!
//! let mut errors = [0.0; 2];
//! task.param_errors(true, &mut errors)?;
//! println!("{:?} ± {:?}", task.fitter().get_params()?, errors);
//! # Ok(())
//! # }
//! ```

pub mod core;
pub mod error;
pub mod linalg;
pub mod logger;
pub mod optimizer;

pub use crate::core::{Dataset, DifferenceStep, FitTask, ModelFunction, ParameterVector, PointXY};
pub use error::{FitError, FitResult};
pub use linalg::{LinAlgError, LinearSolverType};
pub use logger::{init_logger, init_logger_with_level};
pub use optimizer::{
    ConvergenceReason, Converged, FitStatus, FitSummary, Fitter, FitterConfig, FnObjective,
    Linearization, Objective,
};
