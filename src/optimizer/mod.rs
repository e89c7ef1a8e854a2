//! Nonlinear least-squares optimization.
//!
//! The [`Fitter`] runs Levenberg-Marquardt iterations against anything that
//! implements [`Objective`]: it asks for the residuum at trial parameters and
//! for residuals plus Jacobian at accepted ones. It knows nothing about data or
//! model functions; [`crate::core::FitTask`] provides the objective for those.

use nalgebra::{DMatrix, DVector};
use std::fmt;

use crate::error::FitError;

pub mod levenberg_marquardt;

pub use levenberg_marquardt::{FitSummary, Fitter, FitterConfig};

/// Residuals and Jacobian at one parameter vector
#[derive(Debug, Clone, PartialEq)]
pub struct Linearization {
    /// One residual per data item
    pub residuals: DVector<f64>,
    /// `ndata × nfree`, columns ordered like the free indices
    pub jacobian: DMatrix<f64>,
}

impl Linearization {
    pub fn new(residuals: DVector<f64>, jacobian: DMatrix<f64>) -> Self {
        Linearization {
            residuals,
            jacobian,
        }
    }

    /// Sum of squared residuals
    pub fn residuum(&self) -> f64 {
        self.residuals.norm_squared()
    }

    /// `JᵗJ` and `Jᵗr`
    pub fn normal_equations(&self) -> (DMatrix<f64>, DVector<f64>) {
        let jt = self.jacobian.transpose();
        (&jt * &self.jacobian, &jt * &self.residuals)
    }

    pub(crate) fn is_consistent(&self, n_free: usize) -> bool {
        self.jacobian.nrows() == self.residuals.len()
            && self.jacobian.ncols() == n_free
            && self.residuals.iter().all(|v| v.is_finite())
            && self.jacobian.iter().all(|v| v.is_finite())
    }
}

/// What the fitter needs to know about the problem
///
/// `None` from either method means the model is undefined at `params`.
pub trait Objective {
    /// Sum of squared residuals at `params`
    fn residuum(&mut self, params: &[f64]) -> Option<f64>;

    /// Residuals and the Jacobian with respect to the parameters listed in `free`
    fn linearize(&mut self, params: &[f64], free: &[usize]) -> Option<Linearization>;
}

/// Objective defined by a single closure returning the linearization
pub struct FnObjective<F> {
    function: F,
}

impl<F> FnObjective<F>
where
    F: FnMut(&[f64], &[usize]) -> Option<Linearization>,
{
    pub fn new(function: F) -> Self {
        FnObjective { function }
    }
}

impl<F> Objective for FnObjective<F>
where
    F: FnMut(&[f64], &[usize]) -> Option<Linearization>,
{
    fn residuum(&mut self, params: &[f64]) -> Option<f64> {
        (self.function)(params, &[]).map(|lin| lin.residuum())
    }

    fn linearize(&mut self, params: &[f64], free: &[usize]) -> Option<Linearization> {
        (self.function)(params, free)
    }
}

/// Why a fit was declared converged
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConvergenceReason {
    /// Several accepted steps in a row barely improved the residuum
    ResiduumStalled,
    /// An accepted step was small compared to the parameter uncertainties
    NegligibleStep,
    /// No step decreased the residuum and the proposed step was negligible
    Stationary,
}

impl fmt::Display for ConvergenceReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConvergenceReason::ResiduumStalled => write!(f, "Residuum change tolerance reached"),
            ConvergenceReason::NegligibleStep => write!(f, "Parameter change tolerance reached"),
            ConvergenceReason::Stationary => write!(f, "Stationary point reached"),
        }
    }
}

/// Successful outcome of [`Fitter::fit`]
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Converged {
    pub reason: ConvergenceReason,
    /// Jacobian evaluations performed
    pub iterations: u32,
    /// Final sum of squared residuals
    pub residuum: f64,
}

/// State of a fitter with respect to its last fit
#[derive(Debug, Clone, PartialEq, Default)]
pub enum FitStatus {
    #[default]
    NotStarted,
    Converged(ConvergenceReason),
    Failed(FitError),
}

impl FitStatus {
    pub fn is_converged(&self) -> bool {
        matches!(self, FitStatus::Converged(_))
    }
}

impl fmt::Display for FitStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FitStatus::NotStarted => write!(f, "Not started"),
            FitStatus::Converged(reason) => write!(f, "Converged: {reason}"),
            FitStatus::Failed(err) => write!(f, "Failed: {err}"),
        }
    }
}
