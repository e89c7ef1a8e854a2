//! Fit tasks: a model function and its data bound to a [`Fitter`].
//!
//! The task turns the model into an [`Objective`] for the fitter. Residuals
//! come straight from the model; the Jacobian over the free parameters comes
//! from the model's analytic derivative when it has one and from symmetric
//! finite differences otherwise. After a fit the task estimates parameter
//! uncertainties from the covariance matrix `(JᵗJ)⁻¹`.

use nalgebra::{DMatrix, DVector};
use tracing::debug;

use crate::core::model::{Dataset, ModelFunction};
use crate::error::{FitError, FitResult};
use crate::linalg::{create_linear_solver, invert_normal_matrix};
use crate::optimizer::{Converged, Fitter, Linearization, Objective};

/// Step sizes for the finite-difference Jacobian
///
/// Parameter `p` is perturbed by `h = max(|p|·relative, absolute)`, or by
/// `absolute` when `p` is exactly zero.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DifferenceStep {
    pub relative: f64,
    pub absolute: f64,
}

impl Default for DifferenceStep {
    fn default() -> Self {
        Self {
            relative: 1e-5,
            absolute: 1e-9,
        }
    }
}

impl DifferenceStep {
    pub fn new(relative: f64, absolute: f64) -> Self {
        Self { relative, absolute }
    }

    /// Step used for a parameter with value `p`
    pub fn step_for(&self, p: f64) -> f64 {
        if p == 0.0 {
            self.absolute
        } else {
            (p.abs() * self.relative).max(self.absolute)
        }
    }

    fn validate(&self) -> FitResult<()> {
        if self.relative.is_finite()
            && self.relative >= 0.0
            && self.absolute.is_finite()
            && self.absolute > 0.0
        {
            Ok(())
        } else {
            Err(FitError::InvalidInput(format!(
                "difference steps must be finite with a positive absolute step, got {self:?}"
            )))
        }
    }
}

/// A model function and dataset bound to the fitter that fits them
#[derive(Debug)]
pub struct FitTask<'a> {
    model: ModelFunction<'a>,
    dataset: Dataset<'a>,
    fitter: Fitter,
    difference_step: DifferenceStep,
}

impl<'a> FitTask<'a> {
    /// Bind `model` and `dataset` to a new fitter with the default configuration
    pub fn new(model: ModelFunction<'a>, dataset: Dataset<'a>) -> FitResult<Self> {
        check_model(&model, &dataset)?;
        let fitter = Fitter::new(model.n_params())?;
        Ok(Self {
            model,
            dataset,
            fitter,
            difference_step: DifferenceStep::default(),
        })
    }

    /// Bind `model` and `dataset` to an existing fitter
    pub fn with_fitter(
        model: ModelFunction<'a>,
        dataset: Dataset<'a>,
        fitter: Fitter,
    ) -> FitResult<Self> {
        check_model(&model, &dataset)?;
        if fitter.n_params() != model.n_params() {
            return Err(FitError::InvalidInput(format!(
                "fitter has {} parameters but the model needs {}",
                fitter.n_params(),
                model.n_params()
            )));
        }
        Ok(Self {
            model,
            dataset,
            fitter,
            difference_step: DifferenceStep::default(),
        })
    }

    pub fn with_difference_step(mut self, difference_step: DifferenceStep) -> FitResult<Self> {
        difference_step.validate()?;
        self.difference_step = difference_step;
        Ok(self)
    }

    pub fn difference_step(&self) -> DifferenceStep {
        self.difference_step
    }

    pub fn model(&self) -> &ModelFunction<'a> {
        &self.model
    }

    pub fn dataset(&self) -> Dataset<'a> {
        self.dataset
    }

    pub fn n_params(&self) -> usize {
        self.model.n_params()
    }

    pub fn n_data(&self) -> usize {
        self.dataset.len()
    }

    pub fn n_free(&self) -> usize {
        self.fitter.parameters().n_free()
    }

    pub fn fitter(&self) -> &Fitter {
        &self.fitter
    }

    pub fn fitter_mut(&mut self) -> &mut Fitter {
        &mut self.fitter
    }

    pub fn into_fitter(self) -> Fitter {
        self.fitter
    }

    pub fn set_fixed_param(&mut self, index: usize, fixed: bool) -> FitResult<()> {
        self.fitter.set_fixed(index, fixed)
    }

    pub fn fixed_param(&self, index: usize) -> FitResult<bool> {
        if index >= self.n_params() {
            return Err(FitError::InvalidInput(format!(
                "parameter index {index} out of range for {} parameters",
                self.n_params()
            )));
        }
        Ok(self.fitter.is_fixed(index))
    }

    pub fn set_fixed_params(&mut self, fixed: &[bool]) -> FitResult<()> {
        self.fitter.set_fixed_mask(fixed)
    }

    pub fn fixed_params(&self) -> Vec<bool> {
        self.fitter.fixed_mask()
    }

    /// Sum of squared residuals at the fitter's current parameters
    pub fn eval_residuum(&mut self) -> FitResult<f64> {
        self.fitter.get_params()?;
        if self.dataset.is_empty() {
            return Err(FitError::ResiduumUnavailable);
        }
        let mut objective = TaskObjective {
            model: &self.model,
            dataset: self.dataset,
            difference_step: self.difference_step,
        };
        self.fitter.eval_residuum(&mut objective)
    }

    /// Fit the model, starting from the fitter's current parameters
    pub fn fit(&mut self) -> FitResult<Converged> {
        self.fitter.get_params()?;
        if self.n_free() == 0 {
            return Err(FitError::FixedAllParams);
        }
        if self.dataset.is_empty() {
            return Err(FitError::ResiduumUnavailable);
        }
        debug!(
            model = self.model.kind(),
            n_data = self.n_data(),
            n_free = self.n_free(),
            "fitting"
        );
        let mut objective = TaskObjective {
            model: &self.model,
            dataset: self.dataset,
            difference_step: self.difference_step,
        };
        self.fitter.fit(&mut objective)
    }

    /// Standard errors of all parameters at the current point
    ///
    /// `err_j = sqrt(C_jj)`, multiplied by `sqrt(f / (ndata - nfree))` when
    /// `scale_by_variance` is set. Fixed parameters get exactly `0.0`.
    pub fn param_errors(&self, scale_by_variance: bool, out: &mut [f64]) -> FitResult<()> {
        if out.len() != self.n_params() {
            return Err(FitError::InvalidInput(format!(
                "expected an output slice of {} errors, got {}",
                self.n_params(),
                out.len()
            )));
        }
        let covariance = self.covariance_matrix(scale_by_variance)?;
        for (j, err) in out.iter_mut().enumerate() {
            *err = covariance[(j, j)].sqrt();
        }
        Ok(())
    }

    /// Covariance matrix of all parameters; rows and columns of fixed ones are zero
    pub fn covariance_matrix(&self, scale_by_variance: bool) -> FitResult<DMatrix<f64>> {
        let estimate = self.estimate_covariance()?;
        let factor = if scale_by_variance {
            estimate.residual_variance
        } else {
            1.0
        };

        let n = self.n_params();
        let mut full = DMatrix::zeros(n, n);
        for (k, &j) in estimate.free.iter().enumerate() {
            for (l, &i) in estimate.free.iter().enumerate() {
                full[(j, i)] = factor * estimate.covariance[(k, l)];
            }
        }
        Ok(full)
    }

    /// Correlation coefficients `C_jk / sqrt(C_jj·C_kk)`; zero for fixed parameters
    pub fn correlation_matrix(&self) -> FitResult<DMatrix<f64>> {
        let covariance = self.covariance_matrix(false)?;
        let n = covariance.nrows();
        Ok(DMatrix::from_fn(n, n, |j, k| {
            let norm = (covariance[(j, j)] * covariance[(k, k)]).sqrt();
            if norm > 0.0 {
                covariance[(j, k)] / norm
            } else {
                0.0
            }
        }))
    }

    /// Residuum per degree of freedom, `f / (ndata - nfree)`
    pub fn residual_variance(&self) -> FitResult<f64> {
        let params = self.fitter.get_params()?;
        let dof = self.degrees_of_freedom()?;
        let mut objective = self.objective();
        let f = objective.residuum(params).ok_or(FitError::InvalidModel)?;
        Ok(f / dof as f64)
    }

    fn degrees_of_freedom(&self) -> FitResult<usize> {
        let (n_data, n_free) = (self.n_data(), self.n_free());
        if n_free == 0 {
            return Err(FitError::FixedAllParams);
        }
        if n_data <= n_free {
            return Err(FitError::DegenerateJacobian);
        }
        Ok(n_data - n_free)
    }

    fn estimate_covariance(&self) -> FitResult<CovarianceEstimate> {
        let params = self.fitter.get_params()?;
        let dof = self.degrees_of_freedom()?;
        let free = self.fitter.free_indices();

        let mut objective = self.objective();
        let linearization = objective
            .linearize(params, &free)
            .ok_or(FitError::InvalidModel)?;
        let (normal, _) = linearization.normal_equations();
        let mut solver = create_linear_solver(self.fitter.config().linear_solver_type);
        let covariance = invert_normal_matrix(solver.as_mut(), &normal)?;
        if covariance.diagonal().iter().any(|c| *c < 0.0) {
            return Err(FitError::DegenerateJacobian);
        }

        Ok(CovarianceEstimate {
            free,
            covariance,
            residual_variance: linearization.residuum() / dof as f64,
        })
    }

    fn objective(&self) -> TaskObjective<'_, 'a> {
        TaskObjective {
            model: &self.model,
            dataset: self.dataset,
            difference_step: self.difference_step,
        }
    }
}

struct CovarianceEstimate {
    free: Vec<usize>,
    covariance: DMatrix<f64>,
    residual_variance: f64,
}

fn check_model(model: &ModelFunction<'_>, dataset: &Dataset<'_>) -> FitResult<()> {
    if !model.accepts(dataset) {
        return Err(FitError::InvalidInput(format!(
            "a {} model cannot be fitted to {} data",
            model.kind(),
            match dataset {
                Dataset::Points(_) => "point",
                Dataset::Indexed(_) => "indexed",
            }
        )));
    }
    let n_params = model.n_params();
    if n_params == 0 || n_params > model.max_params() {
        return Err(FitError::InvalidInput(format!(
            "a {} model takes between 1 and {} parameters, got {n_params}",
            model.kind(),
            model.max_params()
        )));
    }
    Ok(())
}

/// The residuals and Jacobian of a fit task, as seen by the fitter
struct TaskObjective<'t, 'a> {
    model: &'t ModelFunction<'a>,
    dataset: Dataset<'a>,
    difference_step: DifferenceStep,
}

impl TaskObjective<'_, '_> {
    fn residuals(&self, params: &[f64]) -> Option<DVector<f64>> {
        let n = self.dataset.len();
        let mut residuals = DVector::zeros(n);
        for i in 0..n {
            residuals[i] = self.model.residual(&self.dataset, i, params)?;
        }
        Some(residuals)
    }

    fn analytic_jacobian(&self, params: &[f64], free: &[usize]) -> Option<DMatrix<f64>> {
        let derivative = self.model.derivative()?;
        let n = self.dataset.len();
        let mut row = vec![0.0; params.len()];
        let mut jacobian = DMatrix::zeros(n, free.len());
        for i in 0..n {
            row.fill(0.0);
            derivative(i, params, &mut row)?;
            for (k, &j) in free.iter().enumerate() {
                jacobian[(i, k)] = row[j];
            }
        }
        Some(jacobian)
    }

    fn difference_jacobian(&self, params: &[f64], free: &[usize]) -> Option<DMatrix<f64>> {
        let n = self.dataset.len();
        let mut jacobian = DMatrix::zeros(n, free.len());
        let mut shifted = params.to_vec();
        for (k, &j) in free.iter().enumerate() {
            let h = self.difference_step.step_for(params[j]);
            for i in 0..n {
                shifted[j] = params[j] - h;
                let minus = self.model.residual(&self.dataset, i, &shifted)?;
                shifted[j] = params[j] + h;
                let plus = self.model.residual(&self.dataset, i, &shifted)?;
                jacobian[(i, k)] = (plus - minus) / (2.0 * h);
            }
            shifted[j] = params[j];
        }
        Some(jacobian)
    }
}

impl Objective for TaskObjective<'_, '_> {
    fn residuum(&mut self, params: &[f64]) -> Option<f64> {
        let mut sum = 0.0;
        for i in 0..self.dataset.len() {
            let r = self.model.residual(&self.dataset, i, params)?;
            sum += r * r;
        }
        Some(sum)
    }

    fn linearize(&mut self, params: &[f64], free: &[usize]) -> Option<Linearization> {
        let residuals = self.residuals(params)?;
        let jacobian = if self.model.derivative().is_some() {
            self.analytic_jacobian(params, free)?
        } else {
            self.difference_jacobian(params, free)?
        };
        Some(Linearization::new(residuals, jacobian))
    }
}
