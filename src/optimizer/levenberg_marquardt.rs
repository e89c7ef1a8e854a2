//! Levenberg-Marquardt algorithm implementation.
//!
//! The Levenberg-Marquardt algorithm interpolates between the Gauss-Newton
//! algorithm and gradient descent by adding a damping parameter λ to the
//! normal equations.
//!
//! This implementation includes:
//! - Diagonal scaling of the normal matrix, so λ acts relative to `diag(JᵗJ)`
//! - Multiplicative damping updates with an upper bound
//! - Convergence on stalled residuum or on steps negligible against the
//!   parameter uncertainties
//! - Fit summaries for logging and inspection

use std::fmt;
use std::time::{Duration, Instant};

use nalgebra::{DMatrix, DVector};
use tracing::{debug, info, trace};

use crate::core::ParameterVector;
use crate::error::{FitError, FitResult};
use crate::linalg::{DenseLinearSolver, LinearSolverType, create_linear_solver, invert_normal_matrix};
use crate::optimizer::{ConvergenceReason, Converged, FitStatus, Linearization, Objective};

/// Tunable settings of a [`Fitter`]
#[derive(Debug, Clone, PartialEq)]
pub struct FitterConfig {
    /// Maximum number of Jacobian evaluations
    pub max_iters: u32,
    /// Consecutive accepted steps with negligible improvement that end the fit
    pub successes_to_get_bored: u32,
    /// Damping at the start of each fit
    pub lambda_start: f64,
    /// Factor applied to λ after a rejected step
    pub lambda_increase: f64,
    /// Divisor applied to λ after an accepted step
    pub lambda_decrease: f64,
    /// The fit fails once λ exceeds this
    pub lambda_max: f64,
    /// Relative residuum improvement below which a step counts as negligible
    pub min_residuum_change: f64,
    /// Step size, relative to the parameter uncertainty, that counts as negligible
    pub min_param_change: f64,
    /// Decomposition used for the normal equations
    pub linear_solver_type: LinearSolverType,
    /// Wall-clock limit for one fit
    pub timeout: Option<Duration>,
    /// Log a summary at INFO level when a fit ends
    pub verbose: bool,
}

impl Default for FitterConfig {
    fn default() -> Self {
        Self {
            max_iters: 100,
            successes_to_get_bored: 5,
            lambda_start: 1.0,
            lambda_increase: 10.0,
            lambda_decrease: 4.0,
            lambda_max: 1e6,
            min_residuum_change: 1e-6,
            min_param_change: 1e-4,
            linear_solver_type: LinearSolverType::default(),
            timeout: None,
            verbose: false,
        }
    }
}

impl FitterConfig {
    /// Create a new configuration with default values
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_iters(mut self, max_iters: u32) -> Self {
        self.max_iters = max_iters;
        self
    }

    pub fn with_successes_to_get_bored(mut self, successes: u32) -> Self {
        self.successes_to_get_bored = successes;
        self
    }

    pub fn with_lambda_start(mut self, lambda_start: f64) -> Self {
        self.lambda_start = lambda_start;
        self
    }

    /// Set the damping adjustment factors
    pub fn with_lambda_factors(mut self, increase: f64, decrease: f64) -> Self {
        self.lambda_increase = increase;
        self.lambda_decrease = decrease;
        self
    }

    pub fn with_lambda_max(mut self, lambda_max: f64) -> Self {
        self.lambda_max = lambda_max;
        self
    }

    pub fn with_min_residuum_change(mut self, min_residuum_change: f64) -> Self {
        self.min_residuum_change = min_residuum_change;
        self
    }

    pub fn with_min_param_change(mut self, min_param_change: f64) -> Self {
        self.min_param_change = min_param_change;
        self
    }

    /// Set the linear solver type
    pub fn with_linear_solver_type(mut self, linear_solver_type: LinearSolverType) -> Self {
        self.linear_solver_type = linear_solver_type;
        self
    }

    /// Set the timeout duration
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Enable or disable the summary log
    pub fn with_verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    /// Reject settings the damping loop cannot work with
    pub fn validate(&self) -> FitResult<()> {
        let positive = |name: &str, value: f64| {
            if value.is_finite() && value > 0.0 {
                Ok(())
            } else {
                Err(FitError::InvalidInput(format!(
                    "{name} must be positive and finite, got {value}"
                )))
            }
        };
        if self.successes_to_get_bored == 0 {
            return Err(FitError::InvalidInput(
                "successes_to_get_bored must be at least 1".to_string(),
            ));
        }
        positive("lambda_start", self.lambda_start)?;
        positive("lambda_max", self.lambda_max)?;
        if !(self.lambda_increase.is_finite() && self.lambda_increase > 1.0) {
            return Err(FitError::InvalidInput(format!(
                "lambda_increase must be greater than 1, got {}",
                self.lambda_increase
            )));
        }
        if !(self.lambda_decrease.is_finite() && self.lambda_decrease > 1.0) {
            return Err(FitError::InvalidInput(format!(
                "lambda_decrease must be greater than 1, got {}",
                self.lambda_decrease
            )));
        }
        Ok(())
    }
}

impl fmt::Display for FitterConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "FitterConfig {{ max_iters: {}, successes_to_get_bored: {}, lambda_start: {:e}, lambda_increase: {}, lambda_decrease: {}, lambda_max: {:e}, min_residuum_change: {:e}, min_param_change: {:e}, linear_solver: {}, timeout: {:?}, verbose: {} }}",
            self.max_iters,
            self.successes_to_get_bored,
            self.lambda_start,
            self.lambda_increase,
            self.lambda_decrease,
            self.lambda_max,
            self.min_residuum_change,
            self.min_param_change,
            self.linear_solver_type,
            self.timeout,
            self.verbose
        )
    }
}

/// Summary statistics of one [`Fitter::fit`] call
#[derive(Debug, Clone)]
pub struct FitSummary {
    /// Residuum at the starting parameters
    pub initial_residuum: f64,
    /// Residuum at the best parameters found
    pub final_residuum: f64,
    /// Jacobian evaluations performed
    pub iterations: u32,
    /// Number of accepted steps (residuum decreased)
    pub successful_steps: usize,
    /// Number of rejected steps (damping increased)
    pub unsuccessful_steps: usize,
    /// Damping when the fit ended
    pub final_lambda: f64,
    /// How the fit ended
    pub status: FitStatus,
    /// Total time elapsed
    pub total_time: Duration,
}

impl fmt::Display for FitSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let steps = (self.successful_steps + self.unsuccessful_steps).max(1) as f64;
        writeln!(f, "=== Levenberg-Marquardt Fit Summary ===")?;
        writeln!(f, "Status:                    {}", self.status)?;
        writeln!(f, "Initial residuum:          {:.6e}", self.initial_residuum)?;
        writeln!(f, "Final residuum:            {:.6e}", self.final_residuum)?;
        writeln!(
            f,
            "Residuum reduction:        {:.6e} ({:.2}%)",
            self.initial_residuum - self.final_residuum,
            100.0 * (self.initial_residuum - self.final_residuum)
                / self.initial_residuum.max(1e-300)
        )?;
        writeln!(f, "Total iterations:          {}", self.iterations)?;
        writeln!(
            f,
            "Successful steps:          {} ({:.1}%)",
            self.successful_steps,
            100.0 * self.successful_steps as f64 / steps
        )?;
        writeln!(
            f,
            "Unsuccessful steps:        {} ({:.1}%)",
            self.unsuccessful_steps,
            100.0 * self.unsuccessful_steps as f64 / steps
        )?;
        writeln!(f, "Final damping parameter:   {:.6e}", self.final_lambda)?;
        writeln!(f, "Total time:                {:?}", self.total_time)?;
        Ok(())
    }
}

/// Normal equations of one linearization, scaled to a unit diagonal
struct ScaledSystem {
    /// `JᵗJ`, kept for the uncertainty estimate
    normal: DMatrix<f64>,
    scaled_normal: DMatrix<f64>,
    scaled_gradient: DVector<f64>,
    scale: DVector<f64>,
    /// `(JᵗJ)⁻¹`, computed when first needed; `None` inside if inversion failed
    covariance: Option<Option<DMatrix<f64>>>,
}

impl ScaledSystem {
    fn new(linearization: &Linearization) -> Self {
        let (normal, gradient) = linearization.normal_equations();
        let n = normal.nrows();
        let scale = DVector::from_fn(n, |j, _| {
            let a = normal[(j, j)];
            if a > 0.0 { a.sqrt() } else { 1.0 }
        });
        let mut scaled_normal = DMatrix::from_fn(n, n, |j, k| normal[(j, k)] / (scale[j] * scale[k]));
        // Parameters without influence keep a unit diagonal too
        scaled_normal.fill_diagonal(1.0);
        let scaled_gradient = gradient.component_div(&scale);

        ScaledSystem {
            normal,
            scaled_normal,
            scaled_gradient,
            scale,
            covariance: None,
        }
    }

    /// Solve `(Hs + λI) s = g/d` and unscale, giving the step to subtract
    fn step(&self, solver: &mut dyn DenseLinearSolver, lambda: f64) -> FitResult<DVector<f64>> {
        let mut damped = self.scaled_normal.clone();
        for j in 0..damped.nrows() {
            damped[(j, j)] += lambda;
        }
        let scaled_step = solver.solve(&damped, &self.scaled_gradient)?;
        Ok(scaled_step.component_div(&self.scale))
    }

    /// Whether every component of `step` is below `min_change · sqrt(f · C_jj)`
    fn is_negligible(
        &mut self,
        solver: &mut dyn DenseLinearSolver,
        step: &DVector<f64>,
        residuum: f64,
        min_change: f64,
    ) -> bool {
        let covariance = self
            .covariance
            .get_or_insert_with(|| invert_normal_matrix(solver, &self.normal).ok());
        let Some(covariance) = covariance else {
            return false;
        };
        step.iter().enumerate().all(|(j, s)| {
            s.abs() <= min_change * (residuum * covariance[(j, j)].max(0.0)).sqrt()
        })
    }
}

/// Levenberg-Marquardt fitter
///
/// Holds the parameters being fitted together with their fixed flags and the
/// damping state; the problem itself is supplied to [`Fitter::fit`] as an
/// [`Objective`].
#[derive(Debug, Clone)]
pub struct Fitter {
    config: FitterConfig,
    params: ParameterVector,
    residuum: Option<f64>,
    lambda: f64,
    iterations: u32,
    status: FitStatus,
    summary: Option<FitSummary>,
}

impl Fitter {
    /// Create a fitter for `n_params` parameters with the default configuration
    pub fn new(n_params: usize) -> FitResult<Self> {
        Self::with_config(n_params, FitterConfig::default())
    }

    pub fn with_config(n_params: usize, config: FitterConfig) -> FitResult<Self> {
        check_n_params(n_params)?;
        Ok(Self {
            lambda: config.lambda_start,
            config,
            params: ParameterVector::new(n_params),
            residuum: None,
            iterations: 0,
            status: FitStatus::NotStarted,
            summary: None,
        })
    }

    pub fn config(&self) -> &FitterConfig {
        &self.config
    }

    pub fn config_mut(&mut self) -> &mut FitterConfig {
        &mut self.config
    }

    pub fn set_config(&mut self, config: FitterConfig) {
        self.config = config;
    }

    pub fn n_params(&self) -> usize {
        self.params.len()
    }

    /// Change the number of parameters; values, fixed flags and results are reset
    pub fn set_n_params(&mut self, n_params: usize) -> FitResult<()> {
        check_n_params(n_params)?;
        self.params.resize(n_params);
        self.reset_results();
        Ok(())
    }

    /// Set the starting parameters; the stored residuum no longer applies
    pub fn set_params(&mut self, values: &[f64]) -> FitResult<()> {
        self.params.set_values(values)?;
        self.reset_results();
        Ok(())
    }

    /// Current (best) parameters
    pub fn get_params(&self) -> FitResult<&[f64]> {
        self.params.values()
    }

    pub fn parameters(&self) -> &ParameterVector {
        &self.params
    }

    pub fn set_fixed(&mut self, index: usize, fixed: bool) -> FitResult<()> {
        self.params.set_fixed(index, fixed)
    }

    pub fn is_fixed(&self, index: usize) -> bool {
        self.params.is_fixed(index)
    }

    pub fn set_fixed_mask(&mut self, mask: &[bool]) -> FitResult<()> {
        self.params.set_fixed_mask(mask)
    }

    pub fn fixed_mask(&self) -> Vec<bool> {
        self.params.fixed_mask()
    }

    pub fn free_indices(&self) -> Vec<usize> {
        self.params.free_indices()
    }

    /// Residuum at the best parameters, from the last fit or explicit evaluation
    pub fn residuum(&self) -> FitResult<f64> {
        self.residuum.ok_or(FitError::ResiduumUnavailable)
    }

    /// Current damping parameter
    pub fn lambda(&self) -> f64 {
        self.lambda
    }

    /// Jacobian evaluations of the last fit
    pub fn iterations(&self) -> u32 {
        self.iterations
    }

    pub fn status(&self) -> &FitStatus {
        &self.status
    }

    pub fn summary(&self) -> Option<&FitSummary> {
        self.summary.as_ref()
    }

    /// Evaluate and store the residuum at the current parameters
    pub fn eval_residuum<O: Objective + ?Sized>(&mut self, objective: &mut O) -> FitResult<f64> {
        let params = self.params.values()?;
        match objective.residuum(params) {
            Some(f) if f.is_finite() => {
                self.residuum = Some(f);
                Ok(f)
            }
            _ => Err(FitError::InvalidModel),
        }
    }

    /// Run Levenberg-Marquardt iterations from the current parameters
    ///
    /// On failure the best parameters found so far are kept, so a caller can
    /// inspect them after `NotConverged` or `DegenerateJacobian`.
    pub fn fit<O: Objective + ?Sized>(&mut self, objective: &mut O) -> FitResult<Converged> {
        let start_time = Instant::now();
        self.iterations = 0;
        self.summary = None;
        self.lambda = self.config.lambda_start;

        let mut run = FitRun::default();
        let result = self.minimize(objective, &mut run, start_time);

        self.status = match &result {
            Ok(converged) => FitStatus::Converged(converged.reason),
            Err(err) => FitStatus::Failed(err.clone()),
        };
        if let Some(initial_residuum) = run.initial_residuum {
            let summary = FitSummary {
                initial_residuum,
                final_residuum: self.residuum.unwrap_or(initial_residuum),
                iterations: self.iterations,
                successful_steps: run.successful_steps,
                unsuccessful_steps: run.unsuccessful_steps,
                final_lambda: self.lambda,
                status: self.status.clone(),
                total_time: start_time.elapsed(),
            };
            if self.config.verbose {
                info!("{}", summary);
            }
            self.summary = Some(summary);
        }
        result
    }

    fn minimize<O: Objective + ?Sized>(
        &mut self,
        objective: &mut O,
        run: &mut FitRun,
        start_time: Instant,
    ) -> FitResult<Converged> {
        self.config.validate()?;
        let mut best = self.params.values()?.to_vec();
        let free = self.params.free_indices();
        if free.is_empty() {
            return Err(FitError::FixedAllParams);
        }

        let mut f_best = evaluate_residuum(objective, &best)?;
        self.residuum = Some(f_best);
        run.initial_residuum = Some(f_best);

        let mut solver = create_linear_solver(self.config.linear_solver_type);
        let mut streak = 0u32;

        debug!(
            n_free = free.len(),
            residuum = f_best,
            lambda = self.lambda,
            "starting Levenberg-Marquardt fit"
        );

        loop {
            if self.iterations >= self.config.max_iters || self.timed_out(start_time) {
                return Err(FitError::NotConverged {
                    iterations: self.iterations,
                });
            }

            let linearization = objective
                .linearize(&best, &free)
                .filter(|lin| lin.is_consistent(free.len()))
                .ok_or(FitError::InvalidModel)?;
            self.iterations += 1;
            let mut system = ScaledSystem::new(&linearization);

            // Increase damping until a step decreases the residuum
            loop {
                let step = system.step(solver.as_mut(), self.lambda)?;
                let mut trial = best.clone();
                for (k, &j) in free.iter().enumerate() {
                    trial[j] -= step[k];
                }
                let f_trial = evaluate_residuum(objective, &trial)?;
                let negligible = system.is_negligible(
                    solver.as_mut(),
                    &step,
                    f_best,
                    self.config.min_param_change,
                );

                if f_trial < f_best {
                    let improvement = if f_best > 0.0 {
                        1.0 - f_trial / f_best
                    } else {
                        0.0
                    };
                    best = trial;
                    f_best = f_trial;
                    self.params.update_values(&best)?;
                    self.residuum = Some(f_best);
                    self.lambda /= self.config.lambda_decrease;
                    run.successful_steps += 1;

                    let stalled = improvement < self.config.min_residuum_change;
                    if stalled {
                        streak += 1;
                    } else {
                        streak = 0;
                    }
                    debug!(
                        iteration = self.iterations,
                        residuum = f_best,
                        improvement,
                        lambda = self.lambda,
                        streak,
                        "step accepted"
                    );

                    if streak >= self.config.successes_to_get_bored {
                        return Ok(self.converged(ConvergenceReason::ResiduumStalled, f_best));
                    }
                    if stalled && negligible {
                        return Ok(self.converged(ConvergenceReason::NegligibleStep, f_best));
                    }
                    break;
                }

                run.unsuccessful_steps += 1;
                trace!(
                    iteration = self.iterations,
                    trial_residuum = f_trial,
                    lambda = self.lambda,
                    "step rejected"
                );
                if negligible {
                    return Ok(self.converged(ConvergenceReason::Stationary, f_best));
                }
                self.lambda *= self.config.lambda_increase;
                if self.lambda > self.config.lambda_max {
                    debug!(lambda = self.lambda, "damping saturated");
                    return Err(FitError::DegenerateJacobian);
                }
                if self.timed_out(start_time) {
                    return Err(FitError::NotConverged {
                        iterations: self.iterations,
                    });
                }
            }
        }
    }

    fn converged(&self, reason: ConvergenceReason, residuum: f64) -> Converged {
        debug!(iterations = self.iterations, residuum, %reason, "fit converged");
        Converged {
            reason,
            iterations: self.iterations,
            residuum,
        }
    }

    fn timed_out(&self, start_time: Instant) -> bool {
        self.config
            .timeout
            .is_some_and(|timeout| start_time.elapsed() >= timeout)
    }

    fn reset_results(&mut self) {
        self.residuum = None;
        self.iterations = 0;
        self.status = FitStatus::NotStarted;
        self.summary = None;
    }
}

/// Step bookkeeping of a single fit
#[derive(Debug, Default)]
struct FitRun {
    initial_residuum: Option<f64>,
    successful_steps: usize,
    unsuccessful_steps: usize,
}

fn evaluate_residuum<O: Objective + ?Sized>(objective: &mut O, params: &[f64]) -> FitResult<f64> {
    objective
        .residuum(params)
        .filter(|f| f.is_finite())
        .ok_or(FitError::InvalidModel)
}

fn check_n_params(n_params: usize) -> FitResult<()> {
    if n_params == 0 {
        return Err(FitError::InvalidInput(
            "a fitter needs at least one parameter".to_string(),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::optimizer::FnObjective;

    /// Exponential decay `y = a·exp(-k·t)` sampled without noise
    struct DecayProblem {
        t: Vec<f64>,
        y: Vec<f64>,
    }

    impl DecayProblem {
        fn new(a: f64, k: f64) -> Self {
            let t: Vec<f64> = (0..20).map(|i| i as f64 * 0.25).collect();
            let y = t.iter().map(|t| a * (-k * t).exp()).collect();
            Self { t, y }
        }

        fn residuals(&self, p: &[f64]) -> DVector<f64> {
            DVector::from_iterator(
                self.t.len(),
                self.t
                    .iter()
                    .zip(&self.y)
                    .map(|(t, y)| p[0] * (-p[1] * t).exp() - y),
            )
        }
    }

    impl Objective for DecayProblem {
        fn residuum(&mut self, params: &[f64]) -> Option<f64> {
            Some(self.residuals(params).norm_squared())
        }

        fn linearize(&mut self, params: &[f64], free: &[usize]) -> Option<Linearization> {
            let residuals = self.residuals(params);
            let jacobian = DMatrix::from_fn(self.t.len(), free.len(), |i, k| {
                let t = self.t[i];
                let e = (-params[1] * t).exp();
                match free[k] {
                    0 => e,
                    _ => -params[0] * t * e,
                }
            });
            Some(Linearization::new(residuals, jacobian))
        }
    }

    #[test]
    fn test_fitter_config_defaults() {
        let config = FitterConfig::default();
        assert_eq!(config.max_iters, 100);
        assert_eq!(config.successes_to_get_bored, 5);
        assert_eq!(config.lambda_start, 1.0);
        assert_eq!(config.lambda_increase, 10.0);
        assert_eq!(config.lambda_decrease, 4.0);
        assert_eq!(config.lambda_max, 1e6);
        assert_eq!(config.min_residuum_change, 1e-6);
        assert_eq!(config.min_param_change, 1e-4);
        assert_eq!(config.linear_solver_type, LinearSolverType::Cholesky);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_fitter_config_builders_read_back() {
        let config = FitterConfig::new()
            .with_max_iters(7)
            .with_successes_to_get_bored(2)
            .with_lambda_start(1e-3)
            .with_lambda_factors(3.0, 2.0)
            .with_lambda_max(1e9)
            .with_min_residuum_change(1e-9)
            .with_min_param_change(1e-7)
            .with_linear_solver_type(LinearSolverType::Qr)
            .with_timeout(Duration::from_secs(2))
            .with_verbose(true);

        assert_eq!(config.max_iters, 7);
        assert_eq!(config.successes_to_get_bored, 2);
        assert_eq!(config.lambda_start, 1e-3);
        assert_eq!(config.lambda_increase, 3.0);
        assert_eq!(config.lambda_decrease, 2.0);
        assert_eq!(config.lambda_max, 1e9);
        assert_eq!(config.min_residuum_change, 1e-9);
        assert_eq!(config.min_param_change, 1e-7);
        assert_eq!(config.linear_solver_type, LinearSolverType::Qr);
        assert_eq!(config.timeout, Some(Duration::from_secs(2)));
        assert!(config.verbose);
    }

    #[test]
    fn test_fitter_config_validation() {
        assert!(FitterConfig::new().with_lambda_start(0.0).validate().is_err());
        assert!(FitterConfig::new().with_lambda_max(f64::NAN).validate().is_err());
        assert!(
            FitterConfig::new()
                .with_lambda_factors(1.0, 4.0)
                .validate()
                .is_err()
        );
        assert!(
            FitterConfig::new()
                .with_lambda_factors(10.0, 0.5)
                .validate()
                .is_err()
        );
        assert!(matches!(
            FitterConfig::new()
                .with_successes_to_get_bored(0)
                .validate(),
            Err(FitError::InvalidInput(_))
        ));
        assert!(
            FitterConfig::new()
                .with_successes_to_get_bored(1)
                .validate()
                .is_ok()
        );
    }

    #[test]
    fn test_fit_rejects_zero_successes_to_get_bored() {
        let config = FitterConfig::new().with_successes_to_get_bored(0);
        let mut fitter = Fitter::with_config(2, config).unwrap();
        let mut problem = DecayProblem::new(2.0, 0.5);
        fitter.set_params(&[1.0, 1.0]).unwrap();

        assert!(matches!(
            fitter.fit(&mut problem),
            Err(FitError::InvalidInput(_))
        ));
        assert_eq!(fitter.get_params().unwrap(), &[1.0, 1.0]);
        assert_eq!(fitter.iterations(), 0);
    }

    #[test]
    fn test_fitter_requires_parameters() {
        assert!(matches!(Fitter::new(0), Err(FitError::InvalidInput(_))));
        let mut fitter = Fitter::new(2).unwrap();
        assert!(fitter.set_n_params(0).is_err());
        assert_eq!(fitter.n_params(), 2);
    }

    #[test]
    fn test_uninitialized_fitter() {
        let mut fitter = Fitter::new(2).unwrap();
        let mut problem = DecayProblem::new(2.0, 0.5);

        assert_eq!(fitter.get_params(), Err(FitError::Uninitialized));
        assert_eq!(fitter.residuum(), Err(FitError::ResiduumUnavailable));
        assert_eq!(fitter.fit(&mut problem), Err(FitError::Uninitialized));
        assert!(fitter.summary().is_none());
    }

    #[test]
    fn test_fit_exponential_decay() {
        let mut fitter = Fitter::new(2).unwrap();
        fitter.set_params(&[1.0, 1.0]).unwrap();
        let mut problem = DecayProblem::new(2.0, 0.5);

        let converged = fitter.fit(&mut problem).unwrap();
        let params = fitter.get_params().unwrap();

        assert!((params[0] - 2.0).abs() < 1e-6, "a = {}", params[0]);
        assert!((params[1] - 0.5).abs() < 1e-6, "k = {}", params[1]);
        assert!(converged.residuum < 1e-12);
        assert_eq!(fitter.residuum().unwrap(), converged.residuum);
        assert!(fitter.status().is_converged());

        let summary = fitter.summary().unwrap();
        assert!(summary.final_residuum < summary.initial_residuum);
        assert!(summary.successful_steps > 0);
        assert!(summary.to_string().contains("Levenberg-Marquardt Fit Summary"));
    }

    #[test]
    fn test_fit_with_qr_solver() {
        let config = FitterConfig::new().with_linear_solver_type(LinearSolverType::Qr);
        let mut fitter = Fitter::with_config(2, config).unwrap();
        fitter.set_params(&[1.0, 1.0]).unwrap();
        let mut problem = DecayProblem::new(2.0, 0.5);

        fitter.fit(&mut problem).unwrap();
        let params = fitter.get_params().unwrap();
        assert!((params[0] - 2.0).abs() < 1e-6);
        assert!((params[1] - 0.5).abs() < 1e-6);
    }

    #[test]
    fn test_fixed_parameter_is_not_moved() {
        let mut fitter = Fitter::new(2).unwrap();
        fitter.set_params(&[1.0, 0.5]).unwrap();
        fitter.set_fixed(1, true).unwrap();
        let mut problem = DecayProblem::new(2.0, 0.5);

        fitter.fit(&mut problem).unwrap();
        let params = fitter.get_params().unwrap();
        assert_eq!(params[1], 0.5);
        assert!((params[0] - 2.0).abs() < 1e-6);
    }

    #[test]
    fn test_all_fixed() {
        let mut fitter = Fitter::new(2).unwrap();
        fitter.set_params(&[1.0, 0.5]).unwrap();
        fitter.set_fixed_mask(&[true, true]).unwrap();
        let mut problem = DecayProblem::new(2.0, 0.5);

        assert_eq!(fitter.fit(&mut problem), Err(FitError::FixedAllParams));
        assert_eq!(
            fitter.status(),
            &FitStatus::Failed(FitError::FixedAllParams)
        );
    }

    #[test]
    fn test_max_iters_exhausted() {
        let config = FitterConfig::new().with_max_iters(1);
        let mut fitter = Fitter::with_config(2, config).unwrap();
        fitter.set_params(&[1.0, 1.0]).unwrap();
        let mut problem = DecayProblem::new(2.0, 0.5);

        let result = fitter.fit(&mut problem);
        assert_eq!(result, Err(FitError::NotConverged { iterations: 1 }));
        // Accepted progress is kept
        let f = fitter.residuum().unwrap();
        assert!(f < fitter.summary().unwrap().initial_residuum);
    }

    #[test]
    fn test_invalid_model_at_start() {
        let mut fitter = Fitter::new(1).unwrap();
        fitter.set_params(&[0.0]).unwrap();
        let mut objective = FnObjective::new(|_p: &[f64], _free: &[usize]| None);

        assert_eq!(fitter.fit(&mut objective), Err(FitError::InvalidModel));
        assert_eq!(fitter.eval_residuum(&mut objective), Err(FitError::InvalidModel));
    }

    #[test]
    fn test_eval_residuum_stores_value() {
        let mut fitter = Fitter::new(2).unwrap();
        fitter.set_params(&[2.0, 0.5]).unwrap();
        let mut problem = DecayProblem::new(2.0, 0.5);

        assert_eq!(fitter.eval_residuum(&mut problem), Ok(0.0));
        assert_eq!(fitter.residuum(), Ok(0.0));

        fitter.set_params(&[1.0, 0.5]).unwrap();
        assert_eq!(fitter.residuum(), Err(FitError::ResiduumUnavailable));
    }

    #[test]
    fn test_exact_start_is_stationary() {
        let mut fitter = Fitter::new(2).unwrap();
        fitter.set_params(&[2.0, 0.5]).unwrap();
        let mut problem = DecayProblem::new(2.0, 0.5);

        let converged = fitter.fit(&mut problem).unwrap();
        assert_eq!(converged.reason, ConvergenceReason::Stationary);
        assert_eq!(fitter.get_params().unwrap(), &[2.0, 0.5]);
    }

    #[test]
    fn test_degenerate_when_no_step_helps() {
        // The reported gradient points uphill, so every step is rejected
        let mut objective = FnObjective::new(|p: &[f64], free: &[usize]| {
            let residuals = DVector::from_vec(vec![p[0] - 1.0]);
            let jacobian = DMatrix::from_element(1, free.len(), -1.0);
            Some(Linearization::new(residuals, jacobian))
        });
        // Without a parameter tolerance the shrinking steps never count as negligible
        let config = FitterConfig::new().with_min_param_change(0.0);
        let mut fitter = Fitter::with_config(1, config).unwrap();
        fitter.set_params(&[3.0]).unwrap();

        assert_eq!(fitter.fit(&mut objective), Err(FitError::DegenerateJacobian));
        assert_eq!(fitter.get_params().unwrap(), &[3.0]);
        assert!(fitter.lambda() > fitter.config().lambda_max);
    }

    #[test]
    fn test_fit_is_deterministic() {
        let run = || {
            let mut fitter = Fitter::new(2).unwrap();
            fitter.set_params(&[5.0, 2.0]).unwrap();
            let mut problem = DecayProblem::new(2.0, 0.5);
            let _ = fitter.fit(&mut problem);
            (fitter.get_params().unwrap().to_vec(), fitter.iterations())
        };
        assert_eq!(run(), run());
    }
}
