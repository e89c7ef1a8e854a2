//! Linear algebra for the normal equations.
//!
//! The systems solved here are small and dense: one row and column per free
//! fitting parameter. Two interchangeable backends are provided:
//! - Dense Cholesky decomposition (default, symmetric positive definite input)
//! - Dense QR decomposition (tolerates worse conditioning)
//!
//! Both are built on nalgebra and share the [`DenseLinearSolver`] trait.

use nalgebra::{DMatrix, DVector};
use thiserror::Error;

pub mod cholesky;
pub mod qr;

pub use cholesky::DenseCholeskySolver;
pub use qr::DenseQrSolver;

/// Result type for linear algebra operations
pub type LinAlgResult<T> = Result<T, LinAlgError>;

/// Errors raised by the dense solvers
#[derive(Debug, Clone, PartialEq, Error)]
pub enum LinAlgError {
    /// The decomposition could not be computed
    #[error("Factorization failed: {0}")]
    FactorizationFailed(String),

    /// The matrix is singular to working precision
    #[error("Matrix is singular")]
    Singular,

    /// Matrix and right-hand side do not fit together
    #[error("Dimension mismatch: matrix is {rows}x{cols}, right-hand side has {rhs} rows")]
    DimensionMismatch { rows: usize, cols: usize, rhs: usize },

    /// NaN or infinity found in the input or the solution
    #[error("Non-finite value encountered")]
    NonFinite,
}

/// Which decomposition to use for the normal equations
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum LinearSolverType {
    /// Cholesky decomposition (fast, requires positive definiteness)
    #[default]
    Cholesky,
    /// QR decomposition (slower, more forgiving)
    Qr,
}

impl std::fmt::Display for LinearSolverType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LinearSolverType::Cholesky => write!(f, "Dense Cholesky"),
            LinearSolverType::Qr => write!(f, "Dense QR"),
        }
    }
}

/// Common interface for the dense symmetric solvers
pub trait DenseLinearSolver {
    /// Solve `matrix * x = rhs`
    fn solve(&mut self, matrix: &DMatrix<f64>, rhs: &DVector<f64>) -> LinAlgResult<DVector<f64>>;

    /// Compute `matrix⁻¹`
    fn invert(&mut self, matrix: &DMatrix<f64>) -> LinAlgResult<DMatrix<f64>>;
}

/// Create a solver for the given backend
pub fn create_linear_solver(solver_type: LinearSolverType) -> Box<dyn DenseLinearSolver> {
    match solver_type {
        LinearSolverType::Cholesky => Box::new(DenseCholeskySolver::new()),
        LinearSolverType::Qr => Box::new(DenseQrSolver::new()),
    }
}

/// Invert a normal matrix `JᵗJ` that may contain parameters with no influence.
///
/// Rows with a zero diagonal are replaced by unit rows before the inversion and
/// their diagonal is reported as zero afterwards, so a column of zeros in the
/// Jacobian does not make the whole matrix singular.
pub fn invert_normal_matrix(
    solver: &mut dyn DenseLinearSolver,
    normal: &DMatrix<f64>,
) -> LinAlgResult<DMatrix<f64>> {
    let n = normal.nrows();
    let mut work = normal.clone();
    let mut zero = vec![false; n];
    for (i, is_zero) in zero.iter_mut().enumerate() {
        if work[(i, i)] == 0.0 {
            work.row_mut(i).fill(0.0);
            work.column_mut(i).fill(0.0);
            work[(i, i)] = 1.0;
            *is_zero = true;
        }
    }

    let mut inverse = solver.invert(&work)?;
    for (i, &is_zero) in zero.iter().enumerate() {
        if is_zero {
            inverse[(i, i)] = 0.0;
        }
    }
    Ok(inverse)
}

pub(crate) fn check_system(matrix: &DMatrix<f64>, rhs: Option<&DVector<f64>>) -> LinAlgResult<()> {
    let (rows, cols) = matrix.shape();
    if rows != cols {
        return Err(LinAlgError::DimensionMismatch {
            rows,
            cols,
            rhs: rhs.map_or(rows, |r| r.len()),
        });
    }
    if let Some(rhs) = rhs {
        if rhs.len() != rows {
            return Err(LinAlgError::DimensionMismatch {
                rows,
                cols,
                rhs: rhs.len(),
            });
        }
        if rhs.iter().any(|v| !v.is_finite()) {
            return Err(LinAlgError::NonFinite);
        }
    }
    if matrix.iter().any(|v| !v.is_finite()) {
        return Err(LinAlgError::NonFinite);
    }
    Ok(())
}
