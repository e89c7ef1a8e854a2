use nalgebra::{Cholesky, DMatrix, DVector, Dyn};

use super::{DenseLinearSolver, LinAlgError, LinAlgResult, check_system};

/// Dense Cholesky (LLᵗ) solver for symmetric positive definite systems
#[derive(Debug, Clone, Default)]
pub struct DenseCholeskySolver {
    factorizations: usize,
}

impl DenseCholeskySolver {
    pub fn new() -> Self {
        DenseCholeskySolver { factorizations: 0 }
    }

    /// Number of factorizations computed so far
    pub fn factorizations(&self) -> usize {
        self.factorizations
    }

    fn factorize(&mut self, matrix: &DMatrix<f64>) -> LinAlgResult<Cholesky<f64, Dyn>> {
        self.factorizations += 1;
        matrix.clone().cholesky().ok_or(LinAlgError::Singular)
    }
}

impl DenseLinearSolver for DenseCholeskySolver {
    fn solve(&mut self, matrix: &DMatrix<f64>, rhs: &DVector<f64>) -> LinAlgResult<DVector<f64>> {
        check_system(matrix, Some(rhs))?;
        let cholesky = self.factorize(matrix)?;
        let x = cholesky.solve(rhs);
        if x.iter().any(|v| !v.is_finite()) {
            return Err(LinAlgError::NonFinite);
        }
        Ok(x)
    }

    fn invert(&mut self, matrix: &DMatrix<f64>) -> LinAlgResult<DMatrix<f64>> {
        check_system(matrix, None)?;
        let inverse = self.factorize(matrix)?.inverse();
        if inverse.iter().any(|v| !v.is_finite()) {
            return Err(LinAlgError::NonFinite);
        }
        Ok(inverse)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nalgebra::dmatrix;

    #[test]
    fn test_cholesky_solve_diagonal() {
        let matrix = dmatrix![2.0, 0.0; 0.0, 4.0];
        let rhs = DVector::from_vec(vec![2.0, 2.0]);
        let mut solver = DenseCholeskySolver::new();
        let x = solver.solve(&matrix, &rhs).unwrap();

        assert!((x[0] - 1.0).abs() < 1e-12);
        assert!((x[1] - 0.5).abs() < 1e-12);
        assert_eq!(solver.factorizations(), 1);
    }

    #[test]
    fn test_cholesky_rejects_indefinite() {
        let matrix = dmatrix![1.0, 2.0; 2.0, 1.0];
        let rhs = DVector::from_vec(vec![1.0, 1.0]);
        let result = DenseCholeskySolver::new().solve(&matrix, &rhs);
        assert_eq!(result, Err(LinAlgError::Singular));
    }

    #[test]
    fn test_cholesky_rejects_nan() {
        let matrix = dmatrix![1.0, 0.0; 0.0, f64::NAN];
        let rhs = DVector::from_vec(vec![1.0, 1.0]);
        let result = DenseCholeskySolver::new().solve(&matrix, &rhs);
        assert_eq!(result, Err(LinAlgError::NonFinite));
    }

    #[test]
    fn test_cholesky_inverse() {
        let matrix = dmatrix![4.0, 2.0; 2.0, 3.0];
        let inverse = DenseCholeskySolver::new().invert(&matrix).unwrap();
        let identity = &matrix * &inverse;

        for i in 0..2 {
            for j in 0..2 {
                let expected = if i == j { 1.0 } else { 0.0 };
                assert!((identity[(i, j)] - expected).abs() < 1e-12);
            }
        }
    }
}
