use nalgebra::{DMatrix, DVector, Dyn, QR};

use super::{DenseLinearSolver, LinAlgError, LinAlgResult, check_system};

/// Dense QR solver for square systems that may be badly conditioned
#[derive(Debug, Clone)]
pub struct DenseQrSolver {
    /// Pivots of R below `rank_tolerance * max|R_ii|` count as zero
    rank_tolerance: f64,
}

impl DenseQrSolver {
    pub fn new() -> Self {
        DenseQrSolver {
            rank_tolerance: 1e-14,
        }
    }

    pub fn with_rank_tolerance(mut self, rank_tolerance: f64) -> Self {
        self.rank_tolerance = rank_tolerance;
        self
    }

    fn factorize(&self, matrix: &DMatrix<f64>) -> LinAlgResult<QR<f64, Dyn, Dyn>> {
        let qr = matrix.clone().qr();
        let r = qr.r();
        let max_pivot = r.diagonal().iter().fold(0.0_f64, |m, v| m.max(v.abs()));
        if max_pivot == 0.0
            || r
                .diagonal()
                .iter()
                .any(|v| v.abs() <= self.rank_tolerance * max_pivot)
        {
            return Err(LinAlgError::Singular);
        }
        Ok(qr)
    }
}

impl Default for DenseQrSolver {
    fn default() -> Self {
        Self::new()
    }
}

impl DenseLinearSolver for DenseQrSolver {
    fn solve(&mut self, matrix: &DMatrix<f64>, rhs: &DVector<f64>) -> LinAlgResult<DVector<f64>> {
        check_system(matrix, Some(rhs))?;
        let x = self
            .factorize(matrix)?
            .solve(rhs)
            .ok_or(LinAlgError::Singular)?;
        if x.iter().any(|v| !v.is_finite()) {
            return Err(LinAlgError::NonFinite);
        }
        Ok(x)
    }

    fn invert(&mut self, matrix: &DMatrix<f64>) -> LinAlgResult<DMatrix<f64>> {
        check_system(matrix, None)?;
        let n = matrix.nrows();
        let inverse = self
            .factorize(matrix)?
            .solve(&DMatrix::identity(n, n))
            .ok_or(LinAlgError::Singular)?;
        if inverse.iter().any(|v| !v.is_finite()) {
            return Err(LinAlgError::NonFinite);
        }
        Ok(inverse)
    }
}
