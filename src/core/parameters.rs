use std::collections::HashSet;

use crate::error::{FitError, FitResult};

/// Fitting parameters with per-index fixed flags
///
/// The length is set once at construction (or through [`ParameterVector::resize`]);
/// the values stay unavailable until [`ParameterVector::set_values`] is called.
#[derive(Debug, Clone, PartialEq)]
pub struct ParameterVector {
    len: usize,
    values: Option<Vec<f64>>,
    fixed_indices: HashSet<usize>,
}

impl ParameterVector {
    /// Create an uninitialized parameter vector of the given length
    pub fn new(len: usize) -> Self {
        ParameterVector {
            len,
            values: None,
            fixed_indices: HashSet::new(),
        }
    }

    /// Change the number of parameters, forgetting values and fixed flags
    pub fn resize(&mut self, len: usize) {
        self.len = len;
        self.values = None;
        self.fixed_indices.clear();
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn is_initialized(&self) -> bool {
        self.values.is_some()
    }

    /// Set all values at once
    pub fn set_values(&mut self, values: &[f64]) -> FitResult<()> {
        if values.len() != self.len {
            return Err(FitError::InvalidInput(format!(
                "expected {} parameter values, got {}",
                self.len,
                values.len()
            )));
        }
        self.values = Some(values.to_vec());
        Ok(())
    }

    /// Current values, `Uninitialized` if they were never set
    pub fn values(&self) -> FitResult<&[f64]> {
        self.values.as_deref().ok_or(FitError::Uninitialized)
    }

    /// Replace values with a proposal, keeping fixed indices at their current value
    pub fn update_values(&mut self, new_values: &[f64]) -> FitResult<()> {
        let current = self.values.as_mut().ok_or(FitError::Uninitialized)?;
        if new_values.len() != current.len() {
            return Err(FitError::InvalidInput(format!(
                "expected {} parameter values, got {}",
                current.len(),
                new_values.len()
            )));
        }
        for (i, (value, &proposed)) in current.iter_mut().zip(new_values).enumerate() {
            if !self.fixed_indices.contains(&i) {
                *value = proposed;
            }
        }
        Ok(())
    }

    pub fn set_fixed(&mut self, index: usize, fixed: bool) -> FitResult<()> {
        self.check_index(index)?;
        if fixed {
            self.fixed_indices.insert(index);
        } else {
            self.fixed_indices.remove(&index);
        }
        Ok(())
    }

    /// Whether `index` is fixed; out-of-range indices are never fixed
    pub fn is_fixed(&self, index: usize) -> bool {
        self.fixed_indices.contains(&index)
    }

    /// Set every fixed flag from a mask of the vector's length
    pub fn set_fixed_mask(&mut self, mask: &[bool]) -> FitResult<()> {
        if mask.len() != self.len {
            return Err(FitError::InvalidInput(format!(
                "expected {} fixed flags, got {}",
                self.len,
                mask.len()
            )));
        }
        self.fixed_indices = mask
            .iter()
            .enumerate()
            .filter_map(|(i, &fixed)| fixed.then_some(i))
            .collect();
        Ok(())
    }

    pub fn fixed_mask(&self) -> Vec<bool> {
        (0..self.len).map(|i| self.is_fixed(i)).collect()
    }

    /// Indices of the free parameters in ascending order
    pub fn free_indices(&self) -> Vec<usize> {
        (0..self.len).filter(|i| !self.is_fixed(*i)).collect()
    }

    pub fn n_free(&self) -> usize {
        self.len - self.fixed_indices.len()
    }

    fn check_index(&self, index: usize) -> FitResult<()> {
        if index >= self.len {
            return Err(FitError::InvalidInput(format!(
                "parameter index {index} out of range for {} parameters",
                self.len
            )));
        }
        Ok(())
    }
}
