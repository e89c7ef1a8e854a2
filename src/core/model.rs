//! Model functions and the data they are fitted to.
//!
//! A [`ModelFunction`] is one of three variants:
//! - **Point**: `f(x, params)` evaluated at the abscissa of each [`PointXY`],
//!   the residual is `f(x) - y` (optionally weighted)
//! - **Vector**: `g(i, params)` returning the residual of item `i` directly;
//!   the closure captures whatever data it compares against
//! - **Generic**: like Vector, for any number of parameters, with an optional
//!   analytic derivative
//!
//! Point and Vector models are limited to [`MAX_POSITIONAL_PARAMS`] parameters.

use std::fmt;

/// Largest parameter count accepted by Point and Vector models
pub const MAX_POSITIONAL_PARAMS: usize = 5;

/// Model value at `x`, `None` where the model is undefined
pub type PointFn<'a> = Box<dyn Fn(f64, &[f64]) -> Option<f64> + 'a>;

/// Weight of the point at `x`
pub type WeightFn<'a> = Box<dyn Fn(f64, &[f64]) -> f64 + 'a>;

/// Residual of item `i`, `None` where the model is undefined
pub type IndexedFn<'a> = Box<dyn Fn(usize, &[f64]) -> Option<f64> + 'a>;

/// Fills `out[j]` with ∂r_i/∂p_j for every parameter j
pub type DerivativeFn<'a> = Box<dyn Fn(usize, &[f64], &mut [f64]) -> Option<()> + 'a>;

/// A measured data point
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct PointXY {
    pub x: f64,
    pub y: f64,
}

impl PointXY {
    pub fn new(x: f64, y: f64) -> Self {
        PointXY { x, y }
    }
}

impl From<(f64, f64)> for PointXY {
    fn from((x, y): (f64, f64)) -> Self {
        PointXY { x, y }
    }
}

/// The data a model is fitted to, borrowed from the caller
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Dataset<'a> {
    /// Explicit points for a Point model
    Points(&'a [PointXY]),
    /// Number of items addressed by index by a Vector or Generic model
    Indexed(usize),
}

impl Dataset<'_> {
    /// Number of data items
    pub fn len(&self) -> usize {
        match self {
            Dataset::Points(points) => points.len(),
            Dataset::Indexed(n) => *n,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<'a> From<&'a [PointXY]> for Dataset<'a> {
    fn from(points: &'a [PointXY]) -> Self {
        Dataset::Points(points)
    }
}

impl<'a> From<&'a Vec<PointXY>> for Dataset<'a> {
    fn from(points: &'a Vec<PointXY>) -> Self {
        Dataset::Points(points.as_slice())
    }
}

/// Model function of a fit task
pub enum ModelFunction<'a> {
    Point {
        n_params: usize,
        function: PointFn<'a>,
        weight: Option<WeightFn<'a>>,
    },
    Vector {
        n_params: usize,
        function: IndexedFn<'a>,
    },
    Generic {
        n_params: usize,
        function: IndexedFn<'a>,
        derivative: Option<DerivativeFn<'a>>,
    },
}

impl<'a> ModelFunction<'a> {
    /// Point model `y = f(x, params)`
    pub fn point<F>(n_params: usize, function: F) -> Self
    where
        F: Fn(f64, &[f64]) -> Option<f64> + 'a,
    {
        ModelFunction::Point {
            n_params,
            function: Box::new(function),
            weight: None,
        }
    }

    /// Point model whose residuals are weighted by `w(x, params)`
    pub fn point_weighted<F, W>(n_params: usize, function: F, weight: W) -> Self
    where
        F: Fn(f64, &[f64]) -> Option<f64> + 'a,
        W: Fn(f64, &[f64]) -> f64 + 'a,
    {
        ModelFunction::Point {
            n_params,
            function: Box::new(function),
            weight: Some(Box::new(weight)),
        }
    }

    /// Vector model computing the residual of item `i` itself
    pub fn vector<G>(n_params: usize, function: G) -> Self
    where
        G: Fn(usize, &[f64]) -> Option<f64> + 'a,
    {
        ModelFunction::Vector {
            n_params,
            function: Box::new(function),
        }
    }

    /// Generic model, the Jacobian is estimated by finite differences
    pub fn generic<G>(n_params: usize, function: G) -> Self
    where
        G: Fn(usize, &[f64]) -> Option<f64> + 'a,
    {
        ModelFunction::Generic {
            n_params,
            function: Box::new(function),
            derivative: None,
        }
    }

    /// Generic model with an analytic derivative
    pub fn generic_with_derivative<G, D>(n_params: usize, function: G, derivative: D) -> Self
    where
        G: Fn(usize, &[f64]) -> Option<f64> + 'a,
        D: Fn(usize, &[f64], &mut [f64]) -> Option<()> + 'a,
    {
        ModelFunction::Generic {
            n_params,
            function: Box::new(function),
            derivative: Some(Box::new(derivative)),
        }
    }

    pub fn n_params(&self) -> usize {
        match self {
            ModelFunction::Point { n_params, .. }
            | ModelFunction::Vector { n_params, .. }
            | ModelFunction::Generic { n_params, .. } => *n_params,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            ModelFunction::Point { .. } => "point",
            ModelFunction::Vector { .. } => "vector",
            ModelFunction::Generic { .. } => "generic",
        }
    }

    /// Whether this model can be paired with `dataset`
    pub fn accepts(&self, dataset: &Dataset<'_>) -> bool {
        matches!(
            (self, dataset),
            (ModelFunction::Point { .. }, Dataset::Points(_))
                | (ModelFunction::Vector { .. }, Dataset::Indexed(_))
                | (ModelFunction::Generic { .. }, Dataset::Indexed(_))
        )
    }

    /// Largest parameter count this variant supports
    pub fn max_params(&self) -> usize {
        match self {
            ModelFunction::Point { .. } | ModelFunction::Vector { .. } => MAX_POSITIONAL_PARAMS,
            ModelFunction::Generic { .. } => usize::MAX,
        }
    }

    /// Residual of data item `index`, `None` if the model is undefined there
    pub fn residual(&self, dataset: &Dataset<'_>, index: usize, params: &[f64]) -> Option<f64> {
        let value = match (self, dataset) {
            (ModelFunction::Point { function, weight, .. }, Dataset::Points(points)) => {
                let point = points.get(index)?;
                let difference = function(point.x, params)? - point.y;
                match weight {
                    Some(weight) => {
                        let w = weight(point.x, params);
                        if !w.is_finite() || w < 0.0 {
                            return None;
                        }
                        w.sqrt() * difference
                    }
                    None => difference,
                }
            }
            (ModelFunction::Vector { function, .. }, Dataset::Indexed(_))
            | (ModelFunction::Generic { function, .. }, Dataset::Indexed(_)) => {
                function(index, params)?
            }
            _ => return None,
        };
        value.is_finite().then_some(value)
    }

    /// The analytic derivative, when the model has one
    pub fn derivative(&self) -> Option<&DerivativeFn<'a>> {
        match self {
            ModelFunction::Generic {
                derivative: Some(derivative),
                ..
            } => Some(derivative),
            _ => None,
        }
    }
}

impl fmt::Debug for ModelFunction<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut debug = f.debug_struct("ModelFunction");
        debug.field("kind", &self.kind());
        debug.field("n_params", &self.n_params());
        match self {
            ModelFunction::Point { weight, .. } => debug.field("weighted", &weight.is_some()),
            ModelFunction::Generic { derivative, .. } => {
                debug.field("analytic_derivative", &derivative.is_some())
            }
            ModelFunction::Vector { .. } => &mut debug,
        };
        debug.finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn line(x: f64, p: &[f64]) -> Option<f64> {
        Some(p[0] + p[1] * x)
    }

    #[test]
    fn test_point_residual() {
        let points = [PointXY::new(1.0, 3.0), PointXY::new(2.0, 4.0)];
        let dataset = Dataset::Points(&points);
        let model = ModelFunction::point(2, line);

        assert_eq!(model.residual(&dataset, 0, &[1.0, 1.0]), Some(-1.0));
        assert_eq!(model.residual(&dataset, 1, &[1.0, 1.0]), Some(-1.0));
        assert_eq!(model.residual(&dataset, 2, &[1.0, 1.0]), None);
    }

    #[test]
    fn test_weighted_point_residual() {
        let points = [PointXY::new(2.0, 1.0)];
        let dataset = Dataset::Points(&points);
        let model = ModelFunction::point_weighted(2, line, |_x, _p| 4.0);
        // sqrt(4) * ((0 + 1*2) - 1)
        assert_eq!(model.residual(&dataset, 0, &[0.0, 1.0]), Some(2.0));

        let negative = ModelFunction::point_weighted(2, line, |_x, _p| -1.0);
        assert_eq!(negative.residual(&dataset, 0, &[0.0, 1.0]), None);
    }

    #[test]
    fn test_undefined_model_yields_none() {
        let points = [PointXY::new(0.0, 1.0)];
        let dataset = Dataset::Points(&points);
        let reciprocal = ModelFunction::point(1, |x, p| (x != 0.0).then(|| p[0] / x));
        assert_eq!(reciprocal.residual(&dataset, 0, &[1.0]), None);

        let nan = ModelFunction::point(1, |_x, _p| Some(f64::NAN));
        assert_eq!(nan.residual(&dataset, 0, &[1.0]), None);
    }

    #[test]
    fn test_vector_residual_captures_data() {
        let observed = vec![1.0, 2.0, 3.0];
        let model = ModelFunction::vector(1, |i, p| Some(p[0] - observed[i]));
        let dataset = Dataset::Indexed(observed.len());

        assert_eq!(model.residual(&dataset, 2, &[2.0]), Some(-1.0));
    }

    #[test]
    fn test_model_dataset_pairing() {
        let points = [PointXY::default()];
        let point_data = Dataset::Points(&points);
        let indexed = Dataset::Indexed(1);

        let point = ModelFunction::point(1, |_x, p| Some(p[0]));
        let vector = ModelFunction::vector(1, |_i, p| Some(p[0]));
        let generic = ModelFunction::generic(1, |_i, p| Some(p[0]));

        assert!(point.accepts(&point_data));
        assert!(!point.accepts(&indexed));
        assert!(vector.accepts(&indexed));
        assert!(!vector.accepts(&point_data));
        assert!(generic.accepts(&indexed));
        assert_eq!(point.residual(&indexed, 0, &[1.0]), None);
    }

    #[test]
    fn test_parameter_limits() {
        let vector = ModelFunction::vector(3, |_i, _p| Some(0.0));
        let generic = ModelFunction::generic(12, |_i, _p| Some(0.0));
        assert_eq!(vector.max_params(), MAX_POSITIONAL_PARAMS);
        assert_eq!(generic.max_params(), usize::MAX);
        assert_eq!(generic.n_params(), 12);
    }

    #[test]
    fn test_derivative_access() {
        let plain = ModelFunction::generic(1, |_i, p| Some(p[0]));
        assert!(plain.derivative().is_none());

        let analytic = ModelFunction::generic_with_derivative(
            1,
            |_i, p| Some(p[0]),
            |_i, _p, out| {
                out[0] = 1.0;
                Some(())
            },
        );
        let mut row = [0.0];
        let derivative = analytic.derivative().unwrap();
        assert_eq!(derivative(0, &[3.0], &mut row), Some(()));
        assert_eq!(row[0], 1.0);
        assert!(format!("{analytic:?}").contains("analytic_derivative: true"));
    }
}
