#![doc = include_str!("../README.md")]

pub use crate::bounds::Bounds;
pub use crate::error::Error;
pub use crate::jacobian::{Jacobian, LinearOperator, SparseJacobian};
pub use crate::lsmr::{LsmrOutput, LsmrStop, lsmr};
pub use crate::solve_outcome::{SolveOutcome, Warning};
pub use crate::solver::{Config, LsmrOptions, Scaling, Status, TrSolver};

/// Geometry of the bound box.
mod bounds;
mod error;
/// Dense / sparse / operator Jacobian representations.
mod jacobian;
/// Iterative least squares from matrix-vector products.
mod lsmr;
/// The quadratic model and its line restrictions.
mod quadratic;
/// The trust-region iteration and its subproblems.
mod solver;
mod solve_outcome;
/// Subproblem solvers shared linear-algebra kernels.
mod trust_region;
mod vector;

/// A nonlinear least-squares problem: residuals and their Jacobian.
///
/// The solver calls `residual` once per trial point and `jacobian` once per
/// accepted step (plus once at the start and, in rare exits, once to leave a
/// consistent Jacobian in the outcome). `jacobian` receives the residual
/// vector already evaluated at `x` so implementations can reuse it.
pub trait LeastSquaresProblem {
    /// Number of residuals `m`. Must not change over a solve.
    fn num_residuals(&self) -> usize;

    /// Evaluate the residual vector into `out` (length `m`).
    fn residual(&mut self, x: &[f64], out: &mut [f64]);

    /// Evaluate the Jacobian at `x`. Any representation works with the
    /// `lsmr` trust-region solver; the `exact` solver densifies non-dense
    /// representations and records a warning.
    fn jacobian(&mut self, x: &[f64], f: &[f64]) -> Jacobian;
}

/// Minimize `0.5 * ||f(x)||^2` subject to `bounds`, starting from `x0`.
///
/// `x0` does not need to be feasible; it is projected strictly inside the
/// box before the first evaluation. See [`Config`] for tolerances and solver
/// selection, and [`SolveOutcome`] for what comes back.
///
/// ```
/// use trf_faer::{least_squares, Bounds, Config, Jacobian, LeastSquaresProblem};
/// use faer::Mat;
///
/// struct Linear;
///
/// impl LeastSquaresProblem for Linear {
///     fn num_residuals(&self) -> usize {
///         2
///     }
///
///     fn residual(&mut self, x: &[f64], out: &mut [f64]) {
///         out[0] = x[0] - 3.0;
///         out[1] = x[1] + 1.0;
///     }
///
///     fn jacobian(&mut self, _x: &[f64], _f: &[f64]) -> Jacobian {
///         let mut j = Mat::zeros(2, 2);
///         j[(0, 0)] = 1.0;
///         j[(1, 1)] = 1.0;
///         Jacobian::Dense(j)
///     }
/// }
///
/// let outcome = least_squares(
///     &mut Linear,
///     &[0.0, 0.0],
///     &Bounds::unbounded(2),
///     Config::default(),
/// )
/// .unwrap();
/// assert!(outcome.converged());
/// assert!((outcome.x[0] - 3.0).abs() < 1e-8);
/// assert!((outcome.x[1] + 1.0).abs() < 1e-8);
/// ```
pub fn least_squares<P: LeastSquaresProblem + ?Sized>(
    problem: &mut P,
    x0: &[f64],
    bounds: &Bounds,
    config: Config,
) -> Result<SolveOutcome, Error> {
    let n = x0.len();
    if bounds.len() != n {
        return Err(Error::DimensionMismatch {
            expected: n,
            got: bounds.len(),
            what: "bounds",
        });
    }
    for (i, (&l, &u)) in bounds.lower.iter().zip(bounds.upper.iter()).enumerate() {
        if !(l < u) {
            return Err(Error::InvalidBounds {
                index: i,
                lower: l,
                upper: u,
            });
        }
    }
    for (name, value) in [
        ("ftol", config.ftol),
        ("xtol", config.xtol),
        ("gtol", config.gtol),
    ] {
        if !(value > 0.0) || !value.is_finite() {
            return Err(Error::InvalidTolerance { name, value });
        }
    }
    if let Scaling::Vector(scale) = &config.scaling {
        if scale.len() != n {
            return Err(Error::DimensionMismatch {
                expected: n,
                got: scale.len(),
                what: "scaling vector",
            });
        }
        for (i, &value) in scale.iter().enumerate() {
            if !(value > 0.0) || !value.is_finite() {
                return Err(Error::InvalidScaling { index: i, value });
            }
        }
    }
    solver::trf::trf(problem, x0, bounds, &config)
}
