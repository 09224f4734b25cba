use crate::jacobian::Jacobian;
use crate::solver::Status;

/// Diagnostics that do not stop the solve but that a caller may want to see.
#[derive(Debug, Clone)]
#[cfg_attr(test, derive(PartialEq))]
#[non_exhaustive]
pub enum Warning {
    /// A sparse Jacobian was converted to dense because the exact
    /// trust-region solver was requested.
    SparseJacobianDensified,
    /// An operator Jacobian was materialized column by column because the
    /// exact trust-region solver was requested.
    OperatorJacobianDensified,
}

impl std::fmt::Display for Warning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Warning::SparseJacobianDensified => write!(
                f,
                "Sparse Jacobian was converted to dense for the exact trust-region solver; consider the lsmr solver or returning a dense Jacobian"
            ),
            Warning::OperatorJacobianDensified => write!(
                f,
                "Operator Jacobian was materialized to dense for the exact trust-region solver; consider the lsmr solver"
            ),
        }
    }
}

/// Everything the solver reports back after it terminates.
#[derive(Debug)]
#[non_exhaustive]
pub struct SolveOutcome {
    /// Final iterate, strictly inside the bounds.
    pub x: Vec<f64>,
    /// Residual vector at `x`.
    pub residuals: Vec<f64>,
    /// Jacobian from the last evaluation, unscaled.
    pub jacobian: Jacobian,
    /// `0.5 * ||residuals||^2` at `x`.
    pub cost: f64,
    /// First-order optimality: the infinity norm of the Coleman-Li scaled
    /// gradient.
    pub optimality: f64,
    /// Which bound each coordinate sits on: -1 lower, +1 upper, 0 free.
    pub active_mask: Vec<i8>,
    /// Residual evaluations consumed.
    pub nfev: usize,
    /// Jacobian evaluations consumed.
    pub njev: usize,
    /// Outer iterations performed.
    pub iterations: usize,
    /// How the solve terminated.
    pub status: Status,
    /// Non-fatal diagnostics collected along the way.
    pub warnings: Vec<Warning>,
}

impl SolveOutcome {
    /// Did the solve terminate at a converged point (any tolerance met)?
    pub fn converged(&self) -> bool {
        self.status.converged()
    }
}
