//! Solver configuration and status codes.

pub(crate) mod steps;
pub(crate) mod subproblem;
pub(crate) mod trf;

/// Which trust-region subproblem solver to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrSolver {
    /// SVD of the augmented Jacobian plus a secular-equation Newton
    /// iteration. Requires a dense Jacobian (others are densified with a
    /// warning).
    Exact,
    /// Iterative Gauss-Newton step from LSMR, refined over a 2-D subspace.
    /// Works with any Jacobian representation.
    Lsmr,
}

/// How the variables are scaled.
#[derive(Debug, Clone, PartialEq)]
pub enum Scaling {
    /// Scale each variable by the norm of its Jacobian column, refreshed
    /// monotonically every iteration. Needs a dense or sparse Jacobian.
    Jac,
    /// A fixed, strictly positive scale per variable.
    Vector(Vec<f64>),
}

/// Options forwarded to LSMR, plus the damping-floor switch of the
/// large-scale subproblem.
#[derive(Debug, Clone, Copy)]
pub struct LsmrOptions {
    /// Add a Levenberg-style damping floor so the augmented operator stays
    /// nonsingular near the optimum.
    pub regularize: bool,
    /// Extra damping `min ||A x - b||^2 + damp^2 ||x||^2` inside LSMR.
    pub damp: f64,
    /// Relative tolerance on the optimality estimate.
    pub atol: f64,
    /// Relative tolerance on the residual estimate.
    pub btol: f64,
    /// Condition-number limit; 0 disables the check.
    pub conlim: f64,
    /// Iteration cap; `None` uses `min(nrows, ncols)` of the operator.
    pub max_iter: Option<usize>,
}

impl Default for LsmrOptions {
    fn default() -> Self {
        Self {
            regularize: true,
            damp: 0.0,
            atol: 1e-6,
            btol: 1e-6,
            conlim: 1e8,
            max_iter: None,
        }
    }
}

/// Termination statuses, with the conventional numeric codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    /// The evaluation budget ran out before any tolerance was met.
    MaxEvalsExceeded,
    /// The scaled gradient norm dropped below `gtol`.
    GtolSatisfied,
    /// The cost reduction dropped below `ftol` relative to the cost.
    FtolSatisfied,
    /// The step dropped below `xtol` relative to the iterate.
    XtolSatisfied,
    /// `ftol` and `xtol` fired on the same step.
    FtolAndXtolSatisfied,
}

impl Status {
    /// Numeric code: 0 for the evaluation cap, 1-4 for the tolerances.
    pub fn code(self) -> u8 {
        match self {
            Status::MaxEvalsExceeded => 0,
            Status::GtolSatisfied => 1,
            Status::FtolSatisfied => 2,
            Status::XtolSatisfied => 3,
            Status::FtolAndXtolSatisfied => 4,
        }
    }

    /// True for every status except the evaluation cap.
    pub fn converged(self) -> bool {
        !matches!(self, Status::MaxEvalsExceeded)
    }
}

/// Tolerances and knobs for the solver.
#[derive(Debug, Clone)]
pub struct Config {
    /// Relative cost-reduction tolerance.
    pub ftol: f64,
    /// Relative step-size tolerance.
    pub xtol: f64,
    /// Scaled-gradient tolerance.
    pub gtol: f64,
    /// Residual-evaluation cap; `None` uses `100 * n`.
    pub max_nfev: Option<usize>,
    /// Variable scaling strategy.
    pub scaling: Scaling,
    /// Subproblem solver; `None` picks `Lsmr` for sparse or operator
    /// Jacobians and `Exact` for dense ones.
    pub tr_solver: Option<TrSolver>,
    /// Options for the `Lsmr` path.
    pub lsmr: LsmrOptions,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            ftol: 1e-8,
            xtol: 1e-8,
            gtol: 1e-8,
            max_nfev: None,
            scaling: Scaling::Jac,
            tr_solver: None,
            lsmr: LsmrOptions::default(),
        }
    }
}

impl Config {
    /// Set all three convergence tolerances at once.
    pub fn with_tolerances(mut self, ftol: f64, xtol: f64, gtol: f64) -> Self {
        self.ftol = ftol;
        self.xtol = xtol;
        self.gtol = gtol;
        self
    }

    /// Cap the number of residual evaluations.
    pub fn with_max_nfev(mut self, max_nfev: usize) -> Self {
        self.max_nfev = Some(max_nfev);
        self
    }

    /// Force a particular subproblem solver.
    pub fn with_tr_solver(mut self, tr_solver: TrSolver) -> Self {
        self.tr_solver = Some(tr_solver);
        self
    }

    /// Use a fixed scaling vector instead of Jacobian column norms.
    pub fn with_scaling_vector(mut self, scale: Vec<f64>) -> Self {
        self.scaling = Scaling::Vector(scale);
        self
    }

    /// Replace the LSMR options.
    pub fn with_lsmr_options(mut self, lsmr: LsmrOptions) -> Self {
        self.lsmr = lsmr;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_codes() {
        assert_eq!(Status::MaxEvalsExceeded.code(), 0);
        assert_eq!(Status::GtolSatisfied.code(), 1);
        assert_eq!(Status::FtolSatisfied.code(), 2);
        assert_eq!(Status::XtolSatisfied.code(), 3);
        assert_eq!(Status::FtolAndXtolSatisfied.code(), 4);
        assert!(!Status::MaxEvalsExceeded.converged());
        assert!(Status::GtolSatisfied.converged());
    }

    #[test]
    fn builder_chains() {
        let config = Config::default()
            .with_tolerances(1e-10, 1e-10, 1e-10)
            .with_max_nfev(17)
            .with_tr_solver(TrSolver::Lsmr);
        assert_eq!(config.max_nfev, Some(17));
        assert_eq!(config.tr_solver, Some(TrSolver::Lsmr));
        assert_eq!(config.ftol, 1e-10);
    }
}
