//! The outer Trust Region Reflective iteration.
//!
//! Each iteration rescales the problem with the Coleman-Li change of
//! variables, factors a trust-region subproblem, and runs inner trials:
//! solve for a step, snap/reflect it when it leaves the box, pick the
//! candidate with the best model value, and accept or shrink the radius
//! based on the actual-to-predicted reduction ratio.

use faer::Mat;

use crate::bounds::{
    Bounds, find_active_constraints, make_strictly_feasible, scaling_vector, step_size_to_bound,
};
use crate::error::Error;
use crate::jacobian::Jacobian;
use crate::quadratic::evaluate_quadratic;
use crate::solve_outcome::{SolveOutcome, Warning};
use crate::solver::steps::{gradient_step, reflected_step};
use crate::solver::subproblem::{Subproblem, build_exact, build_lsmr};
use crate::solver::{Config, Scaling, Status, TrSolver};
use crate::vector::{add_scaled, cwise_mul, dot, norm_inf, norm_l2};
use crate::LeastSquaresProblem;

pub(crate) fn trf<P: LeastSquaresProblem + ?Sized>(
    problem: &mut P,
    x0: &[f64],
    bounds: &Bounds,
    config: &Config,
) -> Result<SolveOutcome, Error> {
    let n = x0.len();
    let m = problem.num_residuals();
    if n == 0 || m == 0 {
        return Err(Error::EmptySystemNotAllowed);
    }
    let lb = &bounds.lower;
    let ub = &bounds.upper;

    // Start strictly inside the box.
    let mut x = make_strictly_feasible(x0, lb, ub, 1e-10);
    let mut f = vec![0.0; m];
    problem.residual(&x, &mut f);
    let mut nfev = 1usize;
    let mut jac = problem.jacobian(&x, &f);
    let mut njev = 1usize;
    if jac.nrows() != m || jac.ncols() != n {
        return Err(Error::DimensionMismatch {
            expected: m,
            got: jac.nrows(),
            what: "Jacobian rows",
        });
    }

    let tr_solver = config.tr_solver.unwrap_or(match &jac {
        Jacobian::Dense(_) => TrSolver::Exact,
        _ => TrSolver::Lsmr,
    });

    let mut warnings = Vec::new();
    if tr_solver == TrSolver::Exact && !matches!(jac, Jacobian::Dense(_)) {
        warnings.push(match &jac {
            Jacobian::Sparse(_) => Warning::SparseJacobianDensified,
            _ => Warning::OperatorJacobianDensified,
        });
        jac = Jacobian::Dense(jac.to_dense());
    }

    let mut scale = match &config.scaling {
        Scaling::Jac => {
            let mut norms = jac.column_norms().ok_or(Error::ScalingNeedsMatrix)?;
            for norm in &mut norms {
                if *norm == 0.0 {
                    *norm = 1.0;
                }
            }
            norms
        }
        Scaling::Vector(scale) => scale.clone(),
    };

    let g0 = jac.rmatvec(&f);
    let (mut v, mut jv) = scaling_vector(&x, &g0, lb, ub);
    apply_scale(&mut v, &jv, &scale);
    let mut delta = norm_l2(
        &x0.iter()
            .zip(scale.iter().zip(v.iter()))
            .map(|(xi, (si, vi))| xi * si / vi.sqrt())
            .collect::<Vec<f64>>(),
    );
    if delta == 0.0 {
        delta = 1.0;
    }

    let mut alpha = 0.0;
    let mut cost = 0.5 * dot(&f, &f);
    let max_nfev = config.max_nfev.unwrap_or(100 * n);

    // Scratch reused across iterations: the augmented right-hand side, the
    // augmented matrix for the exact solver, and trial buffers.
    let mut f_aug = vec![0.0; m + n];
    let mut aug = match tr_solver {
        TrSolver::Exact => Some(Mat::<f64>::zeros(m + n, n)),
        TrSolver::Lsmr => None,
    };
    let mut x_trial = Vec::new();
    let mut f_trial = vec![0.0; m];

    let mut termination: Option<Status> = None;
    let mut iterations = 0usize;
    let mut g_norm;

    let status = loop {
        if config.scaling == Scaling::Jac {
            if let Some(norms) = jac.column_norms() {
                for (si, norm) in scale.iter_mut().zip(norms) {
                    *si = libm::fmax(*si, norm);
                }
            }
        }
        let g = jac.rmatvec(&f);
        let (v_new, jv_new) = scaling_vector(&x, &g, lb, ub);
        v = v_new;
        jv = jv_new;
        apply_scale(&mut v, &jv, &scale);
        g_norm = norm_inf(&cwise_mul(&g, &v));

        if g_norm < config.gtol {
            termination = Some(Status::GtolSatisfied);
        }
        if let Some(status) = termination {
            break status;
        }
        if nfev >= max_nfev {
            break Status::MaxEvalsExceeded;
        }

        // Hat-space quantities for this iteration.
        let d: Vec<f64> = v
            .iter()
            .zip(scale.iter())
            .map(|(vi, si)| vi.sqrt() / si)
            .collect();
        let g_h = cwise_mul(&d, &g);
        let diag_h: Vec<f64> = g
            .iter()
            .zip(jv.iter().zip(scale.iter()))
            .map(|(gi, (ji, si))| gi * f64::from(*ji) / si)
            .collect();
        jac = jac.into_scaled(&d);
        let theta = libm::fmax(0.995, 1.0 - g_norm);

        f_aug[..m].copy_from_slice(&f);
        let subproblem = match tr_solver {
            TrSolver::Exact => {
                let Jacobian::Dense(j_h) = &jac else {
                    unreachable!("the exact solver keeps the Jacobian dense");
                };
                let Some(aug) = aug.as_mut() else {
                    unreachable!("the exact solver preallocates its augmented matrix");
                };
                Subproblem::Exact(build_exact(j_h, &diag_h, &f_aug, aug)?)
            }
            TrSolver::Lsmr => {
                Subproblem::Lsmr(build_lsmr(&jac, &diag_h, &g_h, &f_aug, delta, &config.lsmr))
            }
        };

        let mut actual_reduction = -1.0;
        let mut cost_trial = cost;

        while actual_reduction <= 0.0 && nfev < max_nfev {
            let mut p_h = subproblem.solve(delta, &mut alpha);
            let p = cwise_mul(&d, &p_h);

            let (to_bound, _) = step_size_to_bound(&x, &p, lb, ub);
            let steps_h = if to_bound >= 1.0 {
                // The trust-region step fits; still back off the bound.
                let factor = libm::fmin(theta * to_bound, 1.0);
                for pi in &mut p_h {
                    *pi *= factor;
                }
                vec![p_h]
            } else {
                let (p_h, r_h) = reflected_step(
                    &x, &jac, &diag_h, &g_h, p, p_h, &d, delta, lb, ub, theta,
                )?;
                let c_h = gradient_step(&x, &jac, &diag_h, &g_h, &d, delta, lb, ub, theta);
                vec![p_h, r_h, c_h]
            };

            let qp_values = evaluate_quadratic(&jac, &diag_h, &g_h, &steps_h);
            let mut best = 0;
            for (i, value) in qp_values.iter().enumerate() {
                if *value < qp_values[best] {
                    best = i;
                }
            }
            let step_h = &steps_h[best];
            let predicted_reduction = -qp_values[best];

            let step = cwise_mul(&d, step_h);
            x_trial = make_strictly_feasible(&add_scaled(&x, 1.0, &step), lb, ub, 0.0);
            problem.residual(&x_trial, &mut f_trial);
            nfev += 1;

            cost_trial = 0.5 * dot(&f_trial, &f_trial);
            actual_reduction = cost - cost_trial;
            // The correction accounts for the curvature the bounds add to
            // the model; it vanishes in the unbounded case.
            let correction = 0.5
                * step_h
                    .iter()
                    .zip(diag_h.iter())
                    .map(|(si, di)| si * di * si)
                    .sum::<f64>();

            let ratio = if predicted_reduction > 0.0 {
                (actual_reduction - correction) / predicted_reduction
            } else {
                0.0
            };

            let step_h_norm = norm_l2(step_h);
            (delta, alpha) = update_radius(delta, alpha, ratio, step_h_norm);

            let ftol_satisfied = actual_reduction.abs() < config.ftol * cost && ratio > 0.25;
            let xtol_satisfied =
                norm_l2(&step) < config.xtol * libm::fmax(f64::EPSILON.sqrt(), norm_l2(&x));
            termination = match (ftol_satisfied, xtol_satisfied) {
                (true, true) => Some(Status::FtolAndXtolSatisfied),
                (true, false) => Some(Status::FtolSatisfied),
                (false, true) => Some(Status::XtolSatisfied),
                (false, false) => None,
            };
            if termination.is_some() {
                break;
            }
        }

        if actual_reduction > 0.0 {
            // Commit the accepted trial atomically, then refresh the
            // Jacobian at the new point.
            std::mem::swap(&mut x, &mut x_trial);
            std::mem::swap(&mut f, &mut f_trial);
            cost = cost_trial;
            jac = problem.jacobian(&x, &f);
            njev += 1;
            if tr_solver == TrSolver::Exact && !matches!(jac, Jacobian::Dense(_)) {
                jac = Jacobian::Dense(jac.to_dense());
            }
        } else if termination.is_some() || nfev >= max_nfev {
            // About to exit with a rejected trial: the working Jacobian is
            // still column-scaled, so re-evaluate it for the output.
            jac = problem.jacobian(&x, &f);
            njev += 1;
            if tr_solver == TrSolver::Exact && !matches!(jac, Jacobian::Dense(_)) {
                jac = Jacobian::Dense(jac.to_dense());
            }
        }
        iterations += 1;
    };

    let active_mask = find_active_constraints(&x, lb, ub, config.xtol);
    Ok(SolveOutcome {
        x,
        residuals: f,
        jacobian: jac,
        cost,
        optimality: g_norm,
        active_mask,
        nfev,
        njev,
        iterations,
        status,
        warnings,
    })
}

fn apply_scale(v: &mut [f64], jv: &[i8], scale: &[f64]) {
    for (vi, (ji, si)) in v.iter_mut().zip(jv.iter().zip(scale.iter())) {
        if *ji != 0 {
            *vi *= si;
        }
    }
}

/// Shrink the radius after a poor step, grow it after a very good step
/// that pressed against the boundary, leave it alone otherwise. The
/// Levenberg-Marquardt warm start moves inversely with the radius.
fn update_radius(delta: f64, alpha: f64, ratio: f64, step_h_norm: f64) -> (f64, f64) {
    if ratio < 0.25 {
        let delta_new = 0.25 * step_h_norm;
        let alpha_new = if delta_new > 0.0 {
            alpha * delta / delta_new
        } else {
            alpha
        };
        (delta_new, alpha_new)
    } else if ratio > 0.75 && step_h_norm > 0.95 * delta {
        (2.0 * delta, 0.5 * alpha)
    } else {
        (delta, alpha)
    }
}

#[cfg(test)]
mod tests {
    use super::update_radius;

    #[test]
    fn radius_shrinks_on_poor_ratio() {
        let (delta, alpha) = update_radius(1.0, 0.5, 0.1, 0.8);
        assert_eq!(delta, 0.2);
        assert_eq!(alpha, 0.5 * 1.0 / 0.2);
    }

    #[test]
    fn radius_doubles_when_step_presses_boundary() {
        let (delta, alpha) = update_radius(1.0, 0.5, 0.9, 0.99);
        assert_eq!(delta, 2.0);
        assert_eq!(alpha, 0.25);
    }

    #[test]
    fn radius_unchanged_for_moderate_ratio() {
        // Repeated application is the identity while the ratio stays in the
        // middle band and the step stays off the boundary.
        let mut state = (1.0, 0.5);
        for _ in 0..2 {
            state = update_radius(state.0, state.1, 0.5, 0.9);
        }
        assert_eq!(state, (1.0, 0.5));
    }

    #[test]
    fn radius_unchanged_for_good_ratio_short_step() {
        let (delta, alpha) = update_radius(1.0, 0.5, 0.9, 0.5);
        assert_eq!(delta, 1.0);
        assert_eq!(alpha, 0.5);
    }
}
