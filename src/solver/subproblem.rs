//! Per-iteration trust-region subproblem artifacts.
//!
//! Both solvers factor the current hat-space model once per outer iteration
//! and then answer "give me the step for radius Delta" cheaply for every
//! inner trial.

use faer::{ColRef, Mat};

use crate::error::Error;
use crate::jacobian::{AugmentedOperator, Jacobian};
use crate::lsmr::lsmr;
use crate::quadratic::{build_quadratic_1d, minimize_quadratic_1d};
use crate::solver::LsmrOptions;
use crate::trust_region::{solve_lsq_trust_region, solve_trust_region_2d};
use crate::vector::{dot, norm_l2};

pub(crate) enum Subproblem {
    Exact(ExactSubproblem),
    Lsmr(LsmrSubproblem),
}

impl Subproblem {
    /// The trust-region step in hat space for the given radius. The exact
    /// path reads and updates the Levenberg-Marquardt parameter warm start.
    pub(crate) fn solve(&self, delta: f64, alpha: &mut f64) -> Vec<f64> {
        match self {
            Subproblem::Exact(exact) => {
                let (p_h, new_alpha, _n_iter) = solve_lsq_trust_region(
                    exact.n,
                    exact.m,
                    &exact.uf,
                    &exact.sv,
                    exact.v.as_ref(),
                    delta,
                    *alpha,
                );
                *alpha = new_alpha;
                p_h
            }
            Subproblem::Lsmr(sub) => {
                let (p_s, _newton) = solve_trust_region_2d(&sub.b_s, &sub.g_s, delta);
                sub.q1
                    .iter()
                    .zip(sub.q2.iter())
                    .map(|(q1, q2)| p_s[0] * q1 + p_s[1] * q2)
                    .collect()
            }
        }
    }
}

/// SVD of the augmented matrix `[J_h ; diag(sqrt(diag_h))]`, ready for the
/// secular-equation solver.
pub(crate) struct ExactSubproblem {
    n: usize,
    m: usize,
    uf: Vec<f64>,
    sv: Vec<f64>,
    v: Mat<f64>,
}

/// Fill and factor the augmented matrix. `aug` is the preallocated
/// `(m + n) x n` storage reused across iterations; only its top block and
/// bottom diagonal are rewritten, the rest stays zero.
pub(crate) fn build_exact(
    j_h: &Mat<f64>,
    diag_h: &[f64],
    f_aug: &[f64],
    aug: &mut Mat<f64>,
) -> Result<ExactSubproblem, Error> {
    let m = j_h.nrows();
    let n = j_h.ncols();
    for j in 0..n {
        for i in 0..m {
            aug[(i, j)] = j_h[(i, j)];
        }
        aug[(m + j, j)] = diag_h[j].sqrt();
    }
    let svd = aug.thin_svd().map_err(Error::FaerSvd)?;
    let sv: Vec<f64> = svd.S().column_vector().iter().copied().collect();
    let uf_col = svd.U().transpose() * ColRef::from_slice(f_aug);
    let uf: Vec<f64> = uf_col.iter().copied().collect();
    Ok(ExactSubproblem {
        n,
        m,
        uf,
        sv,
        v: svd.V().to_owned(),
    })
}

/// Approximate Gauss-Newton direction from LSMR plus the model projected
/// onto the 2-D subspace spanned by the gradient and that direction.
pub(crate) struct LsmrSubproblem {
    q1: Vec<f64>,
    q2: Vec<f64>,
    b_s: [[f64; 2]; 2],
    g_s: [f64; 2],
}

pub(crate) fn build_lsmr(
    j_h: &Jacobian,
    diag_h: &[f64],
    g_h: &[f64],
    f_aug: &[f64],
    delta: f64,
    options: &LsmrOptions,
) -> LsmrSubproblem {
    // Levenberg-style damping floor: the model decrease attainable along
    // the antigradient, spread over the trust region, keeps the augmented
    // operator nonsingular even when diag_h vanishes.
    let reg_term = if options.regularize {
        let neg_g_h: Vec<f64> = g_h.iter().map(|gi| -gi).collect();
        let (a, b) = build_quadratic_1d(j_h, diag_h, g_h, &neg_g_h, None);
        let to_tr = delta / norm_l2(g_h);
        let (_, g_value) = minimize_quadratic_1d(a, b, 0.0, to_tr);
        -g_value / (delta * delta)
    } else {
        0.0
    };

    let diag_root: Vec<f64> = diag_h.iter().map(|dh| (dh + reg_term).sqrt()).collect();
    let aug_op = AugmentedOperator::new(j_h, diag_root);
    let gn_h = lsmr(
        &aug_op,
        f_aug,
        options.damp,
        options.atol,
        options.btol,
        options.conlim,
        options.max_iter,
    )
    .x;

    // Orthonormalize [g_h | gn_h]. When the Gauss-Newton direction is
    // (numerically) parallel to the gradient the basis collapses to one
    // column and the second row of the projected model is zero.
    let g_norm = norm_l2(g_h);
    let q1: Vec<f64> = g_h.iter().map(|gi| gi / g_norm).collect();
    let projection = dot(&q1, &gn_h);
    let w: Vec<f64> = gn_h
        .iter()
        .zip(q1.iter())
        .map(|(gn, q)| gn - projection * q)
        .collect();
    let w_norm = norm_l2(&w);
    let q2: Vec<f64> = if w_norm > f64::EPSILON * norm_l2(&gn_h) {
        w.iter().map(|wi| wi / w_norm).collect()
    } else {
        vec![0.0; q1.len()]
    };

    let js1 = j_h.matvec(&q1);
    let js2 = j_h.matvec(&q2);
    let diag_quad = |a: &[f64], b: &[f64]| -> f64 {
        a.iter()
            .zip(diag_h.iter().zip(b.iter()))
            .map(|(ai, (di, bi))| ai * di * bi)
            .sum()
    };
    let b01 = dot(&js1, &js2) + diag_quad(&q1, &q2);
    let b_s = [
        [dot(&js1, &js1) + diag_quad(&q1, &q1), b01],
        [b01, dot(&js2, &js2) + diag_quad(&q2, &q2)],
    ];
    let g_s = [dot(&q1, g_h), dot(&q2, g_h)];

    LsmrSubproblem { q1, q2, b_s, g_s }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dense_3x2() -> Mat<f64> {
        let mut m = Mat::zeros(3, 2);
        m[(0, 0)] = 1.0;
        m[(1, 1)] = 1.0;
        m[(2, 0)] = 1.0;
        m[(2, 1)] = 1.0;
        m
    }

    #[test]
    fn exact_reproduces_gauss_newton_inside_region() {
        // Unbounded problem: diag_h = 0, f = A x0 - y at x0 = 0. The GN
        // step solves the normal equations; a huge radius returns it as is.
        let j = dense_3x2();
        let f = [-1.0, -2.0, -3.0];
        let mut f_aug = vec![0.0; 5];
        f_aug[..3].copy_from_slice(&f);
        let mut aug = Mat::zeros(5, 2);
        let sub = build_exact(&j, &[0.0, 0.0], &f_aug, &mut aug).unwrap();
        let mut alpha = 0.0;
        let p_h = Subproblem::Exact(sub).solve(100.0, &mut alpha);
        // Normal equations: [[2,1],[1,2]] p = [4, 5] -> p = (1, 2).
        assert!((p_h[0] - 1.0).abs() < 1e-10, "{p_h:?}");
        assert!((p_h[1] - 2.0).abs() < 1e-10);
        assert_eq!(alpha, 0.0);
    }

    #[test]
    fn exact_clips_to_radius() {
        let j = dense_3x2();
        let f = [-1.0, -2.0, -3.0];
        let mut f_aug = vec![0.0; 5];
        f_aug[..3].copy_from_slice(&f);
        let mut aug = Mat::zeros(5, 2);
        let sub = build_exact(&j, &[0.0, 0.0], &f_aug, &mut aug).unwrap();
        let mut alpha = 0.0;
        let p_h = Subproblem::Exact(sub).solve(0.5, &mut alpha);
        assert!((norm_l2(&p_h) - 0.5).abs() < 1e-6);
        assert!(alpha > 0.0);
    }

    #[test]
    fn lsmr_subspace_finds_gauss_newton_when_radius_allows() {
        let j = Jacobian::Dense(dense_3x2());
        let f = [-1.0, -2.0, -3.0];
        let g_h = j.rmatvec(&f);
        let mut f_aug = vec![0.0; 5];
        f_aug[..3].copy_from_slice(&f);
        let sub = build_lsmr(
            &j,
            &[0.0, 0.0],
            &g_h,
            &f_aug,
            100.0,
            &LsmrOptions::default(),
        );
        let mut alpha = 0.0;
        let p_h = Subproblem::Lsmr(sub).solve(100.0, &mut alpha);
        // The GN step lies in the 2-D subspace, so the subspace solution
        // matches it.
        assert!((p_h[0] - 1.0).abs() < 1e-4, "{p_h:?}");
        assert!((p_h[1] - 2.0).abs() < 1e-4);
    }

    #[test]
    fn lsmr_regularization_term_nonnegative() {
        let j = Jacobian::Dense(dense_3x2());
        let f = [-1.0, -2.0, -3.0];
        let g_h = j.rmatvec(&f);
        let mut f_aug = vec![0.0; 5];
        f_aug[..3].copy_from_slice(&f);
        // Just exercising the regularized build; the projected model must
        // stay positive semidefinite on the diagonal.
        let sub = build_lsmr(&j, &[0.0, 0.0], &g_h, &f_aug, 0.1, &LsmrOptions::default());
        assert!(sub.b_s[0][0] > 0.0);
        assert!(sub.b_s[1][1] >= 0.0);
    }
}
