//! The quadratic model `Q(s) = 0.5 * s^T (J^T J + diag) s + g^T s` and its
//! restrictions to a line, used to compare candidate steps.

use crate::jacobian::Jacobian;
use crate::vector::dot;

/// Minimize `a t^2 + b t` over `[lb, ub]` (the free term is omitted).
///
/// Returns the minimizing `t` and the attained value. The candidates are the
/// two endpoints plus the stationary point when it falls inside the
/// interval; ties go to the earliest candidate in that order.
pub(crate) fn minimize_quadratic_1d(a: f64, b: f64, lb: f64, ub: f64) -> (f64, f64) {
    let mut candidates = vec![lb, ub];
    if a != 0.0 {
        let extremum = -0.5 * b / a;
        if lb <= extremum && extremum <= ub {
            candidates.push(extremum);
        }
    }
    let mut t_best = candidates[0];
    let mut y_best = a * t_best * t_best + b * t_best;
    for &t in &candidates[1..] {
        let y = a * t * t + b * t;
        if y < y_best {
            t_best = t;
            y_best = y;
        }
    }
    (t_best, y_best)
}

/// Coefficients `(a, b)` of the model restricted to the line
/// `t -> s0 + t * s` (only terms depending on `t` are kept):
///
/// ```text
/// Q(s0 + t s) = a t^2 + b t + const
/// ```
///
/// With no base point `s0` the line passes through the origin.
pub(crate) fn build_quadratic_1d(
    j: &Jacobian,
    diag: &[f64],
    g: &[f64],
    s: &[f64],
    s0: Option<&[f64]>,
) -> (f64, f64) {
    let v = j.matvec(s);
    let diag_ss: f64 = s.iter().zip(diag.iter()).map(|(si, di)| si * di * si).sum();
    let a = 0.5 * (dot(&v, &v) + diag_ss);
    let mut b = dot(g, s);
    if let Some(s0) = s0 {
        let u = j.matvec(s0);
        let diag_s0s: f64 = s0
            .iter()
            .zip(diag.iter().zip(s.iter()))
            .map(|(s0i, (di, si))| s0i * di * si)
            .sum();
        b += dot(&u, &v) + diag_s0s;
    }
    (a, b)
}

/// Evaluate the model at each step of a batch, one Jacobian product per
/// step.
pub(crate) fn evaluate_quadratic(
    j: &Jacobian,
    diag: &[f64],
    g: &[f64],
    steps: &[Vec<f64>],
) -> Vec<f64> {
    steps
        .iter()
        .map(|s| {
            let js = j.matvec(s);
            let diag_ss: f64 = s.iter().zip(diag.iter()).map(|(si, di)| si * di * si).sum();
            0.5 * (dot(&js, &js) + diag_ss) + dot(g, s)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use faer::Mat;

    fn identity_2x2() -> Jacobian {
        let mut m = Mat::zeros(2, 2);
        m[(0, 0)] = 1.0;
        m[(1, 1)] = 1.0;
        Jacobian::Dense(m)
    }

    #[test]
    fn interior_minimum() {
        // y = t^2 - 2t has its minimum at t = 1.
        let (t, y) = minimize_quadratic_1d(1.0, -2.0, 0.0, 5.0);
        assert_eq!(t, 1.0);
        assert_eq!(y, -1.0);
    }

    #[test]
    fn clipped_minimum() {
        // Minimum at t = 1 lies right of the interval.
        let (t, y) = minimize_quadratic_1d(1.0, -2.0, -1.0, 0.5);
        assert_eq!(t, 0.5);
        assert_eq!(y, -0.75);
    }

    #[test]
    fn concave_picks_an_endpoint() {
        let (t, _) = minimize_quadratic_1d(-1.0, 0.0, -2.0, 3.0);
        assert_eq!(t, 3.0);
    }

    #[test]
    fn linear_picks_downhill_endpoint() {
        let (t, y) = minimize_quadratic_1d(0.0, 2.0, -4.0, 4.0);
        assert_eq!(t, -4.0);
        assert_eq!(y, -8.0);
    }

    #[test]
    fn tie_prefers_earliest_candidate() {
        // y = t^2 is equal at both endpoints of [-1, 1]; lb comes first.
        let (t, _) = minimize_quadratic_1d(1.0, 0.0, -1.0, 1.0);
        assert_eq!(t, -1.0);
    }

    #[test]
    fn line_coefficients_match_direct_evaluation() {
        let j = identity_2x2();
        let diag = [0.5, 0.25];
        let g = [1.0, -2.0];
        let s = [1.0, 2.0];
        let s0 = [0.5, -0.5];
        let (a, b) = build_quadratic_1d(&j, &diag, &g, &s, Some(&s0));
        for t in [0.0, 0.7, -1.3] {
            let point: Vec<f64> = s0.iter().zip(s.iter()).map(|(p, q)| p + t * q).collect();
            let full = evaluate_quadratic(&j, &diag, &g, &[point])[0];
            let base = evaluate_quadratic(&j, &diag, &g, &[s0.to_vec()])[0];
            let along = a * t * t + b * t + base;
            assert!((full - along).abs() < 1e-12);
        }
    }

    #[test]
    fn unit_vector_value() {
        // Q(e_k) = 0.5 * (||J e_k||^2 + diag[k]) + g[k].
        let j = identity_2x2();
        let diag = [3.0, 5.0];
        let g = [-1.0, 2.0];
        let values = evaluate_quadratic(&j, &diag, &g, &[vec![1.0, 0.0], vec![0.0, 1.0]]);
        assert_eq!(values[0], 0.5 * (1.0 + 3.0) - 1.0);
        assert_eq!(values[1], 0.5 * (1.0 + 5.0) + 2.0);
    }
}
