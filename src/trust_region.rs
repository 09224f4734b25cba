//! Trust-region subproblem machinery: intersecting a line with the
//! trust-region boundary, the secular-equation solver driven by an SVD, and
//! the two-dimensional subproblem used by the iterative path.

use faer::{ColRef, MatRef};

use crate::error::Error;
use crate::vector::{dot, norm_l2};

/// Both roots of `||x + t s||^2 == Delta^2`.
///
/// `x` must lie inside the ball and `s` must be nonzero; the roots then
/// bracket zero. Uses the formulation that avoids subtracting nearly equal
/// quantities.
pub(crate) fn intersect_trust_region(
    x: &[f64],
    s: &[f64],
    delta: f64,
) -> Result<(f64, f64), Error> {
    let a = dot(s, s);
    if a == 0.0 {
        return Err(Error::DegenerateDirection);
    }
    let b = dot(x, s);
    let c = dot(x, x) - delta * delta;
    if c > 0.0 {
        return Err(Error::OutsideTrustRegion);
    }
    let d = (b * b - a * c).sqrt();
    let q = -(b + libm::copysign(d, b));
    let t1 = q / a;
    let t2 = if q != 0.0 { c / q } else { 0.0 };
    if t1 < t2 { Ok((t1, t2)) } else { Ok((t2, t1)) }
}

/// Solve `min ||J p + f||` subject to `||p|| <= Delta` given the thin SVD of
/// the (augmented) matrix: `uf = U^T f`, singular values `sv` and the right
/// factor `v`.
///
/// `n` and `m` are the dimensions of the underlying Jacobian; `m` enters the
/// full-rank threshold only. Runs a safeguarded Newton iteration on the
/// secular equation `||p(alpha)|| = Delta`, warm-started from
/// `initial_alpha`, and returns `(p, alpha, iterations)`.
pub(crate) fn solve_lsq_trust_region(
    n: usize,
    m: usize,
    uf: &[f64],
    sv: &[f64],
    v: MatRef<'_, f64>,
    delta: f64,
    initial_alpha: f64,
) -> (Vec<f64>, f64, usize) {
    const RTOL: f64 = 0.01;
    const MAX_ITER: usize = 10;

    fn phi_and_derivative(alpha: f64, suf: &[f64], sv: &[f64], delta: f64) -> (f64, f64) {
        let p_norm = suf
            .iter()
            .zip(sv.iter())
            .map(|(su, s)| {
                let q = su / (s * s + alpha);
                q * q
            })
            .sum::<f64>()
            .sqrt();
        let phi = p_norm - delta;
        let phi_prime = -suf
            .iter()
            .zip(sv.iter())
            .map(|(su, s)| {
                let denom = s * s + alpha;
                su * su / (denom * denom * denom)
            })
            .sum::<f64>()
            / p_norm;
        (phi, phi_prime)
    }

    // p(alpha) = -V (suf / (sv^2 + alpha)), recovered through the right
    // singular vectors.
    fn recover(v: MatRef<'_, f64>, w: &[f64]) -> Vec<f64> {
        let p = v * ColRef::from_slice(w);
        p.iter().map(|pi| -pi).collect()
    }

    let suf: Vec<f64> = sv.iter().zip(uf.iter()).map(|(s, u)| s * u).collect();

    let full_rank = if m >= n {
        let threshold = f64::EPSILON * m as f64 * sv[0];
        sv[sv.len() - 1] > threshold
    } else {
        false
    };

    if full_rank {
        let w: Vec<f64> = uf.iter().zip(sv.iter()).map(|(u, s)| u / s).collect();
        let p = recover(v, &w);
        if norm_l2(&p) <= delta {
            return (p, 0.0, 0);
        }
    }

    let mut alpha_upper = norm_l2(&suf) / delta;
    let mut alpha_lower = if full_rank {
        let (phi, phi_prime) = phi_and_derivative(0.0, &suf, sv, delta);
        -phi / phi_prime
    } else {
        0.0
    };

    let mut alpha = initial_alpha;
    if !full_rank && alpha == 0.0 {
        alpha = libm::fmax(0.001 * alpha_upper, (alpha_lower * alpha_upper).sqrt());
    }

    let mut n_iter = 0;
    for it in 0..MAX_ITER {
        n_iter = it + 1;
        if alpha < alpha_lower || alpha > alpha_upper {
            alpha = libm::fmax(0.001 * alpha_upper, (alpha_lower * alpha_upper).sqrt());
        }
        let (phi, phi_prime) = phi_and_derivative(alpha, &suf, sv, delta);
        if phi < 0.0 {
            alpha_upper = alpha;
        }
        let ratio = phi / phi_prime;
        alpha_lower = libm::fmax(alpha_lower, alpha - ratio);
        alpha -= (phi + delta) * ratio / delta;
        if phi.abs() < RTOL * delta {
            break;
        }
    }

    let w: Vec<f64> = suf
        .iter()
        .zip(sv.iter())
        .map(|(su, s)| su / (s * s + alpha))
        .collect();
    let mut p = recover(v, &w);
    let p_norm = norm_l2(&p);
    if p_norm > 0.0 {
        let rescale = delta / p_norm;
        for pi in &mut p {
            *pi *= rescale;
        }
    }
    (p, alpha, n_iter)
}

/// Solve `min 0.5 p^T B p + g^T p` over `||p|| <= Delta` for a symmetric
/// 2x2 `B`.
///
/// The interior Newton point is tried first through a Cholesky solve. On the
/// boundary the stationarity condition, parametrized by the half-angle
/// tangent, reduces to a quartic whose real roots give the candidate angles;
/// a sign-change sweep of the angular derivative backstops the closed-form
/// roots when the coefficients are badly conditioned. Returns the minimizer
/// and whether the interior Newton step was taken.
pub(crate) fn solve_trust_region_2d(b: &[[f64; 2]; 2], g: &[f64; 2], delta: f64) -> ([f64; 2], bool) {
    let (b00, b01, b11) = (b[0][0], b[0][1], b[1][1]);
    if b00 > 0.0 {
        let l11 = b00.sqrt();
        let l21 = b01 / l11;
        let d22 = b11 - l21 * l21;
        if d22 > 0.0 {
            let l22 = d22.sqrt();
            let y0 = -g[0] / l11;
            let y1 = (-g[1] - l21 * y0) / l22;
            let p1 = y1 / l22;
            let p0 = (y0 - l21 * p1) / l11;
            if p0 * p0 + p1 * p1 <= delta * delta {
                return ([p0, p1], true);
            }
        }
    }

    let a = b00 * delta * delta;
    let b2 = b01 * delta * delta;
    let c = b11 * delta * delta;
    let d = g[0] * delta;
    let f = g[1] * delta;

    let value = |p: [f64; 2]| {
        0.5 * (p[0] * (b00 * p[0] + b01 * p[1]) + p[1] * (b01 * p[0] + b11 * p[1]))
            + g[0] * p[0]
            + g[1] * p[1]
    };
    // d/dtheta of the model along the boundary circle.
    let deriv = |theta: f64| {
        let (s, co) = theta.sin_cos();
        (c - a) * s * co + b2 * (co * co - s * s) - d * s + f * co
    };

    let mut candidates: Vec<[f64; 2]> = vec![[-delta, 0.0]];

    // Stationary points from the half-angle quartic. The substitution
    // u = tan(theta / 2) misses theta == pi, which is the fixed candidate
    // above.
    let coeffs = [
        b2 - f,
        -2.0 * (c - a + d),
        -6.0 * b2,
        2.0 * (c - a - d),
        b2 + f,
    ];
    for u in real_roots(&coeffs) {
        if u.is_finite() {
            let w = 1.0 + u * u;
            candidates.push([delta * (1.0 - u * u) / w, delta * 2.0 * u / w]);
        }
    }

    // Bisection sweep over the angular derivative. Catches roots the
    // closed-form path loses when the quartic coefficients span many orders
    // of magnitude.
    const SWEEP: usize = 64;
    let mut prev_theta: f64 = 0.0;
    let mut prev_h = deriv(0.0);
    for i in 1..=SWEEP {
        let theta = 2.0 * std::f64::consts::PI * i as f64 / SWEEP as f64;
        let h = deriv(theta);
        if prev_h == 0.0 {
            candidates.push([delta * prev_theta.cos(), delta * prev_theta.sin()]);
        } else if (prev_h < 0.0) != (h < 0.0) {
            let (mut lo, mut hi, mut f_lo) = (prev_theta, theta, prev_h);
            for _ in 0..80 {
                let mid = 0.5 * (lo + hi);
                let f_mid = deriv(mid);
                if (f_mid < 0.0) == (f_lo < 0.0) {
                    lo = mid;
                    f_lo = f_mid;
                } else {
                    hi = mid;
                }
            }
            let mid = 0.5 * (lo + hi);
            candidates.push([delta * mid.cos(), delta * mid.sin()]);
        }
        prev_theta = theta;
        prev_h = h;
    }

    let mut best = candidates[0];
    let mut best_value = value(best);
    for &p in &candidates[1..] {
        let v = value(p);
        if v < best_value {
            best = p;
            best_value = v;
        }
    }
    (best, false)
}

/// Real roots of a polynomial of degree at most 4, highest coefficient
/// first. Exactly-zero leading coefficients drop the degree.
fn real_roots(c: &[f64; 5]) -> Vec<f64> {
    let [c4, c3, c2, c1, c0] = *c;
    if c4 != 0.0 {
        real_roots_quartic(c4, c3, c2, c1, c0)
    } else if c3 != 0.0 {
        real_roots_cubic(c3, c2, c1, c0)
    } else if c2 != 0.0 {
        real_roots_quadratic(c2, c1, c0)
    } else if c1 != 0.0 {
        vec![-c0 / c1]
    } else {
        Vec::new()
    }
}

fn real_roots_quadratic(a: f64, b: f64, c: f64) -> Vec<f64> {
    let disc = b * b - 4.0 * a * c;
    if disc < 0.0 {
        return Vec::new();
    }
    let q = -0.5 * (b + libm::copysign(disc.sqrt(), b));
    if q != 0.0 {
        vec![q / a, c / q]
    } else {
        // b == 0 and disc == 0: a double root at the origin.
        vec![0.0]
    }
}

fn real_roots_cubic(c3: f64, c2: f64, c1: f64, c0: f64) -> Vec<f64> {
    let a2 = c2 / c3;
    let a1 = c1 / c3;
    let a0 = c0 / c3;
    // Depressed form t = y - a2/3: y^3 + p y + q.
    let p = a1 - a2 * a2 / 3.0;
    let q = 2.0 * a2 * a2 * a2 / 27.0 - a2 * a1 / 3.0 + a0;
    let shift = a2 / 3.0;
    let disc = 0.25 * q * q + p * p * p / 27.0;
    if disc > 0.0 {
        let sd = disc.sqrt();
        let y = libm::cbrt(-0.5 * q + sd) + libm::cbrt(-0.5 * q - sd);
        vec![y - shift]
    } else if p == 0.0 {
        // disc <= 0 forces q == 0 here: a triple root.
        vec![-shift]
    } else {
        let r = 2.0 * (-p / 3.0).sqrt();
        let arg = (3.0 * q / (2.0 * p) * (-3.0 / p).sqrt()).clamp(-1.0, 1.0);
        let phi = libm::acos(arg);
        (0..3)
            .map(|k| r * libm::cos((phi - 2.0 * std::f64::consts::PI * k as f64) / 3.0) - shift)
            .collect()
    }
}

fn real_roots_quartic(c4: f64, c3: f64, c2: f64, c1: f64, c0: f64) -> Vec<f64> {
    let p3 = c3 / c4;
    let p2 = c2 / c4;
    let p1 = c1 / c4;
    let p0 = c0 / c4;
    // Depressed form u = y - p3/4: y^4 + p y^2 + q y + r.
    let shift = p3 / 4.0;
    let p = p2 - 3.0 * p3 * p3 / 8.0;
    let q = p1 - p3 * p2 / 2.0 + p3 * p3 * p3 / 8.0;
    let r = p0 - p3 * p1 / 4.0 + p3 * p3 * p2 / 16.0 - 3.0 * p3 * p3 * p3 * p3 / 256.0;

    // Ferrari: a positive root of the resolvent cubic splits the quartic
    // into two quadratics.
    let resolvent = real_roots_cubic(8.0, 8.0 * p, 2.0 * p * p - 8.0 * r, -q * q);
    let m = resolvent.into_iter().fold(f64::NEG_INFINITY, libm::fmax);

    let mut roots_y = Vec::new();
    if m <= 0.0 {
        // q is (numerically) zero: biquadratic in y^2.
        for z in real_roots_quadratic(1.0, p, r) {
            if z >= 0.0 {
                roots_y.push(z.sqrt());
                roots_y.push(-z.sqrt());
            }
        }
    } else {
        let w = (2.0 * m).sqrt();
        let t = p / 2.0 + m;
        roots_y.extend(real_roots_quadratic(1.0, -w, t + q / (2.0 * w)));
        roots_y.extend(real_roots_quadratic(1.0, w, t - q / (2.0 * w)));
    }

    // Two Newton steps on the original quartic sharpen each root.
    roots_y
        .into_iter()
        .map(|y| {
            let mut u = y - shift;
            for _ in 0..2 {
                let f = (((c4 * u + c3) * u + c2) * u + c1) * u + c0;
                let df = ((4.0 * c4 * u + 3.0 * c3) * u + 2.0 * c2) * u + c1;
                if df != 0.0 && f.is_finite() {
                    u -= f / df;
                }
            }
            u
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use faer::Mat;

    fn assert_near(a: f64, b: f64, tol: f64) {
        assert!((a - b).abs() < tol, "{a} vs {b}");
    }

    #[test]
    fn intersect_simple_ball() {
        // ||t s|| = 1 from the origin: t = +-1.
        let (t_neg, t_pos) = intersect_trust_region(&[0.0, 0.0], &[1.0, 0.0], 1.0).unwrap();
        assert_near(t_neg, -1.0, 1e-15);
        assert_near(t_pos, 1.0, 1e-15);
    }

    #[test]
    fn intersect_offset_point() {
        let (t_neg, t_pos) =
            intersect_trust_region(&[0.5, 0.0], &[1.0, 0.0], 1.0).unwrap();
        assert_near(t_neg, -1.5, 1e-15);
        assert_near(t_pos, 0.5, 1e-15);
    }

    #[test]
    fn intersect_rejects_zero_direction() {
        let err = intersect_trust_region(&[0.0], &[0.0], 1.0).unwrap_err();
        assert!(matches!(err, Error::DegenerateDirection));
    }

    #[test]
    fn quadratic_roots_stable() {
        let roots = real_roots_quadratic(1.0, -3.0, 2.0);
        let mut sorted = roots.clone();
        sorted.sort_by(f64::total_cmp);
        assert_near(sorted[0], 1.0, 1e-14);
        assert_near(sorted[1], 2.0, 1e-14);
    }

    #[test]
    fn cubic_three_real_roots() {
        // (x - 1)(x - 2)(x - 3) = x^3 - 6x^2 + 11x - 6.
        let mut roots = real_roots_cubic(1.0, -6.0, 11.0, -6.0);
        roots.sort_by(f64::total_cmp);
        assert_near(roots[0], 1.0, 1e-9);
        assert_near(roots[1], 2.0, 1e-9);
        assert_near(roots[2], 3.0, 1e-9);
    }

    #[test]
    fn cubic_one_real_root() {
        // x^3 + x + 1 has a single real root near -0.6823.
        let roots = real_roots_cubic(1.0, 0.0, 1.0, 1.0);
        assert_eq!(roots.len(), 1);
        assert_near(roots[0], -0.6823278038280193, 1e-12);
    }

    #[test]
    fn quartic_known_roots() {
        // (x^2 - 1)(x^2 - 4) = x^4 - 5x^2 + 4.
        let mut roots = real_roots(&[1.0, 0.0, -5.0, 0.0, 4.0]);
        roots.sort_by(f64::total_cmp);
        assert_eq!(roots.len(), 4);
        for (root, expected) in roots.iter().zip([-2.0, -1.0, 1.0, 2.0]) {
            assert_near(*root, expected, 1e-9);
        }
    }

    #[test]
    fn quartic_with_odd_terms() {
        // (x - 1)(x + 2)(x^2 + 1) = x^4 + x^3 - x^2 + x - 2.
        let mut roots = real_roots(&[1.0, 1.0, -1.0, 1.0, -2.0]);
        roots.retain(|r| r.is_finite());
        roots.sort_by(f64::total_cmp);
        // Complex pair is discarded; polish may duplicate but the two real
        // roots must be present.
        assert!(roots.iter().any(|&r| (r + 2.0).abs() < 1e-9));
        assert!(roots.iter().any(|&r| (r - 1.0).abs() < 1e-9));
    }

    #[test]
    fn secular_interior_gauss_newton() {
        // J = I, f = (0.3, 0.4): GN step has norm 0.5 < Delta.
        let mut v = Mat::zeros(2, 2);
        v[(0, 0)] = 1.0;
        v[(1, 1)] = 1.0;
        let (p, alpha, n_iter) =
            solve_lsq_trust_region(2, 2, &[0.3, 0.4], &[1.0, 1.0], v.as_ref(), 1.0, 0.0);
        assert_near(p[0], -0.3, 1e-14);
        assert_near(p[1], -0.4, 1e-14);
        assert_eq!(alpha, 0.0);
        assert_eq!(n_iter, 0);
    }

    #[test]
    fn secular_boundary_solution() {
        // Same system with a radius smaller than the GN step: the solution
        // must sit on the boundary along the same direction.
        let mut v = Mat::zeros(2, 2);
        v[(0, 0)] = 1.0;
        v[(1, 1)] = 1.0;
        let (p, alpha, _) =
            solve_lsq_trust_region(2, 2, &[0.3, 0.4], &[1.0, 1.0], v.as_ref(), 0.25, 0.0);
        assert_near(norm_l2(&p), 0.25, 1e-9);
        assert!(alpha > 0.0);
        assert_near(p[0] / p[1], 0.75, 1e-6);
    }

    #[test]
    fn two_dim_interior_newton() {
        let b = [[2.0, 0.0], [0.0, 2.0]];
        let (p, newton) = solve_trust_region_2d(&b, &[2.0, -2.0], 10.0);
        assert!(newton);
        assert_near(p[0], -1.0, 1e-14);
        assert_near(p[1], 1.0, 1e-14);
    }

    #[test]
    fn two_dim_boundary() {
        let b = [[1.0, 0.0], [0.0, 1.0]];
        let (p, newton) = solve_trust_region_2d(&b, &[1.0, 0.0], 0.5);
        assert!(!newton);
        assert_near(p[0], -0.5, 1e-9);
        assert_near(p[1], 0.0, 1e-9);
    }

    #[test]
    fn two_dim_indefinite() {
        // Indefinite model: the minimizer is on the boundary even though the
        // gradient vanishes.
        let b = [[-1.0, 0.0], [0.0, 2.0]];
        let (p, newton) = solve_trust_region_2d(&b, &[0.0, 0.0], 1.0);
        assert!(!newton);
        assert_near(p[0].abs(), 1.0, 1e-9);
        assert_near(p[1], 0.0, 1e-9);
    }

    #[test]
    fn two_dim_extreme_conditioning() {
        // The closed-form quartic loses roots here; the sweep must rescue
        // the true minimizer near (0, -Delta).
        let b = [[1e8, 0.0], [0.0, 1e-8]];
        let (p, _) = solve_trust_region_2d(&b, &[1.0, 1.0], 0.5);
        let value = 0.5 * (1e8 * p[0] * p[0] + 1e-8 * p[1] * p[1]) + p[0] + p[1];
        assert!(value < -0.499, "value {value} at {p:?}");
    }
}
