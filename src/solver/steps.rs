//! Candidate steps considered when the trust-region solution leaves the box:
//! the snapped-and-reflected step and the constrained steepest-descent step.

use crate::bounds::step_size_to_bound;
use crate::error::Error;
use crate::jacobian::Jacobian;
use crate::quadratic::{build_quadratic_1d, minimize_quadratic_1d};
use crate::trust_region::intersect_trust_region;
use crate::vector::{add_scaled, cwise_mul, norm_l2};

/// Snap the trust-region step to the first face it hits, back it off to stay
/// strictly interior, and build a candidate reflected off that face.
///
/// Must only be called when `x + p` leaves the box. Takes the step in both
/// original (`p`) and hat (`p_h`) coordinates and returns the corrected
/// `p_h` plus the reflected candidate; when no admissible reflection exists
/// the corrected step is returned twice so the caller can stack candidates
/// uniformly.
#[allow(clippy::too_many_arguments)]
pub(crate) fn reflected_step(
    x: &[f64],
    j_h: &Jacobian,
    diag_h: &[f64],
    g_h: &[f64],
    mut p: Vec<f64>,
    mut p_h: Vec<f64>,
    d: &[f64],
    delta: f64,
    lb: &[f64],
    ub: &[f64],
    theta: f64,
) -> Result<(Vec<f64>, Vec<f64>), Error> {
    // "Stride" here means a scalar step length along a fixed direction.
    let (p_stride, hits) = step_size_to_bound(x, &p, lb, ub);

    // Reflect the hat-space direction off every coordinate of the first-hit
    // face.
    let mut r_h = p_h.clone();
    for (ri, hit) in r_h.iter_mut().zip(hits.iter()) {
        if *hit != 0 {
            *ri = -*ri;
        }
    }
    let r = cwise_mul(d, &r_h);

    // Snap the trust-region step onto the face.
    for pi in &mut p {
        *pi *= p_stride;
    }
    for pi in &mut p_h {
        *pi *= p_stride;
    }
    let x_on_bound = add_scaled(x, 1.0, &p);

    // The reflected direction leaves through either the trust-region
    // boundary or another face, whichever comes first.
    let (_, to_tr) = intersect_trust_region(&p_h, &r_h, delta)?;
    let (to_bound, _) = step_size_to_bound(&x_on_bound, &r, lb, ub);
    let to_bound = theta * to_bound;

    let r_stride_u = libm::fmin(to_bound, to_tr);

    // Require the reflected point to keep the same theta-relative distance
    // from the face as the snapped step does. The formula relies on p_h and
    // r_h having equal norms.
    let r_stride_l = if r_stride_u > 0.0 {
        (1.0 - theta) * p_stride / r_stride_u
    } else {
        -1.0
    };

    let reflected = if r_stride_l <= r_stride_u {
        let (a, b) = build_quadratic_1d(j_h, diag_h, g_h, &r_h, Some(&p_h));
        let (r_stride, _) = minimize_quadratic_1d(a, b, r_stride_l, r_stride_u);
        Some(add_scaled(&p_h, r_stride, &r_h))
    } else {
        None
    };

    // Back the snapped step off the face.
    for pi in &mut p_h {
        *pi *= theta;
    }

    match reflected {
        Some(r_h) => Ok((p_h, r_h)),
        None => {
            let copy = p_h.clone();
            Ok((p_h, copy))
        }
    }
}

/// Minimizer of the model along the scaled antigradient, restricted to the
/// trust region and the box.
#[allow(clippy::too_many_arguments)]
pub(crate) fn gradient_step(
    x: &[f64],
    j_h: &Jacobian,
    diag_h: &[f64],
    g_h: &[f64],
    d: &[f64],
    delta: f64,
    lb: &[f64],
    ub: &[f64],
    theta: f64,
) -> Vec<f64> {
    let neg_g: Vec<f64> = g_h.iter().zip(d.iter()).map(|(gi, di)| -gi * di).collect();
    let (to_bound, _) = step_size_to_bound(x, &neg_g, lb, ub);
    let to_tr = delta / norm_l2(g_h);
    let stride_max = libm::fmin(theta * to_bound, to_tr);

    let neg_g_h: Vec<f64> = g_h.iter().map(|gi| -gi).collect();
    let (a, b) = build_quadratic_1d(j_h, diag_h, g_h, &neg_g_h, None);
    let (stride, _) = minimize_quadratic_1d(a, b, 0.0, stride_max);
    g_h.iter().map(|gi| -stride * gi).collect()
}
