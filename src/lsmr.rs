//! LSMR: iterative least squares through Golub-Kahan bidiagonalization.
//!
//! Solves `min ||A x - b||` (optionally with extra damping
//! `min ||A x - b||^2 + damp^2 ||x||^2`) using only `matvec` and `rmatvec`
//! products, which is what makes the large-scale trust-region path work for
//! sparse and matrix-free Jacobians.

use crate::jacobian::LinearOperator;
use crate::vector::norm_l2;

/// Why LSMR stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LsmrStop {
    /// `x = 0` is already the exact solution.
    ZeroSolution,
    /// `A x = b` is satisfied within `atol`/`btol`.
    ResidualSmall,
    /// The least-squares optimality condition is satisfied within `atol`.
    NormalEquationsSmall,
    /// The condition-number estimate exceeded `conlim`.
    ConditionLimit,
    /// Residual as small as the arithmetic allows.
    ResidualAtMachinePrecision,
    /// Optimality as small as the arithmetic allows.
    NormalEquationsAtMachinePrecision,
    /// Condition estimate at the reliability limit of the arithmetic.
    ConditionAtMachinePrecision,
    /// Ran out of iterations.
    IterationLimit,
}

/// Solution of an LSMR run.
#[derive(Debug, Clone)]
pub struct LsmrOutput {
    /// The approximate least-squares solution.
    pub x: Vec<f64>,
    /// Stop condition that fired.
    pub stop: LsmrStop,
    /// Iterations performed.
    pub iterations: usize,
    /// Final residual norm estimate `||A x - b||`.
    pub residual_norm: f64,
}

/// Stable Givens rotation `(c, s, r)` with `r = hypot(a, b)`.
fn sym_ortho(a: f64, b: f64) -> (f64, f64, f64) {
    if b == 0.0 {
        (libm::copysign(1.0, a), 0.0, a.abs())
    } else if a == 0.0 {
        (0.0, libm::copysign(1.0, b), b.abs())
    } else if b.abs() > a.abs() {
        let tau = a / b;
        let s = libm::copysign(1.0, b) / (1.0 + tau * tau).sqrt();
        let c = s * tau;
        (c, s, b / s)
    } else {
        let tau = b / a;
        let c = libm::copysign(1.0, a) / (1.0 + tau * tau).sqrt();
        let s = c * tau;
        (c, s, a / c)
    }
}

/// Run LSMR on `op` and the right-hand side `b`.
///
/// `atol` and `btol` are relative tolerances on the optimality and residual
/// estimates, `conlim` caps the condition-number estimate (0 disables the
/// check), and `max_iter` of `None` defaults to `min(nrows, ncols)`.
pub fn lsmr(
    op: &dyn LinearOperator,
    b: &[f64],
    damp: f64,
    atol: f64,
    btol: f64,
    conlim: f64,
    max_iter: Option<usize>,
) -> LsmrOutput {
    let m = op.nrows();
    let n = op.ncols();
    let max_iter = max_iter.unwrap_or_else(|| m.min(n));

    let mut u = b.to_vec();
    let normb = norm_l2(b);
    let mut beta = normb;
    let mut v;
    let mut alpha;
    if beta > 0.0 {
        for ui in &mut u {
            *ui /= beta;
        }
        v = op.rmatvec(&u);
        alpha = norm_l2(&v);
    } else {
        v = vec![0.0; n];
        alpha = 0.0;
    }
    if alpha > 0.0 {
        for vi in &mut v {
            *vi /= alpha;
        }
    }

    let mut itn = 0usize;
    let mut zetabar = alpha * beta;
    let mut alphabar = alpha;
    let mut rho = 1.0;
    let mut rhobar = 1.0;
    let mut cbar = 1.0;
    let mut sbar = 0.0;

    let mut h = v.clone();
    let mut hbar = vec![0.0; n];
    let mut x = vec![0.0; n];

    // Quantities for the iterative estimate of ||r||.
    let mut betadd = beta;
    let mut betad = 0.0;
    let mut rhodold = 1.0;
    let mut tautildeold = 0.0;
    let mut thetatilde = 0.0;
    let mut zeta = 0.0;
    let mut d = 0.0;

    // Estimates of ||A|| and cond(A).
    let mut norma2 = alpha * alpha;
    let mut maxrbar = 0.0;
    let mut minrbar = 1e100;
    let mut norma = norma2.sqrt();

    let ctol = if conlim > 0.0 { 1.0 / conlim } else { 0.0 };
    let mut normr = beta;
    let normar = alpha * beta;

    if normar == 0.0 || normb == 0.0 {
        return LsmrOutput {
            x,
            stop: LsmrStop::ZeroSolution,
            iterations: 0,
            residual_norm: normr,
        };
    }

    let mut stop = LsmrStop::IterationLimit;
    while itn < max_iter {
        itn += 1;

        // Next step of the bidiagonalization.
        let av = op.matvec(&v);
        for (ui, ai) in u.iter_mut().zip(av.iter()) {
            *ui = ai - alpha * *ui;
        }
        beta = norm_l2(&u);
        if beta > 0.0 {
            for ui in &mut u {
                *ui /= beta;
            }
            let atu = op.rmatvec(&u);
            for (vi, ai) in v.iter_mut().zip(atu.iter()) {
                *vi = ai - beta * *vi;
            }
            alpha = norm_l2(&v);
            if alpha > 0.0 {
                for vi in &mut v {
                    *vi /= alpha;
                }
            }
        }

        // Fold the damping into the bidiagonal factor.
        let (chat, shat, alphahat) = sym_ortho(alphabar, damp);

        // Plane rotation turning the bidiagonal factor into upper
        // triangular form.
        let rhoold = rho;
        let (c, s, rho_new) = sym_ortho(alphahat, beta);
        rho = rho_new;
        let thetanew = s * alpha;
        alphabar = c * alpha;

        // Second rotation, for the least-squares subproblem in t.
        let rhobarold = rhobar;
        let zetaold = zeta;
        let thetabar = sbar * rho;
        let rhotemp = cbar * rho;
        let (cbar_new, sbar_new, rhobar_new) = sym_ortho(cbar * rho, thetanew);
        cbar = cbar_new;
        sbar = sbar_new;
        rhobar = rhobar_new;
        zeta = cbar * zetabar;
        zetabar = -sbar * zetabar;

        // Update the search directions and the iterate.
        let hbar_scale = thetabar * rho / (rhoold * rhobarold);
        for (hbi, hi) in hbar.iter_mut().zip(h.iter()) {
            *hbi = hi - hbar_scale * *hbi;
        }
        let x_scale = zeta / (rho * rhobar);
        for (xi, hbi) in x.iter_mut().zip(hbar.iter()) {
            *xi += x_scale * hbi;
        }
        let h_scale = thetanew / rho;
        for (hi, vi) in h.iter_mut().zip(v.iter()) {
            *hi = vi - h_scale * *hi;
        }

        // Residual-norm recurrences.
        let betaacute = chat * betadd;
        let betacheck = -shat * betadd;
        let betahat = c * betaacute;
        betadd = -s * betaacute;
        let thetatildeold = thetatilde;
        let (ctildeold, stildeold, rhotildeold) = sym_ortho(rhodold, thetabar);
        thetatilde = stildeold * rhobar;
        rhodold = ctildeold * rhobar;
        betad = -stildeold * betad + ctildeold * betahat;
        tautildeold = (zetaold - thetatildeold * tautildeold) / rhotildeold;
        let taud = (zeta - thetatilde * tautildeold) / rhodold;
        d += betacheck * betacheck;
        normr = (d + (betad - taud) * (betad - taud) + betadd * betadd).sqrt();

        norma2 += beta * beta;
        norma = norma2.sqrt();
        norma2 += alpha * alpha;

        maxrbar = libm::fmax(maxrbar, rhobarold);
        if itn > 1 {
            minrbar = libm::fmin(minrbar, rhobarold);
        }
        let conda = libm::fmax(maxrbar, rhotemp) / libm::fmin(minrbar, rhotemp);

        // Convergence tests, from loosest to tightest so the tightest
        // satisfied condition wins.
        let normar_now = zetabar.abs();
        let normx = norm_l2(&x);
        let test1 = normr / normb;
        let test2 = if norma * normr != 0.0 {
            normar_now / (norma * normr)
        } else {
            f64::INFINITY
        };
        let test3 = 1.0 / conda;
        let t1 = test1 / (1.0 + norma * normx / normb);
        let rtol = btol + atol * norma * normx / normb;

        let mut fired = None;
        if itn >= max_iter {
            fired = Some(LsmrStop::IterationLimit);
        }
        if 1.0 + test3 <= 1.0 {
            fired = Some(LsmrStop::ConditionAtMachinePrecision);
        }
        if 1.0 + test2 <= 1.0 {
            fired = Some(LsmrStop::NormalEquationsAtMachinePrecision);
        }
        if 1.0 + t1 <= 1.0 {
            fired = Some(LsmrStop::ResidualAtMachinePrecision);
        }
        if test3 <= ctol {
            fired = Some(LsmrStop::ConditionLimit);
        }
        if test2 <= atol {
            fired = Some(LsmrStop::NormalEquationsSmall);
        }
        if test1 <= rtol {
            fired = Some(LsmrStop::ResidualSmall);
        }
        if let Some(reason) = fired {
            stop = reason;
            break;
        }
    }

    LsmrOutput {
        x,
        stop,
        iterations: itn,
        residual_norm: normr,
    }
}
