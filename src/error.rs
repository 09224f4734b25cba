use faer::linalg::svd::SvdError;

/// All errors that can stop an optimization before it produces an outcome.
#[derive(thiserror::Error, Debug)]
#[non_exhaustive]
pub enum Error {
    /// A vector had the wrong length for this problem.
    #[error("Expected {what} of length {expected}, got {got}")]
    DimensionMismatch {
        /// Required length.
        expected: usize,
        /// Supplied length.
        got: usize,
        /// Which input was wrong.
        what: &'static str,
    },
    /// A lower bound was not strictly below its upper bound.
    #[error("Bound {index} is infeasible: lower {lower} must be strictly below upper {upper}")]
    InvalidBounds {
        /// Offending coordinate.
        index: usize,
        /// Its lower bound.
        lower: f64,
        /// Its upper bound.
        upper: f64,
    },
    /// A tolerance was zero, negative, or NaN.
    #[error("Tolerance {name} must be positive, got {value}")]
    InvalidTolerance {
        /// Which tolerance.
        name: &'static str,
        /// Its value.
        value: f64,
    },
    /// A custom scaling vector had a nonpositive entry.
    #[error("Scaling vector entries must be positive, entry {index} is {value}")]
    InvalidScaling {
        /// Offending coordinate.
        index: usize,
        /// Its value.
        value: f64,
    },
    /// Column-norm scaling needs access to the Jacobian columns, which an
    /// operator Jacobian cannot provide.
    #[error(
        "Column-norm scaling is unavailable for an operator Jacobian; supply an explicit scaling vector"
    )]
    ScalingNeedsMatrix,
    /// The problem has no residuals or no variables.
    #[error("Cannot solve an empty system")]
    EmptySystemNotAllowed,
    /// Faer could not compute the SVD of the augmented matrix.
    #[error("Something went wrong doing SVD in faer")]
    FaerSvd(SvdError),
    /// A reflection was requested for a zero-length direction.
    #[error("Trust-region boundary intersection is undefined for a zero direction")]
    DegenerateDirection,
    /// A reflection anchor fell outside the trust region.
    #[error("Trust-region boundary intersection requires a point inside the region")]
    OutsideTrustRegion,
}
