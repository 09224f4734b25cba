//! Jacobian representations: dense, sparse, or an opaque linear operator.
//!
//! The solver only ever needs matrix-vector and transposed matrix-vector
//! products from a Jacobian, except for the exact trust-region subproblem
//! which materializes a dense copy.

use faer::{ColRef, Mat};
use faer::sparse::{SparseColMatRef, SymbolicSparseColMat};

use crate::vector::cwise_mul;

/// A black-box linear map. Implement this to hand the solver a Jacobian
/// without storing it as a matrix; only products are required.
pub trait LinearOperator {
    /// Number of rows (residuals).
    fn nrows(&self) -> usize;
    /// Number of columns (variables).
    fn ncols(&self) -> usize;
    /// `A * x`.
    fn matvec(&self, x: &[f64]) -> Vec<f64>;
    /// `A^T * y`.
    fn rmatvec(&self, y: &[f64]) -> Vec<f64>;
}

/// A sparse Jacobian in compressed-column form.
///
/// The symbolic structure is fixed once; the value buffer is refreshed on
/// every Jacobian evaluation and mutated in place when the solver rescales
/// columns.
#[derive(Debug, Clone)]
pub struct SparseJacobian {
    /// Which cells are nonzero, in column-major order.
    pub symbolic: SymbolicSparseColMat<usize>,
    /// One value per structural nonzero, column-major.
    pub values: Vec<f64>,
}

impl SparseJacobian {
    /// Attach the value buffer to the symbolic structure.
    pub fn as_ref(&self) -> SparseColMatRef<'_, usize, f64> {
        SparseColMatRef::new(self.symbolic.as_ref(), &self.values)
    }
}

/// The three Jacobian representations the solver accepts.
pub enum Jacobian {
    /// A dense matrix.
    Dense(Mat<f64>),
    /// A sparse compressed-column matrix.
    Sparse(SparseJacobian),
    /// Matrix-free: only products are available.
    Operator(Box<dyn LinearOperator>),
}

impl Jacobian {
    /// Number of rows (residuals).
    pub fn nrows(&self) -> usize {
        match self {
            Jacobian::Dense(m) => m.nrows(),
            Jacobian::Sparse(s) => s.symbolic.nrows(),
            Jacobian::Operator(op) => op.nrows(),
        }
    }

    /// Number of columns (variables).
    pub fn ncols(&self) -> usize {
        match self {
            Jacobian::Dense(m) => m.ncols(),
            Jacobian::Sparse(s) => s.symbolic.ncols(),
            Jacobian::Operator(op) => op.ncols(),
        }
    }

    /// `J * x`.
    pub fn matvec(&self, x: &[f64]) -> Vec<f64> {
        match self {
            Jacobian::Dense(m) => {
                let y = m.as_ref() * ColRef::from_slice(x);
                y.iter().copied().collect()
            }
            Jacobian::Sparse(s) => {
                let y = s.as_ref() * ColRef::from_slice(x);
                y.iter().copied().collect()
            }
            Jacobian::Operator(op) => op.matvec(x),
        }
    }

    /// `J^T * y`.
    pub fn rmatvec(&self, y: &[f64]) -> Vec<f64> {
        match self {
            Jacobian::Dense(m) => {
                let x = m.as_ref().transpose() * ColRef::from_slice(y);
                x.iter().copied().collect()
            }
            Jacobian::Sparse(s) => {
                let x = s.as_ref().transpose() * ColRef::from_slice(y);
                x.iter().copied().collect()
            }
            Jacobian::Operator(op) => op.rmatvec(y),
        }
    }

    /// Euclidean norm of every column. Not available for the operator
    /// representation, which would need one product per row.
    pub(crate) fn column_norms(&self) -> Option<Vec<f64>> {
        match self {
            Jacobian::Dense(m) => Some(
                (0..m.ncols())
                    .map(|j| m.col(j).iter().map(|v| v * v).sum::<f64>().sqrt())
                    .collect(),
            ),
            Jacobian::Sparse(s) => {
                let col_ptr = s.symbolic.col_ptr();
                let mut norms = Vec::with_capacity(s.symbolic.ncols());
                for j in 0..s.symbolic.ncols() {
                    let sq: f64 = s.values[col_ptr[j]..col_ptr[j + 1]]
                        .iter()
                        .map(|v| v * v)
                        .sum();
                    norms.push(sq.sqrt());
                }
                Some(norms)
            }
            Jacobian::Operator(_) => None,
        }
    }

    /// Materialize a dense copy. For the operator representation this costs
    /// one product per column.
    pub(crate) fn to_dense(&self) -> Mat<f64> {
        match self {
            Jacobian::Dense(m) => m.clone(),
            Jacobian::Sparse(s) => s.as_ref().to_dense(),
            Jacobian::Operator(op) => {
                let (m, n) = (op.nrows(), op.ncols());
                let mut out = Mat::zeros(m, n);
                let mut unit = vec![0.0; n];
                for j in 0..n {
                    unit[j] = 1.0;
                    let col = op.matvec(&unit);
                    for (i, v) in col.iter().enumerate() {
                        out[(i, j)] = *v;
                    }
                    unit[j] = 0.0;
                }
                out
            }
        }
    }

    /// `J * diag(d)`, the change of variables into hat space.
    ///
    /// Stored matrices are rescaled in place: dense columns directly, sparse
    /// ones by walking the value buffer through the column pointers. The
    /// operator representation is wrapped in a composition instead.
    #[must_use]
    pub(crate) fn into_scaled(mut self, d: &[f64]) -> Jacobian {
        match self {
            Jacobian::Dense(ref mut m) => {
                for (j, &dj) in d.iter().enumerate() {
                    for v in m.col_mut(j).iter_mut() {
                        *v *= dj;
                    }
                }
                self
            }
            Jacobian::Sparse(ref mut s) => {
                let col_ptr = s.symbolic.col_ptr();
                for (j, &dj) in d.iter().enumerate() {
                    for idx in col_ptr[j]..col_ptr[j + 1] {
                        s.values[idx] *= dj;
                    }
                }
                self
            }
            Jacobian::Operator(inner) => Jacobian::Operator(Box::new(ColumnScaled {
                inner,
                d: d.to_vec(),
            })),
        }
    }
}

impl std::fmt::Debug for Jacobian {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Jacobian::Dense(m) => f
                .debug_struct("Dense")
                .field("nrows", &m.nrows())
                .field("ncols", &m.ncols())
                .finish(),
            Jacobian::Sparse(s) => f
                .debug_struct("Sparse")
                .field("nrows", &s.symbolic.nrows())
                .field("ncols", &s.symbolic.ncols())
                .field("nnz", &s.values.len())
                .finish(),
            Jacobian::Operator(op) => f
                .debug_struct("Operator")
                .field("nrows", &op.nrows())
                .field("ncols", &op.ncols())
                .finish(),
        }
    }
}

/// `inner * diag(d)`: scales the input of `matvec` and the output of
/// `rmatvec`.
struct ColumnScaled {
    inner: Box<dyn LinearOperator>,
    d: Vec<f64>,
}

impl LinearOperator for ColumnScaled {
    fn nrows(&self) -> usize {
        self.inner.nrows()
    }

    fn ncols(&self) -> usize {
        self.inner.ncols()
    }

    fn matvec(&self, x: &[f64]) -> Vec<f64> {
        self.inner.matvec(&cwise_mul(&self.d, x))
    }

    fn rmatvec(&self, y: &[f64]) -> Vec<f64> {
        cwise_mul(&self.d, &self.inner.rmatvec(y))
    }
}

/// The `(m + n) x n` operator `[J ; diag(r)]` fed to LSMR: the Jacobian with
/// a diagonal regularization block appended below.
pub(crate) struct AugmentedOperator<'a> {
    j: &'a Jacobian,
    diag_root: Vec<f64>,
}

impl<'a> AugmentedOperator<'a> {
    pub(crate) fn new(j: &'a Jacobian, diag_root: Vec<f64>) -> Self {
        debug_assert_eq!(j.ncols(), diag_root.len());
        Self { j, diag_root }
    }
}

impl LinearOperator for AugmentedOperator<'_> {
    fn nrows(&self) -> usize {
        self.j.nrows() + self.j.ncols()
    }

    fn ncols(&self) -> usize {
        self.j.ncols()
    }

    fn matvec(&self, x: &[f64]) -> Vec<f64> {
        let mut out = self.j.matvec(x);
        out.extend(self.diag_root.iter().zip(x.iter()).map(|(&r, &xi)| r * xi));
        out
    }

    fn rmatvec(&self, y: &[f64]) -> Vec<f64> {
        let m = self.j.nrows();
        let mut out = self.j.rmatvec(&y[..m]);
        for (oi, (&r, &yi)) in out.iter_mut().zip(self.diag_root.iter().zip(y[m..].iter())) {
            *oi += r * yi;
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vector::dot;
    use faer::sparse::Pair;

    fn dense_3x2() -> Jacobian {
        let mut m = Mat::zeros(3, 2);
        m[(0, 0)] = 1.0;
        m[(1, 1)] = 1.0;
        m[(2, 0)] = 1.0;
        m[(2, 1)] = 1.0;
        Jacobian::Dense(m)
    }

    fn sparse_3x2() -> Jacobian {
        let pairs = vec![
            Pair { row: 0, col: 0 },
            Pair { row: 2, col: 0 },
            Pair { row: 1, col: 1 },
            Pair { row: 2, col: 1 },
        ];
        let (sym, _) = SymbolicSparseColMat::try_new_from_indices(3, 2, &pairs).unwrap();
        Jacobian::Sparse(SparseJacobian {
            symbolic: sym,
            values: vec![1.0, 1.0, 1.0, 1.0],
        })
    }

    #[test]
    fn dense_and_sparse_products_agree() {
        let d = dense_3x2();
        let s = sparse_3x2();
        let x = [2.0, 3.0];
        assert_eq!(d.matvec(&x), s.matvec(&x));
        let y = [1.0, 2.0, 3.0];
        assert_eq!(d.rmatvec(&y), s.rmatvec(&y));
        assert_eq!(d.matvec(&x), vec![2.0, 3.0, 5.0]);
        assert_eq!(d.rmatvec(&y), vec![4.0, 5.0]);
    }

    #[test]
    fn column_scaling_in_place() {
        let x = [1.0, 1.0];
        for j in [dense_3x2(), sparse_3x2()] {
            let expected = j.matvec(&[2.0, 0.5]);
            let scaled = j.into_scaled(&[2.0, 0.5]);
            assert_eq!(scaled.matvec(&x), expected);
        }
    }

    #[test]
    fn operator_scaling_wraps() {
        struct Op;
        impl LinearOperator for Op {
            fn nrows(&self) -> usize {
                2
            }
            fn ncols(&self) -> usize {
                2
            }
            fn matvec(&self, x: &[f64]) -> Vec<f64> {
                vec![x[0] + x[1], x[1]]
            }
            fn rmatvec(&self, y: &[f64]) -> Vec<f64> {
                vec![y[0], y[0] + y[1]]
            }
        }
        let j = Jacobian::Operator(Box::new(Op)).into_scaled(&[3.0, 5.0]);
        assert_eq!(j.matvec(&[1.0, 1.0]), vec![8.0, 5.0]);
        assert_eq!(j.rmatvec(&[1.0, 1.0]), vec![3.0, 10.0]);
    }

    #[test]
    fn densify_operator_by_columns() {
        let j = sparse_3x2();
        let dense = j.to_dense();
        assert_eq!(dense[(2, 1)], 1.0);
        assert_eq!(dense[(0, 1)], 0.0);
    }

    #[test]
    fn augmented_operator_adjoint() {
        let j = dense_3x2();
        let aug = AugmentedOperator::new(&j, vec![0.5, 2.0]);
        let x = [1.0, -2.0];
        let y = [0.3, 1.0, -0.7, 0.9, 0.1];
        // <Aug x, y> == <x, Aug^T y>
        let lhs = dot(&aug.matvec(&x), &y);
        let rhs = dot(&x, &aug.rmatvec(&y));
        assert!((lhs - rhs).abs() < 1e-14);
    }

    #[test]
    fn column_norms_match_dense() {
        let d = dense_3x2().column_norms().unwrap();
        let s = sparse_3x2().column_norms().unwrap();
        assert_eq!(d, s);
        assert!((d[0] - 2.0_f64.sqrt()).abs() < 1e-15);
    }
}
