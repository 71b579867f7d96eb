//! Operations on tensors like [Tensor::tanh()], [Tensor::matmul_transposed()],
//! [Tensor::sum_axis()], etc.
//!
//! Every op has a fallible `try_*` form returning `Result<_, Error>`, and a
//! plain form that unwraps it. All ops are generic over the tape holder: on
//! a [crate::gradients::NoneTape] tensor nothing is recorded, on an
//! [crate::gradients::OwnedTape] tensor a backward op is pushed onto the tape
//! and the tape moves into the result.
//!
//! Backward ops follow one convention: the gradient of the op's output is
//! *taken* out of [crate::gradients::Gradients] (it is final by the time
//! the op runs, and no longer needed afterwards), and contributions are
//! accumulated into the parents' buffers. Every buffer has a leading
//! cotangent axis, so one reverse pass can carry many cotangents at once.
//!
//! [Tensor::tanh()]: crate::tensor::Tensor::tanh
//! [Tensor::matmul_transposed()]: crate::tensor::Tensor::matmul_transposed
//! [Tensor::sum_axis()]: crate::tensor::Tensor::sum_axis

mod add;
mod matmul;
mod reduce;
mod reshape;
mod unary;

use crate::error::Error;

/// `(k,) + shape`
pub(crate) fn with_cotangent_axis(k: usize, shape: &[usize]) -> Vec<usize> {
    let mut full = Vec::with_capacity(shape.len() + 1);
    full.push(k);
    full.extend_from_slice(shape);
    full
}

pub(crate) fn shape_mismatch(op: &'static str, lhs: &[usize], rhs: &[usize]) -> Error {
    Error::ShapeMismatch {
        op,
        lhs: lhs.to_vec(),
        rhs: rhs.to_vec(),
    }
}
