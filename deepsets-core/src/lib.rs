//! # deepsets-core
//!
//! A small reverse-mode automatic differentiation engine over
//! [ndarray](https://docs.rs/ndarray) arrays, written for differentiating
//! neural-network wavefunctions with respect to their inputs and their
//! parameters.
//!
//! # Tensors and tapes
//!
//! *See [tensor] and [gradients] for more information.*
//!
//! A [`tensor::Tensor`] is an `f32` nd-array with a runtime shape and a
//! *tape holder*. Calling `.trace()` on a tensor attaches an
//! [`gradients::OwnedTape`]; every op applied afterwards records a backward
//! closure on the tape and passes the tape on to its output. Tensors that
//! are only borrowed by an op (weights, biases) do not carry a tape, but
//! still receive gradients keyed by their [`unique_id::UniqueId`].
//!
//! ```rust
//! # use deepsets_core::prelude::*;
//! let w = Tensor::from_shape_vec(&[1, 3], vec![0.1, -0.2, 0.3]).unwrap();
//! let x = Tensor::from_shape_vec(&[2, 3], vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0]).unwrap();
//! let y = x.trace().matmul_transposed(&w).tanh();
//! let grads = y.backward().unwrap();
//! assert_eq!(grads.get(&w).unwrap().shape(), &[1, 3]);
//! assert_eq!(grads.get(&x).unwrap().shape(), &[2, 3]);
//! ```
//!
//! # Persistent traces and cotangent rows
//!
//! *See [trace] for more information.*
//!
//! `backward()` consumes the tape. `into_trace()` keeps it instead, and a
//! [`trace::Trace`] can then be run in reverse any number of times. Each
//! reverse pass is seeded with a stack of `k` cotangents; every gradient
//! buffer then carries `k` rows, one vector-Jacobian product per cotangent.
//! With one-hot cotangents this yields rows of the Jacobian, either one row
//! per pass or many rows per pass.

pub mod diff_fns;
pub mod error;
pub mod gradients;
#[cfg(feature = "safetensors")]
pub mod safetensors;
pub mod tensor;
pub mod tensor_ops;
pub mod trace;
pub mod unique_id;

pub use error::Error;

/// Contains subset of all public exports.
pub mod prelude {
    pub use crate::diff_fns::*;
    pub use crate::error::Error;
    pub use crate::gradients::{Gradients, Merge, NoneTape, OwnedTape, Tape};
    pub use crate::tensor::Tensor;
    pub use crate::trace::Trace;
    pub use crate::unique_id::{HasUniqueId, UniqueId};
}
