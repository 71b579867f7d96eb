//! The [Tensor] struct, and methods to create them and move tapes between them.
//!
//! A tensor is an immutable, reference counted nd-array of `f32` together
//! with a tape holder. The tape holder is either [NoneTape] (nothing is
//! recorded) or [OwnedTape] (every op applied to the tensor records a
//! backward op onto the tape, and the tape moves into the op's output).
//!
//! ```rust
//! # use deepsets_core::prelude::*;
//! let w = Tensor::from_shape_vec(&[1, 2], vec![1.0, -2.0]).unwrap();
//! let x = Tensor::from_shape_vec(&[3, 2], vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0]).unwrap();
//! let y = x.trace().matmul_transposed(&w);
//! assert_eq!(y.shape(), &[3, 1]);
//! let grads = y.backward().unwrap();
//! assert_eq!(grads.get(&w).unwrap().as_slice().unwrap(), &[9.0, 12.0]);
//! ```

use std::sync::Arc;

use ndarray::{ArrayD, IxDyn};
use ndarray_rand::RandomExt;
use rand::Rng;
use rand_distr::Uniform;

use crate::error::Error;
use crate::gradients::{NoneTape, OwnedTape, Tape};
use crate::unique_id::{unique_id, HasUniqueId, UniqueId};

/// An nd-array of `f32` with a [UniqueId] and a tape holder `T`.
#[derive(Debug, Clone)]
pub struct Tensor<T = NoneTape> {
    pub(crate) id: UniqueId,
    pub(crate) data: Arc<ArrayD<f32>>,
    pub(crate) tape: T,
}

impl<T> HasUniqueId for Tensor<T> {
    fn id(&self) -> &UniqueId {
        &self.id
    }
}

impl Tensor<NoneTape> {
    /// Wraps `array` in a new tensor with a fresh id.
    pub fn new(array: ArrayD<f32>) -> Self {
        Self {
            id: unique_id(),
            data: Arc::new(array),
            tape: NoneTape,
        }
    }

    /// Creates a tensor from row-major `data`.
    pub fn from_shape_vec(shape: &[usize], data: Vec<f32>) -> Result<Self, Error> {
        let expected: usize = shape.iter().product();
        if expected != data.len() {
            return Err(Error::WrongNumElements {
                expected,
                found: data.len(),
            });
        }
        let array = ArrayD::from_shape_vec(IxDyn(shape), data).map_err(|_| {
            Error::WrongNumElements {
                expected,
                found: expected,
            }
        })?;
        Ok(Self::new(array))
    }

    pub fn zeros(shape: &[usize]) -> Self {
        Self::new(ArrayD::zeros(IxDyn(shape)))
    }

    /// Samples every element from `U[low, high)`.
    ///
    /// **Panics** if `low >= high`.
    pub fn sample_uniform<R: Rng + ?Sized>(shape: &[usize], low: f32, high: f32, rng: &mut R) -> Self {
        Self::new(ArrayD::random_using(IxDyn(shape), Uniform::new(low, high), rng))
    }

    /// Clones `self` and returns a copy with [OwnedTape] as the tape holder.
    ///
    /// See `traced` for a version that takes ownership of the tensor.
    pub fn trace(&self) -> Tensor<OwnedTape> {
        self.retaped()
    }

    /// Takes ownership of `self` and inserts [OwnedTape] as the tape holder.
    pub fn traced(self) -> Tensor<OwnedTape> {
        self.put_tape(Default::default())
    }

    /// Replaces the data of this tensor, keeping its id.
    pub fn set_array(&mut self, array: ArrayD<f32>) -> Result<(), Error> {
        if array.shape() != self.shape() {
            return Err(Error::ShapeMismatch {
                op: "set_array",
                lhs: self.shape().to_vec(),
                rhs: array.shape().to_vec(),
            });
        }
        self.data = Arc::new(array);
        Ok(())
    }
}

impl<T> Tensor<T> {
    pub fn shape(&self) -> &[usize] {
        self.data.shape()
    }

    pub fn ndim(&self) -> usize {
        self.data.ndim()
    }

    pub fn num_elements(&self) -> usize {
        self.data.len()
    }

    pub fn array(&self) -> &ArrayD<f32> {
        &self.data
    }

    /// Copies the elements out in row-major order.
    pub fn as_vec(&self) -> Vec<f32> {
        self.data.iter().copied().collect()
    }

    /// Separates the tape from the data. The returned tensor keeps the id.
    pub fn split_tape(self) -> (Tensor<NoneTape>, T) {
        (
            Tensor {
                id: self.id,
                data: self.data,
                tape: NoneTape,
            },
            self.tape,
        )
    }

    /// Swaps the tape holder, keeping id and data.
    pub fn put_tape<U>(self, tape: U) -> Tensor<U> {
        Tensor {
            id: self.id,
            data: self.data,
            tape,
        }
    }

    /// A copy of this tensor sharing id and data, with an empty tape of type `U`.
    ///
    /// Gradients recorded against the copy accumulate into the same id as
    /// `self`, which is how one tensor feeds two branches of a graph.
    pub fn retaped<U: Tape>(&self) -> Tensor<U> {
        Tensor {
            id: self.id,
            data: self.data.clone(),
            tape: Default::default(),
        }
    }

    /// Wraps the result of an op: fresh id, given tape.
    pub(crate) fn from_op(array: ArrayD<f32>, tape: T) -> Self {
        Self {
            id: unique_id(),
            data: Arc::new(array),
            tape,
        }
    }
}
