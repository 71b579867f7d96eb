//! Persistent traces: a recorded forward pass that can be run in reverse
//! many times with different cotangents.

use std::ops::Range;

use ndarray::{ArrayD, IxDyn};

use crate::error::Error;
use crate::gradients::{Gradients, OwnedTape};
use crate::tensor::Tensor;

/// The output of a traced forward pass together with its tape.
///
/// Unlike [Tensor::backward], which consumes the tape, a [Trace] can be
/// asked for as many reverse passes as needed.
#[derive(Debug)]
pub struct Trace {
    output: Tensor,
    tape: OwnedTape,
}

impl Tensor<OwnedTape> {
    /// Detaches the tape and keeps it for repeated reverse passes.
    pub fn into_trace(self) -> Trace {
        let (output, tape) = self.split_tape();
        Trace { output, tape }
    }

    /// Gradient of the sum of every element of `self` with respect to every
    /// tensor that participated in computing it.
    pub fn backward(self) -> Result<Gradients, Error> {
        self.into_trace().grad_of_sum()
    }
}

impl Trace {
    pub fn output(&self) -> &Tensor {
        &self.output
    }

    pub fn num_ops(&self) -> usize {
        self.tape.num_ops()
    }

    /// Runs the tape in reverse, seeded with `cotangents` of shape
    /// `(k,) + output_shape`. Every reached tensor ends up with `k` gradient
    /// rows, row `i` being the vector-Jacobian product with cotangent `i`.
    pub fn vjp(&self, cotangents: ArrayD<f32>) -> Result<Gradients, Error> {
        if cotangents.ndim() != self.output.ndim() + 1
            || &cotangents.shape()[1..] != self.output.shape()
        {
            return Err(Error::ShapeMismatch {
                op: "vjp",
                lhs: cotangents.shape().to_vec(),
                rhs: self.output.shape().to_vec(),
            });
        }
        let mut grads = Gradients::new(cotangents.shape()[0]);
        grads.insert(self.output.id, cotangents);
        self.tape.execute(&mut grads)?;
        tracing::trace!(
            num_cotangents = grads.num_cotangents(),
            peak_bytes = grads.peak_bytes(),
            "reverse pass"
        );
        Ok(grads)
    }

    /// Gradient of the summed output.
    pub fn grad_of_sum(&self) -> Result<Gradients, Error> {
        let mut shape = vec![1];
        shape.extend_from_slice(self.output.shape());
        self.vjp(ArrayD::ones(IxDyn(&shape)))
    }

    /// Gradient of the output element at row-major position `index`.
    pub fn grad_of_element(&self, index: usize) -> Result<Gradients, Error> {
        self.vjp(self.unit_cotangents(index..index + 1)?)
    }

    /// Stacked one-hot cotangents selecting the output elements in `rows`
    /// (row-major positions), shape `(rows.len(),) + output_shape`.
    pub fn unit_cotangents(&self, rows: Range<usize>) -> Result<ArrayD<f32>, Error> {
        let numel = self.output.num_elements();
        if rows.end > numel || rows.start > rows.end {
            return Err(Error::WrongNumElements {
                expected: numel,
                found: rows.end,
            });
        }
        let k = rows.len();
        let mut flat = ndarray::Array2::<f32>::zeros((k, numel));
        for (row, index) in rows.enumerate() {
            flat[[row, index]] = 1.0;
        }
        let mut shape = vec![k];
        shape.extend_from_slice(self.output.shape());
        flat.into_shape(IxDyn(&shape))
            .map_err(|_| Error::WrongNumElements {
                expected: k * numel,
                found: shape.iter().product(),
            })
    }
}
