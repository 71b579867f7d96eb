use deepsets_core::prelude::*;
use ndarray::{ArrayD, IxDyn};
use rand::Rng;

use super::{Module, ParamInit, ResetParams, TensorCollection};
use crate::Error;

/// A linear transformation of the form `x · weightᵀ + bias`, acting on the
/// last axis of `x`.
///
/// - `weight` has shape `(O, I)`
/// - `bias` has shape `(O,)`
///
/// so a `(W, P, I)` batch of particle features maps to `(W, P, O)`.
///
/// Initializes [Self::weight] and [Self::bias] from a Uniform distribution
/// between [-1 / sqrt(I), 1 / sqrt(I)] (see [ParamInit]).
#[derive(Debug, Clone)]
pub struct Linear {
    /// Transposed weight matrix, shape (O, I)
    pub weight: Tensor,

    /// Bias vector, shape (O, )
    pub bias: Tensor,
}

impl Linear {
    pub fn build<R: Rng + ?Sized>(inp: usize, out: usize, init: ParamInit, rng: &mut R) -> Result<Self, Error> {
        if inp == 0 || out == 0 {
            return Err(Error::InvalidConfig(format!(
                "linear layer sizes must be non-zero, got {inp} -> {out}"
            )));
        }
        let mut layer = Self {
            weight: Tensor::zeros(&[out, inp]),
            bias: Tensor::zeros(&[out]),
        };
        layer.try_reset_params(init, rng)?;
        Ok(layer)
    }

    pub fn inp(&self) -> usize {
        self.weight.shape()[1]
    }

    pub fn out(&self) -> usize {
        self.weight.shape()[0]
    }
}

impl ResetParams for Linear {
    fn try_reset_params<R: Rng + ?Sized>(&mut self, init: ParamInit, rng: &mut R) -> Result<(), Error> {
        let (inp, out) = (self.inp(), self.out());
        match init {
            ParamInit::Zeros => {
                self.weight.set_array(ArrayD::zeros(IxDyn(&[out, inp])))?;
                self.bias.set_array(ArrayD::zeros(IxDyn(&[out])))?;
            }
            ParamInit::Uniform => {
                let bound: f32 = 1.0 / (inp as f32).sqrt();
                let weight = Tensor::sample_uniform(&[out, inp], -bound, bound, rng);
                let bias = Tensor::sample_uniform(&[out], -bound, bound, rng);
                self.weight.set_array(weight.array().clone())?;
                self.bias.set_array(bias.array().clone())?;
            }
        }
        Ok(())
    }
}

impl TensorCollection for Linear {
    fn visit_tensors<F: FnMut(&str, &Tensor)>(&self, prefix: &str, f: &mut F) {
        f(&format!("{prefix}weight"), &self.weight);
        f(&format!("{prefix}bias"), &self.bias);
    }

    fn visit_tensors_mut<F>(&mut self, prefix: &str, f: &mut F) -> Result<(), Error>
    where
        F: FnMut(&str, &mut Tensor) -> Result<(), Error>,
    {
        f(&format!("{prefix}weight"), &mut self.weight)?;
        f(&format!("{prefix}bias"), &mut self.bias)
    }
}

impl<T: Tape> Module<Tensor<T>> for Linear {
    type Output = Tensor<T>;

    fn try_forward(&self, x: Tensor<T>) -> Result<Self::Output, Error> {
        Ok(x.try_matmul_transposed(&self.weight)?.try_broadcast_add(&self.bias)?)
    }
}
