//! High level neural network building blocks such as [Linear], activations,
//! and a runtime sized [FeedForward] stack.
//!
//! # Traits
//!
//! - [Module] is the forward pass: `try_forward` maps an input (usually a
//!   [Tensor] with any tape) to an output.
//! - [TensorCollection] visits every parameter tensor in a fixed order with
//!   a dotted name (e.g. `phi.0.weight`). Counting parameters, collecting
//!   them for Jacobians, and saving/loading `.safetensors` are all built on it.
//! - [ResetParams] re-initializes parameters with a [ParamInit].

mod activation;
mod feed_forward;
mod linear;
#[cfg(feature = "safetensors")]
mod safetensors;

pub use activation::Activation;
pub use feed_forward::FeedForward;
pub use linear::Linear;
#[cfg(feature = "safetensors")]
pub use self::safetensors::{LoadFromSafetensors, SaveToSafetensors};

use deepsets_core::prelude::*;
use rand::Rng;

use crate::Error;

/// A unit of a neural network. Acts on the generic `Input`
/// and produces `Module::Output`.
///
/// Generic `Input` means you can implement module for multiple
/// input types on the same struct. Everything in this crate implements
/// [Module] for `Tensor<T>` with any tape `T`.
pub trait Module<Input> {
    type Output;

    fn try_forward(&self, input: Input) -> Result<Self::Output, Error>;

    fn forward(&self, input: Input) -> Self::Output {
        self.try_forward(input).unwrap()
    }
}

/// How parameters are initialized.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ParamInit {
    /// Weights and biases from `U[-1/sqrt(fan_in), 1/sqrt(fan_in))`.
    #[default]
    Uniform,
    /// Every parameter set to zero. With this init a Deep Sets model outputs
    /// exactly its boundary term.
    Zeros,
}

pub trait ResetParams {
    fn try_reset_params<R: Rng + ?Sized>(&mut self, init: ParamInit, rng: &mut R) -> Result<(), Error>;

    fn reset_params<R: Rng + ?Sized>(&mut self, init: ParamInit, rng: &mut R) {
        self.try_reset_params(init, rng).unwrap()
    }
}

/// Something that owns parameter tensors and can visit them by name.
pub trait TensorCollection {
    /// Calls `f` with the full name and a reference to every parameter,
    /// always in the same order.
    fn visit_tensors<F: FnMut(&str, &Tensor)>(&self, prefix: &str, f: &mut F);

    /// Like [TensorCollection::visit_tensors] with mutable access, stopping
    /// at the first error.
    fn visit_tensors_mut<F>(&mut self, prefix: &str, f: &mut F) -> Result<(), Error>
    where
        F: FnMut(&str, &mut Tensor) -> Result<(), Error>;
}

/// Convenience methods for every [TensorCollection].
pub trait Parameters: TensorCollection {
    /// Total number of scalar parameters.
    ///
    /// ```rust
    /// # use deepsets::prelude::*;
    /// # use rand::{rngs::StdRng, SeedableRng};
    /// let mut rng = StdRng::seed_from_u64(0);
    /// let layer = Linear::build(2, 5, ParamInit::Uniform, &mut rng).unwrap();
    /// assert_eq!(layer.num_params(), 2 * 5 + 5);
    /// ```
    fn num_params(&self) -> usize {
        let mut count = 0;
        self.visit_tensors("", &mut |_: &str, t: &Tensor| count += t.num_elements());
        count
    }

    /// The parameters in visiting order. The returned tensors share ids
    /// (and data) with the originals, so gradients for them are gradients
    /// for the model.
    fn named_parameters(&self) -> Vec<(String, Tensor)> {
        let mut params = Vec::new();
        self.visit_tensors("", &mut |name: &str, t: &Tensor| {
            params.push((name.to_string(), t.clone()))
        });
        params
    }
}

impl<M: TensorCollection + ?Sized> Parameters for M {}
