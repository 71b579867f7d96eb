use deepsets_core::prelude::*;
use rand::Rng;

use super::{Activation, Linear, Module, ParamInit, ResetParams, TensorCollection};
use crate::Error;

/// A stack of [Linear] layers with an [Activation] between them.
///
/// The layer sizes are only known at runtime, so unlike a tuple of modules
/// this holds a `Vec`. Parameters are named `{i}.weight` and `{i}.bias`.
#[derive(Debug, Clone)]
pub struct FeedForward {
    pub layers: Vec<Linear>,
    pub activation: Activation,
    /// Whether the activation is also applied after the last layer.
    pub activate_last: bool,
}

impl FeedForward {
    /// Builds layers `sizes[0] -> sizes[1] -> ... -> sizes[n]`.
    pub fn build<R: Rng + ?Sized>(
        sizes: &[usize],
        activation: Activation,
        activate_last: bool,
        init: ParamInit,
        rng: &mut R,
    ) -> Result<Self, Error> {
        if sizes.len() < 2 {
            return Err(Error::InvalidConfig(format!(
                "a feed forward network needs at least 2 sizes, got {sizes:?}"
            )));
        }
        let layers = sizes
            .windows(2)
            .map(|w| Linear::build(w[0], w[1], init, rng))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self {
            layers,
            activation,
            activate_last,
        })
    }

    pub fn inp(&self) -> usize {
        self.layers.first().map_or(0, Linear::inp)
    }

    pub fn out(&self) -> usize {
        self.layers.last().map_or(0, Linear::out)
    }
}

impl ResetParams for FeedForward {
    fn try_reset_params<R: Rng + ?Sized>(&mut self, init: ParamInit, rng: &mut R) -> Result<(), Error> {
        for layer in self.layers.iter_mut() {
            layer.try_reset_params(init, rng)?;
        }
        Ok(())
    }
}

impl TensorCollection for FeedForward {
    fn visit_tensors<F: FnMut(&str, &Tensor)>(&self, prefix: &str, f: &mut F) {
        for (i, layer) in self.layers.iter().enumerate() {
            layer.visit_tensors(&format!("{prefix}{i}."), f);
        }
    }

    fn visit_tensors_mut<F>(&mut self, prefix: &str, f: &mut F) -> Result<(), Error>
    where
        F: FnMut(&str, &mut Tensor) -> Result<(), Error>,
    {
        for (i, layer) in self.layers.iter_mut().enumerate() {
            layer.visit_tensors_mut(&format!("{prefix}{i}."), f)?;
        }
        Ok(())
    }
}

impl<T: Tape> Module<Tensor<T>> for FeedForward {
    type Output = Tensor<T>;

    fn try_forward(&self, mut x: Tensor<T>) -> Result<Self::Output, Error> {
        let last = self.layers.len().saturating_sub(1);
        for (i, layer) in self.layers.iter().enumerate() {
            x = layer.try_forward(x)?;
            if i < last || self.activate_last {
                x = self.activation.try_forward(x)?;
            }
        }
        Ok(x)
    }
}
