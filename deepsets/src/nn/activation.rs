use deepsets_core::prelude::*;

use super::Module;
use crate::Error;

/// Elementwise nonlinearity applied between [super::Linear] layers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Activation {
    /// Calls [Tensor::tanh()].
    #[default]
    Tanh,
    /// Calls [Tensor::sigmoid()].
    Sigmoid,
    /// Calls [Tensor::softplus()].
    Softplus,
    /// Calls [Tensor::relu()].
    ReLU,
}

impl std::str::FromStr for Activation {
    type Err = Error;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "tanh" => Ok(Self::Tanh),
            "sigmoid" => Ok(Self::Sigmoid),
            "softplus" => Ok(Self::Softplus),
            "relu" => Ok(Self::ReLU),
            other => Err(Error::InvalidConfig(format!("unknown activation `{other}`"))),
        }
    }
}

impl std::fmt::Display for Activation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Tanh => "tanh",
            Self::Sigmoid => "sigmoid",
            Self::Softplus => "softplus",
            Self::ReLU => "relu",
        };
        f.write_str(name)
    }
}

impl<T: Tape> Module<Tensor<T>> for Activation {
    type Output = Tensor<T>;
    fn try_forward(&self, input: Tensor<T>) -> Result<Self::Output, Error> {
        let output = match self {
            Self::Tanh => input.try_tanh()?,
            Self::Sigmoid => input.try_sigmoid()?,
            Self::Softplus => input.try_softplus()?,
            Self::ReLU => input.try_relu()?,
        };
        Ok(output)
    }
}
