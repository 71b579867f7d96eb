/// Errors from building, running, or differentiating a model.
///
/// Anything the tensor engine reports is wrapped in [Error::Tensor].
#[non_exhaustive]
#[derive(Debug)]
pub enum Error {
    /// Spatial dimensionality outside `1..=MAX_DIM`.
    InvalidDimensionality(usize),
    /// Some other unusable configuration value.
    InvalidConfig(String),
    Tensor(deepsets_core::Error),
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidDimensionality(d) => write!(
                f,
                "unsupported spatial dimensionality {d}, expected 1..={}",
                crate::model::MAX_DIM
            ),
            Self::InvalidConfig(msg) => write!(f, "invalid config: {msg}"),
            Self::Tensor(e) => write!(f, "tensor error: {e}"),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Tensor(e) => Some(e),
            _ => None,
        }
    }
}

impl From<deepsets_core::Error> for Error {
    fn from(e: deepsets_core::Error) -> Self {
        Self::Tensor(e)
    }
}
