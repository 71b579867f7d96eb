/// Represents the errors that can occur when building tensors, recording
/// operations on them, or running reverse passes.
#[non_exhaustive]
#[derive(Debug)]
pub enum Error {
    /// Two tensors (or a tensor and an array) had incompatible shapes.
    ShapeMismatch {
        op: &'static str,
        lhs: Vec<usize>,
        rhs: Vec<usize>,
    },
    /// An axis argument was not smaller than the number of dimensions.
    AxisOutOfBounds { axis: usize, ndim: usize },
    /// Not enough (or too many) elements were provided for a shape
    WrongNumElements { expected: usize, found: usize },
    /// A gradient was requested for a tensor the reverse pass never reached.
    MissingGradient(crate::unique_id::UniqueId),
    /// A `.safetensors` entry is stored with a dtype other than `F32`.
    #[cfg(feature = "safetensors")]
    UnsupportedDtype { key: String, dtype: String },
    #[cfg(feature = "safetensors")]
    SafeTensors(::safetensors::SafeTensorError),
    #[cfg(feature = "safetensors")]
    Io(std::io::Error),
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ShapeMismatch { op, lhs, rhs } => {
                write!(f, "shape mismatch in `{op}`: {lhs:?} vs {rhs:?}")
            }
            Self::AxisOutOfBounds { axis, ndim } => {
                write!(f, "axis {axis} out of bounds for a tensor with {ndim} dims")
            }
            Self::WrongNumElements { expected, found } => {
                write!(f, "expected {expected} elements, found {found}")
            }
            Self::MissingGradient(id) => write!(f, "no gradient recorded for tensor {}", **id),
            #[cfg(feature = "safetensors")]
            Self::UnsupportedDtype { key, dtype } => {
                write!(f, "`{key}` has dtype {dtype}, expected F32")
            }
            #[cfg(feature = "safetensors")]
            Self::SafeTensors(e) => write!(f, "safetensors: {e:?}"),
            #[cfg(feature = "safetensors")]
            Self::Io(e) => write!(f, "io: {e}"),
        }
    }
}

impl std::error::Error for Error {}

#[cfg(feature = "safetensors")]
impl From<::safetensors::SafeTensorError> for Error {
    fn from(e: ::safetensors::SafeTensorError) -> Self {
        Self::SafeTensors(e)
    }
}

#[cfg(feature = "safetensors")]
impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e)
    }
}
