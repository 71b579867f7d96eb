//! Reading and writing named [Tensor]s from `.safetensors` files.

use std::collections::BTreeMap;
use std::path::Path;

use memmap2::MmapOptions;
use ndarray::{ArrayD, IxDyn};
pub use ::safetensors::tensor::SafeTensors;
use ::safetensors::{
    serialize_to_file,
    tensor::{Dtype as SDtype, TensorView},
};

use crate::{error::Error, tensor::Tensor};

struct TensorData {
    shape: Vec<usize>,
    data: Vec<u8>,
}

/// Collects tensors under string keys and writes them out in one go.
#[derive(Default)]
pub struct Writer {
    tensors: BTreeMap<String, TensorData>,
}

impl Writer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add<T>(&mut self, key: String, tensor: &Tensor<T>) {
        let shape = tensor.shape().to_vec();
        let data: Vec<u8> = tensor.array().iter().flat_map(|f| f.to_le_bytes()).collect();
        self.tensors.insert(key, TensorData { shape, data });
    }

    pub fn save(&self, path: &Path) -> Result<(), Error> {
        let mut views: BTreeMap<String, TensorView> = BTreeMap::new();
        for (k, tensor) in self.tensors.iter() {
            let view = TensorView::new(SDtype::F32, tensor.shape.clone(), &tensor.data)?;
            views.insert(k.clone(), view);
        }
        serialize_to_file(&views, &None, path)?;
        Ok(())
    }
}

/// A memory mapped `.safetensors` file.
pub struct Reader {
    buffer: memmap2::Mmap,
}

impl Reader {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, Error> {
        let f = std::fs::File::open(path)?;
        // SAFETY: the file is only read, and is not expected to be modified
        // while the map is alive.
        let buffer = unsafe { MmapOptions::new().map(&f)? };
        Ok(Self { buffer })
    }

    /// Parses the header once. Every key is then looked up in the result.
    pub fn safetensors(&self) -> Result<SafeTensors<'_>, Error> {
        Ok(SafeTensors::deserialize(&self.buffer)?)
    }
}

impl Tensor {
    /// Loads data from the [SafeTensors] storage with the given `key`,
    /// keeping this tensor's id.
    pub fn load_safetensor(&mut self, tensors: &SafeTensors<'_>, key: &str) -> Result<(), Error> {
        let view = tensors.tensor(key)?;
        if view.dtype() != SDtype::F32 {
            return Err(Error::UnsupportedDtype {
                key: key.to_string(),
                dtype: format!("{:?}", view.dtype()),
            });
        }
        if view.shape() != self.shape() {
            return Err(Error::ShapeMismatch {
                op: "load_safetensor",
                lhs: self.shape().to_vec(),
                rhs: view.shape().to_vec(),
            });
        }
        let values: Vec<f32> = view
            .data()
            .chunks_exact(4)
            .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
            .collect();
        let array = ArrayD::from_shape_vec(IxDyn(view.shape()), values).map_err(|_| {
            Error::WrongNumElements {
                expected: view.shape().iter().product(),
                found: view.data().len() / 4,
            }
        })?;
        self.set_array(array)
    }
}
