use std::path::Path;

use deepsets_core::{
    prelude::*,
    safetensors::{Reader, Writer},
};

use super::TensorCollection;
use crate::Error;

/// Something that can be saved to a `.safetensors`.
///
/// Every [TensorCollection] implements SaveToSafetensors. Entries are keyed
/// by the visited parameter names.
pub trait SaveToSafetensors: TensorCollection {
    /// Save this object into the `.safetensors` file located at `path`.
    ///
    /// Example:
    /// ```ignore
    /// # use deepsets::prelude::*;
    /// model.save_safetensors("model.safetensors").unwrap();
    /// ```
    fn save_safetensors<P: AsRef<Path>>(&self, path: P) -> Result<(), Error> {
        let mut w = Writer::new();
        self.visit_tensors("", &mut |name: &str, t: &Tensor| w.add(name.to_string(), t));
        Ok(w.save(path.as_ref())?)
    }
}
impl<T: TensorCollection> SaveToSafetensors for T {}

/// Something that can be loaded from a `.safetensors` file.
///
/// Loading keeps the ids of the existing parameters, and fails if an entry
/// is missing or has a different shape.
pub trait LoadFromSafetensors: TensorCollection {
    fn load_safetensors<P: AsRef<Path>>(&mut self, path: P) -> Result<(), Error> {
        let reader = Reader::open(path)?;
        let tensors = reader.safetensors()?;
        self.visit_tensors_mut("", &mut |name: &str, t: &mut Tensor| {
            Ok(t.load_safetensor(&tensors, name)?)
        })
    }
}
impl<T: TensorCollection> LoadFromSafetensors for T {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::nn::{Activation, FeedForward, Linear, Module, ParamInit};
    use rand::{rngs::StdRng, SeedableRng};
    use tempfile::NamedTempFile;

    #[test]
    fn test_save_load_feed_forward() {
        let mut rng = StdRng::seed_from_u64(0);
        let file = NamedTempFile::new().expect("failed to create tempfile");
        let saved = FeedForward::build(&[3, 5, 2], Activation::Tanh, false, ParamInit::Uniform, &mut rng)
            .unwrap();
        let mut loaded =
            FeedForward::build(&[3, 5, 2], Activation::Tanh, false, ParamInit::Uniform, &mut rng).unwrap();

        let x = Tensor::sample_uniform(&[4, 3], -1.0, 1.0, &mut rng);
        let y = saved.forward(x.clone());
        assert_ne!(loaded.forward(x.clone()).as_vec(), y.as_vec());

        saved.save_safetensors(file.path()).expect("");
        loaded.load_safetensors(file.path()).expect("");
        assert_eq!(loaded.forward(x).as_vec(), y.as_vec());
    }

    #[test]
    fn test_load_rejects_other_shapes() {
        let mut rng = StdRng::seed_from_u64(0);
        let file = NamedTempFile::new().expect("failed to create tempfile");
        let saved = Linear::build(3, 2, ParamInit::Uniform, &mut rng).unwrap();
        let mut other = Linear::build(4, 2, ParamInit::Uniform, &mut rng).unwrap();
        saved.save_safetensors(file.path()).expect("");
        assert!(matches!(
            other.load_safetensors(file.path()),
            Err(Error::Tensor(deepsets_core::Error::ShapeMismatch { .. }))
        ));
    }
}
