//! The Deep Sets wavefunction: a permutation invariant map from a walker's
//! particle coordinates to a scalar log-amplitude.
//!
//! For a walker `x` of shape `(P, D)`:
//!
//! ```text
//! x_c     = x - mean_p(x)                    (if mean_subtraction)
//! log_psi = rho( Σ_p phi(x_c[p]) ) - Σ_p Σ_d x_c[p, d]²
//!                                    \_______________/
//!                                    if boundary_condition
//! ```
//!
//! `phi` is shared over particles and the only interaction between
//! particles is the sum, so the output does not depend on particle order.

use deepsets_core::prelude::*;
use ndarray::ArrayD;
use rand::Rng;

use crate::nn::{Activation, FeedForward, Module, ParamInit, ResetParams, TensorCollection};
use crate::Error;

/// Largest supported spatial dimensionality.
pub const MAX_DIM: usize = 3;

/// Configuration of a [DeepSetsWavefunction].
#[derive(Debug, Clone, PartialEq)]
pub struct DeepSetsConfig {
    pub num_particles: usize,
    /// Spatial dimensionality, 1 to [MAX_DIM].
    pub dim: usize,
    /// Width of the per-particle feature vector that gets summed.
    pub latent_size: usize,
    /// Hidden layer widths of `phi` (dim -> hidden.. -> latent_size).
    pub phi_hidden: Vec<usize>,
    /// Hidden layer widths of `rho` (latent_size -> hidden.. -> 1).
    pub rho_hidden: Vec<usize>,
    pub activation: Activation,
    pub mean_subtraction: bool,
    pub boundary_condition: bool,
    pub init: ParamInit,
}

impl Default for DeepSetsConfig {
    fn default() -> Self {
        Self {
            num_particles: 4,
            dim: 3,
            latent_size: 16,
            phi_hidden: vec![16],
            rho_hidden: vec![16],
            activation: Activation::Tanh,
            mean_subtraction: true,
            boundary_condition: true,
            init: ParamInit::Uniform,
        }
    }
}

impl DeepSetsConfig {
    /// Checks the configuration without building anything.
    pub fn validate(&self) -> Result<(), Error> {
        if self.dim == 0 || self.dim > MAX_DIM {
            return Err(Error::InvalidDimensionality(self.dim));
        }
        if self.num_particles == 0 {
            return Err(Error::InvalidConfig("num_particles must be at least 1".into()));
        }
        if self.latent_size == 0 {
            return Err(Error::InvalidConfig("latent_size must be at least 1".into()));
        }
        if let Some(h) = self.phi_hidden.iter().chain(self.rho_hidden.iter()).find(|h| **h == 0) {
            return Err(Error::InvalidConfig(format!("hidden layer width must be non-zero, got {h}")));
        }
        Ok(())
    }

    fn phi_sizes(&self) -> Vec<usize> {
        let mut sizes = vec![self.dim];
        sizes.extend_from_slice(&self.phi_hidden);
        sizes.push(self.latent_size);
        sizes
    }

    fn rho_sizes(&self) -> Vec<usize> {
        let mut sizes = vec![self.latent_size];
        sizes.extend_from_slice(&self.rho_hidden);
        sizes.push(1);
        sizes
    }
}

/// A Deep Sets model over walkers of shape `(num_particles, dim)`.
///
/// Accepts batches of shape `(W, num_particles, dim)` with any tape and
/// returns `(W, 1)`. Parameters are visited as `phi.{i}.weight`,
/// `phi.{i}.bias`, then `rho.{i}.weight`, `rho.{i}.bias`.
#[derive(Debug, Clone)]
pub struct DeepSetsWavefunction {
    pub phi: FeedForward,
    pub rho: FeedForward,
    config: DeepSetsConfig,
}

impl DeepSetsWavefunction {
    pub fn build<R: Rng + ?Sized>(config: DeepSetsConfig, rng: &mut R) -> Result<Self, Error> {
        config.validate()?;
        let phi = FeedForward::build(&config.phi_sizes(), config.activation, true, config.init, rng)?;
        let rho = FeedForward::build(&config.rho_sizes(), config.activation, false, config.init, rng)?;
        tracing::debug!(
            num_particles = config.num_particles,
            dim = config.dim,
            latent_size = config.latent_size,
            "built deep sets wavefunction"
        );
        Ok(Self { phi, rho, config })
    }

    pub fn config(&self) -> &DeepSetsConfig {
        &self.config
    }

    /// Draws `num_walkers` walkers with coordinates from `U[0, 1)`.
    pub fn sample_walkers<R: Rng + ?Sized>(&self, num_walkers: usize, rng: &mut R) -> Tensor {
        Tensor::sample_uniform(
            &[num_walkers, self.config.num_particles, self.config.dim],
            0.0,
            1.0,
            rng,
        )
    }

    fn check_input<T>(&self, x: &Tensor<T>) -> Result<(), Error> {
        let s = x.shape();
        if s.len() != 3 || s[1] != self.config.num_particles || s[2] != self.config.dim {
            return Err(deepsets_core::Error::ShapeMismatch {
                op: "DeepSetsWavefunction::forward",
                lhs: s.to_vec(),
                rhs: vec![s.first().copied().unwrap_or(0), self.config.num_particles, self.config.dim],
            }
            .into());
        }
        Ok(())
    }

    /// Gradient of the summed log-amplitude with respect to every
    /// coordinate, shaped like `x`.
    pub fn input_gradient(&self, x: &Tensor) -> Result<ArrayD<f32>, Error> {
        let grads = self.try_forward(x.trace())?.backward()?;
        Ok(grads.get(x)?.to_owned())
    }
}

impl ResetParams for DeepSetsWavefunction {
    fn try_reset_params<R: Rng + ?Sized>(&mut self, init: ParamInit, rng: &mut R) -> Result<(), Error> {
        self.phi.try_reset_params(init, rng)?;
        self.rho.try_reset_params(init, rng)
    }
}

impl TensorCollection for DeepSetsWavefunction {
    fn visit_tensors<F: FnMut(&str, &Tensor)>(&self, prefix: &str, f: &mut F) {
        self.phi.visit_tensors(&format!("{prefix}phi."), f);
        self.rho.visit_tensors(&format!("{prefix}rho."), f);
    }

    fn visit_tensors_mut<F>(&mut self, prefix: &str, f: &mut F) -> Result<(), Error>
    where
        F: FnMut(&str, &mut Tensor) -> Result<(), Error>,
    {
        self.phi.visit_tensors_mut(&format!("{prefix}phi."), f)?;
        self.rho.visit_tensors_mut(&format!("{prefix}rho."), f)
    }
}

impl<T: Tape> Module<Tensor<T>> for DeepSetsWavefunction {
    type Output = Tensor<T>;

    fn try_forward(&self, x: Tensor<T>) -> Result<Self::Output, Error> {
        self.check_input(&x)?;
        let num_walkers = x.shape()[0];
        let x = if self.config.mean_subtraction {
            x.try_center_along(1)?
        } else {
            x
        };

        // x feeds both the network and the boundary term
        let (x, tape) = x.split_tape();
        let features = self.phi.try_forward(x.clone().put_tape(tape))?;
        let log_psi = self.rho.try_forward(features.try_sum_axis(1)?)?;
        if !self.config.boundary_condition {
            return Ok(log_psi);
        }

        let boundary = x
            .retaped::<T>()
            .try_square()?
            .try_sum_axis(2)?
            .try_sum_axis(1)?
            .try_reshape(&[num_walkers, 1])?
            .try_negate()?;
        Ok(log_psi.try_add(boundary)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::nn::Parameters;
    use crate::tests::assert_close;
    use rand::{rngs::StdRng, SeedableRng};

    fn zeros_config(num_particles: usize, dim: usize) -> DeepSetsConfig {
        DeepSetsConfig {
            num_particles,
            dim,
            init: ParamInit::Zeros,
            ..Default::default()
        }
    }

    #[test]
    fn test_dimensionality_bounds() {
        let mut rng = StdRng::seed_from_u64(0);
        for dim in 1..=3 {
            let cfg = DeepSetsConfig { dim, ..Default::default() };
            assert!(DeepSetsWavefunction::build(cfg, &mut rng).is_ok());
        }
        for dim in [0, 4] {
            let cfg = DeepSetsConfig { dim, ..Default::default() };
            assert!(matches!(
                DeepSetsWavefunction::build(cfg, &mut rng),
                Err(Error::InvalidDimensionality(d)) if d == dim
            ));
        }
    }

    #[test]
    fn test_invalid_sizes() {
        let mut rng = StdRng::seed_from_u64(0);
        let bad = [
            DeepSetsConfig { num_particles: 0, ..Default::default() },
            DeepSetsConfig { latent_size: 0, ..Default::default() },
            DeepSetsConfig { phi_hidden: vec![8, 0], ..Default::default() },
        ];
        for cfg in bad {
            assert!(matches!(
                DeepSetsWavefunction::build(cfg, &mut rng),
                Err(Error::InvalidConfig(_))
            ));
        }
    }

    #[test]
    fn test_parameter_names_and_shapes() {
        let mut rng = StdRng::seed_from_u64(0);
        let cfg = DeepSetsConfig {
            num_particles: 3,
            dim: 2,
            latent_size: 5,
            phi_hidden: vec![4],
            rho_hidden: vec![],
            ..Default::default()
        };
        let model = DeepSetsWavefunction::build(cfg, &mut rng).unwrap();
        let params: Vec<(String, Vec<usize>)> = model
            .named_parameters()
            .into_iter()
            .map(|(n, t)| (n, t.shape().to_vec()))
            .collect();
        assert_eq!(
            params,
            vec![
                ("phi.0.weight".to_string(), vec![4, 2]),
                ("phi.0.bias".to_string(), vec![4]),
                ("phi.1.weight".to_string(), vec![5, 4]),
                ("phi.1.bias".to_string(), vec![5]),
                ("rho.0.weight".to_string(), vec![1, 5]),
                ("rho.0.bias".to_string(), vec![1]),
            ]
        );
        assert_eq!(model.num_params(), 8 + 4 + 20 + 5 + 5 + 1);
    }

    #[test]
    fn test_zero_weights_literal_walker() {
        let mut rng = StdRng::seed_from_u64(0);
        let model = DeepSetsWavefunction::build(zeros_config(2, 1), &mut rng).unwrap();
        let x = Tensor::from_shape_vec(&[1, 2, 1], vec![0.5, -0.5]).unwrap();
        assert_close(model.forward(x).array(), &[-0.5], 1e-6);
    }

    #[test]
    fn test_zero_weights_boundary_is_centered() {
        let mut rng = StdRng::seed_from_u64(0);
        let model = DeepSetsWavefunction::build(zeros_config(2, 1), &mut rng).unwrap();
        // shifting a walker does not change the centered coordinates
        let x = Tensor::from_shape_vec(&[2, 2, 1], vec![0.5, -0.5, 3.5, 2.5]).unwrap();
        assert_close(model.forward(x).array(), &[-0.5, -0.5], 1e-5);

        let cfg = DeepSetsConfig {
            mean_subtraction: false,
            ..zeros_config(2, 1)
        };
        let model = DeepSetsWavefunction::build(cfg, &mut rng).unwrap();
        let x = Tensor::from_shape_vec(&[1, 2, 1], vec![1.0, 2.0]).unwrap();
        assert_close(model.forward(x).array(), &[-5.0], 1e-6);
    }

    #[test]
    fn test_no_boundary_zero_weights_is_zero() {
        let mut rng = StdRng::seed_from_u64(0);
        let cfg = DeepSetsConfig {
            boundary_condition: false,
            ..zeros_config(3, 2)
        };
        let model = DeepSetsWavefunction::build(cfg, &mut rng).unwrap();
        let x = model.sample_walkers(4, &mut rng);
        assert!(model.forward(x).as_vec().iter().all(|v| *v == 0.0));
    }

    #[test]
    fn test_permutation_invariance() {
        let mut rng = StdRng::seed_from_u64(3);
        let cfg = DeepSetsConfig { num_particles: 3, dim: 2, ..Default::default() };
        let model = DeepSetsWavefunction::build(cfg, &mut rng).unwrap();
        let x = Tensor::from_shape_vec(&[1, 3, 2], vec![0.1, 0.2, 0.7, 0.4, 0.9, 0.3]).unwrap();
        let permuted = Tensor::from_shape_vec(&[1, 3, 2], vec![0.9, 0.3, 0.1, 0.2, 0.7, 0.4]).unwrap();
        let a = model.forward(x).as_vec();
        let b = model.forward(permuted).as_vec();
        assert!((a[0] - b[0]).abs() < 1e-5, "{a:?} != {b:?}");
    }

    #[test]
    fn test_rejects_wrong_input_shape() {
        let mut rng = StdRng::seed_from_u64(0);
        let model = DeepSetsWavefunction::build(DeepSetsConfig::default(), &mut rng).unwrap();
        assert!(model.try_forward(Tensor::zeros(&[2, 4, 2])).is_err());
        assert!(model.try_forward(Tensor::zeros(&[2, 3, 3])).is_err());
        assert!(model.try_forward(Tensor::zeros(&[4, 3])).is_err());
    }

    #[test]
    fn test_input_gradient_of_boundary() {
        let mut rng = StdRng::seed_from_u64(0);
        let model = DeepSetsWavefunction::build(zeros_config(2, 2), &mut rng).unwrap();
        let x = Tensor::from_shape_vec(&[1, 2, 2], vec![1.0, 0.0, 3.0, 2.0]).unwrap();
        // centered: [[-1, -1], [1, 1]], d/dx of -Σ x_c² is -2 x_c
        let g = model.input_gradient(&x).unwrap();
        assert_close(&g, &[2.0, 2.0, -2.0, -2.0], 1e-5);
    }

    #[test]
    fn test_input_gradient_matches_finite_differences() {
        let mut rng = StdRng::seed_from_u64(7);
        let cfg = DeepSetsConfig { num_particles: 3, dim: 2, ..Default::default() };
        let model = DeepSetsWavefunction::build(cfg, &mut rng).unwrap();
        let x = model.sample_walkers(2, &mut rng);
        let g = model.input_gradient(&x).unwrap();

        let h = 1e-2;
        let base = x.as_vec();
        for i in 0..base.len() {
            let mut plus = base.clone();
            let mut minus = base.clone();
            plus[i] += h;
            minus[i] -= h;
            let f = |v: Vec<f32>| -> f32 {
                model.forward(Tensor::from_shape_vec(&[2, 3, 2], v).unwrap()).as_vec().iter().sum()
            };
            let fd = (f(plus) - f(minus)) / (2.0 * h);
            assert!((fd - g.as_slice().unwrap()[i]).abs() < 1e-2, "{i}: {fd} vs {}", g.as_slice().unwrap()[i]);
        }
    }

    #[test]
    fn test_reset_params_to_zeros() {
        let mut rng = StdRng::seed_from_u64(0);
        let mut model = DeepSetsWavefunction::build(DeepSetsConfig::default(), &mut rng).unwrap();
        model.try_reset_params(ParamInit::Zeros, &mut rng).unwrap();
        let mut all_zero = true;
        model.visit_tensors("", &mut |_: &str, t: &Tensor| all_zero &= t.as_vec().iter().all(|v| *v == 0.0));
        assert!(all_zero);
    }
}
