//! # deepsets
//!
//! A permutation invariant "Deep Sets" wavefunction for systems of a few
//! particles in one to three dimensions, and two ways of computing the
//! per-walker Jacobian of its log-amplitude with respect to its parameters.
//!
//! Built on the reverse-mode engine in [deepsets_core].
//!
//! ```rust
//! # use deepsets::prelude::*;
//! # use rand::{rngs::StdRng, SeedableRng};
//! let mut rng = StdRng::seed_from_u64(0);
//! let model = DeepSetsWavefunction::build(DeepSetsConfig::default(), &mut rng).unwrap();
//! let x = model.sample_walkers(5, &mut rng);
//! assert_eq!(model.forward(x.clone()).shape(), &[5, 1]);
//!
//! let a = jacobian(&model, &x, JacobianStrategy::Batched { max_parallel: None }).unwrap();
//! let b = jacobian(&model, &x, JacobianStrategy::PerSample).unwrap();
//! let g = batch_gradient(&model, &x).unwrap();
//! assert!(a.all_close(&g, Tolerance::default()));
//! assert!(b.all_close(&g, Tolerance::default()));
//!
//! let report = compare(&model, &x, Some(2), Tolerance::default()).unwrap();
//! assert!(report.agrees());
//! ```
//!
//! # Modules
//!
//! - [nn]: [nn::Linear], [nn::Activation] and [nn::FeedForward], plus the
//!   [nn::Module] and [nn::TensorCollection] traits.
//! - [model]: [model::DeepSetsWavefunction] and its [model::DeepSetsConfig].
//! - [jacobian]: [jacobian::jacobian] with either [jacobian::JacobianStrategy].
//! - [comparator]: [comparator::compare] and [comparator::scaling_sweep].

pub mod comparator;
pub mod error;
pub mod jacobian;
pub mod model;
pub mod nn;

pub use deepsets_core;
pub use error::Error;

/// Contains subset of all public exports.
pub mod prelude {
    pub use deepsets_core::prelude::*;

    pub use crate::error::Error;
    pub use crate::comparator::{
        compare, scaling_sweep, ComparisonReport, Deviation, ScalingPoint, ScalingTable, StrategyReport,
    };
    pub use crate::jacobian::{
        all_close, batch_gradient, jacobian, max_abs_diff, JacobianStrategy, Jacobians, Tolerance, WalkerModel,
    };
    pub use crate::model::{DeepSetsConfig, DeepSetsWavefunction, MAX_DIM};
    #[cfg(feature = "safetensors")]
    pub use crate::nn::{LoadFromSafetensors, SaveToSafetensors};
    pub use crate::nn::{
        Activation, FeedForward, Linear, Module, ParamInit, Parameters, ResetParams, TensorCollection,
    };
}
