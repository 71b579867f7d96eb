//! Per-walker Jacobians of a model's output with respect to its parameters.
//!
//! For a model mapping `W` walkers to an output of shape `(W, 1)`, the
//! Jacobian of parameter `p` with shape `S` is an array of shape
//! `(W, 1) + S`: row `w` is the gradient of walker `w`'s output.
//!
//! Two strategies compute the same thing:
//!
//! - [JacobianStrategy::Batched] records the forward pass once and seeds
//!   the reverse pass with one one-hot cotangent per walker. Every gradient
//!   buffer then holds all `W` rows at once, so peak gradient memory grows
//!   with `W` times the size of the graph, which itself grows with `W`.
//! - [JacobianStrategy::PerSample] records the forward pass once and runs
//!   one reverse pass per walker, stacking the rows afterwards. Peak memory
//!   is that of a single reverse pass.
//!
//! Summing either result over the walker axis gives the same arrays as
//! [batch_gradient].

use std::time::{Duration, Instant};

use deepsets_core::prelude::*;
use ndarray::{ArrayD, Axis, IxDyn, Slice};

use crate::nn::{Module, Parameters, TensorCollection};
use crate::Error;

/// A model that maps a batch of walkers with leading axis `W` to an output
/// of shape `(W, 1)`, and whose parameters can be enumerated in order.
pub trait WalkerModel: TensorCollection {
    fn try_log_psi(&self, x: Tensor<OwnedTape>) -> Result<Tensor<OwnedTape>, Error>;
}

impl<M> WalkerModel for M
where
    M: TensorCollection + Module<Tensor<OwnedTape>, Output = Tensor<OwnedTape>>,
{
    fn try_log_psi(&self, x: Tensor<OwnedTape>) -> Result<Tensor<OwnedTape>, Error> {
        self.try_forward(x)
    }
}

/// How to compute per-walker Jacobians.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JacobianStrategy {
    /// One reverse pass per chunk of at most `max_parallel` walkers
    /// (`None`: all walkers in a single pass).
    Batched { max_parallel: Option<usize> },
    /// One reverse pass per walker.
    PerSample,
}

impl Default for JacobianStrategy {
    fn default() -> Self {
        Self::Batched { max_parallel: None }
    }
}

impl std::fmt::Display for JacobianStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Batched { max_parallel: None } => f.write_str("batched"),
            Self::Batched { max_parallel: Some(n) } => write!(f, "batched (max_parallel={n})"),
            Self::PerSample => f.write_str("per-sample"),
        }
    }
}

/// Per-parameter Jacobians, in the model's parameter order.
#[derive(Debug, Clone)]
pub struct Jacobians {
    pub entries: Vec<(String, ArrayD<f32>)>,
    pub num_walkers: usize,
    /// Number of reverse passes that were run.
    pub num_passes: usize,
    /// Largest peak of live gradient bytes over all reverse passes.
    pub peak_gradient_bytes: usize,
    /// Time spent recording the forward pass.
    pub trace_time: Duration,
    /// Time spent in reverse passes, including stacking rows.
    pub backward_time: Duration,
}

impl Jacobians {
    pub fn get(&self, name: &str) -> Option<&ArrayD<f32>> {
        self.entries.iter().find(|(n, _)| n == name).map(|(_, j)| j)
    }

    pub fn shapes(&self) -> Vec<(String, Vec<usize>)> {
        self.entries
            .iter()
            .map(|(n, j)| (n.clone(), j.shape().to_vec()))
            .collect()
    }

    /// Sums out the `(W, 1)` axes, giving arrays shaped like the parameters.
    ///
    /// Accumulates in `f64`.
    pub fn sum_over_walkers(&self) -> Vec<(String, ArrayD<f32>)> {
        self.entries
            .iter()
            .map(|(n, j)| {
                let sum = j.mapv(f64::from).sum_axis(Axis(0)).sum_axis(Axis(0));
                (n.clone(), sum.mapv(|v| v as f32))
            })
            .collect()
    }

    /// Largest absolute elementwise difference between
    /// [Jacobians::sum_over_walkers] and `gradients`.
    ///
    /// Parameters missing from `gradients` or with a different shape count
    /// as an infinite difference.
    pub fn max_abs_diff(&self, gradients: &[(String, ArrayD<f32>)]) -> f32 {
        max_abs_diff(&self.sum_over_walkers(), gradients)
    }

    /// Whether [Jacobians::sum_over_walkers] matches `gradients` within
    /// `tolerance`. See [all_close].
    pub fn all_close(&self, gradients: &[(String, ArrayD<f32>)], tolerance: Tolerance) -> bool {
        all_close(&self.sum_over_walkers(), gradients, tolerance)
    }
}

/// How far two results may be apart and still count as equal.
///
/// A parameter passes if `max |lhs - rhs| <= atol + rtol * max |rhs|` over
/// its elements. The relative part is scaled by the largest reference value
/// of the parameter because float32 rounding in a sum over `W` walkers grows
/// with the size of the summands, not with the size of each result element.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Tolerance {
    pub atol: f32,
    pub rtol: f32,
}

impl Default for Tolerance {
    fn default() -> Self {
        Self { atol: 1e-4, rtol: 1e-5 }
    }
}

impl Tolerance {
    pub fn new(atol: f32, rtol: f32) -> Self {
        Self { atol, rtol }
    }

    /// Whether a deviation of `diff` is acceptable for a reference with
    /// largest magnitude `scale`.
    pub fn allows(&self, diff: f32, scale: f32) -> bool {
        diff <= self.atol + self.rtol * scale
    }
}

impl std::fmt::Display for Tolerance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "atol={:e} rtol={:e}", self.atol, self.rtol)
    }
}

/// Whether two named lists of arrays have the same names and shapes, and
/// every parameter is within `tolerance` of the one in `rhs`.
pub fn all_close(lhs: &[(String, ArrayD<f32>)], rhs: &[(String, ArrayD<f32>)], tolerance: Tolerance) -> bool {
    if lhs.len() != rhs.len() {
        return false;
    }
    lhs.iter().zip(rhs.iter()).all(|((ln, l), (rn, r))| {
        if ln != rn || l.shape() != r.shape() {
            return false;
        }
        let diff = l.iter().zip(r.iter()).fold(0.0f32, |m, (a, b)| m.max((a - b).abs()));
        let scale = r.iter().fold(0.0f32, |m, b| m.max(b.abs()));
        tolerance.allows(diff, scale)
    })
}

/// Largest absolute elementwise difference between two named lists of arrays.
pub fn max_abs_diff(lhs: &[(String, ArrayD<f32>)], rhs: &[(String, ArrayD<f32>)]) -> f32 {
    if lhs.len() != rhs.len() {
        return f32::INFINITY;
    }
    let mut max = 0.0f32;
    for ((ln, l), (rn, r)) in lhs.iter().zip(rhs.iter()) {
        if ln != rn || l.shape() != r.shape() {
            return f32::INFINITY;
        }
        for (a, b) in l.iter().zip(r.iter()) {
            max = max.max((a - b).abs());
        }
    }
    max
}

fn zeros(leading: &[usize], shape: &[usize]) -> ArrayD<f32> {
    let mut full = leading.to_vec();
    full.extend_from_slice(shape);
    ArrayD::zeros(IxDyn(&full))
}

fn traced_output<M: WalkerModel + ?Sized>(model: &M, x: &Tensor) -> Result<Trace, Error> {
    let num_walkers = x.shape().first().copied().unwrap_or(0);
    let trace = model.try_log_psi(x.trace())?.into_trace();
    if trace.output().shape() != [num_walkers, 1] {
        return Err(deepsets_core::Error::ShapeMismatch {
            op: "jacobian",
            lhs: trace.output().shape().to_vec(),
            rhs: vec![num_walkers, 1],
        }
        .into());
    }
    Ok(trace)
}

/// Gradient of the batch-summed output with respect to every parameter,
/// in the model's parameter order.
pub fn batch_gradient<M: WalkerModel + ?Sized>(
    model: &M,
    x: &Tensor,
) -> Result<Vec<(String, ArrayD<f32>)>, Error> {
    let params = model.named_parameters();
    let grads = traced_output(model, x)?.grad_of_sum()?;
    Ok(params
        .into_iter()
        .map(|(name, p)| {
            let g = match grads.get_rows(&p) {
                Some(rows) => rows.index_axis(Axis(0), 0).to_owned(),
                None => zeros(&[], p.shape()),
            };
            (name, g)
        })
        .collect())
}

/// Per-walker Jacobians of `model`'s output with respect to its parameters.
pub fn jacobian<M: WalkerModel + ?Sized>(
    model: &M,
    x: &Tensor,
    strategy: JacobianStrategy,
) -> Result<Jacobians, Error> {
    let params = model.named_parameters();

    let start = Instant::now();
    let trace = traced_output(model, x)?;
    let trace_time = start.elapsed();
    let num_walkers = trace.output().shape()[0];
    tracing::debug!(%strategy, num_walkers, num_ops = trace.num_ops(), "recorded forward pass");

    let start = Instant::now();
    let (entries, num_passes, peak_gradient_bytes) = match strategy {
        JacobianStrategy::Batched { max_parallel } => batched(&trace, &params, max_parallel)?,
        JacobianStrategy::PerSample => per_sample(&trace, &params)?,
    };
    let backward_time = start.elapsed();
    tracing::debug!(
        %strategy,
        num_passes,
        peak_gradient_bytes,
        backward_ms = backward_time.as_secs_f64() * 1e3,
        "computed jacobians"
    );

    Ok(Jacobians {
        entries,
        num_walkers,
        num_passes,
        peak_gradient_bytes,
        trace_time,
        backward_time,
    })
}

type Computed = (Vec<(String, ArrayD<f32>)>, usize, usize);

fn batched(trace: &Trace, params: &[(String, Tensor)], max_parallel: Option<usize>) -> Result<Computed, Error> {
    let num_walkers = trace.output().shape()[0];
    let chunk = max_parallel.unwrap_or(num_walkers).max(1);
    let mut entries: Vec<(String, ArrayD<f32>)> = params
        .iter()
        .map(|(name, p)| (name.clone(), zeros(&[num_walkers, 1], p.shape())))
        .collect();

    let mut num_passes = 0;
    let mut peak = 0;
    let mut start = 0;
    while start < num_walkers {
        let end = (start + chunk).min(num_walkers);
        // output is (W, 1), so row-major position == walker index
        let grads = trace.vjp(trace.unit_cotangents(start..end)?)?;
        peak = peak.max(grads.peak_bytes());
        tracing::trace!(start, end, peak_bytes = grads.peak_bytes(), "batched reverse pass");

        for ((_, p), (_, jac)) in params.iter().zip(entries.iter_mut()) {
            if let Some(rows) = grads.get_rows(p) {
                jac.slice_axis_mut(Axis(0), Slice::from(start..end))
                    .assign(&rows.view().insert_axis(Axis(1)));
            }
        }
        num_passes += 1;
        start = end;
    }
    Ok((entries, num_passes, peak))
}

fn per_sample(trace: &Trace, params: &[(String, Tensor)]) -> Result<Computed, Error> {
    let num_walkers = trace.output().shape()[0];
    let mut rows: Vec<Vec<ArrayD<f32>>> = vec![Vec::with_capacity(num_walkers); params.len()];

    let mut peak = 0;
    for walker in 0..num_walkers {
        let grads = trace.grad_of_element(walker)?;
        peak = peak.max(grads.peak_bytes());
        for ((_, p), param_rows) in params.iter().zip(rows.iter_mut()) {
            let row = match grads.get_rows(p) {
                Some(r) => r.clone(),
                None => zeros(&[1], p.shape()),
            };
            param_rows.push(row);
        }
    }

    let mut entries = Vec::with_capacity(params.len());
    for ((name, p), param_rows) in params.iter().zip(rows) {
        let stacked = if param_rows.is_empty() {
            zeros(&[0, 1], p.shape())
        } else {
            let views: Vec<_> = param_rows.iter().map(|r| r.view()).collect();
            ndarray::concatenate(Axis(0), &views)
                .map_err(|_| deepsets_core::Error::ShapeMismatch {
                    op: "jacobian",
                    lhs: param_rows[0].shape().to_vec(),
                    rhs: p.shape().to_vec(),
                })?
                .insert_axis(Axis(1))
        };
        entries.push((name.clone(), stacked));
    }
    Ok((entries, num_walkers, peak))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{DeepSetsConfig, DeepSetsWavefunction};
    use crate::nn::{Activation, FeedForward, ParamInit};
    use rand::{rngs::StdRng, SeedableRng};

    fn small_model(rng: &mut StdRng) -> DeepSetsWavefunction {
        let cfg = DeepSetsConfig {
            num_particles: 3,
            dim: 2,
            latent_size: 4,
            phi_hidden: vec![5],
            rho_hidden: vec![3],
            ..Default::default()
        };
        DeepSetsWavefunction::build(cfg, rng).unwrap()
    }

    #[test]
    fn test_strategies_agree() {
        let mut rng = StdRng::seed_from_u64(0);
        let model = small_model(&mut rng);
        let x = model.sample_walkers(6, &mut rng);

        let a = jacobian(&model, &x, JacobianStrategy::Batched { max_parallel: None }).unwrap();
        let b = jacobian(&model, &x, JacobianStrategy::PerSample).unwrap();
        assert_eq!(a.shapes(), b.shapes());
        assert_eq!(a.num_passes, 1);
        assert_eq!(b.num_passes, 6);
        for ((_, ja), (_, jb)) in a.entries.iter().zip(b.entries.iter()) {
            for (l, r) in ja.iter().zip(jb.iter()) {
                assert!((l - r).abs() < 1e-5);
            }
        }

        let g = batch_gradient(&model, &x).unwrap();
        assert!(a.all_close(&g, Tolerance::default()));
        assert!(b.all_close(&g, Tolerance::default()));
        assert!(a.max_abs_diff(&g) < 1e-4);
    }

    #[test]
    fn test_shapes_are_walkers_by_param() {
        let mut rng = StdRng::seed_from_u64(1);
        let model = small_model(&mut rng);
        let x = model.sample_walkers(4, &mut rng);
        let j = jacobian(&model, &x, JacobianStrategy::PerSample).unwrap();
        assert_eq!(j.get("phi.0.weight").unwrap().shape(), &[4, 1, 5, 2]);
        assert_eq!(j.get("rho.1.bias").unwrap().shape(), &[4, 1, 1]);
        assert!(j.get("rho.2.bias").is_none());
        // d(output)/d(last bias) is one for every walker
        assert!(j.get("rho.1.bias").unwrap().iter().all(|v| (*v - 1.0).abs() < 1e-6));
    }

    #[test]
    fn test_chunked_batching_matches_single_pass() {
        let mut rng = StdRng::seed_from_u64(2);
        let model = small_model(&mut rng);
        let x = model.sample_walkers(7, &mut rng);
        let full = jacobian(&model, &x, JacobianStrategy::Batched { max_parallel: None }).unwrap();
        let chunked = jacobian(&model, &x, JacobianStrategy::Batched { max_parallel: Some(3) }).unwrap();
        assert_eq!(chunked.num_passes, 3);
        assert!(chunked.peak_gradient_bytes < full.peak_gradient_bytes);
        assert!(max_abs_diff(&full.entries, &chunked.entries) < 1e-6);
    }

    #[test]
    fn test_no_walkers() {
        let mut rng = StdRng::seed_from_u64(3);
        let model = small_model(&mut rng);
        let x = Tensor::zeros(&[0, 3, 2]);
        for strategy in [JacobianStrategy::default(), JacobianStrategy::PerSample] {
            let j = jacobian(&model, &x, strategy).unwrap();
            assert_eq!(j.num_passes, 0);
            assert_eq!(j.get("phi.0.bias").unwrap().shape(), &[0, 1, 5]);
        }
    }

    #[test]
    fn test_rejects_non_scalar_outputs() {
        let mut rng = StdRng::seed_from_u64(4);
        let ff = FeedForward::build(&[2, 3], Activation::Tanh, false, ParamInit::Uniform, &mut rng).unwrap();
        let x = Tensor::zeros(&[5, 2]);
        assert!(matches!(
            jacobian(&ff, &x, JacobianStrategy::PerSample),
            Err(Error::Tensor(deepsets_core::Error::ShapeMismatch { .. }))
        ));
        assert!(batch_gradient(&ff, &x).is_err());
    }

    #[test]
    fn test_any_walker_model() {
        let mut rng = StdRng::seed_from_u64(5);
        let ff = FeedForward::build(&[2, 4, 1], Activation::Softplus, false, ParamInit::Uniform, &mut rng)
            .unwrap();
        let x = Tensor::sample_uniform(&[5, 2], -1.0, 1.0, &mut rng);
        let a = jacobian(&ff, &x, JacobianStrategy::Batched { max_parallel: Some(2) }).unwrap();
        let b = jacobian(&ff, &x, JacobianStrategy::PerSample).unwrap();
        let g = batch_gradient(&ff, &x).unwrap();
        assert!(a.all_close(&g, Tolerance::default()));
        assert!(b.all_close(&g, Tolerance::default()));
        assert_eq!(a.shapes(), b.shapes());
    }

    #[test]
    fn test_tolerance_scales_with_largest_reference() {
        let named = |v: Vec<f32>| vec![("p".to_string(), ArrayD::from_shape_vec(IxDyn(&[v.len()]), v).unwrap())];
        let tol = Tolerance::default();

        // 9.5e-4 off on a parameter whose gradient reaches 1000
        let reference = named(vec![1000.0, 0.5]);
        let computed = named(vec![1000.00095, 0.5]);
        assert!(max_abs_diff(&computed, &reference) > 1e-4);
        assert!(all_close(&computed, &reference, tol));

        // the same deviation on a small parameter is a real disagreement
        let reference = named(vec![1.0, 0.5]);
        let computed = named(vec![1.00095, 0.5]);
        assert!(!all_close(&computed, &reference, tol));

        assert!(!all_close(&named(vec![1.0]), &named(vec![1.0, 2.0]), tol));
        assert!(!all_close(&named(vec![1.0]), &[], tol));
        assert!(tol.allows(1e-4, 0.0));
        assert!(!Tolerance::new(0.0, 0.0).allows(1e-9, 1e9));
    }

    #[test]
    fn test_sum_over_walkers_accumulates_in_f64() {
        let num_walkers = (1 << 17) + 1;
        let mut values = vec![1.0f32; num_walkers];
        values[0] = 16_777_216.0;
        let j = Jacobians {
            entries: vec![(
                "p".to_string(),
                ArrayD::from_shape_vec(IxDyn(&[num_walkers, 1, 1]), values).unwrap(),
            )],
            num_walkers,
            num_passes: 1,
            peak_gradient_bytes: 0,
            trace_time: Duration::ZERO,
            backward_time: Duration::ZERO,
        };
        // in f32, 2^24 + 1 == 2^24, so every added one would be lost
        let expected = 16_777_216.0 + (num_walkers - 1) as f32;
        assert_eq!(j.sum_over_walkers()[0].1.as_slice().unwrap(), &[expected]);
    }
}
