//! Runs both Jacobian strategies on the same model and input and reports how
//! they compare: agreement, wall time, and peak gradient memory.

use std::fmt;
use std::time::Duration;

use deepsets_core::prelude::*;
use ndarray::ArrayD;

use crate::jacobian::{
    all_close, batch_gradient, jacobian, max_abs_diff, JacobianStrategy, Jacobians, Tolerance, WalkerModel,
};
use crate::nn::Parameters;
use crate::Error;

/// Cost of one strategy on one input.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StrategyReport {
    pub strategy: JacobianStrategy,
    pub num_passes: usize,
    pub peak_gradient_bytes: usize,
    pub trace_time: Duration,
    pub backward_time: Duration,
}

impl StrategyReport {
    fn new(strategy: JacobianStrategy, j: &Jacobians) -> Self {
        Self {
            strategy,
            num_passes: j.num_passes,
            peak_gradient_bytes: j.peak_gradient_bytes,
            trace_time: j.trace_time,
            backward_time: j.backward_time,
        }
    }

    pub fn total_time(&self) -> Duration {
        self.trace_time + self.backward_time
    }
}

/// How far one result is from its reference.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Deviation {
    /// Largest absolute elementwise difference.
    pub max_abs: f32,
    /// Whether every parameter is within the report's [Tolerance].
    pub within_tolerance: bool,
}

impl Deviation {
    fn new(lhs: &[(String, ArrayD<f32>)], rhs: &[(String, ArrayD<f32>)], tolerance: Tolerance) -> Self {
        Self {
            max_abs: max_abs_diff(lhs, rhs),
            within_tolerance: all_close(lhs, rhs, tolerance),
        }
    }
}

impl fmt::Display for Deviation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let verdict = if self.within_tolerance { "ok" } else { "MISMATCH" };
        write!(f, "{:.3e} ({verdict})", self.max_abs)
    }
}

/// Result of [compare].
#[derive(Debug, Clone)]
pub struct ComparisonReport {
    pub num_walkers: usize,
    pub num_params: usize,
    /// Jacobian shape per parameter, identical for both strategies.
    pub shapes: Vec<(String, Vec<usize>)>,
    pub shapes_match: bool,
    pub batched: StrategyReport,
    pub per_sample: StrategyReport,
    pub tolerance: Tolerance,
    /// Walker-summed batched Jacobians vs. the batch gradient.
    pub batched_vs_gradient: Deviation,
    /// Walker-summed per-sample Jacobians vs. the batch gradient.
    pub per_sample_vs_gradient: Deviation,
    /// Batched vs. per-sample Jacobians, elementwise.
    pub batched_vs_per_sample: Deviation,
}

impl ComparisonReport {
    /// Whether the strategies agree with each other and the batch gradient
    /// within [ComparisonReport::tolerance].
    pub fn agrees(&self) -> bool {
        self.shapes_match
            && self.batched_vs_gradient.within_tolerance
            && self.per_sample_vs_gradient.within_tolerance
            && self.batched_vs_per_sample.within_tolerance
    }
}

fn kib(bytes: usize) -> f64 {
    bytes as f64 / 1024.0
}

impl fmt::Display for ComparisonReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "walkers: {}, parameters: {}", self.num_walkers, self.num_params)?;
        writeln!(f, "jacobian shapes (match: {}):", self.shapes_match)?;
        for (name, shape) in self.shapes.iter() {
            writeln!(f, "  {name:<16} {shape:?}")?;
        }
        writeln!(f, "max abs deviation ({}):", self.tolerance)?;
        writeln!(f, "  batched    vs batch gradient: {}", self.batched_vs_gradient)?;
        writeln!(f, "  per-sample vs batch gradient: {}", self.per_sample_vs_gradient)?;
        writeln!(f, "  batched    vs per-sample:     {}", self.batched_vs_per_sample)?;
        for r in [&self.batched, &self.per_sample] {
            writeln!(
                f,
                "{}: trace={:?} backward={:?} passes={} peak={:.1} KiB",
                r.strategy,
                r.trace_time,
                r.backward_time,
                r.num_passes,
                kib(r.peak_gradient_bytes)
            )?;
        }
        Ok(())
    }
}

/// Runs the batched strategy (chunked by `max_parallel`) and the per-sample
/// strategy on `x`, and checks both against [batch_gradient] within
/// `tolerance`.
pub fn compare<M: WalkerModel + ?Sized>(
    model: &M,
    x: &Tensor,
    max_parallel: Option<usize>,
    tolerance: Tolerance,
) -> Result<ComparisonReport, Error> {
    let batched_strategy = JacobianStrategy::Batched { max_parallel };
    let a = jacobian(model, x, batched_strategy)?;
    let b = jacobian(model, x, JacobianStrategy::PerSample)?;
    let gradient = batch_gradient(model, x)?;

    let shapes = a.shapes();
    let a_sum = a.sum_over_walkers();
    let b_sum = b.sum_over_walkers();
    let report = ComparisonReport {
        num_walkers: a.num_walkers,
        num_params: model.num_params(),
        shapes_match: shapes == b.shapes(),
        shapes,
        batched: StrategyReport::new(batched_strategy, &a),
        per_sample: StrategyReport::new(JacobianStrategy::PerSample, &b),
        tolerance,
        batched_vs_gradient: Deviation::new(&a_sum, &gradient, tolerance),
        per_sample_vs_gradient: Deviation::new(&b_sum, &gradient, tolerance),
        batched_vs_per_sample: Deviation::new(&a.entries, &b.entries, tolerance),
    };
    tracing::info!(
        num_walkers = report.num_walkers,
        batched_peak = report.batched.peak_gradient_bytes,
        per_sample_peak = report.per_sample.peak_gradient_bytes,
        max_deviation = report.batched_vs_per_sample.max_abs,
        agrees = report.agrees(),
        "compared jacobian strategies"
    );
    Ok(report)
}

/// One row of a [scaling_sweep].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScalingPoint {
    pub num_walkers: usize,
    pub batched: StrategyReport,
    pub per_sample: StrategyReport,
}

impl ScalingPoint {
    /// Batched peak memory over per-sample peak memory.
    pub fn memory_ratio(&self) -> f64 {
        self.batched.peak_gradient_bytes as f64 / self.per_sample.peak_gradient_bytes.max(1) as f64
    }
}

/// Compares both strategies for every entry of `walker_counts`, drawing a
/// fresh input batch from `make_input` each time.
pub fn scaling_sweep<M, F>(
    model: &M,
    walker_counts: &[usize],
    max_parallel: Option<usize>,
    mut make_input: F,
) -> Result<Vec<ScalingPoint>, Error>
where
    M: WalkerModel + ?Sized,
    F: FnMut(usize) -> Tensor,
{
    let mut points = Vec::with_capacity(walker_counts.len());
    for &num_walkers in walker_counts {
        let x = make_input(num_walkers);
        let batched_strategy = JacobianStrategy::Batched { max_parallel };
        let a = jacobian(model, &x, batched_strategy)?;
        let b = jacobian(model, &x, JacobianStrategy::PerSample)?;
        let point = ScalingPoint {
            num_walkers,
            batched: StrategyReport::new(batched_strategy, &a),
            per_sample: StrategyReport::new(JacobianStrategy::PerSample, &b),
        };
        tracing::info!(
            num_walkers,
            batched_peak = point.batched.peak_gradient_bytes,
            per_sample_peak = point.per_sample.peak_gradient_bytes,
            "scaling point"
        );
        points.push(point);
    }
    Ok(points)
}

/// Formats a [scaling_sweep] result as a table.
pub struct ScalingTable<'a>(pub &'a [ScalingPoint]);

impl fmt::Display for ScalingTable<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "{:>8} {:>14} {:>14} {:>8} {:>14} {:>14}",
            "walkers", "batched KiB", "per-sample KiB", "ratio", "batched time", "per-sample time"
        )?;
        for p in self.0 {
            writeln!(
                f,
                "{:>8} {:>14.1} {:>14.1} {:>8.2} {:>14} {:>14}",
                p.num_walkers,
                kib(p.batched.peak_gradient_bytes),
                kib(p.per_sample.peak_gradient_bytes),
                p.memory_ratio(),
                format!("{:?}", p.batched.total_time()),
                format!("{:?}", p.per_sample.total_time()),
            )?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{DeepSetsConfig, DeepSetsWavefunction};
    use rand::{rngs::StdRng, SeedableRng};

    fn model(rng: &mut StdRng) -> DeepSetsWavefunction {
        let cfg = DeepSetsConfig {
            num_particles: 3,
            dim: 3,
            latent_size: 6,
            phi_hidden: vec![6],
            rho_hidden: vec![6],
            ..Default::default()
        };
        DeepSetsWavefunction::build(cfg, rng).unwrap()
    }

    #[test]
    fn test_compare_agrees() {
        let mut rng = StdRng::seed_from_u64(0);
        let model = model(&mut rng);
        let x = model.sample_walkers(8, &mut rng);
        let report = compare(&model, &x, None, Tolerance::default()).unwrap();
        assert!(report.agrees(), "{report}");
        assert_eq!(report.num_walkers, 8);
        assert_eq!(report.batched.num_passes, 1);
        assert_eq!(report.per_sample.num_passes, 8);
        assert!(report.batched.peak_gradient_bytes > report.per_sample.peak_gradient_bytes);

        let text = report.to_string();
        assert!(text.contains("phi.0.weight"));
        assert!(text.contains("per-sample"));
        assert!(text.contains("atol=1e-4 rtol=1e-5"));
        assert!(!text.contains("MISMATCH"));
    }

    #[test]
    fn test_compare_reports_disagreement_past_tolerance() {
        let mut rng = StdRng::seed_from_u64(3);
        let model = model(&mut rng);
        let x = model.sample_walkers(64, &mut rng);
        let report = compare(&model, &x, Some(16), Tolerance::default()).unwrap();
        assert!(report.agrees(), "{report}");
        assert_eq!(report.batched.num_passes, 4);

        let mut off = report.clone();
        off.per_sample_vs_gradient.within_tolerance = false;
        assert!(!off.agrees());
        assert!(off.to_string().contains("MISMATCH"));

        let mut reshaped = report;
        reshaped.shapes_match = false;
        assert!(!reshaped.agrees());
    }

    #[test]
    fn test_sweep_memory_grows_faster_for_batched() {
        let mut rng = StdRng::seed_from_u64(1);
        let model = model(&mut rng);
        let mut input_rng = StdRng::seed_from_u64(2);
        let points = scaling_sweep(&model, &[2, 8, 32], None, |w| model.sample_walkers(w, &mut input_rng)).unwrap();
        assert_eq!(points.len(), 3);
        for pair in points.windows(2) {
            assert!(pair[1].memory_ratio() > pair[0].memory_ratio());
            let batched_growth =
                pair[1].batched.peak_gradient_bytes as f64 / pair[0].batched.peak_gradient_bytes as f64;
            let per_sample_growth =
                pair[1].per_sample.peak_gradient_bytes as f64 / pair[0].per_sample.peak_gradient_bytes as f64;
            assert!(batched_growth > per_sample_growth);
        }
        let table = ScalingTable(&points).to_string();
        assert_eq!(table.lines().count(), 4);
    }
}
