//! Compares the batched and per-sample Jacobian strategies on a Deep Sets
//! wavefunction and prints shapes, deviations, timings and peak memory.
//!
//! ```text
//! RUST_LOG=deepsets=debug jacobian-bench --walkers 100 --sweep 10,100,1000
//! ```

use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::Parser;
use deepsets::prelude::*;
use rand::{rngs::StdRng, SeedableRng};

#[derive(Parser, Debug)]
#[command(about = "Batched vs per-sample Jacobians of a Deep Sets wavefunction")]
struct Args {
    /// Number of walkers in the comparison batch
    #[arg(long, default_value_t = 100)]
    walkers: usize,

    /// Particles per walker
    #[arg(long, default_value_t = 4)]
    particles: usize,

    /// Spatial dimensionality (1 to 3)
    #[arg(long, default_value_t = 3)]
    dim: usize,

    /// Width of the pooled latent representation
    #[arg(long, default_value_t = 16)]
    latent: usize,

    /// Hidden layer widths of phi
    #[arg(long, value_delimiter = ',', default_value = "16")]
    phi_hidden: Vec<usize>,

    /// Hidden layer widths of rho
    #[arg(long, value_delimiter = ',', default_value = "16")]
    rho_hidden: Vec<usize>,

    /// tanh, sigmoid, softplus or relu
    #[arg(long, default_value = "tanh")]
    activation: Activation,

    #[arg(long, default_value_t = 0)]
    seed: u64,

    /// Walkers per reverse pass of the batched strategy
    #[arg(long)]
    max_parallel: Option<usize>,

    /// Skip centering each walker on its center of mass
    #[arg(long)]
    no_mean_subtraction: bool,

    /// Drop the -Σx² boundary term
    #[arg(long)]
    no_boundary: bool,

    /// Absolute tolerance of the agreement check
    #[arg(long, default_value_t = 1e-4)]
    atol: f32,

    /// Relative tolerance of the agreement check, scaled by the largest
    /// reference value of each parameter
    #[arg(long, default_value_t = 1e-5)]
    rtol: f32,
    /// Walker counts for a peak memory sweep, e.g. 10,100,1000
    #[arg(long, value_delimiter = ',')]
    sweep: Vec<usize>,

    /// Save the parameters to a .safetensors file
    #[arg(long)]
    save: Option<PathBuf>,

    /// Load the parameters from a .safetensors file
    #[arg(long)]
    load: Option<PathBuf>,
}

impl From<&Args> for DeepSetsConfig {
    fn from(args: &Args) -> Self {
        Self {
            num_particles: args.particles,
            dim: args.dim,
            latent_size: args.latent,
            phi_hidden: args.phi_hidden.clone(),
            rho_hidden: args.rho_hidden.clone(),
            activation: args.activation,
            mean_subtraction: !args.no_mean_subtraction,
            boundary_condition: !args.no_boundary,
            init: ParamInit::Uniform,
        }
    }
}

#[cfg(feature = "safetensors")]
fn load_parameters(model: &mut DeepSetsWavefunction, path: &Path) -> Result<()> {
    model
        .load_safetensors(path)
        .with_context(|| format!("loading {}", path.display()))
}

#[cfg(not(feature = "safetensors"))]
fn load_parameters(_model: &mut DeepSetsWavefunction, path: &Path) -> Result<()> {
    bail!("cannot load {}: built without the `safetensors` feature", path.display())
}

#[cfg(feature = "safetensors")]
fn save_parameters(model: &DeepSetsWavefunction, path: &Path) -> Result<()> {
    model
        .save_safetensors(path)
        .with_context(|| format!("saving {}", path.display()))
}

#[cfg(not(feature = "safetensors"))]
fn save_parameters(_model: &DeepSetsWavefunction, path: &Path) -> Result<()> {
    bail!("cannot save {}: built without the `safetensors` feature", path.display())
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive("deepsets=info".parse()?),
        )
        .init();

    let args = Args::parse();
    if args.max_parallel == Some(0) {
        bail!("--max-parallel must be at least 1");
    }
    let tolerance = Tolerance::new(args.atol, args.rtol);

    let mut rng = StdRng::seed_from_u64(args.seed);
    let mut model = DeepSetsWavefunction::build(DeepSetsConfig::from(&args), &mut rng)
        .context("building the wavefunction")?;
    println!("model: {:?}, {} parameters", model.config(), model.num_params());

    if let Some(path) = &args.load {
        load_parameters(&mut model, path)?;
    }

    let x = model.sample_walkers(args.walkers, &mut rng);
    println!("input walkers: {:?}", x.shape());
    let report = compare(&model, &x, args.max_parallel, tolerance)?;
    println!("{report}");

    if !args.sweep.is_empty() {
        let points = scaling_sweep(&model, &args.sweep, args.max_parallel, |w| {
            model.sample_walkers(w, &mut rng)
        })?;
        println!("{}", ScalingTable(&points));
    }

    if let Some(path) = &args.save {
        save_parameters(&model, path)?;
    }

    if !report.agrees() {
        bail!("strategies disagree beyond {tolerance}");
    }
    Ok(())
}
