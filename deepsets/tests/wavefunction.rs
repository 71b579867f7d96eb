use deepsets::prelude::*;
use rand::{rngs::StdRng, SeedableRng};

#[test]
fn test_dimensionality_is_validated() {
    let mut rng = StdRng::seed_from_u64(0);
    for dim in 1..=3 {
        let config = DeepSetsConfig { dim, ..Default::default() };
        assert!(DeepSetsWavefunction::build(config, &mut rng).is_ok(), "dim={dim}");
    }
    for dim in [0, 4, 7] {
        let config = DeepSetsConfig { dim, ..Default::default() };
        assert!(matches!(
            DeepSetsWavefunction::build(config, &mut rng),
            Err(Error::InvalidDimensionality(_))
        ));
    }
}

#[test]
fn test_outputs_are_permutation_invariant() {
    let mut rng = StdRng::seed_from_u64(11);
    let config = DeepSetsConfig {
        num_particles: 5,
        dim: 3,
        ..Default::default()
    };
    let model = DeepSetsWavefunction::build(config, &mut rng).unwrap();
    let x = model.sample_walkers(3, &mut rng);
    let y = model.forward(x.clone()).as_vec();

    // reverse the particle order of every walker
    let mut reversed = x.array().clone();
    reversed.invert_axis(ndarray::Axis(1));
    let y_rev = model.forward(Tensor::new(reversed.as_standard_layout().to_owned())).as_vec();
    for (a, b) in y.iter().zip(y_rev.iter()) {
        assert!((a - b).abs() < 1e-5, "{a} != {b}");
    }
}

#[test]
fn test_zero_weights_give_the_boundary_term() {
    let mut rng = StdRng::seed_from_u64(0);
    let config = DeepSetsConfig {
        num_particles: 2,
        dim: 1,
        init: ParamInit::Zeros,
        ..Default::default()
    };
    let model = DeepSetsWavefunction::build(config, &mut rng).unwrap();
    let x = Tensor::from_shape_vec(&[1, 2, 1], vec![0.5, -0.5]).unwrap();
    let y = model.forward(x).as_vec();
    assert!((y[0] + 0.5).abs() < 1e-6, "{y:?}");
}

#[test]
fn test_wrong_walker_shape_is_a_tensor_error() {
    let mut rng = StdRng::seed_from_u64(0);
    let model = DeepSetsWavefunction::build(DeepSetsConfig::default(), &mut rng).unwrap();
    let err = model.try_forward(Tensor::zeros(&[2, 4, 2])).unwrap_err();
    assert!(matches!(err, Error::Tensor(_)), "{err}");
    assert!(std::error::Error::source(&err).is_some());
}

#[test]
fn test_input_gradient_shape() {
    let mut rng = StdRng::seed_from_u64(0);
    let model = DeepSetsWavefunction::build(DeepSetsConfig::default(), &mut rng).unwrap();
    let x = model.sample_walkers(7, &mut rng);
    let g = model.input_gradient(&x).unwrap();
    assert_eq!(g.shape(), x.shape());
    // centering makes the gradient sum to zero over each walker's particles
    for walker in g.outer_iter() {
        for s in walker.sum_axis(ndarray::Axis(0)).iter() {
            assert!(s.abs() < 1e-4, "{s}");
        }
    }
}

#[cfg(feature = "safetensors")]
#[test]
fn test_save_and_load_parameters() {
    let mut rng = StdRng::seed_from_u64(0);
    let file = tempfile::NamedTempFile::new().expect("failed to create tempfile");
    let saved = DeepSetsWavefunction::build(DeepSetsConfig::default(), &mut rng).unwrap();
    let mut loaded = DeepSetsWavefunction::build(DeepSetsConfig::default(), &mut rng).unwrap();
    let x = saved.sample_walkers(3, &mut rng);
    assert_ne!(saved.forward(x.clone()).as_vec(), loaded.forward(x.clone()).as_vec());

    saved.save_safetensors(file.path()).unwrap();
    loaded.load_safetensors(file.path()).unwrap();
    assert_eq!(saved.forward(x.clone()).as_vec(), loaded.forward(x).as_vec());

    let mut other = DeepSetsWavefunction::build(
        DeepSetsConfig {
            latent_size: 3,
            ..Default::default()
        },
        &mut rng,
    )
    .unwrap();
    assert!(matches!(
        other.load_safetensors(file.path()),
        Err(Error::Tensor(deepsets::deepsets_core::Error::ShapeMismatch { .. }))
    ));
}
