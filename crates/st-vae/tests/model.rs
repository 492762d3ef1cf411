use spiral_config::{ConfigLayering, LayeredConfig};
use st_mnist::DatasetProvider;
use st_nn::{Activation, Module, Parameter, PureResult, StateDictFormat, Tensor};
use st_vae::{
    Network, ReconstructionLossKind, ReparamKind, TemperatureConfig, TrainOptions,
    TrainingContext, VaeConfig, VaeError, VaeSettings, VanillaVae,
};
use tempfile::tempdir;

/// Emits `[-100 | logit(x)]` so the Gaussian sample collapses onto the input.
struct LogitEncoder;

impl Module for LogitEncoder {
    fn forward(&self, input: &Tensor) -> PureResult<Tensor> {
        let cols = input.cols();
        Tensor::from_fn(input.rows(), cols * 2, |r, c| {
            if c < cols {
                -100.0
            } else {
                let x = input.data()[r * cols + c - cols];
                (x / (1.0 - x)).ln()
            }
        })
    }

    fn backward(&mut self, input: &Tensor, _grad_output: &Tensor) -> PureResult<Tensor> {
        Ok(input.clone())
    }

    fn visit_parameters(
        &self,
        _visitor: &mut dyn FnMut(&Parameter) -> PureResult<()>,
    ) -> PureResult<()> {
        Ok(())
    }

    fn visit_parameters_mut(
        &mut self,
        _visitor: &mut dyn FnMut(&mut Parameter) -> PureResult<()>,
    ) -> PureResult<()> {
        Ok(())
    }
}

/// Serves the same constant batch forever.
struct ConstantProvider {
    examples: usize,
    width: usize,
    served: usize,
}

impl DatasetProvider for ConstantProvider {
    fn next_batch(&mut self, batch_size: usize) -> PureResult<(Tensor, Vec<u8>)> {
        self.served += 1;
        Ok((
            Tensor::from_fn(batch_size, self.width, |r, c| ((r + c) % 2) as f32)?,
            vec![0; batch_size],
        ))
    }

    fn num_examples(&self) -> usize {
        self.examples
    }
}

fn small_config(base: &std::path::Path) -> VaeConfig {
    VaeConfig {
        input_size: 8,
        latent_size: 2,
        batch_size: 4,
        encoder: vec![6],
        decoder: vec![6],
        base_dir: base.to_path_buf(),
        seed: Some(7),
        ..VaeConfig::default()
    }
}

#[test]
fn construction_lays_out_directories_and_names_parameters() {
    let dir = tempdir().unwrap();
    let vae = VanillaVae::dense(small_config(dir.path()), TrainingContext::new()).unwrap();
    assert_eq!(
        vae.identity(),
        "vae0_elu_enc6_dec6_learningrate0.001_latentsize2"
    );
    for sub in ["models", "imgs", "logs"] {
        assert!(dir.path().join(sub).is_dir());
    }
    let state = vae.state_dict().unwrap();
    let prefix = vae.identity().to_string();
    assert!(state.contains_key(&format!("{prefix}/encoder/dense0/weights")));
    assert!(state.contains_key(&format!("{prefix}/encoder/projection/biases")));
    assert!(state.contains_key(&format!("{prefix}/generator/projection/weights")));
    assert_eq!(state[&format!("{prefix}/encoder/projection/weights")].shape(), (6, 4));
    assert!(vae
        .checkpoint_path()
        .ends_with(format!("models/{prefix}.ckpt")));
}

#[test]
fn identity_encoder_and_decoder_reconstruct_the_input() {
    let dir = tempdir().unwrap();
    let config = VaeConfig {
        input_size: 4,
        latent_size: 4,
        batch_size: 2,
        encoder: vec![],
        decoder: vec![],
        base_dir: dir.path().to_path_buf(),
        seed: Some(3),
        ..VaeConfig::default()
    };
    let encoder = Network::new(vec![], LogitEncoder);
    let decoder = Network::new(vec![], Activation::Identity);
    let mut vae = VanillaVae::new(config, encoder, decoder, TrainingContext::new()).unwrap();

    let x = Tensor::from_vec(2, 4, vec![0.1, 0.5, 0.9, 0.3, 0.7, 0.2, 0.4, 0.8]).unwrap();
    let out = vae.reconstruct(&x, true).unwrap();
    for (got, want) in out.images.data().iter().zip(x.data()) {
        assert!((got - want).abs() < 1e-4, "{got} vs {want}");
    }
    let losses = out.losses.unwrap();
    assert_eq!(losses.cost.len(), 2);
    assert!(losses.divergence_mean > 0.0);
    assert_eq!(vae.iteration(), 0);
}

#[test]
fn first_step_on_zero_inputs_has_no_divergence() {
    let dir = tempdir().unwrap();
    let context = TrainingContext::new();
    let mut vae = VanillaVae::dense(small_config(dir.path()), context.clone()).unwrap();
    let x = Tensor::zeros(4, 8).unwrap();

    let first = vae.fit_step(&x).unwrap();
    assert_eq!(first.divergence, 0.0);
    assert!(first.cost.is_finite() && first.reconstruction.is_finite());
    assert!(first.grad_norm.is_finite());
    assert_eq!(first.iteration, 1);

    for _ in 0..4 {
        let metrics = vae.fit_step(&x).unwrap();
        assert!(metrics.cost.is_finite());
    }
    assert_eq!(vae.iteration(), 5);
    assert_eq!(context.global_iteration(), 5);
}

#[test]
fn failed_steps_leave_the_model_untouched() {
    let dir = tempdir().unwrap();
    let mut vae = VanillaVae::dense(small_config(dir.path()), TrainingContext::new()).unwrap();
    let before = vae.state_dict().unwrap();

    let poisoned = Tensor::from_fn(4, 8, |r, _| if r == 2 { f32::NAN } else { 0.5 }).unwrap();
    assert!(matches!(
        vae.fit_step(&poisoned),
        Err(VaeError::NumericalInstability { .. })
    ));
    assert!(matches!(
        vae.fit_step(&Tensor::zeros(4, 7).unwrap()),
        Err(VaeError::ShapeMismatch { .. })
    ));

    assert_eq!(vae.iteration(), 0);
    assert_eq!(vae.context().global_iteration(), 0);
    assert_eq!(vae.state_dict().unwrap(), before);
    vae.fit_step(&Tensor::zeros(4, 8).unwrap()).unwrap();
    assert_eq!(vae.iteration(), 1);
}

#[test]
fn checkpoints_round_trip_in_both_formats() {
    for format in [StateDictFormat::Bincode, StateDictFormat::Json] {
        let dir = tempdir().unwrap();
        let config = VaeConfig {
            checkpoint_format: format,
            ..small_config(dir.path())
        };
        let mut trained = VanillaVae::dense(config.clone(), TrainingContext::new()).unwrap();
        let mut fresh = VanillaVae::dense(
            VaeConfig {
                seed: Some(99),
                ..config
            },
            TrainingContext::new(),
        )
        .unwrap();
        assert!(!fresh.restore().unwrap());

        trained.fit_step(&Tensor::zeros(4, 8).unwrap()).unwrap();
        let path = trained.save().unwrap();
        assert!(path.is_file());
        assert_eq!(path, fresh.checkpoint_path());
        assert_ne!(fresh.state_dict().unwrap(), trained.state_dict().unwrap());

        assert!(fresh.restore().unwrap());
        assert_eq!(fresh.state_dict().unwrap(), trained.state_dict().unwrap());
    }
}

#[test]
fn corrupt_checkpoints_fail_to_restore() {
    let dir = tempdir().unwrap();
    let mut vae = VanillaVae::dense(small_config(dir.path()), TrainingContext::new()).unwrap();
    std::fs::write(vae.checkpoint_path(), b"not a checkpoint").unwrap();
    assert!(matches!(
        vae.restore(),
        Err(VaeError::CheckpointRestore { .. })
    ));
}

#[test]
fn models_sharing_a_context_count_together() {
    let dir = tempdir().unwrap();
    let context = TrainingContext::new();
    let mut a = VanillaVae::dense(small_config(&dir.path().join("a")), context.clone()).unwrap();
    let mut b = VanillaVae::dense(small_config(&dir.path().join("b")), context.clone()).unwrap();
    let x = Tensor::zeros(4, 8).unwrap();
    a.fit_step(&x).unwrap();
    b.fit_step(&x).unwrap();
    b.fit_step(&x).unwrap();
    assert_eq!((a.iteration(), b.iteration()), (1, 2));
    assert_eq!(context.global_iteration(), 3);
}

#[test]
fn discrete_models_anneal_and_emit_one_hot_codes() {
    let dir = tempdir().unwrap();
    let config = VaeConfig {
        reparam: ReparamKind::Discrete,
        latent_size: 3,
        hard_gumbel: true,
        temperature: TemperatureConfig {
            tau0: 1.0,
            anneal_rate: 0.1,
            min_temp: 0.1,
        },
        ..small_config(dir.path())
    };
    let mut vae = VanillaVae::dense(config, TrainingContext::new()).unwrap();
    assert_eq!(vae.reparam_kind(), ReparamKind::Discrete);
    let x = Tensor::from_fn(4, 8, |r, c| ((r * c) % 3) as f32 / 2.0).unwrap();

    for _ in 0..10 {
        let metrics = vae.fit_step(&x).unwrap();
        assert_eq!(metrics.temperature, 1.0);
        assert!(metrics.divergence >= -1e-6);
    }
    let eleventh = vae.fit_step(&x).unwrap();
    assert!((eleventh.temperature - (-1.0f32).exp()).abs() < 1e-6);
    assert_eq!(vae.temperature(), eleventh.temperature);

    let z = vae.transform(&x).unwrap();
    assert_eq!(z.shape(), (4, 3));
    for row in z.data().chunks(3) {
        assert_eq!(row.iter().filter(|&&v| v == 1.0).count(), 1);
        assert_eq!(row.iter().sum::<f32>(), 1.0);
    }

    let samples = vae.generate(None).unwrap();
    assert_eq!(samples.shape(), (4, 8));
    assert!(samples.data().iter().all(|&p| p > 0.0 && p < 1.0));
    assert!(matches!(
        vae.generate(Some(&Tensor::zeros(2, 4).unwrap())),
        Err(VaeError::ShapeMismatch { .. })
    ));
}

#[test]
fn failed_steps_at_an_annealing_boundary_keep_the_temperature() {
    let dir = tempdir().unwrap();
    let config = VaeConfig {
        reparam: ReparamKind::Discrete,
        latent_size: 3,
        temperature: TemperatureConfig {
            tau0: 1.0,
            anneal_rate: 0.1,
            min_temp: 0.1,
        },
        ..small_config(dir.path())
    };
    let mut vae = VanillaVae::dense(config, TrainingContext::new()).unwrap();
    let x = Tensor::from_fn(4, 8, |r, c| ((r + c) % 2) as f32).unwrap();
    for _ in 0..10 {
        vae.fit_step(&x).unwrap();
    }
    assert_eq!(vae.iteration(), 10);

    let poisoned = Tensor::from_fn(4, 8, |r, _| if r == 1 { f32::NAN } else { 0.5 }).unwrap();
    assert!(vae.fit_step(&poisoned).is_err());
    assert!(vae.fit_step(&Tensor::zeros(4, 7).unwrap()).is_err());
    assert_eq!(vae.temperature(), 1.0);
    assert_eq!(vae.iteration(), 10);

    let metrics = vae.fit_step(&x).unwrap();
    assert!((metrics.temperature - (-1.0f32).exp()).abs() < 1e-6);
    assert_eq!(vae.temperature(), metrics.temperature);
}

#[test]
fn squared_error_models_train() {
    let dir = tempdir().unwrap();
    let config = VaeConfig {
        reconstruction_loss: ReconstructionLossKind::SquaredError,
        activation: Activation::Relu,
        learning_rate: 1e-2,
        ..small_config(dir.path())
    };
    let mut vae = VanillaVae::dense(config, TrainingContext::new()).unwrap();
    assert!(vae.identity().starts_with("vae0_relu_"));
    let x = Tensor::from_fn(4, 8, |r, _| 1.0 + r as f32).unwrap();
    let window = |vae: &mut VanillaVae| -> f32 {
        (0..10)
            .map(|_| vae.fit_step(&x).unwrap().reconstruction)
            .sum::<f32>()
            / 10.0
    };
    let early = window(&mut vae);
    for _ in 0..200 {
        vae.fit_step(&x).unwrap();
    }
    let late = window(&mut vae);
    assert!(late < early, "{late} !< {early}");
}

#[test]
fn train_runs_whole_batches_per_epoch() {
    let dir = tempdir().unwrap();
    let mut vae = VanillaVae::dense(small_config(dir.path()), TrainingContext::new()).unwrap();
    let mut provider = ConstantProvider {
        examples: 10,
        width: 8,
        served: 0,
    };
    let options = TrainOptions {
        epochs: 3,
        display_step: 1,
        checkpoint_every: Some(2),
    };
    let history = vae.train(&mut provider, &options).unwrap();
    assert_eq!(history.len(), 3);
    assert_eq!(provider.served, 6);
    assert_eq!(vae.iteration(), 6);
    assert_eq!(history[2].epoch, 3);
    assert_eq!(history[2].last.iteration, 6);
    assert!(history.iter().all(|e| e.avg_cost.is_finite()));
    assert!(vae.checkpoint_path().is_file());
}

#[test]
fn train_rejects_providers_smaller_than_a_batch() {
    let dir = tempdir().unwrap();
    let mut vae = VanillaVae::dense(small_config(dir.path()), TrainingContext::new()).unwrap();
    let mut provider = ConstantProvider {
        examples: 3,
        width: 8,
        served: 0,
    };
    assert!(matches!(
        vae.train(&mut provider, &TrainOptions::default()),
        Err(VaeError::InvalidConfig(_))
    ));
    assert_eq!(provider.served, 0);
}

#[test]
fn layered_settings_feed_the_model_config() {
    let dir = tempdir().unwrap();
    let base = dir.path().join("base.toml");
    std::fs::write(
        &base,
        "[vae]\nreparam = \"discrete\"\nlatent_size = 5\nencoder = [16]\n\n[vae.temperature]\nmin_temp = 0.3\n",
    )
    .unwrap();
    let run = dir.path().join("run.json");
    std::fs::write(&run, r#"{ "vae": { "latent_size": 4, "learning_rate": 0.01 } }"#).unwrap();

    let layered = LayeredConfig::load(ConfigLayering::default().with_base(&base).with_run(&run))
        .unwrap();
    let settings: VaeSettings = layered.section(&["vae"]).unwrap().unwrap();
    let mut config = VaeConfig::default();
    settings.apply(&mut config).unwrap();

    assert_eq!(config.reparam, ReparamKind::Discrete);
    assert_eq!(config.latent_size, 4);
    assert_eq!(config.learning_rate, 0.01);
    assert_eq!(config.encoder, vec![16]);
    assert_eq!(config.temperature.min_temp, 0.3);
}
