use clap::{Args, Parser, Subcommand, ValueEnum, ValueHint};
use serde::{Deserialize, Serialize};
use spiral_config::tracing::{flush_chrome_trace, init_tracing};
use spiral_config::{ConfigLayering, LayeredConfig};
use st_mnist::{
    read_data_sets, AllMnist, DatasetProvider, MnistDataSets, MnistNumber, MnistOptions,
    RotationCache, DEFAULT_VALIDATION_SIZE,
};
use st_nn::{Activation, StateDictFormat};
use st_tensor::Tensor;
use st_vae::{
    ReconstructionLossKind, ReparamKind, TrainOptions, TrainingContext, VaeConfig, VaeSettings,
    VanillaVae,
};
use std::error::Error;
use std::fs;
use std::io::{self, ErrorKind};
use std::path::{Path, PathBuf};
use tracing::info;

type DynError = Box<dyn Error>;

type Result<T> = std::result::Result<T, DynError>;

fn invalid_input(message: impl Into<String>) -> DynError {
    Box::new(io::Error::new(ErrorKind::InvalidInput, message.into()))
}

#[derive(Clone, Debug, Serialize, Deserialize)]
struct DiskTensor {
    rows: usize,
    cols: usize,
    data: Vec<f32>,
}

impl From<&Tensor> for DiskTensor {
    fn from(tensor: &Tensor) -> Self {
        DiskTensor {
            rows: tensor.rows(),
            cols: tensor.cols(),
            data: tensor.data().to_vec(),
        }
    }
}

impl DiskTensor {
    fn into_tensor(self) -> Result<Tensor> {
        let expected = self.rows.checked_mul(self.cols).ok_or_else(|| {
            invalid_input(format!(
                "tensor dimensions {}x{} overflow",
                self.rows, self.cols
            ))
        })?;
        if self.data.len() != expected {
            return Err(Box::new(io::Error::new(
                ErrorKind::InvalidData,
                format!(
                    "tensor payload has {} values but expected {} (rows * cols)",
                    self.data.len(),
                    expected
                ),
            )));
        }
        Ok(Tensor::from_vec(self.rows, self.cols, self.data)?)
    }
}

#[derive(Serialize)]
struct ReconstructionReport {
    model: String,
    images: DiskTensor,
    reconstruction_mean: f32,
    divergence_mean: f32,
    cost_mean: f32,
    cost: Vec<f32>,
}

#[derive(Parser)]
#[command(
    author,
    version,
    about = "Train and sample variational autoencoders on MNIST"
)]
struct Cli {
    /// Layered config root (overrides VAE_CONFIG_ROOT discovery)
    #[arg(long, global = true, value_hint = ValueHint::DirPath)]
    config_root: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Train a model and checkpoint it under <base-dir>/models
    Train(TrainArgs),

    /// Decode latent codes from a trained model
    Generate(GenerateArgs),

    /// Encode and decode a test batch with a trained model
    Reconstruct(ReconstructArgs),
}

#[derive(Clone, Copy, ValueEnum)]
enum ReparamArg {
    Continuous,
    Discrete,
}

impl From<ReparamArg> for ReparamKind {
    fn from(arg: ReparamArg) -> Self {
        match arg {
            ReparamArg::Continuous => ReparamKind::Continuous,
            ReparamArg::Discrete => ReparamKind::Discrete,
        }
    }
}

#[derive(Clone, Copy, ValueEnum)]
enum LossArg {
    BinaryCrossEntropy,
    SquaredError,
}

impl From<LossArg> for ReconstructionLossKind {
    fn from(arg: LossArg) -> Self {
        match arg {
            LossArg::BinaryCrossEntropy => ReconstructionLossKind::BinaryCrossEntropy,
            LossArg::SquaredError => ReconstructionLossKind::SquaredError,
        }
    }
}

#[derive(Clone, Copy, ValueEnum)]
enum FormatArg {
    Bincode,
    Json,
}

impl From<FormatArg> for StateDictFormat {
    fn from(arg: FormatArg) -> Self {
        match arg {
            FormatArg::Bincode => StateDictFormat::Bincode,
            FormatArg::Json => StateDictFormat::Json,
        }
    }
}

/// Hyperparameters shared by every subcommand. Unset flags fall back to the
/// `vae` config section, then to the built-in defaults.
#[derive(Args)]
struct ModelArgs {
    /// Root for models/, imgs/ and logs/
    #[arg(long, value_hint = ValueHint::DirPath)]
    base_dir: Option<PathBuf>,

    #[arg(long, value_enum)]
    reparam: Option<ReparamArg>,

    #[arg(long, value_enum)]
    loss: Option<LossArg>,

    #[arg(long)]
    latent_size: Option<usize>,

    #[arg(long)]
    batch_size: Option<usize>,

    #[arg(long)]
    learning_rate: Option<f32>,

    /// elu, relu, sigmoid, tanh or identity
    #[arg(long)]
    activation: Option<String>,

    /// Comma separated encoder hidden sizes
    #[arg(long, value_delimiter = ',')]
    encoder: Option<Vec<usize>>,

    /// Comma separated decoder hidden sizes
    #[arg(long, value_delimiter = ',')]
    decoder: Option<Vec<usize>>,

    /// Straight-through one-hot samples in discrete mode
    #[arg(long, conflicts_with = "soft")]
    hard: bool,

    /// Relaxed samples in discrete mode, overriding a configured `hard_gumbel`
    #[arg(long)]
    soft: bool,

    #[arg(long)]
    seed: Option<u64>,

    #[arg(long, value_enum)]
    checkpoint_format: Option<FormatArg>,
}

#[derive(Args)]
struct DataArgs {
    /// Directory holding the four uncompressed MNIST IDX files
    #[arg(long, value_hint = ValueHint::DirPath)]
    data_dir: PathBuf,

    /// Restrict to a single digit
    #[arg(long)]
    digit: Option<u8>,

    /// Fold every other digit into one label (needs --digit)
    #[arg(long)]
    one_vs_all: bool,

    #[arg(long, default_value_t = DEFAULT_VALIDATION_SIZE)]
    validation_size: usize,

    /// Bilinear resize to HEIGHT,WIDTH
    #[arg(long, value_delimiter = ',', num_args = 2)]
    resize: Option<Vec<usize>>,

    /// Rotate the selected digit by this many degrees (needs --digit)
    #[arg(long)]
    rotate: Option<i32>,
}

#[derive(Args)]
struct TrainArgs {
    #[command(flatten)]
    model: ModelArgs,

    #[command(flatten)]
    data: DataArgs,

    #[arg(long)]
    epochs: Option<usize>,

    #[arg(long)]
    display_step: Option<usize>,

    /// Checkpoint every N epochs in addition to the final save
    #[arg(long)]
    checkpoint_every: Option<usize>,

    /// Resume from an existing checkpoint
    #[arg(long)]
    restore: bool,
}

#[derive(Args)]
struct GenerateArgs {
    #[command(flatten)]
    model: ModelArgs,

    /// Width of one decoded image
    #[arg(long, default_value_t = 784)]
    input_size: usize,

    /// Latent codes to decode (JSON tensor); random one-hot codes otherwise
    #[arg(long, value_hint = ValueHint::FilePath)]
    latent: Option<PathBuf>,

    #[arg(long, value_hint = ValueHint::FilePath)]
    output: PathBuf,
}

#[derive(Args)]
struct ReconstructArgs {
    #[command(flatten)]
    model: ModelArgs,

    #[command(flatten)]
    data: DataArgs,

    #[arg(long, value_hint = ValueHint::FilePath)]
    output: PathBuf,
}

fn main() {
    if let Err(err) = try_main() {
        eprintln!("error: {err}");
        flush_chrome_trace();
        std::process::exit(1);
    }
    flush_chrome_trace();
}

fn try_main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing()?;
    let settings = load_settings(cli.config_root.as_deref())?;
    match &cli.command {
        Command::Train(args) => run_train(args, &settings),
        Command::Generate(args) => run_generate(args, &settings),
        Command::Reconstruct(args) => run_reconstruct(args, &settings),
    }
}

fn load_settings(root: Option<&Path>) -> Result<VaeSettings> {
    let layering = match root {
        Some(root) => ConfigLayering::default()
            .with_base(root.join("base.toml"))
            .with_site(root.join("site.toml"))
            .with_run(root.join("run.json")),
        None => ConfigLayering::discover(),
    };
    let layered = LayeredConfig::load(layering)?;
    Ok(layered.section::<VaeSettings>(&["vae"])?.unwrap_or_default())
}

fn build_config(args: &ModelArgs, settings: &VaeSettings, input_size: usize) -> Result<VaeConfig> {
    let mut config = VaeConfig::default();
    settings.apply(&mut config)?;
    config.input_size = input_size;
    if let Some(base_dir) = &args.base_dir {
        config.base_dir = base_dir.clone();
    }
    if let Some(reparam) = args.reparam {
        config.reparam = reparam.into();
    }
    if let Some(loss) = args.loss {
        config.reconstruction_loss = loss.into();
    }
    if let Some(latent_size) = args.latent_size {
        config.latent_size = latent_size;
    }
    if let Some(batch_size) = args.batch_size {
        config.batch_size = batch_size;
    }
    if let Some(learning_rate) = args.learning_rate {
        config.learning_rate = learning_rate;
    }
    if let Some(name) = &args.activation {
        config.activation = name.parse::<Activation>()?;
    }
    if let Some(encoder) = &args.encoder {
        config.encoder = encoder.clone();
    }
    if let Some(decoder) = &args.decoder {
        config.decoder = decoder.clone();
    }
    if args.hard {
        config.hard_gumbel = true;
    } else if args.soft {
        config.hard_gumbel = false;
    }
    if args.seed.is_some() {
        config.seed = args.seed;
    }
    if let Some(format) = args.checkpoint_format {
        config.checkpoint_format = format.into();
    }
    Ok(config)
}

enum Provider {
    Digit(MnistNumber),
    All(AllMnist),
}

impl Provider {
    fn input_size(&self) -> usize {
        match self {
            Provider::Digit(number) => number.input_size(),
            Provider::All(all) => all.input_size(),
        }
    }

    fn provider(&mut self) -> &mut dyn DatasetProvider {
        match self {
            Provider::Digit(number) => number,
            Provider::All(all) => all,
        }
    }

    fn test_batch(&mut self, batch_size: usize) -> Result<Tensor> {
        let (images, _) = match self {
            Provider::Digit(number) => number.test_batch(batch_size)?,
            Provider::All(all) => all.test_batch(batch_size)?,
        };
        Ok(images)
    }
}

fn open_data(args: &DataArgs, seed: Option<u64>, base_dir: &Path) -> Result<Provider> {
    let sets: MnistDataSets = read_data_sets(&args.data_dir, args.validation_size, seed)?;
    let resize = match args.resize.as_deref() {
        Some([height, width]) => Some((*height, *width)),
        Some(_) => return Err(invalid_input("--resize takes HEIGHT,WIDTH")),
        None => None,
    };
    let options = MnistOptions {
        one_vs_all: args.one_vs_all,
        resize,
        ..MnistOptions::default()
    };
    match args.digit {
        Some(digit) => {
            let mut number = MnistNumber::new(digit, &sets, options)?;
            if let Some(angle) = args.rotate {
                let cache = RotationCache::new(base_dir.join("rotations"));
                number.rotate(angle, &cache)?;
            }
            Ok(Provider::Digit(number))
        }
        None if args.one_vs_all || args.rotate.is_some() => Err(invalid_input(
            "--one-vs-all and --rotate need --digit",
        )),
        None => Ok(Provider::All(AllMnist::new(&sets, options)?)),
    }
}

fn run_train(args: &TrainArgs, settings: &VaeSettings) -> Result<()> {
    let draft = build_config(&args.model, settings, 1)?;
    let mut data = open_data(&args.data, draft.seed, &draft.base_dir)?;
    let config = VaeConfig {
        input_size: data.input_size(),
        ..draft
    };
    let mut vae = VanillaVae::dense(config, TrainingContext::new())?;
    if args.restore && vae.restore()? {
        info!(model = vae.identity(), "resuming from checkpoint");
    }
    let defaults = TrainOptions::default();
    let options = TrainOptions {
        epochs: args.epochs.or(settings.epochs).unwrap_or(defaults.epochs),
        display_step: args
            .display_step
            .or(settings.display_step)
            .unwrap_or(defaults.display_step),
        checkpoint_every: args.checkpoint_every,
    };
    let history = vae.train(data.provider(), &options)?;
    let path = vae.save()?;
    if let Some(last) = history.last() {
        println!(
            "{}: {} epochs, avg cost {:.4}, checkpoint {}",
            vae.identity(),
            last.epoch,
            last.avg_cost,
            path.display()
        );
    }
    Ok(())
}

fn restored(config: VaeConfig) -> Result<VanillaVae> {
    let mut vae = VanillaVae::dense(config, TrainingContext::new())?;
    if !vae.restore()? {
        return Err(Box::new(io::Error::new(
            ErrorKind::NotFound,
            format!("no checkpoint at {}", vae.checkpoint_path().display()),
        )));
    }
    Ok(vae)
}

fn run_generate(args: &GenerateArgs, settings: &VaeSettings) -> Result<()> {
    let config = build_config(&args.model, settings, args.input_size)?;
    let mut vae = restored(config)?;
    let latent = match args.latent.as_ref() {
        Some(path) => {
            let disk: DiskTensor = serde_json::from_str(&fs::read_to_string(path)?)?;
            Some(disk.into_tensor()?)
        }
        None => None,
    };
    let images = vae.generate(latent.as_ref())?;
    write_json(&DiskTensor::from(&images), &args.output)
}

fn run_reconstruct(args: &ReconstructArgs, settings: &VaeSettings) -> Result<()> {
    let draft = build_config(&args.model, settings, 1)?;
    let mut data = open_data(&args.data, draft.seed, &draft.base_dir)?;
    let config = VaeConfig {
        input_size: data.input_size(),
        ..draft
    };
    let batch_size = config.batch_size;
    let mut vae = restored(config)?;
    let x = data.test_batch(batch_size)?;
    let out = vae.reconstruct(&x, true)?;
    let losses = out
        .losses
        .ok_or_else(|| invalid_input("reconstruction did not report losses"))?;
    let report = ReconstructionReport {
        model: vae.identity().to_string(),
        images: DiskTensor::from(&out.images),
        reconstruction_mean: losses.reconstruction_mean,
        divergence_mean: losses.divergence_mean,
        cost_mean: losses.cost_mean,
        cost: losses.cost,
    };
    write_json(&report, &args.output)
}

fn write_json<T: Serialize>(value: &T, path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    fs::write(path, serde_json::to_string_pretty(value)?)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn model_args(extra: &[&str]) -> ModelArgs {
        let mut argv = vec!["st-vae-cli", "generate", "--output", "out.json"];
        argv.extend_from_slice(extra);
        match Cli::try_parse_from(argv).unwrap().command {
            Command::Generate(args) => args.model,
            _ => unreachable!(),
        }
    }

    #[test]
    fn flags_override_configured_straight_through_sampling() {
        let settings = VaeSettings {
            hard_gumbel: Some(true),
            ..VaeSettings::default()
        };
        let kept = build_config(&model_args(&[]), &settings, 4).unwrap();
        assert!(kept.hard_gumbel);
        let soft = build_config(&model_args(&["--soft"]), &settings, 4).unwrap();
        assert!(!soft.hard_gumbel);
        let hard = build_config(&model_args(&["--hard"]), &VaeSettings::default(), 4).unwrap();
        assert!(hard.hard_gumbel);
        assert!(Cli::try_parse_from([
            "st-vae-cli", "generate", "--output", "o.json", "--hard", "--soft"
        ])
        .is_err());
    }

    #[test]
    fn disk_tensors_with_overflowing_dimensions_are_rejected() {
        let huge = DiskTensor {
            rows: usize::MAX,
            cols: 2,
            data: vec![0.0; 2],
        };
        assert!(huge.into_tensor().is_err());
        let short = DiskTensor {
            rows: 2,
            cols: 2,
            data: vec![0.0; 3],
        };
        assert!(short.into_tensor().is_err());
        let ok = DiskTensor {
            rows: 1,
            cols: 2,
            data: vec![0.5, 1.0],
        };
        assert_eq!(ok.into_tensor().unwrap().shape(), (1, 2));
    }
}
