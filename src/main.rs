use anyhow::{bail, Context, Result};
use candle_core::{Device, Tensor};
use clap::{Parser, Subcommand};
use noisewise::config::ExperimentConfig;
use noisewise::training::{create_loss, LoaderFactory, LoaderRequest, Loaders, PartitionInputs, TruncateMode};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::info;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

#[derive(Parser)]
#[command(name = "noisewise")]
#[command(about = "Robust curriculum losses and noisy-label dataset partitions", long_about = None)]
struct Cli {
    /// Increase log verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Only log errors
    #[arg(short, long, global = true)]
    quiet: bool,

    /// Emit logs as JSON
    #[arg(long, global = true)]
    json_logs: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Validate an experiment configuration file
    Config {
        /// Configuration file to validate
        #[arg(short, long)]
        file: PathBuf,
    },

    /// Print the labeled/unlabeled split for a prediction file
    Partition {
        /// Experiment configuration
        #[arg(short, long)]
        config: PathBuf,

        /// JSON file with `pred`, `prob` and optional `teacher_idx`
        #[arg(short, long)]
        predictions: PathBuf,

        /// Split from the teacher set instead of the clean predictions
        #[arg(long)]
        svd: bool,

        /// Intersect the teacher set with the clean predictions (with --svd)
        #[arg(long)]
        refinement: bool,

        /// Teacher restriction of the regular split
        #[arg(long, value_enum, default_value = "none")]
        truncate: TruncateArg,
    },

    /// Evaluate the configured loss on a logits file
    Loss {
        /// Experiment configuration
        #[arg(short, long)]
        config: PathBuf,

        /// JSON file with `logits` (rows of class scores) and `targets`
        #[arg(short, long)]
        logits: PathBuf,
    },

    /// Show build information
    Info,
}

#[derive(Clone, Copy, clap::ValueEnum)]
enum TruncateArg {
    None,
    Initial,
}

impl From<TruncateArg> for TruncateMode {
    fn from(arg: TruncateArg) -> Self {
        match arg {
            TruncateArg::None => TruncateMode::None,
            TruncateArg::Initial => TruncateMode::Initial,
        }
    }
}

#[derive(Deserialize)]
struct PredictionFile {
    pred: Vec<bool>,
    prob: Vec<f32>,
    #[serde(default)]
    teacher_idx: Option<Vec<usize>>,
}

#[derive(Deserialize)]
struct LogitsFile {
    logits: Vec<Vec<f32>>,
    targets: Vec<u32>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose, cli.quiet, cli.json_logs);

    match cli.command {
        Commands::Config { file } => validate_config(&file)?,
        Commands::Partition {
            config,
            predictions,
            svd,
            refinement,
            truncate,
        } => show_partition(&config, &predictions, svd, refinement, truncate.into())?,
        Commands::Loss { config, logits } => evaluate_loss(&config, &logits)?,
        Commands::Info => show_system_info(),
    }

    Ok(())
}

fn init_logging(verbosity: u8, quiet: bool, json_output: bool) {
    let level = if quiet {
        "error"
    } else {
        match verbosity {
            0 => "noisewise=info,warn",
            1 => "noisewise=debug,info",
            2 => "noisewise=trace,debug",
            _ => "trace",
        }
    };
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    if json_output {
        let json_layer = fmt::layer()
            .json()
            .with_current_span(true)
            .with_span_list(true)
            .with_filter(env_filter);
        tracing_subscriber::registry().with(json_layer).init();
    } else {
        let fmt_layer = fmt::layer().with_target(false).with_filter(env_filter);
        tracing_subscriber::registry().with(fmt_layer).init();
    }
}

fn load_config(path: &Path) -> Result<ExperimentConfig> {
    ExperimentConfig::from_file(path).with_context(|| format!("Failed to load configuration {}", path.display()))
}

fn validate_config(path: &Path) -> Result<()> {
    info!("Validating configuration file: {}", path.display());
    let config = load_config(path)?;

    info!("Configuration is valid");
    info!("  - Experiment: {}", config.name);
    info!(
        "  - Dataset: {} at {} ({} classes)",
        config.dataset.kind.name(),
        config.dataset.root.display(),
        config.dataset.num_classes()
    );
    info!(
        "  - Loader: batch {}, {} batches per epoch, {} workers",
        config.loader.batch_size, config.loader.num_batches, config.loader.num_workers
    );
    info!("  - Loss: {:?} ({:?})", config.loss.loss_type, config.loss.reduction());
    Ok(())
}

fn show_partition(
    config_path: &Path,
    predictions: &Path,
    svd: bool,
    refinement: bool,
    truncate: TruncateMode,
) -> Result<()> {
    let config = load_config(config_path)?;
    let content = fs::read_to_string(predictions)
        .with_context(|| format!("Failed to read predictions {}", predictions.display()))?;
    let file: PredictionFile = serde_json::from_str(&content).context("Failed to parse predictions")?;

    let factory = LoaderFactory::new(&config.dataset, config.loader.clone()).context("Failed to index dataset")?;
    let Loaders::EvalTrain(eval_train) = factory.run(LoaderRequest::EvalTrain)? else {
        bail!("eval_train did not produce an evaluation loader");
    };

    let inputs = PartitionInputs::new(eval_train.dataset().records(), file.pred, file.prob, file.teacher_idx)
        .context("Predictions do not match the eval_train samples")?;
    let request = if svd {
        LoaderRequest::TrainSvd { inputs, refinement }
    } else {
        LoaderRequest::Train { inputs, truncate }
    };

    for (mode, samples, batches) in factory.run(request)?.summary() {
        println!("{:<14} {:>8} samples {:>6} batches", mode, samples, batches);
    }
    Ok(())
}

fn evaluate_loss(config_path: &Path, logits_path: &Path) -> Result<()> {
    let config = load_config(config_path)?;
    let content = fs::read_to_string(logits_path)
        .with_context(|| format!("Failed to read logits {}", logits_path.display()))?;
    let file: LogitsFile = serde_json::from_str(&content).context("Failed to parse logits")?;

    let num_classes = file.logits.first().map(Vec::len).unwrap_or(0);
    if file.logits.iter().any(|row| row.len() != num_classes) {
        bail!("logit rows have different lengths");
    }

    let device = Device::Cpu;
    let batch_size = file.logits.len();
    let flat: Vec<f32> = file.logits.into_iter().flatten().collect();
    let logits = Tensor::from_vec(flat, (batch_size, num_classes), &device)?;
    let targets = Tensor::new(file.targets.as_slice(), &device)?;

    let loss = create_loss(&config.loss)?;
    let outcome = loss.forward(&logits, &targets)?;
    if outcome.is_no_selection() {
        info!("{} selected no samples", loss.name());
    }

    println!("{}", serde_json::to_string_pretty(outcome.metrics())?);
    Ok(())
}

fn show_system_info() {
    println!("noisewise {}", env!("CARGO_PKG_VERSION"));
    println!();
    println!("Losses: cross_entropy, npcl, curriculum, tight_curriculum");
    println!("Datasets: clothing1m, svhn, cifar10, cifar100");
    println!("Loader modes: warmup, train, train_svd, eval_train, test, val");
    println!();
    println!("Hardware support:");

    #[cfg(feature = "cuda")]
    println!("  CUDA: enabled");
    #[cfg(not(feature = "cuda"))]
    println!("  CUDA: not compiled");

    #[cfg(feature = "metal")]
    println!("  Metal: enabled");
    #[cfg(not(feature = "metal"))]
    println!("  Metal: not compiled");

    #[cfg(feature = "accelerate")]
    println!("  Accelerate: enabled");
    #[cfg(not(feature = "accelerate"))]
    println!("  Accelerate: not compiled");

    println!("  CPU: enabled");
}
