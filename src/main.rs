use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use maestro_train::logging::init_logging;
use maestro_train::training::data::{prepare_maestro, PretokenizedEncoder};
use maestro_train::utils::{inspect_weights, select_device};
use maestro_train::{Trainer, TrainingConfig};
use tracing::info;

#[derive(Parser)]
#[command(name = "maestro-train")]
#[command(about = "Train token-sequence models on tokenized piano performances", long_about = None)]
#[command(propagate_version = true, version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Set the verbosity level (can be repeated for more verbose output)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Use JSON log output
    #[arg(long, global = true)]
    json: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Train a model, optionally continuing an earlier run
    Train(TrainArgs),

    /// Convert the MAESTRO dataset into token files
    Preprocess {
        /// Root folder of the MAESTRO dataset
        root: PathBuf,

        /// Output folder for the train/val/test token files
        #[arg(short, long, default_value = "./dataset/e_piano")]
        output_dir: PathBuf,
    },

    /// Validate a configuration file and print the resolved configuration
    CheckConfig {
        /// Configuration file to validate
        file: PathBuf,
    },
}

#[derive(Args)]
struct TrainArgs {
    /// Configuration file (YAML or JSON); flags override its values
    #[arg(short, long, env = "MAESTRO_TRAIN_CONFIG")]
    config: Option<PathBuf>,

    /// Folder of preprocessed token files
    #[arg(long)]
    input_dir: Option<PathBuf>,

    /// Folder to save weights, results and metrics
    #[arg(long)]
    output_dir: Option<PathBuf>,

    /// Weights to continue training from
    #[arg(long)]
    continue_weights: Option<PathBuf>,

    /// Epoch the continue_weights were saved at
    #[arg(long)]
    continue_epoch: Option<usize>,

    /// Constant learning rate (disables the warmup schedule)
    #[arg(long)]
    lr: Option<f64>,

    /// Label smoothing for the training loss
    #[arg(long)]
    ce_smoothing: Option<f64>,

    /// Number of epochs to train
    #[arg(long)]
    epochs: Option<usize>,

    /// Batch size
    #[arg(long)]
    batch_size: Option<usize>,

    /// Log every N training batches
    #[arg(long)]
    print_modulus: Option<usize>,

    /// Save a numbered weight snapshot every N epochs
    #[arg(long)]
    weight_modulus: Option<usize>,

    /// Batches prefetched by the data loading worker (0 disables the worker)
    #[arg(long)]
    n_workers: Option<usize>,

    /// Maximum sequence length
    #[arg(long)]
    max_sequence: Option<usize>,

    /// Number of hidden blocks
    #[arg(long)]
    n_layers: Option<usize>,

    /// Model width
    #[arg(long)]
    d_model: Option<usize>,

    /// Feed-forward width
    #[arg(long)]
    dim_feedforward: Option<usize>,

    /// Dropout rate
    #[arg(long)]
    dropout: Option<f64>,

    /// Seed for shuffling and random windows
    #[arg(long)]
    seed: Option<u64>,

    /// Evaluate loaded weights before the first resumed epoch
    #[arg(long)]
    baseline_on_resume: bool,

    /// Do not write the scalar metrics stream
    #[arg(long)]
    no_tensorboard: bool,

    /// Train on the CPU even when an accelerator is available
    #[arg(long)]
    force_cpu: bool,
}

impl TrainArgs {
    fn resolve(self) -> Result<TrainingConfig> {
        let mut config = match &self.config {
            Some(path) => TrainingConfig::from_file(path)
                .with_context(|| format!("Failed to load configuration from {}", path.display()))?,
            None => TrainingConfig::default(),
        };

        if let Some(dir) = self.input_dir {
            config.data.input_dir = dir;
        }
        if let Some(dir) = self.output_dir {
            config.checkpointing.output_dir = dir;
        }
        if self.continue_weights.is_some() {
            config.checkpointing.continue_weights = self.continue_weights;
        }
        if self.continue_epoch.is_some() {
            config.checkpointing.continue_epoch = self.continue_epoch;
        }
        if self.lr.is_some() {
            config.optimizer.learning_rate = self.lr;
        }
        if self.ce_smoothing.is_some() {
            config.training.ce_smoothing = self.ce_smoothing;
        }
        if let Some(epochs) = self.epochs {
            config.training.epochs = epochs;
        }
        if let Some(batch_size) = self.batch_size {
            config.training.batch_size = batch_size;
        }
        if let Some(print_modulus) = self.print_modulus {
            config.training.print_modulus = print_modulus;
        }
        if let Some(weight_modulus) = self.weight_modulus {
            config.training.weight_modulus = weight_modulus;
        }
        if let Some(n_workers) = self.n_workers {
            config.training.n_workers = n_workers;
        }
        if let Some(max_sequence) = self.max_sequence {
            config.model.max_sequence = max_sequence;
        }
        if let Some(n_layers) = self.n_layers {
            config.model.n_layers = n_layers;
        }
        if let Some(d_model) = self.d_model {
            config.model.d_model = d_model;
        }
        if let Some(dim_feedforward) = self.dim_feedforward {
            config.model.dim_feedforward = dim_feedforward;
        }
        if let Some(dropout) = self.dropout {
            config.model.dropout = dropout;
        }
        if let Some(seed) = self.seed {
            config.training.seed = seed;
        }
        config.training.baseline_on_resume |= self.baseline_on_resume;
        config.logging.metrics_sink &= !self.no_tensorboard;
        config.runtime.force_cpu |= self.force_cpu;

        config.validate().context("Invalid training configuration")?;
        Ok(config)
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose, cli.json)?;

    match cli.command {
        Commands::Train(args) => train(args),
        Commands::Preprocess { root, output_dir } => preprocess(root, output_dir),
        Commands::CheckConfig { file } => check_config(file),
    }
}

fn train(args: TrainArgs) -> Result<()> {
    let config = args.resolve()?;
    let device = select_device(config.runtime.force_cpu).context("Failed to select device")?;

    let mut trainer = Trainer::from_config(config, device).context("Failed to set up training")?;
    let result = trainer.train().context("Training failed")?;

    info!("{}", trainer.tracker().summary());
    info!(
        "Wrote {} result rows and {} snapshots in {:?}",
        result.rows.len(),
        result.snapshots.len(),
        result.training_duration
    );
    Ok(())
}

fn preprocess(root: PathBuf, output_dir: PathBuf) -> Result<()> {
    info!("Preprocessing midi files and saving to {}", output_dir.display());

    let counts = prepare_maestro(&root, &output_dir, &PretokenizedEncoder)
        .with_context(|| format!("Failed to preprocess {}", root.display()))?;

    info!("Done: {} pieces", counts.total());
    Ok(())
}

fn check_config(file: PathBuf) -> Result<()> {
    let config = TrainingConfig::from_file(&file)
        .with_context(|| format!("Invalid configuration {}", file.display()))?;

    if let Some(resume) = config.checkpointing.resume_point()? {
        let tensors = inspect_weights(&resume.weights)
            .with_context(|| format!("Unreadable continue_weights {}", resume.weights.display()))?;
        info!(
            "Resume weights {} hold {} tensors (epoch {})",
            resume.weights.display(),
            tensors.len(),
            resume.epoch
        );
    }

    println!("{}", serde_yaml::to_string(&config)?);
    info!("Configuration is valid");
    Ok(())
}
