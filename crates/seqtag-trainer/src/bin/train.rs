use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;
use seqtag_core::ModelConfig;
use seqtag_trainer::logging::init_logging;
use seqtag_trainer::{DataPaths, TrainConfig, run_training};
use tracing::info;

#[derive(Parser)]
#[command(name = "train")]
#[command(about = "Train a BiLSTM-CNN-CRF tagger on CoNLL-03 data")]
#[command(version)]
struct Cli {
    /// Training split
    #[arg(long, env = "SEQTAG_TRAIN")]
    train: PathBuf,

    /// Development split used for model selection
    #[arg(long, env = "SEQTAG_DEV")]
    dev: PathBuf,

    /// Test split scored at the best dev epoch
    #[arg(long, env = "SEQTAG_TEST")]
    test: PathBuf,

    /// GloVe-format word vectors
    #[arg(short, long, env = "SEQTAG_EMBEDDINGS")]
    embeddings: Option<PathBuf>,

    /// Model configuration (JSON)
    #[arg(short = 'm', long)]
    model_config: Option<PathBuf>,

    /// Training configuration (JSON)
    #[arg(short = 'c', long)]
    train_config: Option<PathBuf>,

    /// Directory for checkpoints, vocabularies and predictions
    #[arg(short, long, env = "SEQTAG_OUTPUT_DIR", default_value = "output")]
    output_dir: PathBuf,

    /// conlleval script; chunk F1 is computed natively without it
    #[arg(long, env = "SEQTAG_CONLLEVAL")]
    eval_script: Option<PathBuf>,

    /// Override the number of epochs
    #[arg(long)]
    epochs: Option<usize>,

    /// Override the random seed
    #[arg(long)]
    seed: Option<u64>,

    /// Log file name, written as `<name>.log`
    #[arg(long, default_value = "ner")]
    log_name: String,

    /// Log to stderr only
    #[arg(long)]
    no_log_file: bool,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging((!cli.no_log_file).then_some(cli.log_name.as_str()))?;

    let model_config = match &cli.model_config {
        Some(path) => ModelConfig::from_file(path)?,
        None => ModelConfig::default(),
    };
    let mut config = match &cli.train_config {
        Some(path) => TrainConfig::from_file(path)?,
        None => TrainConfig::default(),
    };
    if let Some(epochs) = cli.epochs {
        config = config.with_epochs(epochs);
    }
    if let Some(seed) = cli.seed {
        config = config.with_seed(seed);
    }

    let paths = DataPaths {
        train: cli.train,
        dev: cli.dev,
        test: cli.test,
        embeddings: cli.embeddings,
        output_dir: cli.output_dir,
        eval_script: cli.eval_script,
    };

    let summary = run_training(paths, config, model_config)?;
    info!(
        "best epoch {}: dev F1 {:.2}, test F1 {:.2}, checkpoint {}",
        summary.best_epoch,
        summary.best_dev.f1,
        summary.test.f1,
        summary.checkpoint.display()
    );
    println!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(())
}
