use std::fs::File;
use std::io::{self, BufReader, Read};
use std::path::PathBuf;

use anyhow::{Context, Result, ensure};
use clap::Parser;
use seqtag_eval::scorer::DEFAULT_SRL_SCRIPT;
use seqtag_eval::{FrameSet, OfficialScorer, SrlEvalConfig, compute_srl_f1};
use serde::Deserialize;
use seqtag_trainer::logging::init_logging;
use tracing::info;

/// Gold and predicted SRL frames of a corpus.
#[derive(Debug, Deserialize)]
struct SrlInput {
    sentences: Vec<Vec<String>>,
    gold: Vec<FrameSet>,
    predictions: Vec<FrameSet>,
}

#[derive(Parser)]
#[command(name = "srl-eval")]
#[command(about = "Compute unofficial and official SRL F1 from a JSON file of frames")]
#[command(version)]
struct Cli {
    /// JSON input `{sentences, gold, predictions}`; stdin when omitted
    input: Option<PathBuf>,

    /// CoNLL-2005 scorer script
    #[arg(long, env = "SRL_EVAL_SCRIPT", default_value = DEFAULT_SRL_SCRIPT)]
    script: PathBuf,

    /// Perl interpreter running the scorer
    #[arg(long, env = "SRL_EVAL_PERL", default_value = "perl")]
    perl: PathBuf,

    /// Existing gold file in CoNLL format
    #[arg(long)]
    gold_conll: Option<PathBuf>,

    /// Prefix of the generated `.gold` and `.pred` files
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Skip the official scorer
    #[arg(long)]
    no_official: bool,

    /// Also append log lines to `<LOG>.log`
    #[arg(long, env = "SRL_EVAL_LOG")]
    log: Option<String>,
}

fn read_input(path: Option<&PathBuf>) -> Result<SrlInput> {
    let mut content = String::new();
    match path {
        Some(path) => {
            BufReader::new(File::open(path).with_context(|| format!("opening {}", path.display()))?)
                .read_to_string(&mut content)?;
        }
        None => {
            io::stdin().read_to_string(&mut content)?;
        }
    }
    let input: SrlInput = serde_json::from_str(&content).context("parsing SRL input")?;
    ensure!(
        input.sentences.len() == input.gold.len(),
        "{} sentences but {} gold frame sets",
        input.sentences.len(),
        input.gold.len()
    );
    Ok(input)
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.log.as_deref())?;

    let input = read_input(cli.input.as_ref())?;
    info!("scoring {} sentences", input.sentences.len());

    let mut config = SrlEvalConfig::default();
    if !cli.no_official {
        config = config.with_scorer(OfficialScorer::new(cli.perl, cli.script));
    }
    if let Some(path) = cli.gold_conll {
        config = config.with_gold_conll_path(path);
    }
    if let Some(path) = cli.output {
        config = config.with_output_path(path);
    }

    let result = compute_srl_f1(&input.sentences, &input.gold, &input.predictions, &config)?;
    println!("{}", serde_json::to_string_pretty(&result)?);
    Ok(())
}
