//! Training loop for the BiLSTM-CNN-CRF tagger.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use candle_core::{DType, Device};
use candle_nn::{Optimizer, VarBuilder, VarMap};
use oorandom::Rand32;
use seqtag_core::ModelConfig;
use seqtag_core::nn::{BiRecurrentConvCrf, load_word_embeddings, reset_parameters};
use seqtag_eval::{Conll03Evaluator, Conll03Score, chunk_f1};
use serde::Serialize;
use tracing::{debug, info};

use crate::config::{DataPaths, TrainConfig};
use crate::data::{
    BatchTensors, EmbeddingTable, Instance, Sentence, Vocabularies, load_glove, read_conll03,
    shuffle, token_batches,
};
use crate::optim::{MomentumSgd, SgdConfig};

pub const CHECKPOINT_FILE: &str = "model.safetensors";
pub const VOCAB_FILE: &str = "vocab.json";
pub const MODEL_CONFIG_FILE: &str = "model_config.json";

/// An evaluation split.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Split {
    Dev,
    Test,
}

impl Split {
    pub fn name(self) -> &'static str {
        match self {
            Split::Dev => "dev",
            Split::Test => "test",
        }
    }
}

/// Scores of one epoch.
#[derive(Debug, Clone, Serialize)]
pub struct EpochReport {
    pub epoch: usize,
    pub learning_rate: f64,
    pub loss: f64,
    pub dev: Conll03Score,
}

/// Outcome of [`Trainer::run`].
#[derive(Debug, Clone, Serialize)]
pub struct TrainSummary {
    pub best_epoch: usize,
    pub best_dev: Conll03Score,
    /// Test scores at the best dev epoch.
    pub test: Conll03Score,
    pub checkpoint: PathBuf,
    pub epochs: Vec<EpochReport>,
}

struct Corpus {
    sentences: Vec<Sentence>,
    instances: Vec<Instance>,
}

impl Corpus {
    fn encode(sentences: Vec<Sentence>, vocabs: &Vocabularies, config: &TrainConfig) -> Result<Self> {
        let instances = sentences
            .iter()
            .map(|sentence| vocabs.encode(sentence, config.max_char_length))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self {
            sentences,
            instances,
        })
    }

    fn lengths(&self) -> Vec<usize> {
        self.instances.iter().map(Instance::len).collect()
    }
}

pub struct Trainer {
    config: TrainConfig,
    model_config: ModelConfig,
    paths: DataPaths,
    device: Device,
    varmap: VarMap,
    model: BiRecurrentConvCrf,
    vocabs: Vocabularies,
    train: Corpus,
    dev: Corpus,
    test: Corpus,
    evaluator: Option<Conll03Evaluator>,
    rng: Rand32,
}

impl Trainer {
    /// Read the corpora, build vocabularies and the word table, and
    /// initialise the model.
    pub fn new(paths: DataPaths, config: TrainConfig, model_config: ModelConfig) -> Result<Self> {
        config.validate()?;
        model_config.validate()?;

        let train = read_conll03(&paths.train)?;
        let dev = read_conll03(&paths.dev)?;
        let test = read_conll03(&paths.test)?;
        info!(
            "read {} train, {} dev and {} test sentences",
            train.len(),
            dev.len(),
            test.len()
        );

        let vocabs = Vocabularies::build(
            train.iter().chain(&dev).chain(&test),
            config.normalize_digits,
        );
        info!(
            "vocabularies: {} words, {} chars, {} tags",
            vocabs.words.len(),
            vocabs.chars.len(),
            vocabs.tags.len()
        );

        let mut rng = Rand32::new(config.seed);
        let table = match &paths.embeddings {
            Some(path) => load_glove(path, &vocabs.words, model_config.word_dim, &mut rng)?,
            None => EmbeddingTable::random(vocabs.words.len(), model_config.word_dim, &mut rng),
        };

        let device = Device::Cpu;
        let constraints = model_config.constraints(vocabs.tags.items())?;
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &device);
        let model = BiRecurrentConvCrf::new(
            vb,
            vocabs.words.len(),
            vocabs.chars.len(),
            vocabs.tags.len(),
            &model_config,
            constraints,
        )?;

        let initializer = model_config.initializer.as_ref().map(|init| init.to_init());
        reset_parameters(&varmap, initializer.as_ref())?;
        load_word_embeddings(&varmap, &table.to_tensor(&device)?)?;

        let train = Corpus::encode(train, &vocabs, &config)?;
        let dev = Corpus::encode(dev, &vocabs, &config)?;
        let test = Corpus::encode(test, &vocabs, &config)?;

        let evaluator = paths
            .eval_script
            .as_ref()
            .map(Conll03Evaluator::new)
            .transpose()?;

        Ok(Self {
            config,
            model_config,
            paths,
            device,
            varmap,
            model,
            vocabs,
            train,
            dev,
            test,
            evaluator,
            rng,
        })
    }

    pub fn vocabs(&self) -> &Vocabularies {
        &self.vocabs
    }

    pub fn model(&self) -> &BiRecurrentConvCrf {
        &self.model
    }

    /// Train for `num_epochs`, keeping the checkpoint with the best dev F1.
    pub fn run(&mut self) -> Result<TrainSummary> {
        std::fs::create_dir_all(&self.paths.output_dir).with_context(|| {
            format!("creating {}", self.paths.output_dir.display())
        })?;
        self.save_metadata()?;

        let mut optimizer = MomentumSgd::new(
            self.varmap.all_vars(),
            SgdConfig {
                learning_rate: self.config.learning_rate,
                momentum: self.config.momentum,
            },
        )?;

        let checkpoint = self.paths.output_dir.join(CHECKPOINT_FILE);
        let mut best: Option<(usize, Conll03Score, Conll03Score)> = None;
        let mut epochs = Vec::with_capacity(self.config.num_epochs);

        for epoch in 0..self.config.num_epochs {
            let learning_rate = self.config.learning_rate_at(epoch);
            optimizer.set_learning_rate(learning_rate);

            let loss = self.train_epoch(&mut optimizer)?;
            let dev = self.evaluate(Split::Dev)?;
            info!(
                "epoch {}/{}: lr {:.5}, loss {:.4}, dev acc {:.2} P {:.2} R {:.2} F1 {:.2}",
                epoch + 1,
                self.config.num_epochs,
                learning_rate,
                loss,
                dev.accuracy,
                dev.precision,
                dev.recall,
                dev.f1
            );

            if best.as_ref().is_none_or(|(_, best_dev, _)| dev.f1 > best_dev.f1) {
                self.varmap
                    .save(&checkpoint)
                    .with_context(|| format!("saving {}", checkpoint.display()))?;
                let test = self.evaluate(Split::Test)?;
                info!(
                    "new best dev F1 {:.2}; test acc {:.2} P {:.2} R {:.2} F1 {:.2}",
                    dev.f1, test.accuracy, test.precision, test.recall, test.f1
                );
                best = Some((epoch + 1, dev, test));
            }

            epochs.push(EpochReport {
                epoch: epoch + 1,
                learning_rate,
                loss,
                dev,
            });
        }

        let Some((best_epoch, best_dev, test)) = best else {
            bail!("num_epochs is 0, nothing was trained");
        };
        info!("best dev F1 {:.2} at epoch {best_epoch}", best_dev.f1);

        Ok(TrainSummary {
            best_epoch,
            best_dev,
            test,
            checkpoint,
            epochs,
        })
    }

    /// One pass over the shuffled training set. Returns the mean loss per sentence.
    pub fn train_epoch(&mut self, optimizer: &mut MomentumSgd) -> Result<f64> {
        let mut order: Vec<usize> = (0..self.train.instances.len()).collect();
        shuffle(&mut order, &mut self.rng);
        let batches = token_batches(&order, &self.train.lengths(), self.config.batch_tokens);

        let mut total_loss = 0.0;
        let mut sentences = 0;
        for (step, batch) in batches.iter().enumerate() {
            let instances: Vec<&Instance> =
                batch.iter().map(|&i| &self.train.instances[i]).collect();
            let tensors = BatchTensors::new(&instances, self.config.max_char_length, &self.device)?;

            let loss = self.model.forward(
                &tensors.words,
                &tensors.chars,
                &tensors.tags,
                &tensors.mask,
                None,
                true,
            )?;
            optimizer.backward_step(&loss)?;

            let loss = loss.to_scalar::<f32>()? as f64;
            total_loss += loss * instances.len() as f64;
            sentences += instances.len();
            debug!("step {}/{}: loss {:.4}", step + 1, batches.len(), loss);
        }

        Ok(if sentences > 0 {
            total_loss / sentences as f64
        } else {
            0.0
        })
    }

    /// Decode a split and score it.
    ///
    /// Predictions are written to `<output_dir>/<split>.pred` as
    /// `idx word POS chunk gold pred` rows.
    pub fn evaluate(&self, split: Split) -> Result<Conll03Score> {
        let corpus = match split {
            Split::Dev => &self.dev,
            Split::Test => &self.test,
        };
        let predictions = self.predict(&corpus.instances)?;

        let pred_path = self.paths.output_dir.join(format!("{}.pred", split.name()));
        write_predictions(&pred_path, &corpus.sentences, &predictions)?;

        match &self.evaluator {
            Some(evaluator) => Ok(evaluator.evaluate(&pred_path)?),
            None => native_score(&corpus.sentences, &predictions, &self.model_config),
        }
    }

    /// Tag every instance, returning tag strings in input order.
    pub fn predict(&self, instances: &[Instance]) -> Result<Vec<Vec<String>>> {
        let order: Vec<usize> = (0..instances.len()).collect();
        let lengths: Vec<usize> = instances.iter().map(Instance::len).collect();
        let mut predictions = vec![Vec::new(); instances.len()];

        for batch in token_batches(&order, &lengths, self.config.batch_tokens) {
            let members: Vec<&Instance> = batch.iter().map(|&i| &instances[i]).collect();
            let tensors = BatchTensors::new(&members, self.config.max_char_length, &self.device)?;
            let paths =
                self.model
                    .decode_paths(&tensors.words, &tensors.chars, &tensors.mask, None)?;

            for (&idx, path) in batch.iter().zip(paths) {
                predictions[idx] = path
                    .into_iter()
                    .map(|tag| {
                        self.vocabs
                            .tags
                            .item(tag as u32)
                            .map(str::to_string)
                            .with_context(|| format!("decoded tag id {tag} out of range"))
                    })
                    .collect::<Result<Vec<_>>>()?;
            }
        }
        Ok(predictions)
    }

    fn save_metadata(&self) -> Result<()> {
        let dir = &self.paths.output_dir;
        std::fs::write(
            dir.join(VOCAB_FILE),
            serde_json::to_string(&self.vocabs.to_file())?,
        )?;
        std::fs::write(
            dir.join(MODEL_CONFIG_FILE),
            serde_json::to_string_pretty(&self.model_config)?,
        )?;
        Ok(())
    }
}

/// Write `idx word POS chunk gold pred` rows, one blank line after each sentence.
pub fn write_predictions(
    path: &Path,
    sentences: &[Sentence],
    predictions: &[Vec<String>],
) -> Result<()> {
    let mut writer = BufWriter::new(
        File::create(path).with_context(|| format!("creating {}", path.display()))?,
    );
    for (sentence, tags) in sentences.iter().zip(predictions) {
        if sentence.len() != tags.len() {
            bail!(
                "{} tags predicted for a sentence of {} tokens",
                tags.len(),
                sentence.len()
            );
        }
        for (i, (token, pred)) in sentence.tokens.iter().zip(tags).enumerate() {
            writeln!(
                writer,
                "{} {} {} {} {} {}",
                i + 1,
                token.word,
                token.pos,
                token.chunk,
                token.ner,
                pred
            )?;
        }
        writeln!(writer)?;
    }
    writer.flush()?;
    Ok(())
}

/// Token accuracy and chunk F1 without the external script.
fn native_score(
    sentences: &[Sentence],
    predictions: &[Vec<String>],
    model_config: &ModelConfig,
) -> Result<Conll03Score> {
    let mut correct = 0usize;
    let mut total = 0usize;
    let mut pairs = Vec::with_capacity(sentences.len());
    for (sentence, pred) in sentences.iter().zip(predictions) {
        let gold: Vec<&str> = sentence.tags().collect();
        let pred: Vec<&str> = pred.iter().map(String::as_str).collect();
        correct += gold.iter().zip(&pred).filter(|(g, p)| g == p).count();
        total += gold.len();
        pairs.push((gold, pred));
    }

    let chunks = chunk_f1(&pairs, model_config.tag_scheme)?;
    Ok(Conll03Score {
        accuracy: if total > 0 {
            100.0 * correct as f64 / total as f64
        } else {
            0.0
        },
        precision: chunks.labeled.precision,
        recall: chunks.labeled.recall,
        f1: chunks.labeled.f1,
    })
}

/// Build a [`Trainer`] and run it.
pub fn run_training(
    paths: DataPaths,
    config: TrainConfig,
    model_config: ModelConfig,
) -> Result<TrainSummary> {
    let mut trainer = Trainer::new(paths, config, model_config)?;
    trainer.run()
}
