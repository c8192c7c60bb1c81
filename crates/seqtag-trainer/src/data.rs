//! # CoNLL-03 Data Pipeline
//!
//! Reading `word POS chunk NER` files, building vocabularies, loading GloVe
//! vectors and grouping sentences into token-budget batches.

use std::collections::HashMap;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use anyhow::{Context, Result, bail};
use candle_core::{Device, Tensor};
use oorandom::Rand32;
use serde::{Deserialize, Serialize};

pub const PAD: &str = "<pad>";
pub const UNK: &str = "<unk>";
pub const PAD_ID: u32 = 0;
pub const UNK_ID: u32 = 1;
/// Outside tag, always id 0 so that padded tag positions read as `O`.
pub const OUTSIDE_TAG: &str = "O";

/// One row of a CoNLL-03 file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConllToken {
    pub word: String,
    pub pos: String,
    pub chunk: String,
    pub ner: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Sentence {
    pub tokens: Vec<ConllToken>,
}

impl Sentence {
    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }

    pub fn tags(&self) -> impl Iterator<Item = &str> {
        self.tokens.iter().map(|token| token.ner.as_str())
    }
}

/// Load a CoNLL-03 file. `-DOCSTART-` rows are skipped and blank lines end sentences.
pub fn read_conll03<P: AsRef<Path>>(path: P) -> Result<Vec<Sentence>> {
    let path = path.as_ref();
    let file = File::open(path).with_context(|| format!("opening {}", path.display()))?;
    parse_conll03(BufReader::new(file)).with_context(|| format!("reading {}", path.display()))
}

pub fn parse_conll03<R: BufRead>(reader: R) -> Result<Vec<Sentence>> {
    let mut sentences = Vec::new();
    let mut current = Sentence::default();

    for (line_no, line) in reader.lines().enumerate() {
        let line = line?;
        let line = line.trim();

        if line.is_empty() {
            if !current.is_empty() {
                sentences.push(std::mem::take(&mut current));
            }
            continue;
        }
        if line.starts_with("-DOCSTART-") {
            continue;
        }

        let fields: Vec<&str> = line.split_whitespace().collect();
        let [word, pos, chunk, .., ner] = fields[..] else {
            bail!(
                "line {}: expected `word POS chunk NER`, got {:?}",
                line_no + 1,
                line
            );
        };
        current.tokens.push(ConllToken {
            word: word.to_string(),
            pos: pos.to_string(),
            chunk: chunk.to_string(),
            ner: ner.to_string(),
        });
    }

    if !current.is_empty() {
        sentences.push(current);
    }
    Ok(sentences)
}

/// Replace every ASCII digit with `0`.
pub fn normalize_digits(word: &str) -> String {
    word.chars()
        .map(|c| if c.is_ascii_digit() { '0' } else { c })
        .collect()
}

/// Bidirectional map between strings and dense ids.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Vocabulary {
    items: Vec<String>,
    index: HashMap<String, u32>,
    unk: Option<u32>,
}

impl Vocabulary {
    /// Vocabulary with `<pad>` = 0 and `<unk>` = 1.
    pub fn with_unknown() -> Self {
        let mut vocab = Self::default();
        vocab.add(PAD);
        vocab.unk = Some(vocab.add(UNK));
        vocab
    }

    /// Tag vocabulary: no unknown entry, `O` first.
    pub fn for_tags() -> Self {
        let mut vocab = Self::default();
        vocab.add(OUTSIDE_TAG);
        vocab
    }

    /// Rebuild a vocabulary from its items, e.g. after loading it from disk.
    pub fn from_items(items: Vec<String>, unk: Option<&str>) -> Self {
        let mut vocab = Self::default();
        for item in items {
            vocab.add(&item);
        }
        vocab.unk = unk.and_then(|unk| vocab.get(unk));
        vocab
    }

    /// Insert `item` if new and return its id.
    pub fn add(&mut self, item: &str) -> u32 {
        if let Some(&id) = self.index.get(item) {
            return id;
        }
        let id = self.items.len() as u32;
        self.items.push(item.to_string());
        self.index.insert(item.to_string(), id);
        id
    }

    pub fn get(&self, item: &str) -> Option<u32> {
        self.index.get(item).copied()
    }

    /// Id of `item`, falling back to `<unk>` when the vocabulary has one.
    pub fn lookup(&self, item: &str) -> Option<u32> {
        self.get(item).or(self.unk)
    }

    pub fn item(&self, id: u32) -> Option<&str> {
        self.items.get(id as usize).map(String::as_str)
    }

    pub fn items(&self) -> &[String] {
        &self.items
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

/// A sentence converted to ids.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Instance {
    pub words: Vec<u32>,
    pub chars: Vec<Vec<u32>>,
    pub tags: Vec<u32>,
}

impl Instance {
    pub fn len(&self) -> usize {
        self.words.len()
    }

    pub fn is_empty(&self) -> bool {
        self.words.is_empty()
    }
}

/// Word, character and tag vocabularies of a corpus.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Vocabularies {
    pub words: Vocabulary,
    pub chars: Vocabulary,
    pub tags: Vocabulary,
    pub normalize_digits: bool,
}

/// On-disk form of [`Vocabularies`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VocabularyFile {
    pub words: Vec<String>,
    pub chars: Vec<String>,
    pub tags: Vec<String>,
    pub normalize_digits: bool,
}

impl Vocabularies {
    pub fn build<'a, I>(sentences: I, normalize_digits: bool) -> Self
    where
        I: IntoIterator<Item = &'a Sentence>,
    {
        let mut vocabs = Self {
            words: Vocabulary::with_unknown(),
            chars: Vocabulary::with_unknown(),
            tags: Vocabulary::for_tags(),
            normalize_digits,
        };
        for sentence in sentences {
            for token in &sentence.tokens {
                let word = vocabs.word_form(&token.word);
                for c in word.chars() {
                    vocabs.chars.add(c.encode_utf8(&mut [0; 4]));
                }
                vocabs.words.add(&word);
                vocabs.tags.add(&token.ner);
            }
        }
        vocabs
    }

    fn word_form(&self, word: &str) -> String {
        if self.normalize_digits {
            normalize_digits(word)
        } else {
            word.to_string()
        }
    }

    /// Convert a sentence to ids, keeping at most `max_char_length` characters per word.
    pub fn encode(&self, sentence: &Sentence, max_char_length: usize) -> Result<Instance> {
        let mut instance = Instance {
            words: Vec::with_capacity(sentence.len()),
            chars: Vec::with_capacity(sentence.len()),
            tags: Vec::with_capacity(sentence.len()),
        };
        for token in &sentence.tokens {
            let word = self.word_form(&token.word);
            instance.words.push(self.words.lookup(&word).unwrap_or(UNK_ID));
            instance.chars.push(
                word.chars()
                    .take(max_char_length)
                    .map(|c| {
                        self.chars
                            .lookup(c.encode_utf8(&mut [0; 4]))
                            .unwrap_or(UNK_ID)
                    })
                    .collect(),
            );
            let Some(tag) = self.tags.get(&token.ner) else {
                bail!("unknown tag {:?} for word {:?}", token.ner, token.word);
            };
            instance.tags.push(tag);
        }
        Ok(instance)
    }

    pub fn to_file(&self) -> VocabularyFile {
        VocabularyFile {
            words: self.words.items().to_vec(),
            chars: self.chars.items().to_vec(),
            tags: self.tags.items().to_vec(),
            normalize_digits: self.normalize_digits,
        }
    }

    pub fn from_file(file: VocabularyFile) -> Self {
        Self {
            words: Vocabulary::from_items(file.words, Some(UNK)),
            chars: Vocabulary::from_items(file.chars, Some(UNK)),
            tags: Vocabulary::from_items(file.tags, None),
            normalize_digits: file.normalize_digits,
        }
    }
}

/// Row-major `[vocab, dim]` word embedding table.
#[derive(Debug, Clone, PartialEq)]
pub struct EmbeddingTable {
    pub dim: usize,
    pub data: Vec<f32>,
    /// Rows filled from the pretrained file.
    pub hits: usize,
}

impl EmbeddingTable {
    /// Every row uniform in `[-sqrt(3/dim), sqrt(3/dim)]`, padding row zero.
    pub fn random(rows: usize, dim: usize, rng: &mut Rand32) -> Self {
        let scale = (3.0 / dim as f32).sqrt();
        let mut data: Vec<f32> = (0..rows * dim)
            .map(|_| (rng.rand_float() * 2.0 - 1.0) * scale)
            .collect();
        if rows > 0 {
            data[..dim].fill(0.0);
        }
        Self { dim, data, hits: 0 }
    }

    pub fn rows(&self) -> usize {
        if self.dim == 0 { 0 } else { self.data.len() / self.dim }
    }

    pub fn row(&self, id: u32) -> &[f32] {
        let start = id as usize * self.dim;
        &self.data[start..start + self.dim]
    }

    fn set_row(&mut self, id: u32, vector: &[f32]) {
        let start = id as usize * self.dim;
        self.data[start..start + self.dim].copy_from_slice(vector);
    }

    pub fn to_tensor(&self, device: &Device) -> candle_core::Result<Tensor> {
        Tensor::from_slice(&self.data, (self.rows(), self.dim), device)
    }
}

/// Build the word table for `vocab` from a GloVe-format text file.
///
/// A vocabulary word takes the vector of its exact form, or else of its
/// lowercase form. Words found in neither keep a random row.
pub fn load_glove<P: AsRef<Path>>(
    path: P,
    vocab: &Vocabulary,
    dim: usize,
    rng: &mut Rand32,
) -> Result<EmbeddingTable> {
    let path = path.as_ref();
    let file = File::open(path).with_context(|| format!("opening {}", path.display()))?;
    let mut table = EmbeddingTable::random(vocab.len(), dim, rng);

    let mut by_lowercase: HashMap<String, Vec<u32>> = HashMap::new();
    for (id, item) in vocab.items().iter().enumerate() {
        by_lowercase
            .entry(item.to_lowercase())
            .or_default()
            .push(id as u32);
    }
    let mut exact = vec![false; vocab.len()];
    let mut filled = vec![false; vocab.len()];

    for (line_no, line) in BufReader::new(file).lines().enumerate() {
        let line = line?;
        let mut fields = line.split_whitespace();
        let Some(word) = fields.next() else {
            continue;
        };
        let exact_id = vocab.get(word).filter(|&id| id != PAD_ID && id != UNK_ID);
        let lower_ids = by_lowercase.get(word);
        if exact_id.is_none() && lower_ids.is_none() {
            continue;
        }

        let vector = fields
            .map(str::parse::<f32>)
            .collect::<std::result::Result<Vec<f32>, _>>()
            .with_context(|| format!("{}:{}: bad vector", path.display(), line_no + 1))?;
        if vector.len() != dim {
            bail!(
                "{}:{}: expected {dim} values, found {}",
                path.display(),
                line_no + 1,
                vector.len()
            );
        }

        if let Some(id) = exact_id {
            table.set_row(id, &vector);
            exact[id as usize] = true;
            filled[id as usize] = true;
        }
        for &id in lower_ids.into_iter().flatten() {
            if id != PAD_ID && id != UNK_ID && !exact[id as usize] && !filled[id as usize] {
                table.set_row(id, &vector);
                filled[id as usize] = true;
            }
        }
    }

    table.hits = filled.iter().filter(|&&f| f).count();
    tracing::info!(
        "loaded {} of {} word vectors from {}",
        table.hits,
        vocab.len(),
        path.display()
    );
    Ok(table)
}

/// Group `order` into batches whose `count * longest length` stays within `budget`.
///
/// A batch is emitted as soon as it reaches the budget exactly. A sentence
/// longer than the budget forms a batch of its own.
pub fn token_batches(order: &[usize], lengths: &[usize], budget: usize) -> Vec<Vec<usize>> {
    let mut batches = Vec::new();
    let mut current: Vec<usize> = Vec::new();
    let mut max_len = 0;

    for &idx in order {
        current.push(idx);
        max_len = max_len.max(lengths[idx]);
        let size = current.len() * max_len;

        if size == budget {
            batches.push(std::mem::take(&mut current));
            max_len = 0;
        } else if size > budget {
            current.pop();
            if !current.is_empty() {
                batches.push(std::mem::take(&mut current));
            }
            current.push(idx);
            max_len = lengths[idx];
            if max_len >= budget {
                batches.push(std::mem::take(&mut current));
                max_len = 0;
            }
        }
    }

    if !current.is_empty() {
        batches.push(current);
    }
    batches
}

/// Shuffle in place with Fisher-Yates.
pub fn shuffle<T>(items: &mut [T], rng: &mut Rand32) {
    for i in (1..items.len()).rev() {
        let j = rng.rand_range(0..(i as u32 + 1)) as usize;
        items.swap(i, j);
    }
}

/// Padded tensors of one batch.
#[derive(Debug, Clone)]
pub struct BatchTensors {
    /// `[batch, len]` u32
    pub words: Tensor,
    /// `[batch, len, char_len]` u32
    pub chars: Tensor,
    /// `[batch, len]` u32
    pub tags: Tensor,
    /// `[batch, len]` f32, 1 on real tokens
    pub mask: Tensor,
}

impl BatchTensors {
    pub fn new(instances: &[&Instance], max_char_length: usize, device: &Device) -> Result<Self> {
        let batch = instances.len();
        let len = instances.iter().map(|inst| inst.len()).max().unwrap_or(0);
        let char_len = instances
            .iter()
            .flat_map(|inst| inst.chars.iter().map(Vec::len))
            .max()
            .unwrap_or(0)
            .clamp(1, max_char_length.max(1));

        let mut words = vec![PAD_ID; batch * len];
        let mut chars = vec![PAD_ID; batch * len * char_len];
        let mut tags = vec![0u32; batch * len];
        let mut mask = vec![0f32; batch * len];

        for (b, inst) in instances.iter().enumerate() {
            for t in 0..inst.len() {
                let at = b * len + t;
                words[at] = inst.words[t];
                tags[at] = inst.tags[t];
                mask[at] = 1.0;
                for (c, &id) in inst.chars[t].iter().take(char_len).enumerate() {
                    chars[at * char_len + c] = id;
                }
            }
        }

        Ok(Self {
            words: Tensor::from_vec(words, (batch, len), device)?,
            chars: Tensor::from_vec(chars, (batch, len, char_len), device)?,
            tags: Tensor::from_vec(tags, (batch, len), device)?,
            mask: Tensor::from_vec(mask, (batch, len), device)?,
        })
    }
}
