//! # BiLSTM-CNN-CRF Tagger
//!
//! Word embeddings concatenated with a max-pooled character CNN feed a
//! packed bidirectional LSTM; a dense ELU layer and a tag projection produce
//! emission scores for a linear-chain CRF.

use candle_core::{DType, Tensor};
use candle_nn::{
    Conv1d, Conv1dConfig, Dropout, Embedding, Init, Linear, Module, VarBuilder, VarMap,
};
use tracing::debug;

use crate::config::ModelConfig;
use crate::crf::ConditionalRandomField;
use crate::error::{Result, SeqtagError};
use crate::nn::encoder::BiLstm;
use crate::nn::packing::{RecurrentState, mask_lengths, prepare_rnn_seq, recover_rnn_seq};
use crate::tagging::ConstraintMask;

/// Name of the pretrained word embedding table inside the `VarMap`.
pub const WORD_EMBEDDING_VAR: &str = "word_embedder.weight";

/// Encoder output for a batch.
#[derive(Debug, Clone)]
pub struct Encoded {
    /// [batch, max_len, output_hidden_size]
    pub output: Tensor,
    /// Final BiLSTM state in original batch order.
    pub hn: Option<RecurrentState>,
    /// Mask truncated to `max_len`.
    pub mask: Tensor,
    pub lengths: Vec<usize>,
}

/// BiLSTM-CNN-CRF named entity tagger.
pub struct BiRecurrentConvCrf {
    word_embedder: Embedding,
    char_embedder: Embedding,
    char_cnn: Conv1d,
    dropout_rate: f32,
    dropout_rnn_in: Dropout,
    dropout_out: Dropout,
    rnn: BiLstm,
    dense: Linear,
    tag_projection_layer: Linear,
    crf: ConditionalRandomField,
}

impl BiRecurrentConvCrf {
    /// Build the model under `vb`.
    ///
    /// The word table is created with `word_vocab_size x config.word_dim`
    /// entries; copy pretrained vectors in with [`load_word_embeddings`].
    pub fn new(
        vb: VarBuilder,
        word_vocab_size: usize,
        char_vocab_size: usize,
        tag_vocab_size: usize,
        config: &ModelConfig,
        constraints: Option<ConstraintMask>,
    ) -> Result<Self> {
        config.validate()?;

        let word_embedder =
            candle_nn::embedding(word_vocab_size, config.word_dim, vb.pp("word_embedder"))?;
        let char_embedder =
            candle_nn::embedding(char_vocab_size, config.char_emb.dim, vb.pp("char_embedder"))?;

        let conv = &config.char_cnn_conv;
        let char_cnn = candle_nn::conv1d(
            conv.in_channels,
            conv.out_channels,
            conv.kernel_size,
            Conv1dConfig {
                padding: conv.padding,
                ..Default::default()
            },
            vb.pp("char_cnn"),
        )?;

        let encoder = &config.bilstm_sentence_encoder;
        let rnn = BiLstm::new(encoder.input_size, encoder.num_units, vb.pp("rnn"))?;
        let dense = candle_nn::linear(
            encoder.num_units * 2,
            config.output_hidden_size,
            vb.pp("dense"),
        )?;
        let tag_projection_layer = candle_nn::linear(
            config.output_hidden_size,
            tag_vocab_size,
            vb.pp("tag_projection_layer"),
        )?;
        let crf = ConditionalRandomField::new(tag_vocab_size, constraints, true, vb.pp("crf"))?;
        debug!(
            "built tagger: {word_vocab_size} words, {char_vocab_size} chars, {tag_vocab_size} tags, {} hidden units",
            encoder.num_units
        );

        Ok(Self {
            word_embedder,
            char_embedder,
            char_cnn,
            dropout_rate: config.dropout_rate,
            dropout_rnn_in: Dropout::new(config.dropout_rate),
            dropout_out: Dropout::new(config.dropout_rate),
            rnn,
            dense,
            tag_projection_layer,
            crf,
        })
    }

    pub fn crf(&self) -> &ConditionalRandomField {
        &self.crf
    }

    /// Negative log-likelihood of `tags`, averaged over the batch.
    ///
    /// `words`: [batch, len] u32, `chars`: [batch, len, char_len] u32,
    /// `tags`: [batch, len] u32, `mask`: [batch, len] f32.
    pub fn forward(
        &self,
        words: &Tensor,
        chars: &Tensor,
        tags: &Tensor,
        mask: &Tensor,
        hx: Option<&RecurrentState>,
        train: bool,
    ) -> Result<Tensor> {
        let encoded = self.encode(words, chars, mask, hx, train)?;
        let logits = self.tag_projection_layer.forward(&encoded.output)?;

        let (batch, max_len, _) = logits.dims3()?;
        let tags = tags.narrow(1, 0, max_len)?;
        let log_likelihood = self.crf.log_likelihood(&logits, &tags, &encoded.mask)?;
        Ok(log_likelihood.affine(-1.0 / batch as f64, 0.0)?)
    }

    /// Best tag path per sentence, unpadded.
    pub fn decode_paths(
        &self,
        words: &Tensor,
        chars: &Tensor,
        mask: &Tensor,
        hx: Option<&RecurrentState>,
    ) -> Result<Vec<Vec<usize>>> {
        let encoded = self.encode(words, chars, mask, hx, false)?;
        let logits = self.tag_projection_layer.forward(&encoded.output)?;
        let best_paths = self.crf.viterbi_tags(&logits, &encoded.mask)?;
        Ok(best_paths.into_iter().map(|(path, _)| path).collect())
    }

    /// Best tag paths as a `[batch, max_len]` u32 tensor padded with 0.
    pub fn decode(
        &self,
        words: &Tensor,
        chars: &Tensor,
        mask: &Tensor,
        hx: Option<&RecurrentState>,
    ) -> Result<Tensor> {
        let paths = self.decode_paths(words, chars, mask, hx)?;
        pad_and_concat(&paths, words.device())
    }

    /// Run embeddings, character CNN and the packed BiLSTM.
    pub fn encode(
        &self,
        words: &Tensor,
        chars: &Tensor,
        mask: &Tensor,
        hx: Option<&RecurrentState>,
        train: bool,
    ) -> Result<Encoded> {
        let lengths = mask_lengths(mask)?;

        // [batch, length, word_dim]
        let word = self.word_embedder.forward(words)?;
        let word = token_dropout(&word, self.dropout_rate, train)?;

        // [batch, length, char_length, char_dim]
        let char = self.char_embedder.forward(chars)?;
        let (batch, length, char_length, char_dim) = char.dims4()?;
        // [batch * length, char_dim, char_length]
        let char = char
            .reshape((batch * length, char_length, char_dim))?
            .transpose(1, 2)?
            .contiguous()?;
        // max over time: [batch * length, char_filters]
        let char = self.char_cnn.forward(&char)?.max(2)?;
        let filters = char.dim(1)?;
        let char = char.tanh()?.reshape((batch, length, filters))?;
        let char = token_dropout(&char, self.dropout_rate, train)?;

        let input = Tensor::cat(&[&word, &char], 2)?;
        let input = self.dropout_rnn_in.forward(&input, train)?;

        let prepared = prepare_rnn_seq(&input, &lengths, hx, Some(mask), true)?;
        let (seq_output, hn) = self.rnn.forward(&prepared.packed, prepared.hx.as_ref())?;
        let (output, hn) =
            recover_rnn_seq(&seq_output, prepared.rev_order.as_ref(), Some(hn), true)?;

        let output = self.dropout_out.forward(&output, train)?;
        let output = self.dense.forward(&output)?.elu(1.0)?;
        let output = self.dropout_out.forward(&output, train)?;

        let mask = match prepared.mask {
            Some(mask) => mask,
            None => mask.clone(),
        };

        Ok(Encoded {
            output,
            hn,
            mask,
            lengths,
        })
    }
}

/// Drop whole token feature vectors, as 2-D dropout over `[batch, length, dim]` does.
fn token_dropout(xs: &Tensor, rate: f32, train: bool) -> candle_core::Result<Tensor> {
    if !train || rate <= 0.0 {
        return Ok(xs.clone());
    }
    let (batch, length, _) = xs.dims3()?;
    let keep = Tensor::rand(0f32, 1f32, (batch, length, 1), xs.device())?
        .ge(rate as f64)?
        .to_dtype(xs.dtype())?
        .affine(1.0 / (1.0 - rate as f64), 0.0)?;
    xs.broadcast_mul(&keep)
}

/// Stack variable-length paths into a `[batch, max_len]` tensor padded with 0.
pub fn pad_and_concat(paths: &[Vec<usize>], device: &candle_core::Device) -> Result<Tensor> {
    let max_len = paths.iter().map(Vec::len).max().unwrap_or(0);
    let mut flat = Vec::with_capacity(paths.len() * max_len);
    for path in paths {
        flat.extend(path.iter().map(|&tag| tag as u32));
        flat.extend(std::iter::repeat_n(0u32, max_len - path.len()));
    }
    Ok(Tensor::from_vec(flat, (paths.len(), max_len), device)?)
}

/// Re-initialise every parameter outside the embedders and the CRF.
///
/// Rank-1 parameters (biases) are zeroed, the rest drawn from `initializer`.
/// Without an initializer nothing changes.
pub fn reset_parameters(varmap: &VarMap, initializer: Option<&Init>) -> Result<()> {
    let Some(init) = initializer else {
        return Ok(());
    };

    let vars = varmap
        .data()
        .lock()
        .map_err(|e| SeqtagError::InvalidConfig(format!("parameter store poisoned: {e}")))?;

    for (name, var) in vars.iter() {
        if name.contains("embedder") || name.contains("crf") {
            continue;
        }
        debug!("re-initialising {name} {:?}", var.dims());
        let fresh = if var.rank() == 1 {
            var.zeros_like()?
        } else {
            init.var(var.dims().to_vec(), var.dtype(), var.device())?
                .as_tensor()
                .clone()
        };
        var.set(&fresh)?;
    }
    Ok(())
}

/// Copy a pretrained `[vocab, word_dim]` table into the word embedder.
pub fn load_word_embeddings(varmap: &VarMap, table: &Tensor) -> Result<()> {
    let vars = varmap
        .data()
        .lock()
        .map_err(|e| SeqtagError::InvalidConfig(format!("parameter store poisoned: {e}")))?;
    let var = vars.get(WORD_EMBEDDING_VAR).ok_or_else(|| {
        SeqtagError::InvalidConfig(format!("{WORD_EMBEDDING_VAR} is not registered"))
    })?;
    if var.dims() != table.dims() {
        return Err(SeqtagError::DimensionMismatch(format!(
            "embedding table {:?} does not fit {:?}",
            table.dims(),
            var.dims()
        )));
    }
    var.set(&table.to_dtype(DType::F32)?)?;
    Ok(())
}
