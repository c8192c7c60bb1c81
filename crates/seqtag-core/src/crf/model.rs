use candle_core::{DType, IndexOp, Tensor};
use candle_nn::{Init, VarBuilder};
use tracing::debug;

use crate::error::{Result, SeqtagError};
use crate::tagging::viterbi::{ConstraintMask, ViterbiDecoder};

/// Linear-chain conditional random field over tag sequences.
///
/// Scores a path as the sum of emission scores, `transitions[from][to]`
/// between consecutive tags, and optional start/end scores.
pub struct ConditionalRandomField {
    num_tags: usize,
    pub transitions: Tensor,
    pub start_transitions: Tensor,
    pub end_transitions: Tensor,
    constraints: Option<ConstraintMask>,
    viterbi: ViterbiDecoder,
}

impl ConditionalRandomField {
    /// Create the layer's parameters under `vb`.
    ///
    /// Transitions use a Xavier-normal scale; start/end scores a unit normal.
    /// Without `include_start_end_transitions` the boundary scores are fixed zeros.
    pub fn new(
        num_tags: usize,
        constraints: Option<ConstraintMask>,
        include_start_end_transitions: bool,
        vb: VarBuilder,
    ) -> Result<Self> {
        let xavier_stdev = (1.0 / num_tags as f64).sqrt();
        let transitions = vb.get_with_hints(
            (num_tags, num_tags),
            "transitions",
            Init::Randn {
                mean: 0.0,
                stdev: xavier_stdev,
            },
        )?;

        let (start_transitions, end_transitions) = if include_start_end_transitions {
            let unit = || Init::Randn {
                mean: 0.0,
                stdev: 1.0,
            };
            (
                vb.get_with_hints(num_tags, "start_transitions", unit())?,
                vb.get_with_hints(num_tags, "end_transitions", unit())?,
            )
        } else {
            let zeros = Tensor::zeros(num_tags, DType::F32, vb.device())?;
            (zeros.clone(), zeros)
        };

        Self::from_tensors(transitions, start_transitions, end_transitions, constraints)
    }

    /// Build the layer from existing score tensors.
    pub fn from_tensors(
        transitions: Tensor,
        start_transitions: Tensor,
        end_transitions: Tensor,
        constraints: Option<ConstraintMask>,
    ) -> Result<Self> {
        let (num_tags, cols) = transitions.dims2()?;
        if cols != num_tags
            || start_transitions.dims1()? != num_tags
            || end_transitions.dims1()? != num_tags
        {
            return Err(SeqtagError::DimensionMismatch(format!(
                "CRF parameters disagree: transitions {:?}, start {:?}, end {:?}",
                transitions.dims(),
                start_transitions.dims(),
                end_transitions.dims()
            )));
        }
        if let Some(mask) = &constraints {
            if mask.num_tags() != num_tags {
                return Err(SeqtagError::DimensionMismatch(format!(
                    "constraints built for {} tags, CRF has {num_tags}",
                    mask.num_tags()
                )));
            }
        }

        Ok(Self {
            num_tags,
            transitions,
            start_transitions,
            end_transitions,
            constraints,
            viterbi: ViterbiDecoder::new(num_tags),
        })
    }

    pub fn num_tags(&self) -> usize {
        self.num_tags
    }

    /// Summed log-likelihood of `tags` under the model.
    ///
    /// `logits`: [batch, seq_len, num_tags], `tags`: [batch, seq_len] u32,
    /// `mask`: [batch, seq_len] with ones over the valid prefix of each row.
    pub fn log_likelihood(
        &self,
        logits: &Tensor,
        tags: &Tensor,
        mask: &Tensor,
    ) -> candle_core::Result<Tensor> {
        let mask = mask.to_dtype(logits.dtype())?;
        let log_denominator = self.input_likelihood(logits, &mask)?;
        let log_numerator = self.joint_likelihood(logits, tags, &mask)?;
        log_numerator.sub(&log_denominator)?.sum_all()
    }

    /// Log partition function per sequence (forward algorithm), shape [batch].
    fn input_likelihood(&self, logits: &Tensor, mask: &Tensor) -> candle_core::Result<Tensor> {
        let (_, seq_len, _) = logits.dims3()?;
        let transitions = self.transitions.unsqueeze(0)?;

        let mut alpha = logits
            .i((.., 0))?
            .broadcast_add(&self.start_transitions.unsqueeze(0)?)?;

        for i in 1..seq_len {
            let emit = logits.i((.., i))?.unsqueeze(1)?;
            // [batch, from, to]
            let inner = alpha
                .unsqueeze(2)?
                .broadcast_add(&emit)?
                .broadcast_add(&transitions)?;
            let next = log_sum_exp(&inner, 1)?;

            let step = mask.i((.., i))?.unsqueeze(1)?;
            let keep = step.affine(-1.0, 1.0)?;
            alpha = next
                .broadcast_mul(&step)?
                .add(&alpha.broadcast_mul(&keep)?)?;
        }

        let stops = alpha.broadcast_add(&self.end_transitions.unsqueeze(0)?)?;
        log_sum_exp(&stops, 1)
    }

    /// Score of the given tag path per sequence, shape [batch].
    fn joint_likelihood(
        &self,
        logits: &Tensor,
        tags: &Tensor,
        mask: &Tensor,
    ) -> candle_core::Result<Tensor> {
        let (_, seq_len, num_tags) = logits.dims3()?;
        let device = logits.device();
        let tags = tags.to_dtype(DType::U32)?.to_vec2::<u32>()?;
        let column = |i: usize| -> Vec<u32> { tags.iter().map(|row| row[i]).collect() };

        let first = Tensor::new(column(0).as_slice(), device)?;
        let mut score = self.start_transitions.index_select(&first, 0)?;
        let flat_transitions = self.transitions.flatten_all()?;

        for i in 0..seq_len.saturating_sub(1) {
            let current = column(i);
            let next = column(i + 1);
            let pairs: Vec<u32> = current
                .iter()
                .zip(&next)
                .map(|(&from, &to)| from * num_tags as u32 + to)
                .collect();

            let transition_score =
                flat_transitions.index_select(&Tensor::new(pairs.as_slice(), device)?, 0)?;
            let current = Tensor::new(current.as_slice(), device)?.unsqueeze(1)?;
            let emit_score = logits
                .i((.., i))?
                .contiguous()?
                .gather(&current, 1)?
                .squeeze(1)?;

            score = score
                .add(&transition_score.mul(&mask.i((.., i + 1))?)?)?
                .add(&emit_score.mul(&mask.i((.., i))?)?)?;
        }

        let lengths = crate::nn::packing::mask_lengths(mask)?;
        let last_tags: Vec<u32> = tags
            .iter()
            .zip(&lengths)
            .map(|(row, &len)| row[len.saturating_sub(1)])
            .collect();
        let last_tags = Tensor::new(last_tags.as_slice(), device)?;

        let last_transition_score = self.end_transitions.index_select(&last_tags, 0)?;
        let last_input_score = logits
            .i((.., seq_len - 1))?
            .contiguous()?
            .gather(&last_tags.unsqueeze(1)?, 1)?
            .squeeze(1)?;

        score
            .add(&last_transition_score)?
            .add(&last_input_score.mul(&mask.i((.., seq_len - 1))?)?)
    }

    /// Most likely tag path and its score for every sequence in the batch.
    ///
    /// Only the first `mask`-sum positions of each row are decoded.
    pub fn viterbi_tags(&self, logits: &Tensor, mask: &Tensor) -> Result<Vec<(Vec<usize>, f32)>> {
        let logits = logits.to_dtype(DType::F32)?.to_vec3::<f32>()?;
        let lengths = crate::nn::packing::mask_lengths(mask)?;
        let transitions = self.transitions.to_dtype(DType::F32)?.to_vec2::<f32>()?;
        let start = self.start_transitions.to_dtype(DType::F32)?.to_vec1::<f32>()?;
        let end = self.end_transitions.to_dtype(DType::F32)?.to_vec1::<f32>()?;
        debug!(
            "viterbi over {} sequences, constrained: {}",
            lengths.len(),
            self.constraints.is_some()
        );

        logits
            .iter()
            .zip(&lengths)
            .map(|(emissions, &len)| {
                let len = len.min(emissions.len());
                self.viterbi.decode_constrained(
                    &emissions[..len],
                    &transitions,
                    &start,
                    &end,
                    self.constraints.as_ref(),
                )
            })
            .collect()
    }
}

/// Numerically stable `log(sum(exp(xs)))` over `dim`, removing that dimension.
pub fn log_sum_exp(xs: &Tensor, dim: usize) -> candle_core::Result<Tensor> {
    let max = xs.max_keepdim(dim)?;
    let summed = xs.broadcast_sub(&max)?.exp()?.sum_keepdim(dim)?;
    summed.log()?.add(&max)?.squeeze(dim)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tagging::TagScheme;
    use candle_core::Device;
    use candle_nn::VarMap;

    fn small_crf(device: &Device, constraints: Option<ConstraintMask>) -> ConditionalRandomField {
        let transitions = Tensor::new(&[[0.5f32, -0.3], [0.2, 0.8]], device).unwrap();
        let start = Tensor::new(&[0.1f32, -0.4], device).unwrap();
        let end = Tensor::new(&[-0.2f32, 0.3], device).unwrap();
        ConditionalRandomField::from_tensors(transitions, start, end, constraints).unwrap()
    }

    fn path_score(path: &[usize], logits: &[Vec<f32>]) -> f32 {
        let transitions = [[0.5f32, -0.3], [0.2, 0.8]];
        let start = [0.1f32, -0.4];
        let end = [-0.2f32, 0.3];
        let mut score = start[path[0]] + logits[0][path[0]];
        for i in 1..path.len() {
            score += transitions[path[i - 1]][path[i]] + logits[i][path[i]];
        }
        score + end[path[path.len() - 1]]
    }

    #[test]
    fn test_log_likelihood_matches_brute_force() {
        let device = Device::Cpu;
        let crf = small_crf(&device, None);
        let emissions = vec![vec![1.0f32, 0.5], vec![-0.5, 0.7], vec![0.3, 0.1]];
        let logits = Tensor::new(
            &[[[1.0f32, 0.5], [-0.5, 0.7], [0.3, 0.1]]],
            &device,
        )
        .unwrap();
        let tags = Tensor::new(&[[0u32, 1, 1]], &device).unwrap();
        let mask = Tensor::ones((1, 3), DType::F32, &device).unwrap();

        let ll = crf
            .log_likelihood(&logits, &tags, &mask)
            .unwrap()
            .to_scalar::<f32>()
            .unwrap();

        let mut partition = 0.0f32;
        for code in 0..8usize {
            let path: Vec<usize> = (0..3).map(|i| (code >> i) & 1).collect();
            partition += path_score(&path, &emissions).exp();
        }
        let expected = path_score(&[0, 1, 1], &emissions) - partition.ln();

        assert!((ll - expected).abs() < 1e-4);
        assert!(ll <= 0.0);
    }

    #[test]
    fn test_masked_positions_are_ignored() {
        let device = Device::Cpu;
        let crf = small_crf(&device, None);
        let short = Tensor::new(&[[[1.0f32, 0.5], [-0.5, 0.7]]], &device).unwrap();
        let padded = Tensor::new(&[[[1.0f32, 0.5], [-0.5, 0.7], [9.0, -9.0]]], &device).unwrap();

        let ll_short = crf
            .log_likelihood(
                &short,
                &Tensor::new(&[[1u32, 0]], &device).unwrap(),
                &Tensor::ones((1, 2), DType::F32, &device).unwrap(),
            )
            .unwrap()
            .to_scalar::<f32>()
            .unwrap();
        let ll_padded = crf
            .log_likelihood(
                &padded,
                &Tensor::new(&[[1u32, 0, 0]], &device).unwrap(),
                &Tensor::new(&[[1f32, 1., 0.]], &device).unwrap(),
            )
            .unwrap()
            .to_scalar::<f32>()
            .unwrap();

        assert!((ll_short - ll_padded).abs() < 1e-4);
    }

    #[test]
    fn test_viterbi_tags_respects_lengths() {
        let device = Device::Cpu;
        let crf = small_crf(&device, None);
        let logits = Tensor::new(
            &[[[5.0f32, 0.0], [0.0, 5.0], [5.0, 0.0]], [[0.0, 5.0], [0.0, 0.0], [0.0, 0.0]]],
            &device,
        )
        .unwrap();
        let mask = Tensor::new(&[[1f32, 1., 1.], [1., 0., 0.]], &device).unwrap();

        let paths = crf.viterbi_tags(&logits, &mask).unwrap();
        assert_eq!(paths[0].0, vec![0, 1, 0]);
        assert_eq!(paths[1].0, vec![1]);
    }

    #[test]
    fn test_viterbi_tags_with_constraints() {
        let device = Device::Cpu;
        let labels = ["O", "B-PER", "I-PER"];
        let pairs = TagScheme::Bio.allowed_transitions(&labels).unwrap();
        let mask = ConstraintMask::from_pairs(3, &pairs).unwrap();
        let crf = ConditionalRandomField::from_tensors(
            Tensor::zeros((3, 3), DType::F32, &device).unwrap(),
            Tensor::zeros(3, DType::F32, &device).unwrap(),
            Tensor::zeros(3, DType::F32, &device).unwrap(),
            Some(mask),
        )
        .unwrap();

        let logits = Tensor::new(&[[[0.0f32, 0.0, 4.0], [3.0, 0.0, 0.0]]], &device).unwrap();
        let seq_mask = Tensor::ones((1, 2), DType::F32, &device).unwrap();
        let paths = crf.viterbi_tags(&logits, &seq_mask).unwrap();
        assert_ne!(paths[0].0[0], 2);
    }

    #[test]
    fn test_new_registers_parameters() {
        let device = Device::Cpu;
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &device);
        let crf = ConditionalRandomField::new(4, None, true, vb.pp("crf")).unwrap();
        assert_eq!(crf.num_tags(), 4);
        assert_eq!(varmap.all_vars().len(), 3);
    }

    #[test]
    fn test_from_tensors_rejects_bad_shapes() {
        let device = Device::Cpu;
        let result = ConditionalRandomField::from_tensors(
            Tensor::zeros((3, 3), DType::F32, &device).unwrap(),
            Tensor::zeros(2, DType::F32, &device).unwrap(),
            Tensor::zeros(3, DType::F32, &device).unwrap(),
            None,
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_log_sum_exp_stable() {
        let device = Device::Cpu;
        let xs = Tensor::new(&[[1000f32, 1000.]], &device).unwrap();
        let out = log_sum_exp(&xs, 1).unwrap().to_vec1::<f32>().unwrap();
        assert!((out[0] - (1000.0 + 2f32.ln())).abs() < 1e-3);
    }
}
