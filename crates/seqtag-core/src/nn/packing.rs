//! # Packed Sequences
//!
//! Length-aware batching around recurrent layers. A batch of padded feature
//! sequences is reordered by descending length so that, at every time step,
//! the still-running sequences form a prefix of the batch. After the
//! recurrent pass the original batch order is restored.

use std::cmp::Reverse;

use candle_core::{DType, Result, Tensor, bail};
use tracing::debug;

/// Initial or final state of a recurrent layer.
///
/// Tensors are shaped `[num_layers * num_directions, batch, hidden]`.
#[derive(Debug, Clone)]
pub enum RecurrentState {
    /// Single hidden tensor (GRU / vanilla RNN).
    Hidden(Tensor),
    /// LSTM hidden and cell tensors.
    Lstm { h: Tensor, c: Tensor },
}

impl RecurrentState {
    /// Reorder the batch dimension of every state tensor.
    pub fn index_select(&self, order: &Tensor) -> Result<Self> {
        match self {
            RecurrentState::Hidden(h) => Ok(RecurrentState::Hidden(h.index_select(order, 1)?)),
            RecurrentState::Lstm { h, c } => Ok(RecurrentState::Lstm {
                h: h.index_select(order, 1)?,
                c: c.index_select(order, 1)?,
            }),
        }
    }

    /// The hidden tensor, for either variant.
    pub fn h(&self) -> &Tensor {
        match self {
            RecurrentState::Hidden(h) => h,
            RecurrentState::Lstm { h, .. } => h,
        }
    }
}

/// A batch sorted by descending length, ready for a length-aware recurrent pass.
///
/// Data is kept batch-first and padded to the longest sequence;
/// `batch_sizes[t]` is the number of sequences still running at step `t`.
#[derive(Debug, Clone)]
pub struct PackedSequence {
    data: Tensor,
    lengths: Vec<usize>,
    batch_sizes: Vec<usize>,
}

impl PackedSequence {
    /// Pack a padded batch whose `lengths` are already in descending order.
    pub fn pack_padded(input: &Tensor, lengths: &[usize], batch_first: bool) -> Result<Self> {
        let input = if batch_first {
            input.clone()
        } else {
            input.transpose(0, 1)?.contiguous()?
        };
        let (batch, padded_len, _) = input.dims3()?;

        if lengths.len() != batch {
            bail!("got {} lengths for a batch of {batch}", lengths.len());
        }
        if lengths.is_empty() {
            bail!("cannot pack an empty batch");
        }
        if lengths.windows(2).any(|w| w[0] < w[1]) {
            bail!("lengths must be sorted in decreasing order: {lengths:?}");
        }
        if lengths.contains(&0) {
            bail!("every sequence needs at least one step: {lengths:?}");
        }
        if lengths[0] > padded_len {
            bail!("length {} exceeds padded length {padded_len}", lengths[0]);
        }

        let max_len = lengths[0];
        let data = input.narrow(1, 0, max_len)?;
        let batch_sizes = (0..max_len)
            .map(|t| lengths.iter().take_while(|&&len| len > t).count())
            .collect();

        Ok(Self {
            data,
            lengths: lengths.to_vec(),
            batch_sizes,
        })
    }

    /// Replace the data with a recurrent layer's output for the same batch.
    pub fn with_data(&self, data: Tensor) -> Result<Self> {
        let (batch, steps, _) = data.dims3()?;
        if batch != self.lengths.len() || steps != self.max_len() {
            bail!(
                "packed output shape {:?} does not match batch {} x {}",
                data.dims(),
                self.lengths.len(),
                self.max_len()
            );
        }
        Ok(Self {
            data,
            lengths: self.lengths.clone(),
            batch_sizes: self.batch_sizes.clone(),
        })
    }

    /// Batch-first padded data, `[batch, max_len, features]`.
    pub fn data(&self) -> &Tensor {
        &self.data
    }

    pub fn lengths(&self) -> &[usize] {
        &self.lengths
    }

    pub fn batch_sizes(&self) -> &[usize] {
        &self.batch_sizes
    }

    pub fn max_len(&self) -> usize {
        self.lengths[0]
    }

    /// Pad back to a dense tensor with zeros past every sequence's length.
    pub fn pad_packed(&self, batch_first: bool) -> Result<(Tensor, Vec<usize>)> {
        let max_len = self.max_len();
        let valid: Vec<f32> = self
            .lengths
            .iter()
            .flat_map(|&len| (0..max_len).map(move |t| if t < len { 1.0 } else { 0.0 }))
            .collect();
        let valid = Tensor::from_vec(valid, (self.lengths.len(), max_len, 1), self.data.device())?
            .to_dtype(self.data.dtype())?;
        let padded = self.data.broadcast_mul(&valid)?;

        let padded = if batch_first {
            padded
        } else {
            padded.transpose(0, 1)?.contiguous()?
        };
        Ok((padded, self.lengths.clone()))
    }
}

/// Sorting permutation for a batch of lengths.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SortedOrder {
    /// Lengths in descending order.
    pub lengths: Vec<usize>,
    /// `order[i]` is the original index of the i-th sorted sequence.
    pub order: Vec<u32>,
    /// Inverse of `order`.
    pub rev_order: Vec<u32>,
}

/// Compute the descending-length order, or `None` if the batch is already sorted.
///
/// Ties keep their original relative order.
pub fn check_decreasing(lengths: &[usize]) -> Option<SortedOrder> {
    let mut order: Vec<usize> = (0..lengths.len()).collect();
    order.sort_by_key(|&idx| Reverse(lengths[idx]));

    if order.iter().enumerate().all(|(pos, &idx)| lengths[idx] == lengths[pos]) {
        return None;
    }

    let mut rev_order = vec![0u32; order.len()];
    for (pos, &idx) in order.iter().enumerate() {
        rev_order[idx] = pos as u32;
    }

    Some(SortedOrder {
        lengths: order.iter().map(|&idx| lengths[idx]).collect(),
        order: order.into_iter().map(|idx| idx as u32).collect(),
        rev_order,
    })
}

/// Output of [`prepare_rnn_seq`].
#[derive(Debug, Clone)]
pub struct PreparedSequence {
    pub packed: PackedSequence,
    /// Initial state reordered to match the packed batch.
    pub hx: Option<RecurrentState>,
    /// Permutation restoring the original batch order; `None` if nothing moved.
    pub rev_order: Option<Tensor>,
    /// The mask truncated to the longest sequence, in original batch order.
    pub mask: Option<Tensor>,
}

/// Reorder a padded batch by descending length and pack it.
///
/// # Arguments
/// * `rnn_input` - `[batch, seq_len, features]` if `batch_first`, else `[seq_len, batch, features]`
/// * `lengths` - true length of every sequence
/// * `hx` - optional initial state, batch on dim 1
/// * `mask` - optional `[batch, seq_len]` (or `[seq_len, batch]`) mask
pub fn prepare_rnn_seq(
    rnn_input: &Tensor,
    lengths: &[usize],
    hx: Option<&RecurrentState>,
    mask: Option<&Tensor>,
    batch_first: bool,
) -> Result<PreparedSequence> {
    let batch_dim = if batch_first { 0 } else { 1 };

    let (input, lens, hx, rev_order) = match check_decreasing(lengths) {
        None => (rnn_input.clone(), lengths.to_vec(), hx.cloned(), None),
        Some(sorted) => {
            debug!("reordering batch by length: {:?}", sorted.order);
            let device = rnn_input.device();
            let order = Tensor::new(sorted.order.as_slice(), device)?;
            let input = rnn_input.index_select(&order, batch_dim)?;
            let hx = hx.map(|state| state.index_select(&order)).transpose()?;
            let rev_order = Tensor::new(sorted.rev_order.as_slice(), device)?;
            (input, sorted.lengths, hx, Some(rev_order))
        }
    };

    let packed = PackedSequence::pack_padded(&input, &lens, batch_first)?;
    let time_dim = if batch_first { 1 } else { 0 };
    let mask = mask
        .map(|mask| mask.narrow(time_dim, 0, packed.max_len()))
        .transpose()?;

    Ok(PreparedSequence {
        packed,
        hx,
        rev_order,
        mask,
    })
}

/// Unpack a recurrent layer's output and restore the original batch order.
pub fn recover_rnn_seq(
    seq: &PackedSequence,
    rev_order: Option<&Tensor>,
    hx: Option<RecurrentState>,
    batch_first: bool,
) -> Result<(Tensor, Option<RecurrentState>)> {
    let (output, _) = seq.pad_packed(batch_first)?;
    match rev_order {
        None => Ok((output, hx)),
        Some(rev_order) => {
            let batch_dim = if batch_first { 0 } else { 1 };
            let output = output.index_select(rev_order, batch_dim)?;
            let hx = hx.map(|state| state.index_select(rev_order)).transpose()?;
            Ok((output, hx))
        }
    }
}

/// Row sums of a `[batch, seq_len]` mask as lengths.
pub fn mask_lengths(mask: &Tensor) -> Result<Vec<usize>> {
    let sums = mask.to_dtype(DType::F32)?.sum(1)?.to_vec1::<f32>()?;
    Ok(sums.into_iter().map(|len| len.round() as usize).collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::{Device, IndexOp};

    fn batch(device: &Device) -> Tensor {
        // [3, 4, 2]
        Tensor::arange(1f32, 25f32, device)
            .unwrap()
            .reshape((3, 4, 2))
            .unwrap()
    }

    #[test]
    fn test_check_decreasing_sorted() {
        assert!(check_decreasing(&[5, 3, 3, 1]).is_none());
        assert!(check_decreasing(&[2]).is_none());
    }

    #[test]
    fn test_check_decreasing_unsorted() {
        let sorted = check_decreasing(&[2, 5, 3]).unwrap();
        assert_eq!(sorted.lengths, vec![5, 3, 2]);
        assert_eq!(sorted.order, vec![1, 2, 0]);
        assert_eq!(sorted.rev_order, vec![2, 0, 1]);
    }

    #[test]
    fn test_check_decreasing_stable_ties() {
        let sorted = check_decreasing(&[1, 3, 3]).unwrap();
        assert_eq!(sorted.order, vec![1, 2, 0]);
    }

    #[test]
    fn test_pack_batch_sizes() {
        let device = Device::Cpu;
        let packed = PackedSequence::pack_padded(&batch(&device), &[4, 2, 1], true).unwrap();
        assert_eq!(packed.batch_sizes(), &[3, 2, 1, 1]);
        assert_eq!(packed.max_len(), 4);
    }

    #[test]
    fn test_pack_rejects_bad_lengths() {
        let device = Device::Cpu;
        let input = batch(&device);
        assert!(PackedSequence::pack_padded(&input, &[2, 4, 1], true).is_err());
        assert!(PackedSequence::pack_padded(&input, &[4, 2, 0], true).is_err());
        assert!(PackedSequence::pack_padded(&input, &[5, 2, 1], true).is_err());
        assert!(PackedSequence::pack_padded(&input, &[4, 2], true).is_err());
    }

    #[test]
    fn test_prepare_skips_reorder_when_sorted() {
        let device = Device::Cpu;
        let prepared = prepare_rnn_seq(&batch(&device), &[3, 3, 1], None, None, true).unwrap();
        assert!(prepared.rev_order.is_none());
        assert_eq!(prepared.packed.lengths(), &[3, 3, 1]);
        assert_eq!(prepared.packed.data().dims(), &[3, 3, 2]);
    }

    #[test]
    fn test_prepare_recover_restores_order() {
        let device = Device::Cpu;
        let input = batch(&device);
        let lengths = [2, 4, 3];
        let mask = Tensor::new(
            &[[1f32, 1., 0., 0.], [1., 1., 1., 1.], [1., 1., 1., 0.]],
            &device,
        )
        .unwrap();

        let prepared = prepare_rnn_seq(&input, &lengths, None, Some(&mask), true).unwrap();
        assert_eq!(prepared.packed.lengths(), &[4, 3, 2]);
        let first_sorted = prepared.packed.data().i(0).unwrap().to_vec2::<f32>().unwrap();
        assert_eq!(first_sorted, input.i(1).unwrap().to_vec2::<f32>().unwrap());

        let (output, _) =
            recover_rnn_seq(&prepared.packed, prepared.rev_order.as_ref(), None, true).unwrap();
        let output = output.to_vec3::<f32>().unwrap();
        let expected = input.to_vec3::<f32>().unwrap();
        for (row, &len) in lengths.iter().enumerate() {
            for t in 0..4 {
                if t < len {
                    assert_eq!(output[row][t], expected[row][t]);
                } else {
                    assert_eq!(output[row][t], vec![0.0, 0.0]);
                }
            }
        }

        let mask = prepared.mask.unwrap();
        assert_eq!(mask.dims(), &[3, 4]);
    }

    #[test]
    fn test_prepare_truncates_mask_and_reorders_state() {
        let device = Device::Cpu;
        let input = batch(&device);
        let mask = Tensor::ones((3, 4), DType::F32, &device).unwrap();
        let h = Tensor::new(&[[[10f32], [20.], [30.]]], &device).unwrap();
        let c = h.affine(-1.0, 0.0).unwrap();
        let state = RecurrentState::Lstm { h, c };

        let prepared =
            prepare_rnn_seq(&input, &[1, 3, 2], Some(&state), Some(&mask), true).unwrap();
        assert_eq!(prepared.mask.as_ref().unwrap().dims(), &[3, 3]);

        let hx = prepared.hx.unwrap();
        let h: Vec<f32> = hx.h().flatten_all().unwrap().to_vec1().unwrap();
        assert_eq!(h, vec![20.0, 30.0, 10.0]);

        let rev = prepared.rev_order.unwrap();
        let restored = hx.index_select(&rev).unwrap();
        let h: Vec<f32> = restored.h().flatten_all().unwrap().to_vec1().unwrap();
        assert_eq!(h, vec![10.0, 20.0, 30.0]);
    }

    #[test]
    fn test_time_major_roundtrip() {
        let device = Device::Cpu;
        let input = batch(&device).transpose(0, 1).unwrap().contiguous().unwrap();
        let prepared = prepare_rnn_seq(&input, &[1, 4, 4], None, None, false).unwrap();
        let (output, _) =
            recover_rnn_seq(&prepared.packed, prepared.rev_order.as_ref(), None, false).unwrap();
        assert_eq!(output.dims(), &[4, 3, 2]);
        let restored = output.i((0, 1)).unwrap().to_vec1::<f32>().unwrap();
        assert_eq!(restored, input.i((0, 1)).unwrap().to_vec1::<f32>().unwrap());
    }

    #[test]
    fn test_mask_lengths() {
        let device = Device::Cpu;
        let mask = Tensor::new(&[[1f32, 1., 0.], [1., 1., 1.]], &device).unwrap();
        assert_eq!(mask_lengths(&mask).unwrap(), vec![2, 3]);
    }
}
