//! Bidirectional LSTM over packed sequences.

use candle_core::{IndexOp, Result, Tensor};
use candle_nn::VarBuilder;
use candle_nn::rnn::{LSTM, LSTMConfig, LSTMState, RNN};

use crate::nn::packing::{PackedSequence, RecurrentState};

/// Single-layer bidirectional LSTM.
///
/// At step `t` only the first `batch_sizes[t]` rows advance, so each
/// direction sees exactly the valid prefix of every sequence and the backward
/// pass starts at each sequence's own last token.
pub struct BiLstm {
    forward: LSTM,
    backward: LSTM,
    hidden_size: usize,
}

impl BiLstm {
    pub fn new(input_size: usize, hidden_size: usize, vb: VarBuilder) -> Result<Self> {
        let forward = candle_nn::rnn::lstm(
            input_size,
            hidden_size,
            LSTMConfig::default(),
            vb.pp("forward"),
        )?;
        let backward = candle_nn::rnn::lstm(
            input_size,
            hidden_size,
            LSTMConfig::default(),
            vb.pp("backward"),
        )?;
        Ok(Self {
            forward,
            backward,
            hidden_size,
        })
    }

    pub fn hidden_size(&self) -> usize {
        self.hidden_size
    }

    /// Run both directions.
    ///
    /// Returns the packed output `[batch, max_len, 2 * hidden]` (zeros past
    /// each length) and the final LSTM state, `h` and `c` shaped `[2, batch, hidden]`.
    pub fn forward(
        &self,
        input: &PackedSequence,
        hx: Option<&RecurrentState>,
    ) -> Result<(PackedSequence, RecurrentState)> {
        let data = input.data();
        let (batch, _, _) = data.dims3()?;

        let (h0, c0) = match hx {
            Some(RecurrentState::Lstm { h, c }) => (h.clone(), c.clone()),
            Some(RecurrentState::Hidden(h)) => (h.clone(), h.zeros_like()?),
            None => {
                let zeros = Tensor::zeros((2, batch, self.hidden_size), data.dtype(), data.device())?;
                (zeros.clone(), zeros)
            }
        };

        let fw_init = LSTMState {
            h: h0.i(0)?,
            c: c0.i(0)?,
        };
        let bw_init = LSTMState {
            h: h0.i(1)?,
            c: c0.i(1)?,
        };

        let (fw_out, fw_state) = self.run_direction(&self.forward, input, fw_init, false)?;
        let (bw_out, bw_state) = self.run_direction(&self.backward, input, bw_init, true)?;

        let output = Tensor::cat(&[&fw_out, &bw_out], 2)?;
        let state = RecurrentState::Lstm {
            h: Tensor::stack(&[fw_state.h(), bw_state.h()], 0)?,
            c: Tensor::stack(&[fw_state.c(), bw_state.c()], 0)?,
        };

        Ok((input.with_data(output)?, state))
    }

    fn run_direction(
        &self,
        cell: &LSTM,
        input: &PackedSequence,
        init: LSTMState,
        reverse: bool,
    ) -> Result<(Tensor, LSTMState)> {
        let data = input.data();
        let (batch, max_len, _) = data.dims3()?;
        let batch_sizes = input.batch_sizes();

        let steps: Vec<usize> = if reverse {
            (0..max_len).rev().collect()
        } else {
            (0..max_len).collect()
        };

        let mut state = init;
        let mut outputs = Vec::with_capacity(max_len);

        for t in steps {
            let active = batch_sizes[t];
            let x_t = data.i((..active, t))?.contiguous()?;
            let prev = LSTMState {
                h: state.h().narrow(0, 0, active)?,
                c: state.c().narrow(0, 0, active)?,
            };
            let next = cell.step(&x_t, &prev)?;

            if active < batch {
                let idle = batch - active;
                let h = Tensor::cat(&[next.h(), &state.h().narrow(0, active, idle)?], 0)?;
                let c = Tensor::cat(&[next.c(), &state.c().narrow(0, active, idle)?], 0)?;
                let padding = Tensor::zeros((idle, self.hidden_size), data.dtype(), data.device())?;
                outputs.push(Tensor::cat(&[next.h(), &padding], 0)?);
                state = LSTMState { h, c };
            } else {
                outputs.push(next.h().clone());
                state = next;
            }
        }

        if reverse {
            outputs.reverse();
        }
        Ok((Tensor::stack(&outputs, 1)?, state))
    }
}
