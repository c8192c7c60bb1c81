//! Neural components of the tagger.

pub mod encoder;
pub mod model;
pub mod packing;

pub use encoder::BiLstm;
pub use model::{
    BiRecurrentConvCrf, Encoded, WORD_EMBEDDING_VAR, load_word_embeddings, pad_and_concat,
    reset_parameters,
};
pub use packing::{
    PackedSequence, PreparedSequence, RecurrentState, SortedOrder, check_decreasing, mask_lengths,
    prepare_rnn_seq, recover_rnn_seq,
};
