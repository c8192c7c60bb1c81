pub mod model;

pub use model::{ConditionalRandomField, log_sum_exp};
