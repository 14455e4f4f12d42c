//! Hand-rolled sequence encoder producing fixed-size embeddings.
//!
//! A tanh recurrent cell (optionally bidirectional) summarizes each
//! fixed-length sequence, skipping zero-padded timesteps; a ReLU bottleneck
//! then projects the summary to the embedding handed to the final regressor.
//! The single-step annual tables use a flatten-plus-dense summarizer
//! instead, since one timestep has no temporal depth to recur over.
//! Training is plain mini-batch SGD with backpropagation through time,
//! reproducible from a seed, with no external ML dependencies.

mod model;
mod train;

pub use model::{DirectionWeights, EncoderKind, EncoderModel};
pub use train::{TrainOptions, train_encoder};
