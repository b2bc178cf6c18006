//! Batch pipeline stages, run in order to build a corpus, and the inference side

pub mod generate;
pub mod normalize;
pub mod preprocess;
pub mod sequences;
