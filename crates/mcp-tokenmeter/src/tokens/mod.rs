//! cl100k_base byte-pair tokenizer.
//!
//! `Vocabulary` owns the merge ranks, special tokens and split pattern and is
//! loaded once per process. `Tokenizer` is a cheap handle over it.

mod bpe;
pub mod tokenizer;
pub mod vocab;

pub use tokenizer::Tokenizer;
pub use vocab::{CL100K_BASE_PATTERN, CL100K_SPECIAL_TOKENS, Vocabulary};
