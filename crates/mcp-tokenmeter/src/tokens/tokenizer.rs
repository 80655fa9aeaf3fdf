//! Text to token ids over a shared `Vocabulary`.

use std::sync::Arc;

use crate::error::InitializationError;

use super::bpe::byte_pair_encode;
use super::vocab::Vocabulary;

/// Cheap, cloneable tokenizer handle. All clones share one vocabulary.
#[derive(Debug, Clone)]
pub struct Tokenizer {
    vocab: Arc<Vocabulary>,
}

impl Tokenizer {
    pub fn new(vocab: Arc<Vocabulary>) -> Self {
        Self { vocab }
    }

    /// Tokenizer over the process-wide cl100k_base table.
    pub fn cl100k() -> Result<Self, InitializationError> {
        Ok(Self::new(Vocabulary::shared()?))
    }

    pub fn vocabulary(&self) -> &Vocabulary {
        &self.vocab
    }

    pub fn count(&self, text: &str) -> usize {
        self.encode_chunks(text).iter().map(Vec::len).sum()
    }

    pub fn encode(&self, text: &str) -> Vec<u32> {
        self.encode_chunks(text).into_iter().flatten().collect()
    }

    /// Token ids grouped by pre-tokenized chunk. Special tokens form a chunk
    /// of their own; merges never cross chunk boundaries.
    pub fn encode_chunks(&self, text: &str) -> Vec<Vec<u32>> {
        let mut chunks = Vec::new();
        let mut last_end = 0;
        for m in self.vocab.special_matcher().find_iter(text) {
            if m.start() > last_end {
                self.push_ordinary(&text[last_end..m.start()], &mut chunks);
            }
            if let Some(id) = self.vocab.special_id(m.pattern().as_usize()) {
                chunks.push(vec![id]);
            }
            last_end = m.end();
        }
        if last_end < text.len() {
            self.push_ordinary(&text[last_end..], &mut chunks);
        }
        chunks
    }

    /// Raw bytes for a token sequence. Unknown ids are skipped.
    pub fn decode_bytes(&self, ids: &[u32]) -> Vec<u8> {
        ids.iter()
            .filter_map(|id| self.vocab.token_bytes(*id))
            .flatten()
            .copied()
            .collect()
    }

    fn push_ordinary(&self, span: &str, chunks: &mut Vec<Vec<u32>>) {
        let mut consumed = 0;
        for found in self.vocab.pattern().find_iter(span) {
            match found {
                Ok(m) => {
                    chunks.push(self.encode_piece(m.as_str().as_bytes()));
                    consumed = m.end();
                }
                Err(err) => {
                    tracing::warn!(
                        "split pattern gave up ({}); treating remaining {} bytes as one chunk",
                        err,
                        span.len() - consumed
                    );
                    let rest = &span.as_bytes()[consumed..];
                    if !rest.is_empty() {
                        chunks.push(self.encode_piece(rest));
                    }
                    return;
                }
            }
        }
    }

    fn encode_piece(&self, piece: &[u8]) -> Vec<u32> {
        match self.vocab.rank(piece) {
            Some(rank) => vec![rank],
            None => byte_pair_encode(piece, self.vocab.ranks()),
        }
    }
}
