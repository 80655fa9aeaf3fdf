//! Loading of tiktoken-format vocabularies.
//!
//! The file format is one `<base64 token> <rank>` pair per line. The rank
//! doubles as the token id.

use std::sync::Arc;

use aho_corasick::{AhoCorasick, MatchKind};
use base64::{Engine as _, engine::general_purpose::STANDARD};
use fancy_regex::Regex;
use once_cell::sync::OnceCell;
use rustc_hash::FxHashMap;

use crate::error::InitializationError;

/// Pre-tokenization pattern for cl100k_base.
pub const CL100K_BASE_PATTERN: &str = r"(?i:'s|'t|'re|'ve|'m|'ll|'d)|[^\r\n\p{L}\p{N}]?\p{L}+|\p{N}{1,3}| ?[^\s\p{L}\p{N}]+[\r\n]*|\s*[\r\n]+|\s+(?!\S)|\s+";

/// Special tokens of cl100k_base with their ids.
pub const CL100K_SPECIAL_TOKENS: [(&str, u32); 5] = [
    ("<|endoftext|>", 100257),
    ("<|fim_prefix|>", 100258),
    ("<|fim_middle|>", 100259),
    ("<|fim_suffix|>", 100260),
    ("<|endofprompt|>", 100276),
];

static CL100K_BASE: &[u8] = include_bytes!("../../assets/cl100k_base.tiktoken");

static SHARED: OnceCell<Arc<Vocabulary>> = OnceCell::new();

/// Immutable merge-rank table plus the rules for splitting text before merging.
pub struct Vocabulary {
    ranks: FxHashMap<Vec<u8>, u32>,
    decoder: FxHashMap<u32, Vec<u8>>,
    special_ids: Vec<u32>,
    special_matcher: AhoCorasick,
    pattern: Regex,
}

impl std::fmt::Debug for Vocabulary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Vocabulary")
            .field("ranks", &self.ranks.len())
            .field("special", &self.special_ids)
            .field("pattern", &self.pattern.as_str())
            .finish()
    }
}

impl Vocabulary {
    /// Build the embedded cl100k_base table.
    pub fn cl100k_base() -> Result<Self, InitializationError> {
        Self::from_tiktoken(CL100K_BASE, CL100K_BASE_PATTERN, &CL100K_SPECIAL_TOKENS)
    }

    /// Process-wide cl100k_base table. Built on first call; a failed build
    /// is reported to that caller and nothing is cached.
    pub fn shared() -> Result<Arc<Self>, InitializationError> {
        SHARED
            .get_or_try_init(|| {
                let vocab = Self::cl100k_base()?;
                tracing::debug!("loaded cl100k_base vocabulary ({} ranks)", vocab.len());
                Ok(Arc::new(vocab))
            })
            .cloned()
    }

    pub fn from_tiktoken(
        data: &[u8],
        pattern: &str,
        special: &[(&str, u32)],
    ) -> Result<Self, InitializationError> {
        let ranks = parse_tiktoken(data)?;
        if let Some(missing) = (0..=u8::MAX).find(|b| !ranks.contains_key(&[*b][..])) {
            return Err(InitializationError::MissingByte(missing));
        }
        let decoder = ranks.iter().map(|(k, v)| (*v, k.clone())).collect();
        let pattern = Regex::new(pattern).map_err(Box::new)?;
        let special_matcher = AhoCorasick::builder()
            .match_kind(MatchKind::LeftmostLongest)
            .build(special.iter().map(|(text, _)| *text))?;
        Ok(Self {
            ranks,
            decoder,
            special_ids: special.iter().map(|(_, id)| *id).collect(),
            special_matcher,
            pattern,
        })
    }

    pub fn len(&self) -> usize {
        self.ranks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ranks.is_empty()
    }

    pub fn rank(&self, bytes: &[u8]) -> Option<u32> {
        self.ranks.get(bytes).copied()
    }

    /// Bytes for an ordinary token id.
    pub fn token_bytes(&self, id: u32) -> Option<&[u8]> {
        self.decoder.get(&id).map(Vec::as_slice)
    }

    pub fn is_special(&self, id: u32) -> bool {
        self.special_ids.contains(&id)
    }

    pub(crate) fn ranks(&self) -> &FxHashMap<Vec<u8>, u32> {
        &self.ranks
    }

    pub(crate) fn pattern(&self) -> &Regex {
        &self.pattern
    }

    pub(crate) fn special_matcher(&self) -> &AhoCorasick {
        &self.special_matcher
    }

    pub(crate) fn special_id(&self, pattern_index: usize) -> Option<u32> {
        self.special_ids.get(pattern_index).copied()
    }
}

fn parse_tiktoken(data: &[u8]) -> Result<FxHashMap<Vec<u8>, u32>, InitializationError> {
    let mut ranks = FxHashMap::default();
    for (idx, raw) in data.split(|b| *b == b'\n').enumerate() {
        let line = raw.strip_suffix(b"\r").unwrap_or(raw);
        if line.is_empty() {
            continue;
        }
        let lineno = idx + 1;
        let space = line
            .iter()
            .rposition(|b| *b == b' ')
            .ok_or_else(|| InitializationError::Parse {
                line: lineno,
                reason: "missing rank".to_string(),
            })?;
        let (token, rank) = line.split_at(space);
        let token = STANDARD
            .decode(token)
            .map_err(|source| InitializationError::Base64 {
                line: lineno,
                source,
            })?;
        let rank = std::str::from_utf8(&rank[1..])
            .ok()
            .and_then(|s| s.parse::<u32>().ok())
            .ok_or_else(|| InitializationError::Parse {
                line: lineno,
                reason: "rank is not an unsigned integer".to_string(),
            })?;
        ranks.insert(token, rank);
    }
    Ok(ranks)
}
