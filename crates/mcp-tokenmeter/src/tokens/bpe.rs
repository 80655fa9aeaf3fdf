//! Rank-driven byte-pair merging of a single pre-tokenized chunk.

use rustc_hash::FxHashMap;

type Rank = u32;

/// Merge `piece` down to part boundaries. Each entry is `(start, rank of the
/// part starting here joined with its right neighbour)`; the last two entries
/// are sentinels marking the end of the piece.
fn byte_pair_merge(ranks: &FxHashMap<Vec<u8>, Rank>, piece: &[u8]) -> Vec<(usize, Rank)> {
    let mut parts = Vec::with_capacity(piece.len() + 1);

    let mut min_rank: (Rank, usize) = (Rank::MAX, usize::MAX);
    for i in 0..piece.len() - 1 {
        let rank = ranks.get(&piece[i..i + 2]).copied().unwrap_or(Rank::MAX);
        if rank < min_rank.0 {
            min_rank = (rank, i);
        }
        parts.push((i, rank));
    }
    parts.push((piece.len() - 1, Rank::MAX));
    parts.push((piece.len(), Rank::MAX));

    let get_rank = |parts: &Vec<(usize, Rank)>, i: usize| -> Rank {
        if i + 3 < parts.len() {
            ranks
                .get(&piece[parts[i].0..parts[i + 3].0])
                .copied()
                .unwrap_or(Rank::MAX)
        } else {
            Rank::MAX
        }
    };

    // One merge per round: the lowest rank wins, leftmost on ties.
    while min_rank.0 != Rank::MAX {
        let i = min_rank.1;
        if i > 0 {
            parts[i - 1].1 = get_rank(&parts, i - 1);
        }
        parts[i].1 = get_rank(&parts, i);
        parts.remove(i + 1);

        min_rank = (Rank::MAX, usize::MAX);
        for (i, &(_, rank)) in parts[..parts.len() - 1].iter().enumerate() {
            if rank < min_rank.0 {
                min_rank = (rank, i);
            }
        }
    }
    parts
}

/// Token ids for one chunk. Every single byte must be in `ranks`.
pub(crate) fn byte_pair_encode(piece: &[u8], ranks: &FxHashMap<Vec<u8>, Rank>) -> Vec<Rank> {
    match piece.len() {
        0 => Vec::new(),
        1 => ranks.get(piece).copied().into_iter().collect(),
        _ => byte_pair_merge(ranks, piece)
            .windows(2)
            .filter_map(|w| ranks.get(&piece[w[0].0..w[1].0]).copied())
            .collect(),
    }
}
