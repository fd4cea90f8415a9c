// Gap detection - Contiguous ranges of missing blocks
use crate::types::BlockNumber;

/// Scan `[from, to]` (inclusive) and return the contiguous ranges for which
/// `has_block` is false, as inclusive `[start, end]` pairs.
pub fn find_gaps<F>(
    from: BlockNumber,
    to: BlockNumber,
    has_block: F,
) -> Vec<(BlockNumber, BlockNumber)>
where
    F: Fn(BlockNumber) -> bool,
{
    let mut gaps = Vec::new();
    if from > to {
        return gaps;
    }

    let mut open: Option<BlockNumber> = None;
    for block in from..=to {
        if has_block(block) {
            if let Some(start) = open.take() {
                gaps.push((start, block - 1));
            }
        } else if open.is_none() {
            open = Some(block);
        }
    }
    if let Some(start) = open {
        gaps.push((start, to));
    }
    gaps
}

/// Total number of blocks covered by a gap list
pub fn gap_size(gaps: &[(BlockNumber, BlockNumber)]) -> u64 {
    gaps.iter().map(|(start, end)| end - start + 1).sum()
}
