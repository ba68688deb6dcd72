//! Partitioning a block sequence into write batches.

use crate::block::{Block, MAX_BLOCKS_PER_REQUEST};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkOptions {
    /// Preferred batch size.
    pub soft: usize,
    /// Batch size that is never exceeded.
    pub hard: usize,
    /// Assumed size of the section a heading opens. `None` means `soft / 2`.
    pub next_section_estimate: Option<usize>,
}

impl Default for ChunkOptions {
    fn default() -> Self {
        Self {
            soft: 90,
            hard: MAX_BLOCKS_PER_REQUEST,
            next_section_estimate: None,
        }
    }
}

impl ChunkOptions {
    fn estimate(&self) -> usize {
        self.next_section_estimate.unwrap_or(self.soft / 2)
    }

    fn overflow(&self) -> usize {
        self.soft * 3 / 2
    }
}

/// Split `blocks` into ordered batches.
///
/// Cuts go before a heading once the running batch plus the next-section
/// estimate passes the soft limit. Without a heading, a batch is cut at the
/// hard limit or at one and a half times the soft limit. A table travels with
/// its rows: if table plus rows would overflow the hard limit, the table starts
/// a new batch.
pub fn chunk_blocks(blocks: Vec<Block>, options: &ChunkOptions) -> Vec<Vec<Block>> {
    if blocks.is_empty() {
        return Vec::new();
    }
    if blocks.len() <= options.soft {
        return vec![blocks];
    }

    let mut chunks = Vec::new();
    let mut current: Vec<Block> = Vec::new();
    for block in blocks {
        let is_heading = block.is_heading();

        if is_heading && !current.is_empty() && current.len() + options.estimate() > options.soft
        {
            chunks.push(std::mem::replace(&mut current, vec![block]));
            continue;
        }

        if current.len() >= options.hard || (current.len() >= options.overflow() && !is_heading) {
            chunks.push(std::mem::replace(&mut current, vec![block]));
            continue;
        }

        if let Block::Table { rows, .. } = &block {
            if current.len() + rows.len() + 1 > options.hard && !current.is_empty() {
                chunks.push(std::mem::take(&mut current));
            }
            current.push(block);
            continue;
        }

        if current.len() + 1 > options.hard {
            chunks.push(std::mem::replace(&mut current, vec![block]));
        } else {
            current.push(block);
        }
    }
    if !current.is_empty() {
        chunks.push(current);
    }
    chunks
}
