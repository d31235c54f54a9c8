//! Progress accounting over fixed partitions of a download.
//!
//! Chunks are a display partition of one sequential stream, so they fill
//! strictly left to right: a chunk only reaches `1.0` after every chunk before
//! it has.
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
    /// Ordinal, starting at 1.
    pub id: usize,
    pub size: u64,
    /// Completion in `[0, 1]`.
    pub progress: f64,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChunkMap {
    chunks: Vec<Chunk>,
}

impl ChunkMap {
    /// Splits `total_size` into `count` chunks of `total_size / count` bytes,
    /// the last chunk absorbing the remainder. A `count` of zero is treated as one.
    pub fn new(total_size: u64, count: usize) -> Self {
        let count = count.max(1);
        let base = total_size / count as u64;
        let mut chunks: Vec<Chunk> = (1..=count)
            .map(|id| Chunk {
                id,
                size: base,
                progress: 0.0,
            })
            .collect();
        if let Some(last) = chunks.last_mut() {
            last.size = total_size - base * (count as u64 - 1);
        }
        Self { chunks }
    }

    /// Recomputes progress for a cumulative byte count. Chunks past the one
    /// straddling `downloaded` keep their previous value.
    pub fn update(&mut self, downloaded: u64) {
        let mut start = 0u64;
        for chunk in &mut self.chunks {
            let end = start + chunk.size;
            if downloaded >= end {
                chunk.progress = 1.0;
                start = end;
                continue;
            }
            // downloaded lies in [start, end), so size is non-zero here
            let fraction = (downloaded - start) as f64 / chunk.size as f64;
            if fraction > chunk.progress {
                chunk.progress = fraction;
            }
            break;
        }
    }

    pub fn chunks(&self) -> &[Chunk] {
        &self.chunks
    }

    pub fn into_chunks(self) -> Vec<Chunk> {
        self.chunks
    }

    pub fn total_size(&self) -> u64 {
        self.chunks.iter().map(|c| c.size).sum()
    }

    pub fn is_complete(&self) -> bool {
        self.chunks.iter().all(|c| c.progress >= 1.0)
    }
}
