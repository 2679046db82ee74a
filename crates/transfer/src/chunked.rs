use base64::Engine;
use base64::engine::general_purpose::STANDARD;

use blobferry_protocol::NewChunk;

/// A byte range `[offset, offset + size)` of the whole object.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkRange {
    pub offset: u64,
    pub size: u64,
}

// ---------------------------------------------------------------------------
// Partitioning
// ---------------------------------------------------------------------------

/// Splits `content_size` bytes into contiguous chunks of at most `chunk_size`.
///
/// Content no larger than one chunk yields exactly one range covering it
/// (including the empty range for zero-length content). Larger content
/// yields `ceil(content_size / chunk_size)` ranges starting at offset 0.
///
/// # Panics
///
/// Panics if `chunk_size` is zero.
pub fn partition(content_size: u64, chunk_size: u64) -> Vec<ChunkRange> {
    assert!(chunk_size > 0, "chunk size must be positive");

    if content_size <= chunk_size {
        return vec![ChunkRange {
            offset: 0,
            size: content_size,
        }];
    }

    let count = content_size.div_ceil(chunk_size);
    let mut ranges = Vec::with_capacity(count as usize);
    let mut offset = 0;
    while offset < content_size {
        let size = chunk_size.min(content_size - offset);
        ranges.push(ChunkRange { offset, size });
        offset += size;
    }
    ranges
}

/// Generates an opaque, globally unique remote chunk id.
///
/// Ids are base64 of a random UUID, so every id of a transfer has the
/// same length and carries no offset information.
pub fn generate_remote_chunk_id() -> String {
    STANDARD.encode(uuid::Uuid::new_v4().to_string())
}

/// Partitions the content and assigns a fresh remote id to every chunk.
pub fn plan_chunks(content_size: u64, chunk_size: u64) -> Vec<NewChunk> {
    partition(content_size, chunk_size)
        .into_iter()
        .map(|range| NewChunk {
            offset: range.offset,
            size: range.size,
            remote_chunk_id: generate_remote_chunk_id(),
        })
        .collect()
}
