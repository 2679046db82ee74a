use std::sync::Arc;

use blobferry_protocol::{ChunkRecord, TransferId, TransferState};

use crate::store::{MetadataStore, StoreResult};

/// Read cursor over a transfer's chunk records.
///
/// The filtered record set is loaded with a single query on the first
/// call to [`next`](Self::next) and then handed out in ascending offset
/// order. Chunks in one of the skip states are never returned, which is
/// how a resumed upload leaves already completed chunks alone.
pub struct ChunkEnumerator {
    store: Arc<dyn MetadataStore>,
    transfer_id: TransferId,
    skip_states: Vec<TransferState>,
    remaining: Option<std::vec::IntoIter<ChunkRecord>>,
}

impl ChunkEnumerator {
    pub fn new(
        store: Arc<dyn MetadataStore>,
        transfer_id: TransferId,
        skip_states: &[TransferState],
    ) -> Self {
        Self {
            store,
            transfer_id,
            skip_states: skip_states.to_vec(),
            remaining: None,
        }
    }

    /// Returns up to `count` chunks not yet returned; empty once exhausted.
    ///
    /// # Panics
    ///
    /// Panics if `count` is zero.
    pub async fn next(&mut self, count: usize) -> StoreResult<Vec<ChunkRecord>> {
        assert!(count > 0, "enumerator page size must be positive");

        if self.remaining.is_none() {
            let chunks = self
                .store
                .get_chunks(self.transfer_id, &self.skip_states)
                .await?;
            self.remaining = Some(chunks.into_iter());
        }

        Ok(self
            .remaining
            .as_mut()
            .map(|it| it.by_ref().take(count).collect())
            .unwrap_or_default())
    }
}
