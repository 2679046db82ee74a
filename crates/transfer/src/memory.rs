//! In-memory metadata store with optional JSON file persistence.
//!
//! Chunks are grouped by transfer, so chunk reads and updates cost the
//! size of one transfer rather than of the whole store.
//!
//! With a file configured, every mutation is applied to a copy of the
//! state, written out, and only then swapped in, so a failed write leaves
//! the store unchanged and `create_transfer_with_chunks` stays
//! all-or-nothing. That copy and the rewrite of the whole file happen on
//! every chunk completion and are linear in the number of records held,
//! which suits a command-line store of a few transfers. Embedders with
//! many large transfers should put [`MetadataStore`] over a database.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::debug;

use blobferry_protocol::{
    ChunkId, ChunkRecord, InterruptState, NewChunk, NewTransfer, TransferId, TransferRecord,
    TransferState,
};

use crate::store::{MetadataStore, StoreError, StoreResult};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StoreState {
    next_transfer_id: u64,
    next_chunk_id: u64,
    transfers: BTreeMap<u64, TransferRecord>,
    /// Chunks of each transfer, in ascending offset and chunk id order.
    chunks: BTreeMap<u64, Vec<ChunkRecord>>,
    /// Owning transfer of each chunk id, rebuilt on load.
    #[serde(skip)]
    owners: HashMap<u64, u64>,
}

impl StoreState {
    fn transfer_mut(&mut self, id: TransferId) -> StoreResult<&mut TransferRecord> {
        self.transfers
            .get_mut(&id.0)
            .ok_or_else(|| StoreError::NotFound(format!("transfer {id}")))
    }

    fn transfer(&self, id: TransferId) -> StoreResult<&TransferRecord> {
        self.transfers
            .get(&id.0)
            .ok_or_else(|| StoreError::NotFound(format!("transfer {id}")))
    }

    fn chunks_of(&self, id: TransferId) -> &[ChunkRecord] {
        self.chunks.get(&id.0).map(Vec::as_slice).unwrap_or_default()
    }

    fn chunk_mut(&mut self, chunk_id: ChunkId) -> StoreResult<&mut ChunkRecord> {
        let not_found = || StoreError::NotFound(format!("chunk {chunk_id}"));
        let owner = self.owners.get(&chunk_id.0).ok_or_else(not_found)?;
        let chunks = self.chunks.get_mut(owner).ok_or_else(not_found)?;
        let index = chunks
            .binary_search_by_key(&chunk_id.0, |c| c.id.0)
            .map_err(|_| not_found())?;
        Ok(&mut chunks[index])
    }

    fn rebuild_owners(&mut self) {
        self.owners = self
            .chunks
            .iter()
            .flat_map(|(transfer, chunks)| chunks.iter().map(move |c| (c.id.0, *transfer)))
            .collect();
    }
}

/// Metadata store kept in memory, optionally mirrored to a JSON file.
pub struct MemoryStore {
    state: RwLock<StoreState>,
    path: Option<PathBuf>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    /// Creates an empty store that lives only as long as the process.
    pub fn new() -> Self {
        Self {
            state: RwLock::new(StoreState::default()),
            path: None,
        }
    }

    /// Opens a store persisted at `path`, loading existing records if the
    /// file exists.
    pub async fn open(path: impl AsRef<Path>) -> StoreResult<Self> {
        let path = path.as_ref().to_path_buf();
        let mut state: StoreState = match tokio::fs::read(&path).await {
            Ok(bytes) => serde_json::from_slice(&bytes)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => StoreState::default(),
            Err(e) => return Err(e.into()),
        };
        state.rebuild_owners();
        debug!(path = %path.display(), "metadata store opened");
        Ok(Self {
            state: RwLock::new(state),
            path: Some(path),
        })
    }

    async fn mutate<T>(
        &self,
        f: impl FnOnce(&mut StoreState) -> StoreResult<T>,
    ) -> StoreResult<T> {
        let mut guard = self.state.write().await;
        if self.path.is_none() {
            // Closures validate before they write, so an error leaves the
            // state untouched.
            return f(&mut *guard);
        }
        let mut next = guard.clone();
        let out = f(&mut next)?;
        self.persist(&next).await?;
        *guard = next;
        Ok(out)
    }

    async fn persist(&self, state: &StoreState) -> StoreResult<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, serde_json::to_vec_pretty(state)?).await?;
        tokio::fs::rename(&tmp, path).await?;
        Ok(())
    }
}

#[async_trait]
impl MetadataStore for MemoryStore {
    async fn create_transfer_with_chunks(
        &self,
        transfer: NewTransfer,
        chunks: Vec<NewChunk>,
    ) -> StoreResult<TransferId> {
        self.mutate(|s| {
            s.next_transfer_id += 1;
            let id = TransferId(s.next_transfer_id);
            s.transfers.insert(
                id.0,
                TransferRecord {
                    id,
                    kind: transfer.kind,
                    container_name: transfer.container_name,
                    object_name: transfer.object_name,
                    backend_id: transfer.backend_id,
                    locator: transfer.locator,
                    total_size: transfer.total_size,
                    base_offset: 0,
                    state: TransferState::WaitToBegin,
                    interrupt_state: InterruptState::None,
                    constraints: transfer.constraints,
                    last_error: None,
                },
            );
            let mut chunks = chunks;
            chunks.sort_by_key(|c| c.offset);
            let mut records = Vec::with_capacity(chunks.len());
            for chunk in chunks {
                s.next_chunk_id += 1;
                let chunk_id = ChunkId(s.next_chunk_id);
                s.owners.insert(chunk_id.0, id.0);
                records.push(ChunkRecord {
                    id: chunk_id,
                    transfer_id: id,
                    offset: chunk.offset,
                    size: chunk.size,
                    remote_chunk_id: chunk.remote_chunk_id,
                    state: TransferState::WaitToBegin,
                    error: None,
                });
            }
            s.chunks.insert(id.0, records);
            Ok(id)
        })
        .await
    }

    async fn get_transfer(&self, id: TransferId) -> StoreResult<TransferRecord> {
        self.state.read().await.transfer(id).cloned()
    }

    async fn list_transfers(&self) -> StoreResult<Vec<TransferRecord>> {
        Ok(self.state.read().await.transfers.values().cloned().collect())
    }

    async fn get_chunks(
        &self,
        id: TransferId,
        skip_states: &[TransferState],
    ) -> StoreResult<Vec<ChunkRecord>> {
        let state = self.state.read().await;
        state.transfer(id)?;
        Ok(state
            .chunks_of(id)
            .iter()
            .filter(|c| !skip_states.contains(&c.state))
            .cloned()
            .collect())
    }

    async fn update_chunk_state(
        &self,
        chunk_id: ChunkId,
        state: TransferState,
        error: Option<String>,
    ) -> StoreResult<()> {
        self.mutate(|s| {
            let chunk = s.chunk_mut(chunk_id)?;
            chunk.state = state;
            chunk.error = error;
            Ok(())
        })
        .await
    }

    async fn update_transfer_state(
        &self,
        id: TransferId,
        state: TransferState,
        error: Option<String>,
    ) -> StoreResult<()> {
        self.mutate(|s| {
            let transfer = s.transfer_mut(id)?;
            transfer.state = state;
            transfer.last_error = error;
            Ok(())
        })
        .await
    }

    async fn update_interrupt_state(
        &self,
        id: TransferId,
        state: InterruptState,
    ) -> StoreResult<()> {
        self.mutate(|s| {
            let transfer = s.transfer_mut(id)?;
            if transfer.interrupt_state == InterruptState::Purge && state != InterruptState::Purge
            {
                return Err(StoreError::Constraint(format!(
                    "transfer {id} is purged; interrupt state is final"
                )));
            }
            transfer.interrupt_state = state;
            Ok(())
        })
        .await
    }

    async fn get_interrupt_state(&self, id: TransferId) -> StoreResult<InterruptState> {
        Ok(self.state.read().await.transfer(id)?.interrupt_state)
    }

    async fn sum_chunk_sizes(&self, id: TransferId, state: TransferState) -> StoreResult<u64> {
        let s = self.state.read().await;
        s.transfer(id)?;
        Ok(s.chunks_of(id)
            .iter()
            .filter(|c| c.state == state)
            .map(|c| c.size)
            .sum())
    }

    async fn update_total_size(&self, id: TransferId, total_size: u64) -> StoreResult<()> {
        self.mutate(|s| {
            s.transfer_mut(id)?.total_size = Some(total_size);
            Ok(())
        })
        .await
    }

    async fn update_base_offset(&self, id: TransferId, base_offset: u64) -> StoreResult<()> {
        self.mutate(|s| {
            s.transfer_mut(id)?.base_offset = base_offset;
            Ok(())
        })
        .await
    }

    async fn delete_transfer(&self, id: TransferId) -> StoreResult<()> {
        self.mutate(|s| {
            s.transfers
                .remove(&id.0)
                .ok_or_else(|| StoreError::NotFound(format!("transfer {id}")))?;
            for chunk in s.chunks.remove(&id.0).unwrap_or_default() {
                s.owners.remove(&chunk.id.0);
            }
            Ok(())
        })
        .await
    }
}
