//! Metadata store contract.
//!
//! The engine never talks to a database directly. Every persisted read
//! and write goes through [`MetadataStore`], which must be safe to share
//! between handlers of different transfers.

use async_trait::async_trait;

use blobferry_protocol::{
    ChunkId, ChunkRecord, InterruptState, NewChunk, NewTransfer, TransferId, TransferRecord,
    TransferState,
};

/// Metadata store operation errors.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("constraint violation: {0}")]
    Constraint(String),
}

/// Result type for metadata operations.
pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Persistence for transfer and chunk records.
#[async_trait]
pub trait MetadataStore: Send + Sync {
    /// Creates a transfer and all of its chunks in one transaction.
    ///
    /// The transfer and chunks start in `WaitToBegin` with no interrupt.
    async fn create_transfer_with_chunks(
        &self,
        transfer: NewTransfer,
        chunks: Vec<NewChunk>,
    ) -> StoreResult<TransferId>;

    /// Loads a transfer. Fails with [`StoreError::NotFound`] for unknown ids.
    async fn get_transfer(&self, id: TransferId) -> StoreResult<TransferRecord>;

    /// Lists every transfer, ordered by id.
    async fn list_transfers(&self) -> StoreResult<Vec<TransferRecord>>;

    /// Loads the chunks of a transfer in ascending offset order, leaving
    /// out chunks whose state is in `skip_states`.
    async fn get_chunks(
        &self,
        id: TransferId,
        skip_states: &[TransferState],
    ) -> StoreResult<Vec<ChunkRecord>>;

    async fn update_chunk_state(
        &self,
        chunk_id: ChunkId,
        state: TransferState,
        error: Option<String>,
    ) -> StoreResult<()>;

    async fn update_transfer_state(
        &self,
        id: TransferId,
        state: TransferState,
        error: Option<String>,
    ) -> StoreResult<()>;

    async fn update_interrupt_state(
        &self,
        id: TransferId,
        state: InterruptState,
    ) -> StoreResult<()>;

    async fn get_interrupt_state(&self, id: TransferId) -> StoreResult<InterruptState>;

    /// Sum of the sizes of the transfer's chunks in `state`.
    async fn sum_chunk_sizes(&self, id: TransferId, state: TransferState) -> StoreResult<u64>;

    /// Records the remote object size once a download learns it.
    async fn update_total_size(&self, id: TransferId, total_size: u64) -> StoreResult<()>;

    /// Records the download resume checkpoint.
    async fn update_base_offset(&self, id: TransferId, base_offset: u64) -> StoreResult<()>;

    /// Deletes a transfer together with its chunks.
    async fn delete_transfer(&self, id: TransferId) -> StoreResult<()>;
}
