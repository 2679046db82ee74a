use std::sync::Arc;

use blobferry_protocol::{TransferId, TransferKind};

use crate::accessor::AccessorProvider;
use crate::backend::BackendRegistry;
use crate::config::EngineConfig;
use crate::download::DownloadHandler;
use crate::handler::{HandlerContext, HandlerOutcome};
use crate::listener::TransferListener;
use crate::stop::StopToken;
use crate::store::MetadataStore;
use crate::upload::UploadHandler;

/// Entry point for running transfers: owns the collaborators and builds
/// the right handler for each run.
#[derive(Clone)]
pub struct TransferEngine {
    ctx: HandlerContext,
}

impl TransferEngine {
    /// # Panics
    ///
    /// Panics if `config` is invalid (zero chunk size or concurrency).
    pub fn new(
        store: Arc<dyn MetadataStore>,
        backends: Arc<BackendRegistry>,
        accessors: Arc<dyn AccessorProvider>,
        config: EngineConfig,
    ) -> Self {
        if let Err(reason) = config.validate() {
            panic!("invalid engine config: {reason}");
        }
        Self {
            ctx: HandlerContext {
                store,
                backends,
                accessors,
                config,
            },
        }
    }

    pub fn store(&self) -> &Arc<dyn MetadataStore> {
        &self.ctx.store
    }

    pub fn backends(&self) -> &Arc<BackendRegistry> {
        &self.ctx.backends
    }

    pub fn accessors(&self) -> &Arc<dyn AccessorProvider> {
        &self.ctx.accessors
    }

    pub fn config(&self) -> &EngineConfig {
        &self.ctx.config
    }

    /// Runs one handler for `id` until it completes, fails or parks.
    pub async fn run(
        &self,
        id: TransferId,
        kind: TransferKind,
        stop: StopToken,
        listener: Arc<dyn TransferListener>,
    ) -> HandlerOutcome {
        tracing::debug!(transfer = %id, %kind, "running handler");
        match kind {
            TransferKind::Upload => {
                UploadHandler::new(self.ctx.clone(), id, stop, listener)
                    .run()
                    .await
            }
            TransferKind::Download => {
                DownloadHandler::new(self.ctx.clone(), id, stop, listener)
                    .run()
                    .await
            }
        }
    }
}
