//! Bake pipeline error types.

use farland_cache::CacheError;

/// Errors raised while starting a bake pipeline.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    /// A worker thread could not be spawned.
    #[error("failed to spawn bake worker: {0}")]
    Spawn(#[source] std::io::Error),

    /// The pipeline could not subscribe to the tile cache.
    #[error("failed to attach to tile cache: {0}")]
    Listener(#[from] CacheError),
}
