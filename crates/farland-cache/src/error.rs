//! Tile cache error types.

/// Errors from listener registration on a [`TileCache`](crate::TileCache).
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    /// The listener instance is already subscribed.
    #[error("listener is already registered")]
    DuplicateListener,

    /// The listener instance was never subscribed, or was already removed.
    #[error("listener is not registered")]
    UnknownListener,
}
