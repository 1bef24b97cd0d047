//! Raw tile snapshot cache with ordered change notifications.

mod cache;
mod error;
mod snapshot;

pub use cache::{CacheStats, TileCache, TileListener};
pub use error::CacheError;
pub use snapshot::{Snapshot, TileSnapshot};
