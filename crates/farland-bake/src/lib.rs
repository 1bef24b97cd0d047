//! Asynchronous bake pipeline filling an LOD tree from a tile cache.
//!
//! - [`KeyedExecutor`]: worker pool with per-key FIFO, single-threaded execution.
//! - [`Baker`]: the caller's pure bake function and its input/output neighborhoods.
//! - [`BakePipeline`]: turns cache events into bake jobs and [`TreeUpdate`]s.
//! - [`TreeUpdateQueue`]: where the tree owner commits those updates.

mod baker;
mod error;
mod keyed;
mod pipeline;

pub use baker::{Baker, default_bake_inputs, default_bake_outputs};
pub use error::PipelineError;
pub use keyed::{ExecutorHandle, KeyedExecutor, Task};
pub use pipeline::{BakePipeline, BakeSettings, BakeStats, TreeUpdate, TreeUpdateQueue};
