//! Dataset-level processing on a loaded
//! [`SampleTable`](crate::data_structs::SampleTable).
//!
//! - [`replicates`]: dense per-group replicate numbering.
//! - [`aggregate`]: metric detection and grouped mean/std/count.
//! - [`optimize`]: lossless column downcasting.
//! - [`pipeline`]: the load → map → aggregate driver and its
//!   [`PipelineConfig`].
pub mod aggregate;
mod config;
pub mod optimize;
pub mod pipeline;
pub mod replicates;

pub use aggregate::*;
pub use config::*;
pub use optimize::*;
pub use pipeline::*;
pub use replicates::*;
