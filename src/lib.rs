//! # flowproc
//!
//! `flowproc` turns flow cytometry exports into per-group summary statistics.
//! An export is a table whose rows are samples: one column holds a sample
//! identifier such as `"SP_A1_1.1"` or `"2 hour_BM_B2_2.3"`, and the
//! remaining columns hold gated metrics such as `"CD4+ | Freq. of Parent"`.
//!
//! The crate decodes tissue, plate well, group, animal and time point from
//! each identifier, numbers the animals of each group as replicates, and
//! computes mean, sample standard deviation and count for every metric,
//! group, time point and tissue. Tables are held as polars `DataFrame`s and
//! the aggregation runs as one grouped pass per metric.
//!
//! ## Key Features
//!
//! * **Identifier parsing**: [`SampleIdParser`] tries a strict grammar first
//!   and falls back to a loose `GROUP.ANIMAL` scan, with time prefixes
//!   (`"30 min"`, `"2 hour"`, `"1 day"`) and tissue full names resolved
//!   through a configurable [`TissueVocabulary`]. Results are memoized in a
//!   bounded cache that is safe to share between threads.
//! * **Loading and validation**: [`DatasetLoader`] reads delimited text,
//!   pre-filters and parses identifiers in parallel, and runs dataset-level
//!   checks that report every problem it finds.
//! * **Replicate mapping**: [`ReplicateMapper`] numbers animals densely from
//!   1 within each group, time point and tissue, and reports groups with
//!   fewer animals than the rest.
//! * **Aggregation**: [`VectorizedAggregator`] groups all subpopulation
//!   columns of a metric at once; missing values never count.
//!
//! Number of threads to be used can be configured with setting
//! `FLOWPROC_NUM_THREADS` environment variable.
//!
//! ## Example
//!
//! ```no_run
//! use flowproc::prelude::*;
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let pipeline = Pipeline::try_new(PipelineConfig::default())?;
//!     let output = pipeline.run_csv("path/to/export.csv")?;
//!
//!     println!("{}", output.dataset.stats);
//!     for record in output.records() {
//!         println!(
//!             "{} {} {}: {:.2} ± {:.2} (n={})",
//!             record.metric,
//!             record.group_label,
//!             record.subpopulation,
//!             record.mean,
//!             record.std,
//!             record.n
//!         );
//!     }
//!
//!     let mut sheet = output.sheet("Freq. of Parent")?;
//!     write_csv_file(&mut sheet, "freq_of_parent.csv", b',')?;
//!     Ok(())
//! }
//! ```
//!
//! [`SampleIdParser`]: parsing::SampleIdParser
//! [`TissueVocabulary`]: data_structs::TissueVocabulary
//! [`DatasetLoader`]: io::DatasetLoader
//! [`ReplicateMapper`]: tools::ReplicateMapper
//! [`VectorizedAggregator`]: tools::VectorizedAggregator

#[ctor::ctor]
fn init() {
    if let Ok(n) = std::env::var("FLOWPROC_NUM_THREADS") {
        std::env::set_var("POLARS_MAX_THREADS", n)
    }
}

pub mod data_structs;
pub mod error;
pub mod io;
pub mod parsing;
pub mod prelude;
pub mod tools;
pub mod utils;
