//! Helpers shared by the parsing, loading and aggregation stages.
//!
//! - The process-wide [`THREAD_POOL`] used for parallel row parsing and the
//!   per-metric aggregation fan-out. Its size comes from the
//!   `FLOWPROC_NUM_THREADS` environment variable (all cores when unset).
//! - Builder/getter macros used by the configuration and record structs.
//! - Small polars helpers for building schemas and iterating distinct values.

use itertools::Itertools;
use once_cell::sync::Lazy;
use polars::prelude::*;
use rayon::{
    ThreadPool,
    ThreadPoolBuilder,
};

pub static THREAD_POOL: Lazy<ThreadPool> = Lazy::new(|| {
    let num_threads: Option<usize> = std::env::var("FLOWPROC_NUM_THREADS")
        .ok()
        .and_then(|str| str.parse::<usize>().ok());
    ThreadPoolBuilder::new()
        .num_threads(num_threads.unwrap_or(0))
        .build()
        .expect("Failed to create thread pool")
});

pub fn n_threads() -> usize {
    THREAD_POOL.current_num_threads()
}

/// Creates a schema from separate arrays of names and data types.
pub(crate) fn schema_from_arrays(
    names: &[&str],
    dtypes: &[DataType],
) -> Schema {
    Schema::from_iter(names.iter().cloned().map_into().zip(dtypes.iter().cloned()))
}

/// Sorted distinct non-null values of an unsigned integer column.
pub(crate) fn distinct_u32(column: &Column) -> PolarsResult<Vec<u32>> {
    let casted = column.cast(&DataType::UInt32)?;
    Ok(casted
        .u32()?
        .into_iter()
        .flatten()
        .sorted_unstable()
        .dedup()
        .collect_vec())
}

#[macro_export]
macro_rules! getter_fn {
    ($field_name: ident, $field_type: ty) => {
        pub fn $field_name(&self) -> &$field_type {
            &self.$field_name
        }
    };
}

#[macro_export]
macro_rules! with_field_fn {
    ($field_name: ident, $field_type: ty) => {
        paste::paste! {
            pub fn [<with_$field_name>](mut self, value: $field_type) -> Self {
            self.$field_name = value;
            self
            }
        }
    };
}
