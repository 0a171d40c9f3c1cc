//! Reading, validating and writing tabular exports.
//!
//! [`DatasetLoader`] turns a delimited export into a
//! [`SampleTable`](crate::data_structs::SampleTable): it picks the identifier
//! column, parses every identifier and appends the identity columns, then
//! runs [`DatasetValidator`]. [`build_metric_sheet`] and [`write_csv`] go the
//! other way, from an aggregated table back to wide text output.

mod export;
mod load;
mod validate;

pub use export::*;
pub use load::*;
pub use validate::*;
