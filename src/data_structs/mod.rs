//! Core data types.
//!
//! - [`TissueCode`] and [`TissueVocabulary`]: the tissue lookup table shared
//!   by the parser.
//! - [`ParsedSampleId`]: identity fields decoded from one identifier.
//! - [`SampleTable`] and [`SampleColumns`]: a loaded dataset and its derived
//!   column names.
//! - [`AggregatedRecord`] and [`AggregatedTable`]: aggregation output.

mod aggregated;
mod sample_id;
mod table;
mod tissue;
pub mod typedef;

pub use aggregated::*;
pub use sample_id::*;
pub use table::*;
pub use tissue::*;
