//! Sample identifier grammar.
//!
//! Identifiers such as `"SP_A1_1.1"` or `"2 hour_BM_B2_2.3"` encode tissue,
//! plate well, group, animal and elapsed time. [`SampleIdParser`] decodes
//! them through an ordered list of [`IdMatcher`] strategies:
//!
//! | Stage  | Accepts                                  | Tissue / well    |
//! |--------|------------------------------------------|------------------|
//! | Strict | `[TISSUE_]?[WELL_]?GROUP.ANIMAL[.fcs]?`  | from the match   |
//! | Loose  | any `GROUP.ANIMAL` substring             | unknown          |
//!
//! A leading time expression (`"2 hour_"`, `"30min "`) is split off first by
//! [`TimeParser`], and a leading tissue full name (`"Spleen_"`) is rewritten
//! to its code. A matched group or animal below 1 is an error rather than a
//! reason to try the next stage.

mod matchers;
mod sample_id;
mod time;

pub use matchers::*;
pub use sample_id::*;
pub use time::*;
