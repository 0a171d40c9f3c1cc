use itertools::Itertools;
use polars::prelude::*;
use serde::Serialize;

use super::tissue::TissueCode;
use super::typedef::*;

/// Summary statistics for one `(group, time?, tissue?, subpopulation)` cell
/// of one metric.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AggregatedRecord {
    pub metric:        String,
    pub subpopulation: String,
    pub group:         GroupType,
    pub group_label:   String,
    pub tissue:        Option<TissueCode>,
    pub time:          Option<HoursType>,
    pub mean:          f64,
    /// Sample standard deviation, `0.0` for single observations.
    pub std:           f64,
    pub n:             u32,
}

/// Records of one metric, restricted to one tissue when the dataset mixes
/// tissues.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AggregatedTable {
    pub metric:  String,
    pub tissue:  Option<TissueCode>,
    pub records: Vec<AggregatedRecord>,
}

impl AggregatedTable {
    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn subpopulations(&self) -> Vec<&str> {
        self.records
            .iter()
            .map(|r| r.subpopulation.as_str())
            .unique()
            .collect()
    }

    /// Long-format frame, one row per record.
    pub fn to_dataframe(&self) -> PolarsResult<DataFrame> {
        let records = &self.records;
        df!(
            "Metric" => records.iter().map(|r| r.metric.as_str()).collect_vec(),
            "Subpopulation" => records.iter().map(|r| r.subpopulation.as_str()).collect_vec(),
            "Group" => records.iter().map(|r| r.group).collect_vec(),
            "Group_Label" => records.iter().map(|r| r.group_label.as_str()).collect_vec(),
            "Tissue" => records.iter().map(|r| r.tissue.map(|t| t.as_str())).collect_vec(),
            "Time" => records.iter().map(|r| r.time).collect_vec(),
            "Mean" => records.iter().map(|r| r.mean).collect_vec(),
            "Std" => records.iter().map(|r| r.std).collect_vec(),
            "Count" => records.iter().map(|r| r.n).collect_vec()
        )
    }
}
