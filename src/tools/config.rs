use std::io::Read;

use serde::{
    Deserialize,
    Serialize,
};

use crate::data_structs::typedef::*;
use crate::error::{
    FlowError,
    Result,
};
use crate::io::LoaderConfig;
use crate::parsing::DEFAULT_CACHE_SIZE;
use crate::with_field_fn;

/// Settings for one [`Pipeline`](super::Pipeline) run.
///
/// Every field has a default, so a JSON document only needs the fields it
/// changes:
///
/// ```
/// use flowproc::tools::PipelineConfig;
///
/// let config = PipelineConfig::from_json(r#"{"time_course_mode": false}"#.as_bytes()).unwrap();
/// assert_eq!(config.time_course_mode, Some(false));
/// assert!(config.auto_parse_groups);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Detect groups and replicate counts from the data. When off, both
    /// `user_groups` and `user_replicates` are required.
    pub auto_parse_groups: bool,
    pub user_groups:       Option<Vec<GroupType>>,
    pub user_replicates:   Option<Vec<ReplicateType>>,
    /// Labels for the selected groups, in ascending group order.
    pub user_group_labels: Option<Vec<String>>,
    /// Force time-course output on or off. `None` follows the data.
    pub time_course_mode:  Option<bool>,
    /// Metric keywords to aggregate. `None` aggregates every detected metric.
    pub metrics:           Option<Vec<String>>,
    /// Downcast column types after loading.
    pub optimize_dtypes:   bool,
    pub cache_size:        usize,
    pub loader:            LoaderConfig,
}

impl PipelineConfig {
    with_field_fn!(auto_parse_groups, bool);

    with_field_fn!(user_groups, Option<Vec<GroupType>>);

    with_field_fn!(user_replicates, Option<Vec<ReplicateType>>);

    with_field_fn!(user_group_labels, Option<Vec<String>>);

    with_field_fn!(time_course_mode, Option<bool>);

    with_field_fn!(metrics, Option<Vec<String>>);

    with_field_fn!(optimize_dtypes, bool);

    with_field_fn!(cache_size, usize);

    with_field_fn!(loader, LoaderConfig);

    pub fn from_json<R: Read>(reader: R) -> Result<Self> {
        serde_json::from_reader(reader)
            .map_err(|e| FlowError::Configuration(format!("invalid pipeline config: {}", e)))
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self)
            .map_err(|e| FlowError::Configuration(e.to_string()))
    }

    /// Whether `metric` is selected, compared case-insensitively.
    pub fn wants_metric(
        &self,
        metric: &str,
    ) -> bool {
        match &self.metrics {
            Some(selected) => selected.iter().any(|m| m.eq_ignore_ascii_case(metric)),
            None => true,
        }
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            auto_parse_groups: true,
            user_groups:       None,
            user_replicates:   None,
            user_group_labels: None,
            time_course_mode:  None,
            metrics:           None,
            optimize_dtypes:   false,
            cache_size:        DEFAULT_CACHE_SIZE,
            loader:            LoaderConfig::default(),
        }
    }
}
