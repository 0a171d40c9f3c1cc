use std::path::Path;
use std::sync::Arc;

use hashbrown::HashMap;
use itertools::Itertools;
use log::{
    info,
    warn,
};
use polars::prelude::*;

use super::aggregate::{
    auto_detect_config,
    detect_metric_columns,
    AggregationConfig,
    MetricAggregation,
    VectorizedAggregator,
};
use super::config::PipelineConfig;
use super::optimize::optimize_table;
use super::replicates::{
    MappedReplicates,
    ReplicateMapper,
};
use crate::data_structs::{
    AggregatedRecord,
    SampleTable,
    TissueVocabulary,
};
use crate::error::{
    FlowError,
    Result,
};
use crate::io::{
    build_metric_sheet,
    DatasetLoader,
    LoadedDataset,
};
use crate::parsing::SampleIdParser;

/// Everything one run produced.
#[derive(Debug, Clone)]
pub struct PipelineOutput {
    pub dataset:     LoadedDataset,
    pub mapping:     MappedReplicates,
    pub aggregation: AggregationConfig,
    pub metrics:     Vec<MetricAggregation>,
}

impl PipelineOutput {
    /// The mapped table that was aggregated.
    pub fn table(&self) -> &SampleTable {
        &self.mapping.table
    }

    pub fn metric(
        &self,
        name: &str,
    ) -> Option<&MetricAggregation> {
        self.metrics
            .iter()
            .find(|m| m.metric.eq_ignore_ascii_case(name))
    }

    pub fn records(&self) -> impl Iterator<Item = &AggregatedRecord> {
        self.metrics
            .iter()
            .flat_map(|m| m.tables.iter())
            .flat_map(|t| t.records.iter())
    }

    /// Wide per-replicate sheet of one metric.
    pub fn sheet(
        &self,
        name: &str,
    ) -> Result<DataFrame> {
        let metric = self
            .metric(name)
            .ok_or_else(|| FlowError::Configuration(format!("unknown metric '{}'", name)))?;
        build_metric_sheet(
            self.table(),
            &metric.metric,
            &metric.columns,
            self.mapping.replicate_count,
            &self.aggregation,
        )
    }
}

/// Load, parse, validate, map replicates and aggregate in one call.
pub struct Pipeline {
    config: PipelineConfig,
    loader: DatasetLoader,
}

impl Pipeline {
    /// Pipeline using the standard tissue vocabulary.
    pub fn try_new(config: PipelineConfig) -> Result<Self> {
        let parser = SampleIdParser::try_new(TissueVocabulary::standard(), config.cache_size)?;
        Ok(Self::with_parser(config, Arc::new(parser)))
    }

    pub fn with_parser(
        config: PipelineConfig,
        parser: Arc<SampleIdParser>,
    ) -> Self {
        let loader = DatasetLoader::new(parser, config.loader.clone());
        Self { config, loader }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn loader(&self) -> &DatasetLoader {
        &self.loader
    }

    pub fn run_csv<P: AsRef<Path>>(
        &self,
        path: P,
    ) -> Result<PipelineOutput> {
        let dataset = self.loader.load_csv(path)?;
        self.process(dataset)
    }

    pub fn run(
        &self,
        data: DataFrame,
    ) -> Result<PipelineOutput> {
        let dataset = self.loader.load_and_parse(data)?;
        self.process(dataset)
    }

    fn process(
        &self,
        mut dataset: LoadedDataset,
    ) -> Result<PipelineOutput> {
        if self.config.optimize_dtypes {
            let mut optimized = optimize_table(dataset.table.data())?;
            // Identifiers stay text.
            optimized.with_column(dataset.table.data().column(&dataset.id_column)?.clone())?;
            dataset.table = dataset.table.with_data(optimized)?;
        }

        let time_course = self.time_course(&dataset.table)?;
        let mapping = ReplicateMapper::map_replicates_over_time(
            &dataset.table,
            time_course,
            self.config.auto_parse_groups,
            self.config.user_replicates.as_deref(),
            self.config.user_groups.as_deref(),
        )?;
        let aggregation = self.aggregation_config(&mapping.table, time_course)?;

        let metrics = detect_metric_columns(&mapping.table)
            .into_iter()
            .filter(|(metric, _)| self.config.wants_metric(metric))
            .collect_vec();
        if metrics.is_empty() {
            warn!("No metric columns selected for aggregation");
        }
        let metrics = VectorizedAggregator::new(&mapping.table)
            .aggregate_all(&metrics, &aggregation)?;

        info!(
            "Pipeline finished: {} row(s), {} replicate(s), {} metric(s)",
            mapping.table.height(),
            mapping.replicate_count,
            metrics.len()
        );
        Ok(PipelineOutput {
            dataset,
            mapping,
            aggregation,
            metrics,
        })
    }

    /// Whether time points split replicates and output rows.
    fn time_course(
        &self,
        table: &SampleTable,
    ) -> Result<bool> {
        let detected = table.has_time_axis()?;
        Ok(match self.config.time_course_mode {
            Some(true) if !detected => {
                warn!("Time-course output requested but no row has a time point");
                false
            },
            Some(requested) => requested,
            None => detected,
        })
    }

    fn aggregation_config(
        &self,
        table: &SampleTable,
        time_course: bool,
    ) -> Result<AggregationConfig> {
        let detected = auto_detect_config(table)?;

        let groups = match &self.config.user_groups {
            Some(selected) if !selected.is_empty() => {
                selected.iter().copied().sorted().dedup().collect_vec()
            },
            _ => detected.groups.clone(),
        };
        let group_labels: HashMap<_, _> = match &self.config.user_group_labels {
            Some(labels) => {
                if labels.len() != groups.len() {
                    warn!(
                        "{} group label(s) for {} group(s); unlabelled groups keep their default",
                        labels.len(),
                        groups.len()
                    );
                }
                groups.iter().copied().zip(labels.iter().cloned()).collect()
            },
            None => HashMap::new(),
        };

        Ok(detected
            .with_groups(groups)
            .with_time_course(time_course)
            .with_group_labels(group_labels))
    }
}
