use std::str::FromStr;

use hashbrown::HashMap;
use itertools::{
    izip,
    Itertools,
};
use log::{
    debug,
    info,
};
use polars::prelude::*;
use rayon::prelude::*;
use serde::Serialize;

use crate::data_structs::typedef::*;
use crate::data_structs::{
    AggregatedRecord,
    AggregatedTable,
    SampleColumns,
    SampleTable,
    TissueCode,
};
use crate::error::Result;
use crate::utils::THREAD_POOL;
use crate::with_field_fn;

/// Metric keywords recognised in column headers, e.g.
/// `"CD4+ | Freq. of Parent"`. When several match, the longest wins.
pub const METRIC_KEYWORDS: [&str; 11] = [
    "Freq. of Parent",
    "Freq. of Total",
    "Freq. of Live",
    "Count",
    "Median",
    "Mean",
    "Geometric Mean",
    "CV",
    "SD",
    "Min",
    "Max",
];

pub(crate) const SUBPOPULATION_COLUMN: &str = "subpopulation";
pub(crate) const VALUE_COLUMN: &str = "value";

/// Strips the metric keyword out of a column header.
///
/// Headers are split on `|` and `" - "`; parts naming the keyword are
/// dropped and the rest are joined with `" | "`. A header without
/// separators just loses the keyword.
pub fn subpopulation_label(
    column: &str,
    keyword: &str,
) -> String {
    let keyword_lower = keyword.to_ascii_lowercase();
    let parts = column
        .split('|')
        .flat_map(|part| part.split(" - "))
        .map(str::trim)
        .filter(|part| !part.is_empty())
        .collect_vec();

    if parts.len() > 1 {
        let kept = parts
            .iter()
            .filter(|part| !part.to_ascii_lowercase().contains(&keyword_lower))
            .join(" | ");
        if !kept.is_empty() {
            return kept;
        }
    }

    let lower = column.to_ascii_lowercase();
    let stripped = match lower.find(&keyword_lower) {
        Some(start) => {
            format!(
                "{}{}",
                &column[..start],
                &column[start + keyword_lower.len()..]
            )
        },
        None => column.to_owned(),
    };
    let label = stripped
        .trim_matches(|c: char| c.is_whitespace() || c == '|' || c == '-' || c == '_')
        .to_owned();
    if label.is_empty() {
        column.trim().to_owned()
    }
    else {
        label
    }
}

/// Longest keyword contained in `column`, case-insensitively.
pub fn metric_keyword(column: &str) -> Option<&'static str> {
    let lower = column.to_lowercase();
    METRIC_KEYWORDS
        .iter()
        .filter(|kw| lower.contains(&kw.to_lowercase()))
        .max_by_key(|kw| kw.len())
        .copied()
}

/// Groups the metric columns of `table` by keyword, in [`METRIC_KEYWORDS`]
/// order. Columns that name no keyword are left out.
pub fn detect_metric_columns(table: &SampleTable) -> Vec<(String, Vec<String>)> {
    let assigned = table
        .metric_columns()
        .into_iter()
        .filter_map(|column| metric_keyword(&column).map(|kw| (kw, column)))
        .collect_vec();
    METRIC_KEYWORDS
        .iter()
        .filter_map(|kw| {
            let columns = assigned
                .iter()
                .filter(|(found, _)| found == kw)
                .map(|(_, column)| column.clone())
                .collect_vec();
            (!columns.is_empty()).then(|| (kw.to_string(), columns))
        })
        .collect()
}

/// How records are keyed and labelled.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct AggregationConfig {
    /// Groups to keep. Empty keeps every group.
    pub groups:           Vec<GroupType>,
    /// Key records by time point as well as group.
    pub time_course:      bool,
    /// Key records by tissue and emit one table per tissue.
    pub tissues_detected: bool,
    pub group_labels:     HashMap<GroupType, String>,
}

impl AggregationConfig {
    with_field_fn!(groups, Vec<GroupType>);

    with_field_fn!(time_course, bool);

    with_field_fn!(tissues_detected, bool);

    with_field_fn!(group_labels, HashMap<GroupType, String>);

    /// Display label of `group`, `"Group N"` unless overridden.
    pub fn label_for(
        &self,
        group: GroupType,
    ) -> String {
        self.group_labels
            .get(&group)
            .cloned()
            .unwrap_or_else(|| format!("Group {}", group))
    }

    /// Key columns in output order.
    pub(crate) fn key_columns(
        &self,
        table: &SampleTable,
    ) -> Vec<SampleColumns> {
        let mut keys = Vec::with_capacity(3);
        if self.time_course && table.has_column(SampleColumns::Time) {
            keys.push(SampleColumns::Time);
        }
        keys.push(SampleColumns::Group);
        if self.tissues_detected {
            keys.push(SampleColumns::Tissue);
        }
        keys
    }
}

/// Configuration inferred from the data: every group, time course when any
/// row has a time point, tissue split when tissues differ.
pub fn auto_detect_config(table: &SampleTable) -> PolarsResult<AggregationConfig> {
    let config = AggregationConfig::default()
        .with_groups(table.groups()?)
        .with_time_course(table.has_time_axis()?)
        .with_tissues_detected(table.tissues_heterogeneous()?);
    debug!(
        "Detected aggregation config: {} group(s), time course {}, tissue split {}",
        config.groups.len(),
        config.time_course,
        config.tissues_detected
    );
    Ok(config)
}

/// Columns of `raw_columns` that exist in `table` and hold at least one
/// number.
pub(crate) fn usable_columns(
    table: &SampleTable,
    raw_columns: &[String],
) -> PolarsResult<Vec<String>> {
    let data = table.data();
    let mut usable = Vec::with_capacity(raw_columns.len());
    for name in raw_columns {
        let Ok(column) = data.column(name) else {
            debug!("Skipping unknown column '{}'", name);
            continue;
        };
        let values = numeric_values(column)?;
        let present = values
            .f64()?
            .into_iter()
            .flatten()
            .any(|v| !v.is_nan());
        if present {
            usable.push(name.clone());
        }
        else {
            debug!("Skipping column '{}' with no numeric values", name);
        }
    }
    Ok(usable)
}

/// `column` as `Float64`. Text cells are trimmed first and anything that is
/// not a number becomes null.
fn numeric_values(column: &Column) -> PolarsResult<Column> {
    match column.dtype() {
        DataType::String => {
            let trimmed: StringChunked = column
                .str()?
                .into_iter()
                .map(|cell| cell.map(str::trim))
                .collect();
            Ok(trimmed.cast(&DataType::Float64)?.into())
        },
        _ => column.cast(&DataType::Float64),
    }
}

fn numeric_expr(
    table: &SampleTable,
    column: &str,
) -> PolarsResult<Expr> {
    let expr = match table.data().column(column)?.dtype() {
        DataType::String => col(column).str().strip_chars(lit(Null {})),
        _ => col(column),
    };
    Ok(expr.cast(DataType::Float64))
}

/// Stacks `(column, label)` pairs into one long frame with the key columns,
/// `Replicate` when present, the subpopulation label and a `Float64` value.
/// Rows with a missing or NaN value, or without a replicate, are dropped.
pub(crate) fn long_frame(
    table: &SampleTable,
    keys: &[SampleColumns],
    labelled: &[(String, String)],
    groups: &[GroupType],
) -> PolarsResult<LazyFrame> {
    let has_replicate = table.has_column(SampleColumns::Replicate);
    let frames = labelled
        .iter()
        .map(|(column, label)| {
            let mut exprs = keys
                .iter()
                .map(|key| key.col().cast(key.dtype()))
                .collect_vec();
            if has_replicate {
                exprs.push(
                    SampleColumns::Replicate
                        .col()
                        .cast(SampleColumns::Replicate.dtype()),
                );
            }
            exprs.push(lit(label.as_str()).alias(SUBPOPULATION_COLUMN));
            exprs.push(numeric_expr(table, column)?.alias(VALUE_COLUMN));
            Ok(table.lazy().select(exprs))
        })
        .collect::<PolarsResult<Vec<_>>>()?;

    let mut long = concat(frames, UnionArgs::default())?.filter(
        col(VALUE_COLUMN)
            .is_not_null()
            .and(col(VALUE_COLUMN).is_not_nan()),
    );
    if has_replicate {
        long = long.filter(SampleColumns::Replicate.col().is_not_null());
    }
    if let Some(selected) = groups
        .iter()
        .map(|g| SampleColumns::Group.col().eq(lit(*g)))
        .reduce(|acc, e| acc.or(e))
    {
        long = long.filter(selected);
    }
    Ok(long)
}

/// One metric's output tables.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MetricAggregation {
    pub metric:  String,
    pub columns: Vec<String>,
    pub tables:  Vec<AggregatedTable>,
}

/// Computes mean, sample standard deviation and count per
/// `(time?, group, tissue?, subpopulation)` key in one grouped pass per
/// metric.
pub struct VectorizedAggregator<'a> {
    table: &'a SampleTable,
}

impl<'a> VectorizedAggregator<'a> {
    pub fn new(table: &'a SampleTable) -> Self {
        Self { table }
    }

    pub fn table(&self) -> &SampleTable {
        self.table
    }

    /// Aggregates the columns of one metric. Returns one table, or one per
    /// tissue when [`AggregationConfig::tissues_detected`] is set. An empty
    /// input yields no tables.
    pub fn aggregate_metric(
        &self,
        metric: &str,
        raw_columns: &[String],
        config: &AggregationConfig,
    ) -> Result<Vec<AggregatedTable>> {
        if self.table.is_empty() || raw_columns.is_empty() {
            return Ok(Vec::new());
        }
        let usable = usable_columns(self.table, raw_columns)?;
        if usable.is_empty() {
            return Ok(Vec::new());
        }
        let labelled = usable
            .into_iter()
            .map(|column| {
                let label = subpopulation_label(&column, metric);
                (column, label)
            })
            .collect_vec();

        let keys = config.key_columns(self.table);
        let by = keys
            .iter()
            .map(|k| k.col())
            .chain(std::iter::once(col(SUBPOPULATION_COLUMN)))
            .collect_vec();
        let n_expr = col("n");

        let stats = long_frame(self.table, &keys, &labelled, &config.groups)?
            .group_by(by.clone())
            .agg([
                col(VALUE_COLUMN).mean().alias("mean"),
                col(VALUE_COLUMN).std(1).alias("std"),
                col(VALUE_COLUMN).count().cast(DataType::UInt32).alias("n"),
            ])
            .with_column(
                when(n_expr.lt_eq(lit(1u32)))
                    .then(lit(0.0f64))
                    .otherwise(col("std"))
                    .alias("std"),
            )
            .sort_by_exprs(by, SortMultipleOptions::default().with_maintain_order(true))
            .collect()?;

        let frames = if config.tissues_detected && stats.height() > 0 {
            stats.partition_by_stable([SampleColumns::Tissue.as_str()], true)?
        }
        else {
            vec![stats]
        };

        let mut tables = Vec::with_capacity(frames.len());
        for frame in frames {
            let table = self.records_from(metric, &frame, config)?;
            if !table.is_empty() {
                tables.push(table);
            }
        }
        tables.sort_by_key(|t| t.tissue);
        debug!(
            "Aggregated metric '{}' into {} table(s)",
            metric,
            tables.len()
        );
        Ok(tables)
    }

    fn records_from(
        &self,
        metric: &str,
        frame: &DataFrame,
        config: &AggregationConfig,
    ) -> PolarsResult<AggregatedTable> {
        let height = frame.height();
        let groups = frame
            .column(SampleColumns::Group.as_str())?
            .cast(&DataType::UInt32)?;
        let subpopulations = frame.column(SUBPOPULATION_COLUMN)?;
        let means = frame.column("mean")?;
        let stds = frame.column("std")?;
        let counts = frame.column("n")?;

        let tissues: Vec<Option<TissueCode>> =
            match frame.column(SampleColumns::Tissue.as_str()) {
                Ok(column) => {
                    column
                        .str()?
                        .into_iter()
                        .map(|v| v.and_then(|s| TissueCode::from_str(s).ok()))
                        .collect()
                },
                Err(_) => vec![None; height],
            };
        let times: Vec<Option<HoursType>> = match frame.column(SampleColumns::Time.as_str())
        {
            Ok(column) => column.f64()?.into_iter().collect(),
            Err(_) => vec![None; height],
        };

        let mut records = Vec::with_capacity(height);
        for (group, subpopulation, mean, sd, n, tissue, time) in izip!(
            groups.u32()?.into_iter(),
            subpopulations.str()?.into_iter(),
            means.f64()?.into_iter(),
            stds.f64()?.into_iter(),
            counts.u32()?.into_iter(),
            tissues,
            times
        ) {
            let (Some(group), Some(subpopulation), Some(mean), Some(n)) =
                (group, subpopulation, mean, n)
            else {
                continue;
            };
            records.push(AggregatedRecord {
                metric: metric.to_owned(),
                subpopulation: subpopulation.to_owned(),
                group,
                group_label: config.label_for(group),
                tissue,
                time,
                mean,
                std: sd.unwrap_or(0.0),
                n,
            });
        }

        Ok(AggregatedTable {
            metric: metric.to_owned(),
            tissue: records.first().and_then(|r| r.tissue),
            records,
        })
    }

    /// Aggregates every `(metric, columns)` pair on [`THREAD_POOL`].
    pub fn aggregate_all(
        &self,
        metrics: &[(String, Vec<String>)],
        config: &AggregationConfig,
    ) -> Result<Vec<MetricAggregation>> {
        let results = THREAD_POOL.install(|| {
            metrics
                .par_iter()
                .map(|(metric, columns)| {
                    self.aggregate_metric(metric, columns, config)
                        .map(|tables| {
                            MetricAggregation {
                                metric: metric.clone(),
                                columns: columns.clone(),
                                tables,
                            }
                        })
                })
                .collect::<Result<Vec<_>>>()
        })?;
        info!(
            "Aggregated {} metric(s) into {} record(s)",
            results.len(),
            results
                .iter()
                .flat_map(|m| m.tables.iter())
                .map(AggregatedTable::len)
                .sum::<usize>()
        );
        Ok(results)
    }
}

#[cfg(test)]
mod tests {
    use assert_approx_eq::assert_approx_eq;
    use rstest::{
        fixture,
        rstest,
    };

    use super::*;

    #[fixture]
    fn table() -> SampleTable {
        let data = df!(
            "Sample" => ["SP_1.1", "SP_1.2", "SP_1.3", "SP_2.1", "SP_2.2"],
            "Group" => [1u32, 1, 1, 2, 2],
            "Animal" => [1u32, 2, 3, 1, 2],
            "Tissue" => ["SP"; 5],
            "CD4+ | Freq. of Parent" => [10.0, 20.0, 30.0, 5.0, 7.0],
            "CD8+ | Freq. of Parent" => [Some(1.0), None, Some(3.0), Some(4.0), None],
            "Dead | Freq. of Parent" => [None::<f64>, None, None, None, None],
            "Lymphocytes | Count" => [100.0, 200.0, 300.0, 400.0, 500.0]
        )
        .unwrap();
        SampleTable::try_new(data, "Sample").unwrap()
    }

    fn parent_columns() -> Vec<String> {
        vec![
            "CD4+ | Freq. of Parent".to_string(),
            "CD8+ | Freq. of Parent".to_string(),
            "Dead | Freq. of Parent".to_string(),
        ]
    }

    #[rstest]
    #[case::pipe("CD4+ | Freq. of Parent", "Freq. of Parent", "CD4+")]
    #[case::gate_path(
        "Lymphocytes/Single Cells/CD3+ | Freq. of Parent",
        "Freq. of Parent",
        "Lymphocytes/Single Cells/CD3+"
    )]
    #[case::dash("CD4+ - Count", "Count", "CD4+")]
    #[case::nested("Live | CD45+ | Mean", "Mean", "Live | CD45+")]
    #[case::suffix("CD4+ Median", "Median", "CD4+")]
    #[case::case_insensitive("CD4+ | freq. of parent", "Freq. of Parent", "CD4+")]
    #[case::keyword_only("Count", "Count", "Count")]
    fn test_subpopulation_label(
        #[case] column: &str,
        #[case] keyword: &str,
        #[case] expected: &str,
    ) {
        assert_eq!(subpopulation_label(column, keyword), expected);
    }

    #[rstest]
    #[case::longest_wins("CD4+ | Geometric Mean", Some("Geometric Mean"))]
    #[case::lower_case("CD4+ | mean", Some("Mean"))]
    #[case::count("Lymphocytes | Count", Some("Count"))]
    #[case::scatter("FSC-A", None)]
    fn test_metric_keyword(
        #[case] column: &str,
        #[case] expected: Option<&str>,
    ) {
        assert_eq!(metric_keyword(column), expected);
    }

    #[rstest]
    fn test_detect_metric_columns(table: SampleTable) {
        let detected = detect_metric_columns(&table);
        assert_eq!(detected, vec![
            ("Freq. of Parent".to_string(), parent_columns()),
            ("Count".to_string(), vec!["Lymphocytes | Count".to_string()]),
        ]);
    }

    #[rstest]
    fn test_auto_detect_config(table: SampleTable) {
        let config = auto_detect_config(&table).unwrap();
        assert_eq!(config.groups, vec![1, 2]);
        assert!(!config.time_course);
        assert!(!config.tissues_detected);
        assert_eq!(config.label_for(2), "Group 2");
    }

    #[rstest]
    fn test_mean_std_count(table: SampleTable) {
        let config = auto_detect_config(&table).unwrap();
        let tables = VectorizedAggregator::new(&table)
            .aggregate_metric("Freq. of Parent", &parent_columns(), &config)
            .unwrap();
        assert_eq!(tables.len(), 1);
        let records = &tables[0].records;
        assert_eq!(tables[0].tissue, None);

        let cells = records
            .iter()
            .map(|r| (r.group, r.subpopulation.as_str(), r.n))
            .collect_vec();
        assert_eq!(cells, vec![
            (1, "CD4+", 3),
            (1, "CD8+", 2),
            (2, "CD4+", 2),
            (2, "CD8+", 1),
        ]);

        assert_approx_eq!(records[0].mean, 20.0);
        assert_approx_eq!(records[0].std, 10.0);
        assert_approx_eq!(records[1].mean, 2.0);
        assert_approx_eq!(records[1].std, 2f64.sqrt());
        assert_approx_eq!(records[2].mean, 6.0);
        // Single observation: std is zero, not missing.
        assert_approx_eq!(records[3].mean, 4.0);
        assert_eq!(records[3].std, 0.0);
        assert!(records.iter().all(|r| r.metric == "Freq. of Parent"));
        assert_eq!(records[2].group_label, "Group 2");
    }

    #[rstest]
    fn test_missing_column_yields_no_records(table: SampleTable) {
        let config = auto_detect_config(&table).unwrap();
        let aggregator = VectorizedAggregator::new(&table);

        let only_missing = aggregator
            .aggregate_metric(
                "Freq. of Parent",
                &["Dead | Freq. of Parent".to_string()],
                &config,
            )
            .unwrap();
        assert!(only_missing.is_empty());

        let all = aggregator
            .aggregate_metric("Freq. of Parent", &parent_columns(), &config)
            .unwrap();
        assert!(all[0].records.iter().all(|r| r.subpopulation != "Dead"));
        assert_eq!(all[0].subpopulations(), vec!["CD4+", "CD8+"]);
    }

    #[rstest]
    fn test_empty_inputs(table: SampleTable) {
        let config = AggregationConfig::default();
        let aggregator = VectorizedAggregator::new(&table);
        assert!(aggregator
            .aggregate_metric("Count", &[], &config)
            .unwrap()
            .is_empty());
        assert!(aggregator
            .aggregate_metric("Count", &["No such column".to_string()], &config)
            .unwrap()
            .is_empty());
    }

    #[rstest]
    fn test_group_filter_and_labels(table: SampleTable) {
        let config = AggregationConfig::default()
            .with_groups(vec![2])
            .with_group_labels(HashMap::from([(2, "Treated".to_string())]));
        let tables = VectorizedAggregator::new(&table)
            .aggregate_metric(
                "Count",
                &["Lymphocytes | Count".to_string()],
                &config,
            )
            .unwrap();
        let records = &tables[0].records;
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].group, 2);
        assert_eq!(records[0].group_label, "Treated");
        assert_eq!(records[0].subpopulation, "Lymphocytes");
        assert_approx_eq!(records[0].mean, 450.0);
    }

    #[test]
    fn test_split_by_tissue_and_time() {
        let data = df!(
            "Sample" => ["a", "b", "c", "d", "e", "f"],
            "Group" => [1u32, 1, 1, 1, 1, 1],
            "Animal" => [1u32, 2, 1, 2, 1, 2],
            "Tissue" => ["SP", "SP", "SP", "SP", "BM", "BM"],
            "Time" => [Some(2.0), Some(2.0), Some(24.0), Some(24.0), Some(2.0), Some(2.0)],
            "CD3+ | Mean" => [1.0, 3.0, 10.0, 20.0, 5.0, 5.0]
        )
        .unwrap();
        let table = SampleTable::try_new(data, "Sample").unwrap();
        let config = auto_detect_config(&table).unwrap();
        assert!(config.time_course);
        assert!(config.tissues_detected);

        let tables = VectorizedAggregator::new(&table)
            .aggregate_metric("Mean", &["CD3+ | Mean".to_string()], &config)
            .unwrap();
        assert_eq!(
            tables.iter().map(|t| t.tissue).collect_vec(),
            vec![Some(TissueCode::SP), Some(TissueCode::BM)]
        );

        let spleen = &tables[0].records;
        assert_eq!(
            spleen.iter().map(|r| (r.time, r.mean)).collect_vec(),
            vec![(Some(2.0), 2.0), (Some(24.0), 15.0)]
        );
        assert!(spleen.iter().all(|r| r.tissue == Some(TissueCode::SP)));

        let marrow = &tables[1].records;
        assert_eq!(marrow.len(), 1);
        assert_eq!(marrow[0].n, 2);
        assert_eq!(marrow[0].std, 0.0);
    }

    #[test]
    fn test_rows_without_replicate_are_skipped() {
        let data = df!(
            "Sample" => ["a", "b", "c"],
            "Group" => [1u32, 1, 1],
            "Animal" => [1u32, 2, 3],
            "Tissue" => ["SP"; 3],
            "Replicate" => [Some(1u32), Some(2), None],
            "CD4+ | Count" => [10.0, 20.0, 1000.0]
        )
        .unwrap();
        let table = SampleTable::try_new(data, "Sample").unwrap();
        let tables = VectorizedAggregator::new(&table)
            .aggregate_metric(
                "Count",
                &["CD4+ | Count".to_string()],
                &AggregationConfig::default(),
            )
            .unwrap();
        assert_eq!(tables[0].records[0].n, 2);
        assert_approx_eq!(tables[0].records[0].mean, 15.0);
    }

    #[test]
    fn test_partially_numeric_text_column() {
        let data = df!(
            "Sample" => ["a", "b", "c"],
            "Group" => [1u32, 1, 1],
            "Animal" => [1u32, 2, 3],
            "Tissue" => ["SP"; 3],
            "CD4+ | Count" => ["10", "n/a", " 30 "]
        )
        .unwrap();
        let table = SampleTable::try_new(data, "Sample").unwrap();
        let columns = ["CD4+ | Count".to_string()];
        assert_eq!(usable_columns(&table, &columns).unwrap(), columns.to_vec());

        let tables = VectorizedAggregator::new(&table)
            .aggregate_metric("Count", &columns, &AggregationConfig::default())
            .unwrap();
        let record = &tables[0].records[0];
        assert_eq!(record.n, 2);
        assert_approx_eq!(record.mean, 20.0);
    }

    #[rstest]
    fn test_aggregate_all_keeps_metric_order(table: SampleTable) {
        let config = auto_detect_config(&table).unwrap();
        let metrics = detect_metric_columns(&table);
        let results = VectorizedAggregator::new(&table)
            .aggregate_all(&metrics, &config)
            .unwrap();
        assert_eq!(
            results.iter().map(|m| m.metric.as_str()).collect_vec(),
            vec!["Freq. of Parent", "Count"]
        );
        assert_eq!(results[1].tables[0].records.len(), 2);
        assert_eq!(results[0].columns.len(), 3);
    }
}
