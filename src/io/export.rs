use std::fs::File;
use std::io::Write;
use std::path::Path;

use itertools::Itertools;
use log::info;
use polars::prelude::*;

use crate::data_structs::typedef::*;
use crate::data_structs::{
    SampleColumns,
    SampleTable,
};
use crate::error::{
    FlowError,
    Result,
};
use crate::tools::aggregate::{
    long_frame,
    subpopulation_label,
    usable_columns,
    AggregationConfig,
    SUBPOPULATION_COLUMN,
    VALUE_COLUMN,
};

/// Wide sheet of one metric: one row per `(group, tissue?, time?)` and one
/// `"{subpopulation}_Rep{n}"` column per subpopulation and replicate.
///
/// Cells with no observation are null. The table must already carry a
/// `Replicate` column.
pub fn build_metric_sheet(
    table: &SampleTable,
    metric: &str,
    raw_columns: &[String],
    replicate_count: ReplicateType,
    config: &AggregationConfig,
) -> Result<DataFrame> {
    if !table.has_column(SampleColumns::Replicate) {
        return Err(FlowError::Configuration(
            "replicates must be mapped before building a sheet".into(),
        ));
    }
    let labelled = usable_columns(table, raw_columns)?
        .into_iter()
        .map(|c| {
            let label = subpopulation_label(&c, metric);
            (c, label)
        })
        .collect_vec();
    if labelled.is_empty() || replicate_count == 0 {
        return Err(FlowError::EmptyResult(format!(
            "metric '{}' has no columns to export",
            metric
        )));
    }

    let mut keys = vec![SampleColumns::Group];
    if config.tissues_detected {
        keys.push(SampleColumns::Tissue);
    }
    if config.time_course && table.has_column(SampleColumns::Time) {
        keys.push(SampleColumns::Time);
    }
    let key_exprs = keys.iter().map(|k| k.col()).collect_vec();

    let cells = labelled
        .iter()
        .map(|(_, label)| label.as_str())
        .unique()
        .flat_map(|label| {
            (1..=replicate_count).map(move |rep| {
                col(VALUE_COLUMN)
                    .filter(
                        col(SUBPOPULATION_COLUMN)
                            .eq(lit(label))
                            .and(SampleColumns::Replicate.col().eq(lit(rep))),
                    )
                    .mean()
                    .alias(format!("{}_Rep{}", label, rep))
            })
        })
        .collect_vec();

    let sheet = long_frame(table, &keys, &labelled, &config.groups)?
        .group_by(key_exprs.clone())
        .agg(cells)
        .sort_by_exprs(key_exprs, SortMultipleOptions::default())
        .collect()?;
    Ok(sheet)
}

/// Writes `data` as delimited text with a header row.
pub fn write_csv<W: Write>(
    data: &mut DataFrame,
    sink: W,
    separator: u8,
) -> Result<()> {
    CsvWriter::new(sink)
        .include_header(true)
        .with_separator(separator)
        .finish(data)?;
    Ok(())
}

pub fn write_csv_file<P: AsRef<Path>>(
    data: &mut DataFrame,
    path: P,
    separator: u8,
) -> Result<()> {
    let file = File::create(path.as_ref())?;
    write_csv(data, file, separator)?;
    info!(
        "Wrote {} row(s) to {}",
        data.height(),
        path.as_ref().display()
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mapped_table() -> SampleTable {
        let data = df!(
            "Sample" => ["SP_1.1", "SP_1.2", "SP_1.3", "SP_2.1", "SP_2.2"],
            "Group" => [1u32, 1, 1, 2, 2],
            "Animal" => [1u32, 2, 3, 1, 2],
            "Tissue" => ["SP"; 5],
            "Replicate" => [1u32, 2, 3, 1, 2],
            "CD4+ | Freq. of Parent" => [10.0, 20.0, 30.0, 5.0, 7.0]
        )
        .unwrap();
        SampleTable::try_new(data, "Sample").unwrap()
    }

    #[test]
    fn test_sheet_layout() {
        let table = mapped_table();
        let sheet = build_metric_sheet(
            &table,
            "Freq. of Parent",
            &["CD4+ | Freq. of Parent".to_string()],
            3,
            &AggregationConfig::default(),
        )
        .unwrap();

        assert_eq!(
            sheet.get_column_names_str(),
            vec!["Group", "CD4+_Rep1", "CD4+_Rep2", "CD4+_Rep3"]
        );
        assert_eq!(sheet.height(), 2);
        let rep3 = sheet.column("CD4+_Rep3").unwrap().f64().unwrap().clone();
        assert_eq!(rep3.get(0), Some(30.0));
        // Group 2 has no third animal.
        assert_eq!(rep3.get(1), None);
    }

    #[test]
    fn test_sheet_needs_replicates() {
        let data = mapped_table().into_inner().drop("Replicate").unwrap();
        let table = SampleTable::try_new(data, "Sample").unwrap();
        let result = build_metric_sheet(
            &table,
            "Freq. of Parent",
            &["CD4+ | Freq. of Parent".to_string()],
            3,
            &AggregationConfig::default(),
        );
        assert!(matches!(result, Err(FlowError::Configuration(_))));
    }

    #[test]
    fn test_write_csv() {
        let mut data = df!(
            "Group" => [1u32, 2],
            "CD4+_Rep1" => [Some(1.5), None]
        )
        .unwrap();
        let mut buffer = Vec::new();
        write_csv(&mut data, &mut buffer, b',').unwrap();
        assert_eq!(
            String::from_utf8(buffer).unwrap(),
            "Group,CD4+_Rep1\n1,1.5\n2,\n"
        );
    }
}
