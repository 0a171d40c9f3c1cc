use std::fmt::Display;
use std::fs::File;
use std::path::Path;
use std::sync::Arc;

use cached::Cached;
use itertools::{
    izip,
    Itertools,
};
use log::{
    debug,
    info,
    warn,
};
use polars::io::mmap::MmapBytesReader;
use polars::prelude::*;
use rayon::prelude::*;
use serde::{
    Deserialize,
    Serialize,
};

use super::validate::{
    DatasetValidator,
    ValidationConfig,
    ValidationReport,
};
use crate::data_structs::typedef::*;
use crate::data_structs::{
    ParsedSampleId,
    SampleColumns,
    SampleTable,
    TissueCode,
};
use crate::error::{
    FlowError,
    ParseError,
    Result,
};
use crate::parsing::{
    ParseOutcome,
    SampleIdParser,
    TimeParser,
};
use crate::utils::{
    n_threads,
    THREAD_POOL,
};
use crate::with_field_fn;

/// Column names, compared case-insensitively, that may carry an explicit
/// time point for each row.
pub const TIME_COLUMN_NAMES: [&str; 2] = ["time", "timepoint"];

/// Reads a delimited text file with a header row.
///
/// Every cell is read as text first; columns whose every non-empty cell is a
/// number are then converted to `Float64`.
pub fn read_delimited<P: AsRef<Path>>(
    path: P,
    separator: u8,
) -> Result<DataFrame> {
    let file = File::open(path.as_ref())?;
    read_delimited_from(file, separator)
}

/// [`read_delimited`] over any in-memory or file handle.
pub fn read_delimited_from<R: MmapBytesReader>(
    handle: R,
    separator: u8,
) -> Result<DataFrame> {
    let data = CsvReadOptions::default()
        .with_has_header(true)
        .with_infer_schema_length(Some(0))
        .with_parse_options(CsvParseOptions::default().with_separator(separator))
        .into_reader_with_file_handle(handle)
        .finish()?;
    debug!("Read delimited table {:?}", data.shape());
    Ok(coerce_numeric_columns(data)?)
}

/// Casts text columns to `Float64` when no cell is lost by the cast.
pub fn coerce_numeric_columns(mut data: DataFrame) -> PolarsResult<DataFrame> {
    let names = data.get_column_names_owned();
    for name in names {
        let column = data.column(&name)?;
        if column.dtype() != &DataType::String {
            continue;
        }
        let trimmed: StringChunked = column
            .str()?
            .into_iter()
            .map(|cell| cell.map(str::trim))
            .collect();
        let casted = trimmed.cast(&DataType::Float64)?;
        let has_values = casted.null_count() < casted.len();
        if has_values && casted.null_count() == trimmed.null_count() {
            data.with_column(casted.with_name(name))?;
        }
    }
    Ok(data)
}

/// First column whose name contains "sample" or "id", else the first column.
pub fn select_id_column(data: &DataFrame) -> Option<String> {
    let names = data.get_column_names();
    names
        .iter()
        .find(|name| {
            let lower = name.to_lowercase();
            lower.contains("sample") || lower.contains("id")
        })
        .or(names.first())
        .map(|name| name.to_string())
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoaderConfig {
    pub separator:       u8,
    /// Fill missing times from a `Time`/`Timepoint` column.
    pub use_time_column: bool,
    pub validation:      ValidationConfig,
}

impl LoaderConfig {
    with_field_fn!(separator, u8);

    with_field_fn!(use_time_column, bool);

    with_field_fn!(validation, ValidationConfig);
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            separator:       b',',
            use_time_column: true,
            validation:      ValidationConfig::default(),
        }
    }
}

/// Row counts from one load.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct LoadStats {
    pub total:       usize,
    /// Rows that failed the cheap pattern check.
    pub prefiltered: usize,
    /// Rows that passed the pre-filter but matched no pattern.
    pub unmatched:   usize,
    /// Rows with a non-positive or out-of-range group or animal.
    pub malformed:   usize,
    pub kept:        usize,
}

impl Display for LoadStats {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        write!(
            f,
            "kept {} of {} rows ({} pre-filtered, {} unmatched, {} malformed)",
            self.kept, self.total, self.prefiltered, self.unmatched, self.malformed
        )
    }
}

#[derive(Debug, Clone)]
pub struct LoadedDataset {
    pub table:     SampleTable,
    pub id_column: String,
    pub report:    ValidationReport,
    pub stats:     LoadStats,
}

/// Turns raw rows into a [`SampleTable`].
///
/// 1. Picks the identifier column with [`select_id_column`].
/// 2. Drops rows that no matcher could accept.
/// 3. Parses the remaining identifiers in parallel, dropping and counting
///    rows that fail.
/// 4. Appends `Well`, `Group`, `Animal`, `Time` and `Tissue`.
/// 5. Validates the result with [`DatasetValidator`].
pub struct DatasetLoader<C = cached::SizedCache<String, ParseOutcome>> {
    parser: Arc<SampleIdParser<C>>,
    config: LoaderConfig,
}

impl<C> DatasetLoader<C>
where
    C: Cached<String, ParseOutcome> + Send,
{
    pub fn new(
        parser: Arc<SampleIdParser<C>>,
        config: LoaderConfig,
    ) -> Self {
        Self { parser, config }
    }

    pub fn parser(&self) -> &Arc<SampleIdParser<C>> {
        &self.parser
    }

    pub fn config(&self) -> &LoaderConfig {
        &self.config
    }

    pub fn load_csv<P: AsRef<Path>>(
        &self,
        path: P,
    ) -> Result<LoadedDataset> {
        let data = read_delimited(path.as_ref(), self.config.separator)?;
        info!(
            "Loaded {} rows from {}",
            data.height(),
            path.as_ref().display()
        );
        self.load_and_parse(data)
    }

    pub fn load_and_parse(
        &self,
        data: DataFrame,
    ) -> Result<LoadedDataset> {
        if data.width() == 0 || data.height() == 0 {
            return Err(FlowError::EmptyResult("input table has no rows".into()));
        }
        let id_column = select_id_column(&data)
            .ok_or_else(|| FlowError::EmptyResult("input table has no columns".into()))?;
        let data = self.ensure_text_ids(data, &id_column)?;
        let mut stats = LoadStats {
            total: data.height(),
            ..Default::default()
        };

        let data = self.prefilter(data, &id_column)?;
        stats.prefiltered = stats.total - data.height();
        if stats.prefiltered > 0 {
            info!(
                "Skipped {} row(s) without a recognisable identifier",
                stats.prefiltered
            );
        }
        if data.height() == 0 {
            return Err(FlowError::EmptyResult(format!(
                "no identifier in column '{}' matches a known pattern",
                id_column
            )));
        }

        let ids = data.column(&id_column)?.str()?.into_iter().collect_vec();
        debug!(
            "Parsing {} identifier(s) on {} thread(s)",
            ids.len(),
            n_threads()
        );
        let outcomes: Vec<ParseOutcome> = THREAD_POOL.install(|| {
            ids.par_iter()
                .map(|raw| self.parser.parse(raw.unwrap_or_default()))
                .collect()
        });

        let mut keep = Vec::with_capacity(outcomes.len());
        let mut parsed: Vec<ParsedSampleId> = Vec::with_capacity(outcomes.len());
        for outcome in outcomes {
            match outcome {
                Ok(Some(id)) => {
                    keep.push(true);
                    parsed.push(id);
                },
                Ok(None) => {
                    stats.unmatched += 1;
                    keep.push(false);
                },
                Err(ParseError::Malformed { raw, reason }) => {
                    debug!("Dropping '{}': {}", raw, reason);
                    stats.malformed += 1;
                    keep.push(false);
                },
            }
        }
        stats.kept = parsed.len();
        if stats.malformed > 0 {
            warn!(
                "Dropped {} row(s) with malformed identifiers",
                stats.malformed
            );
        }
        if stats.unmatched > 0 {
            info!("Dropped {} row(s) matching no identifier pattern", stats.unmatched);
        }
        if parsed.is_empty() {
            return Err(FlowError::EmptyResult(format!("no rows survived parsing ({})", stats)));
        }

        let data = data.filter(&BooleanChunked::from_slice("keep".into(), &keep))?;
        let data = self.attach_identity(data, &id_column, &parsed)?;
        info!("{}", stats);

        let report = DatasetValidator::new(self.config.validation.clone())
            .validate(&data, &id_column)?;
        if !report.is_valid() {
            if self.config.validation.fail_fast {
                return Err(FlowError::StructuralValidation(report));
            }
            warn!("Continuing with an invalid dataset: {}", report);
        }

        Ok(LoadedDataset {
            table: SampleTable::try_new(data, &id_column)?,
            id_column,
            report,
            stats,
        })
    }

    fn ensure_text_ids(
        &self,
        mut data: DataFrame,
        id_column: &str,
    ) -> Result<DataFrame> {
        let dtype = data.column(id_column)?.dtype().clone();
        match dtype {
            DataType::String => Ok(data),
            DataType::Categorical(..) | DataType::Enum(..) => {
                let casted = data.column(id_column)?.cast(&DataType::String)?;
                data.with_column(casted)?;
                Ok(data)
            },
            other => {
                let mut report = ValidationReport::default();
                report.add_error(format!(
                    "Identifier column '{}' must hold text, found {}",
                    id_column, other
                ));
                Err(FlowError::StructuralValidation(report))
            },
        }
    }

    fn prefilter(
        &self,
        data: DataFrame,
        id_column: &str,
    ) -> Result<DataFrame> {
        let mask: BooleanChunked = data
            .column(id_column)?
            .str()?
            .into_iter()
            .map(|raw| raw.is_some_and(|raw| self.parser.is_candidate(raw)))
            .collect();
        Ok(data.filter(&mask)?)
    }

    /// Time points from an explicit time column, for rows whose identifier
    /// carried none.
    fn explicit_times(
        &self,
        data: &DataFrame,
        id_column: &str,
    ) -> PolarsResult<Option<Vec<Option<HoursType>>>> {
        if !self.config.use_time_column {
            return Ok(None);
        }
        let name = data.get_column_names().into_iter().find(|name| {
            name.as_str() != id_column
                && TIME_COLUMN_NAMES.contains(&name.to_lowercase().as_str())
        });
        let Some(name) = name else {
            return Ok(None);
        };
        let column = data.column(name)?;
        let times = if column.dtype().is_numeric() {
            column
                .cast(&DataType::Float64)?
                .f64()?
                .into_iter()
                .collect_vec()
        }
        else {
            column
                .cast(&DataType::String)?
                .str()?
                .into_iter()
                .map(|cell| cell.and_then(TimeParser::parse))
                .collect_vec()
        };
        debug!("Using column '{}' for explicit time points", name);
        Ok(Some(times))
    }

    fn attach_identity(
        &self,
        mut data: DataFrame,
        id_column: &str,
        parsed: &[ParsedSampleId],
    ) -> PolarsResult<DataFrame> {
        let explicit = self.explicit_times(&data, id_column)?;
        let times = match explicit {
            Some(explicit) => {
                izip!(parsed, explicit)
                    .map(|(id, fallback)| {
                        id.time().or(fallback.filter(|t| *t >= 0.0))
                    })
                    .collect_vec()
            },
            None => parsed.iter().map(|id| id.time()).collect_vec(),
        };

        let raw_ids = data.column(id_column)?.str()?.clone();
        let tissues = izip!(parsed, raw_ids.into_iter())
            .map(|(id, raw)| {
                match (id.tissue(), raw) {
                    (TissueCode::Unknown, Some(raw)) => self.parser.extract_tissue(raw),
                    (tissue, _) => *tissue,
                }
            })
            .map(|t| t.as_str())
            .collect_vec();

        let columns = [
            Series::new(
                SampleColumns::Well.as_str().into(),
                parsed.iter().map(|id| id.well()).collect_vec(),
            ),
            Series::new(
                SampleColumns::Group.as_str().into(),
                parsed.iter().map(|id| *id.group()).collect_vec(),
            ),
            Series::new(
                SampleColumns::Animal.as_str().into(),
                parsed.iter().map(|id| *id.animal()).collect_vec(),
            ),
            Series::new(SampleColumns::Time.as_str().into(), times),
            Series::new(SampleColumns::Tissue.as_str().into(), tissues),
        ];
        for column in columns {
            if column.name().as_str() == id_column {
                continue;
            }
            data.with_column(column)?;
        }
        Ok(data)
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use polars::prelude::*;
    use rstest::{
        fixture,
        rstest,
    };

    use super::*;

    #[fixture]
    fn loader() -> DatasetLoader {
        DatasetLoader::new(
            Arc::new(SampleIdParser::standard().unwrap()),
            LoaderConfig::default(),
        )
    }

    #[rstest]
    #[case::sample_name(&["Name", "Sample ID", "x"], "Sample ID")]
    #[case::id_name(&["FSC-A", "Tube ID"], "Tube ID")]
    #[case::first_match_wins(&["sample", "id"], "sample")]
    #[case::fallback_first(&["Name", "Value"], "Name")]
    fn test_select_id_column(
        #[case] names: &[&str],
        #[case] expected: &str,
    ) {
        let columns = names
            .iter()
            .map(|name| Column::new((*name).into(), ["x"]))
            .collect_vec();
        let df = DataFrame::new(columns).unwrap();
        assert_eq!(select_id_column(&df).as_deref(), Some(expected));
    }

    #[test]
    fn test_coerce_numeric_columns() {
        let df = df!(
            "numeric" => [Some("1.5"), Some(" 2 "), None],
            "mixed" => [Some("a"), Some("1"), None],
            "empty" => [None::<&str>, None, None]
        )
        .unwrap();
        let df = coerce_numeric_columns(df).unwrap();
        assert_eq!(df.column("numeric").unwrap().dtype(), &DataType::Float64);
        assert_eq!(df.column("mixed").unwrap().dtype(), &DataType::String);
        assert_eq!(df.column("empty").unwrap().dtype(), &DataType::String);
    }

    #[test]
    fn test_read_delimited_from_memory() {
        let text = "Sample;CD4+ | Count\nSP_1.1;12\nSP_1.2;n/a\n";
        let df = read_delimited_from(Cursor::new(text.as_bytes().to_vec()), b';').unwrap();
        assert_eq!(df.shape(), (2, 2));
        assert_eq!(df.column("CD4+ | Count").unwrap().dtype(), &DataType::String);
    }

    #[rstest]
    fn test_drops_and_counts_bad_rows(loader: DatasetLoader) {
        let df = df!(
            "Sample:" => ["SP_A1_1.1", "invalid_no_numbers", "SP_A1_1.2", "SP_-1.3", "Mean"],
            "CD4+ | Freq. of Parent" => [1.0, 2.0, 3.0, 4.0, 2.5]
        )
        .unwrap();
        let loaded = loader.load_and_parse(df).unwrap();
        assert_eq!(loaded.id_column, "Sample:");
        assert_eq!(loaded.stats, LoadStats {
            total:       5,
            prefiltered: 2,
            unmatched:   0,
            malformed:   1,
            kept:        2,
        });
        assert_eq!(loaded.table.height(), 2);
        assert_eq!(loaded.table.groups().unwrap(), vec![1]);
        assert!(loaded.report.is_valid());
    }

    #[rstest]
    fn test_nothing_recognisable_is_empty_result(loader: DatasetLoader) {
        let df = df!("Sample" => ["foo", "bar"]).unwrap();
        assert!(matches!(
            loader.load_and_parse(df),
            Err(FlowError::EmptyResult(_))
        ));
    }

    #[rstest]
    fn test_only_malformed_is_empty_result(loader: DatasetLoader) {
        let df = df!("Sample" => ["SP_0.1", "SP_1.0"]).unwrap();
        assert!(matches!(
            loader.load_and_parse(df),
            Err(FlowError::EmptyResult(_))
        ));
    }

    #[rstest]
    fn test_numeric_id_column_is_structural_error(loader: DatasetLoader) {
        let df = df!("Sample" => [1.1, 1.2]).unwrap();
        assert!(matches!(
            loader.load_and_parse(df),
            Err(FlowError::StructuralValidation(_))
        ));
    }

    #[rstest]
    fn test_duplicates_fail_in_strict_mode(loader: DatasetLoader) {
        let df = df!("Sample" => ["SP_1.1", "SP_1.1"]).unwrap();
        match loader.load_and_parse(df) {
            Err(FlowError::StructuralValidation(report)) => {
                assert!(report.errors()[0].contains("duplicate"))
            },
            other => panic!("expected a validation error, got {:?}", other),
        }
    }

    #[test]
    fn test_collect_all_returns_report() {
        let config = LoaderConfig::default()
            .with_validation(ValidationConfig::default().with_fail_fast(false));
        let loader = DatasetLoader::new(Arc::new(SampleIdParser::standard().unwrap()), config);
        let df = df!("Sample" => ["SP_1.1", "SP_1.1", "SP_1.2"]).unwrap();
        let loaded = loader.load_and_parse(df).unwrap();
        assert!(!loaded.report.is_valid());
        assert_eq!(loaded.report.errors().len(), 1);
        assert_eq!(loaded.table.height(), 3);
    }

    #[rstest]
    fn test_identity_columns(loader: DatasetLoader) {
        let df = df!(
            "SampleID" => ["2 hour_BM_B2_2.3", "Spleen sample 1.1 x", "LN_1.2"],
            "Time" => ["", "", "30 min"]
        )
        .unwrap();
        let loaded = loader.load_and_parse(df).unwrap();
        let table = loaded.table;

        assert_eq!(table.tissue().unwrap(), vec![
            TissueCode::BM,
            TissueCode::SP,
            TissueCode::LN
        ]);
        assert_eq!(
            table.time().unwrap().into_iter().collect_vec(),
            vec![Some(2.0), None, Some(0.5)]
        );
        let wells = table
            .data()
            .column("Well")
            .unwrap()
            .str()
            .unwrap()
            .into_iter()
            .collect_vec();
        assert_eq!(wells, vec![Some("B2"), None, None]);
    }

    #[rstest]
    fn test_explicit_times_separate_repeated_ids(loader: DatasetLoader) {
        let df = df!(
            "SampleID" => ["SP_1.1", "SP_1.1", "SP_1.2", "SP_1.2"],
            "Time" => [2.0, 24.0, 2.0, 24.0]
        )
        .unwrap();
        let loaded = loader.load_and_parse(df).unwrap();
        assert!(loaded.report.is_valid());
        assert_eq!(loaded.table.height(), 4);
        assert_eq!(
            loaded.table.time().unwrap().into_iter().collect_vec(),
            vec![Some(2.0), Some(24.0), Some(2.0), Some(24.0)]
        );
    }

    #[test]
    fn test_explicit_time_column_can_be_disabled() {
        let loader = DatasetLoader::new(
            Arc::new(SampleIdParser::standard().unwrap()),
            LoaderConfig::default().with_use_time_column(false),
        );
        let df = df!(
            "SampleID" => ["SP_1.1", "SP_1.2"],
            "Timepoint" => [4.0, 8.0]
        )
        .unwrap();
        let table = loader.load_and_parse(df).unwrap().table;
        assert!(!table.has_time_axis().unwrap());
    }
}
