use std::fmt::Display;

use hashbrown::{
    HashMap,
    HashSet,
};
use itertools::{
    izip,
    Itertools,
};
use log::warn;
use polars::prelude::*;
use serde::{
    Deserialize,
    Serialize,
};

use crate::data_structs::typedef::*;
use crate::data_structs::SampleColumns;
use crate::with_field_fn;

/// Post-parse dataset checks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ValidationConfig {
    /// Unresolved duplicate identifiers are errors when set, warnings
    /// otherwise.
    pub strict:               bool,
    /// Stop at the first failing check instead of collecting all errors.
    pub fail_fast:            bool,
    /// Time values above this many hours only produce a warning.
    pub max_time_hours:       HoursType,
    /// Pre-existing column that tells duplicate identifiers apart.
    pub disambiguator_column: Option<String>,
    pub check_group_sizes:    bool,
}

impl ValidationConfig {
    with_field_fn!(strict, bool);

    with_field_fn!(fail_fast, bool);

    with_field_fn!(max_time_hours, HoursType);

    with_field_fn!(disambiguator_column, Option<String>);

    with_field_fn!(check_group_sizes, bool);
}

impl Default for ValidationConfig {
    fn default() -> Self {
        Self {
            strict:               true,
            fail_fast:            true,
            max_time_hours:       168.0,
            disambiguator_column: Some(SampleColumns::Replicate.as_str().to_owned()),
            check_group_sizes:    true,
        }
    }
}

/// Outcome of [`DatasetValidator::validate`].
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ValidationReport {
    errors:   Vec<String>,
    warnings: Vec<String>,
}

impl ValidationReport {
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn errors(&self) -> &[String] {
        &self.errors
    }

    pub fn warnings(&self) -> &[String] {
        &self.warnings
    }

    pub fn add_error<S: Into<String>>(
        &mut self,
        message: S,
    ) {
        self.errors.push(message.into())
    }

    pub fn add_warning<S: Into<String>>(
        &mut self,
        message: S,
    ) {
        let message = message.into();
        warn!("{}", message);
        self.warnings.push(message)
    }
}

impl Display for ValidationReport {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        write!(
            f,
            "{} error(s), {} warning(s)",
            self.errors.len(),
            self.warnings.len()
        )?;
        if !self.errors.is_empty() {
            write!(f, ": {}", self.errors.iter().join("; "))?;
        }
        Ok(())
    }
}

type Check = fn(
    &DatasetValidator,
    &DataFrame,
    &str,
    &mut ValidationReport,
) -> PolarsResult<()>;

/// Runs the post-parse checks over a loaded frame.
#[derive(Debug, Clone, Default)]
pub struct DatasetValidator {
    config: ValidationConfig,
}

impl DatasetValidator {
    pub fn new(config: ValidationConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ValidationConfig {
        &self.config
    }

    /// Collects errors and warnings for `data`, whose identifier column is
    /// `id_column`.
    pub fn validate(
        &self,
        data: &DataFrame,
        id_column: &str,
    ) -> PolarsResult<ValidationReport> {
        let checks: [Check; 5] = [
            Self::check_required,
            Self::check_identity_columns,
            Self::check_time,
            Self::check_duplicates,
            Self::check_group_sizes,
        ];
        let mut report = ValidationReport::default();
        for check in checks {
            check(self, data, id_column, &mut report)?;
            if self.config.fail_fast && !report.is_valid() {
                break;
            }
        }
        Ok(report)
    }

    fn check_required(
        &self,
        data: &DataFrame,
        id_column: &str,
        report: &mut ValidationReport,
    ) -> PolarsResult<()> {
        for name in [
            id_column,
            SampleColumns::Group.as_str(),
            SampleColumns::Animal.as_str(),
            SampleColumns::Tissue.as_str(),
        ] {
            match data.column(name) {
                Err(_) => report.add_error(format!("Missing required column '{}'", name)),
                Ok(column) if column.null_count() == column.len() => {
                    report.add_error(format!("Required column '{}' is empty", name))
                },
                Ok(_) => {},
            }
        }
        Ok(())
    }

    fn check_identity_columns(
        &self,
        data: &DataFrame,
        _id_column: &str,
        report: &mut ValidationReport,
    ) -> PolarsResult<()> {
        for column in [SampleColumns::Group, SampleColumns::Animal] {
            let Ok(values) = data.column(column.as_str()) else {
                continue;
            };
            if !values.dtype().is_numeric() {
                report.add_error(format!(
                    "Column '{}' must be numeric, found {}",
                    column.as_str(),
                    values.dtype()
                ));
                continue;
            }
            let negative = count_where(values, |v| v < 0.0)?;
            if negative > 0 {
                report.add_error(format!(
                    "Column '{}' has {} negative value(s)",
                    column.as_str(),
                    negative
                ));
            }
        }
        Ok(())
    }

    fn check_time(
        &self,
        data: &DataFrame,
        _id_column: &str,
        report: &mut ValidationReport,
    ) -> PolarsResult<()> {
        let Ok(values) = data.column(SampleColumns::Time.as_str())
        else {
            return Ok(());
        };
        if values.null_count() == values.len() {
            return Ok(());
        }
        if !values.dtype().is_numeric() {
            report.add_error(format!(
                "Column 'Time' must be numeric, found {}",
                values.dtype()
            ));
            return Ok(());
        }
        let negative = count_where(values, |v| v < 0.0)?;
        if negative > 0 {
            report.add_error(format!("Column 'Time' has {} negative value(s)", negative));
        }
        let ceiling = self.config.max_time_hours;
        let beyond = count_where(values, |v| v > ceiling)?;
        if beyond > 0 {
            report.add_warning(format!(
                "{} time value(s) exceed {} hours",
                beyond, ceiling
            ));
        }
        Ok(())
    }

    fn check_duplicates(
        &self,
        data: &DataFrame,
        id_column: &str,
        report: &mut ValidationReport,
    ) -> PolarsResult<()> {
        let Ok(ids) = data.column(id_column) else {
            return Ok(());
        };
        let ids = ids.cast(&DataType::String)?;
        let disambiguator = match &self.config.disambiguator_column {
            Some(name) if name != id_column => {
                match data.column(name) {
                    Ok(column) => Some(column.cast(&DataType::String)?),
                    Err(_) => None,
                }
            },
            _ => None,
        };
        let extra: Vec<Option<&str>> = match &disambiguator {
            Some(column) => column.str()?.into_iter().collect(),
            None => vec![None; ids.len()],
        };
        // One identifier measured at several time points is not a duplicate.
        let times: Vec<Option<TimeKey>> = match data.column(SampleColumns::Time.as_str()) {
            Ok(column) if column.dtype().is_numeric() => {
                column
                    .cast(&DataType::Float64)?
                    .f64()?
                    .into_iter()
                    .map(|t| t.map(TimeKey::new))
                    .collect()
            },
            _ => vec![None; ids.len()],
        };

        let mut counts: HashMap<(&str, Option<&str>, Option<TimeKey>), usize> = HashMap::new();
        for (id, extra, time) in izip!(ids.str()?.into_iter(), extra, times) {
            if let Some(id) = id {
                *counts.entry((id, extra, time)).or_default() += 1;
            }
        }
        let duplicated = counts
            .into_iter()
            .filter(|(_, n)| *n > 1)
            .map(|((id, ..), _)| id)
            .sorted()
            .dedup()
            .collect_vec();
        if duplicated.is_empty() {
            return Ok(());
        }

        let message = format!(
            "{} duplicate sample identifier(s): {}",
            duplicated.len(),
            duplicated.iter().take(10).join(", ")
        );
        if self.config.strict {
            report.add_error(message)
        }
        else {
            report.add_warning(message)
        }
        Ok(())
    }

    fn check_group_sizes(
        &self,
        data: &DataFrame,
        _id_column: &str,
        report: &mut ValidationReport,
    ) -> PolarsResult<()> {
        if !self.config.check_group_sizes {
            return Ok(());
        }
        let (Ok(groups), Ok(animals)) = (
            data.column(SampleColumns::Group.as_str()),
            data.column(SampleColumns::Animal.as_str()),
        )
        else {
            return Ok(());
        };
        let groups = groups.cast(&DataType::UInt32)?;
        let animals = animals.cast(&DataType::UInt32)?;

        let mut sizes: HashMap<GroupType, HashSet<AnimalType>> = HashMap::new();
        for (group, animal) in izip!(groups.u32()?.into_iter(), animals.u32()?.into_iter()) {
            if let (Some(group), Some(animal)) = (group, animal) {
                sizes.entry(group).or_default().insert(animal);
            }
        }
        let Some(largest) = sizes.values().map(|a| a.len()).max() else {
            return Ok(());
        };
        let short = sizes
            .iter()
            .filter(|(_, animals)| animals.len() < largest)
            .map(|(group, animals)| (*group, animals.len()))
            .sorted()
            .collect_vec();
        if !short.is_empty() {
            report.add_warning(format!(
                "Inconsistent group sizes (largest has {} animals): {}",
                largest,
                short
                    .iter()
                    .map(|(group, n)| format!("group {} has {}", group, n))
                    .join(", ")
            ));
        }
        Ok(())
    }
}

fn count_where<F: Fn(f64) -> bool>(
    column: &Column,
    predicate: F,
) -> PolarsResult<usize> {
    let values = column.cast(&DataType::Float64)?;
    Ok(values
        .f64()?
        .into_iter()
        .flatten()
        .filter(|v| predicate(*v))
        .count())
}
