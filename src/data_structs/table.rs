use std::str::FromStr;

use itertools::Itertools;
use polars::prelude::*;

use super::tissue::TissueCode;
use super::typedef::*;
use crate::utils::{
    distinct_u32,
    schema_from_arrays,
};

/// Identity columns derived from the sample identifier.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum SampleColumns {
    Well,
    Group,
    Animal,
    Time,
    Tissue,
    Replicate,
}

impl SampleColumns {
    pub const ALL: [SampleColumns; 6] = [
        SampleColumns::Well,
        SampleColumns::Group,
        SampleColumns::Animal,
        SampleColumns::Time,
        SampleColumns::Tissue,
        SampleColumns::Replicate,
    ];

    pub const fn as_str(&self) -> &'static str {
        match self {
            SampleColumns::Well => "Well",
            SampleColumns::Group => "Group",
            SampleColumns::Animal => "Animal",
            SampleColumns::Time => "Time",
            SampleColumns::Tissue => "Tissue",
            SampleColumns::Replicate => "Replicate",
        }
    }

    pub const fn dtype(&self) -> DataType {
        match self {
            SampleColumns::Well => DataType::String,
            SampleColumns::Group => DataType::UInt32,
            SampleColumns::Animal => DataType::UInt32,
            SampleColumns::Time => DataType::Float64,
            SampleColumns::Tissue => DataType::String,
            SampleColumns::Replicate => DataType::UInt32,
        }
    }

    pub const fn colnames() -> [&'static str; 6] {
        [
            SampleColumns::Well.as_str(),
            SampleColumns::Group.as_str(),
            SampleColumns::Animal.as_str(),
            SampleColumns::Time.as_str(),
            SampleColumns::Tissue.as_str(),
            SampleColumns::Replicate.as_str(),
        ]
    }

    pub fn schema() -> Schema {
        schema_from_arrays(
            &Self::colnames(),
            &Self::ALL.iter().map(|c| c.dtype()).collect_vec(),
        )
    }

    pub fn has_name(name: &str) -> bool {
        Self::colnames().contains(&name)
    }

    #[inline(always)]
    pub fn col(&self) -> Expr {
        col(self.as_str())
    }
}

/// A loaded dataset: the input columns plus the derived identity columns.
///
/// Metric columns keep their original names; anything that is neither the
/// identifier column nor one of [`SampleColumns`] counts as a metric column.
#[derive(Debug, Clone, PartialEq)]
pub struct SampleTable {
    data:      DataFrame,
    id_column: String,
}

impl SampleTable {
    /// Wraps a frame that already carries the identifier column and at least
    /// the `Group`, `Animal` and `Tissue` columns.
    pub fn try_new(
        data: DataFrame,
        id_column: &str,
    ) -> PolarsResult<Self> {
        for name in [
            id_column,
            SampleColumns::Group.as_str(),
            SampleColumns::Animal.as_str(),
            SampleColumns::Tissue.as_str(),
        ] {
            polars_ensure!(
                data.get_column_index(name).is_some(),
                ColumnNotFound: "sample table is missing column '{}'", name
            );
        }
        Ok(Self {
            data,
            id_column: id_column.to_owned(),
        })
    }

    pub fn data(&self) -> &DataFrame {
        &self.data
    }

    pub fn into_inner(self) -> DataFrame {
        self.data
    }

    pub fn lazy(&self) -> LazyFrame {
        self.data.clone().lazy()
    }

    pub fn id_column(&self) -> &str {
        &self.id_column
    }

    pub fn height(&self) -> usize {
        self.data.height()
    }

    pub fn is_empty(&self) -> bool {
        self.data.height() == 0
    }

    pub fn has_column(
        &self,
        column: SampleColumns,
    ) -> bool {
        self.data.get_column_index(column.as_str()).is_some()
    }

    fn u32_column(
        &self,
        column: SampleColumns,
    ) -> PolarsResult<UInt32Chunked> {
        Ok(self
            .data
            .column(column.as_str())?
            .cast(&DataType::UInt32)?
            .u32()?
            .clone())
    }

    pub fn group(&self) -> PolarsResult<UInt32Chunked> {
        self.u32_column(SampleColumns::Group)
    }

    pub fn animal(&self) -> PolarsResult<UInt32Chunked> {
        self.u32_column(SampleColumns::Animal)
    }

    /// `None` when the table has no replicate column yet.
    pub fn replicate(&self) -> PolarsResult<Option<UInt32Chunked>> {
        if !self.has_column(SampleColumns::Replicate) {
            return Ok(None);
        }
        self.u32_column(SampleColumns::Replicate).map(Some)
    }

    /// All-null when the table has no time column.
    pub fn time(&self) -> PolarsResult<Float64Chunked> {
        if !self.has_column(SampleColumns::Time) {
            return Ok(Float64Chunked::full_null(
                SampleColumns::Time.as_str().into(),
                self.height(),
            ));
        }
        Ok(self
            .data
            .column(SampleColumns::Time.as_str())?
            .cast(&DataType::Float64)?
            .f64()?
            .clone())
    }

    pub fn tissue(&self) -> PolarsResult<Vec<TissueCode>> {
        let column = self
            .data
            .column(SampleColumns::Tissue.as_str())?
            .cast(&DataType::String)?;
        Ok(column
            .str()?
            .into_iter()
            .map(|v| {
                v.and_then(|s| TissueCode::from_str(s).ok())
                    .unwrap_or(TissueCode::Unknown)
            })
            .collect())
    }

    /// Sorted distinct groups.
    pub fn groups(&self) -> PolarsResult<Vec<GroupType>> {
        distinct_u32(self.data.column(SampleColumns::Group.as_str())?)
    }

    /// Sorted distinct tissues.
    pub fn tissues(&self) -> PolarsResult<Vec<TissueCode>> {
        Ok(self.tissue()?.into_iter().sorted().dedup().collect())
    }

    /// Sorted distinct non-null time points.
    pub fn times(&self) -> PolarsResult<Vec<HoursType>> {
        Ok(self
            .time()?
            .into_iter()
            .flatten()
            .map(TimeKey::new)
            .sorted()
            .dedup()
            .map(|k| k.hours())
            .collect())
    }

    /// More than one distinct tissue.
    pub fn tissues_heterogeneous(&self) -> PolarsResult<bool> {
        Ok(self.tissues()?.len() > 1)
    }

    /// At least one non-null time point.
    pub fn has_time_axis(&self) -> PolarsResult<bool> {
        Ok(self.has_column(SampleColumns::Time)
            && self.time()?.null_count() < self.height())
    }

    /// Columns that are neither the identifier nor derived identity columns.
    pub fn metric_columns(&self) -> Vec<String> {
        self.data
            .get_column_names()
            .into_iter()
            .filter(|name| {
                name.as_str() != self.id_column && !SampleColumns::has_name(name)
            })
            .map(|name| name.to_string())
            .collect()
    }

    /// Replaces the data while keeping the identifier column name.
    pub(crate) fn with_data(
        &self,
        data: DataFrame,
    ) -> PolarsResult<Self> {
        Self::try_new(data, &self.id_column)
    }
}
