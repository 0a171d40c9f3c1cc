use itertools::Itertools;
use log::debug;
use polars::prelude::*;

/// Narrowest integer type holding `[min, max]`, unsigned when `min >= 0`.
fn narrowest_integer(
    min: i64,
    max: i64,
) -> DataType {
    let candidates: [(DataType, i64, i64); 3] = if min >= 0 {
        [
            (DataType::UInt8, 0, u8::MAX as i64),
            (DataType::UInt16, 0, u16::MAX as i64),
            (DataType::UInt32, 0, u32::MAX as i64),
        ]
    }
    else {
        [
            (DataType::Int8, i8::MIN as i64, i8::MAX as i64),
            (DataType::Int16, i16::MIN as i64, i16::MAX as i64),
            (DataType::Int32, i32::MIN as i64, i32::MAX as i64),
        ]
    };
    candidates
        .into_iter()
        .find(|(_, lo, hi)| min >= *lo && max <= *hi)
        .map(|(dtype, ..)| dtype)
        .unwrap_or(DataType::Int64)
}

fn integer_bits(dtype: &DataType) -> Option<u32> {
    match dtype {
        DataType::Int8 | DataType::UInt8 => Some(8),
        DataType::Int16 | DataType::UInt16 => Some(16),
        DataType::Int32 | DataType::UInt32 => Some(32),
        DataType::Int64 | DataType::UInt64 => Some(64),
        _ => None,
    }
}

/// Casts `column` to `target` and keeps the result only when casting back
/// restores every value, nulls included.
fn cast_if_lossless(
    column: &Column,
    target: &DataType,
) -> PolarsResult<Option<Column>> {
    let narrowed = column.cast(target)?;
    let restored = narrowed.cast(column.dtype())?;
    let same = restored
        .as_materialized_series()
        .equals_missing(column.as_materialized_series());
    Ok(same.then_some(narrowed))
}

fn optimize_column(column: &Column) -> PolarsResult<Column> {
    let dtype = column.dtype().clone();
    let target = match &dtype {
        dt if integer_bits(dt).is_some() => {
            let as_i64 = column.cast(&DataType::Int64)?;
            let values = as_i64.i64()?;
            match (values.min(), values.max()) {
                (Some(min), Some(max)) => {
                    let target = narrowest_integer(min, max);
                    (integer_bits(&target) < integer_bits(dt)).then_some(target)
                },
                _ => None,
            }
        },
        DataType::Float64 => Some(DataType::Float32),
        DataType::String => {
            let distinct = column.as_materialized_series().n_unique()?;
            (column.len() > 0 && distinct * 2 <= column.len())
                .then(|| DataType::Categorical(None, CategoricalOrdering::Physical))
        },
        _ => None,
    };

    let Some(target) = target else {
        return Ok(column.clone());
    };
    match cast_if_lossless(column, &target)? {
        Some(narrowed) => {
            debug!("Column '{}': {} -> {}", column.name(), dtype, target);
            Ok(narrowed)
        },
        None => Ok(column.clone()),
    }
}

/// Downcasts columns to smaller types without changing any value.
///
/// - integers to the narrowest type that holds their range;
/// - `Float64` to `Float32` when every value survives the round trip;
/// - low-cardinality text to `Categorical`.
pub fn optimize_table(data: &DataFrame) -> PolarsResult<DataFrame> {
    let columns = data
        .get_columns()
        .iter()
        .map(optimize_column)
        .collect::<PolarsResult<Vec<_>>>()?;
    let changed = columns
        .iter()
        .zip(data.get_columns())
        .filter(|(new, old)| new.dtype() != old.dtype())
        .map(|(new, _)| new.name().to_string())
        .collect_vec();
    if !changed.is_empty() {
        debug!("Downcast {} column(s): {}", changed.len(), changed.join(", "));
    }
    DataFrame::new(columns)
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[rstest]
    #[case::small_unsigned(0, 200, DataType::UInt8)]
    #[case::unsigned_16(0, 60_000, DataType::UInt16)]
    #[case::small_signed(-5, 100, DataType::Int8)]
    #[case::signed_32(-40_000, 10, DataType::Int32)]
    #[case::too_wide(0, 1 << 40, DataType::Int64)]
    fn test_narrowest_integer(
        #[case] min: i64,
        #[case] max: i64,
        #[case] expected: DataType,
    ) {
        assert_eq!(narrowest_integer(min, max), expected);
    }

    #[test]
    fn test_values_survive() {
        let data = df!(
            "Group" => [1i64, 2, 3, 2],
            "Offset" => [Some(-3i64), None, Some(70), Some(1)],
            "Exact" => [0.5, 1.25, 2.0, -8.0],
            "Precise" => [0.1, 0.2, 0.3, 0.4],
            "Tissue" => ["SP", "SP", "BM", "SP"],
            "Sample" => ["a", "b", "c", "d"]
        )
        .unwrap();
        let optimized = optimize_table(&data).unwrap();

        let dtypes = optimized.dtypes();
        assert_eq!(dtypes[0], DataType::UInt8);
        assert_eq!(dtypes[1], DataType::Int8);
        assert_eq!(dtypes[2], DataType::Float32);
        // 0.1 is not representable in f32.
        assert_eq!(dtypes[3], DataType::Float64);
        assert!(matches!(dtypes[4], DataType::Categorical(..)));
        assert_eq!(dtypes[5], DataType::String);

        for (new, old) in optimized.get_columns().iter().zip(data.get_columns()) {
            let restored = new.cast(old.dtype()).unwrap();
            assert!(restored
                .as_materialized_series()
                .equals_missing(old.as_materialized_series()));
        }
    }

    #[test]
    fn test_all_null_integers_untouched() {
        let data = df!("Replicate" => [None::<u32>, None]).unwrap();
        let optimized = optimize_table(&data).unwrap();
        assert_eq!(optimized.dtypes()[0], DataType::UInt32);
    }
}
