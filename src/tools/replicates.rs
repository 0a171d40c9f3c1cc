use std::collections::{
    BTreeMap,
    BTreeSet,
};
use std::fmt::Display;

use hashbrown::{
    HashMap,
    HashSet,
};
use itertools::Itertools;
use log::{
    info,
    warn,
};
use polars::prelude::*;

use crate::data_structs::typedef::*;
use crate::data_structs::{
    SampleColumns,
    SampleTable,
    TissueCode,
};
use crate::error::{
    FlowError,
    Result,
};

/// Partition key for replicate numbering. `time` is set only when the
/// dataset has a time axis, `tissue` only when tissues differ.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ReplicateKey {
    pub time:   Option<TimeKey>,
    pub group:  GroupType,
    pub tissue: Option<TissueCode>,
}

impl Display for ReplicateKey {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        write!(f, "group {}", self.group)?;
        if let Some(tissue) = self.tissue {
            write!(f, ", {}", tissue)?;
        }
        if let Some(time) = self.time {
            write!(f, ", {}", time)?;
        }
        Ok(())
    }
}

/// `(key, animal) -> replicate` assignments, built once per dataset.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReplicateMap {
    assignments: HashMap<(ReplicateKey, AnimalType), ReplicateType>,
    key_sizes:   BTreeMap<ReplicateKey, usize>,
}

impl ReplicateMap {
    pub fn get(
        &self,
        key: &ReplicateKey,
        animal: AnimalType,
    ) -> Option<ReplicateType> {
        self.assignments.get(&(*key, animal)).copied()
    }

    /// Number of assigned `(key, animal)` pairs.
    pub fn len(&self) -> usize {
        self.assignments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.assignments.is_empty()
    }

    /// Distinct animals seen per key, before truncation.
    pub fn key_sizes(&self) -> &BTreeMap<ReplicateKey, usize> {
        &self.key_sizes
    }

    /// `(animal, replicate)` pairs of one key, by replicate.
    pub fn replicates_for(
        &self,
        key: &ReplicateKey,
    ) -> Vec<(AnimalType, ReplicateType)> {
        self.assignments
            .iter()
            .filter(|((k, _), _)| k == key)
            .map(|((_, animal), rep)| (*animal, *rep))
            .sorted_by_key(|(_, rep)| *rep)
            .collect()
    }
}

/// A key with fewer distinct animals than the replicate count.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShortKey {
    pub key:     ReplicateKey,
    pub animals: usize,
}

#[derive(Debug, Clone)]
pub struct MappedReplicates {
    /// Input rows with a `Replicate` column; unassigned rows are removed.
    pub table:                 SampleTable,
    pub replicate_count:       ReplicateType,
    pub map:                   ReplicateMap,
    pub short_keys:            Vec<ShortKey>,
    /// Rows removed because they got no replicate index.
    pub dropped_rows:          usize,
    /// Subset of `dropped_rows` cut by the replicate limit.
    pub truncated_rows:        usize,
    pub time_active:           bool,
    pub tissues_heterogeneous: bool,
}

/// Assigns dense 1-based replicate indices to the animals of each
/// `(time?, group, tissue?)` key.
///
/// Animals are numbered in ascending order of their animal number. In
/// auto-detect mode the replicate count is the largest number of distinct
/// animals over all keys; keys with fewer animals keep their smaller dense
/// range and are reported as short. With explicit lists the count is the
/// length of the replicate list and extra animals are cut.
pub struct ReplicateMapper;

impl ReplicateMapper {
    pub fn map_replicates(
        table: &SampleTable,
        auto_detect: bool,
        explicit_replicates: Option<&[ReplicateType]>,
        explicit_groups: Option<&[GroupType]>,
    ) -> Result<MappedReplicates> {
        Self::map_replicates_over_time(
            table,
            true,
            auto_detect,
            explicit_replicates,
            explicit_groups,
        )
    }

    /// [`map_replicates`](Self::map_replicates) with the time axis under the
    /// caller's control. With `use_time` off, animals are numbered across
    /// all time points, so one animal keeps its replicate index everywhere.
    pub fn map_replicates_over_time(
        table: &SampleTable,
        use_time: bool,
        auto_detect: bool,
        explicit_replicates: Option<&[ReplicateType]>,
        explicit_groups: Option<&[GroupType]>,
    ) -> Result<MappedReplicates> {
        if table.is_empty() {
            return Err(FlowError::EmptyResult(
                "no rows to assign replicates to".into(),
            ));
        }
        let explicit_replicates = explicit_replicates.filter(|r| !r.is_empty());
        let explicit_groups = explicit_groups.filter(|g| !g.is_empty());
        if !auto_detect && (explicit_replicates.is_none() || explicit_groups.is_none()) {
            return Err(FlowError::Configuration(
                "manual replicate mapping needs both group and replicate lists".into(),
            ));
        }

        let time_active = use_time && table.has_time_axis()?;
        let tissues_heterogeneous = table.tissues_heterogeneous()?;
        let allowed: Option<HashSet<GroupType>> =
            explicit_groups.map(|groups| groups.iter().copied().collect());

        let row_keys = Self::row_keys(table, time_active, tissues_heterogeneous, &allowed)?;

        let mut animals_by_key: BTreeMap<ReplicateKey, BTreeSet<AnimalType>> =
            BTreeMap::new();
        for (key, animal) in row_keys.iter().flatten() {
            animals_by_key.entry(*key).or_default().insert(*animal);
        }
        let max_animals = animals_by_key.values().map(BTreeSet::len).max().unwrap_or(0);
        if max_animals == 0 {
            return Err(FlowError::EmptyResult(
                "no group has any animal to number".into(),
            ));
        }

        let replicate_count = match explicit_replicates {
            Some(replicates) => replicates.len(),
            None => max_animals,
        };

        let mut map = ReplicateMap::default();
        for (key, animals) in animals_by_key.iter() {
            map.key_sizes.insert(*key, animals.len());
            for (idx, animal) in animals.iter().take(replicate_count).enumerate() {
                map.assignments
                    .insert((*key, *animal), (idx + 1) as ReplicateType);
            }
        }

        let short_keys = animals_by_key
            .iter()
            .filter(|(_, animals)| animals.len() < replicate_count)
            .map(|(key, animals)| {
                ShortKey {
                    key:     *key,
                    animals: animals.len(),
                }
            })
            .collect_vec();
        if !short_keys.is_empty() {
            warn!(
                "{} key(s) have fewer than {} replicates: {}",
                short_keys.len(),
                replicate_count,
                short_keys
                    .iter()
                    .take(10)
                    .map(|s| format!("{} ({} animal(s))", s.key, s.animals))
                    .join("; ")
            );
        }

        let replicates = row_keys
            .iter()
            .map(|row| row.and_then(|(key, animal)| map.get(&key, animal)))
            .collect_vec();
        let truncated_rows = count_truncated(&row_keys, &replicates);
        let dropped_rows = replicates.iter().filter(|r| r.is_none()).count();
        if truncated_rows > 0 {
            warn!(
                "{} row(s) exceed the {} requested replicate(s) and were dropped",
                truncated_rows, replicate_count
            );
        }

        let mut data = table.data().clone();
        let keep = BooleanChunked::from_iter_values(
            "keep".into(),
            replicates.iter().map(Option::is_some),
        );
        data.with_column(Column::new(
            SampleColumns::Replicate.as_str().into(),
            replicates,
        ))?;
        let data = data.filter(&keep)?;
        if data.height() == 0 {
            return Err(FlowError::EmptyResult(
                "no row was assigned a replicate".into(),
            ));
        }

        info!(
            "Mapped {} key(s) to {} replicate(s); dropped {} row(s)",
            animals_by_key.len(),
            replicate_count,
            dropped_rows
        );

        Ok(MappedReplicates {
            table: table.with_data(data)?,
            replicate_count: replicate_count as ReplicateType,
            map,
            short_keys,
            dropped_rows,
            truncated_rows,
            time_active,
            tissues_heterogeneous,
        })
    }

    /// Key and animal of each row; `None` for rows with a missing identity
    /// or an excluded group.
    fn row_keys(
        table: &SampleTable,
        time_active: bool,
        tissues_heterogeneous: bool,
        allowed: &Option<HashSet<GroupType>>,
    ) -> PolarsResult<Vec<Option<(ReplicateKey, AnimalType)>>> {
        let groups = table.group()?;
        let animals = table.animal()?;
        let times = table.time()?;
        let tissues = table.tissue()?;

        Ok(itertools::izip!(
            groups.into_iter(),
            animals.into_iter(),
            times.into_iter(),
            tissues
        )
        .map(|(group, animal, time, tissue)| {
            let (group, animal) = (group?, animal?);
            if allowed.as_ref().is_some_and(|a| !a.contains(&group)) {
                return None;
            }
            let key = ReplicateKey {
                time: time.filter(|_| time_active).map(TimeKey::new),
                group,
                tissue: tissues_heterogeneous.then_some(tissue),
            };
            Some((key, animal))
        })
        .collect())
    }
}

/// Rows that had a key but lost their animal to the replicate limit.
fn count_truncated(
    row_keys: &[Option<(ReplicateKey, AnimalType)>],
    replicates: &[Option<ReplicateType>],
) -> usize {
    row_keys
        .iter()
        .zip(replicates)
        .filter(|(key, rep)| key.is_some() && rep.is_none())
        .count()
}

#[cfg(test)]
mod tests {
    use rstest::{
        fixture,
        rstest,
    };

    use super::*;

    fn table_from(
        groups: &[u32],
        animals: &[u32],
        tissues: &[&str],
        times: &[Option<f64>],
    ) -> SampleTable {
        let data = df!(
            "Sample" => (0..groups.len()).map(|i| format!("s{}", i)).collect_vec(),
            "Group" => groups,
            "Animal" => animals,
            "Tissue" => tissues,
            "Time" => times,
            "CD4+ | Count" => (0..groups.len()).map(|i| i as f64).collect_vec()
        )
        .unwrap();
        SampleTable::try_new(data, "Sample").unwrap()
    }

    /// Group 1 has animals {1, 2, 3}, group 2 has animals {1, 2}.
    #[fixture]
    fn uneven() -> SampleTable {
        table_from(
            &[1, 1, 1, 2, 2],
            &[3, 1, 2, 2, 1],
            &["SP"; 5],
            &[None; 5],
        )
    }

    fn replicates_of(
        mapped: &MappedReplicates,
        group: u32,
    ) -> Vec<(u32, u32)> {
        let data = mapped.table.data();
        let groups = data.column("Group").unwrap().u32().unwrap().clone();
        let animals = data.column("Animal").unwrap().u32().unwrap().clone();
        let reps = data.column("Replicate").unwrap().u32().unwrap().clone();
        itertools::izip!(groups.into_iter(), animals.into_iter(), reps.into_iter())
            .filter(|(g, ..)| *g == Some(group))
            .map(|(_, a, r)| (a.unwrap(), r.unwrap()))
            .sorted()
            .collect()
    }

    #[rstest]
    fn test_uneven_groups(uneven: SampleTable) {
        let mapped = ReplicateMapper::map_replicates(&uneven, true, None, None).unwrap();
        assert_eq!(mapped.replicate_count, 3);
        assert_eq!(mapped.short_keys, vec![ShortKey {
            key:     ReplicateKey {
                time:   None,
                group:  2,
                tissue: None,
            },
            animals: 2,
        }]);
        assert_eq!(replicates_of(&mapped, 1), vec![(1, 1), (2, 2), (3, 3)]);
        assert_eq!(replicates_of(&mapped, 2), vec![(1, 1), (2, 2)]);
        assert_eq!(mapped.dropped_rows, 0);
        assert_eq!(mapped.table.height(), 5);
    }

    #[test]
    fn test_dense_numbering_with_gaps() {
        let table = table_from(&[4, 4, 4], &[7, 12, 9], &["SP"; 3], &[None; 3]);
        let mapped = ReplicateMapper::map_replicates(&table, true, None, None).unwrap();
        assert_eq!(replicates_of(&mapped, 4), vec![(7, 1), (9, 2), (12, 3)]);
        let key = ReplicateKey {
            time:   None,
            group:  4,
            tissue: None,
        };
        assert_eq!(mapped.map.replicates_for(&key), vec![(7, 1), (9, 2), (12, 3)]);
        assert_eq!(mapped.map.get(&key, 12), Some(3));
    }

    #[test]
    fn test_repeated_rows_share_replicate() {
        let table = table_from(&[1, 1, 1], &[2, 2, 5], &["SP"; 3], &[None; 3]);
        let mapped = ReplicateMapper::map_replicates(&table, true, None, None).unwrap();
        assert_eq!(mapped.replicate_count, 2);
        assert_eq!(replicates_of(&mapped, 1), vec![(2, 1), (2, 1), (5, 2)]);
    }

    #[test]
    fn test_keys_split_by_time_and_tissue() {
        let table = table_from(
            &[1, 1, 1, 1, 1],
            &[1, 2, 1, 5, 6],
            &["SP", "SP", "SP", "BM", "BM"],
            &[Some(2.0), Some(2.0), Some(24.0), Some(2.0), Some(2.0)],
        );
        let mapped = ReplicateMapper::map_replicates(&table, true, None, None).unwrap();
        assert!(mapped.time_active);
        assert!(mapped.tissues_heterogeneous);
        assert_eq!(mapped.map.key_sizes().len(), 3);
        assert_eq!(mapped.replicate_count, 2);
        // Bone marrow animals 5 and 6 restart at 1.
        let marrow = ReplicateKey {
            time:   Some(TimeKey::new(2.0)),
            group:  1,
            tissue: Some(TissueCode::BM),
        };
        assert_eq!(mapped.map.replicates_for(&marrow), vec![(5, 1), (6, 2)]);
        assert_eq!(mapped.short_keys.len(), 1);
        assert_eq!(mapped.short_keys[0].key.time, Some(TimeKey::new(24.0)));
    }

    #[test]
    fn test_time_axis_ignored_on_request() {
        // Animal 3 is only measured at 24h.
        let table = table_from(
            &[1, 1, 1, 1],
            &[1, 2, 1, 3],
            &["SP"; 4],
            &[Some(2.0), Some(2.0), Some(24.0), Some(24.0)],
        );
        let mapped =
            ReplicateMapper::map_replicates_over_time(&table, false, true, None, None).unwrap();
        assert!(!mapped.time_active);
        assert_eq!(mapped.replicate_count, 3);
        assert_eq!(replicates_of(&mapped, 1), vec![(1, 1), (1, 1), (2, 2), (3, 3)]);

        let per_time = ReplicateMapper::map_replicates(&table, true, None, None).unwrap();
        assert_eq!(replicates_of(&per_time, 1), vec![(1, 1), (1, 1), (2, 2), (3, 2)]);
    }

    #[rstest]
    fn test_explicit_lists_truncate(uneven: SampleTable) {
        let mapped =
            ReplicateMapper::map_replicates(&uneven, false, Some(&[1, 2]), Some(&[1]))
                .unwrap();
        assert_eq!(mapped.replicate_count, 2);
        assert_eq!(replicates_of(&mapped, 1), vec![(1, 1), (2, 2)]);
        assert!(replicates_of(&mapped, 2).is_empty());
        assert_eq!(mapped.truncated_rows, 1);
        assert_eq!(mapped.dropped_rows, 3);
        assert!(mapped.short_keys.is_empty());
    }

    #[rstest]
    fn test_manual_mode_needs_both_lists(uneven: SampleTable) {
        let result = ReplicateMapper::map_replicates(&uneven, false, Some(&[1, 2]), None);
        assert!(matches!(result, Err(FlowError::Configuration(_))));
    }

    #[rstest]
    fn test_no_selected_group(uneven: SampleTable) {
        let result = ReplicateMapper::map_replicates(&uneven, true, None, Some(&[9]));
        assert!(matches!(result, Err(FlowError::EmptyResult(_))));
    }

    #[test]
    fn test_empty_table() {
        let table = table_from(&[], &[], &[], &[]);
        let result = ReplicateMapper::map_replicates(&table, true, None, None);
        assert!(matches!(result, Err(FlowError::EmptyResult(_))));
    }

    #[test]
    fn test_key_display() {
        let key = ReplicateKey {
            time:   Some(TimeKey::new(0.5)),
            group:  3,
            tissue: Some(TissueCode::LN),
        };
        assert_eq!(key.to_string(), "group 3, LN, 0.5h");
    }
}
