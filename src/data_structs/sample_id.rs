use std::fmt::Display;

use serde::Serialize;

use super::tissue::TissueCode;
use super::typedef::*;
use crate::getter_fn;

/// Identity fields decoded from one sample identifier.
///
/// Group and animal are always at least 1; the only way to build one is
/// [`ParsedSampleId::try_new`], which refuses anything else.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ParsedSampleId {
    well:   Option<String>,
    group:  GroupType,
    animal: AnimalType,
    time:   Option<HoursType>,
    tissue: TissueCode,
}

impl ParsedSampleId {
    getter_fn!(group, GroupType);

    getter_fn!(animal, AnimalType);

    getter_fn!(tissue, TissueCode);

    /// Returns `None` when `group` or `animal` is zero or when `time` is
    /// negative.
    pub fn try_new(
        well: Option<String>,
        group: GroupType,
        animal: AnimalType,
        time: Option<HoursType>,
        tissue: TissueCode,
    ) -> Option<Self> {
        if group == 0 || animal == 0 {
            return None;
        }
        if time.is_some_and(|t| t < 0.0 || t.is_nan()) {
            return None;
        }
        Some(Self {
            well,
            group,
            animal,
            time,
            tissue,
        })
    }

    pub fn well(&self) -> Option<&str> {
        self.well.as_deref()
    }

    /// Well label, or [`UNKNOWN_WELL`] when the identifier had none.
    pub fn well_label(&self) -> &str {
        self.well().unwrap_or(UNKNOWN_WELL)
    }

    pub fn time(&self) -> Option<HoursType> {
        self.time
    }
}

impl Display for ParsedSampleId {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        if let Some(time) = self.time {
            write!(f, "{}h_", time)?;
        }
        write!(
            f,
            "{}_{}_{}.{}",
            self.tissue,
            self.well_label(),
            self.group,
            self.animal
        )
    }
}
