use std::cmp::Ordering;
use std::hash::{
    Hash,
    Hasher,
};

pub type GroupType = u32;
pub type AnimalType = u32;
pub type ReplicateType = u32;
/// Elapsed time, always normalized to hours.
pub type HoursType = f64;

/// Display label for a sample without a plate well.
pub const UNKNOWN_WELL: &str = "UNK";

/// Hours value usable as a map key.
///
/// `-0.0` is folded into `0.0` so that equality, hashing and ordering agree.
#[derive(Debug, Clone, Copy)]
pub struct TimeKey(HoursType);

impl TimeKey {
    pub fn new(hours: HoursType) -> Self {
        if hours == 0.0 {
            TimeKey(0.0)
        }
        else {
            TimeKey(hours)
        }
    }

    pub fn hours(&self) -> HoursType {
        self.0
    }
}

impl From<HoursType> for TimeKey {
    fn from(value: HoursType) -> Self {
        TimeKey::new(value)
    }
}

impl PartialEq for TimeKey {
    fn eq(
        &self,
        other: &Self,
    ) -> bool {
        self.0.to_bits() == other.0.to_bits()
    }
}

impl Eq for TimeKey {}

impl Hash for TimeKey {
    fn hash<H: Hasher>(
        &self,
        state: &mut H,
    ) {
        self.0.to_bits().hash(state)
    }
}

impl PartialOrd for TimeKey {
    fn partial_cmp(
        &self,
        other: &Self,
    ) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for TimeKey {
    fn cmp(
        &self,
        other: &Self,
    ) -> Ordering {
        self.0.total_cmp(&other.0)
    }
}

impl std::fmt::Display for TimeKey {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        write!(f, "{}h", self.0)
    }
}
