//! Histograms of the mount-policy values carried by queued jobs.
//!
//! A queue keeps one map per policy attribute so that "highest priority" or
//! "smallest minimum request age" can be answered without rescanning jobs.
//! Entries are kept as a small vector: the number of distinct values in a queue
//! is tiny, and the persisted form stays a plain list.

use rkyv::{Archive, Deserialize as RkyvDeserialize, Serialize as RkyvSerialize};
use serde::Serialize;

use crate::object_store::ObjectStoreError;

macro_rules! value_count_map {
    ($(#[$meta:meta])* $name:ident, $key:ty) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Default, PartialEq, Eq, Archive, RkyvSerialize, RkyvDeserialize, Serialize)]
        #[archive(check_bytes)]
        pub struct $name {
            entries: Vec<($key, u64)>,
        }

        impl $name {
            pub fn new() -> Self {
                Self::default()
            }

            pub fn inc_count(&mut self, value: impl Into<$key>) {
                let value = value.into();
                match self.entries.iter_mut().find(|(v, _)| *v == value) {
                    Some((_, count)) => *count += 1,
                    None => self.entries.push((value, 1)),
                }
            }

            /// Decrement and drop the entry once it reaches zero.
            pub fn dec_count(&mut self, value: impl Into<$key>) -> Result<(), ObjectStoreError> {
                let value = value.into();
                let idx = self
                    .entries
                    .iter()
                    .position(|(v, _)| *v == value)
                    .ok_or_else(|| ObjectStoreError::NotFound(format!(
                        "value {:?} in {}",
                        value,
                        stringify!($name)
                    )))?;
                let (_, count) = &mut self.entries[idx];
                *count -= 1;
                if *count == 0 {
                    self.entries.swap_remove(idx);
                }
                Ok(())
            }

            pub fn min_value(&self) -> Result<$key, ObjectStoreError> {
                self.entries
                    .iter()
                    .filter(|(_, c)| *c > 0)
                    .map(|(v, _)| v)
                    .min()
                    .cloned()
                    .ok_or(ObjectStoreError::EmptyValueCountMap)
            }

            pub fn max_value(&self) -> Result<$key, ObjectStoreError> {
                self.entries
                    .iter()
                    .filter(|(_, c)| *c > 0)
                    .map(|(v, _)| v)
                    .max()
                    .cloned()
                    .ok_or(ObjectStoreError::EmptyValueCountMap)
            }

            pub fn total(&self) -> u64 {
                self.entries.iter().map(|(_, c)| c).sum()
            }

            pub fn count(&self, value: impl Into<$key>) -> u64 {
                let value = value.into();
                self.entries
                    .iter()
                    .find(|(v, _)| *v == value)
                    .map_or(0, |(_, c)| *c)
            }

            pub fn is_empty(&self) -> bool {
                self.entries.is_empty()
            }

            pub fn clear(&mut self) {
                self.entries.clear();
            }

            /// Entries sorted by value.
            pub fn get_map(&self) -> Vec<($key, u64)> {
                let mut map = self.entries.clone();
                map.sort_by(|a, b| a.0.cmp(&b.0));
                map
            }
        }
    };
}

value_count_map!(
    /// Counts of integer policy values (priorities, ages, drive quotas).
    ValueCountMapU64,
    u64
);

value_count_map!(
    /// Counts of mount policy names.
    ValueCountMapString,
    String
);
