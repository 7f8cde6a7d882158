use clap::ValueEnum;
use indexmap::IndexSet;

use crate::error::StoreError;
use crate::model::Slot;

/// Which entities are granted a slot during the first pass
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum SlotPolicy {
    /// Every id that appears on a well-formed line, valid fix or not
    #[default]
    AllIds,
    /// Only ids with at least one valid fix
    ValidOnly,
}

/// Collects ids in first-seen order while the input is scanned.
#[derive(Debug, Default)]
pub struct SlotAssigner {
    ids: IndexSet<String>,
}

impl SlotAssigner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn observe(&mut self, entity_id: &str) {
        if !self.ids.contains(entity_id) {
            self.ids.insert(entity_id.to_owned());
        }
    }

    pub fn finish(self) -> SlotTable {
        SlotTable { ids: self.ids }
    }
}

/// Frozen bijection between entity ids and dense slots `0..len`.
///
/// Every frame is only meaningful against the table it was written with, so
/// once persisted the table must not be recomputed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SlotTable {
    ids: IndexSet<String>,
}

impl SlotTable {
    /// Assign slots in the order ids first appear; repeats are ignored.
    pub fn assign<I, S>(ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut assigner = SlotAssigner::new();
        for id in ids {
            assigner.observe(id.as_ref());
        }
        assigner.finish()
    }

    /// Rebuild a persisted table from `(entity_id, slot)` rows in any order.
    pub fn from_pairs<I>(pairs: I) -> Result<Self, StoreError>
    where
        I: IntoIterator<Item = (String, Slot)>,
    {
        let mut rows: Vec<(String, Slot)> = pairs.into_iter().collect();
        rows.sort_by_key(|(_, slot)| *slot);

        let mut ids = IndexSet::with_capacity(rows.len());
        for (expected, (name, slot)) in rows.into_iter().enumerate() {
            if slot as usize != expected {
                return Err(StoreError::CorruptSlots(format!("expected slot {expected}, found {slot} for '{name}'")));
            }
            if !ids.insert(name.clone()) {
                return Err(StoreError::CorruptSlots(format!("entity '{name}' holds more than one slot")));
            }
        }
        Ok(Self { ids })
    }

    pub fn slot_of(&self, entity_id: &str) -> Option<Slot> {
        self.ids.get_index_of(entity_id).map(|i| i as Slot)
    }

    pub fn entity(&self, slot: Slot) -> Option<&str> {
        self.ids.get_index(slot as usize).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    /// `(slot, entity_id)` in ascending slot order
    pub fn iter(&self) -> impl DoubleEndedIterator<Item = (Slot, &str)> {
        self.ids.iter().enumerate().map(|(i, id)| (i as Slot, id.as_str()))
    }
}
