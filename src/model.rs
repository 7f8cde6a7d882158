use std::collections::HashMap;

use indexmap::IndexMap;
use serde::Serialize;

/// Seconds since the Unix epoch
pub type Timestamp = i64;

/// Dense numeric stand-in for an entity id inside binary frames
pub type Slot = u32;

// Record widths of the two frame layouts
pub const KEYFRAME_RECORD_SIZE: usize = 8; // lat f32, lon f32
pub const DELTA_RECORD_SIZE: usize = 12; // slot i32, lat f32, lon f32

/// A single fix, stored exactly as parsed (IEEE-754 single precision)
#[derive(Serialize, Debug, Clone, Copy, PartialEq)]
pub struct Position {
    pub lat: f32,
    pub lon: f32,
}

impl Position {
    pub const fn new(lat: f32, lon: f32) -> Self {
        Self { lat, lon }
    }

    /// Filler written for slots without a known position in padded keyframes
    pub const PLACEHOLDER: Position = Position { lat: f32::NAN, lon: f32::NAN };

    pub fn is_placeholder(&self) -> bool {
        self.lat.is_nan() && self.lon.is_nan()
    }
}

/// One parsed input line
#[derive(Debug, Clone, PartialEq)]
pub struct LocationRecord {
    pub timestamp: Timestamp,
    pub entity_id: String,
    pub position: Position,
}

impl LocationRecord {
    pub fn new(timestamp: Timestamp, entity_id: impl Into<String>, lat: f32, lon: f32) -> Self {
        Self {
            timestamp,
            entity_id: entity_id.into(),
            position: Position::new(lat, lon),
        }
    }
}

/// Latest valid position of every entity seen so far
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WorldState {
    positions: HashMap<String, Position>,
}

impl WorldState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn update(&mut self, entity_id: &str, position: Position) {
        match self.positions.get_mut(entity_id) {
            Some(known) => *known = position,
            None => {
                self.positions.insert(entity_id.to_owned(), position);
            }
        }
    }

    /// Record `position` only if the entity has none yet
    pub fn insert_first(&mut self, entity_id: &str, position: Position) {
        if !self.positions.contains_key(entity_id) {
            self.positions.insert(entity_id.to_owned(), position);
        }
    }

    pub fn merge(&mut self, batch: &Batch) {
        for (entity_id, position) in batch.iter() {
            self.update(entity_id, *position);
        }
    }

    pub fn get(&self, entity_id: &str) -> Option<&Position> {
        self.positions.get(entity_id)
    }

    pub fn len(&self) -> usize {
        self.positions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }
}

/// Entities reported within one timestamp, in order of first appearance.
/// A repeated entity keeps its place and takes the newer position.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Batch {
    changes: IndexMap<String, Position>,
}

impl Batch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, entity_id: &str, position: Position) {
        match self.changes.get_mut(entity_id) {
            Some(known) => *known = position,
            None => {
                self.changes.insert(entity_id.to_owned(), position);
            }
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Position)> {
        self.changes.iter().map(|(id, p)| (id.as_str(), p))
    }

    pub fn len(&self) -> usize {
        self.changes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }

    pub fn clear(&mut self) {
        self.changes.clear();
    }
}

/// A decoded delta record
#[derive(Serialize, Debug, Clone, Copy, PartialEq)]
pub struct DeltaEntry {
    pub slot: Slot,
    pub position: Position,
}
