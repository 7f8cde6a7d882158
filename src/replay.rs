use serde::Serialize;
use tracing::debug;

use crate::error::ReplayError;
use crate::frame::{decode_delta, decode_keyframe};
use crate::model::{Position, Slot, Timestamp};
use crate::slots::SlotTable;
use crate::storage::FrameSource;

/// Full state at one instant, indexed by slot
#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct WorldSnapshot {
    pub timestamp: Timestamp,
    /// Keyframe the state was rebuilt from
    pub keyframe: Timestamp,
    pub deltas_applied: usize,
    #[serde(skip)]
    pub positions: Vec<Option<Position>>,
}

impl WorldSnapshot {
    pub fn position(&self, slot: Slot) -> Option<Position> {
        self.positions.get(slot as usize).copied().flatten()
    }
}

#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct EntityPosition {
    pub entity_id: String,
    pub slot: Slot,
    pub lat: f32,
    pub lon: f32,
}

/// Rebuilds "where was everything at T" from a keyframe plus the deltas after it.
pub struct Replay<S> {
    source: S,
    slots: SlotTable,
    timestamps: Vec<Timestamp>,
}

impl<S: FrameSource> Replay<S> {
    pub fn open(source: S) -> Result<Self, ReplayError> {
        let slots = source.slots()?;
        let timestamps = source.timestamps()?;
        debug!("Opened replay with {} slots, {} timestamps", slots.len(), timestamps.len());
        Ok(Self { source, slots, timestamps })
    }

    pub fn slots(&self) -> &SlotTable {
        &self.slots
    }

    pub fn timestamps(&self) -> &[Timestamp] {
        &self.timestamps
    }

    pub fn state_at(&self, at: Timestamp) -> Result<WorldSnapshot, ReplayError> {
        let (keyframe, frame) = self
            .source
            .keyframe_at_or_before(at)?
            .ok_or(ReplayError::NoKeyframe(at))?;
        let mut positions = self.keyframe_positions(keyframe, &frame)?;

        // The keyframe at `k` predates the batch stored under `k`, so that delta applies too
        let deltas = self.source.deltas_in(keyframe, at)?;
        for (timestamp, bytes) in &deltas {
            let entries = decode_delta(bytes).map_err(|source| ReplayError::Frame { timestamp: *timestamp, source })?;
            for entry in entries {
                match positions.get_mut(entry.slot as usize) {
                    Some(known) => *known = Some(entry.position),
                    None => {
                        return Err(ReplayError::UnknownSlot {
                            timestamp: *timestamp,
                            slot: entry.slot,
                            slots: self.slots.len(),
                        })
                    }
                }
            }
        }

        Ok(WorldSnapshot { timestamp: at, keyframe, deltas_applied: deltas.len(), positions })
    }

    /// Known positions of a snapshot, ascending by slot
    pub fn entities(&self, snapshot: &WorldSnapshot) -> Vec<EntityPosition> {
        self.slots
            .iter()
            .filter_map(|(slot, entity_id)| {
                snapshot.position(slot).map(|p| EntityPosition {
                    entity_id: entity_id.to_string(),
                    slot,
                    lat: p.lat,
                    lon: p.lon,
                })
            })
            .collect()
    }

    fn keyframe_positions(&self, timestamp: Timestamp, frame: &[u8]) -> Result<Vec<Option<Position>>, ReplayError> {
        let decoded = decode_keyframe(frame).map_err(|source| ReplayError::Frame { timestamp, source })?;
        // Entries map to slots by ordinal, which only holds if none were omitted
        if decoded.len() != self.slots.len() {
            return Err(ReplayError::AmbiguousKeyframe {
                timestamp,
                entries: decoded.len(),
                slots: self.slots.len(),
            });
        }
        Ok(decoded.into_iter().map(|p| (!p.is_placeholder()).then_some(p)).collect())
    }
}
