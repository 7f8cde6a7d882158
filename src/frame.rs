use clap::ValueEnum;

use crate::error::FrameError;
use crate::model::{DeltaEntry, Position, Slot, WorldState, DELTA_RECORD_SIZE, KEYFRAME_RECORD_SIZE};
use crate::slots::SlotTable;

/// How slots without a known position are represented in a keyframe
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum KeyframeLayout {
    /// Omit them; entry ordinal no longer equals slot once anything is missing
    #[default]
    Sparse,
    /// Write a NaN placeholder so entry ordinal always equals slot
    Padded,
}

/// `[lat f32][lon f32]` little-endian per entity in ascending slot order, 8 bytes each.
pub fn encode_keyframe(world: &WorldState, slots: &SlotTable, layout: KeyframeLayout) -> Vec<u8> {
    let mut frame = Vec::with_capacity(slots.len() * KEYFRAME_RECORD_SIZE);
    for (_slot, entity_id) in slots.iter() {
        let position = match (world.get(entity_id), layout) {
            (Some(position), _) => *position,
            (None, KeyframeLayout::Padded) => Position::PLACEHOLDER,
            (None, KeyframeLayout::Sparse) => continue,
        };
        frame.extend_from_slice(&position.lat.to_le_bytes());
        frame.extend_from_slice(&position.lon.to_le_bytes());
    }
    frame
}

/// Encode `(entity_id, position)` pairs in the order given, as
/// `[slot i32][lat f32][lon f32]` little-endian, 12 bytes each.
///
/// Fails on the first entity without a slot; nothing is returned in that case.
pub fn encode_delta<'a, I>(changes: I, slots: &SlotTable) -> Result<Vec<u8>, FrameError>
where
    I: IntoIterator<Item = (&'a str, &'a Position)>,
{
    let mut frame = Vec::new();
    for (entity_id, position) in changes {
        let slot = slots
            .slot_of(entity_id)
            .ok_or_else(|| FrameError::UnknownEntity(entity_id.to_string()))?;
        let wire_slot = i32::try_from(slot).map_err(|_| FrameError::SlotOverflow(slot))?;

        frame.extend_from_slice(&wire_slot.to_le_bytes());
        frame.extend_from_slice(&position.lat.to_le_bytes());
        frame.extend_from_slice(&position.lon.to_le_bytes());
    }
    Ok(frame)
}

pub fn decode_keyframe(bytes: &[u8]) -> Result<Vec<Position>, FrameError> {
    check_width(bytes, KEYFRAME_RECORD_SIZE)?;
    Ok(bytes
        .chunks_exact(KEYFRAME_RECORD_SIZE)
        .map(|chunk| Position::new(f32_at(chunk, 0), f32_at(chunk, 4)))
        .collect())
}

pub fn decode_delta(bytes: &[u8]) -> Result<Vec<DeltaEntry>, FrameError> {
    check_width(bytes, DELTA_RECORD_SIZE)?;
    bytes
        .chunks_exact(DELTA_RECORD_SIZE)
        .map(|chunk| {
            let raw = i32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
            let slot = Slot::try_from(raw).map_err(|_| FrameError::NegativeSlot(raw))?;
            Ok(DeltaEntry { slot, position: Position::new(f32_at(chunk, 4), f32_at(chunk, 8)) })
        })
        .collect()
}

fn check_width(bytes: &[u8], width: usize) -> Result<(), FrameError> {
    if bytes.len() % width != 0 {
        return Err(FrameError::TruncatedFrame { len: bytes.len(), width });
    }
    Ok(())
}

#[inline]
fn f32_at(chunk: &[u8], at: usize) -> f32 {
    f32::from_le_bytes([chunk[at], chunk[at + 1], chunk[at + 2], chunk[at + 3]])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Batch;

    fn world(entries: &[(&str, f32, f32)]) -> WorldState {
        let mut world = WorldState::new();
        for (id, lat, lon) in entries {
            world.update(id, Position::new(*lat, *lon));
        }
        world
    }

    #[test]
    fn keyframe_bytes_are_little_endian_pairs() {
        let slots = SlotTable::assign(["A"]);
        let frame = encode_keyframe(&world(&[("A", 10.0, 20.0)]), &slots, KeyframeLayout::Sparse);

        let mut expected = Vec::new();
        expected.extend_from_slice(&10.0f32.to_le_bytes());
        expected.extend_from_slice(&20.0f32.to_le_bytes());
        assert_eq!(frame, expected);
    }

    #[test]
    fn keyframe_follows_slot_order_and_skips_unknown() {
        let slots = SlotTable::assign(["C", "A", "B"]);
        let state = world(&[("A", 1.0, 2.0), ("C", 5.0, 6.0)]);

        let frame = encode_keyframe(&state, &slots, KeyframeLayout::Sparse);
        assert_eq!(frame.len(), 2 * KEYFRAME_RECORD_SIZE);
        assert_eq!(decode_keyframe(&frame).unwrap(), vec![Position::new(5.0, 6.0), Position::new(1.0, 2.0)]);
    }

    #[test]
    fn padded_keyframe_reserves_every_slot() {
        let slots = SlotTable::assign(["C", "A", "B"]);
        let state = world(&[("A", 1.0, 2.0)]);

        let decoded = decode_keyframe(&encode_keyframe(&state, &slots, KeyframeLayout::Padded)).unwrap();
        assert_eq!(decoded.len(), 3);
        assert!(decoded[0].is_placeholder());
        assert_eq!(decoded[1], Position::new(1.0, 2.0));
        assert!(decoded[2].is_placeholder());
    }

    #[test]
    fn delta_layout() {
        let slots = SlotTable::assign(["A", "B"]);
        let mut batch = Batch::new();
        batch.record("B", Position::new(11.0, 21.0));

        let frame = encode_delta(batch.iter(), &slots).unwrap();
        assert_eq!(frame.len(), DELTA_RECORD_SIZE);
        assert_eq!(&frame[0..4], &1i32.to_le_bytes());
        assert_eq!(&frame[4..8], &11.0f32.to_le_bytes());
        assert_eq!(&frame[8..12], &21.0f32.to_le_bytes());
    }

    #[test]
    fn delta_preserves_batch_order() {
        let slots = SlotTable::assign(["A", "B", "C"]);
        let mut batch = Batch::new();
        batch.record("C", Position::new(3.0, 3.0));
        batch.record("A", Position::new(1.0, 1.0));
        batch.record("C", Position::new(4.0, 4.0));

        let decoded = decode_delta(&encode_delta(batch.iter(), &slots).unwrap()).unwrap();
        assert_eq!(
            decoded,
            vec![
                DeltaEntry { slot: 2, position: Position::new(4.0, 4.0) },
                DeltaEntry { slot: 0, position: Position::new(1.0, 1.0) },
            ]
        );
    }

    #[test]
    fn unknown_entity_is_fatal() {
        let slots = SlotTable::assign(["A"]);
        let a = Position::new(1.0, 1.0);
        let ghost = Position::new(2.0, 2.0);
        let err = encode_delta([("A", &a), ("ghost", &ghost)], &slots).unwrap_err();
        assert_eq!(err, FrameError::UnknownEntity("ghost".into()));
    }

    #[test]
    fn truncated_frames() {
        assert_eq!(decode_keyframe(&[0u8; 12]), Err(FrameError::TruncatedFrame { len: 12, width: 8 }));
        assert_eq!(decode_delta(&[0u8; 16]), Err(FrameError::TruncatedFrame { len: 16, width: 12 }));
        assert_eq!(decode_keyframe(&[]), Ok(vec![]));
        assert_eq!(decode_delta(&[]), Ok(vec![]));
    }

    #[test]
    fn negative_slot_rejected() {
        let mut frame = (-1i32).to_le_bytes().to_vec();
        frame.extend_from_slice(&[0u8; 8]);
        assert_eq!(decode_delta(&frame), Err(FrameError::NegativeSlot(-1)));
    }
}
