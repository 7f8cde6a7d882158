use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::Path;

use rusqlite::{params, Connection, OpenFlags, OptionalExtension};
use tracing::{debug, info};

use crate::error::StoreError;
use crate::model::{Slot, Timestamp};
use crate::slots::SlotTable;

// Same tables the viewer reads
const SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS slots (name TEXT PRIMARY KEY, slot INTEGER);
    CREATE TABLE IF NOT EXISTS timestamps (timestamp INTEGER PRIMARY KEY);
    CREATE TABLE IF NOT EXISTS snapshot (timestamp INTEGER PRIMARY KEY, frame BLOB NOT NULL);
    CREATE TABLE IF NOT EXISTS delta (timestamp INTEGER PRIMARY KEY, frame BLOB NOT NULL);
";

/// Write side of the frame store. Every `put_*` is an upsert keyed by its
/// primary key; writing the same key twice replaces the earlier value.
pub trait FrameSink {
    fn put_slots(&mut self, slots: &SlotTable) -> Result<(), StoreError>;
    fn put_timestamps(&mut self, timestamps: &[Timestamp]) -> Result<(), StoreError>;
    /// Durable once this returns, together with every delta written before it.
    fn put_keyframe(&mut self, timestamp: Timestamp, frame: &[u8]) -> Result<(), StoreError>;
    /// May stay buffered until the next keyframe or [`FrameSink::finish`].
    fn put_delta(&mut self, timestamp: Timestamp, frame: &[u8]) -> Result<(), StoreError>;
    /// Flush everything still pending.
    fn finish(&mut self) -> Result<(), StoreError>;
}

/// Read side of the frame store
pub trait FrameSource {
    fn slots(&self) -> Result<SlotTable, StoreError>;
    /// Ascending
    fn timestamps(&self) -> Result<Vec<Timestamp>, StoreError>;
    /// Ascending
    fn keyframe_timestamps(&self) -> Result<Vec<Timestamp>, StoreError>;
    fn keyframe(&self, timestamp: Timestamp) -> Result<Option<Vec<u8>>, StoreError>;
    fn keyframe_at_or_before(&self, timestamp: Timestamp) -> Result<Option<(Timestamp, Vec<u8>)>, StoreError>;
    fn delta(&self, timestamp: Timestamp) -> Result<Option<Vec<u8>>, StoreError>;
    /// Deltas with `from <= timestamp <= to`, ascending
    fn deltas_in(&self, from: Timestamp, to: Timestamp) -> Result<Vec<(Timestamp, Vec<u8>)>, StoreError>;
}

/// Refuse to move an already persisted entity to another slot, or to hand a
/// persisted slot to a different entity.
fn check_slot_compat<'a, I>(stored: I, slots: &SlotTable) -> Result<(), StoreError>
where
    I: IntoIterator<Item = (&'a str, Slot)>,
{
    let mut by_name = HashMap::new();
    let mut by_slot = HashMap::new();
    for (name, slot) in stored {
        by_name.insert(name, slot);
        by_slot.insert(slot, name);
    }

    for (slot, name) in slots.iter() {
        if let Some(&stored) = by_name.get(name) {
            if stored != slot {
                return Err(StoreError::SlotConflict { name: name.to_string(), stored, assigned: slot });
            }
        }
        if let Some(&holder) = by_slot.get(&slot) {
            if holder != name {
                return Err(StoreError::SlotTaken { slot, holder: holder.to_string(), claimant: name.to_string() });
            }
        }
    }
    Ok(())
}

/// SQLite-backed store.
///
/// Deltas are written inside an open transaction that is committed on every
/// keyframe and on `finish`, which keeps write frequency down on long runs.
pub struct SqliteStore {
    conn: Connection,
    in_transaction: bool,
}

impl SqliteStore {
    /// Open (or create) a database for writing.
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        let conn = Connection::open(path)?;
        conn.execute_batch(SCHEMA)?;
        info!("Opened frame store at {}", path.display());
        Ok(Self { conn, in_transaction: false })
    }

    pub fn open_read_only(path: &Path) -> Result<Self, StoreError> {
        let conn = Connection::open_with_flags(path, OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX)?;
        Ok(Self { conn, in_transaction: false })
    }

    pub fn open_in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self { conn, in_transaction: false })
    }

    fn begin(&mut self) -> Result<(), StoreError> {
        if !self.in_transaction {
            self.conn.execute_batch("BEGIN")?;
            self.in_transaction = true;
        }
        Ok(())
    }

    fn commit(&mut self) -> Result<(), StoreError> {
        if self.in_transaction {
            self.conn.execute_batch("COMMIT")?;
            self.in_transaction = false;
        }
        Ok(())
    }

    fn stored_slots(&self) -> Result<Vec<(String, Slot)>, StoreError> {
        let mut stmt = self.conn.prepare_cached("SELECT name, slot FROM slots")?;
        let rows = stmt.query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, Slot>(1)?)))?;
        Ok(rows.collect::<Result<_, _>>()?)
    }

    fn frame_at(&self, sql: &str, timestamp: Timestamp) -> Result<Option<Vec<u8>>, StoreError> {
        Ok(self
            .conn
            .prepare_cached(sql)?
            .query_row([timestamp], |row| row.get::<_, Vec<u8>>(0))
            .optional()?)
    }
}

impl FrameSink for SqliteStore {
    fn put_slots(&mut self, slots: &SlotTable) -> Result<(), StoreError> {
        let stored = self.stored_slots()?;
        check_slot_compat(stored.iter().map(|(n, s)| (n.as_str(), *s)), slots)?;

        self.begin()?;
        {
            let mut stmt = self.conn.prepare_cached("REPLACE INTO slots (name, slot) VALUES (?1, ?2)")?;
            for (slot, name) in slots.iter() {
                stmt.execute(params![name, slot])?;
            }
        }
        self.commit()?;
        info!("Inserted {} slots into DB", slots.len());
        Ok(())
    }

    fn put_timestamps(&mut self, timestamps: &[Timestamp]) -> Result<(), StoreError> {
        self.begin()?;
        {
            let mut stmt = self.conn.prepare_cached("REPLACE INTO timestamps (timestamp) VALUES (?1)")?;
            for ts in timestamps {
                stmt.execute([ts])?;
            }
        }
        self.commit()?;
        info!("Inserted {} timestamps into DB", timestamps.len());
        Ok(())
    }

    fn put_keyframe(&mut self, timestamp: Timestamp, frame: &[u8]) -> Result<(), StoreError> {
        self.begin()?;
        self.conn
            .prepare_cached("REPLACE INTO snapshot (timestamp, frame) VALUES (?1, ?2)")?
            .execute(params![timestamp, frame])?;
        self.commit()?;
        info!("Inserted snapshot at {} into DB", timestamp);
        Ok(())
    }

    fn put_delta(&mut self, timestamp: Timestamp, frame: &[u8]) -> Result<(), StoreError> {
        self.begin()?;
        self.conn
            .prepare_cached("REPLACE INTO delta (timestamp, frame) VALUES (?1, ?2)")?
            .execute(params![timestamp, frame])?;
        debug!("Inserted delta at {} into DB", timestamp);
        Ok(())
    }

    fn finish(&mut self) -> Result<(), StoreError> {
        self.commit()
    }
}

impl FrameSource for SqliteStore {
    fn slots(&self) -> Result<SlotTable, StoreError> {
        SlotTable::from_pairs(self.stored_slots()?)
    }

    fn timestamps(&self) -> Result<Vec<Timestamp>, StoreError> {
        let mut stmt = self.conn.prepare_cached("SELECT timestamp FROM timestamps ORDER BY timestamp")?;
        let rows = stmt.query_map([], |row| row.get(0))?;
        Ok(rows.collect::<Result<_, _>>()?)
    }

    fn keyframe_timestamps(&self) -> Result<Vec<Timestamp>, StoreError> {
        let mut stmt = self.conn.prepare_cached("SELECT timestamp FROM snapshot ORDER BY timestamp")?;
        let rows = stmt.query_map([], |row| row.get(0))?;
        Ok(rows.collect::<Result<_, _>>()?)
    }

    fn keyframe(&self, timestamp: Timestamp) -> Result<Option<Vec<u8>>, StoreError> {
        self.frame_at("SELECT frame FROM snapshot WHERE timestamp = ?1", timestamp)
    }

    fn keyframe_at_or_before(&self, timestamp: Timestamp) -> Result<Option<(Timestamp, Vec<u8>)>, StoreError> {
        Ok(self
            .conn
            .prepare_cached(
                "SELECT timestamp, frame FROM snapshot WHERE timestamp <= ?1 ORDER BY timestamp DESC LIMIT 1",
            )?
            .query_row([timestamp], |row| Ok((row.get(0)?, row.get(1)?)))
            .optional()?)
    }

    fn delta(&self, timestamp: Timestamp) -> Result<Option<Vec<u8>>, StoreError> {
        self.frame_at("SELECT frame FROM delta WHERE timestamp = ?1", timestamp)
    }

    fn deltas_in(&self, from: Timestamp, to: Timestamp) -> Result<Vec<(Timestamp, Vec<u8>)>, StoreError> {
        let mut stmt = self
            .conn
            .prepare_cached("SELECT timestamp, frame FROM delta WHERE timestamp BETWEEN ?1 AND ?2 ORDER BY timestamp")?;
        let rows = stmt.query_map([from, to], |row| Ok((row.get(0)?, row.get(1)?)))?;
        Ok(rows.collect::<Result<_, _>>()?)
    }
}

/// In-memory store with the same commit cadence as [`SqliteStore`]:
/// deltas only become visible to readers after a keyframe or `finish`.
#[derive(Debug, Default)]
pub struct MemoryStore {
    slots: BTreeMap<String, Slot>,
    timestamps: BTreeSet<Timestamp>,
    keyframes: BTreeMap<Timestamp, Vec<u8>>,
    deltas: BTreeMap<Timestamp, Vec<u8>>,
    pending: BTreeMap<Timestamp, Vec<u8>>,
    commits: usize,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Deltas written but not yet committed
    pub fn pending_deltas(&self) -> usize {
        self.pending.len()
    }

    pub fn commits(&self) -> usize {
        self.commits
    }

    fn commit(&mut self) {
        self.deltas.append(&mut self.pending);
        self.commits += 1;
    }
}

impl FrameSink for MemoryStore {
    fn put_slots(&mut self, slots: &SlotTable) -> Result<(), StoreError> {
        check_slot_compat(self.slots.iter().map(|(n, s)| (n.as_str(), *s)), slots)?;
        for (slot, name) in slots.iter() {
            self.slots.insert(name.to_string(), slot);
        }
        self.commit();
        Ok(())
    }

    fn put_timestamps(&mut self, timestamps: &[Timestamp]) -> Result<(), StoreError> {
        self.timestamps.extend(timestamps.iter().copied());
        self.commit();
        Ok(())
    }

    fn put_keyframe(&mut self, timestamp: Timestamp, frame: &[u8]) -> Result<(), StoreError> {
        self.keyframes.insert(timestamp, frame.to_vec());
        self.commit();
        Ok(())
    }

    fn put_delta(&mut self, timestamp: Timestamp, frame: &[u8]) -> Result<(), StoreError> {
        self.pending.insert(timestamp, frame.to_vec());
        Ok(())
    }

    fn finish(&mut self) -> Result<(), StoreError> {
        self.commit();
        Ok(())
    }
}

impl FrameSource for MemoryStore {
    fn slots(&self) -> Result<SlotTable, StoreError> {
        SlotTable::from_pairs(self.slots.iter().map(|(n, s)| (n.clone(), *s)))
    }

    fn timestamps(&self) -> Result<Vec<Timestamp>, StoreError> {
        Ok(self.timestamps.iter().copied().collect())
    }

    fn keyframe_timestamps(&self) -> Result<Vec<Timestamp>, StoreError> {
        Ok(self.keyframes.keys().copied().collect())
    }

    fn keyframe(&self, timestamp: Timestamp) -> Result<Option<Vec<u8>>, StoreError> {
        Ok(self.keyframes.get(&timestamp).cloned())
    }

    fn keyframe_at_or_before(&self, timestamp: Timestamp) -> Result<Option<(Timestamp, Vec<u8>)>, StoreError> {
        Ok(self.keyframes.range(..=timestamp).next_back().map(|(ts, frame)| (*ts, frame.clone())))
    }

    fn delta(&self, timestamp: Timestamp) -> Result<Option<Vec<u8>>, StoreError> {
        Ok(self.deltas.get(&timestamp).cloned())
    }

    fn deltas_in(&self, from: Timestamp, to: Timestamp) -> Result<Vec<(Timestamp, Vec<u8>)>, StoreError> {
        if from > to {
            return Ok(Vec::new());
        }
        Ok(self.deltas.range(from..=to).map(|(ts, frame)| (*ts, frame.clone())).collect())
    }
}
