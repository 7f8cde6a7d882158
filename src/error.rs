use thiserror::Error;

use crate::model::{Slot, Timestamp};

/// Why a single input line could not be turned into a record
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ParseError {
    #[error("expected 4 comma-separated fields, found {found}")]
    FieldCount { found: usize },
    #[error("invalid timestamp '{text}': {reason}")]
    Timestamp { text: String, reason: String },
    #[error("invalid {field} '{text}'")]
    Coordinate { field: &'static str, text: String },
    #[error("line is not valid UTF-8: {0}")]
    Encoding(String),
}

/// A parse failure tied to its place in the input
#[derive(Error, Debug, Clone, PartialEq)]
#[error("{error} when processing line {line} ({content})")]
pub struct LineError {
    /// 1-based line number
    pub line: usize,
    pub content: String,
    pub error: ParseError,
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum FrameError {
    #[error("entity '{0}' has no slot assigned")]
    UnknownEntity(String),
    #[error("frame of {len} bytes is not a multiple of the {width}-byte record width")]
    TruncatedFrame { len: usize, width: usize },
    #[error("slot {0} does not fit the 32-bit slot field")]
    SlotOverflow(Slot),
    #[error("negative slot {0} in delta frame")]
    NegativeSlot(i32),
}

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("sqlite error `{0}`")]
    Sqlite(#[from] rusqlite::Error),
    #[error("entity '{name}' is stored under slot {stored}, refusing to reassign it to slot {assigned}")]
    SlotConflict { name: String, stored: Slot, assigned: Slot },
    #[error("slot {slot} already belongs to '{holder}', refusing to give it to '{claimant}'")]
    SlotTaken { slot: Slot, holder: String, claimant: String },
    #[error("stored slot table is not a dense bijection: {0}")]
    CorruptSlots(String),
}

#[derive(Error, Debug)]
pub enum ReplayError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("frame at {timestamp}: {source}")]
    Frame { timestamp: Timestamp, source: FrameError },
    #[error("no keyframe at or before {0}")]
    NoKeyframe(Timestamp),
    #[error("keyframe at {timestamp} lists {entries} positions for {slots} slots, cannot map them to slots")]
    AmbiguousKeyframe { timestamp: Timestamp, entries: usize, slots: usize },
    #[error("delta at {timestamp} references slot {slot}, table has {slots} slots")]
    UnknownSlot { timestamp: Timestamp, slot: Slot, slots: usize },
}

/// Fatal errors of a compile run
#[derive(Error, Debug)]
pub enum TldmError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Frame(#[from] FrameError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("invalid configuration: {0}")]
    Config(String),
    #[error("timeline already flushed, no further records accepted")]
    TimelineClosed,
}
