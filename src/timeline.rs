use std::collections::BTreeSet;
use std::io;

use tracing::{debug, enabled, info, trace, warn, Level};

use crate::config::BuildSettings;
use crate::error::{LineError, TldmError};
use crate::frame::{decode_delta, decode_keyframe, encode_delta, encode_keyframe};
use crate::model::{Batch, LocationRecord, Timestamp, WorldState};
use crate::parser::ParsedLine;
use crate::slots::{SlotAssigner, SlotPolicy, SlotTable};
use crate::storage::FrameSink;

/// Counters gathered during the first pass
#[derive(Debug, Default, Clone, PartialEq)]
pub struct SurveyReport {
    pub lines: usize,
    /// Well-formed lines, valid fix or not
    pub records: usize,
    /// Well-formed lines dropped for carrying no usable fix
    pub invalid_records: usize,
    /// Records whose timestamp is older than the one before
    pub out_of_order: usize,
    pub line_errors: Vec<LineError>,
}

/// Result of the first pass: everything that must be known before the first frame.
#[derive(Debug, Default, Clone)]
pub struct Survey {
    pub slots: SlotTable,
    /// First valid position of every entity, seeds the initial keyframe
    pub first_locations: WorldState,
    /// Distinct timestamps of valid records, ascending
    pub timestamps: Vec<Timestamp>,
    pub report: SurveyReport,
}

impl Survey {
    pub fn scan<I>(lines: I, settings: &BuildSettings) -> io::Result<Self>
    where
        I: IntoIterator<Item = io::Result<ParsedLine>>,
    {
        info!("Finding first locations...");

        let mut assigner = SlotAssigner::new();
        let mut first_locations = WorldState::new();
        let mut timestamps = BTreeSet::new();
        let mut report = SurveyReport::default();
        let mut last_seen: Option<Timestamp> = None;

        for line in lines {
            report.lines += 1;
            let record = match line? {
                ParsedLine::Record(record) => record,
                ParsedLine::Malformed(err) => {
                    warn!("{}", err);
                    report.line_errors.push(err);
                    continue;
                }
            };
            report.records += 1;

            if settings.slot_policy == SlotPolicy::AllIds {
                assigner.observe(&record.entity_id);
            }
            if !settings.validity.is_valid(&record.position) {
                report.invalid_records += 1;
                continue;
            }
            if settings.slot_policy == SlotPolicy::ValidOnly {
                assigner.observe(&record.entity_id);
            }

            if last_seen.is_some_and(|last| record.timestamp < last) {
                report.out_of_order += 1;
            }
            last_seen = Some(record.timestamp);

            first_locations.insert_first(&record.entity_id, record.position);
            timestamps.insert(record.timestamp);
        }

        if report.out_of_order > 0 {
            warn!("{} records are older than their predecessor, input is not sorted by timestamp", report.out_of_order);
        }
        info!("Found {} locations", first_locations.len());

        Ok(Self {
            slots: assigner.finish(),
            first_locations,
            timestamps: timestamps.into_iter().collect(),
            report,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    AwaitingFirstTimestamp,
    Accumulating(Timestamp),
    Done,
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct TimelineStats {
    pub records: usize,
    pub keyframes: usize,
    pub deltas: usize,
}

/// Second pass: turns timestamp-ordered records into keyframes and deltas.
///
/// A keyframe at `t` holds the state *before* the batch at `t` is applied;
/// the delta stored under `t` carries that batch.
pub struct TimelineBuilder<'a, S: FrameSink> {
    slots: &'a SlotTable,
    settings: &'a BuildSettings,
    sink: &'a mut S,
    world: WorldState,
    batch: Batch,
    phase: Phase,
    stats: TimelineStats,
}

impl<'a, S: FrameSink> TimelineBuilder<'a, S> {
    pub fn new(slots: &'a SlotTable, initial: WorldState, settings: &'a BuildSettings, sink: &'a mut S) -> Self {
        Self {
            slots,
            settings,
            sink,
            world: initial,
            batch: Batch::new(),
            phase: Phase::AwaitingFirstTimestamp,
            stats: TimelineStats::default(),
        }
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn world(&self) -> &WorldState {
        &self.world
    }

    /// Feed every record of a line stream; malformed lines are skipped
    /// silently since the first pass already reported them.
    pub fn run<I>(&mut self, lines: I) -> Result<(), TldmError>
    where
        I: IntoIterator<Item = io::Result<ParsedLine>>,
    {
        for line in lines {
            if let ParsedLine::Record(record) = line? {
                self.push(&record)?;
            }
        }
        Ok(())
    }

    pub fn push(&mut self, record: &LocationRecord) -> Result<(), TldmError> {
        if !self.settings.validity.is_valid(&record.position) {
            return Ok(());
        }

        let ts = record.timestamp;
        match self.phase {
            Phase::Done => return Err(TldmError::TimelineClosed),
            Phase::AwaitingFirstTimestamp => {
                self.emit_keyframe(ts)?;
                self.phase = Phase::Accumulating(ts);
            }
            Phase::Accumulating(current) if current != ts => {
                self.close_batch(current)?;
                if self.settings.is_keyframe_boundary(ts) {
                    self.emit_keyframe(ts)?;
                }
                self.phase = Phase::Accumulating(ts);
            }
            Phase::Accumulating(_) => {}
        }

        self.batch.record(&record.entity_id, record.position);
        self.world.update(&record.entity_id, record.position);
        self.stats.records += 1;
        Ok(())
    }

    /// Flush the pending batch, even off a keyframe boundary.
    pub fn finish(&mut self) -> Result<TimelineStats, TldmError> {
        if let Phase::Accumulating(current) = self.phase {
            self.close_batch(current)?;
        }
        self.phase = Phase::Done;
        Ok(self.stats.clone())
    }

    fn close_batch(&mut self, timestamp: Timestamp) -> Result<(), TldmError> {
        let frame = encode_delta(self.batch.iter(), self.slots)?;
        if enabled!(Level::TRACE) {
            for entry in decode_delta(&frame)? {
                trace!(timestamp, slot = entry.slot, lat = entry.position.lat, lon = entry.position.lon, "delta");
            }
        }
        self.sink.put_delta(timestamp, &frame)?;

        self.world.merge(&self.batch);
        self.batch.clear();
        self.stats.deltas += 1;
        Ok(())
    }

    fn emit_keyframe(&mut self, timestamp: Timestamp) -> Result<(), TldmError> {
        let frame = encode_keyframe(&self.world, self.slots, self.settings.layout);
        if enabled!(Level::TRACE) {
            for position in decode_keyframe(&frame)? {
                trace!(timestamp, lat = position.lat, lon = position.lon, "snapshot");
            }
        }
        debug!(timestamp, bytes = frame.len(), "keyframe");
        self.sink.put_keyframe(timestamp, &frame)?;
        self.stats.keyframes += 1;
        Ok(())
    }
}
