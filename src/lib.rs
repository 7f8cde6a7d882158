pub mod config;
pub mod error;
pub mod frame;
pub mod model;
pub mod parser;
pub mod replay;
pub mod slots;
pub mod storage;
pub mod timeline;

use std::fs::File;
use std::io::{self, BufRead, BufReader};
use std::path::Path;

use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use crate::config::BuildSettings;
use crate::error::TldmError;
use crate::parser::RecordReader;
use crate::storage::FrameSink;
use crate::timeline::{Survey, SurveyReport, TimelineBuilder, TimelineStats};

/// What a compile run produced
#[derive(Debug, Clone, PartialEq)]
pub struct BuildReport {
    pub survey: SurveyReport,
    pub slots: usize,
    pub timestamps: usize,
    pub timeline: TimelineStats,
}

/// Compile a location stream into keyframes and deltas.
///
/// `open` is called twice: the first pass fixes the slot table, first known
/// locations and timeline, the second emits frames. Both calls must yield the
/// same content.
pub fn compile<F, R, S>(mut open: F, sink: &mut S, settings: &BuildSettings) -> Result<BuildReport, TldmError>
where
    F: FnMut() -> io::Result<R>,
    R: BufRead,
    S: FrameSink,
{
    settings.validate()?;

    // --- FIRST PASS ---
    let Survey { slots, first_locations, timestamps, report } =
        Survey::scan(RecordReader::new(open()?, settings.timezone.clone()), settings)?;

    if timestamps.is_empty() {
        warn!("No valid locations in input, nothing to compile");
    }
    // Slots first: a refused slot table must leave the store untouched
    sink.put_slots(&slots)?;
    sink.put_timestamps(&timestamps)?;

    // --- SECOND PASS ---
    info!("Creating snapshots and deltas...");
    let mut timeline = TimelineBuilder::new(&slots, first_locations, settings, sink);
    timeline.run(RecordReader::new(open()?, settings.timezone.clone()))?;
    let stats = timeline.finish()?;
    sink.finish()?;

    info!("Wrote {} keyframes and {} deltas", stats.keyframes, stats.deltas);
    Ok(BuildReport {
        survey: report,
        slots: slots.len(),
        timestamps: timestamps.len(),
        timeline: stats,
    })
}

/// Install the fmt subscriber. `RUST_LOG` wins over the verbosity flag.
pub fn init_logging(verbosity: u8) {
    let default = match verbosity {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_level(true)
        .init();
}

/// [`compile`] reading a file from disk, once per pass.
pub fn compile_file<S: FrameSink>(path: &Path, sink: &mut S, settings: &BuildSettings) -> Result<BuildReport, TldmError> {
    compile(|| File::open(path).map(BufReader::new), sink, settings)
}
