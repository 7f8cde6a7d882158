use std::error::Error;
use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use serde::Serialize;

use tldm::config;
use tldm::error::ReplayError;
use tldm::frame::{decode_delta, decode_keyframe};
use tldm::model::Timestamp;
use tldm::parser::parse_timestamp;
use tldm::replay::{EntityPosition, Replay, WorldSnapshot};
use tldm::storage::{FrameSource, SqliteStore};

/// Inspect a compiled frame database
#[derive(Parser, Debug)]
#[clap(author, version, about, long_about = None)]
struct Args {
    /// Database written by `tldm`
    database: PathBuf,

    /// Zone used to read datetimes given on the command line
    #[clap(long, default_value = "UTC")]
    timezone: String,

    #[clap(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[clap(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List the timeline (or only keyframe timestamps)
    Timestamps {
        #[clap(long)]
        keyframes: bool,
    },
    /// Dump the entity -> slot table
    Slots,
    /// Rebuild every entity's position at a moment (Unix seconds or `YYYY-MM-DD HH:MM:SS`)
    State {
        #[clap(long)]
        at: String,
    },
    /// Decode a single stored frame
    Frame {
        #[clap(long, conflicts_with = "delta", required_unless_present = "delta")]
        keyframe: Option<Timestamp>,
        #[clap(long)]
        delta: Option<Timestamp>,
    },
}

#[derive(Serialize)]
struct StateView<'a> {
    #[serde(flatten)]
    snapshot: &'a WorldSnapshot,
    entities: Vec<EntityPosition>,
}

#[derive(Serialize)]
struct SlotView<'a> {
    slot: u32,
    entity_id: &'a str,
}

fn main() -> ExitCode {
    let args = Args::parse();
    tldm::init_logging(args.verbose);

    match execute(&args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("[tldm-inspect] {}", e);
            ExitCode::FAILURE
        }
    }
}

fn execute(args: &Args) -> Result<(), Box<dyn Error>> {
    let store = SqliteStore::open_read_only(&args.database)?;

    match &args.command {
        Command::Timestamps { keyframes } => {
            let timestamps = if *keyframes { store.keyframe_timestamps()? } else { store.timestamps()? };
            for ts in timestamps {
                println!("{}", ts);
            }
        }
        Command::Slots => {
            let slots = store.slots()?;
            let view: Vec<SlotView> = slots.iter().map(|(slot, entity_id)| SlotView { slot, entity_id }).collect();
            println!("{}", serde_json::to_string_pretty(&view)?);
        }
        Command::State { at } => {
            let at = resolve_moment(at, &args.timezone)?;
            let replay = Replay::open(store)?;
            let snapshot = replay.state_at(at).map_err(explain)?;
            let view = StateView { entities: replay.entities(&snapshot), snapshot: &snapshot };
            println!("{}", serde_json::to_string_pretty(&view)?);
        }
        Command::Frame { keyframe: Some(ts), .. } => {
            let bytes = store.keyframe(*ts)?.ok_or_else(|| format!("no keyframe at {}", ts))?;
            println!("{}", serde_json::to_string_pretty(&decode_keyframe(&bytes)?)?);
        }
        Command::Frame { delta: Some(ts), .. } => {
            let bytes = store.delta(*ts)?.ok_or_else(|| format!("no delta at {}", ts))?;
            println!("{}", serde_json::to_string_pretty(&decode_delta(&bytes)?)?);
        }
        Command::Frame { .. } => return Err("pass --keyframe or --delta".into()),
    }
    Ok(())
}

fn resolve_moment(text: &str, timezone: &str) -> Result<Timestamp, Box<dyn Error>> {
    if let Ok(seconds) = text.trim().parse::<Timestamp>() {
        return Ok(seconds);
    }
    let tz = config::resolve_timezone(timezone)?;
    Ok(parse_timestamp(text, &tz)?)
}

/// Point at the build options that make every slot replayable
fn explain(err: ReplayError) -> Box<dyn Error> {
    match err {
        ReplayError::AmbiguousKeyframe { .. } => format!(
            "{}\nhint: recompile with `tldm --layout padded` (or `--slot-policy valid-only`) so every slot has a keyframe entry",
            err
        )
        .into(),
        other => Box::new(other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ambiguous_keyframe_suggests_padded_layout() {
        let err = explain(ReplayError::AmbiguousKeyframe { timestamp: 1, entries: 1, slots: 2 });
        let text = err.to_string();
        assert!(text.contains("1 positions for 2 slots"));
        assert!(text.contains("--layout padded"));
        assert!(text.contains("--slot-policy valid-only"));
    }

    #[test]
    fn other_errors_pass_through() {
        let err = explain(ReplayError::NoKeyframe(5));
        assert_eq!(err.to_string(), "no keyframe at or before 5");
    }
}
