use std::path::PathBuf;
use std::process::ExitCode;

use clap::{ArgAction, Parser};
use tracing::error;

use tldm::config::{self, BuildSettings, DEFAULT_KEYFRAME_INTERVAL};
use tldm::error::TldmError;
use tldm::frame::KeyframeLayout;
use tldm::parser::ValidityRule;
use tldm::slots::SlotPolicy;
use tldm::storage::SqliteStore;
use tldm::BuildReport;

/// Compile timestamped locations (CSV) into a keyframe/delta database
#[derive(Parser, Clone, Debug)]
#[clap(author, version, about, long_about = None)]
struct Args {
    /// Input file with timestamps and locations
    #[clap(short, long)]
    infile: PathBuf,

    /// Database file for frames
    #[clap(short, long)]
    outfile: PathBuf,

    /// Print debug info (-vv dumps every frame)
    #[clap(short, long, action = ArgAction::Count)]
    verbose: u8,

    /// Seconds between keyframes
    #[clap(long, default_value_t = DEFAULT_KEYFRAME_INTERVAL)]
    interval: i64,

    #[clap(long, value_enum, default_value = "all-ids")]
    slot_policy: SlotPolicy,

    #[clap(long, value_enum, default_value = "either-zero")]
    validity: ValidityRule,

    #[clap(long, value_enum, default_value = "sparse")]
    layout: KeyframeLayout,

    /// Zone of the input timestamps: UTC, local, an IANA name or an offset like +12:00
    #[clap(long, default_value = "UTC")]
    timezone: String,
}

impl Args {
    fn settings(&self) -> Result<BuildSettings, TldmError> {
        Ok(BuildSettings {
            keyframe_interval: self.interval,
            slot_policy: self.slot_policy,
            validity: self.validity,
            layout: self.layout,
            timezone: config::resolve_timezone(&self.timezone)?,
        })
    }
}

fn main() -> ExitCode {
    let args = Args::parse();
    tldm::init_logging(args.verbose);

    match run(&args) {
        Ok(report) => {
            print_summary(&args, &report);
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!("{}", e);
            ExitCode::FAILURE
        }
    }
}

fn run(args: &Args) -> Result<BuildReport, TldmError> {
    let settings = args.settings()?;
    settings.validate()?;

    let mut store = SqliteStore::open(&args.outfile)?;
    tldm::compile_file(&args.infile, &mut store, &settings)
}

fn print_summary(args: &Args, report: &BuildReport) {
    println!("--- [tldm] {} -> {} ---", args.infile.display(), args.outfile.display());
    println!("Lines read:        {}", report.survey.lines);
    println!("Malformed lines:   {}", report.survey.line_errors.len());
    println!("Invalid locations: {}", report.survey.invalid_records);
    println!("Slots:             {}", report.slots);
    println!("Timestamps:        {}", report.timestamps);
    println!("Keyframes:         {}", report.timeline.keyframes);
    println!("Deltas:            {}", report.timeline.deltas);
    if report.survey.out_of_order > 0 {
        println!("Out of order:      {} (input should be sorted by timestamp)", report.survey.out_of_order);
    }
}
