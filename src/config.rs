use jiff::fmt::temporal::DateTimeParser;
use jiff::tz::TimeZone;

use crate::error::TldmError;
use crate::frame::KeyframeLayout;
use crate::model::Timestamp;
use crate::parser::ValidityRule;
use crate::slots::SlotPolicy;

/// Seconds between periodic keyframes (every 10 minutes)
pub const DEFAULT_KEYFRAME_INTERVAL: i64 = 600;

/// Everything that shapes a compile run
#[derive(Debug, Clone)]
pub struct BuildSettings {
    pub keyframe_interval: i64,
    pub slot_policy: SlotPolicy,
    pub validity: ValidityRule,
    pub layout: KeyframeLayout,
    /// Zone the input's civil timestamps are expressed in
    pub timezone: TimeZone,
}

impl Default for BuildSettings {
    fn default() -> Self {
        Self {
            keyframe_interval: DEFAULT_KEYFRAME_INTERVAL,
            slot_policy: SlotPolicy::default(),
            validity: ValidityRule::default(),
            layout: KeyframeLayout::default(),
            timezone: TimeZone::UTC,
        }
    }
}

impl BuildSettings {
    pub fn validate(&self) -> Result<(), TldmError> {
        if self.keyframe_interval <= 0 {
            return Err(TldmError::Config(format!(
                "keyframe interval must be positive, got {}",
                self.keyframe_interval
            )));
        }
        Ok(())
    }

    /// True when `ts` is a whole multiple of the keyframe interval
    pub fn is_keyframe_boundary(&self, ts: Timestamp) -> bool {
        ts.rem_euclid(self.keyframe_interval) == 0
    }
}

static TZ_PARSER: DateTimeParser = DateTimeParser::new();

/// Resolve a zone given as `UTC`, `local`, an IANA name or a fixed offset (`+12:00`, `-0330`).
pub fn resolve_timezone(name: &str) -> Result<TimeZone, TldmError> {
    let name = name.trim();
    if name.eq_ignore_ascii_case("utc") || name == "Z" {
        return Ok(TimeZone::UTC);
    }
    if name.eq_ignore_ascii_case("local") {
        return TimeZone::try_system()
            .map_err(|e| TldmError::Config(format!("cannot determine local time zone: {e}")));
    }
    TZ_PARSER
        .parse_time_zone(name)
        .map_err(|e| TldmError::Config(format!("unknown time zone '{name}': {e}")))
}
