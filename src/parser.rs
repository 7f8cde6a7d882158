use std::io::{self, BufRead};

use clap::ValueEnum;
use jiff::civil::DateTime;
use jiff::tz::TimeZone;
use nom::{
    branch::alt,
    bytes::complete::take_while_m_n,
    character::complete::char,
    combinator::{eof, map_res, opt, rest},
    sequence::{preceded, tuple},
    IResult,
};

use crate::error::{LineError, ParseError};
use crate::model::{LocationRecord, Position, Timestamp};

/// Which fixes count as "no position known"
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum ValidityRule {
    /// Valid only when both coordinates are non-zero
    #[default]
    EitherZero,
    /// Invalid when the latitude alone is zero
    LatZero,
    /// Invalid only at exactly (0, 0)
    BothZero,
}

impl ValidityRule {
    pub fn is_valid(&self, position: &Position) -> bool {
        match self {
            ValidityRule::EitherZero => position.lat != 0.0 && position.lon != 0.0,
            ValidityRule::LatZero => position.lat != 0.0,
            ValidityRule::BothZero => !(position.lat == 0.0 && position.lon == 0.0),
        }
    }
}

// --- BASIC PARSERS ---

fn digits<'a>(min: usize, max: usize) -> impl FnMut(&'a str) -> IResult<&'a str, i32> {
    map_res(take_while_m_n(min, max, |c: char| c.is_ascii_digit()), |s: &str| s.parse::<i32>())
}

fn parse_date(input: &str) -> IResult<&str, (i32, i32, i32)> {
    let (input, (year, _, month, _, day)) =
        tuple((digits(4, 4), char('-'), digits(1, 2), char('-'), digits(1, 2)))(input)?;
    Ok((input, (year, month, day)))
}

fn parse_time(input: &str) -> IResult<&str, (i32, i32, i32)> {
    let (input, (hour, _, minute, _, second)) =
        tuple((digits(1, 2), char(':'), digits(1, 2), char(':'), digits(1, 2)))(input)?;
    // Whatever follows the first '.' is dropped, so sub-seconds truncate
    let (input, _) = opt(preceded(char('.'), rest))(input)?;
    Ok((input, (hour, minute, second)))
}

fn parse_civil(input: &str) -> IResult<&str, ((i32, i32, i32), (i32, i32, i32))> {
    let (input, date) = parse_date(input)?;
    let (input, _) = alt((char(' '), char('T')))(input)?;
    let (input, time) = parse_time(input)?;
    let (input, _) = eof(input)?;
    Ok((input, (date, time)))
}

/// Convert `YYYY-MM-DD HH:MM:SS[.fraction]`, read as civil time in `tz`, to Unix seconds.
pub fn parse_timestamp(text: &str, tz: &TimeZone) -> Result<Timestamp, ParseError> {
    let text = text.trim();
    let fail = |reason: String| ParseError::Timestamp { text: text.to_string(), reason };

    let (_, ((year, month, day), (hour, minute, second))) =
        parse_civil(text).map_err(|_| fail("expected YYYY-MM-DD HH:MM:SS[.fraction]".to_string()))?;

    let civil = DateTime::new(
        year as i16,
        month as i8,
        day as i8,
        hour as i8,
        minute as i8,
        second as i8,
        0,
    )
    .map_err(|e| fail(e.to_string()))?;
    let zoned = civil.to_zoned(tz.clone()).map_err(|e| fail(e.to_string()))?;
    Ok(zoned.timestamp().as_second())
}

fn parse_coordinate(field: &'static str, text: &str) -> Result<f32, ParseError> {
    text.trim()
        .parse::<f32>()
        .map_err(|_| ParseError::Coordinate { field, text: text.to_string() })
}

/// Parse `timestamp,entity_id,latitude,longitude`.
///
/// The entity id is kept verbatim; surrounding whitespace is ignored on the
/// other three fields. Zero-valued fixes are returned as-is, filtering them
/// is the caller's job (see [`ValidityRule`]).
pub fn parse_line(line: &str, tz: &TimeZone) -> Result<LocationRecord, ParseError> {
    let line = line.trim_end_matches(['\r', '\n']);
    let fields: Vec<&str> = line.split(',').collect();
    let [timestamp, entity_id, lat, lon] = fields.as_slice() else {
        return Err(ParseError::FieldCount { found: fields.len() });
    };

    Ok(LocationRecord {
        timestamp: parse_timestamp(timestamp, tz)?,
        entity_id: entity_id.to_string(),
        position: Position::new(parse_coordinate("latitude", lat)?, parse_coordinate("longitude", lon)?),
    })
}

/// Outcome of reading one line
#[derive(Debug, Clone, PartialEq)]
pub enum ParsedLine {
    Record(LocationRecord),
    Malformed(LineError),
}

/// Streams records out of a line-oriented source.
///
/// Only I/O failures surface as `Err`; malformed lines (bad UTF-8 included)
/// come back as [`ParsedLine::Malformed`] so the scan can carry on.
pub struct RecordReader<R> {
    inner: R,
    tz: TimeZone,
    line_no: usize,
    buf: Vec<u8>,
}

impl<R: BufRead> RecordReader<R> {
    pub fn new(inner: R, tz: TimeZone) -> Self {
        Self { inner, tz, line_no: 0, buf: Vec::new() }
    }
}

impl<R: BufRead> Iterator for RecordReader<R> {
    type Item = io::Result<ParsedLine>;

    fn next(&mut self) -> Option<Self::Item> {
        self.buf.clear();
        match self.inner.read_until(b'\n', &mut self.buf) {
            Ok(0) => return None,
            Ok(_) => {}
            Err(e) => return Some(Err(e)),
        }
        self.line_no += 1;

        let parsed = match std::str::from_utf8(&self.buf) {
            Ok(line) => parse_line(line, &self.tz).map_err(|error| LineError {
                line: self.line_no,
                content: line.trim_end_matches(['\r', '\n']).to_string(),
                error,
            }),
            Err(e) => Err(LineError {
                line: self.line_no,
                content: String::from_utf8_lossy(&self.buf).trim_end().to_string(),
                error: ParseError::Encoding(e.to_string()),
            }),
        };

        Some(Ok(match parsed {
            Ok(record) => ParsedLine::Record(record),
            Err(err) => ParsedLine::Malformed(err),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // 2019-06-09 00:00:00 UTC
    const JUNE_9: Timestamp = 1_560_038_400;

    #[test]
    fn parses_timestamp_in_utc() {
        let ts = parse_timestamp("2019-06-09 12:00:00.000", &TimeZone::UTC).unwrap();
        assert_eq!(ts, JUNE_9 + 12 * 3600);
    }

    #[test]
    fn truncates_fraction() {
        let ts = parse_timestamp("2019-06-09 12:00:05.999999", &TimeZone::UTC).unwrap();
        assert_eq!(ts, JUNE_9 + 12 * 3600 + 5);

        let ts = parse_timestamp("2019-06-09T12:00:05", &TimeZone::UTC).unwrap();
        assert_eq!(ts, JUNE_9 + 12 * 3600 + 5);

        let ts = parse_timestamp("2019-06-09 12:00:05.5Z", &TimeZone::UTC).unwrap();
        assert_eq!(ts, JUNE_9 + 12 * 3600 + 5);
    }

    #[test]
    fn accepts_unpadded_fields() {
        let ts = parse_timestamp("2019-6-9 7:5:3", &TimeZone::UTC).unwrap();
        assert_eq!(ts, JUNE_9 + 7 * 3600 + 5 * 60 + 3);
    }

    #[test]
    fn honours_zone() {
        let nz = TimeZone::fixed(jiff::tz::offset(12));
        let ts = parse_timestamp("2019-06-09 12:00:00.000", &nz).unwrap();
        assert_eq!(ts, JUNE_9);
    }

    #[test]
    fn rejects_bad_timestamps() {
        for text in ["2019-06-09", "19-06-09 12:00:00", "2019-06-09 12:00:00x", "2019-02-30 00:00:00", "2019-06-09 123:00:00", ""] {
            assert!(
                matches!(parse_timestamp(text, &TimeZone::UTC), Err(ParseError::Timestamp { .. })),
                "{text:?} should not parse"
            );
        }
    }

    #[test]
    fn parses_line() {
        let record = parse_line("2019-06-09 12:00:00.000,A,10.0,20.0\n", &TimeZone::UTC).unwrap();
        assert_eq!(record, LocationRecord::new(JUNE_9 + 12 * 3600, "A", 10.0, 20.0));
    }

    #[test]
    fn field_count_mismatch() {
        let err = parse_line("2019-06-09 12:00:00.000,A,10.0", &TimeZone::UTC).unwrap_err();
        assert_eq!(err, ParseError::FieldCount { found: 3 });

        let err = parse_line("2019-06-09 12:00:00.000,A,10.0,20.0,5", &TimeZone::UTC).unwrap_err();
        assert_eq!(err, ParseError::FieldCount { found: 5 });
    }

    #[test]
    fn non_numeric_coordinate() {
        let err = parse_line("2019-06-09 12:00:00.000,A,north,20.0", &TimeZone::UTC).unwrap_err();
        assert_eq!(err, ParseError::Coordinate { field: "latitude", text: "north".into() });
    }

    #[test]
    fn validity_rules() {
        let origin = Position::new(0.0, 0.0);
        let on_equator = Position::new(0.0, 20.0);
        let on_meridian = Position::new(10.0, 0.0);

        assert!(!ValidityRule::EitherZero.is_valid(&origin));
        assert!(!ValidityRule::EitherZero.is_valid(&on_equator));
        assert!(!ValidityRule::EitherZero.is_valid(&on_meridian));

        assert!(!ValidityRule::LatZero.is_valid(&on_equator));
        assert!(ValidityRule::LatZero.is_valid(&on_meridian));

        assert!(!ValidityRule::BothZero.is_valid(&origin));
        assert!(ValidityRule::BothZero.is_valid(&on_equator));
    }

    #[test]
    fn reader_keeps_going_after_bad_lines() {
        let input = "2019-06-09 12:00:00,A,10.0,20.0\r\nnot a record\n2019-06-09 12:00:01,B,1.5,2.5";
        let lines: Vec<ParsedLine> = RecordReader::new(input.as_bytes(), TimeZone::UTC)
            .collect::<io::Result<_>>()
            .unwrap();

        assert_eq!(lines.len(), 3);
        assert!(matches!(&lines[0], ParsedLine::Record(r) if r.entity_id == "A"));
        match &lines[1] {
            ParsedLine::Malformed(err) => {
                assert_eq!(err.line, 2);
                assert_eq!(err.content, "not a record");
                assert_eq!(err.error, ParseError::FieldCount { found: 1 });
            }
            other => panic!("expected a malformed line, got {other:?}"),
        }
        assert!(matches!(&lines[2], ParsedLine::Record(r) if r.entity_id == "B" && r.position == Position::new(1.5, 2.5)));
    }

    #[test]
    fn reader_reports_invalid_utf8() {
        let input: &[u8] = b"2019-06-09 12:00:00,\xff,10.0,20.0\n";
        let mut reader = RecordReader::new(input, TimeZone::UTC);
        match reader.next() {
            Some(Ok(ParsedLine::Malformed(err))) => assert!(matches!(err.error, ParseError::Encoding(_))),
            other => panic!("expected an encoding error, got {other:?}"),
        }
        assert!(reader.next().is_none());
    }
}
