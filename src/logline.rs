use std::fmt;
use std::str::FromStr;

use thiserror::Error;
use time::format_description::BorrowedFormatItem;
use time::macros::format_description;
use time::{OffsetDateTime, PrimitiveDateTime, UtcOffset};

use crate::types::{Event, LogLine};

/// C `asctime` layout with a space-padded day, e.g. `Mon Sep  5 15:00:00 2021`.
const ASCTIME: &[BorrowedFormatItem<'static>] = format_description!(
    "[weekday repr:short] [month repr:short] [day padding:space] [hour]:[minute]:[second] [year]"
);

/// Parsing layout, applied after runs of whitespace are collapsed.
const ASCTIME_LOOSE: &[BorrowedFormatItem<'static>] = format_description!(
    "[weekday repr:short] [month repr:short] [day padding:none] [hour]:[minute]:[second] [year]"
);

/// Separates the host from the event text.
const HOST_DELIMITER: &str = ": ";

/// Reasons a single log line is rejected.
#[derive(Debug, Error)]
pub enum ParseError {
    #[error("line does not start with '['")]
    MissingOpenBracket,

    #[error("no ']' closing the timestamp")]
    MissingCloseBracket,

    #[error("invalid timestamp {stamp:?}: {source}")]
    Timestamp {
        stamp: String,
        #[source]
        source: time::error::Parse,
    },

    #[error("expected a single space after ']'")]
    MissingSeparator,

    #[error("no ': ' after the host name")]
    MissingHostDelimiter,

    #[error("empty host name")]
    EmptyHost,

    #[error("unrecognised event {0:?}")]
    InvalidEvent(String),

    #[error("unexpected latency unit {0:?} (expected \"ms\")")]
    InvalidUnit(String),

    #[error("invalid latency value {0:?}")]
    InvalidLatency(String),
}

/// Format a timestamp the way the probe log writes it.
pub fn asctime(ts: OffsetDateTime) -> String {
    // The layout only contains numeric and named components, formatting cannot fail.
    ts.format(ASCTIME).unwrap_or_default()
}

/// Parse an `asctime` stamp. Single- or zero-padded days and repeated spaces are accepted.
pub fn parse_asctime(stamp: &str, offset: UtcOffset) -> Result<OffsetDateTime, ParseError> {
    let normalized = stamp.split_whitespace().collect::<Vec<_>>().join(" ");
    PrimitiveDateTime::parse(&normalized, ASCTIME_LOOSE)
        .map(|dt| dt.assume_offset(offset))
        .map_err(|source| ParseError::Timestamp {
            stamp: stamp.to_string(),
            source,
        })
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Event::Latency { ms } => write!(f, "{ms:.1} ms"),
            Event::Timeout => f.write_str("Timeout"),
            Event::Error => f.write_str("Error"),
        }
    }
}

impl FromStr for Event {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Timeout" => return Ok(Event::Timeout),
            "Error" => return Ok(Event::Error),
            _ => {}
        }

        let mut tokens = s.split_whitespace();
        let (Some(value), Some(unit), None) = (tokens.next(), tokens.next(), tokens.next()) else {
            return Err(ParseError::InvalidEvent(s.to_string()));
        };
        if unit != "ms" {
            return Err(ParseError::InvalidUnit(unit.to_string()));
        }
        let ms: f64 = value
            .parse()
            .map_err(|_| ParseError::InvalidLatency(value.to_string()))?;
        if !ms.is_finite() {
            return Err(ParseError::InvalidLatency(value.to_string()));
        }
        Ok(Event::Latency { ms })
    }
}

impl fmt::Display for LogLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}] {}{}{}",
            asctime(self.timestamp),
            self.host,
            HOST_DELIMITER,
            self.event
        )
    }
}

impl LogLine {
    /// Parse one line of the probe log.
    ///
    /// Grammar: `[` timestamp `]` SP host `: ` event, where
    /// - the timestamp ends at the first `]`
    /// - the host ends at the first `": "` after it, so bare colons (IPv6) are kept
    /// - the event is `Timeout`, `Error` or `<float> ms`
    ///
    /// A trailing `\n` / `\r\n` is ignored.
    pub fn parse(line: &str, offset: UtcOffset) -> Result<Self, ParseError> {
        let line = line.trim_end_matches(['\n', '\r']);
        let rest = line
            .strip_prefix('[')
            .ok_or(ParseError::MissingOpenBracket)?;
        let close = rest.find(']').ok_or(ParseError::MissingCloseBracket)?;
        let timestamp = parse_asctime(&rest[..close], offset)?;

        let rest = rest[close + 1..]
            .strip_prefix(' ')
            .ok_or(ParseError::MissingSeparator)?;
        let (host, event_text) = rest
            .split_once(HOST_DELIMITER)
            .ok_or(ParseError::MissingHostDelimiter)?;
        if host.is_empty() {
            return Err(ParseError::EmptyHost);
        }

        Ok(LogLine {
            timestamp,
            host: host.to_string(),
            event: event_text.trim().parse()?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;

    fn parse(line: &str) -> Result<LogLine, ParseError> {
        LogLine::parse(line, UtcOffset::UTC)
    }

    #[test]
    fn formats_each_event_kind() {
        let ts = datetime!(2021-09-20 15:00:00 UTC);
        let line = |event| LogLine { timestamp: ts, host: "host-a".into(), event }.to_string();

        assert_eq!(
            line(Event::Latency { ms: 12.345 }),
            "[Mon Sep 20 15:00:00 2021] host-a: 12.3 ms"
        );
        assert_eq!(line(Event::Timeout), "[Mon Sep 20 15:00:00 2021] host-a: Timeout");
        assert_eq!(line(Event::Error), "[Mon Sep 20 15:00:00 2021] host-a: Error");
    }

    #[test]
    fn single_digit_day_is_space_padded() {
        assert_eq!(
            asctime(datetime!(2021-09-05 09:03:07 UTC)),
            "Sun Sep  5 09:03:07 2021"
        );
        let parsed = parse("[Sun Sep  5 09:03:07 2021] h: 1.0 ms").unwrap();
        assert_eq!(parsed.timestamp, datetime!(2021-09-05 09:03:07 UTC));
        let zero_padded = parse("[Sun Sep 05 09:03:07 2021] h: 1.0 ms").unwrap();
        assert_eq!(zero_padded.timestamp, parsed.timestamp);
    }

    #[test]
    fn parses_latency_line() {
        let l = parse("[Mon Sep 20 15:00:00 2021] host-a: 12.3 ms\n").unwrap();
        assert_eq!(l.host, "host-a");
        assert_eq!(l.event, Event::Latency { ms: 12.3 });
        assert_eq!(l.timestamp, datetime!(2021-09-20 15:00:00 UTC));
    }

    #[test]
    fn accepts_crlf() {
        let l = parse("[Mon Sep 20 15:00:00 2021] host-a: Timeout\r\n").unwrap();
        assert_eq!(l.event, Event::Timeout);
    }

    #[test]
    fn timestamp_uses_given_offset() {
        let offset = UtcOffset::from_hms(2, 0, 0).unwrap();
        let l = LogLine::parse("[Mon Sep 20 15:00:00 2021] h: Error", offset).unwrap();
        assert_eq!(l.timestamp, datetime!(2021-09-20 15:00:00 +2));
        assert_eq!(l.timestamp, datetime!(2021-09-20 13:00:00 UTC));
    }

    #[test]
    fn host_may_contain_bare_colons() {
        let l = parse("[Mon Sep 20 15:00:00 2021] fe80::1: 0.4 ms").unwrap();
        assert_eq!(l.host, "fe80::1");
        assert_eq!(l.event, Event::Latency { ms: 0.4 });
        assert_eq!(l.to_string(), "[Mon Sep 20 15:00:00 2021] fe80::1: 0.4 ms");
    }

    #[test]
    fn latency_survives_formatting_within_rounding() {
        for secs in [0.0, 0.000_04, 0.001_25, 0.012_349, 0.5, 1.999_99] {
            let text = Event::from(crate::types::ProbeOutcome::Success(secs)).to_string();
            let back: Event = text.parse().unwrap();
            let ms = back.latency_ms().unwrap();
            assert!((ms - secs * 1000.0).abs() <= 0.05 + 1e-9, "{secs} -> {text}");
        }
    }

    #[test]
    fn rejects_wrong_unit() {
        let err = parse("[Mon Sep 20 15:00:00 2021] host-a: 12.3 s").unwrap_err();
        assert!(matches!(err, ParseError::InvalidUnit(u) if u == "s"));
    }

    #[test]
    fn rejects_malformed_lines() {
        assert!(matches!(
            parse("Mon Sep 20 15:00:00 2021] a: Error"),
            Err(ParseError::MissingOpenBracket)
        ));
        assert!(matches!(
            parse("[Mon Sep 20 15:00:00 2021 a: Error"),
            Err(ParseError::MissingCloseBracket)
        ));
        assert!(matches!(
            parse("[yesterday] a: Error"),
            Err(ParseError::Timestamp { .. })
        ));
        assert!(matches!(
            parse("[Mon Sep 20 15:00:00 2021] a Error"),
            Err(ParseError::MissingHostDelimiter)
        ));
        assert!(matches!(
            parse("[Mon Sep 20 15:00:00 2021] : Error"),
            Err(ParseError::EmptyHost)
        ));
        assert!(matches!(
            parse("[Mon Sep 20 15:00:00 2021] a: Lost"),
            Err(ParseError::InvalidEvent(_))
        ));
        assert!(matches!(
            parse("[Mon Sep 20 15:00:00 2021] a: fast ms"),
            Err(ParseError::InvalidLatency(_))
        ));
    }
}
