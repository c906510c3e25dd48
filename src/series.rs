use std::collections::HashMap;
use std::time::Duration;

use thiserror::Error;
use time::{OffsetDateTime, UtcOffset};

use crate::logline::ParseError;
use crate::types::{HostSeries, LogLine};

/// Failure to turn the log contents into series. Always fatal for the pass.
#[derive(Debug, Error)]
pub enum LogError {
    #[error("log is not valid UTF-8: {0}")]
    Encoding(#[from] std::str::Utf8Error),

    #[error("line {line_no}: {source} in {line:?}")]
    Line {
        line_no: usize,
        line: String,
        #[source]
        source: ParseError,
    },
}

/// Keep only lines no older than `span` relative to `now`.
#[derive(Debug, Clone, Copy)]
pub struct Window {
    pub span: Duration,
    pub now: OffsetDateTime,
}

impl Window {
    /// Lines stamped after `now` are always kept.
    pub fn admits(&self, timestamp: OffsetDateTime) -> bool {
        self.now - timestamp <= self.span
    }
}

/// Cut off a trailing line the writer has not finished yet.
pub fn complete_prefix(bytes: &[u8]) -> &[u8] {
    match bytes.iter().rposition(|&b| b == b'\n') {
        Some(last) => &bytes[..=last],
        None => &[],
    }
}

/// Parse every complete line of the log.
///
/// Any malformed complete line fails the whole pass. A final line with no
/// newline is treated as still being written and skipped.
pub fn parse_lines(
    bytes: &[u8],
    offset: UtcOffset,
    window: Option<&Window>,
) -> Result<Vec<LogLine>, LogError> {
    let complete = complete_prefix(bytes);
    if complete.len() < bytes.len() {
        tracing::debug!(
            pending_bytes = bytes.len() - complete.len(),
            "skipping incomplete trailing line"
        );
    }
    let text = std::str::from_utf8(complete)?;

    let mut out = Vec::new();
    for (idx, raw) in text.lines().enumerate() {
        let line = LogLine::parse(raw, offset).map_err(|source| LogError::Line {
            line_no: idx + 1,
            line: raw.to_string(),
            source,
        })?;
        if window.is_some_and(|w| !w.admits(line.timestamp)) {
            continue;
        }
        out.push(line);
    }
    Ok(out)
}

/// Group lines per host, hosts in order of first appearance.
pub fn group(lines: impl IntoIterator<Item = LogLine>) -> Vec<HostSeries> {
    let mut index: HashMap<String, usize> = HashMap::new();
    let mut series: Vec<HostSeries> = Vec::new();

    for line in lines {
        let slot = *index.entry(line.host.clone()).or_insert_with(|| {
            series.push(HostSeries::new(line.host.clone()));
            series.len() - 1
        });
        series[slot].push(line.timestamp, line.event);
    }
    series
}

/// Full pass from raw log bytes to per-host series.
pub fn parse_log(
    bytes: &[u8],
    offset: UtcOffset,
    window: Option<&Window>,
) -> Result<Vec<HostSeries>, LogError> {
    Ok(group(parse_lines(bytes, offset, window)?))
}
