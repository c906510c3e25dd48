use time::OffsetDateTime;

/// Result of probing one host once.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ProbeOutcome {
    /// Echo reply received; round-trip time in seconds.
    Success(f64),
    /// No reply within the probe timeout.
    Timeout,
    /// Host unreachable, unresolvable, or the probe could not be sent.
    Error,
}

/// Event text carried by one log line.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Event {
    Latency { ms: f64 },
    Timeout,
    Error,
}

impl Event {
    pub fn latency_ms(&self) -> Option<f64> {
        match self {
            Event::Latency { ms } => Some(*ms),
            Event::Timeout | Event::Error => None,
        }
    }
}

impl From<ProbeOutcome> for Event {
    fn from(outcome: ProbeOutcome) -> Self {
        match outcome {
            ProbeOutcome::Success(secs) => Event::Latency { ms: secs * 1000.0 },
            ProbeOutcome::Timeout => Event::Timeout,
            ProbeOutcome::Error => Event::Error,
        }
    }
}

/// One durable record of the probe log: `[<asctime>] <host>: <event>`.
#[derive(Debug, Clone, PartialEq)]
pub struct LogLine {
    pub timestamp: OffsetDateTime,
    pub host: String,
    pub event: Event,
}

/// Per-host series rebuilt from the log on every render pass.
///
/// `timestamps` and `values` are parallel: a failed probe keeps its slot with
/// a `None` value and is also recorded in `timeouts` or `errors`.
#[derive(Debug, Clone, PartialEq)]
pub struct HostSeries {
    pub host: String,
    pub timestamps: Vec<OffsetDateTime>,
    pub values: Vec<Option<f64>>,
    pub timeouts: Vec<OffsetDateTime>,
    pub errors: Vec<OffsetDateTime>,
}

impl HostSeries {
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            timestamps: Vec::new(),
            values: Vec::new(),
            timeouts: Vec::new(),
            errors: Vec::new(),
        }
    }

    pub fn push(&mut self, timestamp: OffsetDateTime, event: Event) {
        self.timestamps.push(timestamp);
        self.values.push(event.latency_ms());
        match event {
            Event::Latency { .. } => {}
            Event::Timeout => self.timeouts.push(timestamp),
            Event::Error => self.errors.push(timestamp),
        }
    }

    /// Latency samples in log order, failures skipped.
    pub fn samples(&self) -> impl Iterator<Item = f64> + '_ {
        self.values.iter().flatten().copied()
    }
}
