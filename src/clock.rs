use time::{OffsetDateTime, UtcOffset};

/// Wall-clock source for log timestamps and the render window.
pub trait Clock: Send + Sync {
    fn now(&self) -> OffsetDateTime;

    /// Offset applied to timestamps read back from the log.
    fn offset(&self) -> UtcOffset {
        self.now().offset()
    }
}

/// Real wall clock in the local timezone.
///
/// The offset is captured once. `time` refuses to read it once the process
/// has more than one thread, so construct this before any runtime workers or
/// blocking tasks exist.
#[derive(Debug, Clone, Copy)]
pub struct SystemClock {
    offset: UtcOffset,
}

impl SystemClock {
    pub fn local() -> Self {
        match UtcOffset::current_local_offset() {
            Ok(offset) => Self { offset },
            Err(e) => {
                tracing::warn!(error = %e, "could not determine the local UTC offset, logging in UTC");
                Self::utc()
            }
        }
    }

    pub fn utc() -> Self {
        Self::with_offset(UtcOffset::UTC)
    }

    pub fn with_offset(offset: UtcOffset) -> Self {
        Self { offset }
    }
}

impl Clock for SystemClock {
    fn now(&self) -> OffsetDateTime {
        OffsetDateTime::now_utc().to_offset(self.offset)
    }

    fn offset(&self) -> UtcOffset {
        self.offset
    }
}

/// Clock frozen at one instant.
#[derive(Debug, Clone, Copy)]
pub struct FixedClock(pub OffsetDateTime);

impl Clock for FixedClock {
    fn now(&self) -> OffsetDateTime {
        self.0
    }
}
