use std::time::Duration;

use anyhow::{Context, Result};
use tokio::time;
use tokio_util::sync::CancellationToken;

use crate::chart::{assemble, ChartSurface};
use crate::clock::Clock;
use crate::series::{self, Window};
use crate::source::LogReader;

/// Stages of one render pass, in order. `Waiting` only occurs in live mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Reading,
    Parsing,
    Grouping,
    Rendering,
    Waiting,
    Done,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RenderOptions {
    pub live: bool,
    pub interval: Duration,
    pub window: Option<Duration>,
    pub distribution: bool,
}

/// Re-reads the whole log on every pass and redraws the surface from scratch.
pub struct Renderer<R, S, C> {
    reader: R,
    surface: S,
    clock: C,
    options: RenderOptions,
}

fn enter(phase: Phase) {
    tracing::trace!(?phase, "render phase");
}

impl<R: LogReader, S: ChartSurface, C: Clock> Renderer<R, S, C> {
    pub fn new(reader: R, surface: S, clock: C, options: RenderOptions) -> Self {
        Self {
            reader,
            surface,
            clock,
            options,
        }
    }

    /// One read → parse → group → render pass. Returns the number of hosts drawn.
    pub async fn pass(&mut self) -> Result<usize> {
        enter(Phase::Reading);
        let bytes = self.reader.read_all().await?;

        enter(Phase::Parsing);
        let window = self.options.window.map(|span| Window {
            span,
            now: self.clock.now(),
        });
        let lines = series::parse_lines(&bytes, self.clock.offset(), window.as_ref())
            .with_context(|| format!("malformed log {}", self.reader.describe()))?;

        enter(Phase::Grouping);
        let line_count = lines.len();
        let hosts = series::group(lines);

        enter(Phase::Rendering);
        let plot = assemble(&hosts, self.clock.offset(), self.options.distribution);
        self.surface.render(&plot)?;

        tracing::debug!(lines = line_count, hosts = hosts.len(), "render pass complete");
        Ok(hosts.len())
    }

    /// Render once, or until `cancel` fires in live mode. Returns the number of passes.
    ///
    /// The token is only checked between passes: a pass that has started runs
    /// to completion, and none starts after cancellation. Any pass error
    /// aborts the loop.
    pub async fn run(&mut self, cancel: CancellationToken) -> Result<usize> {
        let mut passes = 0;
        while !cancel.is_cancelled() {
            self.pass().await?;
            passes += 1;
            if !self.options.live {
                break;
            }

            enter(Phase::Waiting);
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = time::sleep(self.options.interval) => {}
            }
            self.surface.clear()?;
        }
        enter(Phase::Done);
        Ok(passes)
    }

    pub fn surface(&self) -> &S {
        &self.surface
    }
}
