use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tokio::time::{self, Instant};
use tokio_util::sync::CancellationToken;

use crate::clock::Clock;
use crate::config::LoggerConfig;
use crate::prober::Prober;
use crate::types::{Event, LogLine};

/// Append-only probe log.
#[derive(Debug)]
pub struct LogFile {
    path: PathBuf,
    file: File,
}

impl LogFile {
    /// Open (or create) the log for appending.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .with_context(|| format!("failed to open log file: {}", path.display()))?;
        Ok(Self { path, file })
    }

    /// Write one line and push it to storage before returning.
    ///
    /// The line and its newline go out in a single append, so readers never see
    /// a line of ours cut short unless they race this very write.
    pub fn append(&mut self, line: &LogLine) -> Result<()> {
        let mut buf = line.to_string();
        buf.push('\n');
        self.file
            .write_all(buf.as_bytes())
            .and_then(|_| self.file.flush())
            .and_then(|_| self.file.sync_data())
            .with_context(|| format!("failed to append to log file: {}", self.path.display()))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Probes every configured host once per cycle and appends one line per host.
pub struct ProbeLogger<P, C> {
    config: LoggerConfig,
    prober: P,
    clock: C,
    log: LogFile,
}

impl<P: Prober, C: Clock> ProbeLogger<P, C> {
    pub fn new(config: LoggerConfig, prober: P, clock: C) -> Result<Self> {
        let log = LogFile::open(&config.log_path)?;
        Ok(Self {
            config,
            prober,
            clock,
            log,
        })
    }

    /// Run cycles until `cancel` fires.
    ///
    /// Cycles start `interval` apart, measured start to start. A cycle that
    /// overruns is followed immediately by the next one; missed slots are not
    /// made up. Only a log write failure ends the loop with an error.
    pub async fn run(&mut self, cancel: CancellationToken) -> Result<()> {
        tracing::info!(
            hosts = ?self.config.hosts,
            interval = ?self.config.interval,
            timeout = ?self.config.timeout,
            log = %self.log.path().display(),
            "probe loop started"
        );

        while !cancel.is_cancelled() {
            let started = Instant::now();
            self.run_cycle(&cancel).await?;

            let elapsed = started.elapsed();
            let pause = self.config.interval.saturating_sub(elapsed);
            if pause.is_zero() {
                tracing::debug!(?elapsed, "cycle overran the interval");
                continue;
            }
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = time::sleep(pause) => {}
            }
        }

        tracing::info!("probe loop stopped");
        Ok(())
    }

    /// Probe each host in declaration order, appending as we go.
    ///
    /// Returns the number of lines written, which is less than the number of
    /// hosts only when `cancel` fired mid-cycle.
    pub async fn run_cycle(&mut self, cancel: &CancellationToken) -> Result<usize> {
        let mut written = 0;
        for host in &self.config.hosts {
            if cancel.is_cancelled() {
                break;
            }
            let outcome = self.prober.probe(host, self.config.timeout).await;
            let line = LogLine {
                timestamp: self.clock.now(),
                host: host.clone(),
                event: Event::from(outcome),
            };
            self.log.append(&line)?;
            if !self.config.quiet {
                println!("{line}");
            }
            written += 1;
        }
        Ok(written)
    }
}
