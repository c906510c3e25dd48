//! Validated runtime configuration for the two subcommands.
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{bail, Context, Result};

use crate::source::RemoteTarget;

pub const DEFAULT_LOG_PATH: &str = "ping.log";
pub const DEFAULT_INTERVAL_SECS: f64 = 10.0;
pub const DEFAULT_TIMEOUT_SECS: f64 = 2.0;

/// Settings for the probe/log loop.
#[derive(Debug, Clone, PartialEq)]
pub struct LoggerConfig {
    /// Probed in this order every cycle.
    pub hosts: Vec<String>,
    /// Cycle start to cycle start.
    pub interval: Duration,
    /// Per-probe budget handed to the prober.
    pub timeout: Duration,
    pub log_path: PathBuf,
    /// Suppress echoing lines to stdout.
    pub quiet: bool,
}

impl LoggerConfig {
    pub fn new(
        hosts: &str,
        interval_secs: f64,
        timeout_secs: f64,
        log_path: PathBuf,
        quiet: bool,
    ) -> Result<Self> {
        Ok(Self {
            hosts: parse_hosts(hosts)?,
            interval: seconds("interval", interval_secs, true)?,
            timeout: seconds("timeout", timeout_secs, false)?,
            log_path,
            quiet,
        })
    }
}

/// Where the renderer reads the log from.
#[derive(Debug, Clone, PartialEq)]
pub enum SourceConfig {
    Local(PathBuf),
    Remote {
        target: RemoteTarget,
        path: PathBuf,
        identity: Option<PathBuf>,
    },
}

/// Settings for the read/render loop.
#[derive(Debug, Clone, PartialEq)]
pub struct PlotConfig {
    pub source: SourceConfig,
    pub live: bool,
    /// Pause between live passes.
    pub interval: Duration,
    /// Only keep lines younger than this.
    pub window: Option<Duration>,
    pub distribution: bool,
    pub output: PathBuf,
    pub size: (u32, u32),
}

impl PlotConfig {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        log_path: PathBuf,
        remote: Option<RemoteTarget>,
        identity: Option<PathBuf>,
        live: bool,
        interval_secs: f64,
        window_secs: Option<f64>,
        distribution: bool,
        output: PathBuf,
        size: (u32, u32),
    ) -> Result<Self> {
        let source = match remote {
            Some(target) => SourceConfig::Remote {
                target,
                path: log_path,
                identity,
            },
            None => {
                if identity.is_some() {
                    tracing::warn!("--identity has no effect without --remote");
                }
                SourceConfig::Local(log_path)
            }
        };
        if size.0 < 200 || size.1 < 150 {
            bail!("chart size {}x{} is too small", size.0, size.1);
        }
        Ok(Self {
            source,
            live,
            interval: seconds("interval", interval_secs, false)?,
            window: window_secs
                .map(|w| seconds("window", w, false))
                .transpose()?,
            distribution,
            output,
            size,
        })
    }
}

/// Split a comma separated host list. Whitespace around entries is trimmed.
pub fn parse_hosts(s: &str) -> Result<Vec<String>> {
    let hosts: Vec<String> = s.split(',').map(|h| h.trim().to_string()).collect();
    if let Some(pos) = hosts.iter().position(String::is_empty) {
        bail!("empty host at position {} in {s:?}", pos + 1);
    }
    Ok(hosts)
}

/// Convert a user supplied number of seconds into a `Duration`.
fn seconds(name: &str, value: f64, allow_zero: bool) -> Result<Duration> {
    if value == 0.0 && !allow_zero {
        bail!("{name} must be greater than zero");
    }
    Duration::try_from_secs_f64(value).with_context(|| format!("invalid {name}: {value}"))
}
