//! Turns per-host series into a backend-neutral plot description.
//!
//! [`assemble`] decides colors, legend labels and markers; a [`ChartSurface`]
//! only draws what it is given.
use anyhow::Result;
use serde::Serialize;
use time::{OffsetDateTime, UtcOffset};

use crate::types::HostSeries;

pub const TITLE: &str = "Ping Log";
pub const X_LABEL: &str = "Time";
pub const Y_LABEL: &str = "Ping (ms)";

/// Something that can display an assembled [`Plot`].
pub trait ChartSurface {
    fn render(&mut self, plot: &Plot) -> Result<()>;

    /// Drop whatever the previous pass drew.
    fn clear(&mut self) -> Result<()> {
        Ok(())
    }
}

impl<T: ChartSurface + ?Sized> ChartSurface for Box<T> {
    fn render(&mut self, plot: &Plot) -> Result<()> {
        (**self).render(plot)
    }

    fn clear(&mut self) -> Result<()> {
        (**self).clear()
    }
}

#[derive(Serialize, Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rgb(pub u8, pub u8, pub u8);

/// Matplotlib's `rainbow` colormap: purple at 0, red at 1.
pub fn rainbow(t: f64) -> Rgb {
    let t = t.clamp(0.0, 1.0);
    let r = (2.0 * t - 0.5).abs();
    let g = (std::f64::consts::PI * t).sin();
    let b = (std::f64::consts::FRAC_PI_2 * t).cos();
    let to_u8 = |c: f64| (c.clamp(0.0, 1.0) * 255.0).round() as u8;
    Rgb(to_u8(r), to_u8(g), to_u8(b))
}

/// Color of the `index`-th of `count` hosts.
pub fn host_color(index: usize, count: usize) -> Rgb {
    if count == 0 {
        return rainbow(0.0);
    }
    rainbow(index as f64 / count as f64)
}

#[derive(Serialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum MarkerKind {
    /// Drawn dashed.
    Timeout,
    /// Drawn dotted.
    Error,
}

impl MarkerKind {
    /// Dash and gap length in pixels.
    pub fn pattern(self) -> (u32, u32) {
        match self {
            MarkerKind::Timeout => (8, 4),
            MarkerKind::Error => (2, 3),
        }
    }
}

/// Vertical line at one failed probe.
#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct Marker {
    /// Unix seconds.
    pub at: f64,
    pub kind: MarkerKind,
    pub color: Rgb,
    /// Set on the first marker of each kind per host only.
    pub label: Option<String>,
}

/// Latency over time for one host. `None` values break the line.
#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct Trace {
    pub label: String,
    pub color: Rgb,
    pub points: Vec<(f64, Option<f64>)>,
}

impl Trace {
    /// Maximal runs of consecutive samples; each run is drawn as one polyline.
    pub fn runs(&self) -> Vec<Vec<(f64, f64)>> {
        let mut runs = Vec::new();
        let mut current = Vec::new();
        for &(x, y) in &self.points {
            match y {
                Some(y) => current.push((x, y)),
                None if !current.is_empty() => runs.push(std::mem::take(&mut current)),
                None => {}
            }
        }
        if !current.is_empty() {
            runs.push(current);
        }
        runs
    }
}

/// Five-number summary of one host's latency samples.
#[derive(Serialize, Debug, Clone, Copy, PartialEq)]
pub struct Summary {
    pub count: usize,
    pub min: f64,
    pub q1: f64,
    pub median: f64,
    pub q3: f64,
    pub max: f64,
}

impl Summary {
    pub fn from_samples(samples: impl IntoIterator<Item = f64>) -> Option<Self> {
        let mut v: Vec<f64> = samples.into_iter().collect();
        if v.is_empty() {
            return None;
        }
        v.sort_by(f64::total_cmp);
        Some(Self {
            count: v.len(),
            min: v[0],
            q1: percentile(&v, 0.25),
            median: percentile(&v, 0.5),
            q3: percentile(&v, 0.75),
            max: v[v.len() - 1],
        })
    }
}

/// Linear interpolation between closest ranks; `sorted` must be non-empty.
fn percentile(sorted: &[f64], p: f64) -> f64 {
    let rank = p * (sorted.len() - 1) as f64;
    let lo = rank.floor() as usize;
    let hi = rank.ceil() as usize;
    sorted[lo] + (sorted[hi] - sorted[lo]) * (rank - lo as f64)
}

#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct Spread {
    pub host: String,
    pub color: Rgb,
    pub summary: Option<Summary>,
}

/// Everything a surface needs to draw one pass.
#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct Plot {
    pub title: String,
    pub x_label: String,
    pub y_label: String,
    pub traces: Vec<Trace>,
    pub markers: Vec<Marker>,
    /// Present when the distribution view is requested.
    pub spread: Option<Vec<Spread>>,
    /// Offset used to print time ticks.
    #[serde(skip)]
    pub offset: UtcOffset,
}

impl Plot {
    /// Earliest and latest x of any point or marker.
    pub fn time_range(&self) -> Option<(f64, f64)> {
        let xs = self
            .traces
            .iter()
            .flat_map(|t| t.points.iter().map(|p| p.0))
            .chain(self.markers.iter().map(|m| m.at));
        xs.fold(None, |acc, x| match acc {
            None => Some((x, x)),
            Some((lo, hi)) => Some((lo.min(x), hi.max(x))),
        })
    }

    /// Largest latency sample, if any.
    pub fn max_latency(&self) -> Option<f64> {
        self.traces
            .iter()
            .flat_map(|t| t.points.iter().filter_map(|p| p.1))
            .reduce(f64::max)
    }

    /// Legend entries in drawing order.
    pub fn legend(&self) -> Vec<&str> {
        self.traces
            .iter()
            .map(|t| t.label.as_str())
            .chain(self.markers.iter().filter_map(|m| m.label.as_deref()))
            .collect()
    }
}

fn unix_seconds(ts: OffsetDateTime) -> f64 {
    ts.unix_timestamp_nanos() as f64 / 1e9
}

/// Build the plot for one pass. Host order, and therefore colors, follow `series`.
pub fn assemble(series: &[HostSeries], offset: UtcOffset, distribution: bool) -> Plot {
    let count = series.len();
    let mut traces = Vec::with_capacity(count);
    let mut markers = Vec::new();

    for (idx, s) in series.iter().enumerate() {
        let color = host_color(idx, count);
        traces.push(Trace {
            label: s.host.clone(),
            color,
            points: s
                .timestamps
                .iter()
                .zip(&s.values)
                .map(|(ts, v)| (unix_seconds(*ts), *v))
                .collect(),
        });

        for (kind, times, suffix) in [
            (MarkerKind::Timeout, &s.timeouts, "timeout"),
            (MarkerKind::Error, &s.errors, "error"),
        ] {
            markers.extend(times.iter().enumerate().map(|(i, ts)| Marker {
                at: unix_seconds(*ts),
                kind,
                color,
                label: (i == 0).then(|| format!("{} {suffix}", s.host)),
            }));
        }
    }

    let spread = distribution.then(|| {
        series
            .iter()
            .enumerate()
            .map(|(idx, s)| Spread {
                host: s.host.clone(),
                color: host_color(idx, count),
                summary: Summary::from_samples(s.samples()),
            })
            .collect()
    });

    Plot {
        title: TITLE.to_string(),
        x_label: X_LABEL.to_string(),
        y_label: Y_LABEL.to_string(),
        traces,
        markers,
        spread,
        offset,
    }
}
