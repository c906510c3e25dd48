//! Chart surfaces that write the plot to a file.
//!
//! Files are written next to the target under a temporary name and renamed
//! into place, so a viewer polling the output never sees half a chart.
use std::fs::{self, File};
use std::io::BufWriter;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, bail, Context, Result};
use plotters::coord::Shift;
use plotters::prelude::*;
use time::format_description::BorrowedFormatItem;
use time::macros::format_description;
use time::{OffsetDateTime, UtcOffset};

use crate::chart::{ChartSurface, Plot, Rgb, Spread};

const TICK: &[BorrowedFormatItem<'static>] =
    format_description!("[month repr:short] [day] [hour]:[minute]:[second]");

const MAX_X_LABELS: usize = 10;

/// Width of the time axis when all data sits at one instant, seconds.
const MIN_SPAN_SECS: f64 = 60.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageFormat {
    Svg,
    Png,
}

impl ImageFormat {
    fn extension(self) -> &'static str {
        match self {
            ImageFormat::Svg => "svg",
            ImageFormat::Png => "png",
        }
    }
}

/// Pick a surface from the output file extension: `.svg`, `.png` or `.json`.
pub fn surface_for(path: impl AsRef<Path>, size: (u32, u32)) -> Result<Box<dyn ChartSurface>> {
    let path = path.as_ref();
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase)
        .unwrap_or_default();
    let surface: Box<dyn ChartSurface> = match ext.as_str() {
        "svg" => Box::new(ImageSurface::new(path, size, ImageFormat::Svg)),
        "png" => Box::new(ImageSurface::new(path, size, ImageFormat::Png)),
        "json" => Box::new(JsonSurface::new(path)),
        _ => bail!(
            "unsupported chart output {} (use .svg, .png or .json)",
            path.display()
        ),
    };
    Ok(surface)
}

/// Hidden sibling used while a chart is being written.
pub fn staging_path(path: &Path, extension: &str) -> PathBuf {
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "chart".to_string());
    path.with_file_name(format!(".{stem}.partial.{extension}"))
}

fn publish(staging: &Path, path: &Path) -> Result<()> {
    fs::rename(staging, path)
        .with_context(|| format!("failed to move chart into place: {}", path.display()))
}

fn drawing_error<E: std::fmt::Debug>(e: E) -> anyhow::Error {
    anyhow!("chart drawing failed: {e:?}")
}

/// SVG or PNG chart drawn with plotters.
#[derive(Debug, Clone)]
pub struct ImageSurface {
    path: PathBuf,
    size: (u32, u32),
    format: ImageFormat,
}

impl ImageSurface {
    pub fn new(path: impl Into<PathBuf>, size: (u32, u32), format: ImageFormat) -> Self {
        Self {
            path: path.into(),
            size,
            format,
        }
    }
}

impl ChartSurface for ImageSurface {
    fn render(&mut self, plot: &Plot) -> Result<()> {
        let staging = staging_path(&self.path, self.format.extension());
        match self.format {
            ImageFormat::Svg => {
                let root = SVGBackend::new(&staging, self.size).into_drawing_area();
                draw_plot(&root, plot)?;
                root.present().map_err(drawing_error)?;
            }
            ImageFormat::Png => {
                let root = BitMapBackend::new(&staging, self.size).into_drawing_area();
                draw_plot(&root, plot)?;
                root.present().map_err(drawing_error)?;
            }
        }
        publish(&staging, &self.path)?;
        tracing::debug!(output = %self.path.display(), "chart written");
        Ok(())
    }
}

/// Writes the assembled plot as JSON for an external charting tool.
#[derive(Debug, Clone)]
pub struct JsonSurface {
    path: PathBuf,
}

impl JsonSurface {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl ChartSurface for JsonSurface {
    fn render(&mut self, plot: &Plot) -> Result<()> {
        let staging = staging_path(&self.path, "json");
        {
            let file = File::create(&staging)
                .with_context(|| format!("failed to create {}", staging.display()))?;
            serde_json::to_writer_pretty(BufWriter::new(file), plot)?;
        }
        publish(&staging, &self.path)
    }
}

fn rgb(c: Rgb) -> RGBColor {
    RGBColor(c.0, c.1, c.2)
}

/// Split `[lo, hi]` into dashes of length `dash` separated by `gap`.
pub fn dash_segments(lo: f64, hi: f64, dash: f64, gap: f64) -> Vec<(f64, f64)> {
    if dash <= 0.0 || gap < 0.0 || hi <= lo {
        return vec![(lo, hi)];
    }
    let mut out = Vec::new();
    let mut start = lo;
    while start < hi {
        out.push((start, (start + dash).min(hi)));
        start += dash + gap;
    }
    out
}

fn format_tick(x: f64, offset: UtcOffset) -> String {
    OffsetDateTime::from_unix_timestamp(x.round() as i64)
        .ok()
        .and_then(|t| t.to_offset(offset).format(TICK).ok())
        .unwrap_or_default()
}

fn host_tick(hosts: &[&str], x: f64) -> String {
    let idx = x.round();
    if idx < 0.0 || (x - idx).abs() > 0.01 {
        return String::new();
    }
    hosts
        .get(idx as usize)
        .map(|h| h.to_string())
        .unwrap_or_default()
}

fn time_axis(plot: &Plot) -> (f64, f64) {
    match plot.time_range() {
        Some((lo, hi)) if hi - lo >= 1.0 => (lo, hi),
        Some((lo, hi)) => (lo - MIN_SPAN_SECS / 2.0, hi + MIN_SPAN_SECS / 2.0),
        None => (0.0, MIN_SPAN_SECS),
    }
}

fn latency_ceiling(plot: &Plot) -> f64 {
    plot.max_latency().map_or(1.0, |m| (m * 1.1).max(1.0))
}

fn draw_plot<DB: DrawingBackend>(root: &DrawingArea<DB, Shift>, plot: &Plot) -> Result<()> {
    root.fill(&WHITE).map_err(drawing_error)?;
    let y_max = latency_ceiling(plot);
    match &plot.spread {
        Some(spread) => {
            let (width, _) = root.dim_in_pixel();
            let (timeline, side) = root.split_horizontally(width * 7 / 10);
            draw_timeline(&timeline, plot, y_max)?;
            draw_spread(&side, spread, &plot.y_label, y_max)?;
        }
        None => draw_timeline(root, plot, y_max)?,
    }
    Ok(())
}

fn draw_timeline<DB: DrawingBackend>(
    area: &DrawingArea<DB, Shift>,
    plot: &Plot,
    y_max: f64,
) -> Result<()> {
    let (x_min, x_max) = time_axis(plot);
    let offset = plot.offset;

    let mut chart = ChartBuilder::on(area)
        .caption(&plot.title, ("sans-serif", 22))
        .margin(12)
        .x_label_area_size(40)
        .y_label_area_size(60)
        .build_cartesian_2d(x_min..x_max, 0.0..y_max)
        .map_err(drawing_error)?;

    chart
        .configure_mesh()
        .x_labels(MAX_X_LABELS)
        .x_label_formatter(&|x| format_tick(*x, offset))
        .x_desc(plot.x_label.as_str())
        .y_desc(plot.y_label.as_str())
        .draw()
        .map_err(drawing_error)?;

    for trace in &plot.traces {
        let color = rgb(trace.color);
        // Empty series carries the legend entry, so hosts without samples still get one.
        chart
            .draw_series(LineSeries::new(
                Vec::<(f64, f64)>::new(),
                color.stroke_width(2),
            ))
            .map_err(drawing_error)?
            .label(trace.label.as_str())
            .legend(move |(x, y)| PathElement::new(vec![(x, y), (x + 20, y)], color.stroke_width(2)));

        for run in trace.runs() {
            if run.len() == 1 {
                chart
                    .draw_series(run.into_iter().map(|p| Circle::new(p, 2, color.filled())))
                    .map_err(drawing_error)?;
            } else {
                chart
                    .draw_series(LineSeries::new(run, color.stroke_width(2)))
                    .map_err(drawing_error)?;
            }
        }
    }

    let (_, plot_height) = chart.plotting_area().dim_in_pixel();
    let per_pixel = y_max / f64::from(plot_height.max(1));
    for marker in &plot.markers {
        let color = rgb(marker.color);
        let (dash, gap) = marker.kind.pattern();
        let at = marker.at;
        let segments = dash_segments(
            0.0,
            y_max,
            f64::from(dash) * per_pixel,
            f64::from(gap) * per_pixel,
        );
        let anno = chart
            .draw_series(
                segments
                    .into_iter()
                    .map(move |(lo, hi)| PathElement::new(vec![(at, lo), (at, hi)], color.stroke_width(1))),
            )
            .map_err(drawing_error)?;
        if let Some(label) = &marker.label {
            let glyph = 2 * dash as i32;
            anno.label(label.as_str())
                .legend(move |(x, y)| PathElement::new(vec![(x, y), (x + glyph, y)], color.stroke_width(1)));
        }
    }

    if !plot.traces.is_empty() {
        chart
            .configure_series_labels()
            .position(SeriesLabelPosition::UpperLeft)
            .background_style(&WHITE.mix(0.8))
            .border_style(&BLACK)
            .draw()
            .map_err(drawing_error)?;
    }
    Ok(())
}

fn draw_spread<DB: DrawingBackend>(
    area: &DrawingArea<DB, Shift>,
    spread: &[Spread],
    y_label: &str,
    y_max: f64,
) -> Result<()> {
    let slots = spread.len().max(1);
    let hosts: Vec<&str> = spread.iter().map(|s| s.host.as_str()).collect();

    let mut chart = ChartBuilder::on(area)
        .caption("Distribution", ("sans-serif", 22))
        .margin(12)
        .x_label_area_size(40)
        .y_label_area_size(60)
        .build_cartesian_2d(-0.5..(slots as f64 - 0.5), 0.0..y_max)
        .map_err(drawing_error)?;

    chart
        .configure_mesh()
        .disable_x_mesh()
        .x_labels(slots)
        .x_label_formatter(&|x| host_tick(&hosts, *x))
        .y_desc(y_label)
        .draw()
        .map_err(drawing_error)?;

    const HALF: f64 = 0.3;
    for (idx, s) in spread.iter().enumerate() {
        let Some(sum) = s.summary else { continue };
        let x = idx as f64;
        let color = rgb(s.color);
        chart
            .draw_series([
                Rectangle::new([(x - HALF, sum.q1), (x + HALF, sum.q3)], color.mix(0.3).filled()),
                Rectangle::new([(x - HALF, sum.q1), (x + HALF, sum.q3)], color.stroke_width(1)),
            ])
            .map_err(drawing_error)?;
        chart
            .draw_series([
                PathElement::new(vec![(x, sum.min), (x, sum.q1)], color.stroke_width(1)),
                PathElement::new(vec![(x, sum.q3), (x, sum.max)], color.stroke_width(1)),
                PathElement::new(vec![(x - HALF / 2.0, sum.min), (x + HALF / 2.0, sum.min)], color.stroke_width(1)),
                PathElement::new(vec![(x - HALF / 2.0, sum.max), (x + HALF / 2.0, sum.max)], color.stroke_width(1)),
                PathElement::new(vec![(x - HALF, sum.median), (x + HALF, sum.median)], color.stroke_width(2)),
            ])
            .map_err(drawing_error)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chart::assemble;
    use crate::types::{Event, HostSeries};
    use time::macros::datetime;

    #[test]
    fn dashes_cover_range_without_overshoot() {
        let segs = dash_segments(0.0, 10.0, 3.0, 1.0);
        assert_eq!(segs, vec![(0.0, 3.0), (4.0, 7.0), (8.0, 10.0)]);
        assert_eq!(dash_segments(0.0, 10.0, 0.0, 1.0), vec![(0.0, 10.0)]);
    }

    #[test]
    fn staging_file_is_hidden_sibling_with_same_extension() {
        assert_eq!(
            staging_path(Path::new("/tmp/out/ping.png"), "png"),
            PathBuf::from("/tmp/out/.ping.partial.png")
        );
    }

    #[test]
    fn unknown_extension_rejected() {
        assert!(surface_for("ping.pdf", (800, 600)).is_err());
        assert!(surface_for("ping", (800, 600)).is_err());
        assert!(surface_for("ping.SVG", (800, 600)).is_ok());
    }

    #[test]
    fn ticks_use_plot_offset() {
        let x = datetime!(2021-09-20 15:00:00 UTC).unix_timestamp() as f64;
        assert_eq!(format_tick(x, UtcOffset::UTC), "Sep 20 15:00:00");
        let plus_two = UtcOffset::from_hms(2, 0, 0).unwrap();
        assert_eq!(format_tick(x, plus_two), "Sep 20 17:00:00");
    }

    #[test]
    fn host_ticks_only_on_slots() {
        let hosts = ["a", "b"];
        assert_eq!(host_tick(&hosts, 1.0), "b");
        assert_eq!(host_tick(&hosts, 0.5), "");
        assert_eq!(host_tick(&hosts, 2.0), "");
        assert_eq!(host_tick(&hosts, -0.5), "");
    }

    #[test]
    fn single_instant_gets_padded_axis() {
        let mut s = HostSeries::new("a");
        s.push(datetime!(2021-09-20 15:00:00 UTC), Event::Latency { ms: 5.0 });
        let plot = assemble(&[s], UtcOffset::UTC, false);
        let (lo, hi) = time_axis(&plot);
        assert_eq!(hi - lo, MIN_SPAN_SECS);
        assert!((latency_ceiling(&plot) - 5.5).abs() < 1e-9);
    }

    #[test]
    fn json_surface_writes_plot() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ping.json");
        let mut s = HostSeries::new("a");
        s.push(datetime!(2021-09-20 15:00:00 UTC), Event::Latency { ms: 5.0 });
        s.push(datetime!(2021-09-20 15:00:10 UTC), Event::Timeout);

        let mut surface = surface_for(&path, (800, 600)).unwrap();
        surface.render(&assemble(&[s], UtcOffset::UTC, true)).unwrap();

        let v: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(v["title"], "Ping Log");
        assert_eq!(v["traces"][0]["label"], "a");
        assert_eq!(v["markers"][0]["kind"], "timeout");
        assert_eq!(v["markers"][0]["label"], "a timeout");
        assert_eq!(v["spread"][0]["summary"]["count"], 1);
        assert!(!staging_path(&path, "json").exists());
    }
}
