use std::path::PathBuf;

use anyhow::Result;
use clap::{Args, Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use ping_plot::chart::ChartSurface;
use ping_plot::clock::SystemClock;
use ping_plot::config::{self, LoggerConfig, PlotConfig, SourceConfig};
use ping_plot::logger::ProbeLogger;
use ping_plot::prober::IcmpProber;
use ping_plot::render;
use ping_plot::renderer::{RenderOptions, Renderer};
use ping_plot::source::{LocalLog, LogReader, RemoteLog, RemoteTarget};

/// ping-plot — interval ping logger and latency chart renderer sharing one text log.
#[derive(Debug, Parser)]
#[command(
    name = "ping-plot",
    version,
    about = "Interval ping logger and latency chart renderer sharing one text log.",
    long_about = None
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Probe hosts forever, appending one log line per host per cycle.
    Log(LogArgs),
    /// Read the log and draw latency over time.
    Plot(PlotArgs),
}

#[derive(Debug, Clone, Args)]
struct LogArgs {
    /// Host(s) to ping, comma separated (e.g. 1.1.1.1,example.com).
    #[arg(long = "host", env = "PING_PLOT_HOSTS")]
    hosts: String,

    /// Seconds from the start of one cycle to the start of the next.
    #[arg(short, long, default_value_t = config::DEFAULT_INTERVAL_SECS)]
    interval: f64,

    /// Log file to append to.
    #[arg(short, long, default_value = config::DEFAULT_LOG_PATH, env = "PING_PLOT_LOG")]
    log: PathBuf,

    /// Do not echo log lines to stdout.
    #[arg(short, long, default_value_t = false)]
    quiet: bool,

    /// Per-probe timeout in seconds.
    #[arg(short, long, default_value_t = config::DEFAULT_TIMEOUT_SECS)]
    timeout: f64,
}

#[derive(Debug, Clone, Args)]
struct PlotArgs {
    /// Log file to read (path on the remote host with --remote).
    #[arg(short, long, default_value = config::DEFAULT_LOG_PATH, env = "PING_PLOT_LOG")]
    log: PathBuf,

    /// Read the log over SFTP from user@host[:port] (port defaults to 22).
    #[arg(long, env = "PING_PLOT_REMOTE")]
    remote: Option<RemoteTarget>,

    /// Private key for --remote. ssh-agent is used when omitted.
    #[arg(long)]
    identity: Option<PathBuf>,

    /// Keep re-reading the log and redrawing until interrupted.
    #[arg(long, default_value_t = false)]
    live: bool,

    /// Seconds between live redraws.
    #[arg(short, long, default_value_t = config::DEFAULT_INTERVAL_SECS)]
    interval: f64,

    /// Only show the last <WINDOW> seconds of data.
    #[arg(short, long)]
    window: Option<f64>,

    /// Add a per-host latency distribution panel.
    #[arg(long, default_value_t = false)]
    distribution: bool,

    /// Chart file to write: .svg, .png or .json.
    #[arg(short, long, default_value = "ping.svg")]
    output: PathBuf,

    /// Chart width in pixels.
    #[arg(long, default_value_t = 1200)]
    width: u32,

    /// Chart height in pixels.
    #[arg(long, default_value_t = 600)]
    height: u32,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    // Must run before anything spawns a thread.
    let clock = SystemClock::local();
    let cancel = cancel_on_ctrl_c();

    match cli.command {
        Command::Log(args) => run_logger(args, clock, cancel).await,
        Command::Plot(args) => run_plot(args, clock, cancel).await,
    }
}

/// Ctrl-C cancels the returned token.
fn cancel_on_ctrl_c() -> CancellationToken {
    let cancel = CancellationToken::new();
    let token = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("interrupt received, stopping");
            token.cancel();
        }
    });
    cancel
}

async fn run_logger(args: LogArgs, clock: SystemClock, cancel: CancellationToken) -> Result<()> {
    let config = LoggerConfig::new(
        &args.hosts,
        args.interval,
        args.timeout,
        args.log,
        args.quiet,
    )?;
    let prober = IcmpProber::new()?;
    let mut logger = ProbeLogger::new(config, prober, clock)?;
    logger.run(cancel).await
}

async fn run_plot(args: PlotArgs, clock: SystemClock, cancel: CancellationToken) -> Result<()> {
    let config = PlotConfig::new(
        args.log,
        args.remote,
        args.identity,
        args.live,
        args.interval,
        args.window,
        args.distribution,
        args.output,
        (args.width, args.height),
    )?;
    let surface = render::surface_for(&config.output, config.size)?;
    let options = RenderOptions {
        live: config.live,
        interval: config.interval,
        window: config.window,
        distribution: config.distribution,
    };

    match config.source {
        SourceConfig::Local(path) => {
            render_loop(LocalLog::new(path), surface, clock, options, &config.output, cancel).await
        }
        SourceConfig::Remote {
            target,
            path,
            identity,
        } => {
            let reader = RemoteLog::connect(target, path, identity).await?;
            render_loop(reader, surface, clock, options, &config.output, cancel).await
        }
    }
}

async fn render_loop<R: LogReader, S: ChartSurface>(
    reader: R,
    surface: S,
    clock: SystemClock,
    options: RenderOptions,
    output: &std::path::Path,
    cancel: CancellationToken,
) -> Result<()> {
    tracing::info!(
        source = %reader.describe(),
        output = %output.display(),
        live = options.live,
        window = ?options.window,
        "rendering ping log"
    );
    let mut renderer = Renderer::new(reader, surface, clock, options);
    let passes = renderer.run(cancel).await?;
    tracing::info!(passes, output = %output.display(), "chart written");
    Ok(())
}
