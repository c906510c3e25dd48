use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use ping_plot::clock::SystemClock;
use ping_plot::config::LoggerConfig;
use ping_plot::logger::ProbeLogger;
use ping_plot::prober::Prober;
use ping_plot::types::{LogLine, ProbeOutcome};
use time::UtcOffset;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Takes `delay` per probe, records when each probe starts, and cancels the
/// loop once `limit` probes have completed.
struct ScriptedProber {
    delay: Duration,
    limit: usize,
    started: Arc<Mutex<Vec<(String, Instant)>>>,
    cancel: CancellationToken,
}

#[async_trait]
impl Prober for ScriptedProber {
    async fn probe(&self, host: &str, _timeout: Duration) -> ProbeOutcome {
        let count = {
            let mut started = self.started.lock().unwrap();
            started.push((host.to_string(), Instant::now()));
            started.len()
        };
        tokio::time::sleep(self.delay).await;
        if count >= self.limit {
            self.cancel.cancel();
        }
        ProbeOutcome::Success(0.001)
    }
}

struct Run {
    started: Vec<(String, Instant)>,
    lines: Vec<LogLine>,
}

async fn run_logger(hosts: &[&str], interval: Duration, delay: Duration, limit: usize) -> Run {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("ping.log");
    let cancel = CancellationToken::new();
    let started = Arc::new(Mutex::new(Vec::new()));
    let prober = ScriptedProber {
        delay,
        limit,
        started: started.clone(),
        cancel: cancel.clone(),
    };
    let config = LoggerConfig {
        hosts: hosts.iter().map(|h| h.to_string()).collect(),
        interval,
        timeout: Duration::from_secs(2),
        log_path: path.clone(),
        quiet: true,
    };

    let mut logger = ProbeLogger::new(config, prober, SystemClock::utc()).unwrap();
    logger.run(cancel).await.unwrap();

    let started = started.lock().unwrap().clone();
    Run {
        started,
        lines: read_lines(&path),
    }
}

fn read_lines(path: &Path) -> Vec<LogLine> {
    let text = std::fs::read_to_string(path).unwrap();
    assert!(text.is_empty() || text.ends_with('\n'), "partial line in {text:?}");
    text.lines()
        .map(|l| LogLine::parse(l, UtcOffset::UTC).unwrap())
        .collect()
}

fn cycle_gaps(started: &[(String, Instant)], first_host: &str) -> Vec<Duration> {
    let starts: Vec<Instant> = started
        .iter()
        .filter(|(h, _)| h == first_host)
        .map(|(_, t)| *t)
        .collect();
    starts.windows(2).map(|w| w[1] - w[0]).collect()
}

fn assert_close(actual: Duration, expected: Duration) {
    assert!(
        actual >= expected && actual - expected < Duration::from_millis(5),
        "expected ~{expected:?}, got {actual:?}"
    );
}

#[tokio::test(start_paused = true)]
async fn cycles_start_one_interval_apart() {
    let run = run_logger(&["a", "b"], Duration::from_secs(5), Duration::from_secs(1), 6).await;

    let gaps = cycle_gaps(&run.started, "a");
    assert_eq!(gaps.len(), 2);
    for gap in gaps {
        assert_close(gap, Duration::from_secs(5));
    }
    assert_eq!(run.lines.len(), 6);
    let hosts: Vec<_> = run.lines.iter().map(|l| l.host.as_str()).collect();
    assert_eq!(hosts, vec!["a", "b", "a", "b", "a", "b"]);
}

#[tokio::test(start_paused = true)]
async fn overrunning_cycles_run_back_to_back() {
    let run = run_logger(&["a", "b", "c"], Duration::from_secs(5), Duration::from_secs(3), 9).await;

    let gaps = cycle_gaps(&run.started, "a");
    assert_eq!(gaps.len(), 2);
    for gap in gaps {
        assert_close(gap, Duration::from_secs(9));
    }
    assert_eq!(run.lines.len(), 9);
}

#[tokio::test(start_paused = true)]
async fn stopping_mid_cycle_leaves_only_whole_lines() {
    let run = run_logger(&["a", "b", "c"], Duration::from_secs(5), Duration::from_secs(1), 2).await;

    assert_eq!(run.started.len(), 2);
    let hosts: Vec<_> = run.lines.iter().map(|l| l.host.as_str()).collect();
    assert_eq!(hosts, vec!["a", "b"]);
}
