//! Throughput reporting for the record stream.

use indicatif::{ProgressBar, ProgressStyle};
use std::time::{Duration, Instant};
use tracing::info;

/// Throughput at the moment of a report.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Throughput {
    pub records: u64,
    /// Records per second since the monitor started.
    pub lifetime: f64,
    /// Records per second since the previous report.
    pub momentary: f64,
}

/// Counts records and reports throughput at most once per interval.
///
/// Purely an observer: it never blocks and holds no pipeline data.
pub struct ProgressMonitor {
    interval: Duration,
    started: Instant,
    last_report: Instant,
    last_count: u64,
    count: u64,
    spinner: Option<ProgressBar>,
}

impl ProgressMonitor {
    pub fn new(interval: Duration) -> Self {
        Self::starting_at(interval, Instant::now())
    }

    pub fn starting_at(interval: Duration, now: Instant) -> Self {
        Self {
            interval,
            started: now,
            last_report: now,
            last_count: 0,
            count: 0,
            spinner: None,
        }
    }

    /// Mirrors reports on a terminal spinner.
    pub fn with_spinner(mut self) -> Self {
        self.spinner = Some(make_spinner("Reading records..."));
        self
    }

    pub fn on_record(&mut self) -> Option<Throughput> {
        self.on_record_at(Instant::now())
    }

    /// Counts one record observed at `now`; returns a report when the interval
    /// has elapsed since the previous one.
    pub fn on_record_at(&mut self, now: Instant) -> Option<Throughput> {
        self.count += 1;
        if now.saturating_duration_since(self.last_report) <= self.interval {
            return None;
        }
        let report = self.throughput_at(now);
        self.last_report = now;
        self.last_count = self.count;

        info!(
            records = report.records,
            lifetime = report.lifetime as u64,
            momentary = report.momentary as u64,
            "Records per second"
        );
        if let Some(spinner) = &self.spinner {
            spinner.set_message(format!(
                "{} records, {:.0}/s global, {:.0}/s momentary",
                report.records, report.lifetime, report.momentary
            ));
        }
        Some(report)
    }

    fn throughput_at(&self, now: Instant) -> Throughput {
        let total = now.saturating_duration_since(self.started).as_secs_f64();
        let delta = now.saturating_duration_since(self.last_report).as_secs_f64();
        Throughput {
            records: self.count,
            lifetime: rate(self.count, total),
            momentary: rate(self.count - self.last_count, delta),
        }
    }

    pub fn count(&self) -> u64 {
        self.count
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    pub fn finish(&self) {
        if let Some(spinner) = &self.spinner {
            spinner.finish_with_message(format!("{} records read", self.count));
        }
    }
}

fn rate(count: u64, secs: f64) -> f64 {
    if secs > 0.0 {
        count as f64 / secs
    } else {
        0.0
    }
}

pub fn make_spinner(msg: &str) -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    pb.set_style(
        ProgressStyle::default_spinner()
            .template("{spinner:.cyan} [{elapsed_precise}] {msg}")
            .unwrap(),
    );
    pb.enable_steady_tick(Duration::from_millis(100));
    pb.set_message(msg.to_string());
    pb
}
