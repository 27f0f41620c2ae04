//! Throughput, latency and error accounting.
//!
//! `Stats` is a bag of relaxed atomic counters shared by every thread in the
//! pipeline. Counts are approximate under contention and are never used for
//! control decisions.
//!
//! `StatsCollector` is owned by the decoder thread. Its `tick` is the per-attempt
//! reporting hook: every `interval` ticks it swaps all interval counters back to
//! zero, turns them into per-second rates and logs a `StatsReport`.

use serde::Serialize;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

/// Number of ticks between reports.
pub const DEFAULT_REPORT_INTERVAL: u64 = 16;

/// Accumulated duration of a repeated operation.
///
/// Count and total live under one lock so a report never sees a sample's
/// duration without its count.
#[derive(Debug, Default)]
pub struct Timer {
    window: Mutex<TimerWindow>,
}

#[derive(Debug, Default)]
struct TimerWindow {
    count: u64,
    total: Duration,
}

impl Timer {
    pub fn record(&self, elapsed: Duration) {
        let mut window = self.window.lock().unwrap_or_else(PoisonError::into_inner);
        window.count += 1;
        window.total = window.total.saturating_add(elapsed);
    }

    /// Run `f` and record how long it took.
    pub fn time<T>(&self, f: impl FnOnce() -> T) -> T {
        let started = Instant::now();
        let out = f();
        self.record(started.elapsed());
        out
    }

    /// Mean duration in milliseconds, `None` if nothing was recorded.
    fn take_mean_ms(&self) -> Option<f64> {
        let window = {
            let mut guard = self.window.lock().unwrap_or_else(PoisonError::into_inner);
            std::mem::take(&mut *guard)
        };
        if window.count == 0 {
            return None;
        }
        Some(window.total.as_secs_f64() * 1000.0 / window.count as f64)
    }
}

/// Interval counters shared across the pipeline.
#[derive(Debug, Default)]
pub struct Stats {
    bytes_read: AtomicU64,
    frames_decoded: AtomicU64,
    frames_dropped: AtomicU64,
    frames_streamed: AtomicU64,
    decode_errors: AtomicU64,
    process_errors: AtomicU64,
    encode_errors: AtomicU64,
    write_errors: AtomicU64,
    pub decode: Timer,
    pub process: Timer,
    pub encode: Timer,
    last_report: Mutex<Option<StatsReport>>,
}

impl Stats {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn add_bytes(&self, n: u64) {
        self.bytes_read.fetch_add(n, Ordering::Relaxed);
    }

    pub fn frame_decoded(&self) {
        self.frames_decoded.fetch_add(1, Ordering::Relaxed);
    }

    pub fn frames_dropped(&self, n: u64) {
        self.frames_dropped.fetch_add(n, Ordering::Relaxed);
    }

    pub fn frame_streamed(&self) {
        self.frames_streamed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn decode_error(&self) {
        self.decode_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn process_error(&self) {
        self.process_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn encode_error(&self) {
        self.encode_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn write_error(&self) {
        self.write_errors.fetch_add(1, Ordering::Relaxed);
    }

    /// Current (not yet reported) interval counters.
    pub fn counters(&self) -> Counters {
        Counters {
            bytes_read: self.bytes_read.load(Ordering::Relaxed),
            frames_decoded: self.frames_decoded.load(Ordering::Relaxed),
            frames_dropped: self.frames_dropped.load(Ordering::Relaxed),
            frames_streamed: self.frames_streamed.load(Ordering::Relaxed),
            decode_errors: self.decode_errors.load(Ordering::Relaxed),
            process_errors: self.process_errors.load(Ordering::Relaxed),
            encode_errors: self.encode_errors.load(Ordering::Relaxed),
            write_errors: self.write_errors.load(Ordering::Relaxed),
        }
    }

    /// Most recent report, if one has been produced.
    pub fn last_report(&self) -> Option<StatsReport> {
        self.last_report
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn take_counters(&self) -> Counters {
        Counters {
            bytes_read: self.bytes_read.swap(0, Ordering::Relaxed),
            frames_decoded: self.frames_decoded.swap(0, Ordering::Relaxed),
            frames_dropped: self.frames_dropped.swap(0, Ordering::Relaxed),
            frames_streamed: self.frames_streamed.swap(0, Ordering::Relaxed),
            decode_errors: self.decode_errors.swap(0, Ordering::Relaxed),
            process_errors: self.process_errors.swap(0, Ordering::Relaxed),
            encode_errors: self.encode_errors.swap(0, Ordering::Relaxed),
            write_errors: self.write_errors.swap(0, Ordering::Relaxed),
        }
    }

    fn store_report(&self, report: StatsReport) {
        *self
            .last_report
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(report);
    }
}

/// Plain copy of the interval counters.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Counters {
    pub bytes_read: u64,
    pub frames_decoded: u64,
    pub frames_dropped: u64,
    pub frames_streamed: u64,
    pub decode_errors: u64,
    pub process_errors: u64,
    pub encode_errors: u64,
    pub write_errors: u64,
}

impl Counters {
    pub fn errors(&self) -> u64 {
        self.decode_errors + self.process_errors + self.encode_errors + self.write_errors
    }
}

/// Rates over one reporting window.
#[derive(Clone, Debug, Serialize, PartialEq)]
pub struct StatsReport {
    pub window_secs: f64,
    pub kilobytes_per_sec: f64,
    pub decoded_per_sec: f64,
    pub dropped_per_sec: f64,
    pub streamed_per_sec: f64,
    pub errors_per_sec: f64,
    pub decode_errors: u64,
    pub process_errors: u64,
    pub encode_errors: u64,
    pub write_errors: u64,
    pub mean_decode_ms: Option<f64>,
    pub mean_process_ms: Option<f64>,
    pub mean_encode_ms: Option<f64>,
}

impl fmt::Display for StatsReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:.1}kB/s decode:{:.1}/s drop:{:.1}/s stream:{:.1}/s errors:{:.1}/s | decode {} process {} encode {}",
            self.kilobytes_per_sec,
            self.decoded_per_sec,
            self.dropped_per_sec,
            self.streamed_per_sec,
            self.errors_per_sec,
            format_ms(self.mean_decode_ms),
            format_ms(self.mean_process_ms),
            format_ms(self.mean_encode_ms),
        )
    }
}

fn format_ms(value: Option<f64>) -> String {
    match value {
        Some(ms) => format!("{:.2}ms", ms),
        None => "-".to_string(),
    }
}

pub struct StatsCollector {
    stats: Arc<Stats>,
    interval: u64,
    ticks: u64,
    window_start: Instant,
    verbose: bool,
}

impl StatsCollector {
    pub fn new(stats: Arc<Stats>, interval: u64, verbose: bool) -> Self {
        Self {
            stats,
            interval: interval.max(1),
            ticks: 0,
            window_start: Instant::now(),
            verbose,
        }
    }

    /// Count one pipeline iteration; every `interval` calls, report and reset.
    pub fn tick(&mut self) -> Option<StatsReport> {
        self.ticks += 1;
        if self.ticks % self.interval != 0 {
            return None;
        }
        let now = Instant::now();
        let window = now.duration_since(self.window_start);
        self.window_start = now;

        let report = self.build_report(window);
        if self.verbose {
            log::info!("{}", report);
        } else {
            log::debug!("{}", report);
        }
        self.stats.store_report(report.clone());
        Some(report)
    }

    fn build_report(&self, window: Duration) -> StatsReport {
        // Guard against a zero-length window on coarse clocks.
        let secs = window.as_secs_f64().max(1e-6);
        let counters = self.stats.take_counters();
        let rate = |n: u64| n as f64 / secs;
        StatsReport {
            window_secs: secs,
            kilobytes_per_sec: rate(counters.bytes_read) / 1000.0,
            decoded_per_sec: rate(counters.frames_decoded),
            dropped_per_sec: rate(counters.frames_dropped),
            streamed_per_sec: rate(counters.frames_streamed),
            errors_per_sec: rate(counters.errors()),
            decode_errors: counters.decode_errors,
            process_errors: counters.process_errors,
            encode_errors: counters.encode_errors,
            write_errors: counters.write_errors,
            mean_decode_ms: self.stats.decode.take_mean_ms(),
            mean_process_ms: self.stats.process.take_mean_ms(),
            mean_encode_ms: self.stats.encode.take_mean_ms(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reports_every_interval_and_resets_counters() {
        let stats = Stats::new();
        let mut collector = StatsCollector::new(stats.clone(), DEFAULT_REPORT_INTERVAL, false);

        stats.add_bytes(4096);
        stats.frame_decoded();
        stats.frames_dropped(3);
        stats.decode_error();
        stats.decode.record(Duration::from_millis(4));
        stats.decode.record(Duration::from_millis(6));

        for _ in 0..DEFAULT_REPORT_INTERVAL - 1 {
            assert!(collector.tick().is_none());
        }
        let report = collector.tick().expect("report on 16th tick");

        assert_eq!(stats.counters(), Counters::default());
        assert!(report.kilobytes_per_sec > 0.0);
        assert!(report.dropped_per_sec > 0.0);
        assert_eq!(report.decode_errors, 1);
        let mean = report.mean_decode_ms.expect("decode timer mean");
        assert!((mean - 5.0).abs() < 1e-9);
        assert_eq!(report.mean_encode_ms, None);
        assert_eq!(stats.last_report(), Some(report));
    }

    #[test]
    fn empty_window_reports_zero_rates() {
        let stats = Stats::new();
        let mut collector = StatsCollector::new(stats, 1, false);
        let report = collector.tick().unwrap();

        for rate in [
            report.kilobytes_per_sec,
            report.decoded_per_sec,
            report.dropped_per_sec,
            report.streamed_per_sec,
            report.errors_per_sec,
        ] {
            assert_eq!(rate, 0.0);
        }
        assert!(report.window_secs > 0.0);
    }

    #[test]
    fn timer_times_closures() {
        let timer = Timer::default();
        let value = timer.time(|| 7);
        assert_eq!(value, 7);
        assert!(timer.take_mean_ms().is_some());
        assert!(timer.take_mean_ms().is_none());
    }

    #[test]
    fn timer_windows_never_split_a_sample() {
        let timer = Arc::new(Timer::default());
        let recorder = {
            let timer = Arc::clone(&timer);
            std::thread::spawn(move || {
                for _ in 0..10_000 {
                    timer.record(Duration::from_millis(2));
                }
            })
        };

        let mut means = Vec::new();
        while !recorder.is_finished() {
            means.extend(timer.take_mean_ms());
        }
        recorder.join().unwrap();
        means.extend(timer.take_mean_ms());

        assert!(!means.is_empty());
        for mean in means {
            assert!((mean - 2.0).abs() < 1e-9, "mean {}", mean);
        }
    }

    #[test]
    fn display_matches_log_line_shape() {
        let stats = Stats::new();
        let mut collector = StatsCollector::new(stats, 1, false);
        let line = collector.tick().unwrap().to_string();
        assert!(line.contains("kB/s decode:"));
        assert!(line.contains("decode - process - encode -"));
    }
}
