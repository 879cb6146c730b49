//! Metric reduction and comparison.
//!
//! The [`MetricsAggregator`] is owned by the orchestrator for the lifetime
//! of one run. It keeps the full per-tick sequence of each session plus
//! running statistics cheap enough to read every tick. Summaries and the
//! adaptive-versus-fixed comparison are pure functions over those
//! sequences.

use std::sync::{Mutex, PoisonError};
use std::time::{Duration, Instant};

use signal_types::{
    Comparison, ControllerKind, Improvement, RunSummary, TickMetrics, TimeSeries,
};

/// Convert a count into `f64` for averaging.
///
/// Counts in this crate stay far below 2^52, so the conversion is exact.
#[allow(clippy::cast_precision_loss)]
pub const fn count_as_f64(count: u64) -> f64 {
    count as f64
}

/// Reduce a full tick-metrics sequence into a summary.
pub fn summarize(kind: ControllerKind, ticks: &[TickMetrics], elapsed: Duration) -> RunSummary {
    let mut stats = RunningStats::default();
    for metrics in ticks {
        stats.push(metrics);
    }
    stats.summary(kind, elapsed)
}

/// Relative improvement of `adaptive` over `fixed`.
///
/// Lower-is-better metrics use `(fixed - adaptive) / fixed * 100`;
/// throughput uses `(adaptive - fixed) / fixed * 100`. A zero baseline
/// gives 0.
pub fn improvement(adaptive: &RunSummary, fixed: &RunSummary) -> Improvement {
    Improvement {
        waiting_time_reduction: percent_change(fixed.avg_waiting_time, adaptive.avg_waiting_time),
        queue_length_reduction: percent_change(fixed.avg_queue_length, adaptive.avg_queue_length),
        throughput_increase: -percent_change(
            count_as_f64(fixed.total_throughput),
            count_as_f64(adaptive.total_throughput),
        ),
    }
}

/// `(baseline - candidate) / baseline * 100`, or 0 for a zero baseline.
fn percent_change(baseline: f64, candidate: f64) -> f64 {
    if baseline.abs() < f64::EPSILON {
        return 0.0;
    }
    (baseline - candidate) / baseline * 100.0
}

/// Every `stride`-th element, starting with the first.
pub fn downsample<T: Copy>(values: &[T], stride: usize) -> Vec<T> {
    values.iter().step_by(stride.max(1)).copied().collect()
}

/// Incremental means and maxima over a tick-metrics stream.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct RunningStats {
    ticks: u64,
    waiting_sum: f64,
    waiting_max: f64,
    queue_sum: u64,
    queue_max: u32,
    throughput: u64,
}

impl RunningStats {
    /// Fold one tick in.
    pub fn push(&mut self, metrics: &TickMetrics) {
        self.ticks = self.ticks.saturating_add(1);
        self.waiting_sum += metrics.waiting_time;
        self.waiting_max = self.waiting_max.max(metrics.waiting_time);
        self.queue_sum = self.queue_sum.saturating_add(u64::from(metrics.queue_length));
        self.queue_max = self.queue_max.max(metrics.queue_length);
        self.throughput = self.throughput.saturating_add(u64::from(metrics.throughput));
    }

    /// Ticks folded in.
    pub const fn ticks(&self) -> u64 {
        self.ticks
    }

    /// Mean waiting time, 0 before the first tick.
    pub fn mean_waiting_time(&self) -> f64 {
        if self.ticks == 0 {
            0.0
        } else {
            self.waiting_sum / count_as_f64(self.ticks)
        }
    }

    /// Mean queue length, 0 before the first tick.
    pub fn mean_queue_length(&self) -> f64 {
        if self.ticks == 0 {
            0.0
        } else {
            count_as_f64(self.queue_sum) / count_as_f64(self.ticks)
        }
    }

    /// Maximum waiting time seen.
    pub const fn max_waiting_time(&self) -> f64 {
        self.waiting_max
    }

    /// Maximum queue length seen.
    pub const fn max_queue_length(&self) -> u32 {
        self.queue_max
    }

    /// Total throughput.
    pub const fn total_throughput(&self) -> u64 {
        self.throughput
    }

    /// Freeze into a summary.
    pub fn summary(&self, kind: ControllerKind, elapsed: Duration) -> RunSummary {
        RunSummary {
            controller: kind,
            ticks: self.ticks,
            avg_waiting_time: self.mean_waiting_time(),
            max_waiting_time: self.waiting_max,
            avg_queue_length: self.mean_queue_length(),
            max_queue_length: self.queue_max,
            total_throughput: self.throughput,
            elapsed_seconds: elapsed.as_secs_f64(),
        }
    }
}

/// Per-run metric store for both sessions.
#[derive(Debug, Clone, Default)]
pub struct MetricsAggregator {
    adaptive: Vec<TickMetrics>,
    fixed: Vec<TickMetrics>,
    adaptive_stats: RunningStats,
    fixed_stats: RunningStats,
}

impl MetricsAggregator {
    /// An empty aggregator.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append one tick for a session.
    pub fn record(&mut self, kind: ControllerKind, metrics: TickMetrics) {
        match kind {
            ControllerKind::Adaptive => {
                self.adaptive.push(metrics);
                self.adaptive_stats.push(&metrics);
            }
            ControllerKind::Fixed => {
                self.fixed.push(metrics);
                self.fixed_stats.push(&metrics);
            }
        }
    }

    /// Full per-tick sequence of a session.
    pub fn sequence(&self, kind: ControllerKind) -> &[TickMetrics] {
        match kind {
            ControllerKind::Adaptive => &self.adaptive,
            ControllerKind::Fixed => &self.fixed,
        }
    }

    /// Running statistics of a session.
    pub const fn running(&self, kind: ControllerKind) -> &RunningStats {
        match kind {
            ControllerKind::Adaptive => &self.adaptive_stats,
            ControllerKind::Fixed => &self.fixed_stats,
        }
    }

    /// Summary of a session, or `None` if it recorded nothing.
    pub fn summary(&self, kind: ControllerKind, elapsed: Duration) -> Option<RunSummary> {
        let stats = self.running(kind);
        (stats.ticks() > 0).then(|| stats.summary(kind, elapsed))
    }

    /// Side-by-side comparison, available once both sessions have data.
    pub fn comparison(&self, elapsed: Duration, stride: usize) -> Option<Comparison> {
        let adaptive = self.summary(ControllerKind::Adaptive, elapsed)?;
        let fixed = self.summary(ControllerKind::Fixed, elapsed)?;
        let improvement = improvement(&adaptive, &fixed);

        let waiting = |seq: &[TickMetrics]| {
            downsample(&seq.iter().map(|m| m.waiting_time).collect::<Vec<_>>(), stride)
        };
        let queue = |seq: &[TickMetrics]| {
            downsample(&seq.iter().map(|m| m.queue_length).collect::<Vec<_>>(), stride)
        };
        let time_series = TimeSeries {
            adaptive_waiting: waiting(&self.adaptive),
            fixed_waiting: waiting(&self.fixed),
            adaptive_queue: queue(&self.adaptive),
            fixed_queue: queue(&self.fixed),
        };

        Some(Comparison {
            adaptive,
            fixed,
            improvement,
            time_series,
        })
    }
}

/// The current run's aggregator, shared between the run loop and readers.
///
/// The run loop records into it every tick; the control surface reads
/// running summaries and the live comparison from it while the run is in
/// progress. Each run starts from [`reset`](Self::reset).
#[derive(Debug)]
pub struct LiveMetrics {
    series_stride: usize,
    state: Mutex<LiveState>,
}

#[derive(Debug)]
struct LiveState {
    aggregator: MetricsAggregator,
    started: Instant,
}

impl LiveMetrics {
    /// Empty store; comparisons keep every `series_stride`-th tick.
    pub fn new(series_stride: usize) -> Self {
        Self {
            series_stride,
            state: Mutex::new(LiveState {
                aggregator: MetricsAggregator::new(),
                started: Instant::now(),
            }),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, LiveState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Forget the previous run and restart the clock.
    pub fn reset(&self) {
        let mut state = self.lock();
        state.aggregator = MetricsAggregator::new();
        state.started = Instant::now();
    }

    /// Append one completed tick for every session that ran it.
    ///
    /// Readers never see one session a tick ahead of the other.
    pub fn record_tick(&self, snapshot: &[(ControllerKind, TickMetrics)]) {
        let mut state = self.lock();
        for &(kind, metrics) in snapshot {
            state.aggregator.record(kind, metrics);
        }
    }

    /// Running statistics of a session.
    pub fn running(&self, kind: ControllerKind) -> RunningStats {
        *self.lock().aggregator.running(kind)
    }

    /// Summary of a session so far, or `None` if it recorded nothing.
    pub fn summary(&self, kind: ControllerKind, elapsed: Duration) -> Option<RunSummary> {
        self.lock().aggregator.summary(kind, elapsed)
    }

    /// Comparison over the ticks recorded so far.
    pub fn comparison(&self) -> Option<Comparison> {
        let state = self.lock();
        state
            .aggregator
            .comparison(state.started.elapsed(), self.series_stride)
    }

    /// Comparison with an explicit elapsed time.
    pub fn comparison_at(&self, elapsed: Duration) -> Option<Comparison> {
        self.lock().aggregator.comparison(elapsed, self.series_stride)
    }

    /// Copy of the aggregator.
    pub fn snapshot(&self) -> MetricsAggregator {
        self.lock().aggregator.clone()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn approx(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    fn tick(waiting_time: f64, queue_length: u32, throughput: u32) -> TickMetrics {
        TickMetrics {
            waiting_time,
            queue_length,
            throughput,
        }
    }

    #[test]
    fn summary_means_and_maxima() {
        let seq = [tick(2.0, 4, 1), tick(4.0, 2, 0), tick(0.0, 0, 3)];
        let summary = summarize(ControllerKind::Fixed, &seq, Duration::from_secs(2));
        assert_eq!(summary.ticks, 3);
        assert!(approx(summary.avg_waiting_time, 2.0));
        assert!(approx(summary.max_waiting_time, 4.0));
        assert!(approx(summary.avg_queue_length, 2.0));
        assert_eq!(summary.max_queue_length, 4);
        assert_eq!(summary.total_throughput, 4);
        assert!(approx(summary.elapsed_seconds, 2.0));
    }

    #[test]
    fn empty_sequence_is_all_zero() {
        let summary = summarize(ControllerKind::Adaptive, &[], Duration::ZERO);
        assert_eq!(summary.ticks, 0);
        assert!(approx(summary.avg_waiting_time, 0.0));
        assert!(approx(summary.avg_queue_length, 0.0));
    }

    #[test]
    fn improvement_formulas() {
        let fixed = summarize(ControllerKind::Fixed, &[tick(10.0, 8, 4)], Duration::ZERO);
        let adaptive = summarize(ControllerKind::Adaptive, &[tick(5.0, 6, 5)], Duration::ZERO);
        let result = improvement(&adaptive, &fixed);
        assert!(approx(result.waiting_time_reduction, 50.0));
        assert!(approx(result.queue_length_reduction, 25.0));
        assert!(approx(result.throughput_increase, 25.0));
    }

    #[test]
    fn zero_baseline_gives_zero_improvement() {
        let fixed = summarize(ControllerKind::Fixed, &[tick(0.0, 0, 0)], Duration::ZERO);
        let adaptive = summarize(ControllerKind::Adaptive, &[tick(3.0, 2, 7)], Duration::ZERO);
        let result = improvement(&adaptive, &fixed);
        assert!(approx(result.waiting_time_reduction, 0.0));
        assert!(approx(result.queue_length_reduction, 0.0));
        assert!(approx(result.throughput_increase, 0.0));
        assert!(result.waiting_time_reduction.is_finite());
    }

    #[test]
    fn downsample_keeps_first_of_each_stride() {
        let values: Vec<u32> = (0..25).collect();
        assert_eq!(downsample(&values, 10), vec![0, 10, 20]);
        assert_eq!(downsample(&values, 0).len(), 25);
    }

    #[test]
    fn comparison_requires_both_sessions() {
        let mut agg = MetricsAggregator::new();
        agg.record(ControllerKind::Adaptive, tick(1.0, 1, 1));
        assert!(agg.comparison(Duration::ZERO, 10).is_none());
        agg.record(ControllerKind::Fixed, tick(2.0, 2, 1));
        let comparison = agg.comparison(Duration::ZERO, 10).unwrap();
        assert_eq!(comparison.time_series.adaptive_queue, vec![1]);
        assert!(approx(comparison.improvement.waiting_time_reduction, 50.0));
    }

    #[test]
    fn running_stats_track_sequence() {
        let mut agg = MetricsAggregator::new();
        for i in 0..5_u32 {
            agg.record(ControllerKind::Fixed, tick(f64::from(i), i, 1));
        }
        let running = agg.running(ControllerKind::Fixed);
        assert_eq!(running.ticks(), 5);
        assert!(approx(running.mean_waiting_time(), 2.0));
        assert_eq!(running.max_queue_length(), 4);
        assert_eq!(running.total_throughput(), 5);
        assert_eq!(agg.sequence(ControllerKind::Fixed).len(), 5);
        assert!(agg.sequence(ControllerKind::Adaptive).is_empty());
    }

    #[test]
    fn live_metrics_reset_between_runs() {
        let live = LiveMetrics::new(1);
        live.record_tick(&[(ControllerKind::Adaptive, tick(4.0, 2, 1))]);
        assert!(live.comparison().is_none());
        live.record_tick(&[(ControllerKind::Fixed, tick(8.0, 2, 1))]);
        let comparison = live.comparison().unwrap();
        assert_eq!(comparison.adaptive.ticks, 1);
        assert!(approx(comparison.improvement.waiting_time_reduction, 50.0));
        assert_eq!(live.running(ControllerKind::Fixed).ticks(), 1);

        live.reset();
        assert!(live.comparison().is_none());
        assert!(live.summary(ControllerKind::Adaptive, Duration::ZERO).is_none());
        assert!(live.snapshot().sequence(ControllerKind::Fixed).is_empty());
    }
}
