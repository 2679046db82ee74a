//! Throughput estimate over recent progress reports.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::{Duration, Instant};

const DEFAULT_WINDOW: Duration = Duration::from_secs(5);
const DEFAULT_MAX_POINTS: usize = 100;

/// Estimates bytes per second from cumulative positions observed within
/// a sliding time window.
///
/// Positions are absolute (bytes done so far), so a run that resumes at
/// a checkpoint only needs to report where it is. A position lower than
/// the previous one starts a fresh window.
pub struct ThroughputMeter {
    window: Duration,
    max_points: usize,
    points: Mutex<VecDeque<(Instant, u64)>>,
}

impl Default for ThroughputMeter {
    fn default() -> Self {
        Self::new(DEFAULT_WINDOW, DEFAULT_MAX_POINTS)
    }
}

impl ThroughputMeter {
    pub fn new(window: Duration, max_points: usize) -> Self {
        Self {
            window,
            max_points: max_points.max(2),
            points: Mutex::new(VecDeque::new()),
        }
    }

    pub fn observe(&self, position: u64) {
        self.observe_at(Instant::now(), position);
    }

    fn observe_at(&self, now: Instant, position: u64) {
        let mut points = self.points.lock().unwrap_or_else(|e| e.into_inner());
        if points.back().is_some_and(|&(_, last)| position < last) {
            points.clear();
        }
        points.push_back((now, position));

        while points.len() > self.max_points {
            points.pop_front();
        }
        while points
            .front()
            .is_some_and(|&(at, _)| now.duration_since(at) > self.window)
        {
            points.pop_front();
        }
    }

    /// Bytes per second across the window, 0.0 until two points exist.
    pub fn bytes_per_second(&self) -> f64 {
        let points = self.points.lock().unwrap_or_else(|e| e.into_inner());
        let (Some(&(start, from)), Some(&(end, to))) = (points.front(), points.back()) else {
            return 0.0;
        };
        let elapsed = end.duration_since(start);
        if elapsed.is_zero() {
            return 0.0;
        }
        (to - from) as f64 / elapsed.as_secs_f64()
    }

    /// Time left for `remaining_bytes` at the current rate.
    pub fn eta(&self, remaining_bytes: u64) -> Option<Duration> {
        let rate = self.bytes_per_second();
        (rate > 0.0).then(|| Duration::from_secs_f64(remaining_bytes as f64 / rate))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_until_two_points() {
        let meter = ThroughputMeter::default();
        assert_eq!(meter.bytes_per_second(), 0.0);
        meter.observe(100);
        assert_eq!(meter.bytes_per_second(), 0.0);
        assert!(meter.eta(1000).is_none());
    }

    #[test]
    fn rate_from_first_to_last_point() {
        let meter = ThroughputMeter::default();
        let t0 = Instant::now();
        meter.observe_at(t0, 1_000);
        meter.observe_at(t0 + Duration::from_millis(500), 2_000);
        meter.observe_at(t0 + Duration::from_secs(2), 5_000);

        assert!((meter.bytes_per_second() - 2_000.0).abs() < 1e-6);
        let eta = meter.eta(4_000).unwrap();
        assert!((eta.as_secs_f64() - 2.0).abs() < 1e-6);
    }

    #[test]
    fn old_points_leave_the_window() {
        let meter = ThroughputMeter::new(Duration::from_secs(1), 100);
        let t0 = Instant::now();
        meter.observe_at(t0, 0);
        meter.observe_at(t0 + Duration::from_secs(5), 100);
        meter.observe_at(t0 + Duration::from_millis(5_500), 600);

        assert!((meter.bytes_per_second() - 1_000.0).abs() < 1e-6);
    }

    #[test]
    fn point_count_is_bounded() {
        let meter = ThroughputMeter::new(Duration::from_secs(60), 5);
        let t0 = Instant::now();
        for i in 0..20u64 {
            meter.observe_at(t0 + Duration::from_millis(i * 10), i * 10);
        }
        assert_eq!(meter.points.lock().unwrap().len(), 5);
    }

    #[test]
    fn going_backwards_restarts() {
        let meter = ThroughputMeter::default();
        let t0 = Instant::now();
        meter.observe_at(t0, 0);
        meter.observe_at(t0 + Duration::from_secs(1), 500);
        meter.observe_at(t0 + Duration::from_secs(2), 100);

        assert_eq!(meter.bytes_per_second(), 0.0);
        assert_eq!(meter.points.lock().unwrap().len(), 1);
    }
}
