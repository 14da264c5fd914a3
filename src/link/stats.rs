//! Round-trip statistics for a link

use std::collections::VecDeque;

/// Size of the rolling window for recent round-trip times
const RECENT_WINDOW_SIZE: usize = 100;

/// Counters and latency figures for link round trips
#[derive(Debug, Clone)]
pub struct LinkStats {
    /// Round trips that completed successfully
    pub round_trips: u64,
    /// Round trips that returned a link error
    pub failures: u64,
    /// Total time spent in successful round trips (microseconds)
    pub total_time_us: u64,
    /// Duration of the last successful round trip (microseconds)
    pub last_time_us: u64,
    /// Payload bytes moved in either direction
    pub bytes_transferred: u64,
    /// Fastest round trip observed (microseconds)
    pub min_time_us: u64,
    /// Slowest round trip observed (microseconds)
    pub max_time_us: u64,
    /// Rolling window of recent round-trip times for jitter calculation
    pub recent_times: VecDeque<u64>,
}

impl Default for LinkStats {
    fn default() -> Self {
        Self {
            round_trips: 0,
            failures: 0,
            total_time_us: 0,
            last_time_us: 0,
            bytes_transferred: 0,
            min_time_us: u64::MAX,
            max_time_us: 0,
            recent_times: VecDeque::with_capacity(RECENT_WINDOW_SIZE),
        }
    }
}

impl LinkStats {
    /// Average successful round-trip time in microseconds
    pub fn avg_time_us(&self) -> f64 {
        if self.round_trips == 0 {
            0.0
        } else {
            self.total_time_us as f64 / self.round_trips as f64
        }
    }

    /// Success rate as a percentage
    pub fn success_rate(&self) -> f64 {
        let total = self.round_trips + self.failures;
        if total == 0 {
            100.0
        } else {
            (self.round_trips as f64 / total as f64) * 100.0
        }
    }

    pub fn record_success(&mut self, time_us: u64, bytes: u64) {
        self.round_trips += 1;
        self.total_time_us += time_us;
        self.last_time_us = time_us;
        self.bytes_transferred += bytes;
        self.min_time_us = self.min_time_us.min(time_us);
        self.max_time_us = self.max_time_us.max(time_us);

        self.recent_times.push_back(time_us);
        if self.recent_times.len() > RECENT_WINDOW_SIZE {
            self.recent_times.pop_front();
        }
    }

    pub fn record_failure(&mut self) {
        self.failures += 1;
    }

    /// Spread (max - min) over the recent window in microseconds
    pub fn jitter_us(&self) -> u64 {
        let min = self.recent_times.iter().min().copied().unwrap_or(0);
        let max = self.recent_times.iter().max().copied().unwrap_or(0);
        max.saturating_sub(min)
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }
}
