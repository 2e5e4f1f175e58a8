// Copyright (c) 2023 The TQUIC Authors.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use std::cmp;
use std::collections::VecDeque;
use std::time::Duration;
use std::time::Instant;

use crate::TIMER_GRANULARITY;

/// Period after which the base RTT is recomputed from recent samples only.
pub const BASE_RTT_WINDOW: Duration = Duration::from_secs(10);

/// Number of recent RTT samples retained for the base RTT refresh.
pub const BASE_RTT_SAMPLES: usize = 64;

/// Largest accepted RTT sample. Larger samples are clamped to it.
pub const MAX_RTT: Duration = Duration::from_secs(60);

/// RTT estimation for a connection.
/// See RFC 6298 Section 2
#[derive(Debug, Clone)]
pub struct RttEstimator {
    /// The most recent RTT sample.
    latest_rtt: Duration,

    /// The smoothed RTT of the connection is an exponentially weighted moving
    /// average of its RTT samples.
    smoothed_rtt: Option<Duration>,

    /// The RTT variance estimates the variation in the RTT samples using a
    /// mean variation.
    rttvar: Duration,

    /// The minimum RTT observed on the connection.
    min_rtt: Duration,

    /// The maximum RTT observed on the connection.
    max_rtt: Duration,
}

impl RttEstimator {
    pub fn new(initial_rtt: Duration) -> Self {
        Self {
            latest_rtt: initial_rtt,
            smoothed_rtt: None,
            rttvar: initial_rtt / 2,
            min_rtt: initial_rtt,
            max_rtt: initial_rtt,
        }
    }

    /// Return the current best RTT estimation.
    pub fn smoothed_rtt(&self) -> Duration {
        self.smoothed_rtt.unwrap_or(self.latest_rtt)
    }

    /// Return the latest rtt sample
    pub fn latest_rtt(&self) -> Duration {
        self.latest_rtt
    }

    /// Return the Minimum RTT observed so far for this estimator.
    pub fn min_rtt(&self) -> Duration {
        self.min_rtt
    }

    /// Return the variation in the RTT samples using a mean variation.
    pub fn rttvar(&self) -> Duration {
        self.rttvar
    }

    /// Return the Maximum RTT observed so far for this estimator.
    pub fn max_rtt(&self) -> Duration {
        self.max_rtt
    }

    /// Whether at least one RTT sample has been taken.
    pub fn has_sample(&self) -> bool {
        self.smoothed_rtt.is_some()
    }

    /// Return the retransmission timeout, `srtt + max(4 * rttvar, G)`.
    ///
    /// Expiry of the timer is the transport's business; only the value is
    /// computed here.
    pub fn rto(&self) -> Duration {
        self.smoothed_rtt() + cmp::max(4 * self.rttvar, TIMER_GRANULARITY)
    }

    /// Update estimator with the given RTT sample, clamped to `MAX_RTT`.
    pub fn update(&mut self, rtt: Duration) {
        let rtt = rtt.min(MAX_RTT);
        self.latest_rtt = rtt;
        self.min_rtt = cmp::min(self.min_rtt, self.latest_rtt);
        self.max_rtt = cmp::max(self.max_rtt, self.latest_rtt);

        if let Some(smoothed_rtt) = self.smoothed_rtt {
            let var_sample = if smoothed_rtt > rtt {
                smoothed_rtt - rtt
            } else {
                rtt - smoothed_rtt
            };

            self.rttvar = (3 * self.rttvar + var_sample) / 4;
            self.smoothed_rtt = Some((7 * smoothed_rtt + rtt) / 8);
        } else {
            self.smoothed_rtt = Some(self.latest_rtt);
            self.rttvar = self.latest_rtt / 2;
            self.min_rtt = self.latest_rtt;
            self.max_rtt = self.latest_rtt;
        }
    }
}

/// Minimum ("queue free") RTT tracker with a periodic refresh.
///
/// Between refreshes the base RTT is the running minimum. Once every
/// `window` it is recomputed from the most recent bounded set of samples
/// only, so that a genuine increase of the path latency is eventually
/// reflected instead of pinning the all-time minimum forever.
#[derive(Debug, Clone)]
pub struct BaseRttEstimator {
    /// Current base RTT, `None` until the first sample.
    base_rtt: Option<Duration>,

    /// The most recent samples, oldest first.
    samples: VecDeque<Duration>,

    /// Maximum number of retained samples.
    capacity: usize,

    /// Refresh period.
    window: Duration,

    /// Start of the current refresh epoch.
    epoch_start: Option<Instant>,
}

impl BaseRttEstimator {
    pub fn new(window: Duration, capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            base_rtt: None,
            samples: VecDeque::with_capacity(capacity),
            capacity,
            window,
            epoch_start: None,
        }
    }

    /// Feed a new RTT sample observed at `now`.
    pub fn update(&mut self, now: Instant, rtt: Duration) {
        if self.samples.len() == self.capacity {
            self.samples.pop_front();
        }
        self.samples.push_back(rtt);

        let epoch_start = match self.epoch_start {
            Some(t) => t,
            None => {
                self.epoch_start = Some(now);
                self.base_rtt = Some(rtt);
                return;
            }
        };

        if now.saturating_duration_since(epoch_start) >= self.window {
            // Refresh from recent samples only.
            self.base_rtt = self.samples.iter().min().copied();
            self.epoch_start = Some(now);
        } else {
            self.base_rtt = Some(self.base_rtt.map_or(rtt, |base| base.min(rtt)));
        }
    }

    /// Return the base RTT, if any sample has been observed.
    pub fn get(&self) -> Option<Duration> {
        self.base_rtt
    }

    /// Number of retained samples.
    pub fn sample_count(&self) -> usize {
        self.samples.len()
    }

    /// Forget everything.
    pub fn reset(&mut self) {
        self.base_rtt = None;
        self.samples.clear();
        self.epoch_start = None;
    }
}

impl Default for BaseRttEstimator {
    fn default() -> Self {
        Self::new(BASE_RTT_WINDOW, BASE_RTT_SAMPLES)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time;

    #[test]
    fn initial() {
        let initial_rtt = time::Duration::from_millis(200);
        let r = RttEstimator::new(initial_rtt);
        assert_eq!(r.latest_rtt(), initial_rtt);
        assert_eq!(r.min_rtt(), initial_rtt);
        assert_eq!(r.max_rtt(), initial_rtt);
        assert_eq!(r.rttvar(), initial_rtt / 2);
        assert_eq!(r.smoothed_rtt(), initial_rtt);
        assert_eq!(r.rto(), initial_rtt * 3);
        assert!(!r.has_sample());
    }

    #[test]
    fn update() {
        let initial_rtt = time::Duration::from_millis(200);
        let mut r = RttEstimator::new(initial_rtt);

        // First rtt sample
        let rtt_sample = time::Duration::from_millis(400);
        r.update(rtt_sample);
        assert!(r.has_sample());
        assert_eq!(r.latest_rtt(), rtt_sample);
        assert_eq!(r.min_rtt(), rtt_sample);
        assert_eq!(r.max_rtt(), rtt_sample);
        assert_eq!(r.rttvar(), rtt_sample / 2);
        assert_eq!(r.smoothed_rtt(), rtt_sample);
        assert_eq!(r.rto(), rtt_sample * 3);

        // Second rtt sample
        let rtt_sample = time::Duration::from_millis(700);
        r.update(rtt_sample);
        assert_eq!(r.latest_rtt(), rtt_sample);
        assert_eq!(r.min_rtt(), time::Duration::from_millis(400));
        assert_eq!(r.max_rtt(), time::Duration::from_millis(700));
        assert_eq!(r.rttvar(), time::Duration::from_millis(225));
        assert_eq!(r.smoothed_rtt(), time::Duration::from_micros(437_500));
        assert_eq!(r.rto(), time::Duration::from_micros(1_337_500));

        // Third rtt sample
        let rtt_sample = time::Duration::from_millis(225);
        r.update(rtt_sample);
        assert_eq!(r.latest_rtt(), rtt_sample);
        assert_eq!(r.min_rtt(), time::Duration::from_millis(225));
        assert_eq!(r.max_rtt(), time::Duration::from_millis(700));
        assert_eq!(r.rttvar(), time::Duration::from_micros(221_875));
        assert_eq!(r.smoothed_rtt(), time::Duration::from_nanos(410_937_500));
    }

    #[test]
    fn rto_granularity_floor() {
        let mut r = RttEstimator::new(Duration::from_millis(1));
        for _ in 0..64 {
            r.update(Duration::from_micros(100));
        }
        assert!(r.rttvar() < Duration::from_micros(250));
        assert_eq!(r.rto(), r.smoothed_rtt() + TIMER_GRANULARITY);
    }

    #[test]
    fn huge_samples_are_clamped() {
        let mut r = RttEstimator::new(Duration::from_millis(100));
        r.update(Duration::MAX);
        assert_eq!(r.latest_rtt(), MAX_RTT);
        assert_eq!(r.rto(), MAX_RTT * 3);

        r.update(Duration::MAX);
        assert_eq!(r.smoothed_rtt(), MAX_RTT);
        assert_eq!(r.max_rtt(), MAX_RTT);
        assert_eq!(r.rttvar(), MAX_RTT * 3 / 8);
    }

    #[test]
    fn base_rtt_running_min() {
        let mut b = BaseRttEstimator::default();
        let now = Instant::now();
        assert_eq!(b.get(), None);

        b.update(now, Duration::from_millis(120));
        assert_eq!(b.get(), Some(Duration::from_millis(120)));

        b.update(now + Duration::from_secs(1), Duration::from_millis(100));
        assert_eq!(b.get(), Some(Duration::from_millis(100)));

        b.update(now + Duration::from_secs(2), Duration::from_millis(150));
        assert_eq!(b.get(), Some(Duration::from_millis(100)));
    }

    #[test]
    fn base_rtt_refresh_after_path_change() {
        let mut b = BaseRttEstimator::new(Duration::from_secs(10), 4);
        let now = Instant::now();

        b.update(now, Duration::from_millis(50));
        // The path latency rises to 200ms.
        for i in 1..=4 {
            b.update(now + Duration::from_secs(i), Duration::from_millis(200));
        }
        assert_eq!(b.get(), Some(Duration::from_millis(50)));
        assert_eq!(b.sample_count(), 4);

        // Window elapsed: the 50ms sample has been evicted from the bounded set.
        b.update(now + Duration::from_secs(11), Duration::from_millis(210));
        assert_eq!(b.get(), Some(Duration::from_millis(200)));

        // A new epoch starts at the refresh, running min applies again.
        b.update(now + Duration::from_secs(12), Duration::from_millis(190));
        assert_eq!(b.get(), Some(Duration::from_millis(190)));
    }

    #[test]
    fn base_rtt_reset() {
        let mut b = BaseRttEstimator::default();
        b.update(Instant::now(), Duration::from_millis(30));
        b.reset();
        assert_eq!(b.get(), None);
        assert_eq!(b.sample_count(), 0);
    }
}
