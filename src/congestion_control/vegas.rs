// Copyright (c) 2024 The TQUIC Authors.
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

//! TCP Vegas: End to End Congestion Avoidance on a Global Internet.
//!
//! Vegas estimates the number of segments queued in the path from the gap
//! between the expected throughput (cwnd / baseRTT) and the actual one
//! (cwnd / RTT). Once per round trip it grows the window by one segment when
//! fewer than `alpha` segments are queued, shrinks it by one segment when more
//! than `beta` are queued, and holds it otherwise. In slow start it leaves
//! early once more than `gamma` segments are queued.
//!
//! Loss and ECN use the shared multiplicative decrease. The connection does
//! not grow the window until the episode ends, so delay based decisions are
//! suspended for the episode and resume with a fresh round.
//!
//! See <https://doi.org/10.1109/49.464716>.

use std::time::Duration;
use std::time::Instant;

use log::*;

use super::spread_increment;
use super::Ack;
use super::CongestionController;
use super::CongestionSignal;
use crate::connection::rtt::BaseRttEstimator;
use crate::connection::rtt::BASE_RTT_SAMPLES;
use crate::connection::rtt::BASE_RTT_WINDOW;
use crate::connection::state::ConnectionState;
use crate::Config;

/// Lower queueing threshold in segments.
pub const ALPHA: f64 = 2.0;

/// Upper queueing threshold in segments.
pub const BETA: f64 = 4.0;

/// Slow start exit threshold in segments.
pub const GAMMA: f64 = 1.0;

/// Multiplicative decrease factor on loss, the same as CUBIC.
const LOSS_BETA: f64 = 0.7;

/// Smallest base RTT used as a divisor.
const MIN_BASE_RTT: Duration = Duration::from_micros(1);

/// Vegas configurable parameters.
#[derive(Debug, Clone)]
pub struct VegasConfig {
    /// Below this many queued segments the window grows.
    alpha: f64,

    /// Above this many queued segments the window shrinks.
    beta: f64,

    /// Above this many queued segments slow start ends.
    gamma: f64,

    /// Base RTT refresh period.
    base_rtt_window: Duration,

    /// Number of recent samples the base RTT is refreshed from.
    base_rtt_samples: usize,
}

impl VegasConfig {
    pub fn from(conf: &Config) -> Self {
        Self {
            alpha: conf.vegas_alpha,
            beta: conf.vegas_beta,
            gamma: conf.vegas_gamma,
            ..Self::default()
        }
    }

    /// Update alpha.
    pub fn set_alpha(&mut self, alpha: f64) -> &mut Self {
        self.alpha = alpha;
        self
    }

    /// Update beta.
    pub fn set_beta(&mut self, beta: f64) -> &mut Self {
        self.beta = beta;
        self
    }

    /// Update gamma.
    pub fn set_gamma(&mut self, gamma: f64) -> &mut Self {
        self.gamma = gamma;
        self
    }

    /// Update the base RTT refresh period and sample window.
    pub fn set_base_rtt_window(&mut self, window: Duration, samples: usize) -> &mut Self {
        self.base_rtt_window = window;
        self.base_rtt_samples = samples;
        self
    }
}

impl Default for VegasConfig {
    fn default() -> Self {
        Self {
            alpha: ALPHA,
            beta: BETA,
            gamma: GAMMA,
            base_rtt_window: BASE_RTT_WINDOW,
            base_rtt_samples: BASE_RTT_SAMPLES,
        }
    }
}

/// Per round trip bookkeeping. A round ends once a window worth of bytes,
/// as measured when the round began, has been acknowledged.
#[derive(Debug)]
struct Round {
    /// Bytes acknowledged in this round.
    acked_bytes: u64,

    /// Bytes to acknowledge before the round ends, 0 if not started.
    target_bytes: u64,

    /// Minimum RTT sampled in this round.
    min_rtt: Duration,

    /// RTT samples taken in this round.
    rtt_count: u32,
}

impl Default for Round {
    fn default() -> Self {
        Self {
            acked_bytes: 0,
            target_bytes: 0,
            min_rtt: Duration::MAX,
            rtt_count: 0,
        }
    }
}

/// What to do with the window at the end of a round.
#[derive(Eq, PartialEq, Debug)]
enum Decision {
    Increase,
    Decrease,
    Hold,
}

/// Vegas congestion control algorithm.
#[derive(Debug)]
pub struct Vegas {
    /// Configuration.
    config: VegasConfig,

    /// Minimum observed RTT with periodic refresh.
    base_rtt: BaseRttEstimator,

    /// The current round.
    round: Round,

    /// Reno accumulator used while delay based decisions are off.
    cwnd_inc: u64,
}

impl Vegas {
    pub fn new(config: VegasConfig) -> Self {
        let base_rtt = BaseRttEstimator::new(config.base_rtt_window, config.base_rtt_samples);
        Self {
            config,
            base_rtt,
            round: Round::default(),
            cwnd_inc: 0,
        }
    }

    /// Estimated number of segments queued in the path:
    /// `cwnd * (rtt - base_rtt) / base_rtt`, in segments.
    fn diff(&self, state: &ConnectionState, rtt: Duration) -> f64 {
        let base_rtt = self
            .base_rtt
            .get()
            .unwrap_or(rtt)
            .max(MIN_BASE_RTT)
            .as_secs_f64();
        state.cwnd_segments() as f64 * (rtt.as_secs_f64() - base_rtt) / base_rtt
    }

    /// Record the acknowledgment. Return the round minimum RTT if it ends the
    /// current round with usable samples.
    fn on_round_ack(&mut self, state: &ConnectionState, ack: &Ack) -> Option<Duration> {
        if let Some(rtt) = ack.rtt_sample {
            self.base_rtt.update(ack.now, rtt);
            self.round.min_rtt = self.round.min_rtt.min(rtt);
            self.round.rtt_count = self.round.rtt_count.saturating_add(1);
        }

        if self.round.target_bytes == 0 {
            self.round.target_bytes = state.cwnd;
        }
        self.round.acked_bytes = self.round.acked_bytes.saturating_add(ack.acked_bytes);

        if self.round.acked_bytes < self.round.target_bytes {
            return None;
        }

        let round = std::mem::take(&mut self.round);
        if round.rtt_count == 0 {
            return None;
        }

        Some(round.min_rtt)
    }

    /// Decide the window adjustment for a congestion avoidance round.
    fn decide(&self, diff: f64) -> Decision {
        if diff < self.config.alpha {
            Decision::Increase
        } else if diff > self.config.beta {
            Decision::Decrease
        } else {
            Decision::Hold
        }
    }

    /// Return the base RTT, if any.
    pub fn base_rtt(&self) -> Option<Duration> {
        self.base_rtt.get()
    }
}

impl CongestionController for Vegas {
    fn name(&self) -> &str {
        "VEGAS"
    }

    fn on_slow_start_ack(&mut self, state: &mut ConnectionState, ack: &Ack) {
        let round_end = self.on_round_ack(state, ack);

        if let Some(rtt) = round_end {
            let diff = self.diff(state, rtt);
            if diff > self.config.gamma {
                // Queue is building up, stop doubling.
                state.ssthresh = state.cwnd.max(state.min_ssthresh());
                debug!(
                    "{}. leave slow start, diff={:.3} gamma={} cwnd={}",
                    self.name(),
                    diff,
                    self.config.gamma,
                    state.cwnd
                );
                return;
            }
        }

        state.cwnd = state.cwnd.saturating_add(ack.acked_bytes);
    }

    fn on_congestion_avoidance_ack(&mut self, state: &mut ConnectionState, ack: &Ack) {
        let round_end = self.on_round_ack(state, ack);

        if self.base_rtt.get().is_none() {
            // No RTT sample yet, grow like Reno.
            let mss = state.mss;
            spread_increment(state, &mut self.cwnd_inc, mss, ack.acked_bytes);
            return;
        }

        let rtt = match round_end {
            Some(rtt) => rtt,
            // Vegas adjusts at most once per round trip.
            None => return,
        };

        let diff = self.diff(state, rtt);
        let decision = self.decide(diff);
        match decision {
            Decision::Increase => {
                state.cwnd = state.cwnd.saturating_add(state.mss);
            }
            Decision::Decrease => {
                state.cwnd = state
                    .cwnd
                    .saturating_sub(state.mss)
                    .max(state.min_ssthresh());
                state.ssthresh = state.ssthresh.min(state.cwnd).max(state.min_ssthresh());
            }
            Decision::Hold => (),
        }

        trace!(
            "{}. round end: rtt={}us base_rtt={:?} diff={:.3} decision={:?} cwnd={}",
            self.name(),
            rtt.as_micros(),
            self.base_rtt.get(),
            diff,
            decision,
            state.cwnd
        );
    }

    fn beta(&self) -> f64 {
        LOSS_BETA
    }

    fn on_congestion_event(
        &mut self,
        state: &ConnectionState,
        _signal: CongestionSignal,
        _now: Instant,
    ) -> u64 {
        self.round = Round::default();
        self.cwnd_inc = 0;

        (state.cwnd as f64 * LOSS_BETA) as u64
    }

    fn on_timeout(&mut self, _state: &ConnectionState, _now: Instant) {
        self.base_rtt.reset();
        self.round = Round::default();
        self.cwnd_inc = 0;
    }
}
