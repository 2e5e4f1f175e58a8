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

use std::time::Duration;
use std::time::Instant;

use log::*;

use super::Ack;
use super::CongestionController;
use super::CongestionSignal;
use super::HystartPlusPlus;
use crate::connection::state::ConnectionState;
use crate::Config;

/// Cubic constant C.
///
/// Constant that determines the aggressiveness of CUBIC in competing with
/// other congestion control algorithms in high-BDP networks. Default to 0.4.
///
/// See <https://www.rfc-editor.org/rfc/rfc9438.html#name-constants-of-interest>.
pub const C: f64 = 0.4;

/// Cubic constant beta.
///
/// Beta_cubic is the CUBIC multiplication decrease factor, that
/// is, when a congestion event is detected, CUBIC reduces its cwnd to
/// W_cubic(0) = W_max * beta_cubic. Default to 0.7.
///
/// See <https://www.rfc-editor.org/rfc/rfc9438.html#name-constants-of-interest>.
pub const BETA: f64 = 0.7;

/// Cubic Configuration.
#[derive(Debug, Clone)]
pub struct CubicConfig {
    /// Constant C.
    c: f64,

    /// Beta.
    beta: f64,

    /// Enable Hystart++, default to true.
    hystart_enabled: bool,

    /// Enable fast convergence, default to true.
    fast_convergence_enabled: bool,
}

impl CubicConfig {
    pub fn from(conf: &Config) -> Self {
        Self {
            c: conf.cubic_c,
            beta: conf.cubic_beta,
            hystart_enabled: conf.cubic_hystart,
            fast_convergence_enabled: conf.cubic_fast_convergence,
        }
    }

    /// Update C.
    pub fn set_c(&mut self, c: f64) -> &mut Self {
        self.c = c;
        self
    }

    /// Update beta.
    pub fn set_beta(&mut self, beta: f64) -> &mut Self {
        self.beta = beta;
        self
    }

    /// Enable hystart.
    pub fn enable_hystart(&mut self, enable: bool) -> &mut Self {
        self.hystart_enabled = enable;
        self
    }

    /// Enable fast_convergence.
    pub fn enable_fast_convergence(&mut self, enable: bool) -> &mut Self {
        self.fast_convergence_enabled = enable;
        self
    }

    /// CUBIC additive increase factor used in the Reno-friendly region,
    /// 3 * (1 - beta) / (1 + beta).
    ///
    /// See <https://www.rfc-editor.org/rfc/rfc9438.html#name-reno-friendly-region>.
    fn alpha(&self) -> f64 {
        3.0 * (1.0 - self.beta) / (1.0 + self.beta)
    }
}

impl Default for CubicConfig {
    fn default() -> Self {
        Self {
            c: C,
            beta: BETA,
            hystart_enabled: true,
            fast_convergence_enabled: true,
        }
    }
}

/// Cubic congestion control algorithm.
///
/// See <https://www.rfc-editor.org/rfc/rfc9438.html>.
#[derive(Debug)]
pub struct Cubic {
    /// Configuration.
    config: CubicConfig,

    /// Hystart++ object.
    hystart: HystartPlusPlus,

    /// The window size in bytes just before the window is reduced in the last
    /// congestion event.
    w_max: f64,

    /// The time period in seconds that W_cubic takes to increase the current
    /// window size to W_max if there are no further congestion events.
    k: f64,

    /// CUBIC additive increase factor used in the Reno-friendly region.
    alpha: f64,

    /// Estimated window to achieve the same average window size as Standard TCP.
    w_est: f64,

    /// Cwnd increment during congestion avoidance.
    cwnd_inc: u64,

    /// Start of the current growth epoch.
    epoch_start: Option<Instant>,
}

impl Cubic {
    pub fn new(config: CubicConfig) -> Self {
        let hystart_enabled = config.hystart_enabled;
        let alpha = config.alpha();
        Self {
            config,
            hystart: HystartPlusPlus::new(hystart_enabled),
            w_max: 0_f64,
            k: 0_f64,
            alpha,
            w_est: 0_f64,
            cwnd_inc: 0_u64,
            epoch_start: None,
        }
    }

    /// Calculate window increase during congestion avoidance.
    ///
    /// See <https://www.rfc-editor.org/rfc/rfc9438.html#name-window-increase-function>.
    fn w_cubic(&self, t: Duration, max_datagram_size: u64) -> f64 {
        // W_cubic(t) = C*(t-K)^3 + W_max
        self.config.c * (t.as_secs_f64() - self.k).powi(3) * max_datagram_size as f64 + self.w_max
    }

    /// Calculate window estimation to achieves approximately the same average window size as Reno.
    ///
    /// See <https://www.rfc-editor.org/rfc/rfc9438.html#name-reno-friendly-region>.
    fn w_est(&self, acked_bytes: u64, cwnd: u64, max_datagram_size: u64) -> f64 {
        // W_est = W_est + [3*(1-beta_cubic)/(1+beta_cubic)] * (segments_acked/cwnd)
        self.w_est + self.alpha * acked_bytes as f64 / cwnd.max(1) as f64 * max_datagram_size as f64
    }

    /// Calculate parameter K.
    ///
    /// See <https://www.rfc-editor.org/rfc/rfc9438.html#name-window-increase-function>.
    fn cubic_k(&self, cwnd: u64, max_datagram_size: u64) -> f64 {
        // K = cubic_root((W_max - cwnd_epoch)/C).
        if self.w_max > cwnd as f64 {
            ((self.w_max - cwnd as f64) / max_datagram_size as f64 / self.config.c).cbrt()
        } else {
            0.0
        }
    }

    /// The remembered maximum window in bytes.
    pub fn w_max(&self) -> f64 {
        self.w_max
    }

    /// Time in seconds to grow back to the remembered maximum.
    pub fn k(&self) -> f64 {
        self.k
    }
}

impl CongestionController for Cubic {
    fn name(&self) -> &str {
        "CUBIC"
    }

    fn on_slow_start_ack(&mut self, state: &mut ConnectionState, ack: &Ack) {
        if self.hystart.has_exited() {
            // Slow start again after an episode, without delay probing.
            state.cwnd = state.cwnd.saturating_add(ack.acked_bytes);
            return;
        }

        // Rounds are sized by the window before this acknowledgment grows it.
        self.hystart.on_ack(ack.acked_bytes, ack.rtt_sample, state.cwnd);

        let inc = self.hystart.cwnd_increment(ack.acked_bytes, state.mss);
        state.cwnd = state.cwnd.saturating_add(inc);

        // Check if hystart++ has exited
        if self.hystart.has_exited() {
            state.ssthresh = state.cwnd.max(state.min_ssthresh());
            debug!(
                "{}. hystart++ exit, cwnd={} ssthresh={} {:?}",
                self.name(),
                state.cwnd,
                state.ssthresh,
                self.hystart
            );
        }
    }

    fn on_congestion_avoidance_ack(&mut self, state: &mut ConnectionState, ack: &Ack) {
        let mss = state.mss;
        let cwnd = state.cwnd;

        let t = match self.epoch_start {
            Some(epoch_start) => ack.now.saturating_duration_since(epoch_start),
            None => {
                // No congestion event happened. Initialize here.
                self.epoch_start = Some(ack.now);
                self.w_max = cwnd as f64;
                self.k = 0_f64;
                self.w_est = cwnd as f64;
                self.alpha = self.config.alpha();

                Duration::ZERO
            }
        };

        // Update W_cubic and target:
        //  `target = W_cubic(t+RTT).clamp(cwnd, 1.5*cwnd)`
        // as <https://www.rfc-editor.org/rfc/rfc9438.html#name-window-increase-function>.
        let target = self
            .w_cubic(t.saturating_add(state.rtt()), mss)
            .clamp(cwnd as f64, 1.5 * cwnd as f64);

        // Update w_est
        // as <https://www.rfc-editor.org/rfc/rfc9438.html#name-reno-friendly-region>.
        self.w_est = self.w_est(ack.acked_bytes, cwnd, mss);

        // Once West has grown to reach the cwnd at the time of most recently setting ssthresh
        // -- that is, West >= cwnd_prior -- the sender SHOULD set alpha_cubic to 1 to ensure
        // that it can achieve the same congestion window increment rate as Reno.
        if self.w_est >= self.w_max {
            self.alpha = 1.0_f64;
        }

        let w_cubic_t = self.w_cubic(t, mss);

        let inc = if w_cubic_t < self.w_est {
            // Reno-friendly region: cwnd follows West.
            (self.w_est as u64).saturating_sub(cwnd)
        } else {
            // Increment in concave and convex region is calculated as:
            //  (target - cwnd)/cwnd per acknowledged byte
            // See <https://www.rfc-editor.org/rfc/rfc9438.html#name-concave-region>.
            ((target - cwnd as f64) / cwnd.max(1) as f64 * ack.acked_bytes as f64) as u64
        };

        // Update the increment and increase cwnd by whole segments.
        self.cwnd_inc = self.cwnd_inc.saturating_add(inc);
        state.cwnd = state.cwnd.saturating_add(self.cwnd_inc / mss * mss);
        self.cwnd_inc %= mss;

        trace!(
            "{}. t={:.3}s k={:.3} w_max={:.0} w_cubic={:.0} w_est={:.0} target={:.0} cwnd={}",
            self.name(),
            t.as_secs_f64(),
            self.k,
            self.w_max,
            w_cubic_t,
            self.w_est,
            target,
            state.cwnd
        );
    }

    fn beta(&self) -> f64 {
        self.config.beta
    }

    fn on_congestion_event(
        &mut self,
        state: &ConnectionState,
        _signal: CongestionSignal,
        now: Instant,
    ) -> u64 {
        let mss = state.mss;
        let cwnd = state.cwnd as f64;

        // A new growth epoch starts at the reduction.
        self.epoch_start = Some(now);

        // Fast convergence: a loss below the remembered maximum means the
        // available bandwidth shrank, remember less than the current window.
        //  `W_max = cwnd * (2 - beta) / 2`
        self.w_max = if self.config.fast_convergence_enabled && cwnd < self.w_max {
            cwnd * (2.0 - self.config.beta) / 2.0
        } else {
            cwnd
        };

        // Update ssthresh
        // as <https://www.rfc-editor.org/rfc/rfc9438.html#name-multiplicative-decrease>.
        let ssthresh = ((cwnd * self.config.beta) as u64).max(state.min_ssthresh());

        self.k = self.cubic_k(ssthresh, mss);

        self.cwnd_inc = (self.cwnd_inc as f64 * self.config.beta) as u64;

        // W_est is set equal to cwnd_epoch at the start of the congestion avoidance stage,
        // see <https://www.rfc-editor.org/rfc/rfc9438.html#name-reno-friendly-region>.
        self.w_est = ssthresh as f64;
        self.alpha = self.config.alpha();

        self.hystart.on_congestion_event();

        debug!(
            "{}. congestion event, w_max={:.0} k={:.3} ssthresh={}",
            self.name(),
            self.w_max,
            self.k,
            ssthresh
        );

        ssthresh
    }

    fn on_timeout(&mut self, _state: &ConnectionState, _now: Instant) {
        self.epoch_start = None;
        self.w_max = 0_f64;
        self.k = 0_f64;
        self.w_est = 0_f64;
        self.alpha = self.config.alpha();
        self.cwnd_inc = 0;
        self.hystart.reset();
    }
}
