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

//! Binary Increase Congestion control (BIC) for fast long-distance networks.
//!
//! After a loss BIC treats the window before the reduction as the maximum
//! and the window after it as the minimum, and closes the gap by binary
//! search: each round trip jumps to the midpoint, bounded by `Smax` segments
//! when far away and by `Smin` segments when close. Once the old maximum is
//! passed it searches for a new one, slowly first and then linearly, which
//! gives the concave then convex growth curve.
//!
//! See <https://doi.org/10.1109/INFCOM.2004.1354672>.

use std::time::Instant;

use log::*;

use super::spread_increment;
use super::Ack;
use super::CongestionController;
use super::CongestionSignal;
use crate::connection::state::ConnectionState;
use crate::Config;

/// Largest increment per round trip, in segments (`Smax`).
pub const MAX_INCREMENT: u64 = 16;

/// Smallest increment per round trip, in segments (`Smin`).
pub const MIN_INCREMENT: u64 = 1;

/// Multiplicative decrease factor.
pub const BETA: f64 = 0.8;

/// Below this window, in segments, BIC behaves like Reno.
pub const LOW_WINDOW: u64 = 14;

/// BIC configurable parameters.
#[derive(Debug, Clone)]
pub struct BicConfig {
    /// Smax in segments.
    max_increment: u64,

    /// Smin in segments.
    min_increment: u64,

    /// Beta.
    beta: f64,

    /// Reno compatible region upper bound, in segments.
    low_window: u64,
}

impl BicConfig {
    pub fn from(conf: &Config) -> Self {
        Self {
            max_increment: conf.bic_max_increment,
            min_increment: conf.bic_min_increment,
            beta: conf.bic_beta,
            low_window: conf.bic_low_window,
        }
    }

    /// Update Smax.
    pub fn set_max_increment(&mut self, v: u64) -> &mut Self {
        self.max_increment = v;
        self
    }

    /// Update Smin.
    pub fn set_min_increment(&mut self, v: u64) -> &mut Self {
        self.min_increment = v;
        self
    }

    /// Update beta.
    pub fn set_beta(&mut self, beta: f64) -> &mut Self {
        self.beta = beta;
        self
    }

    /// Update the low window threshold.
    pub fn set_low_window(&mut self, v: u64) -> &mut Self {
        self.low_window = v;
        self
    }
}

impl Default for BicConfig {
    fn default() -> Self {
        Self {
            max_increment: MAX_INCREMENT,
            min_increment: MIN_INCREMENT,
            beta: BETA,
            low_window: LOW_WINDOW,
        }
    }
}

/// BIC congestion control algorithm.
#[derive(Debug)]
pub struct Bic {
    /// Configuration.
    config: BicConfig,

    /// Window in bytes just before the last reduction, or the maximum found
    /// while probing.
    last_max_cwnd: u64,

    /// Lower end of the binary search in bytes.
    min_win: u64,

    /// Whether the current epoch already passed `last_max_cwnd` and recorded
    /// a new maximum.
    found_new_max: bool,

    /// Window in bytes when the new maximum was recorded.
    search_base: u64,

    /// Bytes credited towards the next one segment increase.
    cwnd_inc: u64,
}

impl Bic {
    pub fn new(config: BicConfig) -> Self {
        Self {
            config,
            last_max_cwnd: 0,
            min_win: 0,
            found_new_max: false,
            search_base: 0,
            cwnd_inc: 0,
        }
    }

    /// Increment for this round trip in segments. Return whether the window
    /// is in the fast linear probing region.
    fn increment(&mut self, cwnd: u64, mss: u64) -> (u64, bool) {
        let max_inc = self.config.max_increment;
        let min_inc = self.config.min_increment;

        if cwnd / mss <= self.config.low_window {
            return (1, false);
        }

        if !self.found_new_max && cwnd < self.last_max_cwnd {
            // Binary search between min_win and last_max_cwnd.
            self.min_win = self.min_win.max(cwnd);
            let dist = self.last_max_cwnd.saturating_sub(self.min_win) / mss;
            let inc = if dist > max_inc {
                max_inc
            } else {
                (dist / 2).max(min_inc)
            };
            return (inc, false);
        }

        // Max probing.
        if !self.found_new_max {
            self.found_new_max = true;
            self.search_base = cwnd;
            self.last_max_cwnd = self.last_max_cwnd.max(cwnd);
            trace!(
                "{}. new max probing from cwnd={}",
                self.name(),
                self.search_base
            );
        }

        if cwnd < self.search_base.saturating_add(max_inc.saturating_mul(mss)) {
            (min_inc, false)
        } else {
            (max_inc, true)
        }
    }

    /// The remembered maximum window in bytes.
    pub fn last_max_cwnd(&self) -> u64 {
        self.last_max_cwnd
    }
}

impl CongestionController for Bic {
    fn name(&self) -> &str {
        "BIC"
    }

    fn on_congestion_avoidance_ack(&mut self, state: &mut ConnectionState, ack: &Ack) {
        let mss = state.mss;
        let (inc, linear) = self.increment(state.cwnd, mss);

        spread_increment(
            state,
            &mut self.cwnd_inc,
            inc.saturating_mul(mss),
            ack.acked_bytes,
        );

        if linear {
            self.last_max_cwnd = self.last_max_cwnd.max(state.cwnd);
        }

        trace!(
            "{}. inc={} cwnd={} last_max_cwnd={} min_win={}",
            self.name(),
            inc,
            state.cwnd,
            self.last_max_cwnd,
            self.min_win
        );
    }

    fn beta(&self) -> f64 {
        self.config.beta
    }

    fn on_congestion_event(
        &mut self,
        state: &ConnectionState,
        _signal: CongestionSignal,
        _now: Instant,
    ) -> u64 {
        let ssthresh = ((state.cwnd as f64 * self.config.beta) as u64).max(state.min_ssthresh());

        self.last_max_cwnd = self.last_max_cwnd.max(state.cwnd);
        self.min_win = ssthresh;
        self.found_new_max = false;
        self.search_base = 0;
        self.cwnd_inc = 0;

        ssthresh
    }

    fn on_timeout(&mut self, _state: &ConnectionState, _now: Instant) {
        self.last_max_cwnd = 0;
        self.min_win = 0;
        self.found_new_max = false;
        self.search_base = 0;
        self.cwnd_inc = 0;
    }
}
