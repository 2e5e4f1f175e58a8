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

#![allow(unused_variables)]

use core::str::FromStr;
use std::fmt;
use std::time::Duration;
use std::time::Instant;

use serde::Deserialize;
use serde::Serialize;

use crate::connection::state::ConnectionState;
use crate::Config;
use crate::Error;
use crate::Result;
pub use bic::Bic;
pub use bic::BicConfig;
pub use cubic::Cubic;
pub use cubic::CubicConfig;
pub use hystart_plus_plus::HystartPlusPlus;
pub use reno::Reno;
pub use vegas::Vegas;
pub use vegas::VegasConfig;

/// Available congestion control algorithm
#[derive(Eq, PartialEq, Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub enum CongestionControlAlgorithm {
    /// Reno grows the window exponentially in slow start and by one segment
    /// per round trip in congestion avoidance, and halves it on loss.
    Reno,

    /// Vegas compares the expected and the actual throughput to estimate the
    /// number of segments queued in the path, and keeps that number between
    /// two small thresholds.
    Vegas,

    /// BIC performs a binary search between the window at the last loss and
    /// the window after the reduction, then searches for a new maximum.
    Bic,

    /// CUBIC uses a cubic function of the time elapsed since the last
    /// congestion event instead of a linear window increase function, which
    /// makes growth independent of the round trip time.
    #[default]
    Cubic,
}

impl FromStr for CongestionControlAlgorithm {
    type Err = Error;

    fn from_str(algor: &str) -> Result<CongestionControlAlgorithm> {
        if algor.eq_ignore_ascii_case("reno") {
            Ok(CongestionControlAlgorithm::Reno)
        } else if algor.eq_ignore_ascii_case("vegas") {
            Ok(CongestionControlAlgorithm::Vegas)
        } else if algor.eq_ignore_ascii_case("bic") {
            Ok(CongestionControlAlgorithm::Bic)
        } else if algor.eq_ignore_ascii_case("cubic") {
            Ok(CongestionControlAlgorithm::Cubic)
        } else {
            Err(Error::InvalidConfig("unknown".into()))
        }
    }
}

/// Congestion control statistics.
#[derive(Debug, Default, Clone, Serialize)]
pub struct CongestionStats {
    /// Total segments acked.
    pub segments_acked_in_total: u64,

    /// Total bytes acked.
    pub bytes_acked_in_total: u64,

    /// Total bytes acked in slow start.
    pub bytes_acked_in_slow_start: u64,

    /// Number of loss notifications, including the ones absorbed by an
    /// ongoing episode.
    pub loss_events: u64,

    /// Number of recovery episodes entered.
    pub recovery_episodes: u64,

    /// Number of retransmission timeouts.
    pub timeouts: u64,

    /// Number of ECN window reductions.
    pub ecn_reductions: u64,

    /// Number of slow start exits decided by delay signals rather than by
    /// reaching the initial threshold.
    pub early_slow_start_exits: u64,
}

/// The kind of congestion signal that caused a window reduction.
#[derive(Eq, PartialEq, Debug, Clone, Copy)]
pub enum CongestionSignal {
    /// Loss detected by fast retransmit.
    Loss,

    /// Explicit congestion notification.
    Ecn,
}

/// Information carried by one acknowledgment event.
#[derive(Debug, Clone, Copy)]
pub struct Ack {
    /// Newly acknowledged bytes.
    pub acked_bytes: u64,

    /// RTT sample taken from this acknowledgment, if any.
    pub rtt_sample: Option<Duration>,

    /// Time the acknowledgment was processed.
    pub now: Instant,
}

/// Congestion control interfaces shared by different algorithms.
///
/// The connection state is owned by the dispatcher and lent to the strategy
/// for the duration of each callback.
pub trait CongestionController {
    /// Name of congestion control algorithm.
    fn name(&self) -> &str;

    /// Callback for an acknowledgment received in slow start.
    ///
    /// Defaults to exponential growth: the window grows by the number of
    /// newly acknowledged bytes.
    fn on_slow_start_ack(&mut self, state: &mut ConnectionState, ack: &Ack) {
        state.cwnd = state.cwnd.saturating_add(ack.acked_bytes);
    }

    /// Callback for an acknowledgment received in congestion avoidance.
    fn on_congestion_avoidance_ack(&mut self, state: &mut ConnectionState, ack: &Ack);

    /// Multiplicative decrease factor applied on congestion events.
    fn beta(&self) -> f64;

    /// Congestion event. Update the strategy memory and return the new slow
    /// start threshold in bytes.
    ///
    /// The window memory of the strategy (e.g. the remembered maximum window)
    /// survives this call.
    fn on_congestion_event(
        &mut self,
        state: &ConnectionState,
        signal: CongestionSignal,
        now: Instant,
    ) -> u64 {
        (state.cwnd as f64 * self.beta()) as u64
    }

    /// Retransmission timeout. All strategy memory is cleared and the growth
    /// epoch restarts.
    fn on_timeout(&mut self, state: &ConnectionState, now: Instant);
}

impl fmt::Debug for dyn CongestionController {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "congestion controller.")
    }
}

/// Build a congestion controller.
pub fn build_congestion_controller(conf: &Config) -> Box<dyn CongestionController> {
    match conf.congestion_control_algorithm {
        CongestionControlAlgorithm::Reno => Box::new(Reno::new()),
        CongestionControlAlgorithm::Vegas => Box::new(Vegas::new(VegasConfig::from(conf))),
        CongestionControlAlgorithm::Bic => Box::new(Bic::new(BicConfig::from(conf))),
        CongestionControlAlgorithm::Cubic => Box::new(Cubic::new(CubicConfig::from(conf))),
    }
}

/// Grow the window by `inc` bytes spread over one window of acknowledged
/// bytes, carrying the sub-segment remainder in `cwnd_inc`.
///
/// This is the shared byte-counting accumulator: one acknowledgment covering
/// a full window applies the whole increment, smaller ones apply their share.
pub(crate) fn spread_increment(
    state: &mut ConnectionState,
    cwnd_inc: &mut u64,
    inc: u64,
    acked_bytes: u64,
) {
    let cwnd = state.cwnd.max(1);
    let share = (inc as u128 * acked_bytes as u128 / cwnd as u128).min(u64::MAX as u128) as u64;

    *cwnd_inc = cwnd_inc.saturating_add(share);
    let segments = *cwnd_inc / state.mss;
    state.cwnd = state.cwnd.saturating_add(segments * state.mss);
    *cwnd_inc %= state.mss;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn congestion_control_name() {
        let cases = [
            ("reno", Ok(CongestionControlAlgorithm::Reno)),
            ("Reno", Ok(CongestionControlAlgorithm::Reno)),
            ("vegas", Ok(CongestionControlAlgorithm::Vegas)),
            ("VEGAS", Ok(CongestionControlAlgorithm::Vegas)),
            ("bic", Ok(CongestionControlAlgorithm::Bic)),
            ("Bic", Ok(CongestionControlAlgorithm::Bic)),
            ("BIC", Ok(CongestionControlAlgorithm::Bic)),
            ("cubic", Ok(CongestionControlAlgorithm::Cubic)),
            ("Cubic", Ok(CongestionControlAlgorithm::Cubic)),
            ("CUBIC", Ok(CongestionControlAlgorithm::Cubic)),
            ("cubci", Err(Error::InvalidConfig("unknown".into()))),
            ("bbr", Err(Error::InvalidConfig("unknown".into()))),
        ];

        for (name, algor) in cases {
            assert_eq!(CongestionControlAlgorithm::from_str(name), algor);
        }
    }

    #[test]
    fn congestion_control_build() {
        let mut conf = Config::default();
        let cases = [
            (CongestionControlAlgorithm::Reno, "RENO"),
            (CongestionControlAlgorithm::Vegas, "VEGAS"),
            (CongestionControlAlgorithm::Bic, "BIC"),
            (CongestionControlAlgorithm::Cubic, "CUBIC"),
        ];

        for (algor, name) in cases {
            conf.set_congestion_control_algorithm(algor);
            let cc = build_congestion_controller(&conf);
            assert_eq!(cc.name(), name);
            assert!(cc.beta() > 0.0 && cc.beta() < 1.0);
        }
    }

    #[test]
    fn spread_increment_carry() {
        let mss = 1000;
        let mut state = ConnectionState::new(mss, 10 * mss, Duration::from_millis(100));
        let mut cwnd_inc = 0;

        // Half a window acked with a one segment increment per window.
        spread_increment(&mut state, &mut cwnd_inc, mss, 5 * mss);
        assert_eq!(state.cwnd, 10 * mss);
        assert_eq!(cwnd_inc, 500);

        // The other half completes the segment.
        spread_increment(&mut state, &mut cwnd_inc, mss, 5 * mss);
        assert_eq!(state.cwnd, 11 * mss);
        assert_eq!(cwnd_inc, 0);

        // A full window with a four segment increment applies at once.
        spread_increment(&mut state, &mut cwnd_inc, 4 * mss, 11 * mss);
        assert_eq!(state.cwnd, 15 * mss);
    }
}

pub(crate) mod bic;
pub(crate) mod cubic;
mod hystart_plus_plus;
mod reno;
pub(crate) mod vegas;
