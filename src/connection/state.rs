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

use serde::Serialize;
use strum_macros::Display;

use super::rtt::RttEstimator;

/// Congestion control phase of a connection.
#[derive(Eq, PartialEq, Debug, Clone, Copy, Default, Display, Serialize)]
pub enum Phase {
    /// Exponential window growth.
    #[default]
    SlowStart,

    /// Measured growth governed by the bound strategy.
    CongestionAvoidance,

    /// Fast recovery after a loss reported by fast retransmit.
    Recovery,

    /// Full restart after a retransmission timeout.
    Loss,

    /// Congestion window reduced in response to an ECN signal.
    #[strum(serialize = "CWR")]
    Cwr,
}

/// The last event applied to a connection.
#[derive(Eq, PartialEq, Debug, Clone, Copy, Default, Display, Serialize)]
pub enum LastEvent {
    /// No event has been applied since initialization.
    #[default]
    None,

    /// Segments were acknowledged.
    Acked,

    /// A segment was declared lost.
    PacketLoss,

    /// The retransmission timer fired.
    Timeout,

    /// The peer echoed a congestion experienced mark.
    EcnSignaled,

    /// The transport started fast recovery.
    EnteredRecovery,
}

/// Per-connection congestion state shared by the dispatcher and the bound
/// growth strategy.
#[derive(Debug, Clone)]
pub struct ConnectionState {
    /// Congestion window in bytes. Never below `mss`.
    pub cwnd: u64,

    /// Slow start threshold in bytes. Never below `2 * mss` once reduced.
    pub ssthresh: u64,

    /// Maximum segment size in bytes, fixed at setup.
    pub mss: u64,

    /// RTT estimation for the connection.
    pub rtt: RttEstimator,

    /// Current phase.
    pub phase: Phase,

    /// The last event applied.
    pub last_event: LastEvent,
}

impl ConnectionState {
    pub fn new(mss: u64, initial_cwnd: u64, initial_rtt: Duration) -> Self {
        Self {
            cwnd: initial_cwnd.max(mss),
            ssthresh: u64::MAX,
            mss,
            rtt: RttEstimator::new(initial_rtt),
            phase: Phase::SlowStart,
            last_event: LastEvent::None,
        }
    }

    /// Congestion window in whole segments.
    pub fn cwnd_segments(&self) -> u64 {
        self.cwnd / self.mss.max(1)
    }

    /// Smallest ssthresh allowed after a reduction.
    pub fn min_ssthresh(&self) -> u64 {
        self.mss.saturating_mul(2)
    }

    /// Whether the window is below the slow start threshold.
    pub fn below_ssthresh(&self) -> bool {
        self.cwnd < self.ssthresh
    }

    /// Smoothed RTT.
    pub fn rtt(&self) -> Duration {
        self.rtt.smoothed_rtt()
    }

    /// RTT variance.
    pub fn rtt_variance(&self) -> Duration {
        self.rtt.rttvar()
    }

    /// Retransmission timeout estimate.
    pub fn rto(&self) -> Duration {
        self.rtt.rto()
    }

    /// Read-only snapshot of the window.
    pub fn snapshot(&self) -> WindowSnapshot {
        WindowSnapshot {
            cwnd: self.cwnd,
            ssthresh: self.ssthresh,
            phase: self.phase,
        }
    }

    /// Restore `cwnd >= mss` and `ssthresh >= 2 * mss`.
    pub(crate) fn enforce_bounds(&mut self) {
        self.cwnd = self.cwnd.max(self.mss);
        self.ssthresh = self.ssthresh.max(self.min_ssthresh());
    }
}

/// A point in time view of a connection window.
#[derive(Eq, PartialEq, Debug, Clone, Copy, Serialize)]
pub struct WindowSnapshot {
    /// Congestion window in bytes.
    pub cwnd: u64,

    /// Slow start threshold in bytes.
    pub ssthresh: u64,

    /// Current phase.
    pub phase: Phase,
}
