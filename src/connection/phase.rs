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

//! Phase transitions.
//!
//! ```text
//!              cwnd >= ssthresh
//!  SlowStart ------------------> CongestionAvoidance
//!     |  \                          /   |    ^
//!     |   \ loss            loss   /    |    | new ack
//!     |    +-------> Recovery <---+     |    |
//!     |                 |---------------+----+
//!     |  timeout (from any phase)       |
//!     +-----------------> Loss <--------+
//!                          |  new ack -> SlowStart
//!  ECN from SlowStart, CongestionAvoidance, Recovery or Loss -> CWR
//!  CWR + new ack -> CongestionAvoidance (SlowStart below ssthresh)
//! ```

use super::state::Phase;

/// Something that may move a connection to another phase.
#[derive(Eq, PartialEq, Debug, Clone, Copy)]
pub enum Trigger {
    /// The window reached the slow start threshold.
    SsthreshReached,

    /// Loss detected by fast retransmit.
    PacketLoss,

    /// Retransmission timeout.
    Timeout,

    /// Congestion experienced echoed by the peer.
    Ecn,

    /// An acknowledgment of new data.
    NewAck {
        /// Whether cwnd is below ssthresh.
        below_ssthresh: bool,
    },
}

/// Return the phase reached from `from` on `trigger`. Triggers without an
/// edge leave the phase unchanged.
pub fn transition(from: Phase, trigger: Trigger) -> Phase {
    use Phase::*;

    match (from, trigger) {
        (SlowStart, Trigger::SsthreshReached) => CongestionAvoidance,

        (SlowStart | CongestionAvoidance, Trigger::PacketLoss) => Recovery,

        (_, Trigger::Timeout) => Loss,

        (SlowStart | CongestionAvoidance | Recovery | Loss, Trigger::Ecn) => Cwr,

        (Recovery, Trigger::NewAck { .. }) => CongestionAvoidance,
        (Loss, Trigger::NewAck { .. }) => SlowStart,
        (Cwr, Trigger::NewAck { below_ssthresh }) => {
            if below_ssthresh {
                SlowStart
            } else {
                CongestionAvoidance
            }
        }

        (phase, _) => phase,
    }
}

/// Whether `from -> to` is an edge of the machine. Self loops are allowed.
pub fn is_edge(from: Phase, to: Phase) -> bool {
    use Phase::*;

    if from == to {
        return true;
    }

    matches!(
        (from, to),
        (SlowStart, CongestionAvoidance)
            | (SlowStart | CongestionAvoidance, Recovery)
            | (_, Loss)
            | (SlowStart | CongestionAvoidance | Recovery | Loss, Cwr)
            | (Recovery, CongestionAvoidance)
            | (Loss, SlowStart)
            | (Cwr, SlowStart | CongestionAvoidance)
    )
}

/// Whether the phase belongs to a congestion episode in which the window has
/// already been reduced.
pub fn in_episode(phase: Phase) -> bool {
    matches!(phase, Phase::Recovery | Phase::Loss | Phase::Cwr)
}
