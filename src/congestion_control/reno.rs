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

use std::time::Instant;

use log::*;

use super::spread_increment;
use super::Ack;
use super::CongestionController;
use super::CongestionSignal;
use crate::connection::state::ConnectionState;

/// Reno multiplicative decrease factor.
///
/// See <https://www.rfc-editor.org/rfc/rfc5681#section-3.1>.
const BETA: f64 = 0.5;

/// Reno congestion control algorithm.
///
/// See <https://www.rfc-editor.org/rfc/rfc5681>.
#[derive(Debug, Default)]
pub struct Reno {
    /// Bytes credited towards the next one segment increase.
    cwnd_inc: u64,
}

impl Reno {
    pub fn new() -> Self {
        Self { cwnd_inc: 0 }
    }
}

impl CongestionController for Reno {
    fn name(&self) -> &str {
        "RENO"
    }

    fn on_congestion_avoidance_ack(&mut self, state: &mut ConnectionState, ack: &Ack) {
        // One segment per window of acknowledged bytes.
        let mss = state.mss;
        spread_increment(state, &mut self.cwnd_inc, mss, ack.acked_bytes);
        trace!(
            "{}. cwnd={} cwnd_inc={}",
            self.name(),
            state.cwnd,
            self.cwnd_inc
        );
    }

    fn beta(&self) -> f64 {
        BETA
    }

    fn on_congestion_event(
        &mut self,
        state: &ConnectionState,
        _signal: CongestionSignal,
        _now: Instant,
    ) -> u64 {
        self.cwnd_inc = 0;
        (state.cwnd as f64 * BETA) as u64
    }

    fn on_timeout(&mut self, _state: &ConnectionState, _now: Instant) {
        self.cwnd_inc = 0;
    }
}
