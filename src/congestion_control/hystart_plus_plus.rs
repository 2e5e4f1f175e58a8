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

//! HyStart++: Modified Slow Start for TCP.
//!
//! HyStart++, a simple modification to the slow start phase of congestion
//! control algorithms. Slow start can overshoot the ideal send rate in many cases,
//! causing high packet loss and poor performance. HyStart++ uses increase in
//! round-trip delay as a heuristic to find an exit point before possible overshoot.
//! It also adds a mitigation to prevent jitter from causing premature slow start exit.
//!
//! Rounds are delimited by acknowledged bytes: a round ends once the window
//! in place when it started has been acknowledged.
//!
//! See <https://www.rfc-editor.org/rfc/rfc9406.html>.

use std::time::Duration;

/// Tuning constants. Lower bound of the delay increase sensitivity.
///
/// Smaller values of `MIN_RTT_THRESH` may cause spurious exits from slow start.
///
/// See <https://www.rfc-editor.org/rfc/rfc9406.html#name-tuning-constants-and-other->.
const MIN_RTT_THRESH: Duration = Duration::from_millis(4);

/// Tuning constants. Upper bound of the delay increase sensitivity.
///
/// Larger values of `MAX_RTT_THRESH` may result in slow start not exiting until loss is
/// encountered for connections on large RTT paths.
///
/// See <https://www.rfc-editor.org/rfc/rfc9406.html#name-tuning-constants-and-other->.
const MAX_RTT_THRESH: Duration = Duration::from_millis(16);

/// Tuning constants. A fraction of RTT to compute the delay threshold.
///
/// See <https://www.rfc-editor.org/rfc/rfc9406.html#name-tuning-constants-and-other->.
const MIN_RTT_DIVISOR: u32 = 8;

/// Tuning constants. The least sample counts in one round.
///
/// See <https://www.rfc-editor.org/rfc/rfc9406.html#name-tuning-constants-and-other->.
pub const N_RTT_SAMPLE: u32 = 8;

/// Tuning constants. A divisor factor to make slow start less aggressive.
///
/// MUST be at least `2`.
/// See <https://www.rfc-editor.org/rfc/rfc9406.html#name-tuning-constants-and-other->.
pub const CSS_GROWTH_DIVISOR: u32 = 4;

/// Tuning constants. The max lasting rounds in Conservative Slow Start (CSS).
///
/// See <https://www.rfc-editor.org/rfc/rfc9406.html#name-tuning-constants-and-other->.
pub const CSS_ROUNDS: u32 = 5;

/// Tuning constants. The max congestion window growth per ack, in segments.
///
/// See <https://www.rfc-editor.org/rfc/rfc9406.html#name-tuning-constants-and-other->.
const HYSTART_L: u32 = 64;

/// HyStart++ phase.
#[derive(Debug, PartialEq)]
enum HystartPhase {
    /// Hystart++ is in standard slow start.
    InStandardSlowStart,

    /// Hystart++ is in CSS phase.
    InConservativeSlowStart,

    /// Hystart++ exited and should enter congestion avoidance.
    Exited,
}

/// Implementation of HyStart++.
pub struct HystartPlusPlus {
    /// Whether Hystart++ is enabled.
    enabled: bool,

    /// Current phase.
    phase: HystartPhase,

    /// lastRoundMinRTT: MinRTT in last round.
    last_round_min_rtt: Duration,

    /// currentRoundMinRTT: MinRTT in current round.
    current_round_min_rtt: Duration,

    /// RTT sample count in current round.
    rtt_sample_count: u32,

    /// Bytes acknowledged in the current round.
    round_acked_bytes: u64,

    /// windowEnd: bytes to acknowledge before the current round ends.
    window_end: u64,

    /// Conservative Slow Start round count.
    css_round_count: u32,

    /// cssBaselineMinRtt: Conservative Slow Start baseline minRTT.
    css_baseline_min_rtt: Duration,
}

impl std::fmt::Debug for HystartPlusPlus {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "Hystart ")?;
        write!(f, "Hystart_enabled={:?} ", self.enabled)?;
        write!(f, "phase={:?} ", self.phase)?;
        write!(
            f,
            "last_round_min_rtt={:?} ",
            self.last_round_min_rtt.as_millis()
        )?;
        write!(
            f,
            "current_round_min_rtt={:?} ",
            self.current_round_min_rtt.as_millis()
        )?;
        write!(f, "rtt_sample_count={:?} ", self.rtt_sample_count)?;
        write!(f, "round_acked_bytes={:?} ", self.round_acked_bytes)?;
        write!(f, "window_end={:?} ", self.window_end)?;
        write!(f, "css_round_count={:?} ", self.css_round_count)?;
        write!(
            f,
            "css_baseline_min_rtt={:?} ",
            self.css_baseline_min_rtt.as_millis()
        )?;

        Ok(())
    }
}

impl HystartPlusPlus {
    pub fn new(enabled: bool) -> Self {
        Self {
            enabled,
            phase: HystartPhase::InStandardSlowStart,
            last_round_min_rtt: Duration::MAX,
            current_round_min_rtt: Duration::MAX,
            rtt_sample_count: 0,
            round_acked_bytes: 0,
            window_end: 0,
            css_round_count: 0,
            css_baseline_min_rtt: Duration::MAX,
        }
    }

    /// Whether Hystart++ is enabled.
    pub fn enabled(&self) -> bool {
        self.enabled
    }

    /// Whether Hystart++ has exited.
    pub fn has_exited(&self) -> bool {
        self.phase == HystartPhase::Exited
    }

    /// Whether in conservative slow start phase.
    pub fn in_conservative_slow_start(&self) -> bool {
        self.phase == HystartPhase::InConservativeSlowStart
    }

    /// Whether in standard slow start phase.
    pub fn in_standard_slow_start(&self) -> bool {
        self.phase == HystartPhase::InStandardSlowStart
    }

    /// Process a received ACK, determine which phase is in, and update the
    /// round once a window of bytes has been acknowledged.
    pub fn on_ack(&mut self, acked_bytes: u64, rtt: Option<Duration>, cwnd: u64) {
        if !self.enabled || self.has_exited() {
            return;
        }

        if let Some(rtt) = rtt {
            self.on_rtt_sample(rtt);
        }

        if self.window_end == 0 {
            self.window_end = cwnd;
        }
        self.round_acked_bytes = self.round_acked_bytes.saturating_add(acked_bytes);
        if self.round_acked_bytes >= self.window_end {
            self.end_round(cwnd);
        }
    }

    /// Check to see if delay increase triggers slow start exit.
    ///
    /// See <https://www.rfc-editor.org/rfc/rfc9406.html#name-algorithm-details>.
    fn on_rtt_sample(&mut self, rtt: Duration) {
        // Keep track of the minimum observed RTT.
        self.current_round_min_rtt = self.current_round_min_rtt.min(rtt);
        self.rtt_sample_count = self.rtt_sample_count.saturating_add(1);

        match self.phase {
            HystartPhase::InStandardSlowStart => {
                if self.rtt_sample_count >= N_RTT_SAMPLE
                    && self.current_round_min_rtt != Duration::MAX
                    && self.last_round_min_rtt != Duration::MAX
                {
                    let rtt_thresh = (self.last_round_min_rtt / MIN_RTT_DIVISOR)
                        .clamp(MIN_RTT_THRESH, MAX_RTT_THRESH);

                    if self.current_round_min_rtt
                        >= self.last_round_min_rtt.saturating_add(rtt_thresh)
                    {
                        self.css_baseline_min_rtt = self.current_round_min_rtt;
                        self.phase = HystartPhase::InConservativeSlowStart;
                    }
                }
            }
            HystartPhase::InConservativeSlowStart => {
                if self.rtt_sample_count >= N_RTT_SAMPLE
                    && self.current_round_min_rtt < self.css_baseline_min_rtt
                {
                    // Slow start exit was spurious, resume standard slow start.
                    self.css_baseline_min_rtt = Duration::MAX;
                    self.phase = HystartPhase::InStandardSlowStart;
                    self.css_round_count = 0;
                }
            }
            _ => (),
        };
    }

    /// Start a new round sized by the current window.
    fn end_round(&mut self, cwnd: u64) {
        self.window_end = cwnd;
        self.round_acked_bytes = 0;

        // lastRoundMinRTT = currentRoundMinRTT
        // currentRoundMinRTT = infinity
        // rttSampleCount = 0
        // See <https://www.rfc-editor.org/rfc/rfc9406.html#name-algorithm-details>.
        self.last_round_min_rtt = self.current_round_min_rtt;
        self.current_round_min_rtt = Duration::MAX;
        self.rtt_sample_count = 0;

        // CSS lasts at most CSS_ROUNDS rounds.
        if self.in_conservative_slow_start() {
            self.css_round_count += 1;
            if self.css_round_count >= CSS_ROUNDS {
                // Enter congestion avoidance.
                self.css_round_count = 0;
                self.phase = HystartPhase::Exited;
            }
        }
    }

    /// Exit HyStart++ if congestion event happens, enter congestion avoidance.
    pub fn on_congestion_event(&mut self) {
        if self.enabled {
            self.window_end = 0;
            self.round_acked_bytes = 0;
            self.phase = HystartPhase::Exited;
        }
    }

    /// Start over, e.g. after a retransmission timeout.
    pub fn reset(&mut self) {
        *self = Self::new(self.enabled);
    }

    /// Congestion window increment.
    pub fn cwnd_increment(&self, acked_bytes: u64, max_datagram_size: u64) -> u64 {
        if !self.enabled {
            return acked_bytes;
        }

        match self.phase {
            HystartPhase::InStandardSlowStart => {
                acked_bytes.min(HYSTART_L as u64 * max_datagram_size)
            }
            HystartPhase::InConservativeSlowStart => {
                (acked_bytes / CSS_GROWTH_DIVISOR as u64).min(HYSTART_L as u64 * max_datagram_size)
            }
            _ => 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MSS: u64 = 1350;

    /// Feed one round of `N_RTT_SAMPLE` single segment acks with RTTs
    /// `min_rtt_ms + i`, on a window of `N_RTT_SAMPLE` segments.
    fn feed_round(hspp: &mut HystartPlusPlus, min_rtt_ms: u64) {
        let cwnd = N_RTT_SAMPLE as u64 * MSS;
        for i in 0..N_RTT_SAMPLE as u64 {
            hspp.on_ack(MSS, Some(Duration::from_millis(min_rtt_ms + i)), cwnd);
        }
    }

    #[test]
    fn hystart_on_event() {
        let mut hspp = HystartPlusPlus::new(true);

        assert_eq!(hspp.enabled(), true);
        assert_eq!(hspp.in_standard_slow_start(), true);

        // Round 1. Initial slow start.
        feed_round(&mut hspp, 30);
        assert_eq!(hspp.in_standard_slow_start(), true);
        assert_eq!(hspp.last_round_min_rtt, Duration::from_millis(30));
        assert_eq!(hspp.current_round_min_rtt, Duration::MAX);
        assert_eq!(hspp.rtt_sample_count, 0);
        assert_eq!(hspp.round_acked_bytes, 0);
        assert_eq!(hspp.window_end, N_RTT_SAMPLE as u64 * MSS);

        // Round 2. Still in slow start, 32ms < 30ms + 4ms.
        feed_round(&mut hspp, 32);
        assert_eq!(hspp.in_standard_slow_start(), true);

        // Round 3. Switch to CSS. Baseline 38ms.
        feed_round(&mut hspp, 38);
        assert_eq!(hspp.in_conservative_slow_start(), true);
        assert_eq!(hspp.css_baseline_min_rtt, Duration::from_millis(38));
        assert_eq!(hspp.css_round_count, 1);
        assert_eq!(hspp.cwnd_increment(MSS, MSS), MSS / CSS_GROWTH_DIVISOR as u64);

        // Round 4. Still in CSS.
        feed_round(&mut hspp, 40);
        assert_eq!(hspp.in_conservative_slow_start(), true);
        assert_eq!(hspp.css_round_count, 2);

        // Round 5. RTT below the baseline: the exit was spurious.
        feed_round(&mut hspp, 36);
        assert_eq!(hspp.in_standard_slow_start(), true);
        assert_eq!(hspp.css_round_count, 0);
        assert_eq!(hspp.css_baseline_min_rtt, Duration::MAX);

        // Round 6. Switch to CSS. Baseline 42ms. CSS round 1.
        feed_round(&mut hspp, 42);
        assert_eq!(hspp.in_conservative_slow_start(), true);
        assert_eq!(hspp.css_baseline_min_rtt, Duration::from_millis(42));

        // Rounds 7 to 9. Still in CSS.
        for min_rtt in [43, 44, 45] {
            feed_round(&mut hspp, min_rtt);
            assert_eq!(hspp.in_conservative_slow_start(), true);
        }
        assert_eq!(hspp.css_round_count, 4);

        // Round 10. CSS round 5, switch to congestion avoidance.
        feed_round(&mut hspp, 46);
        assert_eq!(hspp.has_exited(), true);
        assert_eq!(hspp.cwnd_increment(MSS, MSS), 0);

        // Exited: further acks are ignored.
        feed_round(&mut hspp, 10);
        assert_eq!(hspp.has_exited(), true);
    }

    #[test]
    fn hystart_round_without_samples() {
        let mut hspp = HystartPlusPlus::new(true);
        let cwnd = 4 * MSS;

        for _ in 0..4 {
            hspp.on_ack(MSS, None, cwnd);
        }
        assert_eq!(hspp.last_round_min_rtt, Duration::MAX);
        assert_eq!(hspp.round_acked_bytes, 0);
        assert_eq!(hspp.in_standard_slow_start(), true);
    }

    #[test]
    fn hystart_cwnd_increment() {
        let hspp = HystartPlusPlus::new(true);
        assert_eq!(hspp.cwnd_increment(MSS, MSS), MSS);
        assert_eq!(
            hspp.cwnd_increment(100 * MSS, MSS),
            HYSTART_L as u64 * MSS
        );

        let hspp = HystartPlusPlus::new(false);
        assert_eq!(hspp.cwnd_increment(100 * MSS, MSS), 100 * MSS);
    }

    #[test]
    fn hystart_congestion_event_and_reset() {
        let mut hspp = HystartPlusPlus::new(true);
        feed_round(&mut hspp, 30);

        hspp.on_congestion_event();
        assert_eq!(hspp.has_exited(), true);
        assert_eq!(hspp.window_end, 0);

        hspp.reset();
        assert_eq!(hspp.in_standard_slow_start(), true);
        assert_eq!(hspp.last_round_min_rtt, Duration::MAX);
        assert_eq!(hspp.enabled(), true);

        let mut disabled = HystartPlusPlus::new(false);
        disabled.on_congestion_event();
        assert_eq!(disabled.has_exited(), false);
    }
}
