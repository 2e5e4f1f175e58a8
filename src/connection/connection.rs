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

//! Per-connection congestion control and event dispatch.
//!
//! A [`Connection`] owns the [`ConnectionState`] of one transport connection
//! and the growth strategy bound to it. Every event goes through
//! [`Connection::dispatch`], which runs the phase machine and lends the state
//! to the strategy for the duration of the callback.

use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;
use std::time::Instant;

use log::*;

use self::phase::Trigger;
use self::rtt::MAX_RTT;
use self::state::ConnectionState;
use self::state::LastEvent;
use self::state::Phase;
use self::state::WindowSnapshot;
use crate::clock::Clock;
use crate::congestion_control;
use crate::congestion_control::Ack;
use crate::congestion_control::CongestionController;
use crate::congestion_control::CongestionSignal;
use crate::congestion_control::CongestionStats;
use crate::error::Error;
use crate::Config;
use crate::Result;
use crate::MIN_MSS;

/// Sequence used to build connection trace ids.
static NEXT_TRACE_SEQ: AtomicU64 = AtomicU64::new(1);

/// An event produced by the transport layer.
#[derive(Eq, PartialEq, Debug, Clone, Copy)]
pub enum Event {
    /// New data was acknowledged.
    Acked {
        /// Number of newly acknowledged segments. Zero makes the event a no-op.
        segments_acked: u64,

        /// RTT measured from this acknowledgment, if any.
        rtt_sample: Option<Duration>,
    },

    /// A segment was declared lost by fast retransmit.
    PacketLoss,

    /// The retransmission timer fired.
    Timeout,

    /// The peer echoed a congestion experienced mark.
    EcnSignaled,

    /// The transport entered fast recovery.
    EnteredRecovery,
}

/// Congestion control of one transport connection.
pub struct Connection {
    /// Configuration the strategy is built from.
    config: Config,

    /// Monotonic time source.
    clock: Arc<dyn Clock>,

    /// Window state, present between `initialize` and `teardown`.
    state: Option<ConnectionState>,

    /// Growth strategy bound to `state`.
    controller: Option<Box<dyn CongestionController>>,

    /// Congestion control statistics.
    stats: CongestionStats,

    /// Unique trace id for debug logging.
    trace_id: String,
}

impl Connection {
    /// Create a connection for the given configuration. The configuration is
    /// validated here and stays fixed for the life of the connection.
    pub fn new(conf: &Config, clock: &Arc<dyn Clock>) -> Result<Self> {
        conf.validate()?;

        let trace_id = format!("CC-{}", NEXT_TRACE_SEQ.fetch_add(1, Ordering::Relaxed));
        Ok(Connection {
            config: conf.clone(),
            clock: Arc::clone(clock),
            state: None,
            controller: None,
            stats: CongestionStats::default(),
            trace_id,
        })
    }

    /// Establish the connection state with the given MSS and initial window,
    /// both in bytes. An existing state is discarded.
    pub fn initialize(&mut self, mss: u64, initial_cwnd: u64) {
        let mss = if mss < MIN_MSS {
            warn!(
                "{} mss {} is below the minimum, use {}",
                self.trace_id, mss, MIN_MSS
            );
            MIN_MSS
        } else {
            mss
        };

        let state = ConnectionState::new(mss, initial_cwnd, self.config.initial_rtt);
        let controller = congestion_control::build_congestion_controller(&self.config);
        debug!(
            "{} initialize {} mss={} cwnd={}",
            self.trace_id,
            controller.name(),
            state.mss,
            state.cwnd
        );

        self.state = Some(state);
        self.controller = Some(controller);
        self.stats = CongestionStats::default();
    }

    /// Discard the connection state. Later events are rejected.
    pub fn teardown(&mut self) {
        if self.state.take().is_some() {
            debug!("{} teardown", self.trace_id);
        }
        self.controller = None;
    }

    /// Whether the connection is between `initialize` and `teardown`.
    pub fn is_active(&self) -> bool {
        self.state.is_some()
    }

    /// Apply an event. Callers read the window afterward.
    pub fn dispatch(&mut self, event: Event) -> Result<()> {
        let now = self.clock.now();
        let mut d = self.dispatcher()?;

        match event {
            Event::Acked {
                segments_acked,
                rtt_sample,
            } => d.on_acked(segments_acked, rtt_sample, now),
            Event::PacketLoss => d.on_loss(LastEvent::PacketLoss, now),
            Event::EnteredRecovery => d.on_loss(LastEvent::EnteredRecovery, now),
            Event::Timeout => d.on_timeout(now),
            Event::EcnSignaled => d.on_ecn(now),
        }

        Ok(())
    }

    /// Acknowledgment of `segments_acked` segments. Return `(cwnd, ssthresh)`.
    pub fn on_acked(
        &mut self,
        segments_acked: u64,
        rtt_sample: Option<Duration>,
    ) -> Result<(u64, u64)> {
        self.dispatch(Event::Acked {
            segments_acked,
            rtt_sample,
        })?;
        self.window()
    }

    /// Loss detected by fast retransmit. Return `(cwnd, ssthresh)`.
    pub fn on_loss(&mut self) -> Result<(u64, u64)> {
        self.dispatch(Event::PacketLoss)?;
        self.window()
    }

    /// Retransmission timeout. Return `(cwnd, ssthresh)`.
    pub fn on_timeout(&mut self) -> Result<(u64, u64)> {
        self.dispatch(Event::Timeout)?;
        self.window()
    }

    /// ECN congestion experienced. Return `(cwnd, ssthresh)`.
    pub fn on_ecn(&mut self) -> Result<(u64, u64)> {
        self.dispatch(Event::EcnSignaled)?;
        self.window()
    }

    /// Read-only snapshot of the window.
    pub fn current_window(&self) -> Result<WindowSnapshot> {
        Ok(self.state()?.snapshot())
    }

    /// The connection state, including RTT estimates.
    pub fn state(&self) -> Result<&ConnectionState> {
        self.state.as_ref().ok_or(Error::InvalidConnection)
    }

    /// Name of the bound congestion control algorithm.
    pub fn congestion_control_name(&self) -> Result<&str> {
        self.controller
            .as_ref()
            .map(|c| c.name())
            .ok_or(Error::InvalidConnection)
    }

    /// Congestion control statistics since `initialize`.
    pub fn stats(&self) -> &CongestionStats {
        &self.stats
    }

    /// Return the unique trace id.
    pub fn trace_id(&self) -> &str {
        &self.trace_id
    }

    /// Set the trace id used as log prefix.
    pub fn set_trace_id(&mut self, trace_id: &str) {
        self.trace_id = trace_id.to_string();
    }

    fn window(&self) -> Result<(u64, u64)> {
        let state = self.state()?;
        Ok((state.cwnd, state.ssthresh))
    }

    fn dispatcher(&mut self) -> Result<Dispatcher<'_>> {
        match (self.state.as_mut(), self.controller.as_mut()) {
            (Some(state), Some(cc)) => Ok(Dispatcher {
                state,
                cc,
                stats: &mut self.stats,
                trace_id: &self.trace_id,
            }),
            _ => Err(Error::InvalidConnection),
        }
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "{} ", self.trace_id)?;
        match &self.state {
            Some(s) => write!(
                f,
                "phase={} cwnd={} ssthresh={} mss={}",
                s.phase, s.cwnd, s.ssthresh, s.mss
            ),
            None => write!(f, "inactive"),
        }
    }
}

/// Borrowed view of an active connection for one event.
struct Dispatcher<'a> {
    state: &'a mut ConnectionState,
    cc: &'a mut Box<dyn CongestionController>,
    stats: &'a mut CongestionStats,
    trace_id: &'a str,
}

impl<'a> Dispatcher<'a> {
    /// Move to the phase reached on `trigger`.
    fn apply(&mut self, trigger: Trigger) {
        let from = self.state.phase;
        let to = phase::transition(from, trigger);
        debug_assert!(phase::is_edge(from, to), "{:?} -> {:?}", from, to);

        if from != to {
            debug!(
                "{} {} phase {} -> {} on {:?}, cwnd={} ssthresh={}",
                self.trace_id,
                self.cc.name(),
                from,
                to,
                trigger,
                self.state.cwnd,
                self.state.ssthresh
            );
            self.state.phase = to;
        }
    }

    fn on_acked(&mut self, segments_acked: u64, rtt_sample: Option<Duration>, now: Instant) {
        if segments_acked == 0 {
            return;
        }

        self.state.last_event = LastEvent::Acked;
        let rtt_sample = rtt_sample.map(|rtt| rtt.min(MAX_RTT));
        if let Some(rtt) = rtt_sample {
            self.state.rtt.update(rtt);
        }

        let acked_bytes = segments_acked.saturating_mul(self.state.mss);
        self.stats.segments_acked_in_total =
            self.stats.segments_acked_in_total.saturating_add(segments_acked);
        self.stats.bytes_acked_in_total = self.stats.bytes_acked_in_total.saturating_add(acked_bytes);

        // The first new acknowledgment confirms the end of an episode. The
        // strategy sees no acknowledgment until then.
        if phase::in_episode(self.state.phase) {
            let below_ssthresh = self.state.below_ssthresh();
            self.apply(Trigger::NewAck { below_ssthresh });
            self.state.enforce_bounds();
            return;
        }

        let ack = Ack {
            acked_bytes,
            rtt_sample,
            now,
        };
        match self.state.phase {
            Phase::SlowStart => {
                self.stats.bytes_acked_in_slow_start = self
                    .stats
                    .bytes_acked_in_slow_start
                    .saturating_add(acked_bytes);

                let ssthresh = self.state.ssthresh;
                self.cc.on_slow_start_ack(self.state, &ack);
                if self.state.ssthresh < ssthresh {
                    self.stats.early_slow_start_exits =
                        self.stats.early_slow_start_exits.saturating_add(1);
                }
            }
            Phase::CongestionAvoidance => {
                self.cc.on_congestion_avoidance_ack(self.state, &ack);
            }
            _ => (),
        }

        if self.state.phase == Phase::SlowStart && !self.state.below_ssthresh() {
            self.apply(Trigger::SsthreshReached);
        }
        self.state.enforce_bounds();

        trace!(
            "{} {} acked={} rtt={:?} srtt={:?} phase={} cwnd={} ssthresh={}",
            self.trace_id,
            self.cc.name(),
            segments_acked,
            rtt_sample,
            self.state.rtt(),
            self.state.phase,
            self.state.cwnd,
            self.state.ssthresh
        );
    }

    /// `PacketLoss` and `EnteredRecovery`. One reduction per episode.
    fn on_loss(&mut self, event: LastEvent, now: Instant) {
        self.state.last_event = event;
        self.stats.loss_events = self.stats.loss_events.saturating_add(1);

        if phase::in_episode(self.state.phase) {
            debug!(
                "{} {:?} absorbed in {}, cwnd={}",
                self.trace_id, event, self.state.phase, self.state.cwnd
            );
            return;
        }

        self.reduce(CongestionSignal::Loss, now);
        self.stats.recovery_episodes = self.stats.recovery_episodes.saturating_add(1);
        self.apply(Trigger::PacketLoss);
    }

    fn on_timeout(&mut self, now: Instant) {
        self.state.last_event = LastEvent::Timeout;
        self.stats.timeouts = self.stats.timeouts.saturating_add(1);

        let ssthresh = (self.state.cwnd as f64 * self.cc.beta()) as u64;
        self.state.ssthresh = ssthresh.max(self.state.min_ssthresh());
        self.state.cwnd = self.state.mss;
        self.cc.on_timeout(self.state, now);

        self.apply(Trigger::Timeout);
        self.state.enforce_bounds();
    }

    fn on_ecn(&mut self, now: Instant) {
        self.state.last_event = LastEvent::EcnSignaled;

        match self.state.phase {
            Phase::Cwr => return,
            Phase::SlowStart | Phase::CongestionAvoidance => {
                self.reduce(CongestionSignal::Ecn, now);
                self.stats.ecn_reductions = self.stats.ecn_reductions.saturating_add(1);
            }
            // Already reduced in this episode.
            Phase::Recovery | Phase::Loss => (),
        }

        self.apply(Trigger::Ecn);
    }

    /// Multiplicative decrease: `ssthresh` from the strategy, `cwnd = ssthresh`.
    fn reduce(&mut self, signal: CongestionSignal, now: Instant) {
        let ssthresh = self.cc.on_congestion_event(self.state, signal, now);
        self.state.ssthresh = ssthresh.max(self.state.min_ssthresh());
        self.state.cwnd = self.state.ssthresh;
        self.state.enforce_bounds();

        debug!(
            "{} {} congestion event {:?}, cwnd={} ssthresh={}",
            self.trace_id,
            self.cc.name(),
            signal,
            self.state.cwnd,
            self.state.ssthresh
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::CongestionControlAlgorithm;

    const MSS: u64 = 1000;

    fn new_connection(algor: CongestionControlAlgorithm, initial_cwnd: u64) -> Result<Connection> {
        let mut conf = Config::default();
        conf.set_congestion_control_algorithm(algor);
        let clock: Arc<dyn Clock> = Arc::new(ManualClock::new());
        let mut conn = Connection::new(&conf, &clock)?;
        conn.initialize(MSS, initial_cwnd);
        Ok(conn)
    }

    fn phase(conn: &Connection) -> Result<Phase> {
        Ok(conn.current_window()?.phase)
    }

    #[test]
    fn connection_not_initialized() -> Result<()> {
        let conf = Config::default();
        let clock: Arc<dyn Clock> = Arc::new(ManualClock::new());
        let mut conn = Connection::new(&conf, &clock)?;

        assert!(!conn.is_active());
        assert_eq!(conn.dispatch(Event::Timeout), Err(Error::InvalidConnection));
        assert_eq!(conn.on_acked(1, None), Err(Error::InvalidConnection));
        assert_eq!(conn.current_window(), Err(Error::InvalidConnection));
        assert_eq!(conn.congestion_control_name(), Err(Error::InvalidConnection));

        conn.initialize(MSS, 10 * MSS);
        assert!(conn.is_active());
        assert_eq!(conn.congestion_control_name()?, "CUBIC");

        conn.teardown();
        assert!(!conn.is_active());
        assert_eq!(conn.on_loss(), Err(Error::InvalidConnection));
        assert_eq!(conn.on_ecn(), Err(Error::InvalidConnection));
        assert_eq!(conn.on_timeout(), Err(Error::InvalidConnection));
        assert_eq!(conn.stats().loss_events, 0);
        Ok(())
    }

    #[test]
    fn connection_invalid_config() {
        let mut conf = Config::default();
        conf.set_cubic_beta(1.2);
        let clock: Arc<dyn Clock> = Arc::new(ManualClock::new());
        assert_eq!(
            Connection::new(&conf, &clock).err(),
            Some(Error::OutOfRangeParameter("cubic_beta".into()))
        );
    }

    #[test]
    fn connection_zero_segments_noop() -> Result<()> {
        let mut conn = new_connection(CongestionControlAlgorithm::Reno, 10 * MSS)?;
        let before = conn.current_window()?;

        conn.dispatch(Event::Acked {
            segments_acked: 0,
            rtt_sample: Some(Duration::from_millis(10)),
        })?;
        assert_eq!(conn.current_window()?, before);
        assert_eq!(conn.state()?.last_event, LastEvent::None);
        assert!(!conn.state()?.rtt.has_sample());
        assert_eq!(conn.stats().segments_acked_in_total, 0);
        Ok(())
    }

    #[test]
    fn connection_huge_acks() -> Result<()> {
        for algor in [
            CongestionControlAlgorithm::Reno,
            CongestionControlAlgorithm::Vegas,
            CongestionControlAlgorithm::Bic,
            CongestionControlAlgorithm::Cubic,
        ] {
            let mut conn = new_connection(algor, 10 * MSS)?;

            for _ in 0..3 {
                let (cwnd, ssthresh) = conn.on_acked(u64::MAX, Some(Duration::MAX))?;
                assert!(cwnd >= MSS);
                assert!(ssthresh >= 2 * MSS);
            }
            assert_eq!(conn.state()?.rtt(), MAX_RTT);

            conn.on_loss()?;
            conn.on_acked(u64::MAX, Some(Duration::MAX))?;
            assert_eq!(conn.on_timeout()?.0, MSS);
            assert_eq!(conn.stats().segments_acked_in_total, u64::MAX);
        }
        Ok(())
    }

    #[test]
    fn connection_mss_floor() -> Result<()> {
        let conf = Config::default();
        let clock: Arc<dyn Clock> = Arc::new(ManualClock::new());
        let mut conn = Connection::new(&conf, &clock)?;
        conn.initialize(0, 0);

        let state = conn.state()?;
        assert_eq!(state.mss, MIN_MSS);
        assert_eq!(state.cwnd, MIN_MSS);
        Ok(())
    }

    #[test]
    fn connection_reno_lifecycle() -> Result<()> {
        let mut conn = new_connection(CongestionControlAlgorithm::Reno, 10 * MSS)?;
        let rtt = Some(Duration::from_millis(50));

        // Slow start.
        assert_eq!(conn.on_acked(4, rtt)?, (14 * MSS, u64::MAX));
        assert_eq!(phase(&conn)?, Phase::SlowStart);
        assert_eq!(conn.state()?.rtt(), Duration::from_millis(50));

        // Loss: halve, enter recovery.
        assert_eq!(conn.on_loss()?, (7 * MSS, 7 * MSS));
        assert_eq!(phase(&conn)?, Phase::Recovery);

        // More losses in the same episode are absorbed.
        assert_eq!(conn.on_loss()?, (7 * MSS, 7 * MSS));
        conn.dispatch(Event::EnteredRecovery)?;
        assert_eq!(conn.current_window()?.cwnd, 7 * MSS);
        assert_eq!(conn.stats().loss_events, 3);
        assert_eq!(conn.stats().recovery_episodes, 1);

        // The first new ack confirms recovery without growth.
        assert_eq!(conn.on_acked(7, rtt)?, (7 * MSS, 7 * MSS));
        assert_eq!(phase(&conn)?, Phase::CongestionAvoidance);

        // One segment per window.
        assert_eq!(conn.on_acked(7, rtt)?, (8 * MSS, 7 * MSS));

        assert_eq!(conn.stats().segments_acked_in_total, 18);
        assert_eq!(conn.stats().bytes_acked_in_slow_start, 4 * MSS);
        Ok(())
    }

    #[test]
    fn connection_slow_start_exit() -> Result<()> {
        let mut conn = new_connection(CongestionControlAlgorithm::Reno, 10 * MSS)?;

        conn.on_loss()?;
        conn.on_timeout()?;
        // ssthresh = max(0.5 * 5 MSS, 2 MSS).
        assert_eq!(conn.current_window()?.ssthresh, 2500);

        // Loss -> SlowStart without growth.
        conn.on_acked(1, None)?;
        assert_eq!(phase(&conn)?, Phase::SlowStart);
        assert_eq!(conn.current_window()?.cwnd, MSS);

        conn.on_acked(1, None)?;
        assert_eq!(phase(&conn)?, Phase::SlowStart);
        assert_eq!(conn.current_window()?.cwnd, 2 * MSS);

        // Reaching ssthresh switches to congestion avoidance.
        conn.on_acked(1, None)?;
        assert_eq!(conn.current_window()?.cwnd, 3 * MSS);
        assert_eq!(phase(&conn)?, Phase::CongestionAvoidance);
        Ok(())
    }

    #[test]
    fn connection_timeout() -> Result<()> {
        for algor in [
            CongestionControlAlgorithm::Reno,
            CongestionControlAlgorithm::Vegas,
            CongestionControlAlgorithm::Bic,
            CongestionControlAlgorithm::Cubic,
        ] {
            let mut conn = new_connection(algor, 100 * MSS)?;
            conn.on_acked(50, Some(Duration::from_millis(20)))?;

            let (cwnd, ssthresh) = conn.on_timeout()?;
            assert_eq!(cwnd, MSS);
            assert!(ssthresh >= 2 * MSS);
            assert_eq!(phase(&conn)?, Phase::Loss);
            assert_eq!(conn.state()?.last_event, LastEvent::Timeout);

            // Repeated timeout.
            assert_eq!(conn.on_timeout()?, (MSS, 2 * MSS));
            assert_eq!(conn.stats().timeouts, 2);
        }
        Ok(())
    }

    #[test]
    fn connection_ecn() -> Result<()> {
        let mut conn = new_connection(CongestionControlAlgorithm::Reno, 20 * MSS)?;

        // SlowStart -> CWR with a reduction.
        assert_eq!(conn.on_ecn()?, (10 * MSS, 10 * MSS));
        assert_eq!(phase(&conn)?, Phase::Cwr);

        // Ignored in CWR, losses absorbed.
        assert_eq!(conn.on_ecn()?, (10 * MSS, 10 * MSS));
        assert_eq!(conn.on_loss()?, (10 * MSS, 10 * MSS));
        assert_eq!(phase(&conn)?, Phase::Cwr);
        assert_eq!(conn.stats().ecn_reductions, 1);
        assert_eq!(conn.stats().recovery_episodes, 0);

        // CWR -> CongestionAvoidance since cwnd == ssthresh.
        conn.on_acked(1, None)?;
        assert_eq!(phase(&conn)?, Phase::CongestionAvoidance);

        // Recovery -> CWR keeps the window.
        conn.on_loss()?;
        assert_eq!(phase(&conn)?, Phase::Recovery);
        assert_eq!(conn.on_ecn()?, (5 * MSS, 5 * MSS));
        assert_eq!(phase(&conn)?, Phase::Cwr);

        // Loss -> CWR keeps the window, then back to slow start.
        conn.on_timeout()?;
        assert_eq!(conn.on_ecn()?, (MSS, 2500));
        assert_eq!(phase(&conn)?, Phase::Cwr);
        conn.on_acked(1, None)?;
        assert_eq!(phase(&conn)?, Phase::SlowStart);
        Ok(())
    }

    #[test]
    fn connection_bic_loss() -> Result<()> {
        let mut conn = new_connection(CongestionControlAlgorithm::Bic, 1000 * MSS)?;

        assert_eq!(conn.on_loss()?, (800 * MSS, 800 * MSS));
        Ok(())
    }

    #[test]
    fn connection_reinitialize() -> Result<()> {
        let mut conn = new_connection(CongestionControlAlgorithm::Vegas, 10 * MSS)?;
        conn.on_loss()?;
        assert_eq!(conn.stats().loss_events, 1);

        conn.initialize(MSS, 10 * MSS);
        let w = conn.current_window()?;
        assert_eq!((w.cwnd, w.ssthresh, w.phase), (10 * MSS, u64::MAX, Phase::SlowStart));
        assert_eq!(conn.stats().loss_events, 0);
        assert_eq!(conn.congestion_control_name()?, "VEGAS");
        Ok(())
    }

    #[test]
    fn connection_trace_id() -> Result<()> {
        let mut conn = new_connection(CongestionControlAlgorithm::Cubic, 10 * MSS)?;
        assert!(conn.trace_id().starts_with("CC-"));

        conn.set_trace_id("client-1");
        assert_eq!(conn.trace_id(), "client-1");
        assert_eq!(
            format!("{:?}", conn),
            "client-1 phase=SlowStart cwnd=10000 ssthresh=18446744073709551615 mss=1000"
        );
        Ok(())
    }
}

pub mod phase;
pub mod rtt;
pub mod state;
