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

//! tcpcc is a pluggable TCP congestion control engine.
//!
//! A transport layer drives one [`Connection`] per TCP connection with
//! acknowledgment, loss, timeout and ECN events, and reads back the
//! congestion window (cwnd) and slow start threshold (ssthresh) it should
//! send with. The window growth is delegated to an interchangeable strategy
//! selected at setup:
//!
//! * **Reno**: exponential slow start, one segment per round trip in
//!   congestion avoidance, halve on loss.
//! * **Vegas**: delay based, keeps the estimated number of queued segments
//!   between two thresholds.
//! * **BIC**: binary search towards the window at the last loss, then
//!   probing for a new maximum.
//! * **CUBIC**: cubic function of the time since the last congestion event,
//!   with HyStart++ slow start exit.
//!
//! The engine does not send anything and keeps no timers. Time is read from
//! an injected [`Clock`] so that event sequences can be replayed
//! deterministically.
//!
//! ## Examples:
//!
//! ```
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! let mut conf = tcpcc::Config::default();
//! conf.set_congestion_control_algorithm(tcpcc::CongestionControlAlgorithm::Cubic);
//!
//! let clock: Arc<dyn tcpcc::Clock> = Arc::new(tcpcc::MonotonicClock);
//! let mut conn = tcpcc::Connection::new(&conf, &clock)?;
//! conn.initialize(1460, 10 * 1460);
//!
//! let (cwnd, ssthresh) = conn.on_acked(2, Some(Duration::from_millis(40)))?;
//! assert_eq!(cwnd, 12 * 1460);
//! assert_eq!(ssthresh, u64::MAX);
//! # Ok::<(), tcpcc::Error>(())
//! ```

use std::cmp;
use std::time::Duration;

use serde::Deserialize;
use serde::Serialize;

/// Default maximum segment size in bytes.
pub const DEFAULT_MSS: u64 = 1460;

/// Smallest maximum segment size. A smaller value given at initialization
/// is raised to it.
pub const MIN_MSS: u64 = 88;

/// Default initial congestion window in segments.
/// See RFC 6928.
pub const DEFAULT_INITIAL_CWND: u64 = 10;

/// The RECOMMENDED value of the timer granularity is 1 millisecond.
/// See RFC 9002 Section 6.1
pub const TIMER_GRANULARITY: Duration = Duration::from_millis(1);

/// When no previous RTT is available, the initial RTT SHOULD be set to 333
/// milliseconds. This results in an initial RTO of 1 second, as recommended
/// for TCP's initial RTO.
pub const INITIAL_RTT: Duration = Duration::from_millis(333);

/// Upper bound of the Vegas thresholds, in segments.
const MAX_VEGAS_THRESHOLD: f64 = 1000.0;

/// Upper bound of the CUBIC constant C.
const MAX_CUBIC_C: f64 = 10.0;

/// Result type for congestion control operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Configurations about congestion control.
///
/// The configuration is fixed once a [`Connection`] is created from it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// The congestion control algorithm used for a connection.
    pub congestion_control_algorithm: CongestionControlAlgorithm,

    /// The initial rtt, used before real rtt is estimated.
    pub initial_rtt: Duration,

    /// Vegas: grow below this many queued segments.
    pub vegas_alpha: f64,

    /// Vegas: shrink above this many queued segments.
    pub vegas_beta: f64,

    /// Vegas: leave slow start above this many queued segments.
    pub vegas_gamma: f64,

    /// BIC: largest increment per round trip in segments (Smax).
    pub bic_max_increment: u64,

    /// BIC: smallest increment per round trip in segments (Smin).
    pub bic_min_increment: u64,

    /// BIC: multiplicative decrease factor.
    pub bic_beta: f64,

    /// BIC: window in segments below which BIC grows like Reno.
    pub bic_low_window: u64,

    /// CUBIC: constant C.
    pub cubic_c: f64,

    /// CUBIC: multiplicative decrease factor.
    pub cubic_beta: f64,

    /// CUBIC: enable fast convergence.
    pub cubic_fast_convergence: bool,

    /// CUBIC: enable HyStart++.
    pub cubic_hystart: bool,
}

impl Default for Config {
    fn default() -> Config {
        Config {
            congestion_control_algorithm: CongestionControlAlgorithm::Cubic,
            initial_rtt: INITIAL_RTT,
            vegas_alpha: congestion_control::vegas::ALPHA,
            vegas_beta: congestion_control::vegas::BETA,
            vegas_gamma: congestion_control::vegas::GAMMA,
            bic_max_increment: congestion_control::bic::MAX_INCREMENT,
            bic_min_increment: congestion_control::bic::MIN_INCREMENT,
            bic_beta: congestion_control::bic::BETA,
            bic_low_window: congestion_control::bic::LOW_WINDOW,
            cubic_c: congestion_control::cubic::C,
            cubic_beta: congestion_control::cubic::BETA,
            cubic_fast_convergence: true,
            cubic_hystart: true,
        }
    }
}

impl Config {
    /// Load a configuration from a JSON document. Missing fields take their
    /// default value.
    ///
    /// ## Examples:
    ///
    /// ```
    /// let conf = tcpcc::Config::from_json(r#"{"congestion_control_algorithm": "Bic"}"#)?;
    /// assert_eq!(conf.congestion_control_algorithm, tcpcc::CongestionControlAlgorithm::Bic);
    /// # Ok::<(), tcpcc::Error>(())
    /// ```
    pub fn from_json(json: &str) -> Result<Self> {
        let conf: Config = serde_json::from_str(json)?;
        conf.validate()?;
        Ok(conf)
    }

    /// Set congestion control algorithm that the connection would use.
    /// The default value is Cubic.
    pub fn set_congestion_control_algorithm(&mut self, cca: CongestionControlAlgorithm) {
        self.congestion_control_algorithm = cca;
    }

    /// Set the initial RTT in milliseconds. The default value is 333ms.
    pub fn set_initial_rtt(&mut self, millis: u64) {
        self.initial_rtt = cmp::max(Duration::from_millis(millis), TIMER_GRANULARITY);
    }

    /// Set the Vegas thresholds alpha, beta and gamma in segments.
    /// The default values are 2, 4 and 1.
    pub fn set_vegas_params(&mut self, alpha: f64, beta: f64, gamma: f64) {
        self.vegas_alpha = alpha;
        self.vegas_beta = beta;
        self.vegas_gamma = gamma;
    }

    /// Set the BIC largest and smallest increments per round trip in segments.
    /// The default values are 16 and 1.
    pub fn set_bic_increments(&mut self, max_increment: u64, min_increment: u64) {
        self.bic_max_increment = max_increment;
        self.bic_min_increment = min_increment;
    }

    /// Set the BIC multiplicative decrease factor.
    /// The default value is 0.8.
    pub fn set_bic_beta(&mut self, v: f64) {
        self.bic_beta = v;
    }

    /// Set the window in segments below which BIC grows like Reno.
    /// The default value is 14.
    pub fn set_bic_low_window(&mut self, v: u64) {
        self.bic_low_window = v;
    }

    /// Set the CUBIC constant C.
    /// The default value is 0.4.
    pub fn set_cubic_c(&mut self, v: f64) {
        self.cubic_c = v;
    }

    /// Set the CUBIC multiplicative decrease factor.
    /// The default value is 0.7.
    pub fn set_cubic_beta(&mut self, v: f64) {
        self.cubic_beta = v;
    }

    /// Enable CUBIC fast convergence.
    /// The default value is true.
    pub fn enable_cubic_fast_convergence(&mut self, v: bool) {
        self.cubic_fast_convergence = v;
    }

    /// Enable HyStart++ for CUBIC.
    /// The default value is true.
    pub fn enable_cubic_hystart(&mut self, v: bool) {
        self.cubic_hystart = v;
    }

    /// Check that every parameter is within its accepted range.
    pub fn validate(&self) -> Result<()> {
        if self.initial_rtt.is_zero() {
            return Err(Error::OutOfRangeParameter("initial_rtt".into()));
        }

        let vegas_ok = |v: f64| v.is_finite() && (0.0..=MAX_VEGAS_THRESHOLD).contains(&v);
        if !vegas_ok(self.vegas_alpha) {
            return Err(Error::OutOfRangeParameter("vegas_alpha".into()));
        }
        if !vegas_ok(self.vegas_beta) || self.vegas_beta < self.vegas_alpha {
            return Err(Error::OutOfRangeParameter("vegas_beta".into()));
        }
        if !vegas_ok(self.vegas_gamma) || self.vegas_gamma == 0.0 {
            return Err(Error::OutOfRangeParameter("vegas_gamma".into()));
        }

        if self.bic_min_increment == 0 {
            return Err(Error::OutOfRangeParameter("bic_min_increment".into()));
        }
        if self.bic_max_increment < self.bic_min_increment {
            return Err(Error::OutOfRangeParameter("bic_max_increment".into()));
        }
        if !(self.bic_beta > 0.0 && self.bic_beta < 1.0) {
            return Err(Error::OutOfRangeParameter("bic_beta".into()));
        }

        if !(self.cubic_c > 0.0 && self.cubic_c <= MAX_CUBIC_C) {
            return Err(Error::OutOfRangeParameter("cubic_c".into()));
        }
        if !(self.cubic_beta > 0.0 && self.cubic_beta < 1.0) {
            return Err(Error::OutOfRangeParameter("cubic_beta".into()));
        }

        Ok(())
    }
}


pub use crate::clock::Clock;
pub use crate::clock::ManualClock;
pub use crate::clock::MonotonicClock;
pub use crate::congestion_control::CongestionControlAlgorithm;
pub use crate::congestion_control::CongestionController;
pub use crate::congestion_control::CongestionStats;
pub use crate::connection::state::ConnectionState;
pub use crate::connection::state::LastEvent;
pub use crate::connection::state::Phase;
pub use crate::connection::state::WindowSnapshot;
pub use crate::connection::Connection;
pub use crate::connection::Event;
pub use crate::error::Error;

pub mod clock;

#[path = "congestion_control/congestion_control.rs"]
pub mod congestion_control;

#[path = "connection/connection.rs"]
pub mod connection;

pub mod error;
