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

use std::sync::Arc;
use std::time::Duration;

use criterion::criterion_group;
use criterion::criterion_main;
use criterion::Criterion;

use tcpcc::Clock;
use tcpcc::CongestionControlAlgorithm;
use tcpcc::Config;
use tcpcc::Connection;
use tcpcc::ManualClock;
use tcpcc::DEFAULT_INITIAL_CWND;
use tcpcc::DEFAULT_MSS;

const ALGORITHMS: [(CongestionControlAlgorithm, &str); 4] = [
    (CongestionControlAlgorithm::Reno, "reno"),
    (CongestionControlAlgorithm::Vegas, "vegas"),
    (CongestionControlAlgorithm::Bic, "bic"),
    (CongestionControlAlgorithm::Cubic, "cubic"),
];

fn new_connection(algor: CongestionControlAlgorithm, clock: &Arc<ManualClock>) -> Connection {
    let mut conf = Config::default();
    conf.set_congestion_control_algorithm(algor);
    let clock: Arc<dyn Clock> = clock.clone();
    let mut conn = Connection::new(&conf, &clock).unwrap();
    conn.initialize(DEFAULT_MSS, DEFAULT_INITIAL_CWND * DEFAULT_MSS);
    conn
}

pub fn ack_benchmark(c: &mut Criterion) {
    for (algor, name) in ALGORITHMS {
        let clock = Arc::new(ManualClock::new());
        let mut conn = new_connection(algor, &clock);
        // Leave slow start so that acks go through congestion avoidance.
        conn.on_loss().unwrap();
        conn.on_acked(1, None).unwrap();

        let rtt = Some(Duration::from_millis(40));
        c.bench_function(&format!("{} congestion avoidance ack", name), |b| {
            b.iter(|| {
                clock.advance(Duration::from_micros(100));
                conn.on_acked(2, rtt).unwrap()
            })
        });
    }
}

pub fn episode_benchmark(c: &mut Criterion) {
    for (algor, name) in ALGORITHMS {
        let clock = Arc::new(ManualClock::new());
        let mut conn = new_connection(algor, &clock);
        let rtt = Some(Duration::from_millis(40));

        c.bench_function(&format!("{} loss episode", name), |b| {
            b.iter(|| {
                clock.advance(Duration::from_millis(1));
                conn.on_loss().unwrap();
                for _ in 0..16 {
                    conn.on_acked(4, rtt).unwrap();
                }
            })
        });
    }
}

criterion_group!(benches, ack_benchmark, episode_benchmark);
criterion_main!(benches);
