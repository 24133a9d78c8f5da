//! # lfq-stress
//!
//! Bounded-time stress runs of [`lfq::LockFreeQueue`].
//!
//! `M` producers push distinct encoded values while `K` consumers pop until
//! every value has been received. A run that does not finish before the time
//! limit is a liveness failure; a run that finishes is checked with the queue
//! properties (no loss, no duplicates, per-producer order).
//!
//! ```bash
//! cargo run -p lfq-stress --release -- --producers 8 --consumers 8 --ops 100000
//! ```

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Barrier;
use std::time::{Duration, Instant};

use lfq::TrackedQueue;
use lfq_core::{encode_value, PropertyChecker, QueuePropertyChecker};
use serde::Serialize;
use tracing::{info, warn};

/// Stress run parameters.
#[derive(Debug, Clone, Serialize)]
pub struct StressConfig {
    pub producers: u32,
    pub consumers: u32,
    pub ops_per_producer: u32,
    pub time_limit: Duration,
}

impl Default for StressConfig {
    fn default() -> Self {
        Self {
            producers: 4,
            consumers: 4,
            ops_per_producer: 10_000,
            time_limit: Duration::from_secs(30),
        }
    }
}

impl StressConfig {
    /// Small run for unit tests.
    #[must_use]
    pub fn quick() -> Self {
        Self {
            producers: 2,
            consumers: 2,
            ops_per_producer: 1_000,
            time_limit: Duration::from_secs(10),
        }
    }

    /// Oversubscribed run.
    #[must_use]
    pub fn heavy() -> Self {
        Self {
            producers: 16,
            consumers: 16,
            ops_per_producer: 50_000,
            time_limit: Duration::from_secs(120),
        }
    }

    pub fn validate(&self) -> Result<(), StressError> {
        if self.producers == 0 || self.consumers == 0 {
            return Err(StressError::InvalidConfig(
                "producers and consumers must both be at least 1".into(),
            ));
        }
        if self.ops_per_producer == 0 {
            return Err(StressError::InvalidConfig("ops_per_producer must be at least 1".into()));
        }
        if self.time_limit.is_zero() {
            return Err(StressError::InvalidConfig("time_limit must be non-zero".into()));
        }
        Ok(())
    }

    #[must_use]
    pub fn expected_values(&self) -> u64 {
        u64::from(self.producers) * u64::from(self.ops_per_producer)
    }
}

/// Stress run failures.
#[derive(Debug, thiserror::Error)]
pub enum StressError {
    #[error("invalid stress configuration: {0}")]
    InvalidConfig(String),

    #[error("liveness failure: received {received} of {expected} values within {elapsed:?}")]
    Timeout {
        received: u64,
        expected: u64,
        elapsed: Duration,
    },

    #[error("property violated: {0}")]
    Violation(String),

    #[error("{0} thread panicked")]
    ThreadPanicked(&'static str),
}

/// Summary of a completed run.
#[derive(Debug, Clone, Serialize)]
pub struct StressReport {
    pub producers: u32,
    pub consumers: u32,
    pub pushed: u64,
    pub popped: u64,
    pub empty_pops: u64,
    pub elapsed_ms: u128,
    pub ops_per_sec: f64,
    pub properties_checked: Vec<&'static str>,
}

impl StressReport {
    #[must_use]
    pub fn format(&self) -> String {
        format!(
            "[PASS] producers={} consumers={} pushed={} popped={} empty_pops={} elapsed_ms={} ops_per_sec={:.0}",
            self.producers,
            self.consumers,
            self.pushed,
            self.popped,
            self.empty_pops,
            self.elapsed_ms,
            self.ops_per_sec
        )
    }
}

/// Run one stress round.
pub fn run_stress(config: &StressConfig) -> Result<StressReport, StressError> {
    config.validate()?;
    let expected = config.expected_values();
    info!(
        producers = config.producers,
        consumers = config.consumers,
        ops_per_producer = config.ops_per_producer,
        time_limit_ms = config.time_limit.as_millis() as u64,
        "starting stress run"
    );

    let mut queue = TrackedQueue::new();
    let received = AtomicU64::new(0);
    let empty_pops = AtomicU64::new(0);
    let timed_out = AtomicBool::new(false);
    let barrier = Barrier::new((config.producers + config.consumers) as usize);
    let start = Instant::now();
    let deadline = start + config.time_limit;

    std::thread::scope(|s| -> Result<(), StressError> {
        let producers: Vec<_> = (0..config.producers)
            .map(|p| {
                let (queue, barrier) = (&queue, &barrier);
                s.spawn(move || {
                    barrier.wait();
                    for seq in 0..config.ops_per_producer {
                        queue.push(u64::from(p), encode_value(p, seq));
                    }
                })
            })
            .collect();

        let consumers: Vec<_> = (0..config.consumers)
            .map(|c| {
                let (queue, barrier) = (&queue, &barrier);
                let (received, empty_pops, timed_out) = (&received, &empty_pops, &timed_out);
                let tid = u64::from(config.producers + c);
                s.spawn(move || {
                    barrier.wait();
                    while received.load(Ordering::Acquire) < expected {
                        if queue.pop(tid).is_some() {
                            received.fetch_add(1, Ordering::AcqRel);
                            continue;
                        }
                        empty_pops.fetch_add(1, Ordering::Relaxed);
                        if Instant::now() >= deadline {
                            timed_out.store(true, Ordering::Release);
                            return;
                        }
                        std::thread::yield_now();
                    }
                })
            })
            .collect();

        for handle in producers {
            handle.join().map_err(|_| StressError::ThreadPanicked("producer"))?;
        }
        for handle in consumers {
            handle.join().map_err(|_| StressError::ThreadPanicked("consumer"))?;
        }
        Ok(())
    })?;

    let elapsed = start.elapsed();
    let received = received.into_inner();
    if timed_out.into_inner() || received < expected {
        warn!(received, expected, elapsed_ms = elapsed.as_millis() as u64, "stress run timed out");
        return Err(StressError::Timeout {
            received,
            expected,
            elapsed,
        });
    }

    let observation = queue.observe();
    let results = QueuePropertyChecker::new(&observation).check_all();
    if let Some(failed) = results.iter().find(|r| !r.holds) {
        warn!(property = failed.name, "stress run found a violation");
        return Err(StressError::Violation(failed.format()));
    }

    let ops = expected * 2;
    let report = StressReport {
        producers: config.producers,
        consumers: config.consumers,
        pushed: observation.enqueued.len() as u64,
        popped: observation.dequeued.len() as u64,
        empty_pops: empty_pops.into_inner(),
        elapsed_ms: elapsed.as_millis(),
        ops_per_sec: ops as f64 / elapsed.as_secs_f64().max(f64::EPSILON),
        properties_checked: results.iter().map(|r| r.name).collect(),
    };
    info!(
        pushed = report.pushed,
        popped = report.popped,
        elapsed_ms = elapsed.as_millis() as u64,
        "stress run passed"
    );
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_rejects_empty_sides() {
        let config = StressConfig {
            consumers: 0,
            ..StressConfig::quick()
        };
        assert!(matches!(config.validate(), Err(StressError::InvalidConfig(_))));
        assert!(run_stress(&config).is_err());

        let config = StressConfig {
            time_limit: Duration::ZERO,
            ..StressConfig::quick()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_quick_run_passes() {
        let config = StressConfig::quick();
        let report = run_stress(&config).unwrap();
        assert_eq!(report.pushed, config.expected_values());
        assert_eq!(report.popped, config.expected_values());
        assert!(report.properties_checked.contains(&"PerProducerOrder"));
        assert!(report.format().starts_with("[PASS]"));
    }

    #[test]
    fn test_more_consumers_than_producers() {
        let config = StressConfig {
            producers: 1,
            consumers: 4,
            ops_per_producer: 2_000,
            time_limit: Duration::from_secs(10),
        };
        let report = run_stress(&config).unwrap();
        assert_eq!(report.popped, 2_000);
    }

    #[test]
    fn test_report_serializes() {
        let report = run_stress(&StressConfig::quick()).unwrap();
        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["pushed"], 2_000);
        assert!(json["properties_checked"].is_array());
    }

    #[test]
    fn test_timeout_error_message() {
        let err = StressError::Timeout {
            received: 3,
            expected: 10,
            elapsed: Duration::from_millis(5),
        };
        assert!(err.to_string().contains("received 3 of 10"));
    }
}
