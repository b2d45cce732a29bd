//! Progress counters and the periodic progress reporter

use crate::types::{ContentKey, Event, SpeedType};
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Counters shared between a session, its pipeline runs and its progress reporter
#[derive(Debug, Default)]
pub struct ProgressCounters {
    items_done: AtomicU64,
    items_total: AtomicU64,
    parts_done: AtomicU64,
    bytes_done: AtomicU64,
    failed_once: AtomicU64,
    /// f32 bits of the last reported percentage
    last_percent: AtomicU32,
    /// f64 bits of the last reported speed
    last_speed: AtomicU64,
}

impl ProgressCounters {
    /// Create zeroed counters
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of items the session is going to download
    pub fn set_items_total(&self, total: usize) {
        self.items_total.store(total as u64, Ordering::Relaxed);
    }

    /// One item finished
    pub fn record_item(&self) {
        self.items_done.fetch_add(1, Ordering::Relaxed);
    }

    /// One part written
    pub fn record_part(&self, bytes: u64) {
        self.parts_done.fetch_add(1, Ordering::Relaxed);
        self.bytes_done.fetch_add(bytes, Ordering::Relaxed);
    }

    /// One part failed its first attempt
    pub fn record_failure(&self) {
        self.failed_once.fetch_add(1, Ordering::Relaxed);
    }

    /// Items finished so far
    pub fn items_done(&self) -> u64 {
        self.items_done.load(Ordering::Relaxed)
    }

    /// Items planned
    pub fn items_total(&self) -> u64 {
        self.items_total.load(Ordering::Relaxed)
    }

    /// Parts written so far, across items
    pub fn parts_done(&self) -> u64 {
        self.parts_done.load(Ordering::Relaxed)
    }

    /// Bytes written so far, across items
    pub fn bytes_done(&self) -> u64 {
        self.bytes_done.load(Ordering::Relaxed)
    }

    /// Parts that needed a retry
    pub fn failed_once(&self) -> u64 {
        self.failed_once.load(Ordering::Relaxed)
    }

    /// Progress in percent: bytes for single transfers, items otherwise
    pub fn percent(&self, total_bytes: Option<u64>) -> f32 {
        let (done, total) = match total_bytes {
            Some(total) => (self.bytes_done(), total),
            None => (self.items_done(), self.items_total()),
        };
        if total == 0 {
            return 0.0;
        }
        ((done as f64 / total as f64) * 100.0).min(100.0) as f32
    }

    /// Remember the last reported values for snapshots
    pub fn publish(&self, percent: f32, speed: f64) {
        self.last_percent.store(percent.to_bits(), Ordering::Relaxed);
        self.last_speed.store(speed.to_bits(), Ordering::Relaxed);
    }

    /// Last reported percentage and speed
    pub fn last_reported(&self) -> (f32, f64) {
        (
            f32::from_bits(self.last_percent.load(Ordering::Relaxed)),
            f64::from_bits(self.last_speed.load(Ordering::Relaxed)),
        )
    }
}

/// Throughput over `elapsed`, never dividing by less than one second
pub fn speed(delta: u64, elapsed: Duration) -> f64 {
    delta as f64 / elapsed.as_secs_f64().max(1.0)
}

/// Parameters for spawning a progress reporter background task
pub struct ProgressReporterParams {
    /// Content being reported on
    pub key: ContentKey,
    /// What speed is measured in
    pub speed_type: SpeedType,
    /// Payload size for byte progress; None counts items
    pub total_bytes: Option<u64>,
    /// Time between reports
    pub interval: Duration,
    /// Shared counters
    pub counters: std::sync::Arc<ProgressCounters>,
    /// Event broadcast sender
    pub event_tx: tokio::sync::broadcast::Sender<Event>,
    /// Stops the reporter
    pub cancel_token: tokio_util::sync::CancellationToken,
}

/// Spawn a background task that periodically reports progress and speed
pub fn spawn_progress_reporter(params: ProgressReporterParams) -> tokio::task::JoinHandle<()> {
    let ProgressReporterParams {
        key,
        speed_type,
        total_bytes,
        interval,
        counters,
        event_tx,
        cancel_token,
    } = params;

    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        // First tick completes immediately
        ticker.tick().await;

        let measured = |c: &ProgressCounters| match speed_type {
            SpeedType::Parts => c.parts_done(),
            SpeedType::Bytes => c.bytes_done(),
        };
        let mut last_value = measured(&counters);
        let mut last_time = Instant::now();

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let value = measured(&counters);
                    let speed = speed(value.saturating_sub(last_value), last_time.elapsed());
                    last_value = value;
                    last_time = Instant::now();

                    let percent = counters.percent(total_bytes);
                    counters.publish(percent, speed);

                    event_tx
                        .send(Event::Progress {
                            key: key.clone(),
                            percent,
                            speed,
                            speed_type,
                        })
                        .ok();
                }
                _ = cancel_token.cancelled() => {
                    break;
                }
            }
        }
    })
}
