//! Timestamp-scheduled jitter buffer.
//!
//! Decoded chunks are queued by local playout deadline and drained by a
//! periodic ticker. A chunk is emitted when the local clock is within the
//! playback window of its deadline, kept when it is still early, and
//! dropped (never replayed) when it is already late.
//!
//! The output side distinguishes two lifecycles: [`ChunkScheduler::stop`]
//! pauses emission and clears the queue but leaves the output channel open
//! so a later [`ChunkScheduler::start`] resumes it, while
//! [`ChunkScheduler::finish`] closes the channel for good. Consumers of the
//! output cannot reopen a finished stream, so only session teardown calls
//! `finish`.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::clock::ClockSync;
use crate::state::SchedulerConfig;
use crate::time::now_us;

/// Capacity of the scheduled-chunk output channel.
const OUTPUT_CHANNEL_CAPACITY: usize = 16;

/// A decoded chunk paired with the local microsecond at which its first
/// sample should be rendered.
#[derive(Debug, Clone)]
pub struct ScheduledChunk {
    /// Normalized interleaved 32-bit PCM.
    pub pcm: Bytes,
    /// Local playout deadline in microseconds.
    pub deadline_us: i64,
}

/// Counters shared between the scheduler, the renderer and telemetry.
#[derive(Debug, Default)]
pub struct SchedulerStats {
    /// Chunks accepted by `schedule`.
    pub received: AtomicU64,
    /// Chunks emitted to the output within the playback window.
    pub played: AtomicU64,
    /// Chunks dropped late, evicted on overflow, or discarded by `stop`.
    pub dropped: AtomicU64,
    /// Render-side ledger evictions (the "other" drop class). Kept apart
    /// from `dropped` because those chunks were already counted as played;
    /// the telemetry snapshot folds both classes into its dropped total.
    pub dropped_other: AtomicU64,
}

/// Deadline-ordered queue state. The `(deadline, seq)` key keeps entries
/// with identical deadlines distinct while preserving arrival order.
struct QueueState {
    entries: BTreeMap<(i64, u64), Bytes>,
    seq: u64,
}

struct TickerHandle {
    cancel: CancellationToken,
    task: tokio::task::JoinHandle<()>,
}

/// Priority queue of decoded chunks plus the ticker that drains it.
pub struct ChunkScheduler {
    window_us: i64,
    max_queue: usize,
    tick_period: Duration,
    queue: Mutex<QueueState>,
    stats: Arc<SchedulerStats>,
    clock: Arc<Mutex<ClockSync>>,
    output_tx: Mutex<Option<mpsc::Sender<ScheduledChunk>>>,
    output_rx: Mutex<Option<mpsc::Receiver<ScheduledChunk>>>,
    ticker: Mutex<Option<TickerHandle>>,
}

impl ChunkScheduler {
    /// Creates a scheduler bound to the given clock estimate.
    #[must_use]
    pub fn new(config: &SchedulerConfig, clock: Arc<Mutex<ClockSync>>) -> Arc<Self> {
        let (tx, rx) = mpsc::channel(OUTPUT_CHANNEL_CAPACITY);
        Arc::new(Self {
            window_us: config.playback_window_us,
            max_queue: config.max_queue_size,
            tick_period: Duration::from_micros(config.tick_period_us),
            queue: Mutex::new(QueueState {
                entries: BTreeMap::new(),
                seq: 0,
            }),
            stats: Arc::new(SchedulerStats::default()),
            clock,
            output_tx: Mutex::new(Some(tx)),
            output_rx: Mutex::new(Some(rx)),
            ticker: Mutex::new(None),
        })
    }

    /// Takes the output side of the scheduled-chunk stream. The receiver
    /// stays usable across `stop`/`start` cycles and observes end-of-stream
    /// only after `finish`.
    pub fn take_output(&self) -> Option<mpsc::Receiver<ScheduledChunk>> {
        self.output_rx.lock().take()
    }

    /// Shared counters, also fed by the renderer's admission policy.
    #[must_use]
    pub fn stats(&self) -> Arc<SchedulerStats> {
        Arc::clone(&self.stats)
    }

    /// Converts the server timestamp to a local deadline and inserts the
    /// chunk in deadline order. When the queue is full the oldest entry is
    /// evicted and counted as dropped.
    pub fn schedule(&self, pcm: Bytes, server_timestamp_us: i64) {
        let deadline_us = self.clock.lock().server_to_local(server_timestamp_us);
        let mut queue = self.queue.lock();
        let seq = queue.seq;
        queue.seq += 1;
        queue.entries.insert((deadline_us, seq), pcm);
        self.stats.received.fetch_add(1, Ordering::Relaxed);
        if queue.entries.len() > self.max_queue && queue.entries.pop_first().is_some() {
            self.stats.dropped.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Starts the tick loop. A no-op when the ticker is already running.
    pub fn start(self: &Arc<Self>) {
        let mut ticker = self.ticker.lock();
        if let Some(handle) = ticker.as_ref() {
            if !handle.task.is_finished() {
                return;
            }
        }
        let cancel = CancellationToken::new();
        let task = tokio::spawn(Arc::clone(self).run_ticker(cancel.clone()));
        *ticker = Some(TickerHandle { cancel, task });
    }

    /// Pauses emission and clears the queue. The output channel stays open;
    /// a subsequent `start` resumes emission into the same consumer.
    pub fn stop(&self) {
        if let Some(handle) = self.ticker.lock().take() {
            handle.cancel.cancel();
        }
        self.clear();
    }

    /// Empties the queue without stopping the ticker. Discarded chunks are
    /// counted as dropped.
    pub fn clear(&self) {
        let mut queue = self.queue.lock();
        let discarded = queue.entries.len() as u64;
        queue.entries.clear();
        if discarded > 0 {
            self.stats.dropped.fetch_add(discarded, Ordering::Relaxed);
        }
    }

    /// Stops the ticker and closes the output channel. Consumers observe
    /// end-of-stream; the scheduler cannot be restarted afterwards.
    pub fn finish(&self) {
        self.stop();
        self.output_tx.lock().take();
    }

    /// Current queue length.
    #[must_use]
    pub fn queue_len(&self) -> usize {
        self.queue.lock().entries.len()
    }

    /// Queued deadlines in queue order, for inspection.
    #[must_use]
    pub fn queued_deadlines(&self) -> Vec<i64> {
        self.queue
            .lock()
            .entries
            .keys()
            .map(|&(deadline, _)| deadline)
            .collect()
    }

    async fn run_ticker(self: Arc<Self>, cancel: CancellationToken) {
        let mut ticker = interval(self.tick_period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Burst);

        // One telemetry snapshot per second, counted in ticks.
        let ticks_per_snapshot = ((1_000_000 / self.tick_period.as_micros().max(1)) as u64).max(1);
        let mut tick_count: u64 = 0;

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    self.drain_ready().await;
                    tick_count += 1;
                    if tick_count % ticks_per_snapshot == 0 {
                        self.emit_snapshot();
                    }
                }
            }
        }
    }

    /// Pops every chunk whose deadline falls at or before the playback
    /// window, emitting the ones inside the window and dropping the late
    /// ones. Chunks still ahead of the window stay queued.
    async fn drain_ready(&self) {
        let now = now_us();
        let mut ready = Vec::new();
        {
            let mut queue = self.queue.lock();
            while let Some((&(deadline, seq), _)) = queue.entries.first_key_value() {
                let delay = deadline - now;
                if delay > self.window_us {
                    break;
                }
                if let Some(pcm) = queue.entries.remove(&(deadline, seq)) {
                    if delay < -self.window_us {
                        self.stats.dropped.fetch_add(1, Ordering::Relaxed);
                    } else {
                        ready.push(ScheduledChunk {
                            pcm,
                            deadline_us: deadline,
                        });
                    }
                }
            }
        }
        if ready.is_empty() {
            return;
        }

        let tx = self.output_tx.lock().clone();
        let Some(tx) = tx else {
            // Finished while chunks were in flight.
            self.stats
                .dropped
                .fetch_add(ready.len() as u64, Ordering::Relaxed);
            return;
        };
        for chunk in ready {
            if tx.send(chunk).await.is_ok() {
                self.stats.played.fetch_add(1, Ordering::Relaxed);
            } else {
                self.stats.dropped.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    fn emit_snapshot(&self) {
        let (queue_size, avg_buffer_ms) = {
            let queue = self.queue.lock();
            let now = now_us();
            let len = queue.entries.len();
            let avg = if len == 0 {
                0.0
            } else {
                queue
                    .entries
                    .keys()
                    .map(|&(deadline, _)| (deadline - now).max(0) as f64)
                    .sum::<f64>()
                    / len as f64
                    / 1_000.0
            };
            (len, avg)
        };
        let (clock_offset_ms, rtt_ms) = {
            let clock = self.clock.lock();
            (
                clock.offset_us() as f64 / 1_000.0,
                clock.rtt_us().map(|rtt| rtt as f64 / 1_000.0),
            )
        };
        let dropped_other = self.stats.dropped_other.load(Ordering::Relaxed);
        tracing::info!(
            received = self.stats.received.load(Ordering::Relaxed),
            played = self.stats.played.load(Ordering::Relaxed),
            // All drop classes, render-side ledger evictions included.
            dropped = self.stats.dropped.load(Ordering::Relaxed) + dropped_other,
            dropped_other,
            queue_size,
            avg_buffer_ms,
            clock_offset_ms,
            rtt_ms = ?rtt_ms,
            "scheduler snapshot"
        );
    }
}

impl Drop for ChunkScheduler {
    fn drop(&mut self) {
        if let Some(handle) = self.ticker.lock().take() {
            handle.cancel.cancel();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_scheduler(max_queue_size: usize) -> (Arc<ChunkScheduler>, Arc<Mutex<ClockSync>>) {
        let clock = Arc::new(Mutex::new(ClockSync::new(0.1)));
        let config = SchedulerConfig {
            playback_window_us: 50_000,
            max_queue_size,
            tick_period_us: 10_000,
        };
        (ChunkScheduler::new(&config, Arc::clone(&clock)), clock)
    }

    /// Server timestamp whose local deadline lands `delta_us` away from now.
    fn server_ts(clock: &Arc<Mutex<ClockSync>>, delta_us: i64) -> i64 {
        clock.lock().local_to_server(now_us() + delta_us)
    }

    fn pcm() -> Bytes {
        Bytes::from_static(&[0u8; 64])
    }

    /// Lets the ticker task observe one tick under paused time.
    async fn run_one_tick(period: Duration) {
        for _ in 0..5 {
            tokio::task::yield_now().await;
        }
        tokio::time::advance(period).await;
        for _ in 0..5 {
            tokio::task::yield_now().await;
        }
    }

    #[test]
    fn queue_stays_sorted_regardless_of_arrival_order() {
        let (scheduler, clock) = test_scheduler(100);
        for delta in [3_000_000, 1_000_000, 2_000_000] {
            scheduler.schedule(pcm(), server_ts(&clock, delta));
        }
        let deadlines = scheduler.queued_deadlines();
        assert_eq!(deadlines.len(), 3);
        assert!(
            deadlines.windows(2).all(|w| w[0] <= w[1]),
            "deadlines not ascending: {deadlines:?}"
        );
    }

    #[test]
    fn overflow_evicts_oldest_and_counts_drops() {
        let (scheduler, clock) = test_scheduler(5);
        for i in 0..10 {
            scheduler.schedule(pcm(), server_ts(&clock, 1_000_000 + i * 10_000));
        }
        let stats = scheduler.stats();
        assert_eq!(stats.received.load(Ordering::Relaxed), 10);
        assert!(scheduler.queue_len() <= 5);
        assert!(stats.dropped.load(Ordering::Relaxed) >= 5);
    }

    #[test]
    fn counters_are_conserved() {
        let (scheduler, clock) = test_scheduler(8);
        for i in 0..20 {
            scheduler.schedule(pcm(), server_ts(&clock, 500_000 + i * 1_000));
        }
        let stats = scheduler.stats();
        let received = stats.received.load(Ordering::Relaxed);
        let played = stats.played.load(Ordering::Relaxed);
        let dropped = stats.dropped.load(Ordering::Relaxed);
        assert_eq!(received, played + dropped + scheduler.queue_len() as u64);
    }

    #[tokio::test(start_paused = true)]
    async fn late_chunk_is_dropped_not_emitted() {
        let (scheduler, clock) = test_scheduler(100);
        let mut output = scheduler.take_output().unwrap();
        scheduler.schedule(pcm(), server_ts(&clock, -100_000));
        scheduler.start();
        run_one_tick(Duration::from_millis(10)).await;

        let stats = scheduler.stats();
        assert_eq!(stats.dropped.load(Ordering::Relaxed), 1);
        assert_eq!(stats.played.load(Ordering::Relaxed), 0);
        assert!(output.try_recv().is_err(), "late chunk must not be emitted");
        scheduler.finish();
    }

    #[tokio::test(start_paused = true)]
    async fn early_chunk_stays_queued() {
        let (scheduler, clock) = test_scheduler(100);
        let mut output = scheduler.take_output().unwrap();
        scheduler.schedule(pcm(), server_ts(&clock, 10_000_000));
        scheduler.start();
        run_one_tick(Duration::from_millis(10)).await;

        assert_eq!(scheduler.queue_len(), 1);
        assert!(output.try_recv().is_err());
        scheduler.finish();
    }

    #[tokio::test(start_paused = true)]
    async fn ready_chunk_is_emitted_within_window() {
        let (scheduler, clock) = test_scheduler(100);
        let mut output = scheduler.take_output().unwrap();
        scheduler.schedule(pcm(), server_ts(&clock, 1_000));
        scheduler.start();
        run_one_tick(Duration::from_millis(10)).await;

        let chunk = output.try_recv().expect("chunk should be emitted");
        assert_eq!(chunk.pcm.len(), 64);
        assert_eq!(scheduler.stats().played.load(Ordering::Relaxed), 1);
        scheduler.finish();
    }

    #[tokio::test(start_paused = true)]
    async fn stop_pauses_without_ending_the_output_stream() {
        let (scheduler, clock) = test_scheduler(100);
        let mut output = scheduler.take_output().unwrap();

        // First epoch.
        scheduler.start();
        scheduler.schedule(pcm(), server_ts(&clock, 1_000));
        run_one_tick(Duration::from_millis(10)).await;
        assert!(output.try_recv().is_ok(), "first epoch chunk expected");

        // Stop clears and pauses, but the consumer sees no end-of-stream.
        scheduler.stop();
        run_one_tick(Duration::from_millis(10)).await;
        assert!(matches!(
            output.try_recv(),
            Err(mpsc::error::TryRecvError::Empty)
        ));

        // Second epoch resumes into the same receiver.
        scheduler.start();
        scheduler.schedule(pcm(), server_ts(&clock, 1_000));
        run_one_tick(Duration::from_millis(10)).await;
        assert!(output.try_recv().is_ok(), "second epoch chunk expected");

        // Only finish ends the stream.
        scheduler.finish();
        run_one_tick(Duration::from_millis(10)).await;
        assert!(matches!(
            output.try_recv(),
            Err(mpsc::error::TryRecvError::Disconnected)
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn start_twice_is_a_noop() {
        let (scheduler, clock) = test_scheduler(100);
        let mut output = scheduler.take_output().unwrap();
        scheduler.start();
        scheduler.start();
        scheduler.schedule(pcm(), server_ts(&clock, 1_000));
        run_one_tick(Duration::from_millis(10)).await;

        assert!(output.try_recv().is_ok());
        // A second running ticker would have emitted the chunk twice.
        assert!(output.try_recv().is_err());
        scheduler.finish();
    }
}
