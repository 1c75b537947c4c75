//! Downlink playback engine
//!
//! Network-delivered PCM chunks land in a bounded byte queue and a
//! dedicated playback thread drains them into the audio sink at the sink's
//! own pace. The queue is the only state shared between the network context
//! and the playback thread. Every wait in here is bounded; a wait that
//! expires ends the cycle instead of hanging.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crate::audio::{AudioSink, SinkWait};
use crate::config::DownlinkConfig;
use crate::{Error, Result};

/// Playback lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaybackState {
    /// No cycle running
    Idle,
    /// Pre-buffering before the sink is first touched
    Receiving,
    /// Steady-state chunk delivery
    Playing,
    /// Input ended; flushing what remains in the queue
    Draining,
    /// Terminal; the playback thread has exited or is about to
    Complete,
}

/// Outcome of a bounded dequeue from the chunk queue
#[derive(Debug)]
enum Fetch {
    /// A chunk, in strict arrival order
    Chunk(Vec<u8>),
    /// Queue empty and no more input will arrive
    Finished,
    /// Queue was hard-stopped; pending chunks are gone
    Closed,
    /// Nothing arrived within the wait
    TimedOut,
}

/// Bounded byte-capacity FIFO between the network context and playback
///
/// Overflow drops the newest chunk; the producer is never blocked.
pub struct ChunkQueue {
    inner: Mutex<QueueInner>,
    available: Condvar,
    capacity_bytes: usize,
}

struct QueueInner {
    chunks: VecDeque<Vec<u8>>,
    bytes: usize,
    finished: bool,
    closed: bool,
}

impl ChunkQueue {
    fn new(capacity_bytes: usize) -> Self {
        Self {
            inner: Mutex::new(QueueInner {
                chunks: VecDeque::new(),
                bytes: 0,
                finished: false,
                closed: false,
            }),
            available: Condvar::new(),
            capacity_bytes,
        }
    }

    /// Enqueue a chunk, reporting whether it was accepted
    #[must_use]
    pub fn offer(&self, chunk: &[u8]) -> bool {
        let Ok(mut inner) = self.inner.lock() else {
            return false;
        };

        if inner.closed || inner.finished {
            tracing::debug!(bytes = chunk.len(), "chunk offered to inactive queue");
            return false;
        }
        if inner.bytes + chunk.len() > self.capacity_bytes {
            tracing::warn!(
                queued_bytes = inner.bytes,
                chunk_bytes = chunk.len(),
                "downlink queue full, dropping chunk"
            );
            return false;
        }

        inner.bytes += chunk.len();
        inner.chunks.push_back(chunk.to_vec());
        self.available.notify_one();
        true
    }

    /// Dequeue with a bounded wait
    fn pop_timeout(&self, timeout: Duration) -> Fetch {
        let deadline = Instant::now() + timeout;
        let Ok(mut inner) = self.inner.lock() else {
            return Fetch::Closed;
        };

        loop {
            if let Some(chunk) = inner.chunks.pop_front() {
                inner.bytes -= chunk.len();
                return Fetch::Chunk(chunk);
            }
            if inner.closed {
                return Fetch::Closed;
            }
            if inner.finished {
                return Fetch::Finished;
            }

            let now = Instant::now();
            if now >= deadline {
                return Fetch::TimedOut;
            }
            match self.available.wait_timeout(inner, deadline - now) {
                Ok((guard, _)) => inner = guard,
                Err(_) => return Fetch::Closed,
            }
        }
    }

    /// Mark that no more chunks will be offered; pending chunks still drain
    fn finish(&self) {
        if let Ok(mut inner) = self.inner.lock() {
            inner.finished = true;
        }
        self.available.notify_all();
    }

    /// Hard stop: discard pending chunks and wake all waiters
    fn close(&self) {
        if let Ok(mut inner) = self.inner.lock() {
            inner.closed = true;
            inner.chunks.clear();
            inner.bytes = 0;
        }
        self.available.notify_all();
    }

    /// Chunks currently queued
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.lock().map_or(0, |inner| inner.chunks.len())
    }

    /// Whether the queue holds no chunks
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn is_finished(&self) -> bool {
        self.inner.lock().map_or(true, |inner| inner.finished)
    }

    fn is_closed(&self) -> bool {
        self.inner.lock().map_or(true, |inner| inner.closed)
    }
}

/// State shared between the engine handle and the playback thread
struct EngineShared {
    queue: ChunkQueue,
    state: Mutex<PlaybackState>,
    failed: AtomicBool,
}

impl EngineShared {
    fn set_state(&self, state: PlaybackState) {
        if let Ok(mut current) = self.state.lock() {
            *current = state;
        }
    }

    fn state(&self) -> PlaybackState {
        self.state.lock().map_or(PlaybackState::Complete, |s| *s)
    }
}

/// Factory invoked on the playback thread to open the audio sink
///
/// The sink is constructed there because hardware output streams are not
/// `Send`; only the factory crosses threads.
pub type SinkFactory = Box<dyn FnOnce() -> Result<Box<dyn AudioSink>> + Send>;

/// Paces network audio into the sink on a dedicated thread
pub struct PlaybackEngine {
    config: DownlinkConfig,
    shared: Option<Arc<EngineShared>>,
    handle: Option<JoinHandle<()>>,
}

impl PlaybackEngine {
    /// Create an idle engine
    #[must_use]
    pub fn new(config: DownlinkConfig) -> Self {
        Self {
            config,
            shared: None,
            handle: None,
        }
    }

    /// Start a playback cycle with a fresh queue
    ///
    /// # Errors
    ///
    /// Returns [`Error::Resource`] if a cycle is already running or the
    /// playback thread cannot be spawned
    pub fn start(&mut self, sink_factory: SinkFactory) -> Result<()> {
        if self
            .shared
            .as_ref()
            .is_some_and(|s| s.state() != PlaybackState::Complete)
        {
            return Err(Error::Resource("playback cycle already running".to_string()));
        }
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }

        let shared = Arc::new(EngineShared {
            queue: ChunkQueue::new(self.config.queue_capacity_bytes),
            state: Mutex::new(PlaybackState::Receiving),
            failed: AtomicBool::new(false),
        });

        let thread_shared = Arc::clone(&shared);
        let config = self.config.clone();
        let handle = std::thread::Builder::new()
            .name("voxcore-playback".to_string())
            .spawn(move || {
                if let Err(e) = run_playback(&thread_shared, &config, sink_factory) {
                    thread_shared.failed.store(true, Ordering::SeqCst);
                    tracing::warn!(error = %e, "playback cycle failed");
                }
                thread_shared.set_state(PlaybackState::Complete);
                tracing::debug!("playback thread exiting");
            })
            .map_err(|e| Error::Resource(e.to_string()))?;

        self.shared = Some(shared);
        self.handle = Some(handle);
        tracing::debug!("playback cycle started");
        Ok(())
    }

    /// Offer a network chunk; reports whether it was accepted
    #[must_use]
    pub fn offer(&self, chunk: &[u8]) -> bool {
        self.shared.as_ref().is_some_and(|s| s.queue.offer(chunk))
    }

    /// Signal that no more chunks will arrive; the engine drains and exits
    pub fn signal_complete(&self) {
        if let Some(shared) = &self.shared {
            shared.queue.finish();
        }
    }

    /// Current playback state
    #[must_use]
    pub fn state(&self) -> PlaybackState {
        self.shared
            .as_ref()
            .map_or(PlaybackState::Idle, |s| s.state())
    }

    /// Whether the current or last cycle ended in failure
    #[must_use]
    pub fn failed(&self) -> bool {
        self.shared
            .as_ref()
            .is_some_and(|s| s.failed.load(Ordering::SeqCst))
    }

    /// Whether the playback thread has reached its terminal state
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.state() == PlaybackState::Complete
    }

    /// Stop the cycle, bounded by the configured grace period
    ///
    /// Pending chunks are discarded. If the playback thread does not exit
    /// within the grace period its handle is dropped; the thread will still
    /// see the closed queue on its next wait.
    pub fn stop(&mut self) {
        if let Some(shared) = &self.shared {
            shared.queue.close();
        }

        if let Some(handle) = self.handle.take() {
            let deadline = Instant::now() + self.config.stop_grace();
            while !handle.is_finished() && Instant::now() < deadline {
                std::thread::sleep(Duration::from_millis(self.config.sink_poll_interval_ms));
            }
            if handle.is_finished() {
                let _ = handle.join();
            } else {
                tracing::warn!("playback thread did not exit within grace period");
                drop(handle);
            }
        }

        self.shared = None;
    }
}

impl Drop for PlaybackEngine {
    fn drop(&mut self) {
        self.stop();
    }
}

/// One full playback cycle: pre-buffer, pace into the sink, drain
fn run_playback(
    shared: &EngineShared,
    config: &DownlinkConfig,
    sink_factory: SinkFactory,
) -> Result<()> {
    let poll = Duration::from_millis(config.sink_poll_interval_ms);

    // The sink stays untouched until enough chunks are queued to survive a
    // cold start without underrun. A finished (short) stream plays whatever
    // arrived; only the timeout is a failure.
    let deadline = Instant::now() + config.prebuffer_timeout();
    loop {
        if shared.queue.len() >= config.prebuffer_chunks || shared.queue.is_finished() {
            break;
        }
        if shared.queue.is_closed() {
            return Ok(());
        }
        if Instant::now() >= deadline {
            return Err(Error::Timeout("pre-buffer window expired".to_string()));
        }
        std::thread::sleep(poll);
    }

    let mut sink = sink_factory()?;
    tracing::debug!(queued = shared.queue.len(), "pre-buffer complete");

    loop {
        match shared.queue.pop_timeout(config.fetch_timeout()) {
            Fetch::Chunk(chunk) => {
                match wait_for_room(sink.as_ref(), config) {
                    SinkWait::Ready => {}
                    SinkWait::QueueFull => {
                        return Err(Error::Timeout("sink queue never freed room".to_string()));
                    }
                    SinkWait::Stopped => {
                        return Err(Error::Hardware(
                            "sink stopped during playback".to_string(),
                        ));
                    }
                }
                sink.queue_chunk(&chunk)?;

                if shared.state() == PlaybackState::Receiving {
                    shared.set_state(PlaybackState::Playing);
                }
                if shared.queue.is_finished() {
                    shared.set_state(PlaybackState::Draining);
                }
            }
            Fetch::Finished => {
                // Input can end while the queue is momentarily empty; the
                // cycle still passes through Draining before Complete
                shared.set_state(PlaybackState::Draining);
                break;
            }
            Fetch::Closed => return Ok(()),
            Fetch::TimedOut => {
                return Err(Error::Timeout("downlink stream stalled".to_string()));
            }
        }
    }

    // Let the sink play out what it holds, bailing if it stops making
    // progress within the per-wait bound
    let mut last_queued = sink.queued_samples();
    let mut progress_deadline = Instant::now() + config.sink_wait_timeout();
    while last_queued > 0 && sink.is_active() {
        std::thread::sleep(poll);
        let queued = sink.queued_samples();
        if queued < last_queued {
            last_queued = queued;
            progress_deadline = Instant::now() + config.sink_wait_timeout();
        } else if Instant::now() >= progress_deadline {
            tracing::warn!(queued, "sink stopped draining, abandoning tail");
            break;
        }
    }

    Ok(())
}

/// Bounded wait until the sink can accept another chunk
fn wait_for_room(sink: &dyn AudioSink, config: &DownlinkConfig) -> SinkWait {
    let deadline = Instant::now() + config.sink_wait_timeout();
    loop {
        if !sink.is_active() {
            return SinkWait::Stopped;
        }
        if sink.has_room() {
            return SinkWait::Ready;
        }
        if Instant::now() >= deadline {
            return SinkWait::QueueFull;
        }
        std::thread::sleep(Duration::from_millis(config.sink_poll_interval_ms));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn queue_preserves_arrival_order() {
        let queue = ChunkQueue::new(1024);
        assert!(queue.offer(&[1, 1]));
        assert!(queue.offer(&[2, 2]));
        assert!(queue.offer(&[3, 3]));

        let timeout = Duration::from_millis(10);
        assert!(matches!(queue.pop_timeout(timeout), Fetch::Chunk(c) if c == vec![1, 1]));
        assert!(matches!(queue.pop_timeout(timeout), Fetch::Chunk(c) if c == vec![2, 2]));
        assert!(matches!(queue.pop_timeout(timeout), Fetch::Chunk(c) if c == vec![3, 3]));
        assert!(matches!(queue.pop_timeout(timeout), Fetch::TimedOut));
    }

    #[test]
    fn overflow_drops_newest_without_blocking() {
        let queue = ChunkQueue::new(8);
        assert!(queue.offer(&[0; 6]));
        // 6 + 4 > 8: rejected immediately, existing chunks untouched
        assert!(!queue.offer(&[0; 4]));
        assert_eq!(queue.len(), 1);
        assert!(queue.offer(&[0; 2]));
    }

    #[test]
    fn finished_queue_drains_then_reports_finished() {
        let queue = ChunkQueue::new(64);
        assert!(queue.offer(&[9; 4]));
        queue.finish();

        assert!(!queue.offer(&[1; 4]), "offers after finish are rejected");

        let timeout = Duration::from_millis(10);
        assert!(matches!(queue.pop_timeout(timeout), Fetch::Chunk(_)));
        assert!(matches!(queue.pop_timeout(timeout), Fetch::Finished));
    }

    #[test]
    fn close_discards_pending_chunks() {
        let queue = ChunkQueue::new(64);
        assert!(queue.offer(&[9; 4]));
        queue.close();
        assert!(matches!(
            queue.pop_timeout(Duration::from_millis(10)),
            Fetch::Closed
        ));
        assert!(queue.is_empty());
    }
}
