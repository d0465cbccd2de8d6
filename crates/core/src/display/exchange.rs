use std::collections::VecDeque;
use std::time::{Duration, Instant};

use crossbeam_channel::Sender;
use parking_lot::{Condvar, Mutex, MutexGuard};

use super::{DisplayEvent, VideoFormat};
use crate::error::{RelayError, Result};

/// Number of pooled buffers when none is given.
pub const DEFAULT_CAPACITY: usize = 2;

/// Granularity at which blocked producers re-check whether the display
/// went away.
const CLOSE_POLL: Duration = Duration::from_millis(100);

/// A pooled presentation buffer.
///
/// `H` is the backend handle created by the [`Presenter`](super::Presenter).
#[derive(Debug)]
pub struct Frame<H> {
    id: u64,
    generation: u64,
    format: VideoFormat,
    buffer: H,
}

impl<H> Frame<H> {
    pub(crate) fn new(id: u64, generation: u64, format: VideoFormat, buffer: H) -> Self {
        Self {
            id,
            generation,
            format,
            buffer,
        }
    }

    /// Stable identity of the pooled buffer.
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn format(&self) -> VideoFormat {
        self.format
    }

    pub fn buffer(&self) -> &H {
        &self.buffer
    }

    pub fn buffer_mut(&mut self) -> &mut H {
        &mut self.buffer
    }

    pub(crate) fn generation(&self) -> u64 {
        self.generation
    }

    pub(crate) fn into_buffer(self) -> H {
        self.buffer
    }
}

/// How long [`FrameExchange::submit`] may wait for the consumer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmitPolicy {
    /// Return the frame to the pool without showing it.
    Discard,
    /// Wait until a buffer is free.
    Blocking,
    /// Wait at most this long.
    Timeout(Duration),
    /// Never wait.
    Immediate,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmitOutcome {
    /// Handed to the consumer.
    Queued,
    /// Returned unseen, as requested by [`SubmitPolicy::Discard`].
    Discarded,
    /// The consumer was too slow; this many frames were recycled unseen.
    Dropped(usize),
}

pub(crate) struct Pool<H> {
    pub(crate) free: VecDeque<Frame<H>>,
    pub(crate) format: Option<VideoFormat>,
    pub(crate) generation: u64,
    pub(crate) next_id: u64,
    pub(crate) reconfigure_status: Option<bool>,
    pub(crate) closed: bool,
}

/// Bounded producer/consumer hand-off of presentation buffers.
///
/// The producer [`acquire_buffer`](Self::acquire_buffer)s a frame, fills
/// it and [`submit`](Self::submit)s it. The consumer presents it and puts
/// it back into the free pool, waking a producer blocked on
/// `frame_consumed`. At most `capacity` buffers exist at any time.
pub struct FrameExchange<H> {
    pool: Mutex<Pool<H>>,
    frame_consumed: Condvar,
    reconfigured: Condvar,
    events: Sender<DisplayEvent<H>>,
    capacity: usize,
}

impl<H: Send> FrameExchange<H> {
    pub(crate) fn new(capacity: usize, events: Sender<DisplayEvent<H>>) -> Self {
        Self {
            pool: Mutex::new(Pool {
                free: VecDeque::with_capacity(capacity),
                format: None,
                generation: 0,
                next_id: 0,
                reconfigure_status: None,
                closed: false,
            }),
            frame_consumed: Condvar::new(),
            reconfigured: Condvar::new(),
            events,
            capacity: capacity.max(1),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Buffers currently waiting in the free pool.
    pub fn free_count(&self) -> usize {
        self.pool.lock().free.len()
    }

    /// Format of the pooled buffers, once configured.
    pub fn format(&self) -> Option<VideoFormat> {
        self.pool.lock().format
    }

    /// Take a free buffer, blocking until the consumer returns one.
    pub fn acquire_buffer(&self) -> Result<Frame<H>> {
        let mut pool = self.pool.lock();
        loop {
            if pool.closed {
                return Err(RelayError::DisplayGone);
            }
            if let Some(frame) = pool.free.pop_front() {
                return Ok(frame);
            }
            self.frame_consumed.wait_for(&mut pool, CLOSE_POLL);
        }
    }

    /// Hand a filled frame to the consumer.
    ///
    /// Before queueing, waits according to `policy` for the pool to hold a
    /// free buffer so the producer always has one to fill next. If none
    /// shows up, `frame` itself goes back to the pool and
    /// [`SubmitOutcome::Dropped`] is returned.
    pub fn submit(&self, frame: Frame<H>, policy: SubmitPolicy) -> Result<SubmitOutcome> {
        let mut pool = self.pool.lock();
        if pool.closed {
            return Err(RelayError::DisplayGone);
        }
        if frame.generation() != pool.generation {
            // Built before the last reconfiguration: the consumer destroys it.
            drop(pool);
            tracing::debug!(frame = frame.id(), "stale frame released");
            self.post(DisplayEvent::Release(frame))?;
            return Ok(SubmitOutcome::Dropped(1));
        }

        let has_free = match policy {
            SubmitPolicy::Discard => {
                self.recycle(&mut pool, frame);
                return Ok(SubmitOutcome::Discarded);
            }
            SubmitPolicy::Immediate => !pool.free.is_empty(),
            SubmitPolicy::Blocking => {
                while pool.free.is_empty() && !pool.closed {
                    self.frame_consumed.wait_for(&mut pool, CLOSE_POLL);
                }
                !pool.free.is_empty()
            }
            SubmitPolicy::Timeout(timeout) => {
                let deadline = Instant::now() + timeout;
                while pool.free.is_empty() && !pool.closed {
                    if self.frame_consumed.wait_until(&mut pool, deadline).timed_out() {
                        break;
                    }
                }
                !pool.free.is_empty()
            }
        };

        if pool.closed {
            return Err(RelayError::DisplayGone);
        }
        if !has_free {
            tracing::trace!(frame = frame.id(), "consumer busy, frame dropped");
            self.recycle(&mut pool, frame);
            return Ok(SubmitOutcome::Dropped(1));
        }

        drop(pool);
        if let Err(err) = self.events.send(DisplayEvent::NewFrame(frame)) {
            if let DisplayEvent::NewFrame(frame) = err.into_inner() {
                let mut pool = self.pool.lock();
                self.recycle(&mut pool, frame);
            }
            return Err(RelayError::DisplayGone);
        }
        Ok(SubmitOutcome::Queued)
    }

    /// Rebuild every pooled buffer in `format`.
    ///
    /// Blocks until the consumer loop has drained the pool and reported
    /// whether the new buffers could be created. Frames acquired before
    /// the call are released unseen when submitted.
    pub fn reconfigure(&self, format: VideoFormat) -> Result<bool> {
        let mut pool = self.pool.lock();
        if pool.closed {
            return Err(RelayError::DisplayGone);
        }
        pool.reconfigure_status = None;
        if self.events.send(DisplayEvent::Reconfigure(format)).is_err() {
            return Err(RelayError::DisplayGone);
        }

        loop {
            if let Some(status) = pool.reconfigure_status.take() {
                return Ok(status);
            }
            if pool.closed {
                return Err(RelayError::DisplayGone);
            }
            self.reconfigured.wait_for(&mut pool, CLOSE_POLL);
        }
    }

    /// Ask the consumer to present the last shown frame again.
    pub fn request_redraw(&self) -> Result<()> {
        self.post(DisplayEvent::Redraw)
    }

    /// Ask the consumer loop to exit.
    pub fn request_quit(&self) -> Result<()> {
        self.post(DisplayEvent::Quit)
    }

    pub(crate) fn post(&self, event: DisplayEvent<H>) -> Result<()> {
        self.events.send(event).map_err(|_| RelayError::DisplayGone)
    }

    pub(crate) fn lock(&self) -> MutexGuard<'_, Pool<H>> {
        self.pool.lock()
    }

    /// Put a frame back and wake one waiting producer.
    pub(crate) fn recycle(&self, pool: &mut Pool<H>, frame: Frame<H>) {
        debug_assert!(pool.free.len() < self.capacity);
        pool.free.push_back(frame);
        self.frame_consumed.notify_one();
    }

    /// Report the outcome of a consumer-side rebuild.
    pub(crate) fn finish_reconfigure(&self, pool: &mut Pool<H>, status: bool) {
        pool.reconfigure_status = Some(status);
        self.reconfigured.notify_all();
        self.frame_consumed.notify_all();
    }

    /// Refuse further producer calls and hand back the pooled frames for
    /// destruction.
    pub(crate) fn close(&self) -> Vec<Frame<H>> {
        let mut pool = self.pool.lock();
        pool.closed = true;
        let frames = pool.free.drain(..).collect();
        self.frame_consumed.notify_all();
        self.reconfigured.notify_all();
        frames
    }
}
