//! Transaction (sequence) tracking, timeouts and statistics.
//!
//! A [`SequenceManager`] owns one slot per transaction ID in its range. Each
//! slot is armed with a timeout timer when the request is registered; the
//! timer, a reply, or a transport error moves the slot to a terminal state
//! exactly once.
//!
//! Outcomes are delivered to the request's own reply channel when it has
//! one, and to the client's event stream otherwise.
//!
//! The table is guarded by a mutex and the handle is cheap to clone, so the
//! client, its reader task and the timer tasks all share one manager.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, warn};

use crate::command::{Command, CommandCode};
use crate::constants::STATS_SAMPLE_SIZE;
use crate::error::{Failure, FinsError, Result};
use crate::event::ClientEvent;
use crate::reply::{Outcome, Tag};

/// Sending half of a per-request reply channel.
pub type ReplySender = oneshot::Sender<Outcome>;

/// What a slot needs to know about the request it tracks.
#[derive(Debug)]
pub struct PendingRequest {
    /// The command sent, kept for decoding the reply.
    pub command: Command,
    /// Timeout for this request, the manager default when `None`.
    pub timeout: Option<Duration>,
    /// Where to deliver the outcome.
    pub reply: Option<ReplySender>,
}

impl PendingRequest {
    /// Creates a request with the default timeout and no reply channel.
    pub fn new(command: Command) -> Self {
        Self {
            command,
            timeout: None,
            reply: None,
        }
    }
}

/// Read-only view of a slot.
#[derive(Debug, Clone)]
pub struct SequenceInfo {
    /// Transaction ID.
    pub sid: u8,
    /// Command of the request.
    pub command: Command,
    /// The caller's tag.
    pub tag: Option<Tag>,
    /// The frame was handed to the socket.
    pub sent: bool,
    /// A matching reply was processed.
    pub complete: bool,
    /// No reply arrived in time.
    pub timeout: bool,
    /// The transaction failed.
    pub error: bool,
    /// When the request was registered.
    pub create_time: Instant,
    /// When the frame was sent.
    pub sent_time: Option<Instant>,
    /// When the reply was processed.
    pub reply_time: Option<Instant>,
}

impl SequenceInfo {
    /// Still waiting for a reply.
    pub fn is_active(&self) -> bool {
        !self.complete && !self.timeout && !self.error
    }
}

struct Sequence {
    info: SequenceInfo,
    generation: u64,
    timer: Option<JoinHandle<()>>,
    reply: Option<ReplySender>,
}

impl Sequence {
    fn cancel_timer(&mut self) {
        if let Some(timer) = self.timer.take() {
            timer.abort();
        }
    }
}

/// What [`SequenceManager::done`] hands back for delivering a reply.
#[derive(Debug)]
pub struct Completion {
    /// The caller's tag.
    pub tag: Option<Tag>,
    /// Registration to reply.
    pub time_taken: Duration,
    /// Statistics including this reply.
    pub stats: StatsSnapshot,
    /// The request's reply channel, if it had one.
    pub reply: Option<ReplySender>,
}

/// Point-in-time copy of the statistics.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct StatsSnapshot {
    /// Replies processed.
    pub reply_count: u64,
    /// Transactions failed.
    pub error_count: u64,
    /// Transactions timed out.
    pub timeout_count: u64,
    /// Fastest reply, in milliseconds.
    pub min_reply_ms: Option<f64>,
    /// Slowest reply, in milliseconds.
    pub max_reply_ms: Option<f64>,
    /// Mean over the most recent replies, in milliseconds.
    pub average_reply_ms: f64,
    /// Replies during the last full second.
    pub msg_per_sec: u64,
    /// Time since the statistics were reset, in milliseconds.
    pub runtime_ms: u64,
}

fn millis(d: Duration) -> f64 {
    d.as_secs_f64() * 1000.0
}

struct Statistics {
    samples: VecDeque<Duration>,
    reply_count: u64,
    error_count: u64,
    timeout_count: u64,
    min: Option<Duration>,
    max: Option<Duration>,
    started: Instant,
    window_start: Instant,
    window_count: u64,
    last_window: u64,
}

impl Statistics {
    fn new() -> Self {
        let now = Instant::now();
        Self {
            samples: VecDeque::with_capacity(STATS_SAMPLE_SIZE),
            reply_count: 0,
            error_count: 0,
            timeout_count: 0,
            min: None,
            max: None,
            started: now,
            window_start: now,
            window_count: 0,
            last_window: 0,
        }
    }

    fn roll(&mut self, now: Instant) {
        let elapsed = now.saturating_duration_since(self.window_start);
        if elapsed < Duration::from_secs(1) {
            return;
        }
        self.last_window = if elapsed < Duration::from_secs(2) {
            self.window_count
        } else {
            0
        };
        self.window_count = 0;
        self.window_start += Duration::from_secs(elapsed.as_secs());
    }

    fn add_reply(&mut self, taken: Duration) {
        self.roll(Instant::now());
        self.reply_count += 1;
        self.window_count += 1;
        if self.samples.len() == STATS_SAMPLE_SIZE {
            self.samples.pop_front();
        }
        self.samples.push_back(taken);
        self.min = Some(self.min.map_or(taken, |m| m.min(taken)));
        self.max = Some(self.max.map_or(taken, |m| m.max(taken)));
    }

    fn snapshot(&mut self) -> StatsSnapshot {
        let now = Instant::now();
        self.roll(now);
        let total: Duration = self.samples.iter().sum();
        let average = if self.samples.is_empty() {
            0.0
        } else {
            millis(total) / self.samples.len() as f64
        };
        StatsSnapshot {
            reply_count: self.reply_count,
            error_count: self.error_count,
            timeout_count: self.timeout_count,
            min_reply_ms: self.min.map(millis),
            max_reply_ms: self.max.map(millis),
            average_reply_ms: average,
            msg_per_sec: self.last_window,
            runtime_ms: now.saturating_duration_since(self.started).as_millis() as u64,
        }
    }
}

struct Inner {
    min: u8,
    max: u8,
    default_timeout: Duration,
    slots: HashMap<u8, Sequence>,
    stats: Statistics,
    generation: u64,
    fallback: Option<mpsc::UnboundedSender<ClientEvent>>,
}

impl Inner {
    fn check_range(&self, sid: u8) -> Result<()> {
        if (self.min..=self.max).contains(&sid) {
            Ok(())
        } else {
            Err(FinsError::InvalidId {
                sid,
                min: self.min,
                max: self.max,
            })
        }
    }

    fn deliver(&self, reply: Option<ReplySender>, outcome: Outcome) {
        let outcome = match reply {
            Some(tx) => match tx.send(outcome) {
                Ok(()) => return,
                Err(unclaimed) => unclaimed,
            },
            None => outcome,
        };
        let event = match outcome {
            Ok(reply) => ClientEvent::Reply(reply),
            Err(failure) => ClientEvent::Error(failure),
        };
        match &self.fallback {
            Some(events) => {
                if let Err(mpsc::error::SendError(event)) = events.send(event) {
                    warn!(?event, "event receiver dropped, outcome discarded");
                }
            }
            None => error!(?event, "no receiver for transaction outcome"),
        }
    }
}

/// Shared transaction table.
///
/// # Example
///
/// ```
/// use std::time::Duration;
/// use omron_fins_client::{Command, PendingRequest, SequenceManager};
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() {
/// let manager = SequenceManager::new(1, 254, Duration::from_secs(2)).unwrap();
/// manager.add(1, PendingRequest::new(Command::Status), None).unwrap();
/// assert!(manager.is_active(1));
/// assert!(manager.add(1, PendingRequest::new(Command::Status), None).is_err());
/// assert_eq!(manager.free_space(), 253);
/// # }
/// ```
#[derive(Clone)]
pub struct SequenceManager {
    inner: Arc<Mutex<Inner>>,
}

impl std::fmt::Debug for SequenceManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.inner.lock();
        f.debug_struct("SequenceManager")
            .field("min", &inner.min)
            .field("max", &inner.max)
            .field("slots", &inner.slots.len())
            .finish()
    }
}

impl SequenceManager {
    /// Creates a manager for IDs `min..=max`.
    ///
    /// # Errors
    ///
    /// Returns `FinsError::InvalidParameter` if `min` is 0 or greater than `max`.
    pub fn new(min: u8, max: u8, default_timeout: Duration) -> Result<Self> {
        if min == 0 || min > max {
            return Err(FinsError::invalid_parameter(
                "sid_range",
                format!("{min}..={max} is not a valid SID range"),
            ));
        }
        Ok(Self {
            inner: Arc::new(Mutex::new(Inner {
                min,
                max,
                default_timeout,
                slots: HashMap::new(),
                stats: Statistics::new(),
                generation: 0,
                fallback: None,
            })),
        })
    }

    /// Sets the channel outcomes go to when a request has no reply channel.
    pub fn set_fallback(&self, events: mpsc::UnboundedSender<ClientEvent>) {
        self.inner.lock().fallback = Some(events);
    }

    /// Number of IDs managed.
    pub fn capacity(&self) -> usize {
        let inner = self.inner.lock();
        usize::from(inner.max - inner.min) + 1
    }

    /// Registers a request under `sid` and arms its timeout.
    ///
    /// An inactive slot (completed, timed out or failed) is reused.
    ///
    /// # Errors
    ///
    /// `InvalidId` when `sid` is outside the range, `DuplicateActiveId` when
    /// the slot still waits for a reply. The existing slot is left untouched
    /// and the duplicate is also delivered as a [`Failure`] to the request's
    /// reply channel, or to the event stream when it has none.
    pub fn add(&self, sid: u8, request: PendingRequest, tag: Option<Tag>) -> Result<()> {
        let mut inner = self.inner.lock();
        inner.check_range(sid)?;
        if let Some(existing) = inner.slots.get_mut(&sid) {
            if existing.info.is_active() {
                warn!(sid, "transaction ID still active");
                inner.deliver(
                    request.reply,
                    Err(Failure::new(FinsError::DuplicateActiveId { sid }, Some(sid), tag)),
                );
                return Err(FinsError::DuplicateActiveId { sid });
            }
            existing.cancel_timer();
        }

        inner.generation += 1;
        let generation = inner.generation;
        let timeout = request.timeout.unwrap_or(inner.default_timeout);
        let timer = arm_timer(Arc::downgrade(&self.inner), sid, generation, timeout);

        debug!(sid, command = %request.command.code(), ?timeout, "transaction registered");
        inner.slots.insert(
            sid,
            Sequence {
                info: SequenceInfo {
                    sid,
                    command: request.command,
                    tag,
                    sent: false,
                    complete: false,
                    timeout: false,
                    error: false,
                    create_time: Instant::now(),
                    sent_time: None,
                    reply_time: None,
                },
                generation,
                timer,
                reply: request.reply,
            },
        );
        Ok(())
    }

    /// Returns a copy of the slot for `sid`.
    pub fn get(&self, sid: u8) -> Option<SequenceInfo> {
        self.inner.lock().slots.get(&sid).map(|s| s.info.clone())
    }

    /// Command of the slot for `sid`.
    pub fn command_code(&self, sid: u8) -> Option<CommandCode> {
        self.inner
            .lock()
            .slots
            .get(&sid)
            .map(|s| s.info.command.code())
    }

    /// Returns whether `sid` is waiting for a reply.
    pub fn is_active(&self, sid: u8) -> bool {
        self.inner
            .lock()
            .slots
            .get(&sid)
            .is_some_and(|s| s.info.is_active())
    }

    /// Returns whether `sid` is inside the managed range.
    pub fn in_range(&self, sid: u8) -> bool {
        self.inner.lock().check_range(sid).is_ok()
    }

    /// Records that the frame for `sid` reached the socket.
    pub fn confirm_sent(&self, sid: u8) {
        if let Some(seq) = self.inner.lock().slots.get_mut(&sid) {
            seq.info.sent = true;
            seq.info.sent_time = Some(Instant::now());
        }
    }

    /// Marks `sid` complete, cancels its timer and records the reply time.
    ///
    /// Returns `None` if the slot is missing or no longer active.
    pub fn done(&self, sid: u8) -> Option<Completion> {
        let mut guard = self.inner.lock();
        let inner = &mut *guard;
        let seq = inner.slots.get_mut(&sid).filter(|s| s.info.is_active())?;
        seq.cancel_timer();
        let now = Instant::now();
        seq.info.complete = true;
        seq.info.reply_time = Some(now);
        let time_taken = now.saturating_duration_since(seq.info.create_time);
        let tag = seq.info.tag.take();
        let reply = seq.reply.take();
        inner.stats.add_reply(time_taken);
        debug!(sid, ?time_taken, "transaction complete");
        Some(Completion {
            tag,
            time_taken,
            stats: inner.stats.snapshot(),
            reply,
        })
    }

    /// Fails `sid`, cancelling its timer and delivering `error`.
    ///
    /// A slot that is missing or already terminal is left alone and the
    /// error goes to the event stream without a tag.
    pub fn set_error(&self, sid: u8, error: FinsError) {
        let mut guard = self.inner.lock();
        let inner = &mut *guard;
        let Some(seq) = inner.slots.get_mut(&sid).filter(|s| s.info.is_active()) else {
            inner.deliver(None, Err(Failure::new(error, Some(sid), None)));
            return;
        };
        seq.cancel_timer();
        seq.info.error = true;
        let tag = seq.info.tag.clone();
        let reply = seq.reply.take();
        inner.stats.error_count += 1;
        debug!(sid, %error, "transaction failed");
        inner.deliver(reply, Err(Failure::new(error, Some(sid), tag)));
    }

    /// Fails `sid` only while it still waits for a reply.
    ///
    /// Used for failures found after a reply arrived: if the timer or another
    /// reply finished the slot first, `error` is logged and dropped so the
    /// transaction keeps a single outcome. Returns whether it was delivered.
    pub fn fail_active(&self, sid: u8, error: FinsError) -> bool {
        let mut guard = self.inner.lock();
        let inner = &mut *guard;
        let Some(seq) = inner.slots.get_mut(&sid).filter(|s| s.info.is_active()) else {
            warn!(sid, %error, "transaction already finished, failure dropped");
            return false;
        };
        seq.cancel_timer();
        seq.info.error = true;
        let tag = seq.info.tag.clone();
        let reply = seq.reply.take();
        inner.stats.error_count += 1;
        debug!(sid, %error, "transaction failed");
        inner.deliver(reply, Err(Failure::new(error, Some(sid), tag)));
        true
    }

    /// Delivers an outcome to `reply`, or to the event stream.
    pub fn deliver(&self, reply: Option<ReplySender>, outcome: Outcome) {
        self.inner.lock().deliver(reply, outcome);
    }

    /// Frees the slot for `sid`.
    pub fn remove(&self, sid: u8) {
        if let Some(mut seq) = self.inner.lock().slots.remove(&sid) {
            seq.cancel_timer();
        }
    }

    /// Number of slots waiting for a reply.
    pub fn active_count(&self) -> usize {
        self.inner
            .lock()
            .slots
            .values()
            .filter(|s| s.info.is_active())
            .count()
    }

    /// Number of IDs that can take a new request.
    pub fn free_space(&self) -> usize {
        self.capacity() - self.active_count()
    }

    /// Current statistics.
    pub fn stats(&self) -> StatsSnapshot {
        self.inner.lock().stats.snapshot()
    }

    /// Resets the statistics.
    pub fn init(&self) {
        self.inner.lock().stats = Statistics::new();
    }

    /// Drops every slot and cancels every timer.
    ///
    /// Pending reply channels are closed without an outcome.
    pub fn close(&self) {
        let mut inner = self.inner.lock();
        for (_, mut seq) in inner.slots.drain() {
            seq.cancel_timer();
        }
    }

    fn expire(inner: &Mutex<Inner>, sid: u8, generation: u64) {
        let mut guard = inner.lock();
        let inner = &mut *guard;
        let Some(seq) = inner.slots.get_mut(&sid) else {
            return;
        };
        if seq.generation != generation || seq.info.complete || seq.info.error {
            return;
        }
        seq.timer = None;
        seq.info.timeout = true;
        let tag = seq.info.tag.clone();
        let reply = seq.reply.take();
        inner.stats.timeout_count += 1;
        debug!(sid, "transaction timed out");
        inner.deliver(reply, Err(Failure::new(FinsError::Timeout, Some(sid), tag)));
    }
}

fn arm_timer(
    inner: Weak<Mutex<Inner>>,
    sid: u8,
    generation: u64,
    timeout: Duration,
) -> Option<JoinHandle<()>> {
    let Ok(handle) = tokio::runtime::Handle::try_current() else {
        warn!(sid, "no tokio runtime, transaction has no timeout");
        return None;
    };
    Some(handle.spawn(async move {
        tokio::time::sleep(timeout).await;
        if let Some(inner) = inner.upgrade() {
            SequenceManager::expire(&inner, sid, generation);
        }
    }))
}
