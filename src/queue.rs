//! FIFO of pending work items with completion accounting.
//!
//! Items travel over a crossbeam channel so producers and consumers never
//! share a lock on the hot path. A separate counter tracks items that were
//! accepted but not yet acknowledged with [`Queue::task_done`]; [`Queue::join`]
//! waits for it to reach zero.

use super::{errors::SubmitError, job::WorkItem, model::Overflow};
use crossbeam::channel::{self, select, Receiver, SendTimeoutError, Sender, TrySendError};
use parking_lot::{Condvar, Mutex};
use std::time::{Duration, Instant};

/// How often a producer blocked on a full queue re-checks for shutdown.
const BLOCKED_SEND_RECHECK: Duration = Duration::from_millis(50);

pub enum Dequeued {
    Item(WorkItem),
    Empty,
    Closed,
}

#[derive(Default)]
struct Accounting {
    outstanding: usize,
    // Set once `discard_remaining` has swept the queue for shutdown.
    swept: bool,
}

pub struct Queue {
    sender: Sender<WorkItem>,
    receiver: Receiver<WorkItem>,
    // Never sent on. Dropping the sender wakes every consumer at once.
    wake_tx: Mutex<Option<Sender<()>>>,
    wake_rx: Receiver<()>,
    accounting: Mutex<Accounting>,
    settled: Condvar,
    capacity: Option<usize>,
    overflow: Overflow,
}

impl Queue {
    pub fn new(capacity: Option<usize>, overflow: Overflow) -> Self {
        let (sender, receiver) = match capacity {
            Some(cap) => channel::bounded(cap),
            None => channel::unbounded(),
        };
        let (wake_tx, wake_rx) = channel::bounded(0);
        Self {
            sender,
            receiver,
            wake_tx: Mutex::new(Some(wake_tx)),
            wake_rx,
            accounting: Mutex::new(Accounting::default()),
            settled: Condvar::new(),
            capacity,
            overflow,
        }
    }

    /// Appends `item` to the tail.
    ///
    /// Unbounded queues never block here. A full bounded queue either waits
    /// for room or fails with [`SubmitError::QueueFull`], depending on the
    /// overflow policy. An item that lands after the shutdown sweep is
    /// accepted and dropped at once, so it never keeps [`Queue::join`] waiting.
    pub fn enqueue(&self, item: WorkItem) -> Result<(), SubmitError> {
        // Counted before the send so a fast consumer cannot acknowledge first.
        self.accounting.lock().outstanding += 1;

        let result = match (self.capacity, self.overflow) {
            (None, _) => self.sender.send(item).map_err(|_| SubmitError::Stopped),
            (Some(capacity), Overflow::Reject) => match self.sender.try_send(item) {
                Ok(()) => Ok(()),
                Err(TrySendError::Full(_)) => Err(SubmitError::QueueFull { capacity }),
                Err(TrySendError::Disconnected(_)) => Err(SubmitError::Stopped),
            },
            (Some(_), Overflow::Block) => self.send_blocking(item),
        };

        if let Err(err) = result {
            self.settle(1);
            return Err(err);
        }

        // Ordered against `discard_remaining` by the accounting lock: either
        // the sweep saw this item or this check sees the sweep.
        if self.accounting.lock().swept {
            self.discard_remaining();
        }
        Ok(())
    }

    fn send_blocking(&self, mut item: WorkItem) -> Result<(), SubmitError> {
        loop {
            match self.sender.send_timeout(item, BLOCKED_SEND_RECHECK) {
                Ok(()) => return Ok(()),
                Err(SendTimeoutError::Timeout(back)) => {
                    if self.is_closed() {
                        return Err(SubmitError::Stopped);
                    }
                    item = back;
                }
                Err(SendTimeoutError::Disconnected(_)) => return Err(SubmitError::Stopped),
            }
        }
    }

    /// Removes the head item, waiting up to `timeout` for one to arrive.
    ///
    /// Queued items always win over the wake signal: [`Dequeued::Closed`] is
    /// returned only once [`Queue::close`] was called and nothing is left.
    /// A closed queue never waits out the timeout.
    pub fn dequeue(&self, timeout: Duration) -> Dequeued {
        if let Ok(item) = self.receiver.try_recv() {
            return Dequeued::Item(item);
        }
        // `select!` picks randomly among ready operations, so the wake arm
        // looks at the queue once more before reporting closed.
        select! {
            recv(self.receiver) -> msg => match msg {
                Ok(item) => Dequeued::Item(item),
                Err(_) => Dequeued::Closed,
            },
            recv(self.wake_rx) -> _ => match self.receiver.try_recv() {
                Ok(item) => Dequeued::Item(item),
                Err(_) => Dequeued::Closed,
            },
            default(timeout) => Dequeued::Empty,
        }
    }

    /// Acknowledges one dequeued item, whatever its outcome.
    #[inline]
    pub fn task_done(&self) {
        self.settle(1);
    }

    fn settle(&self, n: usize) {
        if n == 0 {
            return;
        }
        let mut accounting = self.accounting.lock();
        debug_assert!(accounting.outstanding >= n, "more acknowledgements than items");
        accounting.outstanding = accounting.outstanding.saturating_sub(n);
        if accounting.outstanding == 0 {
            self.settled.notify_all();
        }
    }

    /// Blocks until every accepted item has been acknowledged.
    pub fn join(&self) {
        let mut accounting = self.accounting.lock();
        while accounting.outstanding > 0 {
            self.settled.wait(&mut accounting);
        }
    }

    /// Like [`Queue::join`] but gives up after `timeout`. Returns whether the
    /// queue settled.
    pub fn join_timeout(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut accounting = self.accounting.lock();
        while accounting.outstanding > 0 {
            if self.settled.wait_until(&mut accounting, deadline).timed_out() {
                return accounting.outstanding == 0;
            }
        }
        true
    }

    /// Wakes every consumer blocked in [`Queue::dequeue`] and makes blocked
    /// producers give up.
    pub fn close(&self) {
        self.wake_tx.lock().take();
    }

    pub fn is_closed(&self) -> bool {
        self.wake_tx.lock().is_none()
    }

    /// Drops every item still waiting in the queue and acknowledges it.
    /// Items enqueued afterwards are dropped by [`Queue::enqueue`] itself.
    /// Returns how many were dropped.
    pub fn discard_remaining(&self) -> usize {
        self.accounting.lock().swept = true;
        let dropped = self.receiver.try_iter().count();
        self.settle(dropped);
        dropped
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.receiver.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.receiver.is_empty()
    }

    /// Accepted items not yet acknowledged, queued or in flight.
    pub fn outstanding(&self) -> usize {
        self.accounting.lock().outstanding
    }
}
