//! One-shot completion slots.
//!
//! A slot carries exactly one result from the performance thread back to a
//! producer. The fulfilling side is a [`Completion`], the waiting side a
//! [`Pending`]. If the completion is dropped without being fulfilled, for
//! example because the request was discarded on stop, the waiter observes
//! [`PerfError::Cancelled`] instead of blocking forever.

use std::time::Duration;

use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender, TryRecvError};

use crate::error::PerfError;

/// Create a connected completion/pending pair.
pub fn completion_slot<T>() -> (Completion<T>, Pending<T>) {
    let (tx, rx) = bounded(1);
    (Completion { tx }, Pending { rx })
}

/// Fulfilling side of a completion slot.
pub struct Completion<T> {
    tx: Sender<Result<T, PerfError>>,
}

impl<T> Completion<T> {
    /// Deliver the result.
    ///
    /// Never blocks: the slot has room for exactly one value. Returns false
    /// if the waiter has already gone away.
    pub fn complete(self, result: Result<T, PerfError>) -> bool {
        self.tx.try_send(result).is_ok()
    }

    /// Resolve the slot as cancelled.
    pub fn cancel(self) -> bool {
        self.complete(Err(PerfError::Cancelled))
    }
}

impl<T> std::fmt::Debug for Completion<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Completion").finish_non_exhaustive()
    }
}

/// Waiting side of a completion slot.
pub struct Pending<T> {
    rx: Receiver<Result<T, PerfError>>,
}

impl<T> Pending<T> {
    /// Block until the result arrives.
    pub fn wait(self) -> Result<T, PerfError> {
        self.rx.recv().unwrap_or(Err(PerfError::Cancelled))
    }

    /// Block for at most `timeout`.
    ///
    /// On [`PerfError::Timeout`] the slot stays valid and can be waited on
    /// again. Once a result has been returned the slot is spent, and further
    /// waits report [`PerfError::Cancelled`].
    pub fn wait_timeout(&self, timeout: Duration) -> Result<T, PerfError> {
        match self.rx.recv_timeout(timeout) {
            Ok(result) => result,
            Err(RecvTimeoutError::Timeout) => Err(PerfError::Timeout(timeout)),
            Err(RecvTimeoutError::Disconnected) => Err(PerfError::Cancelled),
        }
    }

    /// Take the result if it is already available.
    ///
    /// Consumes the slot when a result is returned. If nothing has arrived
    /// yet the slot is handed back in `Err` so it can be polled again.
    pub fn try_take(self) -> Result<Result<T, PerfError>, Self> {
        match self.rx.try_recv() {
            Ok(result) => Ok(result),
            Err(TryRecvError::Empty) => Err(self),
            Err(TryRecvError::Disconnected) => Ok(Err(PerfError::Cancelled)),
        }
    }
}

impl<T> std::fmt::Debug for Pending<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pending")
            .field("ready", &!self.rx.is_empty())
            .finish()
    }
}
