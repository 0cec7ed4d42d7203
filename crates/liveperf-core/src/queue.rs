//! The request queue between producers and the performance thread.
//!
//! An unbounded multi-producer channel. Producers never block; the consumer
//! only ever performs a non-blocking pop from the render loop. Actions from
//! one producer arrive in the order they were sent. No order is promised
//! between producers.

use crossbeam_channel::{unbounded, Receiver, Sender, TrySendError};

use crate::action::ControlAction;
use crate::engine::Engine;

/// Create a connected request queue.
pub fn request_queue<E: Engine>() -> (RequestSender<E>, RequestReceiver<E>) {
    let (tx, rx) = unbounded();
    (RequestSender { tx }, RequestReceiver { rx })
}

/// Producer side of the request queue. Cheap to clone.
pub struct RequestSender<E> {
    tx: Sender<ControlAction<E>>,
}

impl<E> Clone for RequestSender<E> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
        }
    }
}

impl<E: Engine> RequestSender<E> {
    /// Append an action.
    ///
    /// Returns false when the consumer is gone. The action is then cancelled
    /// so any waiter on its completion slot is released.
    pub fn enqueue(&self, action: ControlAction<E>) -> bool {
        match self.tx.try_send(action) {
            Ok(()) => true,
            Err(TrySendError::Disconnected(action)) | Err(TrySendError::Full(action)) => {
                log::debug!(
                    "[perf] {} dropped, performance thread has exited",
                    action.type_name()
                );
                action.cancel();
                false
            }
        }
    }

    /// Number of actions waiting to be consumed.
    pub fn len(&self) -> usize {
        self.tx.len()
    }

    /// Check if no actions are waiting.
    pub fn is_empty(&self) -> bool {
        self.tx.is_empty()
    }
}

/// Consumer side of the request queue, owned by the performance thread.
pub struct RequestReceiver<E> {
    rx: Receiver<ControlAction<E>>,
}

impl<E: Engine> RequestReceiver<E> {
    /// Pop one action without blocking.
    pub fn try_dequeue_one(&self) -> Option<ControlAction<E>> {
        self.rx.try_recv().ok()
    }

    /// Number of actions waiting.
    pub fn len(&self) -> usize {
        self.rx.len()
    }

    /// Check if no actions are waiting.
    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }

    /// Cancel every action still queued. Returns how many were discarded.
    pub fn discard_pending(&self) -> usize {
        let mut discarded = 0;
        while let Ok(action) = self.rx.try_recv() {
            log::debug!("[perf] discarding queued {}", action.type_name());
            action.cancel();
            discarded += 1;
        }
        discarded
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::PerfError;
    use crate::testing::RecordingEngine;
    use std::sync::{Arc, Mutex};
    use std::thread;

    type Action = ControlAction<RecordingEngine>;

    fn channel_name(action: Action) -> String {
        match action {
            ControlAction::SetChannel { name, .. } => name,
            other => panic!("unexpected action {:?}", other),
        }
    }

    #[test]
    fn test_single_producer_fifo() {
        let (tx, rx) = request_queue::<RecordingEngine>();
        for i in 0..100 {
            assert!(tx.enqueue(Action::set_channel(format!("ch{}", i), i as f64)));
        }
        assert_eq!(rx.len(), 100);
        for i in 0..100 {
            let action = rx.try_dequeue_one().expect("queued action");
            assert_eq!(channel_name(action), format!("ch{}", i));
        }
        assert!(rx.try_dequeue_one().is_none());
    }

    #[test]
    fn test_many_producers_deliver_each_action_once() {
        let (tx, rx) = request_queue::<RecordingEngine>();
        let producers: Vec<_> = (0..4)
            .map(|p| {
                let tx = tx.clone();
                thread::spawn(move || {
                    for i in 0..250 {
                        tx.enqueue(Action::set_channel(format!("{}:{}", p, i), 0.0));
                    }
                })
            })
            .collect();
        for producer in producers {
            producer.join().unwrap();
        }

        let mut last_seen = [-1_i64; 4];
        let mut total = 0;
        while let Some(action) = rx.try_dequeue_one() {
            let name = channel_name(action);
            let (p, i) = name.split_once(':').unwrap();
            let (p, i): (usize, i64) = (p.parse().unwrap(), i.parse().unwrap());
            // Per-producer order survives interleaving.
            assert!(i > last_seen[p]);
            last_seen[p] = i;
            total += 1;
        }
        assert_eq!(total, 1000);
    }

    #[test]
    fn test_enqueue_after_consumer_gone_cancels() {
        let (tx, rx) = request_queue::<RecordingEngine>();
        drop(rx);
        let (action, pending) = Action::evaluate("1");
        assert!(!tx.enqueue(action));
        assert_eq!(pending.wait(), Err(PerfError::Cancelled));
    }

    #[test]
    fn test_discard_pending_cancels_waiters() {
        let (tx, rx) = request_queue::<RecordingEngine>();
        let (action, pending) = Action::evaluate("1");
        tx.enqueue(action);
        let ran = Arc::new(Mutex::new(false));
        let flag = ran.clone();
        tx.enqueue(Action::custom(move |_| {
            *flag.lock().unwrap() = true;
            Ok(())
        }));
        assert_eq!(rx.discard_pending(), 2);
        assert!(rx.is_empty());
        assert_eq!(pending.wait(), Err(PerfError::Cancelled));
        assert!(!*ran.lock().unwrap());
    }
}
