use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::time::Duration;

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, TryRecvError};
use thiserror::Error;
use tracing::warn;

type Job = Box<dyn FnOnce() + Send>;

#[derive(Debug, Error)]
pub enum CallbackError {
    #[error("scheduled callback failed: {0:#}")]
    Failed(anyhow::Error),
    #[error("scheduled callback panicked: {0}")]
    Panicked(String),
    #[error("scheduled callback was dropped before it ran")]
    Cancelled,
}

/// Resolves once the scheduled action has run on the render thread.
#[derive(Debug)]
pub struct Completion<T> {
    receiver: Receiver<Result<T, CallbackError>>,
}

impl<T> Completion<T> {
    pub fn wait(self) -> Result<T, CallbackError> {
        self.receiver
            .recv()
            .unwrap_or(Err(CallbackError::Cancelled))
    }

    pub fn wait_timeout(&self, timeout: Duration) -> Option<Result<T, CallbackError>> {
        match self.receiver.recv_timeout(timeout) {
            Ok(result) => Some(result),
            Err(RecvTimeoutError::Timeout) => None,
            Err(RecvTimeoutError::Disconnected) => Some(Err(CallbackError::Cancelled)),
        }
    }

    pub fn try_result(&self) -> Option<Result<T, CallbackError>> {
        match self.receiver.try_recv() {
            Ok(result) => Some(result),
            Err(TryRecvError::Empty) => None,
            Err(TryRecvError::Disconnected) => Some(Err(CallbackError::Cancelled)),
        }
    }
}

/// FIFO of actions that any thread may schedule and the render thread runs.
#[derive(Debug)]
pub struct CallbackQueue {
    name: &'static str,
    sender: Sender<Job>,
    receiver: Receiver<Job>,
}

impl CallbackQueue {
    pub fn new(name: &'static str) -> Self {
        let (sender, receiver) = crossbeam_channel::unbounded();
        Self {
            name,
            sender,
            receiver,
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn schedule<T, F>(&self, action: F) -> Completion<T>
    where
        F: FnOnce() -> anyhow::Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let (result_tx, result_rx) = crossbeam_channel::bounded(1);
        let queue = self.name;
        let job: Job = Box::new(move || {
            let result = match panic::catch_unwind(AssertUnwindSafe(action)) {
                Ok(Ok(value)) => Ok(value),
                Ok(Err(error)) => {
                    warn!(queue, error = %format!("{error:#}"), "scheduled_callback_failed");
                    Err(CallbackError::Failed(error))
                }
                Err(payload) => {
                    let message = panic_message(payload.as_ref());
                    warn!(queue, panic = %message, "scheduled_callback_panicked");
                    Err(CallbackError::Panicked(message))
                }
            };
            // The scheduler may have dropped its completion; that is fine.
            let _ = result_tx.send(result);
        });

        // Both channel ends are owned by the queue, so this cannot disconnect.
        let _ = self.sender.send(job);
        Completion {
            receiver: result_rx,
        }
    }

    pub fn pending(&self) -> usize {
        self.receiver.len()
    }

    /// Runs the actions queued when the drain starts, in submission order.
    /// Actions scheduled while draining wait for the next drain.
    pub fn drain(&self) -> usize {
        let pending = self.receiver.len();
        let mut ran = 0;
        for job in self.receiver.try_iter().take(pending) {
            job();
            ran += 1;
        }
        ran
    }
}

/// The pre-render and post-render queues.
#[derive(Debug)]
pub struct CallbackQueues {
    pub before_render: CallbackQueue,
    pub after_render: CallbackQueue,
}

impl Default for CallbackQueues {
    fn default() -> Self {
        Self {
            before_render: CallbackQueue::new("before_render"),
            after_render: CallbackQueue::new("after_render"),
        }
    }
}

pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(text) = payload.downcast_ref::<&'static str>() {
        (*text).to_string()
    } else if let Some(text) = payload.downcast_ref::<String>() {
        text.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Barrier};
    use std::thread;

    use anyhow::anyhow;
    use parking_lot::Mutex;

    use super::*;

    #[test]
    fn drain_runs_actions_in_submission_order() {
        let queue = CallbackQueue::new("test");
        let log = Arc::new(Mutex::new(Vec::new()));

        let completions: Vec<_> = (0..5)
            .map(|index| {
                let log = Arc::clone(&log);
                queue.schedule(move || {
                    log.lock().push(index);
                    Ok(index * 10)
                })
            })
            .collect();

        assert_eq!(queue.drain(), 5);
        assert_eq!(*log.lock(), vec![0, 1, 2, 3, 4]);
        for (index, completion) in completions.into_iter().enumerate() {
            assert_eq!(completion.wait().expect("result"), index * 10);
        }
    }

    #[test]
    fn failure_is_attached_to_its_own_completion_and_drain_continues() {
        let queue = CallbackQueue::new("test");
        let first = queue.schedule(|| -> anyhow::Result<()> { Err(anyhow!("boom")) });
        let second = queue.schedule(|| Ok("ok"));

        assert_eq!(queue.drain(), 2);

        let error = first.wait().expect_err("first should fail");
        assert!(matches!(error, CallbackError::Failed(_)));
        assert!(error.to_string().contains("boom"));
        assert_eq!(second.wait().expect("second"), "ok");
    }

    #[test]
    fn panicking_action_is_isolated() {
        let queue = CallbackQueue::new("test");
        let first = queue.schedule(|| -> anyhow::Result<()> { panic!("kaboom") });
        let second = queue.schedule(|| Ok(7));

        queue.drain();

        match first.wait() {
            Err(CallbackError::Panicked(message)) => assert_eq!(message, "kaboom"),
            other => panic!("expected panic capture, got {other:?}"),
        }
        assert_eq!(second.wait().expect("second"), 7);
    }

    #[test]
    fn completion_is_pending_until_drained() {
        let queue = CallbackQueue::new("test");
        let completion = queue.schedule(|| Ok(1));

        assert!(completion.try_result().is_none());
        assert!(completion.wait_timeout(Duration::from_millis(1)).is_none());
        queue.drain();
        assert_eq!(completion.try_result().expect("ready").expect("ok"), 1);
    }

    #[test]
    fn actions_scheduled_during_drain_wait_for_next_drain() {
        let queue = Arc::new(CallbackQueue::new("test"));
        let inner_slot = Arc::new(Mutex::new(None));

        let queue_for_action = Arc::clone(&queue);
        let slot_for_action = Arc::clone(&inner_slot);
        let _outer = queue.schedule(move || {
            let inner = queue_for_action.schedule(|| Ok("inner"));
            *slot_for_action.lock() = Some(inner);
            Ok(())
        });

        assert_eq!(queue.drain(), 1);
        assert_eq!(queue.pending(), 1);
        assert_eq!(queue.drain(), 1);

        let inner = inner_slot.lock().take().expect("inner completion");
        assert_eq!(inner.wait().expect("inner"), "inner");
    }

    #[test]
    fn dropped_queue_cancels_outstanding_completions() {
        let queue = CallbackQueue::new("test");
        let completion = queue.schedule(|| Ok(()));
        drop(queue);

        assert!(matches!(completion.wait(), Err(CallbackError::Cancelled)));
    }

    #[test]
    fn concurrent_producers_preserve_per_producer_order() {
        let queue = Arc::new(CallbackQueue::new("test"));
        let log = Arc::new(Mutex::new(Vec::new()));
        let producers = 4;
        let per_producer = 50;
        let barrier = Arc::new(Barrier::new(producers));

        let handles: Vec<_> = (0..producers)
            .map(|producer| {
                let queue = Arc::clone(&queue);
                let log = Arc::clone(&log);
                let barrier = Arc::clone(&barrier);
                thread::spawn(move || {
                    barrier.wait();
                    for seq in 0..per_producer {
                        let log = Arc::clone(&log);
                        let _ = queue.schedule(move || {
                            log.lock().push((producer, seq));
                            Ok(())
                        });
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().expect("producer");
        }

        assert_eq!(queue.drain(), producers * per_producer);
        let log = log.lock();
        for producer in 0..producers {
            let seqs: Vec<_> = log
                .iter()
                .filter(|(p, _)| *p == producer)
                .map(|(_, seq)| *seq)
                .collect();
            assert_eq!(seqs, (0..per_producer).collect::<Vec<_>>());
        }
    }
}
