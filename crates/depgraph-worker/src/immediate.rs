//! Serializer that hands off every task individually.

use std::sync::mpsc::{sync_channel, Receiver, SyncSender};
use std::thread::JoinHandle;

use tracing::{debug, warn};

use crate::{Task, Worker, WorkerError};

/// Default consumer thread name.
pub const DEFAULT_THREAD_NAME: &str = "depgraph-worker";

/// Runs each task on the consumer thread as soon as it is dequeued.
///
/// The queue holds at most `capacity` pending tasks; `add_task` blocks while it
/// is full. A capacity of zero makes every submission a rendezvous with the
/// consumer.
pub struct ImmediateWorker<S> {
    sender: Option<SyncSender<Task<S>>>,
    handle: Option<JoinHandle<S>>,
    name: String,
}

impl<S: Send + 'static> ImmediateWorker<S> {
    pub fn new(state: S, capacity: usize) -> Result<Self, WorkerError> {
        Self::with_name(state, capacity, DEFAULT_THREAD_NAME)
    }

    pub fn with_name(state: S, capacity: usize, name: &str) -> Result<Self, WorkerError> {
        let (sender, receiver) = sync_channel::<Task<S>>(capacity);
        let handle = spawn_consumer(name, state, receiver, |state, task: Task<S>| task(state))?;
        debug!(thread = name, capacity, "started immediate serializer");
        Ok(Self {
            sender: Some(sender),
            handle: Some(handle),
            name: name.to_string(),
        })
    }
}

impl<S> Worker<S> for ImmediateWorker<S> {
    fn add_task(&mut self, task: Task<S>) -> Result<(), WorkerError> {
        let sender = self.sender.as_ref().ok_or(WorkerError::Closed)?;
        sender.send(task).map_err(|_| WorkerError::Disconnected)
    }

    fn flush(&mut self) -> Result<(), WorkerError> {
        // Tasks are enqueued as they are submitted.
        if self.sender.is_none() {
            return Err(WorkerError::Closed);
        }
        Ok(())
    }

    fn close(&mut self) -> Result<S, WorkerError> {
        let sender = self.sender.take().ok_or(WorkerError::AlreadyClosed)?;
        drop(sender);
        let handle = self.handle.take().ok_or(WorkerError::AlreadyClosed)?;
        let state = join_consumer(handle, &self.name)?;
        debug!(thread = %self.name, "closed immediate serializer");
        Ok(state)
    }

    fn is_closed(&self) -> bool {
        self.sender.is_none()
    }
}

/// Start a consumer thread that owns `state` and applies every message
/// received on `receiver` to it, returning the state once the channel closes.
pub(crate) fn spawn_consumer<S, M, F>(
    name: &str,
    state: S,
    receiver: Receiver<M>,
    mut run: F,
) -> Result<JoinHandle<S>, WorkerError>
where
    S: Send + 'static,
    M: Send + 'static,
    F: FnMut(&mut S, M) + Send + 'static,
{
    std::thread::Builder::new()
        .name(name.to_string())
        .spawn(move || {
            let mut state = state;
            for message in receiver {
                run(&mut state, message);
            }
            state
        })
        .map_err(|e| WorkerError::Spawn(e.to_string()))
}

pub(crate) fn join_consumer<S>(handle: JoinHandle<S>, name: &str) -> Result<S, WorkerError> {
    handle.join().map_err(|_| {
        warn!(thread = name, "serializer consumer panicked");
        WorkerError::Panicked
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    #[test]
    fn test_tasks_run_in_submission_order() {
        let mut worker = ImmediateWorker::new(Vec::new(), 4).unwrap();
        for i in 0..100u32 {
            worker.add_task(Box::new(move |v: &mut Vec<u32>| v.push(i))).unwrap();
        }
        let state = worker.close().unwrap();
        assert_eq!(state, (0..100).collect::<Vec<_>>());
    }

    #[test]
    fn test_call_sees_prior_tasks() {
        let mut worker = ImmediateWorker::new(0u64, 1).unwrap();
        worker.add_task(Box::new(|n: &mut u64| *n += 5)).unwrap();
        worker.add_task(Box::new(|n: &mut u64| *n *= 3)).unwrap();
        assert_eq!(worker.call(|n| *n).unwrap(), 15);
        worker.close().unwrap();
    }

    #[test]
    fn test_add_after_close_is_rejected() {
        let mut worker = ImmediateWorker::new((), 1).unwrap();
        assert!(!worker.is_closed());
        worker.close().unwrap();
        assert!(worker.is_closed());
        assert_eq!(
            worker.add_task(Box::new(|_: &mut ()| {})).unwrap_err(),
            WorkerError::Closed
        );
        assert_eq!(worker.close().unwrap_err(), WorkerError::AlreadyClosed);
    }

    #[test]
    fn test_panicking_task_poisons_worker() {
        let mut worker = ImmediateWorker::new(0u32, 0).unwrap();
        worker
            .add_task(Box::new(|_: &mut u32| panic!("task failure")))
            .unwrap();
        // The consumer is gone; a call can never be answered.
        let err = worker.call(|n| *n).unwrap_err();
        assert_eq!(err, WorkerError::Disconnected);
        assert_eq!(worker.close().unwrap_err(), WorkerError::Panicked);
    }

    #[test]
    fn test_close_drains_pending_tasks() {
        let counter = Arc::new(AtomicUsize::new(0));
        let mut worker = ImmediateWorker::new((), 64).unwrap();
        for _ in 0..50 {
            let counter = Arc::clone(&counter);
            worker
                .add_task(Box::new(move |_: &mut ()| {
                    std::thread::sleep(Duration::from_micros(50));
                    counter.fetch_add(1, Ordering::SeqCst);
                }))
                .unwrap();
        }
        worker.close().unwrap();
        assert_eq!(counter.load(Ordering::SeqCst), 50);
    }
}
