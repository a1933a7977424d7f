//! Order-preserving task serializers.
//!
//! A serializer owns a piece of state `S` on one dedicated thread and runs
//! submitted tasks against it strictly in submission order. Producers never
//! touch `S` directly, so no locking is needed around it.
//!
//! - [`ImmediateWorker`]: every task is handed off on its own
//! - [`BatchWorker`]: tasks are grouped into fixed-size batches before handoff
//! - [`TaskSerializer`]: either of the above, chosen from a [`SerializerConfig`]
//!
//! Value-returning operations use [`Worker::call`]: the task writes its result
//! into a single-use channel, the serializer is flushed, and the caller blocks
//! on the receive.
//!
//! # Example
//!
//! ```
//! use depgraph_worker::{SerializerConfig, TaskSerializer, Worker};
//!
//! let mut worker = TaskSerializer::new(Vec::<u32>::new(), SerializerConfig::batched(16, 4))?;
//! for i in 0..10 {
//!     worker.add_task(Box::new(move |v: &mut Vec<u32>| v.push(i)))?;
//! }
//! assert_eq!(worker.call(|v| v.len())?, 10);
//! let state = worker.close()?;
//! assert_eq!(state, (0..10).collect::<Vec<_>>());
//! # Ok::<(), depgraph_worker::WorkerError>(())
//! ```

pub mod batch;
pub mod error;
pub mod immediate;
pub mod serializer;

pub use batch::BatchWorker;
pub use error::WorkerError;
pub use immediate::ImmediateWorker;
pub use serializer::{SerializerConfig, TaskSerializer};

/// A unit of work run against the serializer's state.
pub type Task<S> = Box<dyn FnOnce(&mut S) + Send + 'static>;

/// Common contract of the serializer variants.
pub trait Worker<S> {
    /// Enqueue `task`. Blocks while the bounded queue is full.
    fn add_task(&mut self, task: Task<S>) -> Result<(), WorkerError>;

    /// Hand off any partially filled batch. Every task submitted before the
    /// call is enqueued (not necessarily executed) when this returns.
    fn flush(&mut self) -> Result<(), WorkerError>;

    /// Flush, stop accepting tasks, wait for the consumer to drain the queue,
    /// and return the state it owned.
    fn close(&mut self) -> Result<S, WorkerError>;

    fn is_closed(&self) -> bool;

    /// Run `f` against the state after every previously submitted task and
    /// block until its result is available.
    fn call<T, F>(&mut self, f: F) -> Result<T, WorkerError>
    where
        Self: Sized,
        T: Send + 'static,
        F: FnOnce(&mut S) -> T + Send + 'static,
    {
        let (tx, rx) = std::sync::mpsc::sync_channel(1);
        self.add_task(Box::new(move |state: &mut S| {
            // The caller is blocked on `rx` until this lands.
            let _ = tx.send(f(state));
        }))?;
        self.flush()?;
        rx.recv().map_err(|_| WorkerError::Disconnected)
    }
}
