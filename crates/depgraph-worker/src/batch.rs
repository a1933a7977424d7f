//! Serializer that groups tasks into fixed-size batches before handoff.
//!
//! Grouping amortizes the channel synchronization over `batch_size` tasks,
//! which matters when tasks are tiny and frequent (one per traced access).

use std::sync::mpsc::{sync_channel, SyncSender};
use std::thread::JoinHandle;

use tracing::{debug, trace};

use crate::immediate::{join_consumer, spawn_consumer, DEFAULT_THREAD_NAME};
use crate::{Task, Worker, WorkerError};

/// Batches tasks; a batch is handed off when it reaches `batch_size` tasks or
/// on [`Worker::flush`].
///
/// The queue holds `ceil(buffer_size / batch_size)` batches, so at most about
/// `buffer_size` tasks are pending before `add_task` blocks.
pub struct BatchWorker<S> {
    sender: Option<SyncSender<Vec<Task<S>>>>,
    handle: Option<JoinHandle<S>>,
    batch: Vec<Task<S>>,
    batch_size: usize,
    name: String,
}

impl<S: Send + 'static> BatchWorker<S> {
    pub fn new(state: S, buffer_size: usize, batch_size: usize) -> Result<Self, WorkerError> {
        Self::with_name(state, buffer_size, batch_size, DEFAULT_THREAD_NAME)
    }

    pub fn with_name(
        state: S,
        buffer_size: usize,
        batch_size: usize,
        name: &str,
    ) -> Result<Self, WorkerError> {
        let batch_size = batch_size.max(1);
        let num_batches = buffer_size.div_ceil(batch_size);
        let (sender, receiver) = sync_channel::<Vec<Task<S>>>(num_batches);
        let handle = spawn_consumer(name, state, receiver, |state, batch: Vec<Task<S>>| {
            for task in batch {
                task(state);
            }
        })?;
        debug!(
            thread = name,
            buffer_size, batch_size, num_batches, "started batch serializer"
        );
        Ok(Self {
            sender: Some(sender),
            handle: Some(handle),
            batch: Vec::with_capacity(batch_size),
            batch_size,
            name: name.to_string(),
        })
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    /// Number of submitted tasks not yet handed off.
    pub fn pending(&self) -> usize {
        self.batch.len()
    }

    fn hand_off(&mut self) -> Result<(), WorkerError> {
        if self.batch.is_empty() {
            return Ok(());
        }
        let sender = self.sender.as_ref().ok_or(WorkerError::Closed)?;
        let batch = std::mem::replace(&mut self.batch, Vec::with_capacity(self.batch_size));
        trace!(thread = %self.name, tasks = batch.len(), "handing off batch");
        sender.send(batch).map_err(|_| WorkerError::Disconnected)
    }
}

impl<S> Worker<S> for BatchWorker<S>
where
    S: Send + 'static,
{
    fn add_task(&mut self, task: Task<S>) -> Result<(), WorkerError> {
        if self.sender.is_none() {
            return Err(WorkerError::Closed);
        }
        self.batch.push(task);
        if self.batch.len() >= self.batch_size {
            self.hand_off()?;
        }
        Ok(())
    }

    fn flush(&mut self) -> Result<(), WorkerError> {
        if self.sender.is_none() {
            return Err(WorkerError::Closed);
        }
        self.hand_off()
    }

    fn close(&mut self) -> Result<S, WorkerError> {
        if self.sender.is_none() {
            return Err(WorkerError::AlreadyClosed);
        }
        let flushed = self.hand_off();
        self.sender = None;
        let handle = self.handle.take().ok_or(WorkerError::AlreadyClosed)?;
        let state = join_consumer(handle, &self.name)?;
        flushed?;
        debug!(thread = %self.name, "closed batch serializer");
        Ok(state)
    }

    fn is_closed(&self) -> bool {
        self.sender.is_none()
    }
}
