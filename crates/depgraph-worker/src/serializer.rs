//! Variant selection for task serializers.

use crate::{BatchWorker, ImmediateWorker, Task, Worker, WorkerError};

/// Queue sizing for a [`TaskSerializer`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SerializerConfig {
    /// Bound on pending tasks before submission blocks.
    pub buffer_size: usize,
    /// Tasks per handoff; `<= 1` selects the immediate variant.
    pub batch_size: usize,
}

impl SerializerConfig {
    pub fn immediate(buffer_size: usize) -> Self {
        Self {
            buffer_size,
            batch_size: 1,
        }
    }

    pub fn batched(buffer_size: usize, batch_size: usize) -> Self {
        Self {
            buffer_size,
            batch_size,
        }
    }

    pub fn is_batched(&self) -> bool {
        self.batch_size > 1
    }
}

impl Default for SerializerConfig {
    fn default() -> Self {
        Self::immediate(1024)
    }
}

/// A task serializer of either variant.
pub enum TaskSerializer<S> {
    Immediate(ImmediateWorker<S>),
    Batched(BatchWorker<S>),
}

impl<S: Send + 'static> TaskSerializer<S> {
    pub fn new(state: S, config: SerializerConfig) -> Result<Self, WorkerError> {
        Self::with_name(state, config, crate::immediate::DEFAULT_THREAD_NAME)
    }

    pub fn with_name(state: S, config: SerializerConfig, name: &str) -> Result<Self, WorkerError> {
        if config.is_batched() {
            BatchWorker::with_name(state, config.buffer_size, config.batch_size, name)
                .map(TaskSerializer::Batched)
        } else {
            ImmediateWorker::with_name(state, config.buffer_size, name)
                .map(TaskSerializer::Immediate)
        }
    }
}

impl<S: Send + 'static> Worker<S> for TaskSerializer<S> {
    fn add_task(&mut self, task: Task<S>) -> Result<(), WorkerError> {
        match self {
            TaskSerializer::Immediate(w) => w.add_task(task),
            TaskSerializer::Batched(w) => w.add_task(task),
        }
    }

    fn flush(&mut self) -> Result<(), WorkerError> {
        match self {
            TaskSerializer::Immediate(w) => w.flush(),
            TaskSerializer::Batched(w) => w.flush(),
        }
    }

    fn close(&mut self) -> Result<S, WorkerError> {
        match self {
            TaskSerializer::Immediate(w) => w.close(),
            TaskSerializer::Batched(w) => w.close(),
        }
    }

    fn is_closed(&self) -> bool {
        match self {
            TaskSerializer::Immediate(w) => w.is_closed(),
            TaskSerializer::Batched(w) => w.is_closed(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_selects_variant() {
        let immediate = TaskSerializer::new((), SerializerConfig::immediate(4)).unwrap();
        assert!(matches!(immediate, TaskSerializer::Immediate(_)));

        let batched = TaskSerializer::new((), SerializerConfig::batched(4, 2)).unwrap();
        assert!(matches!(batched, TaskSerializer::Batched(_)));

        let degenerate = TaskSerializer::new((), SerializerConfig::batched(4, 1)).unwrap();
        assert!(matches!(degenerate, TaskSerializer::Immediate(_)));
    }

    #[test]
    fn test_call_roundtrip_on_both_variants() {
        for config in [SerializerConfig::immediate(2), SerializerConfig::batched(8, 4)] {
            let mut worker = TaskSerializer::new(String::new(), config).unwrap();
            worker
                .add_task(Box::new(|s: &mut String| s.push_str("ab")))
                .unwrap();
            let len = worker.call(|s| {
                s.push('c');
                s.len()
            });
            assert_eq!(len.unwrap(), 3);
            assert_eq!(worker.close().unwrap(), "abc");
        }
    }
}
