//! Registry of running invocations
//!
//! Every evaluation or shell command registers itself for its lifetime so it
//! can be listed and cancelled by index from another command.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use tokio_util::sync::CancellationToken;
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskInfo {
    /// 1-based, never reused within a registry
    pub index: u64,
    pub command: String,
    pub invoked_at: DateTime<Utc>,
}

#[derive(Debug)]
struct Entry {
    info: TaskInfo,
    token: CancellationToken,
}

#[derive(Debug, Default)]
struct Inner {
    counter: u64,
    tasks: Vec<Entry>,
}

#[derive(Debug, Clone, Default)]
pub struct TaskRegistry {
    inner: Arc<Mutex<Inner>>,
}

impl TaskRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register a running command; it stays listed until the guard drops
    pub fn submit(&self, command: impl Into<String>) -> TaskGuard {
        let token = CancellationToken::new();
        let info = {
            let mut inner = self.lock();
            inner.counter += 1;
            let info = TaskInfo {
                index: inner.counter,
                command: command.into(),
                invoked_at: Utc::now(),
            };
            inner.tasks.push(Entry {
                info: info.clone(),
                token: token.clone(),
            });
            info
        };
        debug!(index = info.index, command = %info.command, "task submitted");
        TaskGuard {
            registry: self.clone(),
            info,
            token,
        }
    }

    /// Running tasks, oldest first
    pub fn list(&self) -> Vec<TaskInfo> {
        self.lock().tasks.iter().map(|e| e.info.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.lock().tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().tasks.is_empty()
    }

    /// Cancel the task with `index`; returns it if it was running
    pub fn cancel(&self, index: u64) -> Option<TaskInfo> {
        let inner = self.lock();
        let entry = inner.tasks.iter().find(|e| e.info.index == index)?;
        entry.token.cancel();
        Some(entry.info.clone())
    }

    /// Cancel the most recently submitted task
    pub fn cancel_last(&self) -> Option<TaskInfo> {
        let inner = self.lock();
        let entry = inner.tasks.last()?;
        entry.token.cancel();
        Some(entry.info.clone())
    }

    /// Cancel everything; returns how many tasks were signalled
    pub fn cancel_all(&self) -> usize {
        let inner = self.lock();
        for entry in &inner.tasks {
            entry.token.cancel();
        }
        inner.tasks.len()
    }

    fn remove(&self, index: u64) {
        self.lock().tasks.retain(|e| e.info.index != index);
    }
}

/// Registration of one running command
#[derive(Debug)]
pub struct TaskGuard {
    registry: TaskRegistry,
    info: TaskInfo,
    token: CancellationToken,
}

impl TaskGuard {
    pub fn info(&self) -> &TaskInfo {
        &self.info
    }

    pub fn index(&self) -> u64 {
        self.info.index
    }

    /// Cancelled by `TaskRegistry::cancel*`
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }
}

impl Drop for TaskGuard {
    fn drop(&mut self) {
        self.registry.remove(self.info.index);
    }
}
