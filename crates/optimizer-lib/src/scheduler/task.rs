//! Task specifications and queued tasks

use crate::models::{TaskCost, TaskKind, TaskPriority};
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use tokio::time::Instant;

/// Boxed body of a task
pub type TaskJob = Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send + 'static>>;

/// A unit of work submitted to the scheduler
///
/// Without an explicit priority the task is classified by its [`TaskKind`].
pub struct TaskSpec {
    job: TaskJob,
    priority: Option<TaskPriority>,
    kind: TaskKind,
    cost: TaskCost,
    name: Option<String>,
}

impl TaskSpec {
    pub fn new<F>(job: F) -> Self
    where
        F: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        Self {
            job: Box::pin(job),
            priority: None,
            kind: TaskKind::default(),
            cost: TaskCost::default(),
            name: None,
        }
    }

    /// Set an explicit priority, overriding the kind-based default
    pub fn priority(mut self, priority: TaskPriority) -> Self {
        self.priority = Some(priority);
        self
    }

    pub fn kind(mut self, kind: TaskKind) -> Self {
        self.kind = kind;
        self
    }

    pub fn cost(mut self, cost: TaskCost) -> Self {
        self.cost = cost;
        self
    }

    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Priority this task will be queued under
    pub fn resolved_priority(&self) -> TaskPriority {
        self.priority.unwrap_or_else(|| self.kind.default_priority())
    }

    pub(crate) fn into_queued(self, id: u64, enqueued_at: Instant) -> QueuedTask {
        QueuedTask {
            id,
            priority: self.resolved_priority(),
            cost: self.cost,
            name: self.name,
            enqueued_at,
            job: self.job,
        }
    }
}

impl fmt::Debug for TaskSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskSpec")
            .field("priority", &self.priority)
            .field("kind", &self.kind)
            .field("cost", &self.cost)
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

/// A task waiting in one of the priority queues
pub(crate) struct QueuedTask {
    pub id: u64,
    pub priority: TaskPriority,
    pub cost: TaskCost,
    pub name: Option<String>,
    pub enqueued_at: Instant,
    pub job: TaskJob,
}
