//! Execution pool: bounded background worker slots with a FIFO queue.
//!
//! ## Lifecycle of a slot
//!
//! ```text
//!  created ──► idle ──dispatch──► busy ──finish/timeout/abort──► idle
//!                                  │
//!                                  └──panic──► terminated (removed)
//! ```
//!
//! Slots are created lazily, only when a task is waiting and no idle slot
//! exists, up to [`PoolConfig::max_workers`]. A timeout never kills a slot:
//! the task resolves as [`ProcessError::Timeout`](crate::error::ProcessError)
//! and the slot is idle again, though its thread finishes the abandoned work
//! before starting anything new. Deadlines run from the moment a slot starts
//! a task, so waiting behind abandoned work never counts against the next
//! task, and below the slot limit a fresh slot is preferred over one still
//! busy with abandoned work. A panic ends the slot; queued work causes a
//! replacement to be created.
//!
//! ## Guarantees
//!
//! - [`ExecutionPool::submit_task`] never blocks.
//! - Every handle resolves exactly once, including on shutdown.
//! - Task ids are unique among queued and running tasks; a reused id
//!   resolves as `DuplicateTask`.
//! - No ordering across slots; tasks on one slot run in dispatch order.

mod scheduler;
pub mod task;
mod worker;

pub use scheduler::{ABORT_POLL_INTERVAL, PoolStats, SlotStatus, WorkerSlot};
pub use task::{
    ProcessingTask, TaskHandle, TaskId, TaskKind, TaskMetrics, TaskOptions, TaskResult,
};
pub use worker::{EngineRunner, SlotId, TaskRunner};

use crate::types::ImageAsset;
use futures::channel::oneshot;
use scheduler::{Event, Scheduler};
use serde::{Deserialize, Serialize};
use std::io;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc;
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// Upper bound for the automatic worker count.
pub const MAX_AUTO_WORKERS: usize = 8;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PoolConfig {
    /// Maximum worker slots. When absent, the available parallelism clamped
    /// to `1..=8`.
    pub max_workers: Option<usize>,
    /// Default per-task deadline in milliseconds.
    pub task_timeout_ms: u64,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_workers: None,
            task_timeout_ms: 30_000,
        }
    }
}

impl PoolConfig {
    pub fn effective_workers(&self) -> usize {
        match self.max_workers {
            Some(n) => n.max(1),
            None => thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1)
                .clamp(1, MAX_AUTO_WORKERS),
        }
    }

    pub fn task_timeout(&self) -> Duration {
        Duration::from_millis(self.task_timeout_ms)
    }
}

/// Front-end to the scheduler thread.
pub struct ExecutionPool {
    events: mpsc::Sender<Event>,
    scheduler: Mutex<Option<JoinHandle<()>>>,
    next_id: AtomicU64,
    final_stats: Mutex<Option<PoolStats>>,
}

impl ExecutionPool {
    pub fn new(config: &PoolConfig, runner: Arc<dyn TaskRunner>) -> io::Result<Self> {
        let (tx, rx) = mpsc::channel();
        let scheduler = Scheduler::new(
            config.effective_workers(),
            config.task_timeout(),
            runner,
            tx.clone(),
        );
        let thread = thread::Builder::new()
            .name("photoprep-scheduler".into())
            .spawn(move || scheduler.run(rx))?;

        tracing::debug!(
            max_workers = config.effective_workers(),
            timeout_ms = config.task_timeout_ms,
            "execution pool started"
        );
        Ok(Self {
            events: tx,
            scheduler: Mutex::new(Some(thread)),
            next_id: AtomicU64::new(1),
            final_stats: Mutex::new(None),
        })
    }

    /// Build a task with a fresh id.
    pub fn create_task(&self, kind: TaskKind, asset: impl Into<Arc<ImageAsset>>) -> ProcessingTask {
        let id = TaskId(self.next_id.fetch_add(1, Ordering::Relaxed));
        ProcessingTask::new(id, kind, asset)
    }

    /// Queue a task. Returns immediately; the handle resolves later.
    pub fn submit_task(&self, task: ProcessingTask) -> TaskHandle {
        let (responder, rx) = oneshot::channel();
        let handle = TaskHandle::new(task.id, rx);
        // On a terminated pool the responder is dropped with the event,
        // which resolves the handle as PoolTerminated
        let _ = self.events.send(Event::Submit { task, responder });
        handle
    }

    pub fn stats(&self) -> PoolStats {
        let (tx, rx) = mpsc::channel();
        if self.events.send(Event::Stats(tx)).is_ok()
            && let Ok(stats) = rx.recv()
        {
            return stats;
        }
        self.final_stats
            .lock()
            .ok()
            .and_then(|s| s.clone())
            .unwrap_or_else(|| PoolStats {
                terminated: true,
                ..PoolStats::default()
            })
    }

    pub fn is_terminated(&self) -> bool {
        self.stats().terminated
    }

    /// Reject all queued and in-flight tasks, drop every slot and stop the
    /// scheduler. Idempotent.
    pub fn shutdown(&self) {
        let Ok(mut guard) = self.scheduler.lock() else {
            return;
        };
        let Some(thread) = guard.take() else {
            return;
        };

        let (tx, rx) = mpsc::channel();
        if self.events.send(Event::Shutdown(tx)).is_ok()
            && let Ok(stats) = rx.recv()
            && let Ok(mut slot) = self.final_stats.lock()
        {
            *slot = Some(stats);
        }
        let _ = thread.join();
    }
}

impl Drop for ExecutionPool {
    fn drop(&mut self) {
        self.shutdown();
    }
}
