//! The scheduler actor.
//!
//! One thread owns the queue and the slot table and reacts to [`Event`]s
//! from the pool front-end and from slot threads. No other thread touches
//! that state, so none of it is locked.
//!
//! ```text
//!  submit ──► Event::Submit ──►┌───────────┐──► slot 0 ─┐ Event::Started
//!  stats  ──► Event::Stats  ──►│ scheduler │──► slot 1 ─┤ Event::Finished
//!  shutdown ► Event::Shutdown ►└───────────┘◄───────────┘ Event::Crashed
//! ```
//!
//! A task's deadline starts when its slot reports `Started`, not at
//! dispatch: a slot still finishing abandoned work holds the next task in
//! its channel, and that wait is not the task's own run time.
//!
//! Between events the loop sleeps until the nearest task deadline, or polls
//! every [`ABORT_POLL_INTERVAL`] while any task carries an abort signal.

use super::task::{ProcessingTask, TaskId, TaskMetrics, TaskResult};
use super::worker::{SlotHandle, SlotId, TaskRunner, spawn_slot};
use crate::error::ProcessError;
use futures::channel::oneshot;
use serde::Serialize;
use std::collections::{BTreeMap, VecDeque};
use std::fmt;
use std::sync::Arc;
use std::sync::mpsc::{self, RecvTimeoutError};
use std::time::{Duration, Instant};

/// How often abort signals are checked while any task carries one.
pub const ABORT_POLL_INTERVAL: Duration = Duration::from_millis(20);

pub(crate) enum Event {
    Submit {
        task: ProcessingTask,
        responder: oneshot::Sender<TaskResult>,
    },
    Started {
        slot: SlotId,
        task: TaskId,
    },
    Finished {
        slot: SlotId,
        result: TaskResult,
        run_time: Duration,
    },
    Crashed {
        slot: SlotId,
        task: TaskId,
        message: String,
    },
    Stats(mpsc::Sender<PoolStats>),
    Shutdown(mpsc::Sender<PoolStats>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SlotStatus {
    Idle,
    Busy,
    Terminated,
}

impl fmt::Display for SlotStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            SlotStatus::Idle => "idle",
            SlotStatus::Busy => "busy",
            SlotStatus::Terminated => "terminated",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WorkerSlot {
    pub id: SlotId,
    pub status: SlotStatus,
    pub current_task: Option<TaskId>,
    pub tasks_run: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PoolStats {
    pub total_slots: usize,
    pub active_slots: usize,
    pub idle_slots: usize,
    pub queued_tasks: usize,
    pub completed_tasks: u64,
    /// Tasks that ran and failed, including timeouts and crashes.
    pub failed_tasks: u64,
    /// Tasks resolved without running: duplicate ids, queued aborts and
    /// work pending at shutdown.
    pub rejected_tasks: u64,
    pub timed_out_tasks: u64,
    pub crashed_slots: u64,
    pub slots_created: u64,
    /// Running mean over resolved tasks, dispatch to resolution.
    pub avg_duration_ms: f64,
    pub max_slots: usize,
    pub terminated: bool,
    pub slots: Vec<WorkerSlot>,
}

struct Pending {
    task: ProcessingTask,
    responder: oneshot::Sender<TaskResult>,
}

struct InFlight {
    pending: Pending,
    dispatched_at: Instant,
    timeout: Duration,
    /// Set when the slot reports it began the task.
    started_at: Option<Instant>,
}

impl InFlight {
    fn deadline(&self) -> Option<Instant> {
        self.started_at.map(|at| at + self.timeout)
    }
}

struct Slot {
    handle: SlotHandle,
    status: SlotStatus,
    current: Option<InFlight>,
    /// Tasks abandoned by timeout or abort that the thread is still running.
    stale_runs: usize,
    tasks_run: u64,
}

pub(crate) struct Scheduler {
    max_slots: usize,
    default_timeout: Duration,
    runner: Arc<dyn TaskRunner>,
    events: mpsc::Sender<Event>,
    queue: VecDeque<Pending>,
    slots: BTreeMap<SlotId, Slot>,
    next_slot: SlotId,
    completed: u64,
    failed: u64,
    rejected: u64,
    timed_out: u64,
    crashed: u64,
    slots_created: u64,
    resolved: u64,
    avg_duration_ms: f64,
    terminated: bool,
}

impl Scheduler {
    pub fn new(
        max_slots: usize,
        default_timeout: Duration,
        runner: Arc<dyn TaskRunner>,
        events: mpsc::Sender<Event>,
    ) -> Self {
        Self {
            max_slots: max_slots.max(1),
            default_timeout,
            runner,
            events,
            queue: VecDeque::new(),
            slots: BTreeMap::new(),
            next_slot: 0,
            completed: 0,
            failed: 0,
            rejected: 0,
            timed_out: 0,
            crashed: 0,
            slots_created: 0,
            resolved: 0,
            avg_duration_ms: 0.0,
            terminated: false,
        }
    }

    /// Process events until shutdown.
    pub fn run(mut self, rx: mpsc::Receiver<Event>) {
        tracing::debug!(max_slots = self.max_slots, "scheduler started");
        loop {
            let event = match self.next_wakeup() {
                Some(at) => match rx.recv_timeout(at.saturating_duration_since(Instant::now())) {
                    Ok(event) => Some(event),
                    Err(RecvTimeoutError::Timeout) => None,
                    Err(RecvTimeoutError::Disconnected) => break,
                },
                None => match rx.recv() {
                    Ok(event) => Some(event),
                    Err(_) => break,
                },
            };

            if let Some(event) = event {
                match event {
                    Event::Shutdown(reply) => {
                        self.shutdown();
                        let _ = reply.send(self.stats());
                        return;
                    }
                    other => self.handle(other),
                }
            }

            let now = Instant::now();
            self.sweep_aborted();
            self.expire_deadlines(now);
            self.pump();
        }
        self.shutdown();
    }

    fn handle(&mut self, event: Event) {
        match event {
            Event::Submit { task, responder } => self.submit(Pending { task, responder }),
            Event::Started { slot, task } => self.started(slot, task),
            Event::Finished {
                slot,
                result,
                run_time,
            } => self.finished(slot, result, run_time),
            Event::Crashed {
                slot,
                task,
                message,
            } => self.crashed(slot, task, message),
            Event::Stats(reply) => {
                let _ = reply.send(self.stats());
            }
            Event::Shutdown(_) => {}
        }
    }

    // ---------------------------------------------------------------------
    // Submission and dispatch
    // ---------------------------------------------------------------------

    fn is_known(&self, id: TaskId) -> bool {
        self.queue.iter().any(|p| p.task.id == id)
            || self
                .slots
                .values()
                .any(|s| s.current.as_ref().is_some_and(|f| f.pending.task.id == id))
    }

    fn submit(&mut self, pending: Pending) {
        let id = pending.task.id;
        if self.is_known(id) {
            tracing::warn!(task = %id, "duplicate task id rejected");
            let _ = pending
                .responder
                .send(TaskResult::failed(id, ProcessError::DuplicateTask(id)));
            self.rejected += 1;
            return;
        }
        tracing::debug!(task = %id, kind = pending.task.kind.name(), queued = self.queue.len() + 1, "task queued");
        self.queue.push_back(pending);
    }

    /// Pick the idle slot with the least abandoned work still running.
    fn idle_slot(&self) -> Option<SlotId> {
        self.slots
            .iter()
            .filter(|(_, s)| s.status == SlotStatus::Idle)
            .min_by_key(|(id, s)| (s.stale_runs, **id))
            .map(|(id, _)| *id)
    }

    fn spawn_slot(&mut self) -> Option<SlotId> {
        let id = self.next_slot;
        match spawn_slot(id, Arc::clone(&self.runner), self.events.clone()) {
            Ok(handle) => {
                self.next_slot += 1;
                self.slots_created += 1;
                self.slots.insert(
                    id,
                    Slot {
                        handle,
                        status: SlotStatus::Idle,
                        current: None,
                        stale_runs: 0,
                        tasks_run: 0,
                    },
                );
                tracing::debug!(slot = id, total = self.slots.len(), "slot created");
                Some(id)
            }
            Err(e) => {
                tracing::warn!(slot = id, error = %e, "failed to start slot thread");
                None
            }
        }
    }

    /// Assign queued tasks to idle slots, creating slots up to the maximum.
    ///
    /// An idle slot still running abandoned work is only used once the
    /// table is full; below the maximum a fresh slot is created instead.
    fn pump(&mut self) {
        while !self.queue.is_empty() {
            let idle = self.idle_slot();
            let clean = idle
                .and_then(|id| self.slots.get(&id))
                .is_some_and(|s| s.stale_runs == 0);
            let slot_id = if !clean && self.slots.len() < self.max_slots {
                match self.spawn_slot().or(idle) {
                    Some(id) => id,
                    None => return,
                }
            } else {
                match idle {
                    Some(id) => id,
                    None => return,
                }
            };
            let Some(pending) = self.queue.pop_front() else {
                return;
            };
            self.dispatch(slot_id, pending);
        }
    }

    fn dispatch(&mut self, slot_id: SlotId, pending: Pending) {
        let Some(slot) = self.slots.get_mut(&slot_id) else {
            self.queue.push_front(pending);
            return;
        };

        let id = pending.task.id;
        if let Err(task) = slot.handle.send(pending.task.clone()) {
            // Thread already gone; its crash event is on the way
            tracing::debug!(slot = slot_id, task = %task.id, "slot unreachable, requeueing");
            self.queue.push_front(pending);
            self.slots.remove(&slot_id);
            return;
        }

        let timeout = pending.task.options.timeout.unwrap_or(self.default_timeout);
        tracing::debug!(slot = slot_id, task = %id, stale_runs = slot.stale_runs, "dispatched");
        slot.status = SlotStatus::Busy;
        slot.tasks_run += 1;
        slot.current = Some(InFlight {
            pending,
            dispatched_at: Instant::now(),
            timeout,
            started_at: None,
        });
    }

    /// Start the deadline of the task a slot just began.
    fn started(&mut self, slot_id: SlotId, task: TaskId) {
        let Some(flight) = self
            .slots
            .get_mut(&slot_id)
            .and_then(|s| s.current.as_mut())
            .filter(|f| f.pending.task.id == task)
        else {
            return;
        };
        let now = Instant::now();
        flight.started_at = Some(now);
        tracing::trace!(
            slot = slot_id,
            task = %task,
            waited_ms = now.saturating_duration_since(flight.dispatched_at).as_millis() as u64,
            timeout_ms = flight.timeout.as_millis() as u64,
            "task started"
        );
    }

    // ---------------------------------------------------------------------
    // Resolution
    // ---------------------------------------------------------------------

    fn record(&mut self, success: bool, duration: Duration) {
        if success {
            self.completed += 1;
        } else {
            self.failed += 1;
        }
        self.resolved += 1;
        let ms = duration.as_secs_f64() * 1000.0;
        self.avg_duration_ms += (ms - self.avg_duration_ms) / self.resolved as f64;
    }

    /// Send `result` for an in-flight task, filling in pool-side metrics.
    fn resolve(&mut self, flight: InFlight, slot: SlotId, mut result: TaskResult) {
        let began = flight.started_at.unwrap_or(flight.dispatched_at);
        let run_time = Instant::now().saturating_duration_since(began);
        result.metrics = TaskMetrics {
            queue_ms: began
                .saturating_duration_since(flight.pending.task.submitted_at)
                .as_millis() as u64,
            run_ms: run_time.as_millis() as u64,
            slot: Some(slot),
            ..result.metrics
        };
        self.record(result.success, run_time);
        let _ = flight.pending.responder.send(result);
    }

    fn finished(&mut self, slot_id: SlotId, result: TaskResult, run_time: Duration) {
        let Some(slot) = self.slots.get_mut(&slot_id) else {
            return;
        };
        let matches = slot
            .current
            .as_ref()
            .is_some_and(|f| f.pending.task.id == result.id);
        if !matches {
            // Completion of work that already timed out or was aborted
            slot.stale_runs = slot.stale_runs.saturating_sub(1);
            tracing::trace!(slot = slot_id, task = %result.id, "ignoring stale completion");
            return;
        }

        let Some(flight) = slot.current.take() else {
            return;
        };
        slot.status = SlotStatus::Idle;
        tracing::debug!(
            slot = slot_id,
            task = %result.id,
            success = result.success,
            run_ms = run_time.as_millis() as u64,
            "task finished"
        );
        self.resolve(flight, slot_id, result);
    }

    fn crashed(&mut self, slot_id: SlotId, task: TaskId, message: String) {
        let Some(mut slot) = self.slots.remove(&slot_id) else {
            return;
        };
        slot.status = SlotStatus::Terminated;
        self.crashed += 1;
        tracing::warn!(slot = slot_id, task = %task, status = %slot.status, error = %message, "slot crashed");

        if let Some(flight) = slot.current.take() {
            if flight.pending.task.id == task {
                let id = flight.pending.task.id;
                self.resolve(
                    flight,
                    slot_id,
                    TaskResult::failed(id, ProcessError::ContextTerminated(message)),
                );
            } else {
                // Dispatched behind the crashed task but never started
                self.queue.push_front(flight.pending);
            }
        }
        slot.handle.join();
    }

    /// Fail in-flight tasks whose deadline has passed. The slot stays.
    fn expire_deadlines(&mut self, now: Instant) {
        let expired: Vec<SlotId> = self
            .slots
            .iter()
            .filter(|(_, s)| {
                s.current
                    .as_ref()
                    .and_then(InFlight::deadline)
                    .is_some_and(|d| d <= now)
            })
            .map(|(id, _)| *id)
            .collect();

        for slot_id in expired {
            let Some(slot) = self.slots.get_mut(&slot_id) else {
                continue;
            };
            let Some(flight) = slot.current.take() else {
                continue;
            };
            slot.status = SlotStatus::Idle;
            slot.stale_runs += 1;

            let task = &flight.pending.task;
            if let Some(signal) = &task.options.abort {
                signal.abort();
            }
            let timeout = flight.timeout;
            let id = task.id;
            tracing::warn!(slot = slot_id, task = %id, timeout_ms = timeout.as_millis() as u64, "task timed out");
            self.timed_out += 1;
            self.resolve(
                flight,
                slot_id,
                TaskResult::failed(id, ProcessError::Timeout(timeout)),
            );
        }
    }

    /// Resolve aborted tasks early, queued or in flight.
    fn sweep_aborted(&mut self) {
        let mut kept = VecDeque::with_capacity(self.queue.len());
        for pending in self.queue.drain(..) {
            if pending.task.is_aborted() {
                tracing::debug!(task = %pending.task.id, "queued task aborted");
                let id = pending.task.id;
                let _ = pending
                    .responder
                    .send(TaskResult::failed(id, ProcessError::Aborted));
                self.rejected += 1;
            } else {
                kept.push_back(pending);
            }
        }
        self.queue = kept;

        let aborted: Vec<SlotId> = self
            .slots
            .iter()
            .filter(|(_, s)| s.current.as_ref().is_some_and(|f| f.pending.task.is_aborted()))
            .map(|(id, _)| *id)
            .collect();
        for slot_id in aborted {
            let Some(slot) = self.slots.get_mut(&slot_id) else {
                continue;
            };
            let Some(flight) = slot.current.take() else {
                continue;
            };
            slot.status = SlotStatus::Idle;
            slot.stale_runs += 1;
            let id = flight.pending.task.id;
            tracing::debug!(slot = slot_id, task = %id, "in-flight task aborted");
            self.resolve(flight, slot_id, TaskResult::failed(id, ProcessError::Aborted));
        }
    }

    fn next_wakeup(&self) -> Option<Instant> {
        let deadline = self
            .slots
            .values()
            .filter_map(|s| s.current.as_ref().and_then(InFlight::deadline))
            .min();

        let watching_abort = self
            .queue
            .iter()
            .map(|p| &p.task)
            .chain(
                self.slots
                    .values()
                    .filter_map(|s| s.current.as_ref().map(|f| &f.pending.task)),
            )
            .any(|t| t.options.abort.is_some());

        let poll = watching_abort.then(|| Instant::now() + ABORT_POLL_INTERVAL);
        match (deadline, poll) {
            (Some(d), Some(p)) => Some(d.min(p)),
            (d, p) => d.or(p),
        }
    }

    // ---------------------------------------------------------------------
    // Shutdown and stats
    // ---------------------------------------------------------------------

    /// Reject everything and drop every slot.
    fn shutdown(&mut self) {
        let queued = self.queue.len();
        for pending in self.queue.drain(..) {
            let id = pending.task.id;
            let _ = pending
                .responder
                .send(TaskResult::failed(id, ProcessError::PoolTerminated));
        }
        self.rejected += queued as u64;

        let mut in_flight = 0;
        for (_, mut slot) in std::mem::take(&mut self.slots) {
            slot.status = SlotStatus::Terminated;
            if let Some(flight) = slot.current.take() {
                in_flight += 1;
                let id = flight.pending.task.id;
                let _ = flight
                    .pending
                    .responder
                    .send(TaskResult::failed(id, ProcessError::PoolTerminated));
                self.rejected += 1;
            }
            // Dropping the handle closes the channel; the thread exits after
            // whatever it is running now.
        }
        self.terminated = true;
        tracing::info!(queued, in_flight, "execution pool shut down");
    }

    fn stats(&self) -> PoolStats {
        let slots: Vec<WorkerSlot> = self
            .slots
            .iter()
            .map(|(id, s)| WorkerSlot {
                id: *id,
                status: s.status,
                current_task: s.current.as_ref().map(|f| f.pending.task.id),
                tasks_run: s.tasks_run,
            })
            .collect();
        let active = slots.iter().filter(|s| s.status == SlotStatus::Busy).count();

        PoolStats {
            total_slots: slots.len(),
            active_slots: active,
            idle_slots: slots.len() - active,
            queued_tasks: self.queue.len(),
            completed_tasks: self.completed,
            failed_tasks: self.failed,
            rejected_tasks: self.rejected,
            timed_out_tasks: self.timed_out,
            crashed_slots: self.crashed,
            slots_created: self.slots_created,
            avg_duration_ms: self.avg_duration_ms,
            max_slots: self.max_slots,
            terminated: self.terminated,
            slots,
        }
    }
}
