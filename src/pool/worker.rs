//! Worker slots: background threads that run one task at a time.
//!
//! A slot owns a command channel and a thread. Tasks sent to it run strictly
//! in order. A panic inside the runner is caught, reported to the scheduler
//! as a crash, and ends the thread; the scheduler then drops the slot and
//! creates a replacement when work remains.

use super::scheduler::Event;
use super::task::{ProcessingTask, TaskKind, TaskMetrics, TaskResult};
use crate::compress::compress_image;
use crate::error::ProcessError;
use crate::imaging::{Capabilities, RasterBackend};
use crate::preview::render_preview;
use crate::process::{convert_format, process_image};
use std::any::Any;
use std::io;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::sync::mpsc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

pub type SlotId = usize;

/// Executes a task inside a worker slot.
///
/// Implementations may panic; the pool treats that as a crash of the slot.
pub trait TaskRunner: Send + Sync + 'static {
    fn run(&self, task: &ProcessingTask) -> TaskResult;
}

impl<F> TaskRunner for F
where
    F: Fn(&ProcessingTask) -> TaskResult + Send + Sync + 'static,
{
    fn run(&self, task: &ProcessingTask) -> TaskResult {
        self(task)
    }
}

/// Runs the engine's operations against a shared backend.
///
/// Capabilities are a snapshot taken by the orchestrator; slots never probe.
pub struct EngineRunner<B> {
    backend: Arc<B>,
    capabilities: Capabilities,
}

impl<B: RasterBackend + 'static> EngineRunner<B> {
    pub fn new(backend: Arc<B>, capabilities: Capabilities) -> Self {
        Self {
            backend,
            capabilities,
        }
    }
}

impl<B: RasterBackend + 'static> TaskRunner for EngineRunner<B> {
    fn run(&self, task: &ProcessingTask) -> TaskResult {
        let backend = &*self.backend;
        let caps = &self.capabilities;
        let asset = &*task.asset;
        let base = TaskMetrics {
            input_bytes: asset.size(),
            ..TaskMetrics::default()
        };

        let (output, error, metrics) = match &task.kind {
            TaskKind::Compress(config) => {
                let r = compress_image(backend, caps, asset, config, task.options.abort.as_ref());
                let metrics = TaskMetrics {
                    format: r.format,
                    ..base
                };
                (r.success.then_some(r.asset), r.error, metrics)
            }
            TaskKind::Convert { target, config } => {
                let r = convert_format(backend, caps, asset, *target, config);
                let metrics = TaskMetrics {
                    format: Some(r.actual_format),
                    used_fallback: r.used_fallback,
                    ..base
                };
                (r.success.then_some(r.asset), r.error, metrics)
            }
            TaskKind::Transform(config) => {
                let r = process_image(backend, caps, asset, config);
                let metrics = TaskMetrics {
                    format: r.format,
                    width: Some(r.final_dims.width),
                    height: Some(r.final_dims.height),
                    ..base
                };
                (r.success.then_some(r.asset), r.error, metrics)
            }
            TaskKind::Preview(config) => match render_preview(backend, caps, asset, config) {
                Ok(p) => {
                    let metrics = TaskMetrics {
                        format: Some(p.format),
                        width: Some(p.width),
                        height: Some(p.height),
                        ..base
                    };
                    let name = format!("{}-preview.{}", asset.stem(), p.format.extension());
                    let out = crate::types::ImageAsset::new(name, p.format.mime(), p.bytes);
                    (Some(out), None, metrics)
                }
                Err(e) => (None, Some(e), base),
            },
        };

        match (output, error) {
            (Some(out), None) => TaskResult::succeeded(task.id, out, metrics),
            (_, Some(e)) => TaskResult {
                metrics,
                ..TaskResult::failed(task.id, e)
            },
            (None, None) => TaskResult {
                metrics,
                ..TaskResult::failed(
                    task.id,
                    ProcessError::Processing("no output produced".into()),
                )
            },
        }
    }
}

/// Scheduler-side handle to a slot thread.
pub(crate) struct SlotHandle {
    pub id: SlotId,
    tx: mpsc::Sender<ProcessingTask>,
    thread: Option<JoinHandle<()>>,
}

impl SlotHandle {
    /// Hand a task to the slot. Returns it back when the thread is gone.
    pub fn send(&self, task: ProcessingTask) -> Result<(), ProcessingTask> {
        self.tx.send(task).map_err(|e| e.0)
    }

    /// Wait for a thread that has already announced it is exiting.
    pub fn join(mut self) {
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "worker panicked".to_string()
    }
}

/// Start a slot thread reporting to `events`.
pub(crate) fn spawn_slot(
    id: SlotId,
    runner: Arc<dyn TaskRunner>,
    events: mpsc::Sender<Event>,
) -> io::Result<SlotHandle> {
    let (tx, rx) = mpsc::channel::<ProcessingTask>();
    let thread = thread::Builder::new()
        .name(format!("photoprep-slot-{id}"))
        .spawn(move || {
            while let Ok(task) = rx.recv() {
                let task_id = task.id;
                // Cancelled while waiting behind earlier work
                if task.is_aborted() {
                    let event = Event::Finished {
                        slot: id,
                        result: TaskResult::failed(task_id, ProcessError::Aborted),
                        run_time: Duration::ZERO,
                    };
                    if events.send(event).is_err() {
                        return;
                    }
                    continue;
                }
                if events.send(Event::Started { slot: id, task: task_id }).is_err() {
                    return;
                }
                let started = Instant::now();
                let outcome = panic::catch_unwind(AssertUnwindSafe(|| runner.run(&task)));
                let event = match outcome {
                    Ok(result) => Event::Finished {
                        slot: id,
                        result,
                        run_time: started.elapsed(),
                    },
                    Err(payload) => {
                        let message = panic_message(payload.as_ref());
                        let _ = events.send(Event::Crashed {
                            slot: id,
                            task: task_id,
                            message,
                        });
                        return;
                    }
                };
                if events.send(event).is_err() {
                    return;
                }
            }
        })?;

    Ok(SlotHandle {
        id,
        tx,
        thread: Some(thread),
    })
}
