//! Task, result and handle types for the execution pool.

use crate::compress::{AbortSignal, CompressConfig};
use crate::error::ProcessError;
use crate::imaging::OutputFormat;
use crate::preview::PreviewConfig;
use crate::process::{ConversionConfig, TransformConfig};
use crate::types::ImageAsset;
use futures::channel::oneshot;
use serde::Serialize;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::{Duration, Instant};

/// Task identifier, unique among the queued and running tasks of a pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct TaskId(pub u64);

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// What a task does, with its operation-specific settings.
#[derive(Debug, Clone)]
pub enum TaskKind {
    Compress(CompressConfig),
    Convert {
        target: OutputFormat,
        config: ConversionConfig,
    },
    Transform(TransformConfig),
    Preview(PreviewConfig),
}

impl TaskKind {
    pub fn name(&self) -> &'static str {
        match self {
            TaskKind::Compress(_) => "compress",
            TaskKind::Convert { .. } => "convert",
            TaskKind::Transform(_) => "transform",
            TaskKind::Preview(_) => "preview",
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct TaskOptions {
    /// Overrides the pool's default deadline.
    pub timeout: Option<Duration>,
    /// Fired by the caller to cancel; also fired by the pool on timeout so
    /// cooperative work can stop early.
    pub abort: Option<AbortSignal>,
}

#[derive(Debug, Clone)]
pub struct ProcessingTask {
    pub id: TaskId,
    pub kind: TaskKind,
    pub asset: Arc<ImageAsset>,
    pub options: TaskOptions,
    pub submitted_at: Instant,
}

impl ProcessingTask {
    pub fn new(id: TaskId, kind: TaskKind, asset: impl Into<Arc<ImageAsset>>) -> Self {
        Self {
            id,
            kind,
            asset: asset.into(),
            options: TaskOptions::default(),
            submitted_at: Instant::now(),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.options.timeout = Some(timeout);
        self
    }

    pub fn with_abort(mut self, signal: AbortSignal) -> Self {
        self.options.abort = Some(signal);
        self
    }

    pub(crate) fn is_aborted(&self) -> bool {
        self.options
            .abort
            .as_ref()
            .is_some_and(AbortSignal::is_aborted)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TaskMetrics {
    /// Time between submission and the slot starting the task.
    pub queue_ms: u64,
    /// Time between the slot starting the task and resolution.
    pub run_ms: u64,
    pub input_bytes: u64,
    pub output_bytes: u64,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub format: Option<OutputFormat>,
    pub used_fallback: bool,
    pub slot: Option<usize>,
}

#[derive(Debug, Clone)]
pub struct TaskResult {
    pub id: TaskId,
    pub success: bool,
    pub output: Option<ImageAsset>,
    pub metrics: TaskMetrics,
    pub error: Option<ProcessError>,
}

impl TaskResult {
    pub fn succeeded(id: TaskId, output: ImageAsset, metrics: TaskMetrics) -> Self {
        Self {
            id,
            success: true,
            metrics: TaskMetrics {
                output_bytes: output.size(),
                ..metrics
            },
            output: Some(output),
            error: None,
        }
    }

    pub fn failed(id: TaskId, error: ProcessError) -> Self {
        Self {
            id,
            success: false,
            output: None,
            metrics: TaskMetrics::default(),
            error: Some(error),
        }
    }

    pub fn output_bytes(&self) -> Option<&[u8]> {
        self.output.as_ref().map(ImageAsset::bytes)
    }
}

/// Future resolving to a submitted task's [`TaskResult`].
///
/// Never fails: pool-level outcomes (timeout, crash, shutdown) arrive as a
/// failed result. A handle whose pool vanished resolves to
/// [`ProcessError::PoolTerminated`].
#[derive(Debug)]
pub struct TaskHandle {
    id: TaskId,
    rx: oneshot::Receiver<TaskResult>,
}

impl TaskHandle {
    pub(crate) fn new(id: TaskId, rx: oneshot::Receiver<TaskResult>) -> Self {
        Self { id, rx }
    }

    /// A handle that is already resolved.
    pub(crate) fn resolved(result: TaskResult) -> Self {
        let (tx, rx) = oneshot::channel();
        let id = result.id;
        let _ = tx.send(result);
        Self { id, rx }
    }

    pub fn id(&self) -> TaskId {
        self.id
    }

    /// Block the current thread until the result arrives.
    pub fn wait(self) -> TaskResult {
        futures::executor::block_on(self)
    }
}

impl Future for TaskHandle {
    type Output = TaskResult;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<TaskResult> {
        let id = self.id;
        match Pin::new(&mut self.rx).poll(cx) {
            Poll::Ready(Ok(result)) => Poll::Ready(result),
            Poll::Ready(Err(oneshot::Canceled)) => {
                Poll::Ready(TaskResult::failed(id, ProcessError::PoolTerminated))
            }
            Poll::Pending => Poll::Pending,
        }
    }
}
