//! The engine facade.
//!
//! [`Engine`] owns everything a caller would otherwise wire up by hand: the
//! raster backend, the capability cache, the preview generator and the
//! execution pool. Synchronous operations run on the calling thread; tasks
//! submitted through [`Engine::submit_task`] run on pool slots.
//!
//! The pool is created on first use so a caller that only validates or
//! previews never starts a thread.

use crate::compress::{AbortSignal, CompressResult, compress_image};
use crate::config::{ConfigError, EngineConfig};
use crate::error::ProcessError;
use crate::imaging::{Capabilities, CapabilityDetector, OutputFormat, RasterBackend, RustBackend};
use crate::pool::{
    EngineRunner, ExecutionPool, PoolStats, ProcessingTask, TaskHandle, TaskKind, TaskResult,
};
use crate::preview::{CacheStats, Preview, PreviewGenerator};
use crate::process::{ConvertResult, ProcessResult, TransformConfig, convert_format, process_image};
use crate::types::ImageAsset;
use crate::validate::{ValidationReport, Validator};
use std::sync::{Arc, Mutex, OnceLock};

pub struct Engine<B: RasterBackend + 'static = RustBackend> {
    backend: Arc<B>,
    config: EngineConfig,
    detector: CapabilityDetector,
    validator: Validator,
    previews: Mutex<PreviewGenerator>,
    pool: OnceLock<ExecutionPool>,
}

impl Engine<RustBackend> {
    /// Engine over the pure-Rust backend with stock defaults.
    pub fn with_defaults() -> Self {
        Self {
            backend: Arc::new(RustBackend::new()),
            config: EngineConfig::default(),
            detector: CapabilityDetector::new(),
            validator: Validator::default(),
            previews: Mutex::new(PreviewGenerator::default()),
            pool: OnceLock::new(),
        }
    }
}

impl<B: RasterBackend + 'static> Engine<B> {
    /// Build an engine, rejecting invalid configuration up front.
    pub fn new(backend: B, config: EngineConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            backend: Arc::new(backend),
            validator: Validator::new(config.validation.clone()),
            previews: Mutex::new(PreviewGenerator::new(&config.preview_cache)),
            detector: CapabilityDetector::new(),
            pool: OnceLock::new(),
            config,
        })
    }

    /// Replace the validator, e.g. to register custom checks.
    pub fn with_validator(mut self, validator: Validator) -> Self {
        self.validator = validator;
        self
    }

    /// Skip probing and use a fixed capability set.
    pub fn with_capabilities(mut self, capabilities: Capabilities) -> Self {
        self.detector = CapabilityDetector::with_capabilities(capabilities);
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// Probed once, then cached.
    pub fn capabilities(&self) -> Capabilities {
        self.detector.detect(&*self.backend)
    }

    pub fn validate(&self, asset: &ImageAsset) -> ValidationReport {
        self.validator.validate(&*self.backend, asset)
    }

    pub fn compress(&self, asset: &ImageAsset, abort: Option<&AbortSignal>) -> CompressResult {
        compress_image(
            &*self.backend,
            &self.capabilities(),
            asset,
            &self.config.compression,
            abort,
        )
    }

    pub fn convert(&self, asset: &ImageAsset, target: OutputFormat) -> ConvertResult {
        convert_format(
            &*self.backend,
            &self.capabilities(),
            asset,
            target,
            &self.config.conversion,
        )
    }

    pub fn process(&self, asset: &ImageAsset, transform: &TransformConfig) -> ProcessResult {
        process_image(&*self.backend, &self.capabilities(), asset, transform)
    }

    /// Cached preview using the configured preview settings.
    pub fn generate_preview(&self, asset: &ImageAsset) -> Result<Preview, ProcessError> {
        let caps = self.capabilities();
        let mut previews = self
            .previews
            .lock()
            .map_err(|_| ProcessError::Processing("preview cache poisoned".into()))?;
        previews.generate(&*self.backend, &caps, asset, &self.config.preview)
    }

    pub fn preview_cache_stats(&self) -> CacheStats {
        self.previews
            .lock()
            .map(|p| p.cache().stats())
            .unwrap_or_default()
    }

    pub fn clear_preview_cache(&self) {
        if let Ok(mut previews) = self.previews.lock() {
            previews.cache_mut().clear();
        }
    }

    fn pool(&self) -> Result<&ExecutionPool, ProcessError> {
        if let Some(pool) = self.pool.get() {
            return Ok(pool);
        }
        let runner = EngineRunner::new(Arc::clone(&self.backend), self.capabilities());
        let pool = ExecutionPool::new(&self.config.pool, Arc::new(runner))
            .map_err(|e| ProcessError::Processing(format!("failed to start pool: {e}")))?;
        // A concurrent caller may have won the race; its pool is kept and
        // ours shuts down on drop
        Ok(self.pool.get_or_init(|| pool))
    }

    /// Build a task with a fresh id for [`submit_task`](Self::submit_task).
    pub fn create_task(
        &self,
        kind: TaskKind,
        asset: impl Into<Arc<ImageAsset>>,
    ) -> Result<ProcessingTask, ProcessError> {
        Ok(self.pool()?.create_task(kind, asset))
    }

    /// Queue a task on the pool. Failures arrive through the handle.
    pub fn submit_task(&self, task: ProcessingTask) -> TaskHandle {
        match self.pool() {
            Ok(pool) => pool.submit_task(task),
            Err(e) => {
                tracing::warn!(task = %task.id, error = %e, "pool unavailable");
                TaskHandle::resolved(TaskResult::failed(task.id, e))
            }
        }
    }

    /// Stats of the pool; defaults when no task was ever submitted.
    pub fn pool_stats(&self) -> PoolStats {
        match self.pool.get() {
            Some(pool) => pool.stats(),
            None => PoolStats {
                max_slots: self.config.pool.effective_workers(),
                ..PoolStats::default()
            },
        }
    }

    pub fn shutdown_pool(&self) {
        if let Some(pool) = self.pool.get() {
            pool.shutdown();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::imaging::backend::tests::MockBackend;
    use crate::preview::PreviewConfig;
    use crate::test_helpers::*;
    use crate::validate::{ImageMetadata, IssueCode, ValidationIssue};

    fn engine() -> Engine {
        Engine::with_defaults().with_capabilities(Capabilities::baseline())
    }

    #[test]
    fn new_rejects_invalid_config() {
        let mut config = EngineConfig::default();
        config.pool.task_timeout_ms = 0;
        assert!(Engine::new(RustBackend::new(), config).is_err());
    }

    #[test]
    fn fixed_capabilities_skip_probe() {
        let backend = MockBackend::new();
        let engine = Engine::new(backend, EngineConfig::default())
            .unwrap()
            .with_capabilities(Capabilities::baseline());
        assert_eq!(engine.capabilities(), Capabilities::baseline());
        assert!(engine.backend().get_operations().is_empty());
    }

    #[test]
    fn validate_uses_custom_validator() {
        let validator = Validator::default().with_validator(
            |asset: &ImageAsset, _: Option<&ImageMetadata>| {
                asset.name().starts_with("tmp").then(|| {
                    ValidationIssue::new(IssueCode::Custom, "temporary file", "Rename the file")
                })
            },
        );
        let engine = engine().with_validator(validator);
        let report = engine.validate(&noisy_png_asset("tmp.png", 64, 64));
        assert!(!report.valid);
        assert!(report.has_error(IssueCode::Custom));
    }

    #[test]
    fn preview_second_call_hits_cache() {
        let engine = engine();
        let asset = jpeg_asset("cat.jpg", 400, 200);
        let first = engine.generate_preview(&asset).unwrap();
        let second = engine.generate_preview(&asset).unwrap();
        assert!(!first.cache_hit);
        assert!(second.cache_hit);
        assert_eq!(first.bytes, second.bytes);
        assert_eq!(engine.preview_cache_stats().hits, 1);

        engine.clear_preview_cache();
        assert!(!engine.generate_preview(&asset).unwrap().cache_hit);
    }

    #[test]
    fn pool_is_lazy() {
        let engine = engine();
        let stats = engine.pool_stats();
        assert_eq!(stats.slots_created, 0);
        assert!(!stats.terminated);
    }

    #[test]
    fn submitted_task_runs_on_pool() {
        let engine = engine();
        let task = engine
            .create_task(
                TaskKind::Preview(PreviewConfig::default()),
                jpeg_asset("dog.jpg", 200, 200),
            )
            .unwrap();
        let result = engine.submit_task(task).wait();
        assert!(result.success, "{:?}", result.error);
        assert_eq!(result.metrics.width, Some(100));

        engine.shutdown_pool();
        let stats = engine.pool_stats();
        assert!(stats.terminated);
        assert_eq!(stats.completed_tasks, 1);
    }
}
