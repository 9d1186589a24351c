//! CLI output formatting for every command.
//!
//! # Output Format
//!
//! Each report leads with the asset and the outcome, with details indented
//! underneath:
//!
//! ```text
//! photo.jpg: valid
//!     4000x3000 image/jpeg, rotate-90-cw
//!     warning: Image is 4000x3000 (45.8 MiB in memory)
//!         Consider resizing before upload
//! ```
//!
//! ```text
//! photo.jpg: compressed 4.2 MiB -> 812.0 KiB (80.9% smaller) in 340ms
//!     webp, 3 iterations
//! ```
//!
//! # Architecture
//!
//! Each command has a `format_*` function (returns `Vec<String>`) for
//! testability and a matching `*_json` function for `--json`. Both are
//! pure: no I/O, no side effects.

use crate::compress::CompressResult;
use crate::error::ProcessError;
use crate::imaging::{Capabilities, OutputFormat};
use crate::pool::{PoolStats, TaskResult};
use crate::preview::Preview;
use crate::process::{ConvertResult, ProcessResult};
use crate::validate::{ValidationIssue, ValidationReport};
use serde_json::{Value, json};

// ============================================================================
// Shared helpers
// ============================================================================

/// Return indentation string: 4 spaces per depth level.
fn indent(depth: usize) -> String {
    "    ".repeat(depth)
}

/// Human-readable byte count.
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: [&str; 3] = ["KiB", "MiB", "GiB"];
    if bytes < 1024 {
        return format!("{bytes} B");
    }
    let mut value = bytes as f64 / 1024.0;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    format!("{value:.1} {}", UNITS[unit])
}

fn issue_lines(label: &str, issue: &ValidationIssue) -> Vec<String> {
    vec![
        format!("{}{}: {}", indent(1), label, issue.message),
        format!("{}{}", indent(2), issue.suggestion),
    ]
}

fn error_line(error: &Option<ProcessError>) -> Option<String> {
    error
        .as_ref()
        .map(|e| format!("{}error: {}", indent(1), e))
}

fn error_json(error: &Option<ProcessError>) -> Value {
    error
        .as_ref()
        .map_or(Value::Null, |e| Value::String(e.to_string()))
}

// ============================================================================
// validate
// ============================================================================

pub fn format_validation(name: &str, report: &ValidationReport) -> Vec<String> {
    let mut lines = vec![format!(
        "{}: {}",
        name,
        if report.valid { "valid" } else { "invalid" }
    )];
    if let Some(meta) = &report.metadata {
        lines.push(format!(
            "{}{}x{} {}, {}",
            indent(1),
            meta.width,
            meta.height,
            meta.format,
            serde_json::to_value(meta.orientation)
                .ok()
                .and_then(|v| v.as_str().map(str::to_string))
                .unwrap_or_default()
        ));
    }
    for issue in &report.errors {
        lines.extend(issue_lines("error", issue));
    }
    for issue in &report.warnings {
        lines.extend(issue_lines("warning", issue));
    }
    lines
}

pub fn validation_json(name: &str, report: &ValidationReport) -> Value {
    json!({ "asset": name, "report": report })
}

// ============================================================================
// compress / convert / process
// ============================================================================

pub fn format_compress(name: &str, result: &CompressResult) -> Vec<String> {
    let mut lines = Vec::new();
    if !result.success {
        lines.push(format!("{name}: compression failed, original kept"));
        lines.extend(error_line(&result.error));
        return lines;
    }
    if result.original_size == result.compressed_size && result.iterations == 0 {
        lines.push(format!(
            "{}: already within budget ({})",
            name,
            format_bytes(result.original_size)
        ));
        return lines;
    }
    lines.push(format!(
        "{}: compressed {} -> {} ({:.1}% smaller) in {}ms",
        name,
        format_bytes(result.original_size),
        format_bytes(result.compressed_size),
        result.ratio * 100.0,
        result.time_ms
    ));
    let format = result.format.map_or("original".to_string(), |f| f.to_string());
    lines.push(format!(
        "{}{}, {} iterations",
        indent(1),
        format,
        result.iterations
    ));
    if result.shortfall_bytes > 0 {
        lines.push(format!(
            "{}over budget by {}",
            indent(1),
            format_bytes(result.shortfall_bytes)
        ));
    }
    lines
}

pub fn compress_json(name: &str, result: &CompressResult) -> Value {
    json!({
        "asset": name,
        "output": result.asset.name(),
        "original_size": result.original_size,
        "compressed_size": result.compressed_size,
        "ratio": result.ratio,
        "time_ms": result.time_ms,
        "format": result.format,
        "iterations": result.iterations,
        "shortfall_bytes": result.shortfall_bytes,
        "success": result.success,
        "error": error_json(&result.error),
    })
}

pub fn format_convert(name: &str, result: &ConvertResult) -> Vec<String> {
    let mut lines = Vec::new();
    if !result.success {
        lines.push(format!(
            "{}: conversion to {} failed, original kept",
            name, result.requested_format
        ));
        lines.extend(error_line(&result.error));
        return lines;
    }
    lines.push(format!(
        "{} -> {} ({:.1}% smaller) in {}ms",
        name,
        result.asset.name(),
        result.size_reduction_pct,
        result.time_ms
    ));
    if result.used_fallback {
        lines.push(format!(
            "{}{} unsupported, fell back to {}",
            indent(1),
            result.requested_format,
            result.actual_format
        ));
    }
    lines
}

pub fn convert_json(name: &str, result: &ConvertResult) -> Value {
    json!({
        "asset": name,
        "output": result.asset.name(),
        "requested_format": result.requested_format,
        "actual_format": result.actual_format,
        "used_fallback": result.used_fallback,
        "size_reduction_pct": result.size_reduction_pct,
        "time_ms": result.time_ms,
        "success": result.success,
        "error": error_json(&result.error),
    })
}

pub fn format_process(name: &str, result: &ProcessResult) -> Vec<String> {
    let mut lines = Vec::new();
    if !result.success {
        lines.push(format!("{name}: processing failed, original kept"));
        lines.extend(error_line(&result.error));
        return lines;
    }
    lines.push(format!(
        "{} -> {} ({}x{} -> {}x{}) in {}ms",
        name,
        result.asset.name(),
        result.original_dims.width,
        result.original_dims.height,
        result.final_dims.width,
        result.final_dims.height,
        result.time_ms
    ));
    if result.orientation_corrected {
        lines.push(format!("{}orientation corrected", indent(1)));
    }
    lines
}

pub fn process_json(name: &str, result: &ProcessResult) -> Value {
    json!({
        "asset": name,
        "output": result.asset.name(),
        "original_dims": result.original_dims,
        "final_dims": result.final_dims,
        "orientation": result.orientation,
        "orientation_corrected": result.orientation_corrected,
        "format": result.format,
        "time_ms": result.time_ms,
        "success": result.success,
        "error": error_json(&result.error),
    })
}

// ============================================================================
// preview / capabilities / pool
// ============================================================================

pub fn format_preview(name: &str, preview: &Preview) -> Vec<String> {
    vec![format!(
        "{}: preview {}x{} {} ({}) in {}ms{}",
        name,
        preview.width,
        preview.height,
        preview.format,
        format_bytes(preview.bytes.len() as u64),
        preview.generation_time.as_millis(),
        if preview.cache_hit { " (cached)" } else { "" }
    )]
}

pub fn preview_json(name: &str, preview: &Preview) -> Value {
    json!({
        "asset": name,
        "width": preview.width,
        "height": preview.height,
        "format": preview.format,
        "bytes": preview.bytes.len(),
        "generation_ms": preview.generation_time.as_millis() as u64,
        "cache_hit": preview.cache_hit,
    })
}

pub fn format_capabilities(caps: &Capabilities) -> Vec<String> {
    OutputFormat::ALL
        .into_iter()
        .map(|f| {
            format!(
                "{:<5} {}",
                f.to_string(),
                if caps.supports(f) { "yes" } else { "no" }
            )
        })
        .collect()
}

pub fn capabilities_json(caps: &Capabilities) -> Value {
    json!({ "supported": caps.supported() })
}

pub fn format_pool_stats(stats: &PoolStats) -> Vec<String> {
    let mut lines = vec![format!(
        "Pool: {} slots ({} busy, {} idle) of {}, {} queued",
        stats.total_slots, stats.active_slots, stats.idle_slots, stats.max_slots, stats.queued_tasks
    )];
    lines.push(format!(
        "{}{} completed, {} failed, {} rejected, {} timed out, {} crashed, avg {:.0}ms",
        indent(1),
        stats.completed_tasks,
        stats.failed_tasks,
        stats.rejected_tasks,
        stats.timed_out_tasks,
        stats.crashed_slots,
        stats.avg_duration_ms
    ));
    lines
}

/// One line per pooled task, for batch runs.
pub fn format_task_result(name: &str, result: &TaskResult) -> Vec<String> {
    let m = &result.metrics;
    if !result.success {
        let mut lines = vec![format!("{} {}: failed", result.id, name)];
        lines.extend(error_line(&result.error));
        return lines;
    }
    let output = result.output.as_ref().map_or(name, |o| o.name());
    let mut line = format!(
        "{} {} -> {} ({} -> {})",
        result.id,
        name,
        output,
        format_bytes(m.input_bytes),
        format_bytes(m.output_bytes)
    );
    if let (Some(w), Some(h)) = (m.width, m.height) {
        line.push_str(&format!(" {w}x{h}"));
    }
    if m.used_fallback {
        line.push_str(" [fallback]");
    }
    line.push_str(&format!(" in {}ms", m.run_ms));
    vec![line]
}

pub fn task_json(name: &str, result: &TaskResult) -> Value {
    json!({
        "id": result.id,
        "asset": name,
        "output": result.output.as_ref().map(|o| o.name()),
        "success": result.success,
        "metrics": result.metrics,
        "error": error_json(&result.error),
    })
}

/// Print lines to stdout.
pub fn print_lines(lines: &[String]) {
    for line in lines {
        println!("{line}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compress::CompressResult;
    use crate::imaging::{Dimensions, OrientationTag};
    use crate::types::{ImageAsset, ImageType};
    use crate::validate::{ImageMetadata, IssueCode};
    use std::time::Duration;

    fn asset(name: &str) -> ImageAsset {
        ImageAsset::new(name, "image/jpeg", vec![0; 10])
    }

    #[test]
    fn bytes_formatting() {
        assert_eq!(format_bytes(512), "512 B");
        assert_eq!(format_bytes(2048), "2.0 KiB");
        assert_eq!(format_bytes(3 * 1024 * 1024 / 2), "1.5 MiB");
    }

    #[test]
    fn indent_levels() {
        assert_eq!(indent(0), "");
        assert_eq!(indent(2), "        ");
    }

    #[test]
    fn validation_lists_errors_with_suggestions() {
        let report = ValidationReport {
            valid: false,
            errors: vec![ValidationIssue::new(
                IssueCode::FileTooLarge,
                "File is 30.0 MiB",
                "Compress the image first",
            )],
            warnings: vec![],
            metadata: None,
        };
        let lines = format_validation("big.jpg", &report);
        assert_eq!(lines[0], "big.jpg: invalid");
        assert_eq!(lines[1], "    error: File is 30.0 MiB");
        assert_eq!(lines[2], "        Compress the image first");
    }

    #[test]
    fn validation_shows_metadata() {
        let report = ValidationReport {
            valid: true,
            errors: vec![],
            warnings: vec![],
            metadata: Some(ImageMetadata {
                width: 3000,
                height: 4000,
                format: ImageType::Jpeg,
                orientation: OrientationTag::Rotate90Cw,
                aspect_ratio: 0.75,
                estimated_memory_bytes: 48_000_000,
            }),
        };
        let lines = format_validation("p.jpg", &report);
        assert_eq!(lines[0], "p.jpg: valid");
        assert_eq!(lines[1], "    3000x4000 image/jpeg, rotate-90-cw");
    }

    #[test]
    fn compress_within_budget() {
        let result = CompressResult {
            asset: asset("a.jpg"),
            original_size: 10,
            compressed_size: 10,
            ratio: 0.0,
            time_ms: 0,
            success: true,
            error: None,
            shortfall_bytes: 0,
            format: None,
            iterations: 0,
        };
        let lines = format_compress("a.jpg", &result);
        assert_eq!(lines, vec!["a.jpg: already within budget (10 B)"]);
    }

    #[test]
    fn compress_reports_shortfall() {
        let result = CompressResult {
            asset: asset("a.webp"),
            original_size: 4096,
            compressed_size: 2048,
            ratio: 0.5,
            time_ms: 12,
            success: true,
            error: None,
            shortfall_bytes: 1024,
            format: Some(OutputFormat::WebP),
            iterations: 3,
        };
        let lines = format_compress("a.jpg", &result);
        assert_eq!(
            lines[0],
            "a.jpg: compressed 4.0 KiB -> 2.0 KiB (50.0% smaller) in 12ms"
        );
        assert_eq!(lines[1], "    webp, 3 iterations");
        assert_eq!(lines[2], "    over budget by 1.0 KiB");

        let json = compress_json("a.jpg", &result);
        assert_eq!(json["format"], "webp");
        assert_eq!(json["error"], Value::Null);
    }

    #[test]
    fn convert_mentions_fallback() {
        let result = ConvertResult {
            asset: asset("a.jpg"),
            requested_format: OutputFormat::Avif,
            actual_format: OutputFormat::Jpeg,
            used_fallback: true,
            size_reduction_pct: 12.5,
            time_ms: 4,
            success: true,
            error: None,
        };
        let lines = format_convert("in.png", &result);
        assert_eq!(lines[1], "    avif unsupported, fell back to jpg");
        assert_eq!(convert_json("in.png", &result)["used_fallback"], true);
    }

    #[test]
    fn process_failure_shows_error() {
        let result = ProcessResult {
            asset: asset("a.jpg"),
            original_dims: Dimensions::new(0, 0),
            final_dims: Dimensions::new(0, 0),
            orientation: OrientationTag::Normal,
            orientation_corrected: false,
            format: None,
            time_ms: 1,
            success: false,
            error: Some(ProcessError::Processing("bad data".into())),
        };
        let lines = format_process("a.jpg", &result);
        assert_eq!(lines[0], "a.jpg: processing failed, original kept");
        assert!(lines[1].contains("bad data"));
    }

    #[test]
    fn preview_marks_cache_hits() {
        let preview = Preview {
            bytes: vec![0; 100],
            format: OutputFormat::Jpeg,
            width: 100,
            height: 75,
            generation_time: Duration::from_millis(3),
            cache_hit: true,
        };
        let lines = format_preview("a.jpg", &preview);
        assert_eq!(lines[0], "a.jpg: preview 100x75 jpg (100 B) in 3ms (cached)");
    }

    #[test]
    fn capabilities_table() {
        let lines = format_capabilities(&Capabilities::baseline());
        assert!(lines.iter().any(|l| l == "jpg   yes"));
        assert!(lines.iter().any(|l| l == "avif  no"));
    }

    #[test]
    fn task_result_line() {
        use crate::pool::{TaskId, TaskMetrics};
        let result = TaskResult::succeeded(
            TaskId(3),
            ImageAsset::new("a-preview.jpg", "image/jpeg", vec![0; 2048]),
            TaskMetrics {
                input_bytes: 4096,
                width: Some(100),
                height: Some(50),
                run_ms: 7,
                ..TaskMetrics::default()
            },
        );
        let lines = format_task_result("a.jpg", &result);
        assert_eq!(
            lines[0],
            "#3 a.jpg -> a-preview.jpg (4.0 KiB -> 2.0 KiB) 100x50 in 7ms"
        );
        assert_eq!(task_json("a.jpg", &result)["metrics"]["slot"], Value::Null);

        let failed = TaskResult::failed(TaskId(4), ProcessError::Aborted);
        assert_eq!(format_task_result("b.jpg", &failed)[0], "#4 b.jpg: failed");
    }

    #[test]
    fn pool_stats_summary() {
        let stats = PoolStats {
            total_slots: 2,
            active_slots: 1,
            idle_slots: 1,
            max_slots: 4,
            completed_tasks: 5,
            rejected_tasks: 2,
            ..PoolStats::default()
        };
        let lines = format_pool_stats(&stats);
        assert_eq!(lines[0], "Pool: 2 slots (1 busy, 1 idle) of 4, 0 queued");
        assert!(lines[1].starts_with("    5 completed, 0 failed, 2 rejected"));
    }
}
