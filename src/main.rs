use clap::{Parser, Subcommand};
use photoprep::config::{self, EngineConfig};
use photoprep::engine::Engine;
use photoprep::imaging::{CropRect, OutputFormat, ResizeSpec, RustBackend};
use photoprep::output;
use photoprep::pool::{TaskHandle, TaskKind};
use photoprep::process::TransformConfig;
use photoprep::types::ImageAsset;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "photoprep")]
#[command(version)]
#[command(about = "Prepare photos for upload: validate, orient, resize, compress, convert")]
#[command(long_about = "\
Prepare photos for upload: validate, orient, resize, compress, convert

Every command reads image files and leaves the originals untouched.
Results are written to --out-dir with the output format's extension.

With more than one input file, work runs on the background execution pool
and one line is printed per file as it completes.

Settings come from photoprep.toml (see 'photoprep gen-config'); command-line
flags override the file.")]
struct Cli {
    /// Config file layered over the stock defaults
    #[arg(long, default_value = config::CONFIG_FILE_NAME, global = true)]
    config: PathBuf,

    /// Directory for written results
    #[arg(long, default_value = "photoprep-out", global = true)]
    out_dir: PathBuf,

    /// Print JSON reports instead of text
    #[arg(long, global = true)]
    json: bool,

    /// Log filter (e.g. "debug", "photoprep=trace"); falls back to RUST_LOG
    #[arg(long, global = true)]
    log: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(clap::Args, Clone)]
struct Inputs {
    /// Image files
    #[arg(required = true)]
    files: Vec<PathBuf>,
}

#[derive(Subcommand)]
enum Command {
    /// Check size, type, signature, dimensions and integrity
    Validate(Inputs),
    /// Shrink to a byte budget
    Compress {
        #[command(flatten)]
        inputs: Inputs,
        /// Byte budget per file
        #[arg(long)]
        max_size: Option<u64>,
        /// Output format (jpeg, png, webp, avif)
        #[arg(long, value_parser = parse_format)]
        format: Option<OutputFormat>,
    },
    /// Re-encode to another format, falling back when unsupported
    Convert {
        #[command(flatten)]
        inputs: Inputs,
        /// Target format (jpeg, png, webp, avif)
        #[arg(long, value_parser = parse_format)]
        to: OutputFormat,
        #[arg(long)]
        quality: Option<u32>,
    },
    /// Orient, rotate, flip, crop and resize
    Process {
        #[command(flatten)]
        inputs: Inputs,
        #[arg(long)]
        width: Option<u32>,
        #[arg(long)]
        height: Option<u32>,
        /// Normalized crop "x,y,width,height" on the upright image
        #[arg(long, value_parser = parse_crop)]
        crop: Option<CropRect>,
        /// Clockwise rotation in degrees
        #[arg(long, default_value_t = 0.0)]
        rotate: f64,
        #[arg(long)]
        flip_h: bool,
        #[arg(long)]
        flip_v: bool,
        /// Output format (jpeg, png, webp, avif)
        #[arg(long, value_parser = parse_format)]
        format: Option<OutputFormat>,
        #[arg(long, default_value_t = 90)]
        quality: u32,
    },
    /// Render small previews
    Preview(Inputs),
    /// Show which output formats this build can encode
    Capabilities,
    /// Print a stock photoprep.toml with all options documented
    GenConfig,
}

fn parse_format(s: &str) -> Result<OutputFormat, String> {
    OutputFormat::parse(s).ok_or_else(|| format!("unknown format '{s}'"))
}

fn parse_crop(s: &str) -> Result<CropRect, String> {
    let parts: Vec<f64> = s
        .split(',')
        .map(|p| p.trim().parse::<f64>().map_err(|e| format!("{p}: {e}")))
        .collect::<Result<_, _>>()?;
    match parts.as_slice() {
        [x, y, w, h] => Ok(CropRect::new(*x, *y, *w, *h)),
        _ => Err("crop needs four values: x,y,width,height".into()),
    }
}

fn init_tracing(filter: Option<&str>) -> Result<(), Box<dyn std::error::Error>> {
    let filter = match filter {
        Some(f) => EnvFilter::try_new(f)?,
        None => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
    Ok(())
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    init_tracing(cli.log.as_deref())?;

    if let Command::GenConfig = cli.command {
        print!("{}", config::stock_config_toml());
        return Ok(());
    }

    let mut engine_config = config::load_config(&cli.config)?;
    apply_overrides(&mut engine_config, &cli.command);
    let engine = Engine::new(RustBackend::new(), engine_config)?;

    match &cli.command {
        Command::Validate(inputs) => {
            for path in &inputs.files {
                let asset = ImageAsset::from_path(path)?;
                let report = engine.validate(&asset);
                emit(
                    cli.json,
                    output::validation_json(asset.name(), &report),
                    output::format_validation(asset.name(), &report),
                );
            }
        }
        Command::Compress { inputs, .. } => {
            let kind = TaskKind::Compress(engine.config().compression.clone());
            run(&cli, &engine, &inputs.files, kind, |asset| {
                let result = engine.compress(asset, None);
                let lines = output::format_compress(asset.name(), &result);
                let json = output::compress_json(asset.name(), &result);
                (result.success.then_some(result.asset), json, lines)
            })?;
        }
        Command::Convert { inputs, to, .. } => {
            let kind = TaskKind::Convert {
                target: *to,
                config: engine.config().conversion.clone(),
            };
            run(&cli, &engine, &inputs.files, kind, |asset| {
                let result = engine.convert(asset, *to);
                let lines = output::format_convert(asset.name(), &result);
                let json = output::convert_json(asset.name(), &result);
                (result.success.then_some(result.asset), json, lines)
            })?;
        }
        Command::Process {
            inputs,
            width,
            height,
            crop,
            rotate,
            flip_h,
            flip_v,
            format,
            quality,
        } => {
            let transform = TransformConfig {
                resize: ResizeSpec {
                    width: *width,
                    height: *height,
                    ..ResizeSpec::default()
                },
                crop: *crop,
                rotation_degrees: *rotate,
                flip_h: *flip_h,
                flip_v: *flip_v,
                output_format: *format,
                quality: *quality,
                ..TransformConfig::default()
            };
            let kind = TaskKind::Transform(transform.clone());
            run(&cli, &engine, &inputs.files, kind, |asset| {
                let result = engine.process(asset, &transform);
                let lines = output::format_process(asset.name(), &result);
                let json = output::process_json(asset.name(), &result);
                (result.success.then_some(result.asset), json, lines)
            })?;
        }
        Command::Preview(inputs) => {
            let kind = TaskKind::Preview(engine.config().preview.clone());
            run(&cli, &engine, &inputs.files, kind, |asset| {
                match engine.generate_preview(asset) {
                    Ok(preview) => {
                        let lines = output::format_preview(asset.name(), &preview);
                        let json = output::preview_json(asset.name(), &preview);
                        let name = format!("{}-preview.{}", asset.stem(), preview.format.extension());
                        let out = ImageAsset::new(name, preview.format.mime(), preview.bytes);
                        (Some(out), json, lines)
                    }
                    Err(e) => (
                        None,
                        serde_json::json!({ "asset": asset.name(), "error": e.to_string() }),
                        vec![format!("{}: preview failed: {e}", asset.name())],
                    ),
                }
            })?;
        }
        Command::Capabilities => {
            let caps = engine.capabilities();
            emit(
                cli.json,
                output::capabilities_json(&caps),
                output::format_capabilities(&caps),
            );
        }
        Command::GenConfig => {}
    }

    Ok(())
}

/// Fold command-line flags into the loaded config.
fn apply_overrides(config: &mut EngineConfig, command: &Command) {
    match command {
        Command::Compress {
            max_size, format, ..
        } => {
            if let Some(max) = max_size {
                config.compression.max_size_bytes = *max;
            }
            if format.is_some() {
                config.compression.output_format = *format;
            }
        }
        Command::Convert {
            quality: Some(q), ..
        } => config.conversion.quality = *q,
        _ => {}
    }
}

fn emit(json: bool, value: serde_json::Value, lines: Vec<String>) {
    if json {
        println!("{value}");
    } else {
        output::print_lines(&lines);
    }
}

fn write_output(out_dir: &Path, asset: &ImageAsset) -> std::io::Result<PathBuf> {
    std::fs::create_dir_all(out_dir)?;
    let path = out_dir.join(asset.name());
    std::fs::write(&path, asset.bytes())?;
    Ok(path)
}

/// One file runs inline with a detailed report; several go through the pool.
fn run<F>(
    cli: &Cli,
    engine: &Engine,
    files: &[PathBuf],
    kind: TaskKind,
    single: F,
) -> Result<(), Box<dyn std::error::Error>>
where
    F: Fn(&ImageAsset) -> (Option<ImageAsset>, serde_json::Value, Vec<String>),
{
    if let [path] = files {
        let asset = ImageAsset::from_path(path)?;
        let (out, json, lines) = single(&asset);
        emit(cli.json, json, lines);
        if let Some(out) = out {
            let written = write_output(&cli.out_dir, &out)?;
            tracing::debug!(path = %written.display(), "wrote result");
        }
        return Ok(());
    }

    let mut handles: Vec<(String, TaskHandle)> = Vec::with_capacity(files.len());
    for path in files {
        let asset = Arc::new(ImageAsset::from_path(path)?);
        let name = asset.name().to_string();
        let task = engine.create_task(kind.clone(), asset)?;
        handles.push((name, engine.submit_task(task)));
    }

    let mut failures = 0;
    for (name, handle) in handles {
        let result = handle.wait();
        emit(
            cli.json,
            output::task_json(&name, &result),
            output::format_task_result(&name, &result),
        );
        match &result.output {
            Some(out) => {
                write_output(&cli.out_dir, out)?;
            }
            None => failures += 1,
        }
    }

    let stats = engine.pool_stats();
    if !cli.json {
        output::print_lines(&output::format_pool_stats(&stats));
    }
    engine.shutdown_pool();
    if failures > 0 {
        tracing::warn!(failures, total = files.len(), "some files failed");
    }
    Ok(())
}
