//! questfusion CLI entrypoint.

use std::fs;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::Instant;

use clap::{Parser, ValueEnum};
use log::{debug, error, info};
use serde::{Deserialize, Serialize};
use serde_json::json;
use thiserror::Error;

use crate::config::{ConfigError, ConfigLoader, FusionConfig};
use crate::core::CameraSelection;
use crate::fusion::{MeshFormat, MeshTimings};
use crate::io::{build_manifest_from_export, CaptureDirectory, DatasetError};
use crate::pipeline::{CancelToken, Orchestrator, ReconstructionError, ReconstructionReport, RunRequest};

/// questfusion command-line arguments.
#[derive(Parser, Debug)]
#[command(name = "questfusion", version, about = "TSDF fusion of headset RGB-D captures")]
struct CliArgs {
    /// Capture directory (containing frames.json).
    #[arg(long, value_name = "DIR")]
    input: Option<PathBuf>,
    /// Output directory path.
    #[arg(long, value_name = "DIR")]
    output: Option<PathBuf>,
    /// Path to a YAML or TOML configuration file.
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,
    /// Cameras to integrate.
    #[arg(long, value_enum)]
    camera: Option<CameraArg>,
    /// Integrate every Nth frame.
    #[arg(long, value_name = "N")]
    frame_interval: Option<usize>,
    /// First frame to integrate.
    #[arg(long, value_name = "N")]
    start_frame: Option<usize>,
    /// Last frame to integrate (inclusive).
    #[arg(long, value_name = "N")]
    end_frame: Option<usize>,
    /// TSDF voxel size in meters.
    #[arg(long, value_name = "METERS")]
    voxel_size: Option<f32>,
    /// Mesh file format.
    #[arg(long, value_enum)]
    export_format: Option<ExportFormatArg>,
    /// Output format for results.
    #[arg(long, value_enum)]
    output_format: Option<OutputFormat>,
    /// Log verbosity level.
    #[arg(long, value_enum)]
    log_level: Option<LogLevel>,
    /// Log format (text/json).
    #[arg(long, value_enum)]
    log_format: Option<LogFormat>,
    /// Override any config value, e.g. `--set post_processing.enable=false`.
    #[arg(long = "set", value_name = "KEY=VALUE")]
    set: Vec<String>,
    /// Generate frames.json from a raw headset export before running.
    #[arg(long)]
    build_manifest: bool,
}

#[derive(Debug, Clone, Copy, ValueEnum, PartialEq, Eq)]
enum CameraArg {
    Left,
    Right,
    Both,
    Color,
}

impl From<CameraArg> for CameraSelection {
    fn from(arg: CameraArg) -> Self {
        match arg {
            CameraArg::Left => CameraSelection::Left,
            CameraArg::Right => CameraSelection::Right,
            CameraArg::Both => CameraSelection::Both,
            CameraArg::Color => CameraSelection::Color,
        }
    }
}

#[derive(Debug, Clone, Copy, ValueEnum, PartialEq, Eq)]
enum ExportFormatArg {
    Obj,
    Ply,
    Stl,
}

impl From<ExportFormatArg> for MeshFormat {
    fn from(arg: ExportFormatArg) -> Self {
        match arg {
            ExportFormatArg::Obj => MeshFormat::Obj,
            ExportFormatArg::Ply => MeshFormat::Ply,
            ExportFormatArg::Stl => MeshFormat::Stl,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, ValueEnum, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
enum OutputFormat {
    #[default]
    Json,
    Text,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, ValueEnum, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

impl LogLevel {
    fn as_str(self) -> &'static str {
        match self {
            LogLevel::Trace => "trace",
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, ValueEnum, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
enum LogFormat {
    #[default]
    Text,
    Json,
}

/// Everything needed to run once the config and CLI are merged.
struct ResolvedConfig {
    input: PathBuf,
    output: PathBuf,
    output_format: OutputFormat,
    fusion: FusionConfig,
    request: RunRequest,
    build_manifest: bool,
}

#[derive(Error, Debug)]
enum CliError {
    #[error("input path is required but was not provided")]
    InputNotProvided,
    #[error("input directory not found: {0}")]
    InputMissing(PathBuf),
    #[error("input path is not a directory: {0}")]
    InputNotDirectory(PathBuf),
    #[error("invalid --set argument '{0}', expected KEY=VALUE")]
    InvalidOverride(String),
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
    #[error("failed to read capture: {0}")]
    Dataset(#[from] DatasetError),
    #[error("output path exists but is not a directory: {0}")]
    OutputNotDirectory(PathBuf),
    #[error("failed to create output directory {path}: {source}")]
    OutputCreate { path: PathBuf, source: std::io::Error },
    #[error("failed to write results to {path}: {source}")]
    OutputWrite { path: PathBuf, source: std::io::Error },
    #[error("reconstruction failed: {0}")]
    Pipeline(#[from] ReconstructionError),
}

impl CliError {
    fn exit_code(&self) -> ExitCode {
        ExitCode::from(self.code())
    }

    fn code(&self) -> u8 {
        match self {
            CliError::InputNotProvided
            | CliError::InputMissing(_)
            | CliError::InputNotDirectory(_)
            | CliError::InvalidOverride(_)
            | CliError::Config(_)
            | CliError::Dataset(_) => 1,
            CliError::OutputNotDirectory(_)
            | CliError::OutputCreate { .. }
            | CliError::OutputWrite { .. }
            | CliError::Pipeline(_) => 2,
        }
    }

    fn error_type(&self) -> &'static str {
        match self {
            CliError::InputNotProvided | CliError::InputMissing(_) | CliError::InputNotDirectory(_) => {
                "InputError"
            }
            CliError::InvalidOverride(_) | CliError::Config(_) => "ConfigError",
            CliError::Dataset(_) => "DatasetError",
            CliError::OutputNotDirectory(_) | CliError::OutputCreate { .. } | CliError::OutputWrite { .. } => {
                "OutputError"
            }
            CliError::Pipeline(_) => "PipelineError",
        }
    }

    fn component(&self) -> &'static str {
        match self {
            CliError::InputNotProvided
            | CliError::InputMissing(_)
            | CliError::InputNotDirectory(_)
            | CliError::InvalidOverride(_) => "cli",
            CliError::Config(_) => "config",
            CliError::Dataset(_) => "io",
            CliError::OutputNotDirectory(_) | CliError::OutputCreate { .. } | CliError::OutputWrite { .. } => "io",
            CliError::Pipeline(_) => "pipeline",
        }
    }

    fn suggestion(&self) -> &'static str {
        match self {
            CliError::InputNotProvided => "Pass --input <capture-dir>.",
            CliError::InputMissing(_) => "Verify the input path and ensure the directory exists.",
            CliError::InputNotDirectory(_) => "Provide the capture directory, not a file inside it.",
            CliError::InvalidOverride(_) => "Use --set section.key=value, e.g. --set reconstruction.voxel_size=0.02.",
            CliError::Config(_) => "Fix the config syntax and ensure values are in range.",
            CliError::Dataset(DatasetError::ManifestMissing(_)) => {
                "Run with --build-manifest for raw headset exports, or add frames.json."
            }
            CliError::Dataset(_) => "Check that the capture files match frames.json and the image format files.",
            CliError::OutputNotDirectory(_) => "Choose an output path that is a directory.",
            CliError::OutputCreate { .. } => "Check write permissions or select a different output directory.",
            CliError::OutputWrite { .. } => "Ensure the output directory is writable and has free space.",
            CliError::Pipeline(ReconstructionError::GridCapacityExceeded { .. }) => {
                "Increase reconstruction.block_count or reconstruction.voxel_size, or lower depth_max."
            }
            CliError::Pipeline(_) => "Run with --log-level debug for per-frame diagnostics.",
        }
    }
}

#[derive(Debug, Default, Serialize)]
struct MeshStats {
    vertex_count: usize,
    triangle_count: usize,
    surface_area: f32,
    isolated_triangle_percent: f32,
}

#[derive(Debug, Serialize)]
struct ErrorInfo {
    error_type: String,
    root_cause: String,
    component: String,
    suggestion: String,
}

#[derive(Debug, Serialize)]
struct Diagnostics {
    os: String,
    arch: String,
    questfusion_version: String,
    cwd: String,
    input: Option<String>,
    output: Option<String>,
    config: Option<String>,
}

#[derive(Debug, Serialize)]
struct ResultsJson {
    status: String,
    input: Option<String>,
    output: Option<String>,
    processing_time_ms: u128,
    processed_frames: usize,
    failed_frames: usize,
    integrated_views: usize,
    mesh: MeshStats,
    mesh_path: Option<String>,
    metadata_path: Option<String>,
    timings_ms: MeshTimings,
    error: Option<ErrorInfo>,
    diagnostics: Diagnostics,
}

/// Parse `std::env::args` and run.
pub fn run() -> ExitCode {
    run_with_args(CliArgs::parse())
}

fn run_with_args(cli: CliArgs) -> ExitCode {
    let start = Instant::now();
    let config_path = cli.config.clone();

    let mut config = match load_config(&cli) {
        Ok(config) => config,
        Err(err) => {
            return handle_error(&err, start, None, cli.output_format, cli.output.clone(), config_path);
        }
    };

    let log_format = cli.log_format.unwrap_or_default();
    init_logger(&resolve_log_level(&cli), log_format);

    let overrides = match apply_overrides(&mut config, &cli) {
        Ok(overrides) => overrides,
        Err(err) => {
            return handle_error(&err, start, None, cli.output_format, cli.output.clone(), config_path);
        }
    };
    for override_entry in overrides {
        debug!("CLI override: {}", override_entry);
    }

    let resolved = match finalize_config(config, &cli) {
        Ok(resolved) => resolved,
        Err(err) => {
            return handle_error(&err, start, None, cli.output_format, cli.output.clone(), config_path);
        }
    };

    let output_dir = match ensure_output_dir(&resolved.output) {
        Ok(dir) => dir,
        Err(err) => {
            return handle_error(
                &err,
                start,
                Some(&resolved),
                Some(resolved.output_format),
                Some(resolved.output.clone()),
                config_path,
            );
        }
    };

    info!("Starting questfusion");
    info!("Input: {}", resolved.input.display());
    info!("Output: {}", output_dir.display());

    let report = match run_pipeline(&resolved, &output_dir) {
        Ok(report) => report,
        Err(err) => {
            return handle_error(
                &err,
                start,
                Some(&resolved),
                Some(resolved.output_format),
                Some(resolved.output.clone()),
                config_path,
            );
        }
    };

    let results = success_results(&report, &resolved, &output_dir, start, config_path.as_deref());
    if let Err(err) = write_results(&results, &output_dir) {
        return handle_error(
            &err,
            start,
            Some(&resolved),
            Some(resolved.output_format),
            Some(resolved.output.clone()),
            config_path,
        );
    }

    if resolved.output_format == OutputFormat::Text {
        print_text_summary(&results);
    }

    ExitCode::SUCCESS
}

fn load_config(cli: &CliArgs) -> Result<FusionConfig, CliError> {
    match &cli.config {
        Some(path) => Ok(ConfigLoader::load(path)?),
        None => Ok(FusionConfig::default()),
    }
}

fn resolve_log_level(cli: &CliArgs) -> String {
    if let Some(level) = cli.log_level {
        return level.as_str().to_string();
    }

    if let Ok(level) = std::env::var("RUST_LOG") {
        if !level.trim().is_empty() {
            return level;
        }
    }

    "info".to_string()
}

fn init_logger(level: &str, format: LogFormat) {
    let mut builder = env_logger::Builder::new();
    builder.target(env_logger::Target::Stderr);
    builder.filter_level(log::LevelFilter::Info);
    builder.parse_filters(level);
    builder.format(move |buf, record| {
        use std::io::Write;
        let module = record.module_path().unwrap_or(record.target());
        match format {
            LogFormat::Json => {
                let payload = json!({
                    "timestamp": buf.timestamp_millis().to_string(),
                    "level": record.level().to_string(),
                    "target": module,
                    "message": record.args().to_string(),
                });
                writeln!(buf, "{}", payload)
            }
            LogFormat::Text => {
                writeln!(
                    buf,
                    "{} [{}] {}: {}",
                    buf.timestamp_millis(),
                    record.level(),
                    module,
                    record.args()
                )
            }
        }
    });

    if let Err(err) = builder.try_init() {
        eprintln!("Failed to initialize logger: {}", err);
    }
}

/// Merge CLI flags into `config`, returning a description of each change.
fn apply_overrides(config: &mut FusionConfig, cli: &CliArgs) -> Result<Vec<String>, CliError> {
    let mut overrides = Vec::new();

    if let Some(camera) = cli.camera {
        let camera = CameraSelection::from(camera);
        if config.reconstruction.camera != camera {
            overrides.push(format!("reconstruction.camera = {:?}", camera));
        }
        config.reconstruction.camera = camera;
    }

    if let Some(interval) = cli.frame_interval {
        let interval = interval.max(1);
        if config.reconstruction.frame_interval != interval {
            overrides.push(format!("reconstruction.frame_interval = {}", interval));
        }
        config.reconstruction.frame_interval = interval;
    }

    if let Some(voxel_size) = cli.voxel_size {
        if config.reconstruction.voxel_size != voxel_size {
            overrides.push(format!("reconstruction.voxel_size = {}", voxel_size));
        }
        config.reconstruction.voxel_size = voxel_size;
    }

    if let Some(format) = cli.export_format {
        let format = MeshFormat::from(format);
        if config.export.format != format {
            overrides.push(format!("export.format = {}", format));
        }
        config.export.format = format;
    }

    for entry in &cli.set {
        let (key, value) = entry
            .split_once('=')
            .ok_or_else(|| CliError::InvalidOverride(entry.clone()))?;
        ConfigLoader::apply_override(config, key.trim(), value.trim())?;
        overrides.push(format!("{} = {}", key.trim(), value.trim()));
    }

    Ok(overrides)
}

fn finalize_config(config: FusionConfig, cli: &CliArgs) -> Result<ResolvedConfig, CliError> {
    config.validate()?;

    let input = cli.input.clone().ok_or(CliError::InputNotProvided)?;
    if !input.exists() {
        return Err(CliError::InputMissing(input));
    }
    if !input.is_dir() {
        return Err(CliError::InputNotDirectory(input));
    }

    let output = cli.output.clone().unwrap_or_else(|| input.join("reconstruction"));
    let request = RunRequest {
        start_frame: cli.start_frame.unwrap_or(0),
        end_frame: cli.end_frame,
        ..RunRequest::from_config(&config)
    };

    Ok(ResolvedConfig {
        input,
        output,
        output_format: cli.output_format.unwrap_or_default(),
        fusion: config,
        request,
        build_manifest: cli.build_manifest,
    })
}

fn ensure_output_dir(output: &Path) -> Result<PathBuf, CliError> {
    if output.exists() {
        if output.is_dir() {
            return Ok(output.to_path_buf());
        }
        return Err(CliError::OutputNotDirectory(output.to_path_buf()));
    }

    fs::create_dir_all(output).map_err(|source| CliError::OutputCreate {
        path: output.to_path_buf(),
        source,
    })?;

    Ok(output.to_path_buf())
}

fn run_pipeline(config: &ResolvedConfig, output_dir: &Path) -> Result<ReconstructionReport, CliError> {
    if config.build_manifest {
        let path = build_manifest_from_export(&config.input)?;
        info!("Wrote manifest {}", path.display());
    }

    let source = CaptureDirectory::open(&config.input, &config.fusion.rig)?;
    let mut orchestrator = Orchestrator::new(config.fusion.clone()).with_output_dir(output_dir);
    let report = orchestrator.run(&source, &config.request, &CancelToken::new(), None)?;

    if let Some(path) = &report.export_path {
        info!("Mesh written to {}", path.display());
    }
    Ok(report)
}

fn success_results(
    report: &ReconstructionReport,
    config: &ResolvedConfig,
    output_dir: &Path,
    start: Instant,
    config_path: Option<&Path>,
) -> ResultsJson {
    let mesh = report
        .mesh
        .as_ref()
        .map(|mesh| MeshStats {
            vertex_count: mesh.vertex_count(),
            triangle_count: mesh.triangle_count(),
            surface_area: mesh.surface_area(),
            isolated_triangle_percent: report
                .post_process
                .as_ref()
                .map_or(0.0, |stats| stats.isolated_triangle_percentage),
        })
        .unwrap_or_default();

    ResultsJson {
        status: report.state.to_string(),
        input: Some(config.input.display().to_string()),
        output: Some(output_dir.display().to_string()),
        processing_time_ms: start.elapsed().as_millis(),
        processed_frames: report.processed_frames,
        failed_frames: report.failed_frames,
        integrated_views: report.integrated_views,
        mesh,
        mesh_path: report.export_path.as_ref().map(|p| p.display().to_string()),
        metadata_path: report.metadata_path.as_ref().map(|p| p.display().to_string()),
        timings_ms: report.timings.clone(),
        error: None,
        diagnostics: build_diagnostics(Some(&config.input), Some(output_dir), config_path),
    }
}

fn write_results(results: &ResultsJson, output_dir: &Path) -> Result<(), CliError> {
    let path = output_dir.join("results.json");
    let payload = serde_json::to_string_pretty(results).map_err(|err| CliError::OutputWrite {
        path: path.clone(),
        source: err.into(),
    })?;

    fs::write(&path, payload).map_err(|source| CliError::OutputWrite {
        path: path.clone(),
        source,
    })?;
    info!("Results written to {}", path.display());

    Ok(())
}

fn print_text_summary(results: &ResultsJson) {
    println!("questfusion Results");
    println!("Status: {}", results.status);
    if let Some(input) = &results.input {
        println!("Input: {}", input);
    }
    if let Some(output) = &results.output {
        println!("Output: {}", output);
    }
    println!("Processing time (ms): {}", results.processing_time_ms);
    println!(
        "Frames: {} processed, {} views integrated, {} skipped",
        results.processed_frames, results.integrated_views, results.failed_frames
    );
    println!("Mesh vertices: {}", results.mesh.vertex_count);
    println!("Mesh triangles: {}", results.mesh.triangle_count);
    if let Some(path) = &results.mesh_path {
        println!("Mesh file: {}", path);
    }
}

fn build_diagnostics(input: Option<&Path>, output: Option<&Path>, config: Option<&Path>) -> Diagnostics {
    Diagnostics {
        os: std::env::consts::OS.to_string(),
        arch: std::env::consts::ARCH.to_string(),
        questfusion_version: env!("CARGO_PKG_VERSION").to_string(),
        cwd: std::env::current_dir()
            .map(|path| path.display().to_string())
            .unwrap_or_else(|_| "<unavailable>".to_string()),
        input: input.map(|path| path.display().to_string()),
        output: output.map(|path| path.display().to_string()),
        config: config.map(|path| path.display().to_string()),
    }
}

fn handle_error(
    err: &CliError,
    start: Instant,
    resolved: Option<&ResolvedConfig>,
    output_format: Option<OutputFormat>,
    output_override: Option<PathBuf>,
    config_path: Option<PathBuf>,
) -> ExitCode {
    let input = resolved.map(|r| r.input.clone());
    let output = resolved.map(|r| r.output.clone()).or(output_override);

    let diagnostics = build_diagnostics(input.as_deref(), output.as_deref(), config_path.as_deref());

    let error_info = ErrorInfo {
        error_type: err.error_type().to_string(),
        root_cause: err.to_string(),
        component: err.component().to_string(),
        suggestion: err.suggestion().to_string(),
    };

    error!(
        "{}: {} (component: {})",
        error_info.error_type, error_info.root_cause, error_info.component
    );

    eprintln!("Error: {}", error_info.error_type);
    eprintln!("Component: {}", error_info.component);
    eprintln!("Cause: {}", error_info.root_cause);
    eprintln!("Suggestion: {}", error_info.suggestion);

    let results = ResultsJson {
        status: "error".to_string(),
        input: input.map(|path| path.display().to_string()),
        output: output.as_ref().map(|path| path.display().to_string()),
        processing_time_ms: start.elapsed().as_millis(),
        processed_frames: 0,
        failed_frames: 0,
        integrated_views: 0,
        mesh: MeshStats::default(),
        mesh_path: None,
        metadata_path: None,
        timings_ms: MeshTimings::default(),
        error: Some(error_info),
        diagnostics,
    };

    let format = output_format.or_else(|| resolved.map(|r| r.output_format));
    if format.unwrap_or_default() == OutputFormat::Json {
        if let Some(output_dir) = output {
            let _ = ensure_output_dir(&output_dir).and_then(|dir| write_results(&results, &dir));
        }
    }

    err.exit_code()
}
