use anyhow::{Context, Result, anyhow};
use serde_json::Value;
use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use tracing::warn;

use crate::recognition::{PageResult, parse_page_result};

pub const DEFAULT_LANGUAGE: &str = "ch";
/// Detection side-length limit the CLI applies when --max-size is absent.
pub const DEFAULT_DET_LIMIT: u32 = 640;

const ENGINE_PROGRAM: &str = "paddleocr";
const MODEL_SOURCE_CHECK_ENV: &str = "DISABLE_MODEL_SOURCE_CHECK";
const VISIBLE_DEVICES_ENV: &str = "CUDA_VISIBLE_DEVICES";

/// Seam between the pipeline and the recognition backend. Production code
/// shells out to the PaddleOCR executable; tests substitute their own.
pub trait OcrEngine {
    fn recognize(&self, image: &Path) -> Result<Vec<PageResult>>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Device {
    /// Let the engine pick; the environment is left untouched.
    Auto,
    Cpu,
    Gpu,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OcrVersion {
    PpOcrV4,
    PpOcrV5,
}

impl OcrVersion {
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "PP-OCRv4" => Some(Self::PpOcrV4),
            "PP-OCRv5" => Some(Self::PpOcrV5),
            _ => None,
        }
    }

    fn as_arg(self) -> &'static str {
        match self {
            Self::PpOcrV4 => "PP-OCRv4",
            Self::PpOcrV5 => "PP-OCRv5",
        }
    }
}

#[derive(Debug, Clone)]
pub struct EngineOptions {
    pub language: String,
    pub device: Device,
    pub ocr_version: Option<OcrVersion>,
    /// Textline orientation classification; disabled in fast mode.
    pub textline_orientation: bool,
    pub det_limit_side_len: Option<u32>,
    pub recognition_batch_size: Option<u32>,
    pub enable_hpi: bool,
}

impl EngineOptions {
    /// Server defaults: fast mode, engine-chosen device, single-image
    /// recognition batches for lowest latency.
    pub fn for_language(language: &str) -> Self {
        Self {
            language: normalize_language(language),
            device: Device::Auto,
            ocr_version: None,
            textline_orientation: false,
            det_limit_side_len: None,
            recognition_batch_size: Some(1),
            enable_hpi: false,
        }
    }
}

/// Lower-cases and trims a requested language code, defaulting to "ch".
pub fn normalize_language(code: &str) -> String {
    let normalized = code.trim().to_lowercase();
    if normalized.is_empty() {
        DEFAULT_LANGUAGE.to_string()
    } else {
        normalized
    }
}

/// Invokes the PaddleOCR executable once per recognition request and
/// parses the result JSON it writes.
pub struct PaddleCliEngine {
    options: EngineOptions,
}

impl PaddleCliEngine {
    pub fn new(options: EngineOptions) -> Result<Self> {
        probe_engine()?;
        Ok(Self { options })
    }
}

impl OcrEngine for PaddleCliEngine {
    fn recognize(&self, image: &Path) -> Result<Vec<PageResult>> {
        let save_dir = tempfile::Builder::new()
            .prefix("paddleocr_res_")
            .tempdir()
            .with_context(|| "failed to create result directory")?;

        let mut cmd = Command::new(ENGINE_PROGRAM);
        cmd.arg("ocr")
            .arg("-i")
            .arg(image)
            .arg("--lang")
            .arg(&self.options.language)
            .arg("--use_doc_orientation_classify")
            .arg("False")
            .arg("--use_doc_unwarping")
            .arg("False")
            .arg("--use_textline_orientation")
            .arg(flag(self.options.textline_orientation))
            .arg("--save_path")
            .arg(save_dir.path());
        if let Some(limit) = self.options.det_limit_side_len {
            cmd.arg("--text_det_limit_side_len").arg(limit.to_string());
        }
        if let Some(batch) = self.options.recognition_batch_size {
            cmd.arg("--text_recognition_batch_size").arg(batch.to_string());
        }
        if let Some(version) = self.options.ocr_version {
            cmd.arg("--ocr_version").arg(version.as_arg());
        }
        match self.options.device {
            Device::Gpu => {
                cmd.arg("--device").arg("gpu:0");
            }
            Device::Cpu => {
                cmd.arg("--device").arg("cpu");
            }
            Device::Auto => {}
        }
        if self.options.enable_hpi {
            cmd.arg("--enable_hpi").arg("True");
        }
        apply_env(&mut cmd, self.options.device);

        let output = cmd
            .output()
            .with_context(|| "failed to run paddleocr (is it installed?)")?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(anyhow!("paddleocr failed: {}", stderr.trim()));
        }

        collect_page_results(save_dir.path())
    }
}

fn flag(value: bool) -> &'static str {
    if value { "True" } else { "False" }
}

fn probe_engine() -> Result<()> {
    let output = Command::new(ENGINE_PROGRAM)
        .arg("--version")
        .output()
        .with_context(|| "failed to run paddleocr (is it installed?)")?;
    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(anyhow!("paddleocr --version failed: {}", stderr.trim()));
    }
    Ok(())
}

// The model-source check is skipped unless the caller asked for it;
// CUDA_VISIBLE_DEVICES empty forces CPU, a device index selects a GPU.
fn apply_env(cmd: &mut Command, device: Device) {
    if std::env::var_os(MODEL_SOURCE_CHECK_ENV).is_none() {
        cmd.env(MODEL_SOURCE_CHECK_ENV, "True");
    }
    match device {
        Device::Gpu => {
            if std::env::var_os(VISIBLE_DEVICES_ENV).is_none() {
                cmd.env(VISIBLE_DEVICES_ENV, "0");
            }
        }
        Device::Cpu => {
            cmd.env(VISIBLE_DEVICES_ENV, "");
        }
        Device::Auto => {}
    }
}

fn collect_page_results(dir: &Path) -> Result<Vec<PageResult>> {
    let mut paths: Vec<PathBuf> = fs::read_dir(dir)
        .with_context(|| format!("failed to list result directory: {}", dir.display()))?
        .filter_map(|entry| entry.ok().map(|entry| entry.path()))
        .filter(|path| path.extension().and_then(|ext| ext.to_str()) == Some("json"))
        .collect();
    paths.sort();

    let mut pages = Vec::new();
    for path in paths {
        let raw = fs::read_to_string(&path)
            .with_context(|| format!("failed to read result file: {}", path.display()))?;
        let value: Value = serde_json::from_str(&raw)
            .with_context(|| format!("failed to parse result file: {}", path.display()))?;
        pages.push(parse_page_result(&value));
    }
    Ok(pages)
}

/// Probes for a visible NVIDIA device. The engine makes its own choice
/// when the probe is wrong; this only steers the default.
pub fn detect_device() -> Device {
    match Command::new("nvidia-smi").arg("-L").output() {
        Ok(output) if output.status.success() && !output.stdout.is_empty() => Device::Gpu,
        _ => Device::Cpu,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineErrorKind {
    GpuFailure,
    MissingHpiDeps,
    Other,
}

/// Substring heuristics over the engine's error text. The subprocess
/// boundary only yields text, so a typed classification is not available;
/// known brittleness.
pub fn classify_engine_error(error: &anyhow::Error) -> EngineErrorKind {
    let text = format!("{error:#}").to_lowercase();
    if text.contains("hpi") {
        return EngineErrorKind::MissingHpiDeps;
    }
    if text.contains("cuda") || text.contains("gpu") || text.contains("device") {
        return EngineErrorKind::GpuFailure;
    }
    EngineErrorKind::Other
}

fn decorate_hpi_error(error: anyhow::Error, enable_hpi: bool) -> anyhow::Error {
    if enable_hpi && classify_engine_error(&error) == EngineErrorKind::MissingHpiDeps {
        return error.context(
            "high-performance inference requested but its dependencies are not installed; \
             run `paddleocr install_hpi_deps cpu` (CPU) or `paddleocr install_hpi_deps gpu` (GPU) first",
        );
    }
    error
}

/// One-shot recognition for the CLI. A GPU-classified failure gets exactly
/// one CPU retry with the GPU options stripped; everything else surfaces
/// unchanged.
pub fn run_cli_recognition(options: EngineOptions, image: &Path) -> Result<Vec<PageResult>> {
    let enable_hpi = options.enable_hpi;
    let gpu_requested = options.device == Device::Gpu;

    let attempt =
        PaddleCliEngine::new(options.clone()).and_then(|engine| engine.recognize(image));
    match attempt {
        Ok(pages) => Ok(pages),
        Err(err)
            if gpu_requested && classify_engine_error(&err) == EngineErrorKind::GpuFailure =>
        {
            warn!("GPU initialization failed, falling back to CPU: {err:#}");
            let mut cpu_options = options;
            cpu_options.device = Device::Cpu;
            PaddleCliEngine::new(cpu_options)
                .and_then(|engine| engine.recognize(image))
                .map_err(|cpu_err| decorate_hpi_error(cpu_err, enable_hpi))
        }
        Err(err) => Err(decorate_hpi_error(err, enable_hpi)),
    }
}

type EngineFactory = Box<dyn Fn(&str) -> Result<Box<dyn OcrEngine>>>;

/// Per-language engine cache owned by the request-handling context. An
/// engine is built lazily on the first request for its language and never
/// evicted. Single-threaded use only; the server loop handles one request
/// at a time.
pub struct EngineCache {
    factory: EngineFactory,
    engines: HashMap<String, Box<dyn OcrEngine>>,
}

impl EngineCache {
    pub fn new(factory: EngineFactory) -> Self {
        Self {
            factory,
            engines: HashMap::new(),
        }
    }

    pub fn with_default_factory() -> Self {
        Self::new(Box::new(|language| {
            let engine = PaddleCliEngine::new(EngineOptions::for_language(language))?;
            Ok(Box::new(engine) as Box<dyn OcrEngine>)
        }))
    }

    pub fn get(&mut self, language: &str) -> Result<&dyn OcrEngine> {
        let key = normalize_language(language);
        let engine = match self.engines.entry(key) {
            Entry::Occupied(entry) => entry.into_mut(),
            Entry::Vacant(entry) => {
                let engine = (self.factory)(entry.key())?;
                entry.insert(engine)
            }
        };
        Ok(&**engine)
    }
}
