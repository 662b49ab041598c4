use anyhow::{Context, Result, anyhow};
use image::GenericImageView;
use std::ffi::OsString;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::info;

use crate::engine::{self, Device, EngineCache, EngineOptions, OcrVersion};
use crate::geometry::{CoordinateMap, Dimensions};
use crate::markdown;
use crate::preprocess::{self, MAX_IMAGE_SIZE};
use crate::recognition::PageResult;
use crate::snapshot;

const MARKDOWN_SUFFIX: &str = ".md";
const SNAPSHOT_SUFFIX: &str = ".snapshot.log";

#[derive(Debug, Clone)]
pub struct CliRequest {
    pub image: PathBuf,
    pub output: Option<PathBuf>,
    pub fast: bool,
    /// None auto-detects a GPU and falls back to CPU.
    pub use_gpu: Option<bool>,
    pub ocr_version: Option<OcrVersion>,
    pub max_size: Option<u32>,
    pub enable_hpi: bool,
}

#[derive(Debug)]
pub struct ServerOutcome {
    pub markdown_path: PathBuf,
    pub snapshot_path: PathBuf,
}

pub fn validate_image_path(path: &Path) -> Result<()> {
    if !path.exists() {
        return Err(anyhow!("Image file not found: {}", path.display()));
    }
    if !path.is_file() {
        return Err(anyhow!("Path is not a file: {}", path.display()));
    }
    Ok(())
}

/// CLI conversion: the engine reads the input directly and the --max-size
/// knob bounds detection inside the engine; no resampling happens here.
/// Only the first page is surfaced.
pub fn run_cli(request: &CliRequest) -> Result<PathBuf> {
    validate_image_path(&request.image)?;

    let device = match request.use_gpu {
        Some(true) => Device::Gpu,
        Some(false) => Device::Cpu,
        None => {
            let detected = engine::detect_device();
            match detected {
                Device::Gpu => info!("GPU detected, using GPU for inference"),
                _ => info!("GPU not available, falling back to CPU"),
            }
            detected
        }
    };
    let options = EngineOptions {
        language: engine::DEFAULT_LANGUAGE.to_string(),
        device,
        ocr_version: Some(request.ocr_version.unwrap_or(OcrVersion::PpOcrV4)),
        textline_orientation: !request.fast,
        det_limit_side_len: Some(request.max_size.unwrap_or(engine::DEFAULT_DET_LIMIT)),
        recognition_batch_size: None,
        enable_hpi: request.enable_hpi,
    };

    let pages = engine::run_cli_recognition(options, &request.image)
        .with_context(|| format!("error processing image {}", request.image.display()))?;
    let texts = collect_texts(pages.first().into_iter());

    let document = markdown::render(&request.image.display().to_string(), None, &texts);
    let output = request
        .output
        .clone()
        .unwrap_or_else(|| sibling_with_suffix(&request.image, MARKDOWN_SUFFIX));
    fs::write(&output, document)
        .with_context(|| format!("failed to write markdown: {}", output.display()))?;
    Ok(output)
}

/// Server request: preprocess to a temp JPEG, recognize through the
/// per-language cache, then write the Markdown and snapshot documents
/// next to the input. The temp file is removed whether or not the engine
/// succeeds.
pub fn run_server_request(
    image_path: &Path,
    language: &str,
    cache: &mut EngineCache,
) -> Result<ServerOutcome> {
    validate_image_path(image_path)?;

    let image = preprocess::load_image(image_path)?;
    let (width, height) = image.dimensions();
    let original = Dimensions { width, height };
    let prepared = preprocess::prepare(image, MAX_IMAGE_SIZE)?;
    let prepared_size = prepared.size();

    let engine = cache.get(language)?;
    let result = engine.recognize(prepared.path());
    drop(prepared);
    let pages = result
        .with_context(|| format!("error processing image {}", image_path.display()))?;

    let map = CoordinateMap::new(original, prepared_size);
    let texts = collect_texts(pages.iter());
    let document = markdown::render(&image_path.display().to_string(), Some(language), &texts);
    let markdown_path = sibling_with_suffix(image_path, MARKDOWN_SUFFIX);
    fs::write(&markdown_path, document)
        .with_context(|| format!("failed to write markdown: {}", markdown_path.display()))?;

    let root = snapshot::build(&pages, image_path, language, &map);
    let snapshot_document = snapshot::render(&root)?;
    let snapshot_path = sibling_with_suffix(image_path, SNAPSHOT_SUFFIX);
    fs::write(&snapshot_path, snapshot_document)
        .with_context(|| format!("failed to write snapshot: {}", snapshot_path.display()))?;

    Ok(ServerOutcome {
        markdown_path,
        snapshot_path,
    })
}

fn collect_texts<'a, I>(pages: I) -> Vec<String>
where
    I: Iterator<Item = &'a PageResult>,
{
    pages
        .flat_map(|page| page.units.iter())
        .map(|unit| unit.text.clone())
        .collect()
}

// Appends to the full file name, like "scan.png" -> "scan.png.md".
fn sibling_with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut name = OsString::from(path.as_os_str());
    name.push(suffix);
    PathBuf::from(name)
}
