use anyhow::{Result, anyhow};
use std::path::PathBuf;

pub mod engine;
pub mod geometry;
pub mod logging;
pub mod markdown;
pub mod mcp;
pub mod pipeline;
pub mod preprocess;
pub mod recognition;
pub mod snapshot;

pub use engine::{Device, EngineCache, EngineOptions, OcrEngine, OcrVersion};
pub use recognition::{PageResult, RecognitionUnit};

#[derive(Debug, Clone)]
pub struct Config {
    pub image: Option<PathBuf>,
    pub output: Option<PathBuf>,
    pub fast: bool,
    /// None auto-detects a GPU and falls back to CPU.
    pub use_gpu: Option<bool>,
    pub ocr_version: Option<OcrVersion>,
    pub max_size: Option<u32>,
    pub enable_hpi: bool,
    pub verbose: bool,
}

/// One-shot CLI conversion. Returns the confirmation message the binary
/// prints on success.
pub async fn run(config: Config) -> Result<String> {
    let image = config.image.ok_or_else(|| anyhow!("no input image given"))?;
    let request = pipeline::CliRequest {
        image,
        output: config.output,
        fast: config.fast,
        use_gpu: config.use_gpu,
        ocr_version: config.ocr_version,
        max_size: config.max_size,
        enable_hpi: config.enable_hpi,
    };
    let output = pipeline::run_cli(&request)?;

    let mut message = String::new();
    if config.enable_hpi {
        message.push_str("Note: High-Performance Inference (HPI) enabled.\n");
    }
    message.push_str(&format!("OCR completed. Output saved to: {}", output.display()));
    Ok(message)
}
