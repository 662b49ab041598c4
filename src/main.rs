use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;

use paddleocr_cli::OcrVersion;

#[derive(Parser, Debug)]
#[command(
    name = "paddleocr-cli",
    version,
    about = "Convert images to markdown with PaddleOCR"
)]
struct Cli {
    /// Path to the input image file
    #[arg(value_name = "IMAGE", required_unless_present = "serve")]
    image: Option<PathBuf>,

    /// Output markdown file path (default: <image>.md)
    #[arg(short = 'o', long = "output")]
    output: Option<PathBuf>,

    /// Disable fast mode (enables textline orientation handling for rotated text)
    #[arg(long = "no-fast", action = clap::ArgAction::SetFalse)]
    fast: bool,

    /// Force CPU mode (default: auto-detect GPU, fall back to CPU)
    #[arg(long = "cpu", conflicts_with = "gpu")]
    cpu: bool,

    /// Force GPU mode; retries once on CPU if GPU initialization fails
    #[arg(long = "gpu")]
    gpu: bool,

    /// OCR version: PP-OCRv4 (faster, default) or PP-OCRv5 (better accuracy)
    #[arg(long = "ocr-version", value_parser = parse_ocr_version)]
    ocr_version: Option<OcrVersion>,

    /// Maximum image side length for text detection (e.g. 960, 640)
    #[arg(long = "max-size", value_name = "PIXELS")]
    max_size: Option<u32>,

    /// Enable high-performance inference (requires `paddleocr install_hpi_deps`)
    #[arg(long = "hpi")]
    hpi: bool,

    /// Run the MCP tool server on stdio instead of converting one image
    #[arg(long = "serve")]
    serve: bool,

    /// Enable verbose logging
    #[arg(long = "verbose")]
    verbose: bool,
}

fn parse_ocr_version(value: &str) -> Result<OcrVersion, String> {
    OcrVersion::parse(value).ok_or_else(|| format!("expected PP-OCRv4 or PP-OCRv5, got {value}"))
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    paddleocr_cli::logging::init(cli.verbose)?;
    if cli.serve {
        return paddleocr_cli::mcp::run_server().await;
    }

    let output = paddleocr_cli::run(paddleocr_cli::Config {
        image: cli.image,
        output: cli.output,
        fast: cli.fast,
        use_gpu: if cli.cpu {
            Some(false)
        } else if cli.gpu {
            Some(true)
        } else {
            None
        },
        ocr_version: cli.ocr_version,
        max_size: cli.max_size,
        enable_hpi: cli.hpi,
        verbose: cli.verbose,
    })
    .await?;

    println!("{}", output);
    Ok(())
}
