//! Scan command - run a single local PDF through extraction and classification.

use std::fs;
use std::path::PathBuf;

use clap::Args;
use console::style;
use serde::Serialize;
use tracing::info;

use slips_core::pdf::{ExtractedImage, ImageEncoding, ImageExtractor};
use slips_core::{NameFormatter, ReceiptClassifier, ReceiptRecord};

use super::{load_config, open_classifier};

/// Arguments for the scan command.
#[derive(Args)]
pub struct ScanArgs {
    /// Input PDF
    #[arg(required = true)]
    input: PathBuf,

    /// Only extract the image, do not classify
    #[arg(long)]
    extract_only: bool,

    /// Write the extracted image to this path
    #[arg(long, value_name = "PATH")]
    save_image: Option<PathBuf>,

    /// Output format
    #[arg(short, long, value_enum, default_value = "text")]
    format: OutputFormat,
}

#[derive(Clone, Copy, Debug, clap::ValueEnum)]
pub enum OutputFormat {
    /// JSON output
    Json,
    /// Plain text summary
    Text,
}

#[derive(Debug, Serialize)]
struct ImageInfo {
    encoding: ImageEncoding,
    width: u32,
    height: u32,
    bytes: usize,
}

impl From<&ExtractedImage> for ImageInfo {
    fn from(image: &ExtractedImage) -> Self {
        Self {
            encoding: image.encoding,
            width: image.width,
            height: image.height,
            bytes: image.data.len(),
        }
    }
}

#[derive(Debug, Serialize)]
struct ScanOutput {
    file: String,
    image: ImageInfo,
    #[serde(skip_serializing_if = "Option::is_none")]
    record: Option<ReceiptRecord>,
    #[serde(skip_serializing_if = "Option::is_none")]
    file_name: Option<String>,
}

pub async fn run(args: ScanArgs, config_path: Option<&str>) -> anyhow::Result<()> {
    if !args.input.exists() {
        anyhow::bail!("Input file not found: {}", args.input.display());
    }

    info!("Scanning {}", args.input.display());
    let document = fs::read(&args.input)?;
    let image = ImageExtractor::new()
        .extract(&document)
        .map_err(|e| anyhow::anyhow!("{}: {}", args.input.display(), e))?;

    if let Some(path) = &args.save_image {
        fs::write(path, &image.data)?;
        eprintln!(
            "{} Image written to {}",
            style("✓").green(),
            path.display()
        );
    }

    let mut output = ScanOutput {
        file: args.input.display().to_string(),
        image: ImageInfo::from(&image),
        record: None,
        file_name: None,
    };

    if !args.extract_only {
        let config = load_config(config_path)?;
        let classifier = ReceiptClassifier::new(open_classifier(&config)?)
            .with_timeout(config.classifier.timeout());

        let record = classifier.classify(&image).await?;
        output.file_name = Some(NameFormatter::new().format(&record, image.encoding)?);
        output.record = Some(record);
    }

    match args.format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&output)?),
        OutputFormat::Text => print!("{}", format_text(&output)),
    }

    Ok(())
}

fn format_text(output: &ScanOutput) -> String {
    let mut text = String::new();

    text.push_str(&format!("File: {}\n", output.file));
    text.push_str(&format!(
        "Image: {} {}x{} ({} bytes)\n",
        output.image.encoding, output.image.width, output.image.height, output.image.bytes
    ));

    if let Some(record) = &output.record {
        text.push('\n');
        text.push_str(&format!("Merchant: {}\n", record.merchant));
        text.push_str(&format!("Date:     {}\n", record.date));
        text.push_str(&format!("Total:    {} {}\n", record.source_total, record.currency.code()));
        if record.total != record.source_total {
            text.push_str(&format!("          {} ZAR\n", record.total));
        }
    }
    if let Some(file_name) = &output.file_name {
        text.push_str(&format!("\nName: {}\n", file_name));
    }

    text
}
