//! Tesseract OCR engine.

use std::{ffi::OsString, sync::LazyLock};

use image::ImageFormat;
use regex::Regex;
use tokio::process::Command;

use crate::{
    async_utils::{check_for_command_failure, spawn_blocking_propagating_panics},
    prelude::*,
};

use super::{OcrEngine, OcrImageInput, OcrSettings};

/// Lines on standard error which mean that `tesseract` failed, even if it
/// exited successfully.
static ERROR_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^\s*(error|failed loading language|tesseract couldn't load)")
        .expect("failed to compile regex")
});

/// Leptonica chatter that looks like an error but isn't fatal.
static DOWNGRADE_TO_WARNING_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^\s*error in pix").expect("failed to compile regex")
});

/// Does this line of `tesseract` output contain an error?
fn is_error_line(line: &str) -> bool {
    ERROR_REGEX.is_match(line) && !DOWNGRADE_TO_WARNING_REGEX.is_match(line)
}

/// OCR engine wrapping the `tesseract` CLI tool.
#[derive(Clone, Debug)]
pub struct TesseractOcrEngine {
    /// The `tesseract` executable.
    program: OsString,
    settings: OcrSettings,
}

impl TesseractOcrEngine {
    /// Create a new `tesseract` engine.
    pub fn new(program: impl Into<OsString>, settings: OcrSettings) -> Self {
        Self {
            program: program.into(),
            settings,
        }
    }
}

#[async_trait]
impl OcrEngine for TesseractOcrEngine {
    #[instrument(level = "debug", skip_all, fields(page = %input.page_idx, image = %input.image_idx))]
    async fn recognize(&self, input: OcrImageInput) -> Result<String> {
        // Write our input to a temporary file.
        let tmpdir = tempfile::TempDir::with_prefix("tesseract")?;
        let input_path = tmpdir.path().join("input.png");
        let output_base = tmpdir.path().join("output");
        let image = input.image;
        let png_path = input_path.clone();
        spawn_blocking_propagating_panics(move || {
            image.save_with_format(&png_path, ImageFormat::Png)
        })
        .await
        .context("cannot write tesseract input file")?;

        // Run tesseract on the input file. If our task is dropped, because
        // the run failed or was cancelled, the child goes with it.
        let output = Command::new(&self.program)
            .arg(&input_path)
            .arg(&output_base)
            .args(self.settings.tesseract_args())
            .kill_on_drop(true)
            .output()
            .await
            .with_context(|| format!("cannot run {:?}", self.program))?;
        check_for_command_failure("tesseract", &output, Some(&is_error_line))?;

        // Read the output file. Tesseract ends each page with a form feed,
        // which we don't want in our text.
        let text = tokio::fs::read_to_string(output_base.with_extension("txt"))
            .await
            .context("cannot read tesseract output file")?;
        Ok(text.trim_end_matches('\u{c}').to_owned())
    }
}
