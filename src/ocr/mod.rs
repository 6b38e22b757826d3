//! OCR engine interface.
//!
//! The pipeline only knows about [`OcrEngine`]. In production that's
//! [`tesseract::TesseractOcrEngine`], and tests substitute fakes.

use clap::Args;
use image::GrayImage;

use crate::prelude::*;

pub mod tesseract;

/// Default recognition language: Hindi (Devanagari script).
pub const DEFAULT_LANGUAGE: &str = "hin";

/// Default OCR engine mode: whatever the installed engine supports best.
pub const DEFAULT_ENGINE_MODE: u8 = 3;

/// Default page segmentation mode: a single uniform block of text.
pub const DEFAULT_PAGE_SEG_MODE: u8 = 6;

/// One image to recognize.
pub struct OcrImageInput {
    /// The index of the page the image came from.
    pub page_idx: usize,

    /// The index of the image within its page.
    pub image_idx: usize,

    /// The preprocessed image.
    pub image: GrayImage,
}

/// Interface to an OCR engine.
#[async_trait]
pub trait OcrEngine: Send + Sync + 'static {
    /// Recognize the text in a single image.
    async fn recognize(&self, input: OcrImageInput) -> Result<String>;
}

/// Recognition settings passed to the engine for every image.
#[derive(Args, Clone, Debug, PartialEq, Eq)]
pub struct OcrSettings {
    /// The language (and so the script) to recognize, as a Tesseract
    /// language code. Several may be joined with `+`.
    #[clap(long = "lang", default_value = DEFAULT_LANGUAGE)]
    pub language: String,

    /// Tesseract OCR engine mode.
    #[clap(long = "oem", default_value_t = DEFAULT_ENGINE_MODE)]
    pub engine_mode: u8,

    /// Tesseract page segmentation mode.
    #[clap(long = "psm", default_value_t = DEFAULT_PAGE_SEG_MODE)]
    pub page_seg_mode: u8,
}

impl Default for OcrSettings {
    fn default() -> Self {
        Self {
            language: DEFAULT_LANGUAGE.to_owned(),
            engine_mode: DEFAULT_ENGINE_MODE,
            page_seg_mode: DEFAULT_PAGE_SEG_MODE,
        }
    }
}

impl OcrSettings {
    /// Command-line arguments for `tesseract`.
    pub fn tesseract_args(&self) -> Vec<String> {
        vec![
            "-l".to_owned(),
            self.language.clone(),
            "--oem".to_owned(),
            self.engine_mode.to_string(),
            "--psm".to_owned(),
            self.page_seg_mode.to_string(),
        ]
    }
}
