//! Errors produced by the extraction pipeline.
//!
//! The command and server layers work in terms of [`anyhow::Error`], but the
//! pipeline itself reports a closed set of failures so that callers can tell
//! a bad upload apart from a broken OCR install or a full disk.

use std::{io, path::PathBuf, time::Duration};

/// Something went wrong while extracting text from a PDF.
#[derive(Debug, thiserror::Error)]
pub enum ExtractError {
    /// The input is empty, is not a PDF, or could not be parsed.
    #[error("could not parse PDF document: {reason}")]
    DocumentParse { reason: String },

    /// An embedded image could not be decoded to a bitmap.
    #[error("could not decode image {} on page {}: {reason}", .image_idx + 1, .page_idx + 1)]
    ImageDecode {
        page_idx: usize,
        image_idx: usize,
        reason: String,
    },

    /// The OCR engine failed on an image.
    #[error("OCR failed for image {} on page {}: {reason}", .image_idx + 1, .page_idx + 1)]
    OcrEngine {
        page_idx: usize,
        image_idx: usize,
        reason: String,
    },

    /// The output file could not be written.
    #[error("could not write output file {path:?}")]
    FileWrite {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// A page did not finish within the configured timeout.
    #[error("page {} did not finish within {timeout:?}", .page_idx + 1)]
    PageTimeout { page_idx: usize, timeout: Duration },

    /// A page worker panicked before it could report a result.
    #[error("worker for page {} panicked", .page_idx + 1)]
    WorkerPanicked { page_idx: usize },

    /// The run was cancelled before every page finished.
    #[error("extraction cancelled")]
    Cancelled,
}

impl ExtractError {
    /// Build a [`ExtractError::DocumentParse`] from anything printable.
    pub fn document_parse(reason: impl std::fmt::Display) -> Self {
        Self::DocumentParse {
            reason: reason.to_string(),
        }
    }

    /// Is this the caller's fault (a bad input file), rather than ours?
    pub fn is_bad_input(&self) -> bool {
        matches!(self, Self::DocumentParse { .. })
    }
}
