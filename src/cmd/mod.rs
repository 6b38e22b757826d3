//! Command-line entry points.

use std::{ffi::OsString, sync::Arc, time::Duration};

use clap::Args;

use crate::{
    cpu_limit::{MAX_WORKERS, default_worker_count},
    ocr::{OcrEngine, OcrSettings, tesseract::TesseractOcrEngine},
    pipeline::{AggregationOrder, ExtractOptions, ImageErrorPolicy},
    prelude::*,
};

pub mod extract;
pub mod serve;

/// Options shared by every subcommand that runs the extraction pipeline.
#[derive(Debug, Clone, Args)]
pub struct PipelineOpts {
    /// Max number of pages to process at a time. Defaults to the number of
    /// CPUs. Never more than 4.
    #[clap(short = 'j', long = "jobs")]
    job_count: Option<usize>,

    #[clap(flatten)]
    ocr: OcrSettings,

    /// The `tesseract` executable to run.
    #[clap(long, default_value = "tesseract", env = "TESSERACT")]
    tesseract: OsString,

    /// The order in which page texts are written.
    #[clap(long, value_enum, default_value_t)]
    order: AggregationOrder,

    /// What to do with an image that can't be decoded or recognized.
    #[clap(long, value_enum, default_value_t)]
    on_image_error: ImageErrorPolicy,

    /// Fail any page that takes longer than this many seconds.
    #[clap(long, value_name = "SECS")]
    page_timeout: Option<f64>,
}

impl PipelineOpts {
    /// Build pipeline options from our command-line options.
    pub fn to_extract_options(&self) -> Result<ExtractOptions> {
        let page_timeout = self
            .page_timeout
            .map(Duration::try_from_secs_f64)
            .transpose()
            .context("invalid --page-timeout")?;
        let requested = self.job_count.unwrap_or_else(default_worker_count);
        let jobs = requested.clamp(1, MAX_WORKERS);
        if jobs != requested {
            warn!(requested, jobs, "Adjusting --jobs to the supported range");
        }
        Ok(ExtractOptions {
            jobs,
            order: self.order,
            on_image_error: self.on_image_error,
            page_timeout,
        })
    }

    /// Build the OCR engine these options describe.
    pub fn ocr_engine(&self) -> Arc<dyn OcrEngine> {
        Arc::new(TesseractOcrEngine::new(
            self.tesseract.clone(),
            self.ocr.clone(),
        ))
    }
}
