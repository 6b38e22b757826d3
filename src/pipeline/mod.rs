//! The extraction pipeline: load a PDF, OCR every page in parallel, and write
//! the combined text to a file.

use std::{
    sync::Arc,
    time::{Duration, Instant},
};

use clap::ValueEnum;
use indicatif::ProgressBar;
use serde::Serialize;

use self::{
    dispatch::{DispatchSettings, dispatch_pages},
    output::{join_pages, write_output},
};
use crate::{
    async_utils::spawn_blocking_propagating_panics, cpu_limit::default_worker_count,
    errors::ExtractError, ocr::OcrEngine, pdf::PdfDocument, prelude::*,
};

pub mod dispatch;
pub mod output;
pub mod worker;

/// The order in which page texts appear in the output.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum AggregationOrder {
    /// The order in which pages finished. Varies from run to run.
    #[default]
    Completion,
    /// Document page order.
    Page,
}

/// What to do about an image that can't be decoded or recognized.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum ImageErrorPolicy {
    /// Fail the whole run.
    #[default]
    Abort,
    /// Put a marker in the text in place of the image, and keep going.
    Marker,
}

/// Options for one extraction run.
#[derive(Clone, Debug)]
pub struct ExtractOptions {
    /// Maximum number of pages processed at once.
    pub jobs: usize,
    pub order: AggregationOrder,
    pub on_image_error: ImageErrorPolicy,
    /// Give up on any page that takes longer than this.
    pub page_timeout: Option<Duration>,
}

impl Default for ExtractOptions {
    fn default() -> Self {
        Self {
            jobs: default_worker_count(),
            order: AggregationOrder::default(),
            on_image_error: ImageErrorPolicy::default(),
            page_timeout: None,
        }
    }
}

/// The text of one page.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PageText {
    pub page_idx: usize,
    pub text: String,
}

/// What happened during a successful run.
#[derive(Clone, Debug)]
pub struct ExtractionReport {
    pub output_path: PathBuf,
    pub page_count: usize,
    /// Page indices in the order they finished.
    pub completion_order: Vec<usize>,
    /// Time spent processing pages and writing output. Loading the document
    /// isn't counted.
    pub elapsed: Duration,
}

/// Extract the text of every image in `pdf_bytes` and write it to
/// `output_path`.
///
/// Nothing is written unless every page succeeds. `progress` has its length
/// set to the page count and advances once per finished page.
#[instrument(level = "info", skip_all, fields(output = %output_path.display()))]
pub async fn extract_to_file(
    pdf_bytes: Vec<u8>,
    output_path: &Path,
    engine: Arc<dyn OcrEngine>,
    opts: &ExtractOptions,
    progress: &ProgressBar,
    cancel: impl Future<Output = ()>,
) -> Result<ExtractionReport, ExtractError> {
    let doc =
        spawn_blocking_propagating_panics(move || PdfDocument::from_bytes(&pdf_bytes)).await?;
    let page_count = doc.page_count();
    progress.set_length(page_count as u64);
    info!(page_count, jobs = opts.jobs, "Extracting text");

    let start = Instant::now();
    let settings = DispatchSettings {
        jobs: opts.jobs,
        on_image_error: opts.on_image_error,
        page_timeout: opts.page_timeout,
    };
    let mut pages = dispatch_pages(Arc::new(doc), engine, settings, progress, cancel).await?;
    let completion_order = pages.iter().map(|page| page.page_idx).collect::<Vec<_>>();
    if opts.order == AggregationOrder::Page {
        pages.sort_by_key(|page| page.page_idx);
    }
    write_output(output_path, &join_pages(&pages)).await?;
    let elapsed = start.elapsed();

    info!(elapsed_secs = elapsed.as_secs_f64(), "Wrote output");
    Ok(ExtractionReport {
        output_path: output_path.to_owned(),
        page_count,
        completion_order,
        elapsed,
    })
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use super::*;
    use crate::test_utils::{FakeOcrEngine, TestImage, build_pdf, pdf_with_one_image_per_page};

    async fn run(
        bytes: Vec<u8>,
        engine: Arc<FakeOcrEngine>,
        opts: &ExtractOptions,
    ) -> Result<(TempDir, PathBuf, Result<ExtractionReport, ExtractError>)> {
        let dir = TempDir::new()?;
        let path = dir.path().join("doc_extracted.txt");
        let pb = ProgressBar::hidden();
        let result =
            extract_to_file(bytes, &path, engine, opts, &pb, std::future::pending()).await;
        Ok((dir, path, result))
    }

    fn opts(jobs: usize, order: AggregationOrder) -> ExtractOptions {
        ExtractOptions {
            jobs,
            order,
            ..ExtractOptions::default()
        }
    }

    #[tokio::test]
    async fn imageless_pages_produce_separators_only() -> Result<()> {
        let bytes = build_pdf(&[vec![], vec![], vec![]]);
        let engine = FakeOcrEngine::new().into_arc();
        let (_dir, path, result) = run(bytes, engine.clone(), &ExtractOptions::default()).await?;
        let report = result?;
        assert_eq!(report.page_count, 3);
        assert_eq!(std::fs::read_to_string(&path)?, "\n\n");
        assert_eq!(engine.call_count(), 0);
        Ok(())
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn output_follows_completion_order_by_default() -> Result<()> {
        let engine = FakeOcrEngine::new()
            .with_delay(0, Duration::from_millis(400))
            .with_delay(1, Duration::from_millis(200))
            .into_arc();
        let bytes = pdf_with_one_image_per_page(3);
        let (_dir, path, result) = run(bytes, engine, &opts(3, AggregationOrder::Completion)).await?;
        let report = result?;
        assert_eq!(report.completion_order, [2, 1, 0]);
        assert_eq!(
            std::fs::read_to_string(&path)?,
            "page 2 image 0\npage 1 image 0\npage 0 image 0"
        );
        Ok(())
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn page_order_is_stable_across_runs() -> Result<()> {
        let mut outputs = vec![];
        for jobs in [1, 4] {
            let engine = FakeOcrEngine::new()
                .with_delay(0, Duration::from_millis(100))
                .into_arc();
            let bytes = pdf_with_one_image_per_page(6);
            let (_dir, path, result) = run(bytes, engine, &opts(jobs, AggregationOrder::Page)).await?;
            result?;
            outputs.push(std::fs::read(&path)?);
        }
        assert_eq!(outputs[0], outputs[1]);
        assert!(String::from_utf8(outputs[0].clone())?.starts_with("page 0 image 0\npage 1"));
        Ok(())
    }

    #[tokio::test]
    async fn failed_runs_write_nothing() -> Result<()> {
        let bytes = build_pdf(&[vec![TestImage::gray(4, 4, 0)], vec![TestImage::CorruptJpeg]]);
        let engine = FakeOcrEngine::new().into_arc();
        let (_dir, path, result) = run(bytes, engine, &ExtractOptions::default()).await?;
        assert!(matches!(result, Err(ExtractError::ImageDecode { page_idx: 1, .. })));
        assert!(!path.exists());
        Ok(())
    }

    #[tokio::test]
    async fn marker_policy_keeps_going() -> Result<()> {
        let bytes = build_pdf(&[vec![TestImage::CorruptJpeg], vec![TestImage::gray(4, 4, 0)]]);
        let engine = FakeOcrEngine::new().into_arc();
        let opts = ExtractOptions {
            on_image_error: ImageErrorPolicy::Marker,
            ..opts(1, AggregationOrder::Page)
        };
        let (_dir, path, result) = run(bytes, engine, &opts).await?;
        result?;
        assert_eq!(
            std::fs::read_to_string(&path)?,
            format!("{}\npage 1 image 0", worker::IMAGE_FAILURE_MARKER)
        );
        Ok(())
    }

    #[tokio::test]
    async fn unparseable_input_never_reaches_the_engine() -> Result<()> {
        let engine = FakeOcrEngine::new().into_arc();
        let bytes = b"%PDF-1.7\nthis is not really a PDF".to_vec();
        let (_dir, path, result) = run(bytes, engine.clone(), &ExtractOptions::default()).await?;
        let err = result.unwrap_err();
        assert!(err.is_bad_input());
        assert!(!path.exists());
        assert_eq!(engine.call_count(), 0);
        Ok(())
    }

    #[tokio::test]
    async fn progress_bar_tracks_pages() -> Result<()> {
        let dir = TempDir::new()?;
        let path = dir.path().join("out.txt");
        let pb = ProgressBar::hidden();
        let engine = FakeOcrEngine::new().into_arc();
        extract_to_file(
            pdf_with_one_image_per_page(4),
            &path,
            engine,
            &ExtractOptions::default(),
            &pb,
            std::future::pending(),
        )
        .await?;
        assert_eq!(pb.length(), Some(4));
        assert_eq!(pb.position(), 4);
        Ok(())
    }
}
