//! Fanning pages out to workers and collecting their text.
//!
//! Every page gets its own task, spawned up front. The [`WorkerPool`] decides
//! how many of them actually run. Each task reports its page index on a
//! progress channel once its result is final, and we use those reports to
//! decide which handle to collect next. This gives us results in completion
//! order without polling.

use std::{sync::Arc, time::Duration};

use indicatif::ProgressBar;
use tokio::{sync::mpsc, task::JoinHandle};

use super::{ImageErrorPolicy, PageText, worker::extract_page};
use crate::{
    cpu_limit::WorkerPool, errors::ExtractError, ocr::OcrEngine, pdf::PdfDocument,
    prelude::*,
};

type PageHandle = JoinHandle<Result<String, ExtractError>>;

/// Per-run settings for [`dispatch_pages`].
#[derive(Clone, Copy, Debug)]
pub struct DispatchSettings {
    pub jobs: usize,
    pub on_image_error: ImageErrorPolicy,
    pub page_timeout: Option<Duration>,
}

/// Process every page of `doc` and return the page texts in the order the
/// pages finished.
///
/// The first failing page aborts the remaining work and its error is
/// returned. If `cancel` completes first, everything is aborted and we return
/// [`ExtractError::Cancelled`].
#[instrument(level = "debug", skip_all, fields(page_count = doc.page_count(), jobs = settings.jobs))]
pub async fn dispatch_pages(
    doc: Arc<PdfDocument>,
    engine: Arc<dyn OcrEngine>,
    settings: DispatchSettings,
    progress: &ProgressBar,
    cancel: impl Future<Output = ()>,
) -> Result<Vec<PageText>, ExtractError> {
    let page_count = doc.page_count();
    let pool = WorkerPool::new(settings.jobs);
    debug!(workers = pool.size(), "Dispatching pages");
    let (progress_tx, mut progress_rx) = mpsc::unbounded_channel::<usize>();

    let handles = (0..page_count)
        .map(|page_idx| {
            let doc = doc.clone();
            let engine = engine.clone();
            let pool = pool.clone();
            let progress_tx = progress_tx.clone();
            Some(tokio::spawn(async move {
                let result = pool
                    .run(|| run_page(doc, page_idx, engine, settings))
                    .await
                    // The pool is only closed when we're shutting down.
                    .unwrap_or(Err(ExtractError::Cancelled));
                // Nobody is listening if the run already failed.
                let _ = progress_tx.send(page_idx);
                result
            }))
        })
        .collect::<Vec<Option<PageHandle>>>();
    // Only the workers hold senders now, so the channel closes when the last
    // of them exits.
    drop(progress_tx);
    let mut tasks = PageTasks { pool, handles };

    tokio::pin!(cancel);
    let mut pages = Vec::with_capacity(page_count);
    while pages.len() < page_count {
        let next = tokio::select! {
            biased;
            _ = &mut cancel => {
                warn!("Cancelling extraction");
                return Err(ExtractError::Cancelled);
            }
            next = progress_rx.recv() => next,
        };
        let Some(page_idx) = next else {
            // Every worker has exited, but some never reported.
            return Err(tasks.find_lost_worker().await);
        };
        let Some(handle) = tasks.handles.get_mut(page_idx).and_then(Option::take) else {
            warn!(page = page_idx, "Ignoring duplicate completion report");
            continue;
        };

        let completed = pages.len() + 1;
        progress.inc(1);
        progress.set_message(format!("Processing page {}/{}", page_idx + 1, page_count));

        let result = tokio::select! {
            biased;
            _ = &mut cancel => {
                warn!("Cancelling extraction");
                return Err(ExtractError::Cancelled);
            }
            result = handle => result,
        };
        match result {
            Ok(Ok(text)) => {
                debug!(page = page_idx, completed, "Page finished");
                pages.push(PageText { page_idx, text });
            }
            Ok(Err(err)) => {
                error!(page = page_idx, "Page failed: {}", err);
                return Err(err);
            }
            Err(join_err) => {
                return Err(if join_err.is_panic() {
                    ExtractError::WorkerPanicked { page_idx }
                } else {
                    ExtractError::Cancelled
                });
            }
        }
    }
    Ok(pages)
}

/// Run one page, holding a pool slot, with an optional time limit.
async fn run_page(
    doc: Arc<PdfDocument>,
    page_idx: usize,
    engine: Arc<dyn OcrEngine>,
    settings: DispatchSettings,
) -> Result<String, ExtractError> {
    let work = extract_page(doc, page_idx, engine, settings.on_image_error);
    match settings.page_timeout {
        Some(timeout) => tokio::time::timeout(timeout, work)
            .await
            .unwrap_or(Err(ExtractError::PageTimeout { page_idx, timeout })),
        None => work.await,
    }
}

/// The page tasks of one run, indexed by page. Handles are taken as pages
/// are collected.
///
/// Dropping this closes the pool and aborts every task still held, however
/// the run ends. That includes the caller dropping our future, as axum does
/// when a client disconnects. Aborted tasks drop their `tesseract` children,
/// which kills them.
struct PageTasks {
    pool: WorkerPool,
    handles: Vec<Option<PageHandle>>,
}

impl PageTasks {
    /// Figure out why a worker exited without reporting progress.
    async fn find_lost_worker(&mut self) -> ExtractError {
        let pending = self
            .handles
            .iter()
            .position(Option::is_some)
            .unwrap_or_default();
        for (page_idx, slot) in self.handles.iter_mut().enumerate() {
            if let Some(handle) = slot.take() {
                match handle.await {
                    Ok(Ok(_)) => {}
                    Ok(Err(err)) => return err,
                    Err(_) => return ExtractError::WorkerPanicked { page_idx },
                }
            }
        }
        ExtractError::WorkerPanicked { page_idx: pending }
    }
}

impl Drop for PageTasks {
    fn drop(&mut self) {
        // Stop queued workers from starting, and abort the running ones.
        self.pool.close();
        for handle in self.handles.iter().flatten() {
            handle.abort();
        }
    }
}
