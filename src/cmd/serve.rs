//! The `serve` subcommand.

use std::{net::SocketAddr, sync::Arc};

use clap::Args;

use super::PipelineOpts;
use crate::{
    prelude::*,
    server::{self, AppState},
    ui::Ui,
};

/// Options for the `serve` subcommand.
#[derive(Debug, Args)]
pub struct ServeOpts {
    /// The address to listen on.
    #[clap(long, default_value = "127.0.0.1:8501", env = "PDF_IMAGE_OCR_LISTEN")]
    listen: SocketAddr,

    /// The largest upload we'll accept, in megabytes.
    #[clap(long, default_value_t = 200)]
    max_upload_mb: usize,

    #[clap(flatten)]
    pipeline: PipelineOpts,
}

/// Run the `serve` subcommand.
#[instrument(level = "debug", skip_all, fields(listen = %opts.listen))]
pub async fn cmd_serve(ui: Ui, opts: &ServeOpts) -> Result<()> {
    // Requests run concurrently, so a shared progress bar would be
    // meaningless.
    ui.hide_progress_bars();

    let state = AppState {
        engine: opts.pipeline.ocr_engine(),
        opts: Arc::new(opts.pipeline.to_extract_options()?),
    };
    let max_upload_bytes = opts
        .max_upload_mb
        .checked_mul(1024 * 1024)
        .ok_or_else(|| anyhow!("--max-upload-mb is too large"))?;
    server::serve(opts.listen, state, max_upload_bytes).await
}
