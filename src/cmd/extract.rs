//! The `extract` subcommand.

use clap::Args;

use super::PipelineOpts;
use crate::{
    pipeline::{extract_to_file, output::output_file_name},
    prelude::*,
    ui::{ProgressConfig, Ui},
};

/// Options for the `extract` subcommand.
#[derive(Debug, Args)]
pub struct ExtractOpts {
    /// The PDF file to read.
    input_path: PathBuf,

    /// Where to write the extracted text. Defaults to `<input
    /// name>_extracted.txt` in the current directory.
    #[clap(short = 'o', long = "output")]
    output_path: Option<PathBuf>,

    #[clap(flatten)]
    pipeline: PipelineOpts,
}

/// Run the `extract` subcommand.
#[instrument(level = "debug", skip_all, fields(input = %opts.input_path.display()))]
pub async fn cmd_extract(ui: Ui, opts: &ExtractOpts) -> Result<()> {
    let extract_opts = opts.pipeline.to_extract_options()?;
    let output_path = match &opts.output_path {
        Some(path) => path.to_owned(),
        None => PathBuf::from(output_file_name(&opts.input_path.to_string_lossy())?),
    };

    let pdf_bytes = tokio::fs::read(&opts.input_path)
        .await
        .with_context(|| format!("cannot read {}", opts.input_path.display()))?;

    let pb = ui.new_progress_bar(
        &ProgressConfig {
            emoji: "📄",
            msg: "Extracting text",
            done_msg: "Extracted text",
        },
        0,
    );

    let result = extract_to_file(
        pdf_bytes,
        &output_path,
        opts.pipeline.ocr_engine(),
        &extract_opts,
        &pb,
        interrupted(),
    )
    .await;
    let report = match result {
        Ok(report) => {
            pb.finish_using_style();
            report
        }
        Err(err) => {
            pb.abandon_with_message("Extraction failed");
            return Err(anyhow::Error::new(err).context(format!(
                "cannot extract text from {}",
                opts.input_path.display()
            )));
        }
    };

    debug!(order = ?report.completion_order, "Pages finished");
    println!(
        "Extracted text from {} pages in {:.2} seconds: {}",
        report.page_count,
        report.elapsed.as_secs_f64(),
        report.output_path.display()
    );
    Ok(())
}

/// Resolves when the user presses Ctrl-C.
async fn interrupted() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        warn!("Cannot listen for Ctrl-C: {}", err);
        std::future::pending::<()>().await;
    }
}
