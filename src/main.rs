use std::str::FromStr;

use clap::{Parser, Subcommand};
use tracing_subscriber::{
    EnvFilter, Layer as _, filter::Directive, fmt::format::FmtSpan, layer::SubscriberExt,
    util::SubscriberInitExt as _,
};

use self::{prelude::*, ui::Ui};

mod async_utils;
mod cmd;
mod cpu_limit;
mod errors;
mod ocr;
mod pdf;
mod pipeline;
mod prelude;
mod server;
#[cfg(test)]
mod test_utils;
mod ui;

/// OCR the images embedded in a PDF into a plain text file.
#[derive(Debug, Parser)]
#[clap(
    version,
    author,
    after_help = r#"
Environment Variables:
  - RUST_LOG (optional): Log filter, such as `debug` or
    `pdf_image_ocr=trace`. Defaults to `info`.
  - TESSERACT (optional): The `tesseract` executable to run.
  - PDF_IMAGE_OCR_LISTEN (optional): Address for `serve`.

  These variables may be set in a standard `.env` file.

  Recognition uses `tesseract`, which must be installed along
  with data for the chosen language (`hin` by default).
"#
)]
struct Opts {
    #[clap(subcommand)]
    subcmd: Cmd,
}

/// The subcommands we support.
#[derive(Debug, Subcommand)]
enum Cmd {
    /// Extract the text of every image in a PDF to a text file.
    Extract(cmd::extract::ExtractOpts),
    /// Serve an upload form that extracts text from PDFs.
    Serve(cmd::serve::ServeOpts),
}

/// Our entry point, which can return an error. [`anyhow::Result`] will
/// automatically print a nice error message with optional backtrace.
#[tokio::main]
async fn main() -> Result<()> {
    let ui = Ui::init();

    // Initialize tracing.
    let directive =
        Directive::from_str("info").expect("built-in directive should be valid");
    let env_filter = EnvFilter::builder()
        .with_default_directive(directive)
        .from_env_lossy();

    let subscriber = tracing_subscriber::fmt::layer()
        .with_span_events(FmtSpan::NEW | FmtSpan::CLOSE)
        .with_writer(ui.get_stderr_writer())
        .with_filter(env_filter);
    tracing_subscriber::registry().with(subscriber).init();

    real_main(ui).await
}

/// Our real entry point, once logging is set up.
#[instrument(level = "debug", name = "main", skip_all)]
async fn real_main(ui: Ui) -> Result<()> {
    // Load environment variables from a `.env` file, if it exists. This must
    // happen before parsing, because some options read the environment.
    dotenvy::dotenv().ok();

    let opts = Opts::parse();
    debug!("Parsed options: {:?}", opts);

    match &opts.subcmd {
        Cmd::Extract(extract_opts) => cmd::extract::cmd_extract(ui, extract_opts).await,
        Cmd::Serve(serve_opts) => cmd::serve::cmd_serve(ui, serve_opts).await,
    }
}
