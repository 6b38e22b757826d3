//! Assembling and writing the output text file.

use super::PageText;
use crate::{errors::ExtractError, prelude::*};

/// Appended to the input's base name to name the output file.
pub const OUTPUT_SUFFIX: &str = "_extracted.txt";

/// Placed between page texts. Pages with no text still get one.
pub const PAGE_SEPARATOR: &str = "\n";

/// Join page texts in the order given.
pub fn join_pages(pages: &[PageText]) -> String {
    pages
        .iter()
        .map(|page| page.text.as_str())
        .collect::<Vec<_>>()
        .join(PAGE_SEPARATOR)
}

/// Work out the output file name for an input file name. Any directories are
/// dropped, using either kind of slash, along with the last extension.
pub fn output_file_name(input_name: &str) -> Result<String> {
    let file_name = input_name.rsplit(['/', '\\']).next().unwrap_or(input_name);
    let base = match file_name.rfind('.') {
        Some(0) | None => file_name,
        Some(dot) => &file_name[..dot],
    };
    if base.is_empty() || base == "." || base == ".." {
        return Err(anyhow!(
            "cannot derive an output name from {:?}",
            input_name
        ));
    }
    Ok(format!("{}{}", base, OUTPUT_SUFFIX))
}

/// Write `text` to `path` as UTF-8, replacing any existing file.
#[instrument(level = "debug", skip(text), fields(len = text.len()))]
pub async fn write_output(path: &Path, text: &str) -> Result<(), ExtractError> {
    tokio::fs::write(path, text.as_bytes())
        .await
        .map_err(|source| ExtractError::FileWrite {
            path: path.to_owned(),
            source,
        })
}
