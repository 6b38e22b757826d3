//! Turning one page into text.

use std::sync::Arc;

use image::GrayImage;

use super::ImageErrorPolicy;
use crate::{
    async_utils::spawn_blocking_propagating_panics,
    errors::ExtractError,
    ocr::{OcrEngine, OcrImageInput},
    pdf::PdfDocument,
    prelude::*,
};

/// Inserted in place of an image's text when [`ImageErrorPolicy::Marker`] is
/// in effect and the image could not be read.
pub const IMAGE_FAILURE_MARKER: &str = "**COULD_NOT_OCR_IMAGE**";

/// Extract the text of every image on a page.
///
/// Pages without images produce an empty string.
#[instrument(level = "debug", skip_all, fields(page = page_idx))]
pub async fn extract_page(
    doc: Arc<PdfDocument>,
    page_idx: usize,
    engine: Arc<dyn OcrEngine>,
    policy: ImageErrorPolicy,
) -> Result<String, ExtractError> {
    // Parsing resources and decoding pixels is slow, synchronous work.
    let images =
        spawn_blocking_propagating_panics(move || decode_page_images(&doc, page_idx))
            .await?;

    let mut text = String::new();
    for (image_idx, image) in images.into_iter().enumerate() {
        let recognized = match image {
            Ok(image) => engine
                .recognize(OcrImageInput {
                    page_idx,
                    image_idx,
                    image,
                })
                .await
                .map_err(|err| ExtractError::OcrEngine {
                    page_idx,
                    image_idx,
                    reason: format!("{:#}", err),
                }),
            Err(err) => Err(err),
        };
        match (recognized, policy) {
            (Ok(image_text), _) => text.push_str(&image_text),
            (Err(err), ImageErrorPolicy::Abort) => return Err(err),
            (Err(err), ImageErrorPolicy::Marker) => {
                warn!("Marking unreadable image: {}", err);
                text.push_str(IMAGE_FAILURE_MARKER);
            }
        }
        text.push('\n');
    }
    Ok(text.trim().to_owned())
}

/// List a page's images and convert each one to grayscale.
///
/// A page whose resources can't be read fails outright. Individual images
/// fail individually, so the caller can apply its [`ImageErrorPolicy`].
fn decode_page_images(
    doc: &PdfDocument,
    page_idx: usize,
) -> Result<Vec<Result<GrayImage, ExtractError>>, ExtractError> {
    let images = doc.page_images(page_idx)?;
    debug!(image_count = images.len(), "Listed page images");
    Ok(images
        .iter()
        .enumerate()
        .map(|(image_idx, image)| {
            doc.extract_image(image)
                .and_then(|extracted| {
                    trace!(
                        image = image_idx,
                        object = ?image.id,
                        format = extracted.format.extension(),
                        width = extracted.width,
                        height = extracted.height,
                        "Decoding image"
                    );
                    extracted.to_grayscale()
                })
                .map_err(|err| ExtractError::ImageDecode {
                    page_idx,
                    image_idx,
                    reason: format!("{:#}", err),
                })
        })
        .collect())
}
