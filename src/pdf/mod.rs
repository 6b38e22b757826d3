//! Loading PDF documents and finding the images embedded in their pages.

use std::collections::HashSet;

use lopdf::{Dictionary, Document, Object, ObjectId, Stream};

use self::filters::{FilterStep, PredictorParams, apply_filters};
use crate::{errors::ExtractError, prelude::*};

mod filters;
pub mod image;

pub use self::image::{ColorModel, ExtractedImage, ImageFormatTag};

/// The MIME type we require our input to have.
const PDF_MIME_TYPE: &str = "application/pdf";

/// How many references, page tree levels or nested forms we'll follow before
/// deciding that a document is malformed.
const MAX_DEPTH: usize = 32;

/// A parsed, read-only PDF document.
pub struct PdfDocument {
    doc: Document,
    /// Page object IDs in page tree order.
    pages: Vec<ObjectId>,
}

/// An image XObject referenced by a page.
#[derive(Clone, Copy)]
pub struct EmbeddedImage<'a> {
    /// The image's object ID.
    pub id: ObjectId,
    stream: &'a Stream,
}

impl PdfDocument {
    /// Parse a PDF held in memory.
    #[instrument(level = "debug", skip_all, fields(len = bytes.len()))]
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, ExtractError> {
        if bytes.is_empty() {
            return Err(ExtractError::document_parse("document is empty"));
        }
        match infer::get(bytes).map(|kind| kind.mime_type()) {
            Some(PDF_MIME_TYPE) => {}
            Some(other) => {
                return Err(ExtractError::document_parse(format!(
                    "expected {}, found {}",
                    PDF_MIME_TYPE, other
                )));
            }
            None => {
                return Err(ExtractError::document_parse("input is not a PDF file"));
            }
        }

        let doc = Document::load_mem(bytes).map_err(ExtractError::document_parse)?;
        let pages = doc.get_pages().into_values().collect::<Vec<_>>();
        debug!(page_count = pages.len(), "Loaded PDF");
        Ok(Self { doc, pages })
    }

    /// The number of pages in the document.
    pub fn page_count(&self) -> usize {
        self.pages.len()
    }

    /// List the images on a page, in the order the page's resources name
    /// them. Images used by form XObjects on the page are included, and each
    /// image is listed once.
    pub fn page_images(&self, page_idx: usize) -> Result<Vec<EmbeddedImage<'_>>, ExtractError> {
        let page_id = *self.pages.get(page_idx).ok_or_else(|| {
            ExtractError::document_parse(format!(
                "no page {} in a {}-page document",
                page_idx + 1,
                self.pages.len()
            ))
        })?;
        let mut images = vec![];
        let result = self.page_resources(page_id).and_then(|resources| {
            if let Some(resources) = resources {
                self.collect_images(resources, &mut HashSet::new(), &mut images, 0)?;
            }
            Ok(())
        });
        result.map_err(|err| {
            ExtractError::document_parse(format!(
                "bad resources on page {}: {:#}",
                page_idx + 1,
                err
            ))
        })?;
        Ok(images)
    }

    /// Undo transport filters and gather everything needed to decode an
    /// image.
    pub fn extract_image(&self, image: &EmbeddedImage<'_>) -> Result<ExtractedImage> {
        let dict = &image.stream.dict;
        let image_mask = self
            .get(dict, b"ImageMask")
            .and_then(|obj| obj.as_bool().ok())
            .unwrap_or(false);
        let width = self.dimension(dict, b"Width")?;
        let height = self.dimension(dict, b"Height")?;
        let steps = self.filter_steps(dict)?;
        let (data, format) = apply_filters(&image.stream.content, &steps)?;

        let bits_per_component = if image_mask {
            1
        } else {
            self.get(dict, b"BitsPerComponent")
                .and_then(|obj| obj.as_i64().ok())
                .and_then(|bpc| u8::try_from(bpc).ok())
                .unwrap_or(8)
        };
        let color = if image_mask {
            ColorModel::Gray
        } else {
            match self.get(dict, b"ColorSpace") {
                Some(space) => self.color_model(space, 0)?,
                None => ColorModel::Gray,
            }
        };

        Ok(ExtractedImage {
            format,
            data,
            width,
            height,
            bits_per_component,
            color,
            invert: self.decode_is_inverted(dict),
        })
    }

    /// Follow references until we reach a direct object.
    fn resolve<'a>(&'a self, mut obj: &'a Object) -> Result<&'a Object> {
        for _ in 0..MAX_DEPTH {
            match obj {
                Object::Reference(id) => obj = self.doc.get_object(*id)?,
                direct => return Ok(direct),
            }
        }
        Err(anyhow!("reference chain is too long"))
    }

    /// Look up and resolve a dictionary entry, treating broken references as
    /// missing.
    fn get<'a>(&'a self, dict: &'a Dictionary, key: &[u8]) -> Option<&'a Object> {
        dict.get(key).ok().and_then(|obj| self.resolve(obj).ok())
    }

    /// Find a page's resource dictionary, which may be inherited from any
    /// ancestor in the page tree.
    fn page_resources(&self, page_id: ObjectId) -> Result<Option<&Dictionary>> {
        let mut node_id = page_id;
        for _ in 0..MAX_DEPTH {
            let node = self.doc.get_dictionary(node_id)?;
            if let Ok(resources) = node.get(b"Resources") {
                return Ok(Some(self.resolve(resources)?.as_dict()?));
            }
            match node.get(b"Parent").and_then(Object::as_reference) {
                Ok(parent) => node_id = parent,
                Err(_) => return Ok(None),
            }
        }
        Err(anyhow!("page tree is too deep"))
    }

    /// Collect image XObjects from `resources`, descending into forms.
    fn collect_images<'a>(
        &'a self,
        resources: &'a Dictionary,
        seen: &mut HashSet<ObjectId>,
        images: &mut Vec<EmbeddedImage<'a>>,
        depth: usize,
    ) -> Result<()> {
        if depth > MAX_DEPTH {
            return Err(anyhow!("form XObjects are nested too deeply"));
        }
        let Some(xobjects) = self.get(resources, b"XObject") else {
            return Ok(());
        };
        for (name, obj) in xobjects.as_dict()?.iter() {
            // XObjects must be indirect, so anything else is junk we can skip.
            let Object::Reference(id) = obj else {
                continue;
            };
            if !seen.insert(*id) {
                continue;
            }
            let stream = match self.doc.get_object(*id).and_then(Object::as_stream) {
                Ok(stream) => stream,
                Err(err) => {
                    warn!(
                        name = %String::from_utf8_lossy(name),
                        "Skipping unreadable XObject: {}",
                        err
                    );
                    continue;
                }
            };
            match self.get(&stream.dict, b"Subtype").map(Object::as_name) {
                Some(Ok(b"Image")) => images.push(EmbeddedImage { id: *id, stream }),
                Some(Ok(b"Form")) => {
                    if let Some(form_resources) = self.get(&stream.dict, b"Resources") {
                        self.collect_images(form_resources.as_dict()?, seen, images, depth + 1)?;
                    }
                }
                _ => {}
            }
        }
        Ok(())
    }

    fn dimension(&self, dict: &Dictionary, key: &[u8]) -> Result<u32> {
        let value = self
            .get(dict, key)
            .ok_or_else(|| anyhow!("image has no /{}", String::from_utf8_lossy(key)))?
            .as_i64()?;
        u32::try_from(value)
            .map_err(|_| anyhow!("invalid image /{}: {}", String::from_utf8_lossy(key), value))
    }

    /// Turn `/Filter` and `/DecodeParms` into a list of filter steps.
    fn filter_steps(&self, dict: &Dictionary) -> Result<Vec<FilterStep>> {
        let names = match self.get(dict, b"Filter") {
            None => vec![],
            Some(Object::Array(items)) => items
                .iter()
                .map(|item| Ok(self.resolve(item)?.as_name()?.to_vec()))
                .collect::<Result<Vec<_>>>()?,
            Some(other) => vec![other.as_name()?.to_vec()],
        };
        let params = match self.get(dict, b"DecodeParms") {
            Some(Object::Array(items)) => items
                .iter()
                .map(|item| self.resolve(item).ok().and_then(|obj| obj.as_dict().ok()))
                .collect::<Vec<_>>(),
            Some(Object::Dictionary(params)) => vec![Some(params)],
            _ => vec![],
        };
        Ok(names
            .into_iter()
            .enumerate()
            .map(|(idx, name)| FilterStep {
                name,
                predictor: params
                    .get(idx)
                    .copied()
                    .flatten()
                    .map(|params| self.predictor_params(params)),
            })
            .collect())
    }

    fn predictor_params(&self, params: &Dictionary) -> PredictorParams {
        let defaults = PredictorParams::default();
        let int = |key: &[u8], default: i64| {
            self.get(params, key)
                .and_then(|obj| obj.as_i64().ok())
                .unwrap_or(default)
        };
        let positive = |key: &[u8], default: usize| {
            usize::try_from(int(key, default as i64))
                .ok()
                .filter(|v| *v > 0)
                .unwrap_or(default)
        };
        PredictorParams {
            predictor: int(b"Predictor", defaults.predictor),
            colors: positive(b"Colors", defaults.colors),
            bits_per_component: positive(b"BitsPerComponent", defaults.bits_per_component),
            columns: positive(b"Columns", defaults.columns),
        }
    }

    /// Does the `/Decode` array swap the meaning of low and high samples?
    fn decode_is_inverted(&self, dict: &Dictionary) -> bool {
        let Some(Object::Array(decode)) = self.get(dict, b"Decode") else {
            return false;
        };
        let number = |obj: Option<&Object>| obj.and_then(|o| o.as_float().ok());
        match (number(decode.first()), number(decode.get(1))) {
            (Some(lo), Some(hi)) => lo > hi,
            _ => false,
        }
    }

    /// Interpret a `/ColorSpace` value.
    fn color_model(&self, space: &Object, depth: usize) -> Result<ColorModel> {
        if depth > MAX_DEPTH {
            return Err(anyhow!("colour space is nested too deeply"));
        }
        let (family, args) = match self.resolve(space)? {
            Object::Name(name) => (name.as_slice(), &[][..]),
            Object::Array(items) if !items.is_empty() => {
                (self.resolve(&items[0])?.as_name()?, &items[1..])
            }
            other => return Err(anyhow!("invalid colour space {:?}", other)),
        };
        match family {
            b"DeviceGray" | b"CalGray" | b"G" => Ok(ColorModel::Gray),
            b"DeviceRGB" | b"CalRGB" | b"RGB" => Ok(ColorModel::Rgb),
            b"DeviceCMYK" | b"CMYK" => Ok(ColorModel::Cmyk),
            b"Separation" => Ok(ColorModel::Separation),
            b"ICCBased" => {
                let profile = args
                    .first()
                    .ok_or_else(|| anyhow!("ICCBased colour space has no profile"))?;
                let profile = self.resolve(profile)?.as_stream()?;
                if let Some(alternate) = self.get(&profile.dict, b"Alternate") {
                    return self.color_model(alternate, depth + 1);
                }
                match self.get(&profile.dict, b"N").map(Object::as_i64) {
                    Some(Ok(1)) => Ok(ColorModel::Gray),
                    Some(Ok(3)) => Ok(ColorModel::Rgb),
                    Some(Ok(4)) => Ok(ColorModel::Cmyk),
                    other => Err(anyhow!("unsupported ICC component count {:?}", other)),
                }
            }
            b"Indexed" | b"I" => {
                let [base, hival, lookup, ..] = args else {
                    return Err(anyhow!("Indexed colour space is missing entries"));
                };
                let base = self.color_model(base, depth + 1)?;
                let hival = self.resolve(hival)?.as_i64()?.clamp(0, 255) as u8;
                let lookup = match self.resolve(lookup)? {
                    Object::String(bytes, _) => bytes.clone(),
                    Object::Stream(stream) => {
                        let steps = self.filter_steps(&stream.dict)?;
                        apply_filters(&stream.content, &steps)?.0
                    }
                    other => return Err(anyhow!("invalid Indexed lookup table {:?}", other)),
                };
                Ok(ColorModel::Indexed {
                    base: Box::new(base),
                    hival,
                    lookup,
                })
            }
            other => Err(anyhow!(
                "unsupported colour space {}",
                String::from_utf8_lossy(other)
            )),
        }
    }
}
