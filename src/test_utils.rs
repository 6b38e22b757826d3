//! Helpers shared by unit tests: synthetic PDFs and fake OCR engines.

use std::{
    collections::HashMap,
    io::Write as _,
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use flate2::{Compression, write::ZlibEncoder};
use lopdf::{Dictionary, Document, Object, Stream, dictionary};

use crate::{
    ocr::{OcrEngine, OcrImageInput},
    prelude::*,
};

/// An image to embed in a test PDF.
#[derive(Clone, Debug)]
pub enum TestImage {
    /// A flate-compressed 8-bit gray image filled with one value.
    Gray { width: u32, height: u32, value: u8 },
    /// A "JPEG" whose bytes are garbage.
    CorruptJpeg,
}

impl TestImage {
    pub fn gray(width: u32, height: u32, value: u8) -> Self {
        TestImage::Gray {
            width,
            height,
            value,
        }
    }

    fn to_stream(&self) -> Stream {
        match self {
            TestImage::Gray {
                width,
                height,
                value,
            } => {
                let pixels = vec![*value; (*width * *height) as usize];
                let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
                encoder.write_all(&pixels).expect("in-memory write");
                let data = encoder.finish().expect("in-memory write");
                Stream::new(
                    dictionary! {
                        "Type" => "XObject",
                        "Subtype" => "Image",
                        "Width" => i64::from(*width),
                        "Height" => i64::from(*height),
                        "ColorSpace" => "DeviceGray",
                        "BitsPerComponent" => 8_i64,
                        "Filter" => "FlateDecode",
                    },
                    data,
                )
            }
            TestImage::CorruptJpeg => Stream::new(
                dictionary! {
                    "Type" => "XObject",
                    "Subtype" => "Image",
                    "Width" => 8_i64,
                    "Height" => 8_i64,
                    "ColorSpace" => "DeviceGray",
                    "BitsPerComponent" => 8_i64,
                    "Filter" => "DCTDecode",
                },
                b"\xff\xd8\xff\xe0 this is not a jpeg".to_vec(),
            ),
        }
    }
}

/// Build a PDF with one page per entry in `pages`, each showing the listed
/// images.
pub fn build_pdf(pages: &[Vec<TestImage>]) -> Vec<u8> {
    let mut doc = Document::with_version("1.5");
    let pages_id = doc.new_object_id();

    let mut kids = vec![];
    for images in pages {
        let mut xobjects = Dictionary::new();
        let mut content = String::new();
        for (idx, image) in images.iter().enumerate() {
            let image_id = doc.add_object(image.to_stream());
            let name = format!("Im{}", idx);
            content.push_str(&format!("q 100 0 0 100 0 0 cm /{} Do Q\n", name));
            xobjects.set(name, image_id);
        }
        let content_id = doc.add_object(Stream::new(Dictionary::new(), content.into_bytes()));
        let page_id = doc.add_object(dictionary! {
            "Type" => "Page",
            "Parent" => pages_id,
            "Contents" => content_id,
            "MediaBox" => vec![
                Object::Integer(0),
                Object::Integer(0),
                Object::Integer(612),
                Object::Integer(792),
            ],
            "Resources" => dictionary! { "XObject" => xobjects },
        });
        kids.push(Object::Reference(page_id));
    }

    let count = kids.len() as i64;
    doc.objects.insert(
        pages_id,
        Object::Dictionary(dictionary! {
            "Type" => "Pages",
            "Kids" => kids,
            "Count" => count,
        }),
    );
    let catalog_id = doc.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => pages_id,
    });
    doc.trailer.set("Root", catalog_id);

    let mut bytes = Vec::new();
    doc.save_to(&mut bytes).expect("in-memory save");
    bytes
}

/// A PDF with `page_count` pages, each holding one small gray image.
pub fn pdf_with_one_image_per_page(page_count: usize) -> Vec<u8> {
    let pages = (0..page_count)
        .map(|_| vec![TestImage::gray(4, 4, 0)])
        .collect::<Vec<_>>();
    build_pdf(&pages)
}

/// A fake OCR engine that answers `page {N} image {M}`, optionally after a
/// per-page delay, and records how many calls were in flight at once.
#[derive(Default)]
pub struct FakeOcrEngine {
    delays: HashMap<usize, Duration>,
    failing_pages: Vec<usize>,
    live: AtomicUsize,
    peak: AtomicUsize,
    calls: AtomicUsize,
}

impl FakeOcrEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Delay every image on `page_idx` by `delay`.
    pub fn with_delay(mut self, page_idx: usize, delay: Duration) -> Self {
        self.delays.insert(page_idx, delay);
        self
    }

    /// Delay every image on every page in `0..page_count` by `delay`.
    pub fn with_uniform_delay(mut self, page_count: usize, delay: Duration) -> Self {
        for page_idx in 0..page_count {
            self.delays.insert(page_idx, delay);
        }
        self
    }

    /// Fail every image on `page_idx`.
    pub fn failing_on(mut self, page_idx: usize) -> Self {
        self.failing_pages.push(page_idx);
        self
    }

    pub fn into_arc(self) -> Arc<Self> {
        Arc::new(self)
    }

    /// The largest number of simultaneous `recognize` calls seen.
    pub fn peak_concurrency(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    /// Total number of `recognize` calls.
    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl OcrEngine for FakeOcrEngine {
    async fn recognize(&self, input: OcrImageInput) -> Result<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let now = self.live.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        if let Some(delay) = self.delays.get(&input.page_idx) {
            tokio::time::sleep(*delay).await;
        }
        self.live.fetch_sub(1, Ordering::SeqCst);
        if self.failing_pages.contains(&input.page_idx) {
            return Err(anyhow!("fake engine refuses page {}", input.page_idx));
        }
        Ok(format!("page {} image {}\n", input.page_idx, input.image_idx))
    }
}
