//! Images pulled out of a PDF, and their conversion to grayscale bitmaps.

use image::{GrayImage, ImageFormat, Luma};

use crate::prelude::*;

/// How the bytes of an [`ExtractedImage`] are encoded.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ImageFormatTag {
    /// A complete JPEG file (`DCTDecode`).
    Jpeg,
    /// A JPEG 2000 codestream (`JPXDecode`).
    Jpeg2000,
    /// CCITT Group 3/4 fax data.
    Ccitt,
    /// JBIG2 data.
    Jbig2,
    /// Uncompressed samples, described by the image dictionary.
    Raw,
}

impl ImageFormatTag {
    /// A conventional file extension for this format.
    pub fn extension(self) -> &'static str {
        match self {
            ImageFormatTag::Jpeg => "jpeg",
            ImageFormatTag::Jpeg2000 => "jpx",
            ImageFormatTag::Ccitt => "fax",
            ImageFormatTag::Jbig2 => "jb2",
            ImageFormatTag::Raw => "raw",
        }
    }
}

/// The colour model of an image's samples.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ColorModel {
    Gray,
    Rgb,
    Cmyk,
    /// A single ink. Higher samples mean more ink, so darker output.
    Separation,
    /// Samples index into `lookup`, which holds colours in `base`.
    Indexed {
        base: Box<ColorModel>,
        hival: u8,
        lookup: Vec<u8>,
    },
}

impl ColorModel {
    /// Number of samples per pixel.
    pub fn components(&self) -> usize {
        match self {
            ColorModel::Gray | ColorModel::Separation | ColorModel::Indexed { .. } => 1,
            ColorModel::Rgb => 3,
            ColorModel::Cmyk => 4,
        }
    }

    /// Convert one pixel's samples, already scaled to 0..=255, to luminance.
    fn luma(&self, samples: &[u8]) -> u8 {
        match self {
            ColorModel::Gray => samples[0],
            ColorModel::Separation => 255 - samples[0],
            ColorModel::Rgb => rgb_to_luma(samples[0], samples[1], samples[2]),
            ColorModel::Cmyk => {
                let k = 255 - u16::from(samples[3]);
                let channel = |c: u8| ((255 - u16::from(c)) * k / 255) as u8;
                rgb_to_luma(channel(samples[0]), channel(samples[1]), channel(samples[2]))
            }
            ColorModel::Indexed {
                base,
                hival,
                lookup,
            } => {
                let index = usize::from(samples[0].min(*hival));
                let width = base.components();
                match lookup.get(index * width..(index + 1) * width) {
                    Some(entry) => base.luma(entry),
                    // Short lookup tables are common enough. Treat missing
                    // entries as black.
                    None => 0,
                }
            }
        }
    }
}

/// ITU-R 601-2 luma, as used by most imaging libraries' "L" conversion.
fn rgb_to_luma(r: u8, g: u8, b: u8) -> u8 {
    ((u32::from(r) * 19595 + u32::from(g) * 38470 + u32::from(b) * 7471 + 0x8000) >> 16)
        as u8
}

/// An image extracted from a PDF page. This only lives inside a page worker.
#[derive(Clone, Debug)]
pub struct ExtractedImage {
    /// How `data` is encoded.
    pub format: ImageFormatTag,
    /// The image bytes, with transport filters already removed.
    pub data: Vec<u8>,
    pub width: u32,
    pub height: u32,
    pub bits_per_component: u8,
    pub color: ColorModel,
    /// Should samples be inverted (`/Decode [1 0]`)?
    pub invert: bool,
}

impl ExtractedImage {
    /// Decode this image and convert it to 8-bit grayscale.
    pub fn to_grayscale(&self) -> Result<GrayImage> {
        match self.format {
            ImageFormatTag::Jpeg => {
                let rgb = image::load_from_memory_with_format(&self.data, ImageFormat::Jpeg)
                    .context("invalid JPEG data")?
                    .to_rgb8();
                Ok(GrayImage::from_fn(rgb.width(), rgb.height(), |x, y| {
                    let [r, g, b] = rgb.get_pixel(x, y).0;
                    Luma([rgb_to_luma(r, g, b)])
                }))
            }
            ImageFormatTag::Raw => self.raw_to_grayscale(),
            other => Err(anyhow!(
                "no decoder available for {} images",
                other.extension()
            )),
        }
    }

    /// Unpack raw samples into a grayscale bitmap.
    fn raw_to_grayscale(&self) -> Result<GrayImage> {
        let bpc = self.bits_per_component;
        if !matches!(bpc, 1 | 2 | 4 | 8 | 16) {
            return Err(anyhow!("unsupported bits per component: {}", bpc));
        }
        if self.width == 0 || self.height == 0 {
            return Err(anyhow!("image has no pixels"));
        }

        let components = self.color.components();
        let width = self.width as usize;
        let height = self.height as usize;
        let row_bits = width
            .checked_mul(components)
            .and_then(|n| n.checked_mul(usize::from(bpc)));
        let row_bytes = row_bits.map(|bits| bits.div_ceil(8));
        let needed = row_bytes.and_then(|n| n.checked_mul(height));
        let (Some(row_bytes), Some(needed)) = (row_bytes, needed) else {
            return Err(anyhow!(
                "image data is truncated ({} bytes for a {}x{} image)",
                self.data.len(),
                self.width,
                self.height
            ));
        };
        if self.data.len() < needed {
            return Err(anyhow!(
                "image data is truncated ({} bytes, expected {})",
                self.data.len(),
                needed
            ));
        }

        let indexed = matches!(self.color, ColorModel::Indexed { .. });
        let max = (1u32 << bpc) - 1;
        let mut samples = [0u8; 4];
        let mut gray = GrayImage::new(self.width, self.height);
        for (y, row) in self.data.chunks(row_bytes).take(height).enumerate() {
            for x in 0..width {
                for (c, slot) in samples.iter_mut().enumerate().take(components) {
                    let raw = read_sample(row, x * components + c, bpc);
                    let raw = if self.invert && !indexed { max - raw } else { raw };
                    *slot = if indexed {
                        raw.min(255) as u8
                    } else {
                        scale_to_u8(raw, bpc)
                    };
                }
                let luma = self.color.luma(&samples[..components]);
                gray.put_pixel(x as u32, y as u32, Luma([luma]));
            }
        }
        Ok(gray)
    }
}

/// Read sample number `idx` from a packed row.
fn read_sample(row: &[u8], idx: usize, bpc: u8) -> u32 {
    match bpc {
        8 => u32::from(row[idx]),
        16 => u32::from(row[2 * idx]) << 8 | u32::from(row[2 * idx + 1]),
        _ => {
            let bit = idx * usize::from(bpc);
            let shift = 8 - usize::from(bpc) - bit % 8;
            let mask = (1u8 << bpc) - 1;
            u32::from((row[bit / 8] >> shift) & mask)
        }
    }
}

/// Scale a sample with `bpc` bits to the range 0..=255.
fn scale_to_u8(value: u32, bpc: u8) -> u8 {
    match bpc {
        8 => value as u8,
        16 => (value >> 8) as u8,
        _ => (value * 255 / ((1 << bpc) - 1)) as u8,
    }
}
